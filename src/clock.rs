//! Time source, ID minting, and the process-local session identifier.

use chrono::{DateTime, Local, Utc};
use std::sync::OnceLock;

/// Current UTC timestamp.
pub fn now_utc() -> DateTime<Utc> {
    Utc::now()
}

/// Current UTC timestamp as `YYYY-MM-DDTHH:MM:SSZ` — whole seconds, so
/// SQLite's datetime() can parse it directly.
pub fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// Today's calendar day in host-local time, `YYYY-MM-DD`.
pub fn today_ymd() -> String {
    Local::now().format("%Y-%m-%d").to_string()
}

/// Current host-local wall clock, `HH:MM`.
pub fn time_hhmm() -> String {
    Local::now().format("%H:%M").to_string()
}

/// Mint a new entry ID: 48 bits of entropy, base36, zero-padded to 10 chars.
///
/// IDs must be unique across hosts; 48 bits keeps the collision probability
/// negligible at this store's scale while staying short enough for markdown
/// comments and log lines.
pub fn mint_id() -> String {
    let bits = rand::random::<u64>() & ((1u64 << 48) - 1);
    to_base36(bits)
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut buf = [b'0'; 10];
    let mut i = buf.len();
    loop {
        i -= 1;
        buf[i] = DIGITS[(n % 36) as usize];
        n /= 36;
        if n == 0 {
            break;
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

static SESSION_ID: OnceLock<String> = OnceLock::new();

/// The session identifier for this process.
///
/// Seeded from `HINDSIGHT_SESSION_ID` when the supervisor provides one,
/// otherwise minted once and cached for the life of the process.
pub fn session_id() -> &'static str {
    SESSION_ID.get_or_init(|| {
        std::env::var("HINDSIGHT_SESSION_ID").unwrap_or_else(|_| mint_id())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mint_id_is_base36_and_fixed_width() {
        for _ in 0..50 {
            let id = mint_id();
            assert_eq!(id.len(), 10);
            assert!(id.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
        }
    }

    #[test]
    fn mint_id_does_not_collide_in_small_sample() {
        let ids: std::collections::HashSet<String> = (0..1000).map(|_| mint_id()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn base36_round_trip() {
        assert_eq!(to_base36(0), "0000000000");
        assert_eq!(to_base36(35), "000000000z");
        assert_eq!(to_base36(36), "0000000010");
    }

    #[test]
    fn today_is_iso_shaped() {
        let d = today_ymd();
        assert_eq!(d.len(), 10);
        assert_eq!(&d[4..5], "-");
        assert_eq!(&d[7..8], "-");
    }

    #[test]
    fn session_id_is_stable() {
        assert_eq!(session_id(), session_id());
    }
}
