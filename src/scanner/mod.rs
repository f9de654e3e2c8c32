//! Incremental transcript scanner — turns conversation text into entries
//! without user action.
//!
//! Reads the most recently modified JSONL log from a persisted byte cursor,
//! extracts message text, and runs three capture passes: semantic
//! classification into insights, directive detection into pending-rule
//! proposals, and error→resolution pairing into debugging patterns. Every
//! insert is deduplicated against the vector index first.

pub mod signals;

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::clock;
use crate::config::ScannerConfig;
use crate::embedding::{Catalog, Embedder};
use crate::store::cosine_threshold_to_l2;
use crate::store::types::{Entry, EntryType, Tier};
use crate::store::Store;

/// Minimum extracted-text length worth classifying.
const MIN_TEXT_CHARS: usize = 20;

/// User messages classify against intent templates at this threshold.
const INTENT_THRESHOLD: f64 = 0.3;

/// Assistant messages classify against category templates at this threshold.
const CATEGORY_THRESHOLD: f64 = 0.7;

/// Anchor-template threshold for the rule-proposal semantic gate.
const ANCHOR_THRESHOLD: f64 = 0.35;

/// L2 distance under which a capture is a near-duplicate of a stored entry.
const NEAR_DUP_DISTANCE: f64 = 0.55;

/// Cosine floor for "this rule proposal already exists".
const RULE_SIM_COSINE: f64 = 0.75;

/// How many messages back to look for an error before a resolution.
const ERROR_LOOKBACK: usize = 8;

/// Byte position in a transcript file, persisted between scans.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Cursor {
    pub file: String,
    pub offset: u64,
}

/// What one scan invocation captured.
#[derive(Debug, Default, Serialize)]
pub struct ScanReport {
    pub messages_seen: usize,
    pub insights_captured: usize,
    pub rules_proposed: usize,
    pub debug_patterns: usize,
}

impl ScanReport {
    pub fn captured_anything(&self) -> bool {
        self.insights_captured + self.rules_proposed + self.debug_patterns > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    User,
    Assistant,
}

struct Message {
    role: Role,
    text: String,
}

/// Run one incremental scan. Reads at most `max_chunk_bytes`, classifies at
/// most `max_messages`, and persists the new cursor unconditionally.
pub fn scan(
    store: &mut Store,
    embedder: &Embedder,
    transcript_dir: &Path,
    cursor_path: &Path,
    config: &ScannerConfig,
) -> Result<ScanReport> {
    let mut report = ScanReport::default();

    let Some(current) = newest_transcript(transcript_dir) else {
        return Ok(report);
    };
    let current_str = current.to_string_lossy().into_owned();

    let mut offset = match load_cursor(cursor_path) {
        Some(cursor) if cursor.file == current_str => cursor.offset,
        Some(cursor) => {
            // Log rotated. If the old file is simply gone, re-anchor at the
            // current file and pick it up on the next invocation.
            if !Path::new(&cursor.file).exists() {
                persist_cursor(cursor_path, &Cursor { file: current_str, offset: 0 })?;
                return Ok(report);
            }
            0
        }
        None => 0,
    };

    let file_len = std::fs::metadata(&current)?.len();
    if offset > file_len {
        // Truncated in place; start over
        offset = 0;
    }

    let chunk = read_chunk(&current, offset, config.max_chunk_bytes)?;
    let Some(last_newline) = chunk.iter().rposition(|&b| b == b'\n') else {
        persist_cursor(cursor_path, &Cursor { file: current_str, offset })?;
        return Ok(report);
    };
    let complete = &chunk[..=last_newline];
    let new_offset = offset + last_newline as u64 + 1;

    let messages = extract_messages(complete);
    report.messages_seen = messages.len();

    classify_messages(store, embedder, &current_str, &messages, config.max_messages, &mut report);
    propose_rules(store, embedder, &current_str, &messages, &mut report);
    capture_debug_patterns(store, embedder, &current_str, &messages, &mut report);

    persist_cursor(cursor_path, &Cursor { file: current_str, offset: new_offset })?;
    Ok(report)
}

// ── Incremental read ─────────────────────────────────────────────────────────

/// Most recently modified `.jsonl` in the directory.
fn newest_transcript(dir: &Path) -> Option<PathBuf> {
    let entries = std::fs::read_dir(dir).ok()?;
    entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().map_or(false, |ext| ext == "jsonl"))
        .max_by_key(|p| {
            std::fs::metadata(p)
                .and_then(|m| m.modified())
                .unwrap_or(std::time::SystemTime::UNIX_EPOCH)
        })
}

fn load_cursor(path: &Path) -> Option<Cursor> {
    let text = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&text).ok()
}

fn persist_cursor(path: &Path, cursor: &Cursor) -> Result<()> {
    if let Some(parent) = path.parent() {
        crate::db::create_private_dir(parent)?;
    }
    std::fs::write(path, serde_json::to_string(cursor)?)
        .with_context(|| format!("failed to write cursor {}", path.display()))?;
    Ok(())
}

fn read_chunk(path: &Path, offset: u64, max_bytes: u64) -> Result<Vec<u8>> {
    use std::io::Seek;
    let mut file = std::fs::File::open(path)
        .with_context(|| format!("failed to open transcript {}", path.display()))?;
    file.seek(std::io::SeekFrom::Start(offset))?;
    let mut buf = Vec::new();
    file.take(max_bytes).read_to_end(&mut buf)?;
    Ok(buf)
}

// ── Message extraction ───────────────────────────────────────────────────────

#[derive(Deserialize)]
struct RawRecord {
    #[serde(rename = "type")]
    kind: String,
    message: Option<RawMessage>,
}

#[derive(Deserialize)]
struct RawMessage {
    content: serde_json::Value,
}

/// Parse complete JSONL lines into role-tagged texts, dropping anything
/// unparseable and anything under the length floor.
fn extract_messages(bytes: &[u8]) -> Vec<Message> {
    bytes
        .split(|&b| b == b'\n')
        .filter(|line| !line.is_empty())
        .filter_map(|line| serde_json::from_slice::<RawRecord>(line).ok())
        .filter_map(|record| {
            let role = match record.kind.as_str() {
                "user" => Role::User,
                "assistant" => Role::Assistant,
                _ => return None,
            };
            let text = text_of(&record.message?.content, role)?;
            if text.chars().count() < MIN_TEXT_CHARS {
                return None;
            }
            Some(Message { role, text })
        })
        .collect()
}

/// Extract plain text from a message content value.
///
/// Strings are trimmed. Assistant array content concatenates `text` blocks,
/// skipping tool_use / tool_result / thinking. User array content is tool
/// results and is skipped entirely.
fn text_of(content: &serde_json::Value, role: Role) -> Option<String> {
    match content {
        serde_json::Value::String(s) => {
            let t = s.trim();
            (!t.is_empty()).then(|| t.to_string())
        }
        serde_json::Value::Array(blocks) if role == Role::Assistant => {
            let parts: Vec<&str> = blocks
                .iter()
                .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
                .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
                .collect();
            (!parts.is_empty()).then(|| parts.join("\n").trim().to_string())
        }
        _ => None,
    }
}

// ── Capture passes ───────────────────────────────────────────────────────────

/// Semantic classification into insight entries, capped per scan.
fn classify_messages(
    store: &mut Store,
    embedder: &Embedder,
    source: &str,
    messages: &[Message],
    max_messages: usize,
    report: &mut ScanReport,
) {
    for message in messages.iter().take(max_messages) {
        let (catalog, threshold, role_tag) = match message.role {
            Role::User => (Catalog::Intent, INTENT_THRESHOLD, "source:user"),
            Role::Assistant => (Catalog::Category, CATEGORY_THRESHOLD, "source:assistant"),
        };
        let verdict = match embedder.classify(&message.text, catalog, threshold) {
            Ok(Some(v)) => v,
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!(error = %e, "classification failed, skipping message");
                continue;
            }
        };

        match capture_insight(
            store,
            embedder,
            source,
            &message.text,
            Tier::Working,
            vec![
                "transcript-scan".to_string(),
                role_tag.to_string(),
                format!("intent:{}", verdict.category),
            ],
        ) {
            Ok(true) => report.insights_captured += 1,
            Ok(false) => {}
            Err(e) => tracing::warn!(error = %e, "insight capture failed"),
        }
    }
}

/// Directive detection: propose a pending rule for user messages that pass
/// both the anchor-template match and the regex signal gate.
fn propose_rules(
    store: &mut Store,
    embedder: &Embedder,
    source: &str,
    messages: &[Message],
    report: &mut ScanReport,
) {
    for message in messages.iter().filter(|m| m.role == Role::User) {
        let scores = signals::score_signals(&message.text);
        if !signals::passes_directive_gate(&scores) {
            continue;
        }
        let anchor = match embedder.classify(&message.text, Catalog::Anchor, ANCHOR_THRESHOLD) {
            Ok(Some(v)) => v,
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!(error = %e, "anchor classification failed");
                continue;
            }
        };

        let v_msg = match embedder.embed(&message.text) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "embed failed for rule proposal");
                continue;
            }
        };
        match has_similar_rule(store, &v_msg) {
            Ok(true) => continue,
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(error = %e, "rule similarity check failed");
                continue;
            }
        }

        // Dedup here is rules-only (checked above); the generic near-dup
        // gate does not apply — an already-captured insight must not
        // swallow its own rule proposal
        let label = slug(&prefix_chars(&message.text, 40));
        match insert_capture(
            store,
            &v_msg,
            source,
            &message.text,
            Tier::Working,
            vec![
                "pending_rule".to_string(),
                format!("proposed-label:{label}"),
                format!("anchor:{}", anchor.category),
            ],
        ) {
            Ok(()) => report.rules_proposed += 1,
            Err(e) => tracing::warn!(error = %e, "rule proposal failed"),
        }
    }
}

/// Pair error mentions with later resolution phrasings into longterm
/// debugging-pattern insights.
fn capture_debug_patterns(
    store: &mut Store,
    embedder: &Embedder,
    source: &str,
    messages: &[Message],
    report: &mut ScanReport,
) {
    for (i, message) in messages.iter().enumerate() {
        if message.role != Role::Assistant || !resolution_re().is_match(&message.text) {
            continue;
        }
        let window_start = i.saturating_sub(ERROR_LOOKBACK);
        let error = messages[window_start..i]
            .iter()
            .find(|m| error_re().is_match(&m.text));
        let Some(error) = error else { continue };

        let content = format!(
            "Debugging pattern\nError: {}\nResolution: {}",
            prefix_chars(&error.text, 300),
            prefix_chars(&message.text, 500),
        );
        match capture_insight(
            store,
            embedder,
            source,
            &content,
            Tier::Longterm,
            vec![
                "debugging-pattern".to_string(),
                "transcript-scan".to_string(),
                "auto-captured".to_string(),
            ],
        ) {
            Ok(true) => report.debug_patterns += 1,
            Ok(false) => {}
            Err(e) => tracing::warn!(error = %e, "debug pattern capture failed"),
        }
    }
}

/// Insert an insight unless its vector is a near-duplicate of a stored row.
/// Returns whether a row was inserted.
fn capture_insight(
    store: &mut Store,
    embedder: &Embedder,
    source: &str,
    content: &str,
    tier: Tier,
    tags: Vec<String>,
) -> Result<bool> {
    let v = embedder.embed(content)?;
    if is_near_duplicate(store, &v)? {
        return Ok(false);
    }
    insert_capture(store, &v, source, content, tier, tags)?;
    Ok(true)
}

/// Unconditional insight insert with an already-computed vector.
fn insert_capture(
    store: &mut Store,
    v: &[f32],
    source: &str,
    content: &str,
    tier: Tier,
    tags: Vec<String>,
) -> Result<()> {
    let mut entry = Entry::new(
        clock::mint_id(),
        clock::today_ymd(),
        clock::time_hhmm(),
        EntryType::Insight,
        content.to_string(),
    );
    entry.tier = tier;
    entry.tags = tags;
    entry.source_file = Some(source.to_string());
    entry.session_id = Some(clock::session_id().to_string());

    let row = store.insert(&entry)?;
    store.insert_vec(row, v)?;
    Ok(())
}

/// Nearest stored vector closer than the near-duplicate floor?
fn is_near_duplicate(store: &Store, v: &[f32]) -> Result<bool> {
    let top = store.search_vec(v, 1)?;
    Ok(top.first().map_or(false, |(_, d)| *d < NEAR_DUP_DISTANCE))
}

/// Does any rule or pending-rule proposal sit within cosine 0.75 of `v`?
fn has_similar_rule(store: &Store, v: &[f32]) -> Result<bool> {
    let max_distance = cosine_threshold_to_l2(RULE_SIM_COSINE);
    let close: Vec<i64> = store
        .search_vec(v, 10)?
        .into_iter()
        .take_while(|(_, d)| *d <= max_distance)
        .map(|(row, _)| row)
        .collect();
    if close.is_empty() {
        return Ok(false);
    }
    let entries = store.get_by_rowids(&close)?;
    Ok(entries.iter().any(|e| {
        e.entry_type == EntryType::Rule || e.tags.iter().any(|t| t == "pending_rule")
    }))
}

// ── Text helpers ─────────────────────────────────────────────────────────────

fn resolution_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(fix was|solution is|the issue was|root cause|now works|resolved by|the problem was)\b",
        )
        .expect("resolution pattern compiles")
    })
}

fn error_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(error|failed|doesn't work|ENOENT|EACCES|EPERM|TypeError|ReferenceError|SyntaxError|exit code [1-9]|command not found)\b",
        )
        .expect("error pattern compiles")
    })
}

/// First `n` chars on a char boundary.
fn prefix_chars(text: &str, n: usize) -> String {
    text.chars().take(n).collect()
}

/// Lowercased, alphanumerics kept, everything else collapsed to single dashes.
fn slug(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_dash = true;
    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    out.trim_end_matches('-').to_string()
}
