//! Append-only markdown day files — the human-readable source of record.
//!
//! One file per day under `<base>/context/`. The engine appends a section per
//! entry; the parser reads them back for re-import and recovery. Sections are
//! recognised by their `## ` header, so entry content that itself starts a
//! line with `## ` is split there by design.

use anyhow::{Context, Result};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::store::types::{split_tags, Entry, EntryType};

/// `<base>/context/YYYY-MM-DD.md`
pub fn day_file_path(base: &Path, date: &str) -> PathBuf {
    base.join("context").join(format!("{date}.md"))
}

/// Append an entry section to its day file, writing the header line first
/// if the file is new. Returns the path written (the entry's provenance).
pub fn append_entry(base: &Path, entry: &Entry) -> Result<PathBuf> {
    let path = day_file_path(base, &entry.date);
    if let Some(parent) = path.parent() {
        crate::db::create_private_dir(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let is_new = !path.exists();
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("failed to open day file {}", path.display()))?;

    if is_new {
        writeln!(file, "# Context Log: {}", entry.date)?;
    }
    write!(
        file,
        "\n## {} | {} | {}\n<!-- id:{} -->\n{}\n",
        entry.time,
        entry.entry_type.as_str(),
        entry.tags_joined(),
        entry.id,
        entry.content
    )?;
    file.flush()?;
    Ok(path)
}

/// An entry section read back from a day file.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedEntry {
    pub id: String,
    pub time: String,
    pub entry_type: EntryType,
    pub tags: Vec<String>,
    pub content: String,
}

/// Parse a day file's text into its entry sections.
///
/// Sections without a parseable header or id comment are skipped; a corrupt
/// tail must not take down the rest of the file.
pub fn parse_day_file(text: &str) -> Vec<ParsedEntry> {
    let mut entries = Vec::new();
    for section in text.split("\n## ").skip(1) {
        if let Some(parsed) = parse_section(section) {
            entries.push(parsed);
        }
    }
    entries
}

/// One section: `HH:MM | type | tags\n<!-- id:... -->\ncontent…`
fn parse_section(section: &str) -> Option<ParsedEntry> {
    let mut lines = section.lines();
    let header = lines.next()?;

    let mut fields = header.splitn(3, '|').map(str::trim);
    let time = fields.next()?.to_string();
    let entry_type: EntryType = fields.next()?.parse().ok()?;
    let tags = split_tags(fields.next().unwrap_or(""));

    let id_line = lines.next()?;
    let id = id_line
        .trim()
        .strip_prefix("<!-- id:")?
        .strip_suffix("-->")?
        .trim()
        .to_string();
    if id.is_empty() {
        return None;
    }

    let content = lines.collect::<Vec<_>>().join("\n").trim_end().to_string();
    Some(ParsedEntry {
        id,
        time,
        entry_type,
        tags,
        content,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::types::Entry;

    fn entry(id: &str, time: &str, etype: EntryType, tags: &[&str], content: &str) -> Entry {
        let mut e = Entry::new(
            id.into(),
            "2026-02-20".into(),
            time.into(),
            etype,
            content.into(),
        );
        e.tags = tags.iter().map(|t| t.to_string()).collect();
        e
    }

    #[test]
    fn first_write_adds_header() {
        let tmp = tempfile::tempdir().unwrap();
        let e = entry("abc123", "09:15", EntryType::Decision, &["db"], "Chose SQLite");
        let path = append_entry(tmp.path(), &e).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("# Context Log: 2026-02-20\n"));
        assert!(text.contains("## 09:15 | decision | db"));
        assert!(text.contains("<!-- id:abc123 -->"));
        assert!(text.contains("Chose SQLite"));
    }

    #[test]
    fn second_write_appends_without_second_header() {
        let tmp = tempfile::tempdir().unwrap();
        append_entry(tmp.path(), &entry("id0001", "09:00", EntryType::Issue, &[], "first")).unwrap();
        let path =
            append_entry(tmp.path(), &entry("id0002", "10:30", EntryType::Insight, &["x", "y"], "second"))
                .unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.matches("# Context Log").count(), 1);
        assert_eq!(text.matches("\n## ").count(), 2);
    }

    #[test]
    fn round_trip_preserves_identity_fields() {
        let tmp = tempfile::tempdir().unwrap();
        let originals = vec![
            entry("rt0001", "08:00", EntryType::Decision, &["arch", "db"], "Use WAL mode"),
            entry("rt0002", "12:45", EntryType::Issue, &[], "Tests flake under load\nwith a second line"),
            entry("rt0003", "23:59", EntryType::Handoff, &["eod"], "Done for today"),
        ];
        let mut path = PathBuf::new();
        for e in &originals {
            path = append_entry(tmp.path(), e).unwrap();
        }

        let parsed = parse_day_file(&std::fs::read_to_string(&path).unwrap());
        assert_eq!(parsed.len(), originals.len());
        for (p, o) in parsed.iter().zip(&originals) {
            assert_eq!(p.id, o.id);
            assert_eq!(p.time, o.time);
            assert_eq!(p.entry_type, o.entry_type);
            assert_eq!(p.tags, o.tags);
            assert_eq!(p.content, o.content);
        }
    }

    #[test]
    fn corrupt_sections_are_skipped() {
        let text = "# Context Log: 2026-02-20\n\
                    \n## 09:00 | decision | \n<!-- id:good01 -->\nkept\n\
                    \n## not a header at all\ngarbage\n\
                    \n## 10:00 | issue | \nmissing id comment\n\
                    \n## 11:00 | insight | tag1\n<!-- id:good02 -->\nalso kept\n";
        let parsed = parse_day_file(text);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].id, "good01");
        assert_eq!(parsed[1].id, "good02");
    }

    #[test]
    fn empty_file_parses_to_nothing() {
        assert!(parse_day_file("").is_empty());
        assert!(parse_day_file("# Context Log: 2026-02-20\n").is_empty());
    }
}
