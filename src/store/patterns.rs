//! Recurring-issue patterns and commit co-change tracking.
//!
//! An issue insert probes the vector index for recent lookalikes; three or
//! more similar issues form (or extend) a pattern. Patterns stay until an
//! external caller resolves them. Indexed commits feed the `file_pairs`
//! table, which powers "files that change together" suggestions.

use anyhow::Result;
use rusqlite::params;

use crate::clock;
use crate::store::entries::Store;
use crate::store::search::find_similar_issues;
use crate::store::types::{FilePair, Pattern};

/// Similarity window for issue lookalikes: last 30 days, L2 ≤ 0.5.
const SIMILAR_DAYS: u32 = 30;
const SIMILAR_DISTANCE: f64 = 0.5;

/// Commits touching fewer than 2 or at least this many files are not
/// indexed for co-change (mass renames say nothing about coupling).
const MAX_COMMIT_FILES: usize = 20;

/// Patterns need at least this many similar issues counting the new one.
const MIN_SIMILAR: usize = 2;

/// Label column cap.
const LABEL_MAX: usize = 80;

/// After an issue insert: probe for recent similar issues and record a
/// pattern when the new issue makes at least three. Returns the pattern id
/// when one was created or extended.
pub fn detect_issue_pattern(
    store: &mut Store,
    new_id: &str,
    content: &str,
    v_new: &[f32],
) -> Result<Option<String>> {
    let similar = find_similar_issues(store, v_new, SIMILAR_DAYS, SIMILAR_DISTANCE)?;
    let mut ids: Vec<String> = vec![new_id.to_string()];
    ids.extend(
        similar
            .into_iter()
            .map(|(e, _)| e.id)
            .filter(|id| id != new_id),
    );
    if ids.len() < MIN_SIMILAR + 1 {
        return Ok(None);
    }
    let label = truncate_label(content);
    let pattern_id = create_or_update_pattern(store, &label, &ids)?;
    Ok(Some(pattern_id))
}

/// Merge into the first unresolved pattern sharing any entry id, or create
/// a fresh pattern. Returns the pattern id either way.
pub fn create_or_update_pattern(
    store: &mut Store,
    label: &str,
    entry_ids: &[String],
) -> Result<String> {
    let today = clock::today_ymd();
    let label = truncate_label(label);

    for pattern in list_unresolved(store)? {
        if pattern.entry_ids.iter().any(|id| entry_ids.contains(id)) {
            let mut union = pattern.entry_ids.clone();
            for id in entry_ids {
                if !union.contains(id) {
                    union.push(id.clone());
                }
            }
            let count = union.len() as u32;
            store.conn().execute(
                "UPDATE patterns SET entry_ids = ?1, occurrence_count = ?2, last_seen = ?3, label = ?4 \
                 WHERE id = ?5",
                params![serde_json::to_string(&union)?, count, today, label, pattern.id],
            )?;
            return Ok(pattern.id);
        }
    }

    let id = clock::mint_id();
    store.conn().execute(
        "INSERT INTO patterns (id, label, entry_ids, occurrence_count, first_seen, last_seen, resolved) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?5, 0)",
        params![
            id,
            label,
            serde_json::to_string(&entry_ids)?,
            entry_ids.len() as u32,
            today
        ],
    )?;
    Ok(id)
}

/// Unresolved patterns with three or more occurrences, most recent first.
pub fn get_active_patterns(store: &Store) -> Result<Vec<Pattern>> {
    let mut stmt = store.conn().prepare(
        "SELECT id, label, entry_ids, occurrence_count, first_seen, last_seen, resolved \
         FROM patterns WHERE resolved = 0 AND occurrence_count >= 3 \
         ORDER BY last_seen DESC",
    )?;
    let rows = stmt
        .query_map([], pattern_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Mark a pattern resolved. Returns whether a row changed.
pub fn resolve_pattern(store: &mut Store, pattern_id: &str) -> Result<bool> {
    let changed = store.conn().execute(
        "UPDATE patterns SET resolved = 1 WHERE id = ?1 AND resolved = 0",
        params![pattern_id],
    )?;
    Ok(changed > 0)
}

/// First unresolved pattern containing the entry, by scan order.
pub fn get_pattern_for_entry(store: &Store, entry_id: &str) -> Result<Option<Pattern>> {
    Ok(list_unresolved(store)?
        .into_iter()
        .find(|p| p.entry_ids.iter().any(|id| id == entry_id)))
}

// ── Co-change tracking ───────────────────────────────────────────────────────

/// Record every unordered file pair of an indexed commit. Commits with a
/// single file or 20+ files are skipped.
pub fn record_commit_cochanges(
    store: &mut Store,
    project: &str,
    files: &[String],
    date: &str,
) -> Result<usize> {
    if files.len() < 2 || files.len() >= MAX_COMMIT_FILES {
        return Ok(0);
    }
    let mut recorded = 0;
    for i in 0..files.len() {
        for j in (i + 1)..files.len() {
            upsert_file_pair(store, project, &files[i], &files[j], date)?;
            recorded += 1;
        }
    }
    Ok(recorded)
}

/// Bump the pair's count (or insert at 1), refreshing `last_seen`.
/// Files are stored in the order observed.
pub fn upsert_file_pair(
    store: &mut Store,
    project: &str,
    file_a: &str,
    file_b: &str,
    date: &str,
) -> Result<()> {
    let updated = store.conn().execute(
        "UPDATE file_pairs SET co_change_count = co_change_count + 1, last_seen = ?4 \
         WHERE project = ?1 AND file_a = ?2 AND file_b = ?3",
        params![project, file_a, file_b, date],
    )?;
    if updated == 0 {
        store.conn().execute(
            "INSERT INTO file_pairs (project, file_a, file_b, co_change_count, last_seen) \
             VALUES (?1, ?2, ?3, 1, ?4)",
            params![project, file_a, file_b, date],
        )?;
    }
    Ok(())
}

/// Files most often modified together with `file`, strongest pairing first.
pub fn get_cochanges(store: &Store, project: &str, file: &str, limit: usize) -> Result<Vec<FilePair>> {
    let mut stmt = store.conn().prepare(
        "SELECT project, file_a, file_b, co_change_count, last_seen FROM file_pairs \
         WHERE project = ?1 AND (file_a = ?2 OR file_b = ?2) \
         ORDER BY co_change_count DESC LIMIT ?3",
    )?;
    let rows = stmt
        .query_map(params![project, file, limit as i64], |row| {
            Ok(FilePair {
                project: row.get(0)?,
                file_a: row.get(1)?,
                file_b: row.get(2)?,
                co_change_count: row.get(3)?,
                last_seen: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── Internal helpers ─────────────────────────────────────────────────────────

fn list_unresolved(store: &Store) -> Result<Vec<Pattern>> {
    let mut stmt = store.conn().prepare(
        "SELECT id, label, entry_ids, occurrence_count, first_seen, last_seen, resolved \
         FROM patterns WHERE resolved = 0 ORDER BY last_seen DESC, id",
    )?;
    let rows = stmt
        .query_map([], pattern_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn pattern_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Pattern> {
    let ids_json: String = row.get(2)?;
    let entry_ids: Vec<String> = serde_json::from_str(&ids_json).unwrap_or_default();
    Ok(Pattern {
        id: row.get(0)?,
        label: row.get(1)?,
        entry_ids,
        occurrence_count: row.get(3)?,
        first_seen: row.get(4)?,
        last_seen: row.get(5)?,
        resolved: row.get(6)?,
    })
}

/// Clamp a label to 80 chars on a char boundary.
fn truncate_label(label: &str) -> String {
    label.chars().take(LABEL_MAX).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::types::{Entry, EntryType};
    use crate::store::EMBEDDING_DIM;

    fn spike(dim: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; EMBEDDING_DIM];
        v[dim % EMBEDDING_DIM] = 1.0;
        v
    }

    fn insert_issue(store: &mut Store, id: &str, content: &str, dim: usize) {
        let e = Entry::new(
            id.into(),
            clock::today_ymd(),
            "11:00".into(),
            EntryType::Issue,
            content.into(),
        );
        let row = store.insert(&e).unwrap();
        store.insert_vec(row, &spike(dim)).unwrap();
    }

    #[test]
    fn third_similar_issue_forms_a_pattern() {
        let mut store = Store::open_in_memory().unwrap();
        insert_issue(&mut store, "leak01", "Memory leak in WebSocket handler", 0);
        assert!(detect_issue_pattern(&mut store, "leak01", "Memory leak in WebSocket handler", &spike(0))
            .unwrap()
            .is_none());

        insert_issue(&mut store, "leak02", "Memory leak in WebSocket handler", 0);
        assert!(detect_issue_pattern(&mut store, "leak02", "Memory leak in WebSocket handler", &spike(0))
            .unwrap()
            .is_none());

        insert_issue(&mut store, "leak03", "Memory leak in WebSocket handler", 0);
        let pattern_id = detect_issue_pattern(
            &mut store,
            "leak03",
            "Memory leak in WebSocket handler",
            &spike(0),
        )
        .unwrap()
        .expect("third occurrence should form a pattern");

        let active = get_active_patterns(&store).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, pattern_id);
        assert!(active[0].occurrence_count >= 3);
        assert_eq!(active[0].occurrence_count as usize, active[0].entry_ids.len());
    }

    #[test]
    fn overlapping_pattern_merges_not_duplicates() {
        let mut store = Store::open_in_memory().unwrap();
        let first = create_or_update_pattern(
            &mut store,
            "deploy timeout",
            &["a1".into(), "a2".into(), "a3".into()],
        )
        .unwrap();
        let second = create_or_update_pattern(
            &mut store,
            "deploy timeout again",
            &["a3".into(), "a4".into()],
        )
        .unwrap();

        assert_eq!(first, second);
        let active = get_active_patterns(&store).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].occurrence_count, 4);
        assert_eq!(active[0].label, "deploy timeout again");
    }

    #[test]
    fn disjoint_ids_create_a_new_pattern() {
        let mut store = Store::open_in_memory().unwrap();
        let first =
            create_or_update_pattern(&mut store, "one", &["a1".into(), "a2".into(), "a3".into()])
                .unwrap();
        let second =
            create_or_update_pattern(&mut store, "two", &["b1".into(), "b2".into(), "b3".into()])
                .unwrap();
        assert_ne!(first, second);
        assert_eq!(get_active_patterns(&store).unwrap().len(), 2);
    }

    #[test]
    fn resolve_removes_from_active_set() {
        let mut store = Store::open_in_memory().unwrap();
        let id = create_or_update_pattern(
            &mut store,
            "flaky CI",
            &["c1".into(), "c2".into(), "c3".into()],
        )
        .unwrap();

        assert!(resolve_pattern(&mut store, &id).unwrap());
        assert!(get_active_patterns(&store).unwrap().is_empty());
        // Second resolve is a no-op
        assert!(!resolve_pattern(&mut store, &id).unwrap());
    }

    #[test]
    fn pattern_lookup_by_entry() {
        let mut store = Store::open_in_memory().unwrap();
        let id = create_or_update_pattern(
            &mut store,
            "lock contention",
            &["d1".into(), "d2".into(), "d3".into()],
        )
        .unwrap();

        let found = get_pattern_for_entry(&store, "d2").unwrap().unwrap();
        assert_eq!(found.id, id);
        assert!(get_pattern_for_entry(&store, "zz").unwrap().is_none());
    }

    #[test]
    fn label_truncates_at_80_chars() {
        let mut store = Store::open_in_memory().unwrap();
        let long = "x".repeat(200);
        create_or_update_pattern(&mut store, &long, &["e1".into(), "e2".into(), "e3".into()])
            .unwrap();
        let active = get_active_patterns(&store).unwrap();
        assert_eq!(active[0].label.chars().count(), 80);
    }

    #[test]
    fn two_occurrences_stay_inactive() {
        let mut store = Store::open_in_memory().unwrap();
        create_or_update_pattern(&mut store, "rare", &["f1".into(), "f2".into()]).unwrap();
        assert!(get_active_patterns(&store).unwrap().is_empty());
    }

    #[test]
    fn cochange_pairs_count_up() {
        let mut store = Store::open_in_memory().unwrap();
        let files = vec!["src/api.rs".to_string(), "src/model.rs".to_string(), "src/db.rs".to_string()];
        assert_eq!(
            record_commit_cochanges(&mut store, "acme", &files, "2026-02-20").unwrap(),
            3
        );
        record_commit_cochanges(
            &mut store,
            "acme",
            &files[..2].to_vec(),
            "2026-02-21",
        )
        .unwrap();

        let pairs = get_cochanges(&store, "acme", "src/api.rs", 10).unwrap();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].co_change_count, 2);
        assert_eq!(pairs[0].last_seen, "2026-02-21");
    }

    #[test]
    fn oversized_and_single_file_commits_skipped() {
        let mut store = Store::open_in_memory().unwrap();
        let one = vec!["only.rs".to_string()];
        assert_eq!(record_commit_cochanges(&mut store, "p", &one, "2026-02-20").unwrap(), 0);

        let many: Vec<String> = (0..20).map(|i| format!("f{i}.rs")).collect();
        assert_eq!(record_commit_cochanges(&mut store, "p", &many, "2026-02-20").unwrap(), 0);
    }

    #[test]
    fn cochange_query_scans_both_sides() {
        let mut store = Store::open_in_memory().unwrap();
        upsert_file_pair(&mut store, "p", "a.rs", "b.rs", "2026-02-20").unwrap();
        let from_b = get_cochanges(&store, "p", "b.rs", 10).unwrap();
        assert_eq!(from_b.len(), 1);
        assert_eq!(from_b[0].file_a, "a.rs");
    }
}
