//! The durable entry store — typed rows plus lexical and vector indexes.
//!
//! [`Store`] owns the single SQLite connection for this process. Every write
//! keeps the `entries` row, its FTS5 shadow row, and its vec0 vector row in
//! step inside one transaction: either all three see the change or none do.

use anyhow::{bail, Result};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::path::{Path, PathBuf};

use crate::clock;
use crate::store::types::{split_tags, Entry, EntryType, StoreStatus, Tier};
use crate::store::{embedding_to_bytes, EMBEDDING_DIM};

/// Content above this many UTF-8 bytes is rejected at the door.
pub const MAX_CONTENT_BYTES: usize = 100_000;

/// Column list used by every entry SELECT, in [`entry_from_row`] order.
pub(crate) const ENTRY_COLS: &str = "e.id, e.date, e.time, e.type, e.tags, e.content, e.source_file, \
     e.tier, e.access_count, e.last_accessed, e.pinned, e.archived, \
     e.label, e.project, e.session_id, e.agent_id, e.rowid";

/// Filters shared by [`Store::search_lexical`] and [`Store::list`].
#[derive(Debug, Clone, Default)]
pub struct EntryFilter {
    pub entry_type: Option<EntryType>,
    /// Keep entries with `date >= today - days + 1` (inclusive window).
    pub days: Option<u32>,
    pub include_archived: bool,
}

/// Exclusive-writer handle over the durable store.
pub struct Store {
    conn: Connection,
    /// On-disk path, when not in memory. Used for storage-size reporting.
    db_path: Option<PathBuf>,
}

impl Store {
    /// Open (or create) the store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = crate::db::open_database(path)?;
        Ok(Self {
            conn,
            db_path: Some(path.to_path_buf()),
        })
    }

    /// Open a fresh in-memory store. Used by tests and dry runs.
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: crate::db::open_memory_database()?,
            db_path: None,
        })
    }

    /// Raw connection access for sibling modules and tests.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    // ── Write path ───────────────────────────────────────────────────────────

    /// Upsert an entry by `id`. Returns the (possibly new) rowid.
    ///
    /// Replacement drops the old lexical and vector state; the caller
    /// re-computes and re-attaches any vector it needs.
    pub fn insert(&mut self, entry: &Entry) -> Result<i64> {
        if entry.content.len() > MAX_CONTENT_BYTES {
            bail!(
                "entry content is {} bytes, cap is {MAX_CONTENT_BYTES}",
                entry.content.len()
            );
        }

        let tx = self.conn.transaction()?;
        delete_entry_row(&tx, &entry.id)?;

        tx.execute(
            "INSERT INTO entries (id, date, time, type, tags, content, source_file, \
                 tier, access_count, last_accessed, pinned, archived, label, project, session_id, agent_id) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                entry.id,
                entry.date,
                entry.time,
                entry.entry_type.as_str(),
                entry.tags_joined(),
                entry.content,
                entry.source_file,
                entry.tier.as_str(),
                entry.access_count,
                entry.last_accessed,
                entry.pinned,
                entry.archived,
                entry.label,
                entry.project,
                entry.session_id,
                entry.agent_id,
            ],
        )?;
        let rowid = tx.last_insert_rowid();

        tx.execute(
            "INSERT INTO entries_fts (rowid, content, tags, etype) VALUES (?1, ?2, ?3, ?4)",
            params![rowid, entry.content, entry.tags_joined(), entry.entry_type.as_str()],
        )?;

        tx.commit()?;
        Ok(rowid)
    }

    /// Attach or replace the unit-norm vector for a row.
    pub fn insert_vec(&mut self, row_id: i64, embedding: &[f32]) -> Result<()> {
        if embedding.len() != EMBEDDING_DIM {
            bail!("expected {EMBEDDING_DIM}-dim embedding, got {}", embedding.len());
        }
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM entries_vec WHERE entry_row = ?1", params![row_id])?;
        tx.execute(
            "INSERT INTO entries_vec (entry_row, embedding) VALUES (?1, ?2)",
            params![row_id, embedding_to_bytes(embedding)],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Increment access counts and stamp today's date on the given ids.
    pub fn bump_access(&mut self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let today = clock::today_ymd();
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "UPDATE entries SET access_count = access_count + 1, last_accessed = ?1 WHERE id = ?2",
            )?;
            for id in ids {
                stmt.execute(params![today, id])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Archive the given ids, skipping pinned rows. Returns rows changed.
    pub fn archive(&mut self, ids: &[String]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let tx = self.conn.transaction()?;
        let mut changed = 0;
        {
            let mut stmt = tx.prepare(
                "UPDATE entries SET archived = 1 WHERE id = ?1 AND pinned = 0 AND archived = 0",
            )?;
            for id in ids {
                changed += stmt.execute(params![id])?;
            }
        }
        tx.commit()?;
        Ok(changed)
    }

    /// Wipe entries, vectors, patterns, and file pairs. Schema survives.
    pub fn clear_all(&mut self) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM entries_vec", [])?;
        tx.execute("DELETE FROM entries_fts", [])?;
        tx.execute("DELETE FROM entries", [])?;
        tx.execute("DELETE FROM patterns", [])?;
        tx.execute("DELETE FROM file_pairs", [])?;
        tx.commit()?;
        Ok(())
    }

    // ── Rules ────────────────────────────────────────────────────────────────

    /// Upsert a rule by label: any prior row with the same label is deleted
    /// and a fresh longterm, pinned, tagless rule entry replaces it.
    pub fn save_rule(&mut self, label: &str, content: &str) -> Result<Entry> {
        if label.trim().is_empty() {
            bail!("rule label must not be empty");
        }
        if content.len() > MAX_CONTENT_BYTES {
            bail!("rule content is {} bytes, cap is {MAX_CONTENT_BYTES}", content.len());
        }

        let mut entry = Entry::new(
            clock::mint_id(),
            clock::today_ymd(),
            clock::time_hhmm(),
            EntryType::Rule,
            content.to_string(),
        );
        entry.tier = Tier::Longterm;
        entry.pinned = true;
        entry.label = Some(label.to_string());

        let tx = self.conn.transaction()?;
        let prior: Option<String> = tx
            .query_row(
                "SELECT id FROM entries WHERE type = 'rule' AND label = ?1",
                params![label],
                |r| r.get(0),
            )
            .optional()?;
        if let Some(prior_id) = prior {
            delete_entry_row(&tx, &prior_id)?;
        }

        tx.execute(
            "INSERT INTO entries (id, date, time, type, tags, content, tier, pinned, label) \
             VALUES (?1, ?2, ?3, 'rule', '', ?4, 'longterm', 1, ?5)",
            params![entry.id, entry.date, entry.time, entry.content, label],
        )?;
        entry.row_id = tx.last_insert_rowid();
        tx.execute(
            "INSERT INTO entries_fts (rowid, content, tags, etype) VALUES (?1, ?2, '', 'rule')",
            params![entry.row_id, entry.content],
        )?;
        tx.commit()?;
        Ok(entry)
    }

    /// Delete a rule by label. Returns whether a row was removed.
    pub fn delete_rule(&mut self, label: &str) -> Result<bool> {
        let tx = self.conn.transaction()?;
        let prior: Option<String> = tx
            .query_row(
                "SELECT id FROM entries WHERE type = 'rule' AND label = ?1",
                params![label],
                |r| r.get(0),
            )
            .optional()?;
        let found = match prior {
            Some(id) => {
                delete_entry_row(&tx, &id)?;
                true
            }
            None => false,
        };
        tx.commit()?;
        Ok(found)
    }

    /// All rules, ordered by label.
    pub fn list_rules(&self) -> Result<Vec<Entry>> {
        let sql = format!(
            "SELECT {ENTRY_COLS} FROM entries e WHERE e.type = 'rule' ORDER BY e.label"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], entry_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ── Read path ────────────────────────────────────────────────────────────

    /// BM25-ranked lexical search over content, tags, and type.
    ///
    /// An empty or symbol-only query matches nothing (valid, not an error).
    pub fn search_lexical(
        &self,
        query: &str,
        filter: &EntryFilter,
        limit: usize,
    ) -> Result<Vec<Entry>> {
        let escaped = escape_fts_query(query);
        if escaped.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let mut sql = format!(
            "SELECT {ENTRY_COLS} FROM entries_fts f \
             JOIN entries e ON e.rowid = f.rowid \
             WHERE entries_fts MATCH ?1"
        );
        let mut binds: Vec<Box<dyn rusqlite::types::ToSql>> = vec![Box::new(escaped)];
        push_filter_clauses(&mut sql, &mut binds, filter);
        sql.push_str(&format!(" ORDER BY f.rank LIMIT ?{}", binds.len() + 1));
        binds.push(Box::new(limit as i64));

        let mut stmt = self.conn.prepare(&sql)?;
        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            binds.iter().map(|b| b.as_ref()).collect();
        let rows = stmt
            .query_map(params_ref.as_slice(), entry_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// KNN over the vector index: `(rowid, L2 distance)` ascending.
    pub fn search_vec(&self, embedding: &[f32], limit: usize) -> Result<Vec<(i64, f64)>> {
        if embedding.len() != EMBEDDING_DIM {
            bail!("expected {EMBEDDING_DIM}-dim embedding, got {}", embedding.len());
        }
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut stmt = self.conn.prepare(
            "SELECT entry_row, distance FROM entries_vec \
             WHERE embedding MATCH ?1 ORDER BY distance LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![embedding_to_bytes(embedding), limit as i64], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, f64>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Load full entries for a set of rowids. Order is not significant.
    pub fn get_by_rowids(&self, row_ids: &[i64]) -> Result<Vec<Entry>> {
        if row_ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders: Vec<String> = (1..=row_ids.len()).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "SELECT {ENTRY_COLS} FROM entries e WHERE e.rowid IN ({})",
            placeholders.join(", ")
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let binds: Vec<&dyn rusqlite::types::ToSql> =
            row_ids.iter().map(|id| id as &dyn rusqlite::types::ToSql).collect();
        let rows = stmt
            .query_map(binds.as_slice(), entry_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Fetch one entry by id.
    pub fn get_by_id(&self, id: &str) -> Result<Option<Entry>> {
        let sql = format!("SELECT {ENTRY_COLS} FROM entries e WHERE e.id = ?1");
        let row = self
            .conn
            .query_row(&sql, params![id], entry_from_row)
            .optional()?;
        Ok(row)
    }

    /// Whether an entry with this id exists (archived or not).
    pub fn has_entry(&self, id: &str) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM entries WHERE id = ?1",
            params![id],
            |r| r.get(0),
        )?;
        Ok(count > 0)
    }

    /// Recency-ordered listing: `(date desc, time desc)`.
    pub fn list(&self, filter: &EntryFilter) -> Result<Vec<Entry>> {
        let mut sql = format!("SELECT {ENTRY_COLS} FROM entries e WHERE 1=1");
        let mut binds: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
        push_filter_clauses(&mut sql, &mut binds, filter);
        sql.push_str(" ORDER BY e.date DESC, e.time DESC");

        let mut stmt = self.conn.prepare(&sql)?;
        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            binds.iter().map(|b| b.as_ref()).collect();
        let rows = stmt
            .query_map(params_ref.as_slice(), entry_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Non-archived entries recorded under a session id, oldest first.
    pub fn list_by_session(&self, session_id: &str) -> Result<Vec<Entry>> {
        let sql = format!(
            "SELECT {ENTRY_COLS} FROM entries e \
             WHERE e.session_id = ?1 AND e.archived = 0 \
             ORDER BY e.date, e.time"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![session_id], entry_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Non-archived entries carrying an exact tag.
    pub fn find_by_tag(&self, tag: &str) -> Result<Vec<Entry>> {
        // LIKE narrows the scan; exact membership is re-checked on the split
        // tag list because tags is a joined column.
        let sql = format!(
            "SELECT {ENTRY_COLS} FROM entries e \
             WHERE e.archived = 0 AND e.tags LIKE '%' || ?1 || '%' \
             ORDER BY e.date DESC, e.time DESC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![tag], entry_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows
            .into_iter()
            .filter(|e| e.tags.iter().any(|t| t == tag))
            .collect())
    }

    /// Whether any non-archived entry carries the tag.
    pub fn has_entry_with_tag(&self, tag: &str) -> Result<bool> {
        Ok(!self.find_by_tag(tag)?.is_empty())
    }

    /// Store-wide counters for the status surface.
    pub fn status(&self) -> Result<StoreStatus> {
        let total: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM entries", [], |r| r.get(0))?;
        let archived: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM entries WHERE archived = 1",
            [],
            |r| r.get(0),
        )?;

        let date_range: Option<(String, String)> = if total > 0 {
            let (min, max): (Option<String>, Option<String>) = self.conn.query_row(
                "SELECT MIN(date), MAX(date) FROM entries",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )?;
            min.zip(max)
        } else {
            None
        };

        let mut tier_distribution = std::collections::HashMap::new();
        for t in ["ephemeral", "working", "longterm"] {
            tier_distribution.insert(t.to_string(), 0u64);
        }
        let mut stmt = self
            .conn
            .prepare("SELECT tier, COUNT(*) FROM entries GROUP BY tier")?;
        let rows: Vec<(String, i64)> = stmt
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        for (tier, count) in rows {
            tier_distribution.insert(tier, count as u64);
        }

        let active_patterns: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM patterns WHERE resolved = 0 AND occurrence_count >= 3",
            [],
            |r| r.get(0),
        )?;

        let storage_bytes = self
            .db_path
            .as_deref()
            .and_then(|p| std::fs::metadata(p).ok())
            .map(|m| m.len())
            .unwrap_or(0);

        Ok(StoreStatus {
            total: total as u64,
            date_range,
            tier_distribution,
            archived_count: archived as u64,
            active_patterns: active_patterns as u64,
            storage_bytes,
        })
    }
}

// ── Internal helpers ─────────────────────────────────────────────────────────

/// Delete an entry row plus its FTS and vector shadows, by entry id.
/// No-op when the id is absent.
fn delete_entry_row(tx: &Transaction, id: &str) -> Result<()> {
    let rowid: Option<i64> = tx
        .query_row("SELECT rowid FROM entries WHERE id = ?1", params![id], |r| r.get(0))
        .optional()?;
    if let Some(rowid) = rowid {
        tx.execute("DELETE FROM entries_fts WHERE rowid = ?1", params![rowid])?;
        tx.execute("DELETE FROM entries_vec WHERE entry_row = ?1", params![rowid])?;
        tx.execute("DELETE FROM entries WHERE rowid = ?1", params![rowid])?;
    }
    Ok(())
}

/// Append type/days/archived clauses shared by search and list.
fn push_filter_clauses(
    sql: &mut String,
    binds: &mut Vec<Box<dyn rusqlite::types::ToSql>>,
    filter: &EntryFilter,
) {
    if let Some(t) = filter.entry_type {
        binds.push(Box::new(t.as_str().to_string()));
        sql.push_str(&format!(" AND e.type = ?{}", binds.len()));
    }
    if let Some(days) = filter.days {
        binds.push(Box::new(window_start(&clock::today_ymd(), days)));
        sql.push_str(&format!(" AND e.date >= ?{}", binds.len()));
    }
    if !filter.include_archived {
        sql.push_str(" AND e.archived = 0");
    }
}

/// First day of an inclusive `days`-long window ending today.
pub fn window_start(today: &str, days: u32) -> String {
    let today = chrono::NaiveDate::parse_from_str(today, "%Y-%m-%d")
        .unwrap_or_else(|_| chrono::Local::now().date_naive());
    let back = days.saturating_sub(1) as i64;
    (today - chrono::Duration::days(back))
        .format("%Y-%m-%d")
        .to_string()
}

/// Map a SELECT row (in [`ENTRY_COLS`] order) to an [`Entry`].
pub(crate) fn entry_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Entry> {
    let type_str: String = row.get(3)?;
    let tier_str: String = row.get(7)?;
    let tags_str: String = row.get(4)?;

    let entry_type: EntryType = type_str.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
        )
    })?;
    let tier: Tier = tier_str.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(
            7,
            rusqlite::types::Type::Text,
            Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
        )
    })?;

    Ok(Entry {
        id: row.get(0)?,
        date: row.get(1)?,
        time: row.get(2)?,
        entry_type,
        tags: split_tags(&tags_str),
        content: row.get(5)?,
        source_file: row.get(6)?,
        tier,
        access_count: row.get(8)?,
        last_accessed: row.get(9)?,
        pinned: row.get(10)?,
        archived: row.get(11)?,
        label: row.get(12)?,
        project: row.get(13)?,
        session_id: row.get(14)?,
        agent_id: row.get(15)?,
        row_id: row.get(16)?,
    })
}

/// Escape a user query for FTS5 MATCH syntax.
///
/// Wraps each whitespace-delimited word in double quotes and joins with
/// spaces so FTS5 treats them as individual terms (implicit AND).
fn escape_fts_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|word| {
            let clean = word.replace('"', "");
            format!("\"{clean}\"")
        })
        .filter(|w| w != "\"\"")
        .collect::<Vec<_>>()
        .join(" ")
}
