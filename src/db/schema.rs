//! SQL DDL for all hindsight tables.
//!
//! Defines the `entries` table, its FTS5 shadow (`entries_fts`, porter +
//! unicode61 tokenizer), the vec0 vector table (`entries_vec`, keyed by the
//! entry rowid), `patterns`, `file_pairs`, and `schema_meta`. All DDL uses
//! `IF NOT EXISTS` for idempotent initialization. Indexes live in
//! [`init_indexes`] so migrations can add late columns to a legacy `entries`
//! table before any index references them.

use rusqlite::Connection;

const TABLE_SQL: &str = r#"
-- Core entry storage
CREATE TABLE IF NOT EXISTS entries (
    id TEXT PRIMARY KEY,
    date TEXT NOT NULL,
    time TEXT NOT NULL,
    type TEXT NOT NULL CHECK(type IN
        ('decision','progress','issue','handoff','insight','reference','git_commit','rule')),
    tags TEXT NOT NULL DEFAULT '',
    content TEXT NOT NULL,
    source_file TEXT,
    tier TEXT NOT NULL DEFAULT 'working' CHECK(tier IN ('ephemeral','working','longterm')),
    access_count INTEGER NOT NULL DEFAULT 0,
    last_accessed TEXT,
    pinned INTEGER NOT NULL DEFAULT 0,
    archived INTEGER NOT NULL DEFAULT 0,
    label TEXT,
    project TEXT,
    session_id TEXT,
    agent_id TEXT
);

-- Recurring-issue groups
CREATE TABLE IF NOT EXISTS patterns (
    id TEXT PRIMARY KEY,
    label TEXT NOT NULL,
    entry_ids TEXT NOT NULL DEFAULT '[]',
    occurrence_count INTEGER NOT NULL DEFAULT 0,
    first_seen TEXT NOT NULL,
    last_seen TEXT NOT NULL,
    resolved INTEGER NOT NULL DEFAULT 0
);

-- Co-change observations from indexed commits
CREATE TABLE IF NOT EXISTS file_pairs (
    project TEXT NOT NULL,
    file_a TEXT NOT NULL,
    file_b TEXT NOT NULL,
    co_change_count INTEGER NOT NULL DEFAULT 1,
    last_seen TEXT NOT NULL,
    PRIMARY KEY (project, file_a, file_b)
);

-- Schema metadata
CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Lexical index over content, tags, and type. The FTS rowid mirrors the
/// entries rowid; the store keeps the two in sync inside each write
/// transaction.
const FTS_TABLE_SQL: &str = r#"
CREATE VIRTUAL TABLE IF NOT EXISTS entries_fts USING fts5(
    content,
    tags,
    etype,
    tokenize = 'porter unicode61'
);
"#;

/// vec0 virtual table must be created separately (sqlite-vec syntax).
/// Keyed by the entry rowid so vector lifetime tracks the entry row.
const VEC_TABLE_SQL: &str = r#"
CREATE VIRTUAL TABLE IF NOT EXISTS entries_vec USING vec0(
    entry_row INTEGER PRIMARY KEY,
    embedding FLOAT[384]
);
"#;

const INDEX_SQL: &str = r#"
CREATE INDEX IF NOT EXISTS idx_entries_type ON entries(type);
CREATE INDEX IF NOT EXISTS idx_entries_date ON entries(date);
CREATE INDEX IF NOT EXISTS idx_entries_tier ON entries(tier);
CREATE INDEX IF NOT EXISTS idx_entries_archived ON entries(archived);
CREATE INDEX IF NOT EXISTS idx_entries_session ON entries(session_id);
CREATE UNIQUE INDEX IF NOT EXISTS idx_entries_rule_label
    ON entries(label) WHERE type = 'rule';
CREATE INDEX IF NOT EXISTS idx_patterns_resolved ON patterns(resolved);
CREATE INDEX IF NOT EXISTS idx_file_pairs_a ON file_pairs(project, file_a);
CREATE INDEX IF NOT EXISTS idx_file_pairs_b ON file_pairs(project, file_b);
"#;

/// Create all tables. Idempotent (uses IF NOT EXISTS).
pub fn init_tables(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(TABLE_SQL)?;
    conn.execute_batch(FTS_TABLE_SQL)?;
    conn.execute_batch(VEC_TABLE_SQL)?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', '1')",
        [],
    )?;

    Ok(())
}

/// Create all indexes. Runs after migrations so late-added columns exist.
pub fn init_indexes(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(INDEX_SQL)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_creates_all_tables() {
        crate::db::load_sqlite_vec();
        let conn = Connection::open_in_memory().unwrap();
        init_tables(&conn).unwrap();
        init_indexes(&conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        assert!(tables.contains(&"entries".to_string()));
        assert!(tables.contains(&"patterns".to_string()));
        assert!(tables.contains(&"file_pairs".to_string()));
        assert!(tables.contains(&"schema_meta".to_string()));

        let version: String = conn
            .query_row("SELECT vec_version()", [], |r| r.get(0))
            .unwrap();
        assert!(!version.is_empty());
    }

    #[test]
    fn schema_is_idempotent() {
        crate::db::load_sqlite_vec();
        let conn = Connection::open_in_memory().unwrap();
        init_tables(&conn).unwrap();
        init_indexes(&conn).unwrap();
        init_tables(&conn).unwrap();
        init_indexes(&conn).unwrap();
    }

    #[test]
    fn rule_label_is_unique() {
        crate::db::load_sqlite_vec();
        let conn = Connection::open_in_memory().unwrap();
        init_tables(&conn).unwrap();
        init_indexes(&conn).unwrap();

        conn.execute(
            "INSERT INTO entries (id, date, time, type, content, tier, pinned, label) \
             VALUES ('a1', '2026-02-20', '10:00', 'rule', 'first', 'longterm', 1, 'style')",
            [],
        )
        .unwrap();
        let dup = conn.execute(
            "INSERT INTO entries (id, date, time, type, content, tier, pinned, label) \
             VALUES ('a2', '2026-02-20', '10:01', 'rule', 'second', 'longterm', 1, 'style')",
            [],
        );
        assert!(dup.is_err());

        // Same label on a non-rule type is fine
        conn.execute(
            "INSERT INTO entries (id, date, time, type, content, label) \
             VALUES ('a3', '2026-02-20', '10:02', 'insight', 'third', 'style')",
        [],
        )
        .unwrap();
    }
}
