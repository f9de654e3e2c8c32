//! Additive schema migration for legacy stores.
//!
//! Early deployments carried an `entries` table with only the original seven
//! columns (id, date, time, type, tags, content, source_file). On open we
//! detect each late-introduced column and add what is missing, then back-fill
//! `tier` from the entry type. Everything here is idempotent; migration never
//! drops or rewrites data.

use rusqlite::Connection;
use std::collections::HashSet;

/// Late-introduced columns and the DDL that adds each one.
const LATE_COLUMNS: &[(&str, &str)] = &[
    ("tier", "ALTER TABLE entries ADD COLUMN tier TEXT NOT NULL DEFAULT 'working'"),
    ("access_count", "ALTER TABLE entries ADD COLUMN access_count INTEGER NOT NULL DEFAULT 0"),
    ("last_accessed", "ALTER TABLE entries ADD COLUMN last_accessed TEXT"),
    ("pinned", "ALTER TABLE entries ADD COLUMN pinned INTEGER NOT NULL DEFAULT 0"),
    ("archived", "ALTER TABLE entries ADD COLUMN archived INTEGER NOT NULL DEFAULT 0"),
    ("label", "ALTER TABLE entries ADD COLUMN label TEXT"),
    ("project", "ALTER TABLE entries ADD COLUMN project TEXT"),
    ("session_id", "ALTER TABLE entries ADD COLUMN session_id TEXT"),
    ("agent_id", "ALTER TABLE entries ADD COLUMN agent_id TEXT"),
];

/// Column names currently present on the entries table.
fn entry_columns(conn: &Connection) -> rusqlite::Result<HashSet<String>> {
    let mut stmt = conn.prepare("PRAGMA table_info(entries)")?;
    let cols = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<HashSet<_>, _>>()?;
    Ok(cols)
}

/// Add any missing late columns and back-fill tier by type.
///
/// Back-fill rule matches tier assignment for new entries: handoff and
/// progress are ephemeral, reference is longterm, everything else working.
/// Rules are additionally forced to longterm + pinned.
pub fn run_migrations(conn: &Connection) -> rusqlite::Result<()> {
    let existing = entry_columns(conn)?;
    let tier_was_missing = !existing.contains("tier");

    for (name, ddl) in LATE_COLUMNS {
        if !existing.contains(*name) {
            tracing::info!(column = *name, "adding missing entries column");
            conn.execute(ddl, [])?;
        }
    }

    if tier_was_missing {
        conn.execute(
            "UPDATE entries SET tier = CASE \
                 WHEN type IN ('handoff','progress') THEN 'ephemeral' \
                 WHEN type IN ('reference','rule') THEN 'longterm' \
                 ELSE 'working' END",
            [],
        )?;
        conn.execute(
            "UPDATE entries SET pinned = 1 WHERE type = 'rule'",
            [],
        )?;
    }

    backfill_fts(conn)?;
    Ok(())
}

/// Index any entry rows the lexical index doesn't know about (pre-FTS
/// stores, or an index dropped by hand). Idempotent.
fn backfill_fts(conn: &Connection) -> rusqlite::Result<()> {
    let has_fts: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE name = 'entries_fts'",
        [],
        |r| r.get(0),
    )?;
    if has_fts == 0 {
        return Ok(());
    }
    let added = conn.execute(
        "INSERT INTO entries_fts (rowid, content, tags, etype) \
         SELECT e.rowid, e.content, e.tags, e.type FROM entries e \
         WHERE e.rowid NOT IN (SELECT rowid FROM entries_fts)",
        [],
    )?;
    if added > 0 {
        tracing::info!(rows = added, "back-filled lexical index");
    }
    Ok(())
}

/// Get the current schema version from the database.
pub fn get_schema_version(conn: &Connection) -> rusqlite::Result<u32> {
    conn.query_row(
        "SELECT value FROM schema_meta WHERE key = 'schema_version'",
        [],
        |row| {
            let val: String = row.get(0)?;
            Ok(val.parse::<u32>().unwrap_or(0))
        },
    )
}

/// Get the stored embedding model identifier, if any.
pub fn get_embedding_model(conn: &Connection) -> rusqlite::Result<Option<String>> {
    match conn.query_row(
        "SELECT value FROM schema_meta WHERE key = 'embedding_model'",
        [],
        |row| row.get::<_, String>(0),
    ) {
        Ok(val) => Ok(Some(val)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Record which embedding model produced the stored vectors.
pub fn set_embedding_model(conn: &Connection, model: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO schema_meta (key, value) VALUES ('embedding_model', ?1)",
        [model],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A pre-tier store: only the original columns.
    fn v0_db() -> Connection {
        crate::db::load_sqlite_vec();
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE entries (
                 id TEXT PRIMARY KEY,
                 date TEXT NOT NULL,
                 time TEXT NOT NULL,
                 type TEXT NOT NULL,
                 tags TEXT NOT NULL DEFAULT '',
                 content TEXT NOT NULL,
                 source_file TEXT
             );
             CREATE TABLE schema_meta (key TEXT PRIMARY KEY, value TEXT NOT NULL);",
        )
        .unwrap();
        conn
    }

    #[test]
    fn migration_adds_all_late_columns() {
        let conn = v0_db();
        run_migrations(&conn).unwrap();
        let cols = entry_columns(&conn).unwrap();
        for (name, _) in LATE_COLUMNS {
            assert!(cols.contains(*name), "missing column {name}");
        }
    }

    #[test]
    fn migration_backfills_tier_by_type() {
        let conn = v0_db();
        for (id, etype) in [
            ("e1", "handoff"),
            ("e2", "progress"),
            ("e3", "reference"),
            ("e4", "decision"),
            ("e5", "issue"),
        ] {
            conn.execute(
                "INSERT INTO entries (id, date, time, type, content) VALUES (?1, '2025-11-02', '09:00', ?2, 'x')",
                [id, etype],
            )
            .unwrap();
        }

        run_migrations(&conn).unwrap();

        let tier_of = |id: &str| -> String {
            conn.query_row("SELECT tier FROM entries WHERE id = ?1", [id], |r| r.get(0))
                .unwrap()
        };
        assert_eq!(tier_of("e1"), "ephemeral");
        assert_eq!(tier_of("e2"), "ephemeral");
        assert_eq!(tier_of("e3"), "longterm");
        assert_eq!(tier_of("e4"), "working");
        assert_eq!(tier_of("e5"), "working");
    }

    #[test]
    fn migration_is_idempotent_and_loses_no_rows() {
        let conn = v0_db();
        conn.execute(
            "INSERT INTO entries (id, date, time, type, content) VALUES ('keep', '2025-11-02', '09:00', 'insight', 'survives')",
            [],
        )
        .unwrap();

        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let (count, content): (i64, String) = conn
            .query_row("SELECT COUNT(*), MAX(content) FROM entries", [], |r| {
                Ok((r.get(0)?, r.get(1)?))
            })
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(content, "survives");
    }

    #[test]
    fn migration_on_current_schema_is_a_noop() {
        crate::db::load_sqlite_vec();
        let conn = Connection::open_in_memory().unwrap();
        crate::db::schema::init_tables(&conn).unwrap();
        run_migrations(&conn).unwrap();
        crate::db::schema::init_indexes(&conn).unwrap();
    }
}
