//! Age-based lifecycle: decay, demotion, promotion, and consolidation.
//!
//! [`run_maintenance`] executes the passes in a fixed order. Pinned and
//! archived entries are untouched throughout. The consolidation pass reads
//! vectors straight from the vec0 table and does its own cosine math so it
//! stays independent of the ranker.

use anyhow::Result;
use rusqlite::params;
use serde::Serialize;

use crate::clock;
use crate::config::MaintenanceConfig;
use crate::store::entries::{entry_from_row, window_start, Store, ENTRY_COLS};
use crate::store::types::{Entry, EntryType, Tier};
use crate::store::{bytes_to_embedding, cosine};

/// Rows changed per pass, in execution order.
#[derive(Debug, Default, Serialize)]
pub struct MaintenanceReport {
    /// Ephemeral entries archived for aging out.
    pub decayed: usize,
    /// Idle working entries retired to ephemeral.
    pub demoted: usize,
    /// Stable working decisions/insights promoted to longterm.
    pub promoted_stable: usize,
    /// Frequently accessed ephemeral entries promoted to working.
    pub promoted_frequent: usize,
    /// Clusters merged into a survivor.
    pub consolidated: usize,
}

impl MaintenanceReport {
    pub fn has_changes(&self) -> bool {
        self.decayed + self.demoted + self.promoted_stable + self.promoted_frequent + self.consolidated
            > 0
    }
}

/// Run all lifecycle passes: decay ephemeral, demote idle working, promote
/// stable, promote frequent, consolidate near-duplicates.
pub fn run_maintenance(store: &mut Store, config: &MaintenanceConfig) -> Result<MaintenanceReport> {
    let today = clock::today_ymd();
    let mut report = MaintenanceReport {
        decayed: decay_ephemeral(store, &today)?,
        demoted: demote_idle_working(store, &today)?,
        promoted_stable: promote_stable(store, &today)?,
        promoted_frequent: promote_frequent(store)?,
        consolidated: 0,
    };
    report.consolidated = consolidate(store, config, &today)?;
    Ok(report)
}

/// Archive ephemeral entries whose access-aware age window has run out:
/// never accessed after 3 days, lightly accessed after 7, otherwise 14.
fn decay_ephemeral(store: &mut Store, today: &str) -> Result<usize> {
    let changed = store.conn().execute(
        "UPDATE entries SET archived = 1 \
         WHERE tier = 'ephemeral' AND archived = 0 AND pinned = 0 AND ( \
               (access_count = 0 AND julianday(?1) - julianday(date) > 3) \
            OR (access_count BETWEEN 1 AND 2 AND julianday(?1) - julianday(date) > 7) \
            OR (access_count >= 3 AND julianday(?1) - julianday(date) > 14))",
        params![today],
    )?;
    Ok(changed)
}

/// Retire working entries nobody has touched: idle 15 days with no accesses,
/// 30 with a couple, 60 otherwise. Idle counts from the last access, falling
/// back to the entry date.
fn demote_idle_working(store: &mut Store, today: &str) -> Result<usize> {
    let changed = store.conn().execute(
        "UPDATE entries SET tier = 'ephemeral' \
         WHERE tier = 'working' AND archived = 0 AND pinned = 0 AND ( \
               (access_count = 0 \
                AND julianday(?1) - julianday(COALESCE(last_accessed, date)) > 15) \
            OR (access_count BETWEEN 1 AND 2 \
                AND julianday(?1) - julianday(COALESCE(last_accessed, date)) > 30) \
            OR (access_count >= 3 \
                AND julianday(?1) - julianday(COALESCE(last_accessed, date)) > 60))",
        params![today],
    )?;
    Ok(changed)
}

/// Decisions and insights that survived a week at working tier graduate.
fn promote_stable(store: &mut Store, today: &str) -> Result<usize> {
    let changed = store.conn().execute(
        "UPDATE entries SET tier = 'longterm' \
         WHERE tier = 'working' AND archived = 0 AND pinned = 0 \
           AND type IN ('decision','insight') \
           AND julianday(?1) - julianday(date) > 7",
        params![today],
    )?;
    Ok(changed)
}

/// Ephemeral entries accessed three or more times earn working tier.
fn promote_frequent(store: &mut Store) -> Result<usize> {
    let changed = store.conn().execute(
        "UPDATE entries SET tier = 'working' \
         WHERE tier = 'ephemeral' AND archived = 0 AND pinned = 0 AND access_count >= 3",
        [],
    )?;
    Ok(changed)
}

/// A consolidation candidate: entry plus its stored vector.
struct Candidate {
    entry: Entry,
    embedding: Vec<f32>,
}

/// Greedy first-match-wins clustering of recent issues and decisions by
/// cosine similarity. Returns clusters at or above the minimum size.
pub fn find_consolidation_candidates(
    store: &Store,
    similarity: f64,
    min_cluster: usize,
) -> Result<Vec<Vec<Entry>>> {
    let window = window_start(&clock::today_ymd(), 30);
    let sql = format!(
        "SELECT {ENTRY_COLS}, v.embedding FROM entries e \
         JOIN entries_vec v ON v.entry_row = e.rowid \
         WHERE e.archived = 0 AND e.pinned = 0 \
           AND e.type IN ('issue','decision') AND e.date >= ?1 \
         ORDER BY e.date DESC, e.time DESC"
    );
    let mut stmt = store.conn().prepare(&sql)?;
    let candidates: Vec<Candidate> = stmt
        .query_map(params![window], |row| {
            let entry = entry_from_row(row)?;
            let bytes: Vec<u8> = row.get(17)?;
            Ok(Candidate {
                entry,
                embedding: bytes_to_embedding(&bytes),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut assigned = vec![false; candidates.len()];
    let mut clusters: Vec<Vec<Entry>> = Vec::new();
    for i in 0..candidates.len() {
        if assigned[i] {
            continue;
        }
        let mut members = vec![i];
        for j in (i + 1)..candidates.len() {
            if assigned[j] {
                continue;
            }
            if cosine(&candidates[i].embedding, &candidates[j].embedding) >= similarity {
                members.push(j);
            }
        }
        if members.len() >= min_cluster {
            for &m in &members {
                assigned[m] = true;
            }
            clusters.push(members.iter().map(|&m| candidates[m].entry.clone()).collect());
        }
    }
    Ok(clusters)
}

/// Merge each qualifying cluster into its most-accessed member, archive the
/// rest. Returns the number of clusters consolidated.
fn consolidate(store: &mut Store, config: &MaintenanceConfig, today: &str) -> Result<usize> {
    let clusters = find_consolidation_candidates(
        store,
        config.consolidation_similarity,
        config.consolidation_min_cluster,
    )?;

    let mut merged = 0;
    for cluster in clusters {
        if !cluster_qualifies(&cluster, today, config.consolidation_min_age_days) {
            continue;
        }
        apply_consolidation(store, &cluster)?;
        merged += 1;
    }
    Ok(merged)
}

/// Every member must be past the minimum age, and no rules or references
/// may be swept up.
fn cluster_qualifies(cluster: &[Entry], today: &str, min_age_days: i64) -> bool {
    cluster.iter().all(|e| {
        if matches!(e.entry_type, EntryType::Rule | EntryType::Reference) {
            return false;
        }
        age_days(today, &e.date) > min_age_days
    })
}

fn age_days(today: &str, date: &str) -> i64 {
    match (
        chrono::NaiveDate::parse_from_str(today, "%Y-%m-%d"),
        chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d"),
    ) {
        (Ok(t), Ok(d)) => (t - d).num_days().max(0),
        _ => 0,
    }
}

fn apply_consolidation(store: &mut Store, cluster: &[Entry]) -> Result<()> {
    // Survivor: most accessed, ties to the most recent
    let survivor = cluster
        .iter()
        .max_by(|a, b| {
            a.access_count
                .cmp(&b.access_count)
                .then_with(|| a.date.cmp(&b.date))
                .then_with(|| a.time.cmp(&b.time))
        })
        .expect("cluster is non-empty");

    let mut tags = survivor.tags.clone();
    for other in cluster.iter().filter(|e| e.id != survivor.id) {
        for tag in &other.tags {
            if !tags.contains(tag) {
                tags.push(tag.clone());
            }
        }
    }

    let content = format!(
        "{}\n[Consolidated from {} entries]",
        survivor.content,
        cluster.len()
    );
    let tier = if survivor.tier == Tier::Ephemeral {
        Tier::Working
    } else {
        survivor.tier
    };

    let mut updated = survivor.clone();
    updated.tags = tags;
    updated.content = content;
    updated.tier = tier;
    update_survivor(store, &updated)?;

    let losers: Vec<String> = cluster
        .iter()
        .filter(|e| e.id != survivor.id)
        .map(|e| e.id.clone())
        .collect();
    store.archive(&losers)?;
    Ok(())
}

/// Rewrite the survivor row in place, keeping the FTS shadow in step.
/// The rowid (and therefore the vector) is preserved.
fn update_survivor(store: &mut Store, entry: &Entry) -> Result<()> {
    let tx = store.conn().unchecked_transaction()?;
    tx.execute(
        "UPDATE entries SET tags = ?1, content = ?2, tier = ?3 WHERE id = ?4",
        params![entry.tags_joined(), entry.content, entry.tier.as_str(), entry.id],
    )?;
    tx.execute(
        "DELETE FROM entries_fts WHERE rowid = ?1",
        params![entry.row_id],
    )?;
    tx.execute(
        "INSERT INTO entries_fts (rowid, content, tags, etype) VALUES (?1, ?2, ?3, ?4)",
        params![
            entry.row_id,
            entry.content,
            entry.tags_joined(),
            entry.entry_type.as_str()
        ],
    )?;
    tx.commit()?;
    Ok(())
}
