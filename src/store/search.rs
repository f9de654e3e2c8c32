//! Hybrid retrieval — BM25 + vector KNN fused with RRF, then weighted by
//! temporal decay, tier, and access confidence.
//!
//! Three first-class modes: [`hybrid_search`] (the default), [`fast_search`]
//! (lexical only, for bare identifier lookups), and [`semantic_search`]
//! (vector only). [`select_mode`] picks between fast and hybrid for callers
//! that pass `Auto`.

use anyhow::Result;
use std::collections::HashMap;
use std::sync::OnceLock;

use crate::clock;
use crate::store::entries::{window_start, EntryFilter, Store};
use crate::store::types::{Entry, EntryType, Tier};

/// RRF constant; a rank-`r` hit contributes `1/(K + r + 1)`.
const RRF_K: f64 = 60.0;

/// Candidate pool multiplier: each signal fetches `3 × limit` rows.
const CANDIDATE_FACTOR: usize = 3;

/// Hard ceiling on the returned result count.
const MAX_LIMIT: usize = 100;

/// KNN probe pool for similarity lookups that filter afterwards
/// (an implementation bound, generous against the 30-day issue window).
const SIMILAR_PROBE_LIMIT: usize = 50;

/// How a query is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    /// Bare single tokens go fast, everything else hybrid.
    Auto,
    /// Lexical only. No fusion, no vector lookup.
    Fast,
    /// Vector only, with local filters.
    Semantic,
    /// RRF fusion of lexical and vector signals.
    Hybrid,
}

/// Retrieval options shared by all modes.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub entry_type: Option<EntryType>,
    pub days: Option<u32>,
    pub limit: usize,
    pub tier: Option<Tier>,
    pub include_archived: bool,
    pub project: Option<String>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            entry_type: None,
            days: None,
            limit: 10,
            tier: None,
            include_archived: false,
            project: None,
        }
    }
}

/// One retrieval result with its final fused score.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub entry: Entry,
    pub score: f64,
}

/// Pick fast for a single bare identifier-like token, hybrid otherwise.
pub fn select_mode(query: &str) -> SearchMode {
    static BARE_TOKEN: OnceLock<regex::Regex> = OnceLock::new();
    let re = BARE_TOKEN.get_or_init(|| regex::Regex::new(r"^[a-zA-Z0-9_-]+$").unwrap());
    if re.is_match(query.trim()) {
        SearchMode::Fast
    } else {
        SearchMode::Hybrid
    }
}

/// Fused retrieval: lexical + vector RRF, decay/tier/confidence weighting,
/// post-filters, stable ordering, access bump on the returned ids.
pub fn hybrid_search(
    store: &mut Store,
    query: &str,
    v_query: &[f32],
    opts: &SearchOptions,
) -> Result<Vec<SearchHit>> {
    if query.trim().is_empty() {
        return Ok(Vec::new());
    }
    let limit = opts.limit.min(MAX_LIMIT);
    let cand = CANDIDATE_FACTOR * limit;

    let lexical_filter = EntryFilter {
        entry_type: opts.entry_type,
        days: opts.days,
        include_archived: opts.include_archived,
    };
    let lexical = store.search_lexical(query, &lexical_filter, cand)?;
    let vector = store.search_vec(v_query, cand)?;

    // RRF merge across both ranked lists, keyed by rowid
    let mut fused: HashMap<i64, f64> = HashMap::new();
    for (rank, entry) in lexical.iter().enumerate() {
        *fused.entry(entry.row_id).or_insert(0.0) += 1.0 / (RRF_K + rank as f64 + 1.0);
    }
    for (rank, (row_id, _distance)) in vector.iter().enumerate() {
        *fused.entry(*row_id).or_insert(0.0) += 1.0 / (RRF_K + rank as f64 + 1.0);
    }

    // Hydrate entries the lexical pass didn't already load
    let mut by_row: HashMap<i64, Entry> =
        lexical.into_iter().map(|e| (e.row_id, e)).collect();
    let missing: Vec<i64> = fused
        .keys()
        .filter(|row| !by_row.contains_key(row))
        .copied()
        .collect();
    for entry in store.get_by_rowids(&missing)? {
        by_row.insert(entry.row_id, entry);
    }

    let today = clock::today_ymd();
    let mut hits: Vec<SearchHit> = Vec::new();
    for (row_id, rrf) in fused {
        // A vector row can outlive its entry between processes; skip quietly
        let Some(entry) = by_row.remove(&row_id) else { continue };
        if !passes_filters(&entry, opts) {
            continue;
        }
        let score = rrf
            * temporal_decay(&today, &entry.date)
            * entry.tier.weight()
            * access_confidence(entry.access_count);
        hits.push(SearchHit { entry, score });
    }

    sort_and_truncate(&mut hits, limit);
    bump_hits(store, &hits)?;
    Ok(hits)
}

/// Lexical-only retrieval for bare token lookups. Still bumps access.
pub fn fast_search(
    store: &mut Store,
    query: &str,
    opts: &SearchOptions,
) -> Result<Vec<SearchHit>> {
    let limit = opts.limit.min(MAX_LIMIT);
    let filter = EntryFilter {
        entry_type: opts.entry_type,
        days: opts.days,
        include_archived: opts.include_archived,
    };
    let hits: Vec<SearchHit> = store
        .search_lexical(query, &filter, limit)?
        .into_iter()
        .filter(|e| passes_filters(e, opts))
        .enumerate()
        .map(|(rank, entry)| SearchHit {
            entry,
            score: 1.0 / (RRF_K + rank as f64 + 1.0),
        })
        .collect();
    bump_hits(store, &hits)?;
    Ok(hits)
}

/// Vector-only retrieval with local filters. Still bumps access.
pub fn semantic_search(
    store: &mut Store,
    v_query: &[f32],
    opts: &SearchOptions,
) -> Result<Vec<SearchHit>> {
    let limit = opts.limit.min(MAX_LIMIT);
    let knn = store.search_vec(v_query, CANDIDATE_FACTOR * limit)?;
    let by_row: HashMap<i64, f64> = knn.iter().copied().collect();
    let entries = store.get_by_rowids(&knn.iter().map(|(r, _)| *r).collect::<Vec<_>>())?;

    let today = clock::today_ymd();
    let window = opts.days.map(|d| window_start(&today, d));
    let mut hits: Vec<SearchHit> = entries
        .into_iter()
        .filter(|e| passes_filters(e, opts))
        .filter(|e| window.as_deref().map_or(true, |w| e.date.as_str() >= w))
        .map(|entry| {
            let distance = by_row.get(&entry.row_id).copied().unwrap_or(f64::MAX);
            // cosine similarity for unit-norm vectors: 1 − d²/2
            SearchHit {
                score: 1.0 - distance * distance / 2.0,
                entry,
            }
        })
        .collect();

    sort_and_truncate(&mut hits, limit);
    bump_hits(store, &hits)?;
    Ok(hits)
}

/// Recent unresolved lookalikes of an issue vector: `type=issue`, not
/// archived, within the day window, L2 distance at or under the threshold.
/// Does not bump access.
pub fn find_similar_issues(
    store: &Store,
    v: &[f32],
    days: u32,
    distance_threshold: f64,
) -> Result<Vec<(Entry, f64)>> {
    let knn = store.search_vec(v, SIMILAR_PROBE_LIMIT)?;
    let close: Vec<(i64, f64)> = knn
        .into_iter()
        .take_while(|(_, d)| *d <= distance_threshold)
        .collect();
    if close.is_empty() {
        return Ok(Vec::new());
    }

    let by_row: HashMap<i64, f64> = close.iter().copied().collect();
    let window = window_start(&clock::today_ymd(), days);
    let mut found: Vec<(Entry, f64)> = store
        .get_by_rowids(&close.iter().map(|(r, _)| *r).collect::<Vec<_>>())?
        .into_iter()
        .filter(|e| e.entry_type == EntryType::Issue && !e.archived && e.date >= window)
        .map(|e| {
            let d = by_row.get(&e.row_id).copied().unwrap_or(f64::MAX);
            (e, d)
        })
        .collect();
    found.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
    Ok(found)
}

// ── Scoring helpers ──────────────────────────────────────────────────────────

/// `0.5^(age_days / 30)` with negative ages (future dates, clock skew)
/// clamped to zero.
pub fn temporal_decay(today: &str, entry_date: &str) -> f64 {
    let age = match (
        chrono::NaiveDate::parse_from_str(today, "%Y-%m-%d"),
        chrono::NaiveDate::parse_from_str(entry_date, "%Y-%m-%d"),
    ) {
        (Ok(t), Ok(d)) => (t - d).num_days().max(0),
        _ => 0,
    };
    0.5f64.powf(age as f64 / 30.0)
}

/// Access-count-indexed confidence multiplier.
pub fn access_confidence(access_count: u32) -> f64 {
    match access_count {
        0 => 0.7,
        1..=2 => 1.0,
        3..=5 => 1.2,
        _ => 1.4,
    }
}

fn passes_filters(entry: &Entry, opts: &SearchOptions) -> bool {
    if entry.archived && !opts.include_archived {
        return false;
    }
    if let Some(tier) = opts.tier {
        if entry.tier != tier {
            return false;
        }
    }
    if let Some(t) = opts.entry_type {
        if entry.entry_type != t {
            return false;
        }
    }
    if let Some(ref project) = opts.project {
        if entry.project.as_deref() != Some(project.as_str()) {
            return false;
        }
    }
    true
}

/// Score descending, then `(date, time)` descending for stable output.
fn sort_and_truncate(hits: &mut Vec<SearchHit>, limit: usize) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.entry.date.cmp(&a.entry.date))
            .then_with(|| b.entry.time.cmp(&a.entry.time))
    });
    hits.truncate(limit);
}

fn bump_hits(store: &mut Store, hits: &[SearchHit]) -> Result<()> {
    let ids: Vec<String> = hits.iter().map(|h| h.entry.id.clone()).collect();
    store.bump_access(&ids)
}
