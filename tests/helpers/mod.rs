#![allow(dead_code)]

use anyhow::Result;
use hindsight::clock;
use hindsight::config::HindsightConfig;
use hindsight::embedding::{EmbeddingProvider, EMBEDDING_DIM};
use hindsight::engine::Engine;
use hindsight::store::types::{Entry, EntryType, Tier};
use hindsight::store::Store;

/// Open a fresh in-memory store with the full schema.
pub fn test_store() -> Store {
    Store::open_in_memory().unwrap()
}

/// Deterministic 384-dim embedding with a spike at position `seed`.
/// Distinct seeds are orthogonal.
pub fn spike(seed: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; EMBEDDING_DIM];
    v[seed % EMBEDDING_DIM] = 1.0;
    v
}

/// An embedding close to `base` (high cosine similarity, not identical).
pub fn similar_embedding(base: &[f32]) -> Vec<f32> {
    let mut v = base.to_vec();
    for i in 0..5 {
        v[(i * 37) % EMBEDDING_DIM] += 0.05;
    }
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

/// `YYYY-MM-DD` for `n` days before today, host-local.
pub fn days_ago(n: i64) -> String {
    (chrono::Local::now().date_naive() - chrono::Duration::days(n))
        .format("%Y-%m-%d")
        .to_string()
}

/// Insert an entry with an explicit date and vector. Returns the rowid.
pub fn insert_dated(
    store: &mut Store,
    id: &str,
    entry_type: EntryType,
    content: &str,
    date: &str,
    embedding: &[f32],
) -> i64 {
    let e = Entry::new(id.into(), date.into(), "12:00".into(), entry_type, content.into());
    let row = store.insert(&e).unwrap();
    store.insert_vec(row, embedding).unwrap();
    row
}

/// Insert a fully-specified entry plus its vector.
pub fn insert_entry(store: &mut Store, entry: &Entry, embedding: &[f32]) -> i64 {
    let row = store.insert(entry).unwrap();
    store.insert_vec(row, embedding).unwrap();
    row
}

/// Deterministic provider: text hashes to an orthogonal spike. Identical
/// text always embeds identically; different text almost always lands on a
/// different dimension.
pub struct HashProvider;

impl EmbeddingProvider for HashProvider {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let h: usize = text
            .bytes()
            .fold(7usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize));
        Ok(spike(h))
    }
}

/// Keyword-bucket provider for scanner tests: directive-like phrases all
/// land on one spike (so they match the anchor/intent templates and each
/// other), everything else hashes like [`HashProvider`].
pub struct KeywordProvider;

impl EmbeddingProvider for KeywordProvider {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let t = text.to_lowercase();
        if ["always", "never", "from now on", "rule"]
            .iter()
            .any(|kw| t.contains(kw))
        {
            return Ok(spike(1));
        }
        HashProvider.embed(text)
    }
}

/// Engine over an in-memory store rooted at a temp dir.
pub fn test_engine_with(
    provider: Box<dyn EmbeddingProvider>,
) -> (Engine, tempfile::TempDir) {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = HindsightConfig::default();
    config.storage.base_dir = tmp.path().to_string_lossy().into_owned();
    let engine = Engine::open_ephemeral(config, provider, tmp.path().to_path_buf()).unwrap();
    (engine, tmp)
}

pub fn test_engine() -> (Engine, tempfile::TempDir) {
    test_engine_with(Box::new(HashProvider))
}

/// Engine whose config carries a current project.
pub fn test_engine_for_project(project: &str) -> (Engine, tempfile::TempDir) {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = HindsightConfig::default();
    config.storage.base_dir = tmp.path().to_string_lossy().into_owned();
    config.storage.project = project.to_string();
    let engine =
        Engine::open_ephemeral(config, Box::new(HashProvider), tmp.path().to_path_buf()).unwrap();
    (engine, tmp)
}

/// A plain entry dated today.
pub fn entry_today(id: &str, entry_type: EntryType, content: &str) -> Entry {
    Entry::new(
        id.into(),
        clock::today_ymd(),
        "12:00".into(),
        entry_type,
        content.into(),
    )
}

/// Shorthand for an issue entry at a given tier.
pub fn tiered_entry(id: &str, entry_type: EntryType, tier: Tier, content: &str) -> Entry {
    let mut e = entry_today(id, entry_type, content);
    e.tier = tier;
    e
}
