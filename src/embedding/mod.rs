//! Text-to-vector pipeline: provider trait, embed cache, and the template
//! classifier.
//!
//! The model itself is behind [`EmbeddingProvider`] — a pure
//! `text → unit-norm f32[384]` function as far as the rest of the engine is
//! concerned. [`Embedder`] wraps a provider with a process-local LRU cache
//! and the lazily-embedded template catalogues used for classification.

pub mod model;
pub mod templates;

use anyhow::Result;
use lru::LruCache;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

pub use templates::{catalog_templates, Catalog, Template};

/// Number of dimensions in the embedding vectors (all-MiniLM-L6-v2).
pub const EMBEDDING_DIM: usize = 384;

/// Embed-cache capacity. Hooks re-embed the same handful of strings
/// (queries, templates, rule texts) many times per session.
const CACHE_CAPACITY: usize = 100;

/// Trait for embedding text into vectors.
///
/// Implementations produce L2-normalized vectors of exactly
/// [`EMBEDDING_DIM`] dimensions, deterministically for identical input.
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text string into a unit-norm vector.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch. Implementations may override for batched inference.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    fn dimensions(&self) -> usize {
        EMBEDDING_DIM
    }
}

/// Provider stand-in for hosts without downloaded model files. Every embed
/// fails, which degrades retrieval to lexical-only and makes explicit saves
/// error — exactly the taxonomy the hooks expect.
pub struct UnavailableProvider;

impl EmbeddingProvider for UnavailableProvider {
    fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        anyhow::bail!("embedding model not available; run `hindsight model download`")
    }
}

/// A classifier verdict: the winning category and its cosine similarity.
#[derive(Debug, Clone)]
pub struct Classification {
    pub category: String,
    pub similarity: f64,
}

/// A template with its pre-computed embedding.
struct EmbeddedTemplate {
    category: &'static str,
    vector: Vec<f32>,
}

/// Caching front-end over an [`EmbeddingProvider`].
pub struct Embedder {
    provider: Box<dyn EmbeddingProvider>,
    cache: Mutex<LruCache<String, Arc<Vec<f32>>>>,
    catalogs: Mutex<HashMap<Catalog, Arc<Vec<EmbeddedTemplate>>>>,
}

impl Embedder {
    pub fn new(provider: Box<dyn EmbeddingProvider>) -> Self {
        Self {
            provider,
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(CACHE_CAPACITY).expect("capacity is non-zero"),
            )),
            catalogs: Mutex::new(HashMap::new()),
        }
    }

    /// Embed a text, hitting the LRU first. Keyed by `lower(trim(text))` so
    /// trivially-rephrased lookups share one inference.
    pub fn embed(&self, text: &str) -> Result<Arc<Vec<f32>>> {
        let key = text.trim().to_lowercase();
        if let Some(hit) = self.cache.lock().expect("cache lock").get(&key) {
            return Ok(hit.clone());
        }
        let vector = Arc::new(self.provider.embed(text)?);
        self.cache
            .lock()
            .expect("cache lock")
            .put(key, vector.clone());
        Ok(vector)
    }

    /// Classify text against a catalogue: the best-matching template's
    /// category, iff its cosine similarity clears the threshold.
    ///
    /// Vectors are unit-norm, so the dot product is the cosine.
    pub fn classify(
        &self,
        text: &str,
        catalog: Catalog,
        threshold: f64,
    ) -> Result<Option<Classification>> {
        let v = self.embed(text)?;
        let templates = self.catalog_embeddings(catalog)?;

        let mut best: Option<Classification> = None;
        for template in templates.iter() {
            let similarity = dot(&v, &template.vector);
            if best.as_ref().map_or(true, |b| similarity > b.similarity) {
                best = Some(Classification {
                    category: template.category.to_string(),
                    similarity,
                });
            }
        }
        Ok(best.filter(|b| b.similarity >= threshold))
    }

    /// Optional warm-up: runs one inference so the first real call doesn't
    /// pay model-load latency. Failures are ignored — warm-up must never
    /// affect correctness.
    pub fn warm_up(&self) {
        let _ = self.embed("warm up the model");
    }

    /// Template embeddings for a catalogue, computed on first use.
    fn catalog_embeddings(&self, catalog: Catalog) -> Result<Arc<Vec<EmbeddedTemplate>>> {
        if let Some(hit) = self.catalogs.lock().expect("catalog lock").get(&catalog) {
            return Ok(hit.clone());
        }
        let mut embedded = Vec::new();
        for template in catalog_templates(catalog) {
            embedded.push(EmbeddedTemplate {
                category: template.category,
                vector: self.embed(template.text)?.as_ref().clone(),
            });
        }
        let embedded = Arc::new(embedded);
        self.catalogs
            .lock()
            .expect("catalog lock")
            .insert(catalog, embedded.clone());
        Ok(embedded)
    }
}

fn dot(a: &[f32], b: &[f32]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (*x as f64) * (*y as f64)).sum()
}
