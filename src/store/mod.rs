//! Entry storage, hybrid retrieval, lifecycle maintenance, and patterns.
//!
//! The write/read surface lives in [`entries`], ranking in [`search`],
//! age-based lifecycle in [`maintenance`], and recurring-issue plus co-change
//! tracking in [`patterns`]. Type definitions live in [`types`].

pub mod entries;
pub mod maintenance;
pub mod patterns;
pub mod search;
pub mod types;

pub use entries::{EntryFilter, Store};

/// Number of dimensions in the embedding vectors (all-MiniLM-L6-v2).
pub use crate::embedding::EMBEDDING_DIM;

/// Convert an f32 embedding slice to raw bytes for sqlite-vec.
pub fn embedding_to_bytes(embedding: &[f32]) -> &[u8] {
    unsafe {
        std::slice::from_raw_parts(
            embedding.as_ptr() as *const u8,
            embedding.len() * std::mem::size_of::<f32>(),
        )
    }
}

/// Convert raw little-endian bytes back to an f32 embedding.
pub fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes(chunk.try_into().unwrap()))
        .collect()
}

/// Convert a cosine similarity threshold to an L2 distance threshold.
///
/// sqlite-vec reports L2 distance. For L2-normalized vectors:
///   L2_dist = sqrt(2 * (1 - cosine_similarity))
pub fn cosine_threshold_to_l2(cosine_threshold: f64) -> f64 {
    (2.0 * (1.0 - cosine_threshold)).sqrt()
}

/// Cosine similarity between two unit-norm vectors (plain dot product).
pub fn cosine(a: &[f32], b: &[f32]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (*x as f64) * (*y as f64)).sum()
}
