//! ONNX Runtime provider for all-MiniLM-L6-v2.
//!
//! Tokenize → run the transformer → mean-pool over the attention mask →
//! L2-normalize. Model files live in the cache directory and are fetched by
//! `hindsight model download`.

use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use ort::session::Session;
use ort::value::Tensor;
use tokenizers::Tokenizer;

use super::{EmbeddingProvider, EMBEDDING_DIM};
use crate::config::EmbeddingConfig;

/// all-MiniLM-L6-v2 was trained at sequence length 256.
const MAX_SEQ_LEN: usize = 256;

/// Local ONNX-backed embedding model.
///
/// Init loads the model into memory (hundreds of ms); construct once per
/// process and share through [`super::Embedder`].
pub struct OnnxModel {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
}

impl OnnxModel {
    pub fn load(config: &EmbeddingConfig) -> Result<Self> {
        let cache_dir = crate::config::expand_tilde(&config.cache_dir);
        Self::load_from_dir(&cache_dir)
    }

    pub fn load_from_dir(cache_dir: &Path) -> Result<Self> {
        let model_path = cache_dir.join("model.onnx");
        let tokenizer_path = cache_dir.join("tokenizer.json");

        anyhow::ensure!(
            model_path.exists() && tokenizer_path.exists(),
            "embedding model not found under {}. Run `hindsight model download` first.",
            cache_dir.display()
        );

        let session = Session::builder()?
            .with_optimization_level(ort::session::builder::GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?
            .commit_from_file(&model_path)
            .context("failed to load ONNX model")?;

        let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow::anyhow!("failed to load tokenizer: {e}"))?;
        tokenizer
            .with_truncation(Some(tokenizers::TruncationParams {
                max_length: MAX_SEQ_LEN,
                ..Default::default()
            }))
            .map_err(|e| anyhow::anyhow!("failed to set truncation: {e}"))?;
        tokenizer.with_padding(Some(tokenizers::PaddingParams {
            strategy: tokenizers::PaddingStrategy::BatchLongest,
            ..Default::default()
        }));

        tracing::info!(model = %model_path.display(), "embedding model loaded");

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
        })
    }
}

// Tokenizer is Send+Sync; Session is serialized behind the Mutex.
unsafe impl Send for OnnxModel {}
unsafe impl Sync for OnnxModel {}

impl EmbeddingProvider for OnnxModel {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut out = self.embed_batch(&[text])?;
        Ok(out.pop().expect("batch of one"))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| anyhow::anyhow!("tokenization failed: {e}"))?;
        let batch = encodings.len();
        let seq_len = encodings[0].get_ids().len();

        let mut input_ids = Vec::with_capacity(batch * seq_len);
        let mut attention = Vec::with_capacity(batch * seq_len);
        for encoding in &encodings {
            input_ids.extend(encoding.get_ids().iter().map(|&id| id as i64));
            attention.extend(encoding.get_attention_mask().iter().map(|&m| m as i64));
        }

        let shape = vec![batch as i64, seq_len as i64];
        let ids_tensor = Tensor::from_array((shape.clone(), input_ids.into_boxed_slice()))?;
        let mask_tensor =
            Tensor::from_array((shape.clone(), attention.clone().into_boxed_slice()))?;
        // Single-sentence input: segment ids are all zero
        let segments = vec![0i64; batch * seq_len];
        let segments_tensor = Tensor::from_array((shape, segments.into_boxed_slice()))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| anyhow::anyhow!("session lock poisoned: {e}"))?;
        let outputs = session.run(ort::inputs! {
            "input_ids" => ids_tensor,
            "attention_mask" => mask_tensor,
            "token_type_ids" => segments_tensor,
        }?)?;

        // Output name varies by export; fall back to the first output
        let hidden = outputs
            .get("token_embeddings")
            .or_else(|| outputs.get("last_hidden_state"))
            .unwrap_or_else(|| &outputs[0]);
        let hidden_view = hidden
            .try_extract_tensor::<f32>()
            .context("failed to extract hidden-state tensor")?;

        let dims: Vec<i64> = hidden_view.shape().iter().map(|&d| d as i64).collect();
        anyhow::ensure!(
            dims.len() == 3 && dims[2] == EMBEDDING_DIM as i64,
            "unexpected hidden-state shape {dims:?}, wanted [batch, seq, {EMBEDDING_DIM}]"
        );
        let out_seq_len = dims[1] as usize;
        let data = hidden_view
            .as_slice()
            .context("hidden-state tensor is not contiguous")?;

        let mut results = Vec::with_capacity(batch);
        for b in 0..batch {
            results.push(mean_pool(
                data,
                &attention[b * seq_len..(b + 1) * seq_len],
                b,
                out_seq_len,
            ));
        }
        Ok(results)
    }
}

/// Attention-masked mean over token embeddings, then L2-normalize.
fn mean_pool(data: &[f32], mask: &[i64], batch_index: usize, seq_len: usize) -> Vec<f32> {
    let mut sum = vec![0.0f32; EMBEDDING_DIM];
    let mut count = 0.0f32;
    for (s, &m) in mask.iter().take(seq_len).enumerate() {
        if m == 0 {
            continue;
        }
        let offset = (batch_index * seq_len + s) * EMBEDDING_DIM;
        for (d, slot) in sum.iter_mut().enumerate() {
            *slot += data[offset + d];
        }
        count += 1.0;
    }
    if count > 0.0 {
        for x in &mut sum {
            *x /= count;
        }
    }
    l2_normalize(&mut sum);
    sum
}

/// Normalize in place. A zero vector stays zero.
fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}
