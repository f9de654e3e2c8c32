//! Operator-facing helpers for the binary: embedding-model download.

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use tokio::io::AsyncWriteExt;

/// Model artifacts fetched into the cache directory, `(file name, url)`.
const ARTIFACTS: &[(&str, &str)] = &[
    (
        "model.onnx",
        "https://huggingface.co/sentence-transformers/all-MiniLM-L6-v2/resolve/main/onnx/model.onnx",
    ),
    (
        "tokenizer.json",
        "https://huggingface.co/sentence-transformers/all-MiniLM-L6-v2/resolve/main/tokenizer.json",
    ),
];

/// Fetch the ONNX embedding model and tokenizer into the cache directory.
/// Already-present files are left alone.
pub async fn model_download(config: &crate::config::EmbeddingConfig) -> Result<()> {
    let cache_dir = crate::config::expand_tilde(&config.cache_dir);
    crate::db::create_private_dir(&cache_dir)
        .with_context(|| format!("failed to create cache dir: {}", cache_dir.display()))?;

    for (name, url) in ARTIFACTS {
        let dest = cache_dir.join(name);
        if dest.exists() {
            println!("{name} already present at {}", dest.display());
            continue;
        }
        println!("Downloading {name}...");
        fetch_to(url, &dest).await?;
        println!("{name} saved to {}", dest.display());
    }

    println!("Model download complete.");
    Ok(())
}

/// Stream one URL to disk with a progress bar. The write is atomic
/// (tmp file + rename) so a killed download never leaves a torn model.
async fn fetch_to(url: &str, dest: &Path) -> Result<()> {
    let response = reqwest::get(url)
        .await
        .with_context(|| format!("HTTP request failed for {url}"))?;
    anyhow::ensure!(
        response.status().is_success(),
        "download failed with HTTP {}",
        response.status()
    );

    let bar = match response.content_length() {
        Some(total) => {
            let bar = ProgressBar::new(total);
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("  {bar:40.cyan/blue} {bytes}/{total_bytes} ({eta})")
                    .expect("valid template")
                    .progress_chars("##-"),
            );
            bar
        }
        None => ProgressBar::new_spinner(),
    };

    let tmp = dest.with_extension("download");
    let mut file = tokio::fs::File::create(&tmp)
        .await
        .with_context(|| format!("failed to create {}", tmp.display()))?;

    let bytes = response.bytes().await.context("error reading response body")?;
    bar.inc(bytes.len() as u64);
    file.write_all(&bytes).await.context("error writing model file")?;
    file.flush().await?;
    drop(file);

    tokio::fs::rename(&tmp, dest)
        .await
        .context("failed to move downloaded file into place")?;
    bar.finish_and_clear();
    Ok(())
}
