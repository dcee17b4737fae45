pub mod agent;
pub mod ingest;
pub mod recall;
pub mod stats;
pub mod think;

use std::path::Path;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::io::AsyncWriteExt;

const HF_BASE: &str = "https://huggingface.co/BAAI/bge-small-en-v1.5/resolve/main";

/// Embedding model files fetched by `model download`: (local name, remote path).
const MODEL_FILES: &[(&str, &str)] = &[
    ("model.onnx", "onnx/model.onnx"),
    ("tokenizer.json", "tokenizer.json"),
];

/// Download the ONNX embedding model and tokenizer to the cache directory.
pub async fn model_download(config: &crate::config::EmbeddingConfig) -> Result<()> {
    let cache_dir = crate::config::expand_tilde(&config.cache_dir);
    std::fs::create_dir_all(&cache_dir)
        .with_context(|| format!("failed to create cache dir: {}", cache_dir.display()))?;

    for (name, remote) in MODEL_FILES {
        let dest = cache_dir.join(name);
        if dest.exists() {
            println!("{name} already present at {}", dest.display());
            continue;
        }
        println!("Downloading {name}...");
        fetch_to_file(&format!("{HF_BASE}/{remote}"), &dest).await?;
        println!("Saved {}", dest.display());
    }

    println!("Model download complete.");
    Ok(())
}

/// Stream a URL to disk with a progress bar, writing through a temp file so
/// an interrupted download never leaves a partial artifact behind.
async fn fetch_to_file(url: &str, dest: &Path) -> Result<()> {
    let mut response = reqwest::get(url)
        .await
        .with_context(|| format!("request failed for {url}"))?
        .error_for_status()
        .with_context(|| format!("download rejected for {url}"))?;

    let bar = match response.content_length() {
        Some(total) => {
            let bar = ProgressBar::new(total);
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("  {bar:40.cyan/blue} {bytes}/{total_bytes} {bytes_per_sec} ({eta})")
                    .expect("valid template")
                    .progress_chars("=>-"),
            );
            bar
        }
        None => ProgressBar::new_spinner(),
    };

    let tmp = dest.with_extension("partial");
    let mut file = tokio::fs::File::create(&tmp)
        .await
        .with_context(|| format!("failed to create {}", tmp.display()))?;

    while let Some(chunk) = response.chunk().await.context("error reading response")? {
        file.write_all(&chunk).await.context("error writing file")?;
        bar.inc(chunk.len() as u64);
    }
    file.flush().await?;
    drop(file);

    tokio::fs::rename(&tmp, dest)
        .await
        .with_context(|| format!("failed to move download into {}", dest.display()))?;
    bar.finish_and_clear();
    Ok(())
}
