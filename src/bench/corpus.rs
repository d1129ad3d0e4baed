//! Shared prompt corpus.
//!
//! The benchmark samples long prompts from a text file; a single copy of the
//! source text is too short, so it is concatenated `repeat` times after a
//! leading blank line.

use std::path::PathBuf;

use tokio::fs;
use tracing::info;

use crate::config::CorpusConfig;
use crate::error::{OrchestratorError, Result};

/// Write the repeated corpus and return its path. Rewrites it every run.
pub async fn prepare(config: &CorpusConfig) -> Result<PathBuf> {
    if !config.source.exists() {
        return Err(OrchestratorError::Corpus(config.source.clone()));
    }
    let text = fs::read_to_string(&config.source).await?;

    let mut corpus = String::with_capacity(1 + text.len() * config.repeat);
    corpus.push('\n');
    for _ in 0..config.repeat {
        corpus.push_str(&text);
    }

    if let Some(parent) = config.output.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }
    fs::write(&config.output, &corpus).await?;

    info!(
        source = %config.source.display(),
        output = %config.output.display(),
        bytes = corpus.len(),
        "Corpus prepared"
    );
    Ok(config.output.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_prepare_repeats_source() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("sonnet.txt");
        std::fs::write(&source, "line one\nline two\n").unwrap();

        let config = CorpusConfig {
            source,
            output: tmp.path().join("out/sonnet_4x.txt"),
            repeat: 4,
        };
        let path = prepare(&config).await.unwrap();
        let written = std::fs::read_to_string(path).unwrap();

        assert!(written.starts_with('\n'));
        assert_eq!(written.matches("line one").count(), 4);
        assert_eq!(written.len(), 1 + 4 * "line one\nline two\n".len());
    }

    #[tokio::test]
    async fn test_missing_source() {
        let tmp = TempDir::new().unwrap();
        let config = CorpusConfig {
            source: tmp.path().join("missing.txt"),
            output: tmp.path().join("out.txt"),
            repeat: 4,
        };
        assert!(matches!(
            prepare(&config).await,
            Err(OrchestratorError::Corpus(_))
        ));
    }
}
