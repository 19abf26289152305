// Sink module - persists the aggregated results of one run
//
// This module is responsible for:
// 1. Serializing the per-server results as pretty-printed JSON
// 2. Replacing the output file atomically (temp file + rename)
// 3. Writing to stdout when the output path is "-"

use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::model::CollectionResult;

/// Errors that can occur while writing results
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("failed to serialize results: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to write {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Where a run's snapshot goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputSink {
    Stdout,
    File(PathBuf),
}

impl OutputSink {
    /// `-` selects stdout, anything else is a file path
    pub fn from_arg(arg: &str) -> Self {
        if arg == "-" {
            OutputSink::Stdout
        } else {
            OutputSink::File(PathBuf::from(arg))
        }
    }

    /// Writes the full result list, replacing any previous snapshot
    ///
    /// A consumer reading the file concurrently sees either the previous
    /// snapshot or the new one, never a partial write.
    pub async fn write(&self, results: &[CollectionResult]) -> Result<(), SinkError> {
        let mut payload = serde_json::to_vec_pretty(results)?;
        payload.push(b'\n');
        debug!("Serialized {} result(s): {} bytes", results.len(), payload.len());

        match self {
            OutputSink::Stdout => {
                let mut stdout = tokio::io::stdout();
                let io_err = |source| SinkError::Io {
                    path: "<stdout>".to_string(),
                    source,
                };
                stdout.write_all(&payload).await.map_err(io_err)?;
                stdout.flush().await.map_err(io_err)?;
            }
            OutputSink::File(path) => {
                write_atomically(path, &payload).await?;
                info!("Wrote {} result(s) to {}", results.len(), path.display());
            }
        }
        Ok(())
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "data.json".into());
    name.push(".tmp");
    path.with_file_name(name)
}

async fn write_atomically(path: &Path, payload: &[u8]) -> Result<(), SinkError> {
    let temp = temp_path(path);
    let io_err = |target: &Path| {
        let target = target.display().to_string();
        move |source| SinkError::Io { path: target, source }
    };

    tokio::fs::write(&temp, payload).await.map_err(io_err(&temp))?;
    if let Err(e) = tokio::fs::rename(&temp, path).await {
        // Best effort: don't leave the temp file behind
        let _ = tokio::fs::remove_file(&temp).await;
        return Err(io_err(path)(e));
    }
    Ok(())
}
