#![deny(missing_docs)]
//! Content-addressed artifact storage.
//!
//! Large tool outputs, worker threads, and workspace diffs land here
//! instead of the event stream. Each actor (a worker, or a run's
//! supervisor) owns a directory under the root:
//!
//! ```text
//! root/
//!   workers/<worker_id>/
//!     thread.jsonl
//!     result.txt
//!     metadata.json
//!     metrics.jsonl
//!     tool_calls/<tool_call_id>.json
//!     diff.patch          (workspace mode only)
//! ```
//!
//! Blobs are addressed by SHA-256 and immutable once written: a second
//! `put` at the same path must carry identical content. The `*.jsonl`
//! logs are the exception — they are append-only streams, written one
//! JSON line at a time.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;

/// Errors from artifact operations.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// Filesystem failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The relative path escapes the actor directory or contains an
    /// unusable component.
    #[error("invalid artifact path: {0}")]
    InvalidPath(String),

    /// A blob at this path already exists with different content.
    #[error("artifact is immutable: {0}")]
    Immutable(String),

    /// JSON (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Pointer to a stored blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// Hex SHA-256 of the content.
    pub sha256: String,
    /// Path relative to the actor directory.
    pub path: String,
    /// Content length in bytes.
    pub bytes: u64,
}

/// Disk-backed artifact store rooted at one directory.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Create a store rooted at `root`. Directories are created lazily
    /// on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The directory owned by one actor.
    pub fn actor_dir(&self, actor: &str) -> PathBuf {
        self.root.join("workers").join(actor)
    }

    /// Write a blob and return its pointer. Immutable: rewriting the
    /// same path with identical bytes is a no-op, different bytes is an
    /// error.
    pub async fn put(
        &self,
        actor: &str,
        rel_path: &str,
        content: &[u8],
    ) -> Result<ArtifactRef, ArtifactError> {
        let target = self.resolve(actor, rel_path)?;
        let sha256 = hex_digest(content);

        if tokio::fs::try_exists(&target).await? {
            let existing = tokio::fs::read(&target).await?;
            if hex_digest(&existing) != sha256 {
                return Err(ArtifactError::Immutable(rel_path.to_owned()));
            }
            return Ok(ArtifactRef {
                sha256,
                path: rel_path.to_owned(),
                bytes: content.len() as u64,
            });
        }

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, content).await?;
        Ok(ArtifactRef {
            sha256,
            path: rel_path.to_owned(),
            bytes: content.len() as u64,
        })
    }

    /// Serialize `value` as pretty JSON and store it as a blob.
    pub async fn put_json<T: Serialize>(
        &self,
        actor: &str,
        rel_path: &str,
        value: &T,
    ) -> Result<ArtifactRef, ArtifactError> {
        let content = serde_json::to_vec_pretty(value)?;
        self.put(actor, rel_path, &content).await
    }

    /// Store a full tool result under `tool_calls/<id>.json`. The id is
    /// percent-encoded into a safe filename.
    pub async fn put_tool_call<T: Serialize>(
        &self,
        actor: &str,
        tool_call_id: &str,
        value: &T,
    ) -> Result<ArtifactRef, ArtifactError> {
        let rel_path = format!("tool_calls/{}.json", encode_filename(tool_call_id));
        self.put_json(actor, &rel_path, value).await
    }

    /// Append one JSON line to an append-only `*.jsonl` log.
    pub async fn append_jsonl<T: Serialize>(
        &self,
        actor: &str,
        rel_path: &str,
        value: &T,
    ) -> Result<(), ArtifactError> {
        if !rel_path.ends_with(".jsonl") {
            return Err(ArtifactError::InvalidPath(format!(
                "{rel_path}: append is only for .jsonl logs"
            )));
        }
        let target = self.resolve(actor, rel_path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut line = serde_json::to_vec(value)?;
        line.push(b'\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&target)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }

    /// Read a blob back.
    pub async fn get(&self, actor: &str, rel_path: &str) -> Result<Vec<u8>, ArtifactError> {
        let target = self.resolve(actor, rel_path)?;
        Ok(tokio::fs::read(&target).await?)
    }

    /// Whether a blob exists.
    pub async fn exists(&self, actor: &str, rel_path: &str) -> Result<bool, ArtifactError> {
        let target = self.resolve(actor, rel_path)?;
        Ok(tokio::fs::try_exists(&target).await?)
    }

    fn resolve(&self, actor: &str, rel_path: &str) -> Result<PathBuf, ArtifactError> {
        validate_component(actor)?;
        let rel = Path::new(rel_path);
        if rel.is_absolute() {
            return Err(ArtifactError::InvalidPath(rel_path.to_owned()));
        }
        for component in rel.components() {
            match component {
                std::path::Component::Normal(part) => {
                    let part = part
                        .to_str()
                        .ok_or_else(|| ArtifactError::InvalidPath(rel_path.to_owned()))?;
                    validate_component(part)?;
                }
                _ => return Err(ArtifactError::InvalidPath(rel_path.to_owned())),
            }
        }
        Ok(self.actor_dir(actor).join(rel))
    }
}

fn validate_component(part: &str) -> Result<(), ArtifactError> {
    let ok = !part.is_empty()
        && part != ".."
        && !part.starts_with('-')
        && part
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '%'));
    if ok {
        Ok(())
    } else {
        Err(ArtifactError::InvalidPath(part.to_owned()))
    }
}

/// Encode an arbitrary identifier into a safe filename. Unreserved
/// characters pass through; everything else is percent-encoded.
fn encode_filename(id: &str) -> String {
    let mut encoded = String::with_capacity(id.len());
    for ch in id.chars() {
        match ch {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => encoded.push(ch),
            _ => {
                for byte in ch.to_string().as_bytes() {
                    encoded.push_str(&format!("%{byte:02X}"));
                }
            }
        }
    }
    encoded
}

fn hex_digest(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}
