//! File-mirrored memory: a decorator that persists every append.
//!
//! Each message is written as one JSON line before it reaches the inner
//! memory, so a process that stops at an approval gate can be resumed with
//! [`FileMemory::restore`]. An optional transcript file receives the same
//! appends rendered for humans; a failed transcript write is logged and
//! does not fail the append.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tandem_core::error::MemoryError;
use tandem_core::memory::Memory;
use tandem_core::message::Message;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::transcript::transcript_line;

pub struct FileMemory {
    path: Option<PathBuf>,
    transcript: Option<PathBuf>,
    inner: Arc<dyn Memory>,
    // Held across the file write and the inner append so both see the
    // same order.
    write_lock: Mutex<()>,
}

impl FileMemory {
    /// Mirror appends to `path` (created on first write) and delegate to `inner`.
    pub fn new(path: impl Into<PathBuf>, inner: Arc<dyn Memory>) -> Self {
        Self {
            path: Some(path.into()),
            transcript: None,
            inner,
            write_lock: Mutex::new(()),
        }
    }

    /// Only write a plain-text transcript; nothing is persisted for restore.
    pub fn transcript_only(transcript: impl Into<PathBuf>, inner: Arc<dyn Memory>) -> Self {
        Self {
            path: None,
            transcript: Some(transcript.into()),
            inner,
            write_lock: Mutex::new(()),
        }
    }

    /// Also append a plain-text transcript to `path`.
    pub fn with_transcript(mut self, path: impl Into<PathBuf>) -> Self {
        self.transcript = Some(path.into());
        self
    }

    /// Replay the JSONL file at `path` into `inner`, then keep mirroring to it.
    pub async fn restore(path: impl Into<PathBuf>, inner: Arc<dyn Memory>) -> Result<Self, MemoryError> {
        let path = path.into();
        let messages = load_file(&path).await?;
        debug!(path = %path.display(), count = messages.len(), "Restoring file memory");
        inner.append_all(messages).await?;
        Ok(Self::new(path, inner))
    }

    /// The JSONL file, unless this is a transcript-only mirror.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    async fn persist(&self, messages: &[Message]) -> Result<(), MemoryError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let mut jsonl = String::new();
        for message in messages {
            let line = serde_json::to_string(message)
                .map_err(|e| MemoryError::Storage(format!("Failed to serialize message: {e}")))?;
            jsonl.push_str(&line);
            jsonl.push('\n');
        }
        append_to(path, &jsonl).await
    }

    /// The transcript is a readable copy only; failing to write it never
    /// fails the append.
    async fn write_transcript(&self, messages: &[Message]) {
        let Some(transcript) = &self.transcript else {
            return;
        };
        let mut text = String::new();
        for message in messages {
            text.push_str(&transcript_line(message));
            text.push_str("\n\n");
        }
        if let Err(e) = append_to(transcript, &text).await {
            warn!(path = %transcript.display(), error = %e, "Transcript write failed");
        }
    }
}

async fn append_to(path: &Path, content: &str) -> Result<(), MemoryError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| MemoryError::Storage(format!("Failed to create memory directory: {e}")))?;
    }
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|e| MemoryError::Storage(format!("Failed to open {}: {e}", path.display())))?;
    file.write_all(content.as_bytes())
        .await
        .map_err(|e| MemoryError::Storage(format!("Failed to write {}: {e}", path.display())))?;
    file.flush()
        .await
        .map_err(|e| MemoryError::Storage(format!("Failed to flush {}: {e}", path.display())))?;
    Ok(())
}

/// Read a JSONL memory file. A missing file is an empty history.
pub async fn load_file(path: &Path) -> Result<Vec<Message>, MemoryError> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(MemoryError::Storage(format!(
                "Failed to read {}: {e}",
                path.display()
            )));
        }
    };

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str::<Message>(line).map_err(|e| MemoryError::Corrupted {
                line: i + 1,
                reason: e.to_string(),
            })
        })
        .collect()
}

#[async_trait]
impl Memory for FileMemory {
    async fn append(&self, message: Message) -> Result<(), MemoryError> {
        let _guard = self.write_lock.lock().await;
        self.persist(std::slice::from_ref(&message)).await?;
        self.inner.append(message.clone()).await?;
        self.write_transcript(std::slice::from_ref(&message)).await;
        Ok(())
    }

    async fn append_all(&self, messages: Vec<Message>) -> Result<(), MemoryError> {
        let _guard = self.write_lock.lock().await;
        self.persist(&messages).await?;
        self.inner.append_all(messages.clone()).await?;
        self.write_transcript(&messages).await;
        Ok(())
    }

    async fn list(&self) -> Vec<Message> {
        self.inner.list().await
    }
}
