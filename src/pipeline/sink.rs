//! Destinations for finished streams
//!
//! The orchestrator writes every root chain through an [`OutputSink`], and
//! fork branches open their own output through the same sink.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::io::AsyncWrite;

use crate::handlers::AssetMeta;

pub type SinkWriter = Box<dyn AsyncWrite + Send + Unpin>;

#[async_trait]
pub trait OutputSink: Send + Sync {
    /// Open the destination for an asset named by `meta`
    async fn open(&self, meta: &AssetMeta) -> io::Result<SinkWriter>;
}

/// Writes `output_dir/name.ext1.ext2...`, creating directories as needed
#[derive(Debug, Clone)]
pub struct FsSink {
    output_dir: PathBuf,
}

impl FsSink {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn path_for(&self, meta: &AssetMeta) -> PathBuf {
        self.output_dir.join(meta.file_name())
    }
}

#[async_trait]
impl OutputSink for FsSink {
    async fn open(&self, meta: &AssetMeta) -> io::Result<SinkWriter> {
        let path = self.path_for(meta);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::fs::File::create(&path).await?;
        tracing::debug!(path = %path.display(), "Opened output");
        Ok(Box::new(file))
    }
}

/// Collects outputs in memory, keyed by file name
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    outputs: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, file_name: &str) -> Option<Vec<u8>> {
        self.lock().get(file_name).cloned()
    }

    pub fn file_names(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        self.outputs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl OutputSink for MemorySink {
    async fn open(&self, meta: &AssetMeta) -> io::Result<SinkWriter> {
        let key = meta.file_name();
        self.lock().insert(key.clone(), Vec::new());
        Ok(Box::new(MemoryWriter {
            key,
            outputs: self.outputs.clone(),
        }))
    }
}

struct MemoryWriter {
    key: String,
    outputs: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
}

impl AsyncWrite for MemoryWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let mut outputs = self
            .outputs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        outputs
            .entry(self.key.clone())
            .or_default()
            .extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
