use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

use super::types::AssetMeta;

/// Readable end of a stage stream
pub type StageInput<'a> = &'a mut (dyn AsyncRead + Send + Unpin);

/// Writable end of a stage stream
pub type StageOutput<'a> = &'a mut (dyn AsyncWrite + Send + Unpin);

/// Handler errors
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("transformation failed: {0}")]
    Failed(String),
}

/// A transformation from one extension to another
///
/// Handlers stream: they read `input` and write `output` concurrently with the
/// stages around them, so a handler should not assume it sees the whole input
/// up front unless it buffers it itself.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Short name used in logs and chain descriptions
    fn name(&self) -> &str;

    /// Extension of the bytes this handler produces
    fn output_ext(&self) -> &str;

    /// File descriptors the handler opens on its own while running
    fn required_fds(&self) -> usize {
        0
    }

    /// Update the asset's logical name/extensions for this handler's output.
    ///
    /// Called by the engine in chain order before streaming begins.
    fn rename(&self, meta: &mut AssetMeta) {
        meta.replace_ext(self.output_ext());
    }

    /// Transform `input` into `output`. `meta` is the asset as it stood at
    /// this handler's input.
    async fn handle(
        &self,
        input: StageInput<'_>,
        output: StageOutput<'_>,
        meta: &AssetMeta,
    ) -> Result<(), HandlerError>;
}
