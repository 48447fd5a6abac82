//! Built-in handler catalog, addressable by name from configuration

use async_compression::tokio::bufread::GzipEncoder;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::BufReader;

use super::traits::{Handler, HandlerError, StageInput, StageOutput};
use super::types::AssetMeta;

/// Names accepted by [`resolve`]
pub const BUILTIN_HANDLERS: &[&str] = &["copy", "gzip"];

/// Instantiate a built-in handler producing `output_ext`
pub fn resolve(name: &str, output_ext: &str) -> Option<Arc<dyn Handler>> {
    match name {
        "copy" => Some(Arc::new(CopyHandler::new(output_ext))),
        "gzip" => Some(Arc::new(GzipHandler::new(output_ext))),
        _ => None,
    }
}

/// Copies bytes unchanged while switching the extension
#[derive(Debug, Clone)]
pub struct CopyHandler {
    output_ext: String,
}

impl CopyHandler {
    pub fn new(output_ext: impl Into<String>) -> Self {
        Self {
            output_ext: output_ext.into(),
        }
    }
}

#[async_trait]
impl Handler for CopyHandler {
    fn name(&self) -> &str {
        "copy"
    }

    fn output_ext(&self) -> &str {
        &self.output_ext
    }

    async fn handle(
        &self,
        input: StageInput<'_>,
        output: StageOutput<'_>,
        _meta: &AssetMeta,
    ) -> Result<(), HandlerError> {
        tokio::io::copy(input, output).await?;
        Ok(())
    }
}

/// Gzip-compresses the stream and appends its extension (app.js -> app.js.gz)
#[derive(Debug, Clone)]
pub struct GzipHandler {
    output_ext: String,
}

impl GzipHandler {
    pub fn new(output_ext: impl Into<String>) -> Self {
        Self {
            output_ext: output_ext.into(),
        }
    }
}

#[async_trait]
impl Handler for GzipHandler {
    fn name(&self) -> &str {
        "gzip"
    }

    fn output_ext(&self) -> &str {
        &self.output_ext
    }

    fn rename(&self, meta: &mut AssetMeta) {
        meta.push_ext(&self.output_ext);
    }

    async fn handle(
        &self,
        input: StageInput<'_>,
        output: StageOutput<'_>,
        _meta: &AssetMeta,
    ) -> Result<(), HandlerError> {
        let mut encoder = GzipEncoder::new(BufReader::new(input));
        tokio::io::copy(&mut encoder, output).await?;
        Ok(())
    }
}
