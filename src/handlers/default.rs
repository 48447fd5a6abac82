use async_trait::async_trait;

use super::traits::{Handler, HandlerError, StageInput, StageOutput};
use super::types::AssetMeta;

/// Pass-through handler synthesized for extensions with no registration.
///
/// Copies its input unchanged and leaves the asset's name untouched.
#[derive(Debug, Clone)]
pub struct DefaultHandler {
    ext: String,
}

impl DefaultHandler {
    pub fn new(ext: impl Into<String>) -> Self {
        Self { ext: ext.into() }
    }
}

#[async_trait]
impl Handler for DefaultHandler {
    fn name(&self) -> &str {
        "default"
    }

    fn output_ext(&self) -> &str {
        &self.ext
    }

    fn rename(&self, _meta: &mut AssetMeta) {}

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

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_default_handler_copies_input() {
        let handler = DefaultHandler::new("txt");
        let mut input: &[u8] = b"hello matrix";
        let mut output = Vec::new();
        let meta = AssetMeta::new("readme", vec!["txt".to_string()]);

        handler.handle(&mut input, &mut output, &meta).await.unwrap();

        assert_eq!(output, b"hello matrix");
    }

    #[test]
    fn test_default_handler_keeps_name() {
        let handler = DefaultHandler::new("txt");
        let mut meta = AssetMeta::new("readme", vec!["md".to_string(), "txt".to_string()]);
        handler.rename(&mut meta);
        assert_eq!(meta.file_name(), "readme.md.txt");
        assert_eq!(handler.output_ext(), "txt");
    }
}
