use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use super::builtin;
use super::traits::Handler;
use super::types::{HandlerOptions, OutputMode};

/// Extension key that catches every extension without its own registration
pub const WILDCARD_EXT: &str = "*";

/// Handler rule from configuration (one `Register` call)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandlerRule {
    pub input_ext: String,
    pub output_ext: String,
    pub handler: String,
    pub options: HandlerOptions,
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("handler not found: {0}")]
    NotFound(String),
}

/// A handler together with the options it was registered under
#[derive(Clone)]
pub struct RegisteredHandler {
    pub handler: Arc<dyn Handler>,
    pub options: HandlerOptions,
}

impl fmt::Debug for RegisteredHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredHandler")
            .field("handler", &self.handler.name())
            .field("output_ext", &self.handler.output_ext())
            .field("options", &self.options)
            .finish()
    }
}

/// Output extension -> registered handler, ordered by output extension
pub type HandlerMap = BTreeMap<String, RegisteredHandler>;

/// Registry mapping (input ext, output ext) pairs to handlers
///
/// Populated once before any chain is built and read-only afterwards.
#[derive(Clone, Debug, Default)]
pub struct ExtensionRegistry {
    handlers: BTreeMap<String, HandlerMap>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from configured rules, resolving handler names
    /// against the built-in catalog
    pub fn from_rules(rules: &[HandlerRule]) -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        for rule in rules {
            let handler = builtin::resolve(&rule.handler, &rule.output_ext)
                .ok_or_else(|| RegistryError::NotFound(rule.handler.clone()))?;
            registry.register(&rule.input_ext, &rule.output_ext, handler, rule.options);
        }
        Ok(registry)
    }

    /// Insert or overwrite the handler for `(in_ext, out_ext)`
    pub fn register(
        &mut self,
        in_ext: impl Into<String>,
        out_ext: impl Into<String>,
        handler: Arc<dyn Handler>,
        options: HandlerOptions,
    ) {
        let in_ext = in_ext.into();
        let out_ext = out_ext.into();
        if options.output_mode == OutputMode::Unite {
            tracing::debug!(%in_ext, %out_ext, "Registered uniting handler");
        }
        self.handlers
            .entry(in_ext)
            .or_default()
            .insert(out_ext, RegisteredHandler { handler, options });
    }

    /// Handlers registered for `in_ext`, falling back to the wildcard entry.
    /// `None` means the extension has no handlers at all.
    pub fn find_handlers(&self, in_ext: &str) -> Option<&HandlerMap> {
        self.lookup(in_ext).map(|(_, handlers)| handlers)
    }

    /// Like [`find_handlers`](Self::find_handlers) but also returns the key
    /// that matched (`in_ext` itself or [`WILDCARD_EXT`])
    pub fn lookup(&self, in_ext: &str) -> Option<(&str, &HandlerMap)> {
        self.handlers
            .get_key_value(in_ext)
            .or_else(|| self.handlers.get_key_value(WILDCARD_EXT))
            .map(|(key, handlers)| (key.as_str(), handlers))
    }

    pub fn has_handlers(&self, in_ext: &str) -> bool {
        self.handlers.contains_key(in_ext)
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
