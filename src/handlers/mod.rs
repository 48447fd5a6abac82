//! Transformation handlers and the extension registry
//!
//! ## Key Components
//!
//! - [`Handler`] - Trait implemented by every transformation
//! - [`ExtensionRegistry`] - (input ext, output ext) -> handler lookup with `*` fallback
//! - [`DefaultHandler`] - Pass-through used when an extension has no handlers
//! - [`builtin`] - Handlers addressable by name from configuration
//!
//! ## Example
//!
//! ```rust,ignore
//! use assetmatrix::handlers::{ExtensionRegistry, HandlerOptions, builtin::GzipHandler};
//!
//! let mut registry = ExtensionRegistry::new();
//! registry.register("*", "gz", Arc::new(GzipHandler::new("gz")), HandlerOptions::FORK);
//! let handlers = registry.find_handlers("js");
//! ```

pub mod builtin;
mod default;
mod registry;
mod traits;
mod types;

pub use default::DefaultHandler;
pub use registry::{
    ExtensionRegistry, HandlerMap, HandlerRule, RegisteredHandler, RegistryError, WILDCARD_EXT,
};
pub use traits::{Handler, HandlerError, StageInput, StageOutput};
pub use types::{AssetMeta, HandlerOptions, InputMode, OutputMode};
