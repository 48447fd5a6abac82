use serde::{Deserialize, Serialize};
use std::fmt;

/// How a handler's output relates to the stream it consumes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InputMode {
    /// Output replaces the input in the current chain (e.g. coffee -> js)
    #[default]
    Flow,
    /// Output branches into an independent chain (e.g. js -> [js, js.gz])
    Fork,
}

/// How many outputs a handler produces for its inputs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// One output per input
    #[default]
    Flow,
    /// One output for the collection of all inputs (e.g. * -> manifest.json).
    /// Recorded on registration, not enforced by the merge engine.
    Unite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct HandlerOptions {
    #[serde(default)]
    pub input_mode: InputMode,
    #[serde(default)]
    pub output_mode: OutputMode,
}

impl HandlerOptions {
    pub const FLOW: Self = Self {
        input_mode: InputMode::Flow,
        output_mode: OutputMode::Flow,
    };

    pub const FORK: Self = Self {
        input_mode: InputMode::Fork,
        output_mode: OutputMode::Flow,
    };
}

/// Logical name and extension list of an asset as it moves through a chain.
///
/// `name` is the extension-less path relative to its input root; the output
/// file is named `name.ext1.ext2...`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AssetMeta {
    pub name: String,
    pub exts: Vec<String>,
}

impl AssetMeta {
    pub fn new(name: impl Into<String>, exts: Vec<String>) -> Self {
        Self {
            name: name.into(),
            exts,
        }
    }

    /// Last extension, or "" for extension-less files
    pub fn ext(&self) -> &str {
        self.exts.last().map(String::as_str).unwrap_or("")
    }

    /// Replace the last extension (or add one if there is none)
    pub fn replace_ext(&mut self, ext: &str) {
        match self.exts.last_mut() {
            Some(last) => *last = ext.to_string(),
            None => self.exts.push(ext.to_string()),
        }
    }

    pub fn push_ext(&mut self, ext: &str) {
        self.exts.push(ext.to_string());
    }

    pub fn file_name(&self) -> String {
        let mut parts = Vec::with_capacity(self.exts.len() + 1);
        parts.push(self.name.as_str());
        parts.extend(self.exts.iter().map(String::as_str));
        parts.join(".")
    }
}

impl fmt::Display for AssetMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_name())
    }
}
