use crate::fd_budget::DEFAULT_FD_LIMIT;
use crate::handlers::{HandlerOptions, HandlerRule, InputMode, OutputMode};
use crate::humanize::ByteSize;
use crate::pipeline::DEFAULT_PIPE_CAPACITY;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub build: BuildConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub directives: DirectivesConfig,
    /// Applied in order; a later rule for the same extension pair wins
    #[serde(default)]
    pub handlers: Vec<HandlerRuleConfig>,
}

/// Input roots and output location
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BuildConfig {
    #[serde(default = "default_input_dirs")]
    pub input_dirs: Vec<PathBuf>,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            input_dirs: default_input_dirs(),
            output_dir: default_output_dir(),
        }
    }
}

fn default_input_dirs() -> Vec<PathBuf> {
    vec![PathBuf::from("assets")]
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("public/assets")
}

/// Resource limits for the execution engine
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LimitsConfig {
    /// Maximum concurrently open source descriptors
    #[serde(default = "default_fd_limit")]
    pub fd_limit: usize,
    /// Buffer between two pipeline stages
    #[serde(default = "default_pipe_buffer")]
    pub pipe_buffer: ByteSize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            fd_limit: default_fd_limit(),
            pipe_buffer: default_pipe_buffer(),
        }
    }
}

fn default_fd_limit() -> usize {
    DEFAULT_FD_LIMIT
}

fn default_pipe_buffer() -> ByteSize {
    ByteSize(DEFAULT_PIPE_CAPACITY as u64)
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DirectivesConfig {
    /// Read `require` directives from file headers
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for DirectivesConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

fn default_true() -> bool {
    true
}

/// One `[[handlers]]` entry
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct HandlerRuleConfig {
    /// Extension consumed, or `*` for every extension without its own rules
    pub input_ext: String,
    pub output_ext: String,
    /// Built-in handler name
    pub handler: String,
    #[serde(default)]
    pub input_mode: InputMode,
    #[serde(default)]
    pub output_mode: OutputMode,
}

impl HandlerRuleConfig {
    pub fn to_rule(&self) -> HandlerRule {
        HandlerRule {
            input_ext: self.input_ext.clone(),
            output_ext: self.output_ext.clone(),
            handler: self.handler.clone(),
            options: HandlerOptions {
                input_mode: self.input_mode,
                output_mode: self.output_mode,
            },
        }
    }
}

impl Config {
    pub fn handler_rules(&self) -> Vec<HandlerRule> {
        self.handlers.iter().map(HandlerRuleConfig::to_rule).collect()
    }

    pub fn pipe_capacity(&self) -> usize {
        usize::try_from(self.limits.pipe_buffer.as_u64()).unwrap_or(usize::MAX)
    }
}
