use super::models::Config;
use crate::handlers::WILDCARD_EXT;
use crate::handlers::builtin::BUILTIN_HANDLERS;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("fd_limit must be at least 1")]
    InvalidFdLimit,

    #[error("pipe_buffer must be at least 1 byte")]
    InvalidPipeBuffer,

    #[error("No input directories configured")]
    NoInputDirs,

    #[error("Output directory {output} overlaps input directory {input}")]
    OutputInsideInput { output: PathBuf, input: PathBuf },

    #[error("Handler rule {index}: invalid {field} `{value}` (must be non-empty without a leading dot)")]
    InvalidExtension {
        index: usize,
        field: &'static str,
        value: String,
    },

    #[error("Handler rule {index}: unknown handler `{handler}` (available: {available})")]
    UnknownHandler {
        index: usize,
        handler: String,
        available: String,
    },
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_limits(config)?;
    validate_dirs(config)?;
    validate_handlers(config)?;
    Ok(())
}

fn validate_limits(config: &Config) -> Result<(), ValidationError> {
    if config.limits.fd_limit == 0 {
        return Err(ValidationError::InvalidFdLimit);
    }
    if config.limits.pipe_buffer.as_u64() == 0 {
        return Err(ValidationError::InvalidPipeBuffer);
    }
    Ok(())
}

/// Outputs must never land inside an input root, or the next build would
/// pick them up as sources
fn validate_dirs(config: &Config) -> Result<(), ValidationError> {
    if config.build.input_dirs.is_empty() {
        return Err(ValidationError::NoInputDirs);
    }

    let output = normalize(&config.build.output_dir);
    for input in &config.build.input_dirs {
        if output.starts_with(normalize(input)) {
            return Err(ValidationError::OutputInsideInput {
                output: config.build.output_dir.clone(),
                input: input.clone(),
            });
        }
    }
    Ok(())
}

/// Lexical cleanup (`./a/../b` -> `b`); the directories may not exist yet
fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push("..");
                }
            }
            other => normalized.push(other),
        }
    }
    normalized
}

fn validate_handlers(config: &Config) -> Result<(), ValidationError> {
    for (index, rule) in config.handlers.iter().enumerate() {
        for (field, value) in [("input_ext", &rule.input_ext), ("output_ext", &rule.output_ext)] {
            let wildcard_input = field == "input_ext" && value == WILDCARD_EXT;
            if !wildcard_input && (value.is_empty() || value.starts_with('.') || value == WILDCARD_EXT)
            {
                return Err(ValidationError::InvalidExtension {
                    index,
                    field,
                    value: value.clone(),
                });
            }
        }

        if !BUILTIN_HANDLERS.contains(&rule.handler.as_str()) {
            return Err(ValidationError::UnknownHandler {
                index,
                handler: rule.handler.clone(),
                available: BUILTIN_HANDLERS.join(", "),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HandlerRuleConfig;
    use crate::handlers::{InputMode, OutputMode};
    use crate::humanize::ByteSize;

    fn rule(input_ext: &str, output_ext: &str, handler: &str) -> HandlerRuleConfig {
        HandlerRuleConfig {
            input_ext: input_ext.to_string(),
            output_ext: output_ext.to_string(),
            handler: handler.to_string(),
            input_mode: InputMode::Flow,
            output_mode: OutputMode::Flow,
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate(&Config::default()).is_ok());
    }

    #[test]
    fn test_limits_must_be_positive() {
        let mut config = Config::default();
        config.limits.fd_limit = 0;
        assert!(matches!(validate(&config), Err(ValidationError::InvalidFdLimit)));

        let mut config = Config::default();
        config.limits.pipe_buffer = ByteSize(0);
        assert!(matches!(validate(&config), Err(ValidationError::InvalidPipeBuffer)));
    }

    #[test]
    fn test_output_inside_input_rejected() {
        let mut config = Config::default();
        config.build.input_dirs = vec![PathBuf::from("./assets")];
        config.build.output_dir = PathBuf::from("assets/public/../build");
        assert!(matches!(
            validate(&config),
            Err(ValidationError::OutputInsideInput { .. })
        ));

        config.build.output_dir = PathBuf::from("assets-build");
        assert!(validate(&config).is_ok());

        config.build.input_dirs.clear();
        assert!(matches!(validate(&config), Err(ValidationError::NoInputDirs)));
    }

    #[test]
    fn test_extensions_checked() {
        let mut config = Config::default();
        config.handlers = vec![rule("*", "gz", "gzip")];
        assert!(validate(&config).is_ok());

        config.handlers = vec![rule("coffee", ".js", "copy")];
        assert!(matches!(
            validate(&config),
            Err(ValidationError::InvalidExtension { field: "output_ext", .. })
        ));

        config.handlers = vec![rule("js", "*", "copy")];
        assert!(validate(&config).is_err());

        config.handlers = vec![rule("", "js", "copy")];
        assert!(matches!(
            validate(&config),
            Err(ValidationError::InvalidExtension { index: 0, field: "input_ext", .. })
        ));
    }

    #[test]
    fn test_unknown_handler_rejected() {
        let mut config = Config::default();
        config.handlers = vec![rule("js", "gz", "gzip"), rule("scss", "css", "sass")];
        match validate(&config) {
            Err(ValidationError::UnknownHandler { index, handler, .. }) => {
                assert_eq!(index, 1);
                assert_eq!(handler, "sass");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
