//! Inclusion directives declared in a file's leading comments
//!
//! ```text
//! //= require lib/util
//! //= require_self
//! //= require widgets.js
//! ```
//!
//! `#=` and `*=` prefixes work the same way for languages with other
//! comment styles. Parsing stops at the first line that is neither blank
//! nor a comment.

use async_trait::async_trait;
use std::io;
use std::path::PathBuf;
use thiserror::Error;
use tokio::io::AsyncReadExt;

use super::SourceFile;

/// Only this much of a file is inspected for directives
const HEADER_LIMIT: u64 = 16 * 1024;

const DIRECTIVE_PREFIXES: &[&str] = &["//=", "#=", "/*=", "*="];
const COMMENT_PREFIXES: &[&str] = &["//", "#", "/*", "*"];

/// One entry of a file's declared inclusion order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Include {
    /// The file's own content
    SelfContent,
    /// Another file, by logical name with optional extension
    File(String),
}

#[derive(Debug, Error)]
pub enum DirectiveError {
    #[error("failed to read directives from {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{path}:{line}: unknown directive `{directive}`")]
    Unknown {
        path: PathBuf,
        line: usize,
        directive: String,
    },
}

/// Supplies the ordered inclusion list of a file
#[async_trait]
pub trait DirectiveProvider: Send + Sync {
    async fn includes(&self, file: &SourceFile) -> Result<Vec<Include>, DirectiveError>;
}

/// Provider for builds without inclusion
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDirectives;

#[async_trait]
impl DirectiveProvider for NoDirectives {
    async fn includes(&self, _file: &SourceFile) -> Result<Vec<Include>, DirectiveError> {
        Ok(Vec::new())
    }
}

/// Reads `require` / `require_self` directives from a file's header
#[derive(Debug, Clone, Copy, Default)]
pub struct HeaderDirectives;

#[async_trait]
impl DirectiveProvider for HeaderDirectives {
    async fn includes(&self, file: &SourceFile) -> Result<Vec<Include>, DirectiveError> {
        let read_error = |source| DirectiveError::Read {
            path: file.path().to_path_buf(),
            source,
        };

        let handle = tokio::fs::File::open(file.path()).await.map_err(read_error)?;
        let mut header = Vec::new();
        handle
            .take(HEADER_LIMIT)
            .read_to_end(&mut header)
            .await
            .map_err(read_error)?;

        parse_header(&String::from_utf8_lossy(&header)).map_err(|(line, directive)| {
            DirectiveError::Unknown {
                path: file.path().to_path_buf(),
                line,
                directive,
            }
        })
    }
}

/// Parse the directive block at the top of `text`. Errors carry the
/// 1-based line number and the offending directive.
pub fn parse_header(text: &str) -> Result<Vec<Include>, (usize, String)> {
    let mut includes = Vec::new();

    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let Some(body) = DIRECTIVE_PREFIXES
            .iter()
            .find_map(|prefix| line.strip_prefix(prefix))
        else {
            if COMMENT_PREFIXES.iter().any(|prefix| line.starts_with(prefix)) {
                continue;
            }
            break;
        };

        let body = body.trim().trim_end_matches("*/").trim();
        let mut words = body.split_whitespace();
        match (words.next(), words.next()) {
            (Some("require_self"), None) => includes.push(Include::SelfContent),
            (Some("require"), Some(target)) => {
                let target = target.trim_matches(|c| c == '"' || c == '\'');
                includes.push(Include::File(target.to_string()));
            }
            _ => return Err((index + 1, body.to_string())),
        }
    }

    Ok(includes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    #[test]
    fn test_parse_requires_in_order() {
        let text = "\
// Application bundle
//= require lib/util
//= require_self
//= require \"widgets.js\"

var app = {};
//= require ignored
";
        let includes = parse_header(text).unwrap();
        assert_eq!(
            includes,
            vec![
                Include::File("lib/util".to_string()),
                Include::SelfContent,
                Include::File("widgets.js".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_block_comment_style() {
        let text = "/*\n *= require reset\n *= require_self\n */\nbody { margin: 0 }\n";
        let includes = parse_header(text).unwrap();
        assert_eq!(
            includes,
            vec![Include::File("reset".to_string()), Include::SelfContent]
        );
    }

    #[test]
    fn test_parse_hash_style() {
        let text = "#= require helpers\n# plain comment\nsquare = (x) -> x * x\n";
        assert_eq!(
            parse_header(text).unwrap(),
            vec![Include::File("helpers".to_string())]
        );
    }

    #[test]
    fn test_parse_unknown_directive() {
        let text = "//= require_tree .\n";
        let err = parse_header(text).unwrap_err();
        assert_eq!(err, (1, "require_tree .".to_string()));

        let missing_target = "\n//= require\n";
        assert_eq!(parse_header(missing_target).unwrap_err().0, 2);
    }

    #[test]
    fn test_no_header() {
        assert!(parse_header("console.log(1);\n").unwrap().is_empty());
        assert!(parse_header("").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_header_directives_reads_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("app.js");
        fs::write(&path, "//= require lib\nalert(1);\n").unwrap();
        let file = SourceFile::from_relative(temp_dir.path(), &path).unwrap();

        let includes = HeaderDirectives.includes(&file).await.unwrap();
        assert_eq!(includes, vec![Include::File("lib".to_string())]);

        assert!(NoDirectives.includes(&file).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_header_directives_missing_file() {
        let file = SourceFile::new(Path::new("/nonexistent/app.js"), "app", vec!["js".to_string()]);
        let result = HeaderDirectives.includes(&file).await;
        assert!(matches!(result, Err(DirectiveError::Read { .. })));
    }
}
