//! Error types for the style extraction pipeline
//!
//! Every fatal error names the style-definition file it belongs to.
//! "No stylesheet" and "loop guard hit" are not errors; they surface as `Ok(None)`.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T, E = ExtractError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("failed to parse style file {file}: {message}")]
    Transform { file: String, message: String },

    #[error("failed to compile style file {file}:\n{}", .messages.join("\n"))]
    NestedCompile { file: String, messages: Vec<String> },

    #[error("style file {file} produced {count} JavaScript bundles, expected at most one")]
    MultipleBundles { file: String, count: usize },

    #[error("failed to evaluate style file {file}: {message}")]
    Evaluate { file: String, message: String },

    #[error("failed to write asset {} for style file {file}: {source}", .path.display())]
    AssetWrite {
        file: String,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("css post-processing failed for {file}: {message}")]
    PostProcess { file: String, message: String },

    #[error("could not resolve \"{specifier}\": {message}")]
    Resolve { specifier: String, message: String },

    #[error("not a virtual css specifier: {0}")]
    InvalidVirtualSpecifier(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl ExtractError {
    /// The style file this error is attributed to, when there is one.
    pub fn file(&self) -> Option<&str> {
        match self {
            ExtractError::Transform { file, .. }
            | ExtractError::NestedCompile { file, .. }
            | ExtractError::MultipleBundles { file, .. }
            | ExtractError::Evaluate { file, .. }
            | ExtractError::AssetWrite { file, .. }
            | ExtractError::PostProcess { file, .. } => Some(file),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ExtractError {
    fn from(err: serde_json::Error) -> Self {
        ExtractError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_compile_message_names_file() {
        let err = ExtractError::NestedCompile {
            file: "src/a.style.ts".to_string(),
            messages: vec![
                "Could not resolve \"./missing\"".to_string(),
                "Unexpected token".to_string(),
            ],
        };
        let text = err.to_string();
        assert!(text.starts_with("failed to compile style file src/a.style.ts"));
        assert!(text.contains("./missing"));
        assert!(text.contains("Unexpected token"));
        assert_eq!(err.file(), Some("src/a.style.ts"));
    }

    #[test]
    fn test_asset_write_has_source() {
        let err = ExtractError::AssetWrite {
            file: "src/a.style.ts".to_string(),
            path: PathBuf::from("/out/logo.png"),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.to_string().contains("/out/logo.png"));
        assert!(err.to_string().contains("src/a.style.ts"));
        assert_eq!(err.file(), Some("src/a.style.ts"));
    }
}
