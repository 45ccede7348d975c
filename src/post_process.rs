//! CSS Post-Processor Bridge
//!
//! Optional external processing chain applied to extracted stylesheet text
//! right before it is handed to the host. Absent processor means passthrough.

use futures::future::BoxFuture;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use crate::error::{ExtractError, Result};

/// Backing processor (e.g. a PostCSS pipeline behind an FFI boundary).
pub trait CssProcessor: Send + Sync {
    /// Errors are plain messages; the bridge attaches the file.
    fn process<'a>(
        &'a self,
        css: &'a str,
        from: &'a Path,
        to: &'a Path,
    ) -> BoxFuture<'a, std::result::Result<String, String>>;
}

#[derive(Clone, Default)]
pub struct PostProcessBridge {
    processor: Option<Arc<dyn CssProcessor>>,
}

impl PostProcessBridge {
    pub fn new(processor: Option<Arc<dyn CssProcessor>>) -> Self {
        PostProcessBridge { processor }
    }

    pub fn is_configured(&self) -> bool {
        self.processor.is_some()
    }

    /// `file` is the style file the stylesheet was extracted from.
    pub async fn process(
        &self,
        file: &str,
        css: String,
        from: &Path,
        to: &Path,
    ) -> Result<String> {
        let Some(processor) = &self.processor else {
            return Ok(css);
        };

        debug!(file, from = %from.display(), to = %to.display(), "post-processing css");
        processor
            .process(&css, from, to)
            .await
            .map_err(|message| ExtractError::PostProcess {
                file: file.to_string(),
                message,
            })
    }
}
