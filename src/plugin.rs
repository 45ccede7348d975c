//! Plugin wiring
//!
//! Registers the hooks of the outer build and drives one style file through
//! the pipeline: nested compile, then extraction joined with asset writes,
//! then delivery of the generated JS module.
//!
//! Hook order matters. The virtual CSS resolver is registered first so a
//! virtual specifier never reaches filesystem resolution.

use futures::future::BoxFuture;
use futures::FutureExt;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::assets::write_assets;
use crate::config::ExtractConfig;
use crate::error::Result;
use crate::extract::ExtractionAdapter;
use crate::host::{ChildBuilder, LoadArgs, LoadResult, ModuleLoader, PluginBuild, SyntaxKind};
use crate::nested::NestedCompiler;
use crate::post_process::{CssProcessor, PostProcessBridge};
use crate::side_effects::{SideEffectAnnotator, STYLE_FILE_FILTER};
use crate::static_eval::{BundleEvaluator, StaticEvaluator};
use crate::virtual_css::{VirtualCssLoader, VirtualCssResolver};

pub const PLUGIN_NAME: &str = "style-extract";

pub struct StyleExtractPlugin {
    config: Arc<ExtractConfig>,
    builder: Arc<dyn ChildBuilder>,
    post_process: PostProcessBridge,
    evaluator: Arc<dyn BundleEvaluator>,
    annotator: Arc<SideEffectAnnotator>,
}

impl StyleExtractPlugin {
    pub fn new(config: ExtractConfig, builder: Arc<dyn ChildBuilder>) -> Self {
        StyleExtractPlugin {
            config: Arc::new(config),
            builder,
            post_process: PostProcessBridge::default(),
            evaluator: Arc::new(StaticEvaluator),
            annotator: Arc::new(SideEffectAnnotator::new()),
        }
    }

    pub fn with_post_processor(mut self, processor: Arc<dyn CssProcessor>) -> Self {
        self.post_process = PostProcessBridge::new(Some(processor));
        self
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn BundleEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn name(&self) -> &'static str {
        PLUGIN_NAME
    }

    pub fn config(&self) -> &ExtractConfig {
        &self.config
    }

    pub fn setup(&self, build: &mut dyn PluginBuild) {
        debug!(
            root = %self.config.root.display(),
            identifiers = ?self.config.identifiers,
            post_process = self.post_process.is_configured(),
            "registering style extraction hooks"
        );

        build.on_resolve(Arc::new(VirtualCssResolver));
        build.on_resolve(self.annotator.clone());
        build.on_load(Arc::new(VirtualCssLoader::new(
            self.config.clone(),
            self.post_process.clone(),
        )));
        build.on_load(Arc::new(StyleFileLoader {
            config: self.config.clone(),
            compiler: NestedCompiler::new(
                self.config.clone(),
                self.builder.clone(),
                self.annotator.clone(),
            ),
            adapter: ExtractionAdapter::with_evaluator(self.config.clone(), self.evaluator.clone()),
        }));
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// OUTER LOADER
// ═══════════════════════════════════════════════════════════════════════════════

/// Replaces a style file in the outer build with its generated JS module.
pub struct StyleFileLoader {
    config: Arc<ExtractConfig>,
    compiler: NestedCompiler,
    adapter: ExtractionAdapter,
}

impl StyleFileLoader {
    #[instrument(name = "style_file", skip_all, fields(file = %self.config.relative_path(path)))]
    async fn load_style_file(&self, path: &Path) -> Result<Option<LoadResult>> {
        let result = self.compiler.compile(path).await?;

        // Delivery waits for both; a failed write fails the load.
        let (extracted, written) = futures::try_join!(
            async { self.adapter.extract(&result) },
            write_assets(&result.file, result.assets()),
        )?;

        let Some(extracted) = extracted else {
            debug!("no bundle produced, leaving file to the host");
            return Ok(None);
        };

        debug!(
            stage = "delivered",
            css_files = extracted.virtual_modules.len(),
            assets = written,
            "style file delivered"
        );
        Ok(Some(LoadResult {
            contents: extracted.js,
            syntax: SyntaxKind::Js,
            resolve_dir: path.parent().map(Path::to_path_buf),
        }))
    }
}

impl ModuleLoader for StyleFileLoader {
    fn name(&self) -> &'static str {
        "style-file-load"
    }

    fn filter(&self) -> &Regex {
        &STYLE_FILE_FILTER
    }

    fn load(&self, args: LoadArgs) -> BoxFuture<'_, Result<Option<LoadResult>>> {
        async move {
            let path = PathBuf::from(&args.path);
            self.load_style_file(&path).await
        }
        .boxed()
    }
}
