//! Nested Compiler
//!
//! Runs an isolated child build with a single style-definition file as its
//! entry. The child build sees exactly two plugins: the shared side-effect
//! annotator and a loader that runs the source transformer. Output stays in
//! memory; the runtime package stays external so evaluation sees its calls.

use futures::future::BoxFuture;
use futures::FutureExt;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::config::ExtractConfig;
use crate::error::{ExtractError, Result};
use crate::host::{
    ChildBuildOptions, ChildBuilder, LoadArgs, LoadResult, ModuleLoader, ModuleResolver, OutputFile,
    OutputFormat, Platform,
};
use crate::side_effects::{SideEffectAnnotator, STYLE_FILE_FILTER};
use crate::transform::{transform, StyleSourceFile, TransformOptions};

/// Extensions a child build may give its JS bundle.
const JS_OUTPUT_EXTENSIONS: &[&str] = &["js", "mjs", "cjs"];

pub fn is_js_output(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| JS_OUTPUT_EXTENSIONS.contains(&ext))
        .unwrap_or(false)
}

// ═══════════════════════════════════════════════════════════════════════════════
// RESULT
// ═══════════════════════════════════════════════════════════════════════════════

/// Outputs of one child build, split into the evaluable bundle and assets.
#[derive(Debug, Clone, PartialEq)]
pub struct NestedCompileResult {
    /// Style file the child build was run for, relative to the project root.
    pub file: String,
    bundle: Option<OutputFile>,
    assets: Vec<OutputFile>,
}

impl NestedCompileResult {
    /// Fails if more than one output looks like a JS bundle.
    pub fn new(file: impl Into<String>, output_files: Vec<OutputFile>) -> Result<Self> {
        let file = file.into();
        let (bundles, assets): (Vec<_>, Vec<_>) = output_files
            .into_iter()
            .partition(|output| is_js_output(&output.path));

        if bundles.len() > 1 {
            return Err(ExtractError::MultipleBundles {
                file,
                count: bundles.len(),
            });
        }

        Ok(NestedCompileResult {
            file,
            bundle: bundles.into_iter().next(),
            assets,
        })
    }

    pub fn js_bundle(&self) -> Option<&OutputFile> {
        self.bundle.as_ref()
    }

    pub fn assets(&self) -> &[OutputFile] {
        &self.assets
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CHILD BUILD LOADER
// ═══════════════════════════════════════════════════════════════════════════════

/// Loads style files inside the child build, applying the source transformer.
pub struct StyleSourceLoader {
    config: Arc<ExtractConfig>,
}

impl StyleSourceLoader {
    pub fn new(config: Arc<ExtractConfig>) -> Self {
        StyleSourceLoader { config }
    }
}

impl ModuleLoader for StyleSourceLoader {
    fn name(&self) -> &'static str {
        "style-source-transform"
    }

    fn filter(&self) -> &Regex {
        &STYLE_FILE_FILTER
    }

    fn load(&self, args: LoadArgs) -> BoxFuture<'_, Result<Option<LoadResult>>> {
        async move {
            let path = PathBuf::from(&args.path);
            let file = StyleSourceFile::read(&path).await?;
            let contents = transform(
                &file,
                &TransformOptions {
                    root: &self.config.root,
                    identifiers: self.config.identifiers,
                    package_name: &self.config.package_name,
                    runtime_package: &self.config.runtime_package,
                },
            )?;

            Ok(Some(LoadResult {
                contents,
                syntax: file.syntax,
                resolve_dir: path.parent().map(Path::to_path_buf),
            }))
        }
        .boxed()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMPILER
// ═══════════════════════════════════════════════════════════════════════════════

pub struct NestedCompiler {
    config: Arc<ExtractConfig>,
    builder: Arc<dyn ChildBuilder>,
    annotator: Arc<SideEffectAnnotator>,
}

impl NestedCompiler {
    pub fn new(
        config: Arc<ExtractConfig>,
        builder: Arc<dyn ChildBuilder>,
        annotator: Arc<SideEffectAnnotator>,
    ) -> Self {
        NestedCompiler {
            config,
            builder,
            annotator,
        }
    }

    pub fn build_options(&self, entry: &Path) -> ChildBuildOptions {
        ChildBuildOptions {
            entry_points: vec![entry.to_path_buf()],
            resolvers: vec![self.annotator.clone() as Arc<dyn ModuleResolver>],
            loaders: vec![
                Arc::new(StyleSourceLoader::new(self.config.clone())) as Arc<dyn ModuleLoader>
            ],
            bundle: true,
            write: false,
            external: self.config.nested_externals(),
            loader: self.config.loader.clone(),
            working_dir: self.config.root.clone(),
            out_dir: self.config.out_dir.clone(),
            public_path: self.config.public_path.clone(),
            format: OutputFormat::Esm,
            platform: Platform::Node,
        }
    }

    #[instrument(name = "nested_compile", skip_all, fields(file = %entry.display()))]
    pub async fn compile(&self, entry: &Path) -> Result<NestedCompileResult> {
        let file = self.config.relative_path(entry);
        debug!(stage = "nested_compiling", "starting child build");

        let outputs = self
            .builder
            .build(self.build_options(entry))
            .await
            .map_err(|failure| ExtractError::NestedCompile {
                file: file.clone(),
                messages: failure.messages.iter().map(|m| m.to_string()).collect(),
            })?;

        debug!(outputs = outputs.len(), "child build finished");
        NestedCompileResult::new(file, outputs)
    }
}
