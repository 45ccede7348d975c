//! # Style Extraction Pipeline
//!
//! Build-time extraction of style definitions written as `*.style.{ts,js,...}`
//! modules into plain stylesheets, leaving only class names and other values
//! in the compiled program.
//!
//! ## Pipeline Invariants
//!
//! 1. **Virtual CSS first**: `VirtualCssResolver` is registered before any other
//!    resolver. A virtual specifier carries its own contents and never reaches
//!    filesystem resolution.
//!
//! 2. **Bounded re-resolution**: `SideEffectAnnotator` re-dispatches a request at
//!    most once. The re-dispatched request is tagged with `ReentryTag::SideEffects`
//!    and a tagged request is always declined.
//!
//! 3. **One nested compile per style file**: each style file the host loads gets
//!    its own child build with its own module graph. Nothing is cached across
//!    files.
//!
//! 4. **Explicit evaluation context**: the bundle evaluator sees the bundle text
//!    and an `EvalContext`. Nothing else from the outer build is reachable.
//!
//! 5. **Delivery after assets**: the JS module for a style file is returned only
//!    after every asset of its nested compile has been written.
//!
//! 6. **Errors name the style file**: every fatal error carries the project-relative
//!    path of the style file, never the child build's internal entry naming.

pub mod assets;
pub mod config;
pub mod css;
pub mod error;
pub mod extract;
pub mod host;
pub mod nested;
pub mod plugin;
pub mod post_process;
pub mod side_effects;
pub mod static_eval;
pub mod transform;
pub mod virtual_css;

#[cfg(feature = "napi")]
mod napi_bridge;

#[cfg(test)]
mod test_support;


pub use config::{BuildMode, ExtractConfig, IdentifierMode, PluginOptions, ProjectConfig};
pub use error::{ExtractError, Result};
pub use extract::{ExtractedModule, ExtractionAdapter};
pub use host::{
    ChildBuildOptions, ChildBuilder, HostResolve, LoadArgs, LoadResult, ModuleLoader,
    ModuleResolver, PluginBuild, ResolveArgs, ResolveResult, SyntaxKind,
};
pub use nested::{NestedCompileResult, NestedCompiler};
pub use plugin::StyleExtractPlugin;
pub use post_process::{CssProcessor, PostProcessBridge};
pub use side_effects::SideEffectAnnotator;
pub use static_eval::{BundleEvaluator, EvalContext, EvaluatedBundle, StaticEvaluator};
pub use transform::{transform, StyleSourceFile, TransformOptions};
pub use virtual_css::{decode, encode, VirtualCssModule};

#[cfg(feature = "napi")]
pub use napi_bridge::{
    decode_virtual_css_native, encode_virtual_css_native, evaluate_bundle_native,
    transform_style_source_native,
};
