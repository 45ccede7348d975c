//! Host Bundler Capability Interfaces
//!
//! The pipeline never talks to a concrete bundler. It is handed:
//! - a registration surface ([`PluginBuild`]) for resolvers and loaders,
//! - a re-entrant resolve call ([`HostResolve`]),
//! - a child build invocation ([`ChildBuilder`]).
//!
//! Any bundler adapter that can implement these three traits can host the plugin.

use futures::future::BoxFuture;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::Result;

/// Namespace the host uses for modules backed by real files.
pub const FILE_NAMESPACE: &str = "file";

// ═══════════════════════════════════════════════════════════════════════════════
// SYNTAX KINDS
// ═══════════════════════════════════════════════════════════════════════════════

/// How the host should interpret module contents (esbuild's "loader").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyntaxKind {
    Js,
    Jsx,
    Ts,
    Tsx,
    Css,
    Json,
    Text,
    File,
    Dataurl,
    Base64,
    Binary,
    Copy,
    Empty,
}

impl SyntaxKind {
    /// Script syntax for a source path, by extension.
    pub fn for_script_path(path: &Path) -> Option<SyntaxKind> {
        match path.extension()?.to_str()? {
            "js" | "mjs" | "cjs" => Some(SyntaxKind::Js),
            "jsx" => Some(SyntaxKind::Jsx),
            "ts" | "mts" | "cts" => Some(SyntaxKind::Ts),
            "tsx" => Some(SyntaxKind::Tsx),
            _ => None,
        }
    }

    pub fn is_script(self) -> bool {
        matches!(
            self,
            SyntaxKind::Js | SyntaxKind::Jsx | SyntaxKind::Ts | SyntaxKind::Tsx
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SyntaxKind::Js => "js",
            SyntaxKind::Jsx => "jsx",
            SyntaxKind::Ts => "ts",
            SyntaxKind::Tsx => "tsx",
            SyntaxKind::Css => "css",
            SyntaxKind::Json => "json",
            SyntaxKind::Text => "text",
            SyntaxKind::File => "file",
            SyntaxKind::Dataurl => "dataurl",
            SyntaxKind::Base64 => "base64",
            SyntaxKind::Binary => "binary",
            SyntaxKind::Copy => "copy",
            SyntaxKind::Empty => "empty",
        }
    }
}

impl fmt::Display for SyntaxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RESOLUTION
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImportKind {
    EntryPoint,
    #[default]
    ImportStatement,
    RequireCall,
    DynamicImport,
    ImportRule,
    UrlToken,
}

/// Marks a resolve request that a plugin has already re-dispatched.
/// Carried by value on the request; no identity comparison involved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReentryTag {
    SideEffects,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolveArgs {
    pub path: String,
    pub importer: Option<PathBuf>,
    pub namespace: String,
    pub resolve_dir: Option<PathBuf>,
    pub kind: ImportKind,
    pub reentry: Option<ReentryTag>,
}

impl ResolveArgs {
    pub fn new(path: impl Into<String>) -> Self {
        ResolveArgs {
            path: path.into(),
            importer: None,
            namespace: FILE_NAMESPACE.to_string(),
            resolve_dir: None,
            kind: ImportKind::default(),
            reentry: None,
        }
    }

    /// Set `importer` and derive `resolve_dir` from it.
    pub fn with_importer(mut self, importer: impl Into<PathBuf>) -> Self {
        let importer = importer.into();
        self.resolve_dir = importer.parent().map(Path::to_path_buf);
        self.importer = Some(importer);
        self
    }

    pub fn with_kind(mut self, kind: ImportKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn tagged(mut self, tag: ReentryTag) -> Self {
        self.reentry = Some(tag);
        self
    }

    pub fn is_tagged(&self, tag: ReentryTag) -> bool {
        self.reentry == Some(tag)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResolveResult {
    pub path: String,
    pub namespace: String,
    /// `Some(true)` opts the module out of tree-shaking.
    pub side_effects: Option<bool>,
    pub external: bool,
}

impl ResolveResult {
    pub fn file(path: impl Into<String>) -> Self {
        ResolveResult {
            path: path.into(),
            namespace: FILE_NAMESPACE.to_string(),
            side_effects: None,
            external: false,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// LOADING
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
pub struct LoadArgs {
    pub path: String,
    pub namespace: String,
}

impl LoadArgs {
    pub fn file(path: impl Into<String>) -> Self {
        LoadArgs {
            path: path.into(),
            namespace: FILE_NAMESPACE.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadResult {
    pub contents: String,
    pub syntax: SyntaxKind,
    pub resolve_dir: Option<PathBuf>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// PLUGIN CAPABILITIES
// ═══════════════════════════════════════════════════════════════════════════════

/// The host's own resolution chain, re-entered from inside a plugin.
pub trait HostResolve: Send + Sync {
    fn resolve(&self, args: ResolveArgs) -> BoxFuture<'_, Result<ResolveResult>>;
}

/// onResolve hook: matched by path filter (and optionally namespace).
pub trait ModuleResolver: Send + Sync {
    fn name(&self) -> &'static str;

    fn filter(&self) -> &Regex;

    /// `None` matches every namespace.
    fn namespace(&self) -> Option<&str> {
        None
    }

    /// `Ok(None)` declines; the host moves on to the next resolver.
    fn resolve<'a>(
        &'a self,
        args: ResolveArgs,
        host: &'a dyn HostResolve,
    ) -> BoxFuture<'a, Result<Option<ResolveResult>>>;
}

/// onLoad hook: matched by path filter and namespace.
pub trait ModuleLoader: Send + Sync {
    fn name(&self) -> &'static str;

    fn filter(&self) -> &Regex;

    fn namespace(&self) -> &str {
        FILE_NAMESPACE
    }

    fn load(&self, args: LoadArgs) -> BoxFuture<'_, Result<Option<LoadResult>>>;
}

/// Registration surface; order of registration is dispatch order.
pub trait PluginBuild {
    fn on_resolve(&mut self, resolver: Arc<dyn ModuleResolver>);
    fn on_load(&mut self, loader: Arc<dyn ModuleLoader>);
}

/// True when a resolver applies to this request.
pub fn resolver_matches(resolver: &dyn ModuleResolver, args: &ResolveArgs) -> bool {
    resolver.filter().is_match(&args.path)
        && resolver
            .namespace()
            .map_or(true, |ns| ns == args.namespace)
}

pub fn loader_matches(loader: &dyn ModuleLoader, args: &LoadArgs) -> bool {
    loader.namespace() == args.namespace && loader.filter().is_match(&args.path)
}

// ═══════════════════════════════════════════════════════════════════════════════
// CHILD BUILDS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Esm,
    Cjs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Node,
    Browser,
}

#[derive(Clone)]
pub struct ChildBuildOptions {
    pub entry_points: Vec<PathBuf>,
    pub resolvers: Vec<Arc<dyn ModuleResolver>>,
    pub loaders: Vec<Arc<dyn ModuleLoader>>,
    pub bundle: bool,
    /// `false`: outputs are returned in memory, nothing touches disk.
    pub write: bool,
    pub external: Vec<String>,
    pub loader: BTreeMap<String, SyntaxKind>,
    pub working_dir: PathBuf,
    pub out_dir: PathBuf,
    pub public_path: String,
    pub format: OutputFormat,
    pub platform: Platform,
}

impl fmt::Debug for ChildBuildOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChildBuildOptions")
            .field("entry_points", &self.entry_points)
            .field(
                "resolvers",
                &self.resolvers.iter().map(|r| r.name()).collect::<Vec<_>>(),
            )
            .field(
                "loaders",
                &self.loaders.iter().map(|l| l.name()).collect::<Vec<_>>(),
            )
            .field("bundle", &self.bundle)
            .field("write", &self.write)
            .field("external", &self.external)
            .field("loader", &self.loader)
            .field("working_dir", &self.working_dir)
            .field("out_dir", &self.out_dir)
            .field("public_path", &self.public_path)
            .field("format", &self.format)
            .field("platform", &self.platform)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFile {
    pub path: PathBuf,
    pub contents: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildMessage {
    pub text: String,
    /// `file:line:column` when the host knows it.
    pub location: Option<String>,
}

impl fmt::Display for BuildMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(loc) => write!(f, "{}: {}", loc, self.text),
            None => f.write_str(&self.text),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BuildFailure {
    pub messages: Vec<BuildMessage>,
}

impl BuildFailure {
    pub fn single(text: impl Into<String>) -> Self {
        BuildFailure {
            messages: vec![BuildMessage {
                text: text.into(),
                location: None,
            }],
        }
    }
}

pub trait ChildBuilder: Send + Sync {
    fn build(
        &self,
        options: ChildBuildOptions,
    ) -> BoxFuture<'_, std::result::Result<Vec<OutputFile>, BuildFailure>>;
}
