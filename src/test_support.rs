//! In-memory stand-in for the host bundler, used by the pipeline tests.
//!
//! `TestRegistry` dispatches resolve/load hooks the way a host does: resolvers
//! in registration order, the first `Some` wins, then a filesystem fallback.
//! `FakeChildBuilder` bundles by inlining relative imports line by line, which
//! is enough for the single-line import style the fixtures use.

use futures::future::BoxFuture;
use futures::FutureExt;
use lazy_static::lazy_static;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{ExtractError, Result};
use crate::host::{
    loader_matches, resolver_matches, BuildFailure, BuildMessage, ChildBuildOptions, ChildBuilder,
    HostResolve, ImportKind, LoadArgs, LoadResult, ModuleLoader, ModuleResolver, OutputFile,
    PluginBuild, ResolveArgs, ResolveResult, SyntaxKind, FILE_NAMESPACE,
};

lazy_static! {
    static ref IMPORT_LINE: Regex =
        Regex::new(r#"^\s*import\s+(?:(.+?)\s+from\s+)?["']([^"']+)["'];?\s*$"#).unwrap();
    static ref DEFAULT_BINDING: Regex = Regex::new(r"^([A-Za-z_$][A-Za-z0-9_$]*)$").unwrap();
}

const PROBE_EXTENSIONS: &[&str] = &[".ts", ".tsx", ".js", ".mjs", ".jsx"];

// ═══════════════════════════════════════════════════════════════════════════════
// HOOK REGISTRY
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Default)]
pub struct TestRegistry {
    resolvers: Vec<Arc<dyn ModuleResolver>>,
    loaders: Vec<Arc<dyn ModuleLoader>>,
    external: Vec<String>,
    /// Every hook dispatch, including re-entrant ones.
    pub dispatches: AtomicUsize,
}

impl TestRegistry {
    pub fn new() -> Self {
        TestRegistry::default()
    }

    pub fn with_external(mut self, external: Vec<String>) -> Self {
        self.external = external;
        self
    }

    pub async fn dispatch(&self, args: ResolveArgs) -> Result<ResolveResult> {
        self.dispatches.fetch_add(1, Ordering::SeqCst);

        for resolver in &self.resolvers {
            if !resolver_matches(resolver.as_ref(), &args) {
                continue;
            }
            if let Some(result) = resolver.resolve(args.clone(), self).await? {
                return Ok(result);
            }
        }

        self.fallback_resolve(&args)
    }

    /// Loader hooks, then plain file reads for scripts.
    pub async fn load(&self, resolved: &ResolveResult) -> Result<Option<LoadResult>> {
        let args = LoadArgs {
            path: resolved.path.clone(),
            namespace: resolved.namespace.clone(),
        };
        for loader in &self.loaders {
            if !loader_matches(loader.as_ref(), &args) {
                continue;
            }
            if let Some(result) = loader.load(args.clone()).await? {
                return Ok(Some(result));
            }
        }

        if args.namespace != FILE_NAMESPACE {
            return Ok(None);
        }
        let path = PathBuf::from(&args.path);
        let Some(syntax) = SyntaxKind::for_script_path(&path) else {
            return Ok(None);
        };
        let contents = tokio::fs::read_to_string(&path).await?;
        Ok(Some(LoadResult {
            contents,
            syntax,
            resolve_dir: path.parent().map(Path::to_path_buf),
        }))
    }

    fn fallback_resolve(&self, args: &ResolveArgs) -> Result<ResolveResult> {
        if is_external(&args.path, &self.external) {
            return Ok(ResolveResult {
                external: true,
                ..ResolveResult::file(args.path.clone())
            });
        }

        let specifier = args.path.strip_suffix("?used").unwrap_or(&args.path);
        let not_found = |message: &str| ExtractError::Resolve {
            specifier: args.path.clone(),
            message: message.to_string(),
        };

        if !(specifier.starts_with('.') || specifier.starts_with('/')) {
            return Err(not_found("package not found"));
        }

        let base = args
            .resolve_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("."));
        let candidate = base.join(specifier);
        if candidate.is_file() {
            return Ok(ResolveResult::file(normalize(&candidate)));
        }
        for ext in PROBE_EXTENSIONS {
            let with_ext = PathBuf::from(format!("{}{}", candidate.display(), ext));
            if with_ext.is_file() {
                return Ok(ResolveResult::file(normalize(&with_ext)));
            }
        }
        Err(not_found("file not found"))
    }
}

impl PluginBuild for TestRegistry {
    fn on_resolve(&mut self, resolver: Arc<dyn ModuleResolver>) {
        self.resolvers.push(resolver);
    }

    fn on_load(&mut self, loader: Arc<dyn ModuleLoader>) {
        self.loaders.push(loader);
    }
}

impl HostResolve for TestRegistry {
    fn resolve(&self, args: ResolveArgs) -> BoxFuture<'_, Result<ResolveResult>> {
        self.dispatch(args).boxed()
    }
}

fn is_external(specifier: &str, external: &[String]) -> bool {
    external.iter().any(|pattern| match pattern.strip_suffix('*') {
        Some(prefix) => specifier.starts_with(prefix),
        None => specifier == pattern,
    })
}

/// Drops `.` and `..` components so the same file always gets the same path.
fn normalize(path: &Path) -> String {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::CurDir => {}
            std::path::Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out.display().to_string()
}

// ═══════════════════════════════════════════════════════════════════════════════
// CHILD BUILDER
// ═══════════════════════════════════════════════════════════════════════════════

/// What one child build saw.
#[derive(Debug, Clone, Default)]
pub struct BuildRecord {
    pub entry: PathBuf,
    /// Load count per module path.
    pub loads: BTreeMap<String, usize>,
    /// Paths a resolver flagged as side-effecting.
    pub side_effects: BTreeSet<String>,
    pub external: Vec<String>,
    pub write: bool,
}

#[derive(Default)]
pub struct FakeChildBuilder {
    records: Mutex<Vec<BuildRecord>>,
}

impl FakeChildBuilder {
    pub fn new() -> Self {
        FakeChildBuilder::default()
    }

    pub fn records(&self) -> Vec<BuildRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn record_for(&self, entry_suffix: &str) -> Option<BuildRecord> {
        self.records()
            .into_iter()
            .find(|record| record.entry.to_string_lossy().ends_with(entry_suffix))
    }
}

impl ChildBuilder for FakeChildBuilder {
    fn build(
        &self,
        options: ChildBuildOptions,
    ) -> BoxFuture<'_, std::result::Result<Vec<OutputFile>, BuildFailure>> {
        async move {
            let mut registry = TestRegistry::new().with_external(options.external.clone());
            for resolver in &options.resolvers {
                registry.on_resolve(resolver.clone());
            }
            for loader in &options.loaders {
                registry.on_load(loader.clone());
            }

            let entry = options
                .entry_points
                .first()
                .cloned()
                .ok_or_else(|| BuildFailure::single("no entry point"))?;

            let mut bundler = Bundler {
                registry: &registry,
                options: &options,
                record: BuildRecord {
                    entry: entry.clone(),
                    external: options.external.clone(),
                    write: options.write,
                    ..BuildRecord::default()
                },
                visited: HashSet::new(),
                hoisted: Vec::new(),
                body: String::new(),
                assets: Vec::new(),
            };

            let outcome = bundler.visit(normalize(&entry), true).await;
            let Bundler {
                record,
                hoisted,
                body,
                mut assets,
                ..
            } = bundler;
            if let Ok(mut records) = self.records.lock() {
                records.push(record);
            }
            outcome?;

            let file_name = entry
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "entry".to_string());
            let mut js = hoisted.join("\n");
            js.push('\n');
            js.push_str(&body);

            assets.insert(
                0,
                OutputFile {
                    path: options.out_dir.join(format!("{}.js", file_name)),
                    contents: js.into_bytes(),
                },
            );
            Ok(assets)
        }
        .boxed()
    }
}

struct Bundler<'a> {
    registry: &'a TestRegistry,
    options: &'a ChildBuildOptions,
    record: BuildRecord,
    visited: HashSet<String>,
    hoisted: Vec<String>,
    body: String,
    assets: Vec<OutputFile>,
}

fn failure(err: impl ToString, location: &str) -> BuildFailure {
    BuildFailure {
        messages: vec![BuildMessage {
            text: err.to_string(),
            location: Some(location.to_string()),
        }],
    }
}

impl<'a> Bundler<'a> {
    fn visit<'b>(
        &'b mut self,
        path: String,
        is_entry: bool,
    ) -> BoxFuture<'b, std::result::Result<(), BuildFailure>> {
        async move {
            if !self.visited.insert(path.clone()) {
                return Ok(());
            }

            let resolved = ResolveResult::file(path.clone());
            let loaded = self
                .registry
                .load(&resolved)
                .await
                .map_err(|e| failure(e, &path))?
                .ok_or_else(|| failure("no loader for file", &path))?;
            *self.record.loads.entry(path.clone()).or_insert(0) += 1;

            let importer = PathBuf::from(&path);
            let mut body = String::new();
            for line in loaded.contents.lines() {
                let Some(caps) = IMPORT_LINE.captures(line) else {
                    body.push_str(&strip_export(line, is_entry));
                    body.push('\n');
                    continue;
                };
                let bindings = caps.get(1).map(|m| m.as_str().trim().to_string());
                let specifier = caps[2].to_string();

                let mut args = ResolveArgs::new(specifier.clone())
                    .with_importer(importer.clone())
                    .with_kind(ImportKind::ImportStatement);
                if let Some(dir) = &loaded.resolve_dir {
                    args.resolve_dir = Some(dir.clone());
                }
                let target = self
                    .registry
                    .dispatch(args)
                    .await
                    .map_err(|e| failure(e, &path))?;

                if target.external {
                    if !self.hoisted.iter().any(|l| l == line.trim()) {
                        self.hoisted.push(line.trim().to_string());
                    }
                    continue;
                }
                if target.side_effects == Some(true) {
                    self.record.side_effects.insert(target.path.clone());
                }

                if let Some(kind) = self.asset_kind(&target.path) {
                    let binding = bindings.as_deref().unwrap_or_default();
                    body.push_str(&self.emit_asset(&target.path, binding, kind, &path)?);
                    continue;
                }

                // Dependencies land in the bundle before the importing module.
                self.visit(target.path.clone(), false).await?;
            }

            self.body.push_str(&body);
            Ok(())
        }
        .boxed()
    }

    fn asset_kind(&self, path: &str) -> Option<SyntaxKind> {
        let ext = Path::new(path).extension()?.to_str()?;
        self.options
            .loader
            .get(&format!(".{}", ext))
            .copied()
            .filter(|kind| !kind.is_script())
    }

    fn emit_asset(
        &mut self,
        source: &str,
        binding: &str,
        kind: SyntaxKind,
        importer: &str,
    ) -> std::result::Result<String, BuildFailure> {
        let contents = std::fs::read(source).map_err(|e| failure(e, importer))?;
        let path = Path::new(source);
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let ext = path
            .extension()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let hash: String = Sha256::digest(&contents)
            .iter()
            .take(4)
            .map(|b| format!("{:02x}", b))
            .collect();
        let file_name = format!("{}-{}.{}", stem, hash, ext);
        let url = format!("{}assets/{}", self.options.public_path, file_name);

        if kind == SyntaxKind::File && !self.assets.iter().any(|a| a.path.ends_with(&file_name)) {
            self.assets.push(OutputFile {
                path: self.options.out_dir.join("assets").join(&file_name),
                contents,
            });
        }

        Ok(match DEFAULT_BINDING.captures(binding) {
            Some(caps) => format!("var {} = {};\n", &caps[1], serde_json::Value::String(url)),
            None => String::new(),
        })
    }
}

/// Non-entry modules are inlined, so their exports become plain bindings.
fn strip_export(line: &str, is_entry: bool) -> String {
    if is_entry {
        return line.to_string();
    }
    let trimmed = line.trim_start();
    if trimmed.starts_with("export {") {
        return String::new();
    }
    match trimmed.strip_prefix("export ") {
        Some(rest) if !rest.starts_with("default") => rest.to_string(),
        _ => line.to_string(),
    }
}
