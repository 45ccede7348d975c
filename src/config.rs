//! Build configuration
//!
//! `ProjectConfig` is what the host project hands us; `PluginOptions` is what the
//! user sets on the plugin. `ExtractConfig` is the resolved, read-only view shared
//! by every component for the lifetime of one outer build.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use crate::error::Result;
use crate::host::SyntaxKind;

pub const DEFAULT_RUNTIME_PACKAGE: &str = "@style-extract/css";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildMode {
    #[default]
    Development,
    Production,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentifierMode {
    /// Readable, source-traceable identifiers.
    Debug,
    /// Compact hashed identifiers.
    Short,
}

impl IdentifierMode {
    pub fn for_build(mode: BuildMode) -> Self {
        match mode {
            BuildMode::Development => IdentifierMode::Debug,
            BuildMode::Production => IdentifierMode::Short,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "debug" => Some(IdentifierMode::Debug),
            "short" => Some(IdentifierMode::Short),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectConfig {
    pub root: PathBuf,
    pub out_dir: PathBuf,
    #[serde(default = "default_public_path")]
    pub public_path: String,
    #[serde(default)]
    pub mode: BuildMode,
}

fn default_public_path() -> String {
    "/".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginOptions {
    #[serde(default)]
    pub identifiers: Option<IdentifierMode>,
    /// Scopes identifier hashes; falls back to the root directory name.
    #[serde(default)]
    pub package_name: Option<String>,
    #[serde(default = "default_runtime_package")]
    pub runtime_package: String,
    #[serde(default = "default_true")]
    pub output_css: bool,
    #[serde(default)]
    pub externals: Vec<String>,
    #[serde(default)]
    pub loader: BTreeMap<String, SyntaxKind>,
}

fn default_runtime_package() -> String {
    DEFAULT_RUNTIME_PACKAGE.to_string()
}

fn default_true() -> bool {
    true
}

impl Default for PluginOptions {
    fn default() -> Self {
        PluginOptions {
            identifiers: None,
            package_name: None,
            runtime_package: default_runtime_package(),
            output_css: true,
            externals: Vec::new(),
            loader: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExtractConfig {
    pub root: PathBuf,
    pub out_dir: PathBuf,
    pub public_path: String,
    pub identifiers: IdentifierMode,
    pub package_name: String,
    pub runtime_package: String,
    pub output_css: bool,
    pub externals: Vec<String>,
    pub loader: BTreeMap<String, SyntaxKind>,
}

impl ExtractConfig {
    pub fn new(project: ProjectConfig, options: PluginOptions) -> Self {
        let identifiers = options
            .identifiers
            .unwrap_or_else(|| IdentifierMode::for_build(project.mode));
        let package_name = options
            .package_name
            .unwrap_or_else(|| package_name_for_root(&project.root));

        ExtractConfig {
            root: project.root,
            out_dir: project.out_dir,
            public_path: project.public_path,
            identifiers,
            package_name,
            runtime_package: options.runtime_package,
            output_css: options.output_css,
            externals: options.externals,
            loader: options.loader,
        }
    }

    /// Build from `{ "project": {...}, "options": {...} }`.
    pub fn from_json(json: &str) -> Result<Self> {
        #[derive(Deserialize)]
        struct Payload {
            project: ProjectConfig,
            #[serde(default)]
            options: PluginOptions,
        }

        let payload: Payload = serde_json::from_str(json)?;
        Ok(ExtractConfig::new(payload.project, payload.options))
    }

    /// Packages left as real imports in nested compiles.
    pub fn nested_externals(&self) -> Vec<String> {
        let mut external = vec![
            self.runtime_package.clone(),
            format!("{}/*", self.runtime_package),
        ];
        for ext in &self.externals {
            if !external.contains(ext) {
                external.push(ext.clone());
            }
        }
        external
    }

    /// Path relative to the project root with forward slashes.
    pub fn relative_path(&self, file: &Path) -> String {
        relative_to(file, &self.root)
    }
}

/// Files outside `root` get `../` segments; a file sharing no prefix with
/// `root` keeps only its normal components. Never starts with `/`.
pub fn relative_to(file: &Path, root: &Path) -> String {
    let file_parts: Vec<Component<'_>> = file.components().collect();
    let root_parts: Vec<Component<'_>> = root.components().collect();
    let common = file_parts
        .iter()
        .zip(&root_parts)
        .take_while(|(a, b)| a == b)
        .count();

    let mut segments: Vec<String> = Vec::new();
    if common > 0 {
        segments.extend(root_parts[common..].iter().map(|_| "..".to_string()));
    }
    segments.extend(
        file_parts[common..]
            .iter()
            .filter(|c| matches!(c, Component::Normal(_) | Component::ParentDir))
            .map(|c| c.as_os_str().to_string_lossy().into_owned()),
    );
    segments.join("/")
}

/// `rel` with every `..` and `.` segment dropped, so joining it to a directory
/// stays inside that directory.
pub fn contained(rel: &str) -> PathBuf {
    rel.split('/')
        .filter(|seg| !seg.is_empty() && *seg != "." && *seg != "..")
        .collect()
}

fn package_name_for_root(root: &Path) -> String {
    root.file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .unwrap_or("app")
        .to_string()
}
