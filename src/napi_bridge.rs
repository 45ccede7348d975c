//! Node-API exports for JavaScript host plugins.

use napi_derive::napi;
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;

use crate::config::{IdentifierMode, DEFAULT_RUNTIME_PACKAGE};
use crate::extract::build_module;
use crate::static_eval::{BundleEvaluator, EvalContext, StaticEvaluator};
use crate::transform::{transform, StyleSourceFile, TransformOptions};
use crate::virtual_css;

fn to_napi(err: impl std::fmt::Display) -> napi::Error {
    napi::Error::from_reason(err.to_string())
}

fn identifier_mode(value: &str) -> napi::Result<IdentifierMode> {
    IdentifierMode::parse(value)
        .ok_or_else(|| napi::Error::from_reason(format!("Unknown identifier mode: {}", value)))
}

#[napi]
pub fn encode_virtual_css_native(origin_file: String, css: String) -> String {
    virtual_css::encode(&origin_file, &css)
}

#[napi]
pub fn decode_virtual_css_native(specifier: String) -> napi::Result<serde_json::Value> {
    let module = virtual_css::decode(&specifier).map_err(to_napi)?;
    serde_json::to_value(module).map_err(to_napi)
}

#[napi]
pub fn transform_style_source_native(
    source: String,
    file_path: String,
    root_path: String,
    identifiers: String,
    package_name: String,
    runtime_package: Option<String>,
) -> napi::Result<String> {
    let file = StyleSourceFile::new(&file_path, source).map_err(to_napi)?;
    let root = PathBuf::from(root_path);
    let runtime_package = runtime_package.unwrap_or_else(|| DEFAULT_RUNTIME_PACKAGE.to_string());

    transform(
        &file,
        &TransformOptions {
            root: &root,
            identifiers: identifier_mode(&identifiers)?,
            package_name: &package_name,
            runtime_package: &runtime_package,
        },
    )
    .map_err(to_napi)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EvaluateOptions {
    file_path: PathBuf,
    root: PathBuf,
    out_dir: PathBuf,
    #[serde(default)]
    public_path: String,
    #[serde(default = "default_identifiers")]
    identifiers: String,
    package_name: String,
    #[serde(default)]
    runtime_package: Option<String>,
    #[serde(default = "default_true")]
    output_css: bool,
}

fn default_identifiers() -> String {
    "short".to_string()
}

fn default_true() -> bool {
    true
}

#[napi]
pub fn evaluate_bundle_native(
    bundle: String,
    options: serde_json::Value,
) -> napi::Result<serde_json::Value> {
    let options: EvaluateOptions = serde_json::from_value(options)
        .map_err(|e| napi::Error::from_reason(format!("Invalid evaluate options: {}", e)))?;

    let ctx = EvalContext {
        file_path: options.file_path,
        root: options.root,
        out_dir: options.out_dir,
        public_path: options.public_path,
        identifiers: identifier_mode(&options.identifiers)?,
        package_name: options.package_name,
        runtime_package: options
            .runtime_package
            .unwrap_or_else(|| DEFAULT_RUNTIME_PACKAGE.to_string()),
    };

    let evaluated = StaticEvaluator.evaluate(&bundle, &ctx).map_err(to_napi)?;
    let stylesheets = evaluated.stylesheets.clone();
    let exports: serde_json::Map<String, serde_json::Value> =
        evaluated.exports.iter().cloned().collect();
    let extracted = build_module(evaluated, options.output_css);

    Ok(json!({
        "stylesheets": stylesheets,
        "exports": exports,
        "js": extracted.js,
    }))
}
