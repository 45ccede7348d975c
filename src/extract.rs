//! Extraction Adapter
//!
//! Evaluates the bundle of a nested compile and turns it into what the host
//! receives for the style file: one virtual CSS module per file that produced
//! CSS, plus a small JS module that imports them and re-exports the values.

use lazy_static::lazy_static;
use regex::Regex;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use crate::config::ExtractConfig;
use crate::error::{ExtractError, Result};
use crate::nested::NestedCompileResult;
use crate::static_eval::{BundleEvaluator, EvalContext, EvaluatedBundle, StaticEvaluator};
use crate::virtual_css::VirtualCssModule;

lazy_static! {
    static ref IDENTIFIER: Regex = Regex::new(r"^[A-Za-z_$][A-Za-z0-9_$]*$").unwrap();
}

const RESERVED_WORDS: &[&str] = &[
    "await", "break", "case", "catch", "class", "const", "continue", "debugger", "default",
    "delete", "do", "else", "enum", "export", "extends", "false", "finally", "for", "function",
    "if", "import", "in", "instanceof", "let", "new", "null", "return", "static", "super",
    "switch", "this", "throw", "true", "try", "typeof", "var", "void", "while", "with", "yield",
];

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedModule {
    /// JS module source handed to the host in place of the style file.
    pub js: String,
    /// In the order the stylesheets were first registered.
    pub virtual_modules: Vec<VirtualCssModule>,
}

pub struct ExtractionAdapter {
    config: Arc<ExtractConfig>,
    evaluator: Arc<dyn BundleEvaluator>,
}

impl ExtractionAdapter {
    pub fn new(config: Arc<ExtractConfig>) -> Self {
        ExtractionAdapter::with_evaluator(config, Arc::new(StaticEvaluator))
    }

    pub fn with_evaluator(config: Arc<ExtractConfig>, evaluator: Arc<dyn BundleEvaluator>) -> Self {
        ExtractionAdapter { config, evaluator }
    }

    /// Only what is listed here is visible to the evaluation.
    pub fn eval_context(&self, file_path: &Path) -> EvalContext {
        EvalContext {
            file_path: file_path.to_path_buf(),
            root: self.config.root.clone(),
            out_dir: self.config.out_dir.clone(),
            public_path: self.config.public_path.clone(),
            identifiers: self.config.identifiers,
            package_name: self.config.package_name.clone(),
            runtime_package: self.config.runtime_package.clone(),
        }
    }

    /// `Ok(None)` when the child build produced no JS bundle.
    pub fn extract(&self, result: &NestedCompileResult) -> Result<Option<ExtractedModule>> {
        let Some(bundle) = result.js_bundle() else {
            debug!(file = %result.file, "no js bundle, nothing to extract");
            return Ok(None);
        };

        let source = std::str::from_utf8(&bundle.contents).map_err(|_| ExtractError::Evaluate {
            file: result.file.clone(),
            message: format!("bundle {} is not valid UTF-8", bundle.path.display()),
        })?;

        let ctx = self.eval_context(&self.config.root.join(&result.file));
        let evaluated = self.evaluator.evaluate(source, &ctx)?;
        let extracted = build_module(evaluated, self.config.output_css);

        debug!(
            stage = "extracted",
            file = %result.file,
            css_files = extracted.virtual_modules.len(),
            "extracted stylesheets"
        );
        Ok(Some(extracted))
    }
}

/// Non-empty stylesheets become virtual modules; the JS module imports them.
pub fn build_module(evaluated: EvaluatedBundle, output_css: bool) -> ExtractedModule {
    let virtual_modules: Vec<VirtualCssModule> = evaluated
        .stylesheets
        .into_iter()
        .filter(|sheet| !sheet.css.trim().is_empty())
        .map(|sheet| VirtualCssModule::new(sheet.file, sheet.css))
        .collect();

    let js = generate_module(&virtual_modules, &evaluated.exports, output_css);
    ExtractedModule {
        js,
        virtual_modules,
    }
}

pub fn generate_module(
    virtual_modules: &[VirtualCssModule],
    exports: &[(String, serde_json::Value)],
    output_css: bool,
) -> String {
    let mut js = String::new();

    if output_css {
        for module in virtual_modules {
            js.push_str(&format!("import {};\n", js_string(&module.specifier())));
        }
    }

    let mut aliased = 0usize;
    for (name, value) in exports {
        if name == "default" {
            js.push_str(&format!("export default {};\n", value));
        } else if is_plain_identifier(name) {
            js.push_str(&format!("export var {} = {};\n", name, value));
        } else {
            let local = format!("__export_{}", aliased);
            aliased += 1;
            js.push_str(&format!("var {} = {};\n", local, value));
            js.push_str(&format!("export {{ {} as {} }};\n", local, js_string(name)));
        }
    }

    js
}

fn is_plain_identifier(name: &str) -> bool {
    IDENTIFIER.is_match(name) && !RESERVED_WORDS.contains(&name)
}

fn js_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}
