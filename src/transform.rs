//! Source Transformer
//!
//! Wraps a style-definition module in file-scope markers so every rule it
//! registers can be attributed back to it, and (in debug identifier mode) hands
//! each debuggable runtime call the name it is bound to.
//!
//! Output is spliced from the original text rather than re-printed, so it is
//! byte-identical for identical inputs and keeps the author's formatting.

use oxc_allocator::Allocator;
use oxc_ast::ast::{
    BindingPattern, CallExpression, ExportDefaultDeclaration, Expression,
    ImportDeclarationSpecifier, ModuleExportName, ObjectProperty, Statement, VariableDeclarator,
};
use oxc_ast_visit::{walk, Visit};
use oxc_parser::Parser;
use oxc_span::{GetSpan, SourceType};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::config::{relative_to, IdentifierMode};
use crate::error::{ExtractError, Result};
use crate::host::SyntaxKind;

/// Runtime functions that accept a trailing debug id, with their arity before it.
const DEBUGGABLE_CALLS: &[(&str, usize)] = &[
    ("style", 1),
    ("styleVariants", 1),
    ("keyframes", 1),
    ("fontFace", 1),
    ("createVar", 0),
];

// ═══════════════════════════════════════════════════════════════════════════════
// STYLE SOURCE FILE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
pub struct StyleSourceFile {
    pub path: PathBuf,
    pub source: String,
    pub syntax: SyntaxKind,
}

impl StyleSourceFile {
    pub fn new(path: impl Into<PathBuf>, source: impl Into<String>) -> Result<Self> {
        let path = path.into();
        let syntax = SyntaxKind::for_script_path(&path).ok_or_else(|| ExtractError::Transform {
            file: path.display().to_string(),
            message: "unsupported file extension".to_string(),
        })?;
        Ok(StyleSourceFile {
            path,
            source: source.into(),
            syntax,
        })
    }

    pub async fn read(path: &Path) -> Result<Self> {
        let source = tokio::fs::read_to_string(path).await?;
        StyleSourceFile::new(path, source)
    }
}

#[derive(Debug, Clone)]
pub struct TransformOptions<'a> {
    pub root: &'a Path,
    pub identifiers: IdentifierMode,
    pub package_name: &'a str,
    pub runtime_package: &'a str,
}

// ═══════════════════════════════════════════════════════════════════════════════
// TRANSFORM
// ═══════════════════════════════════════════════════════════════════════════════

pub fn transform(file: &StyleSourceFile, options: &TransformOptions<'_>) -> Result<String> {
    let rel_path = relative_to(&file.path, options.root);
    let source_type = match file.syntax {
        SyntaxKind::Jsx => SourceType::jsx(),
        SyntaxKind::Ts => SourceType::ts(),
        SyntaxKind::Tsx => SourceType::tsx(),
        _ => SourceType::mjs(),
    };

    let allocator = Allocator::default();
    let ret = Parser::new(&allocator, &file.source, source_type).parse();

    if ret.panicked || !ret.errors.is_empty() {
        let message = ret
            .errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        return Err(ExtractError::Transform {
            file: rel_path,
            message: if message.is_empty() {
                "unrecoverable syntax error".to_string()
            } else {
                message
            },
        });
    }

    let mut body = file.source.clone();

    if options.identifiers == IdentifierMode::Debug {
        let runtime_locals = collect_runtime_imports(&ret.program.body, options.runtime_package);
        if !runtime_locals.is_empty() {
            let mut collector = DebugIdCollector {
                runtime_locals,
                names: Vec::new(),
                default_name: file_debug_name(&rel_path),
                insertions: Vec::new(),
            };
            collector.visit_program(&ret.program);

            // Apply back to front so earlier offsets stay valid
            let mut insertions = collector.insertions;
            insertions.sort_by(|a, b| b.0.cmp(&a.0));
            for (offset, text) in insertions {
                body.insert_str(offset as usize, &text);
            }
        }
    }

    let mut out = String::with_capacity(body.len() + 256);
    out.push_str(&format!(
        "import {{ setFileScope, endFileScope }} from {};\n",
        js_string(&format!("{}/fileScope", options.runtime_package))
    ));
    out.push_str(&format!(
        "setFileScope({}, {});\n",
        js_string(&rel_path),
        js_string(options.package_name)
    ));
    out.push_str(&body);
    if !body.ends_with('\n') {
        out.push('\n');
    }
    out.push_str("endFileScope();\n");

    Ok(out)
}

fn js_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

/// `src/button.style.ts` -> `button`, `src/card/index.style.ts` -> `card`.
pub fn file_debug_name(rel_path: &str) -> String {
    let mut segments = rel_path.rsplit('/');
    let file_name = segments.next().unwrap_or(rel_path);
    let stem = file_name.split('.').next().unwrap_or(file_name);
    let name = if stem == "index" {
        segments.next().unwrap_or(stem)
    } else {
        stem
    };
    sanitize_identifier(name)
}

pub fn sanitize_identifier(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Local name -> imported runtime function name.
fn collect_runtime_imports(
    body: &[Statement<'_>],
    runtime_package: &str,
) -> HashMap<String, String> {
    let mut locals = HashMap::new();
    let sub_path_prefix = format!("{}/", runtime_package);

    for stmt in body {
        let Statement::ImportDeclaration(decl) = stmt else {
            continue;
        };
        let source = decl.source.value.as_str();
        if source != runtime_package && !source.starts_with(&sub_path_prefix) {
            continue;
        }
        let Some(specifiers) = &decl.specifiers else {
            continue;
        };
        for specifier in specifiers {
            if let ImportDeclarationSpecifier::ImportSpecifier(s) = specifier {
                let imported = match &s.imported {
                    ModuleExportName::IdentifierName(id) => id.name.to_string(),
                    ModuleExportName::StringLiteral(lit) => lit.value.to_string(),
                    _ => continue,
                };
                if DEBUGGABLE_CALLS.iter().any(|(name, _)| *name == imported) {
                    locals.insert(s.local.name.to_string(), imported);
                }
            }
        }
    }

    locals
}

struct DebugIdCollector {
    runtime_locals: HashMap<String, String>,
    names: Vec<String>,
    default_name: String,
    insertions: Vec<(u32, String)>,
}

impl DebugIdCollector {
    fn arity_of(&self, call: &CallExpression<'_>) -> Option<usize> {
        let Expression::Identifier(ident) = &call.callee else {
            return None;
        };
        let imported = self.runtime_locals.get(ident.name.as_str())?;
        DEBUGGABLE_CALLS
            .iter()
            .find(|(name, _)| name == imported)
            .map(|(_, arity)| *arity)
    }
}

impl<'a> Visit<'a> for DebugIdCollector {
    fn visit_variable_declarator(&mut self, decl: &VariableDeclarator<'a>) {
        if let BindingPattern::BindingIdentifier(id) = &decl.id {
            self.names.push(id.name.to_string());
            walk::walk_variable_declarator(self, decl);
            self.names.pop();
        } else {
            walk::walk_variable_declarator(self, decl);
        }
    }

    fn visit_object_property(&mut self, prop: &ObjectProperty<'a>) {
        match prop.key.static_name() {
            Some(name) if !prop.computed => {
                self.names.push(name.to_string());
                walk::walk_object_property(self, prop);
                self.names.pop();
            }
            _ => walk::walk_object_property(self, prop),
        }
    }

    fn visit_export_default_declaration(&mut self, decl: &ExportDefaultDeclaration<'a>) {
        self.names.push(self.default_name.clone());
        walk::walk_export_default_declaration(self, decl);
        self.names.pop();
    }

    fn visit_call_expression(&mut self, call: &CallExpression<'a>) {
        if let Some(arity) = self.arity_of(call) {
            if call.arguments.len() == arity && !self.names.is_empty() {
                let debug_id = js_string(&self.names.join("_"));
                match call.arguments.last() {
                    Some(last) => self
                        .insertions
                        .push((last.span().end, format!(", {}", debug_id))),
                    None => self.insertions.push((call.span.end - 1, debug_id)),
                }
            }
        }
        walk::walk_call_expression(self, call);
    }
}
