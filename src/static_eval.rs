//! Static Bundle Evaluator
//!
//! Executes a nested build's JS bundle without running any code. The bundle
//! is walked statement by statement over the oxc AST; literal values are
//! computed, runtime calls (`style`, `globalStyle`, ...) are intercepted and
//! turned into stylesheet text attributed to the innermost file scope.
//!
//! Only the bundle text and the explicit `EvalContext` are visible. Anything
//! that cannot be computed becomes `JsValue::Opaque` and is an error only if
//! a stylesheet or an export needs it.

use oxc_allocator::Allocator;
use oxc_ast::ast::{
    Argument, ArrayExpressionElement, BindingPattern, CallExpression, Declaration, Expression,
    ImportDeclaration, ImportDeclarationSpecifier, ModuleExportName, ObjectPropertyKind, Statement,
    TemplateLiteral, VariableDeclaration,
};
use oxc_parser::Parser;
use oxc_span::SourceType;
use oxc_syntax::operator::{BinaryOperator, LogicalOperator, UnaryOperator};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, warn};

use crate::config::IdentifierMode;
use crate::css::{self, format_number};
use crate::error::{ExtractError, Result};

// ═══════════════════════════════════════════════════════════════════════════════
// VALUES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeFn {
    SetFileScope,
    EndFileScope,
    Style,
    GlobalStyle,
    StyleVariants,
    Keyframes,
    FontFace,
    CreateVar,
}

impl RuntimeFn {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "setFileScope" => RuntimeFn::SetFileScope,
            "endFileScope" => RuntimeFn::EndFileScope,
            "style" => RuntimeFn::Style,
            "globalStyle" => RuntimeFn::GlobalStyle,
            "styleVariants" => RuntimeFn::StyleVariants,
            "keyframes" => RuntimeFn::Keyframes,
            "fontFace" => RuntimeFn::FontFace,
            "createVar" => RuntimeFn::CreateVar,
            _ => return None,
        })
    }
}

/// A value as far as it can be known without executing code.
#[derive(Debug, Clone, PartialEq)]
pub enum JsValue {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<JsValue>),
    /// Insertion-ordered, keys unique.
    Object(Vec<(String, JsValue)>),
    Runtime(RuntimeFn),
    /// `import * as css from "<runtime>"`
    RuntimeNamespace,
    /// Not statically known; carries a short description for diagnostics.
    Opaque(String),
}

impl JsValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            JsValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// String form used for concatenation and CSS values.
    pub fn as_text(&self) -> Option<String> {
        match self {
            JsValue::String(s) => Some(s.clone()),
            JsValue::Number(n) => Some(format_number(*n)),
            JsValue::Bool(b) => Some(b.to_string()),
            JsValue::Null => Some("null".to_string()),
            JsValue::Undefined => Some("undefined".to_string()),
            _ => None,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            JsValue::Undefined => "undefined".to_string(),
            JsValue::Null => "null".to_string(),
            JsValue::Bool(_) => "a boolean".to_string(),
            JsValue::Number(_) => "a number".to_string(),
            JsValue::String(_) => "a string".to_string(),
            JsValue::Array(_) => "an array".to_string(),
            JsValue::Object(_) => "an object".to_string(),
            JsValue::Runtime(_) | JsValue::RuntimeNamespace => "a runtime function".to_string(),
            JsValue::Opaque(what) => format!("unknown value {}", what),
        }
    }

    /// `None` means the value is not statically known.
    fn truthy(&self) -> Option<bool> {
        Some(match self {
            JsValue::Undefined | JsValue::Null => false,
            JsValue::Bool(b) => *b,
            JsValue::Number(n) => *n != 0.0 && !n.is_nan(),
            JsValue::String(s) => !s.is_empty(),
            JsValue::Array(_) | JsValue::Object(_) => true,
            JsValue::Runtime(_) | JsValue::RuntimeNamespace => true,
            JsValue::Opaque(_) => return None,
        })
    }

    fn member(&self, key: &str) -> JsValue {
        match self {
            JsValue::Object(entries) => entries
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
                .unwrap_or(JsValue::Undefined),
            JsValue::Array(items) => {
                if key == "length" {
                    return JsValue::Number(items.len() as f64);
                }
                key.parse::<usize>()
                    .ok()
                    .and_then(|i| items.get(i).cloned())
                    .unwrap_or(JsValue::Undefined)
            }
            JsValue::String(s) if key == "length" => JsValue::Number(s.chars().count() as f64),
            JsValue::RuntimeNamespace => RuntimeFn::from_name(key)
                .map(JsValue::Runtime)
                .unwrap_or_else(|| JsValue::Opaque(format!("`{}` from the runtime", key))),
            JsValue::Opaque(what) => JsValue::Opaque(format!("{}.{}", what, key)),
            _ => JsValue::Undefined,
        }
    }

    fn property_key(&self) -> Option<String> {
        match self {
            JsValue::String(s) => Some(s.clone()),
            JsValue::Number(_) | JsValue::Bool(_) | JsValue::Null | JsValue::Undefined => {
                self.as_text()
            }
            _ => None,
        }
    }

    /// JSON form for generated exports; `None` if any part is not data.
    pub fn to_json(&self) -> Option<serde_json::Value> {
        use serde_json::Value;
        Some(match self {
            JsValue::Undefined | JsValue::Null => Value::Null,
            JsValue::Bool(b) => Value::Bool(*b),
            JsValue::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 9.0e15 {
                    Value::from(*n as i64)
                } else {
                    Value::Number(serde_json::Number::from_f64(*n)?)
                }
            }
            JsValue::String(s) => Value::String(s.clone()),
            JsValue::Array(items) => Value::Array(
                items
                    .iter()
                    .map(JsValue::to_json)
                    .collect::<Option<Vec<_>>>()?,
            ),
            JsValue::Object(entries) => {
                let mut map = serde_json::Map::new();
                for (k, v) in entries {
                    map.insert(k.clone(), v.to_json()?);
                }
                Value::Object(map)
            }
            JsValue::Runtime(_) | JsValue::RuntimeNamespace | JsValue::Opaque(_) => return None,
        })
    }
}

fn insert_entry(entries: &mut Vec<(String, JsValue)>, key: String, value: JsValue) {
    match entries.iter_mut().find(|(k, _)| *k == key) {
        Some(slot) => slot.1 = value,
        None => entries.push((key, value)),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// EVALUATOR SEAM
// ═══════════════════════════════════════════════════════════════════════════════

/// Everything the evaluation can observe besides the bundle text.
#[derive(Debug, Clone)]
pub struct EvalContext {
    /// Style file the bundle was built from; used in diagnostics.
    pub file_path: PathBuf,
    pub root: PathBuf,
    /// Asset URLs in the bundle were already rewritten by the child build
    /// against `public_path`, so `StaticEvaluator` reads neither of these two.
    /// They are passed for evaluators that emit asset references of their own.
    pub out_dir: PathBuf,
    pub public_path: String,
    pub identifiers: IdentifierMode,
    /// Fallback when `setFileScope` is called without a package.
    pub package_name: String,
    pub runtime_package: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileStylesheet {
    /// Project-relative file the CSS is attributed to.
    pub file: String,
    pub css: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct EvaluatedBundle {
    /// In order of first registration.
    pub stylesheets: Vec<FileStylesheet>,
    /// In declaration order; `"default"` for the default export.
    pub exports: Vec<(String, serde_json::Value)>,
}

pub trait BundleEvaluator: Send + Sync {
    fn evaluate(&self, bundle: &str, ctx: &EvalContext) -> Result<EvaluatedBundle>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct StaticEvaluator;

impl BundleEvaluator for StaticEvaluator {
    fn evaluate(&self, bundle: &str, ctx: &EvalContext) -> Result<EvaluatedBundle> {
        let allocator = Allocator::default();
        // TypeScript syntax enabled so leftover annotations still parse.
        let source_type = SourceType::ts();
        let ret = Parser::new(&allocator, bundle, source_type).parse();

        let mut interpreter = Interpreter::new(ctx);
        if !ret.errors.is_empty() || ret.panicked {
            let messages: Vec<String> = ret.errors.iter().map(|e| e.to_string()).collect();
            return Err(interpreter.fail(format!(
                "bundle output is not valid JavaScript: {}",
                messages.join("; ")
            )));
        }

        for stmt in &ret.program.body {
            interpreter.exec_statement(stmt)?;
        }

        if !interpreter.scopes.is_empty() {
            warn!(
                file = %interpreter.file_label,
                open = interpreter.scopes.len(),
                "bundle ended with an open file scope"
            );
        }

        interpreter.finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// INTERPRETER
// ═══════════════════════════════════════════════════════════════════════════════

struct FileScope {
    file: String,
    package: String,
}

enum ExportSource {
    Local(String),
    Value(JsValue),
}

struct Interpreter<'c> {
    ctx: &'c EvalContext,
    file_label: String,
    env: HashMap<String, JsValue>,
    scopes: Vec<FileScope>,
    ref_counts: HashMap<String, usize>,
    stylesheets: Vec<FileStylesheet>,
    exports: Vec<(String, ExportSource)>,
}

impl<'c> Interpreter<'c> {
    fn new(ctx: &'c EvalContext) -> Self {
        let file_label = ctx
            .file_path
            .strip_prefix(&ctx.root)
            .unwrap_or(&ctx.file_path)
            .to_string_lossy()
            .replace('\\', "/");
        Interpreter {
            ctx,
            file_label,
            env: HashMap::new(),
            scopes: Vec::new(),
            ref_counts: HashMap::new(),
            stylesheets: Vec::new(),
            exports: Vec::new(),
        }
    }

    fn fail(&self, message: impl Into<String>) -> ExtractError {
        ExtractError::Evaluate {
            file: self.file_label.clone(),
            message: message.into(),
        }
    }

    fn finish(self) -> Result<EvaluatedBundle> {
        let mut exports = Vec::with_capacity(self.exports.len());
        for (name, source) in &self.exports {
            let value = match source {
                ExportSource::Local(local) => {
                    self.env.get(local).cloned().unwrap_or(JsValue::Undefined)
                }
                ExportSource::Value(value) => value.clone(),
            };
            let json = value.to_json().ok_or_else(|| {
                self.fail(format!(
                    "export `{}` cannot be statically evaluated ({})",
                    name,
                    value.describe()
                ))
            })?;
            exports.push((name.clone(), json));
        }

        debug!(
            file = %self.file_label,
            stylesheets = self.stylesheets.len(),
            exports = exports.len(),
            "bundle evaluated"
        );

        Ok(EvaluatedBundle {
            stylesheets: self.stylesheets,
            exports,
        })
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Statements
    // ───────────────────────────────────────────────────────────────────────────

    fn exec_statement(&mut self, stmt: &Statement<'_>) -> Result<()> {
        match stmt {
            Statement::ImportDeclaration(decl) => {
                self.bind_import(decl);
                Ok(())
            }
            Statement::VariableDeclaration(decl) => self.exec_var(decl),
            Statement::ExpressionStatement(s) => self.eval(&s.expression).map(|_| ()),
            Statement::FunctionDeclaration(f) => {
                if let Some(id) = &f.id {
                    self.bind_opaque(id.name.as_str(), "function");
                }
                Ok(())
            }
            Statement::ClassDeclaration(c) => {
                if let Some(id) = &c.id {
                    self.bind_opaque(id.name.as_str(), "class");
                }
                Ok(())
            }
            Statement::ExportNamedDeclaration(decl) => {
                if decl.export_kind.is_type() || decl.source.is_some() {
                    return Ok(());
                }
                if let Some(declaration) = &decl.declaration {
                    self.exec_exported_declaration(declaration)?;
                }
                for spec in &decl.specifiers {
                    if spec.export_kind.is_type() {
                        continue;
                    }
                    self.exports.push((
                        module_export_name(&spec.exported),
                        ExportSource::Local(module_export_name(&spec.local)),
                    ));
                }
                Ok(())
            }
            Statement::ExportDefaultDeclaration(decl) => {
                let value = match decl.declaration.as_expression() {
                    Some(expr) => self.eval(expr)?,
                    None => JsValue::Opaque("default declaration".to_string()),
                };
                self.exports
                    .push(("default".to_string(), ExportSource::Value(value)));
                Ok(())
            }
            Statement::EmptyStatement(_)
            | Statement::ExportAllDeclaration(_)
            | Statement::TSTypeAliasDeclaration(_)
            | Statement::TSInterfaceDeclaration(_)
            | Statement::TSModuleDeclaration(_)
            | Statement::TSNamespaceExportDeclaration(_) => Ok(()),
            _ => Err(self.fail("unsupported top-level statement in bundle output")),
        }
    }

    fn exec_exported_declaration(&mut self, declaration: &Declaration<'_>) -> Result<()> {
        match declaration {
            Declaration::VariableDeclaration(var) => {
                self.exec_var(var)?;
                for d in &var.declarations {
                    if let BindingPattern::BindingIdentifier(id) = &d.id {
                        let name = id.name.to_string();
                        self.exports
                            .push((name.clone(), ExportSource::Local(name)));
                    }
                }
            }
            Declaration::FunctionDeclaration(f) => {
                if let Some(id) = &f.id {
                    let name = id.name.to_string();
                    self.bind_opaque(&name, "function");
                    self.exports.push((name.clone(), ExportSource::Local(name)));
                }
            }
            Declaration::ClassDeclaration(c) => {
                if let Some(id) = &c.id {
                    let name = id.name.to_string();
                    self.bind_opaque(&name, "class");
                    self.exports.push((name.clone(), ExportSource::Local(name)));
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn bind_import(&mut self, decl: &ImportDeclaration<'_>) {
        if decl.import_kind.is_type() {
            return;
        }
        let source = decl.source.value.as_str();
        let sub_path_prefix = format!("{}/", self.ctx.runtime_package);
        let from_runtime =
            source == self.ctx.runtime_package || source.starts_with(&sub_path_prefix);

        let Some(specifiers) = &decl.specifiers else {
            return;
        };
        for specifier in specifiers {
            let (local, value) = match specifier {
                ImportDeclarationSpecifier::ImportSpecifier(s) => {
                    let imported = module_export_name(&s.imported);
                    let value = if from_runtime {
                        RuntimeFn::from_name(&imported)
                            .map(JsValue::Runtime)
                            .unwrap_or_else(|| {
                                JsValue::Opaque(format!("`{}` from the runtime", imported))
                            })
                    } else {
                        JsValue::Opaque(format!("`{}` imported from \"{}\"", imported, source))
                    };
                    (s.local.name.as_str(), value)
                }
                ImportDeclarationSpecifier::ImportNamespaceSpecifier(s) => {
                    let value = if from_runtime {
                        JsValue::RuntimeNamespace
                    } else {
                        JsValue::Opaque(format!("namespace import of \"{}\"", source))
                    };
                    (s.local.name.as_str(), value)
                }
                ImportDeclarationSpecifier::ImportDefaultSpecifier(s) => (
                    s.local.name.as_str(),
                    JsValue::Opaque(format!("default import of \"{}\"", source)),
                ),
            };
            self.env.insert(local.to_string(), value);
        }
    }

    fn exec_var(&mut self, decl: &VariableDeclaration<'_>) -> Result<()> {
        for declarator in &decl.declarations {
            let value = match &declarator.init {
                Some(init) => self.eval(init)?,
                None => JsValue::Undefined,
            };
            // Destructured bindings stay unbound and read back as opaque.
            if let BindingPattern::BindingIdentifier(id) = &declarator.id {
                self.env.insert(id.name.to_string(), value);
            }
        }
        Ok(())
    }

    fn bind_opaque(&mut self, name: &str, what: &str) {
        self.env
            .insert(name.to_string(), JsValue::Opaque(format!("{} `{}`", what, name)));
    }

    fn lookup(&self, name: &str) -> JsValue {
        match self.env.get(name) {
            Some(value) => value.clone(),
            None if name == "undefined" => JsValue::Undefined,
            None => JsValue::Opaque(format!("`{}`", name)),
        }
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Expressions
    // ───────────────────────────────────────────────────────────────────────────

    fn eval(&mut self, expr: &Expression<'_>) -> Result<JsValue> {
        Ok(match expr {
            Expression::StringLiteral(s) => JsValue::String(s.value.to_string()),
            Expression::NumericLiteral(n) => JsValue::Number(n.value),
            Expression::BooleanLiteral(b) => JsValue::Bool(b.value),
            Expression::NullLiteral(_) => JsValue::Null,
            Expression::Identifier(id) => self.lookup(id.name.as_str()),
            Expression::TemplateLiteral(tpl) => self.eval_template(tpl)?,
            Expression::BinaryExpression(bin) => {
                let left = self.eval(&bin.left)?;
                let right = self.eval(&bin.right)?;
                binary(bin.operator, left, right)
            }
            Expression::UnaryExpression(unary) => {
                let argument = self.eval(&unary.argument)?;
                match (unary.operator, argument) {
                    (UnaryOperator::UnaryNegation, JsValue::Number(n)) => JsValue::Number(-n),
                    (UnaryOperator::UnaryPlus, JsValue::Number(n)) => JsValue::Number(n),
                    (UnaryOperator::LogicalNot, value) => match value.truthy() {
                        Some(b) => JsValue::Bool(!b),
                        None => JsValue::Opaque("negation".to_string()),
                    },
                    (UnaryOperator::Void, _) => JsValue::Undefined,
                    _ => JsValue::Opaque("unary expression".to_string()),
                }
            }
            Expression::LogicalExpression(logical) => {
                let left = self.eval(&logical.left)?;
                let take_left = match logical.operator {
                    LogicalOperator::Or => left.truthy(),
                    LogicalOperator::And => left.truthy().map(|b| !b),
                    LogicalOperator::Coalesce => match left {
                        JsValue::Opaque(_) => None,
                        JsValue::Undefined | JsValue::Null => Some(false),
                        _ => Some(true),
                    },
                };
                match take_left {
                    Some(true) => left,
                    Some(false) => self.eval(&logical.right)?,
                    None => JsValue::Opaque("logical expression".to_string()),
                }
            }
            Expression::ConditionalExpression(cond) => match self.eval(&cond.test)?.truthy() {
                Some(true) => self.eval(&cond.consequent)?,
                Some(false) => self.eval(&cond.alternate)?,
                None => JsValue::Opaque("conditional expression".to_string()),
            },
            Expression::ObjectExpression(obj) => {
                let mut entries = Vec::with_capacity(obj.properties.len());
                for property in &obj.properties {
                    match property {
                        ObjectPropertyKind::ObjectProperty(p) => {
                            let key = if p.computed {
                                match p.key.as_expression() {
                                    Some(key_expr) => self.eval(key_expr)?.property_key(),
                                    None => None,
                                }
                            } else {
                                p.key.static_name().map(|name| name.to_string())
                            };
                            let value = self.eval(&p.value)?;
                            let Some(key) = key else {
                                return Ok(JsValue::Opaque("object with computed key".to_string()));
                            };
                            insert_entry(&mut entries, key, value);
                        }
                        ObjectPropertyKind::SpreadProperty(spread) => {
                            match self.eval(&spread.argument)? {
                                JsValue::Object(spread_entries) => {
                                    for (k, v) in spread_entries {
                                        insert_entry(&mut entries, k, v);
                                    }
                                }
                                JsValue::Undefined | JsValue::Null => {}
                                other => {
                                    return Ok(JsValue::Opaque(format!(
                                        "spread of {}",
                                        other.describe()
                                    )))
                                }
                            }
                        }
                    }
                }
                JsValue::Object(entries)
            }
            Expression::ArrayExpression(arr) => {
                let mut items = Vec::with_capacity(arr.elements.len());
                for element in &arr.elements {
                    match element {
                        ArrayExpressionElement::SpreadElement(spread) => {
                            match self.eval(&spread.argument)? {
                                JsValue::Array(spread_items) => items.extend(spread_items),
                                other => {
                                    return Ok(JsValue::Opaque(format!(
                                        "spread of {}",
                                        other.describe()
                                    )))
                                }
                            }
                        }
                        ArrayExpressionElement::Elision(_) => items.push(JsValue::Undefined),
                        _ => match element.as_expression() {
                            Some(e) => items.push(self.eval(e)?),
                            None => items.push(JsValue::Opaque("array element".to_string())),
                        },
                    }
                }
                JsValue::Array(items)
            }
            Expression::StaticMemberExpression(member) => {
                let object = self.eval(&member.object)?;
                object.member(member.property.name.as_str())
            }
            Expression::ComputedMemberExpression(member) => {
                let object = self.eval(&member.object)?;
                match self.eval(&member.expression)?.property_key() {
                    Some(key) => object.member(&key),
                    None => JsValue::Opaque("computed member".to_string()),
                }
            }
            Expression::CallExpression(call) => self.eval_call(call)?,
            Expression::ParenthesizedExpression(p) => self.eval(&p.expression)?,
            Expression::SequenceExpression(seq) => {
                let mut last = JsValue::Undefined;
                for e in &seq.expressions {
                    last = self.eval(e)?;
                }
                last
            }
            Expression::TSAsExpression(e) => self.eval(&e.expression)?,
            Expression::TSSatisfiesExpression(e) => self.eval(&e.expression)?,
            Expression::TSNonNullExpression(e) => self.eval(&e.expression)?,
            Expression::ArrowFunctionExpression(_) | Expression::FunctionExpression(_) => {
                JsValue::Opaque("function".to_string())
            }
            _ => JsValue::Opaque("expression".to_string()),
        })
    }

    fn eval_template(&mut self, tpl: &TemplateLiteral<'_>) -> Result<JsValue> {
        let mut out = String::new();
        let mut known = true;
        for (i, quasi) in tpl.quasis.iter().enumerate() {
            match &quasi.value.cooked {
                Some(cooked) => out.push_str(cooked.as_str()),
                None => out.push_str(quasi.value.raw.as_str()),
            }
            if let Some(expr) = tpl.expressions.get(i) {
                match self.eval(expr)?.as_text() {
                    Some(text) => out.push_str(&text),
                    None => known = false,
                }
            }
        }
        Ok(if known {
            JsValue::String(out)
        } else {
            JsValue::Opaque("template literal".to_string())
        })
    }

    fn eval_call(&mut self, call: &CallExpression<'_>) -> Result<JsValue> {
        let callee = self.eval(&call.callee)?;
        let mut args = Vec::with_capacity(call.arguments.len());
        for argument in &call.arguments {
            args.push(self.eval_argument(argument)?);
        }

        match callee {
            JsValue::Runtime(func) => self.call_runtime(func, args),
            // Arguments were still evaluated so runtime calls nested in them register.
            _ => Ok(JsValue::Opaque("call result".to_string())),
        }
    }

    fn eval_argument(&mut self, argument: &Argument<'_>) -> Result<JsValue> {
        match argument.as_expression() {
            Some(expr) => self.eval(expr),
            None => Ok(JsValue::Opaque("spread argument".to_string())),
        }
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Runtime
    // ───────────────────────────────────────────────────────────────────────────

    fn call_runtime(&mut self, func: RuntimeFn, args: Vec<JsValue>) -> Result<JsValue> {
        let arg = |i: usize| args.get(i).cloned().unwrap_or(JsValue::Undefined);
        let debug_arg = |i: usize| args.get(i).and_then(JsValue::as_str).map(str::to_string);

        match func {
            RuntimeFn::SetFileScope => {
                let file = arg(0)
                    .as_str()
                    .map(str::to_string)
                    .ok_or_else(|| self.fail("setFileScope requires a file path"))?;
                let package = debug_arg(1).unwrap_or_else(|| self.ctx.package_name.clone());
                self.scopes.push(FileScope { file, package });
                Ok(JsValue::Undefined)
            }
            RuntimeFn::EndFileScope => {
                self.scopes
                    .pop()
                    .ok_or_else(|| self.fail("endFileScope called without an open file scope"))?;
                Ok(JsValue::Undefined)
            }
            RuntimeFn::Style => self.style_class(&arg(0), debug_arg(1).as_deref()),
            RuntimeFn::GlobalStyle => {
                let selector = arg(0)
                    .as_text()
                    .ok_or_else(|| self.fail("globalStyle requires a selector"))?;
                let JsValue::Object(rule) = arg(1) else {
                    return Err(self.fail(format!(
                        "globalStyle(\"{}\") expects a rule object",
                        selector
                    )));
                };
                let text = css::render_rule(&selector, &rule).map_err(|m| self.fail(m))?;
                self.append_css(text)?;
                Ok(JsValue::Undefined)
            }
            RuntimeFn::StyleVariants => {
                let JsValue::Object(variants) = arg(0) else {
                    return Err(self.fail("styleVariants expects an object of rules"));
                };
                let debug_id = debug_arg(1);
                let mut classes = Vec::with_capacity(variants.len());
                for (key, rule) in variants {
                    let variant_id = match &debug_id {
                        Some(id) => format!("{}_{}", id, key),
                        None => key.clone(),
                    };
                    let class = self.style_class(&rule, Some(variant_id.as_str()))?;
                    classes.push((key, class));
                }
                Ok(JsValue::Object(classes))
            }
            RuntimeFn::Keyframes => {
                let name = self.next_identifier(debug_arg(1).as_deref())?;
                let text = css::render_keyframes(&name, &arg(0)).map_err(|m| self.fail(m))?;
                self.append_css(text)?;
                Ok(JsValue::String(name))
            }
            RuntimeFn::FontFace => {
                let rules = match arg(0) {
                    JsValue::Array(items) => items,
                    single => vec![single],
                };
                let family = format!("\"{}\"", self.next_identifier(debug_arg(1).as_deref())?);
                for rule in &rules {
                    let text = css::render_font_face(&family, rule).map_err(|m| self.fail(m))?;
                    self.append_css(text)?;
                }
                Ok(JsValue::String(family))
            }
            RuntimeFn::CreateVar => {
                let name = self.next_identifier(debug_arg(0).as_deref())?;
                Ok(JsValue::String(format!("var(--{})", name)))
            }
        }
    }

    /// `style(rule)` or `style([className, rule, ...])`.
    fn style_class(&mut self, input: &JsValue, debug_id: Option<&str>) -> Result<JsValue> {
        let mut rule = Vec::new();
        let mut composed = Vec::new();
        self.collect_composition(input, &mut rule, &mut composed)?;

        let ident = self.next_identifier(debug_id)?;
        if !rule.is_empty() {
            let text = css::render_rule(&format!(".{}", ident), &rule).map_err(|m| self.fail(m))?;
            self.append_css(text)?;
        }

        let mut class_list = vec![ident];
        class_list.extend(composed);
        Ok(JsValue::String(class_list.join(" ")))
    }

    fn collect_composition(
        &self,
        input: &JsValue,
        rule: &mut Vec<(String, JsValue)>,
        composed: &mut Vec<String>,
    ) -> Result<()> {
        match input {
            JsValue::Object(entries) => {
                for (k, v) in entries {
                    insert_entry(rule, k.clone(), v.clone());
                }
            }
            JsValue::String(class_name) => {
                composed.extend(class_name.split_whitespace().map(str::to_string));
            }
            JsValue::Array(items) => {
                for item in items {
                    self.collect_composition(item, rule, composed)?;
                }
            }
            other => {
                return Err(self.fail(format!(
                    "style expects a rule object or class list, got {}",
                    other.describe()
                )))
            }
        }
        Ok(())
    }

    fn next_identifier(&mut self, debug_id: Option<&str>) -> Result<String> {
        let scope = self
            .scopes
            .last()
            .ok_or_else(|| self.fail("styles registered outside of a file scope"))?;
        let count = self.ref_counts.entry(scope.file.clone()).or_insert(0);
        let ident = css::generate_identifier(
            &scope.package,
            &scope.file,
            *count,
            debug_id,
            self.ctx.identifiers,
        );
        *count += 1;
        Ok(ident)
    }

    fn append_css(&mut self, text: String) -> Result<()> {
        let file = self
            .scopes
            .last()
            .map(|scope| scope.file.clone())
            .ok_or_else(|| self.fail("styles registered outside of a file scope"))?;
        match self.stylesheets.iter_mut().find(|sheet| sheet.file == file) {
            Some(sheet) => sheet.css.push_str(&text),
            None => self.stylesheets.push(FileStylesheet { file, css: text }),
        }
        Ok(())
    }
}

fn module_export_name(name: &ModuleExportName<'_>) -> String {
    match name {
        ModuleExportName::IdentifierName(id) => id.name.to_string(),
        ModuleExportName::IdentifierReference(id) => id.name.to_string(),
        ModuleExportName::StringLiteral(lit) => lit.value.to_string(),
    }
}

fn binary(operator: BinaryOperator, left: JsValue, right: JsValue) -> JsValue {
    match (operator, left, right) {
        (BinaryOperator::Addition, JsValue::Number(a), JsValue::Number(b)) => {
            JsValue::Number(a + b)
        }
        (BinaryOperator::Addition, left, right)
            if matches!(left, JsValue::String(_)) || matches!(right, JsValue::String(_)) =>
        {
            match (left.as_text(), right.as_text()) {
                (Some(a), Some(b)) => JsValue::String(a + &b),
                _ => JsValue::Opaque("string concatenation".to_string()),
            }
        }
        (BinaryOperator::Subtraction, JsValue::Number(a), JsValue::Number(b)) => {
            JsValue::Number(a - b)
        }
        (BinaryOperator::Multiplication, JsValue::Number(a), JsValue::Number(b)) => {
            JsValue::Number(a * b)
        }
        (BinaryOperator::Division, JsValue::Number(a), JsValue::Number(b)) => {
            JsValue::Number(a / b)
        }
        _ => JsValue::Opaque("binary expression".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> EvalContext {
        EvalContext {
            file_path: PathBuf::from("/proj/src/a.style.ts"),
            root: PathBuf::from("/proj"),
            out_dir: PathBuf::from("/proj/dist"),
            public_path: "/".to_string(),
            identifiers: IdentifierMode::Short,
            package_name: "proj".to_string(),
            runtime_package: "@style-extract/css".to_string(),
        }
    }

    fn eval(bundle: &str) -> Result<EvaluatedBundle> {
        StaticEvaluator.evaluate(bundle, &ctx())
    }

    const PROLOGUE: &str = r#"import { setFileScope, endFileScope } from "@style-extract/css/fileScope";
import { style, globalStyle, styleVariants, keyframes, createVar } from "@style-extract/css";
setFileScope("src/a.style.ts", "proj");
"#;

    #[test]
    fn test_style_exports_class_name() {
        let bundle = format!(
            "{}var button = style({{ color: \"red\", padding: 4 }});\nendFileScope();\nexport {{ button }};\n",
            PROLOGUE
        );
        let out = eval(&bundle).unwrap();
        assert_eq!(out.stylesheets.len(), 1);
        assert_eq!(out.stylesheets[0].file, "src/a.style.ts");

        let (name, value) = &out.exports[0];
        assert_eq!(name, "button");
        let class = value.as_str().unwrap();
        assert_eq!(
            out.stylesheets[0].css,
            format!(".{} {{\n  color: red;\n  padding: 4px;\n}}\n", class)
        );
    }

    #[test]
    fn test_values_flow_through_bindings() {
        let bundle = format!(
            r#"{}var tokens = {{ space: {{ sm: 4 }}, brand: "hotpink" }};
var base = {{ color: tokens.brand }};
var card = style({{ ...base, margin: tokens.space["sm"] * 2, border: `1px solid ${{tokens.brand}}` }});
endFileScope();
export {{ card, tokens }};
"#,
            PROLOGUE
        );
        let out = eval(&bundle).unwrap();
        let css = &out.stylesheets[0].css;
        assert!(css.contains("color: hotpink;"), "{css}");
        assert!(css.contains("margin: 8px;"), "{css}");
        assert!(css.contains("border: 1px solid hotpink;"), "{css}");
        assert_eq!(out.exports[1], ("tokens".to_string(), json!({"space": {"sm": 4}, "brand": "hotpink"})));
    }

    #[test]
    fn test_nested_file_scopes_attribute_separately() {
        let bundle = r#"import { setFileScope, endFileScope } from "@style-extract/css/fileScope";
import * as css from "@style-extract/css";
setFileScope("src/tokens.style.ts", "proj");
var accent = css.createVar();
css.globalStyle(":root", { vars: { [accent]: "blue" } });
endFileScope();
setFileScope("src/a.style.ts", "proj");
var link = css.style({ color: accent });
endFileScope();
export { link };
"#;
        let out = eval(bundle).unwrap();
        let files: Vec<_> = out.stylesheets.iter().map(|s| s.file.as_str()).collect();
        assert_eq!(files, vec!["src/tokens.style.ts", "src/a.style.ts"]);
        assert!(out.stylesheets[0].css.starts_with(":root {\n  --"));
        assert!(out.stylesheets[1].css.contains("color: var(--"));
    }

    #[test]
    fn test_variants_keyframes_and_composition() {
        let bundle = format!(
            r#"{}var fade = keyframes({{ from: {{ opacity: 0 }}, to: {{ opacity: 1 }} }});
var base = style({{ display: "flex" }});
var sizes = styleVariants({{ small: {{ padding: 2 }}, large: [base, {{ padding: 8 }}] }});
endFileScope();
export {{ fade, sizes }};
"#,
            PROLOGUE
        );
        let out = eval(&bundle).unwrap();
        let css = &out.stylesheets[0].css;
        assert!(css.starts_with("@keyframes "), "{css}");

        let sizes = &out.exports[1].1;
        let large = sizes["large"].as_str().unwrap();
        assert_eq!(large.split(' ').count(), 2, "composed class list: {large}");
        assert!(sizes["small"].as_str().unwrap().split(' ').count() == 1);
    }

    #[test]
    fn test_debug_identifiers() {
        let mut debug = ctx();
        debug.identifiers = IdentifierMode::Debug;
        let bundle = format!(
            "{}var button = style({{ color: \"red\" }}, \"button\");\nendFileScope();\nexport {{ button }};\n",
            PROLOGUE
        );
        let out = StaticEvaluator.evaluate(&bundle, &debug).unwrap();
        assert!(out.exports[0].1.as_str().unwrap().starts_with("a_button__"));
    }

    #[test]
    fn test_default_export_and_aliases() {
        let bundle = format!(
            "{}var x = style({{}});\nendFileScope();\nexport {{ x as primary }};\nexport default {{ primary: x, count: 2 }};\n",
            PROLOGUE
        );
        let out = eval(&bundle).unwrap();
        assert_eq!(out.exports[0].0, "primary");
        assert_eq!(out.exports[1].0, "default");
        assert_eq!(out.exports[1].1["count"], json!(2));
        assert!(out.stylesheets.is_empty(), "empty rules produce no css");
    }

    #[test]
    fn test_style_outside_file_scope_is_error() {
        let bundle = "import { style } from \"@style-extract/css\";\nvar a = style({ color: \"red\" });\n";
        let err = eval(bundle).unwrap_err();
        assert_eq!(err.file(), Some("src/a.style.ts"));
        assert!(err.to_string().contains("outside of a file scope"));
    }

    #[test]
    fn test_unknown_css_value_is_error() {
        let bundle = format!(
            "{}import {{ theme }} from \"./theme-runtime\";\nvar a = style({{ color: theme.brand }});\n",
            PROLOGUE
        );
        let err = eval(&bundle).unwrap_err();
        assert!(err.to_string().contains("`color`"), "{err}");
    }

    #[test]
    fn test_function_export_is_error() {
        let bundle = format!("{}endFileScope();\nexport function helper() {{ return 1; }}\n", PROLOGUE);
        let err = eval(&bundle).unwrap_err();
        assert!(err.to_string().contains("export `helper`"), "{err}");
    }

    #[test]
    fn test_bundle_without_styles() {
        let out = eval("var answer = 42;\nexport { answer };\n").unwrap();
        assert!(out.stylesheets.is_empty());
        assert_eq!(out.exports, vec![("answer".to_string(), json!(42))]);
    }

    #[test]
    fn test_logical_and_conditional() {
        let out = eval(
            "var dark = false;\nvar bg = dark ? \"black\" : \"white\";\nvar fg = undefined ?? \"gray\";\nexport { bg, fg };\n",
        )
        .unwrap();
        assert_eq!(out.exports[0].1, json!("white"));
        assert_eq!(out.exports[1].1, json!("gray"));
    }

    #[test]
    fn test_invalid_bundle_is_error() {
        let err = eval("var = ;").unwrap_err();
        assert!(matches!(err, ExtractError::Evaluate { .. }));
    }
}
