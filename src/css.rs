//! Rule serialization and identifier generation
//!
//! Turns evaluated rule objects into stylesheet text and mints the class,
//! keyframe, font and variable names the runtime calls hand back.

use lazy_static::lazy_static;
use sha2::{Digest, Sha256};
use std::collections::HashSet;

use crate::config::IdentifierMode;
use crate::static_eval::JsValue;
use crate::transform::{file_debug_name, sanitize_identifier};

type Entries = [(String, JsValue)];

const AT_RULE_KEYS: &[&str] = &["@media", "@supports", "@container", "@layer"];

lazy_static! {
    /// Numeric values for these properties are emitted without `px`.
    static ref UNITLESS_PROPERTIES: HashSet<&'static str> = {
        let mut s = HashSet::new();
        s.insert("animationIterationCount");
        s.insert("aspectRatio");
        s.insert("columnCount");
        s.insert("flex");
        s.insert("flexGrow");
        s.insert("flexShrink");
        s.insert("fontWeight");
        s.insert("gridColumn");
        s.insert("gridColumnEnd");
        s.insert("gridColumnStart");
        s.insert("gridRow");
        s.insert("gridRowEnd");
        s.insert("gridRowStart");
        s.insert("lineHeight");
        s.insert("opacity");
        s.insert("order");
        s.insert("orphans");
        s.insert("scale");
        s.insert("tabSize");
        s.insert("widows");
        s.insert("zIndex");
        s.insert("zoom");
        s
    };
}

// ═══════════════════════════════════════════════════════════════════════════════
// IDENTIFIERS
// ═══════════════════════════════════════════════════════════════════════════════

pub fn generate_identifier(
    package_name: &str,
    file_path: &str,
    ref_count: usize,
    debug_id: Option<&str>,
    mode: IdentifierMode,
) -> String {
    let digest = Sha256::digest(format!("{}{}", package_name, file_path).as_bytes());
    let scope_hash = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);

    let mut ident = format!("{}{}", to_base36(scope_hash as u64), to_base36(ref_count as u64));
    if ident.starts_with(|c: char| c.is_ascii_digit()) {
        ident.insert(0, '_');
    }

    match mode {
        IdentifierMode::Short => ident,
        IdentifierMode::Debug => {
            let file = file_debug_name(file_path);
            match debug_id {
                Some(id) if !id.is_empty() => {
                    format!("{}_{}__{}", file, sanitize_identifier(id), ident)
                }
                _ => format!("{}__{}", file, ident),
            }
        }
    }
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

// ═══════════════════════════════════════════════════════════════════════════════
// VALUES
// ═══════════════════════════════════════════════════════════════════════════════

pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// `backgroundColor` -> `background-color`, `WebkitTapHighlightColor` ->
/// `-webkit-tap-highlight-color`, `msFlex` -> `-ms-flex`. Custom properties pass through.
pub fn property_name(key: &str) -> String {
    if key.starts_with("--") {
        return key.to_string();
    }

    let mut out = String::with_capacity(key.len() + 4);
    if key.starts_with("ms") && key[2..].starts_with(|c: char| c.is_ascii_uppercase()) {
        out.push('-');
    }
    for c in key.chars() {
        if c.is_ascii_uppercase() {
            out.push('-');
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

fn declaration_values(key: &str, value: &JsValue) -> Result<Vec<String>, String> {
    match value {
        JsValue::Array(items) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                values.extend(declaration_values(key, item)?);
            }
            Ok(values)
        }
        JsValue::Number(n) => {
            let unitless = *n == 0.0 || key.starts_with("--") || UNITLESS_PROPERTIES.contains(key);
            Ok(vec![if unitless {
                format_number(*n)
            } else {
                format!("{}px", format_number(*n))
            }])
        }
        other => other
            .as_text()
            .map(|text| vec![text])
            .ok_or_else(|| {
                format!(
                    "value for `{}` is not statically known ({})",
                    key,
                    other.describe()
                )
            }),
    }
}

fn var_name(key: &str) -> String {
    key.strip_prefix("var(")
        .and_then(|inner| inner.strip_suffix(')'))
        .unwrap_or(key)
        .to_string()
}

fn entries<'v>(value: &'v JsValue, what: &str) -> Result<&'v Entries, String> {
    match value {
        JsValue::Object(entries) => Ok(entries),
        other => Err(format!("{} must be an object, got {}", what, other.describe())),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RULES
// ═══════════════════════════════════════════════════════════════════════════════

pub fn render_rule(selector: &str, rule: &Entries) -> Result<String, String> {
    let mut blocks = Vec::new();
    render_rule_into(selector, rule, 0, &mut blocks)?;
    Ok(join_blocks(blocks))
}

fn render_rule_into(
    selector: &str,
    rule: &Entries,
    indent: usize,
    out: &mut Vec<String>,
) -> Result<(), String> {
    let mut declarations = Vec::new();
    let mut nested: Vec<(String, &Entries)> = Vec::new();
    let mut at_rules: Vec<(String, &Entries)> = Vec::new();

    for (key, value) in rule {
        match key.as_str() {
            "selectors" => {
                for (sel, sub) in entries(value, "`selectors`")? {
                    nested.push((sel.replace('&', selector), entries(sub, sel)?));
                }
            }
            "vars" => {
                for (name, v) in entries(value, "`vars`")? {
                    for text in declaration_values(name, v)? {
                        declarations.push(format!("{}: {}", var_name(name), text));
                    }
                }
            }
            k if AT_RULE_KEYS.contains(&k) => {
                for (query, sub) in entries(value, k)? {
                    at_rules.push((format!("{} {}", k, query), entries(sub, query)?));
                }
            }
            _ => {
                for text in declaration_values(key, value)? {
                    declarations.push(format!("{}: {}", property_name(key), text));
                }
            }
        }
    }

    if !declarations.is_empty() {
        out.push(block(selector, &declarations, indent));
    }
    for (sel, sub) in nested {
        render_rule_into(&sel, sub, indent, out)?;
    }
    for (at_rule, sub) in at_rules {
        let mut inner = Vec::new();
        render_rule_into(selector, sub, indent + 1, &mut inner)?;
        if !inner.is_empty() {
            let pad = "  ".repeat(indent);
            out.push(format!("{pad}{} {{\n{}\n{pad}}}", at_rule, inner.join("\n")));
        }
    }

    Ok(())
}

fn block(selector: &str, declarations: &[String], indent: usize) -> String {
    let pad = "  ".repeat(indent);
    let mut s = format!("{pad}{} {{\n", selector);
    for decl in declarations {
        s.push_str(&format!("{pad}  {};\n", decl));
    }
    s.push_str(&format!("{pad}}}"));
    s
}

fn join_blocks(blocks: Vec<String>) -> String {
    if blocks.is_empty() {
        return String::new();
    }
    let mut s = blocks.join("\n");
    s.push('\n');
    s
}

pub fn render_keyframes(name: &str, frames: &JsValue) -> Result<String, String> {
    let mut inner = Vec::new();
    for (step, rule) in entries(frames, "keyframes")? {
        render_rule_into(step, entries(rule, step)?, 1, &mut inner)?;
    }
    Ok(format!("@keyframes {} {{\n{}\n}}\n", name, inner.join("\n")))
}

pub fn render_font_face(family: &str, rule: &JsValue) -> Result<String, String> {
    let mut declarations = vec![format!("font-family: {}", family)];
    for (key, value) in entries(rule, "fontFace rule")? {
        for text in declaration_values(key, value)? {
            declarations.push(format!("{}: {}", property_name(key), text));
        }
    }
    Ok(join_blocks(vec![block("@font-face", &declarations, 0)]))
}
