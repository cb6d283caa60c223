//! Expression evaluation for `${{ }}` argument templates
//!
//! Supports:
//! - ${{ name }} - a per-invocation variable (input, output, cid, basename, ...)
//! - ${{ env.VAR_NAME }} - a process environment variable

use regex::Regex;
use std::sync::LazyLock;

use super::context::TemplateVars;

static EXPRESSION_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{\{\s*([^}]+?)\s*\}\}").unwrap());

/// Errors that can occur during expression evaluation
#[derive(Debug, thiserror::Error)]
pub enum ExpressionError {
    #[error("Unknown variable: {0}")]
    UnknownVariable(String),

    #[error("Invalid expression syntax: {0}")]
    InvalidSyntax(String),
}

/// Evaluate all expressions in a string
pub fn evaluate(input: &str, vars: &TemplateVars) -> Result<String, ExpressionError> {
    let mut result = String::with_capacity(input.len());
    let mut last = 0;

    for cap in EXPRESSION_REGEX.captures_iter(input) {
        let (Some(full_match), Some(expr)) = (cap.get(0), cap.get(1)) else {
            continue;
        };

        result.push_str(&input[last..full_match.start()]);
        result.push_str(&evaluate_single(expr.as_str().trim(), vars)?);
        last = full_match.end();
    }

    result.push_str(&input[last..]);
    Ok(result)
}

/// Evaluate every element of an argument list
pub fn evaluate_args(args: &[String], vars: &TemplateVars) -> Result<Vec<String>, ExpressionError> {
    args.iter().map(|arg| evaluate(arg, vars)).collect()
}

/// Evaluate a single expression (without the ${{ }} wrapper)
fn evaluate_single(expr: &str, vars: &TemplateVars) -> Result<String, ExpressionError> {
    let parts: Vec<&str> = expr.split('.').collect();

    match parts.as_slice() {
        ["env", name] => {
            std::env::var(name).map_err(|_| ExpressionError::UnknownVariable(format!("env.{}", name)))
        }
        ["env", ..] => Err(ExpressionError::InvalidSyntax(format!(
            "env expressions must be env.VAR_NAME, got: {}",
            expr
        ))),
        [name] if !name.is_empty() => vars
            .get(name)
            .cloned()
            .ok_or_else(|| ExpressionError::UnknownVariable(name.to_string())),
        _ => Err(ExpressionError::InvalidSyntax(expr.to_string())),
    }
}
