// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! The `${…}` expression sublanguage.
//!
//! A small hand-written recursive-descent parser yields an AST of tagged
//! variants, evaluated against a `Context` trait. No scripting-language
//! ambitions — a small recursive-descent evaluator, not a full scripting language.

mod ast;
mod context;
mod lexer;
mod parser;

pub use ast::{Expr, Value};
pub use context::Context;
pub use parser::parse;

use crate::errors::ExpressionError;

/// Evaluates `source` (without the `${ }` wrapper) against `ctx`.
pub fn eval(source: &str, ctx: &dyn Context) -> Result<Value, ExpressionError> {
    let expr = parse(source)?;
    expr.eval(ctx, source)
}

/// Evaluates an interpolation site: a string that may contain zero or more
/// `${…}` spans mixed with literal text. Every span is evaluated and
/// coerced to its string form; literal text passes through unchanged.
pub fn interpolate(template: &str, ctx: &dyn Context) -> Result<String, ExpressionError> {
    let mut out = String::with_capacity(template.len());
    let bytes = template.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' && bytes.get(i + 1) == Some(&b'{') {
            let start = i + 2;
            let mut depth = 1;
            let mut j = start;
            while j < bytes.len() && depth > 0 {
                match bytes[j] {
                    b'{' => depth += 1,
                    b'}' => depth -= 1,
                    _ => {}
                }
                if depth > 0 {
                    j += 1;
                }
            }
            let inner = &template[start..j];
            let value = eval(inner, ctx)?;
            out.push_str(&value.to_display_string());
            i = j + 1;
        } else {
            out.push(bytes[i] as char);
            i += 1;
        }
    }
    Ok(out)
}

/// Evaluates a `condition` field to a boolean. A non-boolean result is a
/// type error: conditions must produce a boolean, not a string.
pub fn eval_condition(source: &str, ctx: &dyn Context) -> Result<bool, ExpressionError> {
    match eval(source, ctx)? {
        Value::Bool(b) => Ok(b),
        other => Err(ExpressionError::TypeError {
            source: source.to_string(),
            message: format!("expected boolean, got {other:?}"),
        }),
    }
}
