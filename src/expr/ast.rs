// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use crate::errors::ExpressionError;

use super::context::Context;

/// The value an expression evaluates to.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    Int(i64),
    Bool(bool),
}

impl Value {
    pub fn to_display_string(&self) -> String {
        match self {
            Value::Str(s) => s.clone(),
            Value::Int(i) => i.to_string(),
            Value::Bool(b) => b.to_string(),
        }
    }

    fn as_bool(&self, source: &str) -> Result<bool, ExpressionError> {
        match self {
            Value::Bool(b) => Ok(*b),
            other => Err(ExpressionError::TypeError {
                source: source.to_string(),
                message: format!("expected boolean, got {other:?}"),
            }),
        }
    }
}

/// Dotted namespace access, e.g. `env.BRANCH` or `platform.is_linux`.
#[derive(Debug, Clone, PartialEq)]
pub struct Ident(pub Vec<String>);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOpKind {
    Eq,
    NotEq,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOpKind {
    Not,
}

/// The expression AST: tagged variants for literal, identifier, binary op,
/// unary op, and call nodes.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Ident(Ident),
    BinOp(BinOpKind, Box<Expr>, Box<Expr>),
    UnOp(UnOpKind, Box<Expr>),
    Call(String, Vec<Expr>),
}

impl Expr {
    pub fn eval(&self, ctx: &dyn Context, source: &str) -> Result<Value, ExpressionError> {
        match self {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Ident(ident) => eval_ident(ident, ctx, source),
            Expr::UnOp(UnOpKind::Not, inner) => {
                let v = inner.eval(ctx, source)?.as_bool(source)?;
                Ok(Value::Bool(!v))
            }
            Expr::BinOp(BinOpKind::And, lhs, rhs) => {
                let l = lhs.eval(ctx, source)?.as_bool(source)?;
                if !l {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(rhs.eval(ctx, source)?.as_bool(source)?))
            }
            Expr::BinOp(BinOpKind::Or, lhs, rhs) => {
                let l = lhs.eval(ctx, source)?.as_bool(source)?;
                if l {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(rhs.eval(ctx, source)?.as_bool(source)?))
            }
            Expr::BinOp(BinOpKind::Eq, lhs, rhs) => {
                let l = lhs.eval(ctx, source)?;
                let r = rhs.eval(ctx, source)?;
                Ok(Value::Bool(l == r))
            }
            Expr::BinOp(BinOpKind::NotEq, lhs, rhs) => {
                let l = lhs.eval(ctx, source)?;
                let r = rhs.eval(ctx, source)?;
                Ok(Value::Bool(l != r))
            }
            Expr::Call(name, args) => eval_call(name, args, ctx, source),
        }
    }
}

fn eval_ident(ident: &Ident, ctx: &dyn Context, source: &str) -> Result<Value, ExpressionError> {
    let parts: Vec<&str> = ident.0.iter().map(String::as_str).collect();
    match parts.as_slice() {
        ["platform", "os"] => Ok(Value::Str(ctx.platform_os().to_string())),
        ["platform", "is_linux"] => Ok(Value::Bool(ctx.platform_os() == "linux")),
        ["platform", "is_macos"] => Ok(Value::Bool(ctx.platform_os() == "macos")),
        ["platform", "is_windows"] => Ok(Value::Bool(ctx.platform_os() == "windows")),
        ["arch", "name"] => Ok(Value::Str(ctx.arch_name().to_string())),
        ["arch", "is_x86_64"] => Ok(Value::Bool(ctx.arch_name() == "x86_64")),
        ["arch", "is_aarch64"] => Ok(Value::Bool(ctx.arch_name() == "aarch64")),
        ["env", name] => ctx.env(name).map(Value::Str).ok_or_else(|| unresolved(source, name)),
        ["matrix", key] => ctx
            .matrix(key)
            .map(Value::Str)
            .ok_or_else(|| unresolved(source, key)),
        ["true"] => Ok(Value::Bool(true)),
        ["false"] => Ok(Value::Bool(false)),
        _ => Err(unresolved(source, &ident.0.join("."))),
    }
}

fn eval_call(name: &str, args: &[Expr], ctx: &dyn Context, source: &str) -> Result<Value, ExpressionError> {
    let mut strings = Vec::with_capacity(args.len());
    for arg in args {
        strings.push(arg.eval(ctx, source)?.to_display_string());
    }
    match name {
        "file.exists" => Ok(Value::Bool(ctx.file_exists(arg(&strings, 0, source)?))),
        "file.hash" => Ok(Value::Str(ctx.file_hash(arg(&strings, 0, source)?)?)),
        "file.newer" => Ok(Value::Bool(ctx.file_newer(arg(&strings, 0, source)?, arg(&strings, 1, source)?))),
        "shell" => Ok(Value::Str(ctx.shell(arg(&strings, 0, source)?)?)),
        "semver" => Ok(Value::Bool(ctx.semver_satisfies(arg(&strings, 0, source)?, arg(&strings, 1, source)?))),
        "task.status" => ctx
            .task_status(arg(&strings, 0, source)?)
            .map(Value::Str)
            .ok_or_else(|| unresolved(source, "task.status")),
        "task.output" => ctx
            .task_output(arg(&strings, 0, source)?)
            .map(Value::Str)
            .ok_or_else(|| unresolved(source, "task.output")),
        other => Err(ExpressionError::UnresolvedIdentifier {
            source: source.to_string(),
            identifier: other.to_string(),
        }),
    }
}

fn arg<'a>(args: &'a [String], index: usize, source: &str) -> Result<&'a str, ExpressionError> {
    args.get(index).map(String::as_str).ok_or_else(|| ExpressionError::TypeError {
        source: source.to_string(),
        message: format!("missing argument {index}"),
    })
}

fn unresolved(source: &str, identifier: &str) -> ExpressionError {
    ExpressionError::UnresolvedIdentifier {
        source: source.to_string(),
        identifier: identifier.to_string(),
    }
}
