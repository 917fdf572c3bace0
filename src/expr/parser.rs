// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use crate::errors::ExpressionError;

use super::ast::{BinOpKind, Expr, Ident, UnOpKind, Value};
use super::lexer::{lex, Spanned, Token};

/// Grammar: primary expressions are dotted identifiers,
/// string/integer/boolean literals, or calls; infix `==`, `!=`, `&&`,
/// `||`; unary `!`; parentheses. `&&`/`||` share the lowest precedence
/// (left-associative), then equality, then unary/primary.
struct Parser<'a> {
    tokens: Vec<Spanned>,
    pos: usize,
    source: &'a str,
}

pub fn parse(source: &str) -> Result<Expr, ExpressionError> {
    let tokens = lex(source).map_err(|(pos, message)| ExpressionError::Parse {
        source: source.to_string(),
        pos,
        message,
    })?;
    let mut parser = Parser { tokens, pos: 0, source };
    let expr = parser.parse_or()?;
    parser.expect_eof()?;
    Ok(expr)
}

impl<'a> Parser<'a> {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos].token
    }

    fn pos_of_current(&self) -> usize {
        self.tokens[self.pos].pos
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.pos].token.clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn err(&self, message: impl Into<String>) -> ExpressionError {
        ExpressionError::Parse {
            source: self.source.to_string(),
            pos: self.pos_of_current(),
            message: message.into(),
        }
    }

    fn expect_eof(&self) -> Result<(), ExpressionError> {
        if matches!(self.peek(), Token::Eof) {
            Ok(())
        } else {
            Err(self.err(format!("unexpected trailing token {:?}", self.peek())))
        }
    }

    fn parse_or(&mut self) -> Result<Expr, ExpressionError> {
        let mut lhs = self.parse_and()?;
        while matches!(self.peek(), Token::OrOr) {
            self.advance();
            let rhs = self.parse_and()?;
            lhs = Expr::BinOp(BinOpKind::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, ExpressionError> {
        let mut lhs = self.parse_equality()?;
        while matches!(self.peek(), Token::AndAnd) {
            self.advance();
            let rhs = self.parse_equality()?;
            lhs = Expr::BinOp(BinOpKind::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_equality(&mut self) -> Result<Expr, ExpressionError> {
        let lhs = self.parse_unary()?;
        match self.peek() {
            Token::EqEq => {
                self.advance();
                let rhs = self.parse_unary()?;
                Ok(Expr::BinOp(BinOpKind::Eq, Box::new(lhs), Box::new(rhs)))
            }
            Token::NotEq => {
                self.advance();
                let rhs = self.parse_unary()?;
                Ok(Expr::BinOp(BinOpKind::NotEq, Box::new(lhs), Box::new(rhs)))
            }
            _ => Ok(lhs),
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, ExpressionError> {
        if matches!(self.peek(), Token::Bang) {
            self.advance();
            let inner = self.parse_unary()?;
            return Ok(Expr::UnOp(UnOpKind::Not, Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, ExpressionError> {
        match self.advance() {
            Token::LParen => {
                let inner = self.parse_or()?;
                if !matches!(self.advance(), Token::RParen) {
                    return Err(self.err("expected closing ')'"));
                }
                Ok(inner)
            }
            Token::Str(s) => Ok(Expr::Literal(Value::Str(s))),
            Token::Int(n) => Ok(Expr::Literal(Value::Int(n))),
            Token::Ident(first) => self.parse_ident_or_call(first),
            other => Err(self.err(format!("unexpected token {other:?}"))),
        }
    }

    fn parse_ident_or_call(&mut self, first: String) -> Result<Expr, ExpressionError> {
        let mut parts = vec![first];
        while matches!(self.peek(), Token::Dot) {
            self.advance();
            match self.advance() {
                Token::Ident(next) => parts.push(next),
                other => return Err(self.err(format!("expected identifier after '.', found {other:?}"))),
            }
        }

        if matches!(self.peek(), Token::LParen) {
            self.advance();
            let mut args = Vec::new();
            if !matches!(self.peek(), Token::RParen) {
                loop {
                    args.push(self.parse_or()?);
                    if matches!(self.peek(), Token::Comma) {
                        self.advance();
                        continue;
                    }
                    break;
                }
            }
            if !matches!(self.advance(), Token::RParen) {
                return Err(self.err("expected closing ')' in call"));
            }
            return Ok(Expr::Call(parts.join("."), args));
        }

        Ok(Expr::Ident(Ident(parts)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_dotted_identifier() {
        let expr = parse("env.BRANCH").unwrap();
        assert_eq!(expr, Expr::Ident(Ident(vec!["env".into(), "BRANCH".into()])));
    }

    #[test]
    fn parses_equality_with_string_literal() {
        let expr = parse("env.BRANCH == 'main'").unwrap();
        assert_eq!(
            expr,
            Expr::BinOp(
                BinOpKind::Eq,
                Box::new(Expr::Ident(Ident(vec!["env".into(), "BRANCH".into()]))),
                Box::new(Expr::Literal(Value::Str("main".into()))),
            )
        );
    }

    #[test]
    fn parses_call_with_arguments() {
        let expr = parse("file.exists('a.txt')").unwrap();
        assert_eq!(
            expr,
            Expr::Call("file.exists".into(), vec![Expr::Literal(Value::Str("a.txt".into()))])
        );
    }

    #[test]
    fn parses_parenthesized_negation() {
        let expr = parse("!(env.BRANCH == 'dev')").unwrap();
        assert!(matches!(expr, Expr::UnOp(UnOpKind::Not, _)));
    }

    #[test]
    fn trailing_garbage_is_a_parse_error() {
        assert!(parse("env.BRANCH ==").is_err());
        assert!(parse("env.BRANCH == 'a' extra").is_err());
    }

    #[test]
    fn and_or_are_left_associative_and_parse_multiple_terms() {
        let expr = parse("true && false || true").unwrap();
        assert!(matches!(expr, Expr::BinOp(BinOpKind::Or, _, _)));
    }
}
