// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Ident(String),
    Str(String),
    Int(i64),
    EqEq,
    NotEq,
    AndAnd,
    OrOr,
    Bang,
    LParen,
    RParen,
    Comma,
    Dot,
    Eof,
}

#[derive(Debug, Clone)]
pub struct Spanned {
    pub token: Token,
    pub pos: usize,
}

pub fn lex(source: &str) -> Result<Vec<Spanned>, (usize, String)> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        match c {
            b' ' | b'\t' | b'\n' | b'\r' => i += 1,
            b'(' => {
                tokens.push(Spanned { token: Token::LParen, pos: i });
                i += 1;
            }
            b')' => {
                tokens.push(Spanned { token: Token::RParen, pos: i });
                i += 1;
            }
            b',' => {
                tokens.push(Spanned { token: Token::Comma, pos: i });
                i += 1;
            }
            b'.' => {
                tokens.push(Spanned { token: Token::Dot, pos: i });
                i += 1;
            }
            b'!' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Spanned { token: Token::NotEq, pos: i });
                    i += 2;
                } else {
                    tokens.push(Spanned { token: Token::Bang, pos: i });
                    i += 1;
                }
            }
            b'=' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Spanned { token: Token::EqEq, pos: i });
                    i += 2;
                } else {
                    return Err((i, "expected '==', found single '='".to_string()));
                }
            }
            b'&' if bytes.get(i + 1) == Some(&b'&') => {
                tokens.push(Spanned { token: Token::AndAnd, pos: i });
                i += 2;
            }
            b'|' if bytes.get(i + 1) == Some(&b'|') => {
                tokens.push(Spanned { token: Token::OrOr, pos: i });
                i += 2;
            }
            b'\'' | b'"' => {
                let quote = c;
                let start = i + 1;
                let mut j = start;
                while j < bytes.len() && bytes[j] != quote {
                    j += 1;
                }
                if j >= bytes.len() {
                    return Err((i, "unterminated string literal".to_string()));
                }
                tokens.push(Spanned {
                    token: Token::Str(source[start..j].to_string()),
                    pos: i,
                });
                i = j + 1;
            }
            b'0'..=b'9' => {
                let start = i;
                let mut j = i;
                while j < bytes.len() && bytes[j].is_ascii_digit() {
                    j += 1;
                }
                let value: i64 = source[start..j].parse().map_err(|_| (start, "invalid integer literal".to_string()))?;
                tokens.push(Spanned { token: Token::Int(value), pos: start });
                i = j;
            }
            c if c.is_ascii_alphabetic() || c == b'_' => {
                let start = i;
                let mut j = i;
                while j < bytes.len() && (bytes[j].is_ascii_alphanumeric() || bytes[j] == b'_') {
                    j += 1;
                }
                tokens.push(Spanned {
                    token: Token::Ident(source[start..j].to_string()),
                    pos: start,
                });
                i = j;
            }
            other => {
                return Err((i, format!("unexpected character '{}'", other as char)));
            }
        }
    }
    tokens.push(Spanned { token: Token::Eof, pos: bytes.len() });
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lexes_equality_expression() {
        let tokens = lex("env.BRANCH == 'main'").unwrap();
        assert_eq!(
            tokens.iter().map(|s| s.token.clone()).collect::<Vec<_>>(),
            vec![
                Token::Ident("env".into()),
                Token::Dot,
                Token::Ident("BRANCH".into()),
                Token::EqEq,
                Token::Str("main".into()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn single_equals_is_an_error() {
        assert!(lex("a = b").is_err());
    }
}
