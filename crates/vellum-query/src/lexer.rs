//! SQL lexer.
//!
//! Byte-level scanner producing a token stream; `memchr` accelerates the
//! string-literal fast path. Offsets are byte positions into the source,
//! used for error reporting.

use memchr::memchr;
use vellum_error::{Result, VellumError};

/// Token kinds produced by the lexer.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// Identifier or keyword (unquoted word).
    Ident(String),
    Integer(i64),
    Float(f64),
    /// Single-quoted string literal, quotes stripped and unescaped.
    Str(String),
    /// One of `( ) , . * = < > ! ; + -` or the two-char `<= >= <> !=`.
    Punct(&'static str),
    Eof,
}

/// A token plus its byte offset.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub offset: usize,
}

impl Token {
    /// Keyword check, case-insensitive.
    #[must_use]
    pub fn is_keyword(&self, kw: &str) -> bool {
        matches!(&self.kind, TokenKind::Ident(s) if s.eq_ignore_ascii_case(kw))
    }

    #[must_use]
    pub fn text(&self) -> String {
        match &self.kind {
            TokenKind::Ident(s) | TokenKind::Str(s) => s.clone(),
            TokenKind::Integer(i) => i.to_string(),
            TokenKind::Float(f) => f.to_string(),
            TokenKind::Punct(p) => (*p).to_owned(),
            TokenKind::Eof => String::new(),
        }
    }
}

/// Tokenize the whole input.
pub fn tokenize(src: &str) -> Result<Vec<Token>> {
    let bytes = src.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0usize;
    while pos < bytes.len() {
        let c = bytes[pos];
        if c.is_ascii_whitespace() {
            pos += 1;
            continue;
        }
        let start = pos;
        match c {
            b'\'' => {
                let mut value = String::new();
                pos += 1;
                loop {
                    let Some(quote) = memchr(b'\'', &bytes[pos..]) else {
                        return Err(VellumError::ParseSql {
                            token: "'".to_owned(),
                            offset: start,
                            detail: "unterminated string literal".to_owned(),
                        });
                    };
                    value.push_str(&src[pos..pos + quote]);
                    pos += quote + 1;
                    // Doubled quote is an escaped quote.
                    if bytes.get(pos) == Some(&b'\'') {
                        value.push('\'');
                        pos += 1;
                    } else {
                        break;
                    }
                }
                tokens.push(Token {
                    kind: TokenKind::Str(value),
                    offset: start,
                });
            }
            b'"' => {
                // Double-quoted identifier (e.g. composite "a+b").
                let Some(quote) = memchr(b'"', &bytes[pos + 1..]) else {
                    return Err(VellumError::ParseSql {
                        token: "\"".to_owned(),
                        offset: start,
                        detail: "unterminated quoted identifier".to_owned(),
                    });
                };
                let name = &src[pos + 1..pos + 1 + quote];
                tokens.push(Token {
                    kind: TokenKind::Ident(name.to_owned()),
                    offset: start,
                });
                pos += quote + 2;
            }
            b'0'..=b'9' => {
                let mut end = pos;
                let mut is_float = false;
                while end < bytes.len() {
                    match bytes[end] {
                        b'0'..=b'9' => end += 1,
                        b'.' if !is_float
                            && bytes.get(end + 1).is_some_and(u8::is_ascii_digit) =>
                        {
                            is_float = true;
                            end += 1;
                        }
                        b'e' | b'E' if end > pos => {
                            is_float = true;
                            end += 1;
                            if matches!(bytes.get(end), Some(b'+') | Some(b'-')) {
                                end += 1;
                            }
                        }
                        _ => break,
                    }
                }
                let text = &src[pos..end];
                let kind = if is_float {
                    TokenKind::Float(text.parse().map_err(|_| bad_number(text, start))?)
                } else {
                    TokenKind::Integer(text.parse().map_err(|_| bad_number(text, start))?)
                };
                tokens.push(Token { kind, offset: start });
                pos = end;
            }
            b'<' => {
                let (p, w) = match bytes.get(pos + 1) {
                    Some(b'=') => ("<=", 2),
                    Some(b'>') => ("<>", 2),
                    _ => ("<", 1),
                };
                tokens.push(Token {
                    kind: TokenKind::Punct(p),
                    offset: start,
                });
                pos += w;
            }
            b'>' => {
                let (p, w) = if bytes.get(pos + 1) == Some(&b'=') {
                    (">=", 2)
                } else {
                    (">", 1)
                };
                tokens.push(Token {
                    kind: TokenKind::Punct(p),
                    offset: start,
                });
                pos += w;
            }
            b'!' => {
                if bytes.get(pos + 1) == Some(&b'=') {
                    tokens.push(Token {
                        kind: TokenKind::Punct("!="),
                        offset: start,
                    });
                    pos += 2;
                } else {
                    return Err(VellumError::ParseSql {
                        token: "!".to_owned(),
                        offset: start,
                        detail: "expected '!='".to_owned(),
                    });
                }
            }
            b'(' | b')' | b',' | b'*' | b'=' | b';' | b'+' | b'-' | b'.' => {
                let p = match c {
                    b'(' => "(",
                    b')' => ")",
                    b',' => ",",
                    b'*' => "*",
                    b'=' => "=",
                    b';' => ";",
                    b'+' => "+",
                    b'-' => "-",
                    _ => ".",
                };
                tokens.push(Token {
                    kind: TokenKind::Punct(p),
                    offset: start,
                });
                pos += 1;
            }
            _ if c.is_ascii_alphabetic() || c == b'_' || c >= 0x80 => {
                let mut end = pos;
                while end < bytes.len() {
                    let b = bytes[end];
                    if b.is_ascii_alphanumeric() || b == b'_' || b >= 0x80 {
                        end += 1;
                    } else {
                        break;
                    }
                }
                tokens.push(Token {
                    kind: TokenKind::Ident(src[pos..end].to_owned()),
                    offset: start,
                });
                pos = end;
            }
            other => {
                return Err(VellumError::ParseSql {
                    token: (other as char).to_string(),
                    offset: start,
                    detail: "unexpected character".to_owned(),
                });
            }
        }
    }
    tokens.push(Token {
        kind: TokenKind::Eof,
        offset: bytes.len(),
    });
    Ok(tokens)
}

fn bad_number(text: &str, offset: usize) -> VellumError {
    VellumError::ParseSql {
        token: text.to_owned(),
        offset,
        detail: "malformed numeric literal".to_owned(),
    }
}
