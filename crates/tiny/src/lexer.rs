//! Byte-stream lexer.
//!
//! Ported from `GetToken` in `tiny.c`: single-byte peek/advance over the
//! source, one byte of look-ahead carried between calls to `next_token`,
//! `//` line comments, and the literal escape tables for char and string
//! literals.

use crate::error::{CompileError, SourceLoc};

/// Default cap on an identifier/number/string literal's raw length before
/// it's considered a compile error (`TokenBuffer`'s `MAX_TOK_LEN` in the C
/// source, default 64).
pub const MAX_TOKEN_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Ident(String),
    Number(f64),
    Str(String),

    Func,
    If,
    Else,
    While,
    For,
    Return,
    True,
    False,
    Null,
    Not,
    And,
    Or,

    Declare,      // :=
    DeclareConst, // ::
    PlusEqual,
    MinusEqual,
    MulEqual,
    DivEqual,
    ModEqual,
    OrEqual,
    AndEqual,
    Equals,    // ==
    NotEquals, // !=
    Lte,
    Gte,

    // Single-character operators/punctuation, carried as their byte value.
    Char(u8),

    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
}

pub struct Lexer<'a> {
    file: String,
    bytes: &'a [u8],
    pos: usize,
    line: usize,
    /// One byte of look-ahead, mirroring the C lexer's `static int last`.
    /// Reset per `Lexer::new` call so independent compilations never leak
    /// state into each other.
    last: Option<u8>,
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_ident_continue(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

impl<'a> Lexer<'a> {
    pub fn new(file: impl Into<String>, source: &'a [u8]) -> Lexer<'a> {
        let mut lexer = Lexer {
            file: file.into(),
            bytes: source,
            pos: 0,
            line: 1,
            last: None,
        };
        lexer.last = lexer.getc();
        lexer
    }

    fn loc(&self) -> SourceLoc {
        SourceLoc::new(self.file.clone(), self.line)
    }

    fn err(&self, source: &str, message: impl Into<String>) -> CompileError {
        CompileError::new(source, self.loc(), message)
    }

    fn getc(&mut self) -> Option<u8> {
        if self.pos >= self.bytes.len() {
            return None;
        }
        let b = self.bytes[self.pos];
        self.pos += 1;
        Some(b)
    }

    fn peekc(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn advance(&mut self) {
        self.last = self.getc();
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            while let Some(b) = self.last {
                if b == b'\n' {
                    self.line += 1;
                    self.advance();
                } else if b.is_ascii_whitespace() {
                    self.advance();
                } else {
                    break;
                }
            }

            if self.last == Some(b'/') && self.peekc() == Some(b'/') {
                while self.last.is_some() && self.last != Some(b'\n') {
                    self.advance();
                }
                continue;
            }

            break;
        }
    }

    fn two_char(&mut self, second: u8, kind: TokenKind) -> Option<TokenKind> {
        if self.peekc() == Some(second) {
            self.advance();
            self.advance();
            Some(kind)
        } else {
            None
        }
    }

    fn escape_byte(b: u8) -> Option<u8> {
        Some(match b {
            b'n' => b'\n',
            b'r' => b'\r',
            b't' => b'\t',
            b'b' => 0x08,
            b'a' => 0x07,
            b'v' => 0x0b,
            b'f' => 0x0c,
            b'\\' => b'\\',
            b'\'' => b'\'',
            b'"' => b'"',
            _ => return None,
        })
    }

    /// Reads the next token, mutating the lexer's internal look-ahead.
    pub fn next_token(&mut self, source: &str) -> Result<Token, CompileError> {
        self.skip_whitespace_and_comments();
        let line = self.line;

        let Some(b) = self.last else {
            return Ok(Token {
                kind: TokenKind::Eof,
                line,
            });
        };

        if is_ident_start(b) {
            let mut buf = Vec::new();
            while let Some(b) = self.last {
                if !is_ident_continue(b) {
                    break;
                }
                if buf.len() >= MAX_TOKEN_LEN - 1 {
                    return Err(self.err(source, "Token was too long!"));
                }
                buf.push(b);
                self.advance();
            }
            let word = String::from_utf8_lossy(&buf).into_owned();
            let kind = match word.as_str() {
                "func" => TokenKind::Func,
                "if" => TokenKind::If,
                "else" => TokenKind::Else,
                "while" => TokenKind::While,
                "for" => TokenKind::For,
                "return" => TokenKind::Return,
                "true" => TokenKind::True,
                "false" => TokenKind::False,
                "null" => TokenKind::Null,
                "not" => TokenKind::Not,
                "and" => TokenKind::And,
                "or" => TokenKind::Or,
                _ => TokenKind::Ident(word),
            };
            return Ok(Token { kind, line });
        }

        if b.is_ascii_digit() {
            let mut buf = Vec::new();
            while let Some(b) = self.last {
                if !(b.is_ascii_digit() || b == b'.') {
                    break;
                }
                if buf.len() >= MAX_TOKEN_LEN - 1 {
                    return Err(self.err(source, "Number was too long!"));
                }
                buf.push(b);
                self.advance();
            }
            let text = String::from_utf8_lossy(&buf).into_owned();
            let value: f64 = text.parse().unwrap_or(0.0);
            return Ok(Token {
                kind: TokenKind::Number(value),
                line,
            });
        }

        if b == b'\'' {
            self.advance();
            let Some(mut c) = self.last else {
                return Err(self.err(source, "Unexpected end of input in character literal."));
            };
            if c == b'\\' {
                self.advance();
                let Some(escaped) = self.last else {
                    return Err(self.err(source, "Unexpected end of input in character literal."));
                };
                // An unrecognized escape falls through to the escaped byte
                // itself, matching tiny.c's GetToken (only the listed cases
                // reassign `last`).
                c = Self::escape_byte(escaped).unwrap_or(escaped);
            }
            self.advance();
            if self.last != Some(b'\'') {
                return Err(self.err(source, "Expected ' to follow previous '."));
            }
            self.advance();
            return Ok(Token {
                kind: TokenKind::Number(c as f64),
                line,
            });
        }

        if b == b'"' {
            self.advance();
            let mut buf = Vec::new();
            loop {
                let Some(mut c) = self.last else {
                    return Err(self.err(source, "Unexpected end of input in string literal."));
                };
                if c == b'"' {
                    break;
                }
                if c == b'\\' {
                    self.advance();
                    let Some(escaped) = self.last else {
                        return Err(self.err(source, "Unexpected end of input in string literal."));
                    };
                    if let Some(mapped) = Self::escape_byte(escaped) {
                        c = mapped;
                    } else if escaped.is_ascii_digit() {
                        let n1 = escaped - b'0';
                        self.advance();
                        let Some(d2) = self.last else {
                            return Err(self.err(
                                source,
                                "Expected three digits in octal escape sequence but only got one.",
                            ));
                        };
                        if !d2.is_ascii_digit() {
                            return Err(self.err(
                                source,
                                "Expected three digits in octal escape sequence but only got one.",
                            ));
                        }
                        let n2 = d2 - b'0';
                        self.advance();
                        let Some(d3) = self.last else {
                            return Err(self.err(
                                source,
                                "Expected three digits in octal escape sequence but only got two.",
                            ));
                        };
                        if !d3.is_ascii_digit() {
                            return Err(self.err(
                                source,
                                "Expected three digits in octal escape sequence but only got two.",
                            ));
                        }
                        let n3 = d3 - b'0';
                        c = n3
                            .wrapping_add(n2.wrapping_mul(8))
                            .wrapping_add(n1.wrapping_mul(64));
                    } else {
                        return Err(self.err(
                            source,
                            format!("Unsupported escape sequence '\\{}'.", escaped as char),
                        ));
                    }
                }
                if buf.len() >= MAX_TOKEN_LEN - 1 {
                    return Err(self.err(source, "Token was too long!"));
                }
                buf.push(c);
                self.advance();
            }
            self.advance(); // consume closing quote
            let text = String::from_utf8_lossy(&buf).into_owned();
            return Ok(Token {
                kind: TokenKind::Str(text),
                line,
            });
        }

        let kind = match b {
            b'=' => self
                .two_char(b'=', TokenKind::Equals)
                .unwrap_or_else(|| self.single(b'=')),
            b'!' => match self.two_char(b'=', TokenKind::NotEquals) {
                Some(k) => k,
                None => return Err(self.err(source, "Expected '=' to follow '!'.")),
            },
            b'<' => self
                .two_char(b'=', TokenKind::Lte)
                .unwrap_or_else(|| self.single(b'<')),
            b'>' => self
                .two_char(b'=', TokenKind::Gte)
                .unwrap_or_else(|| self.single(b'>')),
            b':' => {
                if self.peekc() == Some(b'=') {
                    self.advance();
                    self.advance();
                    TokenKind::Declare
                } else if self.peekc() == Some(b':') {
                    self.advance();
                    self.advance();
                    TokenKind::DeclareConst
                } else {
                    self.single(b':')
                }
            }
            b'+' => self
                .two_char(b'=', TokenKind::PlusEqual)
                .unwrap_or_else(|| self.single(b'+')),
            b'-' => self
                .two_char(b'=', TokenKind::MinusEqual)
                .unwrap_or_else(|| self.single(b'-')),
            b'*' => self
                .two_char(b'=', TokenKind::MulEqual)
                .unwrap_or_else(|| self.single(b'*')),
            b'/' => self
                .two_char(b'=', TokenKind::DivEqual)
                .unwrap_or_else(|| self.single(b'/')),
            b'%' => self
                .two_char(b'=', TokenKind::ModEqual)
                .unwrap_or_else(|| self.single(b'%')),
            b'&' => self
                .two_char(b'=', TokenKind::AndEqual)
                .unwrap_or_else(|| self.single(b'&')),
            b'|' => self
                .two_char(b'=', TokenKind::OrEqual)
                .unwrap_or_else(|| self.single(b'|')),
            other => self.single(other),
        };

        Ok(Token { kind, line })
    }

    fn single(&mut self, byte: u8) -> TokenKind {
        self.advance();
        TokenKind::Char(byte)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex_all(src: &str) -> Vec<TokenKind> {
        let mut lexer = Lexer::new("test", src.as_bytes());
        let mut out = Vec::new();
        loop {
            let tok = lexer.next_token(src).unwrap();
            let done = tok.kind == TokenKind::Eof;
            out.push(tok.kind);
            if done {
                break;
            }
        }
        out
    }

    #[test]
    fn keywords_and_identifiers() {
        let toks = lex_all("func notfunc if");
        assert_eq!(
            toks,
            vec![
                TokenKind::Func,
                TokenKind::Ident("notfunc".into()),
                TokenKind::If,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn two_char_operators() {
        let toks = lex_all(":= :: += == <=");
        assert_eq!(
            toks,
            vec![
                TokenKind::Declare,
                TokenKind::DeclareConst,
                TokenKind::PlusEqual,
                TokenKind::Equals,
                TokenKind::Lte,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn line_comment_is_skipped() {
        let toks = lex_all("1 // two\n3");
        assert_eq!(
            toks,
            vec![
                TokenKind::Number(1.0),
                TokenKind::Number(3.0),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn string_escapes_and_octal() {
        let toks = lex_all(r#""a\nb\101""#);
        assert_eq!(toks[0], TokenKind::Str("a\nbA".to_string()));
    }

    #[test]
    fn char_literal_is_a_number() {
        let toks = lex_all(r"'a' '\n'");
        assert_eq!(toks[0], TokenKind::Number(b'a' as f64));
        assert_eq!(toks[1], TokenKind::Number(b'\n' as f64));
    }

    #[test]
    fn unterminated_octal_escape_is_an_error() {
        let src = r#""\1""#;
        let mut lexer = Lexer::new("test", src.as_bytes());
        let err = lexer.next_token(src).unwrap_err();
        assert!(err.message.contains("only got one"));
    }
}
