// Copyright (c) 2023 Hemashushu <hippospark@gmail.com>, All rights reserved.
//
// This Source Code Form is subject to the terms of
// the Mozilla Public License version 2.0 and additional exceptions,
// more details in file LICENSE and CONTRIBUTING.

// token types:
//
// - identifier:
//   '$' + /a-zA-Z0-9_/+, should not start with a number, e.g.
//   $main, $loop_1, $table
// - symbol:
//   /a-zA-Z0-9_/+, should not start with a number, e.g.
//   module, local_get, br_true, load8_u
// - number: decimal and hexadecimal integers, '_' separators allowed,
//   an optional leading '-', e.g.
//   211, -4, 0x11, 0x11_22
// - bytes:
//   a char sequence surrounded by char 'b' and double quotes, two hex
//   digits per byte, separator chars / -\t\r\n/ are allowed, e.g.
//   b"0011aabb", b"00 11 AA BB", b"00-11-aa-bb"
// - line comment: from the double semicolon to the end of the line, e.g.
//   ;; comment

use std::iter::Peekable;
use std::str::Chars;

use embedvm_types::CompileError;

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Token {
    LeftParen,
    RightParen,
    Identifier(String),
    Symbol(String),
    Number(i32),
    Bytes(Vec<u8>),
}

/// a token together with the 1-based source line it starts on.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Located {
    pub token: Token,
    pub line: usize,
}

struct Lexer<'a> {
    chars: Peekable<Chars<'a>>,
    line: usize,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            chars: source.chars().peekable(),
            line: 1,
        }
    }

    fn next_char(&mut self) -> Option<char> {
        let ch = self.chars.next();
        if ch == Some('\n') {
            self.line += 1;
        }
        ch
    }

    fn error(&self, message: &str) -> CompileError {
        CompileError::new(&format!("line {}: {}", self.line, message))
    }
}

pub fn lex(source: &str) -> Result<Vec<Located>, CompileError> {
    let mut lexer = Lexer::new(source);
    let mut tokens = vec![];

    while let Some(&ch) = lexer.chars.peek() {
        match ch {
            ' ' | '\t' | '\r' | '\n' => {
                lexer.next_char();
            }
            ';' => {
                lexer.next_char();
                if lexer.chars.peek() != Some(&';') {
                    return Err(lexer.error("expected \";;\" to start a comment"));
                }
                while let Some(ch) = lexer.next_char() {
                    if ch == '\n' {
                        break;
                    }
                }
            }
            '(' => {
                tokens.push(Located {
                    token: Token::LeftParen,
                    line: lexer.line,
                });
                lexer.next_char();
            }
            ')' => {
                tokens.push(Located {
                    token: Token::RightParen,
                    line: lexer.line,
                });
                lexer.next_char();
            }
            '$' => {
                let line = lexer.line;
                lexer.next_char();
                let name = lex_name(&mut lexer)?;
                tokens.push(Located {
                    token: Token::Identifier(name),
                    line,
                });
            }
            '-' | '0'..='9' => {
                let line = lexer.line;
                let number = lex_number(&mut lexer)?;
                tokens.push(Located {
                    token: Token::Number(number),
                    line,
                });
            }
            'b' if is_bytes_literal(&mut lexer.chars) => {
                let line = lexer.line;
                lexer.next_char(); // 'b'
                lexer.next_char(); // '"'
                let bytes = lex_bytes(&mut lexer)?;
                tokens.push(Located {
                    token: Token::Bytes(bytes),
                    line,
                });
            }
            'a'..='z' | 'A'..='Z' | '_' => {
                let line = lexer.line;
                let name = lex_name(&mut lexer)?;
                tokens.push(Located {
                    token: Token::Symbol(name),
                    line,
                });
            }
            _ => {
                return Err(lexer.error(&format!("unexpected char '{}'", ch)));
            }
        }
    }

    Ok(tokens)
}

// a single char of lookahead is not enough to tell the symbol `bury`
// from the bytes literal `b"..."`, so clone the iterator and peek twice.
fn is_bytes_literal(chars: &mut Peekable<Chars<'_>>) -> bool {
    let mut ahead = chars.clone();
    ahead.next();
    ahead.peek() == Some(&'"')
}

fn lex_name(lexer: &mut Lexer) -> Result<String, CompileError> {
    let mut name = String::new();

    while let Some(&ch) = lexer.chars.peek() {
        match ch {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '_' => {
                name.push(ch);
                lexer.next_char();
            }
            _ => break,
        }
    }

    if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) {
        return Err(lexer.error("invalid name"));
    }

    Ok(name)
}

fn lex_number(lexer: &mut Lexer) -> Result<i32, CompileError> {
    let mut negative = false;
    if lexer.chars.peek() == Some(&'-') {
        negative = true;
        lexer.next_char();
    }

    let mut digits = String::new();
    let mut hex = false;

    if lexer.chars.peek() == Some(&'0') {
        digits.push('0');
        lexer.next_char();
        if lexer.chars.peek() == Some(&'x') {
            hex = true;
            digits.clear();
            lexer.next_char();
        }
    }

    while let Some(&ch) = lexer.chars.peek() {
        match ch {
            '0'..='9' => {
                digits.push(ch);
                lexer.next_char();
            }
            'a'..='f' | 'A'..='F' if hex => {
                digits.push(ch);
                lexer.next_char();
            }
            '_' => {
                lexer.next_char();
            }
            _ => break,
        }
    }

    if digits.is_empty() {
        return Err(lexer.error("invalid number"));
    }

    let radix = if hex { 16 } else { 10 };
    let value = i64::from_str_radix(&digits, radix)
        .map_err(|_| lexer.error(&format!("invalid number \"{}\"", digits)))?;
    let value = if negative { -value } else { value };

    if !(-0x8000..=0xffff).contains(&value) {
        return Err(lexer.error(&format!("number {} out of the 16-bit range", value)));
    }

    Ok(value as i32)
}

fn lex_bytes(lexer: &mut Lexer) -> Result<Vec<u8>, CompileError> {
    let mut bytes = vec![];
    let mut pending: Option<u8> = None;

    loop {
        let ch = match lexer.next_char() {
            Some(ch) => ch,
            None => return Err(lexer.error("unterminated bytes literal")),
        };

        match ch {
            '"' => break,
            ' ' | '\t' | '\r' | '\n' | '-' => {
                if pending.is_some() {
                    return Err(lexer.error("incomplete byte in bytes literal"));
                }
            }
            _ => {
                let digit = ch
                    .to_digit(16)
                    .ok_or_else(|| lexer.error(&format!("invalid hex digit '{}'", ch)))?
                    as u8;
                match pending.take() {
                    Some(high) => bytes.push((high << 4) | digit),
                    None => pending = Some(digit),
                }
            }
        }
    }

    if pending.is_some() {
        return Err(lexer.error("odd number of hex digits in bytes literal"));
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{lex, Token};

    fn tokens_from_str(s: &str) -> Vec<Token> {
        lex(s).unwrap().into_iter().map(|t| t.token).collect()
    }

    #[test]
    fn test_lex_white_spaces_and_parens() {
        assert_eq!(tokens_from_str("  "), vec![]);
        assert_eq!(
            tokens_from_str("()"),
            vec![Token::LeftParen, Token::RightParen]
        );
        assert_eq!(
            tokens_from_str("(\t\r\n)"),
            vec![Token::LeftParen, Token::RightParen]
        );
    }

    #[test]
    fn test_lex_identifier_and_symbol() {
        assert_eq!(
            tokens_from_str("$main"),
            vec![Token::Identifier("main".to_owned())]
        );
        assert_eq!(
            tokens_from_str("local_get br_true"),
            vec![
                Token::Symbol("local_get".to_owned()),
                Token::Symbol("br_true".to_owned())
            ]
        );
        // 'b' alone is a symbol, not the start of a bytes literal
        assert_eq!(
            tokens_from_str("bury"),
            vec![Token::Symbol("bury".to_owned())]
        );
    }

    #[test]
    fn test_lex_numbers() {
        assert_eq!(tokens_from_str("211"), vec![Token::Number(211)]);
        assert_eq!(tokens_from_str("-4"), vec![Token::Number(-4)]);
        assert_eq!(tokens_from_str("0x11"), vec![Token::Number(0x11)]);
        assert_eq!(tokens_from_str("0x11_22"), vec![Token::Number(0x1122)]);
        assert_eq!(tokens_from_str("0xffff"), vec![Token::Number(0xffff)]);
        assert_eq!(tokens_from_str("-32768"), vec![Token::Number(-32768)]);

        assert!(lex("65536").is_err());
        assert!(lex("-32769").is_err());
        assert!(lex("0x").is_err());
    }

    #[test]
    fn test_lex_bytes() {
        assert_eq!(
            tokens_from_str("b\"0011aabb\""),
            vec![Token::Bytes(vec![0x00, 0x11, 0xaa, 0xbb])]
        );
        assert_eq!(
            tokens_from_str("b\"00 11 AA BB\""),
            vec![Token::Bytes(vec![0x00, 0x11, 0xaa, 0xbb])]
        );
        assert_eq!(
            tokens_from_str("b\"00-11-aa-bb\""),
            vec![Token::Bytes(vec![0x00, 0x11, 0xaa, 0xbb])]
        );
        assert_eq!(tokens_from_str("b\"\""), vec![Token::Bytes(vec![])]);

        assert!(lex("b\"0\"").is_err());
        assert!(lex("b\"0g\"").is_err());
        assert!(lex("b\"00").is_err());
    }

    #[test]
    fn test_lex_comments() {
        assert_eq!(
            tokens_from_str("(add) ;; ignored to the end of line\n(sub)"),
            vec![
                Token::LeftParen,
                Token::Symbol("add".to_owned()),
                Token::RightParen,
                Token::LeftParen,
                Token::Symbol("sub".to_owned()),
                Token::RightParen,
            ]
        );
        assert!(lex("; single").is_err());
    }

    #[test]
    fn test_lex_line_numbers() {
        let located = lex("(module\n  (add)\n)").unwrap();
        let lines: Vec<usize> = located.iter().map(|t| t.line).collect();
        assert_eq!(lines, vec![1, 1, 2, 2, 2, 3]);
    }
}
