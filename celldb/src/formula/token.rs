use crate::error::{CellDbError, Result};
use std::fmt;

/// Operators recognized by the tokenizer. `and`/`or`/`not` lex to And/Or/Not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Or,
    And,
    Eq,
    NotEq,
    Lt,
    Gt,
    LtEq,
    GtEq,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Not,
}

impl Operator {
    pub fn symbol(&self) -> &'static str {
        match self {
            Operator::Or => "||",
            Operator::And => "&&",
            Operator::Eq => "==",
            Operator::NotEq => "!=",
            Operator::Lt => "<",
            Operator::Gt => ">",
            Operator::LtEq => "<=",
            Operator::GtEq => ">=",
            Operator::Plus => "+",
            Operator::Minus => "-",
            Operator::Star => "*",
            Operator::Slash => "/",
            Operator::Percent => "%",
            Operator::Not => "!",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Number(f64),
    Str(String),
    Bool(bool),
    Ident(String),
    /// A `backtick quoted` column name. Never treated as a function name.
    QuotedIdent(String),
    LParen,
    RParen,
    Comma,
    Op(Operator),
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Number(n) => write!(f, "{n}"),
            TokenKind::Str(s) => write!(f, "\"{s}\""),
            TokenKind::Bool(b) => write!(f, "{b}"),
            TokenKind::Ident(name) => write!(f, "{name}"),
            TokenKind::QuotedIdent(name) => write!(f, "`{name}`"),
            TokenKind::LParen => write!(f, "("),
            TokenKind::RParen => write!(f, ")"),
            TokenKind::Comma => write!(f, ","),
            TokenKind::Op(op) => write!(f, "{}", op.symbol()),
        }
    }
}

/// A token and the character offset it starts at
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub position: usize,
}

/// Split a formula into tokens.
pub fn tokenize(input: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let start = i;

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit())) {
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            let value = text.parse::<f64>().map_err(|_| CellDbError::Tokenize {
                message: format!("Invalid number '{text}'"),
                position: start,
            })?;
            tokens.push(Token {
                kind: TokenKind::Number(value),
                position: start,
            });
            continue;
        }

        if c == '"' || c == '\'' {
            let (value, next) = read_string(&chars, i, c)?;
            tokens.push(Token {
                kind: TokenKind::Str(value),
                position: start,
            });
            i = next;
            continue;
        }

        if c == '`' {
            let close = chars[i + 1..]
                .iter()
                .position(|&ch| ch == '`')
                .ok_or_else(|| CellDbError::Tokenize {
                    message: "Unterminated quoted identifier".to_string(),
                    position: start,
                })?;
            let name: String = chars[i + 1..i + 1 + close].iter().collect();
            tokens.push(Token {
                kind: TokenKind::QuotedIdent(name),
                position: start,
            });
            i += close + 2;
            continue;
        }

        if c.is_alphabetic() || c == '_' {
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            let word: String = chars[start..i].iter().collect();
            let kind = match word.as_str() {
                "and" => TokenKind::Op(Operator::And),
                "or" => TokenKind::Op(Operator::Or),
                "not" => TokenKind::Op(Operator::Not),
                "true" => TokenKind::Bool(true),
                "false" => TokenKind::Bool(false),
                _ => TokenKind::Ident(word),
            };
            tokens.push(Token {
                kind,
                position: start,
            });
            continue;
        }

        let two = chars.get(i + 1).map(|&n| (c, n));
        let double = match two {
            Some(('=', '=')) => Some(Operator::Eq),
            Some(('!', '=')) => Some(Operator::NotEq),
            Some(('<', '=')) => Some(Operator::LtEq),
            Some(('>', '=')) => Some(Operator::GtEq),
            Some(('&', '&')) => Some(Operator::And),
            Some(('|', '|')) => Some(Operator::Or),
            _ => None,
        };
        if let Some(op) = double {
            tokens.push(Token {
                kind: TokenKind::Op(op),
                position: start,
            });
            i += 2;
            continue;
        }

        let kind = match c {
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            ',' => TokenKind::Comma,
            '+' => TokenKind::Op(Operator::Plus),
            '-' => TokenKind::Op(Operator::Minus),
            '*' => TokenKind::Op(Operator::Star),
            '/' => TokenKind::Op(Operator::Slash),
            '%' => TokenKind::Op(Operator::Percent),
            '<' => TokenKind::Op(Operator::Lt),
            '>' => TokenKind::Op(Operator::Gt),
            '!' => TokenKind::Op(Operator::Not),
            other => {
                return Err(CellDbError::Tokenize {
                    message: format!("Unexpected character '{other}'"),
                    position: start,
                })
            }
        };
        tokens.push(Token {
            kind,
            position: start,
        });
        i += 1;
    }

    Ok(tokens)
}

/// Read a quoted string starting at `start`. Returns the unescaped value and the
/// index just past the closing quote.
fn read_string(chars: &[char], start: usize, quote: char) -> Result<(String, usize)> {
    let mut value = String::new();
    let mut i = start + 1;

    while i < chars.len() {
        match chars[i] {
            '\\' => {
                let escaped = chars.get(i + 1).ok_or_else(|| CellDbError::Tokenize {
                    message: "Unterminated string".to_string(),
                    position: start,
                })?;
                value.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    other => *other,
                });
                i += 2;
            }
            c if c == quote => return Ok((value, i + 1)),
            c => {
                value.push(c);
                i += 1;
            }
        }
    }

    Err(CellDbError::Tokenize {
        message: "Unterminated string".to_string(),
        position: start,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        tokenize(input).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_tokenize_arithmetic() {
        assert_eq!(
            kinds("2 + 3.5*x"),
            vec![
                TokenKind::Number(2.0),
                TokenKind::Op(Operator::Plus),
                TokenKind::Number(3.5),
                TokenKind::Op(Operator::Star),
                TokenKind::Ident("x".into()),
            ]
        );
    }

    #[test]
    fn test_tokenize_keywords_and_two_char_operators() {
        assert_eq!(
            kinds("a >= 1 and not b || true != false"),
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::Op(Operator::GtEq),
                TokenKind::Number(1.0),
                TokenKind::Op(Operator::And),
                TokenKind::Op(Operator::Not),
                TokenKind::Ident("b".into()),
                TokenKind::Op(Operator::Or),
                TokenKind::Bool(true),
                TokenKind::Op(Operator::NotEq),
                TokenKind::Bool(false),
            ]
        );
    }

    #[test]
    fn test_tokenize_strings_and_escapes() {
        assert_eq!(
            kinds(r#""say \"hi\"" 'it\'s'"#),
            vec![
                TokenKind::Str("say \"hi\"".into()),
                TokenKind::Str("it's".into()),
            ]
        );
    }

    #[test]
    fn test_tokenize_backtick_identifier() {
        let tokens = tokenize("`Due Date` + 1").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::QuotedIdent("Due Date".into()));
        assert_eq!(tokens[1].position, 11);
    }

    #[test]
    fn test_tokenize_unknown_character() {
        match tokenize("1 + $") {
            Err(CellDbError::Tokenize { message, position }) => {
                assert!(message.contains('$'));
                assert_eq!(position, 4);
            }
            other => panic!("expected tokenize error, got {other:?}"),
        }
        assert!(tokenize("a = b").is_err());
    }

    #[test]
    fn test_tokenize_unterminated() {
        assert!(tokenize("\"abc").is_err());
        assert!(tokenize("`abc").is_err());
        assert!(tokenize("1.2.3").is_err());
    }
}
