use super::ast::{BinaryOp, Expr, UnaryOp};
use super::token::{tokenize, Operator, Token, TokenKind};
use crate::error::{CellDbError, Result};

/// Deepest nesting of parentheses, calls and unary operators a formula may use
const MAX_DEPTH: usize = 256;

/// Parse a formula into an expression tree.
pub fn parse(input: &str) -> Result<Expr> {
    let tokens = tokenize(input)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        end: input.chars().count(),
        depth: 0,
    };
    let expr = parser.parse_or()?;
    if let Some(token) = parser.peek() {
        return Err(CellDbError::Parse {
            message: format!("Unexpected token '{}'", token.kind),
            position: token.position,
        });
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    /// Character length of the input, reported for errors at end of input
    end: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_kind(&self) -> Option<&TokenKind> {
        self.peek().map(|t| &t.kind)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    /// Consume the next token if it is one of `ops`, returning the matching binary op.
    fn match_op(&mut self, ops: &[(Operator, BinaryOp)]) -> Option<BinaryOp> {
        if let Some(TokenKind::Op(found)) = self.peek_kind() {
            if let Some((_, op)) = ops.iter().find(|(candidate, _)| candidate == found) {
                let op = *op;
                self.pos += 1;
                return Some(op);
            }
        }
        None
    }

    fn error_here(&self, message: impl Into<String>) -> CellDbError {
        CellDbError::Parse {
            message: message.into(),
            position: self.peek().map(|t| t.position).unwrap_or(self.end),
        }
    }

    fn binary_level(
        &mut self,
        ops: &[(Operator, BinaryOp)],
        next: fn(&mut Self) -> Result<Expr>,
    ) -> Result<Expr> {
        let mut left = next(self)?;
        while let Some(op) = self.match_op(ops) {
            let right = next(self)?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_or(&mut self) -> Result<Expr> {
        self.binary_level(&[(Operator::Or, BinaryOp::Or)], Self::parse_and)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        self.binary_level(&[(Operator::And, BinaryOp::And)], Self::parse_equality)
    }

    fn parse_equality(&mut self) -> Result<Expr> {
        self.binary_level(
            &[(Operator::Eq, BinaryOp::Eq), (Operator::NotEq, BinaryOp::NotEq)],
            Self::parse_comparison,
        )
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        self.binary_level(
            &[
                (Operator::Lt, BinaryOp::Lt),
                (Operator::Gt, BinaryOp::Gt),
                (Operator::LtEq, BinaryOp::LtEq),
                (Operator::GtEq, BinaryOp::GtEq),
            ],
            Self::parse_additive,
        )
    }

    fn parse_additive(&mut self) -> Result<Expr> {
        self.binary_level(
            &[(Operator::Plus, BinaryOp::Add), (Operator::Minus, BinaryOp::Sub)],
            Self::parse_multiplicative,
        )
    }

    fn parse_multiplicative(&mut self) -> Result<Expr> {
        self.binary_level(
            &[
                (Operator::Star, BinaryOp::Mul),
                (Operator::Slash, BinaryOp::Div),
                (Operator::Percent, BinaryOp::Mod),
            ],
            Self::parse_unary,
        )
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        if self.depth >= MAX_DEPTH {
            return Err(self.error_here("Expression nested too deeply"));
        }
        self.depth += 1;
        let result = self.parse_unary_operand();
        self.depth -= 1;
        result
    }

    fn parse_unary_operand(&mut self) -> Result<Expr> {
        let op = match self.peek_kind() {
            Some(TokenKind::Op(Operator::Not)) => UnaryOp::Not,
            Some(TokenKind::Op(Operator::Minus)) => UnaryOp::Neg,
            _ => return self.parse_primary(),
        };
        self.pos += 1;
        let operand = self.parse_unary()?;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        let token = match self.advance() {
            Some(token) => token,
            None => return Err(self.error_here("Unexpected end of expression")),
        };

        match token.kind {
            TokenKind::Number(n) => Ok(Expr::Number(n)),
            TokenKind::Str(s) => Ok(Expr::Str(s)),
            TokenKind::Bool(b) => Ok(Expr::Bool(b)),
            TokenKind::QuotedIdent(name) => Ok(Expr::Ident(name)),
            TokenKind::Ident(name) => {
                if self.peek_kind() == Some(&TokenKind::LParen) {
                    self.pos += 1;
                    let args = self.parse_args()?;
                    Ok(Expr::Call { name, args })
                } else {
                    Ok(Expr::Ident(name))
                }
            }
            TokenKind::LParen => {
                let expr = self.parse_or()?;
                match self.advance() {
                    Some(Token {
                        kind: TokenKind::RParen,
                        ..
                    }) => Ok(expr),
                    Some(other) => Err(CellDbError::Parse {
                        message: format!("Expected ')' but found '{}'", other.kind),
                        position: other.position,
                    }),
                    None => Err(self.error_here("Expected ')'")),
                }
            }
            other => Err(CellDbError::Parse {
                message: format!("Unexpected token '{other}'"),
                position: token.position,
            }),
        }
    }

    /// Arguments after an opening parenthesis, through the closing one.
    fn parse_args(&mut self) -> Result<Vec<Expr>> {
        let mut args = Vec::new();
        if self.peek_kind() == Some(&TokenKind::RParen) {
            self.pos += 1;
            return Ok(args);
        }
        loop {
            args.push(self.parse_or()?);
            match self.advance() {
                Some(Token {
                    kind: TokenKind::Comma,
                    ..
                }) => continue,
                Some(Token {
                    kind: TokenKind::RParen,
                    ..
                }) => return Ok(args),
                Some(other) => {
                    return Err(CellDbError::Parse {
                        message: format!("Expected ',' or ')' but found '{}'", other.kind),
                        position: other.position,
                    })
                }
                None => return Err(self.error_here("Expected ')' to close argument list")),
            }
        }
    }
}
