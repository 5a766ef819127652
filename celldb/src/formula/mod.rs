//! Formula language: tokenizer, recursive-descent parser, evaluator and built-ins.

mod ast;
mod eval;
mod functions;
mod parser;
mod token;

pub use ast::{BinaryOp, Expr, UnaryOp};
pub use eval::{evaluate, Evaluator};
pub use functions::{is_builtin, BUILTIN_FUNCTIONS};
pub use parser::parse;
pub use token::{tokenize, Operator, Token, TokenKind};

use crate::document::CellValue;
use crate::error::Result;
use std::collections::HashMap;

/// Parse and evaluate in one step.
pub fn evaluate_str(expression: &str, context: &HashMap<String, CellValue>) -> Result<CellValue> {
    let expr = parse(expression)?;
    evaluate(&expr, context)
}
