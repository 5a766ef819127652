use super::ast::{BinaryOp, Expr, UnaryOp};
use super::functions;
use crate::document::CellValue;
use crate::error::{CellDbError, Result};
use chrono::{NaiveDate, Utc};
use std::collections::HashMap;

/// Evaluates formula trees against a row context (column name -> value).
#[derive(Debug, Clone)]
pub struct Evaluator {
    today: NaiveDate,
}

impl Default for Evaluator {
    fn default() -> Self {
        Evaluator {
            today: Utc::now().date_naive(),
        }
    }
}

impl Evaluator {
    /// An evaluator whose `now()` returns `today`.
    pub fn new(today: NaiveDate) -> Self {
        Evaluator { today }
    }

    pub fn today(&self) -> NaiveDate {
        self.today
    }

    pub fn evaluate(&self, expr: &Expr, context: &HashMap<String, CellValue>) -> Result<CellValue> {
        match expr {
            Expr::Number(n) => Ok(CellValue::Number(*n)),
            Expr::Str(s) => Ok(CellValue::Text(s.clone())),
            Expr::Bool(b) => Ok(CellValue::Bool(*b)),
            Expr::Ident(name) => context
                .get(name)
                .map(CellValue::flatten)
                .ok_or_else(|| CellDbError::eval(format!("Unknown column: {name}"))),
            Expr::Unary { op, operand } => {
                let value = self.evaluate(operand, context)?;
                Ok(match op {
                    UnaryOp::Not => CellValue::Bool(!value.is_truthy()),
                    UnaryOp::Neg => CellValue::Number(-value.to_number()),
                })
            }
            Expr::Binary { op, left, right } => self.evaluate_binary(*op, left, right, context),
            Expr::Call { name, args } => functions::call(self, name, args, context),
        }
    }

    fn evaluate_binary(
        &self,
        op: BinaryOp,
        left: &Expr,
        right: &Expr,
        context: &HashMap<String, CellValue>,
    ) -> Result<CellValue> {
        // Logical operators short-circuit
        match op {
            BinaryOp::And => {
                let l = self.evaluate(left, context)?;
                if !l.is_truthy() {
                    return Ok(CellValue::Bool(false));
                }
                return Ok(CellValue::Bool(self.evaluate(right, context)?.is_truthy()));
            }
            BinaryOp::Or => {
                let l = self.evaluate(left, context)?;
                if l.is_truthy() {
                    return Ok(CellValue::Bool(true));
                }
                return Ok(CellValue::Bool(self.evaluate(right, context)?.is_truthy()));
            }
            _ => {}
        }

        let l = self.evaluate(left, context)?;
        let r = self.evaluate(right, context)?;

        let value = match op {
            BinaryOp::Add => {
                if matches!(l, CellValue::Text(_)) || matches!(r, CellValue::Text(_)) {
                    CellValue::Text(l.to_display_string() + &r.to_display_string())
                } else {
                    CellValue::Number(l.to_number() + r.to_number())
                }
            }
            BinaryOp::Sub => CellValue::Number(l.to_number() - r.to_number()),
            BinaryOp::Mul => CellValue::Number(l.to_number() * r.to_number()),
            BinaryOp::Div | BinaryOp::Mod => {
                let divisor = r.to_number();
                if divisor == 0.0 {
                    return Err(CellDbError::eval("Division by zero"));
                }
                let dividend = l.to_number();
                if op == BinaryOp::Div {
                    CellValue::Number(dividend / divisor)
                } else {
                    CellValue::Number(dividend % divisor)
                }
            }
            BinaryOp::Eq => CellValue::Bool(loosely_equal(&l, &r)),
            BinaryOp::NotEq => CellValue::Bool(!loosely_equal(&l, &r)),
            BinaryOp::Lt => CellValue::Bool(l.to_number() < r.to_number()),
            BinaryOp::Gt => CellValue::Bool(l.to_number() > r.to_number()),
            BinaryOp::LtEq => CellValue::Bool(l.to_number() <= r.to_number()),
            BinaryOp::GtEq => CellValue::Bool(l.to_number() >= r.to_number()),
            BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
        };
        Ok(value)
    }
}

/// Same value, or the same string form (`"3" == 3`).
fn loosely_equal(l: &CellValue, r: &CellValue) -> bool {
    l == r || l.to_display_string() == r.to_display_string()
}

/// Evaluate with the current date as `now()`.
pub fn evaluate(expr: &Expr, context: &HashMap<String, CellValue>) -> Result<CellValue> {
    Evaluator::default().evaluate(expr, context)
}
