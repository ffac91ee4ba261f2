//! Expression pretty-printer
//!
//! Renders any [`Expression`] to stable, minimally parenthesised ISL text.
//! The output is for reports and `CheckResult::expression` only; it is
//! never used for equality or caching.

use std::fmt::{self, Write};

use crate::ast::{BinaryOp, Expression, UnaryOp};
use crate::value::Value;

/// Render an expression to text
pub fn print_expression(expr: &Expression) -> String {
    let mut out = String::new();
    // Writing into a String is infallible.
    let _ = write_expr(&mut out, expr, 0);
    out
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&print_expression(self))
    }
}

// ── Precedence ────────────────────────────────────────────

const PREC_IMPLIES: u8 = 1;
const PREC_OR: u8 = 2;
const PREC_AND: u8 = 3;
const PREC_EQUALITY: u8 = 4;
const PREC_COMPARE: u8 = 5;
const PREC_ADDITIVE: u8 = 6;
const PREC_MULTIPLICATIVE: u8 = 7;
const PREC_UNARY: u8 = 8;
const PREC_POSTFIX: u8 = 9;

fn binary_precedence(op: BinaryOp) -> u8 {
    match op {
        BinaryOp::Implies => PREC_IMPLIES,
        BinaryOp::Or => PREC_OR,
        BinaryOp::And => PREC_AND,
        BinaryOp::Eq | BinaryOp::NotEq => PREC_EQUALITY,
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge | BinaryOp::In => PREC_COMPARE,
        BinaryOp::Add | BinaryOp::Sub => PREC_ADDITIVE,
        BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => PREC_MULTIPLICATIVE,
    }
}

fn precedence(expr: &Expression) -> u8 {
    match expr {
        Expression::Binary { op, .. } => binary_precedence(*op),
        Expression::Unary { .. } => PREC_UNARY,
        _ => PREC_POSTFIX,
    }
}

// ── Writer ────────────────────────────────────────────────

fn write_expr(out: &mut String, expr: &Expression, min_prec: u8) -> fmt::Result {
    let needs_parens = precedence(expr) < min_prec;
    if needs_parens {
        out.push('(');
    }

    match expr {
        Expression::Literal { value } => write_literal(out, value)?,
        Expression::Identifier { name } => out.push_str(name),
        Expression::Member { object, property } => {
            write_expr(out, object, PREC_POSTFIX)?;
            write!(out, ".{}", property)?;
        }
        Expression::Index { object, index } => {
            write_expr(out, object, PREC_POSTFIX)?;
            out.push('[');
            write_expr(out, index, 0)?;
            out.push(']');
        }
        Expression::Unary { op, operand } => {
            match op {
                UnaryOp::Not => out.push_str("not "),
                UnaryOp::Neg => out.push('-'),
            }
            write_expr(out, operand, PREC_UNARY)?;
        }
        Expression::Binary { op, left, right } => {
            let prec = binary_precedence(*op);
            // implies is right-associative, everything else left-associative
            let (left_min, right_min) = if *op == BinaryOp::Implies {
                (prec + 1, prec)
            } else {
                (prec, prec + 1)
            };
            write_expr(out, left, left_min)?;
            write!(out, " {} ", op.as_str())?;
            write_expr(out, right, right_min)?;
        }
        Expression::Call { callee, arguments } => {
            write_expr(out, callee, PREC_POSTFIX)?;
            out.push('(');
            write_list(out, arguments)?;
            out.push(')');
        }
        Expression::Old { expression } => {
            out.push_str("old(");
            write_expr(out, expression, 0)?;
            out.push(')');
        }
        Expression::List { elements } => {
            out.push('[');
            write_list(out, elements)?;
            out.push(']');
        }
        Expression::Object { fields } => {
            out.push('{');
            for (i, field) in fields.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write!(out, "{}: ", field.key)?;
                write_expr(out, &field.value, 0)?;
            }
            out.push('}');
        }
    }

    if needs_parens {
        out.push(')');
    }
    Ok(())
}

fn write_list(out: &mut String, items: &[Expression]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        write_expr(out, item, 0)?;
    }
    Ok(())
}

fn write_literal(out: &mut String, value: &Value) -> fmt::Result {
    match value {
        Value::String(s) => write!(out, "\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"")),
        // Debug keeps the trailing ".0" so floats stay distinguishable from ints
        Value::Float(f) => write!(out, "{:?}", f),
        other => write!(out, "{}", other),
    }
}
