// Copyright 2024 The Strata Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Element-wise expression evaluation over frame columns.
//!
//! Supports `+ - * /`, the comparisons `< <= > >= == !=` (yielding bool
//! columns), `&`/`|` on bool columns, unary minus, numeric literals, and
//! columns by name. Integer arithmetic stays integer; division and mixed
//! operands promote to f8.

use std::sync::LazyLock;

use pest::Parser as _;
use pest::iterators::Pairs;
use pest::pratt_parser::Assoc;
use pest::pratt_parser::Op;
use pest::pratt_parser::PrattParser;
use pest_derive::Parser;
use thiserror::Error;

use crate::frame::Frame;
use crate::value::Array;

#[derive(Parser)]
#[grammar = "expr.pest"]
struct ExprParser;

#[derive(Debug, Error)]
pub enum ExprError {
    #[error("cannot parse expression")]
    Parse(#[source] Box<pest::error::Error<Rule>>),
    #[error("unknown column: {0}")]
    UnknownColumn(String),
    #[error("type error: {0}")]
    Type(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

#[derive(Clone, Debug)]
enum Expr {
    Column(String),
    Int(i64),
    Float(f64),
    Neg(Box<Expr>),
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

static PRATT_PARSER: LazyLock<PrattParser<Rule>> = LazyLock::new(|| {
    PrattParser::new()
        .op(Op::infix(Rule::or_op, Assoc::Left))
        .op(Op::infix(Rule::and_op, Assoc::Left))
        .op(Op::infix(Rule::eq_op, Assoc::Left)
            | Op::infix(Rule::ne_op, Assoc::Left)
            | Op::infix(Rule::le_op, Assoc::Left)
            | Op::infix(Rule::lt_op, Assoc::Left)
            | Op::infix(Rule::ge_op, Assoc::Left)
            | Op::infix(Rule::gt_op, Assoc::Left))
        .op(Op::infix(Rule::add_op, Assoc::Left) | Op::infix(Rule::sub_op, Assoc::Left))
        .op(Op::infix(Rule::mul_op, Assoc::Left) | Op::infix(Rule::div_op, Assoc::Left))
        .op(Op::prefix(Rule::neg_op))
});

fn parse(text: &str) -> Result<Expr, ExprError> {
    let mut pairs =
        ExprParser::parse(Rule::program, text).map_err(|err| ExprError::Parse(Box::new(err)))?;
    let expression = pairs.next().unwrap();
    parse_expression(expression.into_inner())
}

fn parse_expression(pairs: Pairs<'_, Rule>) -> Result<Expr, ExprError> {
    PRATT_PARSER
        .map_primary(|primary| match primary.as_rule() {
            Rule::number => {
                let text = primary.as_str();
                if text.contains('.') {
                    Ok(Expr::Float(text.parse().unwrap()))
                } else {
                    text.parse()
                        .map(Expr::Int)
                        .map_err(|_| ExprError::Type(format!("integer literal {text} overflows")))
                }
            }
            Rule::identifier => Ok(Expr::Column(primary.as_str().to_string())),
            Rule::expression => parse_expression(primary.into_inner()),
            _ => unreachable!("unexpected primary {:?}", primary.as_rule()),
        })
        .map_prefix(|op, rhs| match op.as_rule() {
            Rule::neg_op => Ok(Expr::Neg(Box::new(rhs?))),
            _ => unreachable!("unexpected prefix {:?}", op.as_rule()),
        })
        .map_infix(|lhs, op, rhs| {
            let op = match op.as_rule() {
                Rule::add_op => BinOp::Add,
                Rule::sub_op => BinOp::Sub,
                Rule::mul_op => BinOp::Mul,
                Rule::div_op => BinOp::Div,
                Rule::lt_op => BinOp::Lt,
                Rule::le_op => BinOp::Le,
                Rule::gt_op => BinOp::Gt,
                Rule::ge_op => BinOp::Ge,
                Rule::eq_op => BinOp::Eq,
                Rule::ne_op => BinOp::Ne,
                Rule::and_op => BinOp::And,
                Rule::or_op => BinOp::Or,
                rule => unreachable!("unexpected infix {rule:?}"),
            };
            Ok(Expr::Binary {
                op,
                lhs: Box::new(lhs?),
                rhs: Box::new(rhs?),
            })
        })
        .parse(pairs)
}

enum Num {
    Ints(Vec<i64>),
    Floats(Vec<f64>),
}

fn to_num(array: &Array) -> Result<Num, ExprError> {
    match array {
        Array::I8(values) => Ok(Num::Ints(values.iter().map(|v| i64::from(*v)).collect())),
        Array::I16(values) => Ok(Num::Ints(values.iter().map(|v| i64::from(*v)).collect())),
        Array::I32(values) => Ok(Num::Ints(values.iter().map(|v| i64::from(*v)).collect())),
        Array::I64(values) | Array::Timestamp(values) => Ok(Num::Ints(values.clone())),
        Array::Date(values) => Ok(Num::Ints(values.iter().map(|v| i64::from(*v)).collect())),
        Array::F32(values) => Ok(Num::Floats(values.iter().map(|v| f64::from(*v)).collect())),
        Array::F64(values) => Ok(Num::Floats(values.clone())),
        other => Err(ExprError::Type(format!(
            "{} column in numeric context",
            other.dtype()
        ))),
    }
}

fn to_floats(num: Num) -> Vec<f64> {
    match num {
        Num::Ints(values) => values.into_iter().map(|v| v as f64).collect(),
        Num::Floats(values) => values,
    }
}

fn zip_map<T, U, R>(a: Vec<T>, b: Vec<U>, f: impl Fn(T, U) -> R) -> Vec<R> {
    std::iter::zip(a, b).map(|(x, y)| f(x, y)).collect()
}

fn arith(op: BinOp, lhs: &Array, rhs: &Array) -> Result<Array, ExprError> {
    match (to_num(lhs)?, to_num(rhs)?, op) {
        (_, _, BinOp::Div) => {
            // Division always promotes, like the float-first dataframe
            // engines this mirrors.
            let a = to_floats(to_num(lhs)?);
            let b = to_floats(to_num(rhs)?);
            Ok(Array::F64(zip_map(a, b, |x, y| x / y)))
        }
        (Num::Ints(a), Num::Ints(b), _) => {
            let values = match op {
                BinOp::Add => zip_map(a, b, i64::wrapping_add),
                BinOp::Sub => zip_map(a, b, i64::wrapping_sub),
                BinOp::Mul => zip_map(a, b, i64::wrapping_mul),
                _ => unreachable!(),
            };
            Ok(Array::I64(values))
        }
        (a, b, _) => {
            let a = to_floats(a);
            let b = to_floats(b);
            let values = match op {
                BinOp::Add => zip_map(a, b, |x, y| x + y),
                BinOp::Sub => zip_map(a, b, |x, y| x - y),
                BinOp::Mul => zip_map(a, b, |x, y| x * y),
                _ => unreachable!(),
            };
            Ok(Array::F64(values))
        }
    }
}

fn compare(op: BinOp, lhs: &Array, rhs: &Array) -> Result<Array, ExprError> {
    let bools = match (lhs, rhs) {
        (Array::Str(a), Array::Str(b)) => zip_map(a.clone(), b.clone(), |x, y| match op {
            BinOp::Lt => x < y,
            BinOp::Le => x <= y,
            BinOp::Gt => x > y,
            BinOp::Ge => x >= y,
            BinOp::Eq => x == y,
            BinOp::Ne => x != y,
            _ => unreachable!(),
        }),
        (Array::Bool(a), Array::Bool(b)) => match op {
            BinOp::Eq => zip_map(a.clone(), b.clone(), |x, y| x == y),
            BinOp::Ne => zip_map(a.clone(), b.clone(), |x, y| x != y),
            _ => {
                return Err(ExprError::Type("ordering comparison on bool columns".to_string()));
            }
        },
        _ => match (to_num(lhs)?, to_num(rhs)?) {
            (Num::Ints(a), Num::Ints(b)) => zip_map(a, b, |x, y| match op {
                BinOp::Lt => x < y,
                BinOp::Le => x <= y,
                BinOp::Gt => x > y,
                BinOp::Ge => x >= y,
                BinOp::Eq => x == y,
                BinOp::Ne => x != y,
                _ => unreachable!(),
            }),
            (a, b) => {
                let a = to_floats(a);
                let b = to_floats(b);
                zip_map(a, b, |x, y| match op {
                    BinOp::Lt => x < y,
                    BinOp::Le => x <= y,
                    BinOp::Gt => x > y,
                    BinOp::Ge => x >= y,
                    BinOp::Eq => x == y,
                    BinOp::Ne => x != y,
                    _ => unreachable!(),
                })
            }
        },
    };
    Ok(Array::Bool(bools))
}

fn logic(op: BinOp, lhs: &Array, rhs: &Array) -> Result<Array, ExprError> {
    let (Array::Bool(a), Array::Bool(b)) = (lhs, rhs) else {
        return Err(ExprError::Type("& and | expect bool columns".to_string()));
    };
    let values = match op {
        BinOp::And => zip_map(a.clone(), b.clone(), |x, y| x && y),
        BinOp::Or => zip_map(a.clone(), b.clone(), |x, y| x || y),
        _ => unreachable!(),
    };
    Ok(Array::Bool(values))
}

fn eval_node(frame: &Frame, expr: &Expr) -> Result<Array, ExprError> {
    match expr {
        Expr::Int(value) => Ok(Array::I64(vec![*value; frame.len()])),
        Expr::Float(value) => Ok(Array::F64(vec![*value; frame.len()])),
        Expr::Column(name) => frame
            .column(name)
            .cloned()
            .ok_or_else(|| ExprError::UnknownColumn(name.clone())),
        Expr::Neg(inner) => match to_num(&eval_node(frame, inner)?)? {
            Num::Ints(values) => Ok(Array::I64(values.into_iter().map(i64::wrapping_neg).collect())),
            Num::Floats(values) => Ok(Array::F64(values.into_iter().map(|v| -v).collect())),
        },
        Expr::Binary { op, lhs, rhs } => {
            let lhs = eval_node(frame, lhs)?;
            let rhs = eval_node(frame, rhs)?;
            match op {
                BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div => arith(*op, &lhs, &rhs),
                BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge | BinOp::Eq | BinOp::Ne => {
                    compare(*op, &lhs, &rhs)
                }
                BinOp::And | BinOp::Or => logic(*op, &lhs, &rhs),
            }
        }
    }
}

/// Evaluates `text` against the frame's columns.
pub fn evaluate(frame: &Frame, text: &str) -> Result<Array, ExprError> {
    let expr = parse(text)?;
    eval_node(frame, &expr)
}
