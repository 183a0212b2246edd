//! Tree-walking evaluation of a parsed script for one period.

use std::collections::{BTreeMap, HashMap};

use crate::ast::{BinaryOp, Expr, ExprKind, Script, UnaryOp};
use crate::error::{ErrorKind, Position, QueryError};
use crate::functions::{self, Context};
use crate::value::{Tag, Value};

/// Variable bindings for one evaluation. Scope is flat.
#[derive(Debug, Default)]
struct Environment {
    vars: HashMap<String, Value>,
}

impl Environment {
    fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    fn bind(&mut self, name: &str, value: Value) {
        self.vars.insert(name.to_string(), value);
    }
}

pub(crate) struct Interpreter<'a> {
    ctx: Context<'a>,
    env: Environment,
    steps: u64,
    max_steps: Option<u64>,
}

impl<'a> Interpreter<'a> {
    pub(crate) fn new(ctx: Context<'a>, max_steps: Option<u64>) -> Self {
        Self {
            ctx,
            env: Environment::default(),
            steps: 0,
            max_steps,
        }
    }

    pub(crate) fn run(mut self, script: &Script) -> Result<Value, QueryError> {
        for assignment in &script.assignments {
            let value = self.eval(&assignment.value)?;
            self.env.bind(&assignment.name, value);
        }
        self.eval(&script.result)
    }

    fn step(&mut self, position: Position) -> Result<(), QueryError> {
        self.steps += 1;
        match self.max_steps {
            Some(max) if self.steps > max => Err(QueryError::new(
                ErrorKind::ResourceLimitError,
                format!("step budget of {max} exceeded"),
            )
            .at(position)),
            _ => Ok(()),
        }
    }

    fn eval(&mut self, expr: &Expr) -> Result<Value, QueryError> {
        self.step(expr.position)?;
        let position = expr.position;
        match &expr.kind {
            ExprKind::Number(n) => Ok(Value::Number(*n)),
            ExprKind::Str(s) => Ok(Value::String(s.clone())),
            ExprKind::Bool(b) => Ok(Value::Bool(*b)),
            ExprKind::List(items) => Ok(Value::List(
                items
                    .iter()
                    .map(|item| self.eval(item))
                    .collect::<Result<_, _>>()?,
            )),
            ExprKind::Object(fields) => {
                let mut object = BTreeMap::new();
                for (key, value) in fields {
                    object.insert(key.clone(), self.eval(value)?);
                }
                Ok(Value::Object(object))
            }
            ExprKind::Var(name) => self.env.get(name).cloned().ok_or_else(|| {
                QueryError::new(ErrorKind::NameError, format!("name '{name}' is not defined"))
                    .at(position)
            }),
            ExprKind::Call { name, args } => {
                // Names were resolved before evaluation started.
                let builtin = functions::lookup(name).ok_or_else(|| not_found(name, position))?;
                let args = args
                    .iter()
                    .map(|arg| self.eval(arg))
                    .collect::<Result<Vec<_>, _>>()?;
                builtin
                    .invoke(&self.ctx, args)
                    .map_err(|e| e.at(position))
            }
            ExprKind::Unary { op, operand } => {
                let value = self.eval(operand)?;
                unary(*op, value).map_err(|e| e.at(position))
            }
            ExprKind::Binary { op, lhs, rhs } => match op {
                BinaryOp::And | BinaryOp::Or => self.logical(*op, lhs, rhs),
                _ => {
                    let lhs = self.eval(lhs)?;
                    let rhs = self.eval(rhs)?;
                    binary(*op, lhs, rhs).map_err(|e| e.at(position))
                }
            },
        }
    }

    /// Short-circuiting `and`/`or`. Both operands must be booleans.
    fn logical(&mut self, op: BinaryOp, lhs: &Expr, rhs: &Expr) -> Result<Value, QueryError> {
        let left = self.boolean(op, lhs)?;
        let short = match op {
            BinaryOp::And => !left,
            _ => left,
        };
        if short {
            return Ok(Value::Bool(left));
        }
        Ok(Value::Bool(self.boolean(op, rhs)?))
    }

    fn boolean(&mut self, op: BinaryOp, expr: &Expr) -> Result<bool, QueryError> {
        match self.eval(expr)? {
            Value::Bool(b) => Ok(b),
            other => Err(
                QueryError::type_mismatch(&format!("operator '{op}'"), Tag::Bool, other.tag())
                    .at(expr.position),
            ),
        }
    }
}

pub(crate) fn not_found(name: &str, position: Position) -> QueryError {
    QueryError::new(
        ErrorKind::QueryNotFoundError,
        format!("unknown function '{name}'"),
    )
    .at(position)
}

fn unary(op: UnaryOp, value: Value) -> Result<Value, QueryError> {
    match (op, value) {
        (UnaryOp::Neg, Value::Number(n)) => Ok(Value::Number(-n)),
        (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
        (UnaryOp::Neg, other) => Err(QueryError::type_mismatch(
            "operator '-'",
            Tag::Number,
            other.tag(),
        )),
        (UnaryOp::Not, other) => Err(QueryError::type_mismatch(
            "operator 'not'",
            Tag::Bool,
            other.tag(),
        )),
    }
}

fn binary(op: BinaryOp, lhs: Value, rhs: Value) -> Result<Value, QueryError> {
    use Value::{EventList, List, Number};

    Ok(match (op, lhs, rhs) {
        (BinaryOp::Eq, a, b) => Value::Bool(a == b),
        (BinaryOp::NotEq, a, b) => Value::Bool(a != b),

        (BinaryOp::Add, Number(a), Number(b)) => Number(a + b),
        (BinaryOp::Add, Value::String(a), Value::String(b)) => Value::String(a + &b),
        (BinaryOp::Add, List(mut a), List(b)) => {
            a.extend(b);
            List(a)
        }
        (BinaryOp::Add, EventList(mut a), EventList(b)) => {
            a.extend(b);
            EventList(a)
        }
        (BinaryOp::Sub, Number(a), Number(b)) => Number(a - b),
        (BinaryOp::Mul, Number(a), Number(b)) => Number(a * b),
        (BinaryOp::Div | BinaryOp::Mod, Number(_), Number(b)) if b == 0.0 => {
            return Err(QueryError::new(
                ErrorKind::ArithmeticError,
                if op == BinaryOp::Div {
                    "division by zero"
                } else {
                    "modulo by zero"
                },
            ));
        }
        (BinaryOp::Div, Number(a), Number(b)) => Number(a / b),
        (BinaryOp::Mod, Number(a), Number(b)) => Number(a % b),

        (BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge, Number(a), Number(b)) => {
            Value::Bool(compare(op, a.partial_cmp(&b)))
        }
        (BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge, Value::String(a), Value::String(b)) => {
            Value::Bool(compare(op, Some(a.cmp(&b))))
        }

        (_, a, b) => {
            let expected = match op {
                BinaryOp::Add => "matching Number, String, List or EventList operands",
                BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                    "matching Number or String operands"
                }
                _ => "Number operands",
            };
            return Err(QueryError::type_mismatch(
                &format!("operator '{op}'"),
                expected,
                format!("{} and {}", a.tag(), b.tag()),
            ));
        }
    })
}

fn compare(op: BinaryOp, ordering: Option<std::cmp::Ordering>) -> bool {
    use std::cmp::Ordering::{Equal, Greater, Less};

    matches!(
        (op, ordering),
        (BinaryOp::Lt, Some(Less))
            | (BinaryOp::Le, Some(Less | Equal))
            | (BinaryOp::Gt, Some(Greater))
            | (BinaryOp::Ge, Some(Greater | Equal))
    )
}
