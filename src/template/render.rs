//! Evaluation of a checked template against a plain value tree.

use std::cmp::Ordering;
use std::fmt::Display;

use serde_json::{json, Map, Value};

use super::ast::{BinaryOp, Expr, Node, Template, TestKind, UnaryOp};
use super::filters::{self, escape_html};
use super::TemplateError;

const MAX_RANGE_LEN: usize = 10_000;
/// Loop iterations allowed across a whole render, nested loops included.
const MAX_ITERATIONS: usize = 100_000;
/// Largest rendered output, in bytes.
const MAX_OUTPUT_LEN: usize = 1024 * 1024;

/// Evaluation failures are logged and reported as a syntax error.
pub(super) fn eval_error(message: impl Display) -> TemplateError {
    log::debug!("Template evaluation failed: {}", message);
    TemplateError::Syntax
}

pub(crate) fn evaluate(template: &Template, context: &Value) -> Result<String, TemplateError> {
    let root = match context {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        _ => return Err(eval_error("template context must be a mapping")),
    };
    let mut renderer = Renderer { scopes: vec![root], iterations: 0 };
    let mut out = String::new();
    renderer.render_nodes(&template.nodes, &mut out)?;
    Ok(out)
}

struct Renderer {
    scopes: Vec<Map<String, Value>>,
    iterations: usize,
}

impl Renderer {
    fn render_nodes(&mut self, nodes: &[Node], out: &mut String) -> Result<(), TemplateError> {
        for node in nodes {
            match node {
                Node::Text(text) => out.push_str(text),
                Node::Print(expr) => {
                    let text = to_display(&self.eval(expr)?);
                    if is_marked_safe(expr) {
                        out.push_str(&text);
                    } else {
                        out.push_str(&escape_html(&text));
                    }
                }
                Node::If { branches, otherwise } => {
                    let mut taken = None;
                    for (cond, body) in branches {
                        if truthy(&self.eval(cond)?) {
                            taken = Some(body);
                            break;
                        }
                    }
                    self.render_nodes(taken.unwrap_or(otherwise), out)?;
                }
                Node::For { key, value, iterable, body, otherwise } => {
                    self.render_for(key.as_deref(), value, iterable, body, otherwise, out)?
                }
                Node::Tag(name) => return Err(eval_error(format!("tag {} cannot be evaluated", name))),
            }
            if out.len() > MAX_OUTPUT_LEN {
                return Err(eval_error(format!("output exceeds {} bytes", MAX_OUTPUT_LEN)));
            }
        }
        Ok(())
    }

    fn render_for(
        &mut self,
        key: Option<&str>,
        value: &str,
        iterable: &Expr,
        body: &[Node],
        otherwise: &[Node],
        out: &mut String,
    ) -> Result<(), TemplateError> {
        let items: Vec<(Value, Value)> = match self.eval(iterable)? {
            Value::Array(items) => items
                .into_iter()
                .enumerate()
                .map(|(i, v)| (Value::from(i), v))
                .collect(),
            Value::Object(map) => map.into_iter().map(|(k, v)| (Value::String(k), v)).collect(),
            Value::Null => Vec::new(),
            other => return Err(eval_error(format!("cannot iterate over {}", other))),
        };
        if items.is_empty() {
            return self.render_nodes(otherwise, out);
        }

        let length = items.len();
        for (index0, (item_key, item)) in items.into_iter().enumerate() {
            self.iterations += 1;
            if self.iterations > MAX_ITERATIONS {
                return Err(eval_error(format!("more than {} loop iterations", MAX_ITERATIONS)));
            }
            let mut scope = Map::new();
            scope.insert(
                "loop".to_string(),
                json!({
                    "index": index0 + 1,
                    "index0": index0,
                    "revindex": length - index0,
                    "revindex0": length - index0 - 1,
                    "first": index0 == 0,
                    "last": index0 + 1 == length,
                    "length": length,
                }),
            );
            if let Some(key) = key {
                scope.insert(key.to_string(), item_key);
            }
            scope.insert(value.to_string(), item);

            self.scopes.push(scope);
            let result = self.render_nodes(body, out);
            self.scopes.pop();
            result?;
        }
        Ok(())
    }

    fn variable(&self, name: &str) -> Option<&Value> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    /// Path lookup that tells a missing value apart from a null one.
    fn resolve(&self, expr: &Expr) -> Result<Option<Value>, TemplateError> {
        match expr {
            Expr::Var(name) => Ok(self.variable(name).cloned()),
            Expr::Attr(target, name) => Ok(self.resolve(target)?.and_then(|v| member(&v, name))),
            Expr::Index(target, index) => {
                let key = match self.eval(index)? {
                    Value::String(s) => s,
                    other => to_display(&other),
                };
                Ok(self.resolve(target)?.and_then(|v| member(&v, &key)))
            }
            other => self.eval(other).map(Some),
        }
    }

    fn eval_all(&self, exprs: &[Expr]) -> Result<Vec<Value>, TemplateError> {
        exprs.iter().map(|e| self.eval(e)).collect()
    }

    fn eval(&self, expr: &Expr) -> Result<Value, TemplateError> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Var(_) | Expr::Attr(..) | Expr::Index(..) => {
                Ok(self.resolve(expr)?.unwrap_or(Value::Null))
            }
            Expr::Array(items) => self.eval_all(items).map(Value::Array),
            Expr::Hash(pairs) => {
                let mut map = Map::new();
                for (key, value) in pairs {
                    map.insert(key.clone(), self.eval(value)?);
                }
                Ok(Value::Object(map))
            }
            Expr::MethodCall { name, .. } => Err(eval_error(format!("method call {}", name))),
            Expr::Filter { target, name, args } => {
                filters::apply_filter(name, self.eval(target)?, self.eval_all(args)?)
            }
            Expr::Call { name, args } => filters::call_function(name, self.eval_all(args)?),
            Expr::Unary { op, expr } => {
                let value = self.eval(expr)?;
                match op {
                    UnaryOp::Not => Ok(Value::Bool(!truthy(&value))),
                    UnaryOp::Neg => Ok(number(-to_number(&value)?)),
                    UnaryOp::Pos => Ok(number(to_number(&value)?)),
                }
            }
            Expr::Binary { op, left, right } => self.eval_binary(*op, left, right),
            Expr::Test { expr, test, negated } => {
                let passed = self.eval_test(expr, *test)?;
                Ok(Value::Bool(passed != *negated))
            }
            Expr::Conditional { cond, then, otherwise } => {
                if truthy(&self.eval(cond)?) {
                    self.eval(then)
                } else {
                    match otherwise {
                        Some(otherwise) => self.eval(otherwise),
                        None => Ok(Value::String(String::new())),
                    }
                }
            }
        }
    }

    fn eval_test(&self, expr: &Expr, test: TestKind) -> Result<bool, TemplateError> {
        if test == TestKind::Defined {
            return Ok(self.resolve(expr)?.is_some());
        }
        let value = self.eval(expr)?;
        Ok(match test {
            TestKind::Defined => true,
            TestKind::Null => value.is_null(),
            TestKind::Empty => match &value {
                Value::Null => true,
                Value::Bool(b) => !b,
                Value::String(s) => s.is_empty(),
                Value::Array(items) => items.is_empty(),
                Value::Object(map) => map.is_empty(),
                Value::Number(_) => false,
            },
            TestKind::Odd => (to_number(&value)? as i64) % 2 != 0,
            TestKind::Even => (to_number(&value)? as i64) % 2 == 0,
            TestKind::Iterable => value.is_array() || value.is_object(),
        })
    }

    fn eval_binary(&self, op: BinaryOp, left: &Expr, right: &Expr) -> Result<Value, TemplateError> {
        match op {
            BinaryOp::Or => {
                return Ok(Value::Bool(truthy(&self.eval(left)?) || truthy(&self.eval(right)?)))
            }
            BinaryOp::And => {
                return Ok(Value::Bool(truthy(&self.eval(left)?) && truthy(&self.eval(right)?)))
            }
            _ => {}
        }

        let (l, r) = (self.eval(left)?, self.eval(right)?);
        match op {
            BinaryOp::Eq => Ok(Value::Bool(loose_eq(&l, &r))),
            BinaryOp::NotEq => Ok(Value::Bool(!loose_eq(&l, &r))),
            BinaryOp::Lt => Ok(Value::Bool(compare(&l, &r)? == Ordering::Less)),
            BinaryOp::Gt => Ok(Value::Bool(compare(&l, &r)? == Ordering::Greater)),
            BinaryOp::LtEq => Ok(Value::Bool(compare(&l, &r)? != Ordering::Greater)),
            BinaryOp::GtEq => Ok(Value::Bool(compare(&l, &r)? != Ordering::Less)),
            BinaryOp::In => Ok(Value::Bool(contains(&r, &l))),
            BinaryOp::NotIn => Ok(Value::Bool(!contains(&r, &l))),
            BinaryOp::StartsWith => Ok(Value::Bool(to_display(&l).starts_with(&to_display(&r)))),
            BinaryOp::EndsWith => Ok(Value::Bool(to_display(&l).ends_with(&to_display(&r)))),
            BinaryOp::Range => range_values(&l, &r, 1.0),
            BinaryOp::Concat => Ok(Value::String(to_display(&l) + &to_display(&r))),
            BinaryOp::Add => Ok(number(to_number(&l)? + to_number(&r)?)),
            BinaryOp::Sub => Ok(number(to_number(&l)? - to_number(&r)?)),
            BinaryOp::Mul => Ok(number(to_number(&l)? * to_number(&r)?)),
            BinaryOp::Div | BinaryOp::FloorDiv | BinaryOp::Mod => {
                let (a, b) = (to_number(&l)?, to_number(&r)?);
                if b == 0.0 {
                    return Err(eval_error("division by zero"));
                }
                Ok(match op {
                    BinaryOp::Div => number(a / b),
                    BinaryOp::FloorDiv => number((a / b).floor()),
                    _ => {
                        let divisor = b as i64;
                        if divisor == 0 {
                            return Err(eval_error("modulo by zero"));
                        }
                        Value::from((a as i64) % divisor)
                    }
                })
            }
            BinaryOp::Or | BinaryOp::And => Ok(Value::Null),
        }
    }
}

fn member(value: &Value, key: &str) -> Option<Value> {
    match value {
        Value::Object(map) => map.get(key).cloned(),
        Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i).cloned()),
        _ => None,
    }
}

/// Only `raw` and `escape` as the outermost filter opt out of autoescaping.
fn is_marked_safe(expr: &Expr) -> bool {
    matches!(expr, Expr::Filter { name, .. } if matches!(name.as_str(), "raw" | "escape" | "e"))
}

pub(crate) fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty() && s != "0",
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

pub(crate) fn to_display(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(true) => "1".to_string(),
        Value::Bool(false) => String::new(),
        Value::Number(n) => match (n.as_i64(), n.as_u64(), n.as_f64()) {
            (Some(i), _, _) => i.to_string(),
            (_, Some(u), _) => u.to_string(),
            (_, _, Some(f)) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
            _ => n.to_string(),
        },
        Value::String(s) => s.clone(),
        Value::Array(_) | Value::Object(_) => "Array".to_string(),
    }
}

pub(super) fn to_number(value: &Value) -> Result<f64, TemplateError> {
    match value {
        Value::Null => Ok(0.0),
        Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        Value::Number(n) => n.as_f64().ok_or_else(|| eval_error("number out of range")),
        Value::String(s) if s.trim().is_empty() => Ok(0.0),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| eval_error(format!("{:?} is not numeric", s))),
        other => Err(eval_error(format!("{} is not numeric", other))),
    }
}

/// Integral results stay integers.
pub(super) fn number(value: f64) -> Value {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 9.0e15 {
        Value::from(value as i64)
    } else {
        serde_json::Number::from_f64(value)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Null, other) | (other, Value::Null) => !truthy(other),
        (Value::Bool(x), other) | (other, Value::Bool(x)) => *x == truthy(other),
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Number(n), Value::String(s)) | (Value::String(s), Value::Number(n)) => {
            s.trim().parse::<f64>().ok() == n.as_f64()
        }
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| loose_eq(a, b))
        }
        _ => a == b,
    }
}

pub(super) fn compare(a: &Value, b: &Value) -> Result<Ordering, TemplateError> {
    if let (Value::String(x), Value::String(y)) = (a, b) {
        if let (Ok(x), Ok(y)) = (x.parse::<f64>(), y.parse::<f64>()) {
            return x.partial_cmp(&y).ok_or_else(|| eval_error("incomparable numbers"));
        }
        return Ok(x.cmp(y));
    }
    let (x, y) = (to_number(a)?, to_number(b)?);
    x.partial_cmp(&y).ok_or_else(|| eval_error("incomparable numbers"))
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match haystack {
        Value::Array(items) => items.iter().any(|item| loose_eq(item, needle)),
        Value::Object(map) => map.values().any(|item| loose_eq(item, needle)),
        Value::String(text) => match needle {
            Value::Array(_) | Value::Object(_) => false,
            other => text.contains(to_display(other).as_str()),
        },
        _ => false,
    }
}

fn single_char(value: &Value) -> Option<char> {
    let text = value.as_str()?;
    let mut chars = text.chars();
    let first = chars.next()?;
    chars.next().is_none().then_some(first)
}

/// Inclusive sequence from `start` to `end`, counting down when `end` is lower.
pub(super) fn range_values(start: &Value, end: &Value, step: f64) -> Result<Value, TemplateError> {
    let step = step.abs();
    if step == 0.0 {
        return Err(eval_error("range step cannot be zero"));
    }

    if let (Some(a), Some(b)) = (single_char(start), single_char(end)) {
        let (a, b) = (a as u32, b as u32);
        let step = step as u32;
        let codes: Vec<u32> = if a <= b {
            (a..=b).step_by(step.max(1) as usize).collect()
        } else {
            (b..=a).rev().step_by(step.max(1) as usize).collect()
        };
        if codes.len() > MAX_RANGE_LEN {
            return Err(eval_error("range too large"));
        }
        return Ok(Value::Array(
            codes
                .into_iter()
                .filter_map(char::from_u32)
                .map(|c| Value::String(c.to_string()))
                .collect(),
        ));
    }

    let (a, b) = (to_number(start)?, to_number(end)?);
    let count = ((b - a).abs() / step).floor();
    if !count.is_finite() || count >= MAX_RANGE_LEN as f64 {
        return Err(eval_error("range too large"));
    }
    let direction = if b >= a { 1.0 } else { -1.0 };
    Ok(Value::Array(
        (0..=count as usize)
            .map(|i| number(a + direction * step * i as f64))
            .collect(),
    ))
}
