//! Expression interpreter
//!
//! Walks an [`Expr`] against a scope. Variable access has already been
//! rewritten into `get(...)` calls by the lexer, so the interpreter only sees
//! function calls, literals, operators and value methods.

use crate::error::{ExpressionError, Result};
use crate::expression::parser::{BinaryOp, Expr, HashKey, UnaryOp};
use crate::runner::Context;
use crate::scope::{ScopeId, Value, ValueMap};
use regex::Regex;

/// Largest list a `..` range may produce
const MAX_RANGE: u64 = 1_000_000;

/// Numeric view of an operand
#[derive(Debug, Clone, Copy)]
enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    fn as_f64(self) -> f64 {
        match self {
            Number::Int(i) => i as f64,
            Number::Float(f) => f,
        }
    }
}

impl From<Number> for Value {
    fn from(n: Number) -> Self {
        match n {
            Number::Int(i) => Value::Int(i),
            Number::Float(f) => Value::Float(f),
        }
    }
}

fn parse_number(s: &str) -> Option<Number> {
    let s = s.trim();
    if let Ok(i) = s.parse::<i64>() {
        return Some(Number::Int(i));
    }
    s.parse::<f64>().ok().map(Number::Float)
}

fn to_number(value: &Value, op: &str) -> Result<Number> {
    let number = match value {
        Value::Int(i) => Some(Number::Int(*i)),
        Value::Float(f) => Some(Number::Float(*f)),
        Value::Bool(b) => Some(Number::Int(i64::from(*b))),
        Value::Null => Some(Number::Int(0)),
        Value::String(s) => parse_number(s),
        _ => None,
    };
    number.ok_or_else(|| {
        ExpressionError::Type(format!(
            "Unsupported operand type {} for '{}'",
            value.type_name(),
            op
        ))
        .into()
    })
}

/// Number when the value is numeric or a numeric string
fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Int(_) | Value::Float(_) => value.as_f64(),
        Value::String(s) => parse_number(s).map(Number::as_f64),
        _ => None,
    }
}

fn arithmetic(op: BinaryOp, left: &Value, right: &Value) -> Result<Value> {
    let symbol = match op {
        BinaryOp::Add => "+",
        BinaryOp::Subtract => "-",
        BinaryOp::Multiply => "*",
        BinaryOp::Divide => "/",
        BinaryOp::Modulo => "%",
        _ => "**",
    };
    let l = to_number(left, symbol)?;
    let r = to_number(right, symbol)?;

    if let (Number::Int(a), Number::Int(b)) = (l, r) {
        let exact = match op {
            BinaryOp::Add => a.checked_add(b),
            BinaryOp::Subtract => a.checked_sub(b),
            BinaryOp::Multiply => a.checked_mul(b),
            BinaryOp::Divide if a.checked_rem(b) == Some(0) => a.checked_div(b),
            BinaryOp::Modulo if b == 0 => {
                return Err(ExpressionError::Type("Modulo by zero".to_string()).into())
            }
            BinaryOp::Modulo => a.checked_rem(b),
            BinaryOp::Power => u32::try_from(b).ok().and_then(|e| a.checked_pow(e)),
            _ => None,
        };
        if let Some(result) = exact {
            return Ok(Value::Int(result));
        }
    }

    let (a, b) = (l.as_f64(), r.as_f64());
    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Subtract => a - b,
        BinaryOp::Multiply => a * b,
        BinaryOp::Divide => {
            if b == 0.0 {
                return Err(ExpressionError::Type("Division by zero".to_string()).into());
            }
            a / b
        }
        BinaryOp::Modulo => {
            if b == 0.0 {
                return Err(ExpressionError::Type("Modulo by zero".to_string()).into());
            }
            a % b
        }
        _ => a.powf(b),
    };
    Ok(Value::Float(result))
}

fn bitwise(op: BinaryOp, left: &Value, right: &Value) -> Result<Value> {
    let a = to_integer(left)?;
    let b = to_integer(right)?;
    Ok(Value::Int(match op {
        BinaryOp::BitOr => a | b,
        BinaryOp::BitXor => a ^ b,
        _ => a & b,
    }))
}

fn to_integer(value: &Value) -> Result<i64> {
    match to_number(value, "bitwise")? {
        Number::Int(i) => Ok(i),
        Number::Float(f) => Ok(f as i64),
    }
}

/// Compare with numeric semantics when both sides are numeric
fn compare(left: &Value, right: &Value) -> Option<std::cmp::Ordering> {
    match (numeric(left), numeric(right)) {
        (Some(a), Some(b)) => a.partial_cmp(&b),
        _ => Some(left.to_string().cmp(&right.to_string())),
    }
}

fn contains(haystack: &Value, needle: &Value) -> Result<bool> {
    match haystack.items() {
        Some(items) => Ok(items.iter().any(|item| item.loose_eq(needle))),
        None => Err(ExpressionError::Type(format!(
            "Operator 'in' needs a list or map, got {}",
            haystack.type_name()
        ))
        .into()),
    }
}

/// Build a regex from a delimited pattern such as `/^v\d+/i`
pub fn compile_pattern(pattern: &str) -> Result<Regex> {
    let invalid = |error: String| ExpressionError::InvalidRegex {
        pattern: pattern.to_string(),
        error,
    };

    let mut source = pattern.to_string();
    if let Some(delimiter) = pattern.chars().next() {
        let closing = match delimiter {
            '(' => ')',
            '{' => '}',
            '[' => ']',
            '<' => '>',
            c => c,
        };
        let delimited = !delimiter.is_alphanumeric() && delimiter != '\\' && !delimiter.is_whitespace();
        if delimited {
            let body = &pattern[delimiter.len_utf8()..];
            let end = body
                .rfind(closing)
                .ok_or_else(|| invalid("missing closing delimiter".to_string()))?;
            let mut flags = String::new();
            for flag in body[end + closing.len_utf8()..].chars() {
                match flag {
                    'i' | 'm' | 's' | 'x' => flags.push(flag),
                    'u' => {}
                    other => return Err(invalid(format!("unknown modifier '{}'", other)).into()),
                }
            }
            source = if flags.is_empty() {
                body[..end].to_string()
            } else {
                format!("(?{}){}", flags, &body[..end])
            };
        }
    }

    Regex::new(&source).map_err(|e| invalid(e.to_string()).into())
}

fn range(left: &Value, right: &Value) -> Result<Value> {
    let start = to_integer(left)?;
    let end = to_integer(right)?;
    if start.abs_diff(end) >= MAX_RANGE {
        return Err(ExpressionError::Type(format!(
            "Range {}..{} has more than {} elements",
            start, end, MAX_RANGE
        ))
        .into());
    }
    let items: Vec<Value> = if start <= end {
        (start..=end).map(Value::Int).collect()
    } else {
        (end..=start).rev().map(Value::Int).collect()
    };
    Ok(Value::List(items))
}

fn string_arg(args: &[Value], index: usize) -> String {
    args.get(index).map(|v| v.to_string()).unwrap_or_default()
}

impl Context {
    /// Evaluate a parsed expression against `scope`
    pub fn eval_expr(&mut self, expr: &Expr, scope: ScopeId) -> Result<Value> {
        match expr {
            Expr::Null => Ok(Value::Null),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Int(i) => Ok(Value::Int(*i)),
            Expr::Float(f) => Ok(Value::Float(*f)),
            Expr::Str(s) => Ok(Value::String(s.clone())),
            Expr::Array(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval_expr(item, scope)?);
                }
                Ok(Value::List(values))
            }
            Expr::Hash(entries) => {
                let mut map = ValueMap::new();
                for (key, value) in entries {
                    let key = match key {
                        HashKey::Static(name) => name.clone(),
                        HashKey::Dynamic(expr) => {
                            let key = self.eval_expr(expr, scope)?;
                            self.stringify(&key, scope)?
                        }
                    };
                    let value = self.eval_expr(value, scope)?;
                    map.insert(key, value);
                }
                Ok(Value::Map(map))
            }
            Expr::Function { name, args } => {
                let args = self.eval_args(args, scope)?;
                self.call_function(name, scope, args)
            }
            Expr::Method { target, name, args } => {
                let target = self.eval_expr(target, scope)?;
                let args = self.eval_args(args, scope)?;
                self.call_method(target, name, args, scope)
            }
            Expr::Property { target, name } => {
                let target = self.eval_expr(target, scope)?;
                self.access(target, &Value::String(name.clone()), scope)
            }
            Expr::Index { target, index } => {
                let target = self.eval_expr(target, scope)?;
                let index = self.eval_expr(index, scope)?;
                self.access(target, &index, scope)
            }
            Expr::Unary { op, operand } => {
                let value = self.eval_expr(operand, scope)?;
                match op {
                    UnaryOp::Not => Ok(Value::Bool(!value.is_truthy())),
                    UnaryOp::Plus => Ok(to_number(&value, "+")?.into()),
                    UnaryOp::Negate => match to_number(&value, "-")? {
                        Number::Int(i) => Ok(i
                            .checked_neg()
                            .map(Value::Int)
                            .unwrap_or(Value::Float(-(i as f64)))),
                        Number::Float(f) => Ok(Value::Float(-f)),
                    },
                }
            }
            Expr::Binary { op, left, right } => self.eval_binary(*op, left, right, scope),
            Expr::Conditional {
                condition,
                then,
                otherwise,
            } => {
                let value = self.eval_expr(condition, scope)?;
                if value.is_truthy() {
                    match then {
                        Some(then) => self.eval_expr(then, scope),
                        None => Ok(value),
                    }
                } else {
                    self.eval_expr(otherwise, scope)
                }
            }
        }
    }

    fn eval_args(&mut self, args: &[Expr], scope: ScopeId) -> Result<Vec<Value>> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval_expr(arg, scope)?);
        }
        Ok(values)
    }

    fn eval_binary(&mut self, op: BinaryOp, left: &Expr, right: &Expr, scope: ScopeId) -> Result<Value> {
        let l = self.eval_expr(left, scope)?;
        match op {
            BinaryOp::Or if l.is_truthy() => return Ok(Value::Bool(true)),
            BinaryOp::And if !l.is_truthy() => return Ok(Value::Bool(false)),
            BinaryOp::Or | BinaryOp::And => {
                let r = self.eval_expr(right, scope)?;
                return Ok(Value::Bool(r.is_truthy()));
            }
            _ => {}
        }

        let r = self.eval_expr(right, scope)?;
        let result = match op {
            BinaryOp::Equal => Value::Bool(l.loose_eq(&r)),
            BinaryOp::NotEqual => Value::Bool(!l.loose_eq(&r)),
            BinaryOp::Identical => Value::Bool(l == r),
            BinaryOp::NotIdentical => Value::Bool(l != r),
            BinaryOp::Less => Value::Bool(compare(&l, &r) == Some(std::cmp::Ordering::Less)),
            BinaryOp::Greater => Value::Bool(compare(&l, &r) == Some(std::cmp::Ordering::Greater)),
            BinaryOp::LessOrEqual => Value::Bool(matches!(
                compare(&l, &r),
                Some(std::cmp::Ordering::Less | std::cmp::Ordering::Equal)
            )),
            BinaryOp::GreaterOrEqual => Value::Bool(matches!(
                compare(&l, &r),
                Some(std::cmp::Ordering::Greater | std::cmp::Ordering::Equal)
            )),
            BinaryOp::In => Value::Bool(contains(&r, &l)?),
            BinaryOp::NotIn => Value::Bool(!contains(&r, &l)?),
            BinaryOp::Matches => {
                let subject = self.stringify(&l, scope)?;
                let pattern = self.stringify(&r, scope)?;
                Value::Bool(compile_pattern(&pattern)?.is_match(&subject))
            }
            BinaryOp::Range => range(&l, &r)?,
            BinaryOp::Concat => {
                let mut text = self.stringify(&l, scope)?;
                text.push_str(&self.stringify(&r, scope)?);
                Value::String(text)
            }
            BinaryOp::BitOr | BinaryOp::BitXor | BinaryOp::BitAnd => bitwise(op, &l, &r)?,
            _ => arithmetic(op, &l, &r)?,
        };
        Ok(result)
    }

    /// `target.key` and `target[key]`
    fn access(&mut self, target: Value, key: &Value, scope: ScopeId) -> Result<Value> {
        match target {
            Value::Scope(id) => {
                let key = self.stringify(key, scope)?;
                self.get(id, &key)
            }
            Value::Map(map) => {
                let key = self.stringify(key, scope)?;
                Ok(map.get(&key).cloned().unwrap_or_default())
            }
            Value::List(items) => Ok(key
                .as_i64()
                .and_then(|i| usize::try_from(i).ok())
                .and_then(|i| items.get(i).cloned())
                .unwrap_or_default()),
            Value::String(s) => Ok(key
                .as_i64()
                .and_then(|i| usize::try_from(i).ok())
                .and_then(|i| s.chars().nth(i))
                .map(|c| Value::String(c.to_string()))
                .unwrap_or_default()),
            other => Err(ExpressionError::Type(format!(
                "Can not access '{}' on {}",
                key,
                other.type_name()
            ))
            .into()),
        }
    }

    /// Call a method on a value
    pub fn call_method(
        &mut self,
        target: Value,
        method: &str,
        args: Vec<Value>,
        scope: ScopeId,
    ) -> Result<Value> {
        let result = match (&target, method) {
            (Value::Scope(id), "get") => {
                let path = string_arg(&args, 0);
                match args.get(1) {
                    Some(default) => self.get_or(*id, &path, default.clone())?,
                    None => self.get(*id, &path)?,
                }
            }
            (Value::Scope(id), "has") => Value::Bool(self.has(*id, &string_arg(&args, 0))?),
            (Value::Scope(id), "set") => {
                let value = args.get(1).cloned().unwrap_or_default();
                self.set(*id, &string_arg(&args, 0), value.clone())?;
                value
            }
            (Value::Scope(id), "remove") => {
                self.remove(*id, &string_arg(&args, 0))?;
                Value::Null
            }

            (Value::String(s), "length") => Value::Int(s.chars().count() as i64),
            (Value::String(s), "upper") => Value::String(s.to_uppercase()),
            (Value::String(s), "lower") => Value::String(s.to_lowercase()),
            (Value::String(s), "trim") => Value::String(s.trim().to_string()),
            (Value::String(s), "split") => {
                let separator = args.first().map(|v| v.to_string()).unwrap_or_else(|| ",".to_string());
                Value::List(
                    s.split(separator.as_str())
                        .map(|part| Value::String(part.to_string()))
                        .collect(),
                )
            }
            (Value::String(s), "contains") => Value::Bool(s.contains(&string_arg(&args, 0))),
            (Value::String(s), "startsWith") => Value::Bool(s.starts_with(&string_arg(&args, 0))),
            (Value::String(s), "endsWith") => Value::Bool(s.ends_with(&string_arg(&args, 0))),
            (Value::String(s), "replace") => {
                Value::String(s.replace(&string_arg(&args, 0), &string_arg(&args, 1)))
            }

            (Value::List(items), "length" | "count") => Value::Int(items.len() as i64),
            (Value::List(items), "join") => {
                let separator = args.first().map(|v| v.to_string()).unwrap_or_else(|| ",".to_string());
                let mut parts = Vec::with_capacity(items.len());
                for item in items {
                    parts.push(self.stringify(item, scope)?);
                }
                Value::String(parts.join(&separator))
            }
            (Value::List(items), "first") => items.first().cloned().unwrap_or_default(),
            (Value::List(items), "last") => items.last().cloned().unwrap_or_default(),
            (Value::List(items), "contains") => {
                let needle = args.first().cloned().unwrap_or_default();
                Value::Bool(items.iter().any(|item| item.loose_eq(&needle)))
            }

            (Value::Map(map), "length" | "count") => Value::Int(map.len() as i64),
            (Value::Map(map), "keys") => {
                Value::List(map.keys().map(|k| Value::String(k.clone())).collect())
            }
            (Value::Map(map), "values") => Value::List(map.values().cloned().collect()),
            (Value::Map(map), "has") => Value::Bool(map.contains_key(&string_arg(&args, 0))),

            (Value::Callable(callable), "call") => {
                let callable = callable.clone();
                return callable.call(self, scope, args);
            }

            _ => {
                return Err(ExpressionError::UnknownMethod {
                    method: method.to_string(),
                    target: target.type_name().to_string(),
                }
                .into())
            }
        };
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use crate::error::{ExpressionError, KiteError};
    use crate::runner::Context;
    use crate::scope::{Role, ScopeId, Value};
    use std::rc::Rc;

    fn setup() -> (Context, ScopeId) {
        let mut ctx = Context::new();
        let root = ctx.scopes.create(None, Rc::default(), Role::Plain);
        (ctx, root)
    }

    fn eval(ctx: &mut Context, scope: ScopeId, source: &str) -> Value {
        ctx.evaluate_expression(source, scope).unwrap()
    }

    #[test]
    fn test_arithmetic() {
        let (mut ctx, root) = setup();
        assert_eq!(eval(&mut ctx, root, "1 + 2 * 3"), Value::Int(7));
        assert_eq!(eval(&mut ctx, root, "(1 + 2) * 3"), Value::Int(9));
        assert_eq!(eval(&mut ctx, root, "7 / 2"), Value::Float(3.5));
        assert_eq!(eval(&mut ctx, root, "6 / 2"), Value::Int(3));
        assert_eq!(eval(&mut ctx, root, "7 % 3"), Value::Int(1));
        assert_eq!(eval(&mut ctx, root, "2 ** 10"), Value::Int(1024));
        assert_eq!(eval(&mut ctx, root, "-3 + 1"), Value::Int(-2));
        assert_eq!(eval(&mut ctx, root, "'2' + 3"), Value::Int(5));
    }

    #[test]
    fn test_division_by_zero() {
        let (mut ctx, root) = setup();
        assert!(matches!(
            ctx.evaluate_expression("1 / 0", root),
            Err(KiteError::Expression(ExpressionError::Type(_)))
        ));
    }

    #[test]
    fn test_integer_overflow_falls_back_to_float() {
        let (mut ctx, root) = setup();
        assert_eq!(
            eval(&mut ctx, root, "(-9223372036854775807 - 1) / -1"),
            Value::Float(9223372036854775808.0)
        );
        assert_eq!(
            eval(&mut ctx, root, "(-9223372036854775807 - 1) % -1"),
            Value::Float(0.0)
        );
        assert_eq!(eval(&mut ctx, root, "-7 % 3"), Value::Int(-1));
    }

    #[test]
    fn test_logic_and_comparison() {
        let (mut ctx, root) = setup();
        assert_eq!(eval(&mut ctx, root, "1 < 2 and 'b' > 'a'"), Value::Bool(true));
        assert_eq!(eval(&mut ctx, root, "not true or false"), Value::Bool(false));
        assert_eq!(eval(&mut ctx, root, "'1' == 1"), Value::Bool(true));
        assert_eq!(eval(&mut ctx, root, "'1' === 1"), Value::Bool(false));
        assert_eq!(eval(&mut ctx, root, "10 >= '9'"), Value::Bool(true));
        assert_eq!(eval(&mut ctx, root, "2 in [1, 2]"), Value::Bool(true));
        assert_eq!(eval(&mut ctx, root, "3 not in [1, 2]"), Value::Bool(true));
    }

    #[test]
    fn test_short_circuit_skips_missing_variables() {
        let (mut ctx, root) = setup();
        assert_eq!(eval(&mut ctx, root, "false and missing"), Value::Bool(false));
        assert_eq!(eval(&mut ctx, root, "true or missing"), Value::Bool(true));
    }

    #[test]
    fn test_concat_range_and_conditionals() {
        let (mut ctx, root) = setup();
        ctx.set(root, "user", "").unwrap();
        assert_eq!(eval(&mut ctx, root, "'a' ~ 1 ~ true"), Value::from("a1true"));
        assert_eq!(
            eval(&mut ctx, root, "1..3"),
            Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)])
        );
        assert_eq!(eval(&mut ctx, root, "user ? user : 'nobody'"), Value::from("nobody"));
        assert_eq!(eval(&mut ctx, root, "user ?: 'anon'"), Value::from("anon"));
        assert_eq!(eval(&mut ctx, root, "user ? 'x'"), Value::Null);
    }

    #[test]
    fn test_oversized_range_is_rejected() {
        let (mut ctx, root) = setup();
        assert!(matches!(
            ctx.evaluate_expression("1..100000000000", root),
            Err(KiteError::Expression(ExpressionError::Type(_)))
        ));
        assert_eq!(
            eval(&mut ctx, root, "3..1"),
            Value::List(vec![Value::Int(3), Value::Int(2), Value::Int(1)])
        );
    }

    #[test]
    fn test_matches() {
        let (mut ctx, root) = setup();
        assert_eq!(eval(&mut ctx, root, "'v1.2' matches '/^v\\\\d+/'"), Value::Bool(true));
        assert_eq!(eval(&mut ctx, root, "'ABC' matches '/abc/i'"), Value::Bool(true));
        assert_eq!(eval(&mut ctx, root, "'abc' matches '/^b/'"), Value::Bool(false));
        assert!(matches!(
            ctx.evaluate_expression("'a' matches '/(/'", root),
            Err(KiteError::Expression(ExpressionError::InvalidRegex { .. }))
        ));
    }

    #[test]
    fn test_property_and_index_access() {
        let (mut ctx, root) = setup();
        assert_eq!(eval(&mut ctx, root, "{a: {b: 2}}.a.b"), Value::Int(2));
        assert_eq!(eval(&mut ctx, root, "[10, 20][1]"), Value::Int(20));
        assert_eq!(eval(&mut ctx, root, "{a: 1}['a']"), Value::Int(1));
        assert_eq!(eval(&mut ctx, root, "[1][5]"), Value::Null);
    }

    #[test]
    fn test_string_list_and_map_methods() {
        let (mut ctx, root) = setup();
        ctx.set(root, "name", "  Kite ").unwrap();
        ctx.set(root, "items", Value::List(vec![Value::from("a"), Value::from("b")]))
            .unwrap();

        assert_eq!(eval(&mut ctx, root, "name.trim().lower()"), Value::from("kite"));
        assert_eq!(eval(&mut ctx, root, "items.join('-')"), Value::from("a-b"));
        assert_eq!(eval(&mut ctx, root, "items.count()"), Value::Int(2));
        assert_eq!(eval(&mut ctx, root, "items.last()"), Value::from("b"));
        assert_eq!(eval(&mut ctx, root, "'a,b'.split(',').length()"), Value::Int(2));
        assert_eq!(eval(&mut ctx, root, "{x: 1}.keys()"), Value::List(vec![Value::from("x")]));
        assert_eq!(eval(&mut ctx, root, "'release'.startsWith('rel')"), Value::Bool(true));
    }

    #[test]
    fn test_scope_methods() {
        let (mut ctx, root) = setup();
        assert_eq!(eval(&mut ctx, root, "this.set('x', 5)"), Value::Int(5));
        assert_eq!(eval(&mut ctx, root, "this.get('x')"), Value::Int(5));
        assert_eq!(eval(&mut ctx, root, "this.has('y')"), Value::Bool(false));
        assert_eq!(eval(&mut ctx, root, "this.get('y', 'fallback')"), Value::from("fallback"));
    }

    #[test]
    fn test_unknown_method() {
        let (mut ctx, root) = setup();
        assert!(matches!(
            ctx.evaluate_expression("1.nope()", root),
            Err(KiteError::Expression(ExpressionError::UnknownMethod { .. }))
        ));
    }
}
