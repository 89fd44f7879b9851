//! Template expression engine
//!
//! Strings with unescaped `{...}` blocks are templates. A template made of a
//! single expression evaluates to the expression's native value; anything
//! else is rendered to a string with every expression result stringified.
//! Results that are well-formed templates again are expanded until they
//! settle; any other result is final, braces included.
//!
//! Expansion keeps a memo of final strings for the duration of the outermost
//! [`Context::evaluate`] call, so text produced from escaped braces
//! (`\{literal\}`) is not picked up as a template a second time.

pub mod eval;
pub mod functions;
pub mod lexer;
pub mod parser;

pub use functions::FunctionRegistry;
pub use parser::Expr;

use crate::error::{ExpressionError, Result};
use crate::runner::Context;
use crate::scope::{Role, ScopeId, Value};
use lexer::Segment;
use std::rc::Rc;

/// Maximum number of re-expansion passes over one string
const MAX_PASSES: usize = 64;

/// Maximum nesting of `evaluate` calls (templates referring to templates)
const MAX_DEPTH: usize = 48;

/// True when `text` contains an unescaped opening brace
pub fn is_template(text: &str) -> bool {
    let mut previous = None;
    for c in text.chars() {
        if c == '{' && previous != Some('\\') {
            return true;
        }
        previous = Some(c);
    }
    false
}

fn has_escapes(text: &str) -> bool {
    text.contains("\\{") || text.contains("\\}")
}

/// Turn `\{` and `\}` into plain braces
pub fn unescape(text: &str) -> String {
    text.replace("\\{", "{").replace("\\}", "}")
}

impl Context {
    /// Expand `value` against `scope`
    ///
    /// Non-string values are returned as they are.
    pub fn evaluate(&mut self, value: impl Into<Value>, scope: ScopeId) -> Result<Value> {
        match value.into() {
            Value::String(text) => self.expand_guarded(text, scope),
            other => Ok(other),
        }
    }

    fn expand_guarded(&mut self, text: String, scope: ScopeId) -> Result<Value> {
        if self.eval_depth >= MAX_DEPTH {
            return Err(ExpressionError::RecursiveExpansion(text).into());
        }
        self.eval_depth += 1;
        let result = self.expand(text, scope);
        self.eval_depth -= 1;
        if self.eval_depth == 0 {
            self.memo.clear();
        }
        result
    }

    fn expand(&mut self, mut text: String, scope: ScopeId) -> Result<Value> {
        for _ in 0..MAX_PASSES {
            if self.memo.contains(&text) {
                return Ok(Value::String(text));
            }
            if !is_template(&text) {
                if has_escapes(&text) {
                    text = unescape(&text);
                    self.memo.insert(text.clone());
                }
                return Ok(Value::String(text));
            }

            let segments = lexer::split_template(&text)?;
            let value = match segments.as_slice() {
                [Segment::Expression { source, .. }] => self.evaluate_expression(source, scope)?,
                _ => Value::String(self.render(&segments, scope)?),
            };

            match value {
                Value::String(next) if self.expands_again(&next) => {
                    tracing::trace!(from = %text, to = %next, "re-expanding template result");
                    text = next;
                }
                Value::String(done) => {
                    self.memo.insert(done.clone());
                    return Ok(Value::String(done));
                }
                other => return Ok(other),
            }
        }
        Err(ExpressionError::RecursiveExpansion(text).into())
    }

    /// Concatenate literal text and stringified expression results
    fn render(&mut self, segments: &[Segment], scope: ScopeId) -> Result<String> {
        let mut out = String::new();
        for segment in segments {
            match segment {
                Segment::Literal(text) => out.push_str(&unescape(text)),
                Segment::Expression { source, .. } => {
                    let mut value = self.evaluate_expression(source, scope)?;
                    if let Value::String(s) = &value {
                        if self.expands_again(s) {
                            value = self.expand_guarded(s.clone(), scope)?;
                        }
                    }
                    out.push_str(&self.stringify(&value, scope)?);
                }
            }
        }
        // The rendered text is final even if it now contains braces
        // that came from escapes or expression results.
        self.memo.insert(out.clone());
        Ok(out)
    }

    /// True when an expression result is a template worth another pass:
    /// not seen as final yet, balanced, and every fragment parses
    fn expands_again(&mut self, text: &str) -> bool {
        if !is_template(text) || self.memo.contains(text) {
            return false;
        }
        let segments = match lexer::split_template(text) {
            Ok(segments) => segments,
            Err(_) => return false,
        };
        segments.iter().all(|segment| match segment {
            Segment::Literal(_) => true,
            Segment::Expression { source, .. } => {
                source.trim().is_empty() || self.parse_cached(source).is_ok()
            }
        })
    }

    fn parse_cached(&mut self, source: &str) -> Result<Rc<Expr>> {
        if let Some(expr) = self.ast_cache.get(source) {
            return Ok(Rc::clone(expr));
        }
        let expr = Rc::new(parser::parse(lexer::lex(source)?)?);
        self.ast_cache.insert(source.to_string(), Rc::clone(&expr));
        Ok(expr)
    }

    /// Parse (cached) and evaluate a single expression fragment
    pub fn evaluate_expression(&mut self, source: &str, scope: ScopeId) -> Result<Value> {
        if source.trim().is_empty() {
            return Ok(Value::Null);
        }
        let expr = self.parse_cached(source)?;
        self.eval_expr(&expr, scope)
    }

    /// Render a value as text
    ///
    /// Node scopes render as their url and task scopes as their name.
    /// Strings are taken as they are; templates are expanded by the caller.
    pub fn stringify(&mut self, value: &Value, scope: ScopeId) -> Result<String> {
        match value {
            Value::Scope(id) => {
                let id = *id;
                match self.scopes.role(id) {
                    Role::Node => self.node_url(id),
                    Role::Task(_) => {
                        let name = self.get_or(id, "name", Value::Null)?;
                        self.stringify(&name, scope)
                    }
                    Role::Plain => Ok(value.to_string()),
                }
            }
            other => Ok(other.to_string()),
        }
    }
}
