//! `if` condition evaluation
//!
//! The `if` variable of a task decides whether the scheduler runs it.

use crate::error::{ExecutionError, Result};
use crate::runner::Context;
use crate::scope::{ScopeId, Value};

impl Context {
    /// Evaluate the `if` condition of `task`
    ///
    /// - null or empty: run
    /// - bool: taken as is
    /// - string: evaluated as an expression on the task and coerced
    /// - callable: called with the task, must return a bool
    pub fn should_run(&mut self, task: ScopeId) -> Result<bool> {
        match self.get_or(task, "if", Value::Null)? {
            Value::Null => Ok(true),
            Value::Bool(b) => Ok(b),
            Value::String(condition) if condition.trim().is_empty() => Ok(true),
            Value::String(condition) => Ok(self.evaluate_expression(&condition, task)?.is_truthy()),
            Value::Callable(callback) => match callback.call(self, task, vec![Value::Scope(task)])? {
                Value::Bool(b) => Ok(b),
                other => Err(ExecutionError::NonBooleanCondition(other.type_name().to_string()).into()),
            },
            other => Ok(other.is_truthy()),
        }
    }
}
