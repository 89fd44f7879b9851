//! Functions available inside expressions
//!
//! Every function receives the scope the expression is evaluated against.
//! Calls written in templates (`confirm("Sure?")`) arrive here through the
//! `call` builtin, which also accepts callables stored in variables.

use crate::error::{ExpressionError, Result};
use crate::expression::eval::compile_pattern;
use crate::runner::Context;
use crate::scope::{Callable, ScopeId, Value};
use std::collections::HashMap;

/// Named native functions
#[derive(Debug, Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, Callable>,
}

fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or_default()
}

fn path_arg(args: &[Value], index: usize) -> String {
    arg(args, index).to_string()
}

impl FunctionRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the builtin functions
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("get", |ctx, scope, args| ctx.get(scope, &path_arg(&args, 0)));
        registry.register("set", |ctx, scope, args| {
            let value = arg(&args, 1);
            ctx.set(scope, &path_arg(&args, 0), value.clone())?;
            Ok(value)
        });
        registry.register("isset", |ctx, scope, args| {
            Ok(Value::Bool(ctx.has(scope, &path_arg(&args, 0))?))
        });
        registry.register("empty", |ctx, scope, args| {
            let path = path_arg(&args, 0);
            let empty = !ctx.has(scope, &path)? || !ctx.get(scope, &path)?.is_truthy();
            Ok(Value::Bool(empty))
        });
        registry.register("call", |ctx, scope, mut args| {
            if args.is_empty() {
                return Err(ExpressionError::UnknownFunction(String::new()).into());
            }
            let target = args.remove(0);
            ctx.call_value(target, scope, args)
        });
        registry.register("confirm", |ctx, _, args| {
            let question = path_arg(&args, 0);
            let default = args.get(1).map(Value::is_truthy).unwrap_or(true);
            Ok(Value::Bool(ctx.confirm(&question, default)?))
        });
        registry.register("answer", |ctx, _, args| {
            let question = path_arg(&args, 0);
            let default = args.get(1).filter(|v| !v.is_null()).map(|v| v.to_string());
            Ok(Value::String(ctx.answer(&question, default)?))
        });
        registry.register("choose", |ctx, _, args| {
            let question = path_arg(&args, 0);
            let default = args.get(2).filter(|v| !v.is_null()).cloned();
            ctx.choose(&question, &arg(&args, 1), default)
        });
        registry.register("replace", |_, _, args| {
            let search = path_arg(&args, 0);
            let replace = path_arg(&args, 1);
            let subject = path_arg(&args, 2);
            if arg(&args, 3).is_truthy() {
                let pattern = compile_pattern(&search)?;
                Ok(Value::String(
                    pattern.replace_all(&subject, replace.as_str()).into_owned(),
                ))
            } else {
                Ok(Value::String(subject.replace(&search, &replace)))
            }
        });
        registry
    }

    /// Register (or replace) a function
    pub fn register<F>(&mut self, name: &str, func: F)
    where
        F: Fn(&mut Context, ScopeId, Vec<Value>) -> Result<Value> + 'static,
    {
        self.functions
            .insert(name.to_string(), Callable::new(name, func));
    }

    pub fn get(&self, name: &str) -> Option<Callable> {
        self.functions.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }
}

impl Context {
    /// Call a registered function by name
    pub fn call_function(&mut self, name: &str, scope: ScopeId, args: Vec<Value>) -> Result<Value> {
        let function = self
            .functions
            .get(name)
            .ok_or_else(|| ExpressionError::UnknownFunction(name.to_string()))?;
        function.call(self, scope, args)
    }

    /// Call a callable value, a registered function name, or a variable
    /// holding a callable
    pub fn call_value(&mut self, target: Value, scope: ScopeId, args: Vec<Value>) -> Result<Value> {
        match target {
            Value::Callable(callable) => callable.call(self, scope, args),
            Value::String(name) => {
                if self.functions.contains(&name) {
                    return self.call_function(&name, scope, args);
                }
                match self.get_or(scope, &name, Value::Null)? {
                    Value::Callable(callable) => callable.call(self, scope, args),
                    _ => Err(ExpressionError::UnknownFunction(name).into()),
                }
            }
            other => Err(ExpressionError::UnknownFunction(other.to_string()).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::error::{ExpressionError, KiteError};
    use crate::runner::{Context, ScriptedPrompt};
    use crate::scope::{Callable, Role, ScopeId, Value};
    use std::rc::Rc;

    fn setup() -> (Context, ScopeId) {
        let mut ctx = Context::new();
        let root = ctx.scopes.create(None, Rc::default(), Role::Plain);
        (ctx, root)
    }

    #[test]
    fn test_isset_and_empty() {
        let (mut ctx, root) = setup();
        ctx.set(root, "filled", "x").unwrap();
        ctx.set(root, "blank", "").unwrap();

        assert_eq!(ctx.evaluate("{isset(filled)}", root).unwrap(), Value::Bool(true));
        assert_eq!(ctx.evaluate("{isset(nothing.here)}", root).unwrap(), Value::Bool(false));
        assert_eq!(ctx.evaluate("{empty(blank)}", root).unwrap(), Value::Bool(true));
        assert_eq!(ctx.evaluate("{empty(nothing)}", root).unwrap(), Value::Bool(true));
        assert_eq!(ctx.evaluate("{empty(filled)}", root).unwrap(), Value::Bool(false));
    }

    #[test]
    fn test_get_and_set() {
        let (mut ctx, root) = setup();
        assert_eq!(ctx.evaluate("{set('a.b', 3)}", root).unwrap(), Value::Int(3));
        assert_eq!(ctx.evaluate("{get('a.b') + a.b}", root).unwrap(), Value::Int(6));
    }

    #[test]
    fn test_replace() {
        let (mut ctx, root) = setup();
        assert_eq!(
            ctx.evaluate("{replace('-', '_', 'a-b-c')}", root).unwrap(),
            Value::from("a_b_c")
        );
        assert_eq!(
            ctx.evaluate("{replace('/[0-9]+/', 'N', 'v12.3', true)}", root).unwrap(),
            Value::from("vN.N")
        );
    }

    #[test]
    fn test_call_registered_and_stored_callables() {
        let (mut ctx, root) = setup();
        ctx.functions.register("double", |_, _, args| {
            Ok(Value::Int(args.first().and_then(Value::as_i64).unwrap_or(0) * 2))
        });
        ctx.set(
            root,
            "triple",
            Callable::new("triple", |_, _, args| {
                Ok(Value::Int(args.first().and_then(Value::as_i64).unwrap_or(0) * 3))
            }),
        )
        .unwrap();

        assert_eq!(ctx.evaluate("{double(4)}", root).unwrap(), Value::Int(8));
        assert_eq!(ctx.evaluate("{triple(4)}", root).unwrap(), Value::Int(12));
        assert!(matches!(
            ctx.evaluate("{nothing()}", root),
            Err(KiteError::Expression(ExpressionError::UnknownFunction(name))) if name == "nothing"
        ));
    }

    #[test]
    fn test_prompt_functions() {
        let (mut ctx, root) = setup();
        ctx.prompt = Box::new(ScriptedPrompt::new(["", "n", "Alice", "2"]));

        assert_eq!(ctx.evaluate("{confirm('Go?')}", root).unwrap(), Value::Bool(true));
        assert_eq!(ctx.evaluate("{confirm('Go?')}", root).unwrap(), Value::Bool(false));
        assert_eq!(ctx.evaluate("{answer('Name?')}", root).unwrap(), Value::from("Alice"));
        assert_eq!(
            ctx.evaluate("{choose('Pick', ['a', 'b', 'c'])}", root).unwrap(),
            Value::from("c")
        );
    }
}
