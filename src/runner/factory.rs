//! Task and workflow factory
//!
//! Task specs come from configuration (maps, kind names) or from code
//! (callables). Every task is created below a parent scope and receives its
//! variables through the regular assignment rules.

use crate::error::{ConfigError, KiteError, Result};
use crate::runner::task::{TaskEntry, TaskKind};
use crate::runner::Context;
use crate::scope::{ScopeId, Value, ValueMap};
use std::fs;
use std::path::Path;
use std::rc::Rc;

fn task_kind_named(name: &str) -> Result<TaskKind> {
    TaskKind::from_name(name).ok_or_else(|| ConfigError::UnknownTaskType(name.to_string()).into())
}

impl Context {
    /// Create a task from `spec` below `parent`
    ///
    /// - map with `workflow`: a workflow of that name
    /// - map: a task of its `type` (default `sub`)
    /// - string: a task of that kind
    /// - callable: a callback task
    ///
    /// `options` win over keys of a map spec.
    pub fn create_task(&mut self, spec: Value, parent: ScopeId, options: ValueMap) -> Result<ScopeId> {
        let mut values = options;
        let task = match spec {
            Value::Map(map) => {
                for (key, value) in map {
                    values.entry(key).or_insert(value);
                }
                if let Some(workflow) = values.shift_remove("workflow") {
                    let name = self.stringify(&workflow, parent)?;
                    self.create_workflow(&name, parent)?
                } else {
                    let kind = match values.shift_remove("type") {
                        None | Some(Value::Null) => TaskKind::Sub,
                        Some(kind) => {
                            let name = self.stringify(&kind, parent)?;
                            task_kind_named(&name)?
                        }
                    };
                    self.new_task(kind, parent)
                }
            }
            Value::String(kind) => {
                let kind = task_kind_named(&kind)?;
                self.new_task(kind, parent)
            }
            callable @ Value::Callable(_) => {
                values.insert("callback".to_string(), callable);
                self.new_task(TaskKind::Callback, parent)
            }
            other => {
                return Err(ConfigError::InvalidTaskDefinition(format!(
                    "can not create a task from {}",
                    other.type_name()
                ))
                .into())
            }
        };

        tracing::trace!(task = %task, parent = %parent, "created task");
        self.set_from_map(task, values)?;
        Ok(task)
    }

    /// Create a registered workflow below `parent`
    pub fn create_workflow(&mut self, name: &str, parent: ScopeId) -> Result<ScopeId> {
        let workflow = self
            .workflows
            .get(name)
            .ok_or_else(|| ConfigError::UnknownWorkflow(name.to_string()))?;

        let declarations = workflow
            .declarations()
            .inherit(TaskKind::Workflow.declarations());
        let label = workflow.name().to_string();
        let mut entry = TaskEntry::new(TaskKind::Workflow);
        entry.workflow = Some(workflow);

        let id = self.new_task_scope(entry, Some(parent), Rc::new(declarations), &label);
        tracing::debug!(workflow = %label, task = %id, "created workflow");
        Ok(id)
    }

    /// Load a list or map of task specs from a YAML file relative to the
    /// config directory
    pub fn load_script(&self, path: &str) -> Result<Value> {
        let full_path = match Path::new(path) {
            p if p.is_absolute() => p.to_path_buf(),
            p => self.config_dir().join(p),
        };
        let include_error = |error: String| -> KiteError {
            ConfigError::IncludeFile {
                path: full_path.clone(),
                error,
            }
            .into()
        };

        let contents = fs::read_to_string(&full_path).map_err(|e| include_error(e.to_string()))?;
        let yaml: serde_yaml::Value =
            serde_yaml::from_str(&contents).map_err(|e| include_error(e.to_string()))?;
        Ok(Value::from(yaml))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::output::{Output, Verbosity};
    use crate::scope::{Callable, Role};
    use tempfile::TempDir;

    fn setup() -> (Context, ScopeId) {
        let mut ctx = Context::new();
        let root = ctx.scopes.create(None, Rc::default(), Role::Plain);
        (ctx, root)
    }

    fn spec(pairs: &[(&str, Value)]) -> Value {
        Value::Map(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        )
    }

    #[test]
    fn test_map_spec_uses_type_or_sub() {
        let (mut ctx, root) = setup();
        let shell = ctx
            .create_task(
                spec(&[("type", Value::from("shell")), ("command", Value::from("ls"))]),
                root,
                ValueMap::new(),
            )
            .unwrap();
        assert_eq!(ctx.task_kind(shell).unwrap(), TaskKind::Shell);
        assert_eq!(ctx.get(shell, "command").unwrap(), Value::from("ls"));
        assert!(!ctx.scopes.contains_local(shell, "type"));

        let sub = ctx.create_task(spec(&[]), root, ValueMap::new()).unwrap();
        assert_eq!(ctx.task_kind(sub).unwrap(), TaskKind::Sub);
    }

    #[test]
    fn test_options_override_spec() {
        let (mut ctx, root) = setup();
        let mut options = ValueMap::new();
        options.insert("name".into(), Value::from("deploy"));
        let task = ctx
            .create_task(
                spec(&[("type", Value::from("output")), ("name", Value::from("ignored"))]),
                root,
                options,
            )
            .unwrap();
        assert_eq!(ctx.task_name(task).unwrap(), "deploy");
    }

    #[test]
    fn test_string_and_callable_specs() {
        let (mut ctx, root) = setup();
        let task = ctx
            .create_task(Value::from("remote-shell"), root, ValueMap::new())
            .unwrap();
        assert_eq!(ctx.task_kind(task).unwrap(), TaskKind::RemoteShell);

        let callback = ctx
            .create_task(
                Value::Callable(Callable::new("noop", |_, _, _| Ok(Value::Null))),
                root,
                ValueMap::new(),
            )
            .unwrap();
        assert_eq!(ctx.task_kind(callback).unwrap(), TaskKind::Callback);
        assert!(matches!(ctx.get(callback, "callback").unwrap(), Value::Callable(_)));
    }

    #[test]
    fn test_invalid_specs() {
        let (mut ctx, root) = setup();
        assert!(matches!(
            ctx.create_task(Value::from("teleport"), root, ValueMap::new()),
            Err(KiteError::Config(ConfigError::UnknownTaskType(name))) if name == "teleport"
        ));
        assert!(matches!(
            ctx.create_task(Value::Int(3), root, ValueMap::new()),
            Err(KiteError::Config(ConfigError::InvalidTaskDefinition(_)))
        ));
        assert!(matches!(
            ctx.create_workflow("nope", root),
            Err(KiteError::Config(ConfigError::UnknownWorkflow(_)))
        ));
    }

    #[test]
    fn test_workflow_spec() {
        let (mut ctx, root) = setup();
        let workflow = ctx
            .create_task(
                spec(&[("workflow", Value::from("stage-select")), ("sliding", Value::Bool(true))]),
                root,
                ValueMap::new(),
            )
            .unwrap();
        assert_eq!(ctx.task_kind(workflow).unwrap(), TaskKind::Workflow);
        assert_eq!(ctx.get(workflow, "sliding").unwrap(), Value::Bool(true));
        assert_eq!(ctx.get(workflow, "question").unwrap(), Value::from("Select stage"));
    }

    #[test]
    fn test_script_body_loads_tasks() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(
            temp_dir.path().join("greet.yml"),
            "- type: output\n  message: hello\n- type: output\n  message: bye\n",
        )
        .unwrap();

        let (output, buffer) = Output::buffered(Verbosity::Normal);
        let mut ctx = Context::new()
            .with_output(output)
            .with_config_path(temp_dir.path().join("kite.yml"));
        let root = ctx.scopes.create(None, Rc::default(), Role::Plain);
        let sub = ctx.new_task(TaskKind::Sub, root);
        ctx.set(sub, "script", "greet.yml").unwrap();

        ctx.run_task(sub).unwrap();
        assert_eq!(buffer.borrow().as_str(), "  hello\n  bye\n");
    }

    #[test]
    fn test_missing_script() {
        let temp_dir = TempDir::new().unwrap();
        let ctx = Context::new().with_working_dir(temp_dir.path().to_path_buf());
        assert!(matches!(
            ctx.load_script("missing.yml"),
            Err(KiteError::Config(ConfigError::IncludeFile { .. }))
        ));
    }
}
