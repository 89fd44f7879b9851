//! Task kinds and the single task lifecycle
//!
//! A task is a scope with a [`TaskEntry`] attached. Leaf tasks preview (print
//! their `message`), then execute unless the run is a dry run and the task
//! does not opt into executing in preview.

use crate::error::{ConfigError, KiteError, Result};
use crate::runner::output::Verbosity;
use crate::runner::workflow::Workflow;
use crate::runner::Context;
use crate::scope::{Declarations, Role, ScopeId, Value, ValueMap, VariableSpec};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// Kinds of tasks known to the factory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Job,
    Sub,
    Workflow,
    Iterate,
    TryCatch,
    Output,
    Shell,
    RemoteShell,
    Evaluate,
    Callback,
    Break,
    Exit,
    Answer,
    Confirm,
    Choose,
}

/// Lowercase a kind or workflow name and drop separators
pub(crate) fn normalize_name(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '-' && *c != '_')
        .flat_map(char::to_lowercase)
        .collect()
}

impl TaskKind {
    /// Kinds that can be created by name
    pub const CREATABLE: [TaskKind; 13] = [
        TaskKind::Sub,
        TaskKind::Iterate,
        TaskKind::TryCatch,
        TaskKind::Output,
        TaskKind::Shell,
        TaskKind::RemoteShell,
        TaskKind::Evaluate,
        TaskKind::Callback,
        TaskKind::Break,
        TaskKind::Exit,
        TaskKind::Answer,
        TaskKind::Confirm,
        TaskKind::Choose,
    ];

    /// Look up a creatable kind; `remote-shell`, `RemoteShell` and
    /// `remote_shell` all name the same kind
    pub fn from_name(name: &str) -> Option<Self> {
        let wanted = normalize_name(name);
        Self::CREATABLE
            .into_iter()
            .find(|kind| normalize_name(kind.name()) == wanted)
    }

    pub fn name(self) -> &'static str {
        match self {
            TaskKind::Job => "job",
            TaskKind::Sub => "sub",
            TaskKind::Workflow => "workflow",
            TaskKind::Iterate => "iterate",
            TaskKind::TryCatch => "tryCatch",
            TaskKind::Output => "output",
            TaskKind::Shell => "shell",
            TaskKind::RemoteShell => "remoteShell",
            TaskKind::Evaluate => "evaluate",
            TaskKind::Callback => "callback",
            TaskKind::Break => "break",
            TaskKind::Exit => "exit",
            TaskKind::Answer => "answer",
            TaskKind::Confirm => "confirm",
            TaskKind::Choose => "choose",
        }
    }

    /// Kinds holding an ordered list of child tasks
    pub fn is_composite(self) -> bool {
        matches!(
            self,
            TaskKind::Job | TaskKind::Sub | TaskKind::Workflow | TaskKind::Iterate | TaskKind::TryCatch
        )
    }

    /// Variables recognized by tasks of this kind, most specific first
    pub fn declarations(self) -> Declarations {
        match self {
            TaskKind::Job | TaskKind::Sub | TaskKind::Workflow => base_declarations(),
            TaskKind::Iterate => Declarations::new()
                .variable("array", VariableSpec::new("array|map").required())
                .variable("as", VariableSpec::new("string|map"))
                .variable("key", VariableSpec::new("string"))
                .inherit(base_declarations()),
            TaskKind::TryCatch => Declarations::new()
                .variable("onCatch", VariableSpec::new("mixed"))
                .variable("errorMessage", VariableSpec::new("string"))
                .inherit(base_declarations()),
            TaskKind::Output => Declarations::new()
                .variable("severity", VariableSpec::new("int|string").with_default("normal"))
                .variable("newLine", VariableSpec::new("bool").with_default(true))
                .inherit(base_declarations()),
            TaskKind::Shell => shell_declarations(),
            TaskKind::RemoteShell => Declarations::new().inherit(shell_declarations()),
            TaskKind::Evaluate => Declarations::new()
                .variable("expression", VariableSpec::new("string").required())
                .inherit(base_declarations()),
            TaskKind::Callback => Declarations::new()
                .variable("callback", VariableSpec::new("callable|string").required())
                .inherit(base_declarations()),
            TaskKind::Break => base_declarations(),
            TaskKind::Exit => Declarations::new()
                .variable("code", VariableSpec::new("int").with_default(0))
                .inherit(base_declarations()),
            TaskKind::Answer | TaskKind::Confirm => answer_declarations(),
            TaskKind::Choose => Declarations::new()
                .variable("choices", VariableSpec::new("array|map").required())
                .inherit(answer_declarations()),
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn base_declarations() -> Declarations {
    Declarations::new()
        .variable("name", VariableSpec::new("string"))
        .variable("after", VariableSpec::new("string|array"))
        .variable("before", VariableSpec::new("string|array"))
        .variable("onBefore", VariableSpec::new("mixed"))
        .variable("onAfter", VariableSpec::new("mixed"))
        .variable("message", VariableSpec::new("string"))
        .variable("if", VariableSpec::new("string|callable|bool"))
        .variable("executeInPreview", VariableSpec::new("bool").with_default(false))
        .variable("force", VariableSpec::new("bool").with_default(false))
        .variable("toVar", VariableSpec::new("string"))
}

fn shell_declarations() -> Declarations {
    Declarations::new()
        .variable("command", VariableSpec::new("string|array").required())
        .variable("cwd", VariableSpec::new("string"))
        .variable("argv", VariableSpec::new("string|array"))
        .variable("options", VariableSpec::new("map").with_default(ValueMap::new()))
        .variable("arguments", VariableSpec::new("array").with_default(Vec::<Value>::new()))
        .variable("errorMessage", VariableSpec::new("string"))
        .inherit(base_declarations())
}

fn answer_declarations() -> Declarations {
    Declarations::new()
        .variable("question", VariableSpec::new("string").required())
        .variable("default", VariableSpec::new("string|int|bool"))
        .inherit(base_declarations())
}

/// Lifecycle position of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Created,
    Initialized,
    Previewed,
    Skipped,
    Done,
    Failed,
}

/// Bookkeeping attached to task scopes
#[derive(Debug, Clone)]
pub struct TaskEntry {
    pub kind: TaskKind,
    /// Composite this task was added to
    pub container: Option<ScopeId>,
    pub state: TaskState,
    pub initialized: bool,
    pub started: bool,
    /// Ordered children of a composite
    pub children: Vec<ScopeId>,
    /// Body key (`tasks`, `task`, `workflow`, `script`) that built the children
    pub body: Option<String>,
    /// Workflow receiving every further assignment
    pub forward_to: Option<ScopeId>,
    pub assembled: bool,
    /// Task template prepared by a workflow
    pub prepared: Option<ScopeId>,
    pub workflow: Option<Rc<dyn Workflow>>,
}

impl TaskEntry {
    pub fn new(kind: TaskKind) -> Self {
        TaskEntry {
            kind,
            container: None,
            state: TaskState::Created,
            initialized: false,
            started: false,
            children: Vec::new(),
            body: None,
            forward_to: None,
            assembled: false,
            prepared: None,
            workflow: None,
        }
    }
}

fn not_a_task(id: ScopeId) -> KiteError {
    ConfigError::InvalidTaskDefinition(format!("scope {} is not a task", id)).into()
}

impl Context {
    pub fn entry(&self, id: ScopeId) -> Result<&TaskEntry> {
        self.scopes.task(id).ok_or_else(|| not_a_task(id))
    }

    pub(crate) fn entry_mut(&mut self, id: ScopeId) -> Result<&mut TaskEntry> {
        self.scopes.task_mut(id).ok_or_else(|| not_a_task(id))
    }

    pub fn task_kind(&self, id: ScopeId) -> Result<TaskKind> {
        Ok(self.entry(id)?.kind)
    }

    pub fn task_state(&self, id: ScopeId) -> Option<TaskState> {
        self.scopes.task(id).map(|entry| entry.state)
    }

    /// Children of a composite in execution order
    pub fn task_children(&self, id: ScopeId) -> Vec<ScopeId> {
        self.scopes
            .task(id)
            .map(|entry| entry.children.clone())
            .unwrap_or_default()
    }

    /// Expanded name of a task
    pub fn task_name(&mut self, id: ScopeId) -> Result<String> {
        let name = self.get_or(id, "name", Value::Null)?;
        self.stringify(&name, id)
    }

    /// Allocate a task scope under `parent` with a generated name
    pub(crate) fn new_task_scope(
        &mut self,
        entry: TaskEntry,
        parent: Option<ScopeId>,
        declarations: Rc<Declarations>,
        label: &str,
    ) -> ScopeId {
        let id = self
            .scopes
            .create(parent, declarations, Role::Task(Box::new(entry)));
        self.scopes
            .insert_local(id, "name", Value::String(format!("{}#{}", label, id.index())));
        id
    }

    /// Create a bare task of `kind` under `parent`
    pub fn new_task(&mut self, kind: TaskKind, parent: ScopeId) -> ScopeId {
        self.new_task_scope(
            TaskEntry::new(kind),
            Some(parent),
            Rc::new(kind.declarations()),
            kind.name(),
        )
    }

    /// Expanded string variable, `None` when null or empty
    pub(crate) fn optional_string(&mut self, id: ScopeId, name: &str) -> Result<Option<String>> {
        let value = self.get_or(id, name, Value::Null)?;
        if value.is_null() {
            return Ok(None);
        }
        let text = self.stringify(&value, id)?;
        Ok(if text.is_empty() { None } else { Some(text) })
    }

    /// Run a task of any kind
    pub fn run_task(&mut self, id: ScopeId) -> Result<Value> {
        let kind = self.task_kind(id)?;
        tracing::debug!(task = %id, kind = %kind, "running task");

        let result = match kind {
            TaskKind::Iterate => self.run_iterate(id),
            TaskKind::TryCatch => self.run_try_catch(id),
            k if k.is_composite() => self.run_composite(id),
            TaskKind::Output => self.initialize_task(id).and_then(|_| self.run_output(id)),
            TaskKind::Break => self.initialize_task(id).and_then(|_| self.run_break(id)),
            TaskKind::Exit => self.initialize_task(id).and_then(|_| self.run_exit(id)),
            _ => self.initialize_task(id).and_then(|_| self.run_leaf(id, kind)),
        };

        let entry = self.entry_mut(id)?;
        entry.state = match &result {
            Err(e) if !e.is_break() => TaskState::Failed,
            _ if entry.state == TaskState::Skipped => TaskState::Skipped,
            _ => TaskState::Done,
        };
        result
    }

    /// Print the task message, or whatever the workflow shows instead
    pub(crate) fn preview_task(&mut self, id: ScopeId) -> Result<()> {
        match self.entry(id)?.workflow.clone() {
            Some(workflow) => workflow.preview(self, id)?,
            None => {
                if let Some(message) = self.optional_string(id, "message")? {
                    self.output.writeln(&message);
                }
            }
        }
        self.entry_mut(id)?.state = TaskState::Previewed;
        Ok(())
    }

    /// Whether the task really executes (not dry run, or opted in)
    pub fn should_execute(&mut self, id: ScopeId) -> Result<bool> {
        if !self.dry_run {
            return Ok(true);
        }
        Ok(self
            .get_or(id, "executeInPreview", Value::Bool(false))?
            .is_truthy())
    }

    fn run_leaf(&mut self, id: ScopeId, kind: TaskKind) -> Result<Value> {
        self.preview_task(id)?;
        let execute = self.should_execute(id)?;

        match kind {
            TaskKind::Shell | TaskKind::RemoteShell => self.run_shell(id, kind, !execute),
            _ if !execute => {
                self.entry_mut(id)?.state = TaskState::Skipped;
                Ok(Value::Null)
            }
            _ => self.execute_task(id, kind),
        }
    }

    fn execute_task(&mut self, id: ScopeId, kind: TaskKind) -> Result<Value> {
        let parent = self.scopes.parent(id).unwrap_or(id);
        match kind {
            TaskKind::Evaluate => {
                let expression = match self.scopes.local(id, "expression") {
                    Some(Value::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                    None => String::new(),
                };
                self.evaluate(format!("{{{}}}", expression), parent)
            }
            TaskKind::Callback => {
                let callback = self.get(id, "callback")?;
                if let Value::String(name) = &callback {
                    self.output.debug(&format!("Calling {}", name));
                }
                self.call_value(callback, parent, vec![Value::Scope(parent)])
            }
            TaskKind::Answer => {
                let question = self.question(id)?;
                let default = self.optional_string(id, "default")?;
                Ok(Value::String(self.answer(&question, default)?))
            }
            TaskKind::Confirm => {
                let question = self.question(id)?;
                let default = match self.get_or(id, "default", Value::Null)? {
                    Value::Null => true,
                    other => other.is_truthy(),
                };
                Ok(Value::Bool(self.confirm(&question, default)?))
            }
            TaskKind::Choose => {
                let question = self.question(id)?;
                let choices = self.get(id, "choices")?;
                let default = match self.get_or(id, "default", Value::Null)? {
                    Value::Null => None,
                    other => Some(other),
                };
                self.choose(&question, &choices, default)
            }
            other => Err(ConfigError::InvalidTaskDefinition(format!(
                "{} tasks can not be executed directly",
                other
            ))
            .into()),
        }
    }

    fn question(&mut self, id: ScopeId) -> Result<String> {
        let question = self.get(id, "question")?;
        self.stringify(&question, id)
    }

    fn run_output(&mut self, id: ScopeId) -> Result<Value> {
        let message = self.optional_string(id, "message")?.unwrap_or_default();
        let severity = match self.get_or(id, "severity", Value::Null)? {
            Value::Null => Verbosity::Normal,
            Value::Int(level) => Verbosity::from_level(level),
            other => self
                .stringify(&other, id)?
                .parse::<Verbosity>()
                .map_err(ConfigError::Invalid)?,
        };
        let newline = self.get_or(id, "newLine", Value::Bool(true))?.is_truthy();
        self.output.write(&message, severity, newline);
        Ok(Value::Null)
    }

    fn run_break(&mut self, id: ScopeId) -> Result<Value> {
        let message = self.optional_string(id, "message")?.unwrap_or_default();
        tracing::debug!(task = %id, %message, "break");
        Err(KiteError::Break(message))
    }

    fn run_exit(&mut self, id: ScopeId) -> Result<Value> {
        let code = self.get_or(id, "code", Value::Int(0))?;
        let code = code
            .as_i64()
            .and_then(|c| i32::try_from(c).ok())
            .ok_or_else(|| ConfigError::Invalid(format!("Exit code must be an integer, got {}", code)))?;
        let message = self.optional_string(id, "message")?.unwrap_or_default();
        Err(KiteError::Exit { code, message })
    }

    /// Deep copy the task subtree at `id` below `parent`
    ///
    /// Every scope below `id` is copied; scope references and composite
    /// bookkeeping pointing inside the subtree are redirected to the copies.
    pub fn clone_task(&mut self, id: ScopeId, parent: ScopeId) -> Result<ScopeId> {
        self.entry(id)?;
        let mut mapping = HashMap::new();
        let copy = self.copy_subtree(id, parent, &mut mapping);

        let copies: Vec<ScopeId> = mapping.values().copied().collect();
        for scope in copies {
            let node = self.scopes.node_mut(scope);
            for value in node.values.values_mut() {
                remap_value(value, &mapping);
            }
            if let Role::Task(entry) = &mut node.role {
                let remap = |id: ScopeId| mapping.get(&id).copied().unwrap_or(id);
                entry.container = entry.container.map(remap);
                entry.forward_to = entry.forward_to.map(remap);
                entry.prepared = entry.prepared.map(remap);
                entry.children = entry.children.iter().copied().map(remap).collect();
                entry.started = false;
                entry.state = if entry.initialized {
                    TaskState::Initialized
                } else {
                    TaskState::Created
                };
            }
        }

        tracing::trace!(from = %id, to = %copy, scopes = mapping.len(), "cloned task");
        Ok(copy)
    }

    fn copy_subtree(
        &mut self,
        id: ScopeId,
        parent: ScopeId,
        mapping: &mut HashMap<ScopeId, ScopeId>,
    ) -> ScopeId {
        let copy = self.scopes.duplicate(id, Some(parent));
        mapping.insert(id, copy);
        let children = self.scopes.children(id).to_vec();
        for child in children {
            self.copy_subtree(child, copy, mapping);
        }
        copy
    }
}

fn remap_value(value: &mut Value, mapping: &HashMap<ScopeId, ScopeId>) {
    match value {
        Value::Scope(id) => {
            if let Some(copy) = mapping.get(id) {
                *id = *copy;
            }
        }
        Value::List(items) => items.iter_mut().for_each(|v| remap_value(v, mapping)),
        Value::Map(map) => map.values_mut().for_each(|v| remap_value(v, mapping)),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::output::Output;
    use crate::runner::ScriptedPrompt;

    fn setup() -> (Context, ScopeId) {
        let mut ctx = Context::new();
        let root = ctx.scopes.create(None, Rc::default(), Role::Plain);
        (ctx, root)
    }

    #[test]
    fn test_kind_names_are_case_and_dash_insensitive() {
        assert_eq!(TaskKind::from_name("remote-shell"), Some(TaskKind::RemoteShell));
        assert_eq!(TaskKind::from_name("RemoteShell"), Some(TaskKind::RemoteShell));
        assert_eq!(TaskKind::from_name("try_catch"), Some(TaskKind::TryCatch));
        assert_eq!(TaskKind::from_name("job"), None);
        assert_eq!(TaskKind::from_name("bogus"), None);
    }

    #[test]
    fn test_new_task_seeds_defaults_and_name() {
        let (mut ctx, root) = setup();
        let task = ctx.new_task(TaskKind::Shell, root);

        assert_eq!(ctx.task_name(task).unwrap(), format!("shell#{}", task.index()));
        assert_eq!(ctx.get(task, "force").unwrap(), Value::Bool(false));
        assert_eq!(ctx.get(task, "options").unwrap(), Value::Map(ValueMap::new()));
        assert!(!ctx.scopes.contains_local(task, "command"));
        assert_eq!(ctx.task_state(task), Some(TaskState::Created));
    }

    #[test]
    fn test_output_task_respects_severity() {
        let (output, buffer) = Output::buffered(Verbosity::Normal);
        let mut ctx = Context::new().with_output(output);
        let root = ctx.scopes.create(None, Rc::default(), Role::Plain);

        let loud = ctx.new_task(TaskKind::Output, root);
        ctx.set(loud, "message", "{1+1}").unwrap();
        let quiet = ctx.new_task(TaskKind::Output, root);
        ctx.set(quiet, "message", "hidden").unwrap();
        ctx.set(quiet, "severity", "verbose").unwrap();

        ctx.run_task(loud).unwrap();
        ctx.run_task(quiet).unwrap();
        assert_eq!(buffer.borrow().as_str(), "2\n");
        assert_eq!(ctx.task_state(loud), Some(TaskState::Done));
    }

    #[test]
    fn test_break_and_exit_signals() {
        let (mut ctx, root) = setup();
        let stop = ctx.new_task(TaskKind::Break, root);
        ctx.set(stop, "message", "enough").unwrap();
        assert!(matches!(ctx.run_task(stop), Err(KiteError::Break(m)) if m == "enough"));
        assert_eq!(ctx.task_state(stop), Some(TaskState::Done));

        let exit = ctx.new_task(TaskKind::Exit, root);
        ctx.set(exit, "code", 3).unwrap();
        assert!(matches!(ctx.run_task(exit), Err(KiteError::Exit { code: 3, .. })));
        assert_eq!(ctx.task_state(exit), Some(TaskState::Failed));
    }

    #[test]
    fn test_evaluate_runs_in_container_scope() {
        let (mut ctx, root) = setup();
        ctx.set(root, "count", 2).unwrap();
        let task = ctx.new_task(TaskKind::Evaluate, root);
        ctx.set(task, "expression", "set('count', count * 10)").unwrap();

        assert_eq!(ctx.run_task(task).unwrap(), Value::Int(20));
        assert_eq!(ctx.get(root, "count").unwrap(), Value::Int(20));
    }

    #[test]
    fn test_dry_run_skips_execution() {
        let (mut ctx, root) = setup();
        ctx.dry_run = true;
        ctx.set(root, "count", 2).unwrap();
        let task = ctx.new_task(TaskKind::Evaluate, root);
        ctx.set(task, "expression", "set('count', 5)").unwrap();

        assert_eq!(ctx.run_task(task).unwrap(), Value::Null);
        assert_eq!(ctx.get(root, "count").unwrap(), Value::Int(2));
        assert_eq!(ctx.task_state(task), Some(TaskState::Skipped));

        ctx.set(task, "executeInPreview", true).unwrap();
        let again = ctx.clone_task(task, root).unwrap();
        assert_eq!(ctx.run_task(again).unwrap(), Value::Int(5));
    }

    #[test]
    fn test_callback_receives_container() {
        let (mut ctx, root) = setup();
        ctx.functions.register("mark", |ctx, scope, args| {
            assert_eq!(args, vec![Value::Scope(scope)]);
            ctx.set(scope, "marked", true)?;
            Ok(Value::from("done"))
        });
        let task = ctx.new_task(TaskKind::Callback, root);
        ctx.set(task, "callback", "mark").unwrap();

        assert_eq!(ctx.run_task(task).unwrap(), Value::from("done"));
        assert_eq!(ctx.get(root, "marked").unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_question_tasks() {
        let (mut ctx, root) = setup();
        ctx.prompt = Box::new(ScriptedPrompt::new(["", "", "1"]));

        let answer = ctx.new_task(TaskKind::Answer, root);
        ctx.set(answer, "question", "Branch?").unwrap();
        ctx.set(answer, "default", "main").unwrap();
        assert_eq!(ctx.run_task(answer).unwrap(), Value::from("main"));

        let confirm = ctx.new_task(TaskKind::Confirm, root);
        ctx.set(confirm, "question", "Sure?").unwrap();
        ctx.set(confirm, "default", false).unwrap();
        assert_eq!(ctx.run_task(confirm).unwrap(), Value::Bool(false));

        let choose = ctx.new_task(TaskKind::Choose, root);
        ctx.set(choose, "question", "Where?").unwrap();
        ctx.set(choose, "choices", Value::List(vec![Value::from("a"), Value::from("b")]))
            .unwrap();
        assert_eq!(ctx.run_task(choose).unwrap(), Value::from("b"));
    }

    #[test]
    fn test_clone_task_remaps_subtree() {
        let (mut ctx, root) = setup();
        let sub = ctx.new_task(TaskKind::Sub, root);
        let child = ctx.new_task(TaskKind::Output, sub);
        ctx.entry_mut(sub).unwrap().children.push(child);
        ctx.entry_mut(child).unwrap().container = Some(sub);
        ctx.set(sub, "self", Value::Scope(sub)).unwrap();

        let copy = ctx.clone_task(sub, root).unwrap();
        let copied_child = ctx.task_children(copy)[0];

        assert_ne!(copy, sub);
        assert_ne!(copied_child, child);
        assert_eq!(ctx.entry(copied_child).unwrap().container, Some(copy));
        assert_eq!(ctx.scopes.parent(copied_child), Some(copy));
        assert_eq!(ctx.get(copy, "self").unwrap(), Value::Scope(copy));
        assert_eq!(ctx.task_children(sub), vec![child]);
    }
}
