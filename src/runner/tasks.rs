//! Composite tasks and the scheduler
//!
//! A composite runs its children in order. Tasks registered with
//! `before`/`after` are kept aside in the context's deferred map and spliced
//! into the queue when a task of that name comes up. After the first failure
//! only tasks with `force` still run; a failing forced task aborts the
//! composite with [`KiteError::ForcedTask`].

use crate::error::{ConfigError, ExecutionError, KiteError, Result};
use crate::runner::task::{TaskKind, TaskState};
use crate::runner::Context;
use crate::scope::{ScopeId, Value, ValueMap};
use std::collections::VecDeque;
use std::rc::Rc;

/// Keys that build the children of a composite; only one may be used
pub const BODY_KEYS: [&str; 4] = ["workflow", "script", "task", "tasks"];

impl Context {
    /// Store `value` under `key` on `scope`, applying the assignment rules of
    /// the scope's task kind
    pub(crate) fn assign(&mut self, scope: ScopeId, key: &str, value: Value) -> Result<()> {
        let Some(entry) = self.scopes.task(scope) else {
            self.scopes.insert_local(scope, key, value);
            return Ok(());
        };
        let kind = entry.kind;
        let forward_to = entry.forward_to;
        let workflow = entry.workflow.clone();

        if let Some(target) = forward_to {
            return self.set(target, key, value);
        }

        if let Some(workflow) = workflow {
            if BODY_KEYS.contains(&key) && !workflow.stores_raw(key) {
                return Err(ConfigError::NotAllowedOnWorkflow(key.to_string()).into());
            }
            self.scopes.insert_local(scope, key, value);
            return Ok(());
        }

        match key {
            body if kind.is_composite() && BODY_KEYS.contains(&body) => {
                self.assign_body(scope, body, value)
            }
            "onCatch" if kind == TaskKind::TryCatch => {
                let catch = match value {
                    Value::Null => Value::Null,
                    spec => Value::Scope(self.create_task(spec, scope, ValueMap::new())?),
                };
                self.scopes.insert_local(scope, key, catch);
                Ok(())
            }
            "options" | "arguments" | "optArg"
                if matches!(kind, TaskKind::Shell | TaskKind::RemoteShell) =>
            {
                self.merge_shell_setting(scope, key, value)
            }
            _ => {
                self.scopes.insert_local(scope, key, value);
                Ok(())
            }
        }
    }

    fn assign_body(&mut self, scope: ScopeId, key: &str, value: Value) -> Result<()> {
        {
            let entry = self.entry_mut(scope)?;
            if let Some(previous) = &entry.body {
                if previous != key {
                    return Err(ConfigError::ExclusiveTaskKeys(format!("{} and {}", previous, key)).into());
                }
            }
            entry.body = Some(key.to_string());
        }

        let value = self.evaluate(value, scope)?;
        match key {
            "workflow" => {
                let name = self.stringify(&value, scope)?;
                let workflow = self.create_workflow(&name, scope)?;
                self.add_task(scope, workflow)?;
                self.entry_mut(scope)?.forward_to = Some(workflow);
                Ok(())
            }
            "script" => {
                let path = self.stringify(&value, scope)?;
                let specs = self.load_script(&path)?;
                self.add_task_specs(scope, specs)
            }
            "task" => self.add_task_specs(scope, Value::List(vec![value])),
            _ => self.add_task_specs(scope, value),
        }
    }

    /// Create and add a task for every entry of a list or map of task specs;
    /// non-numeric map keys become the task names
    fn add_task_specs(&mut self, scope: ScopeId, specs: Value) -> Result<()> {
        let entries = specs.entries().ok_or_else(|| {
            ConfigError::InvalidTaskDefinition(format!(
                "tasks must be a list or map, got {}",
                specs.type_name()
            ))
        })?;

        for (key, spec) in entries {
            let mut options = ValueMap::new();
            if let Value::String(name) = key {
                if name.parse::<i64>().is_err() {
                    options.insert("name".to_string(), Value::String(name));
                }
            }
            let spec = self.evaluate(spec, scope)?;
            let task = self.create_task(spec, scope, options)?;
            self.add_task(scope, task)?;
        }
        Ok(())
    }

    /// Add `task` to the composite `container`
    ///
    /// Tasks with `before`/`after` are deferred until a task of that name
    /// runs. Containers that already started run new tasks immediately and
    /// return their result.
    pub fn add_task(&mut self, container: ScopeId, task: ScopeId) -> Result<Value> {
        self.entry_mut(task)?.container = Some(container);

        let mut deferred = false;
        for hook in ["before", "after"] {
            let targets = self.get_or(task, hook, Value::Null)?;
            for target in targets.string_list() {
                let target = if target == "@self" {
                    self.task_name(container)?
                } else {
                    target
                };
                tracing::debug!(task = %task, hook, target = %target, "deferring task");
                self.deferred
                    .entry(format!("{}:{}", hook, target))
                    .or_default()
                    .push_back(task);
                deferred = true;
            }
        }

        self.add_hook_tasks(container, task)?;

        let (initialized, started) = {
            let entry = self.entry(container)?;
            (entry.initialized, entry.started)
        };
        if initialized || deferred {
            self.initialize_task(task)?;
        }
        if Some(container) == self.root && !started {
            self.collect_definitions(task)?;
        }

        if deferred {
            return Ok(Value::Null);
        }
        if started {
            return self.run_now(task);
        }
        self.entry_mut(container)?.children.push(task);
        Ok(Value::Null)
    }

    /// Turn `onBefore`/`onAfter` specs into deferred tasks around `task`
    fn add_hook_tasks(&mut self, container: ScopeId, task: ScopeId) -> Result<()> {
        for (key, hook) in [("onBefore", "before"), ("onAfter", "after")] {
            let specs = match self.scopes.local(task, key).cloned() {
                None | Some(Value::Null) => continue,
                Some(Value::List(items)) => items,
                Some(spec) => vec![spec],
            };
            self.scopes.insert_local(task, key, Value::Null);

            let name = self.task_name(task)?;
            for spec in specs {
                let mut options = ValueMap::new();
                options.insert(hook.to_string(), Value::String(name.clone()));
                let spec = self.evaluate(spec, container)?;
                let hook_task = self.create_task(spec, container, options)?;
                self.add_task(container, hook_task)?;
            }
        }
        Ok(())
    }

    fn take_deferred(&mut self, hook: &str, name: &str) -> VecDeque<ScopeId> {
        self.deferred
            .shift_remove(&format!("{}:{}", hook, name))
            .unwrap_or_default()
    }

    /// Run a task added to a running composite, with its hooks around it
    fn run_now(&mut self, task: ScopeId) -> Result<Value> {
        let name = self.task_name(task)?;
        for hook in self.take_deferred("before", &name).into_iter().rev() {
            self.run_child(hook)?;
        }
        let value = self.run_child(task)?;
        for hook in self.take_deferred("after", &name) {
            self.run_child(hook)?;
        }
        Ok(value)
    }

    /// Initialize `id` once: check required variables, initialize children
    /// and let workflows prepare and assemble themselves
    pub fn initialize_task(&mut self, id: ScopeId) -> Result<()> {
        {
            let entry = self.entry_mut(id)?;
            if entry.initialized {
                return Ok(());
            }
            entry.initialized = true;
            entry.state = TaskState::Initialized;
        }

        // Job level values arrive from the command line after initialization
        if Some(id) != self.root {
            self.check_required(id)?;
        }

        let workflow = self.entry(id)?.workflow.clone();
        if let Some(workflow) = &workflow {
            workflow.prepare(self, id)?;
        }

        for child in self.task_children(id) {
            self.initialize_task(child)?;
        }

        if let Some(workflow) = workflow {
            let entry = self.entry_mut(id)?;
            if !entry.assembled {
                entry.assembled = true;
                workflow.assemble(self, id)?;
            }
        }
        Ok(())
    }

    fn check_required(&mut self, id: ScopeId) -> Result<()> {
        let declared = Rc::clone(&self.scopes.node(id).declared);
        for (name, spec) in declared.variables() {
            if spec.required && !self.scopes.contains_local(id, name) {
                return Err(ConfigError::MissingRequired {
                    task: self.task_name(id)?,
                    variable: name.to_string(),
                }
                .into());
            }
        }
        Ok(())
    }

    fn start(&mut self, id: ScopeId) -> Result<()> {
        if self.entry(id)?.started {
            return Err(ExecutionError::AlreadyStarted(self.task_name(id)?).into());
        }
        self.initialize_task(id)?;
        self.entry_mut(id)?.started = true;
        Ok(())
    }

    /// Indent nested composites; the job and its direct children stay flush
    fn enter(&mut self, id: ScopeId) -> bool {
        let indent = Some(id) != self.root && self.scopes.parent(id) != self.root;
        if indent {
            self.output.indent();
        }
        indent
    }

    fn leave(&mut self, indented: bool) {
        if indented {
            self.output.outdent();
        }
    }

    fn report_break(&mut self, message: &str) {
        if !message.is_empty() {
            self.output.writeln(message);
        }
    }

    pub(crate) fn run_composite(&mut self, id: ScopeId) -> Result<Value> {
        self.start(id)?;
        self.preview_task(id)?;

        let indented = self.enter(id);
        let result = self.schedule(id);
        self.leave(indented);

        match result {
            Ok(()) => Ok(Value::Scope(id)),
            Err(KiteError::Break(message)) => {
                self.report_break(&message);
                Ok(Value::Scope(id))
            }
            Err(e) => Err(e),
        }
    }

    /// Run the children of `id` with deferred tasks spliced in
    ///
    /// Before hooks are pushed to the queue front one by one, so the last
    /// registered runs first. After hooks are appended to the queue.
    fn schedule(&mut self, id: ScopeId) -> Result<()> {
        let is_root = Some(id) == self.root;
        let name = self.task_name(id)?;

        let mut queue: VecDeque<ScopeId> = self.task_children(id).into();
        for hook in self.take_deferred("before", &name) {
            queue.push_front(hook);
        }
        if is_root {
            for hook in self.take_deferred("before", "@all") {
                queue.push_front(hook);
            }
        }

        let mut failure: Option<KiteError> = None;
        loop {
            while let Some(task) = queue.pop_front() {
                let task_name = self.task_name(task)?;

                let before = self.take_deferred("before", &task_name);
                if !before.is_empty() {
                    queue.push_front(task);
                    for hook in before {
                        queue.push_front(hook);
                    }
                    continue;
                }

                match failure.take() {
                    None => match self.run_child(task) {
                        Ok(_) => {}
                        Err(e @ KiteError::ForcedTask { .. }) => return Err(e),
                        Err(e) => {
                            tracing::debug!(task = %task, error = %e, "task failed");
                            failure = Some(e);
                        }
                    },
                    Some(cause) => {
                        if self.get_or(task, "force", Value::Bool(false))?.is_truthy() {
                            if let Err(e) = self.run_child(task) {
                                return Err(KiteError::ForcedTask {
                                    source: Box::new(e),
                                    cause: Box::new(cause),
                                });
                            }
                        } else {
                            tracing::trace!(task = %task, "skipped after failure");
                        }
                        failure = Some(cause);
                    }
                }

                queue.extend(self.take_deferred("after", &task_name));
            }

            queue = self.take_deferred("after", &name);
            if queue.is_empty() && is_root {
                queue = self.take_deferred("after", "@all");
            }
            if queue.is_empty() {
                break;
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Run a child after checking its `if`, storing the result in `toVar`
    pub fn run_child(&mut self, task: ScopeId) -> Result<Value> {
        if !self.should_run(task)? {
            tracing::debug!(task = %task, "condition not met, skipping");
            self.entry_mut(task)?.state = TaskState::Skipped;
            return Ok(Value::Null);
        }

        let value = self.run_task(task)?;

        if let Some(variable) = self.optional_string(task, "toVar")? {
            let parent = self.scopes.parent(task).unwrap_or(task);
            self.set(parent, &variable, value.clone())?;
        }
        Ok(value)
    }

    /// Allow composites below `id` to run again
    fn rearm(&mut self, id: ScopeId) -> Result<()> {
        for child in self.task_children(id) {
            let entry = self.entry_mut(child)?;
            if entry.kind.is_composite() {
                entry.started = false;
                self.rearm(child)?;
            }
        }
        Ok(())
    }

    /// Run the children once per element of `array`
    pub(crate) fn run_iterate(&mut self, id: ScopeId) -> Result<Value> {
        self.start(id)?;
        self.preview_task(id)?;

        let array = self.get(id, "array")?;
        let entries = array
            .entries()
            .ok_or_else(|| ExecutionError::InvalidIterable("array".to_string()))?;

        let (key_var, value_var) = match self.get_or(id, "as", Value::Null)? {
            Value::Map(map) => match map.into_iter().next() {
                Some((key, value)) => (Some(key), Some(self.stringify(&value, id)?)),
                None => (None, None),
            },
            Value::Null => (self.optional_string(id, "key")?, None),
            other => (
                self.optional_string(id, "key")?,
                Some(self.stringify(&other, id)?),
            ),
        };
        let loop_vars: Vec<String> = [key_var.clone(), value_var.clone()]
            .into_iter()
            .flatten()
            .filter(|name| !name.is_empty())
            .collect();
        for name in &loop_vars {
            if self.has(id, name)? {
                return Err(ExecutionError::VariableInUse(name.clone()).into());
            }
        }

        let indented = self.enter(id);
        let mut outcome = Ok(());
        for (index, (key, value)) in entries.into_iter().enumerate() {
            if let Some(name) = key_var.as_deref().filter(|n| !n.is_empty()) {
                self.scopes.insert_local(id, name, key);
            }
            if let Some(name) = value_var.as_deref().filter(|n| !n.is_empty()) {
                self.scopes.insert_local(id, name, value);
            }
            if index > 0 {
                self.rearm(id)?;
            }

            match self.schedule(id) {
                Ok(()) => {}
                Err(KiteError::Break(message)) => {
                    self.report_break(&message);
                    break;
                }
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            }
        }
        self.leave(indented);

        for name in &loop_vars {
            self.scopes.remove_local(id, name);
        }
        outcome.map(|_| Value::Scope(id))
    }

    /// Run the children; on failure print `errorMessage` and run `onCatch`
    pub(crate) fn run_try_catch(&mut self, id: ScopeId) -> Result<Value> {
        match self.run_composite(id) {
            Ok(value) => Ok(value),
            Err(e) if e.is_control_signal() => Err(e),
            Err(e) => {
                tracing::debug!(task = %id, error = %e, "caught error");
                if let Some(message) = self.optional_string(id, "errorMessage")? {
                    self.output.writeln(&message);
                }
                match self.scopes.local(id, "onCatch").cloned() {
                    Some(Value::Scope(catch)) => self.add_task(id, catch),
                    _ => Ok(Value::Null),
                }
            }
        }
    }
}
