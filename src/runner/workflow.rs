//! Workflows: composites assembled in code
//!
//! A workflow is a task scope whose children are not configured directly but
//! put together by a [`Workflow`] implementation once the task initializes.

use crate::error::{ConfigError, ExecutionError, Result};
use crate::runner::output::Verbosity;
use crate::runner::task::{normalize_name, TaskKind};
use crate::runner::Context;
use crate::scope::{Callable, Declarations, ScopeId, Value, ValueMap, VariableSpec};
use colored::Colorize;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// Behaviour of a workflow kind
pub trait Workflow: fmt::Debug {
    /// Name used in `workflow: <name>`
    fn name(&self) -> &str;

    /// Variables the workflow recognizes in addition to the base task ones
    fn declarations(&self) -> Declarations;

    /// Body keys (`task`, `tasks`, ...) the workflow keeps as plain values
    fn stores_raw(&self, _key: &str) -> bool {
        false
    }

    /// Shown before the workflow runs its children
    fn preview(&self, ctx: &mut Context, id: ScopeId) -> Result<()> {
        if let Some(message) = ctx.optional_string(id, "message")? {
            ctx.output.writeln(&message);
        }
        Ok(())
    }

    /// Called on initialization, before the children are initialized
    fn prepare(&self, _ctx: &mut Context, _id: ScopeId) -> Result<()> {
        Ok(())
    }

    /// Add the children; called once after initialization
    fn assemble(&self, ctx: &mut Context, id: ScopeId) -> Result<()>;
}

/// Workflows by normalized name
#[derive(Debug, Clone, Default)]
pub struct WorkflowRegistry {
    workflows: HashMap<String, Rc<dyn Workflow>>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the builtin workflows
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(StageSelect);
        registry
    }

    /// Register (or replace) a workflow under its name
    pub fn register(&mut self, workflow: impl Workflow + 'static) {
        self.workflows
            .insert(normalize_name(workflow.name()), Rc::new(workflow));
    }

    pub fn get(&self, name: &str) -> Option<Rc<dyn Workflow>> {
        self.workflows.get(&normalize_name(name)).cloned()
    }
}

/// Runs a task once per selected stage
///
/// `stages` maps stage names to variables. The stage comes from the `stage`
/// argument, is picked automatically when only one exists, or is asked for.
/// With `sliding` every stage up to the selected one runs, in order.
#[derive(Debug, Clone, Copy, Default)]
pub struct StageSelect;

impl Workflow for StageSelect {
    fn name(&self) -> &str {
        "stageSelect"
    }

    fn declarations(&self) -> Declarations {
        Declarations::new()
            .variable(
                "stage",
                VariableSpec::new("string")
                    .as_argument()
                    .with_label("Preselect a stage - otherwise you'll be asked"),
            )
            .variable(
                "stages",
                VariableSpec::new("map")
                    .required()
                    .with_label("Stage names mapped to the variables set for the stage"),
            )
            .variable(
                "sliding",
                VariableSpec::new("bool")
                    .with_default(false)
                    .with_label("Whether all stages until the selected should be used"),
            )
            .variable(
                "task",
                VariableSpec::new("map")
                    .required()
                    .with_label("The task to invoke for each selected stage"),
            )
            .variable(
                "message",
                VariableSpec::new("string")
                    .with_label("Message before each stage - %s is replaced with the stage name"),
            )
            .variable(
                "question",
                VariableSpec::new("string")
                    .with_default("Select stage")
                    .with_label("Question to ask before stage select"),
            )
    }

    fn stores_raw(&self, key: &str) -> bool {
        key == "task"
    }

    fn preview(&self, _ctx: &mut Context, _id: ScopeId) -> Result<()> {
        Ok(())
    }

    fn prepare(&self, ctx: &mut Context, id: ScopeId) -> Result<()> {
        let spec = ctx.scopes.local(id, "task").cloned().unwrap_or_default();
        let spec = ctx.evaluate(spec, id)?;
        let prepared = ctx.new_task(TaskKind::Sub, id);
        ctx.set(prepared, "task", spec)?;
        ctx.entry_mut(id)?.prepared = Some(prepared);

        let container = ctx.entry(id)?.container;
        if let Some(root) = container.filter(|c| Some(*c) == ctx.root()) {
            if !ctx.entry(root)?.started {
                ctx.collect_definitions(prepared)?;
            }
        }
        Ok(())
    }

    fn assemble(&self, ctx: &mut Context, id: ScopeId) -> Result<()> {
        let select = Callable::new("stageSelect", |ctx, scope, _| {
            select_stages(ctx, scope)?;
            Ok(Value::Null)
        });
        let task = ctx.create_task(Value::Callable(select), id, ValueMap::new())?;
        ctx.add_task(id, task)?;
        Ok(())
    }
}

fn select_stages(ctx: &mut Context, workflow: ScopeId) -> Result<()> {
    let stages = ctx.get(workflow, "stages")?;
    let stages = stages
        .entries()
        .ok_or_else(|| ExecutionError::InvalidIterable("stages".to_string()))?;
    if stages.is_empty() {
        return Err(ConfigError::Invalid("No stages defined".to_string()).into());
    }
    let names: Vec<String> = stages.iter().map(|(name, _)| name.to_string()).collect();

    let selected = match ctx.get_or(workflow, "stage", Value::Null)? {
        Value::Null if names.len() == 1 => names[0].clone(),
        Value::Null => {
            let question = ctx.get(workflow, "question")?;
            let question = ctx.stringify(&question, workflow)?;
            let choices = Value::List(names.iter().map(|n| Value::from(n.as_str())).collect());
            ctx.choose(&question, &choices, None)?.to_string()
        }
        stage => {
            let stage = ctx.stringify(&stage, workflow)?;
            if !names.contains(&stage) {
                return Err(ExecutionError::InvalidChoice(stage).into());
            }
            stage
        }
    };
    ctx.output.write(
        &format!("Selected stage {}", selected.yellow()),
        Verbosity::Verbose,
        true,
    );

    let sliding = ctx.get_or(workflow, "sliding", Value::Bool(false))?.is_truthy();
    let mut chosen = Vec::new();
    for (name, variables) in stages {
        let name = name.to_string();
        let last = name == selected;
        if sliding || last {
            chosen.push((name, variables));
        }
        if last {
            break;
        }
    }

    let message = ctx.optional_string(workflow, "message")?;
    let prepared = ctx
        .entry(workflow)?
        .prepared
        .ok_or_else(|| ConfigError::InvalidTaskDefinition("stage task was not prepared".to_string()))?;

    for (stage, variables) in chosen {
        tracing::debug!(%stage, "running stage");
        if let Some(message) = &message {
            ctx.output
                .writeln(&message.replace("%s", &stage.yellow().to_string()));
        }
        let task = ctx.clone_task(prepared, workflow)?;
        for (key, value) in variables.entries().unwrap_or_default() {
            ctx.set(task, &format!("this.{}", key), value)?;
        }
        ctx.add_task(workflow, task)?;
    }
    Ok(())
}
