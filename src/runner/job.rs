//! Jobs: the root composite of a run
//!
//! A job is built from its configuration entry. Its own `arguments` and
//! `options`, plus those declared by tasks added directly to it, become
//! command line definitions that [`Job::bind`] writes back into the scope
//! that declared them.

use crate::config::{ArgumentConfig, Config, JobConfig, OptionConfig};
use crate::error::{ConfigError, Result};
use crate::runner::task::{TaskEntry, TaskKind};
use crate::runner::tasks::BODY_KEYS;
use crate::runner::Context;
use crate::scope::{CliBinding, Declarations, ScopeId, Value, VariableSpec};
use std::collections::HashSet;
use std::rc::Rc;

/// An argument or option exposed on the command line
#[derive(Debug, Clone)]
pub struct CliDefinition {
    /// Name on the command line (`dry-run` for `dryRun`)
    pub name: String,
    /// Variable the value is written to
    pub variable: String,
    /// Scope declaring the variable
    pub scope: ScopeId,
    pub binding: CliBinding,
    pub spec: VariableSpec,
}

/// `deployPath` becomes `deploy-path`
pub fn dashed(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut previous_word = false;
    for c in name.chars() {
        if c.is_ascii_uppercase() && previous_word {
            out.push('-');
        }
        previous_word = c.is_alphanumeric() || c == '_';
        out.push(c.to_ascii_lowercase());
    }
    out
}

fn argument_spec(config: &ArgumentConfig) -> VariableSpec {
    let mut spec = VariableSpec::new(&config.arg_type).as_argument();
    if let Some(label) = &config.label {
        spec = spec.with_label(label);
    }
    if let Some(default) = &config.default {
        spec = spec.with_default(Value::from(default.clone()));
    }
    if config.required {
        spec = spec.required();
    }
    spec
}

fn option_spec(config: &OptionConfig) -> VariableSpec {
    let shortcut = config.short.as_deref().and_then(|s| s.chars().next());
    let mut spec = VariableSpec::new(&config.option_type).as_option(shortcut);
    if let Some(label) = &config.label {
        spec = spec.with_label(label);
    }
    match &config.default {
        Some(default) => spec = spec.with_default(Value::from(default.clone())),
        None if spec.types.is_flag() => spec = spec.with_default(false),
        None => {}
    }
    if config.required {
        spec = spec.required();
    }
    spec
}

impl Context {
    /// Register the command line bound variables declared by `task`
    pub(crate) fn collect_definitions(&mut self, task: ScopeId) -> Result<()> {
        let declared = Rc::clone(&self.scopes.node(task).declared);
        let mut seen = HashSet::new();

        for (variable, spec) in declared.variables() {
            if !seen.insert(variable) {
                continue;
            }
            let Some(binding) = spec.binding.clone() else {
                continue;
            };
            let name = dashed(variable);
            if self.definitions.contains_key(&name) {
                return Err(ConfigError::DuplicateDefinition(name).into());
            }
            tracing::debug!(%name, task = %task, "registered command line definition");
            self.definitions.insert(
                name.clone(),
                CliDefinition {
                    name,
                    variable: variable.to_string(),
                    scope: task,
                    binding,
                    spec: spec.clone(),
                },
            );
        }
        Ok(())
    }

    /// Build the root task of job `name`
    pub fn create_job(&mut self, name: &str, job: &JobConfig, config: &Config) -> Result<ScopeId> {
        let mut declarations = Declarations::new();
        for (argument, argument_config) in &job.arguments {
            declarations = declarations.variable(argument, argument_spec(argument_config));
        }
        for (option, option_config) in &job.options {
            declarations = declarations.variable(option, option_spec(option_config));
        }
        let declarations = declarations.inherit(TaskKind::Job.declarations());

        let root = self.new_task_scope(TaskEntry::new(TaskKind::Job), None, Rc::new(declarations), name);
        self.root = Some(root);
        self.scopes.insert_local(root, "name", Value::from(name));
        self.scopes.insert_local(root, "job", Value::Scope(root));
        self.scopes.insert_local(root, "config", config.variables_value());
        self.collect_definitions(root)?;

        // A workflow body goes first so the remaining keys reach the workflow
        let mut values: Vec<_> = job.body_values().into_iter().collect();
        values.sort_by_key(|(key, _)| match key.as_str() {
            "workflow" => 0,
            key if BODY_KEYS.contains(&key) => 1,
            _ => 2,
        });
        for (key, value) in values {
            self.set(root, &key, value)?;
        }

        tracing::debug!(job = %name, scope = %root, "created job");
        Ok(root)
    }
}

/// A runnable job with its own context
pub struct Job {
    ctx: Context,
    root: ScopeId,
}

impl Job {
    /// Build job `name` from `config`
    pub fn new(mut ctx: Context, config: &Config, name: &str) -> Result<Self> {
        let job = config
            .jobs
            .get(name)
            .ok_or_else(|| ConfigError::JobNotFound(name.to_string()))?;
        let root = ctx.create_job(name, job, config)?;
        Ok(Job { ctx, root })
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.ctx
    }

    pub fn root(&self) -> ScopeId {
        self.root
    }

    /// Command line definitions, in registration order
    ///
    /// Initializes the job so workflows can contribute their definitions.
    pub fn definitions(&mut self) -> Result<Vec<CliDefinition>> {
        self.ctx.initialize_task(self.root)?;
        Ok(self.ctx.definitions.values().cloned().collect())
    }

    /// Write a command line value into the scope declaring `name`
    pub fn bind(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        let definition = self
            .ctx
            .definitions
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::Invalid(format!("Unknown argument or option '{}'", name)))?;
        let value = value.into();
        tracing::debug!(name, value = %value, "binding command line value");

        if definition.scope == self.root {
            // Job level values stay on the job even when its body forwards
            self.ctx
                .scopes
                .insert_local(self.root, &definition.variable, value);
            Ok(())
        } else {
            self.ctx.set(definition.scope, &definition.variable, value)
        }
    }

    pub fn set_dry_run(&mut self, dry_run: bool) {
        self.ctx.dry_run = dry_run;
    }

    pub fn is_dry_run(&self) -> bool {
        self.ctx.dry_run
    }

    /// Run the job to completion
    pub fn run(&mut self) -> Result<Value> {
        tracing::info!(job = %self.root, dry_run = self.ctx.dry_run, "running job");
        self.ctx.run_task(self.root)
    }

    /// Read a variable from the job scope
    pub fn get(&mut self, path: &str) -> Result<Value> {
        self.ctx.get(self.root, path)
    }

    pub fn into_context(self) -> Context {
        self.ctx
    }
}
