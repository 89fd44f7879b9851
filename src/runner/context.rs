//! Execution context for task running
//!
//! The context owns every scope of a job run together with the collaborators
//! tasks need while executing: the process runner, the prompt provider and the
//! output writer.

use crate::expression::{Expr, FunctionRegistry};
use crate::runner::command::{ProcessRunner, ShellRunner};
use crate::runner::job::CliDefinition;
use crate::runner::output::{Output, Verbosity};
use crate::runner::prompt::{Prompt, StdinPrompt};
use crate::runner::workflow::WorkflowRegistry;
use crate::scope::{ScopeArena, ScopeId};
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet, VecDeque};
use std::env;
use std::path::PathBuf;
use std::rc::Rc;

/// Execution context that tracks state during a job run
pub struct Context {
    /// Every scope of the run
    pub scopes: ScopeArena,

    /// Functions callable from expressions
    pub functions: FunctionRegistry,

    /// Workflows available to `workflow:` keys
    pub workflows: WorkflowRegistry,

    /// User facing output
    pub output: Output,

    /// Runs shell commands
    pub processes: Box<dyn ProcessRunner>,

    /// Answers interactive questions
    pub prompt: Box<dyn Prompt>,

    /// Preview tasks instead of executing them
    pub dry_run: bool,

    /// Current working directory
    pub working_dir: PathBuf,

    /// Configuration file path
    pub config_path: Option<PathBuf>,

    /// Interpreter used to run commands (e.g., ["bash", "-c"])
    pub interpreter: Vec<String>,

    /// Tasks waiting for `before:<name>` / `after:<name>`
    pub(crate) deferred: IndexMap<String, VecDeque<ScopeId>>,

    /// Scope of the job being run
    pub(crate) root: Option<ScopeId>,

    /// Arguments and options exposed on the command line, keyed by name
    pub(crate) definitions: IndexMap<String, CliDefinition>,

    /// Strings known to be fully expanded during the current evaluation
    pub(crate) memo: HashSet<String>,

    /// Nesting of template evaluations
    pub(crate) eval_depth: usize,

    /// Parsed expressions by source text
    pub(crate) ast_cache: HashMap<String, Rc<Expr>>,
}

impl Context {
    /// Create a new context with default settings
    pub fn new() -> Self {
        Context {
            scopes: ScopeArena::new(),
            functions: FunctionRegistry::with_builtins(),
            workflows: WorkflowRegistry::with_builtins(),
            output: Output::default(),
            processes: Box::new(ShellRunner),
            prompt: Box::new(StdinPrompt),
            dry_run: false,
            working_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            config_path: None,
            interpreter: vec!["sh".to_string(), "-c".to_string()],
            deferred: IndexMap::new(),
            root: None,
            definitions: IndexMap::new(),
            memo: HashSet::new(),
            eval_depth: 0,
            ast_cache: HashMap::new(),
        }
    }

    /// Create a context with a specific working directory
    pub fn with_working_dir(mut self, dir: PathBuf) -> Self {
        self.working_dir = dir;
        self
    }

    /// Set the configuration file path
    pub fn with_config_path(mut self, path: PathBuf) -> Self {
        self.config_path = Some(path);
        self
    }

    /// Set the interpreter
    pub fn with_interpreter(mut self, interpreter: Vec<String>) -> Self {
        if !interpreter.is_empty() {
            self.interpreter = interpreter;
        }
        self
    }

    /// Set verbosity level
    pub fn with_verbosity(mut self, verbosity: Verbosity) -> Self {
        self.output.set_verbosity(verbosity);
        self
    }

    pub fn with_output(mut self, output: Output) -> Self {
        self.output = output;
        self
    }

    pub fn with_process_runner(mut self, runner: impl ProcessRunner + 'static) -> Self {
        self.processes = Box::new(runner);
        self
    }

    pub fn with_prompt(mut self, prompt: impl Prompt + 'static) -> Self {
        self.prompt = Box::new(prompt);
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Scope of the job being run, if one was created
    pub fn root(&self) -> Option<ScopeId> {
        self.root
    }

    /// Get the directory for the config file (or current dir)
    pub fn config_dir(&self) -> PathBuf {
        self.config_path
            .as_ref()
            .and_then(|p| p.parent())
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| self.working_dir.clone())
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_context_new() {
        let ctx = Context::new();
        assert_eq!(ctx.output.verbosity(), Verbosity::Normal);
        assert_eq!(ctx.interpreter, vec!["sh", "-c"]);
        assert!(!ctx.dry_run);
        assert!(ctx.scopes.is_empty());
        assert!(ctx.functions.contains("get"));
        assert!(ctx.workflows.get("stageSelect").is_some());
    }

    #[test]
    fn test_with_interpreter() {
        let ctx = Context::new().with_interpreter(vec!["bash".to_string(), "-c".to_string()]);
        assert_eq!(ctx.interpreter, vec!["bash", "-c"]);

        let ctx = Context::new().with_interpreter(Vec::new());
        assert_eq!(ctx.interpreter, vec!["sh", "-c"]);
    }

    #[test]
    fn test_config_dir() {
        let ctx = Context::new()
            .with_working_dir(PathBuf::from("/work"))
            .with_config_path(PathBuf::from("/project/kite.yml"));
        assert_eq!(ctx.config_dir(), Path::new("/project"));

        let ctx = Context::new().with_working_dir(PathBuf::from("/work"));
        assert_eq!(ctx.config_dir(), Path::new("/work"));
    }

    #[test]
    fn test_with_verbosity() {
        let ctx = Context::new().with_verbosity(Verbosity::Verbose).with_dry_run(true);
        assert_eq!(ctx.output.verbosity(), Verbosity::Verbose);
        assert!(ctx.dry_run);
    }
}
