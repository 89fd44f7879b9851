//! Error types for Kite

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Kite operations
pub type Result<T> = std::result::Result<T, KiteError>;

/// Main error type for Kite
///
/// Besides real failures this also carries the control signals used by the
/// scheduler: [`KiteError::Break`], [`KiteError::Exit`] and
/// [`KiteError::ForcedTask`].
#[derive(Error, Debug)]
pub enum KiteError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Variable resolution errors
    #[error("{0}")]
    Scope(#[from] ScopeError),

    /// Template and expression errors
    #[error("Expression error: {0}")]
    Expression(#[from] ExpressionError),

    /// Task execution errors
    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    /// Stops the remaining siblings of the nearest composite or iteration
    #[error("{0}")]
    Break(String),

    /// Terminates the whole job with a process exit code
    #[error("{message}")]
    Exit { code: i32, message: String },

    /// A forced task failed after an earlier sibling had already failed
    #[error("{source} (after earlier failure: {cause})")]
    ForcedTask {
        #[source]
        source: Box<KiteError>,
        cause: Box<KiteError>,
    },

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// YAML parsing errors
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl KiteError {
    /// Process exit code this error should terminate with
    pub fn exit_code(&self) -> i32 {
        match self {
            KiteError::Exit { code, .. } => *code,
            KiteError::Execution(ExecutionError::ProcessFailed { code: Some(code), .. })
                if *code != 0 =>
            {
                *code
            }
            _ => 1,
        }
    }

    pub fn is_break(&self) -> bool {
        matches!(self, KiteError::Break(_))
    }

    /// Control signals pass through try/catch boundaries untouched
    pub fn is_control_signal(&self) -> bool {
        matches!(
            self,
            KiteError::Break(_) | KiteError::Exit { .. } | KiteError::ForcedTask { .. }
        )
    }
}

/// Configuration parsing and validation errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to find config file (searched: {0})")]
    NotFound(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Job '{0}' is not defined")]
    JobNotFound(String),

    #[error("Unknown task type '{0}'")]
    UnknownTaskType(String),

    #[error("Unknown workflow '{0}'")]
    UnknownWorkflow(String),

    #[error("Can either use workflow, script, task or tasks (found {0})")]
    ExclusiveTaskKeys(String),

    #[error("Setting '{0}' is not allowed on workflows")]
    NotAllowedOnWorkflow(String),

    #[error("Task '{task}' requires variable '{variable}'")]
    MissingRequired { task: String, variable: String },

    #[error("Argument and option definitions must be unique ('{0}' is defined twice)")]
    DuplicateDefinition(String),

    #[error("Invalid task definition: {0}")]
    InvalidTaskDefinition(String),

    #[error("Failed to include file '{path}': {error}")]
    IncludeFile { path: PathBuf, error: String },
}

/// Variable resolution errors
#[derive(Error, Debug)]
pub enum ScopeError {
    #[error("Missing variable {0}")]
    MissingVariable(String),

    #[error("Variable name '{0}' is reserved")]
    ReservedName(String),

    #[error("Scope has no parent")]
    NoParent,

    #[error("Can not set values on primitives or null (at '{0}')")]
    InvalidTarget(String),
}

/// Template and expression errors
#[derive(Error, Debug)]
pub enum ExpressionError {
    #[error("{message} around position {cursor}")]
    Syntax { message: String, cursor: usize },

    #[error("Unclosed and unescaped opening brace at {cursor}")]
    UnclosedExpression { cursor: usize },

    #[error("Unopened and unescaped closing brace at {cursor}")]
    UnopenedExpression { cursor: usize },

    #[error("Function '{0}' is not registered")]
    UnknownFunction(String),

    #[error("Method '{method}' is not available on {target}")]
    UnknownMethod { method: String, target: String },

    #[error("{0}")]
    Type(String),

    #[error("Recursive expansion detected while evaluating '{0}'")]
    RecursiveExpansion(String),

    #[error("Invalid regular expression '{pattern}': {error}")]
    InvalidRegex { pattern: String, error: String },
}

/// Task execution errors
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error(
        "The command \"{command}\" failed.\n\nExit Code: {}\n\nWorking directory: {}\n\nOutput:\n================\n{stdout}\n\nError Output:\n================\n{stderr}",
        display_code(.code),
        .cwd.as_deref().unwrap_or(".")
    )]
    ProcessFailed {
        command: String,
        code: Option<i32>,
        cwd: Option<String>,
        stdout: String,
        stderr: String,
    },

    #[error("Failed to start \"{command}\": {error}")]
    CommandNotStarted { command: String, error: String },

    #[error("Task '{0}' was already started")]
    AlreadyStarted(String),

    #[error("Condition callback must return TRUE or FALSE (got {0})")]
    NonBooleanCondition(String),

    #[error("No nodes to work on")]
    NoNodes,

    #[error("Variable '{0}' can not be iterated")]
    InvalidIterable(String),

    #[error("Variable '{0}' is already present")]
    VariableInUse(String),

    #[error("Prompt failed: {0}")]
    Prompt(String),

    #[error("Value \"{0}\" is invalid")]
    InvalidChoice(String),
}

fn display_code(code: &Option<i32>) -> String {
    code.map(|c| c.to_string())
        .unwrap_or_else(|| "none".to_string())
}

/// Specialized result type for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Specialized result type for execution operations
pub type ExecutionResult<T> = std::result::Result<T, ExecutionError>;

/// Specialized result type for expression operations
pub type ExpressionResult<T> = std::result::Result<T, ExpressionError>;

/// Specialized result type for scope operations
pub type ScopeResult<T> = std::result::Result<T, ScopeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_from_exit_signal() {
        let err = KiteError::Exit {
            code: 3,
            message: "bye".to_string(),
        };
        assert_eq!(err.exit_code(), 3);
        assert_eq!(err.to_string(), "bye");
    }

    #[test]
    fn test_exit_code_from_process_failure() {
        let err: KiteError = ExecutionError::ProcessFailed {
            command: "false".to_string(),
            code: Some(2),
            cwd: None,
            stdout: String::new(),
            stderr: String::new(),
        }
        .into();
        assert_eq!(err.exit_code(), 2);
        assert!(err.to_string().contains("Exit Code: 2"));
    }

    #[test]
    fn test_control_signals() {
        assert!(KiteError::Break("stop".to_string()).is_break());
        assert!(KiteError::Break("stop".to_string()).is_control_signal());
        let missing: KiteError = ScopeError::MissingVariable("a.b".to_string()).into();
        assert!(!missing.is_control_signal());
        assert_eq!(missing.to_string(), "Missing variable a.b");
        assert_eq!(missing.exit_code(), 1);
    }

    #[test]
    fn test_forced_task_keeps_both_errors() {
        let err = KiteError::ForcedTask {
            source: Box::new(KiteError::Break("second".to_string())),
            cause: Box::new(KiteError::Break("first".to_string())),
        };
        let text = err.to_string();
        assert!(text.contains("second"));
        assert!(text.contains("first"));
    }
}
