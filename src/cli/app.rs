//! Main CLI application

use crate::config::{parse_config_auto, parse_config_file, validate_config, Config};
use crate::error::{ConfigError, KiteError};
use crate::runner::{CliDefinition, Context, Job, Verbosity};
use crate::scope::{CliBinding, Value, VarType, VariableSpec};
use clap::{Arg, ArgAction, ArgMatches, Command};
use indexmap::IndexMap;
use std::path::PathBuf;

/// Names and shortcuts taken by the global arguments
const RESERVED_NAMES: &[&str] = &["file", "quiet", "silent", "verbose", "dry-run", "help", "version"];
const RESERVED_SHORTCUTS: &[char] = &['f', 'q', 's', 'v', 'h', 'V'];

/// CLI application
pub struct App {
    /// Parsed configuration
    config: Config,
    /// Config file path
    config_path: PathBuf,
}

impl App {
    /// Create a new app from the discovered configuration file
    pub fn new() -> Result<Self, KiteError> {
        let (config, config_path) = parse_config_auto()?;
        validate_config(&config)?;

        Ok(App {
            config,
            config_path,
        })
    }

    /// Create app with a specific config file
    pub fn with_config_file(path: PathBuf) -> Result<Self, KiteError> {
        let config = parse_config_file(&path)?;
        validate_config(&config)?;

        Ok(App {
            config,
            config_path: path,
        })
    }

    /// Fresh context for one job run
    fn context(&self, verbosity: Verbosity) -> Context {
        let mut ctx = Context::new()
            .with_config_path(self.config_path.clone())
            .with_verbosity(verbosity);

        if let Some(interpreter) = &self.config.interpreter {
            ctx = ctx.with_interpreter(interpreter.clone());
        }
        ctx
    }

    /// Command line definitions of every public job
    ///
    /// Jobs that fail to build get a warning and no arguments; running them
    /// reports the actual error.
    fn job_definitions(&self) -> IndexMap<String, Vec<CliDefinition>> {
        let mut definitions = IndexMap::new();
        for (name, _) in self.config.public_jobs() {
            let found = Job::new(self.context(Verbosity::Normal), &self.config, name)
                .and_then(|mut job| job.definitions());
            match found {
                Ok(found) => {
                    definitions.insert(name.clone(), found);
                }
                Err(e) => {
                    tracing::warn!(job = %name, error = %e, "could not read job arguments");
                    definitions.insert(name.clone(), Vec::new());
                }
            }
        }
        definitions
    }

    /// Run the application with the process arguments
    pub fn run(self) -> Result<(), KiteError> {
        self.run_from(std::env::args().collect())
    }

    /// Run the application with the given command line
    pub fn run_from(self, args: Vec<String>) -> Result<(), KiteError> {
        let mut command = build_command(&self.config, &self.job_definitions());
        let matches = command.clone().get_matches_from(args);

        let verbosity = get_verbosity(&matches);
        let dry_run = matches.get_flag("dry-run");

        let (job_name, job_matches) = match matches.subcommand() {
            Some((name, sub_matches)) => (name.to_string(), sub_matches),
            None => {
                command.print_help()?;
                println!();
                return Ok(());
            }
        };

        let mut job = Job::new(self.context(verbosity), &self.config, &job_name)?;
        for definition in job.definitions()? {
            if let Some(value) = cli_value(&definition, job_matches) {
                job.bind(&definition.name, value)?;
            }
        }
        job.set_dry_run(dry_run);

        tracing::debug!(job = %job_name, dry_run, "starting job");
        job.run()?;
        Ok(())
    }
}

/// Build the clap command from configuration
fn build_command(config: &Config, definitions: &IndexMap<String, Vec<CliDefinition>>) -> Command {
    let mut cmd = Command::new(config.name.clone().unwrap_or_else(|| "kite".to_string()))
        .version(env!("CARGO_PKG_VERSION"))
        .about(
            config
                .usage
                .clone()
                .unwrap_or_else(|| "Declarative task orchestration".to_string()),
        )
        .arg(
            Arg::new("file")
                .short('f')
                .long("file")
                .value_name("FILE")
                .help("Path to kite.yml config file")
                .global(true),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .help("Only print errors and important messages")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .arg(
            Arg::new("silent")
                .short('s')
                .long("silent")
                .help("Print no output")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Print verbose output")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .arg(
            Arg::new("dry-run")
                .long("dry-run")
                .help("Only preview what would be done")
                .action(ArgAction::SetTrue)
                .global(true),
        );

    for (job_name, job) in config.public_jobs() {
        let mut job_cmd = Command::new(job_name.clone()).about(job.description.clone().unwrap_or_default());

        for definition in definitions.get(job_name).into_iter().flatten() {
            if RESERVED_NAMES.contains(&definition.name.as_str()) {
                tracing::warn!(job = %job_name, name = %definition.name, "name is reserved, skipping");
                continue;
            }
            job_cmd = job_cmd.arg(build_arg(definition));
        }

        cmd = cmd.subcommand(job_cmd);
    }

    cmd
}

/// Turn a definition into a clap argument
fn build_arg(definition: &CliDefinition) -> Arg {
    let spec = &definition.spec;
    let mut arg = Arg::new(definition.name.clone())
        .help(spec.label.clone())
        .required(spec.required);

    match &definition.binding {
        CliBinding::Argument => {
            arg = arg.value_name(definition.name.to_uppercase());
            if spec.types.is_list() {
                arg = arg.num_args(1..).action(ArgAction::Append);
            }
        }
        CliBinding::Option { shortcut } => {
            arg = arg.long(definition.name.clone());
            if let Some(c) = shortcut.filter(|c| !RESERVED_SHORTCUTS.contains(c)) {
                arg = arg.short(c);
            }
            if spec.types.is_flag() {
                arg = arg.action(ArgAction::SetTrue).required(false);
            } else {
                arg = arg.value_name(definition.name.to_uppercase());
                if spec.types.is_list() {
                    arg = arg.action(ArgAction::Append);
                }
            }
        }
    }
    arg
}

/// Value given on the command line for `definition`, typed after its spec
fn cli_value(definition: &CliDefinition, matches: &ArgMatches) -> Option<Value> {
    let name = definition.name.as_str();
    let spec = &definition.spec;
    if matches.try_get_raw(name).ok().flatten().is_none() {
        return None;
    }

    if spec.types.is_flag() {
        return matches.get_flag(name).then_some(Value::Bool(true));
    }
    if spec.types.is_list() {
        let values = matches.get_many::<String>(name)?;
        return Some(Value::List(values.map(|v| typed_value(spec, v)).collect()));
    }
    matches.get_one::<String>(name).map(|v| typed_value(spec, v))
}

fn typed_value(spec: &VariableSpec, raw: &str) -> Value {
    if spec.types.contains(VarType::Int) {
        if let Ok(i) = raw.parse::<i64>() {
            return Value::Int(i);
        }
    }
    if spec.types.contains(VarType::Float) {
        if let Ok(f) = raw.parse::<f64>() {
            return Value::Float(f);
        }
    }
    Value::from(raw)
}

/// Get verbosity level from matches
fn get_verbosity(matches: &ArgMatches) -> Verbosity {
    if matches.get_flag("silent") {
        Verbosity::Silent
    } else if matches.get_flag("quiet") {
        Verbosity::Quiet
    } else if matches.get_flag("verbose") {
        Verbosity::Verbose
    } else {
        Verbosity::Normal
    }
}

/// Run the CLI application with the process arguments
pub fn run() -> Result<(), KiteError> {
    // The file has to be known before the job subcommands can be built
    let args: Vec<String> = std::env::args().collect();
    let file_path = extract_file_arg(&args);

    let app = match file_path {
        Some(path) if !path.is_file() => {
            return Err(ConfigError::NotFound(path.display().to_string()).into())
        }
        Some(path) => App::with_config_file(path)?,
        None => App::new()?,
    };

    app.run_from(args)
}

/// Extract --file argument before clap parsing
fn extract_file_arg(args: &[String]) -> Option<PathBuf> {
    for (i, arg) in args.iter().enumerate() {
        if let Some(path) = arg.strip_prefix("--file=") {
            return Some(PathBuf::from(path));
        }
        if (arg == "--file" || arg == "-f") && i + 1 < args.len() {
            return Some(PathBuf::from(&args[i + 1]));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;

    fn definitions_for(yaml: &str, job: &str) -> (Config, IndexMap<String, Vec<CliDefinition>>) {
        let config = parse_config(yaml, None).unwrap();
        let mut job_instance = Job::new(Context::new(), &config, job).unwrap();
        let mut definitions = IndexMap::new();
        definitions.insert(job.to_string(), job_instance.definitions().unwrap());
        (config, definitions)
    }

    #[test]
    fn test_get_verbosity_normal() {
        let cmd = Command::new("test")
            .arg(Arg::new("quiet").long("quiet").action(ArgAction::SetTrue))
            .arg(Arg::new("silent").long("silent").action(ArgAction::SetTrue))
            .arg(Arg::new("verbose").long("verbose").action(ArgAction::SetTrue));
        let matches = cmd.get_matches_from(vec!["test"]);
        assert_eq!(get_verbosity(&matches), Verbosity::Normal);
    }

    #[test]
    fn test_extract_file_arg() {
        let args = vec!["kite".to_string(), "--file".to_string(), "test.yml".to_string()];
        assert_eq!(extract_file_arg(&args), Some(PathBuf::from("test.yml")));

        let args = vec!["kite".to_string(), "-f".to_string(), "test.yml".to_string()];
        assert_eq!(extract_file_arg(&args), Some(PathBuf::from("test.yml")));

        let args = vec!["kite".to_string(), "--file=other.yml".to_string()];
        assert_eq!(extract_file_arg(&args), Some(PathBuf::from("other.yml")));
    }

    #[test]
    fn test_job_subcommands_carry_definitions() {
        let (config, definitions) = definitions_for(
            r#"
jobs:
  deploy:
    description: Deploy it
    arguments:
      target: {required: true}
      hosts: {type: array}
    options:
      force: {type: bool, short: F}
      retries: {type: int}
    tasks: []
  internal:
    private: true
    tasks: []
"#,
            "deploy",
        );
        let cmd = build_command(&config, &definitions);
        assert!(cmd.find_subcommand("internal").is_none());

        let matches = cmd.get_matches_from(vec![
            "kite", "--dry-run", "deploy", "web", "a", "b", "-F", "--retries", "3",
        ]);
        assert!(matches.get_flag("dry-run"));
        let (name, sub) = matches.subcommand().unwrap();
        assert_eq!(name, "deploy");

        let values: Vec<Option<Value>> = definitions["deploy"]
            .iter()
            .map(|definition| cli_value(definition, sub))
            .collect();
        assert_eq!(
            values,
            vec![
                Some(Value::from("web")),
                Some(Value::List(vec![Value::from("a"), Value::from("b")])),
                Some(Value::Bool(true)),
                Some(Value::Int(3)),
            ]
        );
    }

    #[test]
    fn test_missing_values_are_not_bound() {
        let (config, definitions) = definitions_for(
            r#"
jobs:
  deploy:
    options:
      force: {type: bool}
      branch: {}
    tasks: []
"#,
            "deploy",
        );
        let matches = build_command(&config, &definitions).get_matches_from(vec!["kite", "deploy"]);
        let (_, sub) = matches.subcommand().unwrap();
        for definition in &definitions["deploy"] {
            assert_eq!(cli_value(definition, sub), None);
        }
    }
}
