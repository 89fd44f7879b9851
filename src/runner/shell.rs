//! Shell and remote shell tasks
//!
//! Commands are assembled from `command` plus either the raw `argv` or the
//! rendered `options` and `arguments`. Remote shell tasks wrap the result in
//! an `ssh` call for every node they run on.

use crate::error::{ConfigError, ExecutionError, Result};
use crate::runner::task::TaskKind;
use crate::runner::Context;
use crate::scope::{ScopeId, Value, ValueMap};
use once_cell::sync::Lazy;
use regex::Regex;

static CD_ABSOLUTE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"^cd\s+['"]?/"#).unwrap());

fn quote(value: &str) -> String {
    shell_words::quote(value).into_owned()
}

/// `--name=value`, `-n value` or a bare switch for `true`
fn render_option(name: &str, value: Option<&str>) -> String {
    let mut out = String::from(" ");
    if !name.starts_with('-') {
        out.push_str(if name.chars().count() == 1 { "-" } else { "--" });
    }
    out.push_str(name);
    if let Some(value) = value {
        let long = name.chars().count() > 1 && (!name.starts_with('-') || name.starts_with("--"));
        out.push(if long { '=' } else { ' ' });
        out.push_str(&quote(value));
    }
    out
}

impl Context {
    /// Merge `options`, `arguments` and `optArg` into the existing settings
    pub(crate) fn merge_shell_setting(&mut self, task: ScopeId, key: &str, value: Value) -> Result<()> {
        let value = self.evaluate(value, task)?;

        if value.is_null() {
            if key != "arguments" {
                self.scopes.insert_local(task, "options", Value::Map(ValueMap::new()));
            }
            if key != "options" {
                self.scopes.insert_local(task, "arguments", Value::List(Vec::new()));
            }
            return Ok(());
        }
        if key == "optArg" {
            if let Value::String(argv) = value {
                self.scopes.insert_local(task, "argv", Value::String(argv));
                return Ok(());
            }
        }

        let mut options = match self.scopes.local(task, "options") {
            Some(Value::Map(map)) => map.clone(),
            _ => ValueMap::new(),
        };
        let mut arguments = match self.scopes.local(task, "arguments") {
            Some(Value::List(items)) => items.clone(),
            _ => Vec::new(),
        };

        let entries = value.entries().unwrap_or_else(|| vec![(Value::Int(0), value.clone())]);
        for (k, v) in entries {
            let numeric = matches!(k, Value::Int(_))
                || matches!(&k, Value::String(s) if s.parse::<i64>().is_ok());
            match key {
                "arguments" => arguments.push(v),
                "options" if numeric => {
                    options.insert(v.to_string(), Value::Bool(true));
                }
                "options" => {
                    options.insert(k.to_string(), v);
                }
                _ if numeric => arguments.push(v),
                _ => {
                    options.insert(k.to_string(), v);
                }
            }
        }

        self.scopes.insert_local(task, "options", Value::Map(options));
        self.scopes.insert_local(task, "arguments", Value::List(arguments));
        Ok(())
    }

    /// Full command line of a shell task (before any ssh wrapping)
    pub fn shell_command(&mut self, task: ScopeId) -> Result<String> {
        let command = self.get(task, "command")?;
        let argv = self.get_or(task, "argv", Value::Null)?;
        let options = self.get_or(task, "options", Value::Null)?;
        let arguments = self.get_or(task, "arguments", Value::Null)?;
        let has_settings = options.is_truthy() || arguments.is_truthy();

        if let Value::List(commands) = command {
            if argv.is_truthy() || has_settings {
                return Err(ConfigError::InvalidTaskDefinition(
                    "Can not use argv, options or arguments on multiple commands".to_string(),
                )
                .into());
            }
            let mut lines = Vec::with_capacity(commands.len());
            for line in commands {
                let line = self.evaluate(line, task)?;
                lines.push(self.stringify(&line, task)?);
            }
            return Ok(lines.join("; "));
        }

        let mut line = self.stringify(&command, task)?;
        if argv.is_truthy() {
            if has_settings {
                return Err(ConfigError::InvalidTaskDefinition(
                    "Can not combine argv with options or arguments".to_string(),
                )
                .into());
            }
            let argv = match argv {
                Value::List(items) => {
                    let mut parts = Vec::with_capacity(items.len());
                    for item in items {
                        let item = self.evaluate(item, task)?;
                        parts.push(self.stringify(&item, task)?);
                    }
                    parts.join(" ")
                }
                other => self.stringify(&other, task)?,
            };
            line.push(' ');
            line.push_str(&argv);
            return Ok(line);
        }

        if let Value::Map(options) = options {
            for (name, value) in options {
                match self.evaluate(value, task)? {
                    Value::Bool(false) => {}
                    Value::Bool(true) => line.push_str(&render_option(&name, None)),
                    other => {
                        let value = self.stringify(&other, task)?;
                        line.push_str(&render_option(&name, Some(&value)));
                    }
                }
            }
        }
        if let Some(arguments) = arguments.items() {
            for argument in arguments {
                let argument = self.evaluate(argument, task)?;
                let argument = self.stringify(&argument, task)?;
                line.push(' ');
                line.push_str(&quote(&argument));
            }
        }
        Ok(line)
    }

    pub(crate) fn run_shell(&mut self, task: ScopeId, kind: TaskKind, dry_run: bool) -> Result<Value> {
        let result = match kind {
            TaskKind::RemoteShell => self.run_remote(task, dry_run),
            _ => {
                let command = self.shell_command(task)?;
                let cwd = self.optional_string(task, "cwd")?;
                self.run_process(&command, cwd.as_deref(), dry_run)
            }
        };

        if result.is_err() {
            if let Some(message) = self.optional_string(task, "errorMessage")? {
                self.output.error(&message);
            }
        }
        result
    }

    fn run_remote(&mut self, task: ScopeId, dry_run: bool) -> Result<Value> {
        if self.has(task, "node")? {
            if let Value::Scope(node) = self.get(task, "node")? {
                return self.run_on_node(task, node, dry_run);
            }
        }

        let nodes: Vec<ScopeId> = self
            .get_or(task, "nodes", Value::Null)?
            .items()
            .unwrap_or_default()
            .into_iter()
            .filter_map(|node| node.as_scope())
            .collect();
        if nodes.is_empty() {
            return Err(ExecutionError::NoNodes.into());
        }

        let mut results = ValueMap::new();
        for node in nodes {
            self.scopes.insert_local(task, "node", Value::Scope(node));
            let result = self.run_on_node(task, node, dry_run);
            if result.is_err() {
                self.scopes.remove_local(task, "node");
            }
            let id = self.get_or(node, "id", Value::Null)?;
            let id = self.stringify(&id, node)?;
            results.insert(id, result?);
        }
        self.scopes.remove_local(task, "node");
        Ok(Value::Map(results))
    }

    fn run_on_node(&mut self, task: ScopeId, node: ScopeId, dry_run: bool) -> Result<Value> {
        let command = self.shell_command(task)?;
        let command = self.ssh_command(task, node, command)?;
        self.run_process(&command, None, dry_run)
    }

    /// `ssh<sshOptions> <url> '<command>'`, changing into `cwd` first
    fn ssh_command(&mut self, task: ScopeId, node: ScopeId, mut command: String) -> Result<String> {
        if let Some(cwd) = self.optional_string(task, "cwd")? {
            if !CD_ABSOLUTE.is_match(&command) {
                command = format!("cd {}; {}", quote(&cwd), command);
            }
        }
        let options = self.get_or(node, "sshOptions", Value::Null)?;
        let options = self.stringify(&options, node)?;
        let url = self.node_url(node)?;
        Ok(format!(
            "{} {} {}",
            format!("ssh{}", options).trim_end(),
            quote(&url),
            quote(&command)
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KiteError;
    use crate::runner::RecordingRunner;
    use crate::scope::Role;
    use std::rc::Rc;

    fn setup() -> (Context, ScopeId) {
        let mut ctx = Context::new();
        let root = ctx.scopes.create(None, Rc::default(), Role::Plain);
        (ctx, root)
    }

    fn map(pairs: &[(&str, Value)]) -> Value {
        Value::Map(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        )
    }

    #[test]
    fn test_render_option() {
        assert_eq!(render_option("v", None), " -v");
        assert_eq!(render_option("force", None), " --force");
        assert_eq!(render_option("m", Some("fix it")), " -m 'fix it'");
        assert_eq!(render_option("message", Some("x")), " --message=x");
        assert_eq!(render_option("-X", Some("POST")), " -X POST");
        assert_eq!(render_option("--depth", Some("1")), " --depth=1");
    }

    #[test]
    fn test_command_with_options_and_arguments() {
        let (mut ctx, root) = setup();
        let task = ctx.new_task(TaskKind::Shell, root);
        ctx.set(root, "branch", "main").unwrap();
        ctx.set(task, "command", "git").unwrap();
        ctx.set(task, "options", Value::List(vec![Value::from("quiet")])).unwrap();
        ctx.set(
            task,
            "optArg",
            map(&[
                ("0", Value::from("pull")),
                ("depth", Value::Int(1)),
                ("rebase", Value::Bool(false)),
                ("1", Value::from("{branch}")),
            ]),
        )
        .unwrap();

        assert_eq!(
            ctx.shell_command(task).unwrap(),
            "git --quiet --depth=1 pull main"
        );
    }

    #[test]
    fn test_argv_and_multiple_commands() {
        let (mut ctx, root) = setup();
        let task = ctx.new_task(TaskKind::Shell, root);
        ctx.set(task, "command", "ls").unwrap();
        ctx.set(task, "optArg", "-la /tmp").unwrap();
        assert_eq!(ctx.shell_command(task).unwrap(), "ls -la /tmp");

        ctx.set(task, "options", map(&[("x", Value::Bool(true))])).unwrap();
        assert!(matches!(
            ctx.shell_command(task),
            Err(KiteError::Config(ConfigError::InvalidTaskDefinition(_)))
        ));

        let multi = ctx.new_task(TaskKind::Shell, root);
        ctx.set(
            multi,
            "command",
            Value::List(vec![Value::from("cd /srv"), Value::from("ls")]),
        )
        .unwrap();
        assert_eq!(ctx.shell_command(multi).unwrap(), "cd /srv; ls");

        ctx.set(root, "dir", "/var/www").unwrap();
        let listed = ctx.new_task(TaskKind::Shell, root);
        ctx.set(listed, "command", "du").unwrap();
        ctx.set(
            listed,
            "argv",
            Value::List(vec![Value::from("-sh"), Value::from("{dir}")]),
        )
        .unwrap();
        assert_eq!(ctx.shell_command(listed).unwrap(), "du -sh /var/www");
    }

    #[test]
    fn test_null_resets_settings() {
        let (mut ctx, root) = setup();
        let task = ctx.new_task(TaskKind::Shell, root);
        ctx.set(task, "command", "echo").unwrap();
        ctx.set(task, "arguments", Value::List(vec![Value::from("a b")])).unwrap();
        assert_eq!(ctx.shell_command(task).unwrap(), "echo 'a b'");

        ctx.set(task, "optArg", Value::Null).unwrap();
        assert_eq!(ctx.shell_command(task).unwrap(), "echo");
    }

    #[test]
    fn test_remote_shell_runs_on_every_node() {
        let runner = RecordingRunner::new().respond("web1", "one").respond("web2", "two");
        let log = runner.log();
        let mut ctx = Context::new().with_process_runner(runner);
        let root = ctx.scopes.create(None, Rc::default(), Role::Plain);
        ctx.set(
            root,
            "nodes",
            map(&[
                ("a", map(&[("host", Value::from("web1"))])),
                ("b", map(&[("host", Value::from("web2")), ("port", Value::Int(2222))])),
            ]),
        )
        .unwrap();

        let task = ctx.new_task(TaskKind::RemoteShell, root);
        ctx.set(task, "command", "ls").unwrap();
        ctx.set(task, "cwd", "/srv/app").unwrap();

        let result = ctx.run_task(task).unwrap();
        assert_eq!(
            result,
            map(&[("a", Value::from("one")), ("b", Value::from("two"))])
        );
        let log = log.borrow();
        assert_eq!(log[0].command, "ssh -A web1 'cd /srv/app; ls'");
        assert_eq!(log[1].command, "ssh -A -p 2222 web2 'cd /srv/app; ls'");
        assert!(!ctx.scopes.contains_local(task, "node"));
    }

    #[test]
    fn test_remote_shell_keeps_absolute_cd() {
        let (mut ctx, root) = setup();
        let node = ctx.create_node(root, map(&[("host", Value::from("h"))])).unwrap();
        let task = ctx.new_task(TaskKind::RemoteShell, root);
        ctx.set(task, "cwd", "/srv").unwrap();

        assert_eq!(
            ctx.ssh_command(task, node, "cd /tmp && ls".to_string()).unwrap(),
            "ssh -A h 'cd /tmp && ls'"
        );
    }

    #[test]
    fn test_remote_shell_without_nodes() {
        let (mut ctx, root) = setup();
        ctx.processes = Box::new(RecordingRunner::new());
        let task = ctx.new_task(TaskKind::RemoteShell, root);
        ctx.set(task, "command", "ls").unwrap();
        assert!(matches!(
            ctx.run_task(task),
            Err(KiteError::Execution(ExecutionError::NoNodes))
        ));
    }

    #[test]
    fn test_dry_run_does_not_spawn() {
        let runner = RecordingRunner::new();
        let log = runner.log();
        let mut ctx = Context::new().with_process_runner(runner).with_dry_run(true);
        let root = ctx.scopes.create(None, Rc::default(), Role::Plain);
        let task = ctx.new_task(TaskKind::Shell, root);
        ctx.set(task, "command", "rm -rf build").unwrap();

        assert_eq!(ctx.run_task(task).unwrap(), Value::Null);
        assert!(log.borrow().is_empty());
    }
}
