//! User facing output
//!
//! Messages are indented two spaces per nesting level and filtered by
//! verbosity. Diagnostics that are not meant for the operator go through
//! `tracing` instead.

use colored::Colorize;
use std::cell::RefCell;
use std::io::{self, Write};
use std::rc::Rc;
use std::str::FromStr;

/// Verbosity levels for output
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Verbosity {
    Silent = 0,
    Quiet = 1,
    #[default]
    Normal = 2,
    Verbose = 3,
}

impl Verbosity {
    pub fn from_level(level: i64) -> Self {
        match level {
            i64::MIN..=0 => Verbosity::Silent,
            1 => Verbosity::Quiet,
            2 => Verbosity::Normal,
            _ => Verbosity::Verbose,
        }
    }
}

impl FromStr for Verbosity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "silent" => Ok(Verbosity::Silent),
            "quiet" => Ok(Verbosity::Quiet),
            "normal" => Ok(Verbosity::Normal),
            "verbose" | "debug" => Ok(Verbosity::Verbose),
            other => other
                .parse::<i64>()
                .map(Verbosity::from_level)
                .map_err(|_| format!("Unknown verbosity '{}'", s)),
        }
    }
}

/// Where output ends up
#[derive(Debug, Clone)]
enum Sink {
    Stdout,
    Buffer(Rc<RefCell<String>>),
}

/// Indenting, verbosity aware writer
#[derive(Debug)]
pub struct Output {
    verbosity: Verbosity,
    level: usize,
    at_line_start: bool,
    sink: Sink,
}

impl Default for Output {
    fn default() -> Self {
        Self::new(Verbosity::Normal)
    }
}

impl Output {
    /// Output writing to stdout
    pub fn new(verbosity: Verbosity) -> Self {
        Output {
            verbosity,
            level: 0,
            at_line_start: true,
            sink: Sink::Stdout,
        }
    }

    /// Output collecting everything into a shared buffer
    pub fn buffered(verbosity: Verbosity) -> (Self, Rc<RefCell<String>>) {
        let buffer = Rc::new(RefCell::new(String::new()));
        let output = Output {
            verbosity,
            level: 0,
            at_line_start: true,
            sink: Sink::Buffer(Rc::clone(&buffer)),
        };
        (output, buffer)
    }

    pub fn verbosity(&self) -> Verbosity {
        self.verbosity
    }

    pub fn set_verbosity(&mut self, verbosity: Verbosity) {
        self.verbosity = verbosity;
    }

    pub fn indent(&mut self) {
        self.level += 1;
    }

    pub fn outdent(&mut self) {
        self.level = self.level.saturating_sub(1);
    }

    pub fn level(&self) -> usize {
        self.level
    }

    /// Write `message` when the verbosity reaches `severity`
    pub fn write(&mut self, message: &str, severity: Verbosity, newline: bool) {
        if self.verbosity == Verbosity::Silent || self.verbosity < severity {
            return;
        }

        let indentation = "  ".repeat(self.level);
        let mut text = String::with_capacity(message.len() + indentation.len());
        for (i, line) in message.split('\n').enumerate() {
            if i > 0 {
                text.push('\n');
            }
            if (i > 0 || self.at_line_start) && !line.is_empty() {
                text.push_str(&indentation);
            }
            text.push_str(line);
        }
        if newline {
            text.push('\n');
        }
        self.at_line_start = newline || message.ends_with('\n');
        self.emit(&text);
    }

    pub fn writeln(&mut self, message: &str) {
        self.write(message, Verbosity::Normal, true);
    }

    /// Highlighted informational line
    pub fn info(&mut self, message: &str) {
        let styled = message.green().to_string();
        self.write(&styled, Verbosity::Normal, true);
    }

    /// Line only shown in verbose mode
    pub fn debug(&mut self, message: &str) {
        let styled = message.dimmed().to_string();
        self.write(&styled, Verbosity::Verbose, true);
    }

    /// Error line; shown unless silent
    pub fn error(&mut self, message: &str) {
        let styled = message.red().to_string();
        self.write(&styled, Verbosity::Quiet, true);
    }

    fn emit(&mut self, text: &str) {
        match &self.sink {
            Sink::Stdout => {
                let mut stdout = io::stdout().lock();
                if let Err(e) = stdout.write_all(text.as_bytes()).and_then(|_| stdout.flush()) {
                    tracing::warn!(error = %e, "failed to write output");
                }
            }
            Sink::Buffer(buffer) => buffer.borrow_mut().push_str(text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_levels() {
        assert!(Verbosity::Verbose > Verbosity::Normal);
        assert!(Verbosity::Normal > Verbosity::Quiet);
        assert!(Verbosity::Quiet > Verbosity::Silent);
        assert_eq!("debug".parse::<Verbosity>().unwrap(), Verbosity::Verbose);
        assert_eq!("1".parse::<Verbosity>().unwrap(), Verbosity::Quiet);
        assert!("loud".parse::<Verbosity>().is_err());
    }

    #[test]
    fn test_indentation() {
        let (mut output, buffer) = Output::buffered(Verbosity::Normal);
        output.writeln("top");
        output.indent();
        output.writeln("nested\nlines");
        output.write("partial", Verbosity::Normal, false);
        output.write(" line", Verbosity::Normal, true);
        output.outdent();
        output.outdent();
        output.writeln("back");

        assert_eq!(
            buffer.borrow().as_str(),
            "top\n  nested\n  lines\n  partial line\nback\n"
        );
    }

    #[test]
    fn test_severity_filtering() {
        let (mut output, buffer) = Output::buffered(Verbosity::Quiet);
        output.writeln("normal");
        output.write("quiet", Verbosity::Quiet, true);
        output.write("verbose", Verbosity::Verbose, true);
        assert_eq!(buffer.borrow().as_str(), "quiet\n");

        let (mut silent, buffer) = Output::buffered(Verbosity::Silent);
        silent.error("nothing");
        assert!(buffer.borrow().is_empty());
    }
}
