//! Interactive questions
//!
//! Answer, confirm and choose tasks (and the matching expression functions)
//! ask through a [`Prompt`]. Validation and defaults are handled here so
//! prompt implementations only deal with reading a line.

use crate::error::{ExecutionError, ExecutionResult, Result};
use crate::runner::Context;
use crate::scope::Value;
use colored::Colorize;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{self, BufRead, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuestionKind {
    Answer,
    Confirm,
    Choice,
}

/// A question as shown to the operator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub kind: QuestionKind,
    pub text: String,
    pub default: Option<String>,
    /// `(key, label)` pairs for choice questions
    pub choices: Vec<(String, String)>,
}

impl Question {
    /// Question line including the default hint
    pub fn render(&self) -> String {
        match (self.kind, &self.default) {
            (QuestionKind::Confirm, Some(default)) if default == "y" => {
                format!("{} [Y/n] ", self.text)
            }
            (QuestionKind::Confirm, _) => format!("{} [y/N] ", self.text),
            (_, Some(default)) => format!("{} [{}] ", self.text, default),
            (_, None) => format!("{} ", self.text),
        }
    }
}

/// Source of answers
pub trait Prompt {
    /// Ask `question` and return the raw answer line
    fn ask(&self, question: &Question) -> ExecutionResult<String>;
}

/// Reads answers from stdin
#[derive(Debug, Clone, Copy, Default)]
pub struct StdinPrompt;

impl Prompt for StdinPrompt {
    fn ask(&self, question: &Question) -> ExecutionResult<String> {
        let mut stdout = io::stdout().lock();
        let mut text = String::new();
        for (key, label) in &question.choices {
            text.push_str(&format!("  [{}] {}\n", key.yellow(), label));
        }
        text.push_str(&question.render().green().to_string());
        stdout
            .write_all(text.as_bytes())
            .and_then(|_| stdout.flush())
            .map_err(|e| ExecutionError::Prompt(e.to_string()))?;

        let mut line = String::new();
        let read = io::stdin()
            .lock()
            .read_line(&mut line)
            .map_err(|e| ExecutionError::Prompt(e.to_string()))?;
        if read == 0 {
            return Err(ExecutionError::Prompt("end of input".to_string()));
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }
}

/// Answers from a fixed list, recording the questions asked
#[derive(Debug, Default)]
pub struct ScriptedPrompt {
    answers: RefCell<VecDeque<String>>,
    asked: RefCell<Vec<Question>>,
}

impl ScriptedPrompt {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ScriptedPrompt {
            answers: RefCell::new(answers.into_iter().map(Into::into).collect()),
            asked: RefCell::new(Vec::new()),
        }
    }

    /// Questions asked so far
    pub fn asked(&self) -> Vec<Question> {
        self.asked.borrow().clone()
    }
}

impl Prompt for ScriptedPrompt {
    fn ask(&self, question: &Question) -> ExecutionResult<String> {
        self.asked.borrow_mut().push(question.clone());
        self.answers
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| ExecutionError::Prompt(format!("no answer for '{}'", question.text)))
    }
}

impl Context {
    /// Ask a yes/no question
    pub fn confirm(&mut self, question: &str, default: bool) -> Result<bool> {
        let question = Question {
            kind: QuestionKind::Confirm,
            text: question.to_string(),
            default: Some(if default { "y" } else { "n" }.to_string()),
            choices: Vec::new(),
        };
        let answer = self.prompt.ask(&question)?;
        let answer = answer.trim().to_lowercase();
        if answer.is_empty() {
            return Ok(default);
        }
        Ok(answer.starts_with('y'))
    }

    /// Ask for free text; an empty answer yields the default
    pub fn answer(&mut self, question: &str, default: Option<String>) -> Result<String> {
        let question = Question {
            kind: QuestionKind::Answer,
            text: question.to_string(),
            default,
            choices: Vec::new(),
        };
        let answer = self.prompt.ask(&question)?;
        let answer = answer.trim();
        if answer.is_empty() {
            return Ok(question.default.unwrap_or_default());
        }
        Ok(answer.to_string())
    }

    /// Pick one of `choices`, by key (list index) or by value
    ///
    /// Lists yield the chosen value, maps the chosen key. Invalid answers are
    /// reported and asked again.
    pub fn choose(&mut self, question: &str, choices: &Value, default: Option<Value>) -> Result<Value> {
        let entries = choices
            .entries()
            .ok_or_else(|| ExecutionError::InvalidIterable("choices".to_string()))?;
        let is_list = matches!(choices, Value::List(_));

        let options: Vec<(String, String, Value)> = entries
            .into_iter()
            .map(|(key, value)| {
                let result = if is_list { value.clone() } else { key.clone() };
                (key.to_string(), value.to_string(), result)
            })
            .collect();

        let question = Question {
            kind: QuestionKind::Choice,
            text: question.to_string(),
            default: default.map(|d| d.to_string()),
            choices: options
                .iter()
                .map(|(key, label, _)| (key.clone(), label.clone()))
                .collect(),
        };

        loop {
            let answer = self.prompt.ask(&question)?;
            let mut answer = answer.trim().to_string();
            if answer.is_empty() {
                if let Some(default) = &question.default {
                    answer = default.clone();
                }
            }

            let found = options
                .iter()
                .find(|(key, _, _)| *key == answer)
                .or_else(|| options.iter().find(|(_, label, _)| *label == answer));
            match found {
                Some((_, _, result)) => return Ok(result.clone()),
                None => {
                    let message = ExecutionError::InvalidChoice(answer).to_string();
                    tracing::debug!(%message, "re-asking choice");
                    self.output.error(&message);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KiteError;
    use crate::runner::output::{Output, Verbosity};
    use crate::scope::ValueMap;

    #[test]
    fn test_render() {
        let question = Question {
            kind: QuestionKind::Answer,
            text: "Name?".to_string(),
            default: Some("kite".to_string()),
            choices: Vec::new(),
        };
        assert_eq!(question.render(), "Name? [kite] ");

        let confirm = Question {
            kind: QuestionKind::Confirm,
            default: Some("n".to_string()),
            ..question
        };
        assert_eq!(confirm.render(), "Name? [y/N] ");
    }

    #[test]
    fn test_confirm_and_answer_defaults() {
        let mut ctx = Context::new().with_prompt(ScriptedPrompt::new(["", "yes", "", " bob "]));

        assert!(!ctx.confirm("Continue?", false).unwrap());
        assert!(ctx.confirm("Continue?", false).unwrap());
        assert_eq!(ctx.answer("Name?", Some("kite".to_string())).unwrap(), "kite");
        assert_eq!(ctx.answer("Name?", None).unwrap(), "bob");
    }

    #[test]
    fn test_choose_from_map_returns_key() {
        let mut ctx = Context::new().with_prompt(ScriptedPrompt::new(["Staging"]));
        let mut choices = ValueMap::new();
        choices.insert("prod".into(), Value::from("Production"));
        choices.insert("stage".into(), Value::from("Staging"));

        assert_eq!(
            ctx.choose("Where?", &Value::Map(choices), None).unwrap(),
            Value::from("stage")
        );
    }

    #[test]
    fn test_choose_reasks_invalid_answers() {
        let (output, buffer) = Output::buffered(Verbosity::Normal);
        let mut ctx = Context::new()
            .with_output(output)
            .with_prompt(ScriptedPrompt::new(["nope", "b"]));
        let choices = Value::List(vec![Value::from("a"), Value::from("b")]);

        assert_eq!(ctx.choose("Pick", &choices, None).unwrap(), Value::from("b"));
        assert!(buffer.borrow().contains("Value \"nope\" is invalid"));
    }

    #[test]
    fn test_choose_default_and_exhausted_prompt() {
        let mut ctx = Context::new().with_prompt(ScriptedPrompt::new([""]));
        let choices = Value::List(vec![Value::from("a"), Value::from("b")]);

        assert_eq!(
            ctx.choose("Pick", &choices, Some(Value::from("a"))).unwrap(),
            Value::from("a")
        );
        assert!(matches!(
            ctx.choose("Pick", &choices, None),
            Err(KiteError::Execution(ExecutionError::Prompt(_)))
        ));
    }
}
