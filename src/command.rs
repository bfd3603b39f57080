//! Structured external commands.
//!
//! Operator-supplied camera and encoder commands are parsed once into a
//! program plus argument list with named `{placeholders}`. Values are
//! substituted per argument at run time, so nothing is ever handed to a
//! shell or evaluated.

use std::process::{Command, Stdio};

use log::debug;

use crate::error::{ConfigError, ToolError};

/// A program with an argument list containing `{name}` placeholders.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandTemplate {
    program: String,
    args: Vec<String>,
}

impl CommandTemplate {
    /// Build a template from already split parts.
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Parse operator text such as `curl -s -o {file} {url}`.
    ///
    /// Words are split on whitespace; single or double quotes group words
    /// containing spaces. Every placeholder must be one of `allowed`.
    ///
    /// # Errors
    ///
    /// Returns an error for empty text, unbalanced quotes or unknown
    /// placeholders.
    pub fn parse(text: &str, allowed: &[&str]) -> Result<Self, ConfigError> {
        let words = split_words(text)
            .ok_or_else(|| ConfigError::invalid("command template", text, "unbalanced quotes"))?;
        let mut words = words.into_iter();
        let program = words
            .next()
            .ok_or_else(|| ConfigError::invalid("command template", text, "empty command"))?;
        let template = Self::new(program, words);

        for word in std::iter::once(&template.program).chain(template.args.iter()) {
            for name in placeholders(word) {
                if !allowed.contains(&name) {
                    return Err(ConfigError::invalid(
                        "command template",
                        text,
                        format!("unknown placeholder {{{name}}}, allowed: {}", allowed.join(", ")),
                    ));
                }
            }
        }
        Ok(template)
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments with every `{name}` replaced by its value.
    pub fn render_args(&self, values: &[(&str, &str)]) -> Vec<String> {
        self.args.iter().map(|arg| substitute(arg, values)).collect()
    }

    /// A ready-to-run [`Command`] for the given placeholder values.
    pub fn render(&self, values: &[(&str, &str)]) -> Command {
        let mut command = Command::new(substitute(&self.program, values));
        command.args(self.render_args(values));
        command
    }
}

/// Run a command to completion with its output captured.
///
/// # Errors
///
/// Returns an error if the program cannot be started or exits unsuccessfully.
pub fn run_to_completion(command: &mut Command) -> Result<(), ToolError> {
    let program = command.get_program().to_string_lossy().into_owned();
    debug!("Running {:?}", command);

    let output = command
        .stdin(Stdio::null())
        .output()
        .map_err(|source| ToolError::Spawn {
            program: program.clone(),
            source,
        })?;

    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.trim().is_empty() {
        debug!("{} stderr: {}", program, stderr.trim());
    }
    Err(ToolError::Failed {
        program,
        status: output.status.to_string(),
    })
}

fn substitute(word: &str, values: &[(&str, &str)]) -> String {
    values
        .iter()
        .fold(word.to_string(), |acc, (name, value)| {
            acc.replace(&format!("{{{name}}}"), value)
        })
}

fn placeholders(word: &str) -> Vec<&str> {
    let mut found = Vec::new();
    let mut rest = word;
    while let Some(start) = rest.find('{') {
        let Some(len) = rest[start + 1..].find('}') else {
            break;
        };
        found.push(&rest[start + 1..start + 1 + len]);
        rest = &rest[start + 2 + len..];
    }
    found
}

fn split_words(text: &str) -> Option<Vec<String>> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quote: Option<char> = None;

    for c in text.chars() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), c) => current.push(c),
            (None, '"' | '\'') => {
                quote = Some(c);
                in_word = true;
            }
            (None, c) if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            (None, c) => {
                current.push(c);
                in_word = true;
            }
        }
    }
    if quote.is_some() {
        return None;
    }
    if in_word {
        words.push(current);
    }
    Some(words)
}
