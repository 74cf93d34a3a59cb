use crate::command::ExitCode;
use crate::completion::{Candidates, completed_words, map_matches};
use crate::interrupt::InterruptFlag;
use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::sync::OnceLock;
use tracing::warn;

/// Holds the text of the last executed statement.
pub const LAST_COMMAND_VAR: &str = "_SHELLAPP_LAST_COMMAND";

const VARIABLE_PATTERN: &str = r"\$(?:(\$)|\{(\w*)(\})?|(\w+))";

fn variable_pattern() -> Result<&'static Regex, regex::Error> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    if let Some(re) = PATTERN.get() {
        return Ok(re);
    }
    let re = Regex::new(VARIABLE_PATTERN)?;
    Ok(PATTERN.get_or_init(|| re))
}

/// Which of the variable commands is asking for argument completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableCompletion {
    /// `set <name> <value>`: only the name is completed.
    Define,
    /// `unset <name>...`: names already on the line are not offered again.
    Remove,
}

/// Session state shared by all commands of a shell.
///
/// The environment contains:
/// - the user variables, substituted into every statement before it runs;
/// - `should_exit` / `exit_code`, set by `exit` and checked by the input loop;
/// - the interrupt flag of the running statement.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    variables: BTreeMap<String, String>,
    /// When set to true, indicates that the input loop should stop.
    pub should_exit: bool,
    pub exit_code: ExitCode,
    interrupt: InterruptFlag,
}

impl Environment {
    /// An environment with no variables set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Value of the variable `key`.
    pub fn get_var(&self, key: &str) -> Option<&str> {
        self.variables.get(key).map(String::as_str)
    }

    /// Set or override a variable.
    pub fn set_var(&mut self, key: impl Into<String>, val: impl Into<String>) {
        self.variables.insert(key.into(), val.into());
    }

    /// Removes the variable `key`, returning its old value.
    pub fn remove_var(&mut self, key: &str) -> Option<String> {
        self.variables.remove(key)
    }

    /// Whether the variable `key` is set.
    pub fn has_var(&self, key: &str) -> bool {
        self.variables.contains_key(key)
    }

    /// Variables in name order, special ones included.
    pub fn variables(&self) -> &BTreeMap<String, String> {
        &self.variables
    }

    /// Variables the shell maintains itself and `variables` does not list.
    pub fn is_special(key: &str) -> bool {
        key == LAST_COMMAND_VAR
    }

    /// Flag raised when the running statement is interrupted.
    pub fn interrupt_flag(&self) -> &InterruptFlag {
        &self.interrupt
    }

    /// Whether Ctrl-C was pressed while the current statement runs.
    pub fn interrupted(&self) -> bool {
        self.interrupt.is_raised()
    }

    /// Asks the session to end with `code`.
    pub fn request_exit(&mut self, code: ExitCode) {
        self.should_exit = true;
        self.exit_code = code;
    }

    /// Replaces `$name` and `${name}` with variable values.
    ///
    /// `$$` stands for a literal dollar sign. Unknown variables and an
    /// unterminated `${name` stay in the text as they were.
    pub fn substitute(&self, text: &str) -> Result<String, regex::Error> {
        if !text.contains('$') {
            return Ok(text.to_string());
        }
        let pattern = variable_pattern()?;
        let substituted = pattern.replace_all(text, |caps: &Captures<'_>| {
            let whole = &caps[0];
            if caps.get(1).is_some() {
                return "$".to_string();
            }
            if let Some(name) = caps.get(2) {
                if caps.get(3).is_none() {
                    warn!("missing '}}' for variable '{}'", name.as_str());
                    return whole.to_string();
                }
                return self.lookup_or_keep(name.as_str(), whole);
            }
            match caps.get(4) {
                Some(name) => self.lookup_or_keep(name.as_str(), whole),
                None => whole.to_string(),
            }
        });
        Ok(substituted.into_owned())
    }

    fn lookup_or_keep(&self, name: &str, whole: &str) -> String {
        match self.variables.get(name) {
            Some(value) => value.clone(),
            None => {
                warn!("variable '{name}' not set");
                whole.to_string()
            }
        }
    }

    /// Completes a `$name` or `${name` word against the variable names,
    /// restoring the sigil (and closing brace) on every candidate.
    pub fn complete_variable<'a>(&'a self, word: &str) -> Option<Candidates<'a>> {
        let (prefix, suffix) = if word.starts_with("${") {
            ("${", "}")
        } else if word.starts_with('$') {
            ("$", "")
        } else {
            return None;
        };
        let name = &word[prefix.len()..];
        let matches = map_matches(name, &self.variables)
            .with_prefix(prefix)
            .with_suffix(suffix);
        Some(Box::new(matches))
    }

    /// Completes the variable-name arguments of `set` and `unset`.
    pub fn complete_arguments<'a>(
        &'a self,
        partial_line: &str,
        last_word: &str,
        mode: VariableCompletion,
    ) -> Option<Candidates<'a>> {
        let words = completed_words(partial_line, last_word);
        let matches = map_matches(last_word, &self.variables);
        match mode {
            VariableCompletion::Define => {
                if words.len() > 1 {
                    return None;
                }
                Some(Box::new(matches))
            }
            VariableCompletion::Remove => {
                let given: Vec<String> = words.iter().skip(1).map(|w| w.to_string()).collect();
                Some(Box::new(
                    matches.excluding(move |name| given.iter().any(|g| g == name)),
                ))
            }
        }
    }
}
