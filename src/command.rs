use crate::completion::Candidates;
use crate::dispatcher::Dispatcher;
use std::fmt;

/// Conventional process exit code type used by this crate.
///
/// A value of 0 indicates success; any non-zero value indicates failure.
/// The `exit` built-in stores one of these for the binary to return.
pub type ExitCode = i32;

/// Outcome of a single command run, as reported back to the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultCode {
    Success = 0,
    /// The arguments did not fit the command; the dispatcher prints the synopsis.
    SyntaxError = 1,
    /// The command ran and failed; in batch mode the offending text is echoed.
    ExecutionFailed = 2,
}

impl ResultCode {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn is_success(self) -> bool {
        self == ResultCode::Success
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResultCode::Success => "success",
            ResultCode::SyntaxError => "syntax error",
            ResultCode::ExecutionFailed => "execution failed",
        };
        f.write_str(name)
    }
}

/// Static metadata of a command: every name it answers to, how it is listed
/// by `help`, and what it needs to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandDescriptor {
    pub name: String,
    /// Extra names registered for the same command, e.g. `?` for `help`.
    pub aliases: Vec<String>,
    pub group: Option<String>,
    /// Usage lines printed when the command returns [`ResultCode::SyntaxError`].
    pub synopsis: Vec<String>,
    pub short_description: Option<String>,
    pub long_description: Option<String>,
    /// Only run when the execution context is isolated.
    pub requires_context: bool,
    /// Offered when completing an empty first word.
    pub completable: bool,
}

impl CommandDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            aliases: Vec::new(),
            group: None,
            synopsis: Vec::new(),
            short_description: None,
            long_description: None,
            requires_context: false,
            completable: true,
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    pub fn in_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn with_synopsis(mut self, line: impl Into<String>) -> Self {
        self.synopsis.push(line.into());
        self
    }

    pub fn describe(mut self, short: impl Into<String>) -> Self {
        self.short_description = Some(short.into());
        self
    }

    pub fn with_long_description(mut self, long: impl Into<String>) -> Self {
        self.long_description = Some(long.into());
        self
    }

    pub fn requiring_context(mut self) -> Self {
        self.requires_context = true;
        self
    }

    pub fn hidden_from_completion(mut self) -> Self {
        self.completable = false;
        self
    }

    /// The primary name followed by the static aliases.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.as_str()).chain(self.aliases.iter().map(String::as_str))
    }
}

/// Arguments of one invocation: the statement text after the command name,
/// split on single spaces with empty tokens dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandArgs {
    args: Vec<String>,
}

impl CommandArgs {
    pub fn new(args: Vec<String>) -> Self {
        Self { args }
    }

    pub fn parse(text: &str) -> Self {
        let args = text
            .split(' ')
            .map(str::trim)
            .filter(|arg| !arg.is_empty())
            .map(str::to_string)
            .collect();
        Self { args }
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.args.iter().map(String::as_str)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.args
    }
}

impl fmt::Display for CommandArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.args.join(" "))
    }
}

impl<'a> IntoIterator for &'a CommandArgs {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.args.iter()
    }
}

/// The session a command runs in.
pub trait ExecutionContext {
    /// Whether this context carries session-scoped state of its own.
    fn is_isolated(&self) -> bool;
}

/// Plain named session used by the shell binary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionContext {
    pub name: String,
    pub isolated: bool,
}

impl SessionContext {
    pub fn new(name: impl Into<String>, isolated: bool) -> Self {
        Self {
            name: name.into(),
            isolated,
        }
    }
}

impl ExecutionContext for SessionContext {
    fn is_isolated(&self) -> bool {
        self.isolated
    }
}

/// Object-safe capability every dispatchable command implements.
///
/// Built-ins get this through [`Builtin`](crate::builtin::Builtin); plugins and
/// applications implement it directly.
pub trait Command {
    fn descriptor(&self) -> &CommandDescriptor;

    /// Runs the command. Returning `Err` is a failure the dispatcher reports
    /// and turns into [`ResultCode::ExecutionFailed`].
    fn execute(
        &self,
        dispatcher: &mut Dispatcher,
        context: Option<&dyn ExecutionContext>,
        args: &CommandArgs,
    ) -> anyhow::Result<ResultCode>;

    /// Candidates for the word being typed after the command name.
    fn complete<'a>(
        &'a self,
        _dispatcher: &'a Dispatcher,
        _partial_line: &str,
        _last_word: &str,
    ) -> Option<Candidates<'a>> {
        None
    }

    /// Whether `text` is a whole statement for this command. Commands that
    /// span several lines until a terminator return false to keep reading.
    fn is_complete(&self, _text: &str) -> bool {
        true
    }

    fn on_shutdown(&self) {}
}

/// Creates fresh command instances, used to load plugins by identifier.
pub trait CommandFactory {
    fn create(&self) -> Box<dyn Command>;
}

impl<F> CommandFactory for F
where
    F: Fn() -> Box<dyn Command>,
{
    fn create(&self) -> Box<dyn Command> {
        self()
    }
}
