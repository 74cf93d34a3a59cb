use crate::alias::AliasCompletion;
use crate::command::{
    Command, CommandArgs, CommandDescriptor, CommandFactory, ExecutionContext, ExitCode, ResultCode,
};
use crate::completion::{Candidates, completed_words};
use crate::dispatcher::Dispatcher;
use crate::env::{Environment, VariableCompletion};
use anyhow::Result;
use argh::{EarlyExit, FromArgs};
use std::fmt::{self, Write as _};
use std::io::Write;
use std::marker::PhantomData;
use tracing::debug;

/// Built-in commands shipped with the shell.
///
/// Builtins are parsed using the [`argh`] crate (`FromArgs`) from the
/// tokenized statement arguments and run in-process against the dispatcher.
pub trait Builtin: Sized + FromArgs {
    /// Names, group, synopsis and descriptions of the command.
    fn descriptor() -> CommandDescriptor;

    /// Runs the parsed command.
    ///
    /// Follows the dispatcher's conventions: `SyntaxError` makes it print the
    /// synopsis, `ExecutionFailed` means the command already explained itself.
    fn run(
        self,
        dispatcher: &mut Dispatcher,
        context: Option<&dyn ExecutionContext>,
    ) -> Result<ResultCode>;

    fn complete<'a>(
        _dispatcher: &'a Dispatcher,
        _partial_line: &str,
        _last_word: &str,
    ) -> Option<Candidates<'a>> {
        None
    }
}

/// Adapts a [`Builtin`] to the object-safe [`Command`] interface.
pub struct BuiltinCommand<T> {
    descriptor: CommandDescriptor,
    _phantom: PhantomData<fn() -> T>,
}

impl<T: Builtin> BuiltinCommand<T> {
    pub fn new() -> Self {
        Self {
            descriptor: T::descriptor(),
            _phantom: PhantomData,
        }
    }
}

impl<T: Builtin> Default for BuiltinCommand<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Builtin> Command for BuiltinCommand<T> {
    fn descriptor(&self) -> &CommandDescriptor {
        &self.descriptor
    }

    fn execute(
        &self,
        dispatcher: &mut Dispatcher,
        context: Option<&dyn ExecutionContext>,
        args: &CommandArgs,
    ) -> Result<ResultCode> {
        let name = self.descriptor.name.as_str();
        let argv: Vec<&str> = args.iter().collect();
        match T::from_args(&[name], &argv) {
            Ok(cmd) => cmd.run(dispatcher, context),
            Err(EarlyExit { output, status }) => match status {
                // --help
                Ok(()) => {
                    write!(dispatcher.out(), "{output}")?;
                    Ok(ResultCode::Success)
                }
                Err(()) => {
                    debug!(command = name, %output, "invalid arguments");
                    Ok(ResultCode::SyntaxError)
                }
            },
        }
    }

    fn complete<'a>(
        &'a self,
        dispatcher: &'a Dispatcher,
        partial_line: &str,
        last_word: &str,
    ) -> Option<Candidates<'a>> {
        T::complete(dispatcher, partial_line, last_word)
    }
}

/// Factory allows creating instances of a built-in command.
pub struct Factory<T> {
    _phantom: PhantomData<fn() -> T>,
}

impl<T> Default for Factory<T> {
    fn default() -> Self {
        Self {
            _phantom: PhantomData,
        }
    }
}

impl<T: Builtin + 'static> CommandFactory for Factory<T> {
    fn create(&self) -> Box<dyn Command> {
        Box::new(BuiltinCommand::<T>::new())
    }
}

/// Factories for every built-in, in listing order.
pub fn default_factories() -> Vec<Box<dyn CommandFactory>> {
    vec![
        Box::new(Factory::<Help>::default()),
        Box::new(Factory::<Echo>::default()),
        Box::new(Factory::<Exit>::default()),
        Box::new(Factory::<Alias>::default()),
        Box::new(Factory::<Unalias>::default()),
        Box::new(Factory::<Aliases>::default()),
        Box::new(Factory::<Set>::default()),
        Box::new(Factory::<Unset>::default()),
        Box::new(Factory::<Variables>::default()),
    ]
}

/// Fresh instances of every built-in.
pub fn default_commands() -> Vec<Box<dyn Command>> {
    default_factories().iter().map(|f| f.create()).collect()
}

/// Drops one pair of matching surrounding quotes.
fn strip_quotes(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

#[derive(FromArgs)]
/// Provide help for commands. Without a command name all commands are listed.
pub struct Help {
    #[argh(positional)]
    /// command to describe.
    pub command: Option<String>,
}

impl Help {
    fn listing(dispatcher: &Dispatcher) -> Result<String, fmt::Error> {
        let mut groups: Vec<(&str, Vec<(String, Option<&str>)>)> = Vec::new();
        let mut width = 0;
        for command in dispatcher.commands() {
            let descriptor = command.descriptor();
            let group = descriptor
                .group
                .as_deref()
                .filter(|g| !g.is_empty())
                .unwrap_or("commands");
            let mut names = format!(" {}", descriptor.name);
            for alias in &descriptor.aliases {
                names.push_str(" | ");
                names.push_str(alias);
            }
            width = width.max(names.len());
            let entry = (names, descriptor.short_description.as_deref());
            match groups.iter_mut().find(|(name, _)| *name == group) {
                Some((_, entries)) => entries.push(entry),
                None => groups.push((group, vec![entry])),
            }
        }

        let mut text = String::from("\n");
        for (group, entries) in groups {
            writeln!(text, "{group}:")?;
            for (names, description) in entries {
                match description {
                    Some(description) => writeln!(text, "  {names:<width$} : {description}")?,
                    None => writeln!(text, "  {names}")?,
                }
            }
        }
        text.push('\n');
        Ok(text)
    }

    fn details(descriptor: &CommandDescriptor) -> Result<String, fmt::Error> {
        let mut text = String::from("\n");
        let description = descriptor.long_description.clone().or_else(|| {
            descriptor
                .short_description
                .as_ref()
                .map(|short| format!("[short description]: {short}"))
        });
        if !descriptor.synopsis.is_empty() {
            writeln!(text, "SYNOPSIS")?;
            for line in &descriptor.synopsis {
                writeln!(text, "\t{line}")?;
            }
            writeln!(text)?;
        }
        match description {
            Some(description) => {
                writeln!(text, "DESCRIPTION")?;
                for line in description.lines() {
                    writeln!(text, "\t{line}")?;
                }
                if descriptor.requires_context {
                    writeln!(text, "\t[Requires valid context]")?;
                }
            }
            None if descriptor.synopsis.is_empty() => {
                writeln!(text, "no detailed help for '{}'", descriptor.name)?;
            }
            None => {}
        }
        text.push('\n');
        Ok(text)
    }
}

impl Builtin for Help {
    fn descriptor() -> CommandDescriptor {
        CommandDescriptor::new("help")
            .with_alias("?")
            .with_synopsis("help [ <command-name> ]")
            .with_synopsis("? [ <command-name> ]")
            .describe("provides help for commands")
            .with_long_description(
                "Provides help for the given command. If invoked without a\n\
                 command name as parameter, a list of all available commands\n\
                 is shown.",
            )
    }

    fn run(
        self,
        dispatcher: &mut Dispatcher,
        _context: Option<&dyn ExecutionContext>,
    ) -> Result<ResultCode> {
        let text = match &self.command {
            None => Self::listing(dispatcher)?,
            Some(name) => match dispatcher.command(name) {
                Some(command) => Self::details(command.descriptor())?,
                None => {
                    let name = dispatcher.resolve_name(name);
                    dispatcher.report(format_args!("Help: unknown command '{name}'"));
                    return Ok(ResultCode::ExecutionFailed);
                }
            },
        };
        write!(dispatcher.out(), "{text}")?;
        Ok(ResultCode::Success)
    }

    fn complete<'a>(
        dispatcher: &'a Dispatcher,
        partial_line: &str,
        last_word: &str,
    ) -> Option<Candidates<'a>> {
        if completed_words(partial_line, last_word).len() > 1 {
            return None;
        }
        Some(Box::new(dispatcher.name_matches(last_word)))
    }
}

#[derive(FromArgs)]
/// Write the arguments to the output, separated by spaces.
/// One pair of surrounding quotes is removed.
pub struct Echo {
    #[argh(switch, short = 'n')]
    /// do not output the trailing newline.
    pub no_newline: bool,

    #[argh(positional, greedy)]
    /// values to print, separated by spaces.
    pub words: Vec<String>,
}

impl Builtin for Echo {
    fn descriptor() -> CommandDescriptor {
        CommandDescriptor::new("echo")
            .with_alias("prompt")
            .with_synopsis("echo <whatever>")
            .describe("prompts the given arguments")
            .with_long_description("just echo the string given.")
    }

    fn run(
        self,
        dispatcher: &mut Dispatcher,
        _context: Option<&dyn ExecutionContext>,
    ) -> Result<ResultCode> {
        let joined = self.words.join(" ");
        let text = strip_quotes(&joined);
        let out = dispatcher.out();
        if self.no_newline {
            write!(out, "{text}")?;
        } else {
            writeln!(out, "{text}")?;
        }
        Ok(ResultCode::Success)
    }
}

#[derive(FromArgs)]
/// Exit the shell.
pub struct Exit {
    #[argh(positional)]
    /// process exit code, 0 when omitted.
    pub code: Option<ExitCode>,
}

impl Builtin for Exit {
    fn descriptor() -> CommandDescriptor {
        CommandDescriptor::new("exit")
            .with_alias("quit")
            .with_synopsis("exit [ <code> ]")
            .describe("exits the application")
    }

    fn run(
        self,
        dispatcher: &mut Dispatcher,
        _context: Option<&dyn ExecutionContext>,
    ) -> Result<ResultCode> {
        let code = self.code.unwrap_or(0);
        debug!(code, "exit requested");
        dispatcher.env_mut().request_exit(code);
        Ok(ResultCode::Success)
    }
}

#[derive(FromArgs)]
/// Add an alias for a command.
pub struct Alias {
    #[argh(positional)]
    /// the new name.
    pub name: String,

    #[argh(positional, greedy)]
    /// the text the alias expands to.
    pub expansion: Vec<String>,
}

impl Builtin for Alias {
    fn descriptor() -> CommandDescriptor {
        CommandDescriptor::new("alias")
            .in_group("aliases")
            .with_synopsis("alias <alias-name> <command>")
            .describe("adds an alias for a command")
            .with_long_description(
                "Add an alias for a command. This means, that you can\n\
                 give a short name for a command you often use. This\n\
                 might be as simple as\n   alias ls tables\n\
                 to execute the tables command with a short 'ls'.\n\n\
                 For longer commands it is even more helpful:\n   \
                 alias size select count(*) from\n\
                 This command needs a table name as a parameter to\n\
                 expand to a complete command. So 'size students'\n\
                 expands to 'select count(*) from students'.",
            )
    }

    fn run(
        self,
        dispatcher: &mut Dispatcher,
        _context: Option<&dyn ExecutionContext>,
    ) -> Result<ResultCode> {
        if self.name.starts_with(['"', '\'']) || self.expansion.is_empty() {
            return Ok(ResultCode::SyntaxError);
        }
        if !dispatcher.aliases().contains(&self.name) && dispatcher.contains(&self.name) {
            dispatcher.report("cannot alias built-in command!");
            return Ok(ResultCode::ExecutionFailed);
        }
        let joined = self.expansion.join(" ");
        dispatcher.add_alias(&self.name, strip_quotes(&joined))?;
        Ok(ResultCode::Success)
    }

    fn complete<'a>(
        dispatcher: &'a Dispatcher,
        partial_line: &str,
        last_word: &str,
    ) -> Option<Candidates<'a>> {
        dispatcher
            .aliases()
            .complete(AliasCompletion::Define, partial_line, last_word)
    }
}

#[derive(FromArgs)]
/// Remove aliases.
pub struct Unalias {
    #[argh(positional, greedy)]
    /// aliases to remove.
    pub names: Vec<String>,
}

impl Builtin for Unalias {
    fn descriptor() -> CommandDescriptor {
        CommandDescriptor::new("unalias")
            .in_group("aliases")
            .with_synopsis("unalias <alias-name> [ <alias-name> ... ]")
            .describe("removes an aliased command")
    }

    fn run(
        self,
        dispatcher: &mut Dispatcher,
        _context: Option<&dyn ExecutionContext>,
    ) -> Result<ResultCode> {
        if self.names.is_empty() {
            return Ok(ResultCode::SyntaxError);
        }
        let mut failed = 0;
        for name in &self.names {
            if dispatcher.remove_alias(name).is_err() {
                dispatcher.report(format_args!("unknown alias '{name}'"));
                failed += 1;
            }
        }
        Ok(if failed < self.names.len() {
            ResultCode::Success
        } else {
            ResultCode::ExecutionFailed
        })
    }

    fn complete<'a>(
        dispatcher: &'a Dispatcher,
        partial_line: &str,
        last_word: &str,
    ) -> Option<Candidates<'a>> {
        dispatcher
            .aliases()
            .complete(AliasCompletion::Remove, partial_line, last_word)
    }
}

#[derive(FromArgs)]
/// List all aliases.
pub struct Aliases {}

impl Builtin for Aliases {
    fn descriptor() -> CommandDescriptor {
        CommandDescriptor::new("aliases")
            .in_group("aliases")
            .describe("lists all the aliases")
    }

    fn run(
        self,
        dispatcher: &mut Dispatcher,
        _context: Option<&dyn ExecutionContext>,
    ) -> Result<ResultCode> {
        let rows: Vec<(&str, &str)> = dispatcher.aliases().iter().collect();
        let text = two_columns(&rows)?;
        write!(dispatcher.out(), "{text}")?;
        Ok(ResultCode::Success)
    }
}

fn two_columns(rows: &[(&str, &str)]) -> Result<String, fmt::Error> {
    let width = rows.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut text = String::new();
    for (key, value) in rows {
        writeln!(text, "  {key:<width$} : {value}")?;
    }
    Ok(text)
}

#[derive(FromArgs)]
/// Set a session variable.
pub struct Set {
    #[argh(positional)]
    /// variable name.
    pub name: String,

    #[argh(positional, greedy)]
    /// the value.
    pub value: Vec<String>,
}

impl Builtin for Set {
    fn descriptor() -> CommandDescriptor {
        CommandDescriptor::new("set")
            .in_group("variables")
            .with_synopsis("set <varname> <value>")
            .describe("sets the value of a variable")
            .with_long_description(
                "Sets variable with name <varname> to <value>. Variables\n\
                 are expanded in any command you issue on the command line,\n\
                 both as $VARNAME and ${VARNAME}. A variable that is not set\n\
                 is left untouched. Write two dollars to quote the dollar\n\
                 sign: $$FOO means $FOO.",
            )
    }

    fn run(
        self,
        dispatcher: &mut Dispatcher,
        _context: Option<&dyn ExecutionContext>,
    ) -> Result<ResultCode> {
        if self.value.is_empty() {
            return Ok(ResultCode::SyntaxError);
        }
        let joined = self.value.join(" ");
        let value = strip_quotes(&joined);
        dispatcher.env_mut().set_var(self.name.as_str(), value);
        dispatcher.print(format_args!("variable {} set to {value}", self.name));
        Ok(ResultCode::Success)
    }

    fn complete<'a>(
        dispatcher: &'a Dispatcher,
        partial_line: &str,
        last_word: &str,
    ) -> Option<Candidates<'a>> {
        dispatcher
            .env()
            .complete_arguments(partial_line, last_word, VariableCompletion::Define)
    }
}

#[derive(FromArgs)]
/// Remove session variables.
pub struct Unset {
    #[argh(positional, greedy)]
    /// variables to remove.
    pub names: Vec<String>,
}

impl Builtin for Unset {
    fn descriptor() -> CommandDescriptor {
        CommandDescriptor::new("unset")
            .in_group("variables")
            .with_synopsis("unset <varname> [ <varname> ... ]")
            .describe("unsets previously set variables")
    }

    fn run(
        self,
        dispatcher: &mut Dispatcher,
        _context: Option<&dyn ExecutionContext>,
    ) -> Result<ResultCode> {
        if self.names.is_empty() {
            return Ok(ResultCode::SyntaxError);
        }
        let mut removed = false;
        for name in &self.names {
            if dispatcher.env_mut().remove_var(name).is_some() {
                removed = true;
            } else {
                dispatcher.report(format_args!("unknown variable {name}"));
            }
        }
        Ok(if removed {
            ResultCode::Success
        } else {
            ResultCode::ExecutionFailed
        })
    }

    fn complete<'a>(
        dispatcher: &'a Dispatcher,
        partial_line: &str,
        last_word: &str,
    ) -> Option<Candidates<'a>> {
        dispatcher
            .env()
            .complete_arguments(partial_line, last_word, VariableCompletion::Remove)
    }
}

#[derive(FromArgs)]
/// List the session variables.
pub struct Variables {}

impl Builtin for Variables {
    fn descriptor() -> CommandDescriptor {
        CommandDescriptor::new("variables")
            .in_group("variables")
            .describe("shows a list of all variables registered in the application")
    }

    fn run(
        self,
        dispatcher: &mut Dispatcher,
        _context: Option<&dyn ExecutionContext>,
    ) -> Result<ResultCode> {
        let rows: Vec<(&str, &str)> = dispatcher
            .env()
            .variables()
            .iter()
            .filter(|(key, _)| !Environment::is_special(key))
            .map(|(key, value)| (key.as_str(), value.as_str()))
            .collect();
        let text = two_columns(&rows)?;
        write!(dispatcher.out(), "{text}")?;
        Ok(ResultCode::Success)
    }
}
