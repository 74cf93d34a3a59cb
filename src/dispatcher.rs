use crate::alias::{AliasedCommand, Aliases};
use crate::command::{Command, CommandArgs, ExecutionContext, ResultCode};
use crate::completion::{SortedMatches, map_matches};
use crate::env::{Environment, LAST_COMMAND_VAR};
use crate::error::{DispatchError, RegistryError};
use crate::range::RangeView;
use crate::store::KeyValueStore;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::io::{self, Write};
use std::rc::Rc;
use tracing::{debug, warn};

/// Notification sent around every command run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandEvent<'a> {
    /// The statement text as handed to [`Dispatcher::execute`].
    pub text: &'a str,
    /// `None` before the run, the outcome after it.
    pub result: Option<ResultCode>,
}

type Listener = Box<dyn FnMut(&CommandEvent<'_>)>;

/// Command table, name resolution and execution.
///
/// Every name a command answers to (its name, its static aliases, and user
/// aliases pointing at synthetic commands) is a key of one sorted table.
/// Names are unique across the whole table.
///
/// Example
/// ```
/// use shell_dispatch::{Dispatcher, MemWriter, ResultCode};
/// use shell_dispatch::builtin::{Echo, Factory};
/// use shell_dispatch::CommandFactory;
///
/// let out = MemWriter::new();
/// let mut dispatcher = Dispatcher::new(Box::new(out.clone()), Box::new(MemWriter::new()));
/// dispatcher.register(Factory::<Echo>::default().create()).unwrap();
/// assert_eq!(dispatcher.execute(None, "echo hello world;"), Ok(ResultCode::Success));
/// assert_eq!(out.contents(), "hello world\n");
/// ```
pub struct Dispatcher {
    commands: BTreeMap<String, Rc<dyn Command>>,
    // registration order, for listings
    registered: Vec<Rc<dyn Command>>,
    aliases: Aliases,
    env: Environment,
    separator: Option<char>,
    batch: usize,
    depth: usize,
    running: bool,
    out: Box<dyn Write>,
    err: Box<dyn Write>,
    executing: Vec<Listener>,
    executed: Vec<Listener>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(Box::new(io::stdout()), Box::new(io::stderr()))
    }
}

impl Dispatcher {
    /// Create a dispatcher writing user-visible output to `out` and
    /// diagnostics to `err`.
    pub fn new(out: Box<dyn Write>, err: Box<dyn Write>) -> Self {
        Self {
            commands: BTreeMap::new(),
            registered: Vec::new(),
            aliases: Aliases::new(),
            env: Environment::new(),
            separator: Some(';'),
            batch: 0,
            depth: 0,
            running: false,
            out,
            err,
            executing: Vec::new(),
            executed: Vec::new(),
        }
    }

    /// Statement separator recognized after a command, if any.
    pub fn separator(&self) -> Option<char> {
        self.separator
    }

    /// Changes the statement separator; `None` leaves newlines only.
    pub fn set_separator(&mut self, separator: Option<char>) {
        self.separator = separator;
    }

    /// Sink for user-visible output.
    pub fn out(&mut self) -> &mut dyn Write {
        &mut *self.out
    }

    /// Sink for diagnostics.
    pub fn err(&mut self) -> &mut dyn Write {
        &mut *self.err
    }

    /// Redirects user-visible output.
    pub fn set_output(&mut self, out: Box<dyn Write>) {
        self.out = out;
    }

    /// Redirects diagnostics.
    pub fn set_error(&mut self, err: Box<dyn Write>) {
        self.err = err;
    }

    /// Session variables and exit state.
    pub fn env(&self) -> &Environment {
        &self.env
    }

    /// Mutable access to the session environment.
    pub fn env_mut(&mut self) -> &mut Environment {
        &mut self.env
    }

    /// User aliases defined in this session.
    pub fn aliases(&self) -> &Aliases {
        &self.aliases
    }

    pub(crate) fn aliases_mut(&mut self) -> &mut Aliases {
        &mut self.aliases
    }

    /// Whether the session has started.
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// While running, the command table is frozen for registration.
    pub fn set_running(&mut self, running: bool) {
        self.running = running;
    }

    /// Writes one line to the error sink.
    pub fn report(&mut self, message: impl fmt::Display) {
        if let Err(e) = writeln!(self.err, "{message}") {
            warn!(error = %e, "can't write to the error sink");
        }
    }

    /// Writes one line to the output sink.
    pub fn print(&mut self, message: impl fmt::Display) {
        if let Err(e) = writeln!(self.out, "{message}") {
            warn!(error = %e, "can't write to the output sink");
        }
    }

    /// Calls `listener` before every command runs.
    pub fn on_executing(&mut self, listener: impl FnMut(&CommandEvent<'_>) + 'static) {
        self.executing.push(Box::new(listener));
    }

    /// Calls `listener` with the result after every command ran.
    pub fn on_executed(&mut self, listener: impl FnMut(&CommandEvent<'_>) + 'static) {
        self.executed.push(Box::new(listener));
    }

    /// Adds `command` under its name and every static alias.
    ///
    /// Fails without touching the table if any of those names is taken.
    pub fn register(&mut self, command: Box<dyn Command>) -> Result<(), RegistryError> {
        if self.running {
            return Err(RegistryError::Running);
        }
        let command: Rc<dyn Command> = Rc::from(command);
        let descriptor = command.descriptor();

        let mut seen = BTreeSet::new();
        for name in descriptor.names() {
            if self.commands.contains_key(name) || !seen.insert(name) {
                return Err(RegistryError::DuplicateName(name.to_string()));
            }
        }
        for name in descriptor.names() {
            self.commands.insert(name.to_string(), Rc::clone(&command));
        }
        debug!(name = %descriptor.name, aliases = ?descriptor.aliases, "registered command");
        self.registered.push(command);
        Ok(())
    }

    /// Removes the command answering to `name`, with all of its names.
    pub fn unregister(&mut self, name: &str) -> Result<Rc<dyn Command>, RegistryError> {
        if self.aliases.contains(name) {
            return Err(RegistryError::NotFound(name.to_string()));
        }
        let command = self
            .commands
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        self.commands.retain(|_, c| !Rc::ptr_eq(c, &command));
        self.registered.retain(|c| !Rc::ptr_eq(c, &command));
        debug!(name, "unregistered command");
        Ok(command)
    }

    /// Moves one table entry to a new name.
    pub fn rename(&mut self, name: &str, new_name: &str) -> Result<(), RegistryError> {
        if self.commands.contains_key(new_name) {
            return Err(RegistryError::DuplicateName(new_name.to_string()));
        }
        if self.aliases.contains(name) {
            return Err(RegistryError::NotFound(name.to_string()));
        }
        let command = self
            .commands
            .remove(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        self.commands.insert(new_name.to_string(), command);
        Ok(())
    }

    /// Whether `name` is a command name, static alias or user alias.
    pub fn contains(&self, name: &str) -> bool {
        self.commands.contains_key(name)
    }

    /// Registered commands in registration order, without user aliases.
    pub fn commands(&self) -> impl Iterator<Item = &dyn Command> {
        self.registered.iter().map(|c| &**c)
    }

    /// Every name in the table, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.commands.keys().map(String::as_str)
    }

    /// Sorted names from `start` (inclusive) on.
    pub fn names_from<'a, 's>(
        &'a self,
        start: &'s str,
    ) -> impl Iterator<Item = &'a str> + use<'a, 's> {
        RangeView::tail(self.commands.keys().map(String::as_str), start)
    }

    /// Command and alias names starting with `partial`.
    pub fn name_matches<'a>(
        &'a self,
        partial: &str,
    ) -> SortedMatches<'a, impl Iterator<Item = &'a str> + use<'a>> {
        map_matches(partial, &self.commands)
    }

    /// The command `text` would run.
    pub fn command(&self, text: &str) -> Option<&dyn Command> {
        let name = self.resolve_name(text);
        self.commands.get(&name).map(|c| &**c)
    }

    fn lookup(&self, name: &str) -> Option<&dyn Command> {
        self.commands.get(name).map(|c| &**c)
    }

    /// Finds the command name at the start of `text`.
    ///
    /// Returns the longest registered name `text` starts with, trying the
    /// exact case first and then the lower-cased text. When nothing matches,
    /// the leading word of `text` is returned as is, so that the caller can
    /// report it as unknown.
    pub fn resolve_name(&self, text: &str) -> String {
        self.split_name(text.trim_start()).0
    }

    // Resolved name and the byte length of `text` it covers.
    fn split_name(&self, text: &str) -> (String, usize) {
        if let Some(name) = self.longest_prefix(text) {
            return (name.to_string(), name.len());
        }
        let lowered: String = text.chars().flat_map(char::to_lowercase).collect();
        if lowered != text {
            if let Some(name) = self.longest_prefix(&lowered) {
                return (name.to_string(), folded_len(text, name.len()));
            }
        }
        let word = text
            .split(|c: char| c.is_whitespace() || c == ';' || Some(c) == self.separator)
            .next()
            .unwrap_or_default();
        (word.to_string(), word.len())
    }

    // Sorted scan over the names sharing the first character of `text`.
    fn longest_prefix(&self, text: &str) -> Option<&str> {
        let first = text.chars().next()?;
        let start = &text[..first.len_utf8()];
        let mut longest = None;
        for name in self.names_from(start) {
            if text.starts_with(name) {
                longest = Some(name);
            } else if !name.starts_with(first) {
                break;
            }
        }
        longest
    }

    /// Enters batch mode; calls nest.
    pub fn start_batch(&mut self) {
        self.batch += 1;
    }

    /// Leaves one level of batch mode.
    pub fn end_batch(&mut self) {
        self.batch = self.batch.saturating_sub(1);
    }

    /// Whether statements come from a script rather than a terminal.
    pub fn is_in_batch(&self) -> bool {
        self.batch > 0
    }

    /// Resolves and runs one statement.
    ///
    /// Failures of the command itself come back as `Ok` with a failing
    /// [`ResultCode`]; an `Err` means the statement could not run at all and
    /// was already reported to the error sink.
    pub fn execute(
        &mut self,
        context: Option<&dyn ExecutionContext>,
        text: &str,
    ) -> Result<ResultCode, DispatchError> {
        self.depth += 1;
        let outcome = self.dispatch(context, text);
        self.depth -= 1;
        if self.depth == 0 {
            self.aliases.clear_in_flight();
        }
        outcome
    }

    fn dispatch(
        &mut self,
        context: Option<&dyn ExecutionContext>,
        text: &str,
    ) -> Result<ResultCode, DispatchError> {
        let statement = strip_statement(text, self.separator);
        if statement.is_empty() {
            return Ok(ResultCode::Success);
        }

        let (name, end) = self.split_name(statement);
        let Some(command) = self.commands.get(&name).cloned() else {
            self.report(format_args!("unknown command '{name}'"));
            return Err(DispatchError::UnknownCommand(name));
        };
        let args = CommandArgs::parse(&statement[end..]);

        if command.descriptor().requires_context && !context.is_some_and(|c| c.is_isolated()) {
            self.report(format_args!("{name} requires a valid isolated context."));
            return Err(DispatchError::ContextRequired(name));
        }

        debug!(command = %name, %args, "executing");
        self.notify(text, None);
        let result = match command.execute(self, context, &args) {
            Ok(result) => result,
            Err(error) => {
                self.notify(text, Some(ResultCode::ExecutionFailed));
                return match error.downcast::<DispatchError>() {
                    // a nested dispatch already told the user
                    Ok(nested) => Err(nested),
                    Err(error) => {
                        self.report(format_args!("{name}: {error:#}"));
                        Ok(ResultCode::ExecutionFailed)
                    }
                };
            }
        };
        self.notify(text, Some(result));

        match result {
            ResultCode::SyntaxError => {
                let synopsis = &command.descriptor().synopsis;
                if synopsis.is_empty() {
                    self.report(format_args!("{name} syntax error."));
                } else {
                    self.report(format_args!("{name} usage: "));
                    for line in synopsis {
                        self.report(format_args!("  {line}"));
                    }
                }
            }
            ResultCode::ExecutionFailed if self.is_in_batch() => {
                self.report("-- failed command: ");
                self.report(text);
            }
            _ => {}
        }
        Ok(result)
    }

    fn notify(&mut self, text: &str, result: Option<ResultCode>) {
        let event = CommandEvent { text, result };
        let listeners = if result.is_none() {
            &mut self.executing
        } else {
            self.env.set_var(LAST_COMMAND_VAR, text.trim());
            &mut self.executed
        };
        for listener in listeners.iter_mut() {
            listener(&event);
        }
    }

    /// Candidates for `word`, the word under the cursor of `partial_line`.
    ///
    /// `$name` words complete against session variables, the first word
    /// against command names, and anything else is handed to the command
    /// the line starts with.
    pub fn complete_line(
        &self,
        context: Option<&dyn ExecutionContext>,
        partial_line: &str,
        word: &str,
    ) -> Vec<String> {
        if let Some(pos) = variable_start(word) {
            let (head, variable) = word.split_at(pos);
            return self
                .env
                .complete_variable(variable)
                .map(|found| found.map(|v| format!("{head}{v}")).collect())
                .unwrap_or_default();
        }

        let line = partial_line.trim();
        let lowered = word.to_lowercase();
        if line == word {
            return self
                .names_from(&lowered)
                .take_while(|name| name.starts_with(lowered.as_str()))
                .filter(|name| !name.is_empty())
                .filter(|name| !lowered.is_empty() || self.offered_unprompted(name, context))
                .map(str::to_string)
                .collect();
        }

        let Some(command) = self.command(line) else {
            return Vec::new();
        };
        match command.complete(self, line, word) {
            Some(found) => found
                .filter(|candidate| candidate.to_lowercase().starts_with(lowered.as_str()))
                .collect(),
            None => Vec::new(),
        }
    }

    // Whether `name` is listed when completing an empty first word.
    fn offered_unprompted(&self, name: &str, context: Option<&dyn ExecutionContext>) -> bool {
        let Some(command) = self.lookup(name) else {
            return false;
        };
        let descriptor = command.descriptor();
        descriptor.completable
            && (!descriptor.requires_context || context.is_some_and(|c| c.is_isolated()))
    }

    /// Defines or redefines a user alias.
    ///
    /// Names of registered commands cannot be aliased.
    pub fn add_alias(&mut self, alias: &str, expansion: &str) -> Result<(), RegistryError> {
        if !self.aliases.contains(alias) && self.commands.contains_key(alias) {
            return Err(RegistryError::BuiltinShadow(alias.to_string()));
        }
        self.commands
            .insert(alias.to_string(), Rc::new(AliasedCommand::new(alias, expansion)));
        self.aliases.insert(alias, expansion);
        debug!(alias, expansion, "alias defined");
        Ok(())
    }

    /// Removes a user alias and returns its expansion.
    pub fn remove_alias(&mut self, alias: &str) -> Result<String, RegistryError> {
        let expansion = self
            .aliases
            .remove(alias)
            .ok_or_else(|| RegistryError::NotFound(alias.to_string()))?;
        self.commands.remove(alias);
        debug!(alias, "alias removed");
        Ok(expansion)
    }

    /// Uses `store` for [`load_aliases`](Self::load_aliases) and
    /// [`save_aliases`](Self::save_aliases).
    pub fn set_alias_store(&mut self, store: Box<dyn KeyValueStore>) {
        self.aliases.set_store(store);
    }

    fn clear_aliases(&mut self) {
        for alias in self.aliases.clear() {
            self.commands.remove(&alias);
        }
    }

    /// Replaces all aliases with the contents of the store.
    ///
    /// Existing aliases are dropped first, so a failed load leaves none.
    /// Entries that would shadow a command are reported and skipped.
    pub fn load_aliases(&mut self) -> anyhow::Result<usize> {
        self.clear_aliases();
        let Some(loaded) = self.aliases.load_entries() else {
            self.aliases.mark_clean();
            return Ok(0);
        };
        let entries = match loaded {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "can't load aliases");
                self.report(format_args!("can't load aliases: {e:#}"));
                self.aliases.mark_clean();
                return Err(e);
            }
        };
        let mut count = 0;
        for (alias, expansion) in &entries {
            match self.add_alias(alias, expansion) {
                Ok(()) => count += 1,
                Err(e) => self.report(format_args!("skipping alias: {e}")),
            }
        }
        self.aliases.mark_clean();
        debug!(count, "aliases loaded");
        Ok(count)
    }

    /// Writes the aliases to the store if they changed. Returns whether
    /// anything was written; on failure they stay in memory only.
    pub fn save_aliases(&mut self) -> anyhow::Result<bool> {
        match self.aliases.save() {
            Ok(saved) => Ok(saved),
            Err(e) => {
                warn!(error = %e, "can't save aliases");
                self.report(format_args!("can't save aliases: {e:#}"));
                Err(e)
            }
        }
    }

    /// Saves aliases and lets every registered command clean up.
    pub fn shutdown(&mut self) {
        let _ = self.save_aliases();
        for command in &self.registered {
            command.on_shutdown();
        }
    }
}

/// Drops surrounding whitespace and trailing separators.
fn strip_statement(text: &str, separator: Option<char>) -> &str {
    text.trim()
        .trim_end_matches(|c: char| c.is_whitespace() || Some(c) == separator)
}

// Bytes of `text` whose per-char lowercase spans `lowered_len` bytes.
fn folded_len(text: &str, lowered_len: usize) -> usize {
    let mut len = 0;
    for (at, c) in text.char_indices() {
        if len >= lowered_len {
            return at;
        }
        len += c.to_lowercase().map(char::len_utf8).sum::<usize>();
    }
    text.len()
}

// Start of a `$name` / `${name` reference ending `word`.
fn variable_start(word: &str) -> Option<usize> {
    let pos = word.rfind('$')?;
    let name = &word[pos + 1..];
    let name = name.strip_prefix('{').unwrap_or(name);
    name.chars()
        .all(|c| c.is_alphanumeric() || c == '_')
        .then_some(pos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandDescriptor, SessionContext};
    use crate::completion::{Candidates, set_matches};
    use crate::io_adapters::MemWriter;
    use crate::store::MemoryStore;
    use proptest::prelude::*;
    use std::cell::RefCell;

    struct Probe {
        descriptor: CommandDescriptor,
        result: ResultCode,
        calls: Rc<RefCell<Vec<String>>>,
        choices: BTreeSet<String>,
    }

    impl Probe {
        fn new(name: &str) -> Self {
            Self {
                descriptor: CommandDescriptor::new(name),
                result: ResultCode::Success,
                calls: Rc::default(),
                choices: BTreeSet::new(),
            }
        }

        fn returning(mut self, result: ResultCode) -> Self {
            self.result = result;
            self
        }

        fn with(mut self, f: impl FnOnce(CommandDescriptor) -> CommandDescriptor) -> Self {
            self.descriptor = f(self.descriptor);
            self
        }

        fn choices(mut self, choices: &[&str]) -> Self {
            self.choices = choices.iter().map(|c| c.to_string()).collect();
            self
        }
    }

    impl Command for Probe {
        fn descriptor(&self) -> &CommandDescriptor {
            &self.descriptor
        }

        fn execute(
            &self,
            _dispatcher: &mut Dispatcher,
            _context: Option<&dyn ExecutionContext>,
            args: &CommandArgs,
        ) -> anyhow::Result<ResultCode> {
            self.calls.borrow_mut().push(args.to_string());
            Ok(self.result)
        }

        fn complete<'a>(
            &'a self,
            _dispatcher: &'a Dispatcher,
            _partial_line: &str,
            last_word: &str,
        ) -> Option<Candidates<'a>> {
            Some(Box::new(set_matches(last_word, &self.choices)))
        }
    }

    struct Failing;

    impl Command for Failing {
        fn descriptor(&self) -> &CommandDescriptor {
            static DESCRIPTOR: std::sync::OnceLock<CommandDescriptor> = std::sync::OnceLock::new();
            DESCRIPTOR.get_or_init(|| CommandDescriptor::new("fail"))
        }

        fn execute(
            &self,
            _dispatcher: &mut Dispatcher,
            _context: Option<&dyn ExecutionContext>,
            _args: &CommandArgs,
        ) -> anyhow::Result<ResultCode> {
            Err(anyhow::anyhow!("disk on fire"))
        }
    }

    fn dispatcher() -> (Dispatcher, MemWriter, MemWriter) {
        let out = MemWriter::new();
        let err = MemWriter::new();
        let dispatcher = Dispatcher::new(Box::new(out.clone()), Box::new(err.clone()));
        (dispatcher, out, err)
    }

    #[test]
    fn test_alias_collision_keeps_first_registration() {
        let (mut d, _, _) = dispatcher();
        d.register(Box::new(Probe::new("quit").with(|c| c.with_alias("q"))))
            .unwrap();
        let second = d.register(Box::new(Probe::new("query").with(|c| c.with_alias("q"))));
        assert_eq!(second, Err(RegistryError::DuplicateName("q".to_string())));
        assert_eq!(d.lookup("q").map(|c| c.descriptor().name.as_str()), Some("quit"));
        // nothing of the failed registration leaked in
        assert!(!d.contains("query"));
        assert_eq!(d.commands().count(), 1);
    }

    #[test]
    fn test_register_rejected_while_running() {
        let (mut d, _, _) = dispatcher();
        d.set_running(true);
        assert_eq!(
            d.register(Box::new(Probe::new("late"))),
            Err(RegistryError::Running)
        );
    }

    #[test]
    fn test_unregister_and_rename() {
        let (mut d, _, _) = dispatcher();
        d.register(Box::new(Probe::new("exit").with(|c| c.with_alias("quit"))))
            .unwrap();
        d.register(Box::new(Probe::new("help"))).unwrap();

        assert_eq!(
            d.rename("help", "exit").unwrap_err(),
            RegistryError::DuplicateName("exit".to_string())
        );
        assert_eq!(
            d.rename("nothing", "other").unwrap_err(),
            RegistryError::NotFound("nothing".to_string())
        );
        d.rename("help", "man").unwrap();
        assert!(d.contains("man") && !d.contains("help"));

        d.unregister("quit").unwrap();
        assert!(!d.contains("exit") && !d.contains("quit"));
        assert!(matches!(
            d.unregister("exit"),
            Err(RegistryError::NotFound(name)) if name == "exit"
        ));
        let names: Vec<&str> = d.names().collect();
        assert_eq!(names, vec!["man"]);
    }

    #[test]
    fn test_resolve_longest_prefix() {
        let (mut d, _, _) = dispatcher();
        for name in ["s", "sel", "select", "set", "show"] {
            d.register(Box::new(Probe::new(name))).unwrap();
        }
        assert_eq!(d.resolve_name("select * from t"), "select");
        assert_eq!(d.resolve_name("selec x"), "sel");
        assert_eq!(d.resolve_name("SELECT 1"), "select");
        assert_eq!(d.resolve_name("sx"), "s");
        // unresolved: the raw leading word comes back
        assert_eq!(d.resolve_name("drop table t"), "drop");
        assert_eq!(d.resolve_name("drop;"), "drop");
        assert_eq!(d.resolve_name(""), "");
    }

    #[test]
    fn test_execute_passes_tokenized_args() {
        let (mut d, _, _) = dispatcher();
        let probe = Probe::new("echo");
        let calls = Rc::clone(&probe.calls);
        d.register(Box::new(probe)).unwrap();

        assert_eq!(d.execute(None, "  echo  a   b ;  "), Ok(ResultCode::Success));
        assert_eq!(d.execute(None, "echo"), Ok(ResultCode::Success));
        assert_eq!(*calls.borrow(), vec!["a b".to_string(), String::new()]);
        assert_eq!(d.env().get_var(LAST_COMMAND_VAR), Some("echo"));
    }

    #[test]
    fn test_case_folded_name_keeps_args() {
        let (mut d, _, _) = dispatcher();
        let probe = Probe::new("kill");
        let calls = Rc::clone(&probe.calls);
        d.register(Box::new(probe)).unwrap();

        // KELVIN SIGN lowers to a one-byte 'k'
        assert_eq!(d.resolve_name("\u{212A}ILL 5"), "kill");
        assert_eq!(d.execute(None, "\u{212A}ILL 5"), Ok(ResultCode::Success));
        assert_eq!(d.execute(None, "KILL 7 8"), Ok(ResultCode::Success));
        assert_eq!(*calls.borrow(), vec!["5".to_string(), "7 8".to_string()]);
    }

    #[test]
    fn test_unknown_command_reported() {
        let (mut d, _, err) = dispatcher();
        assert_eq!(
            d.execute(None, "frobnicate now"),
            Err(DispatchError::UnknownCommand("frobnicate".to_string()))
        );
        assert_eq!(err.contents(), "unknown command 'frobnicate'\n");
        assert_eq!(d.execute(None, "   ;"), Ok(ResultCode::Success));
    }

    #[test]
    fn test_requires_isolated_context() {
        let (mut d, _, err) = dispatcher();
        let probe = Probe::new("commit").with(|c| c.requiring_context());
        let calls = Rc::clone(&probe.calls);
        d.register(Box::new(probe)).unwrap();

        let shared = SessionContext::new("global", false);
        assert_eq!(
            d.execute(Some(&shared), "commit"),
            Err(DispatchError::ContextRequired("commit".to_string()))
        );
        assert_eq!(
            d.execute(None, "commit"),
            Err(DispatchError::ContextRequired("commit".to_string()))
        );
        assert!(calls.borrow().is_empty());
        assert_eq!(err.take(), "commit requires a valid isolated context.\n".repeat(2));

        let isolated = SessionContext::new("tx", true);
        assert_eq!(d.execute(Some(&isolated), "commit"), Ok(ResultCode::Success));
        assert_eq!(calls.borrow().len(), 1);
    }

    #[test]
    fn test_syntax_error_prints_synopsis() {
        let (mut d, _, err) = dispatcher();
        d.register(Box::new(
            Probe::new("set")
                .returning(ResultCode::SyntaxError)
                .with(|c| c.with_synopsis("set <varname> <value>")),
        ))
        .unwrap();
        d.register(Box::new(Probe::new("bare").returning(ResultCode::SyntaxError)))
            .unwrap();

        assert_eq!(d.execute(None, "set x"), Ok(ResultCode::SyntaxError));
        assert_eq!(err.take(), "set usage: \n  set <varname> <value>\n");
        d.execute(None, "bare").unwrap();
        assert_eq!(err.take(), "bare syntax error.\n");
    }

    #[test]
    fn test_failed_command_echoed_only_in_batch() {
        let (mut d, _, err) = dispatcher();
        d.register(Box::new(Probe::new("load").returning(ResultCode::ExecutionFailed)))
            .unwrap();

        assert_eq!(d.execute(None, "load x"), Ok(ResultCode::ExecutionFailed));
        assert!(err.take().is_empty());

        d.start_batch();
        d.start_batch();
        d.end_batch();
        assert!(d.is_in_batch());
        d.execute(None, "load x").unwrap();
        assert_eq!(err.take(), "-- failed command: \nload x\n");
        d.end_batch();
        assert!(!d.is_in_batch());
    }

    #[test]
    fn test_command_error_becomes_execution_failed() {
        let (mut d, _, err) = dispatcher();
        d.register(Box::new(Failing)).unwrap();
        let results = Rc::new(RefCell::new(Vec::new()));
        let seen = Rc::clone(&results);
        d.on_executed(move |event| seen.borrow_mut().push((event.text.to_string(), event.result)));

        assert_eq!(d.execute(None, "fail now"), Ok(ResultCode::ExecutionFailed));
        assert_eq!(err.contents(), "fail: disk on fire\n");
        assert_eq!(
            *results.borrow(),
            vec![("fail now".to_string(), Some(ResultCode::ExecutionFailed))]
        );
    }

    #[test]
    fn test_listeners_see_both_events() {
        let (mut d, _, _) = dispatcher();
        d.register(Box::new(Probe::new("ping"))).unwrap();
        let log = Rc::new(RefCell::new(Vec::new()));
        let before = Rc::clone(&log);
        let after = Rc::clone(&log);
        d.on_executing(move |e| before.borrow_mut().push(format!("before {}", e.text)));
        d.on_executed(move |e| after.borrow_mut().push(format!("after {:?}", e.result)));
        d.execute(None, "ping").unwrap();
        assert_eq!(*log.borrow(), vec!["before ping", "after Some(Success)"]);
    }

    #[test]
    fn test_alias_expands_with_arguments() {
        let (mut d, _, _) = dispatcher();
        let probe = Probe::new("select");
        let calls = Rc::clone(&probe.calls);
        d.register(Box::new(probe)).unwrap();
        d.add_alias("size", "select count(*) from").unwrap();

        assert_eq!(d.execute(None, "size students;"), Ok(ResultCode::Success));
        assert_eq!(*calls.borrow(), vec!["count(*) from students".to_string()]);
        assert_eq!(d.aliases().in_flight().count(), 0);
    }

    #[test]
    fn test_alias_cannot_shadow_command_but_can_be_redefined() {
        let (mut d, _, _) = dispatcher();
        d.register(Box::new(Probe::new("help"))).unwrap();
        assert_eq!(
            d.add_alias("help", "echo no"),
            Err(RegistryError::BuiltinShadow("help".to_string()))
        );
        d.add_alias("h", "help").unwrap();
        d.add_alias("h", "help me").unwrap();
        assert_eq!(d.aliases().get("h"), Some("help me"));

        // aliases occupy the namespace too
        assert_eq!(
            d.register(Box::new(Probe::new("h"))),
            Err(RegistryError::DuplicateName("h".to_string()))
        );
        assert_eq!(d.remove_alias("h"), Ok("help me".to_string()));
        assert!(!d.contains("h"));
        assert_eq!(
            d.remove_alias("h"),
            Err(RegistryError::NotFound("h".to_string()))
        );
        // an alias is not unregistered like a command
        d.add_alias("h", "help").unwrap();
        assert!(d.unregister("h").is_err());
    }

    #[test]
    fn test_alias_cycle_stops_and_leaves_no_state() {
        let (mut d, _, err) = dispatcher();
        d.add_alias("a", "b").unwrap();
        d.add_alias("b", "a").unwrap();

        for _ in 0..2 {
            assert_eq!(
                d.execute(None, "a x"),
                Err(DispatchError::RecursiveAlias("a".to_string()))
            );
            assert_eq!(
                err.take(),
                "Recursive call to aliases [a]. Stopping this senseless venture.\n"
            );
            assert_eq!(d.aliases().in_flight().count(), 0);
        }
    }

    #[test]
    fn test_self_alias_is_recursive() {
        let (mut d, _, _) = dispatcher();
        d.add_alias("loop", "loop again").unwrap();
        assert_eq!(
            d.execute(None, "loop"),
            Err(DispatchError::RecursiveAlias("loop".to_string()))
        );
    }

    #[test]
    fn test_load_replaces_aliases_and_save_is_dirty_only() {
        let (mut d, _, err) = dispatcher();
        d.register(Box::new(Probe::new("tables"))).unwrap();
        d.add_alias("old", "tables").unwrap();

        let store = MemoryStore::with_entries([("ls", "tables"), ("tables", "nope")]);
        d.set_alias_store(Box::new(store.clone()));
        assert_eq!(d.load_aliases().unwrap(), 1);
        assert!(!d.contains("old"));
        assert!(d.contains("ls"));
        assert_eq!(
            err.take(),
            "skipping alias: cannot alias built-in command 'tables'\n"
        );

        assert!(!d.save_aliases().unwrap());
        assert_eq!(store.save_count(), 0);
        d.add_alias("t", "tables").unwrap();
        assert!(d.save_aliases().unwrap());
        assert_eq!(store.save_count(), 1);
        assert_eq!(store.entries().get("t").map(String::as_str), Some("tables"));
    }

    struct BrokenStore;

    impl KeyValueStore for BrokenStore {
        fn load(&self) -> anyhow::Result<BTreeMap<String, String>> {
            anyhow::bail!("unreadable")
        }

        fn save(&self, _entries: &BTreeMap<String, String>, _comment: &str) -> anyhow::Result<()> {
            anyhow::bail!("read-only")
        }
    }

    #[test]
    fn test_persistence_failures_are_not_fatal() {
        let (mut d, _, err) = dispatcher();
        d.add_alias("x", "y").unwrap();
        d.set_alias_store(Box::new(BrokenStore));
        assert!(d.load_aliases().is_err());
        assert!(d.aliases().is_empty());
        assert_eq!(err.take(), "can't load aliases: unreadable\n");

        d.add_alias("x", "y").unwrap();
        assert!(d.save_aliases().is_err());
        assert_eq!(d.aliases().get("x"), Some("y"));
        assert!(d.aliases().is_dirty());
    }

    #[test]
    fn test_complete_first_word() {
        let (mut d, _, _) = dispatcher();
        d.register(Box::new(Probe::new("help").with(|c| c.with_alias("?"))))
            .unwrap();
        d.register(Box::new(Probe::new("hidden").with(|c| c.hidden_from_completion())))
            .unwrap();
        d.register(Box::new(Probe::new("commit").with(|c| c.requiring_context())))
            .unwrap();
        d.add_alias("hh", "help").unwrap();

        assert_eq!(d.complete_line(None, "he", "he"), vec!["help"]);
        assert_eq!(d.complete_line(None, "H", "H"), vec!["help", "hh", "hidden"]);
        // empty word: hidden and context-bound commands are left out
        assert_eq!(d.complete_line(None, "", ""), vec!["?", "help", "hh"]);
        let tx = SessionContext::new("tx", true);
        assert_eq!(
            d.complete_line(Some(&tx), "", ""),
            vec!["?", "commit", "help", "hh"]
        );
    }

    #[test]
    fn test_complete_arguments_and_variables() {
        let (mut d, _, _) = dispatcher();
        d.register(Box::new(Probe::new("use").choices(&["Alpha", "alpine", "beta"])))
            .unwrap();
        d.env_mut().set_var("HOME", "/root");
        d.env_mut().set_var("HOST", "box");

        assert_eq!(d.complete_line(None, "use al", "al"), vec!["alpine"]);
        assert_eq!(d.complete_line(None, "use ", ""), vec!["Alpha", "alpine", "beta"]);
        assert_eq!(
            d.complete_line(None, "echo x$HO", "x$HO"),
            vec!["x$HOME", "x$HOST"]
        );
        assert_eq!(d.complete_line(None, "echo ${HOM", "${HOM"), vec!["${HOME}"]);
        assert!(d.complete_line(None, "nothing here", "here").is_empty());
    }

    proptest! {
        #[test]
        fn resolve_name_is_longest_prefix_or_leading_word(
            names in prop::collection::btree_set("[a-c]{1,3}", 1..6),
            token in "[a-c]{0,4}",
            rest in "( [a-c]{1,2})?",
        ) {
            let (mut d, _, _) = dispatcher();
            for name in &names {
                d.register(Box::new(Probe::new(name))).unwrap();
            }
            let input = format!("{token}{rest}");
            let trimmed = input.trim_start();
            let resolved = d.resolve_name(&input);
            let expected = names
                .iter()
                .filter(|n| trimmed.starts_with(n.as_str()))
                .max_by_key(|n| n.len());
            match expected {
                Some(name) => prop_assert_eq!(&resolved, name),
                None => {
                    prop_assert_eq!(resolved.as_str(), trimmed.split(' ').next().unwrap_or(""));
                    prop_assert!(!names.contains(&resolved));
                }
            }
        }

        #[test]
        fn first_word_completion_is_repeatable(
            names in prop::collection::btree_set("[a-d]{1,4}", 0..8),
            word in "[a-d]{0,2}",
        ) {
            let (mut d, _, _) = dispatcher();
            for name in &names {
                d.register(Box::new(Probe::new(name))).unwrap();
            }
            let first = d.complete_line(None, &word, &word);
            let second = d.complete_line(None, &word, &word);
            prop_assert!(first.iter().all(|c| c.starts_with(word.as_str())));
            prop_assert_eq!(first, second);
        }
    }
}
