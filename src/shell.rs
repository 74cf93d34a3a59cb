use crate::command::{ExecutionContext, ExitCode};
use crate::dispatcher::Dispatcher;
use crate::editor::ShellHelper;
use crate::interrupt::InterruptRegistry;
use crate::separator::{DelimiterRules, StatementRules, StatementSeparator};
use crate::store::FileStore;
use rustyline::Editor;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use std::cell::RefCell;
use std::io::BufRead;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Startup settings of a [`Shell`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellConfig {
    pub prompt: String,
    /// Shown while a statement spans several lines.
    pub continuation_prompt: String,
    /// Statement separator; a newline always ends a statement too.
    pub separator: Option<char>,
    /// Where aliases are loaded from at startup and saved to on shutdown.
    pub aliases_file: Option<PathBuf>,
    pub history_file: Option<PathBuf>,
    /// Print every statement before running it.
    pub echo_commands: bool,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            prompt: "> ".to_string(),
            continuation_prompt: "-> ".to_string(),
            separator: Some(';'),
            aliases_file: None,
            history_file: None,
            echo_commands: false,
        }
    }
}

/// What one input line amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineResult {
    /// At least one statement ran.
    Executed,
    /// Nothing ran and no statement is pending.
    Empty,
    /// A statement was started and needs more lines.
    Incomplete,
}

/// A line-oriented shell around a [`Dispatcher`].
///
/// Example
/// ```
/// use shell_dispatch::{Dispatcher, LineResult, MemWriter, Shell, ShellConfig};
/// use shell_dispatch::builtin::default_commands;
///
/// let out = MemWriter::new();
/// let mut dispatcher = Dispatcher::new(Box::new(out.clone()), Box::new(MemWriter::new()));
/// for command in default_commands() {
///     dispatcher.register(command).unwrap();
/// }
/// let mut shell = Shell::new(ShellConfig::default(), dispatcher);
/// assert_eq!(shell.execute_line("echo 'one;two'; echo three").unwrap(), LineResult::Executed);
/// assert_eq!(out.contents(), "one;two\nthree\n");
/// ```
pub struct Shell {
    config: ShellConfig,
    dispatcher: Rc<RefCell<Dispatcher>>,
    separator: StatementSeparator<Box<dyn StatementRules>>,
    context: Option<Rc<dyn ExecutionContext>>,
    interrupts: InterruptRegistry,
    started: bool,
    shut_down: bool,
}

impl Shell {
    /// Shell over `dispatcher`, configured by `config`.
    pub fn new(config: ShellConfig, mut dispatcher: Dispatcher) -> Self {
        dispatcher.set_separator(config.separator);
        if let Some(path) = &config.aliases_file {
            dispatcher.set_alias_store(Box::new(FileStore::new(path)));
        }
        let rules: Box<dyn StatementRules> = Box::new(DelimiterRules::new(config.separator));
        Self {
            config,
            dispatcher: Rc::new(RefCell::new(dispatcher)),
            separator: StatementSeparator::new(rules),
            context: None,
            interrupts: InterruptRegistry::new(),
            started: false,
            shut_down: false,
        }
    }

    /// Replaces the statement boundary rules.
    pub fn with_rules(mut self, rules: impl StatementRules + 'static) -> Self {
        self.separator = StatementSeparator::new(Box::new(rules));
        self
    }

    /// Context handed to every command.
    pub fn with_context(mut self, context: Rc<dyn ExecutionContext>) -> Self {
        self.context = Some(context);
        self
    }

    /// Settings the shell was created with.
    pub fn config(&self) -> &ShellConfig {
        &self.config
    }

    /// Dispatcher shared with the line editor.
    pub fn dispatcher(&self) -> &Rc<RefCell<Dispatcher>> {
        &self.dispatcher
    }

    /// Registry receiving Ctrl-C while a statement runs.
    pub fn interrupts(&self) -> &InterruptRegistry {
        &self.interrupts
    }

    /// Whether a statement is waiting for more lines.
    pub fn in_statement(&self) -> bool {
        self.separator.in_statement()
    }

    /// Loads aliases and freezes the command table.
    pub fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        let mut dispatcher = self.dispatcher.borrow_mut();
        if dispatcher.aliases().has_store() {
            // failures were reported, the session goes on without aliases
            let _ = dispatcher.load_aliases();
        }
        dispatcher.set_running(true);
        info!(commands = dispatcher.names().count(), "shell started");
    }

    /// Feeds one line of input and runs every statement it completes.
    pub fn execute_line(&mut self, line: &str) -> anyhow::Result<LineResult> {
        self.separator.append(line);
        self.separator.append("\n");

        let mut result = LineResult::Incomplete;
        while self.separator.move_next()? {
            let Some(current) = self.separator.current() else {
                break;
            };
            let statement = self.dispatcher.borrow().env().substitute(current)?;
            let complete = self
                .dispatcher
                .borrow()
                .command(&statement)
                .map(|command| command.is_complete(&statement));
            match complete {
                None => {
                    self.separator.consumed();
                    self.report_unknown(&statement);
                    // a trailing newline after `stmt;` must not hide the run
                    if result != LineResult::Executed {
                        result = LineResult::Empty;
                    }
                }
                Some(false) => {
                    self.separator.cont();
                    result = LineResult::Incomplete;
                }
                Some(true) => {
                    self.execute_statement(statement.trim());
                    self.separator.consumed();
                    result = LineResult::Executed;
                }
            }
        }
        Ok(result)
    }

    fn report_unknown(&self, statement: &str) {
        let separator = self.config.separator;
        let text = statement
            .trim()
            .trim_matches(|c: char| c.is_whitespace() || Some(c) == separator);
        if text.is_empty() {
            return;
        }
        let mut dispatcher = self.dispatcher.borrow_mut();
        let name = dispatcher.resolve_name(text);
        dispatcher.report(format_args!("unknown command '{name}'"));
    }

    fn execute_statement(&mut self, text: &str) {
        let mut dispatcher = self.dispatcher.borrow_mut();
        let flag = dispatcher.env().interrupt_flag().clone();
        flag.clear();
        self.interrupts.push(Arc::new(flag));
        if self.config.echo_commands {
            dispatcher.print(text);
        }
        if let Err(e) = dispatcher.execute(self.context.as_deref(), text) {
            debug!(error = %e, "statement not executed");
        }
        self.interrupts.pop();
    }

    fn should_exit(&self) -> bool {
        self.dispatcher.borrow().env().should_exit
    }

    fn exit_code(&self) -> ExitCode {
        self.dispatcher.borrow().env().exit_code
    }

    /// Interactive session on the terminal.
    ///
    /// Ends on Ctrl-D, on Ctrl-C at an empty prompt, or when a command asks
    /// to exit. Returns the exit code requested by `exit`.
    pub fn run(&mut self) -> anyhow::Result<ExitCode> {
        let mut editor: Editor<ShellHelper, DefaultHistory> = Editor::new()?;
        editor.set_helper(Some(ShellHelper::new(
            Rc::clone(&self.dispatcher),
            self.context.clone(),
        )));
        if let Some(path) = &self.config.history_file {
            if let Err(e) = editor.load_history(path) {
                debug!(path = %path.display(), error = %e, "no history loaded");
            }
        }
        self.start();

        let separator = self.config.separator.map(String::from);
        let mut history_line = String::new();
        while !self.should_exit() {
            let prompt = if self.in_statement() {
                &self.config.continuation_prompt
            } else {
                &self.config.prompt
            };
            match editor.readline(prompt) {
                Ok(line) => {
                    // a lone separator closing a statement stays on its line
                    if !history_line.is_empty() && Some(line.trim()) != separator.as_deref() {
                        history_line.push('\n');
                    }
                    history_line.push_str(&line);

                    let result = match self.execute_line(&line) {
                        Ok(result) => result,
                        Err(e) => {
                            warn!(error = %e, "can't process line");
                            self.separator.discard();
                            LineResult::Empty
                        }
                    };
                    if result != LineResult::Incomplete {
                        if !history_line.trim().is_empty() {
                            editor.add_history_entry(history_line.as_str())?;
                        }
                        history_line.clear();
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    if history_line.trim().is_empty() {
                        break;
                    }
                    debug!("pending statement discarded");
                    self.separator.discard();
                    history_line.clear();
                }
                Err(ReadlineError::Eof) => break,
                Err(e) => return Err(e.into()),
            }
        }

        self.shutdown();
        if let Some(path) = &self.config.history_file {
            if let Err(e) = editor.save_history(path) {
                warn!(path = %path.display(), error = %e, "can't save history");
            }
        }
        Ok(self.exit_code())
    }

    /// Runs every line of `reader` in batch mode.
    ///
    /// Stops early when a command asks to exit. Returns the exit code
    /// requested by `exit`.
    pub fn run_batch(&mut self, reader: impl BufRead) -> anyhow::Result<ExitCode> {
        self.start();
        self.dispatcher.borrow_mut().start_batch();
        let outcome = self.feed_lines(reader);
        self.dispatcher.borrow_mut().end_batch();
        outcome?;
        if self.in_statement() {
            warn!("input ended inside a statement");
        }
        Ok(self.exit_code())
    }

    fn feed_lines(&mut self, reader: impl BufRead) -> anyhow::Result<()> {
        for line in reader.lines() {
            let line = line?;
            self.execute_line(&line)?;
            if self.should_exit() {
                info!("exit requested by batch input");
                break;
            }
        }
        Ok(())
    }

    /// Saves aliases and releases commands; later calls do nothing.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        self.interrupts.shutdown();
        let mut dispatcher = self.dispatcher.borrow_mut();
        dispatcher.shutdown();
        dispatcher.set_running(false);
        info!("shell shut down");
    }
}

impl Drop for Shell {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::default_commands;
    use crate::command::{Command, CommandArgs, CommandDescriptor, ResultCode};
    use crate::io_adapters::MemWriter;
    use crate::store::KeyValueStore;
    use std::io::Cursor;

    /// Runs until a line ends with `go`.
    struct Block {
        descriptor: CommandDescriptor,
    }

    impl Command for Block {
        fn descriptor(&self) -> &CommandDescriptor {
            &self.descriptor
        }

        fn execute(
            &self,
            dispatcher: &mut Dispatcher,
            _context: Option<&dyn ExecutionContext>,
            args: &CommandArgs,
        ) -> anyhow::Result<ResultCode> {
            dispatcher.print(format_args!("block[{args}]"));
            Ok(ResultCode::Success)
        }

        fn is_complete(&self, text: &str) -> bool {
            text.trim_end().ends_with("go")
        }
    }

    /// Complete only once the statement ends with `;`.
    struct Query {
        descriptor: CommandDescriptor,
    }

    impl Command for Query {
        fn descriptor(&self) -> &CommandDescriptor {
            &self.descriptor
        }

        fn execute(
            &self,
            dispatcher: &mut Dispatcher,
            _context: Option<&dyn ExecutionContext>,
            args: &CommandArgs,
        ) -> anyhow::Result<ResultCode> {
            dispatcher.print(format_args!("select {args}"));
            Ok(ResultCode::Success)
        }

        fn is_complete(&self, text: &str) -> bool {
            text.trim_end().ends_with(';')
        }
    }

    fn shell_with(config: ShellConfig) -> (Shell, MemWriter, MemWriter) {
        let out = MemWriter::new();
        let err = MemWriter::new();
        let mut dispatcher = Dispatcher::new(Box::new(out.clone()), Box::new(err.clone()));
        for command in default_commands() {
            dispatcher.register(command).unwrap();
        }
        dispatcher
            .register(Box::new(Block {
                descriptor: CommandDescriptor::new("begin"),
            }))
            .unwrap();
        dispatcher
            .register(Box::new(Query {
                descriptor: CommandDescriptor::new("select"),
            }))
            .unwrap();
        (Shell::new(config, dispatcher), out, err)
    }

    fn shell() -> (Shell, MemWriter, MemWriter) {
        shell_with(ShellConfig::default())
    }

    #[test]
    fn test_line_results() {
        let (mut sh, out, err) = shell();
        assert_eq!(sh.execute_line("echo a; echo b;").unwrap(), LineResult::Executed);
        assert_eq!(out.take(), "a\nb\n");
        assert_eq!(sh.execute_line("").unwrap(), LineResult::Empty);
        assert_eq!(sh.execute_line("   ").unwrap(), LineResult::Empty);
        assert!(err.is_empty());
    }

    #[test]
    fn test_unknown_statement_is_reported_and_empty() {
        let (mut sh, _, err) = shell();
        assert_eq!(sh.execute_line("frobnicate").unwrap(), LineResult::Empty);
        assert_eq!(err.take(), "unknown command 'frobnicate'\n");
        assert_eq!(sh.execute_line("echo x; nope").unwrap(), LineResult::Executed);
        assert_eq!(err.take(), "unknown command 'nope'\n");
    }

    #[test]
    fn test_quoted_text_spans_lines() {
        let (mut sh, out, _) = shell();
        assert_eq!(sh.execute_line("echo 'a;").unwrap(), LineResult::Incomplete);
        assert!(out.is_empty());
        assert_eq!(sh.execute_line("b'").unwrap(), LineResult::Executed);
        assert_eq!(out.take(), "a;\nb\n");
    }

    #[test]
    fn test_command_decides_completeness() {
        let (mut sh, out, _) = shell();
        assert_eq!(sh.execute_line("begin one").unwrap(), LineResult::Incomplete);
        assert!(sh.in_statement());
        assert_eq!(sh.execute_line("two go").unwrap(), LineResult::Executed);
        assert_eq!(out.take(), "block[one\ntwo go]\n");
        assert!(!sh.in_statement());
    }

    #[test]
    fn test_statement_waits_for_separator() {
        let (mut sh, out, err) = shell();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&seen);
        sh.dispatcher()
            .borrow_mut()
            .on_executing(move |event| log.borrow_mut().push(event.text.to_string()));

        assert_eq!(sh.execute_line("select * from t").unwrap(), LineResult::Incomplete);
        assert!(out.is_empty());
        assert_eq!(sh.execute_line(";").unwrap(), LineResult::Executed);
        assert_eq!(out.take(), "select * from t\n");
        assert_eq!(*seen.borrow(), vec!["select * from t\n;".to_string()]);
        assert!(!sh.in_statement());

        assert_eq!(sh.execute_line("select 1; echo x").unwrap(), LineResult::Executed);
        assert_eq!(out.take(), "select 1\nx\n");
        assert!(err.is_empty());
    }

    #[test]
    fn test_variables_are_substituted() {
        let (mut sh, out, _) = shell();
        sh.execute_line("set who world").unwrap();
        out.take();
        sh.execute_line("echo hello $who ${who} $$who $missing").unwrap();
        assert_eq!(out.take(), "hello world world $who $missing\n");
    }

    #[test]
    fn test_echo_commands() {
        let (mut sh, out, _) = shell_with(ShellConfig {
            echo_commands: true,
            ..ShellConfig::default()
        });
        sh.execute_line("echo hi;").unwrap();
        assert_eq!(out.take(), "echo hi;\nhi\n");
    }

    #[test]
    fn test_newline_only_separator() {
        let (mut sh, out, _) = shell_with(ShellConfig {
            separator: None,
            ..ShellConfig::default()
        });
        sh.execute_line("echo a; echo b").unwrap();
        assert_eq!(out.take(), "a; echo b\n");
    }

    #[test]
    fn test_batch_stops_on_exit_and_echoes_failures() {
        let (mut sh, out, err) = shell();
        let input = "echo one\nunset nothing\nexit 4\necho never\n";
        assert_eq!(sh.run_batch(Cursor::new(input)).unwrap(), 4);
        assert_eq!(out.take(), "one\n");
        assert_eq!(
            err.take(),
            "unknown variable nothing\n-- failed command: \nunset nothing\n"
        );
        assert!(!sh.dispatcher().borrow().is_in_batch());
    }

    #[test]
    fn test_registration_frozen_while_running() {
        let (mut sh, _, _) = shell();
        sh.start();
        let rejected = sh.dispatcher().borrow_mut().register(Box::new(Block {
            descriptor: CommandDescriptor::new("late"),
        }));
        assert!(rejected.is_err());
        sh.shutdown();
        assert!(!sh.dispatcher().borrow().is_running());
    }

    #[test]
    fn test_aliases_persist_across_sessions() {
        let path = std::env::temp_dir()
            .join(format!("shell_dispatch_{}_shell_aliases", std::process::id()));
        let config = ShellConfig {
            aliases_file: Some(path.clone()),
            ..ShellConfig::default()
        };

        let (mut first, _, _) = shell_with(config.clone());
        first.start();
        first.execute_line("alias hi echo hello").unwrap();
        first.shutdown();
        let saved = FileStore::new(&path).load().unwrap();
        assert_eq!(saved.get("hi").map(String::as_str), Some("echo hello"));

        let (mut second, out, _) = shell_with(config);
        second.start();
        second.execute_line("hi there").unwrap();
        assert_eq!(out.take(), "hello there\n");

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_interrupt_reaches_running_statement() {
        let (sh, _, _) = shell();
        let flag = sh.dispatcher().borrow().env().interrupt_flag().clone();
        sh.interrupts().push(Arc::new(flag.clone()));
        sh.interrupts().interrupt();
        assert!(sh.dispatcher().borrow().env().interrupted());
        sh.interrupts().pop();
    }
}
