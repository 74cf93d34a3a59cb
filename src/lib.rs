//! Building blocks for interactive, line-oriented command shells.
//!
//! A [`Dispatcher`] holds the command table, resolves the command a statement
//! starts with (longest registered prefix) and runs it with well-defined
//! failure reporting. User aliases live in the same namespace and are
//! expanded with cycle detection. A [`StatementSeparator`] decides,
//! character by character, where one statement ends, so statements can span
//! lines or share one. Tab completion for command names, aliases and
//! variables is built on sorted prefix ranges ([`SortedMatches`]).
//!
//! [`Shell`] ties these together with a `rustyline` editor, batch input and
//! Ctrl-C handling. The [`builtin`] module provides `help`, `echo`, `exit`,
//! alias and variable management.

pub mod alias;
pub mod builtin;
pub mod command;
pub mod completion;
pub mod dispatcher;
pub mod editor;
pub mod env;
pub mod error;
pub mod interrupt;
mod io_adapters;
pub mod name_completer;
pub mod plugins;
mod range;
pub mod separator;
pub mod shell;
pub mod store;

pub use command::{
    Command, CommandArgs, CommandDescriptor, CommandFactory, ExecutionContext, ExitCode,
    ResultCode, SessionContext,
};
pub use completion::{Alternatives, Candidates, SortedMatches};
pub use dispatcher::{CommandEvent, Dispatcher};
pub use env::Environment;
pub use error::{DispatchError, PluginError, RegistryError, StatementError};
pub use interrupt::{InterruptFlag, InterruptRegistry, Interruptible, Interruption};
/// In-memory output sink, handy for tests and embedding.
pub use io_adapters::MemWriter;
pub use name_completer::NameCompleter;
pub use plugins::PluginRegistry;
pub use range::RangeView;
pub use separator::{DelimiterRules, StatementRules, StatementSeparator};
pub use shell::{LineResult, Shell, ShellConfig};
pub use store::{FileStore, KeyValueStore, MemoryStore};
