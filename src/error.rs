//! Error types shared by the registry, the dispatcher and the statement machine.
//!
//! Command bodies report failures through `anyhow`; everything the core itself
//! rejects is one of the typed errors below so callers can match on it.

use thiserror::Error;

/// Rejections from the command table (registration, renaming, aliases).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The name, or one of the static aliases, is already in the table.
    #[error("attempt to register command '{0}', that is already used")]
    DuplicateName(String),
    /// The named command or alias is not in the table.
    #[error("no command or alias named '{0}'")]
    NotFound(String),
    /// The table is frozen while the shell is running.
    #[error("commands cannot be registered while the shell is running")]
    Running,
    /// An alias would shadow a built-in command.
    #[error("cannot alias built-in command '{0}'")]
    BuiltinShadow(String),
}

/// Outcomes of [`Dispatcher::execute`](crate::Dispatcher::execute) that
/// prevented (or aborted) a command run.
///
/// By the time one of these is returned the user has already been told about
/// it through the error sink.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("unknown command '{0}'")]
    UnknownCommand(String),
    #[error("{0} requires a valid isolated context")]
    ContextRequired(String),
    #[error("recursive call to alias [{0}]")]
    RecursiveAlias(String),
}

/// Misuse of the statement boundary machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StatementError {
    #[error("call cont() or consumed() before move_next()")]
    PendingStatement,
    #[error("no saved parse state to restore")]
    EmptyStack,
}

/// Failures while loading or unloading plugin commands.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PluginError {
    #[error("no plugin factory registered as '{0}'")]
    UnknownFactory(String),
    #[error("plugin '{0}' is already loaded")]
    AlreadyLoaded(String),
    #[error("plugin '{0}' is not loaded")]
    NotLoaded(String),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}
