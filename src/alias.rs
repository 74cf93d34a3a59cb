//! User-defined aliases layered on the dispatcher's command namespace.
//!
//! Each alias is registered in the dispatcher as an [`AliasedCommand`] under
//! its own name. Running it re-dispatches the expansion followed by the
//! arguments given to the alias. Aliases currently being expanded are
//! tracked so that a cycle is stopped on its second visit.

use crate::command::{Command, CommandArgs, CommandDescriptor, ExecutionContext, ResultCode};
use crate::completion::{Candidates, completed_words};
use crate::dispatcher::Dispatcher;
use crate::error::DispatchError;
use crate::name_completer::NameCompleter;
use crate::store::KeyValueStore;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// Which alias management command asks for completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AliasCompletion {
    /// `alias <name> <expansion>`: only the alias name is completed.
    Define,
    /// `unalias <name>...`: aliases already on the line are skipped.
    Remove,
}

/// Alias table with its persistence state.
#[derive(Default)]
pub struct Aliases {
    table: BTreeMap<String, String>,
    names: NameCompleter,
    in_flight: BTreeSet<String>,
    dirty: bool,
    store: Option<Box<dyn KeyValueStore>>,
}

impl Aliases {
    /// An empty alias table without persistence.
    pub fn new() -> Self {
        Self::default()
    }

    /// Expansion of `alias`.
    pub fn get(&self, alias: &str) -> Option<&str> {
        self.table.get(alias).map(String::as_str)
    }

    /// Whether `alias` is defined.
    pub fn contains(&self, alias: &str) -> bool {
        self.table.contains_key(alias)
    }

    /// Aliases in name order with their expansions.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.table.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of defined aliases.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Whether no alias is defined.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Whether `alias` expands to a statement starting with `command`.
    pub fn is_alias_of(&self, alias: &str, command: &str) -> bool {
        self.get(alias) == Some(command)
    }

    /// Aliases expanding to exactly `command`.
    pub fn aliases_of<'a>(&'a self, command: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.iter()
            .filter(move |(_, expansion)| *expansion == command)
            .map(|(alias, _)| alias)
    }

    /// Whether the table changed since it was last loaded or saved.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Whether aliases are loaded from and saved to a store.
    pub fn has_store(&self) -> bool {
        self.store.is_some()
    }

    pub(crate) fn set_store(&mut self, store: Box<dyn KeyValueStore>) {
        self.store = Some(store);
    }

    pub(crate) fn insert(&mut self, alias: &str, expansion: &str) {
        if self.table.insert(alias.to_string(), expansion.to_string()).is_none() {
            let _ = self.names.add_name(alias);
        }
        self.dirty = true;
    }

    pub(crate) fn remove(&mut self, alias: &str) -> Option<String> {
        let expansion = self.table.remove(alias)?;
        self.names.remove_name(alias);
        self.dirty = true;
        Some(expansion)
    }

    /// Empties the table and returns the names that were defined.
    pub(crate) fn clear(&mut self) -> Vec<String> {
        let names = std::mem::take(&mut self.table).into_keys().collect();
        self.names.clear();
        self.dirty = true;
        names
    }

    pub(crate) fn load_entries(&self) -> Option<anyhow::Result<BTreeMap<String, String>>> {
        self.store.as_ref().map(|store| store.load())
    }

    /// Writes the table if it has a store and unsaved changes.
    pub(crate) fn save(&mut self) -> anyhow::Result<bool> {
        let Some(store) = self.store.as_ref() else {
            return Ok(false);
        };
        if !self.dirty {
            return Ok(false);
        }
        store.save(&self.table, "Aliases")?;
        self.dirty = false;
        Ok(true)
    }

    pub(crate) fn mark_clean(&mut self) {
        self.dirty = false;
    }

    /// Marks `alias` as being expanded; false when it already is.
    pub(crate) fn enter(&mut self, alias: &str) -> bool {
        self.in_flight.insert(alias.to_string())
    }

    pub(crate) fn leave(&mut self, alias: &str) {
        self.in_flight.remove(alias);
    }

    pub(crate) fn clear_in_flight(&mut self) {
        self.in_flight.clear();
    }

    /// Aliases currently being expanded, sorted by name.
    pub fn in_flight(&self) -> impl Iterator<Item = &str> {
        self.in_flight.iter().map(String::as_str)
    }

    /// Alias-name candidates for the arguments of `alias` and `unalias`.
    pub fn complete<'a>(
        &'a self,
        mode: AliasCompletion,
        partial_line: &str,
        last_word: &str,
    ) -> Option<Candidates<'a>> {
        let words = completed_words(partial_line, last_word);
        let matches = self.names.get_alternatives(last_word)?;
        match mode {
            AliasCompletion::Define => {
                if words.len() > 1 {
                    return None;
                }
                Some(Box::new(matches))
            }
            AliasCompletion::Remove => {
                let given: Vec<String> = words.iter().skip(1).map(|w| w.to_string()).collect();
                Some(Box::new(
                    matches.excluding(move |alias| given.iter().any(|g| g == alias)),
                ))
            }
        }
    }
}

/// Synthetic command standing for one alias.
pub struct AliasedCommand {
    descriptor: CommandDescriptor,
}

impl AliasedCommand {
    /// Command running `expansion` whenever `alias` is invoked.
    pub fn new(alias: &str, expansion: &str) -> Self {
        let descriptor = CommandDescriptor::new(alias)
            .in_group("aliases")
            .describe(format!("alias for '{expansion}'"))
            .with_long_description(format!("This is an alias for the command\n   {expansion}"));
        Self { descriptor }
    }

    fn name(&self) -> &str {
        &self.descriptor.name
    }
}

impl Command for AliasedCommand {
    fn descriptor(&self) -> &CommandDescriptor {
        &self.descriptor
    }

    fn execute(
        &self,
        dispatcher: &mut Dispatcher,
        context: Option<&dyn ExecutionContext>,
        args: &CommandArgs,
    ) -> anyhow::Result<ResultCode> {
        let name = self.name();
        let Some(expansion) = dispatcher.aliases().get(name).map(str::to_string) else {
            return Ok(ResultCode::ExecutionFailed);
        };

        if !dispatcher.aliases_mut().enter(name) {
            warn!(alias = name, "recursive alias expansion stopped");
            dispatcher.report(format_args!(
                "Recursive call to aliases [{name}]. Stopping this senseless venture."
            ));
            dispatcher.aliases_mut().clear_in_flight();
            return Err(DispatchError::RecursiveAlias(name.to_string()).into());
        }

        let text = format!("{expansion} {args}");
        debug!(alias = name, %text, "expanding alias");
        let outcome = dispatcher.execute(context, &text);
        dispatcher.aliases_mut().leave(name);
        outcome?;
        Ok(ResultCode::Success)
    }

    /// Completes as the command the alias expands to would.
    fn complete<'a>(
        &'a self,
        dispatcher: &'a Dispatcher,
        partial_line: &str,
        last_word: &str,
    ) -> Option<Candidates<'a>> {
        let expansion = dispatcher.aliases().get(self.name())?;
        let target = dispatcher.command(expansion)?;
        // alias chains are not followed
        if dispatcher.aliases().contains(&target.descriptor().name) {
            return None;
        }
        let trimmed = partial_line.trim_start();
        let rest = trimmed
            .find(char::is_whitespace)
            .map_or("", |at| &trimmed[at..]);
        target.complete(dispatcher, &format!("{expansion}{rest}"), last_word)
    }
}
