//! Commands loaded by identifier at startup.

use crate::command::{Command, CommandFactory};
use crate::dispatcher::Dispatcher;
use crate::error::PluginError;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Named command factories and the plugins currently loaded from them.
#[derive(Default)]
pub struct PluginRegistry {
    factories: BTreeMap<String, Box<dyn CommandFactory>>,
    // plugin id -> command name it registered
    loaded: BTreeMap<String, String>,
}

impl PluginRegistry {
    /// A registry without factories.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `factory` available as plugin `id`. A factory registered
    /// earlier under the same id is replaced.
    pub fn register_factory(
        &mut self,
        id: impl Into<String>,
        factory: impl CommandFactory + 'static,
    ) {
        self.factories.insert(id.into(), Box::new(factory));
    }

    /// Whether a factory is registered under `id`.
    pub fn has_factory(&self, id: &str) -> bool {
        self.factories.contains_key(id)
    }

    /// Identifiers of every registered factory, sorted.
    pub fn factories(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Creates the plugin command and registers it with `dispatcher`.
    ///
    /// Returns the name the command was registered under.
    pub fn load(&mut self, dispatcher: &mut Dispatcher, id: &str) -> Result<String, PluginError> {
        if self.loaded.contains_key(id) {
            return Err(PluginError::AlreadyLoaded(id.to_string()));
        }
        let factory = self
            .factories
            .get(id)
            .ok_or_else(|| PluginError::UnknownFactory(id.to_string()))?;
        let command: Box<dyn Command> = factory.create();
        let name = command.descriptor().name.clone();
        dispatcher.register(command)?;
        info!(plugin = id, command = %name, "plugin loaded");
        self.loaded.insert(id.to_string(), name.clone());
        Ok(name)
    }

    /// Removes the command a plugin registered.
    pub fn unload(&mut self, dispatcher: &mut Dispatcher, id: &str) -> Result<(), PluginError> {
        let name = self
            .loaded
            .remove(id)
            .ok_or_else(|| PluginError::NotLoaded(id.to_string()))?;
        let command = dispatcher.unregister(&name)?;
        command.on_shutdown();
        debug!(plugin = id, command = %name, "plugin unloaded");
        Ok(())
    }

    /// Loaded plugin ids with the command each one registered.
    pub fn loaded(&self) -> impl Iterator<Item = (&str, &str)> {
        self.loaded.iter().map(|(id, name)| (id.as_str(), name.as_str()))
    }
}
