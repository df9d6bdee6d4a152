//! Format-module contract and registry.
//!
//! A module contributes CLI flags (namespaced with its own name), captures
//! parsed options and hook subscriptions in `setup`, and yields the chunks
//! it wants in the output. Placement and patching are the engine's business;
//! a module only ever touches its own buffers.

use std::rc::Rc;

use clap::{ArgMatches, Command};

use crate::chunk::Chunk;
use crate::error::{Error, Result};
use crate::hooks::HookBus;

/// A format producer.
pub trait Module {
    /// Registry name, also the namespace prefix for the module's CLI flags
    fn name(&self) -> &'static str;

    /// Add module-specific options to the CLI. Called once while arguments
    /// are parsed.
    fn params(&self, cmd: Command) -> Command;

    /// Capture parsed options and register hook subscribers.
    fn setup(&mut self, args: &ArgMatches, hooks: &Rc<HookBus>) -> Result<()>;

    /// All chunks this module contributes, in the order it wants them
    /// considered.
    fn chunks(&mut self) -> Result<Vec<Chunk>>;
}

impl std::fmt::Debug for dyn Module + '_ {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Module").field(&self.name()).finish()
    }
}

/// Registered modules, in registration order.
#[derive(Default)]
pub struct ModuleRegistry {
    modules: Vec<Box<dyn Module>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, module: Box<dyn Module>) {
        self.modules.push(module);
    }

    /// Names of every registered module, registration order
    pub fn names(&self) -> Vec<&'static str> {
        self.modules.iter().map(|module| module.name()).collect()
    }

    pub fn get(&self, name: &str) -> Result<&dyn Module> {
        self.modules
            .iter()
            .find(|module| module.name() == name)
            .map(|module| &**module)
            .ok_or_else(|| Error::config(format!("unknown module '{name}'")))
    }

    pub fn get_mut(&mut self, name: &str) -> Result<&mut dyn Module> {
        for module in self.modules.iter_mut() {
            if module.name() == name {
                return Ok(&mut **module);
            }
        }
        Err(Error::config(format!("unknown module '{name}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dummy(&'static str);

    impl Module for Dummy {
        fn name(&self) -> &'static str {
            self.0
        }

        fn params(&self, cmd: Command) -> Command {
            cmd
        }

        fn setup(&mut self, _args: &ArgMatches, _hooks: &Rc<HookBus>) -> Result<()> {
            Ok(())
        }

        fn chunks(&mut self) -> Result<Vec<Chunk>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn lookup_preserves_registration_order() {
        let mut registry = ModuleRegistry::new();
        registry.register(Box::new(Dummy("zip")));
        registry.register(Box::new(Dummy("png")));
        assert_eq!(registry.names(), vec!["zip", "png"]);
        assert!(registry.get("png").is_ok());
    }

    #[test]
    fn unknown_module_is_a_config_error() {
        let registry = ModuleRegistry::new();
        let err = registry.get("mp3").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("mp3"));
    }
}
