//! Format modules.
//!
//! Each module knows one container format: it parses its input, yields the
//! chunks the format needs in the output, and patches cross-references from
//! hook callbacks once final positions are known.

pub mod ext2;
pub mod pdf;
pub mod png;
pub mod random;
pub mod shell;
pub mod truecrypt;
pub mod veracrypt;
pub mod zip;

use crate::module::ModuleRegistry;

/// Registry with every built-in module.
pub fn builtin_registry() -> ModuleRegistry {
    let mut registry = ModuleRegistry::new();
    registry.register(Box::new(shell::ShellModule::default()));
    registry.register(Box::new(zip::ZipModule::default()));
    registry.register(Box::new(png::PngModule::default()));
    registry.register(Box::new(truecrypt::TruecryptModule::default()));
    registry.register(Box::new(veracrypt::VeracryptModule::default()));
    registry.register(Box::new(ext2::Ext2Module::default()));
    registry.register(Box::new(pdf::PdfModule::default()));
    registry.register(Box::new(random::RandomModule::default()));
    registry
}
