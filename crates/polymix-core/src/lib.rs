//! polymix-core: constraint-based polyglot file composition
//!
//! A polyglot is a single file that parses as several container formats at
//! once. This crate plans the byte layout of such a file and coordinates the
//! format modules that contribute byte regions to it.
//!
//! # Architecture
//!
//! ```text
//! CLI → ModuleRegistry → modules yield Chunks
//!                             ↓
//!         Layout (IntervalMap) places fixed, then flexible,
//!         then normalizes tail chunks
//!                             ↓
//!         HookBus notifies modules → modules patch their buffers
//!                             ↓
//!         compose writes blocks, random-fills gaps
//! ```
//!
//! # Modules
//!
//! - `chunk`: byte regions with placement constraints
//! - `interval`: ordered map over half-open intervals
//! - `layout`: placement engine, tail normalisation, byte view
//! - `hooks`: synchronous publish-subscribe bus for cross-module patching
//! - `module`: the format-module contract and registry
//! - `compose`: end-to-end build driver and output writer
//! - `modules`: format producers (zip, png, truecrypt, veracrypt, shell,
//!   ext2, pdf, random)
//!
//! # Safety
//!
//! This crate forbids unsafe code.

#![forbid(unsafe_code)]

pub mod chunk;
pub mod compose;
pub mod error;
pub mod hooks;
pub mod interval;
pub mod layout;
pub mod logging;
pub mod module;
pub mod modules;

pub use chunk::{Chunk, Placement, SharedBuf};
pub use error::{Error, Result};
pub use hooks::{HookBus, HookEvent, Topic};
pub use layout::Layout;
pub use module::{Module, ModuleRegistry};
