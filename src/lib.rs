//! # rudder
//!
//! A hierarchical command/flag resolution engine backed by a layered,
//! dotted-path configuration store. Build a [`Command`] tree, optionally
//! merge config files and environment variables through a [`MergeLoader`],
//! then hand argv to a [`Matcher`]; every resolved value lands in the
//! shared [`Store`] under `<app>.<command-path>.<flag>`, with argv beating
//! env beating config files beating declared defaults.

pub mod constants;
pub mod context;
pub mod core;
pub mod system;

pub use self::context::Context;
pub use self::core::matcher::{MatchError, Matcher, Resolution, UnknownHandling};
pub use self::core::merge::{ConfigClass, MergeLoader};
pub use self::core::store::{Source, Store};
pub use self::core::tree::{Command, Flag};
pub use self::core::value::{Value, ValueKind};
