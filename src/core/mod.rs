// src/core/mod.rs

pub mod codecs;
pub mod dynamic;
pub mod matcher;
pub mod merge;
pub mod store;
pub mod tree;
pub mod value;
#[cfg(feature = "watch")]
pub mod watch;
