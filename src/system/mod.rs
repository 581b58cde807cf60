//! # System Interaction Layer
//!
//! The boundary between the resolution engine and the operating system.
//!
//! - **`executor`**: spawns a matched command's external invocation, either
//!   directly or through the user's shell, and reports its exit code.
//! - **`external`**: the collaborators a flag can delegate value acquisition
//!   to, a hidden password prompt and an editor round-trip.

pub mod executor;
pub mod external;
