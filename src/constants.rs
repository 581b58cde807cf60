// src/constants.rs

/// The group label commands and flags fall into when none is declared.
/// Sorts after real group names so grouped listings show it last.
pub const UNSORTED_GROUP: &str = "zz.unsorted";

/// The sub-folder of a config folder holding per-topic fragment files,
/// loaded recursively after the main app file.
pub const FRAGMENT_DIR: &str = "conf.d";

/// Tokens after this argv separator are always positional arguments.
pub const FLAG_TERMINATOR: &str = "--";

/// Upper bound applied to suggested process exit codes.
pub const MAX_EXIT_CODE: i32 = 255;
