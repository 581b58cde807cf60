// src/context.rs

use crate::constants::MAX_EXIT_CODE;
use crate::core::store::Store;

/// The explicitly constructed resolution context threaded through builder,
/// engine and action calls. There is no process-wide default inside the
/// engine; binaries that want one create it at their entry point.
#[derive(Debug, Clone)]
pub struct Context {
    store: Store,
    app_name: String,
    suggested_exit: i32,
}

impl Context {
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            store: Store::new(),
            app_name: app_name.into(),
            suggested_exit: 0,
        }
    }

    pub fn with_store(app_name: impl Into<String>, store: Store) -> Self {
        Self {
            store,
            app_name: app_name.into(),
            suggested_exit: 0,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    /// The store key for a flag on a command: `<app>.<command-path>.<flag>`,
    /// skipping empty segments (root-level flags live at `<app>.<flag>`).
    pub fn store_key(&self, command_path: &str, flag_long: &str) -> String {
        let mut key = String::with_capacity(
            self.app_name.len() + command_path.len() + flag_long.len() + 2,
        );
        for part in [self.app_name.as_str(), command_path, flag_long] {
            if part.is_empty() {
                continue;
            }
            if !key.is_empty() {
                key.push('.');
            }
            key.push_str(part);
        }
        key
    }

    /// Records the suggested process exit code (0-255). The last explicit
    /// suggestion wins; the default is 0.
    pub fn suggest_exit_code(&mut self, code: i32) {
        self.suggested_exit = code.clamp(0, MAX_EXIT_CODE);
    }

    pub fn suggested_exit_code(&self) -> i32 {
        self.suggested_exit
    }
}

// MARK: --- UNIT TESTS ---

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_key_composition() {
        let ctx = Context::new("demo");
        assert_eq!(ctx.store_key("server.start", "port"), "demo.server.start.port");
        assert_eq!(ctx.store_key("", "verbose"), "demo.verbose");
    }

    #[test]
    fn test_exit_code_clamped_and_last_wins() {
        let mut ctx = Context::new("demo");
        assert_eq!(ctx.suggested_exit_code(), 0);
        ctx.suggest_exit_code(7);
        ctx.suggest_exit_code(999);
        assert_eq!(ctx.suggested_exit_code(), 255);
    }
}
