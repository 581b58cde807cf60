// src/system/executor.rs

use dunce;
use std::io::ErrorKind;
use std::path::Path;
use std::process::{Command as StdCommand, Stdio};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Command could not be parsed: {0}")]
    CommandParse(String),
    #[error("Command '{0}' could not be executed: {1}")]
    CommandFailed(String, std::io::Error),
    #[error("Command '{command}' produced output that was not valid UTF-8")]
    InvalidUtf8Output {
        command: String,
        #[source]
        source: std::string::FromUtf8Error,
    },
}

/// Spawns `command_line` directly (no shell) with inherited stdio and waits
/// for it, returning the child's exit code. An empty line is a no-op success.
pub fn run_process(command_line: &str, cwd: Option<&Path>) -> Result<i32, ExecutionError> {
    let trimmed = command_line.trim();
    if trimmed.is_empty() {
        return Ok(0);
    }

    let parts = shlex::split(trimmed)
        .ok_or_else(|| ExecutionError::CommandParse(trimmed.to_string()))?;
    let Some((program, args)) = parts.split_first() else {
        return Ok(0);
    };

    let mut command = StdCommand::new(program);
    command
        .args(args)
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());
    if let Some(cwd) = cwd {
        command.current_dir(dunce::simplified(cwd));
    }

    // Fallback logic for Windows built-in commands like `echo`.
    // We try to spawn directly first. If it fails with `NotFound`, we try with `cmd /C`.
    let status = match command.status() {
        Ok(status) => status,
        Err(e) if e.kind() == ErrorKind::NotFound && cfg!(target_os = "windows") => {
            log::debug!("Command '{}' not found. Retrying with cmd /C.", program);
            let mut fallback = StdCommand::new("cmd");
            fallback
                .arg("/C")
                .arg(trimmed) // Pass the full, unparsed line to cmd
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit());
            if let Some(cwd) = cwd {
                fallback.current_dir(dunce::simplified(cwd));
            }
            fallback
                .status()
                .map_err(|e| ExecutionError::CommandFailed(trimmed.to_string(), e))?
        }
        Err(e) => return Err(ExecutionError::CommandFailed(trimmed.to_string(), e)),
    };

    // A killed-by-signal child carries no code; report a generic failure.
    Ok(status.code().unwrap_or(1))
}

/// Runs `command_line` through the user's shell, so pipes, globs and
/// variable expansion work. Returns the shell's exit code.
pub fn run_shell(command_line: &str, cwd: Option<&Path>) -> Result<i32, ExecutionError> {
    let trimmed = command_line.trim();
    if trimmed.is_empty() {
        return Ok(0);
    }

    let (shell, flag) = if cfg!(target_os = "windows") {
        ("cmd".to_string(), "/C")
    } else {
        (
            std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string()),
            "-c",
        )
    };

    let mut command = StdCommand::new(&shell);
    command
        .arg(flag)
        .arg(trimmed)
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());
    if let Some(cwd) = cwd {
        command.current_dir(dunce::simplified(cwd));
    }

    let status = command
        .status()
        .map_err(|e| ExecutionError::CommandFailed(trimmed.to_string(), e))?;
    Ok(status.code().unwrap_or(1))
}

/// Executes a command and captures its standard output.
/// Stderr is passed through to the user's terminal.
/// Intended for short-running helper commands.
pub fn capture_output(command_line: &str, cwd: Option<&Path>) -> Result<String, ExecutionError> {
    let trimmed = command_line.trim();
    if trimmed.is_empty() {
        return Ok(String::new());
    }

    let parts = shlex::split(trimmed)
        .ok_or_else(|| ExecutionError::CommandParse(trimmed.to_string()))?;
    let Some((program, args)) = parts.split_first() else {
        return Ok(String::new());
    };

    let mut command = StdCommand::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit());
    if let Some(cwd) = cwd {
        command.current_dir(dunce::simplified(cwd));
    }

    let output = command
        .output()
        .map_err(|e| ExecutionError::CommandFailed(trimmed.to_string(), e))?;

    String::from_utf8(output.stdout).map_err(|e| ExecutionError::InvalidUtf8Output {
        command: trimmed.to_string(),
        source: e,
    })
}

// MARK: --- UNIT TESTS ---

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_command_is_a_noop_success() {
        assert_eq!(run_process("   ", None).unwrap(), 0);
        assert_eq!(run_shell("", None).unwrap(), 0);
        assert_eq!(capture_output("", None).unwrap(), "");
    }

    #[test]
    fn test_unbalanced_quotes_are_a_parse_error() {
        let err = run_process("echo \"unterminated", None).unwrap_err();
        assert!(matches!(err, ExecutionError::CommandParse(_)));
    }

    #[test]
    #[cfg(unix)]
    fn test_exit_code_propagates() {
        assert_eq!(run_shell("exit 7", None).unwrap(), 7);
        assert_eq!(run_process("true", None).unwrap(), 0);
    }

    #[test]
    #[cfg(unix)]
    fn test_capture_output() {
        let out = capture_output("echo hello", None).unwrap();
        assert_eq!(out.trim(), "hello");
    }

    #[test]
    fn test_missing_program_is_a_spawn_error() {
        let err = run_process("definitely-not-a-real-program-xyz", None).unwrap_err();
        assert!(matches!(err, ExecutionError::CommandFailed(_, _)));
    }
}
