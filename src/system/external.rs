// src/system/external.rs

//! External value-acquisition tools a flag can delegate to when argv carries
//! no value: an interactive password prompt and an editor round-trip.

use std::io::Write;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExternalToolError {
    #[error("Prompt failed: {0}")]
    Dialog(#[from] dialoguer::Error),
    #[error("Editor scratch file could not be handled: {0}")]
    Io(#[from] std::io::Error),
    #[error("Editor '{editor}' exited with code {code}.")]
    EditorFailed { editor: String, code: i32 },
    #[error("Editor command '{0}' could not be parsed.")]
    EditorParse(String),
}

/// Reads a secret from the terminal without echoing it.
pub fn prompt_password(prompt: &str) -> Result<String, ExternalToolError> {
    Ok(dialoguer::Password::new()
        .with_prompt(prompt)
        .allow_empty_password(true)
        .interact()?)
}

/// Opens the user's editor on a scratch file seeded with `initial` and
/// returns the edited content. Editor selection follows the usual
/// convention: `$VISUAL`, then `$EDITOR`, then a platform default.
pub fn edit_in_editor(initial: &str) -> Result<String, ExternalToolError> {
    let editor = std::env::var("VISUAL")
        .or_else(|_| std::env::var("EDITOR"))
        .unwrap_or_else(|_| default_editor().to_string());
    edit_with(&editor, initial)
}

fn default_editor() -> &'static str {
    if cfg!(target_os = "windows") { "notepad" } else { "vi" }
}

/// The editor round-trip with an explicit editor command line. The command
/// may carry its own arguments ("code --wait").
pub fn edit_with(editor: &str, initial: &str) -> Result<String, ExternalToolError> {
    let parts =
        shlex::split(editor).ok_or_else(|| ExternalToolError::EditorParse(editor.to_string()))?;
    let Some((program, args)) = parts.split_first() else {
        return Err(ExternalToolError::EditorParse(editor.to_string()));
    };

    let mut scratch = tempfile::Builder::new()
        .prefix("rudder-edit-")
        .suffix(".txt")
        .tempfile()?;
    scratch.write_all(initial.as_bytes())?;
    scratch.flush()?;

    let status = std::process::Command::new(program)
        .args(args)
        .arg(scratch.path())
        .status()?;
    if !status.success() {
        return Err(ExternalToolError::EditorFailed {
            editor: editor.to_string(),
            code: status.code().unwrap_or(1),
        });
    }

    let content = std::fs::read_to_string(scratch.path())?;
    Ok(content.trim_end_matches('\n').to_string())
}

// MARK: --- UNIT TESTS ---
