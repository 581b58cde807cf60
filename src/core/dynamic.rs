//! Stock dynamic-children producers.
//!
//! A [`DynamicEval`] can be any closure; this module ships the common case of
//! mapping a directory of executables to subcommands, the way git maps
//! `git-<name>` binaries on PATH.

use crate::core::matcher::MatchError;
use crate::core::tree::{Command, DynamicEval};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Builds a producer that lists the executable files directly inside `dir`
/// and exposes each as a subcommand spawning that file. Children are sorted
/// by file name so resolution order is deterministic across platforms.
pub fn scripts_in_dir(dir: impl Into<PathBuf>) -> DynamicEval {
    let dir = dir.into();
    Box::new(move |_ctx, _cmd| {
        let mut found: Vec<(String, PathBuf)> = Vec::new();
        for entry in WalkDir::new(&dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| MatchError::DynamicScan {
                path: dir.clone(),
                source: e.into(),
            })?;
            if !entry.file_type().is_file() || !is_executable(entry.path()) {
                continue;
            }
            let name = entry
                .path()
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            if name.is_empty() {
                continue;
            }
            found.push((name, entry.path().to_path_buf()));
        }
        found.sort_by(|a, b| a.0.cmp(&b.0));
        log::trace!("scanned '{}': {} scripts", dir.display(), found.len());
        Ok(found
            .into_iter()
            .map(|(name, path)| {
                Command::new(name)
                    .with_desc(format!("run {}", path.display()))
                    .with_invoke_proc(path.display().to_string())
            })
            .collect())
    })
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(_path: &Path) -> bool {
    true
}

// MARK: --- UNIT TESTS ---

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use std::fs;

    #[cfg(unix)]
    fn make_executable(path: &Path) {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[test]
    #[cfg(unix)]
    fn test_scripts_in_dir_sorted_and_filtered() {
        let dir = tempfile::TempDir::new().unwrap();
        for name in ["beta.sh", "alpha.sh"] {
            let path = dir.path().join(name);
            fs::write(&path, "#!/bin/sh\n").unwrap();
            make_executable(&path);
        }
        // Plain data files are skipped.
        fs::write(dir.path().join("notes.txt"), "hi").unwrap();
        // Subdirectories are skipped.
        fs::create_dir(dir.path().join("nested")).unwrap();

        let producer = scripts_in_dir(dir.path());
        let ctx = Context::new("demo");
        let parent = Command::new("run");
        let children = producer(&ctx, &parent).unwrap();
        let names: Vec<&str> = children.iter().map(|c| c.long.as_str()).collect();
        assert_eq!(names, vec!["alpha", "beta"]);
        assert!(children[0].invoke_proc.is_some());
    }

    #[test]
    fn test_missing_dir_is_a_scan_error() {
        let producer = scripts_in_dir("/definitely/not/a/real/dir");
        let ctx = Context::new("demo");
        let parent = Command::new("run");
        let err = producer(&ctx, &parent).unwrap_err();
        assert!(matches!(err, MatchError::DynamicScan { .. }));
    }
}
