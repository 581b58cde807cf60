//! Live re-loading of a config file into the store.
//!
//! Compiled only with the `watch` feature. A background thread owns nothing
//! but the channel receiver; the notify watcher lives in the handle, so
//! dropping the handle disconnects the channel and the thread winds down.

use crate::core::codecs::Codec;
use crate::core::store::{Source, Store};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WatchError {
    #[error(transparent)]
    Notify(#[from] notify::Error),
    #[error("cannot watch '{path}': it has no parent directory")]
    NoParent { path: PathBuf },
}

/// Keeps the watcher alive. Dropping it stops the background thread.
pub struct WatchHandle {
    watcher: Option<RecommendedWatcher>,
    thread: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchHandle")
            .field("running", &self.thread.is_some())
            .finish()
    }
}

impl WatchHandle {
    /// Stops watching and waits for the background thread to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.watcher.take();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Starts watching `path` and pushes its decoded entries into `store` at
/// `ConfigFile` rank on every change. Events are debounced by draining the
/// queue before each reload.
pub fn watch_file(
    path: impl Into<PathBuf>,
    codec: Arc<dyn Codec>,
    app_name: impl Into<String>,
    store: Store,
) -> Result<WatchHandle, WatchError> {
    let path = path.into();
    let app_name = app_name.into();
    // Watch the parent directory: editors replace files rather than rewrite
    // them, which re-creates the inode the watcher was pinned to.
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .ok_or_else(|| WatchError::NoParent { path: path.clone() })?
        .to_path_buf();

    let (tx, rx) = mpsc::channel::<notify::Result<Event>>();
    let mut watcher = notify::recommended_watcher(move |res| {
        let _ = tx.send(res);
    })?;
    watcher.watch(&parent, RecursiveMode::NonRecursive)?;

    let thread = std::thread::spawn(move || {
        while let Ok(event) = rx.recv() {
            let mut relevant = event_touches(&event, &path);
            // Drain whatever piled up so one save triggers one reload.
            while let Ok(extra) = rx.recv_timeout(Duration::from_millis(100)) {
                relevant |= event_touches(&extra, &path);
            }
            if relevant {
                reload(&path, codec.as_ref(), &app_name, &store);
            }
        }
        log::debug!("config watcher for '{}' stopped", path.display());
    });

    Ok(WatchHandle {
        watcher: Some(watcher),
        thread: Some(thread),
    })
}

fn event_touches(event: &notify::Result<Event>, path: &Path) -> bool {
    match event {
        Ok(event) => event.paths.iter().any(|p| p == path),
        Err(e) => {
            log::warn!("config watcher error: {}", e);
            false
        }
    }
}

fn reload(path: &Path, codec: &dyn Codec, app_name: &str, store: &Store) {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            log::warn!("cannot re-read '{}': {}", path.display(), e);
            return;
        }
    };
    match codec.decode(&text) {
        Ok(entries) => {
            log::debug!(
                "reloading {} entries from '{}'",
                entries.len(),
                path.display()
            );
            for (key, value) in entries {
                store.set(&format!("{}.{}", app_name, key), value, Source::ConfigFile);
            }
        }
        Err(e) => log::warn!("skipping malformed reload of '{}': {}", path.display(), e),
    }
}

// MARK: --- UNIT TESTS ---

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::codecs::CodecRegistry;
    use std::fs;

    #[test]
    fn test_reload_pushes_config_rank_entries() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("demo.toml");
        fs::write(&file, "port = 4242\n").unwrap();
        let codec = CodecRegistry::default().get("toml").unwrap();
        let store = Store::new();
        reload(&file, codec.as_ref(), "demo", &store);
        assert_eq!(store.get_int("demo.port"), Some(4242));
        assert_eq!(store.source_of("demo.port"), Some(Source::ConfigFile));
    }

    #[test]
    fn test_watch_detects_rewrite() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("demo.toml");
        fs::write(&file, "port = 1\n").unwrap();
        let codec = CodecRegistry::default().get("toml").unwrap();
        let store = Store::new();
        let handle = watch_file(&file, codec, "demo", store.clone()).unwrap();

        // Give the watcher a moment to register, then rewrite.
        std::thread::sleep(Duration::from_millis(300));
        fs::write(&file, "port = 2\n").unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while store.get_int("demo.port") != Some(2) && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(50));
        }
        handle.stop();
        assert_eq!(store.get_int("demo.port"), Some(2));
    }
}
