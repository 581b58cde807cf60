//! # Config Discovery and Layered Merge
//!
//! Folders are registered under three classes and loaded in class order, so
//! later classes override earlier ones at equal store rank. Inside a folder
//! the loader picks the first file named `<app>.<ext>` or `.<app>.<ext>`
//! whose extension the codec registry knows, then merges every fragment
//! under the folder's `conf.d/` subtree in lexical path order. Everything
//! lands in the store at `ConfigFile` rank, which argv and env always beat.

use crate::constants::FRAGMENT_DIR;
use crate::core::codecs::{Codec, CodecError, CodecRegistry};
use crate::core::store::{Source, Store};
use crate::core::value::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum MergeError {
    #[error("failed to decode '{path}': {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: CodecError,
    },
    #[error("failed to encode for '{path}': {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: CodecError,
    },
    #[error("failed to write '{path}'")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("write-back requested but no alternative-class config file was loaded")]
    NoWriteBackTarget,
}

/// The merge layer a folder belongs to. Later classes override earlier ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConfigClass {
    /// System-wide configuration, lowest layer.
    Primary,
    /// Per-user configuration.
    Secondary,
    /// Project-local configuration, highest layer and write-back target.
    Alternative,
}

const CLASS_ORDER: [ConfigClass; 3] = [
    ConfigClass::Primary,
    ConfigClass::Secondary,
    ConfigClass::Alternative,
];

/// Discovers, decodes and merges config files into a store.
#[derive(Debug)]
pub struct MergeLoader {
    app_name: String,
    registry: CodecRegistry,
    folders: Vec<(ConfigClass, PathBuf)>,
    /// Skip undecodable files with a warning instead of failing the load.
    permissive: bool,
    write_back: Option<(PathBuf, Arc<dyn Codec>)>,
}

impl MergeLoader {
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            registry: CodecRegistry::default(),
            folders: Vec::new(),
            permissive: false,
            write_back: None,
        }
    }

    pub fn with_registry(mut self, registry: CodecRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Registers a search folder. `~` expands to the user's home directory.
    pub fn add_folder(mut self, class: ConfigClass, folder: impl AsRef<str>) -> Self {
        let expanded = shellexpand::tilde(folder.as_ref()).into_owned();
        self.folders.push((class, PathBuf::from(expanded)));
        self
    }

    /// The conventional search layout: `/etc/<app>` as primary, the user
    /// config dir plus `~/.<app>` as secondary, the working directory as
    /// alternative.
    pub fn with_standard_folders(mut self) -> Self {
        self.folders
            .push((ConfigClass::Primary, PathBuf::from(format!("/etc/{}", self.app_name))));
        if let Some(config) = dirs::config_dir() {
            self.folders
                .push((ConfigClass::Secondary, config.join(&self.app_name)));
        }
        if let Some(home) = dirs::home_dir() {
            self.folders
                .push((ConfigClass::Secondary, home.join(format!(".{}", self.app_name))));
        }
        self.folders.push((ConfigClass::Alternative, PathBuf::from(".")));
        self
    }

    pub fn permissive(mut self) -> Self {
        self.permissive = true;
        self
    }

    /// Loads every registered folder into `store` at `ConfigFile` rank and
    /// remembers the last alternative-class main file as write-back target.
    pub fn load(&mut self, store: &Store) -> Result<(), MergeError> {
        for class in CLASS_ORDER {
            for folder in self
                .folders
                .iter()
                .filter(|(c, _)| *c == class)
                .map(|(_, f)| f.clone())
                .collect::<Vec<_>>()
            {
                self.load_folder(class, &folder, store)?;
            }
        }
        Ok(())
    }

    fn load_folder(
        &mut self,
        class: ConfigClass,
        folder: &Path,
        store: &Store,
    ) -> Result<(), MergeError> {
        if !folder.is_dir() {
            log::debug!("config folder '{}' does not exist, skipping", folder.display());
            return Ok(());
        }

        if let Some((path, codec)) = self.find_main_file(folder) {
            self.load_file(&path, codec.as_ref(), store)?;
            if class == ConfigClass::Alternative {
                self.write_back = Some((path, codec));
            }
        }

        let fragments = folder.join(FRAGMENT_DIR);
        if fragments.is_dir() {
            for entry in WalkDir::new(&fragments).min_depth(1).sort_by_file_name() {
                // Unreadable entries are logged and skipped; only malformed
                // content is an error.
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        log::warn!("skipping unreadable fragment under '{}': {}", fragments.display(), e);
                        continue;
                    }
                };
                if !entry.file_type().is_file() {
                    continue;
                }
                let ext = entry
                    .path()
                    .extension()
                    .map(|e| e.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let Some(codec) = self.registry.get(&ext) else {
                    log::debug!("no codec for fragment '{}'", entry.path().display());
                    continue;
                };
                self.load_file(entry.path(), codec.as_ref(), store)?;
            }
        }
        Ok(())
    }

    /// `<app>.<ext>` or `.<app>.<ext>` with a known extension, first match
    /// in lexical order.
    fn find_main_file(&self, folder: &Path) -> Option<(PathBuf, Arc<dyn Codec>)> {
        let listing = match fs::read_dir(folder) {
            Ok(listing) => listing,
            Err(e) => {
                log::warn!("cannot list config folder '{}': {}", folder.display(), e);
                return None;
            }
        };
        let mut entries: Vec<PathBuf> = listing
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
            .map(|e| e.path())
            .collect();
        entries.sort();

        let hidden = format!(".{}", self.app_name);
        for path in entries {
            let Some(stem) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
                continue;
            };
            if stem != self.app_name && stem != hidden {
                continue;
            }
            let ext = path
                .extension()
                .map(|e| e.to_string_lossy().into_owned())
                .unwrap_or_default();
            if let Some(codec) = self.registry.get(&ext) {
                return Some((path, codec));
            }
        }
        None
    }

    fn load_file(
        &self,
        path: &Path,
        codec: &dyn Codec,
        store: &Store,
    ) -> Result<(), MergeError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                log::warn!("skipping unreadable config '{}': {}", path.display(), e);
                return Ok(());
            }
        };
        let entries = match codec.decode(&text) {
            Ok(entries) => entries,
            Err(source) if self.permissive => {
                log::warn!("skipping malformed config '{}': {}", path.display(), source);
                return Ok(());
            }
            Err(source) => {
                return Err(MergeError::Decode {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        log::debug!(
            "merging {} entries from '{}' ({})",
            entries.len(),
            path.display(),
            codec.name()
        );
        for (key, value) in entries {
            store.set(
                &format!("{}.{}", self.app_name, key),
                value,
                Source::ConfigFile,
            );
        }
        Ok(())
    }

    /// Maps process environment variables with the `<APP>_` prefix into the
    /// store at `Env` rank: `DEMO_SERVER_PORT` becomes `demo.server.port`.
    pub fn load_env(&self, store: &Store) {
        self.load_env_from(store, std::env::vars());
    }

    pub fn load_env_from(
        &self,
        store: &Store,
        vars: impl IntoIterator<Item = (String, String)>,
    ) {
        let prefix = format!("{}_", self.app_name.to_ascii_uppercase());
        for (name, raw) in vars {
            let Some(tail) = name.strip_prefix(&prefix) else { continue };
            if tail.is_empty() {
                continue;
            }
            let key = format!(
                "{}.{}",
                self.app_name,
                tail.to_ascii_lowercase().replace('_', ".")
            );
            store.set(&key, Value::Str(raw), Source::Env);
        }
    }

    /// The path the next [`MergeLoader::save`] call writes to, when any.
    pub fn write_back_path(&self) -> Option<&Path> {
        self.write_back.as_ref().map(|(p, _)| p.as_path())
    }

    /// Serializes the app's store region back to the alternative-class file
    /// it was loaded from, in that file's own format.
    pub fn save(&self, store: &Store) -> Result<(), MergeError> {
        let Some((path, codec)) = &self.write_back else {
            return Err(MergeError::NoWriteBackTarget);
        };
        let entries = store.dump_prefix(&self.app_name);
        let text = codec.encode(&entries).map_err(|source| MergeError::Encode {
            path: path.clone(),
            source,
        })?;
        fs::write(path, text).map_err(|source| MergeError::Write {
            path: path.clone(),
            source,
        })?;
        log::debug!("wrote {} entries back to '{}'", entries.len(), path.display());
        Ok(())
    }
}

// MARK: --- UNIT TESTS ---
