//! # Store
//!
//! The dotted-path configuration store. Every resolved flag, config-file key,
//! environment override and builder default lands here, and actions read their
//! values back exclusively through this type.
//!
//! Each key remembers the *source rank* of its last write, and a write
//! ranked below the current entry is ignored. Ranks give the precedence
//! contract (argv > env > config file > default) a structural guarantee:
//! neither load-call ordering nor the required-flag check depends on who
//! wrote first.

use crate::core::value::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Where a store entry came from, lowest precedence first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Source {
    Default,
    ConfigFile,
    Env,
    Argv,
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    source: Source,
}

/// A hierarchical key/value container addressed by dot-separated paths.
///
/// Cloning a `Store` yields another handle to the same underlying map; the
/// interior `RwLock` keeps concurrent readers safe against background writes
/// (e.g. a config-file watcher).
#[derive(Debug, Clone, Default)]
pub struct Store {
    inner: Arc<RwLock<BTreeMap<String, Entry>>>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes `value` under `key`, recording its source rank. A write ranked
    /// below the key's current source is ignored, so load-call ordering can
    /// never invert precedence; at equal or higher rank the last write wins.
    pub fn set(&self, key: &str, value: Value, source: Source) {
        let mut map = self.inner.write().expect("store lock poisoned");
        if let Some(existing) = map.get(key)
            && existing.source > source
        {
            log::trace!(
                "store keep [{:?}] {}: ignoring lower-ranked {:?} write",
                existing.source,
                key,
                source
            );
            return;
        }
        log::trace!("store set [{:?}] {} = {}", source, key, value);
        map.insert(key.to_string(), Entry { value, source });
    }

    pub fn set_default(&self, key: &str, value: Value) {
        self.set(key, value, Source::Default);
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let map = self.inner.read().expect("store lock poisoned");
        map.get(key).map(|e| e.value.clone())
    }

    /// The source rank of the last write to `key`, if the key exists.
    pub fn source_of(&self, key: &str) -> Option<Source> {
        let map = self.inner.read().expect("store lock poisoned");
        map.get(key).map(|e| e.source)
    }

    pub fn has(&self, key: &str) -> bool {
        let map = self.inner.read().expect("store lock poisoned");
        map.contains_key(key)
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        let mut map = self.inner.write().expect("store lock poisoned");
        map.remove(key).map(|e| e.value)
    }

    /// Removes every key under `prefix.` (and `prefix` itself).
    /// Returns the number of removed entries.
    pub fn remove_prefix(&self, prefix: &str) -> usize {
        let mut map = self.inner.write().expect("store lock poisoned");
        let dotted = format!("{}.", prefix);
        let doomed: Vec<String> = map
            .keys()
            .filter(|k| *k == prefix || k.starts_with(&dotted))
            .cloned()
            .collect();
        for k in &doomed {
            map.remove(k);
        }
        doomed.len()
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("store lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All keys in sorted order.
    pub fn keys(&self) -> Vec<String> {
        let map = self.inner.read().expect("store lock poisoned");
        map.keys().cloned().collect()
    }

    /// A sorted snapshot of the whole store, for introspection and `save()`.
    pub fn dump(&self) -> Vec<(String, Value)> {
        let map = self.inner.read().expect("store lock poisoned");
        map.iter().map(|(k, e)| (k.clone(), e.value.clone())).collect()
    }

    /// A sorted snapshot of the keys under `prefix.`, with the prefix stripped.
    pub fn dump_prefix(&self, prefix: &str) -> Vec<(String, Value)> {
        let map = self.inner.read().expect("store lock poisoned");
        let dotted = format!("{}.", prefix);
        map.iter()
            .filter_map(|(k, e)| {
                k.strip_prefix(&dotted)
                    .map(|tail| (tail.to_string(), e.value.clone()))
            })
            .collect()
    }

    /// A view of this store narrowed to `prefix`, presented as if it were
    /// the root namespace.
    pub fn scoped(&self, prefix: &str) -> ScopedStore {
        ScopedStore {
            store: self.clone(),
            prefix: prefix.trim_matches('.').to_string(),
        }
    }

    // --- Typed accessors ---

    pub fn get_str(&self, key: &str) -> Option<String> {
        self.get(key).map(|v| v.to_string())
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(|v| v.as_bool())
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(|v| v.as_int())
    }

    pub fn get_uint(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(|v| v.as_uint())
    }

    pub fn get_float(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(|v| v.as_float())
    }

    pub fn get_duration(&self, key: &str) -> Option<Duration> {
        self.get(key).and_then(|v| v.as_duration())
    }

    pub fn get_str_list(&self, key: &str) -> Option<Vec<String>> {
        self.get(key)
            .and_then(|v| v.as_str_list().map(|l| l.to_vec()))
    }

    // --- Zero-value accessors ---

    pub fn str_or_default(&self, key: &str) -> String {
        self.get_str(key).unwrap_or_default()
    }

    pub fn bool_or_default(&self, key: &str) -> bool {
        self.get_bool(key).unwrap_or_default()
    }

    pub fn int_or_default(&self, key: &str) -> i64 {
        self.get_int(key).unwrap_or_default()
    }

    pub fn duration_or_default(&self, key: &str) -> Duration {
        self.get_duration(key).unwrap_or_default()
    }

    pub fn str_list_or_default(&self, key: &str) -> Vec<String> {
        self.get_str_list(key).unwrap_or_default()
    }

    // --- Panicking accessors (action-layer sugar) ---

    #[allow(clippy::panic)]
    pub fn must_str(&self, key: &str) -> String {
        self.get_str(key)
            .unwrap_or_else(|| panic!("store key '{}' is missing", key))
    }

    #[allow(clippy::panic)]
    pub fn must_bool(&self, key: &str) -> bool {
        self.get_bool(key)
            .unwrap_or_else(|| panic!("store key '{}' is missing or not a bool", key))
    }

    #[allow(clippy::panic)]
    pub fn must_int(&self, key: &str) -> i64 {
        self.get_int(key)
            .unwrap_or_else(|| panic!("store key '{}' is missing or not an int", key))
    }

    #[allow(clippy::panic)]
    pub fn must_duration(&self, key: &str) -> Duration {
        self.get_duration(key)
            .unwrap_or_else(|| panic!("store key '{}' is missing or not a duration", key))
    }
}

/// A prefix-scoped view over a [`Store`].
#[derive(Debug, Clone)]
pub struct ScopedStore {
    store: Store,
    prefix: String,
}

impl ScopedStore {
    fn full_key(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}.{}", self.prefix, key)
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn set(&self, key: &str, value: Value, source: Source) {
        self.store.set(&self.full_key(key), value, source);
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.store.get(&self.full_key(key))
    }

    pub fn has(&self, key: &str) -> bool {
        self.store.has(&self.full_key(key))
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.store.remove(&self.full_key(key))
    }

    pub fn dump(&self) -> Vec<(String, Value)> {
        self.store.dump_prefix(&self.prefix)
    }

    /// Narrows the view further, joining the dotted prefixes.
    pub fn scoped(&self, prefix: &str) -> Self {
        self.store.scoped(&self.full_key(prefix))
    }

    pub fn get_str(&self, key: &str) -> Option<String> {
        self.store.get_str(&self.full_key(key))
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.store.get_bool(&self.full_key(key))
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.store.get_int(&self.full_key(key))
    }
}

// MARK: --- UNIT TESTS ---

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_roundtrip_and_source() {
        let store = Store::new();
        store.set("app.mx.lines", Value::Int(5), Source::Argv);
        assert_eq!(store.get_int("app.mx.lines"), Some(5));
        assert_eq!(store.source_of("app.mx.lines"), Some(Source::Argv));
        assert_eq!(store.get("missing"), None);
    }

    #[test]
    fn test_last_write_wins_at_equal_or_higher_rank() {
        let store = Store::new();
        store.set("k", Value::Int(1), Source::ConfigFile);
        store.set("k", Value::Int(2), Source::Env);
        assert_eq!(store.get_int("k"), Some(2));
        assert_eq!(store.source_of("k"), Some(Source::Env));
        // Same rank overwrites.
        store.set("k", Value::Int(3), Source::Env);
        assert_eq!(store.get_int("k"), Some(3));
    }

    #[test]
    fn test_lower_rank_write_is_ignored() {
        let store = Store::new();
        store.set("k", Value::Str("argv".into()), Source::Argv);
        // A late env load cannot clobber a matched argv value.
        store.set("k", Value::Str("env".into()), Source::Env);
        assert_eq!(store.get_str("k"), Some("argv".into()));
        assert_eq!(store.source_of("k"), Some(Source::Argv));
        store.set_default("k", Value::Str("default".into()));
        assert_eq!(store.get_str("k"), Some("argv".into()));
        // Removal re-opens the key for any rank.
        store.remove("k");
        store.set_default("k", Value::Str("default".into()));
        assert_eq!(store.source_of("k"), Some(Source::Default));
    }

    #[test]
    fn test_source_rank_ordering() {
        assert!(Source::Default < Source::ConfigFile);
        assert!(Source::ConfigFile < Source::Env);
        assert!(Source::Env < Source::Argv);
    }

    #[test]
    fn test_remove_prefix() {
        let store = Store::new();
        store.set_default("a.b.c", Value::Bool(true));
        store.set_default("a.b.d", Value::Bool(true));
        store.set_default("a.bc", Value::Bool(true));
        assert_eq!(store.remove_prefix("a.b"), 2);
        assert!(store.has("a.bc"));
    }

    #[test]
    fn test_scoped_view_narrows_namespace() {
        let store = Store::new();
        let scoped = store.scoped("app.server");
        scoped.set("port", Value::Uint(8080), Source::Default);
        assert_eq!(store.get_uint("app.server.port"), Some(8080));
        assert_eq!(scoped.get_int("port"), Some(8080));

        let deeper = scoped.scoped("tls");
        deeper.set("enabled", Value::Bool(true), Source::Default);
        assert_eq!(store.get_bool("app.server.tls.enabled"), Some(true));

        let dump = scoped.dump();
        assert_eq!(dump.len(), 2);
        assert_eq!(dump[0].0, "port");
        assert_eq!(dump[1].0, "tls.enabled");
    }

    #[test]
    fn test_zero_value_accessors() {
        let store = Store::new();
        assert_eq!(store.str_or_default("nope"), "");
        assert!(!store.bool_or_default("nope"));
        assert_eq!(store.int_or_default("nope"), 0);
    }

    #[test]
    #[should_panic(expected = "is missing")]
    fn test_must_accessor_panics_on_missing() {
        Store::new().must_str("absent.key");
    }

    #[test]
    fn test_concurrent_readers_during_writes() {
        let store = Store::new();
        store.set_default("shared.counter", Value::Int(0));
        let writer = store.clone();
        let handle = std::thread::spawn(move || {
            for i in 0..500 {
                writer.set("shared.counter", Value::Int(i), Source::ConfigFile);
            }
        });
        for _ in 0..500 {
            // A reader must always observe a whole value, never a torn one.
            assert!(store.get_int("shared.counter").is_some());
        }
        handle.join().expect("writer thread panicked");
    }
}
