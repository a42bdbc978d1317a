//! In-memory schema cache.
//!
//! Four indices share one capacity setting:
//!
//! - schema id to descriptor
//! - (subject, version) to descriptor
//! - (subject, fingerprint) to descriptor, answering `lookup_id`
//! - (subject, fingerprint) to schema id, answering `register`
//!
//! Entries are immutable `Arc`s and insertion is first-writer-wins, so two
//! concurrent misses for the same key converge on one descriptor.

use crate::registry::SchemaDescriptor;
use lru::LruCache;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

struct Index<K: Hash + Eq, V: Clone> {
    name: &'static str,
    bounded: bool,
    entries: RwLock<LruCache<K, V>>,
}

impl<K: Hash + Eq, V: Clone> Index<K, V> {
    fn new(name: &'static str, capacity: Option<NonZeroUsize>) -> Self {
        let entries = match capacity {
            Some(capacity) => LruCache::new(capacity),
            None => LruCache::unbounded(),
        };
        Self {
            name,
            bounded: capacity.is_some(),
            entries: RwLock::new(entries),
        }
    }

    fn get(&self, key: &K) -> Option<V> {
        // Without a bound, recency does not matter and readers share the lock.
        if !self.bounded {
            return match self.entries.read() {
                Ok(entries) => entries.peek(key).cloned(),
                Err(_) => {
                    warn!("{} cache lock poisoned, treating as miss", self.name);
                    None
                }
            };
        }
        match self.entries.write() {
            Ok(mut entries) => entries.get(key).cloned(),
            Err(_) => {
                warn!("{} cache lock poisoned, treating as miss", self.name);
                None
            }
        }
    }

    /// Insert unless present; returns whichever value is cached afterwards.
    fn insert(&self, key: K, value: V) -> V {
        match self.entries.write() {
            Ok(mut entries) => {
                if let Some(existing) = entries.get(&key) {
                    return existing.clone();
                }
                entries.put(key, value.clone());
                value
            }
            Err(_) => {
                warn!("{} cache lock poisoned, result not cached", self.name);
                value
            }
        }
    }

    fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }
}

/// Thread-safe cache of resolved schemas
pub struct SchemaCache {
    by_id: Index<u32, Arc<SchemaDescriptor>>,
    by_subject_version: Index<(String, i32), Arc<SchemaDescriptor>>,
    by_subject_schema: Index<(String, String), Arc<SchemaDescriptor>>,
    id_by_schema: Index<(String, String), u32>,
}

impl SchemaCache {
    /// Cache without eviction.
    pub fn unbounded() -> Self {
        Self::new(None)
    }

    /// `Some(n)` keeps at most `n` entries per index, evicting the least
    /// recently used.
    pub fn new(capacity: Option<NonZeroUsize>) -> Self {
        Self {
            by_id: Index::new("schema id", capacity),
            by_subject_version: Index::new("subject version", capacity),
            by_subject_schema: Index::new("subject schema", capacity),
            id_by_schema: Index::new("registered schema", capacity),
        }
    }

    pub fn get(&self, id: u32) -> Option<Arc<SchemaDescriptor>> {
        let hit = self.by_id.get(&id);
        debug!(
            "Schema cache {} for id {id}",
            if hit.is_some() { "hit" } else { "miss" }
        );
        hit
    }

    /// Cache a descriptor under its id, and under its subject and version
    /// when both are known.
    ///
    /// Returns the cached instance for the most specific key: the
    /// subject/version entry when the descriptor has one, else the id entry.
    /// Either may be an earlier descriptor if another caller got there first.
    pub fn put(&self, descriptor: Arc<SchemaDescriptor>) -> Arc<SchemaDescriptor> {
        let by_id = self.by_id.insert(descriptor.id, descriptor.clone());
        match (&descriptor.subject, descriptor.version) {
            (Some(subject), Some(version)) => self
                .by_subject_version
                .insert((subject.clone(), version), descriptor.clone()),
            _ => by_id,
        }
    }

    pub fn get_by_subject_version(
        &self,
        subject: &str,
        version: i32,
    ) -> Option<Arc<SchemaDescriptor>> {
        self.by_subject_version.get(&(subject.to_string(), version))
    }

    /// Descriptor previously found by looking up `fingerprint` under `subject`.
    pub fn get_by_subject_schema(
        &self,
        subject: &str,
        fingerprint: &str,
    ) -> Option<Arc<SchemaDescriptor>> {
        self.by_subject_schema
            .get(&(subject.to_string(), fingerprint.to_string()))
    }

    /// Cache the result of looking up `fingerprint` under `subject`, and the
    /// descriptor itself as [`SchemaCache::put`] does.
    pub fn put_by_subject_schema(
        &self,
        subject: &str,
        fingerprint: &str,
        descriptor: Arc<SchemaDescriptor>,
    ) -> Arc<SchemaDescriptor> {
        let cached = self.put(descriptor);
        self.by_subject_schema
            .insert((subject.to_string(), fingerprint.to_string()), cached)
    }

    pub fn get_id_by_schema(&self, subject: &str, fingerprint: &str) -> Option<u32> {
        self.id_by_schema
            .get(&(subject.to_string(), fingerprint.to_string()))
    }

    pub fn put_id_by_schema(&self, subject: &str, fingerprint: &str, id: u32) -> u32 {
        self.id_by_schema
            .insert((subject.to_string(), fingerprint.to_string()), id)
    }

    /// Number of descriptors cached by id.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SchemaCache {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl std::fmt::Debug for SchemaCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaCache")
            .field("by_id", &self.by_id.len())
            .field("by_subject_version", &self.by_subject_version.len())
            .field("by_subject_schema", &self.by_subject_schema.len())
            .field("id_by_schema", &self.id_by_schema.len())
            .finish()
    }
}
