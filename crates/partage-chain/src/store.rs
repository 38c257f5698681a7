//! Key-value storage collaborators

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use partage_core::{PartageError, PartageResult};

/// A flat key-value store
pub trait Store: Send + Sync {
    fn get(&self, key: &str) -> Option<Vec<u8>>;

    fn set(&self, key: &str, value: Vec<u8>) -> PartageResult<()>;

    fn delete(&self, key: &str);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Visit every entry; return `false` from `f` to stop early
    fn for_each(&self, f: &mut dyn FnMut(&str, &[u8]) -> bool);
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Vec<u8>>>,
    read_only: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    /// Make every subsequent write fail, as a full or detached disk would
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }
}

impl Store for MemoryStore {
    fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: Vec<u8>) -> PartageResult<()> {
        if self.read_only.load(Ordering::SeqCst) {
            return Err(PartageError::StorageError(format!(
                "store is read-only, cannot write {}",
                key
            )));
        }
        self.entries.write().insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&self, key: &str) {
        self.entries.write().remove(key);
    }

    fn len(&self) -> usize {
        self.entries.read().len()
    }

    fn for_each(&self, f: &mut dyn FnMut(&str, &[u8]) -> bool) {
        let entries = self.entries.read();
        for (key, value) in entries.iter() {
            if !f(key, value) {
                break;
            }
        }
    }
}

/// Namespaced stores of one peer: one chain per topic plus the naming table
pub struct Storage {
    blockchains: RwLock<HashMap<String, Arc<dyn Store>>>,
    naming: Arc<dyn Store>,
    factory: Box<dyn Fn() -> Arc<dyn Store> + Send + Sync>,
}

impl Storage {
    /// Storage backed by fresh [`MemoryStore`]s
    pub fn in_memory() -> Self {
        Storage::with_factory(|| Arc::new(MemoryStore::new()))
    }

    /// Storage whose namespaces are created by `factory`
    pub fn with_factory<F>(factory: F) -> Self
    where
        F: Fn() -> Arc<dyn Store> + Send + Sync + 'static,
    {
        Storage {
            blockchains: RwLock::new(HashMap::new()),
            naming: factory(),
            factory: Box::new(factory),
        }
    }

    /// Chain store of a topic, created on first use
    pub fn blockchain_store(&self, topic: &str) -> Arc<dyn Store> {
        if let Some(store) = self.blockchains.read().get(topic) {
            return store.clone();
        }
        self.blockchains
            .write()
            .entry(topic.to_string())
            .or_insert_with(|| (self.factory)())
            .clone()
    }

    /// Filename to metahash table written by the naming chain
    pub fn naming_store(&self) -> Arc<dyn Store> {
        self.naming.clone()
    }

    /// Topics that have a chain store
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.blockchains.read().keys().cloned().collect();
        topics.sort();
        topics
    }
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("topics", &self.topics())
            .field("names", &self.naming.len())
            .finish()
    }
}
