//! In-memory record store
//!
//! Used for tests and for runs where nothing should outlive the process.
//! Keys keep their first insertion order, like the SQLite store.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::database::store::{RecordStore, StoreError};

#[derive(Default)]
struct MemoryState {
    values: HashMap<String, Vec<u8>>,
    value_order: Vec<String>,
    sets: HashMap<String, Vec<String>>,
    hashes: HashMap<String, BTreeMap<String, String>>,
}

/// Mutex-guarded in-process store
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    offline: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate losing (or regaining) the connection to the store
    ///
    /// While offline every operation fails with `StoreError::Unavailable`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of stored values
    pub fn value_count(&self) -> usize {
        self.lock().values.len()
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store is offline".to_string()));
        }
        Ok(self.lock())
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RecordStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.state()?.values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let mut state = self.state()?;
        if state.values.insert(key.to_string(), value.to_vec()).is_none() {
            state.value_order.push(key.to_string());
        }
        Ok(())
    }

    fn scan_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let state = self.state()?;
        Ok(state
            .value_order
            .iter()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn add_to_set(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut state = self.state()?;
        let members = state.sets.entry(key.to_string()).or_default();
        if members.iter().any(|m| m == member) {
            return Ok(false);
        }
        members.push(member.to_string());
        Ok(true)
    }

    fn remove_from_set(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut state = self.state()?;
        let Some(members) = state.sets.get_mut(key) else {
            return Ok(false);
        };
        let before = members.len();
        members.retain(|m| m != member);
        let removed = members.len() < before;
        if members.is_empty() {
            state.sets.remove(key);
        }
        Ok(removed)
    }

    fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        Ok(self.state()?.sets.get(key).cloned().unwrap_or_default())
    }

    fn set_fields(&self, key: &str, fields: &[(&str, String)]) -> Result<(), StoreError> {
        let mut state = self.state()?;
        let hash = state.hashes.entry(key.to_string()).or_default();
        for (field, value) in fields {
            hash.insert(field.to_string(), value.clone());
        }
        Ok(())
    }

    fn get_fields(&self, key: &str) -> Result<Vec<(String, String)>, StoreError> {
        Ok(self
            .state()?
            .hashes
            .get(key)
            .map(|h| h.iter().map(|(f, v)| (f.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    fn delete_key(&self, key: &str) -> Result<bool, StoreError> {
        let mut state = self.state()?;
        let had_value = state.values.remove(key).is_some();
        if had_value {
            state.value_order.retain(|k| k != key);
        }
        let had_set = state.sets.remove(key).is_some();
        let had_hash = state.hashes.remove(key).is_some();
        Ok(had_value || had_set || had_hash)
    }
}
