use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use super::{Scope, Storage, StorageError};
use crate::time::Timestamp;

/// In-memory storage implementation for testing and simulation
///
/// All state is wrapped in `Arc<Mutex<>>` so clones share one store, the way
/// several actors share one backend in production.
///
/// Writes can be made to fail with [`MemoryStorage::fail_writes`], or only
/// the writes that carry an alarm with [`MemoryStorage::fail_alarm_writes`],
/// to exercise the all-or-nothing contract of [`Storage::put`].
///
/// # Performance
///
/// - get / put: O(keys) per call
/// - delete_all: O(1)
/// - alarm operations: O(1)
#[derive(Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<Mutex<MemoryStorageInner>>,
}

#[derive(Default)]
struct MemoryStorageInner {
    /// Values and alarm per actor scope
    scopes: HashMap<Scope, ScopeSlot>,

    /// When set, every mutating call fails
    fail_writes: bool,

    /// When set, a `put` that carries an alarm fails
    fail_alarm_writes: bool,
}

#[derive(Default)]
struct ScopeSlot {
    values: BTreeMap<&'static str, Vec<u8>>,
    alarm: Option<Timestamp>,
}

impl ScopeSlot {
    fn is_empty(&self) -> bool {
        self.values.is_empty() && self.alarm.is_none()
    }
}

impl MemoryStorage {
    /// Create a new empty MemoryStorage
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail (or succeed again).
    pub fn fail_writes(&self, fail: bool) {
        self.lock_recovering().fail_writes = fail;
    }

    /// Make every subsequent `put` that sets an alarm fail (or succeed again).
    pub fn fail_alarm_writes(&self, fail: bool) {
        self.lock_recovering().fail_alarm_writes = fail;
    }

    /// Number of scopes holding any value or alarm.
    pub fn scope_count(&self) -> usize {
        self.lock_recovering().scopes.len()
    }

    /// Whether `scope` holds no value and no alarm.
    pub fn is_vacant(&self, scope: &Scope) -> bool {
        self.lock_recovering().scopes.get(scope).is_none_or(ScopeSlot::is_empty)
    }

    /// Keys currently stored under `scope`, in sorted order.
    pub fn keys(&self, scope: &Scope) -> Vec<&'static str> {
        self.lock_recovering()
            .scopes
            .get(scope)
            .map(|slot| slot.values.keys().copied().collect())
            .unwrap_or_default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryStorageInner>, StorageError> {
        self.inner.lock().map_err(|_| StorageError::Backend("memory store mutex poisoned".into()))
    }

    fn lock_recovering(&self) -> MutexGuard<'_, MemoryStorageInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_for_write(&self) -> Result<MutexGuard<'_, MemoryStorageInner>, StorageError> {
        let inner = self.lock()?;
        if inner.fail_writes {
            return Err(StorageError::Backend("injected write failure".into()));
        }
        Ok(inner)
    }
}

impl MemoryStorageInner {
    /// Apply `f` to the slot for `scope`, dropping the slot if it ends empty.
    fn with_slot<R>(&mut self, scope: &Scope, f: impl FnOnce(&mut ScopeSlot) -> R) -> R {
        let slot = self.scopes.entry(scope.clone()).or_default();
        let result = f(slot);
        if slot.is_empty() {
            self.scopes.remove(scope);
        }
        result
    }
}

impl Storage for MemoryStorage {
    fn get(&self, scope: &Scope, keys: &[&'static str]) -> Result<Vec<Option<Vec<u8>>>, StorageError> {
        let inner = self.lock()?;
        let slot = inner.scopes.get(scope);

        Ok(keys.iter().map(|key| slot.and_then(|s| s.values.get(key).cloned())).collect())
    }

    fn put(
        &self,
        scope: &Scope,
        entries: Vec<(&'static str, Vec<u8>)>,
        alarm: Option<Timestamp>,
    ) -> Result<(), StorageError> {
        let mut inner = self.lock_for_write()?;
        if alarm.is_some() && inner.fail_alarm_writes {
            return Err(StorageError::Backend("injected alarm write failure".into()));
        }

        inner.with_slot(scope, |slot| {
            slot.values.extend(entries);
            if alarm.is_some() {
                slot.alarm = alarm;
            }
        });
        Ok(())
    }

    fn delete_all(&self, scope: &Scope) -> Result<(), StorageError> {
        let mut inner = self.lock_for_write()?;
        inner.scopes.remove(scope);
        Ok(())
    }

    fn alarm(&self, scope: &Scope) -> Result<Option<Timestamp>, StorageError> {
        let inner = self.lock()?;
        Ok(inner.scopes.get(scope).and_then(|slot| slot.alarm))
    }
}
