// Request bookkeeping
//
// Maps cache keys to live request ids and request ids to their records.
// The store never talks to the virtual machine; callers retract native
// requests themselves.

use crate::arguments::{RequestArgumentSet, RequestKey};
use crate::error::{JdiError, JdiResult};
use crate::types::{NativeRequestId, RequestId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestRecord {
    pub request_id: RequestId,
    pub cache_key: RequestKey,
    pub arguments: RequestArgumentSet,
    pub is_pending: bool,
    pub native_id: Option<NativeRequestId>,
}

impl RequestRecord {
    pub fn active(request_id: RequestId, arguments: RequestArgumentSet, native_id: NativeRequestId) -> Self {
        Self {
            request_id,
            cache_key: arguments.cache_key(),
            arguments,
            is_pending: false,
            native_id: Some(native_id),
        }
    }

    pub fn pending(request_id: RequestId, arguments: RequestArgumentSet) -> Self {
        Self {
            request_id,
            cache_key: arguments.cache_key(),
            arguments,
            is_pending: true,
            native_id: None,
        }
    }
}

#[derive(Debug, Default)]
struct Records {
    by_key: HashMap<RequestKey, RequestId>,
    by_id: HashMap<RequestId, RequestRecord>,
}

impl Records {
    fn remove(&mut self, request_id: &RequestId) -> Option<RequestRecord> {
        let record = self.by_id.remove(request_id)?;
        if self.by_key.get(&record.cache_key) == Some(request_id) {
            self.by_key.remove(&record.cache_key);
        }
        Some(record)
    }
}

type KeyLocks = Mutex<HashMap<RequestKey, Arc<tokio::sync::Mutex<()>>>>;

#[derive(Debug, Default)]
pub struct RequestStore {
    records: Mutex<Records>,
    key_locks: Arc<KeyLocks>,
}

/// Holds the lock of one cache key. The key's entry is dropped from the
/// lock table once nobody holds or waits for it.
#[derive(Debug)]
pub struct KeyGuard {
    key: RequestKey,
    locks: Arc<KeyLocks>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        self.guard.take();

        let mut locks = lock(&self.locks);
        // Only the table's own reference left
        if locks.get(&self.key).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(&self.key);
        }
    }
}

/// Lock a std mutex, recovering the data if a holder panicked
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        warn!("request store mutex was poisoned, recovering");
        poisoned.into_inner()
    })
}

impl RequestStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialise check-then-create for one cache key.
    /// Hold the guard across the lookup and the native submission.
    pub async fn lock_key(&self, key: &RequestKey) -> KeyGuard {
        let key_lock = lock(&self.key_locks)
            .entry(key.clone())
            .or_default()
            .clone();

        // Declared before the wait so a cancelled wait drops the lock's
        // reference first and then prunes the entry
        let mut guard = KeyGuard {
            key: key.clone(),
            locks: self.key_locks.clone(),
            guard: None,
        };
        let acquire = key_lock.lock_owned();
        guard.guard = Some(acquire.await);
        guard
    }

    /// Cache keys currently locked or waited on
    #[cfg(test)]
    pub(crate) fn key_lock_count(&self) -> usize {
        lock(&self.key_locks).len()
    }

    /// True if a live record shares this set's cache key
    pub fn has_request(&self, arguments: &RequestArgumentSet) -> bool {
        lock(&self.records).by_key.contains_key(&arguments.cache_key())
    }

    pub fn has_request_with_id(&self, request_id: &RequestId) -> bool {
        lock(&self.records).by_id.contains_key(request_id)
    }

    pub fn request_id_for(&self, key: &RequestKey) -> Option<RequestId> {
        lock(&self.records).by_key.get(key).cloned()
    }

    pub fn new_request(&self, record: RequestRecord) -> JdiResult<()> {
        let mut records = lock(&self.records);

        if records.by_id.contains_key(&record.request_id) {
            return Err(JdiError::DuplicateRequest(record.request_id));
        }

        debug!(
            "Storing request {} for {} (pending={})",
            record.request_id, record.cache_key.target, record.is_pending
        );
        records.by_key.insert(record.cache_key.clone(), record.request_id.clone());
        records.by_id.insert(record.request_id.clone(), record);

        Ok(())
    }

    pub fn retrieve_request_info(&self, request_id: &RequestId) -> Option<RequestRecord> {
        lock(&self.records).by_id.get(request_id).cloned()
    }

    /// Promote a pending record once its native request exists
    pub fn mark_active(&self, request_id: &RequestId, native_id: NativeRequestId) -> bool {
        match lock(&self.records).by_id.get_mut(request_id) {
            Some(record) => {
                record.is_pending = false;
                record.native_id = Some(native_id);
                true
            }
            None => false,
        }
    }

    /// Demote an active record back to pending. Returns false if the
    /// record is gone.
    pub fn mark_pending(&self, request_id: &RequestId) -> bool {
        match lock(&self.records).by_id.get_mut(request_id) {
            Some(record) => {
                record.is_pending = true;
                record.native_id = None;
                true
            }
            None => false,
        }
    }

    pub fn remove_request_by_id(&self, request_id: &RequestId) -> bool {
        self.take_request(request_id).is_some()
    }

    pub fn take_request(&self, request_id: &RequestId) -> Option<RequestRecord> {
        let record = lock(&self.records).remove(request_id);
        if let Some(record) = &record {
            debug!("Removed request {} for {}", request_id, record.cache_key.target);
        }
        record
    }

    /// Drop every active record, leaving pending ones queued
    pub fn remove_active(&self) -> Vec<RequestRecord> {
        let mut records = lock(&self.records);

        let active: Vec<RequestId> = records
            .by_id
            .values()
            .filter(|r| !r.is_pending)
            .map(|r| r.request_id.clone())
            .collect();

        active.iter().filter_map(|id| records.remove(id)).collect()
    }

    pub fn records(&self) -> Vec<RequestRecord> {
        lock(&self.records).by_id.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.records).by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
