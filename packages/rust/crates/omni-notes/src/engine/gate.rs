//! Per-note mutation gate.
//!
//! Mutations of the same note id run one at a time; different ids proceed in
//! parallel. Writers also take a location key for the `(vault, fname)` they
//! touch, so two ids cannot claim the same file at once. Entries are dropped
//! once no task holds or waits for them.

use crate::model::fname_key;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use tokio::sync::{Mutex, OwnedMutexGuard};

type GateMap = Arc<StdMutex<HashMap<String, Arc<GateEntry>>>>;

#[derive(Debug, Default)]
struct GateEntry {
    lock: Arc<Mutex<()>>,
    permits: AtomicUsize,
}

/// Serializes mutations per note id.
#[derive(Debug, Clone, Default)]
pub struct NoteGate {
    inner: GateMap,
}

/// Held while a note id is being mutated.
#[derive(Debug)]
pub struct NoteGuard {
    _lock: OwnedMutexGuard<()>,
    _permit: GatePermit,
}

#[derive(Debug)]
struct GatePermit {
    id: String,
    inner: GateMap,
    entry: Arc<GateEntry>,
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        let previous = self.entry.permits.fetch_sub(1, Ordering::AcqRel);
        if previous != 1 {
            return;
        }
        let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let idle = map
            .get(&self.id)
            .is_some_and(|current| Arc::ptr_eq(current, &self.entry))
            && self.entry.permits.load(Ordering::Acquire) == 0;
        if idle {
            map.remove(&self.id);
        }
    }
}

impl NoteGate {
    /// Wait for exclusive access to `id`.
    pub async fn acquire(&self, id: &str) -> NoteGuard {
        let entry = {
            let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(map.entry(id.to_string()).or_default())
        };
        entry.permits.fetch_add(1, Ordering::AcqRel);
        // The permit exists before awaiting so a waiter keeps the entry alive.
        let permit = GatePermit {
            id: id.to_string(),
            inner: Arc::clone(&self.inner),
            entry: Arc::clone(&entry),
        };
        let lock = Arc::clone(&entry.lock).lock_owned().await;
        NoteGuard {
            _lock: lock,
            _permit: permit,
        }
    }

    /// Acquire several ids in sorted order (avoids lock-order deadlocks).
    pub async fn acquire_many(&self, ids: &[String]) -> Vec<NoteGuard> {
        let mut sorted: Vec<&String> = ids.iter().collect();
        sorted.sort();
        sorted.dedup();
        let mut guards = Vec::with_capacity(sorted.len());
        for id in sorted {
            guards.push(self.acquire(id).await);
        }
        guards
    }

    /// Acquire `keys`, then let `settle` recompute the keys it needs under the gate.
    ///
    /// Returns once every recomputed key is already held; otherwise the guards
    /// are released and the recomputed set is acquired instead. Gives up after
    /// `max_attempts` rounds with `None`.
    pub async fn acquire_settled<T, E>(
        &self,
        mut keys: Vec<String>,
        max_attempts: usize,
        mut settle: impl FnMut() -> Result<(Vec<String>, T), E>,
    ) -> Result<Option<(Vec<NoteGuard>, T)>, E> {
        for _ in 0..max_attempts {
            let guards = self.acquire_many(&keys).await;
            let (needed, value) = settle()?;
            if needed.iter().all(|key| keys.contains(key)) {
                return Ok(Some((guards, value)));
            }
            drop(guards);
            keys = needed;
        }
        Ok(None)
    }

    /// Ids currently held or awaited.
    #[must_use]
    pub fn active(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Gate key for the file slot `(vault, fname)`; fnames compare case-insensitively.
#[must_use]
pub fn location_key(vault: &str, fname: &str) -> String {
    format!("loc:{vault}/{}", fname_key(fname))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_id_is_serialized() {
        let gate = NoteGate::default();
        let first = gate.acquire("a").await;
        let other = gate.acquire("b").await;

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move {
                let _guard = gate.acquire("a").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(first);
        assert!(tokio::time::timeout(Duration::from_secs(1), waiter).await.is_ok());
        drop(other);
        assert_eq!(gate.active(), 0);
    }

    #[test]
    fn test_location_key_folds_case() {
        assert_eq!(location_key("main", "Proj.Alpha"), location_key("main", "proj.alpha"));
        assert_ne!(location_key("main", "proj"), location_key("other", "proj"));
    }

    #[tokio::test]
    async fn test_settled_reacquires_when_keys_grow() -> Result<(), Box<dyn std::error::Error>> {
        let gate = NoteGate::default();
        let mut rounds = 0;
        let settled = gate
            .acquire_settled(vec!["a".to_string()], 4, || {
                rounds += 1;
                Ok::<_, std::convert::Infallible>((vec!["a".to_string(), "b".to_string()], rounds))
            })
            .await?;
        let (guards, value) = settled.ok_or("did not settle")?;
        assert_eq!(value, 2);
        assert_eq!(guards.len(), 2);
        assert_eq!(gate.active(), 2);
        drop(guards);
        assert_eq!(gate.active(), 0);

        let mut moving = 0;
        let never = gate
            .acquire_settled(vec![], 3, || {
                moving += 1;
                Ok::<_, std::convert::Infallible>((vec![format!("k{moving}")], ()))
            })
            .await?;
        assert!(never.is_none());
        Ok(())
    }
}
