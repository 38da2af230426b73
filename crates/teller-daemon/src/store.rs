//! Durable action store.
//!
//! [`ActionStore`] is the injected persistence abstraction shared by the
//! registry, the request paths, and the background expiry sweep. Every
//! trait method is one atomic section: the mutation and its durability
//! flush happen under a single lock, and no await point exists inside.
//! That single rule is what makes the sweep safe to interleave with
//! create/validate/reserve at any time.
//!
//! [`FileBackedActionStore`] persists the whole map as a JSON snapshot
//! after every mutation: write to a temp sibling, fsync, rename over the
//! snapshot. An exclusive `flock` on a sidecar lock file is held for the
//! store's lifetime so two daemon instances cannot corrupt each other's
//! snapshot. On open, the snapshot is replayed and already-expired
//! records are discarded.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use fs2::FileExt;
use teller_core::{ActionId, PreConfiguredAction};

// =============================================================================
// Errors and outcomes
// =============================================================================

/// Store failures. All of these are infrastructure faults from the
/// caller's perspective: no business state is lost, the operation can be
/// retried.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StoreError {
    /// Snapshot read/write/fsync failure.
    #[error("store i/o failed: {0}")]
    Io(#[from] std::io::Error),

    /// The snapshot on disk could not be parsed.
    #[error("corrupt action snapshot at {path}: {reason}")]
    Corrupt {
        /// Snapshot path.
        path: PathBuf,
        /// Parse failure description.
        reason: String,
    },

    /// Another process holds the store lock.
    #[error("action store at {path} is locked by another process")]
    Locked {
        /// Snapshot path.
        path: PathBuf,
    },
}

/// Result of a conditional [`ActionStore::update`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// No record under that id.
    Missing,
    /// The closure declined to mutate; record returned as-is.
    Unchanged(PreConfiguredAction),
    /// The mutation was applied and flushed; updated record returned.
    Updated(PreConfiguredAction),
}

// =============================================================================
// ActionStore
// =============================================================================

/// Keyed collection of [`PreConfiguredAction`] records.
///
/// `update` is the atomic compare-and-mutate primitive the registry's
/// reserve path is built on: the closure observes the current record and
/// either mutates it (returning `true`) or declines (returning `false`),
/// all inside the store lock. This is how at-most-`max_uses` holds under
/// concurrent redemption.
pub trait ActionStore: Send + Sync {
    /// Inserts a new record and flushes.
    fn insert(&self, action: PreConfiguredAction) -> Result<(), StoreError>;

    /// Returns a copy of the record, if present. No mutation.
    fn get(&self, id: &ActionId) -> Result<Option<PreConfiguredAction>, StoreError>;

    /// Atomically inspects and conditionally mutates one record.
    fn update(
        &self,
        id: &ActionId,
        mutate: &mut dyn FnMut(&mut PreConfiguredAction) -> bool,
    ) -> Result<UpdateOutcome, StoreError>;

    /// Removes one record, returning it if it existed.
    fn remove(&self, id: &ActionId) -> Result<Option<PreConfiguredAction>, StoreError>;

    /// Atomically removes every record matching `pred`, returning the
    /// removed records.
    fn remove_where(
        &self,
        pred: &mut dyn FnMut(&PreConfiguredAction) -> bool,
    ) -> Result<Vec<PreConfiguredAction>, StoreError>;

    /// Visits every record. Read-only.
    fn scan(&self, visit: &mut dyn FnMut(&PreConfiguredAction)) -> Result<(), StoreError>;

    /// Number of stored records.
    fn len(&self) -> Result<usize, StoreError>;

    /// True when no records are stored.
    fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }
}

// =============================================================================
// FileBackedActionStore
// =============================================================================

/// JSON-snapshot store with single-writer process exclusivity.
pub struct FileBackedActionStore {
    path: PathBuf,
    // Held open for the store lifetime; the flock releases on drop.
    _lock_file: File,
    inner: Mutex<HashMap<ActionId, PreConfiguredAction>>,
}

impl std::fmt::Debug for FileBackedActionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileBackedActionStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl FileBackedActionStore {
    /// Opens (or creates) the store at `path`, discarding records that
    /// were already expired at `now`.
    ///
    /// # Errors
    ///
    /// [`StoreError::Locked`] if another process holds the store,
    /// [`StoreError::Corrupt`] if the snapshot fails to parse,
    /// [`StoreError::Io`] for filesystem failures.
    pub fn open(path: impl AsRef<Path>, now: DateTime<Utc>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        let lock_path = lock_path_for(&path);
        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(StoreError::Locked { path });
        }

        let mut map: HashMap<ActionId, PreConfiguredAction> = if path.exists() {
            let bytes = std::fs::read(&path)?;
            if bytes.is_empty() {
                HashMap::new()
            } else {
                serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt {
                    path: path.clone(),
                    reason: e.to_string(),
                })?
            }
        } else {
            HashMap::new()
        };

        let before = map.len();
        map.retain(|_, action| !action.is_expired(now));
        let dropped = before - map.len();

        let store = Self {
            path,
            _lock_file: lock_file,
            inner: Mutex::new(map),
        };
        if dropped > 0 {
            tracing::info!(dropped, "discarded expired actions at store open");
            let inner = store.inner.lock().expect("store lock poisoned");
            store.flush(&inner)?;
        }
        Ok(store)
    }

    /// Writes the snapshot durably: temp sibling, fsync, atomic rename.
    fn flush(&self, map: &HashMap<ActionId, PreConfiguredAction>) -> Result<(), StoreError> {
        let tmp_path = self.path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(map).map_err(|e| StoreError::Corrupt {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;
        let mut tmp = File::create(&tmp_path)?;
        tmp.write_all(&bytes)?;
        tmp.sync_all()?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

fn lock_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().map_or_else(
        || std::ffi::OsString::from("actions"),
        std::ffi::OsStr::to_os_string,
    );
    name.push(".lock");
    path.with_file_name(name)
}

impl ActionStore for FileBackedActionStore {
    fn insert(&self, action: PreConfiguredAction) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        inner.insert(action.id.clone(), action);
        self.flush(&inner)
    }

    fn get(&self, id: &ActionId) -> Result<Option<PreConfiguredAction>, StoreError> {
        let inner = self.inner.lock().expect("store lock poisoned");
        Ok(inner.get(id).cloned())
    }

    fn update(
        &self,
        id: &ActionId,
        mutate: &mut dyn FnMut(&mut PreConfiguredAction) -> bool,
    ) -> Result<UpdateOutcome, StoreError> {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        let Some(action) = inner.get_mut(id) else {
            return Ok(UpdateOutcome::Missing);
        };
        if !mutate(action) {
            return Ok(UpdateOutcome::Unchanged(action.clone()));
        }
        let updated = action.clone();
        self.flush(&inner)?;
        Ok(UpdateOutcome::Updated(updated))
    }

    fn remove(&self, id: &ActionId) -> Result<Option<PreConfiguredAction>, StoreError> {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        let removed = inner.remove(id);
        if removed.is_some() {
            self.flush(&inner)?;
        }
        Ok(removed)
    }

    fn remove_where(
        &self,
        pred: &mut dyn FnMut(&PreConfiguredAction) -> bool,
    ) -> Result<Vec<PreConfiguredAction>, StoreError> {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        let doomed: Vec<ActionId> = inner
            .values()
            .filter(|a| pred(a))
            .map(|a| a.id.clone())
            .collect();
        let mut removed = Vec::with_capacity(doomed.len());
        for id in doomed {
            if let Some(action) = inner.remove(&id) {
                removed.push(action);
            }
        }
        if !removed.is_empty() {
            self.flush(&inner)?;
        }
        Ok(removed)
    }

    fn scan(&self, visit: &mut dyn FnMut(&PreConfiguredAction)) -> Result<(), StoreError> {
        let inner = self.inner.lock().expect("store lock poisoned");
        for action in inner.values() {
            visit(action);
        }
        Ok(())
    }

    fn len(&self) -> Result<usize, StoreError> {
        Ok(self.inner.lock().expect("store lock poisoned").len())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use teller_core::{ActionKind, Amount, NewAction};

    use super::*;

    fn sample_action(ttl: Duration) -> PreConfiguredAction {
        PreConfiguredAction::from_new(
            &NewAction {
                owner_key: "guardian-1".to_string(),
                display_card_number: None,
                display_name: None,
                kind: ActionKind::Deposit {
                    amount: Amount::from_major(10),
                },
                description: String::new(),
                max_uses: None,
                ttl: Some(ttl),
            },
            Utc::now(),
        )
    }

    #[test]
    fn test_insert_get_remove_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBackedActionStore::open(dir.path().join("actions.json"), Utc::now())
            .unwrap();

        let action = sample_action(Duration::days(1));
        let id = action.id.clone();
        store.insert(action.clone()).unwrap();
        assert_eq!(store.get(&id).unwrap(), Some(action));
        assert_eq!(store.len().unwrap(), 1);
        assert!(store.remove(&id).unwrap().is_some());
        assert!(store.get(&id).unwrap().is_none());
    }

    #[test]
    fn test_snapshot_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("actions.json");
        let action = sample_action(Duration::days(1));
        let id = action.id.clone();

        {
            let store = FileBackedActionStore::open(&path, Utc::now()).unwrap();
            store.insert(action.clone()).unwrap();
        }

        let store = FileBackedActionStore::open(&path, Utc::now()).unwrap();
        assert_eq!(store.get(&id).unwrap(), Some(action));
    }

    #[test]
    fn test_reopen_discards_expired_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("actions.json");
        let live = sample_action(Duration::days(1));
        let dead = sample_action(Duration::milliseconds(-1));
        let live_id = live.id.clone();
        let dead_id = dead.id.clone();

        {
            let store = FileBackedActionStore::open(&path, Utc::now()).unwrap();
            store.insert(live).unwrap();
            store.insert(dead).unwrap();
        }

        let store = FileBackedActionStore::open(&path, Utc::now()).unwrap();
        assert!(store.get(&live_id).unwrap().is_some());
        assert!(store.get(&dead_id).unwrap().is_none());
    }

    #[test]
    fn test_second_open_is_locked_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("actions.json");
        let _store = FileBackedActionStore::open(&path, Utc::now()).unwrap();
        assert!(matches!(
            FileBackedActionStore::open(&path, Utc::now()),
            Err(StoreError::Locked { .. })
        ));
    }

    #[test]
    fn test_update_outcomes() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBackedActionStore::open(dir.path().join("actions.json"), Utc::now())
            .unwrap();
        let action = sample_action(Duration::days(1));
        let id = action.id.clone();
        store.insert(action).unwrap();

        let declined = store.update(&id, &mut |_| false).unwrap();
        assert!(matches!(declined, UpdateOutcome::Unchanged(_)));

        let applied = store
            .update(&id, &mut |a| {
                a.current_uses += 1;
                true
            })
            .unwrap();
        match applied {
            UpdateOutcome::Updated(a) => assert_eq!(a.current_uses, 1),
            other => panic!("expected Updated, got {other:?}"),
        }

        let missing = store
            .update(&ActionId::from_string("unknown"), &mut |_| true)
            .unwrap();
        assert_eq!(missing, UpdateOutcome::Missing);
    }

    #[test]
    fn test_remove_where_removes_matches_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBackedActionStore::open(dir.path().join("actions.json"), Utc::now())
            .unwrap();
        let keep = sample_action(Duration::days(2));
        let drop_me = sample_action(Duration::milliseconds(-1));
        let keep_id = keep.id.clone();
        store.insert(keep).unwrap();
        store.insert(drop_me).unwrap();

        let now = Utc::now();
        let removed = store.remove_where(&mut |a| a.is_expired(now)).unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(store.len().unwrap(), 1);
        assert!(store.get(&keep_id).unwrap().is_some());
    }
}
