//! Session implementations.
//!
//! [`MemoryStore`] keeps a committed snapshot and a working copy; reads see
//! the working copy, `commit` promotes it and `rollback` discards it.
//! [`JsonFileStore`] adds durability by rewriting a JSON file on every commit.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::contract::{ItemFilter, Session};
use crate::error::StoreError;
use crate::model::{Item, Publish};

/// Everything a store holds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub publishes: Vec<Publish>,
    #[serde(default)]
    pub items: Vec<Item>,
}

#[derive(Debug, Default)]
struct StoreState {
    committed: Snapshot,
    working: Snapshot,
}

/// In-process session store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        Self {
            state: Mutex::new(StoreState {
                committed: snapshot.clone(),
                working: snapshot,
            }),
        }
    }

    /// The last committed state.
    pub fn committed(&self) -> Snapshot {
        self.lock().committed.clone()
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Session for MemoryStore {
    fn publish(&self, id: Uuid) -> Result<Option<Publish>, StoreError> {
        Ok(self
            .lock()
            .working
            .publishes
            .iter()
            .find(|publish| publish.id == id)
            .cloned())
    }

    fn items(&self, publish_id: Uuid, filter: &ItemFilter) -> Result<Vec<Item>, StoreError> {
        Ok(self
            .lock()
            .working
            .items
            .iter()
            .filter(|item| item.publish_id == publish_id && filter.matches(item))
            .cloned()
            .collect())
    }

    fn save_publish(&self, publish: &Publish) -> Result<(), StoreError> {
        let mut state = self.lock();
        let publishes = &mut state.working.publishes;
        match publishes.iter_mut().find(|p| p.id == publish.id) {
            Some(existing) => *existing = publish.clone(),
            None => publishes.push(publish.clone()),
        }
        Ok(())
    }

    fn add_item(&self, item: Item) -> Result<(), StoreError> {
        let mut state = self.lock();
        if !state.working.publishes.iter().any(|p| p.id == item.publish_id) {
            return Err(StoreError::Unavailable(format!(
                "item {} refers to unknown publish {}",
                item.id, item.publish_id
            )));
        }
        let items = &mut state.working.items;
        match items.iter_mut().find(|existing| existing.id == item.id) {
            Some(existing) => *existing = item,
            None => items.push(item),
        }
        Ok(())
    }

    fn remove_publish(&self, id: Uuid) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.working.publishes.retain(|p| p.id != id);
        state.working.items.retain(|item| item.publish_id != id);
        Ok(())
    }

    fn commit(&self) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.committed = state.working.clone();
        Ok(())
    }

    fn rollback(&self) {
        let mut state = self.lock();
        state.working = state.committed.clone();
    }
}

/// Session store persisted as a JSON document.
#[derive(Debug)]
pub struct JsonFileStore {
    inner: MemoryStore,
    path: PathBuf,
}

impl JsonFileStore {
    /// Open the store at `path`. A missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let snapshot = if path.exists() {
            let content = fs::read_to_string(&path)?;
            serde_json::from_str(&content)?
        } else {
            Snapshot::default()
        };
        info!(
            path = %path.display(),
            publishes = snapshot.publishes.len(),
            items = snapshot.items.len(),
            "[STORE] Opened JSON store"
        );
        Ok(Self {
            inner: MemoryStore::from_snapshot(snapshot),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_snapshot(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        // Write beside the target and rename, so readers never see a torn file.
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut tmp, snapshot)?;
        tmp.write_all(b"\n")?;
        tmp.persist(&self.path).map_err(|e| StoreError::Io(e.error))?;
        debug!(path = %self.path.display(), "[STORE] Snapshot written");
        Ok(())
    }
}

impl Session for JsonFileStore {
    fn publish(&self, id: Uuid) -> Result<Option<Publish>, StoreError> {
        self.inner.publish(id)
    }

    fn items(&self, publish_id: Uuid, filter: &ItemFilter) -> Result<Vec<Item>, StoreError> {
        self.inner.items(publish_id, filter)
    }

    fn save_publish(&self, publish: &Publish) -> Result<(), StoreError> {
        self.inner.save_publish(publish)
    }

    fn add_item(&self, item: Item) -> Result<(), StoreError> {
        self.inner.add_item(item)
    }

    fn remove_publish(&self, id: Uuid) -> Result<(), StoreError> {
        self.inner.remove_publish(id)
    }

    fn commit(&self) -> Result<(), StoreError> {
        let mut state = self.inner.lock();
        self.write_snapshot(&state.working)?;
        state.committed = state.working.clone();
        Ok(())
    }

    fn rollback(&self) {
        self.inner.rollback()
    }
}
