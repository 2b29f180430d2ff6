//! Keyed persistence for session snapshots.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

use crate::models::game_state::SessionSnapshot;
use crate::models::lock;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("store encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
}

pub trait SnapshotStore: Send + Sync {
    fn save(&self, code: &str, snapshot: &SessionSnapshot) -> Result<(), StoreError>;
    fn load(&self, code: &str) -> Result<Option<SessionSnapshot>, StoreError>;
}

/// All snapshots in one pretty-printed JSON object keyed by session code.
pub struct JsonFileStore {
    path: PathBuf,
    // serializes read-modify-write cycles within this process
    guard: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            guard: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing or unreadable file reads as an empty store.
    fn read_all(&self) -> HashMap<String, SessionSnapshot> {
        fs::read_to_string(&self.path)
            .ok()
            .and_then(|text| serde_json::from_str(&text).ok())
            .unwrap_or_default()
    }
}

impl SnapshotStore for JsonFileStore {
    fn save(&self, code: &str, snapshot: &SessionSnapshot) -> Result<(), StoreError> {
        let _guard = lock(&self.guard);
        let mut all = self.read_all();
        all.insert(code.to_string(), snapshot.clone());
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(&self.path, serde_json::to_string_pretty(&all)?)?;
        Ok(())
    }

    fn load(&self, code: &str) -> Result<Option<SessionSnapshot>, StoreError> {
        let _guard = lock(&self.guard);
        Ok(self.read_all().remove(code))
    }
}

#[derive(Default)]
pub struct MemoryStore {
    snapshots: Mutex<HashMap<String, SessionSnapshot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for MemoryStore {
    fn save(&self, code: &str, snapshot: &SessionSnapshot) -> Result<(), StoreError> {
        lock(&self.snapshots).insert(code.to_string(), snapshot.clone());
        Ok(())
    }

    fn load(&self, code: &str) -> Result<Option<SessionSnapshot>, StoreError> {
        Ok(lock(&self.snapshots).get(code).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::game_state::GameSession;
    use crate::game::clock::ManualTime;
    use std::sync::Arc;

    fn sample(code: &str) -> SessionSnapshot {
        let mut session = GameSession::with_time_source(
            code,
            300_000,
            0,
            Arc::new(ManualTime::new(0)),
        );
        session.apply_move("e2e4").expect("legal");
        session.snapshot()
    }

    #[test]
    fn file_store_round_trips_by_code() {
        let path = std::env::temp_dir()
            .join(format!("chess-store-{}", uuid::Uuid::new_v4()))
            .join("games.json");
        let store = JsonFileStore::new(&path);

        assert!(store.load("ABC123").expect("load").is_none());

        let first = sample("ABC123");
        let second = sample("XYZ789");
        store.save("ABC123", &first).expect("save");
        store.save("XYZ789", &second).expect("save");

        assert_eq!(store.load("ABC123").expect("load"), Some(first));
        assert_eq!(store.load("XYZ789").expect("load"), Some(second));

        let _ = fs::remove_dir_all(path.parent().expect("parent"));
    }

    #[test]
    fn corrupt_file_reads_as_empty() {
        let path = std::env::temp_dir().join(format!("chess-store-{}.json", uuid::Uuid::new_v4()));
        fs::write(&path, "{ not json").expect("write");
        let store = JsonFileStore::new(&path);
        assert!(store.load("ANY").expect("load").is_none());

        store.save("ANY", &sample("ANY")).expect("save overwrites");
        assert!(store.load("ANY").expect("load").is_some());
        let _ = fs::remove_file(path);
    }

    #[test]
    fn memory_store_keeps_latest() {
        let store = MemoryStore::new();
        store.save("K", &sample("K")).expect("save");
        assert_eq!(store.load("K").expect("load").map(|s| s.moves.len()), Some(1));
        assert!(store.load("missing").expect("load").is_none());
    }
}
