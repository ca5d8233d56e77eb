// Client-local key-value persistence.
//
// Hosts keep two records across restarts: the whole `TimerState` (one JSON
// document under `timer-state`) and the room code (`roomCode`), so a device
// rejoins the same room and controllers keep working after a reload. The
// state machine never touches a store; `HostSync` hydrates from it once at
// startup and writes back after each mutation.
//
// `KeyValueStore` is the boundary. `MemoryStore` backs tests and hosts that
// do not persist; `FileStore` keeps one file per key in a directory and
// replaces files atomically (write to a temp file, then rename) so a crash
// mid-write leaves the previous value intact.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use dune_timer_prng::CodeRng;
use dune_timer_protocol::RoomCode;
use log::warn;
use thiserror::Error;

use crate::timer::TimerState;

pub const TIMER_STATE_KEY: &str = "timer-state";
pub const ROOM_CODE_KEY: &str = "roomCode";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("stored value is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid store key {0:?}")]
    InvalidKey(String),
}

pub trait KeyValueStore: Send {
    fn save(&mut self, key: &str, value: &str) -> Result<(), StoreError>;
    fn load(&self, key: &str) -> Result<Option<String>, StoreError>;
    /// Removing a missing key is not an error.
    fn remove(&mut self, key: &str) -> Result<(), StoreError>;
}

/// In-process store. Contents are lost when it is dropped.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    entries: BTreeMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn save(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.get(key).cloned())
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }
}

/// One file per key under a directory.
#[derive(Clone, Debug)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Keys become file names, so only `[A-Za-z0-9_-]` is accepted.
    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

impl KeyValueStore for FileStore {
    fn save(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.path_for(key)?;
        match fs::read_to_string(path) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

pub fn save_state(store: &mut dyn KeyValueStore, state: &TimerState) -> Result<(), StoreError> {
    let json = serde_json::to_string(state)?;
    store.save(TIMER_STATE_KEY, &json)
}

/// The persisted timer state, if any. A record that no longer parses is
/// an error; the caller decides whether to discard it.
pub fn load_state(store: &dyn KeyValueStore) -> Result<Option<TimerState>, StoreError> {
    match store.load(TIMER_STATE_KEY)? {
        Some(json) => Ok(Some(serde_json::from_str(&json)?)),
        None => Ok(None),
    }
}

/// The device's room code: the stored one if present and well-formed,
/// otherwise a freshly generated one, which is saved.
pub fn load_or_create_room_code(
    store: &mut dyn KeyValueStore,
    rng: &mut CodeRng,
) -> Result<RoomCode, StoreError> {
    if let Some(stored) = store.load(ROOM_CODE_KEY)? {
        match RoomCode::parse(&stored) {
            Ok(code) => return Ok(code),
            Err(e) => warn!("discarding stored room code {stored:?}: {e}"),
        }
    }
    let code = RoomCode::generate(rng);
    store.save(ROOM_CODE_KEY, code.as_str())?;
    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TimerConfig;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn scratch_dir() -> PathBuf {
        static NEXT: AtomicU32 = AtomicU32::new(0);
        std::env::temp_dir().join(format!(
            "dune-timer-store-test-{}-{}",
            std::process::id(),
            NEXT.fetch_add(1, Ordering::SeqCst)
        ))
    }

    fn exercise(store: &mut dyn KeyValueStore) {
        assert_eq!(store.load("roomCode").unwrap(), None);
        store.save("roomCode", "ABC123").unwrap();
        assert_eq!(store.load("roomCode").unwrap().as_deref(), Some("ABC123"));
        store.save("roomCode", "XYZ789").unwrap();
        assert_eq!(store.load("roomCode").unwrap().as_deref(), Some("XYZ789"));
        store.remove("roomCode").unwrap();
        store.remove("roomCode").unwrap();
        assert_eq!(store.load("roomCode").unwrap(), None);
    }

    #[test]
    fn memory_store_basics() {
        exercise(&mut MemoryStore::new());
    }

    #[test]
    fn file_store_basics_and_persistence() {
        let dir = scratch_dir();
        let mut store = FileStore::open(&dir).unwrap();
        exercise(&mut store);

        store.save("timer-state", "{}").unwrap();
        let reopened = FileStore::open(&dir).unwrap();
        assert_eq!(reopened.load("timer-state").unwrap().as_deref(), Some("{}"));
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn file_store_rejects_path_like_keys() {
        let dir = scratch_dir();
        let mut store = FileStore::open(&dir).unwrap();
        for key in ["", "../escape", "a/b", "dot.ted"] {
            assert!(matches!(
                store.save(key, "x"),
                Err(StoreError::InvalidKey(_))
            ));
        }
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn timer_state_survives_a_store_round_trip() {
        let mut store = MemoryStore::new();
        assert!(load_state(&store).unwrap().is_none());
        let mut state = TimerState::from_config(&TimerConfig::default());
        state.current_round = 4;
        state.players[2].total_efficiency = -35;
        save_state(&mut store, &state).unwrap();
        assert_eq!(load_state(&store).unwrap(), Some(state));
    }

    #[test]
    fn corrupt_state_is_reported() {
        let mut store = MemoryStore::new();
        store.save(TIMER_STATE_KEY, "{not json").unwrap();
        assert!(matches!(load_state(&store), Err(StoreError::Json(_))));
    }

    #[test]
    fn room_code_is_generated_once_then_reused() {
        let mut store = MemoryStore::new();
        let mut rng = CodeRng::new(7);
        let first = load_or_create_room_code(&mut store, &mut rng).unwrap();
        assert_eq!(store.load(ROOM_CODE_KEY).unwrap().as_deref(), Some(first.as_str()));
        let again = load_or_create_room_code(&mut store, &mut rng).unwrap();
        assert_eq!(first, again);
    }

    #[test]
    fn malformed_room_code_is_replaced() {
        let mut store = MemoryStore::new();
        store.save(ROOM_CODE_KEY, "no!").unwrap();
        let code = load_or_create_room_code(&mut store, &mut CodeRng::new(1)).unwrap();
        assert_eq!(code.as_str().len(), 6);
        assert_eq!(store.load(ROOM_CODE_KEY).unwrap().as_deref(), Some(code.as_str()));
    }
}
