//! Persisted state: credential, destination and the manual-stop flag.
//!
//! Stored as JSON, written atomically (tmp file, then rename) with
//! owner-only permissions. Saving is best-effort: a failure is logged and
//! never aborts the operation that triggered it.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use courier_channel::DestinationStore;
use courier_types::{CourierError, Credential, PersistedState};

/// JSON file holding a [`PersistedState`].
#[derive(Debug, Clone)]
pub struct JsonStateStore {
    path: PathBuf,
}

impl JsonStateStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the state; missing or unreadable files yield defaults.
    pub fn load(&self) -> PersistedState {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %self.path.display(), "no state file, starting with defaults");
                return PersistedState::default();
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to read state file, using defaults");
                return PersistedState::default();
            }
        };
        match serde_json::from_str(&content) {
            Ok(state) => state,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to parse state file, using defaults");
                PersistedState::default()
            }
        }
    }

    pub fn save(&self, state: &PersistedState) -> Result<(), CourierError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                CourierError::ConfigPersistence(format!("failed to create state dir: {e}"))
            })?;
        }

        let json = serde_json::to_string_pretty(state)
            .map_err(|e| CourierError::ConfigPersistence(format!("failed to serialize state: {e}")))?;

        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &json)
            .map_err(|e| CourierError::ConfigPersistence(format!("failed to write state tmp: {e}")))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(0o600)).map_err(
                |e| CourierError::ConfigPersistence(format!("failed to restrict state file: {e}")),
            )?;
        }

        std::fs::rename(&tmp_path, &self.path)
            .map_err(|e| CourierError::ConfigPersistence(format!("failed to rename state file: {e}")))?;
        Ok(())
    }
}

/// The in-memory copy of the persisted state, shared by the supervisor and
/// the forwarder. Every change is written through to the store.
#[derive(Debug)]
pub struct Settings {
    store: JsonStateStore,
    state: Mutex<PersistedState>,
}

impl Settings {
    pub fn load(store: JsonStateStore) -> Self {
        let state = store.load();
        debug!(
            has_credential = state.credential.is_some(),
            has_destination = state.destination.is_some(),
            manually_stopped = state.manually_stopped,
            "state loaded"
        );
        Self {
            store,
            state: Mutex::new(state),
        }
    }

    pub fn snapshot(&self) -> PersistedState {
        self.state.lock().clone()
    }

    /// Remember the credential of a manual start and clear the stop flag.
    pub fn record_start(&self, credential: &Credential) {
        self.modify(|s| {
            s.credential = Some(credential.clone());
            s.manually_stopped = false;
        });
    }

    pub fn set_manually_stopped(&self, stopped: bool) {
        self.modify(|s| s.manually_stopped = stopped);
    }

    fn modify(&self, change: impl FnOnce(&mut PersistedState)) {
        let mut state = self.state.lock();
        let before = state.clone();
        change(&mut state);
        if *state == before {
            return;
        }
        if let Err(e) = self.store.save(&state) {
            warn!(path = %self.store.path().display(), error = %e, "failed to save state");
        }
    }
}

impl DestinationStore for Settings {
    fn destination(&self) -> Option<String> {
        self.state.lock().destination.clone()
    }

    fn set_destination(&self, destination: String) {
        info!(destination = %destination, "forwarding destination updated");
        self.modify(|s| s.destination = Some(destination));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &tempfile::TempDir) -> JsonStateStore {
        JsonStateStore::new(dir.path().join("state.json"))
    }

    #[test]
    fn missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(store_in(&dir).load(), PersistedState::default());
    }

    #[test]
    fn corrupt_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::write(store.path(), "{ not json").unwrap();
        assert_eq!(store.load(), PersistedState::default());
    }

    #[test]
    fn blank_credential_is_rejected_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::write(store.path(), r#"{"credential": "  ", "manually_stopped": true}"#).unwrap();
        assert_eq!(store.load(), PersistedState::default());
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let state = PersistedState {
            credential: Some(Credential::parse("abc").unwrap()),
            destination: Some("123".into()),
            manually_stopped: true,
        };
        store.save(&state).unwrap();
        assert_eq!(store.load(), state);
        assert!(!dir.path().join("state.json.tmp").exists());
    }

    #[cfg(unix)]
    #[test]
    fn state_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.save(&PersistedState::default()).unwrap();
        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn settings_write_through() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(store_in(&dir));
        settings.record_start(&Credential::parse("tok").unwrap());
        settings.set_destination("chan-1".into());
        settings.set_manually_stopped(true);

        let reloaded = store_in(&dir).load();
        assert_eq!(reloaded.credential.unwrap().expose(), "tok");
        assert_eq!(reloaded.destination.as_deref(), Some("chan-1"));
        assert!(reloaded.manually_stopped);
        assert_eq!(settings.destination().as_deref(), Some("chan-1"));
    }

    #[test]
    fn unwritable_store_keeps_memory_copy() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "x").unwrap();
        let settings = Settings::load(JsonStateStore::new(blocker.join("state.json")));

        settings.set_destination("chan-2".into());
        assert_eq!(settings.destination().as_deref(), Some("chan-2"));
    }

    #[test]
    fn legacy_channel_id_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::write(store.path(), r#"{"channel_id": 987654321}"#).unwrap();
        let settings = Settings::load(store);
        assert_eq!(settings.destination().as_deref(), Some("987654321"));
    }
}
