//! File-based flag store — the last fired alarm as a small JSON file.
//! Human-readable, survives restarts, written with a rename so readers never
//! see a half-written flag.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use alarmclaw_core::config::FlagsConfig;
use alarmclaw_core::error::{AlarmClawError, Result, StoreError};
use alarmclaw_core::traits::FlagStore;
use alarmclaw_core::types::AlarmFlag;

use crate::persistence::SqliteFlagStore;

const FLAG_FILE: &str = "alarm_flag.json";

/// File-based flag store.
pub struct FileFlagStore {
    path: PathBuf,
    // Serializes writers within this process.
    write_lock: Mutex<()>,
}

impl FileFlagStore {
    /// Create a flag store in the given directory.
    pub fn new(dir: &Path) -> Self {
        std::fs::create_dir_all(dir).ok();
        Self {
            path: dir.to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    fn file(&self) -> PathBuf {
        self.path.join(FLAG_FILE)
    }
}

impl FlagStore for FileFlagStore {
    fn name(&self) -> &str {
        "file"
    }

    fn set(&self, event_id: &str, payload: &[u8]) -> std::result::Result<(), StoreError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        if !self.path.is_dir() {
            return Err(StoreError::Unavailable(format!(
                "{} is not a directory",
                self.path.display()
            )));
        }
        let flag = AlarmFlag::new(event_id, payload);
        let json = serde_json::to_string_pretty(&flag)?;
        let tmp = self.path.join(format!("{FLAG_FILE}.tmp"));
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, self.file())?;
        tracing::debug!("💾 Alarm flag '{}' saved to {}", event_id, self.file().display());
        Ok(())
    }

    fn get(&self) -> std::result::Result<Option<AlarmFlag>, StoreError> {
        let file = self.file();
        if !file.exists() {
            return Ok(None);
        }
        let json = std::fs::read_to_string(&file)?;
        Ok(Some(serde_json::from_str(&json)?))
    }

    fn clear(&self) -> std::result::Result<(), StoreError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        match std::fs::remove_file(self.file()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory flag store. Lost on restart; for tests and ephemeral hosts.
#[derive(Default)]
pub struct MemoryFlagStore {
    flag: Mutex<Option<AlarmFlag>>,
}

impl MemoryFlagStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FlagStore for MemoryFlagStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn set(&self, event_id: &str, payload: &[u8]) -> std::result::Result<(), StoreError> {
        *self.flag.lock().unwrap_or_else(|e| e.into_inner()) =
            Some(AlarmFlag::new(event_id, payload));
        Ok(())
    }

    fn get(&self) -> std::result::Result<Option<AlarmFlag>, StoreError> {
        Ok(self.flag.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    fn clear(&self) -> std::result::Result<(), StoreError> {
        *self.flag.lock().unwrap_or_else(|e| e.into_inner()) = None;
        Ok(())
    }
}

/// Open the flag store selected by config.
pub fn open_flag_store(config: &FlagsConfig) -> Result<Arc<dyn FlagStore>> {
    let dir = config.resolved_path();
    let store: Arc<dyn FlagStore> = match config.backend.as_str() {
        "file" => Arc::new(FileFlagStore::new(&dir)),
        "sqlite" => {
            std::fs::create_dir_all(&dir)?;
            Arc::new(SqliteFlagStore::open(&dir.join("alarm_flags.db"))?)
        }
        "memory" => Arc::new(MemoryFlagStore::new()),
        other => {
            return Err(AlarmClawError::Config(format!(
                "Unknown flag store backend: '{other}' (expected file, sqlite or memory)"
            )));
        }
    };
    tracing::debug!("Flag store: {} ({})", store.name(), dir.display());
    Ok(store)
}
