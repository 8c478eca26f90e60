use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::StoreError;
use crate::hw::DeviceIdentity;

const RECORD_FILE_NAME: &str = "last-device.json";

/// The last device the process connected to, plus connection telemetry.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedDeviceRecord {
    pub address: String,
    pub name: String,
    #[serde(default)]
    pub device_type: Option<String>,
    /// Time of the last successful connection, in Unix milliseconds.
    pub last_connected_at_epoch_ms: i64,
    /// Failed attempts since the last success.
    pub connection_attempt_count: u32,
    pub last_connection_succeeded: bool,
    pub auto_connect_enabled: bool,
}

impl SavedDeviceRecord {
    /// Creates a record for a device that has just connected.
    #[must_use]
    pub fn connected(identity: &DeviceIdentity, now_epoch_ms: i64) -> Self {
        Self {
            address: identity.address().to_string(),
            name: identity.name().to_string(),
            device_type: None,
            last_connected_at_epoch_ms: now_epoch_ms,
            connection_attempt_count: 0,
            last_connection_succeeded: true,
            auto_connect_enabled: true,
        }
    }

    /// Creates a record for a device that was asked for but never reached.
    #[must_use]
    pub fn requested(identity: &DeviceIdentity) -> Self {
        Self {
            last_connected_at_epoch_ms: 0,
            last_connection_succeeded: false,
            ..Self::connected(identity, 0)
        }
    }

    /// Returns the identity to reconnect to.
    #[must_use]
    pub fn identity(&self) -> DeviceIdentity {
        DeviceIdentity::new(self.name.clone(), self.address.clone(), None)
    }

    /// Returns whether the last successful connection happened within `window`.
    #[must_use]
    pub fn is_recent(&self, now_epoch_ms: i64, window: Duration) -> bool {
        let window_ms = i64::try_from(window.as_millis()).unwrap_or(i64::MAX);
        now_epoch_ms.saturating_sub(self.last_connected_at_epoch_ms) < window_ms
    }

    /// Returns whether a fresh process should reconnect to this device.
    #[must_use]
    pub fn should_auto_connect(&self, now_epoch_ms: i64, window: Duration) -> bool {
        self.auto_connect_enabled && self.is_recent(now_epoch_ms, window)
    }

    /// Marks a successful connection to `identity`.
    pub fn record_success(&mut self, identity: &DeviceIdentity, now_epoch_ms: i64) {
        let device_type = self.device_type.take();
        *self = Self {
            device_type,
            ..Self::connected(identity, now_epoch_ms)
        };
    }

    /// Marks a failed connection attempt.
    pub fn record_failure(&mut self) {
        self.connection_attempt_count = self.connection_attempt_count.saturating_add(1);
        self.last_connection_succeeded = false;
    }
}

/// Storage for the single [`SavedDeviceRecord`]. Writes are last-writer-wins.
pub trait DeviceStore: Send + Sync + std::fmt::Debug {
    /// Loads the saved record, if one exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be read or parsed.
    fn load(&self) -> Result<Option<SavedDeviceRecord>, StoreError>;

    /// Replaces the saved record.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be written.
    fn save(&self, record: &SavedDeviceRecord) -> Result<(), StoreError>;

    /// Removes the saved record.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be modified.
    fn clear(&self) -> Result<(), StoreError>;
}

/// Stores the record as a JSON file, replacing it atomically on save.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Uses `last-device.json` in the per-user state directory.
    #[must_use]
    pub fn at_default_location() -> Self {
        Self::new(default_record_path())
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }
}

impl DeviceStore for JsonFileStore {
    #[instrument(skip(self), level = "debug", fields(path = %self.path.display()))]
    fn load(&self) -> Result<Option<SavedDeviceRecord>, StoreError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(self.io_error(error)),
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| StoreError::InvalidRecord {
                path: self.path.display().to_string(),
                source,
            })
    }

    #[instrument(skip(self, record), level = "debug", fields(path = %self.path.display()))]
    fn save(&self, record: &SavedDeviceRecord) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|source| self.io_error(source))?;
        }

        let serialised =
            serde_json::to_vec_pretty(record).map_err(|source| StoreError::InvalidRecord {
                path: self.path.display().to_string(),
                source,
            })?;
        let staging = staging_path(&self.path);
        fs::write(&staging, serialised).map_err(|source| self.io_error(source))?;
        fs::rename(&staging, &self.path).map_err(|source| self.io_error(source))?;
        debug!(address = %record.address, "saved device record");
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(self.io_error(error)),
        }
    }
}

/// Keeps the record in memory only.
#[derive(Debug, Default)]
pub struct MemoryStore {
    record: Mutex<Option<SavedDeviceRecord>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that already holds `record`.
    #[must_use]
    pub fn with_record(record: SavedDeviceRecord) -> Self {
        Self {
            record: Mutex::new(Some(record)),
        }
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<SavedDeviceRecord>> {
        match self.record.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl DeviceStore for MemoryStore {
    fn load(&self) -> Result<Option<SavedDeviceRecord>, StoreError> {
        Ok(self.slot().clone())
    }

    fn save(&self, record: &SavedDeviceRecord) -> Result<(), StoreError> {
        *self.slot() = Some(record.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        *self.slot() = None;
        Ok(())
    }
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(std::ffi::OsStr::to_os_string)
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn default_record_path() -> PathBuf {
    let project_dirs = ProjectDirs::from("dev", "wearlink", "wearlink");
    let Some(project_dirs) = project_dirs else {
        return std::env::temp_dir().join("wearlink").join(RECORD_FILE_NAME);
    };

    let root = project_dirs
        .state_dir()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| project_dirs.data_local_dir().to_path_buf());
    root.join(RECORD_FILE_NAME)
}
