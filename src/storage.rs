//! Setpoint persistence
//!
//! A small key/value store keeps the three user-controlled setpoints across
//! restarts. Values are stored as JSON-encoded scalars under fixed keys.
//! Telemetry is never persisted; the device re-sends it after reconnecting.

use crate::state::Setpoints;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub const WINDOW_DEG_KEY: &str = "windowDeg";
pub const DESIRED_TEMP_KEY: &str = "desiredTemp";
pub const IS_AUTO_KEY: &str = "isAuto";

/// Persistence failures
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Storage contents could not be (de)serialized: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Key/value storage for setpoints
#[async_trait]
pub trait SetpointStore: Send + Sync {
    /// Read a raw value; a missing key is `Ok(None)`, not an error
    async fn get_item(&self, key: &str) -> Result<Option<String>, PersistenceError>;

    async fn set_item(&self, key: &str, value: String) -> Result<(), PersistenceError>;

    /// Write several keys; backends may override to write them in one go
    async fn set_items(&self, items: Vec<(String, String)>) -> Result<(), PersistenceError> {
        for (key, value) in items {
            self.set_item(&key, value).await?;
        }
        Ok(())
    }
}

/// Setpoints recovered from storage; each may be missing
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StoredSetpoints {
    pub desired_temperature: Option<f64>,
    pub window_angle: Option<f64>,
    pub is_auto: Option<bool>,
}

impl StoredSetpoints {
    pub fn is_empty(&self) -> bool {
        self.desired_temperature.is_none() && self.window_angle.is_none() && self.is_auto.is_none()
    }
}

/// Load all setpoint keys.
///
/// Keys that are absent or hold an unreadable value come back as `None`;
/// only backend failures are errors.
pub async fn load_setpoints<S>(store: &S) -> Result<StoredSetpoints, PersistenceError>
where
    S: SetpointStore + ?Sized,
{
    let window = store.get_item(WINDOW_DEG_KEY).await?;
    let temperature = store.get_item(DESIRED_TEMP_KEY).await?;
    let auto = store.get_item(IS_AUTO_KEY).await?;

    Ok(StoredSetpoints {
        window_angle: window.and_then(|raw| parse_number(WINDOW_DEG_KEY, &raw)),
        desired_temperature: temperature.and_then(|raw| parse_number(DESIRED_TEMP_KEY, &raw)),
        is_auto: auto.and_then(|raw| parse_flag(IS_AUTO_KEY, &raw)),
    })
}

/// Checkpoint the current setpoints
pub async fn save_setpoints<S>(store: &S, setpoints: &Setpoints) -> Result<(), PersistenceError>
where
    S: SetpointStore + ?Sized,
{
    let items = vec![
        (
            WINDOW_DEG_KEY.to_string(),
            serde_json::to_string(&(setpoints.window_angle as i64))?,
        ),
        (
            DESIRED_TEMP_KEY.to_string(),
            serde_json::to_string(&(setpoints.desired_temperature as i64))?,
        ),
        (
            IS_AUTO_KEY.to_string(),
            serde_json::to_string(&u8::from(setpoints.is_auto))?,
        ),
    ];
    store.set_items(items).await
}

fn parse_number(key: &str, raw: &str) -> Option<f64> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Number(n)) => n.as_f64(),
        _ => {
            warn!(key, raw, "Ignoring unreadable stored setpoint");
            None
        }
    }
}

fn parse_flag(key: &str, raw: &str) -> Option<bool> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Bool(b)) => Some(b),
        Ok(Value::Number(n)) => n.as_f64().map(|v| v != 0.0),
        _ => {
            warn!(key, raw, "Ignoring unreadable stored setpoint");
            None
        }
    }
}

/// Store backed by a single JSON object file
pub struct JsonFileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<BTreeMap<String, String>, PersistenceError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(BTreeMap::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No setpoint file yet");
                Ok(BTreeMap::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn write_all(&self, entries: &BTreeMap<String, String>) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Write-then-rename so a crash never leaves a half-written file
        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, serde_json::to_vec_pretty(entries)?).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl SetpointStore for JsonFileStore {
    async fn get_item(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        Ok(self.read_all().await?.remove(key))
    }

    async fn set_item(&self, key: &str, value: String) -> Result<(), PersistenceError> {
        self.set_items(vec![(key.to_string(), value)]).await
    }

    async fn set_items(&self, items: Vec<(String, String)>) -> Result<(), PersistenceError> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.read_all().await?;
        entries.extend(items);
        self.write_all(&entries).await
    }
}
