use log::{info, warn};
use serde_json::Value;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};

use crate::models::ConfigurationRecord;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to access the configuration file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to serialize the configuration: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("invalid configuration update: {0}")]
    Validation(String),
}

/// Holder of the single configuration record. Writes go through one lock
/// and land on disk atomically; every successful write broadcasts the new
/// record to subscribers (push fan-out and broker mirror).
pub struct ConfigStore {
    path: PathBuf,
    record: Mutex<ConfigurationRecord>,
    updates: broadcast::Sender<ConfigurationRecord>,
}

impl ConfigStore {
    /// Loads the record from the backing file. A missing or corrupt file
    /// yields defaults; the defaults are written out so the file exists
    /// after first boot.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let record = match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(record) => record,
                Err(e) => {
                    warn!(
                        "Configuration file {} is corrupt ({}). Using defaults.",
                        path.display(),
                        e
                    );
                    ConfigurationRecord::default()
                }
            },
            Err(_) => {
                info!(
                    "No configuration at {}. Initializing with defaults.",
                    path.display()
                );
                let record = ConfigurationRecord::default();
                if let Err(e) = persist(&path, &record) {
                    warn!("Failed to write the initial configuration: {}", e);
                }
                record
            }
        };

        let (updates, _) = broadcast::channel(16);
        Self {
            path,
            record: Mutex::new(record),
            updates,
        }
    }

    /// Returns the last-known-good record. Never fails; reads are served
    /// from memory even when the backing file becomes unwritable.
    pub async fn read(&self) -> ConfigurationRecord {
        self.record.lock().await.clone()
    }

    /// Fully replaces the stored record. All-or-nothing: a failed write
    /// leaves the previous record intact and readable.
    pub async fn write(&self, record: ConfigurationRecord) -> Result<(), StoreError> {
        let mut current = self.record.lock().await;
        self.commit(&mut current, record)
    }

    /// Overlays a partial update on the current record and writes the
    /// result. The read-modify-write sequence holds the record lock, so a
    /// broker command cannot interleave with a concurrent API write.
    pub async fn merge(&self, patch: Value) -> Result<ConfigurationRecord, StoreError> {
        let Value::Object(patch) = patch else {
            return Err(StoreError::Validation(
                "configuration update must be a JSON object".to_string(),
            ));
        };

        let mut current = self.record.lock().await;
        let mut merged = serde_json::to_value(&*current)?;
        if let Value::Object(fields) = &mut merged {
            for (key, value) in patch {
                fields.insert(key, value);
            }
        }
        let record: ConfigurationRecord =
            serde_json::from_value(merged).map_err(|e| StoreError::Validation(e.to_string()))?;

        self.commit(&mut current, record.clone())?;
        Ok(record)
    }

    /// Subscribes to change notifications. Delivery is best-effort and
    /// decoupled from the write result.
    pub fn subscribe(&self) -> broadcast::Receiver<ConfigurationRecord> {
        self.updates.subscribe()
    }

    fn commit(
        &self,
        slot: &mut ConfigurationRecord,
        record: ConfigurationRecord,
    ) -> Result<(), StoreError> {
        persist(&self.path, &record)?;
        *slot = record.clone();
        let _ = self.updates.send(record);
        Ok(())
    }
}

/// Writes the record to a sibling temp file, then renames it over the
/// target. Concurrent readers never observe a partial serialization.
fn persist(path: &Path, record: &ConfigurationRecord) -> Result<(), StoreError> {
    let raw = serde_json::to_string_pretty(record)?;
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, raw)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::weather::WeatherCondition;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[tokio::test]
    async fn missing_file_yields_defaults_and_creates_the_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        let store = ConfigStore::load(&path);
        assert_eq!(store.read().await, ConfigurationRecord::default());
        assert!(path.exists());
    }

    #[tokio::test]
    async fn corrupt_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "not json {").unwrap();
        let store = ConfigStore::load(&path);
        assert_eq!(store.read().await, ConfigurationRecord::default());
    }

    #[tokio::test]
    async fn write_round_trips_and_notifies() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        let store = ConfigStore::load(&path);
        let mut updates = store.subscribe();

        let mut record = ConfigurationRecord::default();
        record.location_name = "Berlin".to_string();
        store.write(record.clone()).await.unwrap();

        assert_eq!(store.read().await, record);
        assert_eq!(updates.recv().await.unwrap(), record);

        // A fresh load sees the same record.
        let reloaded = ConfigStore::load(&path);
        assert_eq!(reloaded.read().await, record);
    }

    #[tokio::test]
    async fn identical_writes_are_idempotent_but_still_notify() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::load(dir.path().join("config.json"));
        let mut updates = store.subscribe();

        let record = ConfigurationRecord::default();
        store.write(record.clone()).await.unwrap();
        store.write(record.clone()).await.unwrap();

        assert_eq!(store.read().await, record);
        assert_eq!(updates.recv().await.unwrap(), record);
        assert_eq!(updates.recv().await.unwrap(), record);
    }

    #[tokio::test]
    async fn merge_overlays_only_the_given_fields() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::load(dir.path().join("config.json"));

        let mut seed = ConfigurationRecord::default();
        seed.demo_mode = false;
        seed.demo_state = WeatherCondition::ClearDay;
        seed.weather_entity = "weather.home".to_string();
        store.write(seed).await.unwrap();

        let mut updates = store.subscribe();
        let merged = store.merge(json!({ "demo_mode": true })).await.unwrap();

        assert!(merged.demo_mode);
        assert_eq!(merged.demo_state, WeatherCondition::ClearDay);
        assert_eq!(merged.weather_entity, "weather.home");
        assert_eq!(store.read().await, merged);

        // Exactly one notification for the merge.
        assert_eq!(updates.recv().await.unwrap(), merged);
        assert!(matches!(
            updates.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn invalid_patches_leave_the_record_untouched() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        let store = ConfigStore::load(&path);
        let before = store.read().await;
        let bytes_before = std::fs::read(&path).unwrap();

        assert!(matches!(
            store.merge(json!("not an object")).await,
            Err(StoreError::Validation(_))
        ));
        assert!(matches!(
            store.merge(json!({ "demo_state": "BOGUS" })).await,
            Err(StoreError::Validation(_))
        ));

        assert_eq!(store.read().await, before);
        assert_eq!(std::fs::read(&path).unwrap(), bytes_before);
    }

    #[tokio::test]
    async fn concurrent_writers_leave_exactly_one_record() {
        let dir = tempdir().unwrap();
        let store = Arc::new(ConfigStore::load(dir.path().join("config.json")));
        let mut updates = store.subscribe();

        let n = 8;
        let mut tasks = Vec::new();
        for i in 0..n {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                let mut record = ConfigurationRecord::default();
                record.location_name = format!("writer-{}", i);
                store.write(record).await.unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let stored = store.read().await;
        assert!(stored.location_name.starts_with("writer-"));

        // One notification per write, each carrying a complete record.
        for _ in 0..n {
            let record = updates.recv().await.unwrap();
            assert!(record.location_name.starts_with("writer-"));
        }
        assert!(matches!(
            updates.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }
}
