//! JSON persistence for the runtime config and each zone's schedule.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use heatzone_common::{config::is_valid_zone_id, Event, RuntimeConfig, Temperature};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::warn;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read {}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write {}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed json in {}", .path.display())]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid zone id {0:?}")]
    InvalidZone(String),
}

/// What is kept on disk for one zone.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ZoneRecord {
    pub events: Vec<Event>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thermostat_target: Option<Temperature>,
}

// Events are decoded one by one so a single bad entry does not cost the rest.
#[derive(Deserialize)]
struct RawZoneRecord {
    #[serde(default)]
    events: Vec<serde_json::Value>,
    #[serde(default)]
    thermostat_target: Option<Temperature>,
}

#[derive(Clone)]
pub struct Store {
    config_path: Arc<PathBuf>,
    zones_dir: Arc<PathBuf>,
    lock: Arc<Mutex<()>>,
}

impl Store {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        let data_dir = data_dir.as_ref();
        Self {
            config_path: Arc::new(data_dir.join("heatzone.json")),
            zones_dir: Arc::new(data_dir.join("zones")),
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// A missing file yields the defaults.
    pub async fn load_config(&self) -> Result<RuntimeConfig, StoreError> {
        let _guard = self.lock.lock().await;
        let path = self.config_path.as_ref();
        match read_optional(path).await? {
            Some(raw) => serde_json::from_slice(&raw).map_err(|source| StoreError::Malformed {
                path: path.clone(),
                source,
            }),
            None => Ok(RuntimeConfig::default()),
        }
    }

    /// A missing file is an empty zone. Entries that do not decode to a valid
    /// event are dropped with a warning.
    pub async fn load_zone(&self, zone: &str) -> Result<ZoneRecord, StoreError> {
        let path = self.zone_path(zone)?;
        let _guard = self.lock.lock().await;
        let Some(raw) = read_optional(&path).await? else {
            return Ok(ZoneRecord::default());
        };
        let record: RawZoneRecord =
            serde_json::from_slice(&raw).map_err(|source| StoreError::Malformed {
                path: path.clone(),
                source,
            })?;

        let mut events = Vec::with_capacity(record.events.len());
        for (index, value) in record.events.into_iter().enumerate() {
            match serde_json::from_value::<Event>(value) {
                Ok(event) => events.push(event),
                Err(err) => warn!(zone, index, "skipping stored event: {err}"),
            }
        }
        Ok(ZoneRecord {
            events,
            thermostat_target: record.thermostat_target,
        })
    }

    pub async fn save_zone(&self, zone: &str, record: &ZoneRecord) -> Result<(), StoreError> {
        let path = self.zone_path(zone)?;
        let payload = serde_json::to_vec_pretty(record).map_err(|source| StoreError::Malformed {
            path: path.clone(),
            source,
        })?;

        let _guard = self.lock.lock().await;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| StoreError::Write {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        tokio::fs::write(&path, payload)
            .await
            .map_err(|source| StoreError::Write { path, source })
    }

    fn zone_path(&self, zone: &str) -> Result<PathBuf, StoreError> {
        if !is_valid_zone_id(zone) {
            return Err(StoreError::InvalidZone(zone.to_string()));
        }
        Ok(self.zones_dir.join(format!("{zone}.json")))
    }
}

async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, StoreError> {
    match tokio::fs::read(path).await {
        Ok(raw) => Ok(Some(raw)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(source) => Err(StoreError::Read {
            path: path.to_path_buf(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use heatzone_common::{Action, ThermostatAction};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use super::*;

    fn store() -> (TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());
        (dir, store)
    }

    #[tokio::test]
    async fn missing_files_mean_defaults() {
        let (_dir, store) = store();
        assert_eq!(store.load_zone("kitchen").await.unwrap(), ZoneRecord::default());
        let config = store.load_config().await.unwrap();
        assert_eq!(config.http_port, RuntimeConfig::default().http_port);
    }

    #[tokio::test]
    async fn zone_record_survives_a_save() {
        let (_dir, store) = store();
        let record = ZoneRecord {
            events: vec![
                Event::new(
                    6,
                    30,
                    Action::on().with_thermostat(ThermostatAction::SetTarget(
                        Temperature::from_millis(18_500),
                    )),
                )
                .unwrap(),
                Event::new(22, 0, Action::off()).unwrap(),
            ],
            thermostat_target: Some(Temperature::from_millis(19_000)),
        };
        store.save_zone("kitchen", &record).await.unwrap();

        assert_eq!(store.load_zone("kitchen").await.unwrap(), record);
    }

    #[tokio::test]
    async fn bad_entries_are_skipped() {
        let (dir, store) = store();
        std::fs::create_dir_all(dir.path().join("zones")).unwrap();
        std::fs::write(
            dir.path().join("zones/kitchen.json"),
            r#"{"events":[
                {"hour":6,"minute":30,"action":"on"},
                {"hour":25,"minute":0,"action":"on"},
                {"hour":7,"minute":0,"action":"sideways"},
                {"hour":21,"minute":12,"action":"off"}
            ]}"#,
        )
        .unwrap();

        let record = store.load_zone("kitchen").await.unwrap();
        assert_eq!(
            record.events,
            vec![
                Event::new(6, 30, Action::on()).unwrap(),
                Event::new(21, 12, Action::off()).unwrap(),
            ]
        );
        assert_eq!(record.thermostat_target, None);
    }

    #[tokio::test]
    async fn unreadable_json_is_an_error() {
        let (dir, store) = store();
        std::fs::write(dir.path().join("heatzone.json"), "{not json").unwrap();
        assert!(matches!(
            store.load_config().await,
            Err(StoreError::Malformed { .. })
        ));
    }

    #[tokio::test]
    async fn zone_ids_cannot_escape_the_data_dir() {
        let (_dir, store) = store();
        assert!(matches!(
            store.load_zone("../etc/passwd").await,
            Err(StoreError::InvalidZone(_))
        ));
        assert!(matches!(
            store.save_zone("", &ZoneRecord::default()).await,
            Err(StoreError::InvalidZone(_))
        ));
    }
}
