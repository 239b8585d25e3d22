use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use jsonrelay_transport::PortIdentifier;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::pair::{PersistedConfig, PortPair};

/// Default location of the pair document, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/com_ports_config.json";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Errors writing or removing the pair document.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("config I/O error at {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },

    #[error("failed to encode config: {0}")]
    Encode(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// On-disk layout: `{"ports": ["COM20", "COM21"], "created_at": "..."}`.
#[derive(Debug, Serialize, Deserialize)]
struct ConfigDocument {
    ports: Vec<PortIdentifier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    created_at: Option<String>,
}

/// Persists the chosen pair as one JSON document.
#[derive(Debug, Clone)]
pub struct PairConfigStore {
    path: PathBuf,
}

impl Default for PairConfigStore {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIG_PATH)
    }
}

impl PairConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the persisted pair.
    ///
    /// Never fails: a missing, unreadable or malformed document, or one with
    /// fewer than two ports, is logged and reported as `None`.
    pub fn load(&self) -> Option<PersistedConfig> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no persisted pair");
                return None;
            }
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "failed to read persisted pair");
                return None;
            }
        };

        let doc: ConfigDocument = match serde_json::from_slice(&raw) {
            Ok(doc) => doc,
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "malformed persisted pair");
                return None;
            }
        };

        let mut ports = doc.ports.into_iter();
        match (ports.next(), ports.next()) {
            (Some(primary), Some(secondary)) => {
                let pair = PortPair::new(primary, secondary);
                debug!(%pair, "loaded persisted pair");
                Some(PersistedConfig {
                    pair,
                    created_at: doc.created_at,
                })
            }
            _ => {
                warn!(path = %self.path.display(), "persisted pair has fewer than two ports");
                None
            }
        }
    }

    /// Persist `pair`, replacing any previous document atomically.
    pub fn save(&self, pair: &PortPair) -> Result<PersistedConfig> {
        let created_at = chrono::Local::now().format(TIMESTAMP_FORMAT).to_string();
        let doc = ConfigDocument {
            ports: vec![pair.primary().clone(), pair.secondary().clone()],
            created_at: Some(created_at.clone()),
        };
        let body = serde_json::to_vec_pretty(&doc)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| self.io_error(parent, source))?;
        }

        let tmp = self.temp_path();
        let written = fs::File::create(&tmp).and_then(|mut file| {
            file.write_all(&body)?;
            file.sync_all()
        });
        if let Err(source) = written {
            let _ = fs::remove_file(&tmp);
            return Err(self.io_error(&tmp, source));
        }
        if let Err(source) = fs::rename(&tmp, &self.path) {
            let _ = fs::remove_file(&tmp);
            return Err(self.io_error(&self.path, source));
        }

        info!(%pair, path = %self.path.display(), "saved port pair");
        Ok(PersistedConfig {
            pair: pair.clone(),
            created_at: Some(created_at),
        })
    }

    /// Delete the document. `Ok(false)` when there was nothing to delete.
    pub fn clear(&self) -> Result<bool> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                info!(path = %self.path.display(), "cleared persisted pair");
                Ok(true)
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(self.io_error(&self.path, source)),
        }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn io_error(&self, path: &Path, source: io::Error) -> StoreError {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &tempfile::TempDir) -> PairConfigStore {
        PairConfigStore::new(dir.path().join("config").join("com_ports_config.json"))
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let pair = PortPair::new("COM20", "COM21");

        let saved = store.save(&pair).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded.pair, pair);
        assert_eq!(loaded.created_at, saved.created_at);
        assert!(!store.temp_path().exists());
    }

    #[test]
    fn document_layout_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.save(&PortPair::new("COM7", "COM8")).unwrap();

        let value: serde_json::Value =
            serde_json::from_slice(&fs::read(store.path()).unwrap()).unwrap();
        assert_eq!(value["ports"], serde_json::json!(["COM7", "COM8"]));
        let stamp = value["created_at"].as_str().unwrap();
        assert!(chrono::NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).is_ok());
    }

    #[test]
    fn missing_or_malformed_loads_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        assert!(store.load().is_none());

        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(store.path(), b"{not json").unwrap();
        assert!(store.load().is_none());

        fs::write(store.path(), br#"{"ports":["COM1"]}"#).unwrap();
        assert!(store.load().is_none());
    }

    #[test]
    fn document_without_timestamp_still_loads() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(store.path(), br#"{"ports":["COM3","COM4"]}"#).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.pair, PortPair::new("COM3", "COM4"));
        assert!(loaded.created_at.is_none());
    }

    #[test]
    fn clear_reports_whether_anything_was_removed() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        assert!(!store.clear().unwrap());

        store.save(&PortPair::new("COM20", "COM21")).unwrap();
        assert!(store.clear().unwrap());
        assert!(store.load().is_none());
    }

    #[test]
    fn save_replaces_previous_pair() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.save(&PortPair::new("COM20", "COM21")).unwrap();
        store.save(&PortPair::new("COM30", "COM31")).unwrap();
        assert_eq!(store.load().unwrap().pair, PortPair::new("COM30", "COM31"));
    }
}
