//! Persistent filename → ID registry.
//!
//! A track's identity comes from an embedded `ID` tag when the file carries
//! one. Files without it are given an ID here, keyed by filename, and keep it
//! for as long as the registry file lives. IDs are never handed out twice,
//! even after the file that held one disappears.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("Invalid registry file {path}: {source}")]
    Json {
        path: String,
        source: serde_json::Error,
    },
    #[error("{0} is not registered")]
    NotRegistered(String),
    #[error("{0} is already registered with ID {1}")]
    AlreadyRegistered(String, i64),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IdRegistry {
    next_id: i64,
    ids: BTreeMap<String, i64>,
    #[serde(skip)]
    path: Option<PathBuf>,
}

impl Default for IdRegistry {
    fn default() -> Self {
        Self {
            next_id: 1,
            ids: BTreeMap::new(),
            path: None,
        }
    }
}

impl IdRegistry {
    /// Registry that is never written to disk.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open the registry at `path`; a missing file starts an empty registry.
    pub fn open(path: &Path) -> Result<Self, RegistryError> {
        let mut registry = if path.exists() {
            let text = std::fs::read_to_string(path).map_err(|source| RegistryError::Io {
                path: path.display().to_string(),
                source,
            })?;
            serde_json::from_str::<IdRegistry>(&text).map_err(|source| RegistryError::Json {
                path: path.display().to_string(),
                source,
            })?
        } else {
            log::debug!("No ID registry at {}, starting empty", path.display());
            Self::default()
        };
        // repair a hand-edited counter
        let max = registry.ids.values().copied().max().unwrap_or(0);
        registry.next_id = registry.next_id.max(max + 1);
        registry.path = Some(path.to_path_buf());
        Ok(registry)
    }

    /// Persist to the file this registry was opened from.
    pub fn save(&self) -> Result<(), RegistryError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let io_err = |source| RegistryError::Io {
            path: path.display().to_string(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let text = serde_json::to_string_pretty(self).map_err(|source| RegistryError::Json {
            path: path.display().to_string(),
            source,
        })?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, text).map_err(io_err)?;
        std::fs::rename(&tmp, path).map_err(io_err)?;
        Ok(())
    }

    pub fn get(&self, filename: &str) -> Option<i64> {
        self.ids.get(filename).copied()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Identity for `filename`. A `known` ID (embedded tag or cached record)
    /// wins and is recorded; otherwise the registered ID is returned, or a
    /// fresh one allocated.
    pub fn resolve(&mut self, filename: &str, known: Option<i64>) -> i64 {
        if let Some(id) = known {
            if let Some(prev) = self.ids.insert(filename.to_string(), id) {
                if prev != id {
                    log::info!("{filename}: ID {prev} replaced by {id}");
                }
            }
            self.next_id = self.next_id.max(id + 1);
            return id;
        }
        if let Some(id) = self.get(filename) {
            return id;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.ids.insert(filename.to_string(), id);
        log::debug!("Assigned ID {id} to {filename}");
        id
    }

    /// Move the identity of `from` to `to`, for files renamed outside a scan.
    pub fn rename(&mut self, from: &str, to: &str) -> Result<i64, RegistryError> {
        if let Some(existing) = self.get(to) {
            return Err(RegistryError::AlreadyRegistered(to.to_string(), existing));
        }
        let id = self
            .ids
            .remove(from)
            .ok_or_else(|| RegistryError::NotRegistered(from.to_string()))?;
        self.ids.insert(to.to_string(), id);
        Ok(id)
    }
}
