//! NVS storage adapter.
//!
//! Backs [`StoragePort`] with ESP-IDF's non-volatile storage.  One `EspNvs`
//! handle is opened per namespace on first use; NVS write commits are atomic
//! at the API level, satisfying the port's no-partial-writes contract.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault};
use log::warn;

use crate::app::ports::{StorageError, StoragePort};

/// `StoragePort` over the default NVS partition.
pub struct NvsStorage {
    partition: EspDefaultNvsPartition,
    namespaces: HashMap<String, EspNvs<NvsDefault>>,
}

impl NvsStorage {
    pub fn new(partition: EspDefaultNvsPartition) -> Self {
        Self {
            partition,
            namespaces: HashMap::new(),
        }
    }

    /// Pre-open a namespace so that reads work before the first write.
    /// Call at boot for every namespace the engine restores from.
    pub fn open(&mut self, namespace: &str) -> Result<(), StorageError> {
        self.handle(namespace).map(|_| ())
    }

    fn handle(&mut self, namespace: &str) -> Result<&mut EspNvs<NvsDefault>, StorageError> {
        match self.namespaces.entry(namespace.to_string()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let nvs = EspNvs::new(self.partition.clone(), namespace, true).map_err(|e| {
                    warn!("nvs: open namespace '{namespace}' failed: {e}");
                    StorageError::IoError
                })?;
                Ok(entry.insert(nvs))
            }
        }
    }

    fn handle_ro(&self, namespace: &str) -> Result<&EspNvs<NvsDefault>, StorageError> {
        self.namespaces
            .get(namespace)
            .ok_or(StorageError::NotFound)
    }
}

impl StoragePort for NvsStorage {
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        let nvs = self.handle_ro(namespace)?;
        match nvs.get_raw(key, buf) {
            Ok(Some(data)) => Ok(data.len()),
            Ok(None) => Err(StorageError::NotFound),
            Err(_) => Err(StorageError::IoError),
        }
    }

    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        let nvs = self.handle(namespace)?;
        nvs.set_raw(key, data).map(|_| ()).map_err(|e| {
            warn!("nvs: write {namespace}/{key} failed: {e}");
            StorageError::IoError
        })
    }

    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError> {
        let nvs = self.handle(namespace)?;
        let _ = nvs.remove(key);
        Ok(())
    }

    fn exists(&self, namespace: &str, key: &str) -> bool {
        self.namespaces
            .get(namespace)
            .and_then(|nvs| nvs.blob_len(key).ok())
            .flatten()
            .is_some()
    }
}
