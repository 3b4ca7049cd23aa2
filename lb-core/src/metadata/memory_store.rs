use super::{
    errors::Result,
    store::{KeyValueVersion, MetadataStore},
    MetadataError,
};

use async_trait::async_trait;
use dashmap::{mapref::one::RefMut, DashMap};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// MemoryStore is a simple in-memory key-value store that implements the MetadataStore trait.
/// SHOULD BE USED ONLY FOR TESTING PURPOSES
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<DashMap<String, BTreeMap<String, Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore {
            inner: Arc::new(DashMap::new()),
        }
    }

    /// Splits a path into the map key (first 3 segments) and the key inside that map.
    fn split_path(path: &str) -> Result<(String, String)> {
        let parts: Vec<&str> = path.split('/').collect();

        // Validate that path has at least 3 parts (empty, namespace, category)
        if parts.len() < 3 {
            return Err(MetadataError::InvalidArguments(format!(
                "Path must have at least 3 segments: {}",
                path
            )));
        }

        Ok((parts[..3].join("/"), parts[3..].join("/")))
    }

    fn get_map(&self, map_key: &str) -> RefMut<'_, String, BTreeMap<String, Value>> {
        self.inner.entry(map_key.to_owned()).or_default()
    }
}

#[async_trait]
impl MetadataStore for MemoryStore {
    // Read the value of one key, identified by the path
    async fn get(&self, path: &str) -> Result<Option<Value>> {
        let (map_key, key) = Self::split_path(path)?;
        Ok(self
            .inner
            .get(&map_key)
            .and_then(|bmap| bmap.get(&key).cloned()))
    }

    // Return all the paths that are children to the specific path.
    // Returns full paths to match ETCD behavior for production compatibility
    async fn get_childrens(&self, path: &str) -> Result<Vec<String>> {
        let (map_key, minimum_path) = Self::split_path(path)?;

        let mut child_paths = Vec::new();

        // Access the map directly without creating a new one if it doesn't exist
        if let Some(bmap_ref) = self.inner.get(&map_key) {
            for key in bmap_ref.keys() {
                let is_child = minimum_path.is_empty()
                    || (key.len() > minimum_path.len()
                        && key.starts_with(&minimum_path)
                        && key[minimum_path.len()..].starts_with('/'));
                if is_child {
                    child_paths.push(format!("{}/{}", map_key, key));
                }
            }
        }
        Ok(child_paths)
    }

    // Put a new value for a given key
    async fn put(&self, path: &str, value: Value) -> Result<()> {
        let (map_key, key) = Self::split_path(path)?;

        // Validate that there's actually a key to store (path must have more than 3 parts)
        if key.is_empty() {
            return Err(MetadataError::InvalidArguments(format!(
                "Path must have a key component: {}",
                path
            )));
        }

        self.get_map(&map_key).insert(key, value);
        Ok(())
    }

    // Delete the key / value from the store
    async fn delete(&self, path: &str) -> Result<()> {
        let (map_key, key) = Self::split_path(path)?;

        if key.is_empty() {
            return Err(MetadataError::Unknown("wrong path".to_string()));
        }

        if let Some(mut bmap) = self.inner.get_mut(&map_key) {
            bmap.remove(&key);
        }
        Ok(())
    }

    async fn put_batch(&self, entries: Vec<(String, Value)>) -> Result<()> {
        // Validate every path before touching any map, so a bad entry leaves the store unchanged.
        let mut resolved = Vec::with_capacity(entries.len());
        for (path, value) in entries {
            let (map_key, key) = Self::split_path(&path)?;
            if key.is_empty() {
                return Err(MetadataError::InvalidArguments(format!(
                    "Path must have a key component: {}",
                    path
                )));
            }
            resolved.push((map_key, key, value));
        }

        for (map_key, key, value) in resolved {
            self.get_map(&map_key).insert(key, value);
        }
        Ok(())
    }

    async fn get_bulk(&self, prefix: &str) -> Result<Vec<KeyValueVersion>> {
        let (map_key, suffix) = Self::split_path(prefix)?;

        let mut out: Vec<KeyValueVersion> = Vec::new();
        if let Some(bmap_ref) = self.inner.get(&map_key) {
            for (k, v) in bmap_ref.iter() {
                if k.starts_with(&suffix) {
                    out.push(KeyValueVersion {
                        key: format!("{}/{}", map_key, k),
                        value: serde_json::to_vec(v)?,
                        version: 0,
                    });
                }
            }
        }
        Ok(out)
    }
}
