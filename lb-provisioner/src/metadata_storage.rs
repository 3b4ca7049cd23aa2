//! Provisioner metadata storage enum.
//!
//! Wraps any `MetadataStore` implementation behind `Arc<dyn MetadataStore>`.
//! Production plugs in the coordination store client; tests use the in-memory backend.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use lb_core::metadata::{KeyValueVersion, MemoryStore, MetadataError, MetadataStore};

type Result<T> = std::result::Result<T, MetadataError>;

pub enum MetadataStorage {
    Shared(Arc<dyn MetadataStore>),
    InMemory(MemoryStore),
}

impl Clone for MetadataStorage {
    fn clone(&self) -> Self {
        match self {
            Self::Shared(s) => Self::Shared(Arc::clone(s)),
            Self::InMemory(s) => Self::InMemory(s.clone()),
        }
    }
}

impl fmt::Debug for MetadataStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shared(_) => f.debug_tuple("Shared").field(&"...").finish(),
            Self::InMemory(s) => f.debug_tuple("InMemory").field(s).finish(),
        }
    }
}

#[async_trait]
impl MetadataStore for MetadataStorage {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        match self {
            Self::Shared(s) => s.get(key).await,
            Self::InMemory(s) => s.get(key).await,
        }
    }

    async fn get_childrens(&self, path: &str) -> Result<Vec<String>> {
        match self {
            Self::Shared(s) => s.get_childrens(path).await,
            Self::InMemory(s) => s.get_childrens(path).await,
        }
    }

    async fn put(&self, key: &str, value: Value) -> Result<()> {
        match self {
            Self::Shared(s) => s.put(key, value).await,
            Self::InMemory(s) => s.put(key, value).await,
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match self {
            Self::Shared(s) => s.delete(key).await,
            Self::InMemory(s) => s.delete(key).await,
        }
    }

    async fn put_batch(&self, entries: Vec<(String, Value)>) -> Result<()> {
        match self {
            Self::Shared(s) => s.put_batch(entries).await,
            Self::InMemory(s) => s.put_batch(entries).await,
        }
    }

    async fn get_bulk(&self, prefix: &str) -> Result<Vec<KeyValueVersion>> {
        match self {
            Self::Shared(s) => s.get_bulk(prefix).await,
            Self::InMemory(s) => s.get_bulk(prefix).await,
        }
    }
}
