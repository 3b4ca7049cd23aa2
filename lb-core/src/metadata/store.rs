use async_trait::async_trait;
use serde_json::Value;

use super::errors::Result;

/// A key-value-version tuple returned by bulk queries.
#[derive(Debug)]
pub struct KeyValueVersion {
    pub key: String,
    pub value: Vec<u8>,
    pub version: i64,
}

#[async_trait]
pub trait MetadataStore: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<Option<Value>>;
    async fn get_childrens(&self, path: &str) -> Result<Vec<String>>;
    async fn put(&self, key: &str, value: Value) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;

    /// Write all entries as one unit: either every entry is stored or none is.
    ///
    /// Used to commit load balancer records together with the node allocation
    /// changes of the same deployment.
    async fn put_batch(&self, entries: Vec<(String, Value)>) -> Result<()>;

    /// Retrieve all key-value pairs under a given prefix.
    async fn get_bulk(&self, prefix: &str) -> Result<Vec<KeyValueVersion>>;
}
