mod errors;
pub use errors::{MetadataError, Result};

mod store;
pub use store::{KeyValueVersion, MetadataStore};

mod memory_store;
pub use memory_store::MemoryStore;
