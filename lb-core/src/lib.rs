pub mod application;
pub mod cluster;
pub mod metadata;
pub mod node;
pub mod zone;

mod errors;
pub use errors::ModelError;
