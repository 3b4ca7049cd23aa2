//! # Load Balancer Provisioner
//!
//! Provisions and reconciles the load balancers in front of hosted application clusters.
//!
//! ## Core Responsibilities
//!
//! - **Prepare**: Provisions a load balancer per cluster before nodes are allocated
//! - **Activate**: Points load balancers at the allocated nodes, within the deployment transaction
//! - **Deactivate**: Stops routing to clusters that were removed, or to removed applications
//! - **Poisoning**: Marks load balancers removable when their account or visibility must change
//!
//! ## Architecture
//!
//! Every mutation of an application's load balancers happens under its application lock:
//! 1. `prepare` writes its record directly to the metadata store
//! 2. `activate` and `deactivate` queue writes in an [`ApplicationTransaction`]
//! 3. The caller commits the transaction through [`LoadBalancerResources::commit`], which
//!    rejects the whole batch if any record changed state since it was read

pub mod config;
pub mod errors;
pub mod load_balancer;
pub mod locks;
pub mod metadata_storage;
pub mod resources;
pub mod service;
pub mod transaction;
mod provisioner;

// Re-export main types
pub use config::{FeatureFlags, ProvisionerConfig};
pub use errors::{PoisonReason, ProvisionError, Result};
pub use load_balancer::{
    LoadBalancer, LoadBalancerId, LoadBalancerInstance, LoadBalancerList, Real, State,
};
pub use locks::{ApplicationLock, LocalLocks, LockProvider};
pub use metadata_storage::MetadataStorage;
pub use provisioner::LoadBalancerProvisioner;
pub use resources::LoadBalancerResources;
pub use service::{LoadBalancerService, LoadBalancerSpec, Protocol, ServiceError};
pub use transaction::ApplicationTransaction;

// Unit tests
#[cfg(test)]
mod provisioner_test;
