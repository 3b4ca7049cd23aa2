//! The cloud-facing side of load balancer provisioning.
//!
//! Implementations talk to the cloud provider's load balancer API. Every operation must be
//! idempotent: the provisioner replays them on each deployment.

pub mod memory;

use async_trait::async_trait;
use lb_core::application::ApplicationId;
use lb_core::cluster::{ClusterId, ClusterType, NodeType};
use lb_core::zone::{CloudAccount, ZoneEndpoint};
use std::collections::BTreeSet;
use thiserror::Error;

use crate::load_balancer::{LoadBalancerInstance, Real};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("load balancer service unavailable: {0}")]
    Unavailable(String),

    #[error("load balancer service rejected the request: {0}")]
    Rejected(String),
}

/// Address family the load balancer service can reach its reals on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Ipv4,
    Ipv6,
    DualStack,
}

/// LoadBalancerSpec is the desired state of a load balancer, as sent to the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadBalancerSpec {
    pub application: ApplicationId,
    pub cluster: ClusterId,
    pub reals: BTreeSet<Real>,
    pub settings: ZoneEndpoint,
    pub cloud_account: CloudAccount,
}

impl LoadBalancerSpec {
    pub fn new(
        application: ApplicationId,
        cluster: ClusterId,
        reals: BTreeSet<Real>,
        settings: ZoneEndpoint,
        cloud_account: CloudAccount,
    ) -> Self {
        LoadBalancerSpec {
            application,
            cluster,
            reals,
            settings,
            cloud_account,
        }
    }
}

#[async_trait]
pub trait LoadBalancerService: Send + Sync + 'static {
    /// Whether load balancers are provisioned for nodes of this type in clusters of this type.
    fn supports(&self, node_type: NodeType, cluster_type: ClusterType) -> bool;

    /// Create a load balancer, or update the settings of an existing one.
    async fn provision(
        &self,
        spec: &LoadBalancerSpec,
    ) -> Result<LoadBalancerInstance, ServiceError>;

    /// Point an existing load balancer at the reals in `spec`.
    ///
    /// With `force_full_reset` the service must replace the complete target set instead of
    /// applying a diff against what it believes is currently configured.
    async fn configure(
        &self,
        instance: &LoadBalancerInstance,
        spec: &LoadBalancerSpec,
        force_full_reset: bool,
    ) -> Result<LoadBalancerInstance, ServiceError>;

    /// The protocol used to reach reals, given whether they live in an exclave account.
    fn protocol(&self, exclave: bool) -> Protocol;
}
