use std::net::IpAddr;

use crate::application::ApplicationId;
use crate::cluster::{ClusterSpec, NodeType};
use crate::zone::CloudAccount;

/// Allocation records which application and cluster a node is assigned to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub owner: ApplicationId,
    pub cluster: ClusterSpec,
}

/// Node is a machine as seen by the allocation workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub hostname: String,
    pub node_type: NodeType,
    /// Primary addresses of the node, in the order they were assigned
    pub ip_addresses: Vec<IpAddr>,
    pub cloud_account: CloudAccount,
    pub allocation: Option<Allocation>,
}

impl Node {
    pub fn new(
        hostname: impl Into<String>,
        node_type: NodeType,
        ip_addresses: Vec<IpAddr>,
    ) -> Self {
        Node {
            hostname: hostname.into(),
            node_type,
            ip_addresses,
            cloud_account: CloudAccount::unspecified(),
            allocation: None,
        }
    }

    pub fn with_cloud_account(mut self, cloud_account: CloudAccount) -> Self {
        self.cloud_account = cloud_account;
        self
    }

    pub fn allocated_to(mut self, owner: ApplicationId, cluster: ClusterSpec) -> Self {
        self.allocation = Some(Allocation { owner, cluster });
        self
    }
}

/// NodeSpec is the node request of a cluster, before any node is allocated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSpec {
    pub node_type: NodeType,
    pub cloud_account: CloudAccount,
}

impl NodeSpec {
    pub fn new(node_type: NodeType, cloud_account: CloudAccount) -> Self {
        NodeSpec {
            node_type,
            cloud_account,
        }
    }
}
