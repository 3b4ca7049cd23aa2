use serde::{Deserialize, Serialize};
use std::fmt;

use crate::zone::ZoneEndpoint;
use crate::ModelError;

/// Name of the cluster id used when an application declares a single unnamed cluster.
pub const DEFAULT_CLUSTER: &str = "default";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    /// Node running application workloads
    Tenant,
    /// Host of tenant nodes
    Host,
    /// Config server node
    Config,
    /// Controller node
    Controller,
    /// Routing proxy node
    Proxy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterType {
    Admin,
    Container,
    Content,
    /// A container and content cluster sharing the same nodes
    Combined,
}

impl ClusterType {
    /// Returns true for cluster types that run containers, including combined clusters.
    pub fn is_container(&self) -> bool {
        matches!(self, ClusterType::Container | ClusterType::Combined)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ClusterId(String);

impl ClusterId {
    pub fn new(id: impl Into<String>) -> Result<Self, ModelError> {
        let id = id.into();
        if id.is_empty() || id.contains(':') || id.contains('/') {
            return Err(ModelError::InvalidCluster(format!("invalid cluster id '{}'", id)));
        }
        Ok(ClusterId(id))
    }

    pub fn default_id() -> Self {
        ClusterId(DEFAULT_CLUSTER.to_string())
    }

    pub fn value(&self) -> &str {
        &self.0
    }

    pub fn is_default(&self) -> bool {
        self.0 == DEFAULT_CLUSTER
    }
}

impl TryFrom<String> for ClusterId {
    type Error = ModelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ClusterId::new(value)
    }
}

impl From<ClusterId> for String {
    fn from(id: ClusterId) -> Self {
        id.0
    }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// ClusterSpec is a cluster as declared by an application deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterSpec {
    cluster_type: ClusterType,
    id: ClusterId,
    combined_id: Option<ClusterId>,
    zone_endpoint: ZoneEndpoint,
}

impl ClusterSpec {
    /// Creates a cluster spec. Combined clusters must name the cluster they are combined with,
    /// other cluster types must not.
    pub fn new(
        cluster_type: ClusterType,
        id: ClusterId,
        combined_id: Option<ClusterId>,
        zone_endpoint: ZoneEndpoint,
    ) -> Result<Self, ModelError> {
        match (cluster_type, &combined_id) {
            (ClusterType::Combined, None) => {
                return Err(ModelError::InvalidCluster(format!(
                    "combined id must be set for cluster '{}' of type combined",
                    id
                )))
            }
            (t, Some(combined)) if t != ClusterType::Combined => {
                return Err(ModelError::InvalidCluster(format!(
                    "combined id '{}' set for cluster '{}' of type {:?}",
                    combined, id, t
                )))
            }
            _ => {}
        }
        Ok(ClusterSpec {
            cluster_type,
            id,
            combined_id,
            zone_endpoint,
        })
    }

    /// Shorthand for a non-combined cluster.
    pub fn of(
        cluster_type: ClusterType,
        id: ClusterId,
        zone_endpoint: ZoneEndpoint,
    ) -> Result<Self, ModelError> {
        ClusterSpec::new(cluster_type, id, None, zone_endpoint)
    }

    pub fn cluster_type(&self) -> ClusterType {
        self.cluster_type
    }

    pub fn id(&self) -> &ClusterId {
        &self.id
    }

    pub fn zone_endpoint(&self) -> &ZoneEndpoint {
        &self.zone_endpoint
    }

    /// The id of the logical cluster this declaration belongs to.
    pub fn effective_id(&self) -> &ClusterId {
        self.combined_id.as_ref().unwrap_or(&self.id)
    }
}
