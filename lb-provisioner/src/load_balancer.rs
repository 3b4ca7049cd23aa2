use chrono::{DateTime, Utc};
use lb_core::application::ApplicationId;
use lb_core::cluster::ClusterId;
use lb_core::zone::{CloudAccount, ZoneEndpoint};
use lb_core::ModelError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::errors::{ProvisionError, Result};

/// Port the load balancer forwards to on every real, unless the service says otherwise.
pub const DEFAULT_REAL_PORT: u16 = 4443;

/// LoadBalancerId identifies the load balancer of one effective cluster of an application.
///
/// Serialized as `tenant:application:instance:cluster`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LoadBalancerId {
    application: ApplicationId,
    cluster: ClusterId,
}

impl LoadBalancerId {
    pub fn new(application: ApplicationId, cluster: ClusterId) -> Self {
        LoadBalancerId {
            application,
            cluster,
        }
    }

    pub fn from_serialized(value: &str) -> std::result::Result<Self, ModelError> {
        let invalid = || ModelError::InvalidLoadBalancerId(value.to_string());
        let (application, cluster) = value.rsplit_once(':').ok_or_else(invalid)?;
        let application = ApplicationId::from_serialized(application).map_err(|_| invalid())?;
        let cluster = ClusterId::new(cluster).map_err(|_| invalid())?;
        Ok(LoadBalancerId::new(application, cluster))
    }

    pub fn serialized_form(&self) -> String {
        format!("{}:{}", self.application.serialized_form(), self.cluster)
    }

    pub fn application(&self) -> &ApplicationId {
        &self.application
    }

    pub fn cluster(&self) -> &ClusterId {
        &self.cluster
    }

    /// The parts of this id that survive DNS name compaction: the cluster unless it is the
    /// default cluster, then the instance unless it is the default instance.
    pub fn non_compactable_parts(&self) -> Vec<&str> {
        let mut parts = Vec::with_capacity(2);
        if !self.cluster.is_default() {
            parts.push(self.cluster.value());
        }
        if !self.application.has_default_instance() {
            parts.push(self.application.instance());
        }
        parts
    }

    /// Returns true if `other` is a different load balancer of the same tenant and application
    /// whose compacted name would be identical to this one.
    pub fn clashes_with(&self, other: &LoadBalancerId) -> bool {
        self != other
            && self.application.same_application(&other.application)
            && self.non_compactable_parts() == other.non_compactable_parts()
    }
}

impl fmt::Display for LoadBalancerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "load balancer {}", self.serialized_form())
    }
}

impl TryFrom<String> for LoadBalancerId {
    type Error = ModelError;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        LoadBalancerId::from_serialized(&value)
    }
}

impl From<LoadBalancerId> for String {
    fn from(id: LoadBalancerId) -> Self {
        id.serialized_form()
    }
}

/// Lifecycle state of a load balancer.
///
/// ```text
/// (new) -> reserved -> active
/// active -> inactive -> active
/// reserved | active | inactive -> removable
/// ```
///
/// Records in `Removable` are only ever deleted, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum State {
    /// Provisioned, but not yet receiving traffic
    Reserved,
    /// Provisioned and targeting the active nodes of its cluster
    Active,
    /// Previously active. The instance is kept, its targets may be stale
    Inactive,
    /// Must be replaced. Awaits removal
    Removable,
}

impl State {
    fn can_transition_to(self, to: State) -> bool {
        match (self, to) {
            (from, to) if from == to => true,
            (State::Removable, _) => false,
            (_, State::Reserved) => false,
            _ => true,
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            State::Reserved => "reserved",
            State::Active => "active",
            State::Inactive => "inactive",
            State::Removable => "removable",
        };
        write!(f, "{}", name)
    }
}

/// Real is a backend target of a load balancer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Real {
    pub hostname: String,
    pub ip_address: IpAddr,
    pub port: u16,
}

impl Real {
    pub fn new(hostname: impl Into<String>, ip_address: IpAddr) -> Self {
        Real {
            hostname: hostname.into(),
            ip_address,
            port: DEFAULT_REAL_PORT,
        }
    }
}

impl fmt::Display for Real {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}:{})", self.hostname, self.ip_address, self.port)
    }
}

/// Identifier assigned by the service to a private endpoint service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrivateServiceId(pub String);

/// LoadBalancerInstance is the cloud resource backing a load balancer, as reported by the
/// provisioning service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancerInstance {
    pub hostname: Option<String>,
    pub ip4_address: Option<Ipv4Addr>,
    pub ip6_address: Option<Ipv6Addr>,
    pub dns_zone: Option<String>,
    #[serde(default)]
    pub ports: BTreeSet<u16>,
    #[serde(default)]
    pub networks: BTreeSet<String>,
    #[serde(default)]
    pub reals: BTreeSet<Real>,
    #[serde(default)]
    pub settings: ZoneEndpoint,
    #[serde(default)]
    pub service_ids: Vec<PrivateServiceId>,
    #[serde(default)]
    pub cloud_account: CloudAccount,
}

impl LoadBalancerInstance {
    /// An instance must be addressable by hostname or IPv4 address.
    pub fn validate(&self) -> std::result::Result<(), ModelError> {
        if self.hostname.is_none() && self.ip4_address.is_none() {
            return Err(ModelError::InvalidInstance(
                "hostname or ip4 address must be set".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_service_ids(mut self, service_ids: Vec<PrivateServiceId>) -> Self {
        self.service_ids = service_ids;
        self
    }
}

/// LoadBalancer is the persisted record of a cluster's load balancer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancer {
    id: LoadBalancerId,
    #[serde(default)]
    instance: Option<LoadBalancerInstance>,
    state: State,
    changed_at: DateTime<Utc>,
}

impl LoadBalancer {
    pub fn new(
        id: LoadBalancerId,
        instance: Option<LoadBalancerInstance>,
        state: State,
        changed_at: DateTime<Utc>,
    ) -> Self {
        LoadBalancer {
            id,
            instance,
            state,
            changed_at,
        }
    }

    pub fn id(&self) -> &LoadBalancerId {
        &self.id
    }

    pub fn instance(&self) -> Option<&LoadBalancerInstance> {
        self.instance.as_ref()
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn changed_at(&self) -> DateTime<Utc> {
        self.changed_at
    }

    pub fn with_instance(mut self, instance: LoadBalancerInstance) -> Self {
        self.instance = Some(instance);
        self
    }

    /// Moves this to `state`. Re-entering the current state keeps the original timestamp.
    pub fn with_state(mut self, state: State, now: DateTime<Utc>) -> Result<Self> {
        if self.state == state {
            return Ok(self);
        }
        if !self.state.can_transition_to(state) {
            return Err(ProvisionError::InvalidTransition {
                id: self.id,
                from: self.state,
                to: state,
            });
        }
        self.state = state;
        self.changed_at = now;
        Ok(self)
    }
}

/// A filterable list of load balancers.
#[derive(Debug, Clone, Default)]
pub struct LoadBalancerList {
    load_balancers: Vec<LoadBalancer>,
}

impl LoadBalancerList {
    pub fn new(load_balancers: Vec<LoadBalancer>) -> Self {
        LoadBalancerList { load_balancers }
    }

    pub fn in_state(self, state: State) -> Self {
        self.filter(|lb| lb.state() == state)
    }

    pub fn owned_by(self, application: &ApplicationId) -> Self {
        self.filter(|lb| lb.id().application() == application)
    }

    pub fn get(&self, id: &LoadBalancerId) -> Option<&LoadBalancer> {
        self.load_balancers.iter().find(|lb| lb.id() == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &LoadBalancer> {
        self.load_balancers.iter()
    }

    pub fn len(&self) -> usize {
        self.load_balancers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.load_balancers.is_empty()
    }

    pub fn into_vec(self) -> Vec<LoadBalancer> {
        self.load_balancers
    }

    fn filter(self, predicate: impl Fn(&LoadBalancer) -> bool) -> Self {
        LoadBalancerList {
            load_balancers: self
                .load_balancers
                .into_iter()
                .filter(|lb| predicate(lb))
                .collect(),
        }
    }
}

impl IntoIterator for LoadBalancerList {
    type Item = LoadBalancer;
    type IntoIter = std::vec::IntoIter<LoadBalancer>;

    fn into_iter(self) -> Self::IntoIter {
        self.load_balancers.into_iter()
    }
}
