use anyhow::{Context, Result};
use lb_core::application::ApplicationId;
use lb_core::zone::{CloudAccount, Zone};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs::read_to_string;
use std::path::Path;
use std::time::Duration;

fn default_lock_timeout_ms() -> u64 {
    60_000
}

/// Provisioner configuration, loaded from a YAML file
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ProvisionerConfig {
    /// The zone this provisioner manages load balancers in
    #[serde(default)]
    pub zone: Zone,

    /// How long to wait for an application lock before giving up (milliseconds)
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,

    /// Flag values used when the caller has no fresher snapshot
    #[serde(default)]
    pub flags: FeatureFlags,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            zone: Zone::default(),
            lock_timeout_ms: default_lock_timeout_ms(),
            flags: FeatureFlags::default(),
        }
    }
}

impl ProvisionerConfig {
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Failed to parse provisioner configuration")
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_yaml(&content)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

/// FeatureFlags is a snapshot of the flag values relevant to load balancer activation.
///
/// Resolved by the caller once per deployment and passed in, so one activation never sees
/// two different values of the same flag.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct FeatureFlags {
    /// Applications whose load balancers are kept, but must not route traffic to any node
    #[serde(default)]
    pub deactivate_routing: BTreeSet<ApplicationId>,

    /// Cloud accounts whose load balancers always target IPv6 addresses
    #[serde(default)]
    pub ipv6_target_groups: BTreeSet<CloudAccount>,
}

impl FeatureFlags {
    pub fn with_deactivated_routing(mut self, application: ApplicationId) -> Self {
        self.deactivate_routing.insert(application);
        self
    }

    pub fn with_ipv6_target_groups(mut self, cloud_account: CloudAccount) -> Self {
        self.ipv6_target_groups.insert(cloud_account);
        self
    }

    pub fn routing_deactivated(&self, application: &ApplicationId) -> bool {
        self.deactivate_routing.contains(application)
    }

    pub fn force_ipv6(&self, cloud_account: &CloudAccount) -> bool {
        self.ipv6_target_groups.contains(cloud_account)
    }
}
