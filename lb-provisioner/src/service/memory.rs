use async_trait::async_trait;
use dashmap::DashMap;
use lb_core::cluster::{ClusterType, NodeType};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use super::{LoadBalancerService, LoadBalancerSpec, Protocol, ServiceError};
use crate::load_balancer::{LoadBalancerId, LoadBalancerInstance, PrivateServiceId, Real};

/// A recorded call to [`LoadBalancerService::configure`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigureCall {
    pub id: LoadBalancerId,
    pub reals: BTreeSet<Real>,
    pub force_full_reset: bool,
}

/// MemoryLoadBalancerService keeps load balancer instances in memory and counts the calls made
/// to it. SHOULD BE USED ONLY FOR TESTING PURPOSES
#[derive(Debug, Clone)]
pub struct MemoryLoadBalancerService {
    instances: Arc<DashMap<LoadBalancerId, LoadBalancerInstance>>,
    provision_calls: Arc<AtomicUsize>,
    configure_log: Arc<Mutex<Vec<ConfigureCall>>>,
    failing: Arc<AtomicBool>,
    protocol: Protocol,
    exclave_protocol: Protocol,
}

impl Default for MemoryLoadBalancerService {
    fn default() -> Self {
        MemoryLoadBalancerService::new()
    }
}

impl MemoryLoadBalancerService {
    pub fn new() -> Self {
        MemoryLoadBalancerService {
            instances: Arc::new(DashMap::new()),
            provision_calls: Arc::new(AtomicUsize::new(0)),
            configure_log: Arc::new(Mutex::new(Vec::new())),
            failing: Arc::new(AtomicBool::new(false)),
            protocol: Protocol::Ipv4,
            exclave_protocol: Protocol::Ipv6,
        }
    }

    /// Sets the protocol reported for regular and exclave accounts.
    pub fn with_protocols(mut self, protocol: Protocol, exclave_protocol: Protocol) -> Self {
        self.protocol = protocol;
        self.exclave_protocol = exclave_protocol;
        self
    }

    /// Makes every following provision and configure call fail until reset.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn provision_calls(&self) -> usize {
        self.provision_calls.load(Ordering::SeqCst)
    }

    pub fn configure_calls(&self) -> Vec<ConfigureCall> {
        self.configure_log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn instance(&self, id: &LoadBalancerId) -> Option<LoadBalancerInstance> {
        self.instances.get(id).map(|i| i.clone())
    }

    fn check_available(&self) -> Result<(), ServiceError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ServiceError::Unavailable("injected failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl LoadBalancerService for MemoryLoadBalancerService {
    fn supports(&self, node_type: NodeType, cluster_type: ClusterType) -> bool {
        match node_type {
            NodeType::Tenant | NodeType::Controller => cluster_type.is_container(),
            NodeType::Config => cluster_type == ClusterType::Admin,
            _ => false,
        }
    }

    async fn provision(
        &self,
        spec: &LoadBalancerSpec,
    ) -> Result<LoadBalancerInstance, ServiceError> {
        self.check_available()?;
        self.provision_calls.fetch_add(1, Ordering::SeqCst);

        let id = LoadBalancerId::new(spec.application.clone(), spec.cluster.clone());
        let existing = self
            .instances
            .get(&id)
            .map(|i| i.clone())
            .filter(|i| i.cloud_account == spec.cloud_account);

        let instance = match existing {
            Some(existing) => LoadBalancerInstance {
                reals: spec.reals.clone(),
                settings: spec.settings.clone(),
                ..existing
            },
            None => LoadBalancerInstance {
                hostname: Some(format!(
                    "lb-{}--{}--{}--{}.vip.example.com",
                    spec.cluster,
                    spec.application.instance(),
                    spec.application.application(),
                    spec.application.tenant()
                )),
                ip4_address: None,
                ip6_address: None,
                dns_zone: Some("zone-1".to_string()),
                ports: BTreeSet::from([443]),
                networks: BTreeSet::from(["10.2.3.0/24".to_string()]),
                reals: spec.reals.clone(),
                settings: spec.settings.clone(),
                service_ids: Vec::new(),
                cloud_account: spec.cloud_account.clone(),
            },
        };
        self.instances.insert(id, instance.clone());
        Ok(instance)
    }

    async fn configure(
        &self,
        instance: &LoadBalancerInstance,
        spec: &LoadBalancerSpec,
        force_full_reset: bool,
    ) -> Result<LoadBalancerInstance, ServiceError> {
        self.check_available()?;

        let id = LoadBalancerId::new(spec.application.clone(), spec.cluster.clone());
        if !self.instances.contains_key(&id) {
            return Err(ServiceError::Rejected(format!(
                "{} does not exist",
                id
            )));
        }
        self.configure_log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ConfigureCall {
                id: id.clone(),
                reals: spec.reals.clone(),
                force_full_reset,
            });

        let mut configured = LoadBalancerInstance {
            reals: spec.reals.clone(),
            settings: spec.settings.clone(),
            ..instance.clone()
        };
        // Private endpoint services are created once the load balancer has targets
        if spec.settings.is_private_endpoint() && configured.service_ids.is_empty() {
            configured.service_ids = vec![PrivateServiceId(format!(
                "vpce-svc-{}",
                id.serialized_form().replace(':', "-")
            ))];
        }
        self.instances.insert(id, configured.clone());
        Ok(configured)
    }

    fn protocol(&self, exclave: bool) -> Protocol {
        if exclave {
            self.exclave_protocol
        } else {
            self.protocol
        }
    }
}
