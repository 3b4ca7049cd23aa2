#![allow(dead_code)]

use std::sync::Arc;

use lb_core::application::ApplicationId;
use lb_core::cluster::{ClusterId, ClusterSpec, ClusterType, NodeType};
use lb_core::metadata::MemoryStore;
use lb_core::node::{Node, NodeSpec};
use lb_core::zone::{CloudAccount, ZoneEndpoint};
use lb_provisioner::service::memory::MemoryLoadBalancerService;
use lb_provisioner::{LoadBalancerProvisioner, LocalLocks, MetadataStorage, ProvisionerConfig};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Builds a provisioner over an in-memory store from a YAML configuration.
pub fn provisioner(config_yaml: &str) -> (LoadBalancerProvisioner, MemoryLoadBalancerService) {
    let config = ProvisionerConfig::from_yaml(config_yaml).expect("valid configuration");
    let service = MemoryLoadBalancerService::new();
    let provisioner = LoadBalancerProvisioner::from_config(
        MetadataStorage::InMemory(MemoryStore::new()),
        Arc::new(LocalLocks::new()),
        Arc::new(service.clone()),
        &config,
    );
    (provisioner, service)
}

pub fn app(tenant: &str, application: &str, instance: &str) -> ApplicationId {
    ApplicationId::new(tenant, application, instance).expect("valid application id")
}

pub fn container(id: &str) -> ClusterSpec {
    ClusterSpec::of(
        ClusterType::Container,
        ClusterId::new(id).expect("valid cluster id"),
        ZoneEndpoint::default(),
    )
    .expect("valid cluster")
}

pub fn tenant_spec() -> NodeSpec {
    NodeSpec::new(NodeType::Tenant, CloudAccount::unspecified())
}

/// A tenant node allocated to `owner`, with one IPv4 and one IPv6 address.
pub fn allocated_node(index: u8, owner: &ApplicationId, cluster: &ClusterSpec) -> Node {
    Node::new(
        format!("host{}.example.com", index),
        NodeType::Tenant,
        vec![
            format!("10.0.0.{}", index).parse().expect("valid ipv4"),
            format!("2001:db8::{}", index).parse().expect("valid ipv6"),
        ],
    )
    .allocated_to(owner.clone(), cluster.clone())
}
