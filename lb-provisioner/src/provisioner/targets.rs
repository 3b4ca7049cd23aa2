//! Which nodes a load balancer targets, and on which addresses.

use lb_core::application::ApplicationId;
use lb_core::cluster::{ClusterId, ClusterSpec, ClusterType, NodeType};
use lb_core::node::Node;
use lb_core::zone::ZoneEndpoint;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use tracing::warn;

use crate::load_balancer::Real;
use crate::service::Protocol;

/// The allocated nodes of one effective cluster.
#[derive(Debug)]
pub(crate) struct ClusterNodes<'a> {
    pub(crate) node_type: NodeType,
    pub(crate) cluster_type: ClusterType,
    pub(crate) nodes: Vec<&'a Node>,
}

/// Maps each effective cluster id to the endpoint settings of its declarations.
///
/// A non-default setting wins over the default one. When declarations folding into the same
/// cluster disagree on non-default settings, the first declared is kept.
pub(crate) fn effective_endpoints(clusters: &[ClusterSpec]) -> BTreeMap<ClusterId, ZoneEndpoint> {
    let mut endpoints: BTreeMap<ClusterId, ZoneEndpoint> = BTreeMap::new();
    for cluster in clusters {
        let candidate = cluster.zone_endpoint();
        match endpoints.entry(cluster.effective_id().clone()) {
            Entry::Vacant(entry) => {
                entry.insert(candidate.clone());
            }
            Entry::Occupied(mut entry) => {
                if entry.get().is_default() {
                    entry.insert(candidate.clone());
                } else if !candidate.is_default() && candidate != entry.get() {
                    warn!(
                        cluster = %entry.key(),
                        declared_by = %cluster.id(),
                        "conflicting zone endpoints for combined cluster, keeping the first declared"
                    );
                }
            }
        }
    }
    endpoints
}

/// Returns the load balanced clusters among the nodes allocated to `application`, keyed by
/// effective cluster id.
///
/// Config servers and controllers are load balanced in their own deployments. When such nodes
/// are present only they are considered, otherwise the tenant nodes of container clusters.
pub(crate) fn load_balanced_clusters_of<'a>(
    application: &ApplicationId,
    nodes: &'a [Node],
) -> BTreeMap<ClusterId, ClusterNodes<'a>> {
    let allocated: Vec<(&Node, &ClusterSpec)> = nodes
        .iter()
        .filter_map(|node| {
            node.allocation
                .as_ref()
                .filter(|allocation| &allocation.owner == application)
                .map(|allocation| (node, &allocation.cluster))
        })
        .collect();

    let has_type = |node_type: NodeType| allocated.iter().any(|(n, _)| n.node_type == node_type);
    let selected: fn(&Node, &ClusterSpec) -> bool = if has_type(NodeType::Config) {
        |n, c| n.node_type == NodeType::Config && c.cluster_type() == ClusterType::Admin
    } else if has_type(NodeType::Controller) {
        |n, c| n.node_type == NodeType::Controller && c.cluster_type().is_container()
    } else {
        |n, c| n.node_type == NodeType::Tenant && c.cluster_type().is_container()
    };

    let mut clusters: BTreeMap<ClusterId, ClusterNodes<'a>> = BTreeMap::new();
    for (node, cluster) in allocated {
        if !selected(node, cluster) {
            continue;
        }
        clusters
            .entry(cluster.effective_id().clone())
            .or_insert_with(|| ClusterNodes {
                node_type: node.node_type,
                cluster_type: cluster.cluster_type(),
                nodes: Vec::new(),
            })
            .nodes
            .push(node);
    }
    clusters
}

/// Returns the reals for `nodes`, keeping only the addresses reachable with the protocol
/// `protocol_of` picks for each node.
pub(crate) fn reals_of(
    nodes: &[&Node],
    protocol_of: impl Fn(&Node) -> Protocol,
) -> BTreeSet<Real> {
    let mut reals = BTreeSet::new();
    for node in nodes {
        let protocol = protocol_of(node);
        for ip in node.ip_addresses.iter().filter(|ip| reachable(protocol, ip)) {
            reals.insert(Real::new(node.hostname.clone(), *ip));
        }
    }
    reals
}

fn reachable(protocol: Protocol, ip: &IpAddr) -> bool {
    match protocol {
        Protocol::Ipv4 => ip.is_ipv4(),
        Protocol::Ipv6 => ip.is_ipv6(),
        Protocol::DualStack => true,
    }
}
