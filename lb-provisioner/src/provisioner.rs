//! Provisions and configures application load balancers.
//!
//! Load balancers are prepared while a deployment is planned, before any node is allocated,
//! and activated as part of the transaction that commits the allocation. See
//! [`State`](crate::load_balancer::State) for the lifecycle.

mod targets;

use chrono::Utc;
use lb_core::application::ApplicationId;
use lb_core::cluster::{ClusterId, ClusterSpec, ClusterType, NodeType};
use lb_core::node::{Node, NodeSpec};
use lb_core::zone::{CloudAccount, Zone, ZoneEndpoint};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{FeatureFlags, ProvisionerConfig};
use crate::errors::{PoisonReason, ProvisionError, Result};
use crate::load_balancer::{
    LoadBalancer, LoadBalancerId, LoadBalancerInstance, LoadBalancerList, State,
};
use crate::locks::LockProvider;
use crate::metadata_storage::MetadataStorage;
use crate::resources::LoadBalancerResources;
use crate::service::{LoadBalancerService, LoadBalancerSpec, Protocol};
use crate::transaction::ApplicationTransaction;

use targets::{effective_endpoints, load_balanced_clusters_of, reals_of};

/// The record to persist after reconciling a load balancer in prepare, together with the
/// outcome. The record is persisted whether or not reconciliation succeeded.
struct Reconciled {
    record: LoadBalancer,
    outcome: Result<()>,
}

impl Reconciled {
    fn succeeded(record: LoadBalancer) -> Self {
        Reconciled {
            record,
            outcome: Ok(()),
        }
    }

    fn failed(record: LoadBalancer, error: ProvisionError) -> Self {
        Reconciled {
            record,
            outcome: Err(error),
        }
    }
}

#[derive(Clone)]
pub struct LoadBalancerProvisioner {
    db: LoadBalancerResources,
    service: Arc<dyn LoadBalancerService>,
    zone: Zone,
}

impl std::fmt::Debug for LoadBalancerProvisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadBalancerProvisioner")
            .field("db", &self.db)
            .field("zone", &self.zone)
            .finish()
    }
}

impl LoadBalancerProvisioner {
    pub fn new(
        db: LoadBalancerResources,
        service: Arc<dyn LoadBalancerService>,
        zone: Zone,
    ) -> Self {
        LoadBalancerProvisioner { db, service, zone }
    }

    pub fn from_config(
        store: MetadataStorage,
        locks: Arc<dyn LockProvider>,
        service: Arc<dyn LoadBalancerService>,
        config: &ProvisionerConfig,
    ) -> Self {
        let db = LoadBalancerResources::new(store, locks, config.lock_timeout());
        LoadBalancerProvisioner::new(db, service, config.zone.clone())
    }

    pub fn db(&self) -> &LoadBalancerResources {
        &self.db
    }

    /// Reads and writes back every stored load balancer, so all records are stored in the
    /// current serialization format. Returns the number of records rewritten.
    pub async fn bootstrap(&self) -> Result<usize> {
        let mut rewritten = 0;
        for id in self.db.read_ids().await? {
            let _lock = self.db.lock(id.application()).await?;
            if let Some(load_balancer) = self.db.read(&id).await? {
                self.db
                    .write(&load_balancer, Some(load_balancer.state()))
                    .await?;
                rewritten += 1;
            }
        }
        info!(count = rewritten, "rewrote stored load balancers");
        Ok(rewritten)
    }

    /// Prepares the load balancer of `cluster`, ahead of node allocation.
    ///
    /// A missing load balancer is provisioned and stored as reserved. An existing one is
    /// reconfigured if its settings changed and keeps its state. Reals are left untouched, they
    /// change on activation.
    ///
    /// Returns `None` if `application` and `requested` never get a load balancer.
    pub async fn prepare(
        &self,
        application: &ApplicationId,
        cluster: &ClusterSpec,
        requested: &NodeSpec,
    ) -> Result<Option<LoadBalancer>> {
        if !self.should_provision(application, requested.node_type, cluster.cluster_type()) {
            return Ok(None);
        }

        let _lock = self.db.lock(application).await?;
        let id = LoadBalancerId::new(application.clone(), cluster.effective_id().clone());
        self.require_non_clashing(&id).await?;

        let current = self.db.read(&id).await?;
        if current.as_ref().map(|lb| lb.state()) == Some(State::Removable) {
            return Err(ProvisionError::AwaitingRemoval(id));
        }
        let from_state = current.as_ref().map(|lb| lb.state());

        let Reconciled { record, outcome } = self
            .reconcile(&id, current, cluster.zone_endpoint(), &requested.cloud_account)
            .await;
        let written = self.db.write(&record, from_state).await;

        match (outcome, written) {
            (Ok(()), Ok(())) => Ok(Some(record)),
            (Ok(()), Err(e)) => Err(e),
            (Err(e @ ProvisionError::Poisoned { .. }), Err(write_error)) => {
                // The removable record was never stored
                warn!(
                    load_balancer = %id.serialized_form(),
                    error = %e,
                    "failed to store poisoned load balancer"
                );
                Err(write_error)
            }
            (Err(e), written) => {
                if let Err(write_error) = written {
                    warn!(
                        load_balancer = %id.serialized_form(),
                        error = %write_error,
                        "failed to store load balancer"
                    );
                }
                warn!(
                    load_balancer = %id.serialized_form(),
                    error = %e,
                    "failed to provision load balancer"
                );
                Err(e)
            }
        }
    }

    /// Activates the load balancers of `clusters`, targeting their nodes among `nodes`.
    ///
    /// Writes are queued in `transaction` and take effect when it is committed. Active load
    /// balancers of clusters not among `clusters` are deactivated. A load balancer that fails
    /// to activate is queued unmodified and the error returned, the caller is expected to
    /// abandon the transaction.
    pub async fn activate(
        &self,
        clusters: &[ClusterSpec],
        nodes: &[Node],
        flags: &FeatureFlags,
        transaction: &mut ApplicationTransaction,
    ) -> Result<()> {
        let application = transaction.application().clone();
        let activating = effective_endpoints(clusters);

        for (cluster, group) in load_balanced_clusters_of(&application, nodes) {
            let Some(endpoint) = activating.get(&cluster) else {
                continue;
            };
            if !self.should_provision(&application, group.node_type, group.cluster_type) {
                continue;
            }
            self.activate_cluster(transaction, cluster, endpoint, &group.nodes, flags)
                .await?;
        }

        // Deactivate load balancers of clusters that have been removed
        let surplus = self.surplus_load_balancers_of(&application, &activating).await?;
        self.deactivate_all(surplus, transaction)
    }

    /// Deactivates all active load balancers of the transaction's application.
    pub async fn deactivate(&self, transaction: &mut ApplicationTransaction) -> Result<()> {
        let active = self
            .db
            .list(transaction.application())
            .await?
            .in_state(State::Active)
            .into_vec();
        self.deactivate_all(active, transaction)
    }

    /// Lists the load balancers of `application`.
    pub async fn list(&self, application: &ApplicationId) -> Result<LoadBalancerList> {
        self.db.list(application).await
    }

    fn should_provision(
        &self,
        application: &ApplicationId,
        node_type: NodeType,
        cluster_type: ClusterType,
    ) -> bool {
        if application.is_tester() {
            return false;
        }
        self.service.supports(node_type, cluster_type)
    }

    /// Rejects `id` if another load balancer of the same application would get the same
    /// name once default instance and cluster names are compacted away.
    async fn require_non_clashing(&self, id: &LoadBalancerId) -> Result<()> {
        for existing in self.db.read_ids().await? {
            if id.clashes_with(&existing) {
                return Err(ProvisionError::Clash {
                    id: id.clone(),
                    existing,
                });
            }
        }
        Ok(())
    }

    async fn reconcile(
        &self,
        id: &LoadBalancerId,
        current: Option<LoadBalancer>,
        endpoint: &ZoneEndpoint,
        cloud_account: &CloudAccount,
    ) -> Reconciled {
        let now = Utc::now();
        let record = match current {
            Some(current) => current,
            None => LoadBalancer::new(id.clone(), None, State::Reserved, now),
        };

        if let Some(reason) = self.poison_reason(&record, endpoint, cloud_account) {
            return match record.clone().with_state(State::Removable, now) {
                Ok(removable) => {
                    let error = ProvisionError::Poisoned {
                        id: id.clone(),
                        reason,
                        record: Box::new(removable.clone()),
                    };
                    Reconciled::failed(removable, error)
                }
                Err(e) => Reconciled::failed(record, e),
            };
        }

        let provisioned = self
            .provision_instance(id, record.instance(), endpoint, cloud_account)
            .await;
        match provisioned {
            Ok(instance) => Reconciled::succeeded(record.with_instance(instance)),
            Err(e) => Reconciled::failed(record, e),
        }
    }

    /// Returns why the instance of `current` cannot be reused for the requested settings.
    fn poison_reason(
        &self,
        current: &LoadBalancer,
        endpoint: &ZoneEndpoint,
        cloud_account: &CloudAccount,
    ) -> Option<PoisonReason> {
        let instance = current.instance()?;
        if self.zone.allow_enclave && &instance.cloud_account != cloud_account {
            return Some(PoisonReason::CloudAccountChanged {
                current: instance.cloud_account.clone(),
                requested: cloud_account.clone(),
            });
        }
        if instance.settings.is_public_endpoint() != endpoint.is_public_endpoint() {
            return Some(PoisonReason::VisibilityChanged {
                public_endpoint: endpoint.is_public_endpoint(),
            });
        }
        None
    }

    /// Provisions an instance, unless `current` already has the requested settings.
    async fn provision_instance(
        &self,
        id: &LoadBalancerId,
        current: Option<&LoadBalancerInstance>,
        endpoint: &ZoneEndpoint,
        cloud_account: &CloudAccount,
    ) -> Result<LoadBalancerInstance> {
        // Reals and allowed URNs are changed on activation
        let reals = current.map(|i| i.reals.clone()).unwrap_or_default();
        let allowed_urns = current
            .map(|i| i.settings.allowed_urns().to_vec())
            .unwrap_or_default();
        let settings = ZoneEndpoint::new(
            endpoint.is_public_endpoint(),
            endpoint.is_private_endpoint(),
            allowed_urns,
        )?;

        if let Some(instance) = current.filter(|i| i.settings == settings) {
            debug!(load_balancer = %id.serialized_form(), "settings unchanged, not provisioning");
            return Ok(instance.clone());
        }

        info!(load_balancer = %id.serialized_form(), "provisioning load balancer instance");
        let spec = LoadBalancerSpec::new(
            id.application().clone(),
            id.cluster().clone(),
            reals,
            settings,
            cloud_account.clone(),
        );
        let instance = self
            .service
            .provision(&spec)
            .await
            .map_err(|source| ProvisionError::Service {
                message: format!(
                    "could not provision {}. The operation will be retried on next deployment",
                    id
                ),
                source,
            })?;
        instance.validate()?;

        // Private endpoint services need the load balancer to have targets, so they are set up
        // on activation. Keep the ones already set up.
        let service_ids = current.map(|i| i.service_ids.clone()).unwrap_or_default();
        Ok(instance.with_service_ids(service_ids))
    }

    async fn activate_cluster(
        &self,
        transaction: &mut ApplicationTransaction,
        cluster: ClusterId,
        endpoint: &ZoneEndpoint,
        nodes: &[&Node],
        flags: &FeatureFlags,
    ) -> Result<()> {
        let id = LoadBalancerId::new(transaction.application().clone(), cluster);
        let current = self
            .db
            .read(&id)
            .await?
            .ok_or_else(|| ProvisionError::NotPrepared(id.clone()))?;
        let Some(instance) = current.instance() else {
            return Err(ProvisionError::MissingInstance(id));
        };
        if current.state() == State::Removable {
            return Err(ProvisionError::AwaitingRemoval(id));
        }

        let from_state = current.state();
        let configured = self
            .configure_instance(&id, nodes, &current, instance, endpoint, flags)
            .await
            .and_then(|instance| {
                current
                    .clone()
                    .with_instance(instance)
                    .with_state(State::Active, Utc::now())
            });
        match configured {
            Ok(activated) => {
                transaction.add_load_balancer(activated, Some(from_state));
                Ok(())
            }
            Err(e) => {
                // Keep the record in the transaction as it was, the caller aborts it
                transaction.add_load_balancer(current, Some(from_state));
                Err(e)
            }
        }
    }

    /// Points the instance of `current` at `nodes`, or at nothing if routing is deactivated.
    async fn configure_instance(
        &self,
        id: &LoadBalancerId,
        nodes: &[&Node],
        current: &LoadBalancer,
        instance: &LoadBalancerInstance,
        endpoint: &ZoneEndpoint,
        flags: &FeatureFlags,
    ) -> Result<LoadBalancerInstance> {
        let routing_deactivated = flags.routing_deactivated(id.application());
        let reals = if routing_deactivated {
            BTreeSet::new()
        } else {
            let force_ipv6 = flags.force_ipv6(&instance.cloud_account);
            reals_of(nodes, |node| {
                if force_ipv6 {
                    Protocol::Ipv6
                } else {
                    self.service
                        .protocol(node.cloud_account.is_exclave(&self.zone))
                }
            })
        };
        debug!(
            load_balancer = %id.serialized_form(),
            reals = ?reals,
            "configuring load balancer instance"
        );

        let real_count = reals.len();
        let spec = LoadBalancerSpec::new(
            id.application().clone(),
            id.cluster().clone(),
            reals,
            endpoint.clone(),
            instance.cloud_account.clone(),
        );
        // Anything but an active load balancer may target stale reals, replace them all
        let force_full_reset = routing_deactivated || current.state() != State::Active;
        let configured = self
            .service
            .configure(instance, &spec, force_full_reset)
            .await
            .map_err(|source| ProvisionError::Service {
                message: format!("could not (re)configure {}, targeting {} reals", id, real_count),
                source,
            })?;
        configured.validate()?;
        Ok(configured)
    }

    /// Returns the active load balancers of `application` whose cluster is not being activated.
    async fn surplus_load_balancers_of(
        &self,
        application: &ApplicationId,
        activating: &BTreeMap<ClusterId, ZoneEndpoint>,
    ) -> Result<Vec<LoadBalancer>> {
        Ok(self
            .db
            .list(application)
            .await?
            .in_state(State::Active)
            .into_iter()
            .filter(|lb| !activating.contains_key(lb.id().cluster()))
            .collect())
    }

    fn deactivate_all(
        &self,
        load_balancers: Vec<LoadBalancer>,
        transaction: &mut ApplicationTransaction,
    ) -> Result<()> {
        let now = Utc::now();
        let deactivated = load_balancers
            .into_iter()
            .map(|lb| lb.with_state(State::Inactive, now))
            .collect::<Result<Vec<_>>>()?;
        for lb in &deactivated {
            debug!(load_balancer = %lb.id().serialized_form(), "deactivating load balancer");
        }
        self.db.enlist(deactivated, State::Active, transaction);
        Ok(())
    }
}
