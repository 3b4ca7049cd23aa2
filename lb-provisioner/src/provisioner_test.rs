#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::Value;
    use lb_core::application::ApplicationId;
    use lb_core::cluster::{ClusterId, ClusterSpec, ClusterType, NodeType};
    use lb_core::metadata::{KeyValueVersion, MemoryStore, MetadataError, MetadataStore};
    use lb_core::node::{Node, NodeSpec};
    use lb_core::zone::{AccessType, AllowedUrn, CloudAccount, Zone, ZoneEndpoint};

    use crate::config::FeatureFlags;
    use crate::errors::{PoisonReason, ProvisionError};
    use crate::load_balancer::{LoadBalancer, LoadBalancerId, Real, State};
    use crate::locks::LocalLocks;
    use crate::metadata_storage::MetadataStorage;
    use crate::provisioner::LoadBalancerProvisioner;
    use crate::resources::LoadBalancerResources;
    use crate::service::memory::MemoryLoadBalancerService;
    use crate::service::Protocol;

    struct Fixture {
        provisioner: LoadBalancerProvisioner,
        service: MemoryLoadBalancerService,
        db: LoadBalancerResources,
    }

    fn fixture() -> Fixture {
        fixture_with(Zone::default(), MemoryLoadBalancerService::new())
    }

    fn enclave_zone() -> Zone {
        Zone {
            allow_enclave: true,
            account: CloudAccount::new("zone-account"),
        }
    }

    fn fixture_with(zone: Zone, service: MemoryLoadBalancerService) -> Fixture {
        fixture_on(MetadataStorage::InMemory(MemoryStore::new()), zone, service)
    }

    fn fixture_on(
        store: MetadataStorage,
        zone: Zone,
        service: MemoryLoadBalancerService,
    ) -> Fixture {
        let db = LoadBalancerResources::new(
            store,
            Arc::new(LocalLocks::new()),
            Duration::from_secs(1),
        );
        let provisioner =
            LoadBalancerProvisioner::new(db.clone(), Arc::new(service.clone()), zone);
        Fixture {
            provisioner,
            service,
            db,
        }
    }

    /// Memory store whose writes can be made to fail.
    #[derive(Debug, Default)]
    struct FlakyStore {
        inner: MemoryStore,
        reject_writes: AtomicBool,
    }

    impl FlakyStore {
        fn check_writable(&self) -> lb_core::metadata::Result<()> {
            if self.reject_writes.load(Ordering::SeqCst) {
                return Err(MetadataError::StorageError("writes rejected".into()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl MetadataStore for FlakyStore {
        async fn get(&self, key: &str) -> lb_core::metadata::Result<Option<Value>> {
            self.inner.get(key).await
        }

        async fn get_childrens(&self, path: &str) -> lb_core::metadata::Result<Vec<String>> {
            self.inner.get_childrens(path).await
        }

        async fn put(&self, key: &str, value: Value) -> lb_core::metadata::Result<()> {
            self.check_writable()?;
            self.inner.put(key, value).await
        }

        async fn delete(&self, key: &str) -> lb_core::metadata::Result<()> {
            self.check_writable()?;
            self.inner.delete(key).await
        }

        async fn put_batch(&self, entries: Vec<(String, Value)>) -> lb_core::metadata::Result<()> {
            self.check_writable()?;
            self.inner.put_batch(entries).await
        }

        async fn get_bulk(&self, prefix: &str) -> lb_core::metadata::Result<Vec<KeyValueVersion>> {
            self.inner.get_bulk(prefix).await
        }
    }

    fn app(instance: &str) -> ApplicationId {
        ApplicationId::new("t1", "app1", instance).unwrap()
    }

    fn container(id: &str) -> ClusterSpec {
        container_with(id, ZoneEndpoint::default())
    }

    fn container_with(id: &str, endpoint: ZoneEndpoint) -> ClusterSpec {
        ClusterSpec::of(ClusterType::Container, ClusterId::new(id).unwrap(), endpoint).unwrap()
    }

    fn tenant_spec() -> NodeSpec {
        NodeSpec::new(NodeType::Tenant, CloudAccount::unspecified())
    }

    fn tenant_spec_in(account: &str) -> NodeSpec {
        NodeSpec::new(NodeType::Tenant, CloudAccount::new(account))
    }

    fn node(hostname: &str, owner: &ApplicationId, cluster: &ClusterSpec, ips: &[&str]) -> Node {
        Node::new(
            hostname,
            NodeType::Tenant,
            ips.iter().map(|ip| ip.parse().unwrap()).collect(),
        )
        .allocated_to(owner.clone(), cluster.clone())
    }

    fn id_of(application: &ApplicationId, cluster: &str) -> LoadBalancerId {
        LoadBalancerId::new(application.clone(), ClusterId::new(cluster).unwrap())
    }

    async fn stored(f: &Fixture, id: &LoadBalancerId) -> LoadBalancer {
        f.db.read(id).await.unwrap().expect("load balancer is stored")
    }

    /// Prepares and activates `clusters` for `application` in one committed transaction.
    async fn deploy(
        f: &Fixture,
        application: &ApplicationId,
        clusters: &[ClusterSpec],
        nodes: &[Node],
    ) {
        for cluster in clusters {
            f.provisioner
                .prepare(application, cluster, &tenant_spec())
                .await
                .unwrap();
        }
        let mut tx = f.db.begin(application).await.unwrap();
        f.provisioner
            .activate(clusters, nodes, &FeatureFlags::default(), &mut tx)
            .await
            .unwrap();
        f.db.commit(tx).await.unwrap();
    }

    // ============================================================================
    // Prepare
    // ============================================================================

    /// **Test:** Prepare provisions a new load balancer and is idempotent
    ///
    /// **Reason:** Prepare runs on every deployment; repeating it must not re-provision.
    ///
    /// **Expectation:** One provision call, a reserved record with an instance, unchanged on
    /// repeat.
    #[tokio::test]
    async fn prepare_is_idempotent() {
        let f = fixture();
        let app = app("default");
        let cluster = container("c1");

        let first = f
            .provisioner
            .prepare(&app, &cluster, &tenant_spec())
            .await
            .unwrap()
            .expect("load balancer provisioned");
        assert_eq!(first.state(), State::Reserved);
        assert!(first.instance().is_some());
        assert_eq!(f.service.provision_calls(), 1);

        let second = f
            .provisioner
            .prepare(&app, &cluster, &tenant_spec())
            .await
            .unwrap()
            .expect("load balancer provisioned");
        assert_eq!(second, first);
        assert_eq!(f.service.provision_calls(), 1);
        assert_eq!(stored(&f, first.id()).await, first);
    }

    /// **Test:** Testers and unsupported node types get no load balancer
    ///
    /// **Reason:** Only node and cluster types the service load balances are provisioned.
    ///
    /// **Expectation:** `None` is returned and nothing is stored or provisioned.
    #[tokio::test]
    async fn prepare_skips_unsupported_requests() {
        let f = fixture();

        let tester = f
            .provisioner
            .prepare(&app("default-t"), &container("c1"), &tenant_spec())
            .await
            .unwrap();
        assert!(tester.is_none());

        let host = f
            .provisioner
            .prepare(
                &app("default"),
                &container("c1"),
                &NodeSpec::new(NodeType::Host, CloudAccount::unspecified()),
            )
            .await
            .unwrap();
        assert!(host.is_none());

        let content = ClusterSpec::of(
            ClusterType::Content,
            ClusterId::new("content1").unwrap(),
            ZoneEndpoint::default(),
        )
        .unwrap();
        let content = f
            .provisioner
            .prepare(&app("default"), &content, &tenant_spec())
            .await
            .unwrap();
        assert!(content.is_none());

        assert_eq!(f.service.provision_calls(), 0);
        assert!(f.db.read_ids().await.unwrap().is_empty());
    }

    /// **Test:** Ids whose compacted names collide are rejected in either order
    ///
    /// **Reason:** Instance `default` with cluster `c1` and instance `c1` with cluster `default`
    /// compact to the same DNS name.
    ///
    /// **Expectation:** The second prepare fails with a clash and stores nothing.
    #[tokio::test]
    async fn prepare_rejects_clashing_ids() {
        let pairs = [
            (app("default"), container("c1"), app("c1"), container("default")),
            (app("c1"), container("default"), app("default"), container("c1")),
        ];

        for (first_app, first_cluster, second_app, second_cluster) in pairs {
            let f = fixture();
            f.provisioner
                .prepare(&first_app, &first_cluster, &tenant_spec())
                .await
                .unwrap();

            let err = f
                .provisioner
                .prepare(&second_app, &second_cluster, &tenant_spec())
                .await
                .unwrap_err();
            assert!(!err.is_retryable());
            match err {
                ProvisionError::Clash { id, existing } => {
                    assert_eq!(id, id_of(&second_app, second_cluster.id().value()));
                    assert_eq!(existing, id_of(&first_app, first_cluster.id().value()));
                }
                other => panic!("expected clash, got {other}"),
            }
            assert_eq!(f.db.read_ids().await.unwrap().len(), 1);
        }
    }

    /// **Test:** Different instances of one application do not clash otherwise
    ///
    /// **Reason:** Non-default instances keep their instance name in the compacted name.
    ///
    /// **Expectation:** Both prepares succeed.
    #[tokio::test]
    async fn prepare_allows_distinct_instances() {
        let f = fixture();
        f.provisioner
            .prepare(&app("default"), &container("c1"), &tenant_spec())
            .await
            .unwrap();
        f.provisioner
            .prepare(&app("beta"), &container("c1"), &tenant_spec())
            .await
            .unwrap();
        assert_eq!(f.db.read_ids().await.unwrap().len(), 2);
    }

    /// **Test:** A failed provision leaves a reserved record without instance, and recovers
    ///
    /// **Reason:** The record is persisted whether or not the service call succeeded.
    ///
    /// **Expectation:** Retryable service error, then a successful prepare on the next attempt.
    #[tokio::test]
    async fn failed_provision_is_recorded_and_recovers() {
        let f = fixture();
        let app = app("default");
        let cluster = container("c1");
        let id = id_of(&app, "c1");

        f.service.set_failing(true);
        let err = f
            .provisioner
            .prepare(&app, &cluster, &tenant_spec())
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::Service { .. }));
        assert!(err.is_retryable());
        assert!(err.to_string().contains("will be retried on next deployment"));

        let record = stored(&f, &id).await;
        assert_eq!(record.state(), State::Reserved);
        assert!(record.instance().is_none());

        // Activating without an instance is an ordering error
        let mut tx = f.db.begin(&app).await.unwrap();
        // No allocated nodes means no cluster to activate
        f.provisioner
            .activate(&[cluster.clone()], &[], &FeatureFlags::default(), &mut tx)
            .await
            .unwrap();
        let nodes = vec![node("host1", &app, &cluster, &["10.0.0.1"])];
        let err = f
            .provisioner
            .activate(&[cluster.clone()], &nodes, &FeatureFlags::default(), &mut tx)
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::MissingInstance(_)));
        drop(tx);

        f.service.set_failing(false);
        let recovered = f
            .provisioner
            .prepare(&app, &cluster, &tenant_spec())
            .await
            .unwrap()
            .expect("load balancer provisioned");
        assert_eq!(recovered.state(), State::Reserved);
        assert!(recovered.instance().is_some());
    }

    // ============================================================================
    // Poisoning
    // ============================================================================

    /// **Test:** Changing cloud account in an enclave zone poisons the load balancer
    ///
    /// **Reason:** An instance cannot move between accounts; it must be replaced.
    ///
    /// **Expectation:** Removable record stored and returned in the error, later prepares and
    /// activations wait for removal.
    #[tokio::test]
    async fn account_change_poisons_load_balancer() {
        let f = fixture_with(enclave_zone(), MemoryLoadBalancerService::new());
        let app = app("default");
        let cluster = container("c1");
        let id = id_of(&app, "c1");

        f.provisioner
            .prepare(&app, &cluster, &tenant_spec_in("acct-1"))
            .await
            .unwrap();

        let err = f
            .provisioner
            .prepare(&app, &cluster, &tenant_spec_in("acct-2"))
            .await
            .unwrap_err();
        match &err {
            ProvisionError::Poisoned { reason, .. } => assert_eq!(
                reason,
                &PoisonReason::CloudAccountChanged {
                    current: CloudAccount::new("acct-1"),
                    requested: CloudAccount::new("acct-2"),
                }
            ),
            other => panic!("expected poisoned, got {other}"),
        }
        let record = stored(&f, &id).await;
        assert_eq!(record.state(), State::Removable);
        assert_eq!(err.poisoned_record(), Some(&record));
        assert_eq!(f.service.provision_calls(), 1);

        let err = f
            .provisioner
            .prepare(&app, &cluster, &tenant_spec_in("acct-2"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::AwaitingRemoval(_)));

        let mut tx = f.db.begin(&app).await.unwrap();
        let nodes = vec![node("host1", &app, &cluster, &["10.0.0.1"])];
        let err = f
            .provisioner
            .activate(&[cluster], &nodes, &FeatureFlags::default(), &mut tx)
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::AwaitingRemoval(_)));
        assert!(tx.is_empty());
    }

    /// **Test:** Account change of an active load balancer
    ///
    /// **Reason:** Poisoning must not touch the instance serving traffic.
    ///
    /// **Expectation:** Removable record with the same instance, no further service calls.
    #[tokio::test]
    async fn account_change_poisons_active_load_balancer() {
        let f = fixture_with(enclave_zone(), MemoryLoadBalancerService::new());
        let app = app("default");
        let cluster = container("c1");
        let id = id_of(&app, "c1");
        let nodes = vec![node("host1", &app, &cluster, &["10.0.0.1"])];
        deploy(&f, &app, &[cluster.clone()], &nodes).await;
        let active = stored(&f, &id).await;
        let configured = f.service.configure_calls().len();

        let err = f
            .provisioner
            .prepare(&app, &cluster, &tenant_spec_in("acct-2"))
            .await
            .unwrap_err();
        assert!(err.is_retryable());

        let removable = stored(&f, &id).await;
        assert_eq!(removable.state(), State::Removable);
        assert_eq!(removable.instance(), active.instance());
        assert_eq!(f.service.provision_calls(), 1);
        assert_eq!(f.service.configure_calls().len(), configured);
    }

    /// **Test:** Account changes are ignored outside enclave zones
    ///
    /// **Reason:** Only zones allowing enclaves place load balancers in tenant accounts.
    ///
    /// **Expectation:** The existing instance is kept, nothing is poisoned.
    #[tokio::test]
    async fn account_change_ignored_without_enclave() {
        let f = fixture();
        let app = app("default");
        let cluster = container("c1");

        f.provisioner
            .prepare(&app, &cluster, &tenant_spec_in("acct-1"))
            .await
            .unwrap();
        let record = f
            .provisioner
            .prepare(&app, &cluster, &tenant_spec_in("acct-2"))
            .await
            .unwrap()
            .expect("load balancer provisioned");
        assert_eq!(record.state(), State::Reserved);
        assert_eq!(f.service.provision_calls(), 1);
    }

    /// **Test:** Changing public visibility poisons, adding a private endpoint does not
    ///
    /// **Reason:** Only the public flag decides whether the instance can be reused.
    ///
    /// **Expectation:** Public+private re-provisions in place; private-only poisons.
    #[tokio::test]
    async fn visibility_change_poisons_load_balancer() {
        let f = fixture();
        let app = app("default");

        f.provisioner
            .prepare(&app, &container("c1"), &tenant_spec())
            .await
            .unwrap();

        let both = ZoneEndpoint::new(true, true, vec![]).unwrap();
        let record = f
            .provisioner
            .prepare(&app, &container_with("c1", both.clone()), &tenant_spec())
            .await
            .unwrap()
            .expect("load balancer provisioned");
        assert_eq!(record.state(), State::Reserved);
        assert_eq!(record.instance().map(|i| &i.settings), Some(&both));
        assert_eq!(f.service.provision_calls(), 2);

        let private_only = ZoneEndpoint::new(false, true, vec![]).unwrap();
        let err = f
            .provisioner
            .prepare(&app, &container_with("c1", private_only), &tenant_spec())
            .await
            .unwrap_err();
        match err {
            ProvisionError::Poisoned { reason, record, .. } => {
                assert_eq!(reason, PoisonReason::VisibilityChanged { public_endpoint: false });
                assert_eq!(record.state(), State::Removable);
            }
            other => panic!("expected poisoned, got {other}"),
        }
        assert_eq!(f.service.provision_calls(), 2);
    }

    /// **Test:** A poisoned record that could not be stored is not reported as poisoned
    ///
    /// **Reason:** The record carried by a poisoned error must be the one in the store.
    ///
    /// **Expectation:** The store error is returned and the stored record keeps its state.
    #[tokio::test]
    async fn unstored_poisoned_record_is_not_reported() {
        let store = Arc::new(FlakyStore::default());
        let f = fixture_on(
            MetadataStorage::Shared(store.clone() as Arc<dyn MetadataStore>),
            Zone::default(),
            MemoryLoadBalancerService::new(),
        );
        let app = app("default");
        let id = id_of(&app, "c1");
        f.provisioner
            .prepare(&app, &container("c1"), &tenant_spec())
            .await
            .unwrap();

        store.reject_writes.store(true, Ordering::SeqCst);
        let private_only = ZoneEndpoint::new(false, true, vec![]).unwrap();
        let err = f
            .provisioner
            .prepare(&app, &container_with("c1", private_only), &tenant_spec())
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::Metadata(MetadataError::StorageError(_))));
        assert!(err.poisoned_record().is_none());

        store.reject_writes.store(false, Ordering::SeqCst);
        assert_eq!(stored(&f, &id).await.state(), State::Reserved);
    }

    // ============================================================================
    // Activate and deactivate
    // ============================================================================

    /// **Test:** Activation targets the cluster's nodes and commits atomically
    ///
    /// **Reason:** Load balancers go live in the same transaction as the node allocation.
    ///
    /// **Expectation:** Nothing changes before commit; afterwards the record is active and
    /// targets every node, with a full reset since it was not active before.
    #[tokio::test]
    async fn activate_targets_allocated_nodes() {
        let f = fixture();
        let app = app("default");
        let cluster = container("c1");
        let id = id_of(&app, "c1");
        let nodes = vec![
            node("host1", &app, &cluster, &["10.0.0.1"]),
            node("host2", &app, &cluster, &["10.0.0.2"]),
        ];

        f.provisioner
            .prepare(&app, &cluster, &tenant_spec())
            .await
            .unwrap();
        let mut tx = f.db.begin(&app).await.unwrap();
        tx.add_put("/provision/nodes/host1", serde_json::json!({"state": "active"}));
        f.provisioner
            .activate(&[cluster.clone()], &nodes, &FeatureFlags::default(), &mut tx)
            .await
            .unwrap();
        assert_eq!(stored(&f, &id).await.state(), State::Reserved);

        f.db.commit(tx).await.unwrap();
        let record = stored(&f, &id).await;
        assert_eq!(record.state(), State::Active);
        let expected: Vec<Real> = vec![
            Real::new("host1", "10.0.0.1".parse().unwrap()),
            Real::new("host2", "10.0.0.2".parse().unwrap()),
        ];
        let reals: Vec<Real> = record.instance().unwrap().reals.iter().cloned().collect();
        assert_eq!(reals, expected);

        let calls = f.service.configure_calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].force_full_reset);

        // Redeploying an active load balancer only applies the diff
        deploy(&f, &app, &[cluster], &nodes).await;
        let calls = f.service.configure_calls();
        assert_eq!(calls.len(), 2);
        assert!(!calls[1].force_full_reset);
        assert_eq!(f.service.provision_calls(), 1);
    }

    /// **Test:** Activating a cluster that was never prepared fails
    ///
    /// **Reason:** Prepare must always run before activate.
    ///
    /// **Expectation:** Not-prepared error, non-retryable, nothing queued.
    #[tokio::test]
    async fn activate_requires_prepare() {
        let f = fixture();
        let app = app("default");
        let cluster = container("c1");
        let nodes = vec![node("host1", &app, &cluster, &["10.0.0.1"])];

        let mut tx = f.db.begin(&app).await.unwrap();
        let err = f
            .provisioner
            .activate(&[cluster], &nodes, &FeatureFlags::default(), &mut tx)
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::NotPrepared(_)));
        assert!(!err.is_retryable());
        assert!(tx.is_empty());
    }

    /// **Test:** A failed configure queues the unmodified record and returns the error
    ///
    /// **Reason:** The caller abandons the transaction; the stored record must not advance.
    ///
    /// **Expectation:** Service error, the queued record is still reserved.
    #[tokio::test]
    async fn failed_configure_keeps_record() {
        let f = fixture();
        let app = app("default");
        let cluster = container("c1");
        let id = id_of(&app, "c1");
        let nodes = vec![node("host1", &app, &cluster, &["10.0.0.1"])];

        let prepared = f
            .provisioner
            .prepare(&app, &cluster, &tenant_spec())
            .await
            .unwrap()
            .expect("load balancer provisioned");

        f.service.set_failing(true);
        let mut tx = f.db.begin(&app).await.unwrap();
        let err = f
            .provisioner
            .activate(&[cluster], &nodes, &FeatureFlags::default(), &mut tx)
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::Service { .. }));
        let queued: Vec<&LoadBalancer> = tx.load_balancers().collect();
        assert_eq!(queued, vec![&prepared]);
        drop(tx);

        assert_eq!(stored(&f, &id).await, prepared);
    }

    /// **Test:** Removed clusters are deactivated on the next activation
    ///
    /// **Reason:** Active load balancers of clusters no longer deployed must stop serving.
    ///
    /// **Expectation:** c1 stays active, c2 becomes inactive.
    #[tokio::test]
    async fn activate_deactivates_removed_clusters() {
        let f = fixture();
        let app = app("default");
        let c1 = container("c1");
        let c2 = container("c2");
        let all_nodes = vec![
            node("host1", &app, &c1, &["10.0.0.1"]),
            node("host2", &app, &c2, &["10.0.0.2"]),
        ];

        deploy(&f, &app, &[c1.clone(), c2.clone()], &all_nodes).await;
        let active = f.provisioner.list(&app).await.unwrap().in_state(State::Active);
        assert_eq!(active.len(), 2);
        let c2_before = stored(&f, &id_of(&app, "c2")).await;

        // c1 moves to a new node
        tokio::time::sleep(Duration::from_millis(5)).await;
        let c1_nodes = vec![node("host3", &app, &c1, &["10.0.0.3", "2001:db8::3"])];
        deploy(&f, &app, &[c1], &c1_nodes).await;

        let c1_after = stored(&f, &id_of(&app, "c1")).await;
        assert_eq!(c1_after.state(), State::Active);
        let expected: Vec<Real> = vec![Real::new("host3", "10.0.0.3".parse().unwrap())];
        let reals: Vec<Real> = c1_after.instance().unwrap().reals.iter().cloned().collect();
        assert_eq!(reals, expected);

        let c2_after = stored(&f, &id_of(&app, "c2")).await;
        assert_eq!(c2_after.state(), State::Inactive);
        assert_eq!(c2_after.instance(), c2_before.instance());
        assert!(c2_after.changed_at() > c2_before.changed_at());
    }

    /// **Test:** Deactivate all, then warm reactivation
    ///
    /// **Reason:** Inactive load balancers keep their instance and are reused.
    ///
    /// **Expectation:** No new provision call, one configure call with a full reset.
    #[tokio::test]
    async fn deactivated_load_balancer_is_reused() {
        let f = fixture();
        let app = app("default");
        let endpoint = ZoneEndpoint::new(true, true, vec![]).unwrap();
        let cluster = container_with("c1", endpoint);
        let id = id_of(&app, "c1");
        let nodes = vec![node("host1", &app, &cluster, &["10.0.0.1"])];

        deploy(&f, &app, &[cluster.clone()], &nodes).await;
        let active = stored(&f, &id).await;
        let active_instance = active.instance().unwrap().clone();
        assert_eq!(active_instance.service_ids.len(), 1);

        let mut tx = f.db.begin(&app).await.unwrap();
        f.provisioner.deactivate(&mut tx).await.unwrap();
        f.db.commit(tx).await.unwrap();
        let inactive = stored(&f, &id).await;
        assert_eq!(inactive.state(), State::Inactive);
        assert!(inactive.instance().is_some());

        let configured_before = f.service.configure_calls().len();
        deploy(&f, &app, &[cluster], &nodes).await;

        let reactivated = stored(&f, &id).await;
        assert_eq!(reactivated.state(), State::Active);
        let instance = reactivated.instance().unwrap();
        assert_eq!(instance.hostname, active_instance.hostname);
        assert_eq!(instance.service_ids, active_instance.service_ids);
        assert_eq!(instance.settings, active_instance.settings);
        assert_eq!(f.service.provision_calls(), 1);
        let calls = f.service.configure_calls();
        assert_eq!(calls.len(), configured_before + 1);
        assert!(calls[configured_before].force_full_reset);
    }

    /// **Test:** Deactivate leaves non-active records alone
    ///
    /// **Reason:** Only active load balancers route traffic.
    ///
    /// **Expectation:** Nothing queued for a reserved record.
    #[tokio::test]
    async fn deactivate_only_touches_active() {
        let f = fixture();
        let app = app("default");
        f.provisioner
            .prepare(&app, &container("c1"), &tenant_spec())
            .await
            .unwrap();

        let mut tx = f.db.begin(&app).await.unwrap();
        f.provisioner.deactivate(&mut tx).await.unwrap();
        assert!(tx.is_empty());
    }

    /// **Test:** Deactivated routing activates with no reals
    ///
    /// **Reason:** The load balancer is kept but must not route to any node.
    ///
    /// **Expectation:** Active record, empty reals, forced full reset.
    #[tokio::test]
    async fn deactivated_routing_clears_reals() {
        let f = fixture();
        let app = app("default");
        let cluster = container("c1");
        let nodes = vec![node("host1", &app, &cluster, &["10.0.0.1"])];
        deploy(&f, &app, &[cluster.clone()], &nodes).await;

        let flags = FeatureFlags::default().with_deactivated_routing(app.clone());
        let mut tx = f.db.begin(&app).await.unwrap();
        f.provisioner
            .activate(&[cluster], &nodes, &flags, &mut tx)
            .await
            .unwrap();
        f.db.commit(tx).await.unwrap();

        let record = stored(&f, &id_of(&app, "c1")).await;
        assert_eq!(record.state(), State::Active);
        assert!(record.instance().unwrap().reals.is_empty());
        let last = f.service.configure_calls().pop().unwrap();
        assert!(last.reals.is_empty());
        assert!(last.force_full_reset);
    }

    /// **Test:** Reals follow the protocol of each node's account
    ///
    /// **Reason:** Exclave nodes are reached over the exclave protocol, and a flag can force IPv6.
    ///
    /// **Expectation:** Only addresses of the selected family become reals.
    #[tokio::test]
    async fn reals_follow_protocol() {
        let service =
            MemoryLoadBalancerService::new().with_protocols(Protocol::Ipv4, Protocol::Ipv6);
        let f = fixture_with(enclave_zone(), service);
        let app = app("default");
        let cluster = container("c1");
        let nodes = vec![
            node("host1", &app, &cluster, &["10.0.0.1", "2001:db8::1"]),
            node("host2", &app, &cluster, &["10.0.0.2", "2001:db8::2"])
                .with_cloud_account(CloudAccount::new("tenant-account")),
        ];

        deploy(&f, &app, &[cluster.clone()], &nodes).await;
        let record = stored(&f, &id_of(&app, "c1")).await;
        let reals: Vec<String> = record
            .instance()
            .unwrap()
            .reals
            .iter()
            .map(|r| r.ip_address.to_string())
            .collect();
        assert_eq!(reals, vec!["10.0.0.1", "2001:db8::2"]);

        // The instance is in the unspecified account
        let flags = FeatureFlags::default().with_ipv6_target_groups(CloudAccount::unspecified());
        let mut tx = f.db.begin(&app).await.unwrap();
        f.provisioner
            .activate(&[cluster], &nodes, &flags, &mut tx)
            .await
            .unwrap();
        let queued = tx.load_balancers().next().unwrap().clone();
        assert!(queued.instance().unwrap().reals.iter().all(|r| r.ip_address.is_ipv6()));
        assert_eq!(queued.instance().unwrap().reals.len(), 2);
    }

    /// **Test:** Allowed URNs are applied on activation and kept by later prepares
    ///
    /// **Reason:** Prepare must not reset access granted at activation.
    ///
    /// **Expectation:** A private service id is set up and prepare does not re-provision.
    #[tokio::test]
    async fn allowed_urns_survive_prepare() {
        let f = fixture();
        let app = app("default");
        let urn = AllowedUrn::new(AccessType::AwsPrivateLink, "arn:aws:iam::123456789012:root");
        let endpoint = ZoneEndpoint::new(true, true, vec![urn]).unwrap();
        let cluster = container_with("c1", endpoint.clone());
        let nodes = vec![node("host1", &app, &cluster, &["10.0.0.1"])];

        deploy(&f, &app, &[cluster.clone()], &nodes).await;
        let record = stored(&f, &id_of(&app, "c1")).await;
        let instance = record.instance().unwrap();
        assert_eq!(instance.settings, endpoint);
        assert_eq!(instance.service_ids.len(), 1);

        let prepared = f
            .provisioner
            .prepare(&app, &cluster, &tenant_spec())
            .await
            .unwrap()
            .expect("load balancer provisioned");
        assert_eq!(prepared, record);
        assert_eq!(f.service.provision_calls(), 1);
    }

    /// **Test:** Commit fails when a record changed after activation queued it
    ///
    /// **Reason:** Queued writes are conditional on the state they were computed from.
    ///
    /// **Expectation:** Conflict error, and none of the queued writes are applied.
    #[tokio::test]
    async fn commit_detects_concurrent_change() {
        let f = fixture();
        let app = app("default");
        let cluster = container("c1");
        let id = id_of(&app, "c1");
        let nodes = vec![node("host1", &app, &cluster, &["10.0.0.1"])];

        let prepared = f
            .provisioner
            .prepare(&app, &cluster, &tenant_spec())
            .await
            .unwrap()
            .expect("load balancer provisioned");
        let mut tx = f.db.begin(&app).await.unwrap();
        f.provisioner
            .activate(&[cluster], &nodes, &FeatureFlags::default(), &mut tx)
            .await
            .unwrap();

        // Simulate a writer not honouring the lock
        let removable = prepared.with_state(State::Removable, Utc::now()).unwrap();
        f.db.write(&removable, Some(State::Reserved)).await.unwrap();

        let err = f.db.commit(tx).await.unwrap_err();
        assert!(matches!(err, ProvisionError::Conflict { .. }));
        assert_eq!(stored(&f, &id).await.state(), State::Removable);
    }

    // ============================================================================
    // Bootstrap
    // ============================================================================

    /// **Test:** Bootstrap rewrites every stored record unchanged
    ///
    /// **Reason:** Rewriting migrates records to the current serialization format.
    ///
    /// **Expectation:** The count matches and records are unchanged.
    #[tokio::test]
    async fn bootstrap_rewrites_all_records() {
        let f = fixture();
        let first = f
            .provisioner
            .prepare(&app("default"), &container("c1"), &tenant_spec())
            .await
            .unwrap()
            .unwrap();
        let second = f
            .provisioner
            .prepare(&app("beta"), &container("c2"), &tenant_spec())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(f.provisioner.bootstrap().await.unwrap(), 2);
        assert_eq!(stored(&f, first.id()).await, first);
        assert_eq!(stored(&f, second.id()).await, second);
    }
}
