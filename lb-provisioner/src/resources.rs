//! Persistence of load balancer records in the metadata store.
//!
//! Records are stored as JSON under `/provision/loadBalancers/{tenant}:{app}:{instance}:{cluster}`.
//! Every write names the state the writer expects the stored record to be in, and is rejected
//! if the store disagrees.

use lb_core::application::ApplicationId;
use lb_core::metadata::MetadataStore;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::errors::{ProvisionError, Result};
use crate::load_balancer::{LoadBalancer, LoadBalancerId, LoadBalancerList, State};
use crate::locks::{ApplicationLock, LockProvider};
use crate::metadata_storage::MetadataStorage;
use crate::transaction::{ApplicationTransaction, PendingWrite};

pub const BASE_LOAD_BALANCERS_PATH: &str = "/provision/loadBalancers";

fn join_path(parts: &[&str]) -> String {
    parts.join("/")
}

#[derive(Clone)]
pub struct LoadBalancerResources {
    store: MetadataStorage,
    locks: Arc<dyn LockProvider>,
    lock_timeout: Duration,
}

impl fmt::Debug for LoadBalancerResources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadBalancerResources")
            .field("store", &self.store)
            .field("lock_timeout", &self.lock_timeout)
            .finish()
    }
}

impl LoadBalancerResources {
    pub fn new(
        store: MetadataStorage,
        locks: Arc<dyn LockProvider>,
        lock_timeout: Duration,
    ) -> Self {
        LoadBalancerResources {
            store,
            locks,
            lock_timeout,
        }
    }

    fn path_of(id: &LoadBalancerId) -> String {
        join_path(&[BASE_LOAD_BALANCERS_PATH, &id.serialized_form()])
    }

    /// Acquires the exclusive lock of `application`, waiting at most the configured timeout.
    pub async fn lock(&self, application: &ApplicationId) -> Result<ApplicationLock> {
        tokio::time::timeout(self.lock_timeout, self.locks.lock(application))
            .await
            .map_err(|_| ProvisionError::LockTimeout(application.clone()))
    }

    /// Locks `application` and starts a transaction holding that lock.
    pub async fn begin(&self, application: &ApplicationId) -> Result<ApplicationTransaction> {
        Ok(ApplicationTransaction::new(self.lock(application).await?))
    }

    /// Returns the ids of all stored load balancers.
    pub async fn read_ids(&self) -> Result<Vec<LoadBalancerId>> {
        let prefix = format!("{}/", BASE_LOAD_BALANCERS_PATH);
        let paths = self.store.get_childrens(BASE_LOAD_BALANCERS_PATH).await?;

        let mut ids = Vec::with_capacity(paths.len());
        for path in paths {
            if let Some(serialized) = path.strip_prefix(&prefix) {
                ids.push(LoadBalancerId::from_serialized(serialized)?);
            }
        }
        ids.sort();
        Ok(ids)
    }

    pub async fn read(&self, id: &LoadBalancerId) -> Result<Option<LoadBalancer>> {
        match self.store.get(&Self::path_of(id)).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Reads all load balancers of `application`.
    pub async fn list(&self, application: &ApplicationId) -> Result<LoadBalancerList> {
        // The trailing separator keeps instance "a" from matching instance "ab"
        let prefix = join_path(&[
            BASE_LOAD_BALANCERS_PATH,
            &format!("{}:", application.serialized_form()),
        ]);

        let mut load_balancers = Vec::new();
        for entry in self.store.get_bulk(&prefix).await? {
            let load_balancer: LoadBalancer = serde_json::from_slice(&entry.value)?;
            load_balancers.push(load_balancer);
        }
        load_balancers.sort_by(|a, b| a.id().cmp(b.id()));
        Ok(LoadBalancerList::new(load_balancers).owned_by(application))
    }

    /// Writes `record` right away, provided the stored record is in `expected`.
    ///
    /// The caller must hold the application lock.
    pub async fn write(&self, record: &LoadBalancer, expected: Option<State>) -> Result<()> {
        self.require_state(record.id(), expected).await?;
        self.store
            .put(&Self::path_of(record.id()), serde_json::to_value(record)?)
            .await?;
        log_transition(record, expected);
        Ok(())
    }

    /// Queues writes of `records` into `transaction`, each expected to be stored in `expected`.
    pub fn enlist(
        &self,
        records: Vec<LoadBalancer>,
        expected: State,
        transaction: &mut ApplicationTransaction,
    ) {
        for record in records {
            transaction.add_load_balancer(record, Some(expected));
        }
    }

    /// Commits all writes queued in `transaction` as one batch, then releases its lock.
    ///
    /// Nothing is written if any queued load balancer is no longer in its expected state.
    pub async fn commit(&self, transaction: ApplicationTransaction) -> Result<()> {
        let (lock, writes) = transaction.into_parts();

        let mut entries: Vec<(String, Value)> = Vec::with_capacity(writes.len());
        for write in &writes {
            match write {
                PendingWrite::LoadBalancer { record, expected } => {
                    self.require_state(record.id(), *expected).await?;
                    entries.push((Self::path_of(record.id()), serde_json::to_value(record)?));
                }
                PendingWrite::Put { key, value } => entries.push((key.clone(), value.clone())),
            }
        }

        debug!(
            application = %lock.application(),
            writes = entries.len(),
            "committing application transaction"
        );
        self.store.put_batch(entries).await?;

        for write in &writes {
            if let PendingWrite::LoadBalancer { record, expected } = write {
                log_transition(record, *expected);
            }
        }
        drop(lock);
        Ok(())
    }

    async fn require_state(&self, id: &LoadBalancerId, expected: Option<State>) -> Result<()> {
        let found = self.read(id).await?.map(|lb| lb.state());
        if found != expected {
            return Err(ProvisionError::Conflict {
                id: id.clone(),
                expected,
                found,
            });
        }
        Ok(())
    }
}

fn log_transition(record: &LoadBalancer, from: Option<State>) {
    if from == Some(record.state()) {
        return;
    }
    match from {
        Some(from) => info!(
            load_balancer = %record.id().serialized_form(),
            from = %from,
            to = %record.state(),
            "load balancer changed state"
        ),
        None => info!(
            load_balancer = %record.id().serialized_form(),
            state = %record.state(),
            "load balancer created"
        ),
    }
}
