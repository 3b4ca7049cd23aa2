use lb_core::application::ApplicationId;
use serde_json::Value;

use crate::load_balancer::{LoadBalancer, State};
use crate::locks::ApplicationLock;

/// A write queued in an [`ApplicationTransaction`].
#[derive(Debug, Clone)]
pub enum PendingWrite {
    /// Store `record`, provided the stored record is still in `expected`
    /// (`None` meaning no record is stored).
    LoadBalancer {
        record: LoadBalancer,
        expected: Option<State>,
    },
    /// An unconditional write added by the caller, e.g. a node allocation change.
    Put { key: String, value: Value },
}

/// ApplicationTransaction collects the writes of one deployment of an application, to be
/// committed as a unit by `LoadBalancerResources::commit`.
///
/// It owns the application lock for its whole life, so nothing else mutates the
/// application's load balancers between queuing and commit. Dropping it without committing
/// discards all writes and releases the lock.
#[derive(Debug)]
pub struct ApplicationTransaction {
    lock: ApplicationLock,
    writes: Vec<PendingWrite>,
}

impl ApplicationTransaction {
    pub fn new(lock: ApplicationLock) -> Self {
        ApplicationTransaction {
            lock,
            writes: Vec::new(),
        }
    }

    pub fn application(&self) -> &ApplicationId {
        self.lock.application()
    }

    pub fn add_put(&mut self, key: impl Into<String>, value: Value) {
        self.writes.push(PendingWrite::Put {
            key: key.into(),
            value,
        });
    }

    pub(crate) fn add_load_balancer(&mut self, record: LoadBalancer, expected: Option<State>) {
        self.writes
            .push(PendingWrite::LoadBalancer { record, expected });
    }

    /// The load balancer records queued so far, in queue order.
    pub fn load_balancers(&self) -> impl Iterator<Item = &LoadBalancer> {
        self.writes.iter().filter_map(|w| match w {
            PendingWrite::LoadBalancer { record, .. } => Some(record),
            PendingWrite::Put { .. } => None,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub(crate) fn into_parts(self) -> (ApplicationLock, Vec<PendingWrite>) {
        (self.lock, self.writes)
    }
}
