use lb_core::application::ApplicationId;
use lb_core::metadata::MetadataError;
use lb_core::zone::CloudAccount;
use lb_core::ModelError;
use std::fmt;
use thiserror::Error;

use crate::load_balancer::{LoadBalancer, LoadBalancerId, State};
use crate::service::ServiceError;

pub type Result<T> = std::result::Result<T, ProvisionError>;

/// Why an existing load balancer had to be marked removable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoisonReason {
    CloudAccountChanged {
        current: CloudAccount,
        requested: CloudAccount,
    },
    VisibilityChanged {
        public_endpoint: bool,
    },
}

impl fmt::Display for PoisonReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoisonReason::CloudAccountChanged { current, requested } => write!(
                f,
                "change in cloud account ({} -> {})",
                current, requested
            ),
            PoisonReason::VisibilityChanged { public_endpoint } => write!(
                f,
                "change in load balancer visibility (public endpoint: {})",
                public_endpoint
            ),
        }
    }
}

#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("{id} clashes with {existing}")]
    Clash {
        id: LoadBalancerId,
        existing: LoadBalancerId,
    },

    #[error("could not activate {0}: it was never prepared")]
    NotPrepared(LoadBalancerId),

    #[error("activating {0}, but prepare never provisioned a load balancer instance")]
    MissingInstance(LoadBalancerId),

    #[error("could not (re)configure {id} due to {reason}. The operation will be retried on next deployment")]
    Poisoned {
        id: LoadBalancerId,
        reason: PoisonReason,
        /// The record as written to the store, in state removable. Only raised once the
        /// write succeeded
        record: Box<LoadBalancer>,
    },

    #[error("{0} is awaiting removal. The operation will be retried on next deployment")]
    AwaitingRemoval(LoadBalancerId),

    #[error("{message}")]
    Service {
        message: String,
        #[source]
        source: ServiceError,
    },

    #[error("invalid state transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: LoadBalancerId,
        from: State,
        to: State,
    },

    #[error("concurrent modification of {id}: expected state {expected:?}, found {found:?}")]
    Conflict {
        id: LoadBalancerId,
        expected: Option<State>,
        found: Option<State>,
    },

    #[error("timed out waiting for the lock of {0}")]
    LockTimeout(ApplicationId),

    #[error("metadata store error: {0}")]
    Metadata(#[from] MetadataError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ProvisionError {
    /// Whether a later deployment may succeed without any change to the application.
    ///
    /// Clashes and ordering errors need a configuration or control plane change first.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProvisionError::Poisoned { .. }
                | ProvisionError::AwaitingRemoval(_)
                | ProvisionError::Service { .. }
                | ProvisionError::Conflict { .. }
                | ProvisionError::LockTimeout(_)
                | ProvisionError::Metadata(_)
        )
    }

    /// The removable record written before this error was raised, if any.
    pub fn poisoned_record(&self) -> Option<&LoadBalancer> {
        match self {
            ProvisionError::Poisoned { record, .. } => Some(record.as_ref()),
            _ => None,
        }
    }
}
