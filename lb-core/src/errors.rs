use thiserror::Error;

/// Raised when a model value is constructed from invalid parts.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("Invalid application id: {0}")]
    InvalidApplicationId(String),

    #[error("Invalid cluster spec: {0}")]
    InvalidCluster(String),

    #[error("Invalid zone endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Invalid load balancer id: {0}")]
    InvalidLoadBalancerId(String),

    #[error("Invalid load balancer instance: {0}")]
    InvalidInstance(String),
}
