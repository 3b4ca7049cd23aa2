use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ModelError;

/// CloudAccount identifies the account owning a cloud resource. An empty value means unspecified.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CloudAccount(String);

impl CloudAccount {
    pub fn new(account: impl Into<String>) -> Self {
        CloudAccount(account.into())
    }

    pub fn unspecified() -> Self {
        CloudAccount(String::new())
    }

    pub fn value(&self) -> &str {
        &self.0
    }

    pub fn is_unspecified(&self) -> bool {
        self.0.is_empty()
    }

    /// An exclave account is a specified account, other than the zone's own, in a zone that
    /// allows enclaves. Network reachability from the load balancer service differs for these.
    pub fn is_exclave(&self, zone: &Zone) -> bool {
        zone.allow_enclave && !self.is_unspecified() && self != &zone.account
    }
}

impl fmt::Display for CloudAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unspecified() {
            write!(f, "<unspecified>")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Zone describes the deployment zone the provisioner runs in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Zone {
    /// Whether applications may place resources in their own cloud accounts
    #[serde(default)]
    pub allow_enclave: bool,
    /// The zone's own cloud account
    #[serde(default)]
    pub account: CloudAccount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessType {
    AwsPrivateLink,
    GcpServiceConnect,
}

/// An external identity allowed to connect to a private endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AllowedUrn {
    pub access_type: AccessType,
    pub urn: String,
}

impl AllowedUrn {
    pub fn new(access_type: AccessType, urn: impl Into<String>) -> Self {
        AllowedUrn {
            access_type,
            urn: urn.into(),
        }
    }
}

/// ZoneEndpoint holds the visibility settings of a cluster's zone-scoped endpoint.
///
/// Constructed through [`ZoneEndpoint::new`], which rejects endpoints that are neither public
/// nor private, and URNs without a value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawZoneEndpoint")]
pub struct ZoneEndpoint {
    public_endpoint: bool,
    private_endpoint: bool,
    allowed_urns: Vec<AllowedUrn>,
}

#[derive(Deserialize)]
struct RawZoneEndpoint {
    public_endpoint: bool,
    private_endpoint: bool,
    #[serde(default)]
    allowed_urns: Vec<AllowedUrn>,
}

impl TryFrom<RawZoneEndpoint> for ZoneEndpoint {
    type Error = ModelError;

    fn try_from(raw: RawZoneEndpoint) -> Result<Self, Self::Error> {
        ZoneEndpoint::new(raw.public_endpoint, raw.private_endpoint, raw.allowed_urns)
    }
}

impl ZoneEndpoint {
    pub fn new(
        public_endpoint: bool,
        private_endpoint: bool,
        allowed_urns: Vec<AllowedUrn>,
    ) -> Result<Self, ModelError> {
        if !public_endpoint && !private_endpoint {
            return Err(ModelError::InvalidEndpoint(
                "endpoint must be public, private or both".to_string(),
            ));
        }
        if let Some(urn) = allowed_urns.iter().find(|u| u.urn.trim().is_empty()) {
            return Err(ModelError::InvalidEndpoint(format!(
                "empty URN for access type {:?}",
                urn.access_type
            )));
        }
        Ok(ZoneEndpoint {
            public_endpoint,
            private_endpoint,
            allowed_urns,
        })
    }

    pub fn is_public_endpoint(&self) -> bool {
        self.public_endpoint
    }

    pub fn is_private_endpoint(&self) -> bool {
        self.private_endpoint
    }

    pub fn allowed_urns(&self) -> &[AllowedUrn] {
        &self.allowed_urns
    }

    pub fn is_default(&self) -> bool {
        self == &ZoneEndpoint::default()
    }
}

impl Default for ZoneEndpoint {
    fn default() -> Self {
        ZoneEndpoint {
            public_endpoint: true,
            private_endpoint: false,
            allowed_urns: Vec::new(),
        }
    }
}
