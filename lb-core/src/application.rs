use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ModelError;

/// Name of the instance every application gets unless told otherwise.
pub const DEFAULT_INSTANCE: &str = "default";

/// Tester instances carry this suffix and never receive load balancers.
const TESTER_SUFFIX: &str = "-t";

/// ApplicationId identifies one instance of a tenant's application.
///
/// Serialized as `tenant:application:instance`, which is also the form used in
/// metadata store paths and in feature flag keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ApplicationId {
    tenant: String,
    application: String,
    instance: String,
}

impl ApplicationId {
    pub fn new(
        tenant: impl Into<String>,
        application: impl Into<String>,
        instance: impl Into<String>,
    ) -> Result<Self, ModelError> {
        let id = ApplicationId {
            tenant: tenant.into(),
            application: application.into(),
            instance: instance.into(),
        };
        for part in [&id.tenant, &id.application, &id.instance] {
            if part.is_empty() || part.contains(':') || part.contains('/') {
                return Err(ModelError::InvalidApplicationId(format!(
                    "'{}' in {}:{}:{}",
                    part, id.tenant, id.application, id.instance
                )));
            }
        }
        Ok(id)
    }

    /// Parses the `tenant:application:instance` form.
    pub fn from_serialized(value: &str) -> Result<Self, ModelError> {
        let parts: Vec<&str> = value.split(':').collect();
        match parts.as_slice() {
            [tenant, application, instance] => ApplicationId::new(*tenant, *application, *instance),
            _ => Err(ModelError::InvalidApplicationId(format!(
                "expected tenant:application:instance, got '{}'",
                value
            ))),
        }
    }

    pub fn serialized_form(&self) -> String {
        format!("{}:{}:{}", self.tenant, self.application, self.instance)
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    pub fn application(&self) -> &str {
        &self.application
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn is_tester(&self) -> bool {
        self.instance.ends_with(TESTER_SUFFIX)
    }

    pub fn has_default_instance(&self) -> bool {
        self.instance == DEFAULT_INSTANCE
    }

    /// Returns true if both ids belong to the same tenant and application, ignoring instance.
    pub fn same_application(&self, other: &ApplicationId) -> bool {
        self.tenant == other.tenant && self.application == other.application
    }
}

impl fmt::Display for ApplicationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.tenant, self.application, self.instance)
    }
}

impl TryFrom<String> for ApplicationId {
    type Error = ModelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ApplicationId::from_serialized(&value)
    }
}

impl From<ApplicationId> for String {
    fn from(id: ApplicationId) -> Self {
        id.serialized_form()
    }
}
