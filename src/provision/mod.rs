//! Resource Provisioning
//!
//! Side-effecting allocation a transfer needs before data can move (a bucket,
//! a queue, a temporary credential) and its release afterwards. Provisioners
//! are registered at startup; the first one that accepts a definition wins.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// One resource a transfer needs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDefinition {
    pub id: String,
    pub resource_type: String,
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

impl ResourceDefinition {
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            resource_type: resource_type.into(),
            properties: HashMap::new(),
        }
    }
}

/// A resource that exists and must be deprovisioned eventually
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionedResource {
    pub id: String,
    pub resource_definition_id: String,
    pub resource_type: String,
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

/// Everything a process must provision before it may proceed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceManifest {
    pub definitions: Vec<ResourceDefinition>,
}

impl ResourceManifest {
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProvisionError {
    #[error("Provisioning backend unavailable: {0}")]
    Unavailable(String),

    #[error("Provisioning rejected: {0}")]
    Rejected(String),

    #[error("No provisioner for resource type: {0}")]
    NoProvisioner(String),
}

impl ProvisionError {
    #[inline]
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProvisionError::Unavailable(_))
    }
}

#[async_trait]
pub trait Provisioner: Send + Sync {
    fn name(&self) -> &'static str;

    fn can_provision(&self, definition: &ResourceDefinition) -> bool;

    fn can_deprovision(&self, resource: &ProvisionedResource) -> bool;

    /// Must be idempotent on `definition.id`
    async fn provision(
        &self,
        definition: &ResourceDefinition,
    ) -> Result<ProvisionedResource, ProvisionError>;

    /// Must tolerate a resource that is already gone
    async fn deprovision(&self, resource: &ProvisionedResource) -> Result<(), ProvisionError>;
}

/// Ordered provisioner table, built once at startup
#[derive(Default, Clone)]
pub struct ProvisionerRegistry {
    provisioners: Vec<Arc<dyn Provisioner>>,
}

impl ProvisionerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provisioner: Arc<dyn Provisioner>) {
        self.provisioners.push(provisioner);
    }

    pub fn with(mut self, provisioner: Arc<dyn Provisioner>) -> Self {
        self.register(provisioner);
        self
    }

    pub async fn provision(
        &self,
        definition: &ResourceDefinition,
    ) -> Result<ProvisionedResource, ProvisionError> {
        let provisioner = self
            .provisioners
            .iter()
            .find(|p| p.can_provision(definition))
            .ok_or_else(|| ProvisionError::NoProvisioner(definition.resource_type.clone()))?;

        debug!(
            provisioner = provisioner.name(),
            definition_id = %definition.id,
            resource_type = %definition.resource_type,
            "Provisioning resource"
        );
        let resource = provisioner.provision(definition).await?;
        info!(resource_id = %resource.id, resource_type = %resource.resource_type, "Resource provisioned");
        Ok(resource)
    }

    pub async fn deprovision(&self, resource: &ProvisionedResource) -> Result<(), ProvisionError> {
        let provisioner = self
            .provisioners
            .iter()
            .find(|p| p.can_deprovision(resource))
            .ok_or_else(|| ProvisionError::NoProvisioner(resource.resource_type.clone()))?;

        provisioner.deprovision(resource).await?;
        info!(resource_id = %resource.id, resource_type = %resource.resource_type, "Resource deprovisioned");
        Ok(())
    }
}

/// Mock provisioner for testing
#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub struct MockProvisioner {
        resource_type: String,
        provision_count: AtomicUsize,
        deprovision_count: AtomicUsize,
        /// Scripted provision failures, consumed in order
        provision_failures: Mutex<VecDeque<ProvisionError>>,
        fail_deprovision: Mutex<Option<ProvisionError>>,
    }

    impl MockProvisioner {
        pub fn new(resource_type: impl Into<String>) -> Self {
            Self {
                resource_type: resource_type.into(),
                provision_count: AtomicUsize::new(0),
                deprovision_count: AtomicUsize::new(0),
                provision_failures: Mutex::new(VecDeque::new()),
                fail_deprovision: Mutex::new(None),
            }
        }

        pub fn push_provision_failure(&self, error: ProvisionError) {
            self.provision_failures.lock().unwrap().push_back(error);
        }

        pub fn set_fail_deprovision(&self, error: Option<ProvisionError>) {
            *self.fail_deprovision.lock().unwrap() = error;
        }

        pub fn provision_count(&self) -> usize {
            self.provision_count.load(Ordering::SeqCst)
        }

        pub fn deprovision_count(&self) -> usize {
            self.deprovision_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Provisioner for MockProvisioner {
        fn name(&self) -> &'static str {
            "mock"
        }

        fn can_provision(&self, definition: &ResourceDefinition) -> bool {
            definition.resource_type == self.resource_type
        }

        fn can_deprovision(&self, resource: &ProvisionedResource) -> bool {
            resource.resource_type == self.resource_type
        }

        async fn provision(
            &self,
            definition: &ResourceDefinition,
        ) -> Result<ProvisionedResource, ProvisionError> {
            self.provision_count.fetch_add(1, Ordering::SeqCst);
            if let Some(e) = self.provision_failures.lock().unwrap().pop_front() {
                return Err(e);
            }
            Ok(ProvisionedResource {
                id: format!("res-{}", definition.id),
                resource_definition_id: definition.id.clone(),
                resource_type: definition.resource_type.clone(),
                properties: definition.properties.clone(),
            })
        }

        async fn deprovision(&self, _resource: &ProvisionedResource) -> Result<(), ProvisionError> {
            self.deprovision_count.fetch_add(1, Ordering::SeqCst);
            match self.fail_deprovision.lock().unwrap().clone() {
                Some(e) => Err(e),
                None => Ok(()),
            }
        }
    }
}
