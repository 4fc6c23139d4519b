//! Transfer Process Core Types

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::state::TransferProcessState;
use crate::dispatch::http::HTTP_PROTOCOL;
use crate::process::{ProcessEntity, ProcessId};
use crate::provision::{ProvisionedResource, ResourceDefinition, ResourceManifest};

pub type TransferProcess = ProcessEntity<TransferProcessState, TransferPayload>;

/// Where data comes from or goes to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataAddress {
    #[serde(rename = "type")]
    pub address_type: String,
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

impl DataAddress {
    pub fn new(address_type: impl Into<String>) -> Self {
        Self {
            address_type: address_type.into(),
            properties: HashMap::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// Request to move one asset under an agreed contract
///
/// `id` is chosen by the consumer and travels to the provider as the
/// correlation id, so both sides can match each other's process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataRequest {
    pub id: String,
    pub protocol: String,
    /// Peer connector address
    pub connector_address: String,
    pub connector_id: String,
    pub asset_id: String,
    pub contract_id: String,
    pub destination: DataAddress,
    /// The connector allocates the destination itself
    #[serde(default)]
    pub managed_resources: bool,
    /// Run the whole exchange inline in one request/response
    #[serde(default)]
    pub sync: bool,
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

impl DataRequest {
    pub fn new(
        asset_id: impl Into<String>,
        connector_address: impl Into<String>,
        destination: DataAddress,
    ) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            protocol: HTTP_PROTOCOL.to_string(),
            connector_address: connector_address.into(),
            connector_id: String::new(),
            asset_id: asset_id.into(),
            contract_id: String::new(),
            destination,
            managed_resources: false,
            sync: false,
            properties: HashMap::new(),
        }
    }

    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = protocol.into();
        self
    }

    pub fn with_contract(mut self, contract_id: impl Into<String>) -> Self {
        self.contract_id = contract_id.into();
        self
    }

    pub fn with_managed_resources(mut self, managed: bool) -> Self {
        self.managed_resources = managed;
        self
    }

    pub fn with_sync(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }

    /// Resources the connector must allocate for this request
    pub fn resource_manifest(&self) -> ResourceManifest {
        if !self.managed_resources {
            return ResourceManifest::default();
        }
        let mut definition = ResourceDefinition::new(&self.destination.address_type);
        definition.properties = self.destination.properties.clone();
        ResourceManifest {
            definitions: vec![definition],
        }
    }
}

/// Payload of a transfer process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferPayload {
    pub data_request: DataRequest,
    #[serde(default)]
    pub manifest: ResourceManifest,
    #[serde(default)]
    pub provisioned: Vec<ProvisionedResource>,
    /// Ids of provisioned resources already released
    #[serde(default)]
    pub deprovisioned: Vec<String>,
    /// Set while a synchronous caller still waits on this process; the poll
    /// loop leaves it alone until cleared or stale
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_pending_since: Option<DateTime<Utc>>,
}

impl TransferPayload {
    pub fn new(data_request: DataRequest) -> Self {
        Self {
            data_request,
            manifest: ResourceManifest::default(),
            provisioned: Vec::new(),
            deprovisioned: Vec::new(),
            sync_pending_since: None,
        }
    }

    /// Definitions with no provisioned resource yet
    pub fn pending_definitions(&self) -> Vec<ResourceDefinition> {
        self.manifest
            .definitions
            .iter()
            .filter(|d| {
                !self
                    .provisioned
                    .iter()
                    .any(|r| r.resource_definition_id == d.id)
            })
            .cloned()
            .collect()
    }

    /// Record resources, ignoring ones already known
    pub fn add_provisioned(&mut self, resources: impl IntoIterator<Item = ProvisionedResource>) {
        for resource in resources {
            if !self.provisioned.iter().any(|r| r.id == resource.id) {
                self.provisioned.push(resource);
            }
        }
    }

    /// Provisioned resources not yet released
    pub fn live_resources(&self) -> Vec<ProvisionedResource> {
        self.provisioned
            .iter()
            .filter(|r| !self.deprovisioned.contains(&r.id))
            .cloned()
            .collect()
    }

    pub fn mark_deprovisioned(&mut self, resource_id: &str) {
        if !self.deprovisioned.iter().any(|id| id == resource_id) {
            self.deprovisioned.push(resource_id.to_string());
        }
    }

    #[cfg(test)]
    pub fn for_test(asset_id: &str) -> Self {
        Self::new(DataRequest::new(
            asset_id,
            "http://provider.test/api",
            DataAddress::new("test-sink"),
        ))
    }
}

/// Outcome classification returned to callers of `initiate_*`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseStatus {
    Ok,
    /// Transient; the caller may retry the same request
    ErrorRetry,
    FatalError,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferInitiateResult {
    pub process_id: Option<ProcessId>,
    pub request_id: String,
    pub status: ResponseStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Response content of a synchronous exchange
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl TransferInitiateResult {
    pub fn ok(process_id: ProcessId, request_id: impl Into<String>) -> Self {
        Self {
            process_id: Some(process_id),
            request_id: request_id.into(),
            status: ResponseStatus::Ok,
            error: None,
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn error(
        process_id: Option<ProcessId>,
        request_id: impl Into<String>,
        status: ResponseStatus,
        error: impl Into<String>,
    ) -> Self {
        Self {
            process_id,
            request_id: request_id.into(),
            status,
            error: Some(error.into()),
            data: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == ResponseStatus::Ok
    }
}
