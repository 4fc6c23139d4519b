//! Data proxies answer synchronous provider requests inline.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::types::DataRequest;

/// What a proxy hands back to the consumer: how to reach the data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyEntry {
    #[serde(rename = "type")]
    pub entry_type: String,
    #[serde(default)]
    pub properties: HashMap<String, serde_json::Value>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Data proxy failed: {0}")]
pub struct ProxyError(pub String);

#[async_trait]
pub trait DataProxy: Send + Sync {
    async fn get_data(&self, request: &DataRequest) -> Result<ProxyEntry, ProxyError>;
}

/// Destination type → proxy, built once at startup
#[derive(Default, Clone)]
pub struct DataProxyManager {
    proxies: HashMap<String, Arc<dyn DataProxy>>,
}

impl DataProxyManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_proxy(&mut self, destination_type: impl Into<String>, proxy: Arc<dyn DataProxy>) {
        self.proxies.insert(destination_type.into(), proxy);
    }

    pub fn with(mut self, destination_type: impl Into<String>, proxy: Arc<dyn DataProxy>) -> Self {
        self.add_proxy(destination_type, proxy);
        self
    }

    pub fn get_proxy(&self, request: &DataRequest) -> Option<Arc<dyn DataProxy>> {
        self.proxies.get(&request.destination.address_type).cloned()
    }
}


#[cfg(test)]
mod tests {
    use super::mock::StaticProxy;
    use super::*;
    use crate::transfer::types::DataAddress;

    #[tokio::test]
    async fn test_proxy_lookup_by_destination_type() {
        let proxies = DataProxyManager::new().with("rest", Arc::new(StaticProxy::new("http://data")));

        let rest = DataRequest::new("a", "http://p", DataAddress::new("rest"));
        let entry = proxies
            .get_proxy(&rest)
            .unwrap()
            .get_data(&rest)
            .await
            .unwrap();
        assert_eq!(entry.entry_type, "rest");
        assert_eq!(entry.properties["endpoint"], "http://data");

        let other = DataRequest::new("a", "http://p", DataAddress::new("ftp"));
        assert!(proxies.get_proxy(&other).is_none());
    }
}
