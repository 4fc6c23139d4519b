//! Integration Tests for Transfer Processes
//!
//! Drive whole transfers through the poll loop one pass at a time, against
//! the in-memory store with mock dispatchers and provisioners.

use std::sync::Arc;
use std::time::Duration;

use crate::config::ManagerConfig;
use crate::dispatch::mock::{MOCK_PROTOCOL, MockDispatcher};
use crate::dispatch::{DispatchError, DispatcherRegistry, MessageType};
use crate::process::{
    Clock, InMemoryProcessStore, ManualClock, ProcessError, ProcessId, ProcessRole, ProcessStore,
};
use crate::provision::mock::MockProvisioner;
use crate::provision::{ProvisionError, ProvisionerRegistry};
use crate::transfer::proxy::mock::StaticProxy;
use crate::transfer::{
    DataAddress, DataProxyManager, DataRequest, DelegatingTransferManager, ResponseStatus,
    SyncTransferManager, TransferPayload, TransferProcess, TransferProcessManager,
    TransferProcessState,
};

type Store = InMemoryProcessStore<TransferProcessState, TransferPayload>;

const SINK: &str = "test-sink";

struct TestHarness {
    manager: Arc<TransferProcessManager>,
    sync: Arc<SyncTransferManager>,
    store: Arc<Store>,
    dispatcher: Arc<MockDispatcher>,
    provisioner: Arc<MockProvisioner>,
    clock: Arc<ManualClock>,
}

impl TestHarness {
    fn new() -> Self {
        Self::with_config(test_config())
    }

    fn with_config(config: ManagerConfig) -> Self {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(Store::with_clock(clock.clone()));
        let dispatcher = Arc::new(MockDispatcher::new());
        let provisioner = Arc::new(MockProvisioner::new(SINK));
        let dispatchers = Arc::new(DispatcherRegistry::new().with(dispatcher.clone()));
        let provisioners = Arc::new(ProvisionerRegistry::new().with(provisioner.clone()));
        let proxies = Arc::new(
            DataProxyManager::new().with(SINK, Arc::new(StaticProxy::new("http://data.test"))),
        );

        let manager = Arc::new(TransferProcessManager::with_clock(
            store.clone(),
            dispatchers.clone(),
            provisioners,
            config.clone(),
            "node-a",
            clock.clone(),
        ));
        let sync = Arc::new(SyncTransferManager::new(
            store.clone(),
            dispatchers,
            proxies,
            config.lease_policy(),
            "node-a",
        )
        .with_clock(clock.clone()));

        Self {
            manager,
            sync,
            store,
            dispatcher,
            provisioner,
            clock,
        }
    }

    async fn state(&self, id: &ProcessId) -> TransferProcessState {
        self.process(id).await.state()
    }

    async fn process(&self, id: &ProcessId) -> TransferProcess {
        self.manager.find(id).await.unwrap().expect("process exists")
    }

    async fn pass(&self) -> usize {
        self.manager.run_pass().await.unwrap()
    }

    async fn initiate_consumer(&self, request: DataRequest) -> ProcessId {
        let result = self.manager.initiate_consumer_request(request).await.unwrap();
        assert!(result.is_ok());
        result.process_id.unwrap()
    }
}

fn test_config() -> ManagerConfig {
    ManagerConfig {
        batch_size: 10,
        lease_ttl_ms: 30_000,
        max_retries: 2,
        retry_delay_ms: 0,
        inbound_lease_backoff_ms: 1,
        ..ManagerConfig::default()
    }
}

fn request() -> DataRequest {
    DataRequest::new("asset-1", "http://provider.test/api", DataAddress::new(SINK))
        .with_protocol(MOCK_PROTOCOL)
        .with_contract("contract-1")
}

// ============================================================
// Consumer
// ============================================================

#[tokio::test]
async fn test_consumer_happy_path_to_ended() {
    let h = TestHarness::new();
    let request = request();
    let request_id = request.id.clone();
    let id = h.initiate_consumer(request).await;
    assert_eq!(h.state(&id).await, TransferProcessState::Initial);

    // no resources: INITIAL -> PROVISIONING -> PROVISIONED in one step
    assert_eq!(h.pass().await, 1);
    let p = h.process(&id).await;
    assert_eq!(p.state(), TransferProcessState::Provisioned);
    assert_eq!(p.state_count(), 2);

    assert_eq!(h.pass().await, 1);
    assert_eq!(h.state(&id).await, TransferProcessState::RequestedAck);
    let sent = h.dispatcher.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].correlation_id, request_id);
    assert_eq!(sent[0].message_type, MessageType::TransferRequest);

    assert_eq!(h.pass().await, 1);
    assert_eq!(h.state(&id).await, TransferProcessState::InProgress);

    // nothing to do while the data flows
    assert_eq!(h.pass().await, 0);

    h.manager.transition_completed(&id).await.unwrap();
    for expected in [
        TransferProcessState::Deprovisioning,
        TransferProcessState::Deprovisioned,
        TransferProcessState::Ended,
    ] {
        assert_eq!(h.pass().await, 1);
        assert_eq!(h.state(&id).await, expected);
    }
    assert_eq!(h.pass().await, 0);
    assert_eq!(h.dispatcher.dispatch_count(), 1);
}

#[tokio::test]
async fn test_consumer_rejection_moves_to_error() {
    let h = TestHarness::new();
    h.dispatcher.push_result(Err(DispatchError::Rejected {
        status: 403,
        reason: "policy violation".into(),
    }));
    let id = h.initiate_consumer(request()).await;

    h.pass().await;
    h.pass().await;

    let p = h.process(&id).await;
    assert_eq!(p.state(), TransferProcessState::Error);
    assert!(p.error_detail().unwrap().contains("policy violation"));
    // terminal
    assert_eq!(h.pass().await, 0);
    assert_eq!(h.dispatcher.dispatch_count(), 1);
}

#[tokio::test]
async fn test_retryable_dispatch_rolls_back_then_succeeds() {
    let h = TestHarness::new();
    h.dispatcher
        .push_result(Err(DispatchError::Connection("refused".into())));
    let id = h.initiate_consumer(request()).await;

    h.pass().await;
    h.pass().await;
    let p = h.process(&id).await;
    assert_eq!(p.state(), TransferProcessState::Provisioned);
    assert_eq!(p.retry_count(), 1);
    assert!(p.error_detail().is_none());

    h.pass().await;
    let p = h.process(&id).await;
    assert_eq!(p.state(), TransferProcessState::RequestedAck);
    assert_eq!(p.retry_count(), 0);
    assert_eq!(h.dispatcher.dispatch_count(), 2);
}

#[tokio::test]
async fn test_retry_budget_exhausted() {
    let h = TestHarness::new();
    h.dispatcher
        .set_default(Err(DispatchError::Timeout("slow peer".into())));
    let id = h.initiate_consumer(request()).await;

    h.pass().await;
    for _ in 0..3 {
        h.pass().await;
    }

    let p = h.process(&id).await;
    assert_eq!(p.state(), TransferProcessState::Error);
    assert!(p.error_detail().unwrap().contains("retry budget exhausted"));
    // max_retries = 2: the first attempt plus two retries
    assert_eq!(h.dispatcher.dispatch_count(), 3);
}

#[tokio::test]
async fn test_unacknowledged_request_is_resent() {
    let config = ManagerConfig {
        request_timeout_ms: 10_000,
        ..test_config()
    };
    let h = TestHarness::with_config(config);

    // a consumer that crashed right after writing REQUESTED
    let request = request();
    let mut p = TransferProcess::new(ProcessRole::Consumer, TransferPayload::new(request.clone()))
        .with_correlation_id(request.id.clone());
    p.transition_through(TransferProcessState::Requested).unwrap();
    h.store.create(&p).await.unwrap();
    let id = *p.id();

    assert_eq!(h.pass().await, 0);
    assert_eq!(h.state(&id).await, TransferProcessState::Requested);

    h.clock.advance(Duration::from_secs(11));
    assert_eq!(h.pass().await, 1);
    let p = h.process(&id).await;
    assert_eq!(p.state(), TransferProcessState::Provisioned);
    assert_eq!(p.retry_count(), 1);

    h.pass().await;
    assert_eq!(h.state(&id).await, TransferProcessState::RequestedAck);
    assert_eq!(h.dispatcher.dispatch_count(), 1);
}

#[tokio::test]
async fn test_inbound_rejection_during_dispatch_wins() {
    let h = TestHarness::new();
    let gate = h.dispatcher.install_gate();
    let id = h.initiate_consumer(request()).await;
    h.pass().await;

    let manager = h.manager.clone();
    let pass = tokio::spawn(async move { manager.run_pass().await });

    gate.entered.notified().await;
    // the lease was released before dispatch, so the inbound write goes through
    assert_eq!(h.state(&id).await, TransferProcessState::Requested);
    h.manager
        .transition_error(&id, "rejected by provider")
        .await
        .unwrap();
    gate.release.notify_one();

    pass.await.unwrap().unwrap();
    let p = h.process(&id).await;
    assert_eq!(p.state(), TransferProcessState::Error);
    assert_eq!(p.error_detail(), Some("rejected by provider"));
}

// ============================================================
// Provisioning and provider
// ============================================================

#[tokio::test]
async fn test_provider_provisions_and_unwinds() {
    let h = TestHarness::new();
    h.provisioner
        .push_provision_failure(ProvisionError::Unavailable("backend busy".into()));
    let result = h
        .manager
        .initiate_provider_request(request().with_managed_resources(true))
        .await
        .unwrap();
    let id = result.process_id.unwrap();

    h.pass().await;
    assert_eq!(h.state(&id).await, TransferProcessState::Provisioning);

    h.pass().await;
    let p = h.process(&id).await;
    assert_eq!(p.state(), TransferProcessState::Provisioning);
    assert_eq!(p.retry_count(), 1);

    h.pass().await;
    let p = h.process(&id).await;
    assert_eq!(p.state(), TransferProcessState::Provisioned);
    assert_eq!(p.payload().provisioned.len(), 1);
    assert_eq!(h.provisioner.provision_count(), 2);

    // the provider never dispatches a request
    h.pass().await;
    assert_eq!(h.state(&id).await, TransferProcessState::InProgress);
    assert_eq!(h.dispatcher.dispatch_count(), 0);

    h.manager.transition_completed(&id).await.unwrap();
    for _ in 0..3 {
        h.pass().await;
    }
    let p = h.process(&id).await;
    assert_eq!(p.state(), TransferProcessState::Ended);
    assert_eq!(h.provisioner.deprovision_count(), 1);
    assert!(p.payload().live_resources().is_empty());
}

#[tokio::test]
async fn test_fatal_provisioning_failure() {
    let h = TestHarness::new();
    h.provisioner
        .push_provision_failure(ProvisionError::Rejected("quota exceeded".into()));
    let id = h
        .initiate_consumer(request().with_managed_resources(true))
        .await;

    h.pass().await;
    h.pass().await;

    let p = h.process(&id).await;
    assert_eq!(p.state(), TransferProcessState::Error);
    assert!(p.error_detail().unwrap().contains("quota exceeded"));
    assert_eq!(h.dispatcher.dispatch_count(), 0);
}

#[tokio::test]
async fn test_failure_releases_provisioned_resources() {
    let h = TestHarness::new();
    h.dispatcher.push_result(Err(DispatchError::Rejected {
        status: 400,
        reason: "bad request".into(),
    }));
    let id = h
        .initiate_consumer(request().with_managed_resources(true))
        .await;

    for _ in 0..3 {
        h.pass().await;
    }

    let p = h.process(&id).await;
    assert_eq!(p.state(), TransferProcessState::Error);
    assert_eq!(h.provisioner.deprovision_count(), 1);
    assert_eq!(p.payload().deprovisioned.len(), 1);
}

#[tokio::test]
async fn test_external_error_releases_resources() {
    let h = TestHarness::new();
    let result = h
        .manager
        .initiate_provider_request(request().with_managed_resources(true))
        .await
        .unwrap();
    let id = result.process_id.unwrap();
    h.pass().await;
    h.pass().await;
    assert_eq!(h.state(&id).await, TransferProcessState::Provisioned);

    let p = h.manager.transition_error(&id, "cancelled").await.unwrap();
    assert_eq!(p.state(), TransferProcessState::Error);
    assert!(p.payload().live_resources().is_empty());
    assert_eq!(h.provisioner.deprovision_count(), 1);
}

#[tokio::test]
async fn test_deprovision_failure_is_retried() {
    let h = TestHarness::new();
    let result = h
        .manager
        .initiate_provider_request(request().with_managed_resources(true))
        .await
        .unwrap();
    let id = result.process_id.unwrap();
    for _ in 0..3 {
        h.pass().await;
    }
    h.manager.transition_completed(&id).await.unwrap();
    h.pass().await;
    assert_eq!(h.state(&id).await, TransferProcessState::Deprovisioning);

    h.provisioner
        .set_fail_deprovision(Some(ProvisionError::Unavailable("busy".into())));
    h.pass().await;
    let p = h.process(&id).await;
    assert_eq!(p.state(), TransferProcessState::Deprovisioning);
    assert_eq!(p.retry_count(), 1);

    h.provisioner.set_fail_deprovision(None);
    h.pass().await;
    assert_eq!(h.state(&id).await, TransferProcessState::Deprovisioned);
}

// ============================================================
// Inbound operations
// ============================================================

#[tokio::test]
async fn test_inbound_ack_and_completion() {
    let h = TestHarness::new();
    let request = request();
    let mut p = TransferProcess::new(ProcessRole::Consumer, TransferPayload::new(request))
        .with_correlation_id("req-1");
    p.transition_through(TransferProcessState::Requested).unwrap();
    h.store.create(&p).await.unwrap();
    let id = *p.id();

    let acked = h.manager.transition_request_ack(&id).await.unwrap();
    assert_eq!(acked.state(), TransferProcessState::RequestedAck);
    // duplicate acknowledgement is harmless
    let again = h.manager.transition_request_ack(&id).await.unwrap();
    assert_eq!(again.state(), TransferProcessState::RequestedAck);
    assert_eq!(again.state_count(), acked.state_count());

    let completed = h.manager.transition_completed(&id).await.unwrap();
    assert_eq!(completed.state(), TransferProcessState::Completed);
    // passed through IN_PROGRESS
    assert_eq!(completed.state_count(), acked.state_count() + 2);

    let unwinding = h.manager.deprovision(&id).await.unwrap();
    assert_eq!(unwinding.state(), TransferProcessState::Deprovisioning);
}

#[tokio::test]
async fn test_inbound_invalid_transition_leaves_process_untouched() {
    let h = TestHarness::new();
    let id = h.initiate_consumer(request()).await;

    let err = h.manager.transition_completed(&id).await.unwrap_err();
    assert!(matches!(err, ProcessError::InvalidStateTransition { .. }));

    let p = h.process(&id).await;
    assert_eq!(p.state(), TransferProcessState::Initial);
    assert!(p.lease().is_none());

    let missing = h.manager.transition_request_ack(&ProcessId::new()).await;
    assert!(matches!(missing, Err(ProcessError::NotFound(_))));
}

#[tokio::test]
async fn test_async_provisioned_report() {
    let h = TestHarness::new();
    let id = h
        .initiate_consumer(request().with_managed_resources(true))
        .await;
    // record the manifest without provisioning anything
    h.provisioner
        .push_provision_failure(ProvisionError::Unavailable("deferred".into()));
    h.pass().await;
    h.pass().await;
    let p = h.process(&id).await;
    assert_eq!(p.state(), TransferProcessState::Provisioning);

    let definition = p.payload().pending_definitions()[0].clone();
    let resource = crate::provision::ProvisionedResource {
        id: "bucket-7".into(),
        resource_definition_id: definition.id.clone(),
        resource_type: SINK.into(),
        properties: Default::default(),
    };
    let p = h
        .manager
        .transition_provisioned(&id, vec![resource.clone()])
        .await
        .unwrap();
    assert_eq!(p.state(), TransferProcessState::Provisioned);

    // duplicate report
    let p = h
        .manager
        .transition_provisioned(&id, vec![resource])
        .await
        .unwrap();
    assert_eq!(p.payload().provisioned.len(), 1);
}

#[tokio::test]
async fn test_initiate_is_idempotent_by_request_id() {
    let h = TestHarness::new();
    let request = request();

    let first = h
        .manager
        .initiate_consumer_request(request.clone())
        .await
        .unwrap();
    let second = h.manager.initiate_consumer_request(request).await.unwrap();
    assert_eq!(first.process_id, second.process_id);
    assert_eq!(h.store.len(), 1);

    let mut blank = DataRequest::new("a", "http://p", DataAddress::new(SINK));
    blank.id = "  ".into();
    let err = h.manager.initiate_consumer_request(blank).await.unwrap_err();
    assert!(matches!(err, ProcessError::InvalidRequest(_)));
}

// ============================================================
// Leases
// ============================================================

#[tokio::test]
async fn test_crashed_holder_is_recovered_after_expiry() {
    let h = TestHarness::new();
    let id = h.initiate_consumer(request()).await;

    // a peer instance took the lease and died
    assert!(
        h.store
            .acquire_lease(&id, "node-b", Duration::from_secs(30))
            .await
            .unwrap()
    );
    assert_eq!(h.pass().await, 0);
    assert_eq!(h.state(&id).await, TransferProcessState::Initial);

    h.clock.advance(Duration::from_secs(31));
    assert_eq!(h.pass().await, 1);
    let p = h.process(&id).await;
    assert_eq!(p.state(), TransferProcessState::Provisioned);
    assert!(p.lease().is_none());
}

#[tokio::test]
async fn test_stop_returns_while_dispatch_is_in_flight() {
    let h = TestHarness::new();
    let gate = h.dispatcher.install_gate();
    let id = h.initiate_consumer(request()).await;

    h.manager.start();
    tokio::time::timeout(Duration::from_secs(2), gate.entered.notified())
        .await
        .expect("request dispatched");

    let stopped = tokio::time::timeout(Duration::from_secs(2), h.manager.stop()).await;
    assert!(stopped.is_ok(), "stop waited for the peer");
    // persisted before the call; another instance re-sends it after the timeout
    assert_eq!(h.state(&id).await, TransferProcessState::Requested);
    assert_eq!(h.dispatcher.dispatch_count(), 1);
}

#[tokio::test]
async fn test_inbound_op_contends_with_live_lease() {
    let h = TestHarness::new();
    let id = h.initiate_consumer(request()).await;
    h.store
        .acquire_lease(&id, "node-b", Duration::from_secs(30))
        .await
        .unwrap();

    let err = h.manager.transition_error(&id, "x").await.unwrap_err();
    assert!(matches!(err, ProcessError::LeaseContention(_)));
    assert!(err.is_retryable());
}

// ============================================================
// Synchronous transfers
// ============================================================

#[tokio::test]
async fn test_sync_consumer_returns_peer_data() {
    let h = TestHarness::new();
    h.dispatcher
        .push_result(Ok(serde_json::json!({ "endpoint": "http://data.test/1" })));
    let request = request().with_sync(true);

    let result = h.sync.initiate_consumer_request(request).await.unwrap();
    assert!(result.is_ok());
    assert_eq!(result.data.unwrap()["endpoint"], "http://data.test/1");

    let id = result.process_id.unwrap();
    let p = h.process(&id).await;
    assert_eq!(p.state(), TransferProcessState::Completed);
    assert_eq!(p.role(), ProcessRole::Consumer);
    assert!(p.payload().sync_pending_since.is_none());
    assert_eq!(h.dispatcher.sent()[0].correlation_id, id.to_string());

    // handed back to the loop once the call returned
    assert_eq!(h.pass().await, 1);
    assert_eq!(h.state(&id).await, TransferProcessState::Deprovisioning);
}

#[tokio::test]
async fn test_sync_process_not_unwound_while_call_is_open() {
    let h = TestHarness::new();
    let gate = h.dispatcher.install_gate();
    let request = request().with_sync(true);
    let request_id = request.id.clone();

    let sync = h.sync.clone();
    let call = tokio::spawn(async move { sync.initiate_consumer_request(request).await });
    gate.entered.notified().await;

    for _ in 0..3 {
        assert_eq!(h.pass().await, 0);
    }
    let stored = h
        .manager
        .find_by_request_id(ProcessRole::Consumer, &request_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.state(), TransferProcessState::Completed);
    assert!(stored.payload().sync_pending_since.is_some());
    let err = h.manager.deprovision(stored.id()).await.unwrap_err();
    assert!(matches!(err, ProcessError::InvalidRequest(_)));

    h.manager
        .transition_error(stored.id(), "provider refused")
        .await
        .unwrap();
    gate.release.notify_one();

    let result = call.await.unwrap().unwrap();
    assert_eq!(result.status, ResponseStatus::FatalError);
    assert_eq!(result.error.as_deref(), Some("provider refused"));
    assert_eq!(h.state(stored.id()).await, TransferProcessState::Error);
}

#[tokio::test]
async fn test_sync_dispatch_failure_recorded_while_loop_runs() {
    let h = TestHarness::new();
    let gate = h.dispatcher.install_gate();
    h.dispatcher
        .push_result(Err(DispatchError::Connection("refused".into())));

    let sync = h.sync.clone();
    let call = tokio::spawn(async move { sync.initiate_consumer_request(request()).await });
    gate.entered.notified().await;
    for _ in 0..3 {
        assert_eq!(h.pass().await, 0);
    }
    gate.release.notify_one();

    let result = call.await.unwrap().unwrap();
    assert_eq!(result.status, ResponseStatus::ErrorRetry);
    let p = h.process(&result.process_id.unwrap()).await;
    assert_eq!(p.state(), TransferProcessState::Error);
    assert!(p.error_detail().unwrap().contains("refused"));
}

#[tokio::test]
async fn test_abandoned_sync_process_is_unwound_after_timeout() {
    let h = TestHarness::new();
    let gate = h.dispatcher.install_gate();

    let sync = h.sync.clone();
    let call = tokio::spawn(async move { sync.initiate_consumer_request(request()).await });
    gate.entered.notified().await;
    assert_eq!(h.pass().await, 0);

    h.clock.advance(Duration::from_secs(301));
    assert_eq!(h.pass().await, 1);
    let p = h
        .store
        .next_for_state(TransferProcessState::Deprovisioning, 10, h.clock.now())
        .await
        .unwrap();
    assert_eq!(p.len(), 1);
    assert!(p[0].payload().sync_pending_since.is_none());

    gate.release.notify_one();
    call.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_sync_request_is_idempotent_by_request_id() {
    let h = TestHarness::new();
    let request = request().with_sync(true);

    let first = h
        .sync
        .initiate_consumer_request(request.clone())
        .await
        .unwrap();
    let second = h.sync.initiate_consumer_request(request).await.unwrap();
    assert_eq!(first.process_id, second.process_id);
    assert!(second.is_ok());
    assert_eq!(h.dispatcher.dispatch_count(), 1);
    assert_eq!(h.store.len(), 1);
}

#[tokio::test]
async fn test_sync_consumer_dispatch_failure() {
    let h = TestHarness::new();
    h.dispatcher
        .push_result(Err(DispatchError::Connection("refused".into())));
    let result = h.sync.initiate_consumer_request(request()).await.unwrap();
    assert_eq!(result.status, ResponseStatus::ErrorRetry);
    let id = result.process_id.unwrap();
    assert_eq!(h.state(&id).await, TransferProcessState::Error);

    h.dispatcher.push_result(Err(DispatchError::Rejected {
        status: 403,
        reason: "denied".into(),
    }));
    let result = h.sync.initiate_consumer_request(request()).await.unwrap();
    assert_eq!(result.status, ResponseStatus::FatalError);
}

#[tokio::test]
async fn test_sync_consumer_sees_rejection_landing_mid_call() {
    let h = TestHarness::new();
    let gate = h.dispatcher.install_gate();
    let request = request();
    let request_id = request.id.clone();

    let sync = h.sync.clone();
    let call = tokio::spawn(async move { sync.initiate_consumer_request(request).await });

    gate.entered.notified().await;
    let stored = h
        .manager
        .find_by_request_id(ProcessRole::Consumer, &request_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.state(), TransferProcessState::Completed);
    h.manager
        .transition_error(stored.id(), "provider refused")
        .await
        .unwrap();
    gate.release.notify_one();

    let result = call.await.unwrap().unwrap();
    assert_eq!(result.status, ResponseStatus::FatalError);
    assert_eq!(result.error.as_deref(), Some("provider refused"));
}

#[tokio::test]
async fn test_sync_provider_uses_data_proxy() {
    let h = TestHarness::new();
    let result = h.sync.initiate_provider_request(request()).await.unwrap();
    assert!(result.is_ok());
    let data = result.data.unwrap();
    assert_eq!(data["type"], SINK);
    assert_eq!(data["properties"]["endpoint"], "http://data.test");

    let unknown = DataRequest::new("a", "http://p", DataAddress::new("ftp"));
    let result = h.sync.initiate_provider_request(unknown).await.unwrap();
    assert_eq!(result.status, ResponseStatus::FatalError);
    let p = h.process(&result.process_id.unwrap()).await;
    assert_eq!(p.state(), TransferProcessState::Error);
}

#[tokio::test]
async fn test_delegating_routes_on_sync_flag() {
    let h = TestHarness::new();
    let delegating = DelegatingTransferManager::new(h.manager.clone(), h.sync.clone());

    let queued = delegating
        .initiate_consumer_request(request())
        .await
        .unwrap();
    let inline = delegating
        .initiate_consumer_request(request().with_sync(true))
        .await
        .unwrap();

    assert_eq!(
        h.state(&queued.process_id.unwrap()).await,
        TransferProcessState::Initial
    );
    assert_eq!(
        h.state(&inline.process_id.unwrap()).await,
        TransferProcessState::Completed
    );
    assert_eq!(h.dispatcher.dispatch_count(), 1);
}
