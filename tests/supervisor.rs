use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use pretty_assertions::assert_eq;
use time::OffsetDateTime;
use tokio::time::sleep;
use wearlink::{
    ConnectBehaviour, ConnectionState, DeviceIdentity, DeviceStore, FakeTransport,
    FakeTransportConfig, KeepAlive, LinkConfig, LinkStack, MemoryStore, ReconnectSupervisor,
    SavedDeviceRecord, SupervisorConfig, SupervisorStatus, SyncConfig,
};

const HOUR_MS: i64 = 60 * 60 * 1000;

fn ring() -> DeviceIdentity {
    DeviceIdentity::new("R02_A1B2", "AA:BB:CC:DD:EE:01", Some(-52))
}

fn now_ms() -> i64 {
    i64::try_from(OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000)
        .expect("current time fits in i64 milliseconds")
}

#[derive(Debug, Default)]
struct RecordingKeepAlive {
    acquired: AtomicUsize,
    updates: AtomicUsize,
    released: AtomicUsize,
}

impl KeepAlive for RecordingKeepAlive {
    fn acquire(&self) {
        self.acquired.fetch_add(1, Ordering::SeqCst);
    }

    fn update(&self, _status: &SupervisorStatus) {
        self.updates.fetch_add(1, Ordering::SeqCst);
    }

    fn release(&self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

struct Harness {
    transport: Arc<FakeTransport>,
    stack: LinkStack,
    store: Arc<MemoryStore>,
    keep_alive: Arc<RecordingKeepAlive>,
    supervisor: Arc<ReconnectSupervisor>,
}

impl Harness {
    fn new(transport: FakeTransport, store: MemoryStore) -> Self {
        let transport = Arc::new(transport);
        let stack = LinkStack::assemble(
            transport.clone(),
            LinkConfig::default(),
            SyncConfig::default(),
        );
        let store = Arc::new(store);
        let keep_alive = Arc::new(RecordingKeepAlive::default());
        let supervisor = ReconnectSupervisor::new(
            Arc::clone(&stack.manager),
            stack.sync.clone(),
            store.clone(),
            keep_alive.clone(),
            SupervisorConfig::default(),
        );
        Self {
            transport,
            stack,
            store,
            keep_alive,
            supervisor,
        }
    }

    async fn wait_for(&self, target: ConnectionState) {
        self.stack
            .manager
            .wait_for_state(|state| state == target, Duration::from_secs(120))
            .await
            .expect("target state should be reached");
        // Let the state observer persist the outcome.
        sleep(Duration::from_millis(10)).await;
    }

    fn saved(&self) -> SavedDeviceRecord {
        self.store
            .load()
            .expect("memory store never fails")
            .expect("a record should be saved")
    }
}

#[tokio::test(start_paused = true)]
async fn start_reconnects_to_a_recently_used_device() {
    let record = SavedDeviceRecord::connected(&ring(), now_ms() - HOUR_MS);
    let harness = Harness::new(
        FakeTransport::with_devices(vec![ring()]),
        MemoryStore::with_record(record.clone()),
    );

    harness.supervisor.start().await;
    harness.wait_for(ConnectionState::Connected).await;

    let saved = harness.saved();
    assert!(saved.last_connection_succeeded);
    assert!(saved.last_connected_at_epoch_ms > record.last_connected_at_epoch_ms);
    assert_eq!(0, saved.connection_attempt_count);
    assert!(harness.supervisor.is_running().await);
}

#[tokio::test(start_paused = true)]
async fn start_ignores_a_stale_device() {
    let record = SavedDeviceRecord::connected(&ring(), now_ms() - 25 * HOUR_MS);
    let harness = Harness::new(
        FakeTransport::with_devices(vec![ring()]),
        MemoryStore::with_record(record),
    );

    harness.supervisor.start().await;
    sleep(Duration::from_secs(60)).await;

    assert_eq!(ConnectionState::Disconnected, harness.stack.manager.state());
    assert_eq!(0, harness.transport.stats().direct_connects);
}

#[tokio::test(start_paused = true)]
async fn start_respects_an_auto_connect_opt_out() {
    let mut record = SavedDeviceRecord::connected(&ring(), now_ms() - HOUR_MS);
    record.auto_connect_enabled = false;
    let harness = Harness::new(
        FakeTransport::with_devices(vec![ring()]),
        MemoryStore::with_record(record),
    );

    harness.supervisor.start().await;
    sleep(Duration::from_secs(30)).await;

    assert_eq!(ConnectionState::Disconnected, harness.stack.manager.state());
}

#[tokio::test(start_paused = true)]
async fn request_connection_saves_and_connects() {
    let harness = Harness::new(FakeTransport::with_devices(vec![ring()]), MemoryStore::new());

    harness.supervisor.request_connection(ring()).await;
    harness.wait_for(ConnectionState::Connected).await;

    let saved = harness.saved();
    assert_eq!(ring().address(), saved.address);
    assert!(saved.auto_connect_enabled);
    assert!(saved.last_connection_succeeded);
    assert!(saved.last_connected_at_epoch_ms > 0);
}

#[tokio::test(start_paused = true)]
async fn failed_attempts_are_counted_and_retried() {
    let harness = Harness::new(
        FakeTransport::new(
            FakeTransportConfig::builder()
                .devices(vec![ring()])
                .direct_connect(ConnectBehaviour::Fail)
                .scan_connect(ConnectBehaviour::Fail)
                .build(),
        ),
        MemoryStore::new(),
    );

    harness.supervisor.request_connection(ring()).await;
    harness.wait_for(ConnectionState::Error).await;
    let saved = harness.saved();
    assert!(!saved.last_connection_succeeded);
    assert!(saved.connection_attempt_count >= 1);

    harness.transport.set_direct_connect(ConnectBehaviour::Succeed {
        after: Duration::from_millis(200),
    });
    harness.wait_for(ConnectionState::Connected).await;
    assert_eq!(0, harness.saved().connection_attempt_count);
}

#[tokio::test(start_paused = true)]
async fn health_checks_read_the_battery_unless_paused() {
    let harness = Harness::new(FakeTransport::with_devices(vec![ring()]), MemoryStore::new());
    harness.supervisor.request_connection(ring()).await;
    harness.wait_for(ConnectionState::Connected).await;

    harness.supervisor.pause_health_checks();
    let sent_before = harness.transport.stats().commands_sent;
    sleep(Duration::from_secs(30)).await;
    assert_eq!(sent_before, harness.transport.stats().commands_sent);
    assert!(harness.supervisor.status().borrow().health_checks_paused);
    assert_eq!(ConnectionState::Connected, harness.stack.manager.state());

    harness.supervisor.resume_health_checks();
    sleep(Duration::from_secs(6)).await;
    assert!(harness.transport.stats().commands_sent > sent_before);
    let status = harness.supervisor.status().borrow().clone();
    assert_eq!(Some(87), status.battery_level);
    assert!(status.last_health_check.is_some());
    assert_eq!(Some("R02_A1B2".to_string()), status.device_name);
}

#[tokio::test(start_paused = true)]
async fn stop_disconnects_and_releases_the_keep_alive() {
    let harness = Harness::new(FakeTransport::with_devices(vec![ring()]), MemoryStore::new());
    harness.supervisor.request_connection(ring()).await;
    harness.supervisor.start().await;
    harness.wait_for(ConnectionState::Connected).await;

    harness.supervisor.stop().await;
    sleep(Duration::from_secs(60)).await;

    assert!(!harness.supervisor.is_running().await);
    assert_eq!(ConnectionState::Disconnected, harness.stack.manager.state());
    assert!(!harness.stack.manager.wants_connection());
    let status = harness.supervisor.status().borrow().clone();
    assert!(!status.running);
    assert_eq!(1, harness.keep_alive.acquired.load(Ordering::SeqCst));
    assert_eq!(1, harness.keep_alive.released.load(Ordering::SeqCst));
    assert!(harness.keep_alive.updates.load(Ordering::SeqCst) > 0);
}
