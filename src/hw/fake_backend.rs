use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bon::Builder;
use tokio::sync::{broadcast, mpsc};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::model::{DeviceIdentity, LinkEvent, ScanEvent, ScanFilter};
use super::transport::Transport;
use crate::error::{FixtureError, InteractionError};
use crate::gate::ResponseSlot;
use crate::protocol::{
    ActivitySlot, HourlyReading, MetricKind, MinuteReading, PressureReading, VendorPayload,
    VendorRequest, VendorResponse,
};

const LINK_EVENT_CAPACITY: usize = 32;

/// Parsed fake scan fixture records.
#[derive(Debug, Clone, derive_more::Into)]
pub struct ScanFixture {
    devices: Vec<DeviceIdentity>,
}

impl FromStr for ScanFixture {
    type Err = FixtureError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let devices = parse_scan_fixture(value)?;
        Ok(Self { devices })
    }
}

/// How the fake link answers one connect strategy.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ConnectBehaviour {
    /// The link comes up `after` the call.
    Succeed { after: Duration },
    /// The call returns an error immediately.
    Fail,
    /// The call is accepted but the link never comes up.
    Never,
}

/// How the fake device answers one command.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseScript {
    /// Resolve the slot with `response` after a delay.
    Respond {
        after: Duration,
        response: VendorResponse,
    },
    /// Accept the write and never answer.
    Silent,
    /// Reject the write at the transport layer.
    RejectSend,
}

/// Settings for a [`FakeTransport`].
#[derive(Debug, Builder)]
pub struct FakeTransportConfig {
    #[builder(default)]
    devices: Vec<DeviceIdentity>,
    #[builder(default = true)]
    permissions_granted: bool,
    #[builder(default = ConnectBehaviour::Succeed { after: Duration::from_millis(200) })]
    direct_connect: ConnectBehaviour,
    #[builder(default = ConnectBehaviour::Succeed { after: Duration::from_millis(200) })]
    scan_connect: ConnectBehaviour,
    scan_failure: Option<i32>,
    #[builder(default = Duration::from_millis(100))]
    scan_report_delay: Duration,
    #[builder(default = Duration::from_millis(50))]
    response_delay: Duration,
    /// Script applied to requests with no explicit entry in `responses`.
    /// When absent the fake answers with canned sample data.
    default_script: Option<ResponseScript>,
    #[builder(default)]
    responses: Vec<(VendorRequest, ResponseScript)>,
}

/// Counters recorded by a [`FakeTransport`].
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct FakeTransportStats {
    pub permission_checks: usize,
    pub direct_connects: usize,
    pub scan_connects: usize,
    pub scans: usize,
    pub disconnects: usize,
    pub commands_sent: usize,
    pub max_concurrent_commands: usize,
    pub late_responses_ignored: usize,
}

/// Scripted in-memory transport used by tests and `--fake` mode.
#[derive(Debug)]
pub struct FakeTransport {
    devices: Vec<DeviceIdentity>,
    permissions_granted: bool,
    direct_connect: Mutex<ConnectBehaviour>,
    scan_connect: Mutex<ConnectBehaviour>,
    scan_failure: Option<i32>,
    scan_report_delay: Duration,
    response_delay: Duration,
    default_script: Option<ResponseScript>,
    responses: HashMap<RequestKey, ResponseScript>,
    link: Arc<FakeLink>,
    scan_token: Mutex<Option<CancellationToken>>,
    outstanding: Mutex<Vec<ResponseSlot>>,
    stats: Arc<StatsCell>,
}

#[derive(Debug)]
struct FakeLink {
    connected: AtomicBool,
    address: Mutex<Option<String>>,
    epoch: AtomicU64,
    events: broadcast::Sender<LinkEvent>,
}

impl FakeLink {
    fn establish(&self, address: &str, epoch: u64) -> bool {
        if self.epoch.load(Ordering::Acquire) != epoch {
            trace!(%address, "discarding stale fake connect");
            return false;
        }
        if self.connected.swap(true, Ordering::AcqRel) {
            return false;
        }
        set(&self.address, Some(address.to_string()));
        let _ = self.events.send(LinkEvent::Connected {
            address: address.to_string(),
        });
        true
    }

    fn sever(&self) -> Option<String> {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        if !self.connected.swap(false, Ordering::AcqRel) {
            return None;
        }
        let address = take(&self.address).unwrap_or_default();
        let _ = self.events.send(LinkEvent::Disconnected {
            address: address.clone(),
        });
        Some(address)
    }
}

#[derive(Debug, Default)]
struct StatsCell {
    permission_checks: AtomicUsize,
    direct_connects: AtomicUsize,
    scan_connects: AtomicUsize,
    scans: AtomicUsize,
    disconnects: AtomicUsize,
    commands_sent: AtomicUsize,
    max_concurrent_commands: AtomicUsize,
    late_responses_ignored: AtomicUsize,
}

impl StatsCell {
    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> FakeTransportStats {
        FakeTransportStats {
            permission_checks: self.permission_checks.load(Ordering::Relaxed),
            direct_connects: self.direct_connects.load(Ordering::Relaxed),
            scan_connects: self.scan_connects.load(Ordering::Relaxed),
            scans: self.scans.load(Ordering::Relaxed),
            disconnects: self.disconnects.load(Ordering::Relaxed),
            commands_sent: self.commands_sent.load(Ordering::Relaxed),
            max_concurrent_commands: self.max_concurrent_commands.load(Ordering::Relaxed),
            late_responses_ignored: self.late_responses_ignored.load(Ordering::Relaxed),
        }
    }
}

/// Requests compared by metric and offset.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
enum RequestKey {
    Battery,
    History(MetricKind, u32),
}

impl From<VendorRequest> for RequestKey {
    fn from(request: VendorRequest) -> Self {
        match request {
            VendorRequest::ReadBattery => Self::Battery,
            VendorRequest::DailyHistory { metric, day_offset } => {
                Self::History(metric, day_offset)
            }
        }
    }
}

impl FakeTransport {
    /// Creates a fake transport from explicit settings.
    #[must_use]
    pub fn new(config: FakeTransportConfig) -> Self {
        let FakeTransportConfig {
            devices,
            permissions_granted,
            direct_connect,
            scan_connect,
            scan_failure,
            scan_report_delay,
            response_delay,
            default_script,
            responses,
        } = config;
        let (events, _) = broadcast::channel(LINK_EVENT_CAPACITY);

        Self {
            devices,
            permissions_granted,
            direct_connect: Mutex::new(direct_connect),
            scan_connect: Mutex::new(scan_connect),
            scan_failure,
            scan_report_delay,
            response_delay,
            default_script,
            responses: responses
                .into_iter()
                .map(|(request, script)| (RequestKey::from(request), script))
                .collect(),
            link: Arc::new(FakeLink {
                connected: AtomicBool::new(false),
                address: Mutex::new(None),
                epoch: AtomicU64::new(0),
                events,
            }),
            scan_token: Mutex::new(None),
            outstanding: Mutex::new(Vec::new()),
            stats: Arc::new(StatsCell::default()),
        }
    }

    /// Creates a fake transport that discovers `devices` and otherwise uses defaults.
    #[must_use]
    pub fn with_devices(devices: Vec<DeviceIdentity>) -> Self {
        Self::new(FakeTransportConfig::builder().devices(devices).build())
    }

    /// Returns a snapshot of the recorded counters.
    #[must_use]
    pub fn stats(&self) -> FakeTransportStats {
        self.stats.snapshot()
    }

    /// Returns whether a scan started through [`Transport::scan`] is still running.
    #[must_use]
    pub fn is_scanning(&self) -> bool {
        lock(&self.scan_token)
            .as_ref()
            .is_some_and(|token| !token.is_cancelled())
    }

    /// Changes how subsequent direct connects behave.
    pub fn set_direct_connect(&self, behaviour: ConnectBehaviour) {
        set(&self.direct_connect, behaviour);
    }

    /// Changes how subsequent scan-assisted connects behave.
    pub fn set_scan_connect(&self, behaviour: ConnectBehaviour) {
        set(&self.scan_connect, behaviour);
    }

    /// Simulates an unexpected link loss (device out of range).
    pub fn drop_link(&self) {
        if let Some(address) = self.link.sever() {
            debug!(%address, "fake link dropped");
        }
    }

    fn schedule_link(
        &self,
        behaviour: ConnectBehaviour,
        address: &str,
        operation: &'static str,
    ) -> Result<(), InteractionError> {
        match behaviour {
            ConnectBehaviour::Fail => Err(InteractionError::Scripted { operation }),
            ConnectBehaviour::Never => Ok(()),
            ConnectBehaviour::Succeed { after } => {
                let link = Arc::clone(&self.link);
                let epoch = link.epoch.load(Ordering::Acquire);
                let address = address.to_string();
                tokio::spawn(async move {
                    sleep(after).await;
                    link.establish(&address, epoch);
                });
                Ok(())
            }
        }
    }

    fn known_address(&self, address: &str) -> Result<(), InteractionError> {
        if self
            .devices
            .iter()
            .any(|device| device.address().eq_ignore_ascii_case(address))
        {
            Ok(())
        } else {
            Err(InteractionError::DeviceNotFound {
                address: address.to_string(),
            })
        }
    }

    fn script_for(&self, request: VendorRequest) -> ResponseScript {
        if let Some(script) = self.responses.get(&RequestKey::from(request)) {
            return script.clone();
        }
        self.default_script
            .clone()
            .unwrap_or_else(|| ResponseScript::Respond {
                after: self.response_delay,
                response: sample_response(request),
            })
    }

    fn track_concurrency(&self, slot: &ResponseSlot) {
        let mut outstanding = match self.outstanding.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        outstanding.retain(|pending| !pending.is_settled());
        outstanding.push(slot.clone());
        self.stats
            .max_concurrent_commands
            .fetch_max(outstanding.len(), Ordering::Relaxed);
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn check_permissions(&self) -> Result<(), InteractionError> {
        StatsCell::bump(&self.stats.permission_checks);
        if self.permissions_granted {
            Ok(())
        } else {
            Err(InteractionError::PermissionDenied)
        }
    }

    async fn scan(
        &self,
        filter: &ScanFilter,
    ) -> Result<mpsc::Receiver<ScanEvent>, InteractionError> {
        StatsCell::bump(&self.stats.scans);
        let (sender, receiver) = mpsc::channel(self.devices.len().max(1));

        if let Some(code) = self.scan_failure {
            let _ = sender.try_send(ScanEvent::Failed { code });
            return Ok(receiver);
        }

        let token = CancellationToken::new();
        if let Some(previous) = replace(&self.scan_token, Some(token.clone())) {
            previous.cancel();
        }

        let devices: Vec<DeviceIdentity> = self
            .devices
            .iter()
            .filter(|device| filter.accepts(device))
            .cloned()
            .collect();
        let delay = self.scan_report_delay;
        tokio::spawn(async move {
            for device in devices {
                tokio::select! {
                    () = token.cancelled() => return,
                    () = sleep(delay) => {}
                }
                if sender.send(ScanEvent::Found(device)).await.is_err() {
                    return;
                }
            }
            token.cancelled().await;
        });

        Ok(receiver)
    }

    async fn stop_scan(&self) -> Result<(), InteractionError> {
        if let Some(token) = take(&self.scan_token) {
            token.cancel();
        }
        Ok(())
    }

    async fn connect_direct(&self, address: &str) -> Result<(), InteractionError> {
        StatsCell::bump(&self.stats.direct_connects);
        self.known_address(address)?;
        let behaviour = get(&self.direct_connect);
        self.schedule_link(behaviour, address, "connect_direct")
    }

    async fn connect_via_scan(&self, address: &str) -> Result<(), InteractionError> {
        StatsCell::bump(&self.stats.scan_connects);
        self.known_address(address)?;
        let behaviour = get(&self.scan_connect);
        self.schedule_link(behaviour, address, "connect_via_scan")
    }

    async fn disconnect(&self) -> Result<(), InteractionError> {
        StatsCell::bump(&self.stats.disconnects);
        self.link.sever();
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.link.connected.load(Ordering::Acquire)
    }

    async fn send_command(
        &self,
        request: VendorRequest,
        slot: ResponseSlot,
    ) -> Result<(), InteractionError> {
        if !self.link.connected.load(Ordering::Acquire) {
            return Err(InteractionError::NotConnected);
        }

        let script = self.script_for(request);
        if script == ResponseScript::RejectSend {
            return Err(InteractionError::Scripted {
                operation: "send_command",
            });
        }

        StatsCell::bump(&self.stats.commands_sent);
        self.track_concurrency(&slot);

        if let ResponseScript::Respond { after, response } = script {
            let stats = Arc::clone(&self.stats);
            tokio::spawn(async move {
                sleep(after).await;
                if !slot.try_resolve(response) {
                    StatsCell::bump(&stats.late_responses_ignored);
                }
            });
        }

        Ok(())
    }

    fn link_events(&self) -> broadcast::Receiver<LinkEvent> {
        self.link.events.subscribe()
    }
}

/// Deterministic day of readings returned when no script is configured.
fn sample_response(request: VendorRequest) -> VendorResponse {
    let VendorRequest::DailyHistory { metric, .. } = request else {
        return VendorResponse::success(VendorPayload::Battery { level: 87 });
    };

    let payload = match metric {
        MetricKind::HeartRate => VendorPayload::HeartRate {
            date: None,
            interval_minutes: 60,
            values: vec![58, 0, 61, 64, 72, 0, 88, 76],
        },
        MetricKind::SpO2 => VendorPayload::SpO2 {
            unix_timestamp: None,
            date: None,
            readings: vec![
                HourlyReading { hour: 0, value: 97 },
                HourlyReading { hour: 1, value: 0 },
                HourlyReading { hour: 2, value: 99 },
            ],
        },
        MetricKind::Hrv => VendorPayload::Hrv {
            unix_timestamp: None,
            interval_minutes: 30,
            values: vec![42, 48, 0, 51],
        },
        MetricKind::BloodPressure => VendorPayload::BloodPressure {
            date: None,
            readings: vec![
                PressureReading {
                    minute_of_day: 480,
                    systolic: 118,
                    diastolic: 76,
                },
                PressureReading {
                    minute_of_day: 1_200,
                    systolic: 124,
                    diastolic: 81,
                },
            ],
        },
        MetricKind::Temperature => VendorPayload::Temperature {
            unix_timestamp: None,
            readings: vec![
                MinuteReading {
                    minute_of_day: 60,
                    value: 364,
                },
                MinuteReading {
                    minute_of_day: 120,
                    value: 0,
                },
                MinuteReading {
                    minute_of_day: 180,
                    value: 368,
                },
            ],
        },
        MetricKind::Stress => VendorPayload::Stress {
            date: None,
            readings: vec![
                HourlyReading { hour: 9, value: 35 },
                HourlyReading { hour: 13, value: 61 },
                HourlyReading {
                    hour: 17,
                    value: 255,
                },
            ],
        },
        MetricKind::Steps => VendorPayload::Steps {
            date: None,
            slots: vec![
                ActivitySlot {
                    slot: 32,
                    steps: 1_200,
                    distance_m: 900,
                    calories: 48,
                },
                ActivitySlot {
                    slot: 33,
                    steps: 0,
                    distance_m: 0,
                    calories: 0,
                },
                ActivitySlot {
                    slot: 70,
                    steps: 2_450,
                    distance_m: 1_830,
                    calories: 97,
                },
            ],
        },
    };

    VendorResponse::success(payload)
}

fn parse_scan_fixture(raw_fixture: &str) -> Result<Vec<DeviceIdentity>, FixtureError> {
    if raw_fixture.trim().is_empty() {
        return Err(FixtureError::EmptyFixture);
    }

    raw_fixture
        .split(';')
        .map(parse_scan_record)
        .collect::<Result<Vec<_>, _>>()
}

fn parse_scan_record(raw_record: &str) -> Result<DeviceIdentity, FixtureError> {
    let fields: Vec<&str> = raw_record.split('|').map(str::trim).collect();
    if fields.len() != 3 {
        return Err(FixtureError::InvalidRecordFieldCount);
    }
    if fields.iter().any(|field| field.is_empty()) {
        return Err(FixtureError::EmptyRecordField);
    }

    let rssi = if fields[2] == "-" {
        None
    } else {
        Some(fields[2].parse::<i16>()?)
    };

    Ok(DeviceIdentity::new(fields[1], fields[0], rssi))
}

fn lock<T>(cell: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match cell.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn get<T: Copy>(cell: &Mutex<T>) -> T {
    *lock(cell)
}

fn set<T>(cell: &Mutex<T>, value: T) {
    *lock(cell) = value;
}

fn take<T>(cell: &Mutex<Option<T>>) -> Option<T> {
    lock(cell).take()
}

fn replace<T>(cell: &Mutex<Option<T>>, value: Option<T>) -> Option<T> {
    std::mem::replace(&mut *lock(cell), value)
}
