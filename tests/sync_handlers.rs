use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use time::OffsetDateTime;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use wearlink::{
    BloodPressure, CommandGate, DeviceIdentity, FakeTransport, FakeTransportConfig, GateError,
    MetricKind, ResponseScript, SyncConfig, SyncHandler, Transport, VendorPayload,
    VendorRequest, VendorResponse,
};

const ADDRESS: &str = "AA:BB:CC:DD:EE:01";

fn history(metric: MetricKind, day_offset: u32) -> VendorRequest {
    VendorRequest::DailyHistory { metric, day_offset }
}

async fn handler_over(config: FakeTransportConfig) -> (Arc<FakeTransport>, SyncHandler) {
    let transport = Arc::new(FakeTransport::new(config));
    transport
        .connect_direct(ADDRESS)
        .await
        .expect("fixture device should accept a direct connect");
    sleep(Duration::from_secs(1)).await;
    let gate = Arc::new(CommandGate::new(transport.clone()));
    (transport, SyncHandler::new(gate, SyncConfig::default()))
}

fn devices() -> FakeTransportConfig {
    FakeTransportConfig::builder()
        .devices(vec![DeviceIdentity::new("R02_A1B2", ADDRESS, None)])
        .build()
}

#[tokio::test(start_paused = true)]
async fn spo2_drops_invalid_readings_and_summarises_the_rest() {
    let (_transport, sync) = handler_over(devices()).await;

    let spo2 = sync.sync_spo2(0).await;

    assert_eq!(2, spo2.entries().len());
    assert_eq!((98, 97, 99), (spo2.average(), spo2.min(), spo2.max()));
    assert!(
        spo2.entries()
            .windows(2)
            .all(|pair| pair[0].timestamp <= pair[1].timestamp)
    );
}

#[tokio::test(start_paused = true)]
async fn every_metric_normalises_the_sample_day() {
    let (transport, sync) = handler_over(devices()).await;

    let snapshot = sync.sync_all(1).await;

    assert_eq!(6, snapshot.heart_rate.entries().len());
    assert_eq!(
        (69, 58, 88),
        (
            snapshot.heart_rate.average(),
            snapshot.heart_rate.min(),
            snapshot.heart_rate.max()
        )
    );
    assert_eq!(47, snapshot.hrv.average());
    assert_eq!(
        BloodPressure {
            systolic: 121,
            diastolic: 78
        },
        snapshot.blood_pressure.average()
    );
    assert!((snapshot.temperature.average() - 36.6).abs() < 0.01);
    assert_eq!(2, snapshot.stress.entries().len());
    assert_eq!(3_650, snapshot.steps.total_steps());
    assert_eq!(2_730, snapshot.steps.total_distance_m());
    assert_eq!(145, snapshot.steps.total_calories());
    assert_eq!(7, transport.stats().commands_sent);
    assert_eq!(1, transport.stats().max_concurrent_commands);

    let yesterday = OffsetDateTime::now_utc().date().previous_day();
    assert_eq!(yesterday, Some(snapshot.spo2.date()));
}

#[tokio::test(start_paused = true)]
async fn device_failure_yields_a_placeholder_for_the_requested_day() {
    let (_transport, sync) = handler_over(
        FakeTransportConfig::builder()
            .devices(vec![DeviceIdentity::new("R02_A1B2", ADDRESS, None)])
            .responses(vec![(
                history(MetricKind::HeartRate, 2),
                ResponseScript::Respond {
                    after: Duration::from_millis(20),
                    response: VendorResponse::failure(3),
                },
            )])
            .build(),
    )
    .await;

    let heart_rate = sync.sync_heart_rate(2).await;

    assert!(heart_rate.is_placeholder());
    assert_eq!((0, 0, 0), (heart_rate.average(), heart_rate.min(), heart_rate.max()));
    let expected_day = OffsetDateTime::now_utc()
        .date()
        .previous_day()
        .and_then(|day| day.previous_day());
    assert_eq!(expected_day, Some(heart_rate.date()));
}

#[tokio::test(start_paused = true)]
async fn silent_device_times_out_into_a_placeholder() {
    let (_transport, sync) = handler_over(
        FakeTransportConfig::builder()
            .devices(vec![DeviceIdentity::new("R02_A1B2", ADDRESS, None)])
            .default_script(ResponseScript::Silent)
            .build(),
    )
    .await;
    let started = Instant::now();

    let steps = sync.sync_steps(0).await;

    assert!(steps.series().is_placeholder());
    assert_eq!(0, steps.total_steps());
    assert!(started.elapsed() >= SyncConfig::default().steps_timeout);
}

#[tokio::test(start_paused = true)]
async fn mismatched_payload_yields_a_placeholder() {
    let (_transport, sync) = handler_over(
        FakeTransportConfig::builder()
            .devices(vec![DeviceIdentity::new("R02_A1B2", ADDRESS, None)])
            .responses(vec![(
                history(MetricKind::Stress, 0),
                ResponseScript::Respond {
                    after: Duration::from_millis(20),
                    response: VendorResponse::success(VendorPayload::Battery { level: 40 }),
                },
            )])
            .build(),
    )
    .await;

    assert!(sync.sync_stress(0).await.is_placeholder());
}

#[tokio::test(start_paused = true)]
async fn disconnected_sync_yields_a_placeholder_without_sending() {
    let transport = Arc::new(FakeTransport::new(devices()));
    let gate = Arc::new(CommandGate::new(transport.clone()));
    let sync = SyncHandler::new(gate, SyncConfig::default());

    assert!(sync.sync_temperature(0).await.is_placeholder());
    assert_eq!(0, transport.stats().commands_sent);
}

#[tokio::test(start_paused = true)]
async fn cancelled_handler_stops_issuing_commands() {
    let (transport, sync) = handler_over(devices()).await;
    let cancel = CancellationToken::new();
    let sync = sync.with_cancellation(cancel.clone());
    cancel.cancel();

    assert!(sync.sync_hrv(0).await.is_placeholder());
    assert_matches!(sync.read_battery().await, Err(GateError::Cancelled));
    assert_eq!(0, transport.stats().commands_sent);
}

#[tokio::test(start_paused = true)]
async fn battery_read_returns_the_level() {
    let (_transport, sync) = handler_over(devices()).await;

    assert_matches!(sync.read_battery().await, Ok(87));
}

#[tokio::test(start_paused = true)]
async fn battery_read_rejects_an_unrelated_payload() {
    let (_transport, sync) = handler_over(
        FakeTransportConfig::builder()
            .devices(vec![DeviceIdentity::new("R02_A1B2", ADDRESS, None)])
            .responses(vec![(
                VendorRequest::ReadBattery,
                ResponseScript::Respond {
                    after: Duration::from_millis(20),
                    response: VendorResponse::success(VendorPayload::Empty),
                },
            )])
            .build(),
    )
    .await;

    assert_matches!(
        sync.read_battery().await,
        Err(GateError::UnexpectedResponse)
    );
}
