use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use wearlink::{
    CommandGate, DeviceIdentity, FakeTransport, FakeTransportConfig, GateError, ResponseScript,
    Transport, VendorPayload, VendorRequest, VendorResponse,
};

const ADDRESS: &str = "AA:BB:CC:DD:EE:01";

fn ring() -> DeviceIdentity {
    DeviceIdentity::new("R02_A1B2", ADDRESS, Some(-52))
}

async fn connected(config: FakeTransportConfig) -> Arc<FakeTransport> {
    let transport = Arc::new(FakeTransport::new(config));
    transport
        .connect_direct(ADDRESS)
        .await
        .expect("fixture device should accept a direct connect");
    sleep(Duration::from_secs(1)).await;
    assert!(transport.is_connected().await);
    transport
}

fn battery_level(response: VendorResponse) -> Option<u8> {
    match response.payload {
        VendorPayload::Battery { level } => Some(level),
        _ => None,
    }
}

#[tokio::test(start_paused = true)]
async fn concurrent_callers_never_overlap_on_the_transport() {
    let transport = connected(FakeTransportConfig::builder().devices(vec![ring()]).build()).await;
    let gate = Arc::new(CommandGate::new(transport.clone()));

    let mut callers = Vec::new();
    for _ in 0..4 {
        let gate = Arc::clone(&gate);
        callers.push(tokio::spawn(async move {
            gate.execute(
                VendorRequest::ReadBattery,
                battery_level,
                Duration::from_secs(3),
                &CancellationToken::new(),
            )
            .await
        }));
    }
    for caller in callers {
        let level = caller.await.expect("caller task should not panic");
        assert_matches!(level, Ok(Some(87)));
    }

    let stats = transport.stats();
    assert_eq!(4, stats.commands_sent);
    assert_eq!(1, stats.max_concurrent_commands);
    assert_eq!(4, gate.commands_dispatched());
    assert!(!gate.in_flight());
}

#[tokio::test(start_paused = true)]
async fn late_response_after_timeout_is_ignored() {
    let late = ResponseScript::Respond {
        after: Duration::from_millis(1500),
        response: VendorResponse::success(VendorPayload::Battery { level: 50 }),
    };
    let transport = connected(
        FakeTransportConfig::builder()
            .devices(vec![ring()])
            .responses(vec![(VendorRequest::ReadBattery, late)])
            .build(),
    )
    .await;
    let gate = CommandGate::new(transport.clone());
    let started = Instant::now();

    let result = gate
        .execute(
            VendorRequest::ReadBattery,
            battery_level,
            Duration::from_millis(1000),
            &CancellationToken::new(),
        )
        .await;
    assert_matches!(result, Err(GateError::Timeout));
    assert_eq!(Duration::from_millis(1000), started.elapsed());

    sleep(Duration::from_secs(1)).await;
    assert_eq!(1, transport.stats().late_responses_ignored);
    assert!(!gate.in_flight());
}

#[tokio::test(start_paused = true)]
async fn cancelling_the_token_fails_the_pending_command() {
    let transport = connected(
        FakeTransportConfig::builder()
            .devices(vec![ring()])
            .default_script(ResponseScript::Silent)
            .build(),
    )
    .await;
    let gate = Arc::new(CommandGate::new(transport.clone()));
    let cancel = CancellationToken::new();

    let pending = {
        let gate = Arc::clone(&gate);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            gate.execute(
                VendorRequest::ReadBattery,
                battery_level,
                Duration::from_secs(30),
                &cancel,
            )
            .await
        })
    };
    sleep(Duration::from_millis(100)).await;
    assert!(gate.in_flight());
    cancel.cancel();

    let result = pending.await.expect("caller task should not panic");
    assert_matches!(result, Err(GateError::Cancelled));
}

#[tokio::test(start_paused = true)]
async fn link_loss_fails_the_pending_command_with_not_connected() {
    let transport = connected(
        FakeTransportConfig::builder()
            .devices(vec![ring()])
            .default_script(ResponseScript::Silent)
            .build(),
    )
    .await;
    let gate = Arc::new(CommandGate::new(transport.clone()));

    let pending = {
        let gate = Arc::clone(&gate);
        tokio::spawn(async move {
            gate.execute(
                VendorRequest::ReadBattery,
                battery_level,
                Duration::from_secs(30),
                &CancellationToken::new(),
            )
            .await
        })
    };
    sleep(Duration::from_millis(100)).await;
    transport.drop_link();

    let result = pending.await.expect("caller task should not panic");
    assert_matches!(result, Err(GateError::NotConnected));
}

#[tokio::test(start_paused = true)]
async fn disconnected_link_fails_fast_without_sending() {
    let transport = Arc::new(FakeTransport::with_devices(vec![ring()]));
    let gate = CommandGate::new(transport.clone());

    let result = gate
        .execute(
            VendorRequest::ReadBattery,
            battery_level,
            Duration::from_secs(3),
            &CancellationToken::new(),
        )
        .await;

    assert_matches!(result, Err(GateError::NotConnected));
    assert_eq!(0, transport.stats().commands_sent);
}

#[tokio::test(start_paused = true)]
async fn rejected_write_surfaces_transport_error() {
    let transport = connected(
        FakeTransportConfig::builder()
            .devices(vec![ring()])
            .default_script(ResponseScript::RejectSend)
            .build(),
    )
    .await;
    let gate = CommandGate::new(transport.clone());

    let result = gate
        .execute(
            VendorRequest::ReadBattery,
            battery_level,
            Duration::from_secs(3),
            &CancellationToken::new(),
        )
        .await;

    assert_matches!(result, Err(GateError::Transport(_)));
    assert!(!gate.in_flight());
}
