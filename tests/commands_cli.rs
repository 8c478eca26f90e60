use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use clap::error::ErrorKind;
use pretty_assertions::assert_eq;
use serde_json::Value;

const FIXTURE: &str = "AA:BB:CC:DD:EE:01|R02_A1B2|-43;AA:BB:CC:DD:EE:02|Band_7F|-";

#[derive(Debug, Default)]
struct FakeTerminalClient;

impl wearlink::TerminalClient for FakeTerminalClient {
    fn stdout_is_terminal(&self) -> bool {
        false
    }

    fn stderr_is_terminal(&self) -> bool {
        false
    }
}

fn scratch_store(test_name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "wearlink-cli-{}-{test_name}",
        std::process::id()
    ));
    let _ = std::fs::remove_dir_all(&dir);
    dir.join("last-device.json")
}

async fn run_with_parsed_args(
    args: wearlink::Args,
    output_format: wearlink::OutputFormat,
) -> anyhow::Result<String> {
    let mut output = Vec::new();
    let store_path = args.store_path();
    let (command, maybe_fake_args) = args.into_command_and_fake_args()?;
    let options = wearlink::RunOptions::builder()
        .output_format(output_format)
        .maybe_store_path(store_path)
        .build();
    wearlink::run_with_clients(
        command,
        &mut output,
        &FakeTerminalClient,
        maybe_fake_args.into(),
        options,
    )
    .await?;
    Ok(String::from_utf8(output)?)
}

async fn run_json(args: wearlink::Args) -> anyhow::Result<Value> {
    let stdout = run_with_parsed_args(args, wearlink::OutputFormat::Json).await?;
    Ok(serde_json::from_str(&stdout)?)
}

fn fake() -> anyhow::Result<wearlink::FakeArgs> {
    Ok(wearlink::FakeArgs::builder().scan_fixture(FIXTURE)?.build())
}

#[tokio::test(start_paused = true)]
async fn status_without_a_saved_device_reports_nothing() -> anyhow::Result<()> {
    let args = wearlink::Args::new(wearlink::Command::Status).with_store(scratch_store("status"));

    let report = run_json(args).await?;

    assert_eq!(Value::Null, report["saved_device"]);
    assert_eq!(Value::Bool(false), report["would_auto_connect"]);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn forget_without_a_saved_device_prints_a_notice() -> anyhow::Result<()> {
    let args = wearlink::Args::new(wearlink::Command::Forget).with_store(scratch_store("forget"));

    let stdout = run_with_parsed_args(args, wearlink::OutputFormat::Pretty).await?;

    assert_eq!("No saved device.", stdout.trim_end());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn scan_lists_fixture_devices() -> anyhow::Result<()> {
    let args = wearlink::Args::new(wearlink::Command::Scan(wearlink::ScanArgs::new(
        Duration::from_secs(2),
    )))
    .with_fake(fake()?)
    .with_store(scratch_store("scan"));

    let devices = run_json(args).await?;

    let addresses: Vec<&str> = devices
        .as_array()
        .expect("scan output should be a list")
        .iter()
        .filter_map(|device| device["address"].as_str())
        .collect();
    assert_eq!(vec!["AA:BB:CC:DD:EE:01", "AA:BB:CC:DD:EE:02"], addresses);
    assert_eq!(Value::Null, devices[1]["signal_strength"]);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn scan_pretty_output_filters_by_name_prefix() -> anyhow::Result<()> {
    let store = scratch_store("scan-pretty");
    let stdout = run_with_parsed_args(
        wearlink::Args::try_parse_from([
            "wearlink",
            "--fake",
            "--fake-scan",
            FIXTURE,
            "--store",
            store.to_str().expect("temp path should be UTF-8"),
            "scan",
            "--duration",
            "1s",
            "--name-prefix",
            "Band",
        ])?,
        wearlink::OutputFormat::Pretty,
    )
    .await?;

    assert!(stdout.contains("AA:BB:CC:DD:EE:02"), "{stdout}");
    assert!(stdout.contains("Band_7F"), "{stdout}");
    assert!(!stdout.contains("R02_A1B2"), "{stdout}");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn sync_without_a_saved_device_fails() -> anyhow::Result<()> {
    let args = wearlink::Args::new(wearlink::Command::Sync(wearlink::SyncArgs::new(
        wearlink::SyncTarget::Metric(wearlink::MetricKind::SpO2),
    )))
    .with_fake(fake()?)
    .with_store(scratch_store("sync-no-device"));

    let error = run_with_parsed_args(args, wearlink::OutputFormat::Json)
        .await
        .expect_err("sync without a device should fail");

    assert!(
        error.to_string().contains("no device has been saved"),
        "{error:#}"
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn sync_one_metric_from_an_explicit_address() -> anyhow::Result<()> {
    let args = wearlink::Args::new(wearlink::Command::Sync(
        wearlink::SyncArgs::new(wearlink::SyncTarget::Metric(wearlink::MetricKind::SpO2))
            .with_address("AA:BB:CC:DD:EE:01"),
    ))
    .with_fake(fake()?)
    .with_store(scratch_store("sync-spo2"));

    let series = run_json(args).await?;

    assert_eq!(2, series["entries"].as_array().map_or(0, Vec::len));
    assert_eq!(Value::from(98), series["average"]);
    assert_eq!(Value::from(97), series["min"]);
    assert_eq!(Value::from(99), series["max"]);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn sync_against_an_unresponsive_device_prints_placeholders() -> anyhow::Result<()> {
    let fake = wearlink::FakeArgs::builder()
        .scan_fixture(FIXTURE)?
        .unresponsive(true)
        .build();
    let args = wearlink::Args::new(wearlink::Command::Sync(
        wearlink::SyncArgs::new(wearlink::SyncTarget::Metric(wearlink::MetricKind::Steps))
            .with_address("AA:BB:CC:DD:EE:01"),
    ))
    .with_fake(fake)
    .with_store(scratch_store("sync-silent"));

    let stdout = run_with_parsed_args(args, wearlink::OutputFormat::Pretty).await?;

    assert!(stdout.contains("No readings for this day."), "{stdout}");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn connect_saves_the_device_for_status() -> anyhow::Result<()> {
    let store = scratch_store("connect");
    let connect = wearlink::Args::new(wearlink::Command::Connect(
        wearlink::ConnectArgs::new("AA:BB:CC:DD:EE:01").with_run_for(Duration::from_secs(5)),
    ))
    .with_fake(fake()?)
    .with_store(store.clone());

    let stdout = run_with_parsed_args(connect, wearlink::OutputFormat::Json).await?;
    let states: Vec<String> = stdout
        .lines()
        .map(serde_json::from_str::<Value>)
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .filter_map(|line| line["state"].as_str().map(str::to_string))
        .collect();
    assert_eq!(vec!["connecting", "connected", "disconnected"], states);

    let report = run_json(wearlink::Args::new(wearlink::Command::Status).with_store(store)).await?;
    assert_eq!(
        Value::from("AA:BB:CC:DD:EE:01"),
        report["saved_device"]["address"]
    );
    assert_eq!(Value::Bool(true), report["would_auto_connect"]);
    Ok(())
}

#[test]
fn fixture_records_need_three_fields() {
    let result = wearlink::FakeArgs::builder().scan_fixture("invalid-record");
    assert!(matches!(
        result,
        Err(wearlink::FixtureError::InvalidRecordFieldCount)
    ));
}

#[test]
fn sync_rejects_an_unknown_metric() {
    let result = wearlink::Args::try_parse_from(["wearlink", "sync", "glucose"]);

    let error = result.expect_err("unknown metric should fail argument parsing");
    assert_eq!(ErrorKind::ValueValidation, error.kind());
}
