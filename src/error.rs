use thiserror::Error;

/// Errors returned by the transport port.
#[derive(Debug, Error)]
pub enum InteractionError {
    #[error("BLE operation failed")]
    Ble(#[source] btleplug::Error),
    #[error("Bluetooth permission was denied")]
    PermissionDenied,
    #[error("no BLE adapters were found")]
    NoAdapters,
    #[error("no device with address `{address}` is known to the adapter")]
    DeviceNotFound { address: String },
    #[error("the transport is not connected")]
    NotConnected,
    #[error("scan failed with code {code}")]
    ScanFailed { code: i32 },
    #[error("no vendor codec is installed; commands cannot be framed")]
    NoVendorCodec,
    #[error("required characteristic `{uuid}` was not found on the connected device")]
    MissingEndpoint { uuid: String },
    #[error("the fake transport was scripted to fail `{operation}`")]
    Scripted { operation: &'static str },
    #[error(transparent)]
    Fixture(#[from] FixtureError),
}

impl From<btleplug::Error> for InteractionError {
    fn from(error: btleplug::Error) -> Self {
        match error {
            btleplug::Error::PermissionDenied => Self::PermissionDenied,
            other => Self::Ble(other),
        }
    }
}

/// Errors returned by [`crate::CommandGate::execute`].
#[derive(Debug, Error)]
pub enum GateError {
    #[error("no response arrived before the command timed out")]
    Timeout,
    #[error("the command was cancelled by the caller")]
    Cancelled,
    #[error("the device is not connected")]
    NotConnected,
    #[error("the transport rejected the command")]
    Transport(#[source] InteractionError),
    #[error("the device answered with an unexpected response")]
    UnexpectedResponse,
}

/// Errors surfaced by the connection state machine.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("Bluetooth permission was denied")]
    PermissionDenied,
    #[error("transport error")]
    Transport(#[source] InteractionError),
    #[error("timed out waiting for the link")]
    Timeout,
    #[error("the device is not connected")]
    NotConnected,
    #[error("the operation was cancelled")]
    Cancelled,
}

impl From<InteractionError> for LinkError {
    fn from(error: InteractionError) -> Self {
        match error {
            InteractionError::PermissionDenied => Self::PermissionDenied,
            InteractionError::NotConnected => Self::NotConnected,
            other => Self::Transport(other),
        }
    }
}

/// Errors returned by device-record stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed while reading or writing the device record at `{path}`")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("the device record at `{path}` is not valid JSON")]
    InvalidRecord {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors returned when parsing fake transport fixtures.
#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("the fake discovery fixture is empty")]
    EmptyFixture,
    #[error("fixture records must contain three pipe-delimited fields")]
    InvalidRecordFieldCount,
    #[error("fixture records cannot contain empty mandatory fields")]
    EmptyRecordField,
    #[error("failed to parse RSSI value")]
    InvalidRssi(#[from] std::num::ParseIntError),
}

/// Errors returned when validating runtime backend options.
#[derive(Debug, Error)]
pub(crate) enum CliConfigError {
    #[error("missing fake scan fixture while fake mode is enabled")]
    MissingFakeScanFixture,
    #[error("no device address was given and no device has been saved yet")]
    NoSavedDevice,
    #[error("the device did not connect within {waited}")]
    ConnectTimedOut { waited: String },
    #[error("every connection strategy failed for `{address}`")]
    ConnectFailed { address: String },
}

/// Errors returned by telemetry initialisation.
#[derive(Debug, Error)]
pub(crate) enum TelemetryError {
    #[error("failed to install tracing subscriber")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
}
