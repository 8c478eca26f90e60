mod app;
mod cli;
mod error;
mod gate;
mod handlers;
mod hw;
mod link;
mod protocol;
mod store;
mod supervisor;
mod telemetry;
mod terminal;
mod utils;

pub use app::{Backend, LinkStack, RunOptions, run, run_with_clients, run_with_options};
pub use cli::{
    Args, Command, ConnectArgs, FakeArgs, LogLevel, OutputFormat, ScanArgs, SyncArgs, SyncTarget,
};
pub use error::{FixtureError, GateError, InteractionError, LinkError, StoreError};
pub use gate::{CommandGate, ResponseSlot};
pub use handlers::{
    BloodPressure, DailySnapshot, Entry, HeartRateData, HrvData, MetricSeries, MetricStats,
    MetricValue, PressureData, SpO2Data, StepData, StressData, SyncConfig, SyncHandler,
    TemperatureData,
};
pub use hw::{
    BtleplugTransport, ConnectBehaviour, DeviceIdentity, FakeTransport, FakeTransportConfig,
    FakeTransportStats, LinkEvent, ResponseScript, ScanEvent, ScanFilter, ScanFixture, Transport,
};
pub use link::{ConnectionManager, ConnectionState, LinkConfig, ScanStream, StateStream};
pub use protocol::{
    ActivitySlot, HourlyReading, MetricKind, MinuteReading, PressureReading, ResponseStatus,
    VendorCodec, VendorPayload, VendorRequest, VendorResponse,
};
pub use store::{DeviceStore, JsonFileStore, MemoryStore, SavedDeviceRecord};
pub use supervisor::{
    KeepAlive, ReconnectSupervisor, SupervisorConfig, SupervisorStatus, TracingKeepAlive,
};
pub use terminal::TerminalClient;
