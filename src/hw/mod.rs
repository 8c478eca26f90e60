mod btleplug_backend;
mod fake_backend;
mod model;
mod transport;

pub use self::btleplug_backend::BtleplugTransport;
pub use self::fake_backend::{
    ConnectBehaviour, FakeTransport, FakeTransportConfig, FakeTransportStats, ResponseScript,
    ScanFixture,
};
pub use self::model::{DeviceIdentity, LinkEvent, ScanEvent, ScanFilter};
pub use self::transport::Transport;
