pub(crate) mod command;
pub(crate) mod connect;
pub(crate) mod forget;
pub(crate) mod scan;
pub(crate) mod status;
pub(crate) mod sync;
pub(crate) mod ui;

pub use self::command::{
    Args, Command, ConnectArgs, FakeArgs, LogLevel, OutputFormat, ScanArgs, SyncArgs, SyncTarget,
};
