mod cascade;
mod config;
mod manager;
mod state;

pub use self::config::LinkConfig;
pub use self::manager::{ConnectionManager, ScanStream, StateStream};
pub use self::state::ConnectionState;
