use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use super::model::{LinkEvent, ScanEvent, ScanFilter};
use crate::error::InteractionError;
use crate::gate::ResponseSlot;
use crate::protocol::VendorRequest;

/// Capabilities the orchestration layer needs from the radio stack.
///
/// Only [`crate::ConnectionManager`] connects or disconnects, and only
/// [`crate::CommandGate`] sends commands.
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Verifies that the process may use Bluetooth at all.
    async fn check_permissions(&self) -> Result<(), InteractionError>;

    /// Starts scanning and returns a channel of scan events.
    ///
    /// The channel closes when the scan stops.
    async fn scan(&self, filter: &ScanFilter)
    -> Result<mpsc::Receiver<ScanEvent>, InteractionError>;

    /// Stops any active scan.
    async fn stop_scan(&self) -> Result<(), InteractionError>;

    /// Connects to a cached address without scanning.
    async fn connect_direct(&self, address: &str) -> Result<(), InteractionError>;

    /// Scans until `address` is seen, then connects to it.
    async fn connect_via_scan(&self, address: &str) -> Result<(), InteractionError>;

    /// Tears down the current link, if any.
    async fn disconnect(&self) -> Result<(), InteractionError>;

    /// Returns whether the radio stack reports an established link.
    async fn is_connected(&self) -> bool;

    /// Sends one command. The transport resolves `slot` when the matching
    /// response arrives.
    async fn send_command(
        &self,
        request: VendorRequest,
        slot: ResponseSlot,
    ) -> Result<(), InteractionError>;

    /// Subscribes to link-state notifications.
    fn link_events(&self) -> broadcast::Receiver<LinkEvent>;
}
