use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, PeripheralProperties,
    ScanFilter as BleScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::time::{Instant, sleep};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use super::model::{DeviceIdentity, LinkEvent, ScanEvent, ScanFilter};
use super::transport::Transport;
use crate::error::InteractionError;
use crate::gate::ResponseSlot;
use crate::protocol::{VendorCodec, VendorRequest};

const LINK_EVENT_CAPACITY: usize = 32;
const SCAN_EVENT_CAPACITY: usize = 64;
const PERIPHERAL_POLL_INTERVAL: Duration = Duration::from_millis(250);
const DEFAULT_SCAN_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Diagnostic codes reported through [`ScanEvent::Failed`].
const SCAN_ERROR_PERMISSION: i32 = 1;
const SCAN_ERROR_ADAPTER: i32 = 2;
const SCAN_ERROR_STREAM_CLOSED: i32 = 3;

/// Transport backed by `btleplug` on the first local adapter.
#[derive(Debug)]
pub struct BtleplugTransport {
    adapter: Adapter,
    codec: Option<Arc<dyn VendorCodec>>,
    scan_connect_timeout: Duration,
    link: Arc<Mutex<Option<ActiveLink>>>,
    connected: Arc<AtomicBool>,
    pending: Arc<StdMutex<Option<ResponseSlot>>>,
    events: broadcast::Sender<LinkEvent>,
    scan_token: StdMutex<Option<CancellationToken>>,
    shutdown: CancellationToken,
}

#[derive(Debug)]
struct ActiveLink {
    peripheral: Peripheral,
    address: String,
    command: Option<Characteristic>,
    pump: CancellationToken,
}

impl BtleplugTransport {
    /// Opens the first BLE adapter and starts watching its link events.
    ///
    /// Without a codec the transport can scan and hold a link but rejects
    /// every command with [`InteractionError::NoVendorCodec`].
    ///
    /// # Errors
    ///
    /// Returns an error when no adapter is available or the adapter event
    /// stream cannot be opened.
    pub async fn new(codec: Option<Arc<dyn VendorCodec>>) -> Result<Self, InteractionError> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(InteractionError::NoAdapters)?;
        let adapter_name = adapter.adapter_info().await?;
        info!(adapter = %adapter_name, "opened BLE adapter");

        let (events, _) = broadcast::channel(LINK_EVENT_CAPACITY);
        let transport = Self {
            adapter,
            codec,
            scan_connect_timeout: DEFAULT_SCAN_CONNECT_TIMEOUT,
            link: Arc::new(Mutex::new(None)),
            connected: Arc::new(AtomicBool::new(false)),
            pending: Arc::new(StdMutex::new(None)),
            events,
            scan_token: StdMutex::new(None),
            shutdown: CancellationToken::new(),
        };
        transport.watch_disconnects().await?;
        Ok(transport)
    }

    /// Overrides how long `connect_via_scan` waits for the address to appear.
    #[must_use]
    pub fn with_scan_connect_timeout(mut self, timeout: Duration) -> Self {
        self.scan_connect_timeout = timeout;
        self
    }

    async fn watch_disconnects(&self) -> Result<(), InteractionError> {
        let mut central_events = self.adapter.events().await?;
        let link = Arc::clone(&self.link);
        let connected = Arc::clone(&self.connected);
        let pending = Arc::clone(&self.pending);
        let events = self.events.clone();
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    () = shutdown.cancelled() => break,
                    event = central_events.next() => event,
                };
                let Some(CentralEvent::DeviceDisconnected(id)) = event else {
                    if event.is_none() {
                        break;
                    }
                    continue;
                };

                let mut guard = link.lock().await;
                let is_active = guard
                    .as_ref()
                    .is_some_and(|active| active.peripheral.id() == id);
                if !is_active {
                    continue;
                }
                if let Some(active) = guard.take() {
                    active.pump.cancel();
                    connected.store(false, Ordering::Release);
                    drop(take_slot(&pending));
                    info!(address = %active.address, "link lost");
                    let _ = events.send(LinkEvent::Disconnected {
                        address: active.address,
                    });
                }
            }
            trace!("adapter event stream ended");
        });

        Ok(())
    }

    async fn find_peripheral(&self, address: &str) -> Result<Option<Peripheral>, InteractionError> {
        for peripheral in self.adapter.peripherals().await? {
            if peripheral
                .address()
                .to_string()
                .eq_ignore_ascii_case(address)
            {
                return Ok(Some(peripheral));
            }
        }
        Ok(None)
    }

    #[instrument(skip(self, peripheral), level = "debug", fields(%address))]
    async fn establish(&self, peripheral: Peripheral, address: &str) -> Result<(), InteractionError> {
        if !peripheral.is_connected().await? {
            peripheral.connect().await?;
        }
        peripheral.discover_services().await?;

        let pump = CancellationToken::new();
        let command = match &self.codec {
            Some(codec) => Some(self.start_response_pump(&peripheral, codec, pump.clone()).await?),
            None => None,
        };

        let mut guard = self.link.lock().await;
        if let Some(previous) = guard.replace(ActiveLink {
            peripheral,
            address: address.to_string(),
            command,
            pump,
        }) {
            previous.pump.cancel();
        }
        drop(guard);

        self.connected.store(true, Ordering::Release);
        info!(%address, "link established");
        let _ = self.events.send(LinkEvent::Connected {
            address: address.to_string(),
        });
        Ok(())
    }

    async fn start_response_pump(
        &self,
        peripheral: &Peripheral,
        codec: &Arc<dyn VendorCodec>,
        pump: CancellationToken,
    ) -> Result<Characteristic, InteractionError> {
        let characteristics = peripheral.characteristics();
        let command = find_characteristic(&characteristics, codec.command_characteristic())?;
        let notify = find_characteristic(&characteristics, codec.notify_characteristic())?;

        let mut notifications = peripheral.notifications().await?;
        peripheral.subscribe(&notify).await?;

        let codec = Arc::clone(codec);
        let pending = Arc::clone(&self.pending);
        let notify_uuid = notify.uuid;
        tokio::spawn(async move {
            loop {
                let notification = tokio::select! {
                    () = pump.cancelled() => break,
                    notification = notifications.next() => notification,
                };
                let Some(notification) = notification else {
                    break;
                };
                if notification.uuid != notify_uuid {
                    continue;
                }
                let Some(response) = codec.decode(&notification.value) else {
                    trace!(len = notification.value.len(), "ignoring unsolicited packet");
                    continue;
                };
                match take_slot(&pending) {
                    Some(slot) => {
                        if !slot.try_resolve(response) {
                            debug!(command_id = slot.id(), "response arrived after slot settled");
                        }
                    }
                    None => debug!("response arrived with no command pending"),
                }
            }
        });

        Ok(command)
    }

    async fn poll_for_address(&self, address: &str) -> Result<Peripheral, InteractionError> {
        let deadline = Instant::now() + self.scan_connect_timeout;
        loop {
            if let Some(peripheral) = self.find_peripheral(address).await? {
                return Ok(peripheral);
            }
            if Instant::now() >= deadline {
                return Err(InteractionError::DeviceNotFound {
                    address: address.to_string(),
                });
            }
            sleep(PERIPHERAL_POLL_INTERVAL).await;
        }
    }
}

impl Drop for BtleplugTransport {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[async_trait]
impl Transport for BtleplugTransport {
    async fn check_permissions(&self) -> Result<(), InteractionError> {
        self.adapter.peripherals().await?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn scan(
        &self,
        filter: &ScanFilter,
    ) -> Result<mpsc::Receiver<ScanEvent>, InteractionError> {
        let mut central_events = self.adapter.events().await?;
        self.adapter.start_scan(BleScanFilter::default()).await?;

        let token = CancellationToken::new();
        if let Some(previous) = replace_token(&self.scan_token, Some(token.clone())) {
            previous.cancel();
        }

        let (sender, receiver) = mpsc::channel(SCAN_EVENT_CAPACITY);
        let adapter = self.adapter.clone();
        let filter = filter.clone();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    () = token.cancelled() => break,
                    event = central_events.next() => event,
                };
                let id = match event {
                    Some(CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id)) => id,
                    Some(_) => continue,
                    None => {
                        let _ = sender
                            .send(ScanEvent::Failed {
                                code: SCAN_ERROR_STREAM_CLOSED,
                            })
                            .await;
                        break;
                    }
                };

                let properties = match adapter.peripheral(&id).await {
                    Ok(peripheral) => peripheral.properties().await,
                    Err(error) => Err(error),
                };
                match properties {
                    Ok(Some(properties)) => {
                        let identity = identity_from_properties(&properties);
                        if filter.accepts(&identity)
                            && sender.send(ScanEvent::Found(identity)).await.is_err()
                        {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(error) => {
                        warn!(%error, "scan aborted by adapter");
                        let _ = sender
                            .send(ScanEvent::Failed {
                                code: scan_failure_code(&error),
                            })
                            .await;
                        break;
                    }
                }
            }
        });

        Ok(receiver)
    }

    async fn stop_scan(&self) -> Result<(), InteractionError> {
        if let Some(token) = replace_token(&self.scan_token, None) {
            token.cancel();
        }
        self.adapter.stop_scan().await?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn connect_direct(&self, address: &str) -> Result<(), InteractionError> {
        let peripheral =
            self.find_peripheral(address)
                .await?
                .ok_or_else(|| InteractionError::DeviceNotFound {
                    address: address.to_string(),
                })?;
        self.establish(peripheral, address).await
    }

    #[instrument(skip(self), level = "debug")]
    async fn connect_via_scan(&self, address: &str) -> Result<(), InteractionError> {
        self.adapter.start_scan(BleScanFilter::default()).await?;
        let found = self.poll_for_address(address).await;
        if let Err(error) = self.adapter.stop_scan().await {
            debug!(?error, "failed to stop adapter scan cleanly");
        }
        self.establish(found?, address).await
    }

    #[instrument(skip(self), level = "debug")]
    async fn disconnect(&self) -> Result<(), InteractionError> {
        let active = self.link.lock().await.take();
        self.connected.store(false, Ordering::Release);
        drop(take_slot(&self.pending));

        let Some(active) = active else {
            return Ok(());
        };
        active.pump.cancel();
        let result = if active.peripheral.is_connected().await? {
            active.peripheral.disconnect().await.map_err(Into::into)
        } else {
            Ok(())
        };
        let _ = self.events.send(LinkEvent::Disconnected {
            address: active.address,
        });
        result
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    #[instrument(skip(self, slot), level = "trace", fields(command_id = slot.id()))]
    async fn send_command(
        &self,
        request: VendorRequest,
        slot: ResponseSlot,
    ) -> Result<(), InteractionError> {
        let Some(codec) = &self.codec else {
            return Err(InteractionError::NoVendorCodec);
        };
        let guard = self.link.lock().await;
        let Some(active) = guard.as_ref() else {
            return Err(InteractionError::NotConnected);
        };
        let Some(command) = active.command.as_ref() else {
            return Err(InteractionError::MissingEndpoint {
                uuid: codec.command_characteristic().to_string(),
            });
        };

        let frame = codec.encode(&request);
        replace_slot(&self.pending, Some(slot));
        if let Err(error) = active
            .peripheral
            .write(command, &frame, WriteType::WithResponse)
            .await
        {
            drop(take_slot(&self.pending));
            return Err(error.into());
        }
        Ok(())
    }

    fn link_events(&self) -> broadcast::Receiver<LinkEvent> {
        self.events.subscribe()
    }
}

fn identity_from_properties(properties: &PeripheralProperties) -> DeviceIdentity {
    DeviceIdentity::new(
        properties.local_name.clone().unwrap_or_default(),
        properties.address.to_string(),
        properties.rssi,
    )
}

fn find_characteristic(
    characteristics: &std::collections::BTreeSet<Characteristic>,
    uuid: &str,
) -> Result<Characteristic, InteractionError> {
    characteristics
        .iter()
        .find(|characteristic| characteristic.uuid.to_string().eq_ignore_ascii_case(uuid))
        .cloned()
        .ok_or_else(|| InteractionError::MissingEndpoint {
            uuid: uuid.to_string(),
        })
}

fn scan_failure_code(error: &btleplug::Error) -> i32 {
    match error {
        btleplug::Error::PermissionDenied => SCAN_ERROR_PERMISSION,
        _ => SCAN_ERROR_ADAPTER,
    }
}

fn take_slot(cell: &StdMutex<Option<ResponseSlot>>) -> Option<ResponseSlot> {
    replace_slot(cell, None)
}

fn replace_slot(
    cell: &StdMutex<Option<ResponseSlot>>,
    value: Option<ResponseSlot>,
) -> Option<ResponseSlot> {
    match cell.lock() {
        Ok(mut guard) => std::mem::replace(&mut *guard, value),
        Err(poisoned) => std::mem::replace(&mut *poisoned.into_inner(), value),
    }
}

fn replace_token(
    cell: &StdMutex<Option<CancellationToken>>,
    value: Option<CancellationToken>,
) -> Option<CancellationToken> {
    match cell.lock() {
        Ok(mut guard) => std::mem::replace(&mut *guard, value),
        Err(poisoned) => std::mem::replace(&mut *poisoned.into_inner(), value),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use btleplug::api::{BDAddr, CharPropFlags, bleuuid::uuid_from_u16};
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    fn characteristic(short_uuid: u16) -> Characteristic {
        Characteristic {
            uuid: uuid_from_u16(short_uuid),
            service_uuid: uuid_from_u16(0xFFF0),
            properties: CharPropFlags::WRITE | CharPropFlags::NOTIFY,
            descriptors: BTreeSet::new(),
        }
    }

    #[test]
    fn identity_from_properties_uses_address_name_and_rssi() {
        let properties = PeripheralProperties {
            address: BDAddr::from([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0x01]),
            local_name: Some("R02_A1B2".to_string()),
            rssi: Some(-48),
            ..PeripheralProperties::default()
        };

        let identity = identity_from_properties(&properties);
        assert_eq!("R02_A1B2", identity.name());
        assert_eq!("AA:BB:CC:DD:EE:01", identity.address());
        assert_eq!(Some(-48), identity.signal_strength());
    }

    #[test]
    fn identity_from_properties_tolerates_missing_name() {
        let identity = identity_from_properties(&PeripheralProperties::default());
        assert_eq!("", identity.name());
        assert_eq!(None, identity.signal_strength());
    }

    #[rstest]
    #[case("0000fff1-0000-1000-8000-00805f9b34fb", true)]
    #[case("0000FFF2-0000-1000-8000-00805F9B34FB", true)]
    #[case("0000fff9-0000-1000-8000-00805f9b34fb", false)]
    fn find_characteristic_matches_case_insensitively(#[case] uuid: &str, #[case] found: bool) {
        let characteristics = BTreeSet::from([characteristic(0xFFF1), characteristic(0xFFF2)]);
        assert_eq!(found, find_characteristic(&characteristics, uuid).is_ok());
    }

    #[test]
    fn permission_errors_map_to_permission_scan_code() {
        assert_eq!(
            SCAN_ERROR_PERMISSION,
            scan_failure_code(&btleplug::Error::PermissionDenied)
        );
        assert_eq!(
            SCAN_ERROR_ADAPTER,
            scan_failure_code(&btleplug::Error::DeviceNotFound)
        );
    }
}
