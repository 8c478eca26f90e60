use std::collections::HashSet;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::time::sleep;
use tokio_stream::Stream;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use super::config::LinkConfig;
use super::state::ConnectionState;
use crate::error::{InteractionError, LinkError};
use crate::gate::CommandGate;
use crate::hw::{DeviceIdentity, LinkEvent, ScanEvent, ScanFilter, Transport};

const TRANSITION_CAPACITY: usize = 64;
const SCAN_STREAM_CAPACITY: usize = 32;

/// Owns the link lifecycle and is the only component that connects or
/// disconnects the transport.
#[derive(Debug)]
pub struct ConnectionManager {
    pub(super) transport: Arc<dyn Transport>,
    gate: Arc<CommandGate>,
    pub(super) config: LinkConfig,
    state: Arc<Mutex<ConnectionState>>,
    transitions: broadcast::Sender<ConnectionState>,
    target: Mutex<Option<DeviceIdentity>>,
    attempt: Mutex<Option<CancellationToken>>,
    scan: Mutex<Option<CancellationToken>>,
    wants_connection: AtomicBool,
    shutdown: CancellationToken,
}

impl ConnectionManager {
    /// Creates a manager and starts listening to the transport's link events.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn spawn(
        transport: Arc<dyn Transport>,
        gate: Arc<CommandGate>,
        config: LinkConfig,
    ) -> Arc<Self> {
        let (transitions, _) = broadcast::channel(TRANSITION_CAPACITY);
        let link_events = transport.link_events();
        let manager = Arc::new(Self {
            transport,
            gate,
            config,
            state: Arc::new(Mutex::new(ConnectionState::Disconnected)),
            transitions,
            target: Mutex::new(None),
            attempt: Mutex::new(None),
            scan: Mutex::new(None),
            wants_connection: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        });

        tokio::spawn(watch_link(
            Arc::downgrade(&manager),
            link_events,
            manager.shutdown.clone(),
        ));
        manager
    }

    /// Starts connecting to `identity`.
    ///
    /// Returns once the connect cascade is scheduled; use
    /// [`Self::wait_for_state`] or [`Self::observe_state`] to learn the
    /// outcome. Connecting to a different device while connected first
    /// passes through `Disconnected`.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::PermissionDenied`] and moves to `Error` without
    /// touching the transport when Bluetooth permission is missing.
    #[instrument(skip(self), level = "info", fields(address = %identity.address()))]
    pub async fn connect(self: &Arc<Self>, identity: DeviceIdentity) -> Result<(), LinkError> {
        if let Err(error) = self.transport.check_permissions().await {
            let error = LinkError::from(error);
            warn!(%error, "cannot connect without Bluetooth access");
            self.transition(ConnectionState::Error);
            return Err(error);
        }

        let same_target = self
            .target()
            .is_some_and(|target| target.address().eq_ignore_ascii_case(identity.address()));
        let current = self.state();
        if same_target && (current == ConnectionState::Connected || current.is_establishing()) {
            debug!(%current, "already connected or connecting to this device");
            self.wants_connection.store(true, Ordering::Release);
            return Ok(());
        }
        if current != ConnectionState::Disconnected && current != ConnectionState::Error {
            info!(%current, "switching devices");
            self.teardown().await;
        }

        self.wants_connection.store(true, Ordering::Release);
        replace(&self.target, Some(identity.clone()));
        let token = self.begin_attempt();
        if !self.transition(ConnectionState::Connecting) {
            token.cancel();
            return Ok(());
        }

        let manager = Arc::clone(self);
        tokio::spawn(async move { manager.run_cascade(identity, token).await });
        Ok(())
    }

    /// Drops the link and clears the intent to stay connected.
    ///
    /// Cancels the connect cascade, any silent reconnect and any active scan,
    /// and fails the pending command with `NotConnected`.
    #[instrument(skip(self), level = "info")]
    pub async fn disconnect(&self) {
        self.wants_connection.store(false, Ordering::Release);
        self.teardown().await;
    }

    /// Returns whether the link is established.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *lock(&self.state)
    }

    /// Returns the device the manager is trying to reach or is connected to.
    #[must_use]
    pub fn target(&self) -> Option<DeviceIdentity> {
        lock(&self.target).clone()
    }

    /// Returns whether a connection was requested and not since withdrawn.
    #[must_use]
    pub fn wants_connection(&self) -> bool {
        self.wants_connection.load(Ordering::Acquire)
    }

    /// Streams every transition from now on, in order.
    ///
    /// An observer that falls more than a channel's worth of transitions
    /// behind skips them and receives the current state instead.
    #[must_use]
    pub fn observe_state(&self) -> StateStream {
        StateStream {
            inner: BroadcastStream::new(self.transitions.subscribe()),
            transitions: self.transitions.downgrade(),
            current: Arc::clone(&self.state),
        }
    }

    /// Waits until the state satisfies `predicate`, checking the current state
    /// first.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Timeout`] when `timeout` elapses first.
    pub async fn wait_for_state<P>(
        &self,
        predicate: P,
        timeout: Duration,
    ) -> Result<ConnectionState, LinkError>
    where
        P: Fn(ConnectionState) -> bool,
    {
        let mut transitions = self.transitions.subscribe();
        let current = self.state();
        if predicate(current) {
            return Ok(current);
        }

        let wait = async {
            loop {
                match transitions.recv().await {
                    Ok(state) if predicate(state) => return Ok(state),
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        let state = self.state();
                        if predicate(state) {
                            return Ok(state);
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => return Err(LinkError::Cancelled),
                }
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_elapsed| LinkError::Timeout)?
    }

    /// Scans for devices for up to `duration`.
    ///
    /// Each address is reported once. A `Failed` event ends the stream.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::PermissionDenied`] when Bluetooth permission is
    /// missing, or a transport error if the scan cannot start.
    #[instrument(skip(self), level = "info")]
    pub async fn start_scan(
        &self,
        filter: ScanFilter,
        duration: Duration,
    ) -> Result<ScanStream, LinkError> {
        self.transport.check_permissions().await?;

        let token = CancellationToken::new();
        if let Some(previous) = replace(&self.scan, Some(token.clone())) {
            previous.cancel();
        }
        let (sender, receiver) = mpsc::channel(SCAN_STREAM_CAPACITY);

        let events = match self.transport.scan(&filter).await {
            Ok(events) => events,
            Err(InteractionError::ScanFailed { code }) => {
                let _ = sender.try_send(ScanEvent::Failed { code });
                return Ok(ScanStream { receiver });
            }
            Err(error) => return Err(error.into()),
        };

        tokio::spawn(forward_scan(
            Arc::clone(&self.transport),
            events,
            sender,
            token,
            duration,
        ));
        Ok(ScanStream { receiver })
    }

    /// Stops the scan started by [`Self::start_scan`], if any.
    pub async fn stop_scan(&self) {
        if let Some(token) = replace(&self.scan, None) {
            token.cancel();
        }
        if let Err(error) = self.transport.stop_scan().await {
            debug!(%error, "failed to stop scan");
        }
    }

    /// Returns whether the transport itself still reports a link.
    pub(crate) async fn link_alive(&self) -> bool {
        self.transport.is_connected().await
    }

    /// Treats the link as lost even though no link event arrived.
    pub(crate) fn report_link_lost(self: &Arc<Self>) {
        let address = self
            .target()
            .map(|target| target.address().to_string())
            .unwrap_or_default();
        self.on_link_lost(&address);
    }

    /// Applies `next` if the current state allows it and publishes it.
    pub(super) fn transition(&self, next: ConnectionState) -> bool {
        let mut state = lock(&self.state);
        let current = *state;
        if current == next {
            trace!(%current, "suppressing duplicate transition");
            return false;
        }
        if !current.can_transition_to(next) {
            warn!(%current, %next, "rejected state transition");
            return false;
        }
        *state = next;
        info!(from = %current, to = %next, "connection state changed");
        let _ = self.transitions.send(next);
        true
    }

    /// Applies `next` only while the state is still `expected`.
    pub(super) fn transition_from(&self, expected: ConnectionState, next: ConnectionState) -> bool {
        let mut state = lock(&self.state);
        if *state != expected || !expected.can_transition_to(next) {
            return false;
        }
        *state = next;
        info!(from = %expected, to = %next, "connection state changed");
        let _ = self.transitions.send(next);
        true
    }

    /// Cancels whatever attempt is running and returns a token for a new one.
    pub(super) fn begin_attempt(&self) -> CancellationToken {
        let token = CancellationToken::new();
        if let Some(previous) = replace(&self.attempt, Some(token.clone())) {
            previous.cancel();
        }
        token
    }

    pub(super) fn set_target(&self, identity: DeviceIdentity) {
        replace(&self.target, Some(identity));
    }

    fn cancel_attempt(&self) {
        if let Some(token) = replace(&self.attempt, None) {
            token.cancel();
        }
    }

    async fn teardown(&self) {
        self.cancel_attempt();
        if let Some(token) = replace(&self.scan, None) {
            token.cancel();
            if let Err(error) = self.transport.stop_scan().await {
                debug!(%error, "failed to stop scan");
            }
        }
        self.transition(ConnectionState::Disconnected);
        if self.gate.cancel_pending() {
            debug!("failed pending command after disconnect");
        }
        if let Err(error) = self.transport.disconnect().await {
            warn!(%error, "transport disconnect failed");
        }
    }

    fn on_link_established(&self, address: &str) {
        let current = self.state();
        if current.is_establishing() {
            self.cancel_attempt();
            if let Some(target) = self.target()
                && !target.address().eq_ignore_ascii_case(address)
            {
                self.set_target(target.with_address(address));
            }
            self.transition(ConnectionState::Connected);
            return;
        }
        if current == ConnectionState::Connected {
            return;
        }

        debug!(%address, %current, "link came up without a pending attempt; dropping it");
        let transport = Arc::clone(&self.transport);
        tokio::spawn(async move {
            if let Err(error) = transport.disconnect().await {
                debug!(%error, "failed to drop stray link");
            }
        });
    }

    fn on_link_lost(self: &Arc<Self>, address: &str) {
        if self.gate.cancel_pending() {
            debug!("failed pending command after link loss");
        }
        if !self.transition_from(ConnectionState::Connected, ConnectionState::Reconnecting) {
            trace!(%address, state = %self.state(), "ignoring link loss");
            return;
        }

        warn!(%address, "link lost unexpectedly");
        let token = self.begin_attempt();
        let manager = Arc::clone(self);
        tokio::spawn(async move { manager.silent_reconnect(token).await });
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.cancel_attempt();
        if let Some(token) = replace(&self.scan, None) {
            token.cancel();
        }
    }
}

/// Transitions published by [`ConnectionManager::observe_state`].
#[derive(Debug)]
pub struct StateStream {
    inner: BroadcastStream<ConnectionState>,
    transitions: broadcast::WeakSender<ConnectionState>,
    current: Arc<Mutex<ConnectionState>>,
}

impl StateStream {
    /// Re-subscribes at the channel tail and returns the state it starts from.
    ///
    /// Holding the state lock keeps a concurrent transition from being both
    /// reported here and delivered by the new subscription.
    fn resync(&mut self) -> Option<ConnectionState> {
        let sender = self.transitions.upgrade()?;
        let current = lock(&self.current);
        self.inner = BroadcastStream::new(sender.subscribe());
        Some(*current)
    }
}

impl Stream for StateStream {
    type Item = ConnectionState;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(state))) => return Poll::Ready(Some(state)),
                Poll::Ready(Some(Err(BroadcastStreamRecvError::Lagged(skipped)))) => {
                    warn!(skipped, "state observer fell behind; resuming from current state");
                    if let Some(current) = self.resync() {
                        return Poll::Ready(Some(current));
                    }
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Scan results returned by [`ConnectionManager::start_scan`].
#[derive(Debug)]
pub struct ScanStream {
    receiver: mpsc::Receiver<ScanEvent>,
}

impl ScanStream {
    /// Waits for the next scan event; `None` once the scan has ended.
    pub async fn next_event(&mut self) -> Option<ScanEvent> {
        self.receiver.recv().await
    }
}

impl Stream for ScanStream {
    type Item = ScanEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

async fn watch_link(
    manager: Weak<ConnectionManager>,
    mut events: broadcast::Receiver<LinkEvent>,
    shutdown: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            event = events.recv() => event,
        };
        let Some(manager) = manager.upgrade() else {
            break;
        };
        match event {
            Ok(LinkEvent::Connected { address }) => manager.on_link_established(&address),
            Ok(LinkEvent::Disconnected { address }) => manager.on_link_lost(&address),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "link event listener fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    trace!("link event listener stopped");
}

async fn forward_scan(
    transport: Arc<dyn Transport>,
    mut events: mpsc::Receiver<ScanEvent>,
    sender: mpsc::Sender<ScanEvent>,
    token: CancellationToken,
    duration: Duration,
) {
    let deadline = sleep(duration);
    tokio::pin!(deadline);
    let mut seen = HashSet::new();

    loop {
        let event = tokio::select! {
            () = token.cancelled() => return,
            () = &mut deadline => {
                debug!("scan duration elapsed");
                break;
            }
            event = events.recv() => event,
        };
        match event {
            Some(ScanEvent::Found(identity)) => {
                if !seen.insert(identity.address().to_ascii_uppercase()) {
                    continue;
                }
                if sender.send(ScanEvent::Found(identity)).await.is_err() {
                    break;
                }
            }
            Some(ScanEvent::Failed { code }) => {
                warn!(code, "scan failed");
                let _ = sender.send(ScanEvent::Failed { code }).await;
                break;
            }
            None => break,
        }
    }

    if let Err(error) = transport.stop_scan().await {
        debug!(%error, "failed to stop scan");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn replace<T>(mutex: &Mutex<T>, value: T) -> T {
    std::mem::replace(&mut *lock(mutex), value)
}
