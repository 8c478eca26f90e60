mod pending;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{Mutex, broadcast};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};

use crate::error::GateError;
use crate::hw::{LinkEvent, Transport};
use crate::protocol::{VendorRequest, VendorResponse};

pub(crate) use self::pending::pending_command;
pub use self::pending::ResponseSlot;

/// Serialises request/response exchanges over the single physical link.
///
/// Callers queue on a fair lock, so commands are dispatched in arrival order
/// and never overlap on the transport.
#[derive(Debug)]
pub struct CommandGate {
    transport: Arc<dyn Transport>,
    turn: Mutex<()>,
    in_flight: StdMutex<Option<ResponseSlot>>,
    dispatched: AtomicU64,
}

impl CommandGate {
    /// Creates a gate in front of `transport`.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            turn: Mutex::new(()),
            in_flight: StdMutex::new(None),
            dispatched: AtomicU64::new(0),
        }
    }

    /// Sends `request` and waits for its response.
    ///
    /// ```
    /// # async fn demo(gate: &wearlink::CommandGate) {
    /// use std::time::Duration;
    /// use tokio_util::sync::CancellationToken;
    /// use wearlink::VendorRequest;
    ///
    /// let ok = gate
    ///     .execute(
    ///         VendorRequest::ReadBattery,
    ///         |response| response.is_success(),
    ///         Duration::from_secs(3),
    ///         &CancellationToken::new(),
    ///     )
    ///     .await;
    /// let _ = ok;
    /// # }
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`GateError::NotConnected`] without queueing when the link is
    /// down, or when it drops while the command is pending.
    /// [`GateError::Timeout`] when no response arrives within `timeout`.
    /// [`GateError::Cancelled`] when `cancel` fires, even while queued.
    /// [`GateError::Transport`] when the transport rejects the write.
    #[instrument(
        skip(self, mapper, cancel),
        level = "debug",
        fields(request = %request.label(), ?timeout)
    )]
    pub async fn execute<R, F>(
        &self,
        request: VendorRequest,
        mapper: F,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<R, GateError>
    where
        F: FnOnce(VendorResponse) -> R + Send,
        R: Send,
    {
        if cancel.is_cancelled() {
            return Err(GateError::Cancelled);
        }
        if !self.transport.is_connected().await {
            return Err(GateError::NotConnected);
        }

        let _turn = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(GateError::Cancelled),
            turn = self.turn.lock() => turn,
        };

        if !self.transport.is_connected().await {
            return Err(GateError::NotConnected);
        }

        let mut link_events = self.transport.link_events();
        let (slot, mut pending) = pending_command();
        let _in_flight = InFlightGuard::register(&self.in_flight, slot.clone());
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        debug!(command_id = slot.id(), "dispatching command");

        if let Err(error) = self.transport.send_command(request, slot.clone()).await {
            slot.invalidate();
            warn!(command_id = slot.id(), %error, "transport rejected command");
            return Err(GateError::Transport(error));
        }

        let deadline = sleep(timeout);
        tokio::pin!(deadline);
        let mut link_open = true;

        let outcome = loop {
            tokio::select! {
                biased;
                outcome = pending.outcome() => break outcome,
                () = cancel.cancelled() => {
                    if slot.invalidate() {
                        break Err(GateError::Cancelled);
                    }
                }
                () = &mut deadline => {
                    if slot.invalidate() {
                        break Err(GateError::Timeout);
                    }
                }
                event = link_events.recv(), if link_open => match event {
                    Ok(LinkEvent::Disconnected { address }) => {
                        debug!(%address, "link dropped while command pending");
                        slot.try_fail(GateError::NotConnected);
                    }
                    Ok(LinkEvent::Connected { .. }) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => link_open = false,
                },
            }
        };

        match outcome {
            Ok(response) => {
                trace!(command_id = slot.id(), "command resolved");
                Ok(mapper(response))
            }
            Err(error) => {
                debug!(command_id = slot.id(), %error, "command did not resolve");
                Err(error)
            }
        }
    }

    /// Fails the in-flight command, if any, with [`GateError::NotConnected`].
    ///
    /// Returns whether a pending command was failed.
    pub fn cancel_pending(&self) -> bool {
        let slot = match self.in_flight.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        slot.is_some_and(|slot| slot.try_fail(GateError::NotConnected))
    }

    /// Returns whether a command currently holds the gate.
    #[must_use]
    pub fn in_flight(&self) -> bool {
        match self.in_flight.lock() {
            Ok(guard) => guard.is_some(),
            Err(poisoned) => poisoned.into_inner().is_some(),
        }
    }

    /// Returns how many commands have been handed to the transport.
    #[must_use]
    pub fn commands_dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }
}

/// Publishes the in-flight slot for the lifetime of one exchange.
///
/// Dropping the guard invalidates the slot, so a callback arriving after the
/// caller went away cannot resolve it.
struct InFlightGuard<'a> {
    cell: &'a StdMutex<Option<ResponseSlot>>,
    slot: ResponseSlot,
}

impl<'a> InFlightGuard<'a> {
    fn register(cell: &'a StdMutex<Option<ResponseSlot>>, slot: ResponseSlot) -> Self {
        Self::replace(cell, Some(slot.clone()));
        Self { cell, slot }
    }

    fn replace(cell: &StdMutex<Option<ResponseSlot>>, value: Option<ResponseSlot>) {
        match cell.lock() {
            Ok(mut guard) => *guard = value,
            Err(poisoned) => *poisoned.into_inner() = value,
        }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.slot.invalidate();
        Self::replace(self.cell, None);
    }
}
