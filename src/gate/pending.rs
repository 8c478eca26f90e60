use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;
use tracing::trace;

use crate::error::GateError;
use crate::protocol::VendorResponse;

static NEXT_COMMAND_ID: AtomicU64 = AtomicU64::new(1);

type Outcome = Result<VendorResponse, GateError>;

/// Creates a linked slot/receiver pair for one in-flight command.
pub(crate) fn pending_command() -> (ResponseSlot, PendingCommand) {
    let (sender, receiver) = oneshot::channel();
    let slot = ResponseSlot {
        inner: Arc::new(SlotInner {
            id: NEXT_COMMAND_ID.fetch_add(1, Ordering::Relaxed),
            settled: AtomicBool::new(false),
            sender: Mutex::new(Some(sender)),
        }),
    };
    (slot, PendingCommand { receiver })
}

/// Single-resolution handle handed to the transport with each command.
///
/// The first call to [`ResponseSlot::try_resolve`] wins. Every later call,
/// including one racing a timeout, is a no-op that returns `false`.
#[derive(Debug, Clone)]
pub struct ResponseSlot {
    inner: Arc<SlotInner>,
}

#[derive(Debug)]
struct SlotInner {
    id: u64,
    settled: AtomicBool,
    sender: Mutex<Option<oneshot::Sender<Outcome>>>,
}

impl ResponseSlot {
    /// Delivers the vendor response for this command.
    ///
    /// Returns `false` when the slot was already resolved, timed out or
    /// cancelled.
    pub fn try_resolve(&self, response: VendorResponse) -> bool {
        self.settle(Ok(response))
    }

    /// Returns the process-unique command id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Returns whether the slot has been settled by any path.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.inner.settled.load(Ordering::Acquire)
    }

    pub(crate) fn try_fail(&self, error: GateError) -> bool {
        self.settle(Err(error))
    }

    /// Marks the slot settled without delivering anything.
    pub(crate) fn invalidate(&self) -> bool {
        let won = self
            .inner
            .settled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if won {
            self.take_sender();
        }
        won
    }

    fn settle(&self, outcome: Outcome) -> bool {
        if self
            .inner
            .settled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            trace!(command_id = self.inner.id, "ignoring late resolution");
            return false;
        }

        match self.take_sender() {
            Some(sender) => sender.send(outcome).is_ok(),
            None => false,
        }
    }

    fn take_sender(&self) -> Option<oneshot::Sender<Outcome>> {
        match self.inner.sender.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}

/// Receiving half of a [`ResponseSlot`], awaited by the command gate.
#[derive(Debug)]
pub(crate) struct PendingCommand {
    receiver: oneshot::Receiver<Outcome>,
}

impl PendingCommand {
    /// Waits for the slot to settle.
    ///
    /// A slot dropped without resolution reads as `NotConnected`: the only
    /// owner that drops slots unresolved is a transport tearing down its link.
    pub(crate) async fn outcome(&mut self) -> Outcome {
        (&mut self.receiver)
            .await
            .unwrap_or(Err(GateError::NotConnected))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::protocol::VendorPayload;

    fn battery(level: u8) -> VendorResponse {
        VendorResponse::success(VendorPayload::Battery { level })
    }

    #[tokio::test]
    async fn first_resolution_wins() {
        let (slot, mut pending) = pending_command();

        assert!(slot.try_resolve(battery(80)));
        assert!(!slot.try_resolve(battery(10)));
        assert!(!slot.try_fail(GateError::NotConnected));

        let outcome = pending.outcome().await;
        assert_eq!(Some(battery(80)), outcome.ok());
    }

    #[tokio::test]
    async fn invalidated_slot_rejects_late_callback() {
        let (slot, _pending) = pending_command();

        assert!(slot.invalidate());
        assert!(slot.is_settled());
        assert!(!slot.try_resolve(battery(50)));
    }

    #[tokio::test]
    async fn dropped_slot_reads_as_not_connected() {
        let (slot, mut pending) = pending_command();
        drop(slot);

        assert_matches!(pending.outcome().await, Err(GateError::NotConnected));
    }

    #[test]
    fn concurrent_resolvers_settle_once() {
        let (slot, _pending) = pending_command();
        let winners: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|level| {
                    let slot = slot.clone();
                    scope.spawn(move || usize::from(slot.try_resolve(battery(level))))
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().expect("resolver thread should not panic"))
                .sum()
        });

        assert_eq!(1, winners);
    }
}
