//! Per-client outbound event queues.
//!
//! The transport keeps the receiving half and hands the sender to the engine
//! on join. The engine drops its sender to tell the transport the client is
//! being disconnected: either a newer connection of the same participant
//! replaced it, or the client stopped draining and the mailbox filled up.

use sizeit_protocol::Event;
use tokio::sync::mpsc;

/// Default mailbox capacity.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 8;

/// Engine side of a mailbox.
pub type EventSender = mpsc::Sender<Event>;

/// Transport side of a mailbox.
pub type EventReceiver = mpsc::Receiver<Event>;

/// Create a bounded mailbox.
///
/// A zero capacity is bumped to one.
#[must_use]
pub fn mailbox(capacity: usize) -> (EventSender, EventReceiver) {
    mpsc::channel(capacity.max(1))
}

/// Outcome of a non-blocking delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivered {
    /// Queued for the client.
    Queued,
    /// Client is not draining; it must be evicted.
    Full,
    /// Transport already went away.
    Closed,
}

pub(crate) fn try_deliver(sender: &EventSender, event: Event) -> Delivered {
    match sender.try_send(event) {
        Ok(()) => Delivered::Queued,
        Err(mpsc::error::TrySendError::Full(_)) => Delivered::Full,
        Err(mpsc::error::TrySendError::Closed(_)) => Delivered::Closed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sizeit_protocol::EventKind;

    #[test]
    fn test_delivery_outcomes() {
        let (tx, mut rx) = mailbox(1);
        let event = Event::new(EventKind::Results, "r");

        assert_eq!(try_deliver(&tx, event.clone()), Delivered::Queued);
        assert_eq!(try_deliver(&tx, event.clone()), Delivered::Full);

        assert_eq!(rx.try_recv().unwrap(), event);
        drop(rx);
        assert_eq!(try_deliver(&tx, event), Delivered::Closed);
    }

    #[test]
    fn test_zero_capacity_is_usable() {
        let (tx, _rx) = mailbox(0);
        assert_eq!(tx.max_capacity(), 1);
    }
}
