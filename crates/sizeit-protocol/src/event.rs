//! Event types for the size-it live stream.
//!
//! An event is the unit the engine pushes to a connected client: a kind
//! naming which part of the page changed, and an opaque rendered payload.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::codec::ProtocolError;

/// Which part of the shared view an event refreshes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// The ticket under estimation.
    Ticket,
    /// The sizing tabs, personalized with the recipient's own pick.
    Tabs,
    /// Previously sized tickets.
    History,
    /// Who is here and what they picked.
    Results,
}

impl EventKind {
    /// All kinds, in the order a joining client receives them.
    pub const ALL: [EventKind; 4] = [
        EventKind::Ticket,
        EventKind::Tabs,
        EventKind::History,
        EventKind::Results,
    ];

    /// Wire name of the kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Ticket => "ticket",
            EventKind::Tabs => "tabs",
            EventKind::History => "history",
            EventKind::Results => "results",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ticket" => Ok(EventKind::Ticket),
            "tabs" => Ok(EventKind::Tabs),
            "history" => Ok(EventKind::History),
            "results" => Ok(EventKind::Results),
            other => Err(ProtocolError::UnknownKind(other.to_string())),
        }
    }
}

/// A rendered notification for one client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// What changed.
    pub kind: EventKind,
    /// Rendered fragment (shared between recipients of a broadcast).
    pub payload: Bytes,
}

impl Event {
    /// Create a new event.
    #[must_use]
    pub fn new(kind: EventKind, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    /// Payload size in bytes.
    #[must_use]
    pub fn payload_size(&self) -> usize {
        self.payload.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names() {
        for kind in EventKind::ALL {
            assert_eq!(kind.as_str().parse::<EventKind>().unwrap(), kind);
        }
        assert!(matches!(
            "presence".parse::<EventKind>(),
            Err(ProtocolError::UnknownKind(_))
        ));
    }

    #[test]
    fn test_kind_serde() {
        let json = serde_json::to_string(&EventKind::Results).unwrap();
        assert_eq!(json, "\"results\"");
    }

    #[test]
    fn test_event_shares_payload() {
        let payload = Bytes::from_static(b"<div>5</div>");
        let a = Event::new(EventKind::Results, payload.clone());
        let b = a.clone();
        assert_eq!(a.payload.as_ptr(), b.payload.as_ptr());
        assert_eq!(a.payload_size(), 12);
    }
}
