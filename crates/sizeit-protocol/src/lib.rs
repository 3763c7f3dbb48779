//! # sizeit-protocol
//!
//! Outbound event definitions for the size-it live collaboration engine.
//!
//! The engine pushes [`Event`]s to connected clients; the transport writes
//! them as server-sent events using [`codec`].
//!
//! ## Event Kinds
//!
//! - `ticket` - The ticket under estimation
//! - `tabs` - Sizing tabs, personalized per recipient
//! - `history` - Previously sized tickets
//! - `results` - Participants and their picks
//!
//! ## Example
//!
//! ```rust
//! use bytes::BytesMut;
//! use sizeit_protocol::{codec, Event, EventKind};
//!
//! let event = Event::new(EventKind::Results, "<ul><li>Alice</li></ul>");
//!
//! let encoded = codec::encode(&event).unwrap();
//! let mut buf = BytesMut::from(&encoded[..]);
//! let decoded = codec::decode_from(&mut buf).unwrap().unwrap();
//! assert_eq!(decoded, event);
//! ```

pub mod codec;
pub mod event;

pub use codec::{decode_from, encode, ProtocolError};
pub use event::{Event, EventKind};
