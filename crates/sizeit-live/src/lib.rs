//! # sizeit-live
//!
//! Live collaboration engine for size-it planning poker sessions.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Room** - Shared ticket, participants and their picks for one session
//! - **LiveService** - Commands against rooms, with notification
//! - **Notifier** - Renders room views and fans them out to mailboxes
//! - **Reaper / Sweeper** - Liveness timers and empty-room reclamation
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Transport  │────▶│ LiveService │────▶│  Registry   │──▶ Room
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        ▲                   │
//!        │  mailbox          ▼
//!        └─────────── ┌─────────────┐     ┌─────────────┐
//!                     │  Notifier   │────▶│  Renderer   │
//!                     └─────────────┘     └─────────────┘
//! ```
//!
//! Storage and rendering are ports: implement [`Storage`] and [`Renderer`]
//! and hand them to [`LiveService::new`].

pub mod clock;
pub mod error;
pub mod mailbox;
pub mod model;
pub mod notifier;
pub mod render;
pub mod room;
pub mod service;
pub mod storage;

mod registry;
mod tasks;

pub use clock::{Clock, ManualClock, TokioClock};
pub use error::{BoxError, LiveError};
pub use mailbox::{mailbox, EventReceiver, EventSender, DEFAULT_MAILBOX_CAPACITY};
pub use model::{SessionId, SessionRecord, SizingType, Ticket, User};
pub use render::{Renderer, RoomView};
pub use room::{ConnectionId, ParticipantSnapshot, RoomSnapshot};
pub use service::{LiveConfig, LiveService};
pub use storage::Storage;
