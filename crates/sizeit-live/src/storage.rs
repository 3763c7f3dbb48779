//! Persistence port.

use async_trait::async_trait;

use crate::error::BoxError;
use crate::model::{SessionRecord, SizingType, Ticket};

/// Durable store for sessions and sized tickets.
///
/// The engine calls it while holding a room lock, so implementations should
/// not call back into the engine.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Look up a session.
    async fn session(&self, session_id: &str) -> Result<Option<SessionRecord>, BoxError>;

    /// Persist a new ticket in `session_id`, returning its id.
    async fn create_ticket(&self, session_id: &str, ticket: &Ticket) -> Result<i64, BoxError>;

    /// Overwrite a persisted ticket.
    async fn update_ticket(&self, ticket: &Ticket) -> Result<(), BoxError>;

    /// Sized tickets of `team` for `sizing_type`, most recent first.
    async fn history(&self, team: &str, sizing_type: SizingType) -> Result<Vec<Ticket>, BoxError>;
}
