//! In-memory repository for sessions, sized tickets and users.

use async_trait::async_trait;
use dashmap::DashMap;
use sizeit_live::{BoxError, SessionRecord, SizingType, Storage, Ticket, User};
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::debug;
use uuid::Uuid;

/// A persisted ticket and where it belongs.
#[derive(Debug, Clone)]
struct TicketRow {
    team: String,
    ticket: Ticket,
    /// Bumped on every write; drives the history order.
    revision: i64,
}

/// Process-local store backing the live engine and the HTTP layer.
#[derive(Debug, Default)]
pub struct MemoryStore {
    sessions: DashMap<String, SessionRecord>,
    tickets: DashMap<i64, TicketRow>,
    users: DashMap<String, User>,
    next_ticket_id: AtomicI64,
    revision: AtomicI64,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new session for `team`.
    #[must_use]
    pub fn create_session(&self, team: &str) -> SessionRecord {
        let record = SessionRecord {
            id: Uuid::new_v4().to_string(),
            team: team.to_string(),
        };
        self.sessions.insert(record.id.clone(), record.clone());
        debug!(session = %record.id, team = %team, "Session created");
        record
    }

    /// Look up a session.
    #[must_use]
    pub fn get_session(&self, session_id: &str) -> Option<SessionRecord> {
        self.sessions.get(session_id).map(|r| r.value().clone())
    }

    /// Teams that ever opened a session, sorted.
    #[must_use]
    pub fn teams(&self) -> Vec<String> {
        let mut teams: Vec<String> = self.sessions.iter().map(|r| r.team.clone()).collect();
        teams.sort();
        teams.dedup();
        teams
    }

    /// Number of sessions and archived tickets.
    #[must_use]
    pub fn counts(&self) -> (usize, usize) {
        (self.sessions.len(), self.tickets.len())
    }

    /// Remember `user` for later requests.
    pub fn save_user(&self, user: User) {
        self.users.insert(user.id.clone(), user);
    }

    /// Look up a user by id.
    #[must_use]
    pub fn get_user(&self, user_id: &str) -> Option<User> {
        self.users.get(user_id).map(|u| u.value().clone())
    }

    fn next_revision(&self) -> i64 {
        self.revision.fetch_add(1, Ordering::Relaxed) + 1
    }
}

#[async_trait]
impl Storage for MemoryStore {
    async fn session(&self, session_id: &str) -> Result<Option<SessionRecord>, BoxError> {
        Ok(self.get_session(session_id))
    }

    async fn create_ticket(&self, session_id: &str, ticket: &Ticket) -> Result<i64, BoxError> {
        let team = self
            .get_session(session_id)
            .map(|s| s.team)
            .ok_or_else(|| format!("unknown session {session_id}"))?;

        let id = self.next_ticket_id.fetch_add(1, Ordering::Relaxed) + 1;
        let mut ticket = ticket.clone();
        ticket.id = id;

        self.tickets.insert(
            id,
            TicketRow {
                team,
                ticket,
                revision: self.next_revision(),
            },
        );
        Ok(id)
    }

    async fn update_ticket(&self, ticket: &Ticket) -> Result<(), BoxError> {
        let revision = self.next_revision();
        let mut row = self
            .tickets
            .get_mut(&ticket.id)
            .ok_or_else(|| format!("unknown ticket {}", ticket.id))?;

        row.ticket = ticket.clone();
        row.revision = revision;
        Ok(())
    }

    async fn history(&self, team: &str, sizing_type: SizingType) -> Result<Vec<Ticket>, BoxError> {
        let mut rows: Vec<(i64, Ticket)> = self
            .tickets
            .iter()
            .filter(|r| r.team == team && r.ticket.sizing_type == sizing_type)
            .map(|r| (r.revision, r.ticket.clone()))
            .collect();

        rows.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(rows.into_iter().map(|(_, ticket)| ticket).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sized(summary: &str, value: &str) -> Ticket {
        Ticket {
            summary: summary.to_string(),
            sizing_value: value.to_string(),
            ..Ticket::new(SizingType::StoryPoints)
        }
    }

    #[tokio::test]
    async fn test_history_most_recent_first() {
        let store = MemoryStore::new();
        let core = store.create_session("core");
        let ops = store.create_session("ops");

        let first = store.create_ticket(&core.id, &sized("first", "3")).await.unwrap();
        store.create_ticket(&core.id, &sized("second", "5")).await.unwrap();
        store.create_ticket(&ops.id, &sized("elsewhere", "8")).await.unwrap();

        let mut updated = sized("first again", "13");
        updated.id = first;
        store.update_ticket(&updated).await.unwrap();

        let history = store.history("core", SizingType::StoryPoints).await.unwrap();
        let summaries: Vec<&str> = history.iter().map(|t| t.summary.as_str()).collect();
        assert_eq!(summaries, vec!["first again", "second"]);

        assert!(store.history("core", SizingType::TShirt).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_references() {
        let store = MemoryStore::new();
        assert!(store.session("missing").await.unwrap().is_none());
        assert!(store.create_ticket("missing", &sized("x", "1")).await.is_err());

        let mut ghost = sized("x", "1");
        ghost.id = 42;
        assert!(store.update_ticket(&ghost).await.is_err());
    }

    #[test]
    fn test_teams_and_users() {
        let store = MemoryStore::new();
        let _ = store.create_session("ops");
        let _ = store.create_session("core");
        let _ = store.create_session("core");
        assert_eq!(store.teams(), vec!["core".to_string(), "ops".to_string()]);
        assert_eq!(store.counts(), (3, 0));

        store.save_user(User::new("u-1", "Alice", "core"));
        assert_eq!(store.get_user("u-1").unwrap().name, "Alice");
        assert!(store.get_user("u-2").is_none());
    }
}
