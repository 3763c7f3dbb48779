//! Room state for one collaboration session.
//!
//! A room holds the shared ticket, the participants with their private picks
//! and liveness, the reveal flag and the recent history. Methods here are
//! plain mutations; locking and notification belong to the service.

use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::mailbox::EventSender;
use crate::model::{SizingType, Ticket, User};

/// Identifies one join of a participant within its room. Every join,
/// reconnects included, gets a new one.
pub type ConnectionId = u64;

/// A joined identity.
#[derive(Debug)]
pub struct Participant {
    pub(crate) user: User,
    pub(crate) sizing: String,
    pub(crate) inactive: bool,
    /// Deadline after which the participant counts as inactive; once
    /// inactive, the moment it happened.
    pub(crate) inactive_at: Option<Instant>,
    pub(crate) mailbox: Option<EventSender>,
    /// Handle on the pending expiry timer.
    pub(crate) expiry: Option<CancellationToken>,
    connection: ConnectionId,
}

impl Participant {
    fn new(user: User, mailbox: EventSender, connection: ConnectionId) -> Self {
        Self {
            user,
            sizing: String::new(),
            inactive: false,
            inactive_at: None,
            mailbox: Some(mailbox),
            expiry: None,
            connection,
        }
    }

    /// The participant's identity.
    #[must_use]
    pub fn user(&self) -> &User {
        &self.user
    }

    /// Current pick, empty when not sized yet.
    #[must_use]
    pub fn sizing(&self) -> &str {
        &self.sizing
    }

    /// Whether the grace period after leaving has elapsed.
    #[must_use]
    pub fn is_inactive(&self) -> bool {
        self.inactive
    }

    /// Whether the participant left and is waiting out the grace period.
    #[must_use]
    pub fn is_pending_expiry(&self) -> bool {
        !self.inactive && self.inactive_at.is_some()
    }

    /// Whether the engine still holds a mailbox for this participant.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.mailbox.is_some()
    }

    /// The latest join of this participant.
    #[must_use]
    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    fn cancel_expiry(&mut self) {
        if let Some(token) = self.expiry.take() {
            token.cancel();
        }
    }
}

/// Mutable state of one session.
#[derive(Debug)]
pub struct Room {
    pub(crate) ticket: Ticket,
    pub(crate) history: Vec<Ticket>,
    pub(crate) participants: Vec<Participant>,
    pub(crate) results_visible: bool,
    team: String,
    last_connection: ConnectionId,
}

impl Room {
    /// Create a room with the default sizing type and its history.
    #[must_use]
    pub fn new(team: impl Into<String>, history: Vec<Ticket>) -> Self {
        Self {
            ticket: Ticket::new(SizingType::default()),
            history,
            participants: Vec::new(),
            results_visible: false,
            team: team.into(),
            last_connection: 0,
        }
    }

    #[must_use]
    pub fn team(&self) -> &str {
        &self.team
    }

    #[must_use]
    pub fn ticket(&self) -> &Ticket {
        &self.ticket
    }

    #[must_use]
    pub fn history(&self) -> &[Ticket] {
        &self.history
    }

    #[must_use]
    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    #[must_use]
    pub fn results_visible(&self) -> bool {
        self.results_visible
    }

    /// Find a participant by identity.
    #[must_use]
    pub fn participant(&self, user: &User) -> Option<&Participant> {
        self.participants.iter().find(|p| p.user == *user)
    }

    fn participant_mut(&mut self, user: &User) -> Option<&mut Participant> {
        self.participants.iter_mut().find(|p| p.user == *user)
    }

    /// Add a participant, or reconnect an existing one.
    ///
    /// On reconnect the previous mailbox is dropped, which closes it for the
    /// old connection, any pending expiry is cancelled and the pick is kept.
    /// Returns `true` on reconnect.
    pub fn join(&mut self, user: User, mailbox: EventSender) -> bool {
        self.last_connection += 1;
        let connection = self.last_connection;

        if let Some(existing) = self.participant_mut(&user) {
            existing.cancel_expiry();
            existing.mailbox = Some(mailbox);
            existing.inactive = false;
            existing.inactive_at = None;
            existing.user = user;
            existing.connection = connection;
            return true;
        }

        self.participants.push(Participant::new(user, mailbox, connection));
        false
    }

    /// Whether `connection` is the latest join of `user`.
    #[must_use]
    pub fn is_current(&self, user: &User, connection: ConnectionId) -> bool {
        self.participant(user)
            .is_some_and(|p| p.connection == connection)
    }

    /// Record that `user` left: it becomes inactive at `deadline` unless it
    /// reconnects first. Any previous expiry timer is cancelled in favour of
    /// `expiry`.
    ///
    /// Returns `false` if `user` never joined.
    pub fn schedule_expiry(
        &mut self,
        user: &User,
        deadline: Instant,
        expiry: CancellationToken,
    ) -> bool {
        match self.participant_mut(user) {
            Some(participant) => {
                participant.cancel_expiry();
                participant.inactive_at = Some(deadline);
                participant.expiry = Some(expiry);
                true
            }
            None => false,
        }
    }

    /// Drop the mailbox of `user`, disconnecting its transport.
    pub(crate) fn disconnect(&mut self, user: &User) {
        if let Some(participant) = self.participant_mut(user) {
            participant.mailbox = None;
        }
    }

    /// Flip every participant whose deadline has passed to inactive.
    ///
    /// Returns how many changed.
    pub fn reap_expired(&mut self, now: Instant) -> usize {
        let mut reaped = 0;

        for participant in &mut self.participants {
            if participant.inactive {
                continue;
            }
            if matches!(participant.inactive_at, Some(deadline) if deadline <= now) {
                participant.inactive = true;
                participant.expiry = None;
                reaped += 1;
                debug!(user = %participant.user.name, "Participant is now inactive");
            }
        }

        reaped
    }

    /// A room is empty when nobody in it is active.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.participants.iter().all(|p| p.inactive)
    }

    /// Update the shared ticket fields.
    pub fn save_ticket(&mut self, summary: impl Into<String>, url: impl Into<String>) {
        self.ticket.summary = summary.into();
        self.ticket.url = url.into();
    }

    /// Record the pick of `user`. Returns `false` if `user` never joined.
    pub fn set_sizing(&mut self, user: &User, value: impl Into<String>) -> bool {
        match self.participant_mut(user) {
            Some(participant) => {
                participant.sizing = value.into();
                true
            }
            None => false,
        }
    }

    /// Copy the pick of `user` into the ticket's sizing value.
    pub fn pull_sizing_into_ticket(&mut self, user: &User) {
        if let Some(value) = self.participant(user).map(|p| p.sizing.clone()) {
            self.ticket.sizing_value = value;
        }
    }

    /// Flip the reveal flag, returning its new value.
    pub fn toggle_results(&mut self) -> bool {
        self.results_visible = !self.results_visible;
        self.results_visible
    }

    /// Change the scale: every pick and the ticket value are cleared and the
    /// history replaced by the one for the new scale.
    pub fn switch_sizing_type(&mut self, sizing_type: SizingType, history: Vec<Ticket>) {
        self.ticket.sizing_type = sizing_type;
        self.ticket.sizing_value.clear();
        self.clear_sizings();
        self.history = history;
    }

    /// Replace the history.
    pub fn set_history(&mut self, history: Vec<Ticket>) {
        self.history = history;
    }

    /// Start a new round: ticket cleared (scale kept), picks cleared,
    /// results hidden.
    pub fn reset(&mut self) {
        self.ticket.id = 0;
        self.ticket.summary.clear();
        self.ticket.url.clear();
        self.ticket.sizing_value.clear();
        self.results_visible = false;
        self.clear_sizings();
    }

    fn clear_sizings(&mut self) {
        for participant in &mut self.participants {
            participant.sizing.clear();
        }
    }

    /// Owned copy of the state.
    #[must_use]
    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            team: self.team.clone(),
            ticket: self.ticket.clone(),
            history: self.history.clone(),
            results_visible: self.results_visible,
            participants: self
                .participants
                .iter()
                .map(|p| ParticipantSnapshot {
                    user: p.user.clone(),
                    sizing: p.sizing.clone(),
                    inactive: p.inactive,
                    pending_expiry: p.is_pending_expiry(),
                    connected: p.is_connected(),
                })
                .collect(),
        }
    }
}

/// Point-in-time copy of a room.
#[derive(Debug, Clone, Serialize)]
pub struct RoomSnapshot {
    pub team: String,
    pub ticket: Ticket,
    pub history: Vec<Ticket>,
    pub results_visible: bool,
    pub participants: Vec<ParticipantSnapshot>,
}

impl RoomSnapshot {
    /// Find a participant by user id.
    #[must_use]
    pub fn participant(&self, user_id: &str) -> Option<&ParticipantSnapshot> {
        self.participants.iter().find(|p| p.user.is(user_id))
    }
}

/// Point-in-time copy of a participant.
#[derive(Debug, Clone, Serialize)]
pub struct ParticipantSnapshot {
    pub user: User,
    pub sizing: String,
    pub inactive: bool,
    pub pending_expiry: bool,
    pub connected: bool,
}
