//! Render port and the view handed to it.
//!
//! The engine decides what state a recipient may see and builds a
//! [`RoomView`]; turning that view into bytes is up to the [`Renderer`].

use bytes::Bytes;
use serde::Serialize;
use sizeit_protocol::EventKind;

use crate::error::BoxError;
use crate::model::{Ticket, User, STORY_POINTS, T_SHIRT};
use crate::room::{Participant, Room};

/// Turns a view into a payload.
pub trait Renderer: Send + Sync {
    /// Render `template` with `view`.
    ///
    /// # Errors
    ///
    /// Returns an error if rendering fails; the engine aborts the command.
    fn render(&self, template: &str, view: &RoomView<'_>) -> Result<Bytes, BoxError>;
}

/// Template identifier for an event kind.
#[must_use]
pub fn template_for(kind: EventKind) -> &'static str {
    match kind {
        EventKind::Ticket => "components/ticket",
        EventKind::Tabs => "components/tabs",
        EventKind::History => "components/history",
        EventKind::Results => "components/results",
    }
}

/// What one participant looks like to everyone else.
#[derive(Debug, Serialize)]
pub struct ResultView<'a> {
    pub user_id: &'a str,
    pub name: &'a str,
    /// Whether a pick was made, visible even while results are hidden.
    pub sized: bool,
    /// The pick, only once results are visible.
    pub sizing: Option<&'a str>,
    pub inactive: bool,
}

/// Data a template renders.
#[derive(Debug, Serialize)]
pub struct RoomView<'a> {
    pub session_id: &'a str,
    pub team: &'a str,
    pub ticket: &'a Ticket,
    pub history: &'a [Ticket],
    pub results: Vec<ResultView<'a>>,
    pub results_visible: bool,
    pub sizing_values: &'static [&'static str],
    pub sizing_value_story_points: &'static [&'static str],
    pub sizing_value_t_shirt: &'static [&'static str],
    /// Recipient of a personalized render.
    pub user: Option<&'a User>,
    /// Recipient's own pick, empty for shared renders.
    pub user_sizing_value: &'a str,
}

impl<'a> RoomView<'a> {
    /// Build the view of `room`, shared when `recipient` is `None`,
    /// personalized otherwise.
    #[must_use]
    pub fn build(session_id: &'a str, room: &'a Room, recipient: Option<&'a Participant>) -> Self {
        let visible = room.results_visible;

        Self {
            session_id,
            team: room.team(),
            ticket: &room.ticket,
            history: &room.history,
            results: room
                .participants
                .iter()
                .map(|p| ResultView {
                    user_id: &p.user.id,
                    name: &p.user.name,
                    sized: !p.sizing.is_empty(),
                    sizing: visible.then_some(p.sizing.as_str()),
                    inactive: p.inactive,
                })
                .collect(),
            results_visible: visible,
            sizing_values: room.ticket.sizing_type.values(),
            sizing_value_story_points: STORY_POINTS,
            sizing_value_t_shirt: T_SHIRT,
            user: recipient.map(|p| &p.user),
            user_sizing_value: recipient.map_or("", |p| p.sizing.as_str()),
        }
    }
}
