//! Rendering and fan-out of room events.
//!
//! Delivery never waits on a client: every mailbox is bounded and written
//! with `try_send` while the room lock is held. A client whose mailbox is
//! full is disconnected and reported back in [`Dispatch::evicted`] so the
//! caller can treat it as having left.

use std::sync::Arc;

use sizeit_protocol::{Event, EventKind};
use tracing::{debug, trace, warn};

use crate::error::LiveError;
use crate::mailbox::{try_deliver, Delivered};
use crate::model::User;
use crate::render::{template_for, Renderer, RoomView};
use crate::room::{Participant, Room};

/// Which participants receive an event. Inactive participants never do.
#[derive(Debug, Clone, Copy)]
pub enum Audience<'a> {
    /// Everyone active.
    AllActive,
    /// Only this identity.
    Only(&'a User),
    /// Everyone active but this identity.
    Except(&'a User),
}

impl Audience<'_> {
    /// Whether `participant` is part of the audience.
    #[must_use]
    pub fn matches(&self, participant: &Participant) -> bool {
        if participant.inactive {
            return false;
        }
        match self {
            Audience::AllActive => true,
            Audience::Only(user) => participant.user == **user,
            Audience::Except(user) => participant.user != **user,
        }
    }
}

/// How payloads are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// One render shared by every recipient.
    Broadcast,
    /// One render per recipient, carrying its own pick.
    PerRecipient,
}

/// Result of a dispatch.
#[derive(Debug, Default)]
pub struct Dispatch {
    /// Events queued.
    pub delivered: usize,
    /// Participants disconnected because their mailbox was full.
    pub evicted: Vec<User>,
}

/// Renders room state and writes it to participant mailboxes.
pub struct Notifier {
    renderer: Arc<dyn Renderer>,
}

impl Notifier {
    #[must_use]
    pub fn new(renderer: Arc<dyn Renderer>) -> Self {
        Self { renderer }
    }

    /// Render `kind` for `audience` and queue it.
    ///
    /// # Errors
    ///
    /// Returns the first render failure; recipients already served keep
    /// their event, the rest get nothing.
    pub fn notify(
        &self,
        session_id: &str,
        room: &mut Room,
        kind: EventKind,
        audience: Audience<'_>,
        delivery: Delivery,
    ) -> Result<Dispatch, LiveError> {
        let template = template_for(kind);
        let recipients: Vec<usize> = room
            .participants
            .iter()
            .enumerate()
            .filter(|(_, p)| audience.matches(p) && p.mailbox.is_some())
            .map(|(i, _)| i)
            .collect();

        debug!(
            session = %session_id,
            event = %kind,
            ?delivery,
            recipients = recipients.len(),
            "Broadcasting"
        );

        let mut dispatch = Dispatch::default();

        match delivery {
            Delivery::Broadcast => {
                if recipients.is_empty() {
                    return Ok(dispatch);
                }
                let event = {
                    let view = RoomView::build(session_id, room, None);
                    Event::new(kind, self.render(template, &view)?)
                };
                for i in recipients {
                    deliver(&mut room.participants[i], event.clone(), &mut dispatch);
                }
            }
            Delivery::PerRecipient => {
                for i in recipients {
                    let event = {
                        let view = RoomView::build(session_id, room, Some(&room.participants[i]));
                        Event::new(kind, self.render(template, &view)?)
                    };
                    deliver(&mut room.participants[i], event, &mut dispatch);
                }
            }
        }

        Ok(dispatch)
    }

    fn render(&self, template: &str, view: &RoomView<'_>) -> Result<bytes::Bytes, LiveError> {
        self.renderer
            .render(template, view)
            .map_err(LiveError::Render)
    }
}

fn deliver(participant: &mut Participant, event: Event, dispatch: &mut Dispatch) {
    let Some(mailbox) = participant.mailbox.as_ref() else {
        return;
    };

    match try_deliver(mailbox, event) {
        Delivered::Queued => dispatch.delivered += 1,
        Delivered::Full => {
            warn!(user = %participant.user.name, "Mailbox full, disconnecting client");
            participant.mailbox = None;
            dispatch.evicted.push(participant.user.clone());
        }
        Delivered::Closed => {
            trace!(user = %participant.user.name, "Mailbox closed by transport");
        }
    }
}
