//! The live collaboration service.
//!
//! [`LiveService`] owns the registry of rooms and runs every command against
//! it: mutate the room, then notify the affected participants in a fixed
//! order while still holding the room lock.

use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::time::Duration;

use sizeit_protocol::EventKind;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::clock::{Clock, TokioClock};
use crate::error::LiveError;
use crate::mailbox::{mailbox, EventReceiver, EventSender, DEFAULT_MAILBOX_CAPACITY};
use crate::model::{bucket_history, SizingType, Ticket, User};
use crate::notifier::{Audience, Delivery, Notifier};
use crate::registry::{self, Registry, Rooms};
use crate::render::Renderer;
use crate::room::{ConnectionId, Room, RoomSnapshot};
use crate::storage::Storage;
use crate::tasks;

/// Service configuration.
#[derive(Debug, Clone)]
pub struct LiveConfig {
    /// Time a participant stays active after leaving.
    pub grace_period: Duration,
    /// Period of the empty-room sweep.
    pub sweep_interval: Duration,
    /// Capacity of each client mailbox. A join queues four events for the
    /// joiner, so anything lower evicts clients that do not drain at once.
    pub mailbox_capacity: usize,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(5),
            sweep_interval: Duration::from_secs(60 * 60),
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
        }
    }
}

pub(crate) struct Inner {
    config: LiveConfig,
    registry: Registry,
    storage: Arc<dyn Storage>,
    notifier: Notifier,
    clock: Arc<dyn Clock>,
    shutdown: CancellationToken,
    room_count: watch::Sender<usize>,
}

impl Inner {
    /// Notify, then treat every evicted client as having left.
    fn dispatch(
        self: &Arc<Self>,
        session_id: &str,
        room: &mut Room,
        kind: EventKind,
        audience: Audience<'_>,
        delivery: Delivery,
    ) -> Result<(), LiveError> {
        let dispatch = self
            .notifier
            .notify(session_id, room, kind, audience, delivery)?;

        for user in &dispatch.evicted {
            self.schedule_expiry(session_id, room, user);
        }

        Ok(())
    }

    /// Start the grace period of `user`, replacing any running timer.
    fn schedule_expiry(self: &Arc<Self>, session_id: &str, room: &mut Room, user: &User) -> bool {
        let grace = self.config.grace_period;
        let token = self.shutdown.child_token();

        if !room.schedule_expiry(user, self.clock.now() + grace, token.clone()) {
            return false;
        }

        tasks::spawn_reaper(Arc::clone(self), session_id.to_string(), grace, token);
        true
    }

    /// Flip expired participants of `session_id` to inactive.
    pub(crate) async fn reap(self: &Arc<Self>, session_id: &str) -> Result<usize, LiveError> {
        let rooms = self.registry.read().await;
        // Swept in the meantime.
        let Some(room) = rooms.get(session_id) else {
            return Ok(0);
        };
        let mut room = room.lock().await;

        let reaped = room.reap_expired(self.clock.now());
        if reaped > 0 {
            self.dispatch(
                session_id,
                &mut room,
                EventKind::Results,
                Audience::AllActive,
                Delivery::Broadcast,
            )?;
        }

        Ok(reaped)
    }

    /// Remove every room nobody is active in.
    pub(crate) async fn sweep(&self) -> usize {
        let mut rooms = self.registry.write().await;
        let removed = registry::remove_empty(&mut rooms);
        let remaining = rooms.len();
        self.room_count.send_replace(remaining);
        drop(rooms);

        for session_id in &removed {
            info!(session = %session_id, "Room removed");
        }
        debug!(removed = removed.len(), remaining, "Swept empty rooms");

        removed.len()
    }

    async fn load_history(&self, team: &str, sizing_type: SizingType) -> Result<Vec<Ticket>, LiveError> {
        let tickets = self
            .storage
            .history(team, sizing_type)
            .await
            .map_err(LiveError::Storage)?;
        Ok(bucket_history(tickets, sizing_type))
    }

    async fn new_room(&self, team: &str) -> Result<Room, LiveError> {
        let history = self.load_history(team, SizingType::default()).await?;
        Ok(Room::new(team, history))
    }

    /// Register `room` unless another task got there first.
    fn insert_room(&self, rooms: &mut Rooms, session_id: &str, room: Room) -> bool {
        match rooms.entry(session_id.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                entry.insert(Mutex::new(room));
                self.room_count.send_replace(rooms.len());
                true
            }
        }
    }

    async fn persist_ticket(&self, session_id: &str, room: &mut Room) -> Result<(), LiveError> {
        if room.ticket.is_new() {
            let id = self
                .storage
                .create_ticket(session_id, &room.ticket)
                .await
                .map_err(LiveError::Storage)?;
            room.ticket.id = id;
            debug!(session = %session_id, ticket = id, "Ticket created");
        } else {
            self.storage
                .update_ticket(&room.ticket)
                .await
                .map_err(LiveError::Storage)?;
            debug!(session = %session_id, ticket = room.ticket.id, "Ticket updated");
        }
        Ok(())
    }
}

/// Handle on the live collaboration engine.
///
/// Cloning is cheap and every clone drives the same rooms.
#[derive(Clone)]
pub struct LiveService {
    inner: Arc<Inner>,
}

impl LiveService {
    /// Create the service on tokio's clock and start its sweeper.
    ///
    /// Cancelling `shutdown` stops the sweeper and every pending expiry
    /// timer.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    #[must_use]
    pub fn new(
        config: LiveConfig,
        storage: Arc<dyn Storage>,
        renderer: Arc<dyn Renderer>,
        shutdown: CancellationToken,
    ) -> Self {
        Self::with_clock(config, storage, renderer, Arc::new(TokioClock), shutdown)
    }

    /// Create the service with a custom clock.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    #[must_use]
    pub fn with_clock(
        config: LiveConfig,
        storage: Arc<dyn Storage>,
        renderer: Arc<dyn Renderer>,
        clock: Arc<dyn Clock>,
        shutdown: CancellationToken,
    ) -> Self {
        info!(
            grace_period = ?config.grace_period,
            sweep_interval = ?config.sweep_interval,
            mailbox_capacity = config.mailbox_capacity,
            "Starting live service"
        );

        let sweep_interval = config.sweep_interval;
        let inner = Arc::new(Inner {
            config,
            registry: Registry::new(),
            storage,
            notifier: Notifier::new(renderer),
            clock,
            shutdown,
            room_count: watch::Sender::new(0),
        });

        tasks::spawn_sweeper(
            Arc::downgrade(&inner),
            sweep_interval,
            inner.shutdown.clone(),
        );

        Self { inner }
    }

    /// A fresh mailbox sized from the configuration.
    #[must_use]
    pub fn mailbox(&self) -> (EventSender, EventReceiver) {
        mailbox(self.inner.config.mailbox_capacity)
    }

    /// Number of live rooms, updated whenever a room is added or swept.
    #[must_use]
    pub fn watch_room_count(&self) -> watch::Receiver<usize> {
        self.inner.room_count.subscribe()
    }

    /// Make sure a room exists for `session_id`.
    ///
    /// # Errors
    ///
    /// Returns [`LiveError::Storage`] if the history cannot be loaded.
    pub async fn create(&self, session_id: &str, team: &str) -> Result<(), LiveError> {
        if self.inner.registry.read().await.contains_key(session_id) {
            return Ok(());
        }

        let room = self.inner.new_room(team).await?;
        let mut rooms = self.inner.registry.write().await;
        if self.inner.insert_room(&mut rooms, session_id, room) {
            info!(session = %session_id, team = %team, "Room created");
        }
        Ok(())
    }

    /// Join `user` to the room of `session_id`, creating the room on first
    /// join. Events for the user are queued on `mailbox`.
    ///
    /// A user already in the room is reconnected: its previous mailbox is
    /// closed, any pending expiry is cancelled and its pick is kept.
    ///
    /// Returns the id of this connection, to be handed back to
    /// [`leave_connection`](Self::leave_connection).
    ///
    /// # Errors
    ///
    /// Returns [`LiveError::NotFound`] if storage does not know the session.
    pub async fn join(
        &self,
        session_id: &str,
        user: User,
        mailbox: EventSender,
    ) -> Result<ConnectionId, LiveError> {
        let inner = &self.inner;

        let mut rooms = inner.registry.read().await;
        if !rooms.contains_key(session_id) {
            drop(rooms);
            let record = inner
                .storage
                .session(session_id)
                .await
                .map_err(LiveError::Storage)?
                .ok_or_else(|| LiveError::not_found(session_id))?;
            let room = inner.new_room(&record.team).await?;

            let mut writer = inner.registry.write().await;
            if inner.insert_room(&mut writer, session_id, room) {
                info!(session = %session_id, team = %record.team, "Room created on join");
            }
            rooms = writer.downgrade();
        }

        let mut room = registry::room(&rooms, session_id)?.lock().await;
        let reconnected = room.join(user.clone(), mailbox);
        let connection = room
            .participant(&user)
            .map_or(0, |participant| participant.connection());
        info!(session = %session_id, user = %user.name, connection, reconnected, "Participant joined");

        let me = Audience::Only(&user);
        inner.dispatch(session_id, &mut room, EventKind::Ticket, me, Delivery::Broadcast)?;
        inner.dispatch(session_id, &mut room, EventKind::Tabs, me, Delivery::PerRecipient)?;
        inner.dispatch(session_id, &mut room, EventKind::History, me, Delivery::Broadcast)?;
        inner.dispatch(
            session_id,
            &mut room,
            EventKind::Results,
            Audience::AllActive,
            Delivery::Broadcast,
        )?;
        Ok(connection)
    }

    /// Record that `user` disconnected. It stays in the room and turns
    /// inactive once the grace period elapses without a rejoin.
    ///
    /// # Errors
    ///
    /// Returns [`LiveError::NotFound`] for an unknown session.
    pub async fn leave(&self, session_id: &str, user: &User) -> Result<(), LiveError> {
        self.leave_if(session_id, user, None).await
    }

    /// Like [`leave`](Self::leave), for the connection returned by
    /// [`join`](Self::join). Ignored once `user` joined again, so a late
    /// leave from a replaced transport cannot touch the newer one.
    ///
    /// # Errors
    ///
    /// Returns [`LiveError::NotFound`] for an unknown session.
    pub async fn leave_connection(
        &self,
        session_id: &str,
        user: &User,
        connection: ConnectionId,
    ) -> Result<(), LiveError> {
        self.leave_if(session_id, user, Some(connection)).await
    }

    async fn leave_if(
        &self,
        session_id: &str,
        user: &User,
        connection: Option<ConnectionId>,
    ) -> Result<(), LiveError> {
        let rooms = self.inner.registry.read().await;
        let mut room = registry::room(&rooms, session_id)?.lock().await;

        if let Some(connection) = connection {
            if !room.is_current(user, connection) {
                debug!(session = %session_id, user = %user.name, connection, "Ignoring leave from a replaced connection");
                return Ok(());
            }
        }

        if self.inner.schedule_expiry(session_id, &mut room, user) {
            room.disconnect(user);
            info!(session = %session_id, user = %user.name, "Participant left");
        } else {
            trace!(session = %session_id, user = %user.name, "Leave from unknown participant");
        }

        Ok(())
    }

    /// Update the shared ticket and show it to everyone else.
    ///
    /// # Errors
    ///
    /// Returns [`LiveError::NotFound`] for an unknown session.
    pub async fn save_ticket(
        &self,
        session_id: &str,
        summary: &str,
        url: &str,
        user: &User,
    ) -> Result<(), LiveError> {
        let rooms = self.inner.registry.read().await;
        let mut room = registry::room(&rooms, session_id)?.lock().await;

        room.save_ticket(summary, url);
        debug!(session = %session_id, user = %user.name, "Ticket saved");

        self.inner.dispatch(
            session_id,
            &mut room,
            EventKind::Ticket,
            Audience::Except(user),
            Delivery::Broadcast,
        )
    }

    /// Size the ticket with the pick of `user`, persist it and refresh the
    /// history. Does nothing while the ticket has no summary or value.
    ///
    /// # Errors
    ///
    /// Returns [`LiveError::NotFound`] for an unknown session and
    /// [`LiveError::Storage`] if persisting or reloading fails.
    pub async fn add_ticket_to_history(&self, session_id: &str, user: &User) -> Result<(), LiveError> {
        let rooms = self.inner.registry.read().await;
        let mut room = registry::room(&rooms, session_id)?.lock().await;

        room.pull_sizing_into_ticket(user);
        if !room.ticket.is_valid() {
            debug!(session = %session_id, "Ticket not sized yet, skipping history");
            return Ok(());
        }

        self.inner.persist_ticket(session_id, &mut room).await?;

        let sizing_type = room.ticket.sizing_type;
        let history = self.inner.load_history(room.team(), sizing_type).await?;
        room.set_history(history);

        self.inner.dispatch(
            session_id,
            &mut room,
            EventKind::History,
            Audience::AllActive,
            Delivery::Broadcast,
        )
    }

    /// Show or hide the picks. Returns the new visibility.
    ///
    /// # Errors
    ///
    /// Returns [`LiveError::NotFound`] for an unknown session.
    pub async fn toggle_sizings(&self, session_id: &str) -> Result<bool, LiveError> {
        let rooms = self.inner.registry.read().await;
        let mut room = registry::room(&rooms, session_id)?.lock().await;

        let visible = room.toggle_results();
        debug!(session = %session_id, visible, "Results toggled");

        self.inner.dispatch(
            session_id,
            &mut room,
            EventKind::Results,
            Audience::AllActive,
            Delivery::Broadcast,
        )?;
        Ok(visible)
    }

    /// Change the estimation scale, clearing every pick.
    ///
    /// The history of the new scale is loaded first, so a storage failure
    /// leaves the room untouched.
    ///
    /// # Errors
    ///
    /// Returns [`LiveError::NotFound`] for an unknown session and
    /// [`LiveError::Storage`] if the history cannot be loaded.
    pub async fn switch_sizing_type(&self, session_id: &str, sizing_type: SizingType) -> Result<(), LiveError> {
        let rooms = self.inner.registry.read().await;
        let mut room = registry::room(&rooms, session_id)?.lock().await;

        let history = self.inner.load_history(room.team(), sizing_type).await?;
        room.switch_sizing_type(sizing_type, history);
        debug!(session = %session_id, %sizing_type, "Sizing type switched");

        let all = Audience::AllActive;
        self.inner.dispatch(session_id, &mut room, EventKind::Tabs, all, Delivery::PerRecipient)?;
        self.inner.dispatch(session_id, &mut room, EventKind::Results, all, Delivery::Broadcast)?;
        self.inner.dispatch(session_id, &mut room, EventKind::History, all, Delivery::Broadcast)
    }

    /// Record the pick of `user`.
    ///
    /// # Errors
    ///
    /// Returns [`LiveError::NotFound`] for an unknown session.
    pub async fn set_sizing_value(&self, session_id: &str, value: &str, user: &User) -> Result<(), LiveError> {
        let rooms = self.inner.registry.read().await;
        let mut room = registry::room(&rooms, session_id)?.lock().await;

        if !room.set_sizing(user, value) {
            trace!(session = %session_id, user = %user.name, "Sizing from unknown participant");
        }

        self.inner.dispatch(
            session_id,
            &mut room,
            EventKind::Tabs,
            Audience::Only(user),
            Delivery::PerRecipient,
        )?;
        self.inner.dispatch(
            session_id,
            &mut room,
            EventKind::Results,
            Audience::AllActive,
            Delivery::Broadcast,
        )
    }

    /// Start a new round on the same scale.
    ///
    /// # Errors
    ///
    /// Returns [`LiveError::NotFound`] for an unknown session.
    pub async fn reset_session(&self, session_id: &str) -> Result<(), LiveError> {
        let rooms = self.inner.registry.read().await;
        let mut room = registry::room(&rooms, session_id)?.lock().await;

        room.reset();
        debug!(session = %session_id, "Session reset");

        let all = Audience::AllActive;
        self.inner.dispatch(session_id, &mut room, EventKind::Ticket, all, Delivery::Broadcast)?;
        self.inner.dispatch(session_id, &mut room, EventKind::Tabs, all, Delivery::PerRecipient)?;
        self.inner.dispatch(session_id, &mut room, EventKind::Results, all, Delivery::Broadcast)
    }

    /// Owned copy of the room of `session_id`.
    ///
    /// # Errors
    ///
    /// Returns [`LiveError::NotFound`] for an unknown session.
    pub async fn snapshot(&self, session_id: &str) -> Result<RoomSnapshot, LiveError> {
        let rooms = self.inner.registry.read().await;
        let room = registry::room(&rooms, session_id)?.lock().await;
        Ok(room.snapshot())
    }

    /// Number of live rooms.
    pub async fn room_count(&self) -> usize {
        self.inner.registry.read().await.len()
    }

    /// Run a sweep now. Returns how many rooms were removed.
    pub async fn sweep_empty_rooms(&self) -> usize {
        self.inner.sweep().await
    }
}
