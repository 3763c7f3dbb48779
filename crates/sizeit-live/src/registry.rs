//! Session id to room mapping.
//!
//! Locking contract:
//!
//! - The registry lock guards membership. It is write-locked only to insert a
//!   room (first join, explicit create) or to remove rooms (sweeper).
//! - Nothing awaits storage under the write lock. A new room is loaded first,
//!   then inserted unless another task inserted one meanwhile.
//! - Commands that await storage (archiving, switching the scale) do so under
//!   the read lock and their room mutex. A writer queued behind them waits,
//!   and so do readers queued behind that writer, so storage latency bounds
//!   how long a membership change can take.
//! - Each room's mutex guards its content and is only taken while the
//!   registry lock is held, read side, by the same task.
//! - Content commands therefore run concurrently across rooms and are fully
//!   serialized within a room, notification included.
//!
//! Rooms are stored by value, so no handle to a room outlives the registry
//! guard it was reached through, and a write guard implies every room mutex
//! is free.

use std::collections::HashMap;

use tokio::sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::LiveError;
use crate::model::SessionId;
use crate::room::Room;

/// Rooms by session id.
pub(crate) type Rooms = HashMap<SessionId, Mutex<Room>>;

#[derive(Debug, Default)]
pub(crate) struct Registry {
    rooms: RwLock<Rooms>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Shared access for content commands.
    pub(crate) async fn read(&self) -> RwLockReadGuard<'_, Rooms> {
        self.rooms.read().await
    }

    /// Exclusive access for membership changes.
    pub(crate) async fn write(&self) -> RwLockWriteGuard<'_, Rooms> {
        self.rooms.write().await
    }
}

/// Look up the room of `session_id`.
pub(crate) fn room<'a>(rooms: &'a Rooms, session_id: &str) -> Result<&'a Mutex<Room>, LiveError> {
    rooms
        .get(session_id)
        .ok_or_else(|| LiveError::not_found(session_id))
}

/// Remove every room whose participants are all inactive.
///
/// Returns the removed session ids.
pub(crate) fn remove_empty(rooms: &mut Rooms) -> Vec<SessionId> {
    let mut removed = Vec::new();
    rooms.retain(|session_id, room| {
        // The write guard makes every room mutex uncontended.
        let keep = !room.get_mut().is_empty();
        if !keep {
            removed.push(session_id.clone());
        }
        keep
    });
    removed
}
