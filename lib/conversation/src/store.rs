//! In-memory transcript store.
//!
//! Each room gets a slot holding its session state and a turn lock. The
//! room table lock is only ever held for map lookups and is never held
//! across an `.await`, so rooms never wait on each other. The turn lock
//! serializes whole conversation cycles within one room; session state
//! sits behind a short synchronous lock so readers never wait for an
//! in-flight provider call.

use crate::error::StoreError;
use crate::message::ChatTurn;
use crate::session::{SessionState, Transcript};
use aichat_core::RoomId;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tokio::sync::{Mutex as TurnLock, OwnedMutexGuard};
use tracing::debug;

#[derive(Debug, Default)]
struct RoomSlot {
    turn: Arc<TurnLock<()>>,
    state: Mutex<SessionState>,
}

impl RoomSlot {
    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Mapping from room to transcript, shared by all request handlers.
#[derive(Debug, Default)]
pub struct TranscriptStore {
    rooms: RwLock<HashMap<RoomId, Arc<RoomSlot>>>,
    active: AtomicUsize,
    max_rooms: Option<usize>,
}

impl TranscriptStore {
    /// Creates an unbounded store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that refuses new sessions beyond `max_rooms`.
    #[must_use]
    pub fn with_max_rooms(max_rooms: usize) -> Self {
        Self {
            max_rooms: Some(max_rooms),
            ..Self::default()
        }
    }

    /// Returns the configured room bound.
    #[must_use]
    pub fn max_rooms(&self) -> Option<usize> {
        self.max_rooms
    }

    /// Returns the number of active transcripts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Returns true if no room has an active transcript.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if a transcript exists for the room.
    #[must_use]
    pub fn exists(&self, room_id: RoomId) -> bool {
        self.slot(room_id)
            .is_some_and(|slot| slot.state().is_active())
    }

    /// Returns a snapshot of the room's transcript.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the room has no transcript.
    pub fn get(&self, room_id: RoomId) -> Result<Transcript, StoreError> {
        self.slot(room_id)
            .and_then(|slot| slot.state().transcript().cloned())
            .ok_or(StoreError::NotFound { room_id })
    }

    /// Creates an empty transcript for the room.
    ///
    /// Waits for any conversation cycle in flight on the same room.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AlreadyExists` if the room already has a
    /// transcript, or `StoreError::CapacityExceeded` if the bound is hit.
    pub async fn create(&self, room_id: RoomId) -> Result<(), StoreError> {
        let mut room = self.lock_room(room_id).await;
        room.start()?;
        room.keep_open();
        Ok(())
    }

    /// Removes the room's transcript. Returns false if there was none.
    ///
    /// Waits for any conversation cycle in flight on the same room.
    pub async fn remove(&self, room_id: RoomId) -> bool {
        self.lock_room(room_id).await.end()
    }

    /// Returns every transcript, ordered by room ID.
    #[must_use]
    pub fn list_all(&self) -> Vec<(RoomId, Transcript)> {
        let mut out: Vec<_> = self
            .slots()
            .into_iter()
            .filter_map(|(room_id, slot)| {
                slot.state()
                    .transcript()
                    .cloned()
                    .map(|transcript| (room_id, transcript))
            })
            .collect();
        out.sort_by_key(|(room_id, _)| *room_id);
        out
    }

    /// Takes exclusive access to a room for a whole conversation cycle.
    ///
    /// Requests for the same room queue up here. If the session a waiter
    /// queued on was ended in the meantime, the waiter starts over on a
    /// fresh slot so it never writes into a retired one.
    pub async fn lock_room(&self, room_id: RoomId) -> RoomGuard<'_> {
        loop {
            let slot = self.slot_or_insert(room_id);
            let turn = Arc::clone(&slot.turn).lock_owned().await;
            if self.is_registered(room_id, &slot) {
                return RoomGuard {
                    store: self,
                    room_id,
                    slot,
                    opened: false,
                    _turn: turn,
                };
            }
            debug!(%room_id, "room slot retired while waiting, retrying");
        }
    }

    /// Removes transcripts with no activity since `cutoff`.
    ///
    /// Rooms with a conversation cycle in flight are skipped; they are
    /// by definition not idle.
    pub fn evict_idle(&self, cutoff: DateTime<Utc>) -> Vec<RoomId> {
        let mut evicted = Vec::new();
        for (room_id, slot) in self.slots() {
            let Ok(_turn) = slot.turn.try_lock() else {
                continue;
            };
            let mut state = slot.state();
            let idle = state
                .transcript()
                .is_some_and(|transcript| transcript.idle_since(cutoff));
            if idle {
                *state = SessionState::Inactive;
                drop(state);
                self.active.fetch_sub(1, Ordering::AcqRel);
                self.unregister(room_id, &slot);
                evicted.push(room_id);
            }
        }
        evicted.sort();
        evicted
    }

    fn rooms_read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<RoomId, Arc<RoomSlot>>> {
        self.rooms.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn rooms_write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<RoomId, Arc<RoomSlot>>> {
        self.rooms.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn slot(&self, room_id: RoomId) -> Option<Arc<RoomSlot>> {
        self.rooms_read().get(&room_id).cloned()
    }

    fn slots(&self) -> Vec<(RoomId, Arc<RoomSlot>)> {
        self.rooms_read()
            .iter()
            .map(|(room_id, slot)| (*room_id, Arc::clone(slot)))
            .collect()
    }

    fn slot_or_insert(&self, room_id: RoomId) -> Arc<RoomSlot> {
        if let Some(slot) = self.slot(room_id) {
            return slot;
        }
        Arc::clone(self.rooms_write().entry(room_id).or_default())
    }

    fn is_registered(&self, room_id: RoomId, slot: &Arc<RoomSlot>) -> bool {
        self.rooms_read()
            .get(&room_id)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
    }

    fn unregister(&self, room_id: RoomId, slot: &Arc<RoomSlot>) {
        let mut rooms = self.rooms_write();
        if rooms
            .get(&room_id)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
        {
            rooms.remove(&room_id);
        }
    }

    fn reserve(&self) -> Result<(), StoreError> {
        match self.max_rooms {
            None => {
                self.active.fetch_add(1, Ordering::AcqRel);
                Ok(())
            }
            Some(max_rooms) => self
                .active
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                    (n < max_rooms).then_some(n + 1)
                })
                .map(|_| ())
                .map_err(|_| StoreError::CapacityExceeded { max_rooms }),
        }
    }
}

/// Exclusive access to one room, held for a conversation cycle.
///
/// Dropping the guard releases the room. A room left without a session
/// is removed from the table at that point, and a session this guard
/// opened but never recorded an exchange into is ended first. That covers
/// a cycle cancelled mid-call, which never reaches its own rollback.
#[derive(Debug)]
pub struct RoomGuard<'a> {
    store: &'a TranscriptStore,
    room_id: RoomId,
    slot: Arc<RoomSlot>,
    opened: bool,
    _turn: OwnedMutexGuard<()>,
}

impl RoomGuard<'_> {
    /// Returns the room this guard holds.
    #[must_use]
    pub fn room_id(&self) -> RoomId {
        self.room_id
    }

    /// Returns true if the room has a running session.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.slot.state().is_active()
    }

    /// Returns a snapshot of the running session's transcript.
    #[must_use]
    pub fn transcript(&self) -> Option<Transcript> {
        self.slot.state().transcript().cloned()
    }

    /// Opens a session with an empty transcript.
    ///
    /// The session is ended again when the guard drops, unless an exchange
    /// is recorded or [`keep_open`](Self::keep_open) is called first.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AlreadyExists` if a session is running, or
    /// `StoreError::CapacityExceeded` if the store is full.
    pub fn start(&mut self) -> Result<(), StoreError> {
        let mut state = self.slot.state();
        if state.is_active() {
            return Err(StoreError::AlreadyExists {
                room_id: self.room_id,
            });
        }
        self.store.reserve()?;
        *state = SessionState::Active(Transcript::new());
        self.opened = true;
        Ok(())
    }

    /// Keeps a session opened by this guard even if no exchange is
    /// recorded before the guard drops.
    pub fn keep_open(&mut self) {
        self.opened = false;
    }

    /// Appends a user turn and the assistant's reply in one step.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if no session is running.
    pub fn record_exchange(&mut self, user: ChatTurn, assistant: ChatTurn) -> Result<(), StoreError> {
        let mut state = self.slot.state();
        let transcript = state.transcript_mut().ok_or(StoreError::NotFound {
            room_id: self.room_id,
        })?;
        transcript.push_exchange(user, assistant);
        self.opened = false;
        Ok(())
    }

    /// Ends the session, dropping its whole transcript. Returns false if
    /// no session was running.
    pub fn end(&mut self) -> bool {
        self.opened = false;
        let ended = {
            let mut state = self.slot.state();
            let was_active = state.is_active();
            *state = SessionState::Inactive;
            was_active
        };
        if ended {
            self.store.active.fetch_sub(1, Ordering::AcqRel);
        }
        self.store.unregister(self.room_id, &self.slot);
        ended
    }
}

impl Drop for RoomGuard<'_> {
    fn drop(&mut self) {
        if self.opened {
            debug!(room_id = %self.room_id, "session opened without a reply, ending it");
            self.end();
        } else if !self.slot.state().is_active() {
            self.store.unregister(self.room_id, &self.slot);
        }
    }
}
