//! The room coordinator.
//!
//! [`Coordinator`] owns every live room and is the only way to change one.
//! Each room sits behind its own mutex inside a registry map; the registry
//! lock is held just long enough to find, insert or remove an entry, so
//! rooms proceed in parallel while operations on one room are serialized.
//!
//! Every accepted operation emits [`RoomEvent`]s. They are numbered inside
//! the room's critical section and published to the [`EventBroadcaster`]
//! after the lock is released.
//!
//! # Example
//!
//! ```rust
//! use confessions_server::config::Config;
//! use confessions_server::coordinator::Coordinator;
//! use confessions_server::types::{Identity, Phase, PlayerId, RoomConfig};
//!
//! let coordinator = Coordinator::new(Config::default());
//! let room_id = coordinator
//!     .create_room(RoomConfig::default().with_players(2, 4))
//!     .unwrap();
//!
//! coordinator.join_room(room_id, Identity::new("alice", "Alice")).unwrap();
//! coordinator.join_room(room_id, Identity::new("bob", "Bob")).unwrap();
//! coordinator.start_round(room_id, &PlayerId::from("alice")).unwrap();
//!
//! let view = coordinator.room_view(room_id, &PlayerId::from("bob")).unwrap();
//! assert_eq!(view.phase, Phase::Collecting);
//! ```

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::broadcast::{spawn_sink, EventBroadcaster, RoomSubscription, SubscriberFilter};
use crate::config::Config;
use crate::error::{GameError, ServerError};
use crate::identity::IdentityProvider;
use crate::room::{Outcome, Room};
use crate::scoring::{ScoringPolicy, StandardScoring};
use crate::store::SnapshotStore;
use crate::types::{
    Author, Identity, MemberView, MessageId, Phase, PlayerId, RoomConfig, RoomEvent, RoomId,
    RoomView, Standing,
};

/// A registered room plus its persistence bookkeeping.
#[derive(Debug)]
struct RoomEntry {
    room: Room,
    /// Revision of the last snapshot written, if any.
    saved_revision: Option<u64>,
}

impl RoomEntry {
    fn is_dirty(&self) -> bool {
        self.saved_revision != Some(self.room.revision())
    }
}

type SharedEntry = Arc<Mutex<RoomEntry>>;

#[derive(Debug)]
struct Inner {
    rooms: RwLock<HashMap<RoomId, SharedEntry>>,
    /// Rooms removed from the registry whose snapshots still need deleting.
    tombstones: Mutex<HashSet<RoomId>>,
    broadcaster: EventBroadcaster,
    scoring: Arc<dyn ScoringPolicy>,
    config: Config,
}

/// Thread-safe room coordinator.
///
/// Cloning is cheap; clones share the same registry.
#[derive(Debug, Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

impl Coordinator {
    /// Creates a coordinator with the default scoring policy.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self::with_scoring(config, Arc::new(StandardScoring::default()))
    }

    /// Creates a coordinator that scores rounds with `scoring`.
    #[must_use]
    pub fn with_scoring(config: Config, scoring: Arc<dyn ScoringPolicy>) -> Self {
        let broadcaster = EventBroadcaster::with_capacity(config.event_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                rooms: RwLock::new(HashMap::new()),
                tombstones: Mutex::new(HashSet::new()),
                broadcaster,
                scoring,
                config,
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn broadcaster(&self) -> &EventBroadcaster {
        &self.inner.broadcaster
    }

    /// Number of live rooms.
    pub fn room_count(&self) -> usize {
        self.inner.rooms.read().len()
    }

    pub fn room_ids(&self) -> Vec<RoomId> {
        self.inner.rooms.read().keys().copied().collect()
    }

    // ------------------------------------------------------------------
    // Room operations
    // ------------------------------------------------------------------

    /// Creates an empty room. The first member to join becomes host.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::InvalidConfig`] for an inconsistent `config`.
    pub fn create_room(&self, config: RoomConfig) -> Result<RoomId, GameError> {
        let room_id = RoomId::new();
        let room = Room::new(room_id, config, Utc::now())?;
        self.insert(room, None);
        info!(room_id = %room_id, "Room created");
        Ok(room_id)
    }

    pub fn join_room(&self, room_id: RoomId, identity: Identity) -> Result<MemberView, GameError> {
        let player_id = identity.player_id.clone();
        let member = self.apply(room_id, "join_room", |room, _, now| {
            room.join(identity, now)
        })?;
        debug!(room_id = %room_id, player_id = %player_id, "Member joined");
        Ok(member)
    }

    /// Verifies `token` with `provider`, then joins as the resulting identity.
    pub async fn join_with_token(
        &self,
        room_id: RoomId,
        provider: &dyn IdentityProvider,
        token: &str,
    ) -> Result<MemberView, ServerError> {
        let identity = provider.verify_identity(token).await?;
        Ok(self.join_room(room_id, identity)?)
    }

    pub fn start_round(&self, room_id: RoomId, host: &PlayerId) -> Result<u32, GameError> {
        let round = self.apply(room_id, "start_round", |room, _, _| room.start_round(host))?;
        debug!(room_id = %room_id, round, "Round started");
        Ok(round)
    }

    pub fn submit_message(
        &self,
        room_id: RoomId,
        player_id: &PlayerId,
        content: impl Into<String>,
    ) -> Result<MessageId, GameError> {
        let content = content.into();
        self.apply(room_id, "submit_message", |room, scoring, now| {
            room.submit_message(player_id, content, scoring, now)
        })
    }

    /// Adds the house decoy for the current round. Host only.
    pub fn inject_decoy(
        &self,
        room_id: RoomId,
        host: &PlayerId,
        content: impl Into<String>,
    ) -> Result<MessageId, GameError> {
        let content = content.into();
        self.apply(room_id, "inject_decoy", |room, _, now| {
            room.inject_decoy(host, content, now)
        })
    }

    pub fn submit_guess(
        &self,
        room_id: RoomId,
        player_id: &PlayerId,
        message_id: MessageId,
        guessed_author: Author,
    ) -> Result<(), GameError> {
        self.apply(room_id, "submit_guess", |room, scoring, now| {
            room.submit_guess(player_id, message_id, guessed_author, scoring, now)
        })
    }

    pub fn leave_room(&self, room_id: RoomId, player_id: &PlayerId) -> Result<(), GameError> {
        self.apply(room_id, "leave_room", |room, scoring, now| {
            room.leave(player_id, scoring, now)
        })?;
        debug!(room_id = %room_id, player_id = %player_id, "Member left");
        Ok(())
    }

    pub fn set_ready(
        &self,
        room_id: RoomId,
        player_id: &PlayerId,
        ready: bool,
    ) -> Result<(), GameError> {
        self.apply(room_id, "set_ready", |room, _, _| room.set_ready(player_id, ready))
    }

    /// Forfeits every outstanding obligation of the current phase.
    ///
    /// This is the hook for an external round timer. Returns how many
    /// obligations were forfeited.
    pub fn forfeit_outstanding(&self, room_id: RoomId) -> Result<usize, GameError> {
        let forfeited = self.apply(room_id, "forfeit_outstanding", |room, scoring, _| {
            room.forfeit_outstanding(scoring)
        })?;
        if forfeited > 0 {
            info!(room_id = %room_id, forfeited, "Outstanding obligations forfeited");
        }
        Ok(forfeited)
    }

    /// Closes the room and returns the final standings. Host only.
    pub fn close_room(&self, room_id: RoomId, host: &PlayerId) -> Result<Vec<Standing>, GameError> {
        let standings = self.apply(room_id, "close_room", |room, _, _| room.close(host))?;
        info!(room_id = %room_id, "Room closed");
        Ok(standings)
    }

    /// Read-only view for reconnecting clients.
    pub fn room_view(&self, room_id: RoomId, viewer: &PlayerId) -> Result<RoomView, GameError> {
        let entry = self.entry(room_id)?;
        let guard = lock_live(&entry, room_id)?;
        guard.room.view(viewer)
    }

    pub fn standings(&self, room_id: RoomId) -> Result<Vec<Standing>, GameError> {
        let entry = self.entry(room_id)?;
        let guard = lock_live(&entry, room_id)?;
        Ok(guard.room.standings())
    }

    // ------------------------------------------------------------------
    // Subscriptions
    // ------------------------------------------------------------------

    /// Subscribes to the events of one room.
    pub fn subscribe(&self, room_id: RoomId) -> RoomSubscription {
        self.inner.broadcaster.subscribe_room(room_id)
    }

    /// Calls `handler` for every event of `room_id` on a background task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn on_event<F>(&self, room_id: RoomId, handler: F) -> JoinHandle<()>
    where
        F: Fn(RoomEvent) + Send + Sync + 'static,
    {
        spawn_sink(
            &self.inner.broadcaster,
            SubscriberFilter::new().with_room(room_id),
            Arc::new(handler),
        )
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    /// Clones the room's full state.
    pub fn snapshot_room(&self, room_id: RoomId) -> Result<Room, GameError> {
        let entry = self.entry(room_id)?;
        let guard = lock_live(&entry, room_id)?;
        Ok(guard.room.clone())
    }

    /// Writes one room's snapshot to `store`.
    pub async fn persist_room(
        &self,
        room_id: RoomId,
        store: &dyn SnapshotStore,
    ) -> Result<(), ServerError> {
        let entry = self.entry(room_id)?;
        let snapshot = lock_live(&entry, room_id)?.room.clone();
        store.save_room_snapshot(&snapshot).await?;
        mark_saved(&entry, snapshot.revision());
        debug!(room_id = %room_id, revision = snapshot.revision(), "Room persisted");
        Ok(())
    }

    /// Writes every room changed since its last snapshot and deletes the
    /// snapshots of removed rooms. Returns the number of rooms written.
    ///
    /// Failures are logged and retried on the next call.
    pub async fn persist_dirty(&self, store: &dyn SnapshotStore) -> usize {
        let entries: Vec<SharedEntry> = self.inner.rooms.read().values().cloned().collect();

        let mut saved = 0;
        for entry in entries {
            let snapshot = {
                let guard = entry.lock();
                if !guard.is_dirty() || guard.room.phase() == Phase::Closed {
                    continue;
                }
                guard.room.clone()
            };
            match store.save_room_snapshot(&snapshot).await {
                Ok(()) => {
                    mark_saved(&entry, snapshot.revision());
                    saved += 1;
                }
                Err(e) => {
                    warn!(room_id = %snapshot.id(), error = %e, "Failed to persist room snapshot");
                }
            }
        }

        let tombstones: Vec<RoomId> = self.inner.tombstones.lock().iter().copied().collect();
        for room_id in tombstones {
            match store.delete_room_snapshot(room_id).await {
                Ok(()) => {
                    self.inner.tombstones.lock().remove(&room_id);
                }
                Err(e) => {
                    warn!(room_id = %room_id, error = %e, "Failed to delete room snapshot");
                }
            }
        }

        if saved > 0 {
            debug!(saved, "Persisted dirty rooms");
        }
        saved
    }

    /// Loads a room from `store` and registers it.
    ///
    /// Every member comes back disconnected; nothing is forfeited, so they
    /// can rejoin and continue the round in progress. A room that is already
    /// live, or becomes live while the snapshot loads, is left untouched.
    pub async fn restore_room(
        &self,
        room_id: RoomId,
        store: &dyn SnapshotStore,
    ) -> Result<RoomId, ServerError> {
        let live = self.inner.rooms.read().contains_key(&room_id);
        if live {
            debug!(room_id = %room_id, "Room already live, skipping restore");
            return Ok(room_id);
        }

        let mut room = store.load_room_snapshot(room_id).await?;
        if room.id() != room_id {
            return Err(ServerError::internal(format!(
                "snapshot for room {room_id} holds room {}",
                room.id()
            )));
        }
        if room.phase() == Phase::Closed {
            return Err(GameError::phase("restore_room", Phase::Closed).into());
        }

        let saved_revision = room.revision();
        room.suspend(Utc::now());
        let phase = room.phase();
        let round = room.round_number();

        {
            let mut rooms = self.inner.rooms.write();
            match rooms.entry(room_id) {
                Entry::Occupied(_) => {
                    debug!(room_id = %room_id, "Room went live during restore, keeping live state");
                    return Ok(room_id);
                }
                Entry::Vacant(slot) => {
                    slot.insert(Arc::new(Mutex::new(RoomEntry {
                        room,
                        saved_revision: Some(saved_revision),
                    })));
                }
            }
        }
        self.inner.tombstones.lock().remove(&room_id);

        info!(room_id = %room_id, phase = %phase, round, "Room restored from snapshot");
        Ok(room_id)
    }

    /// Restores every room `store` holds. Returns the number restored.
    pub async fn restore_all(&self, store: &dyn SnapshotStore) -> Result<usize, ServerError> {
        let room_ids = store.list_room_snapshots().await?;
        let mut restored = 0;
        for room_id in room_ids {
            match self.restore_room(room_id, store).await {
                Ok(_) => restored += 1,
                Err(e) => warn!(room_id = %room_id, error = %e, "Failed to restore room"),
            }
        }
        Ok(restored)
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    /// Closes and removes rooms with no connected member for `timeout`.
    /// Returns the number of rooms reaped.
    pub fn reap_empty_rooms(&self, timeout: Duration) -> usize {
        self.reap_empty_rooms_at(Utc::now(), timeout)
    }

    fn reap_empty_rooms_at(&self, now: DateTime<Utc>, timeout: Duration) -> usize {
        let entries: Vec<(RoomId, SharedEntry)> = self
            .inner
            .rooms
            .read()
            .iter()
            .map(|(id, entry)| (*id, Arc::clone(entry)))
            .collect();

        let mut reaped = 0;
        for (room_id, entry) in entries {
            let events = {
                let mut guard = entry.lock();
                if !guard.room.is_abandoned(now, timeout) {
                    continue;
                }
                let events = match guard.room.expire() {
                    Ok(outcome) => guard.room.seal(outcome.events, now),
                    Err(_) => continue,
                };
                self.remove(room_id);
                events
            };
            self.inner.broadcaster.broadcast_all(events);
            reaped += 1;
            info!(room_id = %room_id, "Reaped empty room");
        }
        reaped
    }

    /// Spawns a task that reaps empty rooms every configured reaper
    /// interval, using the configured empty-room timeout.
    pub fn spawn_reaper_task(&self) -> JoinHandle<()> {
        let coordinator = self.clone();
        let interval = self.inner.config.reaper_interval;
        let timeout = self.inner.config.empty_room_timeout;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);

            loop {
                ticker.tick().await;
                let reaped = coordinator.reap_empty_rooms(timeout);
                if reaped > 0 {
                    debug!(reaped, "Reaper pass complete");
                }
            }
        })
    }

    /// Spawns a task that persists dirty rooms every configured snapshot
    /// interval.
    pub fn spawn_snapshot_task(&self, store: Arc<dyn SnapshotStore>) -> JoinHandle<()> {
        let coordinator = self.clone();
        let interval = self.inner.config.snapshot_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);

            loop {
                ticker.tick().await;
                coordinator.persist_dirty(store.as_ref()).await;
            }
        })
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Runs `op` under the room lock, numbers its events, then publishes
    /// them after the lock is released.
    ///
    /// A room closed by `op` is deregistered before its lock is released, so
    /// a caller that raced the close sees [`GameError::RoomNotFound`].
    fn apply<T, F>(&self, room_id: RoomId, operation: &'static str, op: F) -> Result<T, GameError>
    where
        F: FnOnce(&mut Room, &dyn ScoringPolicy, DateTime<Utc>) -> Result<Outcome<T>, GameError>,
    {
        let entry = self.entry(room_id)?;
        let now = Utc::now();

        let (value, events) = {
            let mut guard = lock_live(&entry, room_id)?;
            let outcome = match op(&mut guard.room, self.inner.scoring.as_ref(), now) {
                Ok(outcome) => outcome,
                Err(e) => {
                    debug!(
                        room_id = %room_id,
                        operation,
                        kind = %e.kind(),
                        error = %e,
                        "Operation rejected"
                    );
                    return Err(e);
                }
            };
            let events = guard.room.seal(outcome.events, now);
            if guard.room.phase() == Phase::Closed {
                self.remove(room_id);
            }
            (outcome.value, events)
        };

        self.inner.broadcaster.broadcast_all(events);
        Ok(value)
    }

    fn entry(&self, room_id: RoomId) -> Result<SharedEntry, GameError> {
        self.inner
            .rooms
            .read()
            .get(&room_id)
            .cloned()
            .ok_or(GameError::RoomNotFound(room_id))
    }

    fn insert(&self, room: Room, saved_revision: Option<u64>) {
        let room_id = room.id();
        let entry = Arc::new(Mutex::new(RoomEntry {
            room,
            saved_revision,
        }));
        self.inner.rooms.write().insert(room_id, entry);
        self.inner.tombstones.lock().remove(&room_id);
    }

    /// Takes the registry lock. Callers may hold a room lock, never the
    /// other way around.
    fn remove(&self, room_id: RoomId) {
        if self.inner.rooms.write().remove(&room_id).is_some() {
            self.inner.tombstones.lock().insert(room_id);
        }
    }
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

/// Locks a registry entry, treating a room closed under a concurrent
/// caller as gone.
fn lock_live(entry: &SharedEntry, room_id: RoomId) -> Result<MutexGuard<'_, RoomEntry>, GameError> {
    let guard = entry.lock();
    if guard.room.phase() == Phase::Closed {
        return Err(GameError::RoomNotFound(room_id));
    }
    Ok(guard)
}

fn mark_saved(entry: &SharedEntry, revision: u64) {
    let mut guard = entry.lock();
    if guard.saved_revision.map_or(true, |saved| saved < revision) {
        guard.saved_revision = Some(revision);
    }
}
