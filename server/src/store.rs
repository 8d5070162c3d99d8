//! Room snapshot persistence.
//!
//! Snapshots are whole serialized [`Room`] values. The coordinator clones a
//! room under its lock and hands the clone to a [`SnapshotStore`] after the
//! lock is released, so store latency never blocks gameplay.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use thiserror::Error;
use tracing::trace;

use crate::room::Room;
use crate::types::RoomId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("no snapshot stored for room {0}")]
    NotFound(RoomId),

    #[error("snapshot store unavailable: {0}")]
    Unavailable(String),

    #[error("snapshot could not be encoded or decoded: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Durable storage for room snapshots.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Inserts or replaces the snapshot of `room`.
    async fn save_room_snapshot(&self, room: &Room) -> Result<(), StoreError>;

    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if nothing is stored for `room_id`.
    async fn load_room_snapshot(&self, room_id: RoomId) -> Result<Room, StoreError>;

    /// Removes a snapshot. Deleting a missing snapshot is not an error.
    async fn delete_room_snapshot(&self, room_id: RoomId) -> Result<(), StoreError>;

    /// Ids of every stored snapshot.
    async fn list_room_snapshots(&self) -> Result<Vec<RoomId>, StoreError>;
}

/// In-process store keeping JSON-encoded snapshots.
#[derive(Debug, Default)]
pub struct MemoryStore {
    snapshots: RwLock<HashMap<RoomId, String>>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.snapshots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.read().is_empty()
    }

    pub fn contains(&self, room_id: RoomId) -> bool {
        self.snapshots.read().contains_key(&room_id)
    }

    /// Makes every subsequent call fail with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn save_room_snapshot(&self, room: &Room) -> Result<(), StoreError> {
        self.check_available()?;
        let encoded = serde_json::to_string(room)?;
        trace!(room_id = %room.id(), bytes = encoded.len(), "Stored snapshot");
        self.snapshots.write().insert(room.id(), encoded);
        Ok(())
    }

    async fn load_room_snapshot(&self, room_id: RoomId) -> Result<Room, StoreError> {
        self.check_available()?;
        let encoded = self
            .snapshots
            .read()
            .get(&room_id)
            .cloned()
            .ok_or(StoreError::NotFound(room_id))?;
        Ok(serde_json::from_str(&encoded)?)
    }

    async fn delete_room_snapshot(&self, room_id: RoomId) -> Result<(), StoreError> {
        self.check_available()?;
        self.snapshots.write().remove(&room_id);
        Ok(())
    }

    async fn list_room_snapshots(&self) -> Result<Vec<RoomId>, StoreError> {
        self.check_available()?;
        Ok(self.snapshots.read().keys().copied().collect())
    }
}
