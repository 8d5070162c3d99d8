//! Confessions Server - room and round coordinator.
//!
//! This crate is the authoritative core of the confession game, responsible for:
//! - Room lifecycle: creation, membership, host handover, closing
//! - Round flow: anonymous message collection, guessing, reveal and scoring
//! - Emitting ordered room events for an external fan-out layer
//! - Snapshotting rooms for crash recovery
//!
//! # Architecture
//!
//! The [`coordinator::Coordinator`] owns a registry of rooms, each behind its
//! own lock. Room logic in [`room`] and [`round`] is synchronous and free of
//! I/O; it returns the events an operation produced and the coordinator
//! publishes them through [`broadcast::EventBroadcaster`] after the lock is
//! released. Transport, authentication and storage are collaborators behind
//! the [`identity::IdentityProvider`] and [`store::SnapshotStore`] traits,
//! with a Supabase-backed implementation of both in [`supabase`].

pub mod broadcast;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod identity;
pub mod room;
pub mod round;
pub mod scoring;
pub mod store;
pub mod supabase;
pub mod types;
