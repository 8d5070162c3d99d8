//! Shared domain types for the confessions coordinator.
//!
//! This module defines identifiers, room configuration, read-only views and
//! the event payloads emitted on every state change. Views and events are
//! immutable values; the authoritative state lives in [`crate::room`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::GameError;

/// Default minimum number of connected players required to start a round.
pub const DEFAULT_MIN_PLAYERS: usize = 3;

/// Default room capacity.
pub const DEFAULT_MAX_PLAYERS: usize = 8;

/// Default number of rounds in a game.
pub const DEFAULT_ROUNDS: u32 = 3;

/// Default number of messages each participant submits per round.
pub const DEFAULT_MESSAGES_PER_MEMBER: usize = 1;

/// Default maximum message length, in characters.
pub const DEFAULT_MAX_MESSAGE_LEN: usize = 500;

/// Display name used for house-authored decoy messages.
pub const HOUSE_DISPLAY_NAME: &str = "House";

/// Unique identifier of a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(Uuid);

impl RoomId {
    /// Generates a fresh random room identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for RoomId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for RoomId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifier of a submitted message.
///
/// Message identifiers are freshly random per submission so they carry no
/// information about the author or the submission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(Uuid);

impl MessageId {
    /// Generates a fresh random message identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for MessageId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Stable identity of a player, as supplied by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(String);

impl PlayerId {
    /// Wraps a provider-issued user identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PlayerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for PlayerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An authenticated player: stable id plus the name shown to other members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub player_id: PlayerId,
    pub display_name: String,
}

impl Identity {
    /// Creates an identity from an id and a display name.
    pub fn new(player_id: impl Into<PlayerId>, display_name: impl Into<String>) -> Self {
        Self {
            player_id: player_id.into(),
            display_name: display_name.into(),
        }
    }
}

/// Per-room game configuration.
///
/// # Example
///
/// ```rust
/// use confessions_server::types::RoomConfig;
///
/// let config = RoomConfig::default().with_players(3, 6).with_rounds(2);
/// assert!(config.validate().is_ok());
///
/// let inverted = RoomConfig::default().with_players(6, 3);
/// assert!(inverted.validate().is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomConfig {
    /// Minimum connected players needed to start a round.
    pub min_players: usize,

    /// Maximum number of members, connected or not.
    pub max_players: usize,

    /// Number of rounds in the game.
    pub rounds: u32,

    /// Messages each participant must submit per round.
    pub messages_per_member: usize,

    /// Maximum message length in characters.
    pub max_message_len: usize,

    /// When true, every connected member must be ready before a round starts.
    pub require_ready: bool,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            min_players: DEFAULT_MIN_PLAYERS,
            max_players: DEFAULT_MAX_PLAYERS,
            rounds: DEFAULT_ROUNDS,
            messages_per_member: DEFAULT_MESSAGES_PER_MEMBER,
            max_message_len: DEFAULT_MAX_MESSAGE_LEN,
            require_ready: false,
        }
    }
}

impl RoomConfig {
    /// Sets the player bounds (builder pattern).
    #[must_use]
    pub fn with_players(mut self, min_players: usize, max_players: usize) -> Self {
        self.min_players = min_players;
        self.max_players = max_players;
        self
    }

    /// Sets the number of rounds (builder pattern).
    #[must_use]
    pub fn with_rounds(mut self, rounds: u32) -> Self {
        self.rounds = rounds;
        self
    }

    /// Sets the per-round message quota (builder pattern).
    #[must_use]
    pub fn with_messages_per_member(mut self, messages_per_member: usize) -> Self {
        self.messages_per_member = messages_per_member;
        self
    }

    /// Sets the maximum message length (builder pattern).
    #[must_use]
    pub fn with_max_message_len(mut self, max_message_len: usize) -> Self {
        self.max_message_len = max_message_len;
        self
    }

    /// Requires all connected members to be ready before a round starts.
    #[must_use]
    pub fn with_require_ready(mut self, require_ready: bool) -> Self {
        self.require_ready = require_ready;
        self
    }

    /// Checks bounds and quotas.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::InvalidConfig`] when a bound is zero or the
    /// player bounds are inverted.
    pub fn validate(&self) -> Result<(), GameError> {
        if self.min_players == 0 {
            return Err(GameError::InvalidConfig(
                "min_players must be positive".to_string(),
            ));
        }
        if self.max_players == 0 {
            return Err(GameError::InvalidConfig(
                "max_players must be positive".to_string(),
            ));
        }
        if self.min_players > self.max_players {
            return Err(GameError::InvalidConfig(format!(
                "min_players ({}) exceeds max_players ({})",
                self.min_players, self.max_players
            )));
        }
        if self.rounds == 0 {
            return Err(GameError::InvalidConfig(
                "rounds must be positive".to_string(),
            ));
        }
        if self.messages_per_member == 0 {
            return Err(GameError::InvalidConfig(
                "messages_per_member must be positive".to_string(),
            ));
        }
        if self.max_message_len == 0 {
            return Err(GameError::InvalidConfig(
                "max_message_len must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Stage of a room's state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Lobby,
    Collecting,
    Guessing,
    Revealed,
    Closed,
}

impl Phase {
    /// Returns `true` while a round is collecting messages or guesses.
    #[must_use]
    pub fn is_round_active(self) -> bool {
        matches!(self, Self::Collecting | Self::Guessing)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Lobby => "lobby",
            Self::Collecting => "collecting",
            Self::Guessing => "guessing",
            Self::Revealed => "revealed",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Whether a member currently has a live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
}

/// Who wrote a message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Author {
    /// A room member.
    Member(PlayerId),

    /// A decoy injected by the host on behalf of the house.
    House,
}

impl Author {
    /// Returns the member id, or `None` for the house.
    #[must_use]
    pub fn member(&self) -> Option<&PlayerId> {
        match self {
            Self::Member(id) => Some(id),
            Self::House => None,
        }
    }

    /// Returns `true` for house-authored decoys.
    #[must_use]
    pub fn is_house(&self) -> bool {
        matches!(self, Self::House)
    }
}

impl fmt::Display for Author {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Member(id) => id.fmt(f),
            Self::House => f.write_str(HOUSE_DISPLAY_NAME),
        }
    }
}

/// Public view of a room member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberView {
    pub player_id: PlayerId,
    pub display_name: String,
    pub status: ConnectionStatus,
    pub score: i64,
    pub is_ready: bool,
    pub is_host: bool,
}

/// A message as presented during guessing: content under the author's
/// round alias, no author.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnonymousMessage {
    pub message_id: MessageId,
    pub position: usize,
    pub alias: String,
    pub content: String,
}

/// A message with its author disclosed, as presented after reveal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevealedMessage {
    pub message_id: MessageId,
    pub position: usize,
    pub content: String,
    pub author: Author,
    pub author_name: String,
    /// Alias the author went by during the round.
    pub author_alias: String,
    pub submitted_at: DateTime<Utc>,
}

/// Outcome of one participant's guess for a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuessResult {
    pub guesser: PlayerId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<MessageId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guessed_author: Option<Author>,
    pub correct: bool,
    pub forfeited: bool,
    pub points: i64,
}

/// Score change for one participant over a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreDelta {
    pub player_id: PlayerId,
    pub delta: i64,
    pub total: i64,
}

/// A leaderboard entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Standing {
    pub player_id: PlayerId,
    pub display_name: String,
    pub score: i64,
}

/// Everything disclosed when a round is revealed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundSummary {
    pub round: u32,
    pub messages: Vec<RevealedMessage>,
    pub guesses: Vec<GuessResult>,
    pub score_deltas: Vec<ScoreDelta>,
    pub standings: Vec<Standing>,
}

impl RoundSummary {
    /// Returns the score delta of a participant, if they took part.
    #[must_use]
    pub fn delta_for(&self, player_id: &PlayerId) -> Option<i64> {
        self.score_deltas
            .iter()
            .find(|d| &d.player_id == player_id)
            .map(|d| d.delta)
    }

    /// Returns the guess result of a participant, if one was recorded.
    #[must_use]
    pub fn guess_of(&self, player_id: &PlayerId) -> Option<&GuessResult> {
        self.guesses.iter().find(|g| &g.guesser == player_id)
    }
}

/// Progress of the current round as seen by one member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundView {
    pub round: u32,
    pub participants: Vec<PlayerId>,
    pub submitted: usize,
    pub required_submissions: usize,
    pub guesses: usize,
    pub required_guesses: usize,
    /// Anonymized messages, populated from guessing onwards.
    pub messages: Vec<AnonymousMessage>,
    /// Messages written by the viewer.
    pub own_messages: Vec<MessageId>,
    /// The viewer's alias this round, if they take part.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub own_alias: Option<String>,
    pub has_guessed: bool,
    pub forfeited: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<RoundSummary>,
}

/// Read-only snapshot of a room for (re)connecting members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomView {
    pub room_id: RoomId,
    pub phase: Phase,
    pub round: u32,
    pub rounds_total: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<PlayerId>,
    pub members: Vec<MemberView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<RoundView>,
}

/// Type-specific payload of a room event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    #[serde(rename_all = "camelCase")]
    MemberJoined {
        member: MemberView,
        reconnected: bool,
    },

    #[serde(rename_all = "camelCase")]
    MemberLeft {
        player_id: PlayerId,
        forfeited: bool,
        removed: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        new_host: Option<PlayerId>,
    },

    #[serde(rename_all = "camelCase")]
    ReadyChanged { player_id: PlayerId, ready: bool },

    #[serde(rename_all = "camelCase")]
    RoundStarted {
        round: u32,
        participants: Vec<PlayerId>,
    },

    /// Submission progress. Carries counts only, never who submitted.
    #[serde(rename_all = "camelCase")]
    SubmissionReceived {
        round: u32,
        submitted: usize,
        required: usize,
    },

    /// Collecting closed; messages are presented in a fresh random order.
    #[serde(rename_all = "camelCase")]
    PhaseChanged {
        round: u32,
        phase: Phase,
        messages: Vec<AnonymousMessage>,
    },

    #[serde(rename_all = "camelCase")]
    GuessReceived {
        round: u32,
        guesses: usize,
        required: usize,
    },

    #[serde(rename_all = "camelCase")]
    RoundRevealed { summary: RoundSummary },

    #[serde(rename_all = "camelCase")]
    RoomClosed { standings: Vec<Standing> },
}

impl EventPayload {
    /// Short name of the payload variant, for logging.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::MemberJoined { .. } => "member_joined",
            Self::MemberLeft { .. } => "member_left",
            Self::ReadyChanged { .. } => "ready_changed",
            Self::RoundStarted { .. } => "round_started",
            Self::SubmissionReceived { .. } => "submission_received",
            Self::PhaseChanged { .. } => "phase_changed",
            Self::GuessReceived { .. } => "guess_received",
            Self::RoundRevealed { .. } => "round_revealed",
            Self::RoomClosed { .. } => "room_closed",
        }
    }
}

/// An event emitted by the coordinator for one room.
///
/// `sequence` increases by one per event within a room, so consumers of an
/// at-least-once fan-out can drop duplicates and restore order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomEvent {
    pub room_id: RoomId,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}
