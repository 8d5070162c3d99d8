//! Error types for the confessions coordinator.
//!
//! # Error Types
//!
//! - [`GameError`] - Typed rejection of a coordinator operation. Every
//!   rejected operation leaves room state unchanged.
//! - [`ErrorKind`] - The coarse taxonomy a calling layer maps to responses
//! - [`ServerError`] - Top-level error encompassing configuration, game,
//!   persistence and identity failures
//!
//! # Example
//!
//! ```rust
//! use confessions_server::error::{ErrorKind, GameError};
//! use confessions_server::types::Phase;
//!
//! let err = GameError::PhaseError { operation: "submit_guess", phase: Phase::Collecting };
//! assert_eq!(err.kind(), ErrorKind::Phase);
//! ```

use std::error::Error;
use std::fmt;

use thiserror::Error as ThisError;

use crate::config::ConfigError;
use crate::identity::IdentityError;
use crate::store::StoreError;
use crate::types::{MessageId, Phase, PlayerId, RoomId};

/// Coarse classification of [`GameError`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad input shape or configuration.
    Validation,

    /// Operation not valid in the room's current phase or state.
    Phase,

    /// Caller lacks the required role.
    Authorization,

    /// Room, member or message missing.
    NotFound,

    /// Duplicate submission, duplicate guess, already joined.
    Conflict,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Validation => "validation",
            Self::Phase => "phase",
            Self::Authorization => "authorization",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
        };
        f.write_str(name)
    }
}

/// Rejection of a coordinator operation.
///
/// Errors are local, synchronous and never retried by the coordinator.
#[derive(ThisError, Debug, Clone, PartialEq, Eq)]
pub enum GameError {
    #[error("invalid room configuration: {0}")]
    InvalidConfig(String),

    #[error("message cannot be empty or just whitespace")]
    EmptyMessage,

    #[error("message exceeds the maximum length of {max} characters")]
    MessageTooLong { max: usize },

    #[error("members may not guess their own message")]
    SelfGuessNotAllowed,

    #[error("{0} did not take part in this round")]
    UnknownAuthor(PlayerId),

    #[error("{operation} is not allowed while the room is {phase}")]
    PhaseError {
        operation: &'static str,
        phase: Phase,
    },

    #[error("need at least {required} connected players, have {connected}")]
    InsufficientPlayers { required: usize, connected: usize },

    #[error("{waiting} connected players are not ready")]
    PlayersNotReady { waiting: usize },

    #[error("all {rounds} rounds have been played")]
    GameOver { rounds: u32 },

    #[error("only the host may {0}")]
    NotAuthorized(&'static str),

    #[error("{0} is not a participant of the current round")]
    NotParticipant(PlayerId),

    #[error("room {0} not found")]
    RoomNotFound(RoomId),

    #[error("{0} is not a member of this room")]
    NotMember(PlayerId),

    #[error("message {0} not found in the current round")]
    MessageNotFound(MessageId),

    #[error("room is full ({max_players} players)")]
    RoomFull { max_players: usize },

    #[error("{0} has already joined this room")]
    AlreadyJoined(PlayerId),

    #[error("{0} has already left this room")]
    AlreadyLeft(PlayerId),

    #[error("message quota for this round already submitted")]
    DuplicateSubmission,

    #[error("a guess has already been made this round")]
    DuplicateGuess,

    #[error("{0} forfeited the rest of this round")]
    Forfeited(PlayerId),
}

impl GameError {
    /// Returns the taxonomy bucket of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidConfig(_)
            | Self::EmptyMessage
            | Self::MessageTooLong { .. }
            | Self::SelfGuessNotAllowed
            | Self::UnknownAuthor(_) => ErrorKind::Validation,
            Self::PhaseError { .. }
            | Self::InsufficientPlayers { .. }
            | Self::PlayersNotReady { .. }
            | Self::GameOver { .. } => ErrorKind::Phase,
            Self::NotAuthorized(_) | Self::NotParticipant(_) => ErrorKind::Authorization,
            Self::RoomNotFound(_) | Self::NotMember(_) | Self::MessageNotFound(_) => {
                ErrorKind::NotFound
            }
            Self::RoomFull { .. }
            | Self::AlreadyJoined(_)
            | Self::AlreadyLeft(_)
            | Self::DuplicateSubmission
            | Self::DuplicateGuess
            | Self::Forfeited(_) => ErrorKind::Conflict,
        }
    }

    pub(crate) fn phase(operation: &'static str, phase: Phase) -> Self {
        Self::PhaseError { operation, phase }
    }
}

/// Top-level error type for the confessions server.
#[derive(Debug)]
pub enum ServerError {
    /// Configuration error during initialization.
    Config(ConfigError),

    /// A coordinator operation was rejected.
    Game(GameError),

    /// Snapshot persistence failed.
    Store(StoreError),

    /// Identity verification failed.
    Identity(IdentityError),

    /// Unexpected internal failure.
    Internal(String),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(err) => write!(f, "configuration error: {err}"),
            Self::Game(err) => write!(f, "game error: {err}"),
            Self::Store(err) => write!(f, "snapshot store error: {err}"),
            Self::Identity(err) => write!(f, "identity error: {err}"),
            Self::Internal(msg) => write!(f, "internal server error: {msg}"),
        }
    }
}

impl Error for ServerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Config(err) => Some(err),
            Self::Game(err) => Some(err),
            Self::Store(err) => Some(err),
            Self::Identity(err) => Some(err),
            Self::Internal(_) => None,
        }
    }
}

impl From<ConfigError> for ServerError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err)
    }
}

impl From<GameError> for ServerError {
    fn from(err: GameError) -> Self {
        Self::Game(err)
    }
}

impl From<StoreError> for ServerError {
    fn from(err: StoreError) -> Self {
        Self::Store(err)
    }
}

impl From<IdentityError> for ServerError {
    fn from(err: IdentityError) -> Self {
        Self::Identity(err)
    }
}

impl ServerError {
    /// Creates a new internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns `true` if the caller made an invalid request.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Game(_) | Self::Identity(IdentityError::Unauthenticated))
    }

    /// Returns `true` if this error indicates a server-side problem.
    pub fn is_server_error(&self) -> bool {
        match self {
            Self::Config(_) | Self::Store(_) | Self::Internal(_) => true,
            Self::Identity(err) => !matches!(err, IdentityError::Unauthenticated),
            Self::Game(_) => false,
        }
    }
}

/// A specialized Result type for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;
