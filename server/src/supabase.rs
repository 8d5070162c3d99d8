//! Supabase adapter for identity verification and snapshot persistence.
//!
//! [`SupabaseClient`] implements both collaborator traits against a single
//! Supabase project:
//! - [`IdentityProvider`] via the `/auth/v1/user` endpoint
//! - [`SnapshotStore`] via PostgREST on the `room_snapshots` table
//!
//! # Table layout
//!
//! ```sql
//! create table room_snapshots (
//!     id          uuid primary key,
//!     revision    bigint not null,
//!     state       jsonb not null,
//!     updated_at  timestamptz not null
//! );
//! ```
//!
//! Snapshot calls retry transient failures with exponential backoff and
//! jitter. Identity checks are answered on the first attempt.
//!
//! # Example
//!
//! ```rust,ignore
//! use confessions_server::identity::IdentityProvider;
//! use confessions_server::supabase::SupabaseClient;
//!
//! let client = SupabaseClient::new("https://your-project.supabase.co", "service-key")?;
//! let identity = client.verify_identity("user-jwt").await?;
//! println!("{} joined", identity.display_name);
//! ```

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::SupabaseSettings;
use crate::identity::{IdentityError, IdentityProvider};
use crate::room::Room;
use crate::store::{SnapshotStore, StoreError};
use crate::types::{Identity, RoomId};

/// Request timeout for Supabase API calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

const DEFAULT_MAX_ATTEMPTS: u32 = 5;

const BASE_BACKOFF_MS: u64 = 100;

const MAX_BACKOFF_MS: u64 = 10_000;

const MAX_JITTER_MS: u64 = 100;

const SNAPSHOT_TABLE: &str = "room_snapshots";

#[derive(Debug, Error)]
pub enum SupabaseError {
    #[error("unauthorized: invalid or expired JWT")]
    Unauthorized,

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("supabase unavailable: {0}")]
    Unavailable(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("client configuration error: {0}")]
    Configuration(String),

    #[error("all {attempts} retry attempts failed: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

impl SupabaseError {
    /// Returns `true` for failures worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Unavailable(_))
    }
}

impl From<SupabaseError> for IdentityError {
    fn from(err: SupabaseError) -> Self {
        match err {
            SupabaseError::Unauthorized => Self::Unauthenticated,
            SupabaseError::InvalidResponse(msg) => Self::InvalidResponse(msg),
            other => Self::Unavailable(other.to_string()),
        }
    }
}

impl From<SupabaseError> for StoreError {
    fn from(err: SupabaseError) -> Self {
        match err {
            SupabaseError::InvalidResponse(msg) => Self::Serialization(msg),
            other => Self::Unavailable(other.to_string()),
        }
    }
}

/// User record returned by `/auth/v1/user`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupabaseUser {
    pub id: String,

    pub email: Option<String>,

    #[serde(default)]
    pub user_metadata: Option<serde_json::Value>,
}

impl SupabaseUser {
    /// Best available display name: profile metadata, then the local part
    /// of the email address, then the user id.
    pub fn display_name(&self) -> String {
        let from_metadata = self.user_metadata.as_ref().and_then(|meta| {
            ["display_name", "full_name", "name"]
                .iter()
                .filter_map(|key| meta.get(*key).and_then(|v| v.as_str()))
                .map(str::trim)
                .find(|name| !name.is_empty())
                .map(str::to_string)
        });

        from_metadata
            .or_else(|| {
                self.email
                    .as_deref()
                    .and_then(|email| email.split('@').next())
                    .filter(|local| !local.is_empty())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| self.id.clone())
    }
}

#[derive(Debug, Serialize)]
struct SnapshotRow<'a> {
    id: RoomId,
    revision: u64,
    state: &'a Room,
    updated_at: chrono::DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct SnapshotState {
    state: Room,
}

#[derive(Debug, Deserialize)]
struct SnapshotId {
    id: RoomId,
}

/// Client for a Supabase project.
///
/// Cheap to clone; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct SupabaseClient {
    http_client: Client,
    base_url: String,
    api_key: String,
    max_attempts: u32,
}

impl SupabaseClient {
    /// Creates a client for the project at `base_url`.
    ///
    /// `api_key` is sent as `apikey` on every request and as the bearer
    /// token for PostgREST calls, so it needs write access to the snapshot
    /// table.
    ///
    /// # Errors
    ///
    /// Returns [`SupabaseError::Configuration`] if the HTTP client cannot be
    /// built.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, SupabaseError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();

        let http_client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| {
                SupabaseError::Configuration(format!("failed to create HTTP client: {e}"))
            })?;

        Ok(Self {
            http_client,
            base_url,
            api_key: api_key.into(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        })
    }

    /// Creates a client from loaded configuration.
    pub fn from_settings(settings: &SupabaseSettings) -> Result<Self, SupabaseError> {
        Self::new(settings.url.clone(), settings.key.clone())
    }

    /// Overrides how many times snapshot calls are attempted.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetches the user a JWT was issued for.
    pub async fn fetch_user(&self, jwt: &str) -> Result<SupabaseUser, SupabaseError> {
        let url = format!("{}/auth/v1/user", self.base_url);
        debug!(url = %url, "Validating JWT with Supabase");

        let response = send(
            self.http_client
                .get(&url)
                .header("apikey", &self.api_key)
                .bearer_auth(jwt),
        )
        .await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            debug!("JWT validation failed: unauthorized");
            return Err(SupabaseError::Unauthorized);
        }
        let response = ensure_success(response, "auth").await?;

        let user: SupabaseUser = response.json().await.map_err(|e| {
            SupabaseError::InvalidResponse(format!("failed to parse user response: {e}"))
        })?;

        debug!(user_id = %user.id, "JWT validated successfully");
        Ok(user)
    }

    /// Upserts a snapshot row.
    pub async fn upsert_snapshot(&self, room: &Room) -> Result<(), SupabaseError> {
        let row = [SnapshotRow {
            id: room.id(),
            revision: room.revision(),
            state: room,
            updated_at: Utc::now(),
        }];

        let response = send(
            self.rest(self.http_client.post(self.table_url()))
                .header("Prefer", "resolution=merge-duplicates,return=minimal")
                .json(&row),
        )
        .await?;
        ensure_success(response, "snapshot upsert").await?;

        debug!(room_id = %room.id(), revision = room.revision(), "Snapshot saved");
        Ok(())
    }

    /// Fetches the stored room, or `None` if there is no row for it.
    pub async fn fetch_snapshot(&self, room_id: RoomId) -> Result<Option<Room>, SupabaseError> {
        let response = send(
            self.rest(self.http_client.get(self.table_url()))
                .query(&[("id", format!("eq.{room_id}")), ("select", "state".into())]),
        )
        .await?;
        let response = ensure_success(response, "snapshot fetch").await?;

        let rows: Vec<SnapshotState> = response.json().await.map_err(|e| {
            SupabaseError::InvalidResponse(format!("failed to parse snapshot: {e}"))
        })?;
        Ok(rows.into_iter().next().map(|row| row.state))
    }

    pub async fn remove_snapshot(&self, room_id: RoomId) -> Result<(), SupabaseError> {
        let response = send(
            self.rest(self.http_client.delete(self.table_url()))
                .query(&[("id", format!("eq.{room_id}"))]),
        )
        .await?;
        ensure_success(response, "snapshot delete").await?;

        debug!(room_id = %room_id, "Snapshot deleted");
        Ok(())
    }

    pub async fn fetch_snapshot_ids(&self) -> Result<Vec<RoomId>, SupabaseError> {
        let response = send(
            self.rest(self.http_client.get(self.table_url()))
                .query(&[("select", "id")]),
        )
        .await?;
        let response = ensure_success(response, "snapshot listing").await?;

        let rows: Vec<SnapshotId> = response.json().await.map_err(|e| {
            SupabaseError::InvalidResponse(format!("failed to parse snapshot ids: {e}"))
        })?;
        Ok(rows.into_iter().map(|row| row.id).collect())
    }

    /// Runs `call` until it succeeds, fails permanently or runs out of
    /// attempts.
    async fn with_retry<T, F, Fut>(&self, operation: &'static str, call: F) -> Result<T, SupabaseError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, SupabaseError>>,
    {
        let mut last_error = String::new();

        for attempt in 0..self.max_attempts {
            match call().await {
                Ok(value) => {
                    if attempt > 0 {
                        info!(operation, attempt = attempt + 1, "Supabase call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) => {
                    last_error = e.to_string();

                    if attempt + 1 < self.max_attempts {
                        let delay = calculate_backoff_delay(attempt);
                        warn!(
                            operation,
                            attempt = attempt + 1,
                            max_attempts = self.max_attempts,
                            delay_ms = delay.as_millis(),
                            error = %e,
                            "Supabase call failed, retrying"
                        );
                        sleep(delay).await;
                    } else {
                        error!(
                            operation,
                            attempts = self.max_attempts,
                            error = %e,
                            "Supabase call failed, no more retries"
                        );
                    }
                }
            }
        }

        Err(SupabaseError::RetriesExhausted {
            attempts: self.max_attempts,
            last_error,
        })
    }

    fn table_url(&self) -> String {
        format!("{}/rest/v1/{SNAPSHOT_TABLE}", self.base_url)
    }

    fn rest(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }
}

#[async_trait]
impl IdentityProvider for SupabaseClient {
    async fn verify_identity(&self, token: &str) -> Result<Identity, IdentityError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(IdentityError::Unauthenticated);
        }
        let user = self.fetch_user(token).await?;
        let display_name = user.display_name();
        Ok(Identity::new(user.id, display_name))
    }
}

#[async_trait]
impl SnapshotStore for SupabaseClient {
    async fn save_room_snapshot(&self, room: &Room) -> Result<(), StoreError> {
        Ok(self
            .with_retry("save_room_snapshot", || self.upsert_snapshot(room))
            .await?)
    }

    async fn load_room_snapshot(&self, room_id: RoomId) -> Result<Room, StoreError> {
        self.with_retry("load_room_snapshot", || self.fetch_snapshot(room_id))
            .await?
            .ok_or(StoreError::NotFound(room_id))
    }

    async fn delete_room_snapshot(&self, room_id: RoomId) -> Result<(), StoreError> {
        Ok(self
            .with_retry("delete_room_snapshot", || self.remove_snapshot(room_id))
            .await?)
    }

    async fn list_room_snapshots(&self) -> Result<Vec<RoomId>, StoreError> {
        Ok(self
            .with_retry("list_room_snapshots", || self.fetch_snapshot_ids())
            .await?)
    }
}

async fn send(request: RequestBuilder) -> Result<Response, SupabaseError> {
    request.send().await.map_err(|e| {
        if e.is_timeout() {
            SupabaseError::Timeout(REQUEST_TIMEOUT)
        } else if e.is_connect() {
            SupabaseError::Unavailable(format!("connection failed: {e}"))
        } else {
            SupabaseError::Unavailable(format!("request failed: {e}"))
        }
    })
}

/// Server errors are transient; any other non-success status is not.
async fn ensure_success(response: Response, what: &str) -> Result<Response, SupabaseError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    error!(status = %status, body = %body, what, "Unexpected response from Supabase");
    if status.is_server_error() {
        Err(SupabaseError::Unavailable(format!("{what} returned {status}")))
    } else {
        Err(SupabaseError::InvalidResponse(format!(
            "unexpected status {status}: {body}"
        )))
    }
}

/// Exponential backoff with jitter, capped at `MAX_BACKOFF_MS`.
fn calculate_backoff_delay(attempt: u32) -> Duration {
    let exponential_ms = BASE_BACKOFF_MS.saturating_mul(2u64.saturating_pow(attempt));
    let jitter_ms = rand::rng().random_range(0..=MAX_JITTER_MS);
    let total_ms = exponential_ms.saturating_add(jitter_ms).min(MAX_BACKOFF_MS);
    Duration::from_millis(total_ms)
}
