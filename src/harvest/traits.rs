//! Collaborator interfaces and error types for the harvest loop.
//!
//! This module defines the seams between the orchestrator and the outside world:
//! - Credentials via [`CredentialProvider`]
//! - Inventory listings via [`InventorySource`]
//! - Artifact downloads via [`ArtifactFetcher`] and local copies via [`ArtifactStore`]
//! - Per-session extension points via [`LifecycleHooks`]
//!
//! A concrete weather-data provider implements the whole capability set,
//! which is bundled as [`DataSource`]. The orchestrator depends only on
//! these traits, never on a concrete provider.

use async_trait::async_trait;
use futures_util::Stream;
use std::collections::BTreeSet;
use std::pin::Pin;
use thiserror::Error;

// ============================================================================
// Payload Type
// ============================================================================

/// Opaque artifact payload, delivered as a stream of byte chunks.
pub type ArtifactStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, HarvestError>> + Send>>;

// ============================================================================
// Collaborator Traits
// ============================================================================

/// Supplies the API key and access token used by every remote call.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Returns the API key for the remote service.
    ///
    /// May be empty when the service does not require one. Fails only on a
    /// configuration error.
    async fn get_api_key(&self) -> Result<String, HarvestError>;

    /// Obtains an access token.
    ///
    /// With `renew == false` a cached token may be returned. With
    /// `renew == true` a fresh token must be requested from the service.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::Authorization`] if no token is obtainable.
    async fn get_access_token(&self, api_key: &str, renew: bool) -> Result<String, HarvestError>;
}

/// Lists the artifacts currently available remotely.
#[async_trait]
pub trait InventorySource: Send + Sync {
    /// Lists newly available artifact ids for the requested source ids.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::AuthorizationExpired`] on a stale-token
    /// response and a request error otherwise.
    async fn list(
        &self,
        ids: &BTreeSet<String>,
        api_key: &str,
        token: &str,
    ) -> Result<BTreeSet<String>, HarvestError>;
}

/// Streams artifact bytes from the remote repository.
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    /// Opens a byte stream for the artifact `id`.
    ///
    /// # Errors
    ///
    /// Same expiry signalling as [`InventorySource::list`]. An artifact that
    /// cannot be served right now is reported as
    /// [`HarvestError::ArtifactUnavailable`].
    async fn fetch(&self, id: &str, api_key: &str, token: &str)
        -> Result<ArtifactStream, HarvestError>;
}

/// Local repository of downloaded artifacts.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Checks that `id` can be stored at all, before anything is fetched.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::InvalidArtifactId`] for ids the store rejects.
    fn validate_id(&self, _id: &str) -> Result<(), HarvestError> {
        Ok(())
    }

    /// Returns `true` if a complete local copy of `id` is present.
    async fn exists(&self, id: &str) -> bool;

    /// Persists the artifact `id` from `stream`.
    async fn persist(&self, id: &str, stream: ArtifactStream) -> Result<(), HarvestError>;
}

/// Extension points invoked by the orchestrator around the scan loop.
///
/// All hooks are no-ops by default.
#[async_trait]
pub trait LifecycleHooks: Send + Sync {
    /// Called once after credentials are obtained, before the first cycle.
    async fn prepare(&self) -> Result<(), HarvestError> {
        Ok(())
    }

    /// Called at the end of every completed cycle.
    async fn prepare_next_cycle(&self) -> Result<(), HarvestError> {
        Ok(())
    }

    /// Called once when the window has closed.
    async fn finalize(&self) -> Result<(), HarvestError> {
        Ok(())
    }
}

/// Full capability set of a weather-data provider.
pub trait DataSource: CredentialProvider + InventorySource + ArtifactFetcher + LifecycleHooks {
    /// Returns the unique identifier of this provider.
    ///
    /// Examples: `"smn"`
    ///
    /// This name is used in logging.
    fn name(&self) -> &str;
}

// ============================================================================
// Error Types
// ============================================================================

/// Errors raised while harvesting.
#[derive(Error, Debug)]
pub enum HarvestError {
    /// The access token was rejected as stale; recoverable by renewal
    #[error("Access token expired: {0}")]
    AuthorizationExpired(String),

    /// No access token could be obtained
    #[error("Could not obtain an access token: {0}")]
    Authorization(String),

    /// A single artifact could not be downloaded or stored this time
    #[error("Artifact '{id}' unavailable: {reason}")]
    ArtifactUnavailable { id: String, reason: String },

    /// Artifact id cannot be mapped to a file inside the repository
    #[error("Invalid artifact id: '{0}'")]
    InvalidArtifactId(String),

    /// The remote service answered with an error status
    #[error("Request failed ({status}): {message}")]
    Request { status: u16, message: String },

    /// The remote service answered with content we cannot interpret
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Configuration file missing, unreadable or inconsistent
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Date, time or duration could not be parsed or is out of range
    #[error("Invalid time specification: {0}")]
    Time(String),

    /// Too many consecutive token renewals without a completed cycle
    #[error("Access token renewed {0} times in a row without completing a cycle")]
    RenewalLimit(u32),

    /// The harvest task panicked or was cancelled
    #[error("Harvest task failed: {0}")]
    Task(String),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HarvestError {
    /// `true` for the stale-token signal handled in-loop by renew + rewind.
    pub fn is_authorization_expired(&self) -> bool {
        matches!(self, Self::AuthorizationExpired(_))
    }

    /// `true` for failures scoped to one artifact.
    ///
    /// The artifact stays pending and is retried next cycle, subject to the
    /// two-cycle budget. Every other error aborts the session.
    pub fn is_artifact_failure(&self) -> bool {
        matches!(
            self,
            Self::ArtifactUnavailable { .. } | Self::InvalidArtifactId(_) | Self::Io(_)
        )
    }

    /// Process exit code the command-line front end reports for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) | Self::Time(_) => 1,
            _ => 2,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
