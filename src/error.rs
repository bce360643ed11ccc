//! Error types for the publish pipeline.
//!
//! Each stage has its own enum so callers can tell a per-URI gap apart from a
//! failure that must terminate the whole commit. The coordinator folds all of
//! them into [`CommitError`] or into a FAILED publish with a readable detail.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::model::PublishState;

/// Errors reported by a storage backend client.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The object does not exist in the bucket.
    #[error("object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    /// Credentials were rejected or lack permission.
    #[error("access denied: {0}")]
    Unauthorized(String),

    /// The client could not be configured (missing region, bad endpoint, ...).
    #[error("invalid storage configuration: {0}")]
    InvalidConfig(String),

    /// Network or service failure.
    #[error("storage I/O error: {0}")]
    Io(String),
}

impl StorageError {
    /// Structural failures mean every later request will fail the same way.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            StorageError::Unauthorized(_) | StorageError::InvalidConfig(_)
        )
    }
}

/// Errors from the persistence session.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("store is unavailable: {0}")]
    Unavailable(String),
}

/// Failure to retrieve the content visible at one URI.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("failed to fetch {uri}: {source}")]
    Storage {
        uri: String,
        #[source]
        source: StorageError,
    },

    #[error("failed to decompress {uri}: {source}")]
    Decompress {
        uri: String,
        #[source]
        source: std::io::Error,
    },

    #[error("content at {uri} is not valid UTF-8")]
    Decode {
        uri: String,
        #[source]
        source: std::string::FromUtf8Error,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl FetchError {
    pub fn is_structural(&self) -> bool {
        match self {
            FetchError::Storage { source, .. } => source.is_structural(),
            FetchError::Store(_) => true,
            FetchError::Decompress { .. } | FetchError::Decode { .. } => false,
        }
    }
}

/// Errors from the storage client pool.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("timed out after {waited:?} waiting for a storage client for profile '{profile}'")]
    Timeout { profile: String, waited: Duration },

    #[error("failed to construct storage clients for profile '{profile}': {source}")]
    Construction {
        profile: String,
        #[source]
        source: StorageError,
    },

    #[error("client pool for profile '{profile}' has been shut down")]
    Closed { profile: String },
}

impl PoolError {
    /// Construction was refused for a reason retrying will not fix.
    pub fn is_structural(&self) -> bool {
        matches!(self, PoolError::Construction { source, .. } if source.is_structural())
    }
}

/// Link resolution failure; fatal to the commit.
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("Unable to resolve item object_key:\n\tURI: '{web_uri}'\n\tLink: '{link_to}'")]
    Unresolved { web_uri: String, link_to: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failure while producing or uploading index documents for one root.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("malformed repository metadata at {uri}: {message}")]
    Parse { uri: String, message: String },

    #[error("failed to upload index {web_uri}: {source}")]
    Upload {
        web_uri: String,
        #[source]
        source: StorageError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl GenerationError {
    /// Fatal errors abort the autoindex run for the whole publish instead of
    /// just the current repository root.
    pub fn is_fatal(&self) -> bool {
        match self {
            GenerationError::Fetch(e) => e.is_structural(),
            GenerationError::Upload { source, .. } => source.is_structural(),
            GenerationError::Store(_) => true,
            GenerationError::Parse { .. } => false,
        }
    }
}

/// The autoindex run was aborted for the whole publish.
#[derive(Debug, Error)]
pub enum AutoindexError {
    #[error("autoindex aborted: {0}")]
    Aborted(#[source] GenerationError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Item rejected before it could join a publish.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("No URI: {0}")]
    MissingUri(String),

    #[error("Both link target and object key present: {0}")]
    LinkAndKey(String),

    #[error("Content type specified for link: {0}")]
    LinkContentType(String),

    #[error("Cannot set content type when object_key is 'absent': {0}")]
    AbsentContentType(String),

    #[error("Invalid object key; must be sha256sum: {0}")]
    InvalidObjectKey(String),

    #[error("No object key or link target: {0}")]
    MissingTarget(String),

    #[error("Invalid content type: {0}")]
    InvalidContentType(String),

    #[error("Invalid URI {0}: filename is reserved")]
    ReservedFilename(String),
}

/// Settings lookups.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid environment={0:?}")]
    UnknownEnvironment(String),
}

/// Errors from publish building operations.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("No publish found for ID {0}")]
    NotFound(Uuid),

    #[error("Publish {id} in unexpected state, '{state}'")]
    InvalidState { id: Uuid, state: PublishState },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A job was abandoned at its deadline.
#[derive(Debug, Error)]
#[error("job abandoned after exceeding its {0:?} deadline")]
pub struct DeadlineExceeded(pub Duration);

/// Errors that end a commit job without moving the publish to a terminal
/// state. The publish stays COMMITTING so the job can be retried.
///
/// `Resolution` and `Autoindex` are only returned by the state-neutral
/// autoindex job; a commit records those as a FAILED publish instead.
#[derive(Debug, Error)]
pub enum CommitError {
    #[error("No publish found for ID {0}")]
    NotFound(Uuid),

    #[error("Publish {id} in unexpected state, '{state}'")]
    InvalidState { id: Uuid, state: PublishState },

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Deadline(#[from] DeadlineExceeded),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Autoindex(#[from] AutoindexError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
