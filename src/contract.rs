#![allow(unused)]

//! # contract: interfaces to the collaborators of the publish pipeline
//!
//! The pipeline never talks to a database or an object store directly. It
//! goes through the traits defined here:
//!
//! - [`StorageClient`] / [`ClientFactory`]: get/put blobs in a bucket, and
//!   build clients for a backend profile.
//! - [`Session`]: the persistence session owned by one job (query, add,
//!   commit, rollback).
//! - [`Fetcher`] / [`IndexGenerator`]: the seam between the autoindex engine
//!   and the pluggable index-generation algorithm.
//!
//! ## Mocking & Testing
//! - The storage and fetcher traits are annotated for `mockall`; the mocks
//!   are exported under the default `test-export-mocks` feature so the
//!   integration tests in `tests/` can use them.

use async_trait::async_trait;
use futures::stream::BoxStream;
use uuid::Uuid;

use mockall::{automock, predicate::*};

use crate::error::{FetchError, GenerationError, StorageError, StoreError};
use crate::model::{Item, Publish};

/// A blob read back from the storage backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub body: Vec<u8>,
    /// Content type reported by the backend, if any.
    pub content_type: Option<String>,
}

/// Client for a content-addressed object store.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait StorageClient: Send + Sync {
    /// Read the object stored under `key`.
    async fn get_object(&self, bucket: &str, key: &str) -> Result<StoredObject, StorageError>;

    /// Store `body` under `key`, replacing any existing object.
    async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>)
        -> Result<(), StorageError>;
}

/// Builds storage clients for a backend profile (credentials/region group).
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn create(&self, profile: &str) -> Result<Box<dyn StorageClient>, StorageError>;
}

/// Item query filters understood by every [`Session`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemFilter {
    All,
    /// `web_uri` equals the given path.
    WebUri(String),
    /// `web_uri` ends with the given suffix.
    WebUriSuffix(String),
    /// Items with `link_to` set.
    Links,
}

impl ItemFilter {
    pub fn matches(&self, item: &Item) -> bool {
        match self {
            ItemFilter::All => true,
            ItemFilter::WebUri(uri) => item.web_uri == *uri,
            ItemFilter::WebUriSuffix(suffix) => item.web_uri.ends_with(suffix.as_str()),
            ItemFilter::Links => item.is_link(),
        }
    }
}

/// Persistence session owned by a single job.
///
/// Reads observe everything added in the same session, committed or not.
/// Methods take `&self`: a session is a handle, and implementations guard
/// their own state.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
pub trait Session: Send + Sync {
    fn publish(&self, id: Uuid) -> Result<Option<Publish>, StoreError>;

    /// Items of one publish matching `filter`, in insertion order.
    fn items(&self, publish_id: Uuid, filter: &ItemFilter) -> Result<Vec<Item>, StoreError>;

    /// Insert or replace a publish by id.
    fn save_publish(&self, publish: &Publish) -> Result<(), StoreError>;

    /// Insert or replace an item by id.
    fn add_item(&self, item: Item) -> Result<(), StoreError>;

    /// Delete a publish together with all of its items.
    fn remove_publish(&self, id: Uuid) -> Result<(), StoreError>;

    fn commit(&self) -> Result<(), StoreError>;

    /// Discard everything not yet committed.
    fn rollback(&self);
}

/// Source of text content for the index generator. `Ok(None)` means there is
/// no content at the URI.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, uri: &str) -> Result<Option<String>, FetchError>;
}

/// One generated directory-index document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedIndex {
    /// Directory relative to the repository root; empty for the root itself.
    pub relative_dir: String,
    pub content: String,
}

/// Index-generation algorithm driven by the autoindex engine.
///
/// The returned stream is lazy and finite. It is not restartable: a fresh
/// call to `generate` starts over from the beginning.
pub trait IndexGenerator: Send + Sync {
    fn generate<'a>(
        &'a self,
        base_uri: &'a str,
        fetcher: &'a dyn Fetcher,
    ) -> BoxStream<'a, Result<GeneratedIndex, GenerationError>>;
}
