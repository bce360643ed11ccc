//! Content currently visible at a URI within one publish.
//!
//! Lookups only consult items of the given publish, and only items that
//! carry a real object key: tombstones and unresolved links read as absent.

use std::io::Read;

use async_trait::async_trait;
use flate2::read::GzDecoder;
use tracing::debug;
use uuid::Uuid;

use crate::contract::{Fetcher, ItemFilter, Session, StorageClient};
use crate::error::FetchError;

/// Content types under which backends store gzip files without marking them
/// as such.
const GZIP_CONTENT_TYPES: &[&str] = &[
    "binary/octet-stream",
    "application/octet-stream",
    "application/x-gzip",
];

pub struct ContentFetcher<'a, S: Session + ?Sized> {
    session: &'a S,
    publish_id: Uuid,
    bucket: &'a str,
    client: &'a dyn StorageClient,
}

impl<'a, S: Session + ?Sized> ContentFetcher<'a, S> {
    pub fn new(
        session: &'a S,
        publish_id: Uuid,
        bucket: &'a str,
        client: &'a dyn StorageClient,
    ) -> Self {
        Self {
            session,
            publish_id,
            bucket,
            client,
        }
    }

    /// Fetch the text at `uri`, or `None` if the publish has no content there.
    pub async fn fetch_text(&self, uri: &str) -> Result<Option<String>, FetchError> {
        debug!(uri, "Requested to fetch");

        let matched = self
            .session
            .items(self.publish_id, &ItemFilter::WebUri(uri.to_string()))?;
        let Some(key) = matched.iter().find_map(|item| item.content_key()) else {
            debug!(uri, "no content available");
            return Ok(None);
        };
        debug!(uri, key, "content can be fetched");

        let object = self
            .client
            .get_object(self.bucket, key)
            .await
            .map_err(|source| FetchError::Storage {
                uri: uri.to_string(),
                source,
            })?;

        let mut content = object.body;
        if should_decompress(uri, object.content_type.as_deref()) {
            content = gunzip(&content).map_err(|source| FetchError::Decompress {
                uri: uri.to_string(),
                source,
            })?;
        }

        String::from_utf8(content)
            .map(Some)
            .map_err(|source| FetchError::Decode {
                uri: uri.to_string(),
                source,
            })
    }
}

#[async_trait]
impl<S: Session + ?Sized> Fetcher for ContentFetcher<'_, S> {
    async fn fetch(&self, uri: &str) -> Result<Option<String>, FetchError> {
        self.fetch_text(uri).await
    }
}

fn should_decompress(uri: &str, content_type: Option<&str>) -> bool {
    uri.ends_with(".gz")
        && content_type.is_some_and(|content_type| GZIP_CONTENT_TYPES.contains(&content_type))
}

fn gunzip(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoded = Vec::new();
    GzDecoder::new(bytes).read_to_end(&mut decoded)?;
    Ok(decoded)
}
