//! Autoindex: generate directory-index documents for repositories published
//! without one.
//!
//! # Flow
//! 1. Discover repository roots from `/repodata/repomd.xml` items.
//! 2. Skip roots that already have `{root}/{index_filename}`, so reruns never
//!    duplicate an index.
//! 3. Drive the [`IndexGenerator`] for each remaining root. Every document it
//!    yields is uploaded under its SHA-256 key and committed as a new item
//!    straight away, so progress survives a later failure.
//!
//! # Errors
//! - A failure on one root is logged and recorded in the [`AutoindexReport`];
//!   the remaining roots are still attempted.
//! - Structural failures (rejected credentials, a broken session) abort the
//!   whole run with [`AutoindexError`].
//! - Per-URI fetch gaps never reach the generator as errors; see
//!   [`GapTolerantFetcher`].

pub mod html;
pub mod yum;

use async_trait::async_trait;
use futures::StreamExt;
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Environment;
use crate::contract::{Fetcher, IndexGenerator, ItemFilter, Session, StorageClient};
use crate::error::{AutoindexError, FetchError, GenerationError, StoreError};
use crate::fetch::ContentFetcher;
use crate::model::{Item, Publish};

pub use yum::YumIndexGenerator;

/// Suffix of the metadata item marking a repository root.
pub const REPOMD_SUFFIX: &str = "/repodata/repomd.xml";

/// Content-addressed key of `content`: lowercase hex SHA-256.
pub fn object_key(content: &[u8]) -> String {
    format!("{:x}", Sha256::digest(content))
}

/// URI of the index for `relative_dir` under `base_uri`.
pub fn index_uri(base_uri: &str, relative_dir: &str, index_filename: &str) -> String {
    let mut components = vec![base_uri];
    if !relative_dir.is_empty() {
        components.push(relative_dir);
    }
    components.push(index_filename);
    components.join("/")
}

/// A repository root whose generation failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootFailure {
    pub root: String,
    pub reason: String,
}

/// Outcome of one autoindex run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AutoindexReport {
    pub roots_attempted: usize,
    pub roots_indexed: usize,
    pub items_added: usize,
    pub failures: Vec<RootFailure>,
}

impl AutoindexReport {
    /// True when there was work to do and none of it succeeded.
    pub fn all_roots_failed(&self) -> bool {
        self.roots_attempted > 0 && self.failures.len() == self.roots_attempted
    }
}

/// Passes content and structural errors through, and turns every other
/// fetch error into "absent" so one unreadable file leaves a gap in the
/// index rather than failing it.
pub struct GapTolerantFetcher<F> {
    inner: F,
}

impl<F: Fetcher> GapTolerantFetcher<F> {
    pub fn new(inner: F) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<F: Fetcher> Fetcher for GapTolerantFetcher<F> {
    async fn fetch(&self, uri: &str) -> Result<Option<String>, FetchError> {
        match self.inner.fetch(uri).await {
            Err(err) if !err.is_structural() => {
                warn!(uri, error = %err, "[AUTOINDEX] Treating unreadable content as absent");
                Ok(None)
            }
            other => other,
        }
    }
}

pub struct AutoindexEngine<G = YumIndexGenerator> {
    generator: G,
    index_filename: String,
}

impl<G: IndexGenerator> AutoindexEngine<G> {
    pub fn new(generator: G, index_filename: impl Into<String>) -> Self {
        Self {
            generator,
            index_filename: index_filename.into(),
        }
    }

    /// Roots of `publish_id` that have repository metadata but no index.
    pub fn eligible_roots<S>(&self, session: &S, publish_id: Uuid) -> Result<Vec<String>, StoreError>
    where
        S: Session + ?Sized,
    {
        let metadata = session.items(publish_id, &ItemFilter::WebUriSuffix(REPOMD_SUFFIX.into()))?;

        let mut roots = Vec::new();
        for item in metadata {
            let root = item.web_uri[..item.web_uri.len() - REPOMD_SUFFIX.len()].to_string();
            let index = index_uri(&root, "", &self.index_filename);
            if !session.items(publish_id, &ItemFilter::WebUri(index.clone()))?.is_empty() {
                debug!(%index, "[AUTOINDEX] Index already exists");
            } else if !roots.contains(&root) {
                roots.push(root);
            }
        }
        Ok(roots)
    }

    /// Generate and commit indexes for every eligible root of `publish`.
    pub async fn run<S>(
        &self,
        session: &S,
        publish: &Publish,
        env: &Environment,
        client: &dyn StorageClient,
    ) -> Result<AutoindexReport, AutoindexError>
    where
        S: Session + ?Sized,
    {
        debug!(publish_id = %publish.id, "[AUTOINDEX] Starting autoindex");

        let roots = self.eligible_roots(session, publish.id)?;
        info!(
            publish_id = %publish.id,
            count = roots.len(),
            roots = ?roots,
            "[AUTOINDEX] Found path(s) eligible for autoindex"
        );

        let fetcher =
            GapTolerantFetcher::new(ContentFetcher::new(session, publish.id, &env.bucket, client));

        let mut report = AutoindexReport::default();
        for root in &roots {
            report.roots_attempted += 1;
            match self
                .index_root(session, publish.id, &env.bucket, client, &fetcher, root)
                .await
            {
                Ok(added) => {
                    report.roots_indexed += 1;
                    report.items_added += added;
                }
                Err(err) if err.is_fatal() => {
                    error!(%root, error = %err, "[AUTOINDEX] Aborting autoindex for publish");
                    session.rollback();
                    return Err(AutoindexError::Aborted(err));
                }
                Err(err) => {
                    warn!(%root, error = %err, "[AUTOINDEX] Autoindex failed for repository root");
                    session.rollback();
                    report.failures.push(RootFailure {
                        root: root.clone(),
                        reason: err.to_string(),
                    });
                }
            }
        }

        info!(
            publish_id = %publish.id,
            indexed = report.roots_indexed,
            failed = report.failures.len(),
            items_added = report.items_added,
            "[AUTOINDEX] Autoindex complete"
        );
        Ok(report)
    }

    async fn index_root<S, F>(
        &self,
        session: &S,
        publish_id: Uuid,
        bucket: &str,
        client: &dyn StorageClient,
        fetcher: &F,
        root: &str,
    ) -> Result<usize, GenerationError>
    where
        S: Session + ?Sized,
        F: Fetcher,
    {
        let mut documents = self.generator.generate(root, fetcher);
        let mut added = 0;

        while let Some(document) = documents.next().await {
            let document = document?;
            let web_uri = index_uri(root, &document.relative_dir, &self.index_filename);
            let content = document.content.into_bytes();
            let key = object_key(&content);

            info!(%publish_id, %web_uri, %key, "[AUTOINDEX] Adding autoindex");

            client
                .put_object(bucket, &key, content)
                .await
                .map_err(|source| GenerationError::Upload {
                    web_uri: web_uri.clone(),
                    source,
                })?;

            session.add_item(Item::index(publish_id, web_uri, key))?;
            session.commit()?;
            added += 1;
        }
        Ok(added)
    }
}
