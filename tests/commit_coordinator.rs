mod common;

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, BoxStream, StreamExt};

use common::{
    link_item, object_item, publish_in, seed, settings, BucketFactory, Failure, MemoryBucket,
};
use exodus_publish::commit::PublishCommitCoordinator;
use exodus_publish::contract::{Fetcher, GeneratedIndex, IndexGenerator, ItemFilter, Session};
use exodus_publish::error::{
    AutoindexError, CommitError, GenerationError, PoolError, ResolutionError,
};
use exodus_publish::model::{Publish, PublishState};
use exodus_publish::pool::ClientPoolRegistry;
use exodus_publish::store::MemoryStore;

const KEY_A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

fn coordinator(bucket: Arc<MemoryBucket>) -> PublishCommitCoordinator {
    let pools = ClientPoolRegistry::new(BucketFactory::new(bucket)).with_size(1);
    PublishCommitCoordinator::new(Arc::new(settings()), Arc::new(pools))
}

fn committed_publish(store: &MemoryStore, publish: &Publish) -> Publish {
    store
        .committed()
        .publishes
        .into_iter()
        .find(|p| p.id == publish.id)
        .unwrap()
}

#[tokio::test]
async fn successful_commit_resolves_links_and_indexes() {
    let bucket = MemoryBucket::new();
    let store = MemoryStore::new();
    let publish = publish_in(&store, PublishState::Committing);
    let before = publish.updated;
    seed(
        &store,
        vec![
            object_item(&publish, "/r/repodata/repomd.xml", KEY_A),
            link_item(&publish, "/r/latest", "/r/repodata/repomd.xml"),
        ],
    );

    let state = coordinator(bucket)
        .commit(&store, publish.id, None)
        .await
        .unwrap();

    assert_eq!(state, PublishState::Committed);
    let stored = committed_publish(&store, &publish);
    assert_eq!(stored.state, PublishState::Committed);
    assert!(stored.updated.is_some());
    assert!(stored.updated >= before);

    let committed = store.committed();
    let link = committed.items.iter().find(|i| i.web_uri == "/r/latest").unwrap();
    assert_eq!(link.object_key.as_deref(), Some(KEY_A));
    assert!(committed
        .items
        .iter()
        .any(|i| i.web_uri == "/r/__exodus_autoindex__"));
}

#[tokio::test]
async fn unresolved_link_fails_the_publish_without_rewrites() {
    let bucket = MemoryBucket::new();
    let store = MemoryStore::new();
    let publish = publish_in(&store, PublishState::Committing);
    seed(
        &store,
        vec![
            object_item(&publish, "/a", KEY_A),
            link_item(&publish, "/good", "/a"),
            link_item(&publish, "/bad", "/nowhere"),
        ],
    );

    let state = coordinator(bucket.clone())
        .commit(&store, publish.id, None)
        .await
        .unwrap();

    assert_eq!(state, PublishState::Failed);
    let stored = committed_publish(&store, &publish);
    assert_eq!(stored.state, PublishState::Failed);
    assert!(stored.detail.unwrap().contains("Link: '/nowhere'"));

    let good = store
        .items(publish.id, &ItemFilter::WebUri("/good".into()))
        .unwrap();
    assert_eq!(good[0].object_key, None);
    assert_eq!(bucket.put_count(), 0);
}

#[tokio::test]
async fn unknown_environment_fails_the_publish() {
    let store = MemoryStore::new();
    let mut publish = Publish::new("nowhere");
    publish.transition(PublishState::Committing);
    store.save_publish(&publish).unwrap();
    store.commit().unwrap();

    let state = coordinator(MemoryBucket::new())
        .commit(&store, publish.id, None)
        .await
        .unwrap();

    assert_eq!(state, PublishState::Failed);
    assert_eq!(
        committed_publish(&store, &publish).detail.as_deref(),
        Some("Invalid environment=\"nowhere\"")
    );
}

#[tokio::test]
async fn publish_must_be_committing() {
    let store = MemoryStore::new();
    let publish = publish_in(&store, PublishState::Pending);

    let err = coordinator(MemoryBucket::new())
        .commit(&store, publish.id, None)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        CommitError::InvalidState { state: PublishState::Pending, .. }
    ));
    assert_eq!(committed_publish(&store, &publish).state, PublishState::Pending);
}

#[tokio::test]
async fn missing_publish_is_an_error() {
    let store = MemoryStore::new();
    let id = uuid::Uuid::new_v4();

    let err = coordinator(MemoryBucket::new())
        .commit(&store, id, None)
        .await
        .unwrap_err();

    assert!(matches!(err, CommitError::NotFound(missing) if missing == id));
}

#[tokio::test]
async fn structural_storage_failure_fails_the_publish() {
    let bucket = MemoryBucket::new();
    bucket.fail_puts(Failure::Unauthorized);
    let store = MemoryStore::new();
    let publish = publish_in(&store, PublishState::Committing);
    seed(&store, vec![object_item(&publish, "/r/repodata/repomd.xml", KEY_A)]);

    let state = coordinator(bucket)
        .commit(&store, publish.id, None)
        .await
        .unwrap();

    assert_eq!(state, PublishState::Failed);
    let detail = committed_publish(&store, &publish).detail.unwrap();
    assert!(detail.starts_with("autoindex aborted"));
}

#[tokio::test]
async fn every_root_failing_fails_the_publish() {
    let bucket = MemoryBucket::new();
    bucket.fail_puts(Failure::Io);
    let store = MemoryStore::new();
    let publish = publish_in(&store, PublishState::Committing);
    seed(
        &store,
        vec![
            object_item(&publish, "/a/repodata/repomd.xml", KEY_A),
            object_item(&publish, "/b/repodata/repomd.xml", KEY_A),
        ],
    );

    let state = coordinator(bucket)
        .commit(&store, publish.id, None)
        .await
        .unwrap();

    assert_eq!(state, PublishState::Failed);
    let detail = committed_publish(&store, &publish).detail.unwrap();
    assert!(detail.contains("/a:"));
    assert!(detail.contains("/b:"));
}

#[tokio::test]
async fn pool_timeout_leaves_publish_committing() {
    let bucket = MemoryBucket::new();
    let pools = Arc::new(
        ClientPoolRegistry::new(BucketFactory::new(bucket))
            .with_size(1)
            .with_acquire_timeout(Some(Duration::from_millis(20))),
    );
    let coordinator = PublishCommitCoordinator::new(Arc::new(settings()), pools.clone());
    let store = MemoryStore::new();
    let publish = publish_in(&store, PublishState::Committing);

    let _held = pools.acquire("test-profile").await.unwrap();
    let err = coordinator
        .commit(&store, publish.id, None)
        .await
        .unwrap_err();

    assert!(matches!(err, CommitError::Pool(PoolError::Timeout { .. })));
    assert_eq!(
        committed_publish(&store, &publish).state,
        PublishState::Committing
    );
}

#[tokio::test]
async fn rejected_credentials_while_building_clients_fail_the_publish() {
    let factory = BucketFactory::new(MemoryBucket::new());
    factory.fail_with(Some(Failure::Unauthorized));
    let pools = Arc::new(ClientPoolRegistry::new(factory.clone()).with_size(1));
    let coordinator = PublishCommitCoordinator::new(Arc::new(settings()), pools);
    let store = MemoryStore::new();
    let publish = publish_in(&store, PublishState::Committing);

    let state = coordinator
        .commit(&store, publish.id, None)
        .await
        .unwrap();

    assert_eq!(state, PublishState::Failed);
    let stored = committed_publish(&store, &publish);
    assert_eq!(stored.state, PublishState::Failed);
    assert!(stored
        .detail
        .unwrap()
        .contains("failed to construct storage clients for profile 'test-profile'"));
    assert_eq!(factory.created(), 0);
}

#[tokio::test]
async fn transient_client_construction_failure_leaves_publish_committing() {
    let factory = BucketFactory::new(MemoryBucket::new());
    factory.fail_with(Some(Failure::Io));
    let pools = Arc::new(ClientPoolRegistry::new(factory.clone()).with_size(1));
    let coordinator = PublishCommitCoordinator::new(Arc::new(settings()), pools);
    let store = MemoryStore::new();
    let publish = publish_in(&store, PublishState::Committing);

    let err = coordinator
        .commit(&store, publish.id, None)
        .await
        .unwrap_err();

    assert!(matches!(err, CommitError::Pool(PoolError::Construction { .. })));
    assert_eq!(
        committed_publish(&store, &publish).state,
        PublishState::Committing
    );
}

/// Never finishes generating.
struct Stalled;

impl IndexGenerator for Stalled {
    fn generate<'a>(
        &'a self,
        _base_uri: &'a str,
        _fetcher: &'a dyn Fetcher,
    ) -> BoxStream<'a, Result<GeneratedIndex, GenerationError>> {
        stream::pending().boxed()
    }
}

#[tokio::test]
async fn deadline_abandons_the_job_and_leaves_publish_committing() {
    let pools = Arc::new(ClientPoolRegistry::new(BucketFactory::new(MemoryBucket::new())));
    let coordinator = PublishCommitCoordinator::with_generator(Arc::new(settings()), pools, Stalled);
    let store = MemoryStore::new();
    let publish = publish_in(&store, PublishState::Committing);
    seed(&store, vec![object_item(&publish, "/r/repodata/repomd.xml", KEY_A)]);

    let err = coordinator
        .commit(&store, publish.id, Some(Duration::from_millis(50)))
        .await
        .unwrap_err();

    assert!(matches!(err, CommitError::Deadline(_)));
    let stored = store.publish(publish.id).unwrap().unwrap();
    assert_eq!(stored.state, PublishState::Committing);
    assert_eq!(committed_publish(&store, &publish).state, PublishState::Committing);
}

#[tokio::test]
async fn autoindex_only_leaves_state_unchanged() {
    let bucket = MemoryBucket::new();
    let store = MemoryStore::new();
    let publish = publish_in(&store, PublishState::Pending);
    seed(&store, vec![object_item(&publish, "/r/repodata/repomd.xml", KEY_A)]);

    let report = coordinator(bucket)
        .autoindex(&store, publish.id)
        .await
        .unwrap();

    assert_eq!(report.items_added, 1);
    assert_eq!(committed_publish(&store, &publish).state, PublishState::Pending);
}

#[tokio::test]
async fn autoindex_only_reports_rejected_credentials() {
    let bucket = MemoryBucket::new();
    bucket.fail_puts(Failure::Unauthorized);
    let store = MemoryStore::new();
    let publish = publish_in(&store, PublishState::Pending);
    seed(&store, vec![object_item(&publish, "/r/repodata/repomd.xml", KEY_A)]);

    let err = coordinator(bucket)
        .autoindex(&store, publish.id)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        CommitError::Autoindex(AutoindexError::Aborted(_))
    ));
    assert!(err.to_string().starts_with("autoindex aborted"));
    assert_eq!(committed_publish(&store, &publish).state, PublishState::Pending);
    assert!(!store
        .committed()
        .items
        .iter()
        .any(|i| i.web_uri == "/r/__exodus_autoindex__"));
}

#[tokio::test]
async fn autoindex_only_reports_unresolved_links() {
    let bucket = MemoryBucket::new();
    let store = MemoryStore::new();
    let publish = publish_in(&store, PublishState::Pending);
    seed(
        &store,
        vec![
            object_item(&publish, "/r/repodata/repomd.xml", KEY_A),
            link_item(&publish, "/r/latest", "/nowhere"),
        ],
    );

    let err = coordinator(bucket.clone())
        .autoindex(&store, publish.id)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        CommitError::Resolution(ResolutionError::Unresolved { ref link_to, .. }) if link_to == "/nowhere"
    ));
    assert_eq!(bucket.put_count(), 0);
    assert_eq!(committed_publish(&store, &publish).state, PublishState::Pending);
}

#[tokio::test]
async fn autoindex_only_commits_link_rewrites_without_repositories() {
    let bucket = MemoryBucket::new();
    let store = MemoryStore::new();
    let publish = publish_in(&store, PublishState::Pending);
    seed(
        &store,
        vec![
            object_item(&publish, "/a", KEY_A),
            link_item(&publish, "/l", "/a"),
        ],
    );

    let report = coordinator(bucket)
        .autoindex(&store, publish.id)
        .await
        .unwrap();

    assert_eq!(report.items_added, 0);
    let committed = store.committed();
    let link = committed.items.iter().find(|i| i.web_uri == "/l").unwrap();
    assert_eq!(link.object_key.as_deref(), Some(KEY_A));
}
