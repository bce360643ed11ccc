mod common;

use common::{object_item, publish_in, seed, BucketClient, Failure, MemoryBucket, BUCKET};
use exodus_publish::error::{FetchError, StorageError};
use exodus_publish::fetch::ContentFetcher;
use exodus_publish::model::PublishState;
use exodus_publish::store::MemoryStore;

#[tokio::test]
async fn fetches_plain_content_by_uri() {
    let bucket = MemoryBucket::new();
    let key = bucket.insert_text("hello");
    let store = MemoryStore::new();
    let publish = publish_in(&store, PublishState::Committing);
    seed(&store, vec![object_item(&publish, "/greeting.txt", &key)]);
    let client = BucketClient::new(0, bucket);

    let fetcher = ContentFetcher::new(&store, publish.id, BUCKET, &client);

    assert_eq!(
        fetcher.fetch_text("/greeting.txt").await.unwrap().as_deref(),
        Some("hello")
    );
}

#[tokio::test]
async fn decompresses_gzip_served_as_octet_stream() {
    let bucket = MemoryBucket::new();
    let key = bucket.insert_gzipped("<metadata/>", "binary/octet-stream");
    let store = MemoryStore::new();
    let publish = publish_in(&store, PublishState::Committing);
    seed(&store, vec![object_item(&publish, "/repo/primary.xml.gz", &key)]);
    let client = BucketClient::new(0, bucket);

    let fetcher = ContentFetcher::new(&store, publish.id, BUCKET, &client);

    assert_eq!(
        fetcher.fetch_text("/repo/primary.xml.gz").await.unwrap().as_deref(),
        Some("<metadata/>")
    );
}

#[tokio::test]
async fn gzip_without_gz_suffix_is_not_decompressed() {
    let bucket = MemoryBucket::new();
    let key = bucket.insert_gzipped("data", "application/x-gzip");
    let store = MemoryStore::new();
    let publish = publish_in(&store, PublishState::Committing);
    seed(&store, vec![object_item(&publish, "/repo/blob", &key)]);
    let client = BucketClient::new(0, bucket);

    let fetcher = ContentFetcher::new(&store, publish.id, BUCKET, &client);

    // Raw gzip bytes are not valid UTF-8.
    assert!(matches!(
        fetcher.fetch_text("/repo/blob").await,
        Err(FetchError::Decode { .. })
    ));
}

#[tokio::test]
async fn unknown_uri_and_tombstone_read_as_absent() {
    let bucket = MemoryBucket::new();
    let store = MemoryStore::new();
    let publish = publish_in(&store, PublishState::Committing);
    seed(&store, vec![object_item(&publish, "/deleted", "absent")]);
    let client = BucketClient::new(0, bucket);

    let fetcher = ContentFetcher::new(&store, publish.id, BUCKET, &client);

    assert_eq!(fetcher.fetch_text("/nowhere").await.unwrap(), None);
    assert_eq!(fetcher.fetch_text("/deleted").await.unwrap(), None);
}

#[tokio::test]
async fn storage_errors_are_reported_with_their_uri() {
    let bucket = MemoryBucket::new();
    let key = bucket.insert_text("secret");
    bucket.fail_get(&key, Failure::Unauthorized);
    let store = MemoryStore::new();
    let publish = publish_in(&store, PublishState::Committing);
    seed(&store, vec![object_item(&publish, "/secret", &key)]);
    let client = BucketClient::new(0, bucket);

    let fetcher = ContentFetcher::new(&store, publish.id, BUCKET, &client);
    let err = fetcher.fetch_text("/secret").await.unwrap_err();

    assert!(err.is_structural());
    match err {
        FetchError::Storage { uri, source } => {
            assert_eq!(uri, "/secret");
            assert!(matches!(source, StorageError::Unauthorized(_)));
        }
        other => panic!("unexpected error: {other}"),
    }
}
