#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;

use exodus_publish::autoindex::object_key;
use exodus_publish::config::{Environment, Settings};
use exodus_publish::contract::{ClientFactory, Session, StorageClient, StoredObject};
use exodus_publish::error::StorageError;
use exodus_publish::model::{Item, Publish, PublishState};
use exodus_publish::store::MemoryStore;

pub const BUCKET: &str = "test-bucket";
pub const ENV: &str = "test";
/// Reading this key returns the id of the client that served it.
pub const CLIENT_ID_KEY: &str = "__client_id__";

#[derive(Debug, Clone, Copy)]
pub enum Failure {
    Unauthorized,
    Io,
}

impl Failure {
    fn to_error(self, key: &str) -> StorageError {
        match self {
            Failure::Unauthorized => StorageError::Unauthorized(format!("denied: {key}")),
            Failure::Io => StorageError::Io(format!("connection reset: {key}")),
        }
    }
}

/// Object store shared by every client a [`BucketFactory`] builds.
#[derive(Default)]
pub struct MemoryBucket {
    objects: Mutex<HashMap<String, StoredObject>>,
    get_failures: Mutex<HashMap<String, Failure>>,
    put_failure: Mutex<Option<Failure>>,
    puts: AtomicUsize,
}

impl MemoryBucket {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, key: &str, body: impl Into<Vec<u8>>, content_type: Option<&str>) {
        self.objects.lock().unwrap().insert(
            key.to_string(),
            StoredObject {
                body: body.into(),
                content_type: content_type.map(str::to_string),
            },
        );
    }

    /// Store `text` under its content key and return the key.
    pub fn insert_text(&self, text: &str) -> String {
        let key = object_key(text.as_bytes());
        self.insert(&key, text.as_bytes().to_vec(), Some("text/xml"));
        key
    }

    /// Store gzipped `text` under the key of the compressed bytes.
    pub fn insert_gzipped(&self, text: &str, content_type: &str) -> String {
        let body = gzip(text);
        let key = object_key(&body);
        self.insert(&key, body, Some(content_type));
        key
    }

    pub fn fail_get(&self, key: &str, failure: Failure) {
        self.get_failures
            .lock()
            .unwrap()
            .insert(key.to_string(), failure);
    }

    pub fn fail_puts(&self, failure: Failure) {
        *self.put_failure.lock().unwrap() = Some(failure);
    }

    pub fn text(&self, key: &str) -> Option<String> {
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .map(|object| String::from_utf8(object.body.clone()).unwrap())
    }

    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }
}

pub fn gzip(text: &str) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(text.as_bytes()).unwrap();
    encoder.finish().unwrap()
}

pub struct BucketClient {
    pub id: usize,
    bucket: Arc<MemoryBucket>,
}

impl BucketClient {
    pub fn new(id: usize, bucket: Arc<MemoryBucket>) -> Self {
        Self { id, bucket }
    }
}

#[async_trait]
impl StorageClient for BucketClient {
    async fn get_object(&self, bucket: &str, key: &str) -> Result<StoredObject, StorageError> {
        if key == CLIENT_ID_KEY {
            return Ok(StoredObject {
                body: self.id.to_string().into_bytes(),
                content_type: None,
            });
        }
        if let Some(failure) = self.bucket.get_failures.lock().unwrap().get(key) {
            return Err(failure.to_error(key));
        }
        self.bucket
            .objects
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }

    async fn put_object(&self, _bucket: &str, key: &str, body: Vec<u8>) -> Result<(), StorageError> {
        if let Some(failure) = *self.bucket.put_failure.lock().unwrap() {
            return Err(failure.to_error(key));
        }
        self.bucket.puts.fetch_add(1, Ordering::SeqCst);
        self.bucket.insert(key, body, Some("text/html; charset=UTF-8"));
        Ok(())
    }
}

/// Builds [`BucketClient`]s with increasing ids.
pub struct BucketFactory {
    pub bucket: Arc<MemoryBucket>,
    created: AtomicUsize,
    failure: Mutex<Option<Failure>>,
}

impl BucketFactory {
    pub fn new(bucket: Arc<MemoryBucket>) -> Arc<Self> {
        Arc::new(Self {
            bucket,
            created: AtomicUsize::new(0),
            failure: Mutex::new(None),
        })
    }

    pub fn fail_with(&self, failure: Option<Failure>) {
        *self.failure.lock().unwrap() = failure;
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClientFactory for BucketFactory {
    async fn create(&self, profile: &str) -> Result<Box<dyn StorageClient>, StorageError> {
        if let Some(failure) = *self.failure.lock().unwrap() {
            return Err(failure.to_error(profile));
        }
        let id = self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(BucketClient::new(id, self.bucket.clone())))
    }
}

pub async fn client_id(client: &dyn StorageClient) -> usize {
    let object = client.get_object(BUCKET, CLIENT_ID_KEY).await.unwrap();
    String::from_utf8(object.body).unwrap().parse().unwrap()
}

pub fn settings() -> Settings {
    Settings {
        environments: vec![Environment {
            name: ENV.to_string(),
            aws_profile: Some("test-profile".to_string()),
            bucket: BUCKET.to_string(),
        }],
        ..Settings::default()
    }
}

pub fn environment() -> Environment {
    settings().environments.remove(0)
}

/// A committed publish in `state` for the test environment.
pub fn publish_in(store: &MemoryStore, state: PublishState) -> Publish {
    let mut publish = Publish::new(ENV);
    publish.transition(state);
    store.save_publish(&publish).unwrap();
    store.commit().unwrap();
    publish
}

pub fn object_item(publish: &Publish, web_uri: &str, key: &str) -> Item {
    Item {
        id: uuid::Uuid::new_v4(),
        publish_id: publish.id,
        web_uri: web_uri.to_string(),
        object_key: Some(key.to_string()),
        content_type: None,
        link_to: None,
    }
}

pub fn link_item(publish: &Publish, web_uri: &str, link_to: &str) -> Item {
    Item {
        id: uuid::Uuid::new_v4(),
        publish_id: publish.id,
        web_uri: web_uri.to_string(),
        object_key: None,
        content_type: None,
        link_to: Some(link_to.to_string()),
    }
}

/// Add `items` to the store and commit them.
pub fn seed(store: &MemoryStore, items: Vec<Item>) {
    for item in items {
        store.add_item(item).unwrap();
    }
    store.commit().unwrap();
}

pub fn repomd_xml(primary_href: &str, primary_size: u64) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<repomd xmlns="http://linux.duke.edu/metadata/repo" xmlns:rpm="http://linux.duke.edu/metadata/rpm">
  <revision>1700000000</revision>
  <data type="primary">
    <checksum type="sha256">abc</checksum>
    <location href="{primary_href}"/>
    <timestamp>1700000000</timestamp>
    <size>{primary_size}</size>
    <open-size>9999</open-size>
  </data>
  <data type="filelists">
    <location href="repodata/filelists.xml.gz"/>
    <timestamp>1700000100.5</timestamp>
    <size>321</size>
  </data>
</repomd>
"#
    )
}

pub fn primary_xml(packages: &[(&str, u64)]) -> String {
    let mut body = String::new();
    for (href, size) in packages {
        body.push_str(&format!(
            r#"  <package type="rpm">
    <name>pkg</name>
    <time file="1700000200" build="1690000000"/>
    <size package="{size}" installed="1" archive="1"/>
    <location href="{href}"/>
  </package>
"#
        ));
    }
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<metadata xmlns="http://linux.duke.edu/metadata/common" packages="{}">
{body}</metadata>
"#,
        packages.len()
    )
}
