//! Index generation for yum repositories.
//!
//! The generator reads `repodata/repomd.xml`, follows it to the primary
//! package list and rebuilds the directory tree those two documents
//! describe. One listing is emitted per directory, root first. A root whose
//! `repomd.xml` is absent gets a single empty listing.

use std::collections::{BTreeMap, VecDeque};

use futures::stream::{self, BoxStream, StreamExt};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::{debug, warn};

use super::html::{render_listing, EntryKind, IndexEntry};
use crate::contract::{Fetcher, GeneratedIndex, IndexGenerator};
use crate::error::GenerationError;

#[derive(Debug, Clone, Copy, Default)]
pub struct YumIndexGenerator;

impl YumIndexGenerator {
    pub fn new() -> Self {
        Self
    }
}

enum State {
    Start,
    Emitting(VecDeque<Listing>),
}

impl IndexGenerator for YumIndexGenerator {
    fn generate<'a>(
        &'a self,
        base_uri: &'a str,
        fetcher: &'a dyn Fetcher,
    ) -> BoxStream<'a, Result<GeneratedIndex, GenerationError>> {
        stream::try_unfold(State::Start, move |state| async move {
            let mut pending = match state {
                State::Start => scan_repository(base_uri, fetcher).await?,
                State::Emitting(pending) => pending,
            };
            let next = pending
                .pop_front()
                .map(|listing| (listing.render(base_uri), State::Emitting(pending)));
            Ok::<_, GenerationError>(next)
        })
        .boxed()
    }
}

async fn scan_repository(
    base_uri: &str,
    fetcher: &dyn Fetcher,
) -> Result<VecDeque<Listing>, GenerationError> {
    let mut tree = DirTree::default();

    let repomd_uri = format!("{base_uri}/repodata/repomd.xml");
    let Some(repomd) = fetcher.fetch(&repomd_uri).await? else {
        debug!(uri = %repomd_uri, "[AUTOINDEX] No repository metadata, indexing empty root");
        return Ok(tree.into_listings());
    };
    tree.insert("repodata/repomd.xml", Some(repomd.len() as u64), None);

    let records = parse_repomd(&repomd_uri, &repomd)?;
    for record in &records {
        tree.insert(&record.href, record.size, record.timestamp);
    }

    let primary = records.iter().find(|record| record.kind == "primary");
    if let Some(primary) = primary {
        let primary_uri = format!("{base_uri}/{}", primary.href);
        match fetcher.fetch(&primary_uri).await? {
            Some(xml) => {
                for package in parse_primary(&primary_uri, &xml)? {
                    tree.insert(&package.href, package.size, package.time);
                }
            }
            None => warn!(uri = %primary_uri, "[AUTOINDEX] Primary metadata unavailable"),
        }
    }

    Ok(tree.into_listings())
}

/// Entries of one directory, relative to the repository root.
struct Listing {
    relative_dir: String,
    entries: Vec<IndexEntry>,
}

impl Listing {
    fn render(self, base_uri: &str) -> GeneratedIndex {
        let path = if self.relative_dir.is_empty() {
            base_uri.to_string()
        } else {
            format!("{base_uri}/{}", self.relative_dir)
        };
        let content = render_listing(
            &format!("{path}/"),
            &self.entries,
            !self.relative_dir.is_empty(),
        );
        GeneratedIndex {
            relative_dir: self.relative_dir,
            content,
        }
    }
}

#[derive(Default)]
struct DirTree {
    dirs: BTreeMap<String, BTreeMap<String, IndexEntry>>,
}

impl DirTree {
    fn insert(&mut self, path: &str, size: Option<u64>, time: Option<i64>) {
        let segments: Vec<&str> = path
            .split('/')
            .filter(|segment| !segment.is_empty() && *segment != ".")
            .collect();
        if segments.contains(&"..") {
            debug!(path, "[AUTOINDEX] Skipping path outside repository");
            return;
        }
        let Some((file, dirs)) = segments.split_last() else {
            return;
        };

        for depth in 0..dirs.len() {
            let parent = dirs[..depth].join("/");
            let name = dirs[depth].to_string();
            self.dirs.entry(parent).or_default().insert(
                name.clone(),
                IndexEntry {
                    name,
                    kind: EntryKind::Dir,
                    size: None,
                    time: None,
                },
            );
        }

        let name = file.to_string();
        self.dirs.entry(dirs.join("/")).or_default().insert(
            name.clone(),
            IndexEntry {
                name,
                kind: EntryKind::File,
                size,
                time,
            },
        );
    }

    fn into_listings(mut self) -> VecDeque<Listing> {
        self.dirs.entry(String::new()).or_default();
        self.dirs
            .into_iter()
            .map(|(relative_dir, entries)| {
                let mut entries: Vec<IndexEntry> = entries.into_values().collect();
                entries.sort_by(|a, b| {
                    (a.kind != EntryKind::Dir, &a.name).cmp(&(b.kind != EntryKind::Dir, &b.name))
                });
                Listing {
                    relative_dir,
                    entries,
                }
            })
            .collect()
    }
}

/// A `<data>` record of `repomd.xml`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepomdRecord {
    pub kind: String,
    pub href: String,
    pub size: Option<u64>,
    pub timestamp: Option<i64>,
}

/// A `<package>` of the primary metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageRecord {
    pub href: String,
    pub size: Option<u64>,
    pub time: Option<i64>,
}

#[derive(Clone, Copy)]
enum TextField {
    Size,
    Timestamp,
}

pub fn parse_repomd(uri: &str, xml: &str) -> Result<Vec<RepomdRecord>, GenerationError> {
    let mut reader = Reader::from_str(xml);
    let mut records = Vec::new();
    let mut seen_root = false;
    let mut current: Option<RepomdRecord> = None;
    let mut field: Option<TextField> = None;
    let mut text = String::new();

    loop {
        let event = reader
            .read_event()
            .map_err(|e| parse_error(uri, e.to_string()))?;
        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let opens = matches!(event, Event::Start(_));
                match e.local_name().as_ref() {
                    b"repomd" => seen_root = true,
                    b"data" => {
                        current = Some(RepomdRecord {
                            kind: attr(e, b"type").unwrap_or_default(),
                            href: String::new(),
                            size: None,
                            timestamp: None,
                        });
                    }
                    b"location" => {
                        if let Some(record) = current.as_mut() {
                            record.href = attr(e, b"href").unwrap_or_default();
                        }
                    }
                    b"size" if opens && current.is_some() => field = Some(TextField::Size),
                    b"timestamp" if opens && current.is_some() => {
                        field = Some(TextField::Timestamp)
                    }
                    _ => {}
                }
                text.clear();
            }
            Event::Text(ref e) => {
                if field.is_some() {
                    let unescaped = e.unescape().map_err(|e| parse_error(uri, e.to_string()))?;
                    text.push_str(&unescaped);
                }
            }
            Event::End(ref e) => match e.local_name().as_ref() {
                b"size" | b"timestamp" => {
                    if let (Some(record), Some(field)) = (current.as_mut(), field.take()) {
                        match field {
                            TextField::Size => record.size = text.trim().parse().ok(),
                            TextField::Timestamp => record.timestamp = parse_epoch(&text),
                        }
                    }
                }
                b"data" => {
                    if let Some(record) = current.take().filter(|r| !r.href.is_empty()) {
                        records.push(record);
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    if !seen_root {
        return Err(parse_error(uri, "missing <repomd> element"));
    }
    Ok(records)
}

pub fn parse_primary(uri: &str, xml: &str) -> Result<Vec<PackageRecord>, GenerationError> {
    let mut reader = Reader::from_str(xml);
    let mut packages = Vec::new();
    let mut seen_root = false;
    let mut current: Option<PackageRecord> = None;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| parse_error(uri, e.to_string()))?;
        match event {
            Event::Start(ref e) | Event::Empty(ref e) => match e.local_name().as_ref() {
                b"metadata" => seen_root = true,
                b"package" => {
                    current = Some(PackageRecord {
                        href: String::new(),
                        size: None,
                        time: None,
                    })
                }
                b"location" => {
                    if let Some(package) = current.as_mut() {
                        package.href = attr(e, b"href").unwrap_or_default();
                    }
                }
                b"size" => {
                    if let Some(package) = current.as_mut() {
                        package.size = attr(e, b"package").and_then(|v| v.parse().ok());
                    }
                }
                b"time" => {
                    if let Some(package) = current.as_mut() {
                        package.time = attr(e, b"file").as_deref().and_then(parse_epoch);
                    }
                }
                _ => {}
            },
            Event::End(ref e) if e.local_name().as_ref() == b"package" => {
                if let Some(package) = current.take().filter(|p| !p.href.is_empty()) {
                    packages.push(package);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !seen_root {
        return Err(parse_error(uri, "missing <metadata> element"));
    }
    Ok(packages)
}

fn attr(e: &BytesStart<'_>, name: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|attr| attr.key.local_name().as_ref() == name)
        .map(|attr| match attr.unescape_value() {
            Ok(value) => value.into_owned(),
            Err(_) => String::from_utf8_lossy(&attr.value).into_owned(),
        })
}

// Timestamps are sometimes written with a fractional part.
fn parse_epoch(text: &str) -> Option<i64> {
    text.trim().parse::<f64>().ok().map(|secs| secs as i64)
}

fn parse_error(uri: &str, message: impl Into<String>) -> GenerationError {
    GenerationError::Parse {
        uri: uri.to_string(),
        message: message.into(),
    }
}
