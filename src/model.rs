//! Publish and item records, and the rules an item must satisfy before it
//! may join a publish.

use std::fmt;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

/// Object key sentinel meaning "explicitly no content at this URI".
pub const ABSENT_KEY: &str = "absent";

/// Content type of every generated index document.
pub const INDEX_CONTENT_TYPE: &str = "text/html; charset=UTF-8";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PublishState {
    Pending,
    Committing,
    Committed,
    Failed,
}

impl PublishState {
    pub fn as_str(self) -> &'static str {
        match self {
            PublishState::Pending => "PENDING",
            PublishState::Committing => "COMMITTING",
            PublishState::Committed => "COMMITTED",
            PublishState::Failed => "FAILED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PublishState::Committed | PublishState::Failed)
    }
}

impl fmt::Display for PublishState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A batch of items destined for one CDN environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Publish {
    pub id: Uuid,
    pub env: String,
    pub state: PublishState,
    #[serde(default)]
    pub updated: Option<DateTime<Utc>>,
    /// Human-readable cause, set when the publish fails.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Publish {
    pub fn new(env: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            env: env.into(),
            state: PublishState::Pending,
            updated: None,
            detail: None,
        }
    }

    /// Refreshes `updated`. Called by whoever mutates the publish.
    pub fn touch(&mut self) {
        self.updated = Some(Utc::now());
    }

    pub fn transition(&mut self, state: PublishState) {
        self.state = state;
        self.touch();
    }

    pub fn fail(&mut self, detail: impl Into<String>) {
        self.detail = Some(detail.into());
        self.transition(PublishState::Failed);
    }
}

/// One URI-to-content (or URI-to-URI) mapping within a publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: Uuid,
    pub publish_id: Uuid,
    pub web_uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_to: Option<String>,
}

impl Item {
    /// A generated index document stored under `object_key`.
    pub fn index(publish_id: Uuid, web_uri: impl Into<String>, object_key: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            publish_id,
            web_uri: web_uri.into(),
            object_key: Some(object_key),
            content_type: Some(INDEX_CONTENT_TYPE.to_string()),
            link_to: None,
        }
    }

    pub fn is_link(&self) -> bool {
        self.link_to.is_some()
    }

    /// Key of real stored content, if any. Tombstones and unresolved links
    /// have none.
    pub fn content_key(&self) -> Option<&str> {
        self.object_key.as_deref().filter(|key| *key != ABSENT_KEY)
    }
}

/// An item as submitted by a publisher, prior to validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewItem {
    pub web_uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_to: Option<String>,
}

impl NewItem {
    pub fn object(web_uri: impl Into<String>, object_key: impl Into<String>) -> Self {
        Self {
            web_uri: web_uri.into(),
            object_key: Some(object_key.into()),
            ..Default::default()
        }
    }

    pub fn link(web_uri: impl Into<String>, link_to: impl Into<String>) -> Self {
        Self {
            web_uri: web_uri.into(),
            link_to: Some(link_to.into()),
            ..Default::default()
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Checks the item and returns it with normalized paths. Empty strings
    /// are treated as unset.
    pub fn validate(&self, index_filename: &str) -> Result<NewItem, ValidationError> {
        let describe = || format!("{self:?}");
        let object_key = non_empty(&self.object_key);
        let content_type = non_empty(&self.content_type);
        let link_to = non_empty(&self.link_to);

        if self.web_uri.is_empty() {
            return Err(ValidationError::MissingUri(describe()));
        }
        let web_uri = normalize_path(&self.web_uri);

        if link_to.is_some() && object_key.is_some() {
            return Err(ValidationError::LinkAndKey(describe()));
        }
        if link_to.is_some() && content_type.is_some() {
            return Err(ValidationError::LinkContentType(describe()));
        }

        match (object_key, link_to) {
            (_, Some(_)) => {}
            (Some(ABSENT_KEY), None) => {
                if content_type.is_some() {
                    return Err(ValidationError::AbsentContentType(describe()));
                }
            }
            (Some(key), None) => {
                if !sha256_pattern().is_match(key) {
                    return Err(ValidationError::InvalidObjectKey(describe()));
                }
            }
            (None, None) => return Err(ValidationError::MissingTarget(describe())),
        }

        if let Some(content_type) = content_type {
            if !mimetype_pattern().is_match(content_type) {
                return Err(ValidationError::InvalidContentType(describe()));
            }
        }

        if !index_filename.is_empty() && web_uri.rsplit('/').next() == Some(index_filename) {
            return Err(ValidationError::ReservedFilename(web_uri));
        }

        Ok(NewItem {
            web_uri,
            object_key: object_key.map(str::to_owned),
            content_type: content_type.map(str::to_owned),
            link_to: link_to.map(normalize_path),
        })
    }

    /// Binds an already validated item to a publish.
    pub fn into_item(self, publish_id: Uuid) -> Item {
        Item {
            id: Uuid::new_v4(),
            publish_id,
            web_uri: self.web_uri,
            object_key: self.object_key,
            content_type: self.content_type,
            link_to: self.link_to,
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

fn sha256_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[0-9a-f]{64}$").expect("valid regex"))
}

// TYPE/SUBTYPE[+SUFFIX][;PARAMETER=VALUE]
fn mimetype_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[-\w]+/[-.\w]+(\+[-\w]*)?(;[-\w]+=[-\w]+)?").expect("valid regex")
    })
}

/// Normalizes a CDN path: collapses repeated slashes, `.` and `..` segments,
/// drops any trailing slash and forces a leading `/`.
pub fn normalize_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    format!("/{}", segments.join("/"))
}
