//! kstate core types: object identity, list+watch and store contracts

#![forbid(unsafe_code)]

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub mod sharding;
mod watch;

pub use sharding::Sharding;
pub use watch::{watch_channel, StopHandle, WatchStream};

pub mod prelude {
    pub use super::{
        Error, EventKind, ListOptions, ListWatch, ObjectIdentity, ObjectList, ObjectStore, RawObject, Result,
        SharedListWatch, Sharding, StopHandle, WatchEvent, WatchStream,
    };
}

/// Namespace value meaning "every namespace".
pub const NAMESPACE_ALL: &str = "";

/// Delimiter of composite resource versions built by multi-namespace sources.
pub const RESOURCE_VERSION_DELIMITER: &str = "/";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("identity: {0}")]
    Identity(String),
    #[error("expected resource version to have {expected} parts to match the number of sources, actual: {actual}")]
    ResourceVersionMismatch { expected: usize, actual: usize },
    #[error("invalid shard: ordinal {ordinal} with total {total}")]
    InvalidShard { ordinal: u32, total: u32 },
    #[error("generator returned {actual} metric families for {expected} headers")]
    FamilyCount { expected: usize, actual: usize },
    #[error("metric filter: {0}")]
    MetricFilter(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Source(#[from] anyhow::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Raw Kubernetes object as delivered by the API (JSON form).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawObject(pub Value);

impl RawObject {
    pub fn new(value: Value) -> Self { Self(value) }
    pub fn as_value(&self) -> &Value { &self.0 }
    pub fn into_value(self) -> Value { self.0 }

    /// Top-level `kind`, when present.
    pub fn kind(&self) -> Option<&str> { self.0.get("kind").and_then(Value::as_str) }

    /// Extract uid/namespace/name from `metadata`.
    ///
    /// Fails for values that carry no object metadata: non-objects, a missing or
    /// malformed `metadata` block, and API `Status` payloads (as sent with watch
    /// error events). Absent fields read as empty strings.
    pub fn identity(&self) -> Result<ObjectIdentity> {
        let obj = self
            .0
            .as_object()
            .ok_or_else(|| Error::Identity(format!("object is not a JSON map: {}", self.0)))?;
        let kind = obj.get("kind").and_then(Value::as_str);
        if kind == Some("Status") {
            return Err(Error::Identity("Status payload has no object metadata".into()));
        }
        let meta = match obj.get("metadata") {
            Some(Value::Object(m)) => m,
            Some(other) => return Err(Error::Identity(format!("metadata is not a map: {other}"))),
            None => return Err(Error::Identity("object missing metadata".into())),
        };
        Ok(ObjectIdentity {
            uid: meta_str(meta, "uid")?.to_string(),
            namespace: meta_str(meta, "namespace")?.to_string(),
            name: meta_str(meta, "name")?.to_string(),
            is_namespace: kind == Some("Namespace"),
        })
    }
}

impl From<Value> for RawObject {
    fn from(v: Value) -> Self { Self(v) }
}

fn meta_str<'a>(meta: &'a Map<String, Value>, key: &str) -> Result<&'a str> {
    match meta.get(key) {
        None | Some(Value::Null) => Ok(""),
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(Error::Identity(format!("metadata.{key} is not a string: {other}"))),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectIdentity {
    pub uid: String,
    /// Empty for cluster-scoped objects.
    pub namespace: String,
    pub name: String,
    /// The object is itself a Namespace.
    pub is_namespace: bool,
}

impl ObjectIdentity {
    /// Namespace used for filtering decisions. A Namespace object counts as
    /// living in itself.
    pub fn filter_namespace(&self) -> &str {
        if self.is_namespace { &self.name } else { &self.namespace }
    }

    pub fn is_cluster_scoped(&self) -> bool { self.namespace.is_empty() }
}

// ---- list+watch contract ----

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListOptions {
    pub resource_version: String,
    pub limit: Option<i64>,
    pub label_selector: Option<String>,
    pub field_selector: Option<String>,
    pub allow_bookmarks: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectList {
    pub items: Vec<RawObject>,
    pub resource_version: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    Added,
    Modified,
    Deleted,
    Bookmark,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchEvent {
    pub kind: EventKind,
    pub object: RawObject,
}

impl WatchEvent {
    pub fn new(kind: EventKind, object: impl Into<RawObject>) -> Self {
        Self { kind, object: object.into() }
    }
}

/// Bulk read plus change stream over one resource collection.
///
/// Every filter and combinator in the workspace both consumes and implements
/// this trait, so they stack in any order.
#[async_trait::async_trait]
pub trait ListWatch: Send + Sync {
    async fn list(&self, opts: &ListOptions) -> Result<ObjectList>;

    /// Open a change stream. The stream ends when the source is exhausted or
    /// when [`WatchStream::stop`] is called.
    async fn watch(&self, opts: &ListOptions) -> Result<WatchStream>;
}

pub type SharedListWatch = Arc<dyn ListWatch>;

// ---- store contract ----

/// Object store driven by a reflector (list → replace, watch → add/update/delete).
pub trait ObjectStore: Send + Sync {
    fn add(&self, obj: &RawObject) -> Result<()>;
    fn update(&self, obj: &RawObject) -> Result<()>;
    fn delete(&self, obj: &RawObject) -> Result<()>;
    /// Drop all contents and load `items` instead.
    fn replace(&self, items: &[RawObject], resource_version: &str) -> Result<()>;

    fn get(&self, obj: &RawObject) -> Option<RawObject>;
    fn get_by_key(&self, key: &str) -> Option<RawObject>;
    fn list(&self) -> Vec<RawObject>;
    fn list_keys(&self) -> Vec<String>;
    fn resync(&self) -> Result<()>;
}
