//! Work-order object store.
//!
//! Task and playbook work orders are persisted as [`Object`]s with separate
//! `spec` and `status` parts. The engine only relies on the [`ObjectStore`]
//! contract:
//!
//! - `create` assigns a resource version (and a name when only
//!   `generate_name` is set)
//! - `get` returns the latest record
//! - `patch_status` applies a JSON merge patch to the status sub-resource,
//!   failing with [`StoreError::Conflict`] when the caller's base version is
//!   stale
//!
//! Optimistic updates go through [`update_status`], which re-reads and
//! re-applies the patch on conflict instead of locking.

mod memory;
pub mod patch;

pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use patch::{apply_merge_patch, create_merge_patch, is_empty_patch};

/// Namespace used when none is configured
pub const DEFAULT_NAMESPACE: &str = "default";

/// Errors reported by an object store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object '{0}' not found")]
    NotFound(String),

    #[error("object '{0}' already exists")]
    AlreadyExists(String),

    #[error("conflict on '{key}': base version {expected}, current version {actual}")]
    Conflict {
        key: String,
        expected: u64,
        actual: u64,
    },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Whether the error is a stale-version conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Reference to the object that owns another
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerReference {
    pub kind: String,
    pub name: String,
}

/// Identity and bookkeeping shared by every stored object
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generate_name: Option<String>,
    pub namespace: String,
    pub resource_version: u64,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<OwnerReference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
}

/// Unique address of a stored object
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

/// Untyped stored record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawObject {
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: JsonValue,
    pub status: JsonValue,
}

impl RawObject {
    /// Key of this record
    pub fn key(&self) -> ObjectKey {
        ObjectKey {
            kind: self.kind.clone(),
            namespace: self.metadata.namespace.clone(),
            name: self.metadata.name.clone(),
        }
    }
}

/// Spec types name the kind of object they belong to
pub trait Resource {
    const KIND: &'static str;
}

/// Typed stored object
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Object<S, St> {
    pub metadata: ObjectMeta,
    pub spec: S,
    pub status: St,
}

impl<S: Resource, St> Object<S, St> {
    /// Key of this object
    pub fn key(&self) -> ObjectKey {
        ObjectKey {
            kind: S::KIND.to_string(),
            namespace: self.metadata.namespace.clone(),
            name: self.metadata.name.clone(),
        }
    }
}

impl<S, St> Object<S, St>
where
    S: Resource + Serialize + DeserializeOwned,
    St: Serialize + DeserializeOwned,
{
    fn to_raw(&self) -> StoreResult<RawObject> {
        Ok(RawObject {
            kind: S::KIND.to_string(),
            metadata: self.metadata.clone(),
            spec: serde_json::to_value(&self.spec)?,
            status: serde_json::to_value(&self.status)?,
        })
    }

    fn from_raw(raw: RawObject) -> StoreResult<Self> {
        if raw.kind != S::KIND {
            return Err(StoreError::Validation(format!(
                "expected kind {}, found {}",
                S::KIND,
                raw.kind
            )));
        }
        Ok(Self {
            metadata: raw.metadata,
            spec: serde_json::from_value(raw.spec)?,
            status: serde_json::from_value(raw.status)?,
        })
    }
}

/// Persistence contract for work orders
#[async_trait]
pub trait ObjectStore: Send + Sync + fmt::Debug {
    /// Persist a new object and return it as stored
    async fn create(&self, obj: RawObject) -> StoreResult<RawObject>;

    /// Read the latest version of an object
    async fn get(&self, key: &ObjectKey) -> StoreResult<RawObject>;

    /// Apply a merge patch to the status of the object at `base_version`
    async fn patch_status(
        &self,
        key: &ObjectKey,
        base_version: u64,
        patch: &JsonValue,
    ) -> StoreResult<RawObject>;

    /// All objects of a kind in a namespace
    async fn list(&self, kind: &str, namespace: &str) -> StoreResult<Vec<RawObject>>;
}

/// Shared handle to a store
pub type SharedStore = Arc<dyn ObjectStore>;

/// Create a typed object
pub async fn create<S, St>(store: &dyn ObjectStore, obj: &Object<S, St>) -> StoreResult<Object<S, St>>
where
    S: Resource + Serialize + DeserializeOwned,
    St: Serialize + DeserializeOwned,
{
    Object::from_raw(store.create(obj.to_raw()?).await?)
}

/// Read a typed object
pub async fn get<S, St>(store: &dyn ObjectStore, key: &ObjectKey) -> StoreResult<Object<S, St>>
where
    S: Resource + Serialize + DeserializeOwned,
    St: Serialize + DeserializeOwned,
{
    Object::from_raw(store.get(key).await?)
}

/// List typed objects of a namespace
pub async fn list<S, St>(store: &dyn ObjectStore, namespace: &str) -> StoreResult<Vec<Object<S, St>>>
where
    S: Resource + Serialize + DeserializeOwned,
    St: Serialize + DeserializeOwned,
{
    store
        .list(S::KIND, namespace)
        .await?
        .into_iter()
        .map(Object::from_raw)
        .collect()
}

/// Persist `desired.status` as a merge patch against `base`.
///
/// On a version conflict the latest object is re-read and the same patch is
/// re-applied on top of it, up to `retries` times.
pub async fn update_status<S, St>(
    store: &dyn ObjectStore,
    base: &Object<S, St>,
    desired: &Object<S, St>,
    retries: u32,
) -> StoreResult<Object<S, St>>
where
    S: Resource + Serialize + DeserializeOwned,
    St: Serialize + DeserializeOwned,
{
    let patch = create_merge_patch(
        &serde_json::to_value(&base.status)?,
        &serde_json::to_value(&desired.status)?,
    );
    let key = base.key();
    if is_empty_patch(&patch) {
        return Ok(Object::from_raw(store.get(&key).await?)?);
    }

    let mut version = base.metadata.resource_version;
    let mut attempt = 0;
    loop {
        match store.patch_status(&key, version, &patch).await {
            Ok(raw) => return Object::from_raw(raw),
            Err(StoreError::Conflict { actual, .. }) if attempt < retries => {
                attempt += 1;
                warn!(%key, attempt, "status patch conflict, retrying on fresh read");
                let latest = store.get(&key).await?;
                debug!(%key, stale = version, current = actual, "re-read object");
                version = latest.metadata.resource_version;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Apply a patch to a raw status value (shared by store implementations)
pub(crate) fn patch_raw_status(obj: &mut RawObject, patch: &JsonValue) -> StoreResult<()> {
    if !patch.is_object() {
        return Err(StoreError::Validation(
            "status patch must be an object".to_string(),
        ));
    }
    apply_merge_patch(&mut obj.status, patch);
    Ok(())
}
