//! In-memory object store.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value as JsonValue;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

use super::{patch_raw_status, ObjectKey, ObjectStore, RawObject, StoreError, StoreResult};

/// Length of the random suffix appended to `generate_name`
const NAME_SUFFIX_LEN: usize = 5;

/// Object store backed by a concurrent map. Used by the CLI for a single run
/// and by tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    objects: Arc<DashMap<ObjectKey, RawObject>>,
    version: Arc<AtomicU64>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    fn next_version(&self) -> u64 {
        self.version.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn create(&self, mut obj: RawObject) -> StoreResult<RawObject> {
        if obj.kind.is_empty() {
            return Err(StoreError::Validation("object kind is empty".to_string()));
        }
        if obj.metadata.name.is_empty() {
            let prefix = obj.metadata.generate_name.clone().unwrap_or_default();
            if prefix.is_empty() {
                return Err(StoreError::Validation(
                    "object needs a name or generate_name".to_string(),
                ));
            }
            let suffix = uuid::Uuid::new_v4().simple().to_string();
            obj.metadata.name = format!("{}{}", prefix, &suffix[..NAME_SUFFIX_LEN]);
        }

        let key = obj.key();
        match self.objects.entry(key.clone()) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists(key.to_string())),
            Entry::Vacant(slot) => {
                obj.metadata.resource_version = self.next_version();
                obj.metadata.creation_timestamp = Some(Utc::now());
                trace!(%key, version = obj.metadata.resource_version, "created");
                slot.insert(obj.clone());
                Ok(obj)
            }
        }
    }

    async fn get(&self, key: &ObjectKey) -> StoreResult<RawObject> {
        self.objects
            .get(key)
            .map(|r| r.value().clone())
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn patch_status(
        &self,
        key: &ObjectKey,
        base_version: u64,
        patch: &JsonValue,
    ) -> StoreResult<RawObject> {
        let mut entry = self
            .objects
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        let current = entry.metadata.resource_version;
        if current != base_version {
            return Err(StoreError::Conflict {
                key: key.to_string(),
                expected: base_version,
                actual: current,
            });
        }
        patch_raw_status(&mut entry, patch)?;
        entry.metadata.resource_version = self.next_version();
        trace!(%key, version = entry.metadata.resource_version, "status patched");
        Ok(entry.value().clone())
    }

    async fn list(&self, kind: &str, namespace: &str) -> StoreResult<Vec<RawObject>> {
        let mut objects: Vec<RawObject> = self
            .objects
            .iter()
            .filter(|r| r.key().kind == kind && r.key().namespace == namespace)
            .map(|r| r.value().clone())
            .collect();
        objects.sort_by_key(|o| o.metadata.resource_version);
        Ok(objects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ObjectMeta;
    use serde_json::json;

    fn raw(name: &str, generate_name: Option<&str>) -> RawObject {
        RawObject {
            kind: "Task".into(),
            metadata: ObjectMeta {
                name: name.into(),
                generate_name: generate_name.map(Into::into),
                namespace: "default".into(),
                ..Default::default()
            },
            spec: json!({}),
            status: json!({}),
        }
    }

    #[tokio::test]
    async fn test_generate_name() {
        let store = MemoryStore::new();
        let obj = store.create(raw("", Some("site-"))).await.unwrap();
        assert!(obj.metadata.name.starts_with("site-"));
        assert_eq!(obj.metadata.name.len(), "site-".len() + NAME_SUFFIX_LEN);
        assert!(obj.metadata.creation_timestamp.is_some());
    }

    #[tokio::test]
    async fn test_validation_and_duplicates() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.create(raw("", None)).await,
            Err(StoreError::Validation(_))
        ));
        store.create(raw("a", None)).await.unwrap();
        assert!(matches!(
            store.create(raw("a", None)).await,
            Err(StoreError::AlreadyExists(_))
        ));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_patch_status_versions() {
        let store = MemoryStore::new();
        let obj = store.create(raw("a", None)).await.unwrap();
        let key = obj.key();
        let v1 = obj.metadata.resource_version;

        let patched = store
            .patch_status(&key, v1, &json!({"phase": "Running"}))
            .await
            .unwrap();
        assert!(patched.metadata.resource_version > v1);
        assert_eq!(patched.status["phase"], "Running");
        assert_eq!(patched.spec, json!({}));

        let err = store
            .patch_status(&key, v1, &json!({"phase": "Failed"}))
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        let missing = ObjectKey {
            kind: "Task".into(),
            namespace: "default".into(),
            name: "zzz".into(),
        };
        assert!(matches!(
            store.get(&missing).await,
            Err(StoreError::NotFound(_))
        ));
    }
}
