// Keel Core - In-memory cluster backend
//
// Standalone implementation of the cluster-API contract: dashmap storage,
// monotonic resourceVersion, generation bump on spec change, finalizer-aware
// deletion, and ownerReference cascade. Used by keeld in standalone mode and
// by every test.

use dashmap::DashMap;
use serde_json::Value;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;

use crate::client::{ClusterBackend, WatchEvent, WatchEventType};
use crate::error::{KeelError, KeelResult};

type ObjectKey = (String, String, String);

pub struct InMemoryCluster {
    objects: DashMap<ObjectKey, Value>,
    version: AtomicU64,
    watch_tx: broadcast::Sender<WatchEvent>,
}

impl Default for InMemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCluster {
    pub fn new() -> Self {
        let (watch_tx, _) = broadcast::channel(1024);
        Self {
            objects: DashMap::new(),
            version: AtomicU64::new(1),
            watch_tx,
        }
    }

    /// Load all YAML manifests from a directory into the cluster.
    ///
    /// Files that fail to parse are skipped with a warning; returns the
    /// number of objects created.
    pub async fn load_dir(&self, path: &Path) -> KeelResult<usize> {
        if !path.exists() {
            return Ok(0);
        }

        let mut count = 0;
        for entry in std::fs::read_dir(path)? {
            let entry = entry?;
            let file_path = entry.path();
            if !file_path
                .extension()
                .is_some_and(|e| e == "yaml" || e == "yml")
            {
                continue;
            }

            let content = std::fs::read_to_string(&file_path)?;
            for document in content.split("\n---") {
                if document.trim().is_empty() {
                    continue;
                }
                match serde_yaml::from_str::<Value>(document) {
                    Ok(object) => {
                        let kind = match object.get("kind").and_then(Value::as_str) {
                            Some(kind) => kind.to_string(),
                            None => {
                                tracing::warn!("manifest in {:?} has no kind, skipping", file_path);
                                continue;
                            }
                        };
                        match self.create(&kind, object).await {
                            Ok(created) => {
                                tracing::debug!(
                                    "loaded {} {}",
                                    kind,
                                    created["metadata"]["name"].as_str().unwrap_or("?")
                                );
                                count += 1;
                            }
                            Err(e) => {
                                tracing::warn!("failed to load object from {:?}: {}", file_path, e)
                            }
                        }
                    }
                    Err(e) => tracing::warn!("failed to parse {:?}: {}", file_path, e),
                }
            }
        }
        Ok(count)
    }

    fn next_version(&self) -> String {
        self.version.fetch_add(1, Ordering::SeqCst).to_string()
    }

    fn emit(&self, kind: &str, event_type: WatchEventType, namespace: &str, name: &str) {
        let _ = self.watch_tx.send(WatchEvent {
            kind: kind.to_string(),
            event_type,
            namespace: namespace.to_string(),
            name: name.to_string(),
        });
    }

    fn key_of(kind: &str, object: &Value) -> KeelResult<ObjectKey> {
        let name = object["metadata"]["name"]
            .as_str()
            .ok_or_else(|| KeelError::validation("object has no metadata.name"))?
            .to_string();
        let namespace = object["metadata"]["namespace"]
            .as_str()
            .unwrap_or("default")
            .to_string();
        Ok((kind.to_string(), namespace, name))
    }

    fn check_version(stored: &Value, incoming: &Value, key: &ObjectKey) -> KeelResult<()> {
        let incoming_rv = incoming["metadata"]["resourceVersion"].as_str();
        let stored_rv = stored["metadata"]["resourceVersion"].as_str();
        if let Some(rv) = incoming_rv {
            if Some(rv) != stored_rv {
                return Err(KeelError::conflict(format!("{} {}/{}", key.0, key.1, key.2)));
            }
        }
        Ok(())
    }

    /// Remove an object and everything that carries an owner reference to it
    fn remove_and_cascade(&self, key: &ObjectKey) {
        let removed = match self.objects.remove(key) {
            Some((_, value)) => value,
            None => return,
        };
        let uid = removed["metadata"]["uid"].as_str().map(str::to_string);
        self.emit(&key.0, WatchEventType::Deleted, &key.1, &key.2);

        let owned: Vec<ObjectKey> = self
            .objects
            .iter()
            .filter(|entry| {
                if entry.key().1 != key.1 {
                    return false;
                }
                entry.value()["metadata"]["ownerReferences"]
                    .as_array()
                    .is_some_and(|owners| {
                        owners.iter().any(|o| {
                            let kind_match = o["kind"].as_str() == Some(key.0.as_str())
                                && o["name"].as_str() == Some(key.2.as_str());
                            let uid_match = match (o["uid"].as_str(), uid.as_deref()) {
                                (Some(owner_uid), Some(deleted_uid)) => owner_uid == deleted_uid,
                                _ => true,
                            };
                            kind_match && uid_match
                        })
                    })
            })
            .map(|entry| entry.key().clone())
            .collect();

        for child in owned {
            tracing::debug!("cascade deleting {} {}/{}", child.0, child.1, child.2);
            self.remove_and_cascade(&child);
        }
    }

    fn finalizers_empty(object: &Value) -> bool {
        object["metadata"]["finalizers"]
            .as_array()
            .map(|f| f.is_empty())
            .unwrap_or(true)
    }
}

#[async_trait::async_trait]
impl ClusterBackend for InMemoryCluster {
    async fn get(&self, kind: &str, namespace: &str, name: &str) -> KeelResult<Option<Value>> {
        let key = (kind.to_string(), namespace.to_string(), name.to_string());
        Ok(self.objects.get(&key).map(|v| v.clone()))
    }

    async fn list(&self, kind: &str, namespace: &str) -> KeelResult<Vec<Value>> {
        let mut items: Vec<Value> = self
            .objects
            .iter()
            .filter(|entry| entry.key().0 == kind && entry.key().1 == namespace)
            .map(|entry| entry.value().clone())
            .collect();
        items.sort_by(|a, b| {
            a["metadata"]["name"]
                .as_str()
                .unwrap_or("")
                .cmp(b["metadata"]["name"].as_str().unwrap_or(""))
        });
        Ok(items)
    }

    async fn list_all(&self, kind: &str) -> KeelResult<Vec<Value>> {
        let mut items: Vec<Value> = self
            .objects
            .iter()
            .filter(|entry| entry.key().0 == kind)
            .map(|entry| entry.value().clone())
            .collect();
        items.sort_by(|a, b| {
            let key_a = (
                a["metadata"]["namespace"].as_str().unwrap_or("").to_string(),
                a["metadata"]["name"].as_str().unwrap_or("").to_string(),
            );
            let key_b = (
                b["metadata"]["namespace"].as_str().unwrap_or("").to_string(),
                b["metadata"]["name"].as_str().unwrap_or("").to_string(),
            );
            key_a.cmp(&key_b)
        });
        Ok(items)
    }

    async fn create(&self, kind: &str, mut object: Value) -> KeelResult<Value> {
        let key = Self::key_of(kind, &object)?;
        if self.objects.contains_key(&key) {
            return Err(KeelError::conflict(format!(
                "{} {}/{} already exists",
                key.0, key.1, key.2
            )));
        }

        let meta = &mut object["metadata"];
        meta["namespace"] = Value::String(key.1.clone());
        meta["uid"] = Value::String(uuid::Uuid::new_v4().to_string());
        meta["generation"] = Value::from(1);
        meta["resourceVersion"] = Value::String(self.next_version());
        meta["creationTimestamp"] = serde_json::to_value(chrono::Utc::now())?;

        self.objects.insert(key.clone(), object.clone());
        self.emit(kind, WatchEventType::Added, &key.1, &key.2);
        Ok(object)
    }

    async fn update(&self, kind: &str, incoming: Value) -> KeelResult<Value> {
        let key = Self::key_of(kind, &incoming)?;
        let mut entry = self
            .objects
            .get_mut(&key)
            .ok_or_else(|| KeelError::not_found(kind, format!("{}/{}", key.1, key.2)))?;
        Self::check_version(&entry, &incoming, &key)?;

        let stored = entry.value().clone();
        let mut merged = incoming;

        // The status sub-resource is not writable through update.
        merged["status"] = stored["status"].clone();
        merged["metadata"]["uid"] = stored["metadata"]["uid"].clone();
        merged["metadata"]["creationTimestamp"] = stored["metadata"]["creationTimestamp"].clone();
        if stored["metadata"]["deletionTimestamp"].is_string() {
            merged["metadata"]["deletionTimestamp"] =
                stored["metadata"]["deletionTimestamp"].clone();
        }

        let spec_changed = stored["spec"] != merged["spec"];
        let generation = stored["metadata"]["generation"].as_i64().unwrap_or(1);
        merged["metadata"]["generation"] =
            Value::from(if spec_changed { generation + 1 } else { generation });
        merged["metadata"]["resourceVersion"] = Value::String(self.next_version());

        *entry = merged.clone();
        let deleting = merged["metadata"]["deletionTimestamp"].is_string();
        drop(entry);

        // Clearing the last finalizer of a deleting object releases it.
        if deleting && Self::finalizers_empty(&merged) {
            self.remove_and_cascade(&key);
            return Ok(merged);
        }

        self.emit(kind, WatchEventType::Modified, &key.1, &key.2);
        Ok(merged)
    }

    async fn update_status(&self, kind: &str, incoming: Value) -> KeelResult<Value> {
        let key = Self::key_of(kind, &incoming)?;
        let mut entry = self
            .objects
            .get_mut(&key)
            .ok_or_else(|| KeelError::not_found(kind, format!("{}/{}", key.1, key.2)))?;
        Self::check_version(&entry, &incoming, &key)?;

        let mut merged = entry.value().clone();
        merged["status"] = incoming["status"].clone();
        merged["metadata"]["resourceVersion"] = Value::String(self.next_version());

        *entry = merged.clone();
        drop(entry);

        self.emit(kind, WatchEventType::Modified, &key.1, &key.2);
        Ok(merged)
    }

    async fn delete(&self, kind: &str, namespace: &str, name: &str) -> KeelResult<()> {
        let key = (kind.to_string(), namespace.to_string(), name.to_string());

        let needs_finalization = {
            let mut entry = match self.objects.get_mut(&key) {
                Some(entry) => entry,
                None => return Ok(()),
            };
            let object = entry.value_mut();
            if Self::finalizers_empty(object) {
                false
            } else {
                if !object["metadata"]["deletionTimestamp"].is_string() {
                    object["metadata"]["deletionTimestamp"] =
                        serde_json::to_value(chrono::Utc::now())?;
                    object["metadata"]["resourceVersion"] = Value::String(self.next_version());
                }
                true
            }
        };

        if needs_finalization {
            self.emit(kind, WatchEventType::Modified, namespace, name);
        } else {
            self.remove_and_cascade(&key);
        }
        Ok(())
    }

    fn watch(&self) -> broadcast::Receiver<WatchEvent> {
        self.watch_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(kind: &str, name: &str) -> Value {
        json!({
            "apiVersion": "keel.dev/v1",
            "kind": kind,
            "metadata": {"name": name, "namespace": "default"},
            "spec": {"value": 1}
        })
    }

    #[tokio::test]
    async fn test_create_assigns_identity() {
        let cluster = InMemoryCluster::new();
        let created = cluster.create("Agent", object("Agent", "a")).await.unwrap();

        assert!(created["metadata"]["uid"].is_string());
        assert_eq!(created["metadata"]["generation"], 1);
        assert!(created["metadata"]["resourceVersion"].is_string());
    }

    #[tokio::test]
    async fn test_update_conflicts_on_stale_version() {
        let cluster = InMemoryCluster::new();
        let created = cluster.create("Agent", object("Agent", "a")).await.unwrap();

        let mut fresh = created.clone();
        fresh["spec"]["value"] = json!(2);
        cluster.update("Agent", fresh).await.unwrap();

        let mut stale = created;
        stale["spec"]["value"] = json!(3);
        let err = cluster.update("Agent", stale).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_generation_bumps_only_on_spec_change() {
        let cluster = InMemoryCluster::new();
        let created = cluster.create("Agent", object("Agent", "a")).await.unwrap();

        let mut unchanged = created.clone();
        unchanged["metadata"]["labels"] = json!({"x": "y"});
        let updated = cluster.update("Agent", unchanged).await.unwrap();
        assert_eq!(updated["metadata"]["generation"], 1);

        let mut changed = updated;
        changed["spec"]["value"] = json!(9);
        let updated = cluster.update("Agent", changed).await.unwrap();
        assert_eq!(updated["metadata"]["generation"], 2);
    }

    #[tokio::test]
    async fn test_update_preserves_status() {
        let cluster = InMemoryCluster::new();
        let mut created = cluster.create("Agent", object("Agent", "a")).await.unwrap();

        created["status"] = json!({"phase": "ready"});
        let with_status = cluster.update_status("Agent", created).await.unwrap();

        let mut spec_write = with_status.clone();
        spec_write["status"] = json!({"phase": "bogus"});
        spec_write["spec"]["value"] = json!(2);
        let updated = cluster.update("Agent", spec_write).await.unwrap();
        assert_eq!(updated["status"]["phase"], "ready");
    }

    #[tokio::test]
    async fn test_cascade_delete_follows_owner_references() {
        let cluster = InMemoryCluster::new();
        let owner = cluster
            .create("A2AServer", object("A2AServer", "srv"))
            .await
            .unwrap();

        let mut child = object("Agent", "child");
        child["metadata"]["ownerReferences"] = json!([{
            "kind": "A2AServer",
            "name": "srv",
            "uid": owner["metadata"]["uid"],
            "controller": true
        }]);
        cluster.create("Agent", child).await.unwrap();
        cluster.create("Agent", object("Agent", "standalone")).await.unwrap();

        cluster.delete("A2AServer", "default", "srv").await.unwrap();

        assert!(cluster.get("Agent", "default", "child").await.unwrap().is_none());
        assert!(cluster
            .get("Agent", "default", "standalone")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_finalizer_defers_deletion() {
        let cluster = InMemoryCluster::new();
        let mut query = object("Query", "q");
        query["metadata"]["finalizers"] = json!(["keel.dev/query-finalizer"]);
        cluster.create("Query", query).await.unwrap();

        cluster.delete("Query", "default", "q").await.unwrap();
        let stored = cluster.get("Query", "default", "q").await.unwrap().unwrap();
        assert!(stored["metadata"]["deletionTimestamp"].is_string());

        let mut released = stored;
        released["metadata"]["finalizers"] = json!([]);
        cluster.update("Query", released).await.unwrap();
        assert!(cluster.get("Query", "default", "q").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_watch_emits_lifecycle_events() {
        let cluster = InMemoryCluster::new();
        let mut rx = cluster.watch();

        cluster.create("Model", object("Model", "m")).await.unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, "Model");
        assert_eq!(event.event_type, WatchEventType::Added);
        assert_eq!(event.name, "m");
    }

    #[tokio::test]
    async fn test_load_dir_skips_bad_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("good.yaml"),
            "kind: Model\nmetadata:\n  name: m\nspec: {}\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("bad.yaml"), ": not yaml ::").unwrap();

        let cluster = InMemoryCluster::new();
        let count = cluster.load_dir(dir.path()).await.unwrap();
        assert_eq!(count, 1);
    }
}
