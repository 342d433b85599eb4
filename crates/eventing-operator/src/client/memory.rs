//! In-memory stores for reconciler tests.
//!
//! All stores created from one [`MemoryCluster`] share the same objects and record every
//! successful write in a journal, so tests can assert on the order of writes. Objects are kept
//! as JSON, which emulates the split between the main resource and the status subresource.
use std::{
    collections::{BTreeMap, BTreeSet},
    marker::PhantomData,
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;
use k8s_openapi::{
    NamespaceResourceScope,
    apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition,
};
use kube::{
    Resource, ResourceExt,
    core::{ApiResource, DynamicObject},
};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

use super::{CrdInstaller, DynamicStore, Error, ObjectKey, Result, TypedStore};

#[derive(Default)]
struct State {
    objects: BTreeMap<(String, ObjectKey), Value>,
    crds: BTreeSet<String>,
    journal: Vec<String>,
    failures: BTreeSet<(String, String)>,
    resource_version: u64,
}

#[derive(Clone, Default)]
pub(crate) struct MemoryCluster {
    state: Arc<Mutex<State>>,
}

impl MemoryCluster {
    pub fn typed<K>(&self) -> MemoryStore<K> {
        MemoryStore {
            cluster: self.clone(),
            resource: PhantomData,
        }
    }

    pub fn dynamic(&self) -> MemoryDynamicStore {
        MemoryDynamicStore {
            cluster: self.clone(),
        }
    }

    /// Stores `object` as is, including its status, without writing to the journal.
    pub fn seed<K: Resource + Serialize>(&self, kind: &str, object: &K) {
        let key = ObjectKey::from_resource(object).expect("seeded objects need a key");
        let mut value = serde_json::to_value(object).expect("seeded objects are serializable");
        let mut state = self.lock();
        state.resource_version += 1;
        value["metadata"]["resourceVersion"] = state.resource_version.to_string().into();
        state.objects.insert((kind.to_owned(), key), value);
    }

    /// Makes every following `verb` (e.g. `"update_status"`) on `kind` fail with a conflict.
    pub fn fail(&self, verb: &str, kind: &str) {
        self.lock()
            .failures
            .insert((verb.to_owned(), kind.to_owned()));
    }

    pub fn journal(&self) -> Vec<String> {
        self.lock().journal.clone()
    }

    pub fn installed_crds(&self) -> Vec<String> {
        self.lock().crds.iter().cloned().collect()
    }

    pub fn get_value(&self, kind: &str, key: &ObjectKey) -> Option<Value> {
        self.lock()
            .objects
            .get(&(kind.to_owned(), key.clone()))
            .cloned()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("memory cluster lock is poisoned")
    }

    fn get(&self, kind: &str, key: &ObjectKey) -> Option<Value> {
        self.get_value(kind, key)
    }

    fn list(&self, kind: &str, namespace: &str) -> Vec<Value> {
        self.lock()
            .objects
            .iter()
            .filter(|((object_kind, key), _)| object_kind == kind && key.namespace == namespace)
            .map(|(_, value)| value.clone())
            .collect()
    }

    fn write(&self, verb: &str, kind: &str, key: &ObjectKey, mut object: Value) -> Result<Value> {
        let mut state = self.lock();
        let conflict = || Error::Conflict {
            kind: kind.to_owned(),
            key: key.clone(),
        };

        if state.failures.contains(&(verb.to_owned(), kind.to_owned())) {
            return Err(conflict());
        }

        let stored = state.objects.get(&(kind.to_owned(), key.clone())).cloned();
        let written = match (verb, stored) {
            ("create", Some(_)) => return Err(conflict()),
            ("create", None) => {
                if let Some(object) = object.as_object_mut() {
                    object.remove("status");
                }
                object
            }
            (_, None) => {
                return Err(Error::NotFound {
                    kind: kind.to_owned(),
                    key: key.clone(),
                });
            }
            (verb, Some(mut stored)) => {
                let expected = &object["metadata"]["resourceVersion"];
                if !expected.is_null() && *expected != stored["metadata"]["resourceVersion"] {
                    return Err(conflict());
                }

                if verb == "update_status" {
                    stored["status"] = object["status"].take();
                    stored
                } else {
                    let status = stored["status"].take();
                    match object.as_object_mut() {
                        Some(fields) if status.is_null() => {
                            fields.remove("status");
                        }
                        Some(fields) => {
                            fields.insert("status".to_owned(), status);
                        }
                        None => {}
                    }
                    object
                }
            }
        };

        let mut written = written;
        if let Some(fields) = written.as_object_mut()
            && fields.get("status").is_some_and(Value::is_null)
        {
            fields.remove("status");
        }
        state.resource_version += 1;
        written["metadata"]["resourceVersion"] = state.resource_version.to_string().into();
        state
            .objects
            .insert((kind.to_owned(), key.clone()), written.clone());
        state.journal.push(format!("{verb} {kind} {key}"));

        Ok(written)
    }

    fn delete(&self, kind: &str, key: &ObjectKey) -> Result<()> {
        let mut state = self.lock();
        if state
            .failures
            .contains(&("delete".to_owned(), kind.to_owned()))
        {
            return Err(Error::Conflict {
                kind: kind.to_owned(),
                key: key.clone(),
            });
        }
        if state.objects.remove(&(kind.to_owned(), key.clone())).is_some() {
            state.journal.push(format!("delete {kind} {key}"));
        }
        Ok(())
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> T {
    serde_json::from_value(value).expect("stored objects keep their shape")
}

fn encode<T: Serialize>(object: &T) -> Value {
    serde_json::to_value(object).expect("objects are serializable")
}

pub(crate) struct MemoryStore<K> {
    cluster: MemoryCluster,
    resource: PhantomData<fn() -> K>,
}

impl<K> MemoryStore<K>
where
    K: Resource<DynamicType = ()>,
{
    fn kind() -> String {
        K::kind(&()).into_owned()
    }
}

#[async_trait]
impl<K> TypedStore<K> for MemoryStore<K>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + DeserializeOwned
        + Serialize
        + Send
        + Sync
        + 'static,
{
    async fn get(&self, key: &ObjectKey) -> Result<Option<K>> {
        Ok(self.cluster.get(&Self::kind(), key).map(decode))
    }

    async fn list(&self, namespace: &str) -> Result<Vec<K>> {
        Ok(self
            .cluster
            .list(&Self::kind(), namespace)
            .into_iter()
            .map(decode)
            .collect())
    }

    async fn create(&self, object: &K) -> Result<K> {
        let key = ObjectKey::from_resource(object)?;
        self.cluster
            .write("create", &Self::kind(), &key, encode(object))
            .map(decode)
    }

    async fn update(&self, object: &K) -> Result<K> {
        let key = ObjectKey::from_resource(object)?;
        self.cluster
            .write("update", &Self::kind(), &key, encode(object))
            .map(decode)
    }

    async fn update_status(&self, object: &K) -> Result<K> {
        let key = ObjectKey::from_resource(object)?;
        self.cluster
            .write("update_status", &Self::kind(), &key, encode(object))
            .map(decode)
    }

    async fn delete(&self, key: &ObjectKey) -> Result<()> {
        self.cluster.delete(&Self::kind(), key)
    }
}

pub(crate) struct MemoryDynamicStore {
    cluster: MemoryCluster,
}

#[async_trait]
impl DynamicStore for MemoryDynamicStore {
    async fn get(&self, resource: &ApiResource, key: &ObjectKey) -> Result<Option<DynamicObject>> {
        Ok(self.cluster.get(&resource.kind, key).map(decode))
    }

    async fn list(&self, resource: &ApiResource, namespace: &str) -> Result<Vec<DynamicObject>> {
        Ok(self
            .cluster
            .list(&resource.kind, namespace)
            .into_iter()
            .map(decode)
            .collect())
    }

    async fn create(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject> {
        let key = ObjectKey::from_resource(object)?;
        self.cluster
            .write("create", &resource.kind, &key, encode(object))
            .map(decode)
    }

    async fn update(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject> {
        let key = ObjectKey::from_resource(object)?;
        self.cluster
            .write("update", &resource.kind, &key, encode(object))
            .map(decode)
    }

    async fn update_status(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject> {
        let key = ObjectKey::from_resource(object)?;
        self.cluster
            .write("update_status", &resource.kind, &key, encode(object))
            .map(decode)
    }

    async fn delete(&self, resource: &ApiResource, key: &ObjectKey) -> Result<()> {
        self.cluster.delete(&resource.kind, key)
    }
}

#[async_trait]
impl CrdInstaller for MemoryCluster {
    async fn install(&self, crd: &CustomResourceDefinition) -> Result<()> {
        let mut state = self.lock();
        if state.crds.insert(crd.name_any()) {
            state.journal.push(format!("install CustomResourceDefinition {}", crd.name_any()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{KnativeEventing, KnativeEventingSpec, KnativeEventingStatus};

    fn eventing() -> KnativeEventing {
        let mut eventing = KnativeEventing::new("knative-eventing", KnativeEventingSpec::default());
        eventing.metadata.namespace = Some("knative-eventing".to_owned());
        eventing.status = Some(KnativeEventingStatus {
            version: Some("0.11.0".to_owned()),
            ..KnativeEventingStatus::default()
        });
        eventing
    }

    #[tokio::test]
    async fn create_drops_status_and_update_keeps_it() {
        let cluster = MemoryCluster::default();
        let store = cluster.typed::<KnativeEventing>();

        let created = store.create(&eventing()).await.expect("create succeeds");
        assert_eq!(created.status, None);

        let with_status = store
            .update_status(&eventing_with_version(&created))
            .await
            .expect("status update succeeds");
        assert!(with_status.status.is_some());

        let mut changed = with_status.clone();
        changed.spec.default_broker_class = Some("MTChannelBasedBroker".to_owned());
        changed.status = None;
        let updated = store.update(&changed).await.expect("update succeeds");
        assert_eq!(updated.status, with_status.status);
    }

    #[tokio::test]
    async fn stale_resource_version_conflicts() {
        let cluster = MemoryCluster::default();
        let store = cluster.typed::<KnativeEventing>();

        let created = store.create(&eventing()).await.expect("create succeeds");
        store.update(&created).await.expect("update succeeds");

        let err = store
            .update(&created)
            .await
            .expect_err("stale update must conflict");
        assert!(err.is_conflict());
        assert_eq!(
            cluster.journal(),
            [
                "create KnativeEventing knative-eventing/knative-eventing",
                "update KnativeEventing knative-eventing/knative-eventing"
            ]
        );
    }

    fn eventing_with_version(created: &KnativeEventing) -> KnativeEventing {
        KnativeEventing {
            status: eventing().status,
            ..created.clone()
        }
    }
}
