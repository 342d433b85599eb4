//! Store implementations backed by the Kubernetes API server.
use std::{fmt::Debug, marker::PhantomData};

use async_trait::async_trait;
use k8s_openapi::{
    NamespaceResourceScope,
    apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition,
};
use kube::{
    Api, Client, Resource, ResourceExt,
    api::{DeleteParams, ListParams, Patch, PatchParams, PostParams},
    core::{ApiResource, DynamicObject},
};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Value, json};
use snafu::ResultExt;
use tracing::{debug, instrument};

use super::{
    CrdInstaller, DynamicStore, Error, InstallCrdSnafu, ListSnafu, ObjectKey, RequestSnafu,
    Result, SerializeSnafu, TypedStore,
};

/// Parameters shared by all writes of one operator instance.
#[derive(Clone, Debug)]
struct WriteParams {
    post_params: PostParams,
    patch_params: PatchParams,
    delete_params: DeleteParams,
}

impl WriteParams {
    fn new(field_manager: &str) -> Self {
        Self {
            post_params: PostParams {
                field_manager: Some(field_manager.to_owned()),
                ..PostParams::default()
            },
            patch_params: PatchParams {
                field_manager: Some(field_manager.to_owned()),
                ..PatchParams::default()
            },
            delete_params: DeleteParams::default(),
        }
    }
}

/// [`TypedStore`] over [`kube::Api`].
pub struct KubeStore<K> {
    client: Client,
    params: WriteParams,
    resource: PhantomData<fn() -> K>,
}

impl<K> KubeStore<K> {
    pub fn new(client: Client, field_manager: &str) -> Self {
        Self {
            client,
            params: WriteParams::new(field_manager),
            resource: PhantomData,
        }
    }
}

impl<K> Clone for KubeStore<K> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            params: self.params.clone(),
            resource: PhantomData,
        }
    }
}

impl<K> KubeStore<K>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>,
{
    fn api(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn kind() -> String {
        K::kind(&()).into_owned()
    }
}

#[async_trait]
impl<K> TypedStore<K> for KubeStore<K>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + DeserializeOwned
        + Serialize
        + Send
        + Sync
        + 'static,
{
    async fn get(&self, key: &ObjectKey) -> Result<Option<K>> {
        get(&self.api(&key.namespace), &Self::kind(), key).await
    }

    async fn list(&self, namespace: &str) -> Result<Vec<K>> {
        list(&self.api(namespace), &Self::kind(), namespace).await
    }

    #[instrument(skip_all, fields(kind = %Self::kind(), object = %object.name_any()))]
    async fn create(&self, object: &K) -> Result<K> {
        let key = ObjectKey::from_resource(object)?;
        create(&self.api(&key.namespace), &self.params, &Self::kind(), &key, object).await
    }

    #[instrument(skip_all, fields(kind = %Self::kind(), object = %object.name_any()))]
    async fn update(&self, object: &K) -> Result<K> {
        let key = ObjectKey::from_resource(object)?;
        replace(&self.api(&key.namespace), &self.params, &Self::kind(), &key, object).await
    }

    #[instrument(skip_all, fields(kind = %Self::kind(), object = %object.name_any()))]
    async fn update_status(&self, object: &K) -> Result<K> {
        let key = ObjectKey::from_resource(object)?;
        let kind = Self::kind();
        let mut value = serde_json::to_value(object).context(SerializeSnafu {
            kind: kind.as_str(),
            key: key.clone(),
        })?;
        let status = value.get_mut("status").map(Value::take).unwrap_or_default();

        patch_status(
            &self.api(&key.namespace),
            &self.params,
            &kind,
            &key,
            object.resource_version(),
            status,
        )
        .await
    }

    async fn delete(&self, key: &ObjectKey) -> Result<()> {
        delete(&self.api(&key.namespace), &self.params, &Self::kind(), key).await
    }
}

/// [`DynamicStore`] over [`kube::Api`] of [`DynamicObject`]s.
#[derive(Clone)]
pub struct KubeDynamicStore {
    client: Client,
    params: WriteParams,
}

impl KubeDynamicStore {
    pub fn new(client: Client, field_manager: &str) -> Self {
        Self {
            client,
            params: WriteParams::new(field_manager),
        }
    }

    fn api(&self, resource: &ApiResource, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, resource)
    }
}

#[async_trait]
impl DynamicStore for KubeDynamicStore {
    async fn get(&self, resource: &ApiResource, key: &ObjectKey) -> Result<Option<DynamicObject>> {
        get(&self.api(resource, &key.namespace), &resource.kind, key).await
    }

    async fn list(&self, resource: &ApiResource, namespace: &str) -> Result<Vec<DynamicObject>> {
        list(&self.api(resource, namespace), &resource.kind, namespace).await
    }

    #[instrument(skip_all, fields(kind = %resource.kind, object = %object.name_any()))]
    async fn create(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject> {
        let key = ObjectKey::from_resource(object)?;
        create(
            &self.api(resource, &key.namespace),
            &self.params,
            &resource.kind,
            &key,
            object,
        )
        .await
    }

    #[instrument(skip_all, fields(kind = %resource.kind, object = %object.name_any()))]
    async fn update(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject> {
        let key = ObjectKey::from_resource(object)?;
        replace(
            &self.api(resource, &key.namespace),
            &self.params,
            &resource.kind,
            &key,
            object,
        )
        .await
    }

    #[instrument(skip_all, fields(kind = %resource.kind, object = %object.name_any()))]
    async fn update_status(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject> {
        let key = ObjectKey::from_resource(object)?;
        let status = object.data.get("status").cloned().unwrap_or_default();

        patch_status(
            &self.api(resource, &key.namespace),
            &self.params,
            &resource.kind,
            &key,
            object.resource_version(),
            status,
        )
        .await
    }

    async fn delete(&self, resource: &ApiResource, key: &ObjectKey) -> Result<()> {
        delete(
            &self.api(resource, &key.namespace),
            &self.params,
            &resource.kind,
            key,
        )
        .await
    }
}

/// [`CrdInstaller`] creating cluster-scoped `CustomResourceDefinition`s.
#[derive(Clone)]
pub struct KubeCrdInstaller {
    client: Client,
    params: WriteParams,
}

impl KubeCrdInstaller {
    pub fn new(client: Client, field_manager: &str) -> Self {
        Self {
            client,
            params: WriteParams::new(field_manager),
        }
    }
}

#[async_trait]
impl CrdInstaller for KubeCrdInstaller {
    #[instrument(skip_all, fields(crd = %crd.name_any()))]
    async fn install(&self, crd: &CustomResourceDefinition) -> Result<()> {
        let api: Api<CustomResourceDefinition> = Api::all(self.client.clone());

        match api.create(&self.params.post_params, crd).await {
            Ok(_) => {
                debug!("installed CustomResourceDefinition");
                Ok(())
            }
            Err(err) if is_already_exists(&err) => {
                debug!("CustomResourceDefinition is already installed");
                Ok(())
            }
            Err(source) => Err(source).context(InstallCrdSnafu {
                name: crd.name_any(),
            }),
        }
    }
}

/// Returns true if the API server refused a create because the object already exists.
fn is_already_exists(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(response) if response.reason == "AlreadyExists")
}

/// Classifies a failed write, so that callers can tell a stale read from other failures.
fn write_error(source: kube::Error, verb: &'static str, kind: &str, key: &ObjectKey) -> Error {
    let code = match &source {
        kube::Error::Api(response) => Some(response.code),
        _ => None,
    };

    match code {
        Some(409) => Error::Conflict {
            kind: kind.to_owned(),
            key: key.clone(),
        },
        Some(404) => Error::NotFound {
            kind: kind.to_owned(),
            key: key.clone(),
        },
        _ => Error::Request {
            source,
            verb,
            kind: kind.to_owned(),
            key: key.clone(),
        },
    }
}

async fn get<T>(api: &Api<T>, kind: &str, key: &ObjectKey) -> Result<Option<T>>
where
    T: Clone + DeserializeOwned + Debug,
{
    api.get_opt(&key.name).await.context(RequestSnafu {
        verb: "get",
        kind,
        key: key.clone(),
    })
}

async fn list<T>(api: &Api<T>, kind: &str, namespace: &str) -> Result<Vec<T>>
where
    T: Clone + DeserializeOwned + Debug,
{
    api.list(&ListParams::default())
        .await
        .map(|list| list.items)
        .context(ListSnafu { kind, namespace })
}

async fn create<T>(
    api: &Api<T>,
    params: &WriteParams,
    kind: &str,
    key: &ObjectKey,
    object: &T,
) -> Result<T>
where
    T: Clone + DeserializeOwned + Serialize + Debug,
{
    api.create(&params.post_params, object)
        .await
        .map_err(|source| write_error(source, "create", kind, key))
}

async fn replace<T>(
    api: &Api<T>,
    params: &WriteParams,
    kind: &str,
    key: &ObjectKey,
    object: &T,
) -> Result<T>
where
    T: Clone + DeserializeOwned + Serialize + Debug,
{
    api.replace(&key.name, &params.post_params, object)
        .await
        .map_err(|source| write_error(source, "update", kind, key))
}

/// Writes the status subresource with a merge patch.
///
/// The patch carries the `resourceVersion` the status was computed from, the API server
/// refuses it with a conflict if the object changed in the meantime.
async fn patch_status<T>(
    api: &Api<T>,
    params: &WriteParams,
    kind: &str,
    key: &ObjectKey,
    resource_version: Option<String>,
    status: Value,
) -> Result<T>
where
    T: Clone + DeserializeOwned + Debug,
{
    let mut patch = json!({ "status": status });
    if let Some(resource_version) = resource_version {
        patch["metadata"] = json!({ "resourceVersion": resource_version });
    }

    api.patch_status(&key.name, &params.patch_params, &Patch::Merge(&patch))
        .await
        .map_err(|source| write_error(source, "update status of", kind, key))
}

async fn delete<T>(api: &Api<T>, params: &WriteParams, kind: &str, key: &ObjectKey) -> Result<()>
where
    T: Clone + DeserializeOwned + Debug,
{
    match api.delete(&key.name, &params.delete_params).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(response)) if response.code == 404 => {
            debug!(%kind, %key, "object is already gone");
            Ok(())
        }
        Err(source) => Err(write_error(source, "delete", kind, key)),
    }
}
