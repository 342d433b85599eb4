//! Narrow capability interfaces the reconcilers use to talk to the cluster.
//!
//! - [`TypedStore`] reads and writes resources whose types are compiled into the binary.
//! - [`DynamicStore`] does the same for [`DynamicObject`]s, addressed by an [`ApiResource`].
//! - [`CrdInstaller`] installs `CustomResourceDefinition`s.
//!
//! The production implementations in [`kube`](self::kube) wrap a [`::kube::Client`]. Every
//! write is conditioned on the `resourceVersion` of the object passed in, a mismatch surfaces
//! as [`Error::Conflict`].
use std::{fmt, str::FromStr};

use async_trait::async_trait;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use ::kube::{
    Resource,
    core::{ApiResource, DynamicObject},
};
use snafu::{OptionExt, Snafu};

pub mod kube;
#[cfg(test)]
pub(crate) mod memory;

pub use self::kube::{KubeCrdInstaller, KubeDynamicStore, KubeStore};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu, strum::EnumDiscriminants)]
#[strum_discriminants(derive(strum::IntoStaticStr))]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("{kind} {key} not found"))]
    NotFound { kind: String, key: ObjectKey },

    #[snafu(display("{kind} {key} was modified concurrently, its resourceVersion is stale"))]
    Conflict { kind: String, key: ObjectKey },

    #[snafu(display("failed to {verb} {kind} {key}"))]
    Request {
        source: ::kube::Error,
        verb: &'static str,
        kind: String,
        key: ObjectKey,
    },

    #[snafu(display("failed to list {kind} in namespace {namespace:?}"))]
    List {
        source: ::kube::Error,
        kind: String,
        namespace: String,
    },

    #[snafu(display("failed to install CustomResourceDefinition {name:?}"))]
    InstallCrd { source: ::kube::Error, name: String },

    #[snafu(display("failed to serialize {kind} {key}"))]
    Serialize {
        source: serde_json::Error,
        kind: String,
        key: ObjectKey,
    },

    #[snafu(display("object is missing {field}"))]
    MissingObjectKey { field: &'static str },

    #[snafu(display("invalid object key {key:?}, expected \"namespace/name\""))]
    InvalidObjectKey { key: String },
}

impl Error {
    /// Whether the error is caused by a stale `resourceVersion`, retrying with a fresh read
    /// resolves it.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Identity of a namespaced object, displayed as `namespace/name`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn from_resource<K: Resource>(resource: &K) -> Result<Self> {
        let meta = resource.meta();
        Ok(Self {
            namespace: meta
                .namespace
                .clone()
                .context(MissingObjectKeySnafu {
                    field: "metadata.namespace",
                })?,
            name: meta.name.clone().context(MissingObjectKeySnafu {
                field: "metadata.name",
            })?,
        })
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl FromStr for ObjectKey {
    type Err = Error;

    fn from_str(key: &str) -> Result<Self> {
        match key.split_once('/') {
            Some((namespace, name))
                if !namespace.is_empty() && !name.is_empty() && !name.contains('/') =>
            {
                Ok(Self::new(namespace, name))
            }
            _ => InvalidObjectKeySnafu { key }.fail(),
        }
    }
}

/// Read and write access to namespaced resources of type `K`.
#[async_trait]
pub trait TypedStore<K>: Send + Sync
where
    K: Send + Sync + 'static,
{
    /// Returns [`None`] if the object does not exist.
    async fn get(&self, key: &ObjectKey) -> Result<Option<K>>;

    async fn list(&self, namespace: &str) -> Result<Vec<K>>;

    /// Creates the object. The status is not persisted, use [`TypedStore::update_status`].
    async fn create(&self, object: &K) -> Result<K>;

    /// Replaces metadata and spec. The status is not persisted.
    async fn update(&self, object: &K) -> Result<K>;

    /// Replaces the status only.
    async fn update_status(&self, object: &K) -> Result<K>;

    /// Deleting an object that does not exist succeeds.
    async fn delete(&self, key: &ObjectKey) -> Result<()>;
}

/// Read and write access to resources whose types are only known at runtime.
#[async_trait]
pub trait DynamicStore: Send + Sync {
    async fn get(&self, resource: &ApiResource, key: &ObjectKey) -> Result<Option<DynamicObject>>;

    async fn list(&self, resource: &ApiResource, namespace: &str) -> Result<Vec<DynamicObject>>;

    async fn create(&self, resource: &ApiResource, object: &DynamicObject)
    -> Result<DynamicObject>;

    async fn update(&self, resource: &ApiResource, object: &DynamicObject)
    -> Result<DynamicObject>;

    async fn update_status(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject>;

    async fn delete(&self, resource: &ApiResource, key: &ObjectKey) -> Result<()>;
}

#[async_trait]
pub trait CrdInstaller: Send + Sync {
    /// Creates the definition. A definition that already exists counts as installed.
    async fn install(&self, crd: &CustomResourceDefinition) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn object_key_display_roundtrip() {
        let key = ObjectKey::new("knative-eventing", "knative-eventing");
        assert_eq!(key.to_string(), "knative-eventing/knative-eventing");
        assert_eq!(
            key.to_string().parse::<ObjectKey>().expect("valid key"),
            key
        );
    }

    #[rstest]
    #[case("no-slash")]
    #[case("/name")]
    #[case("namespace/")]
    #[case("a/b/c")]
    fn invalid_object_keys(#[case] key: &str) {
        assert!(matches!(
            key.parse::<ObjectKey>(),
            Err(Error::InvalidObjectKey { .. })
        ));
    }

    #[test]
    fn object_key_requires_namespace() {
        let eventing = crate::crd::KnativeEventing::new("knative-eventing", Default::default());
        assert!(matches!(
            ObjectKey::from_resource(&eventing),
            Err(Error::MissingObjectKey {
                field: "metadata.namespace"
            })
        ));
    }
}
