//! The set of resources making up one Knative Eventing release.
//!
//! A manifest is loaded once from a directory of YAML files and then applied (or deleted) as a
//! whole. [`Transformer`]s adapt individual objects to the [`KnativeEventing`] resource being
//! reconciled right before they are applied.
//!
//! [`KnativeEventing`]: crate::crd::KnativeEventing
use std::{
    ffi::OsStr,
    fs,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use ::kube::{
    ResourceExt,
    core::{ApiResource, DynamicObject, GroupVersionKind},
    runtime::reflector::ObjectRef,
};
use serde::Deserialize;
use snafu::{ResultExt, Snafu, ensure};

pub use self::{
    kube::KubeManifest,
    transform::{DefaultBrokerClass, Transformer},
};

#[cfg(test)]
pub(crate) mod fake;
pub mod kube;
pub mod transform;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("failed to read manifest directory {path:?}"))]
    ReadDir {
        source: std::io::Error,
        path: PathBuf,
    },

    #[snafu(display("failed to read manifest file {path:?}"))]
    ReadFile {
        source: std::io::Error,
        path: PathBuf,
    },

    #[snafu(display("failed to parse document {index} of {path:?}"))]
    ParseDocument {
        source: serde_yaml::Error,
        path: PathBuf,
        index: usize,
    },

    #[snafu(display("document {index} of {path:?} is missing apiVersion or kind"))]
    MissingTypeMeta { path: PathBuf, index: usize },

    #[snafu(display("failed to transform {object}"))]
    Transform {
        source: transform::Error,
        object: String,
        reference: Option<ObjectRef<DynamicObject>>,
    },

    #[snafu(display("{object} has no name"))]
    MissingName { object: String },

    #[snafu(display("failed to resolve the API serving {api_version} {kind}"))]
    ResolveKind {
        source: ::kube::Error,
        api_version: String,
        kind: String,
    },

    #[snafu(display("failed to apply {object}"))]
    Apply {
        source: ::kube::Error,
        object: String,
        reference: Option<ObjectRef<DynamicObject>>,
    },

    #[snafu(display("failed to delete {object}"))]
    Delete {
        source: ::kube::Error,
        object: String,
        reference: Option<ObjectRef<DynamicObject>>,
    },
}

impl Error {
    /// The manifest object the error is about, if it concerns a single object.
    pub fn object_ref(&self) -> Option<ObjectRef<DynamicObject>> {
        match self {
            Self::Transform { reference, .. }
            | Self::Apply { reference, .. }
            | Self::Delete { reference, .. } => reference.clone(),
            _ => None,
        }
    }
}

/// Applies and deletes a manifest in the cluster.
#[async_trait]
pub trait ManifestApplier: Send + Sync {
    /// Applies every object of the manifest after passing it through `transformers`, in order.
    async fn apply(&self, transformers: &[&dyn Transformer]) -> Result<()>;

    /// Deletes every object of the manifest. Objects that are already gone are skipped.
    async fn delete_all(&self) -> Result<()>;
}

/// Loads all `*.yaml` and `*.yml` files found directly in `dir`.
///
/// Files are read in lexical order, so that numbered file names control the apply order.
pub fn load_dir(dir: &Path) -> Result<Vec<DynamicObject>> {
    let mut paths = fs::read_dir(dir)
        .and_then(|entries| {
            entries
                .map(|entry| entry.map(|entry| entry.path()))
                .collect::<Result<Vec<_>, _>>()
        })
        .context(ReadDirSnafu { path: dir })?;

    paths.retain(|path| {
        path.is_file()
            && matches!(
                path.extension().and_then(OsStr::to_str),
                Some("yaml" | "yml")
            )
    });
    paths.sort();

    let mut objects = Vec::new();
    for path in paths {
        let content = fs::read_to_string(&path).context(ReadFileSnafu { path: &path })?;
        objects.extend(parse_documents(&content, &path)?);
    }

    Ok(objects)
}

/// Parses a multi-document YAML stream. Empty documents are skipped.
pub fn parse_documents(content: &str, path: &Path) -> Result<Vec<DynamicObject>> {
    let mut objects = Vec::new();

    for (index, document) in serde_yaml::Deserializer::from_str(content).enumerate() {
        let value =
            serde_yaml::Value::deserialize(document).context(ParseDocumentSnafu { path, index })?;
        if value.is_null() {
            continue;
        }

        let object: DynamicObject =
            serde_yaml::from_value(value).context(ParseDocumentSnafu { path, index })?;
        ensure!(object.types.is_some(), MissingTypeMetaSnafu { path, index });
        objects.push(object);
    }

    Ok(objects)
}

/// Human readable identity of a manifest object, used in errors and logs.
pub(crate) fn describe(object: &DynamicObject) -> String {
    let kind = object
        .types
        .as_ref()
        .map_or("<unknown kind>", |types| types.kind.as_str());
    match object.namespace() {
        Some(namespace) => format!("{kind} {namespace}/{}", object.name_any()),
        None => format!("{kind} {}", object.name_any()),
    }
}

/// Reference to a manifest object, [`None`] if its `apiVersion` cannot be parsed.
pub(crate) fn object_ref(object: &DynamicObject) -> Option<ObjectRef<DynamicObject>> {
    let gvk = GroupVersionKind::try_from(object.types.as_ref()?).ok()?;
    Some(ObjectRef::from_obj_with(object, ApiResource::from_gvk(&gvk)))
}
