use std::path::Path;

use async_trait::async_trait;
use kube::{
    Api, Client,
    api::{DeleteParams, Patch, PatchParams},
    core::{DynamicObject, GroupVersionKind},
    discovery::{self, Scope},
};
use snafu::{OptionExt, ResultExt};
use tracing::{debug, info, instrument};

use super::{
    ApplySnafu, DeleteSnafu, ManifestApplier, MissingNameSnafu, ResolveKindSnafu, Result,
    TransformSnafu, Transformer, describe, load_dir, object_ref,
};

/// Applies a manifest with server-side apply.
///
/// Namespaced objects without a namespace are placed into the target namespace.
pub struct KubeManifest {
    client: Client,
    field_manager: String,
    namespace: String,
    objects: Vec<DynamicObject>,
}

impl KubeManifest {
    pub fn new(
        client: Client,
        field_manager: impl Into<String>,
        namespace: impl Into<String>,
        objects: Vec<DynamicObject>,
    ) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
            namespace: namespace.into(),
            objects,
        }
    }

    /// Loads the manifest from the YAML files in `dir`, see [`load_dir`].
    pub fn from_dir(
        client: Client,
        field_manager: impl Into<String>,
        namespace: impl Into<String>,
        dir: &Path,
    ) -> Result<Self> {
        let objects = load_dir(dir)?;
        info!(
            directory = %dir.display(),
            objects = objects.len(),
            "loaded manifest"
        );
        Ok(Self::new(client, field_manager, namespace, objects))
    }

    pub fn objects(&self) -> &[DynamicObject] {
        &self.objects
    }

    /// Resolves the API serving `object`, defaulting its namespace if the kind is namespaced.
    async fn api_for(&self, object: &mut DynamicObject) -> Result<(Api<DynamicObject>, String)> {
        let name = object.metadata.name.clone().context(MissingNameSnafu {
            object: describe(object),
        })?;
        let types = object.types.clone().unwrap_or_default();
        let gvk = gvk_from_api_version(&types.api_version, &types.kind);

        let (resource, capabilities) = discovery::pinned_kind(&self.client, &gvk)
            .await
            .context(ResolveKindSnafu {
                api_version: types.api_version.as_str(),
                kind: types.kind.as_str(),
            })?;

        let api = match capabilities.scope {
            Scope::Namespaced => {
                let namespace = object
                    .metadata
                    .namespace
                    .get_or_insert_with(|| self.namespace.clone());
                Api::namespaced_with(self.client.clone(), namespace, &resource)
            }
            Scope::Cluster => Api::all_with(self.client.clone(), &resource),
        };

        Ok((api, name))
    }
}

#[async_trait]
impl ManifestApplier for KubeManifest {
    #[instrument(skip_all, fields(objects = self.objects.len()))]
    async fn apply(&self, transformers: &[&dyn Transformer]) -> Result<()> {
        let params = PatchParams::apply(&self.field_manager).force();

        for object in &self.objects {
            let mut object = object.clone();
            for transformer in transformers {
                transformer
                    .transform(&mut object)
                    .context(TransformSnafu {
                        object: describe(&object),
                        reference: object_ref(&object),
                    })?;
            }

            let (api, name) = self.api_for(&mut object).await?;
            api.patch(&name, &params, &Patch::Apply(&object))
                .await
                .context(ApplySnafu {
                    object: describe(&object),
                    reference: object_ref(&object),
                })?;
            debug!(object = %describe(&object), "applied");
        }

        info!("applied manifest");
        Ok(())
    }

    #[instrument(skip_all, fields(objects = self.objects.len()))]
    async fn delete_all(&self) -> Result<()> {
        for object in self.objects.iter().rev() {
            let mut object = object.clone();
            let (api, name) = self.api_for(&mut object).await?;

            match api.delete(&name, &DeleteParams::background()).await {
                Ok(_) => debug!(object = %describe(&object), "deleted"),
                Err(kube::Error::Api(response)) if response.code == 404 => {
                    debug!(object = %describe(&object), "already deleted");
                }
                Err(source) => {
                    return Err(source).context(DeleteSnafu {
                        object: describe(&object),
                        reference: object_ref(&object),
                    });
                }
            }
        }

        info!("deleted manifest");
        Ok(())
    }
}

/// Splits `apps/v1` into group and version, the core group has no prefix (`v1`).
fn gvk_from_api_version(api_version: &str, kind: &str) -> GroupVersionKind {
    match api_version.rsplit_once('/') {
        Some((group, version)) => GroupVersionKind::gvk(group, version, kind),
        None => GroupVersionKind::gvk("", api_version, kind),
    }
}
