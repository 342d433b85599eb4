//! Installs the Knative Eventing manifest for every `KnativeEventing` resource.
use k8s_openapi::api::apps::v1::Deployment;
use kube::{
    core::DynamicObject,
    runtime::{controller::Action, reflector::ObjectRef},
};
use snafu::{ResultExt, Snafu};
use strum::{EnumDiscriminants, IntoStaticStr};
use tracing::{debug, info, instrument, warn};

use super::{ActiveKeySet, KeyLocks};
use crate::{
    client::{self, ObjectKey, TypedStore},
    crd::{KnativeEventing, KnativeEventingSpec, KnativeEventingStatus},
    logging::{controller::ReconcilerError, error_chain},
    manifest::{self, DefaultBrokerClass, ManifestApplier},
    status::condition::deployment::DeploymentAvailability,
};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("failed to get KnativeEventing {key}"))]
    GetKnativeEventing {
        source: client::Error,
        key: ObjectKey,
    },

    #[snafu(display("failed to apply the manifest"))]
    ApplyManifest { source: manifest::Error },

    #[snafu(display("failed to delete the manifest"))]
    DeleteManifest { source: manifest::Error },

    #[snafu(display("failed to list deployments in namespace {namespace:?}"))]
    ListDeployments {
        source: client::Error,
        namespace: String,
    },

    #[snafu(display("failed to update the status of KnativeEventing {key}"))]
    UpdateStatus {
        source: client::Error,
        key: ObjectKey,
    },

    #[snafu(display("KnativeEventing object has no key"), visibility(pub(crate)))]
    InvalidKey { source: client::Error },
}

impl ReconcilerError for Error {
    fn category(&self) -> &'static str {
        ErrorDiscriminants::from(self).into()
    }

    fn secondary_object(&self) -> Option<ObjectRef<DynamicObject>> {
        match self {
            Self::ApplyManifest { source } | Self::DeleteManifest { source } => source.object_ref(),
            _ => None,
        }
    }
}

/// Reconciles `KnativeEventing` resources.
///
/// The manifest is shared by all `KnativeEventing` resources of the cluster, it is applied for
/// each of them and only deleted once the last one is gone.
pub struct EventingReconciler {
    eventings: Box<dyn TypedStore<KnativeEventing>>,
    deployments: Box<dyn TypedStore<Deployment>>,
    manifest: Box<dyn ManifestApplier>,
    active_keys: ActiveKeySet,
    key_locks: KeyLocks,
    target_namespace: String,
    operator_version: String,
}

impl EventingReconciler {
    /// `target_namespace` is where the manifest installs its deployments.
    pub fn new(
        eventings: impl TypedStore<KnativeEventing> + 'static,
        deployments: impl TypedStore<Deployment> + 'static,
        manifest: impl ManifestApplier + 'static,
        target_namespace: impl Into<String>,
        operator_version: impl Into<String>,
    ) -> Self {
        Self {
            eventings: Box::new(eventings),
            deployments: Box::new(deployments),
            manifest: Box::new(manifest),
            active_keys: ActiveKeySet::default(),
            key_locks: KeyLocks::default(),
            target_namespace: target_namespace.into(),
            operator_version: operator_version.into(),
        }
    }

    pub fn active_keys(&self) -> &ActiveKeySet {
        &self.active_keys
    }

    pub fn target_namespace(&self) -> &str {
        &self.target_namespace
    }

    /// Reconciles the resource stored under `key`, or its absence.
    ///
    /// Calls for the same key are serialized, whichever task they come from.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<Action> {
        let _guard = self.key_locks.lock(key).await;

        let Some(eventing) = self
            .eventings
            .get(key)
            .await
            .context(GetKnativeEventingSnafu { key: key.clone() })?
        else {
            self.observe_deleted(key).await?;
            return Ok(Action::await_change());
        };

        if self.active_keys.insert(key.clone()) {
            debug!(active = self.active_keys.len(), "tracking KnativeEventing");
        }

        let mut status = eventing.status.clone().unwrap_or_default();
        status.initialize_conditions();

        let installed = self.install(&eventing.spec, &mut status).await;
        self.write_status(&eventing, status).await?;
        installed?;

        Ok(Action::await_change())
    }

    async fn install(
        &self,
        spec: &KnativeEventingSpec,
        status: &mut KnativeEventingStatus,
    ) -> Result<()> {
        let broker_class = DefaultBrokerClass::from_spec(spec);
        if let Err(err) = self.manifest.apply(&[&broker_class]).await {
            status.mark_install_failed(&error_chain(&err));
            return Err(err).context(ApplyManifestSnafu);
        }
        status.mark_install_succeeded();
        status.version = Some(self.operator_version.clone());

        let deployments = self
            .deployments
            .list(&self.target_namespace)
            .await
            .context(ListDeploymentsSnafu {
                namespace: self.target_namespace.as_str(),
            })?;
        match DeploymentAvailability::from_deployments(&deployments) {
            DeploymentAvailability::Available => status.mark_deployments_available(),
            DeploymentAvailability::NotReady { unavailable } => {
                debug!(?unavailable, "waiting on deployments");
                status.mark_deployments_not_ready();
            }
        }

        Ok(())
    }

    /// Writes `status` unless it equals the status that was read.
    async fn write_status(
        &self,
        eventing: &KnativeEventing,
        status: KnativeEventingStatus,
    ) -> Result<()> {
        if eventing.status.as_ref() == Some(&status) {
            debug!("status is unchanged");
            return Ok(());
        }

        let ready = status.is_ready();
        let updated = KnativeEventing {
            status: Some(status),
            ..eventing.clone()
        };
        let key = ObjectKey::from_resource(&updated).context(InvalidKeySnafu)?;
        self.eventings
            .update_status(&updated)
            .await
            .context(UpdateStatusSnafu { key })?;
        info!(ready, "updated status");

        Ok(())
    }

    /// Tears the manifest down once no `KnativeEventing` is left.
    async fn observe_deleted(&self, key: &ObjectKey) -> Result<()> {
        if !self.active_keys.remove(key) {
            debug!(
                active = self.active_keys.len(),
                "KnativeEventing is gone, manifest is still in use"
            );
            return Ok(());
        }

        info!("last KnativeEventing was deleted, deleting the manifest");
        if let Err(err) = self.manifest.delete_all().await {
            warn!(
                error = &err as &dyn std::error::Error,
                "failed to delete the manifest, retrying later"
            );
            // Keep the key so that the retry sees the set emptied again.
            self.active_keys.insert(key.clone());
            return Err(err).context(DeleteManifestSnafu);
        }

        Ok(())
    }
}
