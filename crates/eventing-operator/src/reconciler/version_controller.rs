//! Migrates the `KnativeEventing` resource between operator versions on request.
//!
//! A `KEVersionController` names a source and a target operator version. Relative to the
//! version `V` of the running operator the request is either
//!
//! - an upgrade, when the target is `V` (or empty): the legacy resource is read through the
//!   [`DynamicStore`] and converted into a `KnativeEventing`, or
//! - a downgrade, when the source is `V` (or empty) and the target is older: the
//!   `KnativeEventing` is converted into the legacy kind, whose definition is installed first.
//!
//! Both directions write the status before the spec, so that the status update is based on
//! the latest `resourceVersion` and a spec update cannot invalidate it.
use std::cmp::Ordering;

use kube::{
    core::{ApiResource, DynamicObject},
    runtime::controller::Action,
};
use snafu::{ResultExt, Snafu};
use strum::{EnumDiscriminants, IntoStaticStr};
use tracing::{debug, info, instrument};

use crate::{
    client::{self, CrdInstaller, DynamicStore, ObjectKey, TypedStore},
    crd::{
        CANONICAL_NAME, KEVersionController, KEVersionControllerSpec, KnativeEventing,
        KnativeEventingSpec, legacy::LegacySchema,
    },
    logging::{controller::ReconcilerError, error_chain},
    migration::{self, Downgraded},
};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("failed to get KEVersionController {key}"))]
    GetRequest {
        source: client::Error,
        key: ObjectKey,
    },

    #[snafu(display("KEVersionController object has no key"), visibility(pub(crate)))]
    InvalidKey { source: client::Error },

    #[snafu(display("failed to update the status of KEVersionController {key}"))]
    UpdateRequestStatus {
        source: client::Error,
        key: ObjectKey,
    },

    #[snafu(display(
        "cannot migrate from version {source_version:?} to {target_version:?}, operator version is {operator_version:?}"
    ))]
    UnsupportedMigration {
        source_version: String,
        target_version: String,
        operator_version: String,
    },

    #[snafu(display("failed to migrate KnativeEventing {key}"))]
    Migrate {
        source: migration::Error,
        key: ObjectKey,
    },

    #[snafu(display("failed to get KnativeEventing {key}"))]
    GetEventing {
        source: client::Error,
        key: ObjectKey,
    },

    #[snafu(display("failed to write KnativeEventing {key}"))]
    WriteEventing {
        source: client::Error,
        key: ObjectKey,
    },

    #[snafu(display("failed to get the {version} resource {key}"))]
    GetLegacy {
        source: client::Error,
        version: &'static str,
        key: ObjectKey,
    },

    #[snafu(display("failed to write the {version} resource {key}"))]
    WriteLegacy {
        source: client::Error,
        version: &'static str,
        key: ObjectKey,
    },

    #[snafu(display("failed to install the CustomResourceDefinition of version {version}"))]
    InstallLegacyCrd {
        source: client::Error,
        version: &'static str,
    },
}

impl ReconcilerError for Error {
    fn category(&self) -> &'static str {
        match self {
            // The conversion failure is more telling than the step it happened in.
            Self::Migrate { source, .. } => migration::ErrorDiscriminants::from(source).into(),
            _ => ErrorDiscriminants::from(self).into(),
        }
    }

    fn is_permanent(&self) -> bool {
        match self {
            Self::UnsupportedMigration { .. } => true,
            Self::Migrate { source, .. } => source.is_permanent(),
            _ => false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Upgrade,
    Downgrade,
}

impl Direction {
    /// Decides the direction of `spec` relative to `operator_version`.
    pub fn of(spec: &KEVersionControllerSpec, operator_version: &str) -> Result<Self> {
        let is_current = |version: &str| version.is_empty() || version == operator_version;

        if is_current(&spec.target_version) {
            Ok(Self::Upgrade)
        } else if is_current(&spec.source_version)
            && compare_versions(&spec.target_version, operator_version) == Ordering::Less
        {
            Ok(Self::Downgrade)
        } else {
            UnsupportedMigrationSnafu {
                source_version: spec.source_version.as_str(),
                target_version: spec.target_version.as_str(),
                operator_version,
            }
            .fail()
        }
    }
}

/// Compares as semantic versions (an optional `v` prefix is ignored), falls back to comparing
/// the strings if either does not parse.
fn compare_versions(left: &str, right: &str) -> Ordering {
    let parse = |version: &str| semver::Version::parse(version.trim_start_matches('v'));
    match (parse(left), parse(right)) {
        (Ok(left), Ok(right)) => left.cmp(&right),
        _ => left.cmp(right),
    }
}

/// Reconciles `KEVersionController` resources.
pub struct VersionControllerReconciler {
    requests: Box<dyn TypedStore<KEVersionController>>,
    eventings: Box<dyn TypedStore<KnativeEventing>>,
    legacy: Box<dyn DynamicStore>,
    crds: Box<dyn CrdInstaller>,
    operator_version: String,
}

impl VersionControllerReconciler {
    pub fn new(
        requests: impl TypedStore<KEVersionController> + 'static,
        eventings: impl TypedStore<KnativeEventing> + 'static,
        legacy: impl DynamicStore + 'static,
        crds: impl CrdInstaller + 'static,
        operator_version: impl Into<String>,
    ) -> Self {
        Self {
            requests: Box::new(requests),
            eventings: Box::new(eventings),
            legacy: Box::new(legacy),
            crds: Box::new(crds),
            operator_version: operator_version.into(),
        }
    }

    /// Runs the requested migration and records the outcome in the status of the request.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<Action> {
        let Some(request) = self
            .requests
            .get(key)
            .await
            .context(GetRequestSnafu { key: key.clone() })?
        else {
            debug!("KEVersionController is gone");
            return Ok(Action::await_change());
        };

        let migrated = self.migrate(&key.namespace, &request.spec).await;

        let mut status = request.status.clone().unwrap_or_default();
        status.initialize_conditions();
        match &migrated {
            Ok(()) => status.mark_migration_succeeded(),
            Err(err) => status.mark_migration_failed(err.category(), &error_chain(err)),
        }

        if request.status.as_ref() == Some(&status) {
            debug!("status is unchanged");
        } else {
            let updated = KEVersionController {
                status: Some(status),
                ..request
            };
            self.requests
                .update_status(&updated)
                .await
                .context(UpdateRequestStatusSnafu { key: key.clone() })?;
        }

        migrated.map(|()| Action::await_change())
    }

    async fn migrate(&self, namespace: &str, spec: &KEVersionControllerSpec) -> Result<()> {
        let key = ObjectKey::new(namespace, CANONICAL_NAME);
        match Direction::of(spec, &self.operator_version)? {
            Direction::Upgrade => self.upgrade(&key, &spec.source_version).await,
            Direction::Downgrade => self.downgrade(&key, &spec.target_version).await,
        }
    }

    async fn upgrade(&self, key: &ObjectKey, source_version: &str) -> Result<()> {
        let target_version = self.operator_version.as_str();
        let Some(schema) = migration::legacy_source(source_version, target_version)
            .context(MigrateSnafu { key: key.clone() })?
        else {
            debug!("source already has the current schema");
            return Ok(());
        };

        let Some(legacy) = self
            .legacy
            .get(&schema.api_resource(), key)
            .await
            .context(GetLegacySnafu {
                version: schema.version(),
                key: key.clone(),
            })?
        else {
            info!(legacy.version = schema.version(), "nothing to migrate");
            return Ok(());
        };

        let existing = self
            .eventings
            .get(key)
            .await
            .context(GetEventingSnafu { key: key.clone() })?;
        let base = existing.clone().unwrap_or_else(|| skeleton(key));
        let mut migrated = migration::upgrade(source_version, target_version, &legacy, base)
            .context(MigrateSnafu { key: key.clone() })?;
        migrated
            .status
            .get_or_insert_with(Default::default)
            .mark_version_migrated();

        let write_context = || WriteEventingSnafu { key: key.clone() };
        let mut current = match existing {
            Some(existing) => existing,
            None => {
                info!("creating KnativeEventing");
                self.eventings
                    .create(&skeleton(key))
                    .await
                    .context(write_context())?
            }
        };

        if current.status != migrated.status {
            let with_status = KnativeEventing {
                status: migrated.status.clone(),
                ..current.clone()
            };
            current = self
                .eventings
                .update_status(&with_status)
                .await
                .context(write_context())?;
        }

        if current.metadata.labels != migrated.metadata.labels
            || current.metadata.annotations != migrated.metadata.annotations
            || current.spec != migrated.spec
        {
            let mut updated = current;
            updated.metadata.labels = migrated.metadata.labels;
            updated.metadata.annotations = migrated.metadata.annotations;
            updated.spec = migrated.spec;
            self.eventings
                .update(&updated)
                .await
                .context(write_context())?;
        }

        info!(
            legacy.version = schema.version(),
            version = target_version,
            "upgraded KnativeEventing"
        );
        Ok(())
    }

    async fn downgrade(&self, key: &ObjectKey, target_version: &str) -> Result<()> {
        let Some(current) = self
            .eventings
            .get(key)
            .await
            .context(GetEventingSnafu { key: key.clone() })?
        else {
            info!("no KnativeEventing to downgrade");
            return Ok(());
        };

        let Downgraded::Converted { object, schema } =
            migration::downgrade(target_version, &self.operator_version, &current)
                .context(MigrateSnafu { key: key.clone() })?
        else {
            return Ok(());
        };

        self.crds
            .install(&schema.crd())
            .await
            .context(InstallLegacyCrdSnafu {
                version: schema.version(),
            })?;

        let resource = schema.api_resource();
        let existing = self
            .legacy
            .get(&resource, key)
            .await
            .context(GetLegacySnafu {
                version: schema.version(),
                key: key.clone(),
            })?;
        let written = match existing {
            Some(existing) => {
                self.replace_legacy(&resource, schema, key, existing, object)
                    .await?
            }
            None => self.create_legacy(&resource, schema, key, object).await?,
        };

        info!(
            legacy.version = schema.version(),
            resource_version = written.metadata.resource_version.as_deref(),
            "downgraded KnativeEventing"
        );
        Ok(())
    }

    /// Overwrites `existing` with `object`, status first.
    async fn replace_legacy(
        &self,
        resource: &ApiResource,
        schema: LegacySchema,
        key: &ObjectKey,
        existing: DynamicObject,
        mut object: DynamicObject,
    ) -> Result<DynamicObject> {
        let write_context = || WriteLegacySnafu {
            version: schema.version(),
            key: key.clone(),
        };

        let mut current = existing;
        object
            .metadata
            .resource_version
            .clone_from(&current.metadata.resource_version);

        if current.data.get("status") != object.data.get("status") {
            current = self
                .legacy
                .update_status(resource, &object)
                .await
                .context(write_context())?;
            object
                .metadata
                .resource_version
                .clone_from(&current.metadata.resource_version);
        }

        if current.metadata.labels != object.metadata.labels
            || current.metadata.annotations != object.metadata.annotations
            || current.data.get("spec") != object.data.get("spec")
        {
            current = self
                .legacy
                .update(resource, &object)
                .await
                .context(write_context())?;
        }

        Ok(current)
    }

    async fn create_legacy(
        &self,
        resource: &ApiResource,
        schema: LegacySchema,
        key: &ObjectKey,
        mut object: DynamicObject,
    ) -> Result<DynamicObject> {
        let write_context = || WriteLegacySnafu {
            version: schema.version(),
            key: key.clone(),
        };

        let created = self
            .legacy
            .create(resource, &object)
            .await
            .context(write_context())?;
        object.metadata = created.metadata;
        self.legacy
            .update_status(resource, &object)
            .await
            .context(write_context())
    }
}

fn skeleton(key: &ObjectKey) -> KnativeEventing {
    let mut eventing = KnativeEventing::new(&key.name, KnativeEventingSpec::default());
    eventing.metadata.namespace = Some(key.namespace.clone());
    eventing
}
