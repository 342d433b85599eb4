//! Conversions of the Knative Eventing resource between the current and historical schemas.
//!
//! Both directions are pure: they take the object read from the cluster and return the object
//! to write back. A conversion is refused when the target schema cannot represent a field that
//! is populated in the source, nothing is ever dropped silently.
use kube::core::DynamicObject;
use snafu::{ResultExt, Snafu, ensure};
use tracing::debug;

use crate::{
    crd::{
        KnativeEventing, KnativeEventingSpec, KnativeEventingStatus,
        legacy::{LegacyEventing, LegacyEventingSpec, LegacyEventingStatus, LegacySchema},
    },
    status::condition::Condition,
};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu, strum::EnumDiscriminants)]
#[strum_discriminants(derive(strum::IntoStaticStr))]
pub enum Error {
    #[snafu(display("version {version:?} has no known schema to migrate from or to"))]
    UnsupportedVersion { version: String },

    #[snafu(display(
        "the spec cannot be represented in the schema of version {version:?}, refusing to drop fields"
    ))]
    LossySpec { version: String },

    #[snafu(display("failed to convert object to the schema of version {version:?}"))]
    Convert {
        source: serde_json::Error,
        version: String,
    },
}

impl Error {
    /// Retrying cannot fix these, only a change to the objects involved can.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedVersion { .. } | Self::LossySpec { .. }
        )
    }
}

/// Result of [`downgrade`].
#[derive(Clone, Debug, PartialEq)]
pub enum Downgraded {
    /// The target is the current schema, nothing to convert.
    NoOp,

    /// The object to store, and the historical schema it belongs to.
    Converted {
        object: DynamicObject,
        schema: LegacySchema,
    },
}

/// Returns the historical schema a migration from `source_version` reads from.
///
/// [`None`] means the source already is the target schema.
pub fn legacy_source(source_version: &str, target_version: &str) -> Result<Option<LegacySchema>> {
    if source_version.is_empty() || source_version == target_version {
        return Ok(None);
    }

    LegacySchema::from_version(source_version)
        .map(Some)
        .ok_or_else(|| {
            UnsupportedVersionSnafu {
                version: source_version,
            }
            .build()
        })
}

/// Converts `source`, stored in the schema of `source_version`, into `target`.
///
/// `target` is the current resource (or a skeleton, if it does not exist yet); metadata and spec
/// of `target` are kept, the status is taken over from the source.
pub fn upgrade(
    source_version: &str,
    target_version: &str,
    source: &DynamicObject,
    mut target: KnativeEventing,
) -> Result<KnativeEventing> {
    let Some(schema) = legacy_source(source_version, target_version)? else {
        return Ok(target);
    };

    match schema {
        LegacySchema::V0_10_0 => {
            let legacy: LegacyEventing = serde_json::to_value(source)
                .and_then(serde_json::from_value)
                .context(ConvertSnafu {
                    version: source_version,
                })?;

            ensure!(
                legacy.spec.is_empty(),
                LossySpecSnafu {
                    version: target_version
                }
            );

            debug!(
                legacy.version = source_version,
                conditions = legacy.status.conditions.len(),
                "converting legacy Eventing"
            );

            copy_missing_labels(&legacy, &mut target);
            let set = KnativeEventingStatus::condition_set();
            let status = target.status.get_or_insert_with(Default::default);
            merge_conditions(&mut status.conditions, legacy.status.conditions, set.happy());
            set.manage(&mut status.conditions).recompute_happy();
            status.version = Some(target_version.to_owned());
        }
    }

    Ok(target)
}

/// Converts `source` into the schema of `target_version`.
///
/// Only the schemas listed in [`LegacySchema`] can be converted to.
pub fn downgrade(
    target_version: &str,
    current_version: &str,
    source: &KnativeEventing,
) -> Result<Downgraded> {
    if target_version.is_empty() || target_version == current_version {
        return Ok(Downgraded::NoOp);
    }

    let schema = LegacySchema::from_version(target_version).ok_or_else(|| {
        UnsupportedVersionSnafu {
            version: target_version,
        }
        .build()
    })?;

    match schema {
        LegacySchema::V0_10_0 => {
            // 0.10.0 has no spec fields.
            ensure!(
                source.spec == KnativeEventingSpec::default(),
                LossySpecSnafu {
                    version: target_version
                }
            );

            let conditions = source
                .status
                .as_ref()
                .map(|status| status.conditions.clone())
                .unwrap_or_default();

            let legacy = LegacyEventing {
                metadata: kube::api::ObjectMeta {
                    name: source.metadata.name.clone(),
                    namespace: source.metadata.namespace.clone(),
                    labels: source.metadata.labels.clone(),
                    annotations: source.metadata.annotations.clone(),
                    ..kube::api::ObjectMeta::default()
                },
                spec: LegacyEventingSpec::default(),
                status: LegacyEventingStatus {
                    conditions,
                    version: Some(schema.version().to_owned()),
                },
            };

            let object = to_dynamic(schema, &legacy).context(ConvertSnafu {
                version: target_version,
            })?;

            Ok(Downgraded::Converted { object, schema })
        }
    }
}

fn to_dynamic(
    schema: LegacySchema,
    legacy: &LegacyEventing,
) -> Result<DynamicObject, serde_json::Error> {
    let mut value = serde_json::to_value(legacy)?;
    if let Some(object) = value.as_object_mut() {
        object.insert("apiVersion".to_owned(), schema.api_version().into());
        object.insert("kind".to_owned(), schema.kind().into());
    }
    serde_json::from_value(value)
}

/// Replaces conditions of the same type in place, appends the others.
///
/// The `happy` condition is derived from the others, a present one is kept as is and gets
/// recomputed afterwards.
fn merge_conditions(conditions: &mut Vec<Condition>, legacy: Vec<Condition>, happy: &str) {
    for condition in legacy {
        match conditions
            .iter_mut()
            .find(|existing| existing.type_ == condition.type_)
        {
            Some(existing) if existing.type_ != happy => *existing = condition,
            Some(_) => {}
            None => conditions.push(condition),
        }
    }
}

fn copy_missing_labels(legacy: &LegacyEventing, target: &mut KnativeEventing) {
    if target.metadata.labels.is_none() {
        target.metadata.labels.clone_from(&legacy.metadata.labels);
    }
    if target.metadata.annotations.is_none() {
        target
            .metadata
            .annotations
            .clone_from(&legacy.metadata.annotations);
    }
}
