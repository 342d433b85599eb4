//! Frozen schemas of the Knative Eventing resource as shipped by earlier operator releases.
//!
//! These types are not registered in the running binary. Resources of these kinds are
//! read and written through [`DynamicObject`]s, the [`LegacySchema`] table provides the
//! [`ApiResource`] to do so and the definition to (re-)install the kind on demand.
use std::collections::BTreeMap;

use k8s_openapi::{
    apiextensions_apiserver::pkg::apis::apiextensions::v1::{
        CustomResourceDefinition, CustomResourceDefinitionNames, CustomResourceDefinitionSpec,
        CustomResourceDefinitionVersion, CustomResourceSubresourceStatus,
        CustomResourceSubresources, CustomResourceValidation, JSONSchemaProps,
    },
    apimachinery::pkg::apis::meta::v1::ObjectMeta,
};
use kube::core::{ApiResource, GroupVersionKind};
use serde::{Deserialize, Serialize};

use crate::status::condition::Condition;

/// Known historical schema versions, one variant per release with a distinct shape.
///
/// Add a variant (and its row in [`LegacySchema::ALL`]) to support another release.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum::Display, strum::IntoStaticStr)]
pub enum LegacySchema {
    /// Used by the 0.10.0 operator, kind `Eventing`.
    #[strum(serialize = "0.10.0")]
    V0_10_0,
}

struct SchemaNames {
    group: &'static str,
    version: &'static str,
    kind: &'static str,
    plural: &'static str,
    singular: &'static str,
    list_kind: &'static str,
}

impl LegacySchema {
    pub const ALL: &'static [Self] = &[Self::V0_10_0];

    /// Looks up the schema used by the given operator version.
    pub fn from_version(version: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|schema| schema.version() == version)
    }

    /// The operator release this schema belongs to.
    pub fn version(self) -> &'static str {
        self.into()
    }

    fn names(self) -> SchemaNames {
        match self {
            Self::V0_10_0 => SchemaNames {
                group: "operator.knative.dev",
                version: "v1alpha1",
                kind: "Eventing",
                plural: "eventings",
                singular: "eventing",
                list_kind: "EventingList",
            },
        }
    }

    pub fn api_version(self) -> String {
        let names = self.names();
        format!("{}/{}", names.group, names.version)
    }

    pub fn kind(self) -> &'static str {
        self.names().kind
    }

    /// A descriptor for the dynamic client, since the kind is not compiled into the binary.
    pub fn api_resource(self) -> ApiResource {
        let names = self.names();
        ApiResource::from_gvk_with_plural(
            &GroupVersionKind::gvk(names.group, names.version, names.kind),
            names.plural,
        )
    }

    /// The `CustomResourceDefinition` the kind was served with.
    ///
    /// Fields are not validated, the schema only preserves whatever the object contains.
    pub fn crd(self) -> CustomResourceDefinition {
        let names = self.names();

        CustomResourceDefinition {
            metadata: ObjectMeta {
                name: Some(format!("{}.{}", names.plural, names.group)),
                ..ObjectMeta::default()
            },
            spec: CustomResourceDefinitionSpec {
                group: names.group.to_owned(),
                names: CustomResourceDefinitionNames {
                    kind: names.kind.to_owned(),
                    list_kind: Some(names.list_kind.to_owned()),
                    plural: names.plural.to_owned(),
                    singular: Some(names.singular.to_owned()),
                    ..CustomResourceDefinitionNames::default()
                },
                scope: "Namespaced".to_owned(),
                versions: vec![CustomResourceDefinitionVersion {
                    name: names.version.to_owned(),
                    served: true,
                    storage: true,
                    schema: Some(CustomResourceValidation {
                        open_api_v3_schema: Some(JSONSchemaProps {
                            type_: Some("object".to_owned()),
                            x_kubernetes_preserve_unknown_fields: Some(true),
                            ..JSONSchemaProps::default()
                        }),
                    }),
                    subresources: Some(CustomResourceSubresources {
                        status: Some(CustomResourceSubresourceStatus(serde_json::json!({}))),
                        ..CustomResourceSubresources::default()
                    }),
                    ..CustomResourceDefinitionVersion::default()
                }],
                ..CustomResourceDefinitionSpec::default()
            },
            status: None,
        }
    }
}

/// The `Eventing` resource of the 0.10.0 operator.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct LegacyEventing {
    #[serde(default)]
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub spec: LegacyEventingSpec,

    #[serde(default)]
    pub status: LegacyEventingStatus,
}

/// The 0.10.0 spec has no fields.
///
/// Anything found in a stored object is collected so conversions can refuse to drop it.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct LegacyEventingSpec {
    #[serde(flatten)]
    pub unknown_fields: BTreeMap<String, serde_json::Value>,
}

impl LegacyEventingSpec {
    pub fn is_empty(&self) -> bool {
        self.unknown_fields.is_empty()
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyEventingStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}
