//! Mutations applied to manifest objects between loading and applying them.
use kube::{ResourceExt, core::DynamicObject};
use serde::Serialize;
use snafu::{ResultExt, Snafu, ensure};
use tracing::debug;

use crate::crd::KnativeEventingSpec;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to serialize the default broker configuration"))]
    SerializeBrokerDefaults { source: serde_yaml::Error },

    #[snafu(display("ConfigMap {name:?} has a malformed data field"))]
    MalformedConfigMap { name: String },
}

/// Mutates a manifest object in place before it is applied.
pub trait Transformer: Send + Sync {
    fn transform(&self, object: &mut DynamicObject) -> Result<(), Error>;
}

pub const CHANNEL_BASED_BROKER_CLASS: &str = "ChannelBasedBroker";

const BROKER_DEFAULTS_CONFIG_MAP: &str = "config-br-defaults";
const BROKER_DEFAULTS_KEY: &str = "default-br-config";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BrokerDefaults<'a> {
    cluster_default: ClusterDefault<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ClusterDefault<'a> {
    api_version: &'a str,
    broker_class: &'a str,
    kind: &'a str,
    name: &'a str,
    namespace: &'a str,
}

/// Writes the cluster wide default broker class into the `config-br-defaults` ConfigMap.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DefaultBrokerClass {
    broker_class: String,
}

impl DefaultBrokerClass {
    pub fn new(broker_class: impl Into<String>) -> Self {
        Self {
            broker_class: broker_class.into(),
        }
    }

    /// Uses the class requested by `spec`, [`CHANNEL_BASED_BROKER_CLASS`] if there is none.
    pub fn from_spec(spec: &KnativeEventingSpec) -> Self {
        match spec.default_broker_class.as_deref() {
            Some(class) if !class.is_empty() => Self::new(class),
            _ => Self::new(CHANNEL_BASED_BROKER_CLASS),
        }
    }

    fn broker_defaults(&self) -> Result<String, Error> {
        serde_yaml::to_string(&BrokerDefaults {
            cluster_default: ClusterDefault {
                api_version: "v1",
                broker_class: &self.broker_class,
                kind: "ConfigMap",
                name: "config-br-default-channel",
                namespace: "knative-eventing",
            },
        })
        .context(SerializeBrokerDefaultsSnafu)
    }
}

impl Transformer for DefaultBrokerClass {
    fn transform(&self, object: &mut DynamicObject) -> Result<(), Error> {
        let is_config_map = object
            .types
            .as_ref()
            .is_some_and(|types| types.kind == "ConfigMap");
        if !is_config_map || object.name_any() != BROKER_DEFAULTS_CONFIG_MAP {
            return Ok(());
        }

        let data = &mut object.data["data"];
        ensure!(
            data.is_null() || data.is_object(),
            MalformedConfigMapSnafu {
                name: BROKER_DEFAULTS_CONFIG_MAP
            }
        );
        data[BROKER_DEFAULTS_KEY] = self.broker_defaults()?.into();

        // An empty timestamp would be sent as an explicit field and cause needless updates.
        object.metadata.creation_timestamp = None;

        debug!(
            broker_class = %self.broker_class,
            "updated the default broker configuration"
        );
        Ok(())
    }
}
