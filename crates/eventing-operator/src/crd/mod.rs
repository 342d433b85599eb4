//! Custom resources managed by this operator.
//!
//! - [`KnativeEventing`] describes one installation of Knative Eventing.
//! - [`KEVersionController`] requests a migration of the [`KnativeEventing`] resource between
//!   the schema of the running operator and a historical schema (see [`legacy`]).
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::status::condition::{Condition, ConditionSet, READY};

pub mod legacy;

pub const GROUP: &str = "operator.knative.dev";
pub const API_VERSION: &str = "v1alpha1";

/// The name migrated resources are always stored under.
pub const CANONICAL_NAME: &str = "knative-eventing";

/// Version of this operator, which is also the version of the current [`KnativeEventing`] schema.
pub const OPERATOR_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const DEPENDENCIES_INSTALLED: &str = "DependenciesInstalled";
pub const DEPLOYMENTS_AVAILABLE: &str = "DeploymentsAvailable";
pub const INSTALL_SUCCEEDED: &str = "InstallSucceeded";
pub const MIGRATION_SUCCEEDED: &str = "MigrationSucceeded";

/// Records that the resource was migrated from another schema. Not part of readiness.
pub const VERSION_MIGRATED: &str = "VersionMigrated";

/// Installs Knative Eventing into the cluster.
#[derive(Clone, CustomResource, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[kube(
    group = "operator.knative.dev",
    version = "v1alpha1",
    kind = "KnativeEventing",
    shortname = "ke",
    status = "KnativeEventingStatus",
    derive = "Default",
    derive = "PartialEq",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct KnativeEventingSpec {
    /// The broker class used by default when a Broker does not name one.
    /// Defaults to `ChannelBasedBroker`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_broker_class: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KnativeEventingStatus {
    #[serde(default)]
    #[schemars(extend("x-kubernetes-list-type" = "map", "x-kubernetes-list-map-keys" = ["type"]))]
    pub conditions: Vec<Condition>,

    /// The version of the installed release.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl KnativeEventingStatus {
    pub fn condition_set() -> ConditionSet {
        ConditionSet::living(&[
            DEPENDENCIES_INSTALLED,
            DEPLOYMENTS_AVAILABLE,
            INSTALL_SUCCEEDED,
        ])
    }

    pub fn get_condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions
            .iter()
            .find(|condition| condition.type_ == type_)
    }

    pub fn initialize_conditions(&mut self) {
        Self::condition_set().manage(&mut self.conditions).initialize();
    }

    pub fn mark_install_succeeded(&mut self) {
        Self::condition_set()
            .manage(&mut self.conditions)
            .mark_true(INSTALL_SUCCEEDED);

        // Assume deps are installed if we're not sure
        if self
            .get_condition(DEPENDENCIES_INSTALLED)
            .is_none_or(Condition::is_unknown)
        {
            self.mark_dependencies_installed();
        }
    }

    pub fn mark_install_failed(&mut self, message: &str) {
        Self::condition_set().manage(&mut self.conditions).mark_false(
            INSTALL_SUCCEEDED,
            "Error",
            format!("Install failed with message: {message}"),
        );
    }

    pub fn mark_dependencies_installed(&mut self) {
        Self::condition_set()
            .manage(&mut self.conditions)
            .mark_true(DEPENDENCIES_INSTALLED);
    }

    pub fn mark_deployments_available(&mut self) {
        Self::condition_set()
            .manage(&mut self.conditions)
            .mark_true(DEPLOYMENTS_AVAILABLE);
    }

    pub fn mark_deployments_not_ready(&mut self) {
        Self::condition_set().manage(&mut self.conditions).mark_false(
            DEPLOYMENTS_AVAILABLE,
            "NotReady",
            "Waiting on deployments",
        );
    }

    pub fn mark_version_migrated(&mut self) {
        Self::condition_set()
            .manage(&mut self.conditions)
            .mark_true(VERSION_MIGRATED);
    }

    pub fn is_ready(&self) -> bool {
        self.get_condition(READY).is_some_and(Condition::is_true)
    }
}

/// Requests a migration of the [`KnativeEventing`] resource between operator versions.
///
/// Leaving a version empty means "the version of the running operator".
#[derive(Clone, CustomResource, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[kube(
    group = "operator.knative.dev",
    version = "v1alpha1",
    kind = "KEVersionController",
    status = "KEVersionControllerStatus",
    derive = "Default",
    derive = "PartialEq",
    namespaced
)]
pub struct KEVersionControllerSpec {
    /// The version of the existing Knative Eventing.
    #[serde(rename = "source-version", default)]
    pub source_version: String,

    /// The version Knative Eventing should be migrated to.
    #[serde(rename = "target-version", default)]
    pub target_version: String,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KEVersionControllerStatus {
    #[serde(default)]
    #[schemars(extend("x-kubernetes-list-type" = "map", "x-kubernetes-list-map-keys" = ["type"]))]
    pub conditions: Vec<Condition>,
}

impl KEVersionControllerStatus {
    pub fn condition_set() -> ConditionSet {
        ConditionSet::living(&[MIGRATION_SUCCEEDED])
    }

    pub fn initialize_conditions(&mut self) {
        Self::condition_set().manage(&mut self.conditions).initialize();
    }

    pub fn mark_migration_succeeded(&mut self) {
        Self::condition_set()
            .manage(&mut self.conditions)
            .mark_true(MIGRATION_SUCCEEDED);
    }

    pub fn mark_migration_failed(&mut self, reason: &str, message: &str) {
        Self::condition_set()
            .manage(&mut self.conditions)
            .mark_false(MIGRATION_SUCCEEDED, reason, message);
    }
}

#[cfg(test)]
mod tests {
    use kube::{CustomResourceExt, Resource};

    use super::*;
    use crate::status::condition::ConditionStatus;

    fn status_of(status: &KnativeEventingStatus, type_: &str) -> Option<ConditionStatus> {
        status.get_condition(type_).map(|condition| condition.status)
    }

    #[test]
    fn group_version_kind() {
        assert_eq!(KnativeEventing::group(&()), GROUP);
        assert_eq!(KnativeEventing::version(&()), API_VERSION);
        assert_eq!(KnativeEventing::kind(&()), "KnativeEventing");
        assert_eq!(KEVersionController::plural(&()), "keversioncontrollers");
    }

    #[test]
    fn initialize_conditions_on_empty_status() {
        let mut status = KnativeEventingStatus::default();
        status.initialize_conditions();

        let types: Vec<_> = status.conditions.iter().map(|c| c.type_.as_str()).collect();
        assert_eq!(
            types,
            [
                DEPENDENCIES_INSTALLED,
                DEPLOYMENTS_AVAILABLE,
                INSTALL_SUCCEEDED,
                READY
            ]
        );
        assert!(status.conditions.iter().all(Condition::is_unknown));
    }

    #[test]
    fn install_succeeded_assumes_dependencies() {
        let mut status = KnativeEventingStatus::default();
        status.initialize_conditions();
        status.mark_install_succeeded();

        assert_eq!(
            status_of(&status, DEPENDENCIES_INSTALLED),
            Some(ConditionStatus::True)
        );
        assert_eq!(status_of(&status, READY), Some(ConditionStatus::Unknown));

        status.mark_deployments_available();
        assert!(status.is_ready());
    }

    #[test]
    fn install_succeeded_keeps_known_dependency_state() {
        let mut status = KnativeEventingStatus::default();
        status.initialize_conditions();
        KnativeEventingStatus::condition_set()
            .manage(&mut status.conditions)
            .mark_false(DEPENDENCIES_INSTALLED, "Missing", "no cert-manager");

        status.mark_install_succeeded();

        assert_eq!(
            status_of(&status, DEPENDENCIES_INSTALLED),
            Some(ConditionStatus::False)
        );
        assert!(!status.is_ready());
    }

    #[test]
    fn install_failed_message() {
        let mut status = KnativeEventingStatus::default();
        status.initialize_conditions();
        status.mark_install_failed("boom");

        let ready = status.get_condition(READY).expect("ready is present");
        assert_eq!(ready.status, ConditionStatus::False);
        assert_eq!(ready.reason.as_deref(), Some("Error"));
        assert_eq!(
            ready.message.as_deref(),
            Some("Install failed with message: boom")
        );
    }

    #[test]
    fn version_migrated_does_not_affect_readiness() {
        let mut status = KnativeEventingStatus::default();
        status.initialize_conditions();
        status.mark_version_migrated();

        assert_eq!(
            status_of(&status, VERSION_MIGRATED),
            Some(ConditionStatus::True)
        );
        assert_eq!(status_of(&status, READY), Some(ConditionStatus::Unknown));
    }

    #[test]
    fn version_controller_spec_uses_dashed_field_names() {
        let request: KEVersionController = serde_yaml::from_str(indoc::indoc! {"
            apiVersion: operator.knative.dev/v1alpha1
            kind: KEVersionController
            metadata:
              name: upgrade
              namespace: knative-eventing
            spec:
              source-version: 0.10.0
              target-version: 0.11.0
        "})
        .expect("valid request");

        assert_eq!(request.spec.source_version, "0.10.0");
        assert_eq!(request.spec.target_version, "0.11.0");
    }

    #[test]
    fn crds_are_namespaced_with_status_subresource() {
        for crd in [KnativeEventing::crd(), KEVersionController::crd()] {
            assert_eq!(crd.spec.scope, "Namespaced");
            let version = &crd.spec.versions[0];
            assert!(version.subresources.as_ref().is_some_and(|s| s.status.is_some()));
        }
    }
}
