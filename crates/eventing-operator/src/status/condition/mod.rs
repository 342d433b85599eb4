//! Ordered condition lists with dependency composition into one aggregate condition.
//!
//! A [`ConditionSet`] declares a fixed list of dependent condition types plus the "happy"
//! type (usually [`READY`]). Managing a status through a [`ConditionSet`] keeps the list
//! ordered: existing entries never move, new types are appended, and every mutation of a
//! dependent condition recomputes the happy condition.
//!
//! # Examples
//!
//! ```
//! use eventing_operator::status::condition::{ConditionSet, ConditionStatus, READY};
//!
//! let set = ConditionSet::living(&["InstallSucceeded", "DeploymentsAvailable"]);
//! let mut conditions = Vec::new();
//!
//! let mut manager = set.manage(&mut conditions);
//! manager.initialize();
//! manager.mark_true("InstallSucceeded");
//! assert!(!manager.is_happy());
//!
//! manager.mark_true("DeploymentsAvailable");
//! assert!(manager.is_happy());
//! assert_eq!(conditions.last().map(|c| c.type_.as_str()), Some(READY));
//! assert_eq!(conditions[2].status, ConditionStatus::True);
//! ```
use std::fmt;

use jiff::Timestamp;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub mod deployment;

/// The happy condition type of living resources.
pub const READY: &str = "Ready";

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of the condition.
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition, one of True, False, Unknown.
    pub status: ConditionStatus,

    /// The reason for the condition's last transition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// A human readable message indicating details about the transition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Last time the condition transitioned from one status to another.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<Time>,
}

impl Condition {
    fn new(
        type_: &str,
        status: ConditionStatus,
        reason: Option<String>,
        message: Option<String>,
    ) -> Self {
        Self {
            type_: type_.to_owned(),
            status,
            reason,
            message,
            last_transition_time: Some(Time(Timestamp::now())),
        }
    }

    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }

    pub fn is_false(&self) -> bool {
        self.status == ConditionStatus::False
    }

    pub fn is_unknown(&self) -> bool {
        self.status == ConditionStatus::Unknown
    }
}

#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, Hash, JsonSchema, PartialEq, Serialize,
)]
#[serde(rename_all = "PascalCase")]
pub enum ConditionStatus {
    /// True means a resource is in the condition.
    True,
    /// False means a resource is not in the condition.
    False,
    /// Unknown means the operator cannot decide if a resource is in the condition or not.
    #[default]
    Unknown,
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Declares the condition types of a resource and how they compose into the happy condition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConditionSet {
    happy: &'static str,
    dependents: Vec<&'static str>,
}

impl ConditionSet {
    /// Creates a set whose happy condition is [`READY`].
    pub fn living(dependents: &[&'static str]) -> Self {
        Self::new(READY, dependents)
    }

    pub fn new(happy: &'static str, dependents: &[&'static str]) -> Self {
        Self {
            happy,
            dependents: dependents
                .iter()
                .copied()
                .filter(|dependent| *dependent != happy)
                .collect(),
        }
    }

    pub fn happy(&self) -> &'static str {
        self.happy
    }

    pub fn dependents(&self) -> &[&'static str] {
        &self.dependents
    }

    /// Returns a [`ConditionManager`] operating on the given condition list.
    pub fn manage<'a>(&'a self, conditions: &'a mut Vec<Condition>) -> ConditionManager<'a> {
        ConditionManager {
            set: self,
            conditions,
        }
    }
}

/// Mutates a condition list according to the rules of a [`ConditionSet`].
pub struct ConditionManager<'a> {
    set: &'a ConditionSet,
    conditions: &'a mut Vec<Condition>,
}

impl ConditionManager<'_> {
    /// Seeds every declared condition type as Unknown if absent.
    ///
    /// Existing entries are kept where they are. The dependents are added in declaration
    /// order, the happy condition is added last.
    pub fn initialize(&mut self) {
        for type_ in self
            .set
            .dependents
            .iter()
            .chain(std::iter::once(&self.set.happy))
        {
            if self.get(type_).is_none() {
                self.conditions.push(Condition::new(
                    type_,
                    ConditionStatus::Unknown,
                    None,
                    None,
                ));
            }
        }
    }

    pub fn get(&self, type_: &str) -> Option<&Condition> {
        self.conditions
            .iter()
            .find(|condition| condition.type_ == type_)
    }

    pub fn is_happy(&self) -> bool {
        self.get(self.set.happy).is_some_and(Condition::is_true)
    }

    pub fn mark_true(&mut self, type_: &str) {
        self.set_condition(Condition::new(type_, ConditionStatus::True, None, None));
    }

    pub fn mark_false(&mut self, type_: &str, reason: impl Into<String>, message: impl Into<String>) {
        self.set_condition(Condition::new(
            type_,
            ConditionStatus::False,
            Some(reason.into()),
            Some(message.into()),
        ));
    }

    pub fn mark_unknown(
        &mut self,
        type_: &str,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) {
        self.set_condition(Condition::new(
            type_,
            ConditionStatus::Unknown,
            Some(reason.into()),
            Some(message.into()),
        ));
    }

    fn set_condition(&mut self, condition: Condition) {
        let is_dependent = self.set.dependents.contains(&condition.type_.as_str());
        self.upsert(condition);

        if is_dependent {
            self.recompute_happy();
        }
    }

    /// Replaces the condition of the same type in place, or appends it.
    ///
    /// The transition time is carried over as long as the status does not change.
    fn upsert(&mut self, mut condition: Condition) {
        match self
            .conditions
            .iter_mut()
            .find(|existing| existing.type_ == condition.type_)
        {
            Some(existing) => {
                if existing.status == condition.status {
                    condition
                        .last_transition_time
                        .clone_from(&existing.last_transition_time);
                }
                *existing = condition;
            }
            None => self.conditions.push(condition),
        }
    }

    /// Recomputes the happy condition from the dependents.
    ///
    /// Needed after the list was edited without going through this manager.
    pub fn recompute_happy(&mut self) {
        let happy = self.set.happy;

        let mut first_false = None;
        let mut first_unknown = None;
        for type_ in &self.set.dependents {
            match self.get(type_) {
                Some(condition) if condition.is_true() => {}
                Some(condition) if condition.is_false() => {
                    first_false = Some(condition.clone());
                    break;
                }
                other => {
                    if first_unknown.is_none() {
                        first_unknown = Some(other.cloned());
                    }
                }
            }
        }

        let aggregate = match (first_false, first_unknown) {
            (Some(failed), _) => {
                Condition::new(happy, ConditionStatus::False, failed.reason, failed.message)
            }
            (None, Some(unknown)) => {
                let (reason, message) = unknown
                    .map(|condition| (condition.reason, condition.message))
                    .unwrap_or_default();
                Condition::new(happy, ConditionStatus::Unknown, reason, message)
            }
            (None, None) => Condition::new(happy, ConditionStatus::True, None, None),
        };

        self.upsert(aggregate);
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    const A: &str = "DependenciesInstalled";
    const B: &str = "DeploymentsAvailable";
    const C: &str = "InstallSucceeded";
    const MARKER: &str = "VersionMigrated";

    fn set() -> ConditionSet {
        ConditionSet::living(&[A, B, C])
    }

    fn status_of(conditions: &[Condition], type_: &str) -> Option<ConditionStatus> {
        conditions
            .iter()
            .find(|condition| condition.type_ == type_)
            .map(|condition| condition.status)
    }

    fn initialized(set: &ConditionSet) -> Vec<Condition> {
        let mut conditions = Vec::new();
        set.manage(&mut conditions).initialize();
        conditions
    }

    #[test]
    fn initialize_seeds_unknown_in_declaration_order() {
        let conditions = initialized(&set());

        let types: Vec<_> = conditions.iter().map(|c| c.type_.as_str()).collect();
        assert_eq!(types, [A, B, C, READY]);
        assert!(conditions.iter().all(Condition::is_unknown));
    }

    #[test]
    fn initialize_is_idempotent_and_keeps_existing_entries() {
        let set = set();
        let mut conditions = vec![Condition::new(C, ConditionStatus::True, None, None)];

        set.manage(&mut conditions).initialize();
        set.manage(&mut conditions).initialize();

        let types: Vec<_> = conditions.iter().map(|c| c.type_.as_str()).collect();
        assert_eq!(types, [C, A, B, READY]);
        assert_eq!(status_of(&conditions, C), Some(ConditionStatus::True));
    }

    #[test]
    fn single_true_dependent_leaves_aggregate_unknown() {
        let set = set();
        let mut conditions = initialized(&set);

        let mut manager = set.manage(&mut conditions);
        manager.mark_true(C);

        assert!(!manager.is_happy());
        assert_eq!(status_of(&conditions, READY), Some(ConditionStatus::Unknown));
    }

    #[test]
    fn all_true_dependents_make_aggregate_true() {
        let set = set();
        let mut conditions = initialized(&set);

        let mut manager = set.manage(&mut conditions);
        for type_ in [A, B, C] {
            manager.mark_true(type_);
        }

        assert!(manager.is_happy());
    }

    #[rstest]
    #[case(A)]
    #[case(B)]
    #[case(C)]
    fn any_false_dependent_propagates_to_aggregate(#[case] failing: &str) {
        let set = set();
        let mut conditions = initialized(&set);

        let mut manager = set.manage(&mut conditions);
        for type_ in [A, B, C] {
            manager.mark_true(type_);
        }
        manager.mark_false(failing, "NotReady", "Waiting on deployments");

        assert!(!manager.is_happy());
        let ready = manager.get(READY).cloned().expect("ready is present");
        assert_eq!(ready.status, ConditionStatus::False);
        assert_eq!(ready.reason.as_deref(), Some("NotReady"));
        assert_eq!(ready.message.as_deref(), Some("Waiting on deployments"));
    }

    #[test]
    fn first_false_dependent_wins() {
        let set = set();
        let mut conditions = initialized(&set);

        let mut manager = set.manage(&mut conditions);
        manager.mark_false(C, "Error", "install failed");
        manager.mark_false(A, "Missing", "dependency missing");

        let ready = manager.get(READY).cloned().expect("ready is present");
        assert_eq!(ready.reason.as_deref(), Some("Missing"));
    }

    #[test]
    fn unknown_dependent_reason_is_carried() {
        let set = set();
        let mut conditions = initialized(&set);

        let mut manager = set.manage(&mut conditions);
        manager.mark_true(A);
        manager.mark_unknown(B, "Pending", "still rolling out");
        manager.mark_true(C);

        let ready = manager.get(READY).cloned().expect("ready is present");
        assert_eq!(ready.status, ConditionStatus::Unknown);
        assert_eq!(ready.reason.as_deref(), Some("Pending"));
    }

    #[test]
    fn marking_a_non_dependent_does_not_touch_the_aggregate() {
        let set = set();
        let mut conditions = initialized(&set);

        let mut manager = set.manage(&mut conditions);
        for type_ in [A, B, C] {
            manager.mark_true(type_);
        }
        manager.mark_false(MARKER, "Old", "previous schema");

        assert!(manager.is_happy());
        assert_eq!(conditions.last().map(|c| c.type_.as_str()), Some(MARKER));
    }

    #[test]
    fn updates_keep_position_in_list() {
        let set = set();
        let mut conditions = initialized(&set);

        set.manage(&mut conditions).mark_true(B);

        let types: Vec<_> = conditions.iter().map(|c| c.type_.as_str()).collect();
        assert_eq!(types, [A, B, C, READY]);
    }

    #[test]
    fn transition_time_is_kept_while_status_is_unchanged() {
        let set = set();
        let mut conditions = initialized(&set);

        set.manage(&mut conditions).mark_true(C);
        let first = set.manage(&mut conditions).get(C).cloned();

        set.manage(&mut conditions).mark_true(C);
        let second = set.manage(&mut conditions).get(C).cloned();

        assert_eq!(first, second);
    }
}
