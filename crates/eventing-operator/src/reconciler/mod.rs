//! The reconcilers of the operator.
//!
//! Both reconcilers are keyed by [`ObjectKey`](crate::client::ObjectKey) and read the current
//! state of their resource on every call, they never trust the copy the watch delivered.
//! They only depend on the capability traits of [`crate::client`] and
//! [`crate::manifest`], the wiring to a real cluster lives in [`crate::run`].
use std::{sync::Arc, time::Duration};

use kube::runtime::controller::Action;

use crate::logging::controller::ReconcilerError;

pub mod active_keys;
pub mod eventing;
pub mod key_locks;
pub mod version_controller;

pub use self::{
    active_keys::ActiveKeySet, eventing::EventingReconciler, key_locks::KeyLocks,
    version_controller::VersionControllerReconciler,
};

/// Delay before a failed reconciliation is retried.
pub const REQUEUE_DELAY: Duration = Duration::from_secs(10);

/// What to do after a failed reconciliation.
///
/// Permanent errors are not retried until the object changes, everything else is retried
/// after [`REQUEUE_DELAY`].
pub fn error_action(error: &impl ReconcilerError) -> Action {
    if error.is_permanent() {
        Action::await_change()
    } else {
        Action::requeue(REQUEUE_DELAY)
    }
}

/// Error policy of the controllers, see [`error_action`].
pub fn error_policy<K, E, C>(_object: Arc<K>, error: &E, _ctx: Arc<C>) -> Action
where
    E: ReconcilerError,
{
    error_action(error)
}
