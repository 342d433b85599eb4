//! Reporting of reconcile outcomes.
//!
//! Both controllers feed every item of their [`Controller::run`] stream into
//! [`report_controller_reconciled`].
//!
//! [`Controller::run`]: kube::runtime::Controller::run
use std::error::Error;

use kube::{
    Client, Resource,
    core::DynamicObject,
    runtime::{
        controller::{self, Action},
        reflector::ObjectRef,
    },
};

use crate::logging::k8s_events::publish_controller_error_as_k8s_event;

/// Classification of reconcile errors, used for events and the retry policy.
pub trait ReconcilerError: Error {
    /// `PascalCase` name of the error variant, used as the event reason.
    ///
    /// Usually delegates to the [`strum::EnumDiscriminants`] of the error enum.
    fn category(&self) -> &'static str;

    /// Whether the error persists until the reconciled object changes.
    ///
    /// Permanent errors are reported like any other, but not retried on a timer.
    fn is_permanent(&self) -> bool {
        false
    }

    /// Another object involved in the failure, attached to the published event.
    fn secondary_object(&self) -> Option<ObjectRef<DynamicObject>> {
        None
    }
}

/// Logs the outcome of one reconcile and publishes failures as Kubernetes events.
pub fn report_controller_reconciled<K, ReconcileErr, QueueErr>(
    client: &Client,
    controller_name: &str,
    result: &Result<(ObjectRef<K>, Action), controller::Error<ReconcileErr, QueueErr>>,
) where
    K: Resource,
    ReconcileErr: ReconcilerError + 'static,
    QueueErr: Error + 'static,
{
    match result {
        Ok((object, action)) => {
            tracing::info!(
                controller.name = controller_name,
                %object,
                ?action,
                "reconciled object"
            );
        }
        Err(error @ controller::Error::ReconcilerFailed(err, object)) => {
            tracing::error!(
                controller.name = controller_name,
                %object,
                category = err.category(),
                permanent = err.is_permanent(),
                error = err as &dyn Error,
                "failed to reconcile object"
            );
            publish_controller_error_as_k8s_event(client, controller_name, error);
        }
        // Queue and watch failures concern the operator, not a specific object.
        Err(err) => {
            tracing::error!(
                controller.name = controller_name,
                error = err as &dyn Error,
                "controller failed"
            );
        }
    }
}
