use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use kube::core::{DynamicObject, Status};
use snafu::ResultExt;
use tokio::sync::Notify;

use super::{
    Error, ManifestApplier, Result, TransformSnafu, Transformer, describe, object_ref,
};

#[derive(Default)]
struct Calls {
    applied: Vec<Vec<DynamicObject>>,
    delete_all: usize,
    failing_delete_all: usize,
    log: Vec<&'static str>,
}

/// Holds every `apply` until the test releases it.
#[derive(Default)]
struct Gate {
    entered: Notify,
    released: Notify,
}

/// Records what would have been applied instead of talking to a cluster.
#[derive(Clone, Default)]
pub(crate) struct FakeManifest {
    objects: Vec<DynamicObject>,
    calls: Arc<Mutex<Calls>>,
    gate: Option<Arc<Gate>>,
}

impl FakeManifest {
    pub fn new(objects: Vec<DynamicObject>) -> Self {
        Self {
            objects,
            calls: Arc::default(),
            gate: None,
        }
    }

    /// Like [`FakeManifest::new`], but `apply` only finishes after [`FakeManifest::release`].
    pub fn gated(objects: Vec<DynamicObject>) -> Self {
        Self {
            gate: Some(Arc::default()),
            ..Self::new(objects)
        }
    }

    /// Resolves once an `apply` is waiting for [`FakeManifest::release`].
    pub async fn wait_until_applying(&self) {
        if let Some(gate) = &self.gate {
            gate.entered.notified().await;
        }
    }

    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.released.notify_one();
        }
    }

    /// Makes the next `times` calls of [`ManifestApplier::delete_all`] fail.
    pub fn fail_delete_all(&self, times: usize) {
        self.calls.lock().expect("lock is poisoned").failing_delete_all = times;
    }

    /// The transformed objects of every successful [`ManifestApplier::apply`] call.
    pub fn applied(&self) -> Vec<Vec<DynamicObject>> {
        self.calls.lock().expect("lock is poisoned").applied.clone()
    }

    /// Number of successful [`ManifestApplier::delete_all`] calls.
    pub fn delete_all_calls(&self) -> usize {
        self.calls.lock().expect("lock is poisoned").delete_all
    }

    /// Every call in the order it finished.
    pub fn log(&self) -> Vec<&'static str> {
        self.calls.lock().expect("lock is poisoned").log.clone()
    }
}

#[async_trait]
impl ManifestApplier for FakeManifest {
    async fn apply(&self, transformers: &[&dyn Transformer]) -> Result<()> {
        if let Some(gate) = &self.gate {
            gate.entered.notify_one();
            gate.released.notified().await;
        }

        let mut applied = Vec::with_capacity(self.objects.len());
        for object in &self.objects {
            let mut object = object.clone();
            for transformer in transformers {
                transformer.transform(&mut object).context(TransformSnafu {
                    object: describe(&object),
                    reference: object_ref(&object),
                })?;
            }
            applied.push(object);
        }

        let mut calls = self.calls.lock().expect("lock is poisoned");
        calls.applied.push(applied);
        calls.log.push("apply");
        Ok(())
    }

    async fn delete_all(&self) -> Result<()> {
        let mut calls = self.calls.lock().expect("lock is poisoned");
        if calls.failing_delete_all > 0 {
            calls.failing_delete_all -= 1;
            calls.log.push("delete_all failed");
            return Err(Error::Delete {
                source: kube::Error::Api(
                    Status::failure("deletion is forbidden", "Forbidden")
                        .with_code(403)
                        .boxed(),
                ),
                object: "manifest".to_owned(),
                reference: None,
            });
        }

        calls.delete_all += 1;
        calls.log.push("delete_all");
        Ok(())
    }
}
