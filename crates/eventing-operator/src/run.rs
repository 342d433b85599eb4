//! Runs both reconcilers against a Kubernetes cluster until shutdown.
use std::{error::Error as StdError, path::PathBuf, pin::pin, sync::Arc};

use futures::{StreamExt, future};
use k8s_openapi::api::apps::v1::Deployment;
use kube::{
    Api, Client,
    runtime::{
        Controller, WatchStreamExt,
        controller::{self, Action},
        reflector::ObjectRef,
        watcher,
    },
};
use snafu::{ResultExt, Snafu};
use tracing::{error, info, warn};

use crate::{
    cli::RunArguments,
    client::{KubeCrdInstaller, KubeDynamicStore, KubeStore, ObjectKey},
    crd::{KEVersionController, KnativeEventing},
    logging::controller::report_controller_reconciled,
    manifest::{self, KubeManifest},
    reconciler::{
        EventingReconciler, REQUEUE_DELAY, VersionControllerReconciler, error_action,
        error_policy, eventing, version_controller,
    },
    utils::signal::{ShutdownSignal, SignalError},
};

pub const EVENTING_CONTROLLER_NAME: &str = "knativeeventing";
pub const VERSION_CONTROLLER_NAME: &str = "keversioncontroller";

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to load the manifest from {directory:?}"))]
    LoadManifest {
        source: manifest::Error,
        directory: PathBuf,
    },

    #[snafu(display("failed to watch for shutdown signals"))]
    WatchShutdown { source: SignalError },
}

/// Starts the controllers and waits until they shut down.
pub async fn run(client: Client, args: RunArguments) -> Result<(), Error> {
    let manifest_dir = args.manifest_path();
    let manifest = KubeManifest::from_dir(
        client.clone(),
        args.field_manager.as_str(),
        args.target_namespace.as_str(),
        &manifest_dir,
    )
    .context(LoadManifestSnafu {
        directory: manifest_dir,
    })?;
    let shutdown = ShutdownSignal::register().context(WatchShutdownSnafu)?;

    let eventing_reconciler = Arc::new(EventingReconciler::new(
        KubeStore::<KnativeEventing>::new(client.clone(), &args.field_manager),
        KubeStore::<Deployment>::new(client.clone(), &args.field_manager),
        manifest,
        args.target_namespace.as_str(),
        args.operator_version.as_str(),
    ));
    let version_reconciler = Arc::new(VersionControllerReconciler::new(
        KubeStore::<KEVersionController>::new(client.clone(), &args.field_manager),
        KubeStore::<KnativeEventing>::new(client.clone(), &args.field_manager),
        KubeDynamicStore::new(client.clone(), &args.field_manager),
        KubeCrdInstaller::new(client.clone(), &args.field_manager),
        args.operator_version.as_str(),
    ));

    let config = controller::Config::default().concurrency(args.concurrency);
    let eventings = args.watch_namespace.get_api::<KnativeEventing>(&client);
    let deployments = Api::<Deployment>::namespaced(client.clone(), &args.target_namespace);
    let active_keys = eventing_reconciler.active_keys().clone();

    info!(
        watch_namespace = ?args.watch_namespace,
        target_namespace = %args.target_namespace,
        operator_version = %args.operator_version,
        "starting controllers"
    );

    let eventing_controller = Controller::new(eventings.clone(), watcher::Config::default())
        // Deployments belong to the shared manifest, so each of them concerns every resource.
        .watches(deployments, watcher::Config::default(), move |_| {
            active_keys
                .snapshot()
                .into_iter()
                .map(|key| ObjectRef::new(&key.name).within(&key.namespace))
        })
        .with_config(config.clone())
        .graceful_shutdown_on(shutdown.handle())
        .run(
            reconcile_eventing,
            error_policy,
            Arc::clone(&eventing_reconciler),
        )
        .for_each(|result| {
            report_controller_reconciled(&client, EVENTING_CONTROLLER_NAME, &result);
            future::ready(())
        });

    let version_controller = Controller::new(
        args.watch_namespace.get_api::<KEVersionController>(&client),
        watcher::Config::default(),
    )
    .with_config(config)
    .graceful_shutdown_on(shutdown.handle())
    .run(reconcile_version_controller, error_policy, version_reconciler)
    .for_each(|result| {
        report_controller_reconciled(&client, VERSION_CONTROLLER_NAME, &result);
        future::ready(())
    });

    let deletion_watch = pin!(observe_deletions(eventings, eventing_reconciler));
    let deletion_shutdown = pin!(shutdown.handle());
    let deletions = future::select(deletion_watch, deletion_shutdown);

    futures::join!(eventing_controller, version_controller, deletions);
    info!("controllers stopped");

    Ok(())
}

async fn reconcile_eventing(
    object: Arc<KnativeEventing>,
    reconciler: Arc<EventingReconciler>,
) -> Result<Action, eventing::Error> {
    let key = ObjectKey::from_resource(object.as_ref()).context(eventing::InvalidKeySnafu)?;
    reconciler.reconcile(&key).await
}

async fn reconcile_version_controller(
    object: Arc<KEVersionController>,
    reconciler: Arc<VersionControllerReconciler>,
) -> Result<Action, version_controller::Error> {
    let key =
        ObjectKey::from_resource(object.as_ref()).context(version_controller::InvalidKeySnafu)?;
    reconciler.reconcile(&key).await
}

/// The controller only reconciles objects that exist, deletions are fed in from a separate watch.
///
/// [`EventingReconciler::reconcile`] serializes calls per key, so a deletion never overlaps
/// with a controller reconcile of the same resource.
async fn observe_deletions(api: Api<KnativeEventing>, reconciler: Arc<EventingReconciler>) {
    let mut events = pin!(watcher(api, watcher::Config::default()).default_backoff());

    while let Some(event) = events.next().await {
        match event {
            Ok(watcher::Event::Delete(object)) => {
                match ObjectKey::from_resource(&object) {
                    Ok(key) => reconcile_deleted(&reconciler, &key).await,
                    Err(err) => warn!(
                        error = &err as &dyn StdError,
                        "ignoring deletion of KnativeEventing without key"
                    ),
                }
            }
            Ok(_) => {}
            Err(err) => warn!(
                error = &err as &dyn StdError,
                "failed to watch KnativeEventing deletions"
            ),
        }
    }
}

async fn reconcile_deleted(reconciler: &EventingReconciler, key: &ObjectKey) {
    while let Err(err) = reconciler.reconcile(key).await {
        error!(
            key = %key,
            error = &err as &dyn StdError,
            "failed to reconcile deleted KnativeEventing"
        );
        if error_action(&err) == Action::await_change() {
            return;
        }
        tokio::time::sleep(REQUEUE_DELAY).await;
    }
}
