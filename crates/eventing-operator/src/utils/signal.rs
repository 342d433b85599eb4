use snafu::{ResultExt, Snafu};
use tokio::{
    signal::unix::{SignalKind, signal},
    sync::watch,
};

#[derive(Debug, Snafu)]
#[snafu(display("failed to register the {name} handler"))]
pub struct SignalError {
    source: std::io::Error,
    name: &'static str,
}

/// Fans a termination signal out to any number of tasks.
///
/// Every handle acquired through [`ShutdownSignal::handle`] completes once `SIGTERM` or
/// `SIGINT` is received.
pub struct ShutdownSignal {
    watch_rx: watch::Receiver<()>,
}

impl ShutdownSignal {
    /// Registers the signal handlers, must be called from within a Tokio runtime.
    pub fn register() -> Result<Self, SignalError> {
        let mut sigterm =
            signal(SignalKind::terminate()).context(SignalSnafu { name: "SIGTERM" })?;
        let mut sigint = signal(SignalKind::interrupt()).context(SignalSnafu { name: "SIGINT" })?;
        let (watch_tx, watch_rx) = watch::channel(());

        tokio::spawn(async move {
            let name = tokio::select! {
                _ = sigterm.recv() => "SIGTERM",
                _ = sigint.recv() => "SIGINT",
            };
            tracing::info!(signal = name, "received signal, shutting down");
            watch_tx.send(())
        });

        Ok(Self { watch_rx })
    }

    /// A future completing on shutdown, handles can be acquired as often as needed.
    pub fn handle(&self) -> impl Future<Output = ()> + use<> {
        let mut watch_rx = self.watch_rx.clone();

        async move {
            // An error means the sender is gone, which only happens after sending.
            watch_rx.changed().await.ok();
        }
    }
}
