use std::{error::Error as StdError, path::PathBuf};

use snafu::{ResultExt, Snafu};
use tracing::{Level, subscriber::SetGlobalDefaultError};
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, Layer, Registry, layer::SubscriberExt};

pub mod controller;
mod k8s_events;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to initialize rolling file appender in {directory:?}"))]
    InitRollingFileAppender {
        source: InitError,
        directory: PathBuf,
    },

    #[snafu(display("unable to set the global default subscriber"))]
    SetGlobalDefaultSubscriber { source: SetGlobalDefaultError },
}

/// Initializes `tracing` logging with options from the environment variable
/// given in the `env` parameter.
///
/// Use the operator name plus `_LOG`, e.g. `EVENTING_OPERATOR_LOG`.
/// If the environment variable is not set, the maximum log level is set to INFO.
///
/// Log output is additionally written as JSON to a file when `{env}_DIRECTORY` is set to a
/// directory path. The file is rotated hourly.
pub fn initialize_logging(env: &str, app_name: &str) -> Result<(), Error> {
    let env_filter = || {
        EnvFilter::try_from_env(env).unwrap_or_else(|_| EnvFilter::new(Level::INFO.to_string()))
    };

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = vec![
        tracing_subscriber::fmt::layer()
            .with_filter(env_filter())
            .boxed(),
    ];

    let file_log_dir = std::env::var_os(format!("{env}_DIRECTORY")).map(PathBuf::from);
    if let Some(directory) = &file_log_dir {
        let file_appender = RollingFileAppender::builder()
            .rotation(Rotation::HOURLY)
            .filename_prefix(app_name)
            .filename_suffix("log")
            .max_log_files(6)
            .build(directory)
            .context(InitRollingFileAppenderSnafu { directory })?;

        layers.push(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(file_appender)
                .with_filter(env_filter())
                .boxed(),
        );
    }

    tracing::subscriber::set_global_default(Registry::default().with(layers))
        .context(SetGlobalDefaultSubscriberSnafu)?;

    // need to delay logging until after tracing is initialized
    match file_log_dir {
        Some(dir) => tracing::info!(directory = %dir.display(), "file logging enabled"),
        None => tracing::debug!("file logging disabled, because no log directory set"),
    }

    Ok(())
}

/// Renders `err` followed by all of its sources, separated by colons.
pub fn error_chain(err: &dyn StdError) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(err) = source {
        message.push_str(": ");
        message.push_str(&err.to_string());
        source = err.source();
    }
    message
}
