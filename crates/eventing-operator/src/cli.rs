//! Command line interface of the operator.
//!
//! ```rust
//! use clap::Parser;
//! use eventing_operator::cli::Command;
//!
//! let command = Command::parse_from([
//!     "eventing-operator",
//!     "run",
//!     "--manifest-dir",
//!     "/var/run/ko",
//!     "--watch-namespace",
//!     "knative-eventing",
//! ]);
//! assert!(matches!(command, Command::Run(_)));
//! ```
use std::path::PathBuf;

use clap::{Args, Parser};

use crate::{crd::OPERATOR_VERSION, namespace::WatchNamespace};

/// Directory below the manifest directory holding the Knative Eventing release.
pub const MANIFEST_SUBDIR: &str = "knative-eventing";

#[derive(Debug, PartialEq, Eq, Parser)]
#[command(name = "eventing-operator", author, version, about)]
pub enum Command {
    /// Print CRD objects.
    Crd,

    /// Run the operator.
    Run(RunArguments),
}

#[derive(Debug, PartialEq, Eq, Args)]
#[command(long_about = "")]
pub struct RunArguments {
    /// Directory containing the release manifests, which are read from its `knative-eventing`
    /// subdirectory
    #[arg(long, value_name = "DIR", env = "KO_DATA_PATH", default_value = "/var/run/ko")]
    pub manifest_dir: PathBuf,

    /// Provides a specific namespace to watch (instead of watching all namespaces)
    #[arg(long, env, default_value = "")]
    pub watch_namespace: WatchNamespace,

    /// Namespace the manifest is installed into
    #[arg(long, env, default_value = "knative-eventing")]
    pub target_namespace: String,

    /// Field manager used for server-side apply and all other writes
    #[arg(long, env, default_value = "eventing-operator")]
    pub field_manager: String,

    /// Number of objects reconciled concurrently by each controller
    #[arg(long, env, default_value_t = 2)]
    pub concurrency: u16,

    /// Version of the current KnativeEventing schema, only meant to be changed for testing
    #[arg(long, env, default_value = OPERATOR_VERSION, hide = true)]
    pub operator_version: String,
}

impl RunArguments {
    /// The directory the manifest is loaded from.
    pub fn manifest_path(&self) -> PathBuf {
        self.manifest_dir.join(MANIFEST_SUBDIR)
    }
}
