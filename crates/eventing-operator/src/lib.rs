//! An operator installing Knative Eventing and migrating its custom resource between the
//! schemas of different operator releases.
pub mod cli;
pub mod client;
pub mod crd;
pub mod logging;
pub mod manifest;
pub mod migration;
pub mod namespace;
pub mod reconciler;
pub mod run;
pub mod status;
pub mod utils;
