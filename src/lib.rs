//! Core library for the `vmherd` VM lifecycle tool.
//!
//! A single YAML settings file lists VM deployments across vCloud Director,
//! vSphere, AWS and OpenStack. [`Shepherd`] routes the four lifecycle verbs
//! (deploy, destroy, clean-environment, prepare-environment) to one adapter
//! per entry, built by a [`ProvisionerFactory`]. Each adapter talks to its
//! vendor through a capability trait so tests can swap in recording doubles.

pub mod aws;
pub mod backend;
pub mod config;
pub mod live;
pub mod openstack;
pub mod process;
pub mod retry;
pub mod settings;
pub mod shepherd;
pub mod test_support;
pub mod vcloud;
pub mod vsphere;

pub use backend::{BackendFuture, BackendKind};
pub use config::{ConfigError, ToolConfig};
pub use live::LiveProvisioners;
pub use process::{CommandError, CommandOutput, CommandRunner, ProcessCommandRunner};
pub use retry::{RetryError, RetryPolicy, retry_until};
pub use settings::{SettingsError, ShepherdSettings, VmConfig};
pub use shepherd::{ProvisionerFactory, Shepherd, ShepherdError};
