//! Command-line interface definitions for the `vmherd` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page. It
//! therefore depends on nothing but `clap` and the standard library.

use clap::{Args, Parser, Subcommand};

/// Top-level CLI for the `vmherd` binary.
#[derive(Debug, Parser)]
#[command(
    name = "vmherd",
    about = "Deploy, destroy and clean VMs across vCloud, vSphere, AWS and OpenStack",
    arg_required_else_help = true
)]
pub(crate) struct Cli {
    /// Log filter used when `RUST_LOG` is unset (for example `debug` or
    /// `vmherd=trace`).
    #[arg(long, global = true, value_name = "FILTER", default_value = "info")]
    pub(crate) log_level: String,
    /// Emit logs as JSON lines instead of human-readable text.
    #[arg(long, global = true)]
    pub(crate) log_json: bool,
    /// Lifecycle verb to run.
    #[command(subcommand)]
    pub(crate) command: Verb,
}

/// Lifecycle verbs.
#[derive(Debug, Subcommand)]
pub(crate) enum Verb {
    /// Deploy one artifact per configured VM, in order.
    #[command(name = "deploy")]
    Deploy(DeployCommand),
    /// Destroy every configured VM.
    #[command(name = "destroy")]
    Destroy(SettingsArg),
    /// Remove everything the configured environments hold.
    #[command(name = "clean-environment")]
    CleanEnvironment(SettingsArg),
    /// Create the shared infrastructure the VMs need.
    #[command(name = "prepare-environment")]
    PrepareEnvironment(SettingsArg),
}

/// Location of the deployment settings file.
#[derive(Debug, Args)]
pub(crate) struct SettingsArg {
    /// YAML settings file with a `vm_shepherd.vm_configs` list.
    #[arg(long, short = 'c', value_name = "PATH")]
    pub(crate) config: String,
}

/// Arguments for the `vmherd deploy` subcommand.
#[derive(Debug, Args)]
pub(crate) struct DeployCommand {
    /// Settings file location.
    #[command(flatten)]
    pub(crate) settings: SettingsArg,
    /// Artifact per configured VM (OVA, OVF archive, AMI map or qcow2 image),
    /// in the order the VMs are listed.
    #[arg(required = true, value_name = "ARTIFACT")]
    pub(crate) paths: Vec<String>,
}
