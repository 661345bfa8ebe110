//! Errors raised by the vCloud adapter.

use thiserror::Error;

use crate::process::CommandError;

use super::api::VcloudApiError;

/// Errors raised while deploying or tearing down vCloud vApps.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum VcloudError {
    /// Something already answers on the address the vApp would take.
    #[error("VM exists at {ip}")]
    HostExists {
        /// Address that answered the reachability check.
        ip: String,
    },
    /// The template archive could not be unpacked.
    #[error("error executing: {command}")]
    Extraction {
        /// Shell command that failed.
        command: String,
        /// Captured standard error of the failed command.
        stderr: String,
    },
    /// The instantiated vApp never reported a VM.
    #[error("vApp {vapp} reported no VMs after {attempts} attempts")]
    VmNotReady {
        /// vApp being waited on.
        vapp: String,
        /// Attempts made before giving up.
        attempts: u32,
    },
    /// The scratch workspace for the template could not be prepared.
    #[error("failed to prepare scratch directory: {message}")]
    Workspace {
        /// Underlying failure description.
        message: String,
    },
    /// A helper command could not be run at all.
    #[error(transparent)]
    Command(#[from] CommandError),
    /// The vCloud Director API rejected a request.
    #[error(transparent)]
    Api(#[from] VcloudApiError),
}
