//! vSphere adapter.
//!
//! Appliances are imported from OVA archives with their network settings
//! passed as OVF properties, resized, powered on and then awaited until VMware
//! Tools reports a guest address.

mod govc;

use std::fmt;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::backend::BackendFuture;
use crate::process::CommandError;
use crate::retry::{RetryError, RetryPolicy, retry_until};
use crate::vcloud::ADMIN_PASSWORD;

pub use govc::{GovcClient, GovcSession};

/// Polling budget for the guest address after power on.
pub const GUEST_IP_POLICY: RetryPolicy = RetryPolicy::new(60, Duration::from_secs(10));

/// vCenter endpoint and credentials.
#[derive(Clone, Deserialize, Eq, PartialEq)]
pub struct VcenterCredentials {
    /// vCenter host name or address.
    pub ip: String,
    /// Login user.
    pub username: String,
    /// Login password.
    pub password: String,
}

impl fmt::Debug for VcenterCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VcenterCredentials")
            .field("ip", &self.ip)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Guest network and sizing settings for one VM.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct VmSettings {
    /// Static address of the VM.
    pub ip: String,
    /// Default gateway.
    pub gateway: String,
    /// Netmask.
    pub netmask: String,
    /// Comma-separated DNS servers.
    pub dns: String,
    /// Comma-separated NTP servers.
    pub ntp_servers: String,
    /// Virtual CPU count.
    pub cpus: u32,
    /// Memory in MiB.
    pub ram_mb: u32,
}

impl VmSettings {
    /// OVF properties understood by the appliance, in the order they are
    /// applied.
    #[must_use]
    pub fn ovf_properties(&self) -> Vec<(String, String)> {
        [
            ("ip0", self.ip.as_str()),
            ("netmask0", self.netmask.as_str()),
            ("gateway", self.gateway.as_str()),
            ("DNS", self.dns.as_str()),
            ("ntp_servers", self.ntp_servers.as_str()),
            ("admin_password", ADMIN_PASSWORD),
        ]
        .into_iter()
        .map(|(key, value)| (key.to_owned(), value.to_owned()))
        .collect()
    }
}

/// Where in the inventory a VM is placed.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct Placement {
    /// Compute cluster.
    pub cluster: String,
    /// Resource pool inside the cluster.
    pub resource_pool: String,
    /// Datastore for the VM disks.
    pub datastore: String,
    /// Port group the appliance network is mapped onto.
    pub network: String,
    /// VM folder, relative to the datacenter's VM root.
    pub folder: String,
}

/// Inventory and datastore locations wiped by `clean_environment`.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
pub struct CleanupScope {
    /// VM folders whose contents and the folders themselves are destroyed.
    #[serde(default)]
    pub datacenter_folders_to_clean: Vec<String>,
    /// Datastores to sweep.
    #[serde(default)]
    pub datastores: Vec<String>,
    /// Folders removed from every listed datastore.
    #[serde(default)]
    pub datastore_folders_to_clean: Vec<String>,
}

/// Request to import an OVA archive.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OvaImport {
    /// Local OVA archive.
    pub ova_path: Utf8PathBuf,
    /// Name of the resulting VM.
    pub name: String,
    /// Inventory placement.
    pub placement: Placement,
    /// OVF property key/value pairs.
    pub properties: Vec<(String, String)>,
}

/// Errors raised by the vSphere adapter.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum VsphereError {
    /// A `govc` invocation failed.
    #[error(transparent)]
    Command(#[from] CommandError),
    /// Command output could not be interpreted.
    #[error("unexpected output from {command}: {message}")]
    Parse {
        /// Command whose output was rejected.
        command: String,
        /// Parse failure description.
        message: String,
    },
    /// The guest never reported an address.
    #[error("VM {vm} reported no guest IP after {attempts} attempts")]
    GuestIpTimeout {
        /// VM being waited on.
        vm: String,
        /// Attempts made.
        attempts: u32,
    },
    /// Temporary import options could not be written.
    #[error("failed to write import options: {message}")]
    Workspace {
        /// Underlying failure description.
        message: String,
    },
}

/// Inventory operations needed from vCenter, bound to one datacenter.
pub trait VsphereApi: Send + Sync {
    /// Imports an OVA archive as a powered-off VM.
    fn import_ova<'a>(&'a self, request: &'a OvaImport) -> BackendFuture<'a, (), VsphereError>;

    /// Sets the CPU count and memory of a VM.
    fn reconfigure<'a>(
        &'a self,
        vm: &'a str,
        cpus: u32,
        ram_mb: u32,
    ) -> BackendFuture<'a, (), VsphereError>;

    /// Powers a VM on.
    fn power_on<'a>(&'a self, vm: &'a str) -> BackendFuture<'a, (), VsphereError>;

    /// Returns the guest address once VMware Tools reports one.
    fn guest_ip<'a>(&'a self, vm: &'a str) -> BackendFuture<'a, Option<String>, VsphereError>;

    /// Inventory paths of VMs in `resource_pool` whose guest address is `ip`.
    fn find_vms_by_ip<'a>(
        &'a self,
        resource_pool: &'a str,
        ip: &'a str,
    ) -> BackendFuture<'a, Vec<String>, VsphereError>;

    /// Powers off and destroys a VM.
    fn destroy_vm<'a>(&'a self, vm_path: &'a str) -> BackendFuture<'a, (), VsphereError>;

    /// Destroys every VM in a VM folder and then the folder. Missing folders
    /// are ignored.
    fn destroy_folder<'a>(&'a self, folder: &'a str) -> BackendFuture<'a, (), VsphereError>;

    /// Removes a path from a datastore. Missing paths are ignored.
    fn remove_datastore_path<'a>(
        &'a self,
        datastore: &'a str,
        path: &'a str,
    ) -> BackendFuture<'a, (), VsphereError>;
}

/// Lifecycle operations for VMs in one vSphere datacenter.
pub trait VsphereProvisioner: Send + Sync {
    /// Imports, sizes and boots the appliance in `ova`.
    fn deploy<'a>(
        &'a self,
        ova: &'a Utf8Path,
        vm: &'a VmSettings,
        placement: &'a Placement,
    ) -> BackendFuture<'a, (), VsphereError>;

    /// Destroys the VMs in `resource_pool` answering on `ip`.
    fn destroy<'a>(
        &'a self,
        ip: &'a str,
        resource_pool: &'a str,
    ) -> BackendFuture<'a, (), VsphereError>;

    /// Wipes the folders and datastore paths named by `scope`.
    fn clean_environment<'a>(
        &'a self,
        scope: &'a CleanupScope,
    ) -> BackendFuture<'a, (), VsphereError>;

    /// Prepares the datacenter for deployments. vSphere needs no preparation.
    fn prepare_environment(&self) -> BackendFuture<'_, (), VsphereError>;
}

/// Derives the VM name from the archive name and address.
#[must_use]
pub fn vm_name(ova: &Utf8Path, ip: &str) -> String {
    let stem = ova.file_stem().unwrap_or("vm");
    format!("{stem}-{ip}")
}

/// vSphere adapter over a [`VsphereApi`].
#[derive(Debug)]
pub struct VsphereManager<A> {
    api: A,
    guest_ip_wait: RetryPolicy,
}

impl<A: VsphereApi> VsphereManager<A> {
    /// Creates a manager with the default guest address wait.
    #[must_use]
    pub const fn new(api: A) -> Self {
        Self {
            api,
            guest_ip_wait: GUEST_IP_POLICY,
        }
    }

    /// Overrides the guest address wait.
    #[must_use]
    pub fn with_guest_ip_wait(mut self, policy: RetryPolicy) -> Self {
        self.guest_ip_wait = policy;
        self
    }

    async fn deploy_ova(
        &self,
        ova: &Utf8Path,
        vm: &VmSettings,
        placement: &Placement,
    ) -> Result<(), VsphereError> {
        let request = OvaImport {
            ova_path: ova.to_owned(),
            name: vm_name(ova, &vm.ip),
            placement: placement.clone(),
            properties: vm.ovf_properties(),
        };
        info!(vm = %request.name, ova = %ova, "importing OVA");
        self.api.import_ova(&request).await?;
        self.api
            .reconfigure(&request.name, vm.cpus, vm.ram_mb)
            .await?;
        self.api.power_on(&request.name).await?;

        let api = &self.api;
        let name = request.name.as_str();
        let address = retry_until(self.guest_ip_wait, move || api.guest_ip(name))
            .await
            .map_err(|err| match err {
                RetryError::Exhausted { attempts, .. } => VsphereError::GuestIpTimeout {
                    vm: name.to_owned(),
                    attempts,
                },
                RetryError::Attempt(inner) => inner,
            })?;
        info!(vm = name, ip = %address, "VM is up");
        Ok(())
    }

    async fn destroy_by_ip(&self, ip: &str, resource_pool: &str) -> Result<(), VsphereError> {
        let paths = self.api.find_vms_by_ip(resource_pool, ip).await?;
        if paths.is_empty() {
            debug!(ip, resource_pool, "no VM found; nothing to destroy");
            return Ok(());
        }
        for path in &paths {
            info!(vm = %path, "destroying VM");
            self.api.destroy_vm(path).await?;
        }
        Ok(())
    }

    async fn clean(&self, scope: &CleanupScope) -> Result<(), VsphereError> {
        for folder in &scope.datacenter_folders_to_clean {
            info!(folder = %folder, "cleaning VM folder");
            self.api.destroy_folder(folder).await?;
        }
        for datastore in &scope.datastores {
            for path in &scope.datastore_folders_to_clean {
                info!(datastore = %datastore, path = %path, "cleaning datastore folder");
                self.api.remove_datastore_path(datastore, path).await?;
            }
        }
        Ok(())
    }
}

impl<A: VsphereApi> VsphereProvisioner for VsphereManager<A> {
    fn deploy<'a>(
        &'a self,
        ova: &'a Utf8Path,
        vm: &'a VmSettings,
        placement: &'a Placement,
    ) -> BackendFuture<'a, (), VsphereError> {
        Box::pin(self.deploy_ova(ova, vm, placement))
    }

    fn destroy<'a>(
        &'a self,
        ip: &'a str,
        resource_pool: &'a str,
    ) -> BackendFuture<'a, (), VsphereError> {
        Box::pin(self.destroy_by_ip(ip, resource_pool))
    }

    fn clean_environment<'a>(
        &'a self,
        scope: &'a CleanupScope,
    ) -> BackendFuture<'a, (), VsphereError> {
        Box::pin(self.clean(scope))
    }

    fn prepare_environment(&self) -> BackendFuture<'_, (), VsphereError> {
        Box::pin(async {
            debug!("vSphere needs no environment preparation");
            Ok(())
        })
    }
}
