//! Typed deployment entries, one shape per backend.

use serde::Deserialize;

use crate::aws::{AwsEnvironment, AwsVmConfig};
use crate::backend::BackendKind;
use crate::openstack::{OpenstackCredentials, OpenstackVmOptions};
use crate::vcloud::{VappConfig, VcloudLogin};
use crate::vsphere::{CleanupScope, Placement, VcenterCredentials, VmSettings};

/// One resolved `vm_configs` entry.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum VmConfig {
    /// vCloud Director vApp.
    Vcloud(VcloudEntry),
    /// vSphere VM.
    Vsphere(VsphereEntry),
    /// EC2 instance.
    Aws(AwsEntry),
    /// OpenStack server.
    Openstack(OpenstackEntry),
}

impl VmConfig {
    /// Backend the entry targets.
    #[must_use]
    pub const fn kind(&self) -> BackendKind {
        match self {
            Self::Vcloud(_) => BackendKind::Vcloud,
            Self::Vsphere(_) => BackendKind::Vsphere,
            Self::Aws(_) => BackendKind::Aws,
            Self::Openstack(_) => BackendKind::Openstack,
        }
    }
}

/// vCloud entry: `creds`, `vdc` and `vapp`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct VcloudEntry {
    /// Organisation login.
    pub creds: VcloudLogin,
    /// Target VDC.
    pub vdc: VdcSettings,
    /// Appliance settings.
    pub vapp: VappSettings,
}

/// `vdc` block of a vCloud entry.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct VdcSettings {
    /// VDC name.
    pub name: String,
    /// Catalog the template is uploaded into.
    pub catalog: String,
    /// Network the vApp is bridged onto.
    pub network: String,
}

/// `vapp` block of a vCloud entry.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct VappSettings {
    /// Name of the Ops Manager vApp.
    pub ops_manager_name: String,
    /// Static address.
    pub ip: String,
    /// Default gateway.
    pub gateway: String,
    /// Netmask.
    pub netmask: String,
    /// DNS servers.
    pub dns: String,
    /// NTP servers.
    pub ntp: String,
    /// Product vApps removed by `clean_environment`.
    #[serde(default)]
    pub product_names: Vec<String>,
    /// Catalog removed by `clean_environment`; the VDC catalog when unset.
    #[serde(default)]
    pub product_catalog: Option<String>,
}

impl VcloudEntry {
    /// Appliance configuration handed to the deployment pipeline.
    #[must_use]
    pub fn vapp_config(&self) -> VappConfig {
        VappConfig {
            name: self.vapp.ops_manager_name.clone(),
            ip: self.vapp.ip.clone(),
            gateway: self.vapp.gateway.clone(),
            netmask: self.vapp.netmask.clone(),
            dns: self.vapp.dns.clone(),
            ntp: self.vapp.ntp.clone(),
            catalog: self.vdc.catalog.clone(),
            network: self.vdc.network.clone(),
        }
    }

    /// Catalog swept by `clean_environment`.
    #[must_use]
    pub fn product_catalog(&self) -> &str {
        self.vapp
            .product_catalog
            .as_deref()
            .unwrap_or(&self.vdc.catalog)
    }
}

/// vSphere entry: `vcenter_creds`, `vsphere`, `vm` and optional `cleanup`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct VsphereEntry {
    /// vCenter login.
    pub vcenter_creds: VcenterCredentials,
    /// Datacenter and inventory placement.
    pub vsphere: VsphereTarget,
    /// Guest settings.
    pub vm: VmSettings,
    /// Locations wiped by `clean_environment`.
    #[serde(default)]
    pub cleanup: Option<VsphereCleanup>,
}

/// `vsphere` block of a vSphere entry.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct VsphereTarget {
    /// Datacenter used for deploy, destroy and prepare.
    pub datacenter: String,
    /// Placement inside the datacenter.
    #[serde(flatten)]
    pub placement: Placement,
}

/// `cleanup` block of a vSphere entry.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct VsphereCleanup {
    /// Datacenter the cleanup runs against.
    pub datacenter: String,
    /// Folders and datastore paths to wipe.
    #[serde(flatten)]
    pub scope: CleanupScope,
}

/// AWS entry: per-VM settings plus the shared environment.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AwsEntry {
    /// Per-VM settings.
    pub vm: AwsVmConfig,
    /// Document-level `env_config`.
    pub env: AwsEnvironment,
}

/// OpenStack entry: `creds` and `vm`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct OpenstackEntry {
    /// Project login.
    pub creds: OpenstackCredentials,
    /// Server settings.
    pub vm: OpenstackVmOptions,
}
