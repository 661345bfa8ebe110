//! Verb dispatch across the configured deployments.
//!
//! [`Shepherd`] walks the resolved entries in order, asks a
//! [`ProvisionerFactory`] for a fresh adapter per entry and invokes the verb
//! with that backend's arguments. The first failure stops the walk; entries
//! already handled stay as they are.
//!
//! AWS entries share the document-level `env_config`, so the environment
//! verbs run once per distinct AWS environment rather than once per entry.

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::aws::{AwsEnvironment, AwsError, AwsProvisioner};
use crate::openstack::{OpenstackCredentials, OpenstackError, OpenstackProvisioner};
use crate::settings::{ShepherdSettings, VmConfig};
use crate::vcloud::{VcloudError, VcloudLogin, VcloudProvisioner};
use crate::vsphere::{VcenterCredentials, VsphereError, VsphereProvisioner};

/// Builds one adapter per configuration entry.
pub trait ProvisionerFactory {
    /// vCloud adapter bound to an organisation VDC.
    fn vcloud<'a>(
        &'a self,
        login: &VcloudLogin,
        vdc_name: &str,
    ) -> Box<dyn VcloudProvisioner + 'a>;

    /// vSphere adapter bound to a datacenter.
    fn vsphere<'a>(
        &'a self,
        credentials: &VcenterCredentials,
        datacenter: &str,
    ) -> Box<dyn VsphereProvisioner + 'a>;

    /// AWS adapter bound to an environment.
    fn aws<'a>(&'a self, env: &AwsEnvironment) -> Box<dyn AwsProvisioner + 'a>;

    /// OpenStack adapter bound to a project.
    fn openstack<'a>(
        &'a self,
        credentials: &OpenstackCredentials,
    ) -> Box<dyn OpenstackProvisioner + 'a>;
}

/// Errors raised while dispatching a verb.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum ShepherdError {
    /// `deploy` received a different number of artifacts than entries.
    #[error("expected {expected} artifact paths, one per vm_configs entry, got {actual}")]
    ArityMismatch {
        /// Number of configuration entries.
        expected: usize,
        /// Number of paths supplied.
        actual: usize,
    },
    /// A vSphere entry has no `cleanup` section.
    #[error("vm_configs[{index}]: clean_environment needs a cleanup section")]
    MissingCleanup {
        /// Position of the entry.
        index: usize,
    },
    /// vCloud adapter failure.
    #[error(transparent)]
    Vcloud(#[from] VcloudError),
    /// vSphere adapter failure.
    #[error(transparent)]
    Vsphere(#[from] VsphereError),
    /// AWS adapter failure.
    #[error(transparent)]
    Aws(#[from] AwsError),
    /// OpenStack adapter failure.
    #[error(transparent)]
    Openstack(#[from] OpenstackError),
}

/// Records `env` as handled and reports whether this is its first use.
fn first_use<'s>(seen: &mut Vec<&'s AwsEnvironment>, env: &'s AwsEnvironment) -> bool {
    if seen.contains(&env) {
        debug!(stack = %env.stack_name, region = %env.region, "AWS environment already handled");
        return false;
    }
    seen.push(env);
    true
}

/// Routes lifecycle verbs to per-entry adapters.
#[derive(Debug)]
pub struct Shepherd<F> {
    settings: ShepherdSettings,
    factory: F,
}

impl<F: ProvisionerFactory> Shepherd<F> {
    /// Creates a dispatcher over resolved settings.
    #[must_use]
    pub const fn new(settings: ShepherdSettings, factory: F) -> Self {
        Self { settings, factory }
    }

    /// Deploys `paths[i]` with entry `i`.
    ///
    /// # Errors
    ///
    /// Returns [`ShepherdError::ArityMismatch`] before touching any backend
    /// when the path count differs from the entry count, otherwise the first
    /// adapter error.
    pub async fn deploy(&self, paths: &[Utf8PathBuf]) -> Result<(), ShepherdError> {
        let configs = self.settings.configs();
        if paths.len() != configs.len() {
            return Err(ShepherdError::ArityMismatch {
                expected: configs.len(),
                actual: paths.len(),
            });
        }
        for (index, (config, path)) in configs.iter().zip(paths).enumerate() {
            info!(index, backend = %config.kind(), artifact = %path, "deploying");
            self.deploy_one(config, path).await?;
        }
        Ok(())
    }

    async fn deploy_one(&self, config: &VmConfig, path: &Utf8Path) -> Result<(), ShepherdError> {
        match config {
            VmConfig::Vcloud(entry) => {
                let vapp = entry.vapp_config();
                self.factory
                    .vcloud(&entry.creds, &entry.vdc.name)
                    .deploy(path, &vapp)
                    .await?;
            }
            VmConfig::Vsphere(entry) => {
                self.factory
                    .vsphere(&entry.vcenter_creds, &entry.vsphere.datacenter)
                    .deploy(path, &entry.vm, &entry.vsphere.placement)
                    .await?;
            }
            VmConfig::Aws(entry) => {
                self.factory.aws(&entry.env).deploy(path, &entry.vm).await?;
            }
            VmConfig::Openstack(entry) => {
                self.factory
                    .openstack(&entry.creds)
                    .deploy(path, &entry.vm)
                    .await?;
            }
        }
        Ok(())
    }

    /// Destroys every configured VM.
    ///
    /// # Errors
    ///
    /// Returns the first adapter error.
    pub async fn destroy(&self) -> Result<(), ShepherdError> {
        for (index, config) in self.settings.configs().iter().enumerate() {
            info!(index, backend = %config.kind(), "destroying");
            match config {
                VmConfig::Vcloud(entry) => {
                    let names = [entry.vapp.ops_manager_name.clone()];
                    self.factory
                        .vcloud(&entry.creds, &entry.vdc.name)
                        .destroy(&names, &entry.vdc.catalog)
                        .await?;
                }
                VmConfig::Vsphere(entry) => {
                    self.factory
                        .vsphere(&entry.vcenter_creds, &entry.vsphere.datacenter)
                        .destroy(&entry.vm.ip, &entry.vsphere.placement.resource_pool)
                        .await?;
                }
                VmConfig::Aws(entry) => {
                    self.factory.aws(&entry.env).destroy(&entry.vm).await?;
                }
                VmConfig::Openstack(entry) => {
                    self.factory.openstack(&entry.creds).destroy(&entry.vm).await?;
                }
            }
        }
        Ok(())
    }

    /// Wipes every configured environment, each AWS environment once.
    ///
    /// # Errors
    ///
    /// Returns [`ShepherdError::MissingCleanup`] before touching any backend
    /// when a vSphere entry lacks a `cleanup` section, otherwise the first
    /// adapter error.
    pub async fn clean_environment(&self) -> Result<(), ShepherdError> {
        let configs = self.settings.configs();
        if let Some(index) = configs
            .iter()
            .position(|config| matches!(config, VmConfig::Vsphere(entry) if entry.cleanup.is_none()))
        {
            return Err(ShepherdError::MissingCleanup { index });
        }

        let mut aws_seen = Vec::new();
        for (index, config) in configs.iter().enumerate() {
            info!(index, backend = %config.kind(), "cleaning environment");
            match config {
                VmConfig::Vcloud(entry) => {
                    self.factory
                        .vcloud(&entry.creds, &entry.vdc.name)
                        .clean_environment(&entry.vapp.product_names, entry.product_catalog())
                        .await?;
                }
                VmConfig::Vsphere(entry) => {
                    let cleanup = entry
                        .cleanup
                        .as_ref()
                        .ok_or(ShepherdError::MissingCleanup { index })?;
                    self.factory
                        .vsphere(&entry.vcenter_creds, &cleanup.datacenter)
                        .clean_environment(&cleanup.scope)
                        .await?;
                }
                VmConfig::Aws(entry) => {
                    if first_use(&mut aws_seen, &entry.env) {
                        self.factory.aws(&entry.env).clean_environment().await?;
                    }
                }
                VmConfig::Openstack(entry) => {
                    self.factory
                        .openstack(&entry.creds)
                        .clean_environment()
                        .await?;
                }
            }
        }
        Ok(())
    }

    /// Prepares every configured environment, each AWS environment once.
    ///
    /// # Errors
    ///
    /// Returns the first adapter error.
    pub async fn prepare_environment(&self) -> Result<(), ShepherdError> {
        let mut aws_seen = Vec::new();
        for (index, config) in self.settings.configs().iter().enumerate() {
            info!(index, backend = %config.kind(), "preparing environment");
            match config {
                VmConfig::Vcloud(entry) => {
                    self.factory
                        .vcloud(&entry.creds, &entry.vdc.name)
                        .prepare_environment()
                        .await?;
                }
                VmConfig::Vsphere(entry) => {
                    self.factory
                        .vsphere(&entry.vcenter_creds, &entry.vsphere.datacenter)
                        .prepare_environment()
                        .await?;
                }
                VmConfig::Aws(entry) => {
                    if first_use(&mut aws_seen, &entry.env) {
                        let template = Utf8Path::new(&entry.env.json_file);
                        self.factory
                            .aws(&entry.env)
                            .prepare_environment(template)
                            .await?;
                    }
                }
                VmConfig::Openstack(entry) => {
                    self.factory
                        .openstack(&entry.creds)
                        .prepare_environment()
                        .await?;
                }
            }
        }
        Ok(())
    }
}
