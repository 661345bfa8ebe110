//! Production [`ProvisionerFactory`] wiring adapters to real vendor clients.

use crate::aws::{AwsCli, AwsEnvironment, AwsManager, AwsProvisioner};
use crate::config::ToolConfig;
use crate::openstack::{OpenstackCli, OpenstackCredentials, OpenstackManager, OpenstackProvisioner};
use crate::process::ProcessCommandRunner;
use crate::shepherd::ProvisionerFactory;
use crate::vcloud::{
    PipelineSettings, RestConnector, VcloudApiError, VcloudLogin, VcloudManager, VcloudProvisioner,
};
use crate::vsphere::{GovcClient, GovcSession, VcenterCredentials, VsphereManager, VsphereProvisioner};

/// Builds adapters backed by the vCloud REST API and the `govc`, `aws` and
/// `openstack` command-line tools.
#[derive(Clone, Debug)]
pub struct LiveProvisioners {
    config: ToolConfig,
    connector: RestConnector,
    runner: ProcessCommandRunner,
}

impl LiveProvisioners {
    /// Creates the factory from host tooling settings.
    ///
    /// # Errors
    ///
    /// Returns [`VcloudApiError::Transport`] when the HTTP client cannot be
    /// built.
    pub fn new(config: ToolConfig) -> Result<Self, VcloudApiError> {
        let connector = RestConnector::new(config.insecure_tls)?;
        Ok(Self {
            config,
            connector,
            runner: ProcessCommandRunner,
        })
    }
}

impl ProvisionerFactory for LiveProvisioners {
    fn vcloud<'a>(
        &'a self,
        login: &VcloudLogin,
        vdc_name: &str,
    ) -> Box<dyn VcloudProvisioner + 'a> {
        Box::new(
            VcloudManager::new(login.clone(), vdc_name, self.connector.clone(), self.runner)
                .with_settings(PipelineSettings::from(&self.config)),
        )
    }

    fn vsphere<'a>(
        &'a self,
        credentials: &VcenterCredentials,
        datacenter: &str,
    ) -> Box<dyn VsphereProvisioner + 'a> {
        let session = GovcSession {
            bin: self.config.govc_bin.clone(),
            credentials: credentials.clone(),
            datacenter: datacenter.to_owned(),
            insecure: self.config.insecure_tls,
        };
        Box::new(VsphereManager::new(GovcClient::new(self.runner, session)))
    }

    fn aws<'a>(&'a self, env: &AwsEnvironment) -> Box<dyn AwsProvisioner + 'a> {
        let api = AwsCli::new(self.runner, self.config.aws_bin.clone(), env);
        Box::new(AwsManager::new(env.clone(), api))
    }

    fn openstack<'a>(
        &'a self,
        credentials: &OpenstackCredentials,
    ) -> Box<dyn OpenstackProvisioner + 'a> {
        let api = OpenstackCli::new(
            self.runner,
            self.config.openstack_bin.clone(),
            credentials.clone(),
        );
        Box::new(OpenstackManager::new(api))
    }
}
