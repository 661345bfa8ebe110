//! vCloud Director adapter.
//!
//! Deploying a vApp is a fixed pipeline: refuse to deploy when the target
//! address already answers, unpack the OVF archive into a scratch directory,
//! upload it as a catalog template, instantiate it, push the guest network
//! properties onto the first VM and power the vApp on. The scratch directory
//! is owned by a [`tempfile::TempDir`] for the whole pipeline and therefore
//! removed however the pipeline ends.

pub mod api;
mod destroyer;
mod error;
pub mod rest;
mod vapp;

use std::fmt;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use shell_escape::unix::escape;
use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::backend::BackendFuture;
use crate::config::ToolConfig;
use crate::process::{CommandRunner, os_args};
use crate::retry::{RetryError, RetryPolicy, retry_until};

pub use api::{
    CatalogHandle, Instantiation, NetworkConfig, TEMPLATE_NETWORK, VappHandle, VcloudApiError,
    VcloudClient, VcloudConnector, VmHandle,
};
pub use destroyer::Destroyer;
pub use error::VcloudError;
pub use rest::RestConnector;
pub use vapp::{ADMIN_PASSWORD, ProductProperty, VappConfig};

/// Polling budget for the first VM of a freshly instantiated vApp.
pub const VM_READY_POLICY: RetryPolicy = RetryPolicy::new(10, Duration::from_secs(10));

/// Credentials for a vCloud Director organisation.
#[derive(Clone, Deserialize, Eq, PartialEq)]
pub struct VcloudLogin {
    /// Base URL of the vCloud Director endpoint.
    pub url: String,
    /// Organisation to log into.
    pub organization: String,
    /// User name within the organisation.
    pub user: String,
    /// Password for the user.
    pub password: String,
}

impl VcloudLogin {
    /// Login identity in the `user@organization` form vCloud expects.
    #[must_use]
    pub fn identity(&self) -> String {
        format!("{}@{}", self.user, self.organization)
    }
}

impl fmt::Debug for VcloudLogin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VcloudLogin")
            .field("url", &self.url)
            .field("organization", &self.organization)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Lifecycle operations for vApps in one organisation VDC.
pub trait VcloudProvisioner: Send + Sync {
    /// Deploys the OVF archive at `template` as a powered-on vApp.
    fn deploy<'a>(
        &'a self,
        template: &'a Utf8Path,
        vapp: &'a VappConfig,
    ) -> BackendFuture<'a, (), VcloudError>;

    /// Deletes the named vApps and the catalog they were deployed from.
    fn destroy<'a>(
        &'a self,
        vapp_names: &'a [String],
        catalog: &'a str,
    ) -> BackendFuture<'a, (), VcloudError>;

    /// Removes product vApps and their catalog, leaving the VDC reusable.
    fn clean_environment<'a>(
        &'a self,
        vapp_names: &'a [String],
        catalog: &'a str,
    ) -> BackendFuture<'a, (), VcloudError>;

    /// Prepares the VDC for deployments. vCloud needs no preparation.
    fn prepare_environment(&self) -> BackendFuture<'_, (), VcloudError>;
}

/// Host-side settings for the deployment pipeline.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PipelineSettings {
    /// Shell used to run the extraction command.
    pub shell_bin: String,
    /// `ping` executable used for the conflict check.
    pub ping_bin: String,
    /// Echo requests sent by the conflict check.
    pub ping_count: u32,
    /// Parent directory for scratch directories; the system default when
    /// unset.
    pub scratch_root: Option<Utf8PathBuf>,
    /// Polling budget for the first VM to appear.
    pub vm_ready: RetryPolicy,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            shell_bin: String::from("sh"),
            ping_bin: String::from("ping"),
            ping_count: 5,
            scratch_root: None,
            vm_ready: VM_READY_POLICY,
        }
    }
}

impl From<&ToolConfig> for PipelineSettings {
    fn from(config: &ToolConfig) -> Self {
        Self {
            shell_bin: config.shell_bin.clone(),
            ping_bin: config.ping_bin.clone(),
            ping_count: config.ping_count,
            scratch_root: config.scratch_root(),
            vm_ready: VM_READY_POLICY,
        }
    }
}

/// Renders the shell command that unpacks `archive` into `dir`.
#[must_use]
pub fn extraction_command(dir: &Utf8Path, archive: &Utf8Path) -> String {
    format!(
        "cd {} && tar xfv {}",
        escape(dir.as_str().into()),
        escape(archive.as_str().into())
    )
}

/// vCloud adapter bound to one login and VDC.
#[derive(Debug)]
pub struct VcloudManager<C, R> {
    login: VcloudLogin,
    vdc_name: String,
    connector: C,
    runner: R,
    settings: PipelineSettings,
}

impl<C, R> VcloudManager<C, R>
where
    C: VcloudConnector,
    R: CommandRunner,
{
    /// Creates a manager with default pipeline settings.
    #[must_use]
    pub fn new(login: VcloudLogin, vdc_name: impl Into<String>, connector: C, runner: R) -> Self {
        Self {
            login,
            vdc_name: vdc_name.into(),
            connector,
            runner,
            settings: PipelineSettings::default(),
        }
    }

    /// Replaces the pipeline settings.
    #[must_use]
    pub fn with_settings(mut self, settings: PipelineSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Runs the deployment pipeline for one vApp.
    ///
    /// # Errors
    ///
    /// Returns [`VcloudError::HostExists`] when the target address answers,
    /// [`VcloudError::Extraction`] when the archive cannot be unpacked,
    /// [`VcloudError::VmNotReady`] when the vApp never reports a VM, and
    /// [`VcloudError::Api`] for any backend failure.
    pub async fn deploy_vapp(
        &self,
        template: &Utf8Path,
        vapp: &VappConfig,
    ) -> Result<(), VcloudError> {
        let scratch = self.scratch_dir()?;
        let dir = Utf8Path::from_path(scratch.path()).ok_or_else(|| VcloudError::Workspace {
            message: format!("{} is not valid UTF-8", scratch.path().display()),
        })?;
        debug!(scratch = %dir, "created scratch directory");

        self.deploy_from(dir, template, vapp).await
    }

    async fn deploy_from(
        &self,
        scratch: &Utf8Path,
        template: &Utf8Path,
        vapp: &VappConfig,
    ) -> Result<(), VcloudError> {
        self.ensure_address_free(&vapp.ip)?;
        self.extract(template, scratch)?;

        let client = self.connector.connect(&self.login).await?;
        let catalog = client.create_catalog(&vapp.catalog).await?;

        info!(template = %vapp.name, catalog = %catalog.name, vdc = %self.vdc_name, "uploading vApp template");
        client
            .upload_template(&catalog, &self.vdc_name, &vapp.name, scratch)
            .await?;

        let request = Instantiation {
            catalog,
            template_name: vapp.name.clone(),
            vdc_name: self.vdc_name.clone(),
            vapp_name: vapp.name.clone(),
            storage_profile: None,
            compute_profile: None,
            network: NetworkConfig {
                network_name: vapp.network.clone(),
                logical_name: TEMPLATE_NETWORK.to_owned(),
            },
        };
        info!(vapp = %vapp.name, network = %vapp.network, "instantiating vApp");
        let instance = client.instantiate_template(&request).await?;

        let vm = self.wait_for_vm(client.as_ref(), &instance).await?;
        let properties = vapp.properties();
        client.set_product_properties(&vm, &properties).await?;

        info!(vapp = %instance.name, "powering on vApp");
        client.power_on(&instance).await?;
        Ok(())
    }

    fn scratch_dir(&self) -> Result<TempDir, VcloudError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("vmherd-vapp-");
        self.settings
            .scratch_root
            .as_ref()
            .map_or_else(|| builder.tempdir(), |root| builder.tempdir_in(root))
            .map_err(|err| VcloudError::Workspace {
                message: err.to_string(),
            })
    }

    fn ensure_address_free(&self, ip: &str) -> Result<(), VcloudError> {
        let args = os_args([
            String::from("-c"),
            self.settings.ping_count.to_string(),
            ip.to_owned(),
        ]);
        let output = self.runner.run(&self.settings.ping_bin, &args)?;
        if output.is_success() {
            return Err(VcloudError::HostExists { ip: ip.to_owned() });
        }
        debug!(ip, "no host answered; address is free");
        Ok(())
    }

    fn extract(&self, template: &Utf8Path, scratch: &Utf8Path) -> Result<(), VcloudError> {
        let absolute = std::path::absolute(template.as_std_path()).map_err(|err| {
            VcloudError::Workspace {
                message: format!("cannot resolve {template}: {err}"),
            }
        })?;
        let archive = Utf8PathBuf::try_from(absolute).map_err(|err| VcloudError::Workspace {
            message: err.to_string(),
        })?;

        let command = extraction_command(scratch, &archive);
        info!(archive = %archive, "extracting vApp template");
        let output = self
            .runner
            .run(&self.settings.shell_bin, &os_args(["-c", command.as_str()]))?;
        if output.is_success() {
            return Ok(());
        }

        warn!(command = %command, stderr = %output.stderr.trim(), "template extraction failed");
        Err(VcloudError::Extraction {
            command,
            stderr: output.stderr,
        })
    }

    async fn wait_for_vm(
        &self,
        client: &dyn VcloudClient,
        vapp: &VappHandle,
    ) -> Result<VmHandle, VcloudError> {
        retry_until(self.settings.vm_ready, move || async move {
            Ok::<_, VcloudApiError>(client.vapp_vms(vapp).await?.into_iter().next())
        })
        .await
        .map_err(|err| match err {
            RetryError::Exhausted { attempts, .. } => VcloudError::VmNotReady {
                vapp: vapp.name.clone(),
                attempts,
            },
            RetryError::Attempt(inner) => VcloudError::Api(inner),
        })
    }

    async fn teardown(&self, vapp_names: &[String], catalog: &str) -> Result<(), VcloudError> {
        let client = self.connector.connect(&self.login).await?;
        Destroyer::new(client.as_ref(), &self.vdc_name)
            .clean_catalog_and_vapps(catalog, vapp_names)
            .await?;
        Ok(())
    }
}

impl<C, R> VcloudProvisioner for VcloudManager<C, R>
where
    C: VcloudConnector,
    R: CommandRunner,
{
    fn deploy<'a>(
        &'a self,
        template: &'a Utf8Path,
        vapp: &'a VappConfig,
    ) -> BackendFuture<'a, (), VcloudError> {
        Box::pin(self.deploy_vapp(template, vapp))
    }

    fn destroy<'a>(
        &'a self,
        vapp_names: &'a [String],
        catalog: &'a str,
    ) -> BackendFuture<'a, (), VcloudError> {
        Box::pin(self.teardown(vapp_names, catalog))
    }

    fn clean_environment<'a>(
        &'a self,
        vapp_names: &'a [String],
        catalog: &'a str,
    ) -> BackendFuture<'a, (), VcloudError> {
        Box::pin(self.teardown(vapp_names, catalog))
    }

    fn prepare_environment(&self) -> BackendFuture<'_, (), VcloudError> {
        Box::pin(async {
            debug!(vdc = %self.vdc_name, "vCloud needs no environment preparation");
            Ok(())
        })
    }
}
