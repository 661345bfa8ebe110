//! OpenStack adapter.
//!
//! A deployment uploads a qcow2 image, boots a server from it on a fixed
//! private address and attaches a pre-allocated floating IP once the server is
//! `ACTIVE`.

mod cli;

use std::fmt;
use std::time::Duration;

use camino::Utf8Path;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::backend::BackendFuture;
use crate::process::CommandError;
use crate::retry::{RetryError, RetryPolicy, retry_until};

pub use cli::OpenstackCli;

/// Polling budget for a server to become `ACTIVE`.
pub const SERVER_POLICY: RetryPolicy = RetryPolicy::new(60, Duration::from_secs(5));

/// Keystone endpoint and credentials.
#[derive(Clone, Deserialize, Eq, PartialEq)]
pub struct OpenstackCredentials {
    /// Identity endpoint.
    pub auth_url: String,
    /// Login user.
    pub username: String,
    /// Login password or API key.
    pub api_key: String,
    /// Project (tenant) name.
    pub tenant: String,
}

impl fmt::Debug for OpenstackCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenstackCredentials")
            .field("auth_url", &self.auth_url)
            .field("username", &self.username)
            .field("api_key", &"<redacted>")
            .field("tenant", &self.tenant)
            .finish()
    }
}

/// Per-VM settings.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct OpenstackVmOptions {
    /// Server name, also used for the uploaded image.
    pub name: String,
    /// Flavor to boot with.
    pub flavor_name: String,
    /// Network the server is attached to.
    pub network_name: String,
    /// Key pair injected into the server.
    pub key_name: String,
    /// Security groups applied to the server.
    #[serde(default)]
    pub security_group_names: Vec<String>,
    /// Floating IP attached after boot.
    pub public_ip: String,
    /// Fixed address on `network_name`.
    pub private_ip: String,
}

/// Boot parameters for one server.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ServerSpec {
    /// Server name.
    pub name: String,
    /// Image id to boot from.
    pub image_id: String,
    /// Flavor name.
    pub flavor: String,
    /// Network name.
    pub network: String,
    /// Fixed IPv4 address.
    pub fixed_ip: String,
    /// Key pair name.
    pub key_name: String,
    /// Security group names.
    pub security_groups: Vec<String>,
}

/// Id and name of a listed resource.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Resource {
    /// Resource id.
    pub id: String,
    /// Resource name.
    pub name: String,
}

/// Visibility of images this project owns outright.
pub const PRIVATE_VISIBILITY: &str = "private";

/// A listed image and who can see it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Image {
    /// Image id.
    pub id: String,
    /// Image name.
    pub name: String,
    /// Glance visibility: `private`, `shared`, `community` or `public`.
    pub visibility: String,
}

impl Image {
    /// Whether the image belongs to this project alone.
    #[must_use]
    pub fn is_private(&self) -> bool {
        self.visibility == PRIVATE_VISIBILITY
    }
}

/// Errors raised by the OpenStack adapter.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum OpenstackError {
    /// An `openstack` invocation failed.
    #[error(transparent)]
    Command(#[from] CommandError),
    /// Command output could not be interpreted.
    #[error("unexpected output from openstack {command}: {message}")]
    Parse {
        /// Subcommand whose output was rejected.
        command: String,
        /// Parse failure description.
        message: String,
    },
    /// The server entered `ERROR`.
    #[error("server {server} failed to boot")]
    ServerFailed {
        /// Server id.
        server: String,
    },
    /// The server never became `ACTIVE`.
    #[error("server {server} not active after {attempts} attempts")]
    ServerTimeout {
        /// Server id.
        server: String,
        /// Attempts made.
        attempts: u32,
    },
}

/// Compute, image and volume operations the adapter relies on.
pub trait OpenstackApi: Send + Sync {
    /// Uploads a qcow2 image and returns its id.
    fn create_image<'a>(
        &'a self,
        name: &'a str,
        path: &'a Utf8Path,
    ) -> BackendFuture<'a, String, OpenstackError>;

    /// Lists images visible to the project, including shared and public ones.
    fn images(&self) -> BackendFuture<'_, Vec<Image>, OpenstackError>;

    /// Deletes an image.
    fn delete_image<'a>(&'a self, id: &'a str) -> BackendFuture<'a, (), OpenstackError>;

    /// Boots a server and returns its id.
    fn create_server<'a>(&'a self, spec: &'a ServerSpec)
    -> BackendFuture<'a, String, OpenstackError>;

    /// Current server status, or `None` when unknown.
    fn server_status<'a>(&'a self, id: &'a str)
    -> BackendFuture<'a, Option<String>, OpenstackError>;

    /// Attaches a floating IP to a server.
    fn add_floating_ip<'a>(
        &'a self,
        server: &'a str,
        address: &'a str,
    ) -> BackendFuture<'a, (), OpenstackError>;

    /// Lists servers.
    fn servers(&self) -> BackendFuture<'_, Vec<Resource>, OpenstackError>;

    /// Deletes a server.
    fn delete_server<'a>(&'a self, id: &'a str) -> BackendFuture<'a, (), OpenstackError>;

    /// Lists volume ids.
    fn volumes(&self) -> BackendFuture<'_, Vec<String>, OpenstackError>;

    /// Deletes a volume.
    fn delete_volume<'a>(&'a self, id: &'a str) -> BackendFuture<'a, (), OpenstackError>;
}

/// Lifecycle operations for VMs in one OpenStack project.
pub trait OpenstackProvisioner: Send + Sync {
    /// Uploads the image at `path` and boots a server from it.
    fn deploy<'a>(
        &'a self,
        path: &'a Utf8Path,
        vm: &'a OpenstackVmOptions,
    ) -> BackendFuture<'a, (), OpenstackError>;

    /// Deletes the servers and images named after the VM.
    fn destroy<'a>(&'a self, vm: &'a OpenstackVmOptions)
    -> BackendFuture<'a, (), OpenstackError>;

    /// Deletes every server and volume in the project, plus its private
    /// images. Public and shared images are left alone.
    fn clean_environment(&self) -> BackendFuture<'_, (), OpenstackError>;

    /// Prepares the project for deployments. OpenStack needs no preparation.
    fn prepare_environment(&self) -> BackendFuture<'_, (), OpenstackError>;
}

/// OpenStack adapter over an [`OpenstackApi`].
#[derive(Debug)]
pub struct OpenstackManager<A> {
    api: A,
    server_wait: RetryPolicy,
}

impl<A: OpenstackApi> OpenstackManager<A> {
    /// Creates a manager with the default boot wait.
    #[must_use]
    pub const fn new(api: A) -> Self {
        Self {
            api,
            server_wait: SERVER_POLICY,
        }
    }

    /// Overrides the boot wait.
    #[must_use]
    pub fn with_server_wait(mut self, policy: RetryPolicy) -> Self {
        self.server_wait = policy;
        self
    }

    async fn boot(&self, path: &Utf8Path, vm: &OpenstackVmOptions) -> Result<(), OpenstackError> {
        info!(vm = %vm.name, image = %path, "uploading image");
        let image_id = self.api.create_image(&vm.name, path).await?;
        let spec = ServerSpec {
            name: vm.name.clone(),
            image_id,
            flavor: vm.flavor_name.clone(),
            network: vm.network_name.clone(),
            fixed_ip: vm.private_ip.clone(),
            key_name: vm.key_name.clone(),
            security_groups: vm.security_group_names.clone(),
        };
        let server = self.api.create_server(&spec).await?;

        let api = &self.api;
        let id = server.as_str();
        retry_until(self.server_wait, move || async move {
            match api.server_status(id).await?.as_deref() {
                Some("ACTIVE") => Ok(Some(())),
                Some("ERROR") => Err(OpenstackError::ServerFailed {
                    server: id.to_owned(),
                }),
                _ => Ok(None),
            }
        })
        .await
        .map_err(|err| match err {
            RetryError::Exhausted { attempts, .. } => OpenstackError::ServerTimeout {
                server: id.to_owned(),
                attempts,
            },
            RetryError::Attempt(inner) => inner,
        })?;

        self.api.add_floating_ip(id, &vm.public_ip).await?;
        info!(vm = %vm.name, server = id, ip = %vm.public_ip, "server is active");
        Ok(())
    }

    async fn remove(&self, vm: &OpenstackVmOptions) -> Result<(), OpenstackError> {
        for server in self.api.servers().await? {
            if server.name == vm.name {
                info!(server = %server.id, "deleting server");
                self.api.delete_server(&server.id).await?;
            }
        }
        for image in self.api.images().await? {
            if image.name == vm.name {
                info!(image = %image.id, "deleting image");
                self.api.delete_image(&image.id).await?;
            }
        }
        Ok(())
    }

    async fn clean(&self) -> Result<(), OpenstackError> {
        for server in self.api.servers().await? {
            debug!(server = %server.id, name = %server.name, "deleting server");
            self.api.delete_server(&server.id).await?;
        }
        for image in self.api.images().await? {
            if !image.is_private() {
                debug!(
                    image = %image.id,
                    visibility = %image.visibility,
                    "keeping image the project does not own"
                );
                continue;
            }
            debug!(image = %image.id, name = %image.name, "deleting image");
            self.api.delete_image(&image.id).await?;
        }
        for volume in self.api.volumes().await? {
            debug!(volume = %volume, "deleting volume");
            self.api.delete_volume(&volume).await?;
        }
        Ok(())
    }
}

impl<A: OpenstackApi> OpenstackProvisioner for OpenstackManager<A> {
    fn deploy<'a>(
        &'a self,
        path: &'a Utf8Path,
        vm: &'a OpenstackVmOptions,
    ) -> BackendFuture<'a, (), OpenstackError> {
        Box::pin(self.boot(path, vm))
    }

    fn destroy<'a>(
        &'a self,
        vm: &'a OpenstackVmOptions,
    ) -> BackendFuture<'a, (), OpenstackError> {
        Box::pin(self.remove(vm))
    }

    fn clean_environment(&self) -> BackendFuture<'_, (), OpenstackError> {
        Box::pin(self.clean())
    }

    fn prepare_environment(&self) -> BackendFuture<'_, (), OpenstackError> {
        Box::pin(async {
            debug!("OpenStack needs no environment preparation");
            Ok(())
        })
    }
}
