//! Capability traits over vCloud Director.
//!
//! [`VcloudManager`](super::VcloudManager) and
//! [`Destroyer`](super::Destroyer) only talk to these traits; the REST client
//! in [`super::rest`] is the production implementation.

use camino::Utf8Path;
use thiserror::Error;

use crate::backend::BackendFuture;

use super::{ProductProperty, VcloudLogin};

/// Catalog reference returned by [`VcloudClient::create_catalog`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CatalogHandle {
    /// Catalog name.
    pub name: String,
    /// API reference for the catalog.
    pub href: String,
}

/// vApp reference.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VappHandle {
    /// vApp name.
    pub name: String,
    /// API reference for the vApp.
    pub href: String,
}

/// VM reference inside a vApp.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VmHandle {
    /// VM name.
    pub name: String,
    /// API reference for the VM.
    pub href: String,
}

/// Bridges a vApp's logical network onto an organisation VDC network.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NetworkConfig {
    /// Organisation VDC network to bridge onto.
    pub network_name: String,
    /// Logical network name declared inside the template.
    pub logical_name: String,
}

/// Logical network name used by the appliance templates.
pub const TEMPLATE_NETWORK: &str = "Network 1";

/// Parameters for instantiating a vApp from a catalog template.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Instantiation {
    /// Catalog holding the template.
    pub catalog: CatalogHandle,
    /// Template (catalog item) name.
    pub template_name: String,
    /// VDC the vApp is created in.
    pub vdc_name: String,
    /// Name of the new vApp.
    pub vapp_name: String,
    /// Storage profile override; `None` keeps the VDC default.
    pub storage_profile: Option<String>,
    /// Compute policy override; `None` keeps the VDC default.
    pub compute_profile: Option<String>,
    /// Network mapping applied to the template's logical network.
    pub network: NetworkConfig,
}

/// Errors reported by a vCloud Director implementation.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum VcloudApiError {
    /// Login was refused or the session response was unusable.
    #[error("vCloud login to {url} failed: {message}")]
    Auth {
        /// Endpoint that refused the login.
        url: String,
        /// Reason reported by the endpoint.
        message: String,
    },
    /// The endpoint answered with a non-success status.
    #[error("{method} {href} returned {status}: {message}")]
    Http {
        /// HTTP method used.
        method: String,
        /// Resource reference.
        href: String,
        /// HTTP status code.
        status: u16,
        /// Error message extracted from the response body.
        message: String,
    },
    /// The request never produced a response.
    #[error("request to {href} failed: {message}")]
    Transport {
        /// Resource reference.
        href: String,
        /// Transport error description.
        message: String,
    },
    /// A named object could not be located.
    #[error("{kind} '{name}' not found")]
    NotFound {
        /// Object kind such as `catalog` or `vdc`.
        kind: String,
        /// Name that was looked up.
        name: String,
    },
    /// A response body could not be interpreted.
    #[error("unexpected response from {href}: {message}")]
    Parse {
        /// Resource reference.
        href: String,
        /// Parse failure description.
        message: String,
    },
    /// A background task finished unsuccessfully.
    #[error("task {href} ended with status {status}")]
    TaskFailed {
        /// Task reference.
        href: String,
        /// Terminal task status.
        status: String,
    },
    /// A background task or upload did not finish within the polling budget.
    #[error("timed out waiting for {operation} at {href}")]
    Timeout {
        /// Operation being waited on.
        operation: String,
        /// Resource reference.
        href: String,
    },
    /// The request uses a feature the client does not implement.
    #[error("unsupported request: {feature}")]
    Unsupported {
        /// Unsupported feature description.
        feature: String,
    },
    /// A request body could not be serialised.
    #[error("failed to encode {document}: {message}")]
    Encode {
        /// Root element of the request body.
        document: String,
        /// Writer error description.
        message: String,
    },
    /// A local file needed for an upload could not be read.
    #[error("failed to read {path}: {message}")]
    Io {
        /// Local path.
        path: String,
        /// Operating system error.
        message: String,
    },
}

/// Opens authenticated sessions against a vCloud Director endpoint.
pub trait VcloudConnector: Send + Sync {
    /// Logs in as `user@organization` and returns a session-scoped client.
    fn connect<'a>(
        &'a self,
        login: &'a VcloudLogin,
    ) -> BackendFuture<'a, Box<dyn VcloudClient + 'a>, VcloudApiError>;
}

/// Operations available on an authenticated vCloud Director session.
pub trait VcloudClient: Send + Sync {
    /// Returns the named catalog, creating it when it does not exist.
    fn create_catalog<'a>(&'a self, name: &'a str)
    -> BackendFuture<'a, CatalogHandle, VcloudApiError>;

    /// Reports whether a catalog with this name exists.
    fn catalog_exists<'a>(&'a self, name: &'a str) -> BackendFuture<'a, bool, VcloudApiError>;

    /// Deletes every item in the named catalog and then the catalog itself.
    fn delete_catalog<'a>(&'a self, name: &'a str) -> BackendFuture<'a, (), VcloudApiError>;

    /// Uploads the OVF found under `source_dir` as template `template_name`
    /// into `catalog`, staging it in `vdc_name`.
    fn upload_template<'a>(
        &'a self,
        catalog: &'a CatalogHandle,
        vdc_name: &'a str,
        template_name: &'a str,
        source_dir: &'a Utf8Path,
    ) -> BackendFuture<'a, (), VcloudApiError>;

    /// Creates a powered-off vApp from a catalog template.
    fn instantiate_template<'a>(
        &'a self,
        request: &'a Instantiation,
    ) -> BackendFuture<'a, VappHandle, VcloudApiError>;

    /// Lists the VMs currently attached to a vApp.
    fn vapp_vms<'a>(&'a self, vapp: &'a VappHandle)
    -> BackendFuture<'a, Vec<VmHandle>, VcloudApiError>;

    /// Replaces the OVF product-section properties of a VM.
    fn set_product_properties<'a>(
        &'a self,
        vm: &'a VmHandle,
        properties: &'a [ProductProperty],
    ) -> BackendFuture<'a, (), VcloudApiError>;

    /// Powers on every VM in a vApp.
    fn power_on<'a>(&'a self, vapp: &'a VappHandle) -> BackendFuture<'a, (), VcloudApiError>;

    /// Looks up a vApp by name inside a VDC.
    fn find_vapp<'a>(
        &'a self,
        vdc_name: &'a str,
        name: &'a str,
    ) -> BackendFuture<'a, Option<VappHandle>, VcloudApiError>;

    /// Powers off and undeploys a vApp when needed, then deletes it.
    fn delete_vapp<'a>(&'a self, vapp: &'a VappHandle) -> BackendFuture<'a, (), VcloudApiError>;
}
