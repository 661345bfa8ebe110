//! Shared vocabulary for infrastructure backends.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by backend capability traits.
///
/// Capability traits are used as trait objects so that the dispatcher can
/// swap real vendor clients for recording doubles; boxing keeps them object
/// safe without an extra macro dependency.
pub type BackendFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Infrastructure families that a VM configuration entry can target.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub enum BackendKind {
    /// vCloud Director organisation VDC.
    Vcloud,
    /// vSphere cluster managed by vCenter.
    Vsphere,
    /// Amazon EC2 inside a CloudFormation-managed VPC.
    Aws,
    /// OpenStack project.
    Openstack,
}

impl BackendKind {
    /// Stable lowercase identifier used in logs and error messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Vcloud => "vcloud",
            Self::Vsphere => "vsphere",
            Self::Aws => "aws",
            Self::Openstack => "openstack",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
