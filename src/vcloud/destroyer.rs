//! Teardown of vApps and their template catalog.

use tracing::{debug, info};

use super::api::{VcloudApiError, VcloudClient};

/// Removes vApps and the catalog they were deployed from, scoped to one VDC.
///
/// Every step tolerates objects that are already gone, so running a teardown
/// twice is harmless.
pub struct Destroyer<'a> {
    client: &'a dyn VcloudClient,
    vdc_name: &'a str,
}

impl<'a> Destroyer<'a> {
    /// Creates a destroyer bound to an authenticated client and VDC.
    #[must_use]
    pub const fn new(client: &'a dyn VcloudClient, vdc_name: &'a str) -> Self {
        Self { client, vdc_name }
    }

    /// Deletes each named vApp that exists, then the catalog if present.
    ///
    /// # Errors
    ///
    /// Returns the first [`VcloudApiError`] other than a missing object.
    pub async fn clean_catalog_and_vapps(
        &self,
        catalog: &str,
        vapp_names: &[String],
    ) -> Result<(), VcloudApiError> {
        for name in vapp_names {
            self.delete_vapp(name).await?;
        }
        self.delete_catalog(catalog).await
    }

    async fn delete_vapp(&self, name: &str) -> Result<(), VcloudApiError> {
        let Some(vapp) = self.client.find_vapp(self.vdc_name, name).await? else {
            debug!(vapp = name, vdc = self.vdc_name, "vApp not found; skipping");
            return Ok(());
        };

        info!(vapp = name, vdc = self.vdc_name, "deleting vApp");
        match self.client.delete_vapp(&vapp).await {
            Err(VcloudApiError::NotFound { .. }) => {
                debug!(vapp = name, "vApp disappeared during deletion");
                Ok(())
            }
            other => other,
        }
    }

    async fn delete_catalog(&self, catalog: &str) -> Result<(), VcloudApiError> {
        if !self.client.catalog_exists(catalog).await? {
            debug!(catalog, "catalog not found; skipping");
            return Ok(());
        }
        info!(catalog, "deleting catalog");
        self.client.delete_catalog(catalog).await
    }
}
