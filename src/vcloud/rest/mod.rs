//! vCloud Director REST client (API version 5.5).
//!
//! Sessions are opened with `user@organization` basic authentication and
//! carried by the `x-vcloud-authorization` token. Every long-running request
//! answers with a `<Task>` that is polled to completion before returning.

mod xml;

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use reqwest::header::{ACCEPT, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Client, Method, StatusCode};
use tracing::{debug, info};

use crate::backend::BackendFuture;
use crate::retry::{RetryError, RetryPolicy, retry_until};

use super::VcloudLogin;
use super::api::{
    CatalogHandle, Instantiation, VappHandle, VcloudApiError, VcloudClient, VcloudConnector,
    VmHandle,
};
use super::vapp::ProductProperty;
use xml::{XmlBody, XmlDoc};

const ACCEPT_VALUE: &str = "application/*+xml;version=5.5";
const AUTH_HEADER: &str = "x-vcloud-authorization";
const VCLOUD_NS: &str = "http://www.vmware.com/vcloud/v1.5";
const OVF_NS: &str = "http://schemas.dmtf.org/ovf/envelope/1";
const DESCRIPTOR_FILE: &str = "descriptor.ovf";
const HTTP_TIMEOUT: Duration = Duration::from_secs(300);
const TASK_POLICY: RetryPolicy = RetryPolicy::new(360, Duration::from_secs(5));
const UPLOAD_POLICY: RetryPolicy = RetryPolicy::new(120, Duration::from_secs(5));
const DESCRIPTOR_SEARCH_DEPTH: usize = 3;

mod media {
    pub(super) const ORG_LIST: &str = "application/vnd.vmware.vcloud.orgList+xml";
    pub(super) const VDC: &str = "application/vnd.vmware.vcloud.vdc+xml";
    pub(super) const CATALOG: &str = "application/vnd.vmware.vcloud.catalog+xml";
    pub(super) const ADMIN_CATALOG: &str = "application/vnd.vmware.admin.catalog+xml";
    pub(super) const CATALOG_ITEM: &str = "application/vnd.vmware.vcloud.catalogItem+xml";
    pub(super) const VAPP: &str = "application/vnd.vmware.vcloud.vApp+xml";
    pub(super) const UPLOAD_PARAMS: &str =
        "application/vnd.vmware.vcloud.uploadVAppTemplateParams+xml";
    pub(super) const INSTANTIATE_PARAMS: &str =
        "application/vnd.vmware.vcloud.instantiateVAppTemplateParams+xml";
    pub(super) const PRODUCT_SECTIONS: &str = "application/vnd.vmware.vcloud.productSections+xml";
    pub(super) const UNDEPLOY_PARAMS: &str = "application/vnd.vmware.vcloud.undeployVAppParams+xml";
}

/// Opens REST sessions against vCloud Director.
#[derive(Clone, Debug)]
pub struct RestConnector {
    http: Client,
}

impl RestConnector {
    /// Builds a connector; `insecure_tls` disables certificate verification
    /// for lab installations with self-signed certificates.
    ///
    /// # Errors
    ///
    /// Returns [`VcloudApiError::Transport`] when the HTTP client cannot be
    /// constructed.
    pub fn new(insecure_tls: bool) -> Result<Self, VcloudApiError> {
        let http = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .danger_accept_invalid_certs(insecure_tls)
            .build()
            .map_err(|err| VcloudApiError::Transport {
                href: String::from("<client>"),
                message: err.to_string(),
            })?;
        Ok(Self { http })
    }
}

impl VcloudConnector for RestConnector {
    fn connect<'a>(
        &'a self,
        login: &'a VcloudLogin,
    ) -> BackendFuture<'a, Box<dyn VcloudClient + 'a>, VcloudApiError> {
        Box::pin(async move {
            let session = Session::open(self.http.clone(), login).await?;
            Ok(Box::new(session) as Box<dyn VcloudClient + 'a>)
        })
    }
}

/// Authenticated transport shared by all session calls.
struct Api {
    http: Client,
    token: String,
}

fn transport_error(href: &str) -> impl FnOnce(reqwest::Error) -> VcloudApiError + '_ {
    move |err| VcloudApiError::Transport {
        href: href.to_owned(),
        message: err.to_string(),
    }
}

fn parse_doc(href: &str, body: &str) -> Result<XmlDoc, VcloudApiError> {
    XmlDoc::parse(body).map_err(|message| VcloudApiError::Parse {
        href: href.to_owned(),
        message,
    })
}

fn missing(href: &str, what: &str) -> VcloudApiError {
    VcloudApiError::Parse {
        href: href.to_owned(),
        message: format!("response has no {what}"),
    }
}

fn not_found(kind: &str, name: &str) -> VcloudApiError {
    VcloudApiError::NotFound {
        kind: kind.to_owned(),
        name: name.to_owned(),
    }
}

fn timed_out(err: RetryError<VcloudApiError>, operation: &str, href: &str) -> VcloudApiError {
    match err {
        RetryError::Exhausted { .. } => VcloudApiError::Timeout {
            operation: operation.to_owned(),
            href: href.to_owned(),
        },
        RetryError::Attempt(inner) => inner,
    }
}

fn root_href(doc: &XmlDoc, href: &str) -> Result<String, VcloudApiError> {
    doc.root()
        .and_then(|node| node.attr("href"))
        .map(str::to_owned)
        .ok_or_else(|| missing(href, "href"))
}

/// Writes `<root attrs>children</root>` as a request body.
fn encode(
    root: &str,
    attrs: &[(&str, &str)],
    children: impl FnOnce(&mut XmlBody) -> std::io::Result<()>,
) -> Result<String, VcloudApiError> {
    let mut body = XmlBody::new();
    body.open(root, attrs)
        .and_then(|()| children(&mut body))
        .and_then(|()| body.close(root))
        .and_then(|()| body.finish())
        .map_err(|err| VcloudApiError::Encode {
            document: root.to_owned(),
            message: err.to_string(),
        })
}

/// Body of a create request that only carries a name and description.
fn named_params(root: &str, name: &str) -> Result<String, VcloudApiError> {
    encode(root, &[("xmlns", VCLOUD_NS), ("name", name)], |body| {
        body.text("Description", name)
    })
}

/// Rewrites a user-facing reference into its `/api/admin/` counterpart.
fn admin_href(href: &str) -> String {
    href.replacen("/api/", "/api/admin/", 1)
}

impl Api {
    async fn send(
        &self,
        method: Method,
        href: &str,
        body: Option<(&str, String)>,
    ) -> Result<String, VcloudApiError> {
        debug!(%method, href, "vCloud request");
        let mut request = self
            .http
            .request(method.clone(), href)
            .header(ACCEPT, ACCEPT_VALUE)
            .header(AUTH_HEADER, &self.token);
        if let Some((content_type, payload)) = body {
            request = request.header(CONTENT_TYPE, content_type).body(payload);
        }

        let response = request.send().await.map_err(transport_error(href))?;
        let status = response.status();
        let text = response.text().await.map_err(transport_error(href))?;
        if status.is_success() {
            return Ok(text);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(not_found("resource", href));
        }

        let message = XmlDoc::parse(&text)
            .ok()
            .and_then(|doc| doc.error_message().map(str::to_owned))
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_owned());
        Err(VcloudApiError::Http {
            method: method.to_string(),
            href: href.to_owned(),
            status: status.as_u16(),
            message,
        })
    }

    async fn get(&self, href: &str) -> Result<XmlDoc, VcloudApiError> {
        let body = self.send(Method::GET, href, None).await?;
        parse_doc(href, &body)
    }

    /// Sends a request and waits for every task the response spawned.
    async fn send_and_wait(
        &self,
        method: Method,
        href: &str,
        body: Option<(&str, String)>,
    ) -> Result<XmlDoc, VcloudApiError> {
        let text = self.send(method, href, body).await?;
        if text.trim().is_empty() {
            return Ok(XmlDoc::default());
        }
        let doc = parse_doc(href, &text)?;
        self.wait_for_tasks(&doc).await?;
        Ok(doc)
    }

    async fn wait_for_tasks(&self, doc: &XmlDoc) -> Result<(), VcloudApiError> {
        let pending: Vec<String> = doc
            .elements("Task")
            .filter(|task| task.attr("status") != Some("success"))
            .filter_map(|task| task.attr("href"))
            .map(str::to_owned)
            .collect();
        for href in &pending {
            self.wait_for_task(href).await?;
        }
        Ok(())
    }

    async fn wait_for_task(&self, href: &str) -> Result<(), VcloudApiError> {
        retry_until(TASK_POLICY, move || async move {
            let task = self.get(href).await?;
            match task.root().and_then(|node| node.attr("status")) {
                Some("success") => Ok(Some(())),
                Some(status @ ("error" | "aborted" | "canceled")) => {
                    Err(VcloudApiError::TaskFailed {
                        href: href.to_owned(),
                        status: status.to_owned(),
                    })
                }
                _ => Ok(None),
            }
        })
        .await
        .map_err(|err| timed_out(err, "task", href))
    }

    async fn upload_file(&self, href: &str, path: &Utf8Path) -> Result<(), VcloudApiError> {
        let io_error = |err: std::io::Error| VcloudApiError::Io {
            path: path.to_string(),
            message: err.to_string(),
        };
        let file = tokio::fs::File::open(path).await.map_err(io_error)?;
        let length = file.metadata().await.map_err(io_error)?.len();

        info!(file = %path, bytes = length, "uploading template file");
        let response = self
            .http
            .put(href)
            .header(AUTH_HEADER, &self.token)
            .header(CONTENT_LENGTH, length)
            .body(file)
            .send()
            .await
            .map_err(transport_error(href))?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        Err(VcloudApiError::Http {
            method: Method::PUT.to_string(),
            href: href.to_owned(),
            status: status.as_u16(),
            message: String::from("file transfer rejected"),
        })
    }
}

/// An authenticated session scoped to one organisation.
struct Session {
    api: Api,
    org_href: String,
}

impl Session {
    async fn open(http: Client, login: &VcloudLogin) -> Result<Self, VcloudApiError> {
        let base = login.url.trim_end_matches('/');
        let url = format!("{base}/api/sessions");
        let auth_error = |message: String| VcloudApiError::Auth {
            url: base.to_owned(),
            message,
        };

        let response = http
            .post(&url)
            .basic_auth(login.identity(), Some(&login.password))
            .header(ACCEPT, ACCEPT_VALUE)
            .send()
            .await
            .map_err(transport_error(&url))?;
        if !response.status().is_success() {
            return Err(auth_error(response.status().to_string()));
        }
        let token = response
            .headers()
            .get(AUTH_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned)
            .ok_or_else(|| auth_error(String::from("no session token in response")))?;
        let body = response.text().await.map_err(transport_error(&url))?;
        let session_doc = parse_doc(&url, &body)?;
        let org_list = session_doc
            .links_of_type(media::ORG_LIST)
            .find_map(|link| link.attr("href"))
            .ok_or_else(|| missing(&url, "organisation list link"))?;

        let api = Api { http, token };
        let orgs = api.get(org_list).await?;
        let org_href = orgs
            .find_by_attr("Org", "name", &login.organization)
            .and_then(|org| org.attr("href"))
            .map(str::to_owned)
            .ok_or_else(|| not_found("organization", &login.organization))?;

        info!(identity = %login.identity(), "opened vCloud session");
        Ok(Self { api, org_href })
    }

    async fn linked_href(&self, media_type: &str, name: &str) -> Result<Option<String>, VcloudApiError> {
        let org = self.api.get(&self.org_href).await?;
        Ok(org
            .links_of_type(media_type)
            .find(|link| link.attr("name") == Some(name))
            .and_then(|link| link.attr("href"))
            .map(str::to_owned))
    }

    async fn vdc_href(&self, vdc_name: &str) -> Result<String, VcloudApiError> {
        self.linked_href(media::VDC, vdc_name)
            .await?
            .ok_or_else(|| not_found("vdc", vdc_name))
    }

    async fn catalog_href(&self, name: &str) -> Result<Option<String>, VcloudApiError> {
        self.linked_href(media::CATALOG, name).await
    }

    async fn ensure_catalog(&self, name: &str) -> Result<CatalogHandle, VcloudApiError> {
        if let Some(href) = self.catalog_href(name).await? {
            debug!(catalog = name, "reusing existing catalog");
            return Ok(CatalogHandle {
                name: name.to_owned(),
                href,
            });
        }

        info!(catalog = name, "creating catalog");
        let href = format!("{}/catalogs", admin_href(&self.org_href));
        let body = named_params("AdminCatalog", name)?;
        let created = self
            .api
            .send_and_wait(Method::POST, &href, Some((media::ADMIN_CATALOG, body)))
            .await?;
        let admin = root_href(&created, &href)?;
        Ok(CatalogHandle {
            name: name.to_owned(),
            href: admin.replacen("/api/admin/", "/api/", 1),
        })
    }

    async fn remove_catalog(&self, name: &str) -> Result<(), VcloudApiError> {
        let Some(href) = self.catalog_href(name).await? else {
            return Ok(());
        };
        let catalog = self.api.get(&href).await?;
        let items: Vec<String> = catalog
            .elements("CatalogItem")
            .filter_map(|item| item.attr("href"))
            .map(str::to_owned)
            .collect();
        for item in &items {
            debug!(item, "deleting catalog item");
            self.api.send_and_wait(Method::DELETE, item, None).await?;
        }
        self.api
            .send_and_wait(Method::DELETE, &admin_href(&href), None)
            .await?;
        Ok(())
    }

    async fn upload(
        &self,
        catalog: &CatalogHandle,
        vdc_name: &str,
        template_name: &str,
        source_dir: &Utf8Path,
    ) -> Result<(), VcloudApiError> {
        let descriptor = find_descriptor(source_dir, DESCRIPTOR_SEARCH_DEPTH)
            .map_err(|err| VcloudApiError::Io {
                path: source_dir.to_string(),
                message: err.to_string(),
            })?
            .ok_or_else(|| VcloudApiError::Io {
                path: source_dir.to_string(),
                message: String::from("no .ovf descriptor found"),
            })?;
        let file_root = descriptor.parent().unwrap_or(source_dir).to_owned();

        let vdc = self.vdc_href(vdc_name).await?;
        let action = format!("{vdc}/action/uploadVAppTemplate");
        let params = named_params("UploadVAppTemplateParams", template_name)?;
        let body = self
            .api
            .send(Method::POST, &action, Some((media::UPLOAD_PARAMS, params)))
            .await?;
        let template = parse_doc(&action, &body)?;
        let template_href = root_href(&template, &action)?;

        let descriptor_link = upload_targets(&template)
            .into_iter()
            .find(|(name, _)| name == DESCRIPTOR_FILE)
            .map(|(_, link)| link)
            .ok_or_else(|| missing(&template_href, "descriptor upload link"))?;
        self.api.upload_file(&descriptor_link, &descriptor).await?;

        for (name, link) in self.files_to_upload(&template_href).await? {
            self.api.upload_file(&link, &file_root.join(&name)).await?;
        }

        self.wait_for_template(&template_href).await?;

        let item = catalog_item(template_name, &template_href)?;
        self.api
            .send_and_wait(
                Method::POST,
                &format!("{}/catalogItems", catalog.href),
                Some((media::CATALOG_ITEM, item)),
            )
            .await?;
        Ok(())
    }

    /// Waits for the descriptor to be processed, then lists the remaining
    /// files vCloud expects.
    async fn files_to_upload(&self, template_href: &str) -> Result<Vec<(String, String)>, VcloudApiError> {
        let api = &self.api;
        retry_until(UPLOAD_POLICY, move || async move {
            let template = api.get(template_href).await?;
            let processed = template
                .root()
                .and_then(|node| node.attr("ovfDescriptorUploaded"))
                == Some("true");
            if !processed {
                return Ok::<_, VcloudApiError>(None);
            }
            Ok(Some(
                upload_targets(&template)
                    .into_iter()
                    .filter(|(name, _)| name != DESCRIPTOR_FILE)
                    .collect(),
            ))
        })
        .await
        .map_err(|err| timed_out(err, "descriptor processing", template_href))
    }

    async fn wait_for_template(&self, template_href: &str) -> Result<(), VcloudApiError> {
        let api = &self.api;
        retry_until(TASK_POLICY, move || async move {
            let template = api.get(template_href).await?;
            match template.root().and_then(|node| node.attr("status")) {
                Some("8") => Ok(Some(())),
                Some("-1") => Err(VcloudApiError::TaskFailed {
                    href: template_href.to_owned(),
                    status: String::from("failed to resolve"),
                }),
                _ => Ok(None),
            }
        })
        .await
        .map_err(|err| timed_out(err, "template upload", template_href))
    }

    async fn instantiate(&self, request: &Instantiation) -> Result<VappHandle, VcloudApiError> {
        if request.storage_profile.is_some() || request.compute_profile.is_some() {
            return Err(VcloudApiError::Unsupported {
                feature: String::from("storage or compute profile overrides"),
            });
        }

        let catalog = self.api.get(&request.catalog.href).await?;
        let item_href = catalog
            .find_by_attr("CatalogItem", "name", &request.template_name)
            .and_then(|item| item.attr("href"))
            .map(str::to_owned)
            .ok_or_else(|| not_found("catalog item", &request.template_name))?;
        let item = self.api.get(&item_href).await?;
        let template_href = item
            .elements("Entity")
            .find_map(|entity| entity.attr("href"))
            .map(str::to_owned)
            .ok_or_else(|| missing(&item_href, "entity reference"))?;

        let vdc_href = self.vdc_href(&request.vdc_name).await?;
        let vdc = self.api.get(&vdc_href).await?;
        let network_href = vdc
            .find_by_attr("Network", "name", &request.network.network_name)
            .and_then(|network| network.attr("href"))
            .map(str::to_owned)
            .ok_or_else(|| not_found("network", &request.network.network_name))?;

        let action = format!("{vdc_href}/action/instantiateVAppTemplate");
        let body = instantiate_params(request, &network_href, &template_href)?;
        let vapp = self
            .api
            .send_and_wait(Method::POST, &action, Some((media::INSTANTIATE_PARAMS, body)))
            .await?;
        Ok(VappHandle {
            name: request.vapp_name.clone(),
            href: root_href(&vapp, &action)?,
        })
    }

    async fn vms(&self, vapp: &VappHandle) -> Result<Vec<VmHandle>, VcloudApiError> {
        let doc = self.api.get(&vapp.href).await?;
        Ok(doc
            .elements("Vm")
            .filter_map(|vm| {
                Some(VmHandle {
                    name: vm.attr("name")?.to_owned(),
                    href: vm.attr("href")?.to_owned(),
                })
            })
            .collect())
    }

    async fn lookup_vapp(&self, vdc_name: &str, name: &str) -> Result<Option<VappHandle>, VcloudApiError> {
        let vdc_href = self.vdc_href(vdc_name).await?;
        let vdc = self.api.get(&vdc_href).await?;
        Ok(vdc
            .elements("ResourceEntity")
            .filter(|entity| entity.attr("type") == Some(media::VAPP))
            .find(|entity| entity.attr("name") == Some(name))
            .and_then(|entity| entity.attr("href"))
            .map(|href| VappHandle {
                name: name.to_owned(),
                href: href.to_owned(),
            }))
    }

    async fn remove_vapp(&self, vapp: &VappHandle) -> Result<(), VcloudApiError> {
        let doc = self.api.get(&vapp.href).await?;
        let deployed = doc.root().and_then(|node| node.attr("deployed")) == Some("true");
        if deployed {
            debug!(vapp = %vapp.name, "powering off and undeploying vApp");
            let body = encode("UndeployVAppParams", &[("xmlns", VCLOUD_NS)], |body| {
                body.text("UndeployPowerAction", "powerOff")
            })?;
            self.api
                .send_and_wait(
                    Method::POST,
                    &format!("{}/action/undeploy", vapp.href),
                    Some((media::UNDEPLOY_PARAMS, body)),
                )
                .await?;
        }
        self.api
            .send_and_wait(Method::DELETE, &vapp.href, None)
            .await?;
        Ok(())
    }
}

/// `(file name, upload link)` pairs listed in a vApp template document.
fn upload_targets(template: &XmlDoc) -> Vec<(String, String)> {
    template
        .elements("File")
        .filter_map(|file| {
            let name = file.attr("name")?;
            let link = template
                .children_of(file)
                .find(|child| child.name == "Link" && child.attr("rel") == Some("upload:default"))?
                .attr("href")?;
            Some((name.to_owned(), link.to_owned()))
        })
        .collect()
}

fn find_descriptor(dir: &Utf8Path, depth: usize) -> std::io::Result<Option<Utf8PathBuf>> {
    let mut subdirs = Vec::new();
    for item in dir.read_dir_utf8()? {
        let entry = item?;
        if entry.file_type()?.is_dir() {
            subdirs.push(entry.path().to_owned());
        } else if entry.path().extension() == Some("ovf") {
            return Ok(Some(entry.path().to_owned()));
        }
    }
    if depth == 0 {
        return Ok(None);
    }
    for subdir in subdirs {
        if let Some(found) = find_descriptor(&subdir, depth - 1)? {
            return Ok(Some(found));
        }
    }
    Ok(None)
}

fn catalog_item(name: &str, entity_href: &str) -> Result<String, VcloudApiError> {
    encode("CatalogItem", &[("xmlns", VCLOUD_NS), ("name", name)], |body| {
        body.text("Description", name)?;
        body.empty("Entity", &[("href", entity_href)])
    })
}

fn instantiate_params(
    request: &Instantiation,
    network_href: &str,
    template_href: &str,
) -> Result<String, VcloudApiError> {
    let name = request.vapp_name.as_str();
    let attrs = [
        ("xmlns", VCLOUD_NS),
        ("xmlns:ovf", OVF_NS),
        ("name", name),
        ("deploy", "false"),
        ("powerOn", "false"),
    ];
    encode("InstantiateVAppTemplateParams", &attrs, |body| {
        body.text("Description", name)?;
        body.open("InstantiationParams", &[])?;
        body.open("NetworkConfigSection", &[])?;
        body.text("ovf:Info", "Configuration parameters for logical networks")?;
        body.open(
            "NetworkConfig",
            &[("networkName", request.network.logical_name.as_str())],
        )?;
        body.open("Configuration", &[])?;
        body.empty("ParentNetwork", &[("href", network_href)])?;
        body.text("FenceMode", "bridged")?;
        body.close("Configuration")?;
        body.close("NetworkConfig")?;
        body.close("NetworkConfigSection")?;
        body.close("InstantiationParams")?;
        body.empty("Source", &[("href", template_href)])?;
        body.text("AllEULAsAccepted", "true")
    })
}

const fn flag(value: bool) -> &'static str {
    if value { "true" } else { "false" }
}

fn product_sections(properties: &[ProductProperty]) -> Result<String, VcloudApiError> {
    let attrs = [("xmlns", VCLOUD_NS), ("xmlns:ovf", OVF_NS)];
    encode("ProductSectionList", &attrs, |body| {
        body.open("ovf:ProductSection", &[("required", "true")])?;
        body.text("ovf:Info", "Information about the installed software")?;
        for property in properties {
            body.open(
                "ovf:Property",
                &[
                    ("ovf:type", property.kind),
                    ("ovf:key", property.key),
                    ("ovf:value", property.value.as_str()),
                    ("ovf:password", flag(property.password)),
                    ("ovf:userConfigurable", flag(property.user_configurable)),
                ],
            )?;
            body.text("ovf:Label", property.label)?;
            body.text("ovf:Description", property.description)?;
            body.close("ovf:Property")?;
        }
        body.close("ovf:ProductSection")
    })
}

impl VcloudClient for Session {
    fn create_catalog<'a>(
        &'a self,
        name: &'a str,
    ) -> BackendFuture<'a, CatalogHandle, VcloudApiError> {
        Box::pin(self.ensure_catalog(name))
    }

    fn catalog_exists<'a>(&'a self, name: &'a str) -> BackendFuture<'a, bool, VcloudApiError> {
        Box::pin(async move { Ok(self.catalog_href(name).await?.is_some()) })
    }

    fn delete_catalog<'a>(&'a self, name: &'a str) -> BackendFuture<'a, (), VcloudApiError> {
        Box::pin(self.remove_catalog(name))
    }

    fn upload_template<'a>(
        &'a self,
        catalog: &'a CatalogHandle,
        vdc_name: &'a str,
        template_name: &'a str,
        source_dir: &'a Utf8Path,
    ) -> BackendFuture<'a, (), VcloudApiError> {
        Box::pin(self.upload(catalog, vdc_name, template_name, source_dir))
    }

    fn instantiate_template<'a>(
        &'a self,
        request: &'a Instantiation,
    ) -> BackendFuture<'a, VappHandle, VcloudApiError> {
        Box::pin(self.instantiate(request))
    }

    fn vapp_vms<'a>(
        &'a self,
        vapp: &'a VappHandle,
    ) -> BackendFuture<'a, Vec<VmHandle>, VcloudApiError> {
        Box::pin(self.vms(vapp))
    }

    fn set_product_properties<'a>(
        &'a self,
        vm: &'a VmHandle,
        properties: &'a [ProductProperty],
    ) -> BackendFuture<'a, (), VcloudApiError> {
        Box::pin(async move {
            let body = product_sections(properties)?;
            self.api
                .send_and_wait(
                    Method::PUT,
                    &format!("{}/productSections", vm.href),
                    Some((media::PRODUCT_SECTIONS, body)),
                )
                .await?;
            Ok(())
        })
    }

    fn power_on<'a>(&'a self, vapp: &'a VappHandle) -> BackendFuture<'a, (), VcloudApiError> {
        Box::pin(async move {
            self.api
                .send_and_wait(Method::POST, &format!("{}/power/action/powerOn", vapp.href), None)
                .await?;
            Ok(())
        })
    }

    fn find_vapp<'a>(
        &'a self,
        vdc_name: &'a str,
        name: &'a str,
    ) -> BackendFuture<'a, Option<VappHandle>, VcloudApiError> {
        Box::pin(self.lookup_vapp(vdc_name, name))
    }

    fn delete_vapp<'a>(&'a self, vapp: &'a VappHandle) -> BackendFuture<'a, (), VcloudApiError> {
        Box::pin(self.remove_vapp(vapp))
    }
}
