//! In-memory vCloud Director double for pipeline tests.
//!
//! The connector hands out clients sharing one [`State`], so a test can
//! script the director's behaviour up front and inspect what the pipeline
//! asked for afterwards.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use camino::{Utf8Path, Utf8PathBuf};
use vmherd::backend::BackendFuture;
use vmherd::vcloud::{
    CatalogHandle, Instantiation, ProductProperty, VappHandle, VcloudApiError, VcloudClient,
    VcloudConnector, VcloudLogin, VmHandle,
};

#[derive(Debug, Default)]
pub struct State {
    pub logins: Vec<String>,
    pub calls: Vec<String>,
    pub catalogs: Vec<String>,
    pub vapps: Vec<String>,
    /// `vapp_vms` polls answered with an empty list before the VM appears;
    /// `None` keeps the vApp empty forever.
    pub empty_polls: Option<u32>,
    pub polls: u32,
    pub upload_dir: Option<Utf8PathBuf>,
    pub upload_dir_existed: bool,
    pub instantiation: Option<Instantiation>,
    pub properties: Vec<ProductProperty>,
    pub fail_upload: bool,
    pub vanish_on_delete: bool,
}

#[derive(Clone, Debug, Default)]
pub struct FakeDirector {
    state: Arc<Mutex<State>>,
}

impl FakeDirector {
    pub fn new() -> Self {
        let director = Self::default();
        director.state().empty_polls = Some(0);
        director
    }

    pub fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }
}

struct FakeClient {
    state: Arc<Mutex<State>>,
}

impl FakeClient {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, call: String) {
        self.state().calls.push(call);
    }
}

fn handle(name: &str) -> VappHandle {
    VappHandle {
        name: name.to_owned(),
        href: format!("https://vcd.test/api/vApp/{name}"),
    }
}

impl VcloudConnector for FakeDirector {
    fn connect<'a>(
        &'a self,
        login: &'a VcloudLogin,
    ) -> BackendFuture<'a, Box<dyn VcloudClient + 'a>, VcloudApiError> {
        self.state().logins.push(login.identity());
        let client: Box<dyn VcloudClient + 'a> = Box::new(FakeClient {
            state: Arc::clone(&self.state),
        });
        Box::pin(async move { Ok(client) })
    }
}

impl VcloudClient for FakeClient {
    fn create_catalog<'a>(
        &'a self,
        name: &'a str,
    ) -> BackendFuture<'a, CatalogHandle, VcloudApiError> {
        self.record(format!("create_catalog {name}"));
        self.state().catalogs.push(name.to_owned());
        Box::pin(async move {
            Ok(CatalogHandle {
                name: name.to_owned(),
                href: format!("https://vcd.test/api/catalog/{name}"),
            })
        })
    }

    fn catalog_exists<'a>(&'a self, name: &'a str) -> BackendFuture<'a, bool, VcloudApiError> {
        self.record(format!("catalog_exists {name}"));
        let exists = self.state().catalogs.iter().any(|catalog| catalog == name);
        Box::pin(async move { Ok(exists) })
    }

    fn delete_catalog<'a>(&'a self, name: &'a str) -> BackendFuture<'a, (), VcloudApiError> {
        self.record(format!("delete_catalog {name}"));
        self.state().catalogs.retain(|catalog| catalog != name);
        Box::pin(async { Ok(()) })
    }

    fn upload_template<'a>(
        &'a self,
        catalog: &'a CatalogHandle,
        vdc_name: &'a str,
        template_name: &'a str,
        source_dir: &'a Utf8Path,
    ) -> BackendFuture<'a, (), VcloudApiError> {
        self.record(format!(
            "upload_template {} {vdc_name} {template_name}",
            catalog.name
        ));
        let fail = {
            let mut state = self.state();
            state.upload_dir = Some(source_dir.to_owned());
            state.upload_dir_existed = source_dir.is_dir();
            state.fail_upload
        };
        Box::pin(async move {
            if fail {
                return Err(VcloudApiError::TaskFailed {
                    href: String::from("https://vcd.test/api/task/upload"),
                    status: String::from("error"),
                });
            }
            Ok(())
        })
    }

    fn instantiate_template<'a>(
        &'a self,
        request: &'a Instantiation,
    ) -> BackendFuture<'a, VappHandle, VcloudApiError> {
        self.record(format!("instantiate_template {}", request.vapp_name));
        self.state().instantiation = Some(request.clone());
        Box::pin(async move { Ok(handle(&request.vapp_name)) })
    }

    fn vapp_vms<'a>(
        &'a self,
        vapp: &'a VappHandle,
    ) -> BackendFuture<'a, Vec<VmHandle>, VcloudApiError> {
        self.record(format!("vapp_vms {}", vapp.name));
        let ready = {
            let mut state = self.state();
            state.polls += 1;
            let polls = state.polls;
            state.empty_polls.is_some_and(|empty| polls > empty)
        };
        let vms = if ready {
            vec![VmHandle {
                name: format!("{}-vm", vapp.name),
                href: format!("https://vcd.test/api/vApp/vm-{}", vapp.name),
            }]
        } else {
            Vec::new()
        };
        Box::pin(async move { Ok(vms) })
    }

    fn set_product_properties<'a>(
        &'a self,
        vm: &'a VmHandle,
        properties: &'a [ProductProperty],
    ) -> BackendFuture<'a, (), VcloudApiError> {
        self.record(format!("set_product_properties {}", vm.name));
        self.state().properties = properties.to_vec();
        Box::pin(async { Ok(()) })
    }

    fn power_on<'a>(&'a self, vapp: &'a VappHandle) -> BackendFuture<'a, (), VcloudApiError> {
        self.record(format!("power_on {}", vapp.name));
        Box::pin(async { Ok(()) })
    }

    fn find_vapp<'a>(
        &'a self,
        vdc_name: &'a str,
        name: &'a str,
    ) -> BackendFuture<'a, Option<VappHandle>, VcloudApiError> {
        self.record(format!("find_vapp {vdc_name} {name}"));
        let found = self
            .state()
            .vapps
            .iter()
            .any(|vapp| vapp == name)
            .then(|| handle(name));
        Box::pin(async move { Ok(found) })
    }

    fn delete_vapp<'a>(&'a self, vapp: &'a VappHandle) -> BackendFuture<'a, (), VcloudApiError> {
        self.record(format!("delete_vapp {}", vapp.name));
        let vanished = {
            let mut state = self.state();
            state.vapps.retain(|name| name != &vapp.name);
            state.vanish_on_delete
        };
        Box::pin(async move {
            if vanished {
                return Err(VcloudApiError::NotFound {
                    kind: String::from("vApp"),
                    name: vapp.name.clone(),
                });
            }
            Ok(())
        })
    }
}
