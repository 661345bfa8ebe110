//! Recording adapters for dispatcher tests.
//!
//! Every adapter call is appended to a shared log as
//! `<backend>[<binding>] <verb> <arguments>`. A call whose log line equals
//! the configured failure line returns an error instead of succeeding.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use camino::Utf8Path;
use vmherd::aws::{AwsEnvironment, AwsError, AwsProvisioner, AwsVmConfig};
use vmherd::backend::BackendFuture;
use vmherd::openstack::{
    OpenstackCredentials, OpenstackError, OpenstackProvisioner, OpenstackVmOptions,
};
use vmherd::shepherd::ProvisionerFactory;
use vmherd::vcloud::{VappConfig, VcloudError, VcloudLogin, VcloudProvisioner};
use vmherd::vsphere::{
    CleanupScope, Placement, VcenterCredentials, VmSettings, VsphereError, VsphereProvisioner,
};

#[derive(Clone, Debug, Default)]
pub struct RecordingFactory {
    log: Arc<Mutex<Vec<String>>>,
    builds: Arc<AtomicUsize>,
    fail_on: Option<String>,
}

impl RecordingFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(line: &str) -> Self {
        Self {
            fail_on: Some(line.to_owned()),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    fn recorder(&self, binding: String) -> Recorder {
        self.builds.fetch_add(1, Ordering::SeqCst);
        Recorder {
            log: Arc::clone(&self.log),
            binding,
            fail_on: self.fail_on.clone(),
        }
    }
}

#[derive(Clone, Debug)]
struct Recorder {
    log: Arc<Mutex<Vec<String>>>,
    binding: String,
    fail_on: Option<String>,
}

impl Recorder {
    /// Logs the call and reports whether it should fail.
    fn record(&self, call: &str) -> bool {
        let line = format!("{} {call}", self.binding);
        let fail = self.fail_on.as_deref() == Some(line.as_str());
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line);
        fail
    }
}

impl ProvisionerFactory for RecordingFactory {
    fn vcloud<'a>(&'a self, login: &VcloudLogin, vdc_name: &str) -> Box<dyn VcloudProvisioner + 'a> {
        Box::new(self.recorder(format!("vcloud[{}/{vdc_name}]", login.identity())))
    }

    fn vsphere<'a>(
        &'a self,
        credentials: &VcenterCredentials,
        datacenter: &str,
    ) -> Box<dyn VsphereProvisioner + 'a> {
        Box::new(self.recorder(format!("vsphere[{}/{datacenter}]", credentials.ip)))
    }

    fn aws<'a>(&'a self, env: &AwsEnvironment) -> Box<dyn AwsProvisioner + 'a> {
        Box::new(self.recorder(format!("aws[{}/{}]", env.stack_name, env.region)))
    }

    fn openstack<'a>(
        &'a self,
        credentials: &OpenstackCredentials,
    ) -> Box<dyn OpenstackProvisioner + 'a> {
        Box::new(self.recorder(format!("openstack[{}]", credentials.auth_url)))
    }
}

fn vcloud_result(fail: bool) -> Result<(), VcloudError> {
    if fail {
        Err(VcloudError::HostExists {
            ip: String::from("scripted"),
        })
    } else {
        Ok(())
    }
}

fn vsphere_result(fail: bool) -> Result<(), VsphereError> {
    if fail {
        Err(VsphereError::Workspace {
            message: String::from("scripted"),
        })
    } else {
        Ok(())
    }
}

fn aws_result(fail: bool) -> Result<(), AwsError> {
    if fail {
        Err(AwsError::MissingOutput {
            key: String::from("scripted"),
        })
    } else {
        Ok(())
    }
}

fn openstack_result(fail: bool) -> Result<(), OpenstackError> {
    if fail {
        Err(OpenstackError::ServerFailed {
            server: String::from("scripted"),
        })
    } else {
        Ok(())
    }
}

impl VcloudProvisioner for Recorder {
    fn deploy<'a>(
        &'a self,
        template: &'a Utf8Path,
        vapp: &'a VappConfig,
    ) -> BackendFuture<'a, (), VcloudError> {
        let fail = self.record(&format!(
            "deploy {template} {} {} {} {}",
            vapp.name, vapp.ip, vapp.catalog, vapp.network
        ));
        Box::pin(async move { vcloud_result(fail) })
    }

    fn destroy<'a>(
        &'a self,
        vapp_names: &'a [String],
        catalog: &'a str,
    ) -> BackendFuture<'a, (), VcloudError> {
        let fail = self.record(&format!("destroy {vapp_names:?} {catalog}"));
        Box::pin(async move { vcloud_result(fail) })
    }

    fn clean_environment<'a>(
        &'a self,
        vapp_names: &'a [String],
        catalog: &'a str,
    ) -> BackendFuture<'a, (), VcloudError> {
        let fail = self.record(&format!("clean {vapp_names:?} {catalog}"));
        Box::pin(async move { vcloud_result(fail) })
    }

    fn prepare_environment(&self) -> BackendFuture<'_, (), VcloudError> {
        let fail = self.record("prepare");
        Box::pin(async move { vcloud_result(fail) })
    }
}

impl VsphereProvisioner for Recorder {
    fn deploy<'a>(
        &'a self,
        ova: &'a Utf8Path,
        vm: &'a VmSettings,
        placement: &'a Placement,
    ) -> BackendFuture<'a, (), VsphereError> {
        let fail = self.record(&format!(
            "deploy {ova} {} {}/{}",
            vm.ip, placement.cluster, placement.resource_pool
        ));
        Box::pin(async move { vsphere_result(fail) })
    }

    fn destroy<'a>(
        &'a self,
        ip: &'a str,
        resource_pool: &'a str,
    ) -> BackendFuture<'a, (), VsphereError> {
        let fail = self.record(&format!("destroy {ip} {resource_pool}"));
        Box::pin(async move { vsphere_result(fail) })
    }

    fn clean_environment<'a>(
        &'a self,
        scope: &'a CleanupScope,
    ) -> BackendFuture<'a, (), VsphereError> {
        let fail = self.record(&format!(
            "clean {:?} {:?}",
            scope.datacenter_folders_to_clean, scope.datastores
        ));
        Box::pin(async move { vsphere_result(fail) })
    }

    fn prepare_environment(&self) -> BackendFuture<'_, (), VsphereError> {
        let fail = self.record("prepare");
        Box::pin(async move { vsphere_result(fail) })
    }
}

impl AwsProvisioner for Recorder {
    fn deploy<'a>(
        &'a self,
        ami_file: &'a Utf8Path,
        vm: &'a AwsVmConfig,
    ) -> BackendFuture<'a, (), AwsError> {
        let fail = self.record(&format!("deploy {ami_file} {} {}", vm.vm_name, vm.key_name));
        Box::pin(async move { aws_result(fail) })
    }

    fn destroy<'a>(&'a self, vm: &'a AwsVmConfig) -> BackendFuture<'a, (), AwsError> {
        let fail = self.record(&format!("destroy {}", vm.vm_name));
        Box::pin(async move { aws_result(fail) })
    }

    fn clean_environment(&self) -> BackendFuture<'_, (), AwsError> {
        let fail = self.record("clean");
        Box::pin(async move { aws_result(fail) })
    }

    fn prepare_environment<'a>(
        &'a self,
        template: &'a Utf8Path,
    ) -> BackendFuture<'a, (), AwsError> {
        let fail = self.record(&format!("prepare {template}"));
        Box::pin(async move { aws_result(fail) })
    }
}

impl OpenstackProvisioner for Recorder {
    fn deploy<'a>(
        &'a self,
        path: &'a Utf8Path,
        vm: &'a OpenstackVmOptions,
    ) -> BackendFuture<'a, (), OpenstackError> {
        let fail = self.record(&format!("deploy {path} {} {}", vm.name, vm.private_ip));
        Box::pin(async move { openstack_result(fail) })
    }

    fn destroy<'a>(
        &'a self,
        vm: &'a OpenstackVmOptions,
    ) -> BackendFuture<'a, (), OpenstackError> {
        let fail = self.record(&format!("destroy {}", vm.name));
        Box::pin(async move { openstack_result(fail) })
    }

    fn clean_environment(&self) -> BackendFuture<'_, (), OpenstackError> {
        let fail = self.record("clean");
        Box::pin(async move { openstack_result(fail) })
    }

    fn prepare_environment(&self) -> BackendFuture<'_, (), OpenstackError> {
        let fail = self.record("prepare");
        Box::pin(async move { openstack_result(fail) })
    }
}
