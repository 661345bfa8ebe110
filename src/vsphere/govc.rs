//! [`VsphereApi`] implementation driving the `govc` CLI.
//!
//! Connection details travel in `GOVC_*` environment variables so the vCenter
//! password never shows up in a process listing.

use std::ffi::OsString;
use std::io::Write;

use serde_json::json;
use tracing::debug;

use crate::backend::BackendFuture;
use crate::process::{CommandError, CommandOutput, CommandRunner, os_args};
use crate::vcloud::TEMPLATE_NETWORK;

use super::{OvaImport, VcenterCredentials, VsphereApi, VsphereError};

/// How long each `govc vm.ip` query blocks before reporting no address.
const GUEST_IP_PROBE: &str = "10s";

/// Connection settings for `govc`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GovcSession {
    /// Path to the `govc` executable.
    pub bin: String,
    /// vCenter endpoint and credentials.
    pub credentials: VcenterCredentials,
    /// Datacenter every inventory path is resolved against.
    pub datacenter: String,
    /// Skip TLS certificate verification.
    pub insecure: bool,
}

/// `govc`-backed vSphere client.
#[derive(Clone, Debug)]
pub struct GovcClient<R> {
    runner: R,
    session: GovcSession,
}

fn is_missing(err: &VsphereError) -> bool {
    matches!(
        err,
        VsphereError::Command(CommandError::Failed { stderr, .. }) if stderr.contains("not found")
    )
}

fn is_deadline_exceeded(err: &VsphereError) -> bool {
    matches!(
        err,
        VsphereError::Command(CommandError::Failed { stderr, .. })
            if stderr.contains("context deadline exceeded")
    )
}

impl<R: CommandRunner> GovcClient<R> {
    /// Creates a client that runs `govc` through `runner`.
    #[must_use]
    pub const fn new(runner: R, session: GovcSession) -> Self {
        Self { runner, session }
    }

    fn env(&self) -> Vec<(String, String)> {
        let creds = &self.session.credentials;
        vec![
            (String::from("GOVC_URL"), format!("https://{}/sdk", creds.ip)),
            (String::from("GOVC_USERNAME"), creds.username.clone()),
            (String::from("GOVC_PASSWORD"), creds.password.clone()),
            (
                String::from("GOVC_INSECURE"),
                String::from(if self.session.insecure { "1" } else { "0" }),
            ),
            (String::from("GOVC_DATACENTER"), self.session.datacenter.clone()),
        ]
    }

    fn govc(&self, args: &[OsString]) -> Result<CommandOutput, VsphereError> {
        let output = self
            .runner
            .run_with_env(&self.session.bin, args, &self.env())?
            .into_success(&self.session.bin)?;
        Ok(output)
    }

    fn vm_folder(&self, folder: &str) -> String {
        format!("/{}/vm/{}", self.session.datacenter, folder.trim_matches('/'))
    }

    fn lines(output: &CommandOutput) -> Vec<String> {
        output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_owned)
            .collect()
    }

    fn import(&self, request: &OvaImport) -> Result<(), VsphereError> {
        let placement = &request.placement;
        let options = json!({
            "DiskProvisioning": "thin",
            "IPAllocationPolicy": "fixedPolicy",
            "IPProtocol": "IPv4",
            "PropertyMapping": request
                .properties
                .iter()
                .map(|(key, value)| json!({ "Key": key, "Value": value }))
                .collect::<Vec<_>>(),
            "NetworkMapping": [{ "Name": TEMPLATE_NETWORK, "Network": placement.network }],
            "PowerOn": false,
            "InjectOvfEnv": false,
            "WaitForIP": false,
            "Name": request.name,
        });

        let workspace_error = |message: String| VsphereError::Workspace { message };
        let mut options_file =
            tempfile::NamedTempFile::new().map_err(|err| workspace_error(err.to_string()))?;
        serde_json::to_writer(&mut options_file, &options)
            .map_err(|err| workspace_error(err.to_string()))?;
        options_file
            .flush()
            .map_err(|err| workspace_error(err.to_string()))?;

        let pool = format!(
            "/{}/host/{}/Resources/{}",
            self.session.datacenter, placement.cluster, placement.resource_pool
        );
        let mut args = os_args([
            String::from("import.ova"),
            String::from("-ds"),
            placement.datastore.clone(),
            String::from("-pool"),
            pool,
            String::from("-folder"),
            self.vm_folder(&placement.folder),
            String::from("-name"),
            request.name.clone(),
            String::from("-options"),
        ]);
        args.push(options_file.path().as_os_str().to_owned());
        args.push(OsString::from(request.ova_path.as_str()));
        self.govc(&args)?;
        Ok(())
    }

    /// Asks for the guest address. Only an elapsed query wait means "not
    /// yet"; every other failure is returned.
    fn query_guest_ip(&self, vm: &str) -> Result<Option<String>, VsphereError> {
        let args = os_args([
            String::from("vm.ip"),
            format!("-wait={GUEST_IP_PROBE}"),
            vm.to_owned(),
        ]);
        match self.govc(&args) {
            Ok(output) => Ok(Self::lines(&output).into_iter().next()),
            Err(err) if is_deadline_exceeded(&err) => {
                debug!(vm, "guest IP not available yet");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    fn vms_by_ip(&self, resource_pool: &str, ip: &str) -> Result<Vec<String>, VsphereError> {
        let host_root = format!("/{}/host", self.session.datacenter);
        let pools = Self::lines(&self.govc(&os_args([
            "find",
            host_root.as_str(),
            "-type",
            "p",
            "-name",
            resource_pool,
        ]))?);

        let mut vms = Vec::new();
        for pool in &pools {
            let found = self.govc(&os_args([
                "find",
                pool.as_str(),
                "-type",
                "m",
                "-guest.ipAddress",
                ip,
            ]))?;
            vms.extend(Self::lines(&found));
        }
        Ok(vms)
    }

    fn wipe_folder(&self, folder: &str) -> Result<(), VsphereError> {
        let path = self.vm_folder(folder);
        let listing = match self.govc(&os_args(["find", path.as_str(), "-type", "m"])) {
            Ok(output) => output,
            Err(err) if is_missing(&err) => {
                debug!(folder = %path, "folder not found; skipping");
                return Ok(());
            }
            Err(err) => return Err(err),
        };
        for vm in Self::lines(&listing) {
            debug!(vm = %vm, "destroying VM in folder");
            self.govc(&os_args(["vm.destroy", vm.as_str()]))?;
        }
        self.govc(&os_args(["object.destroy", path.as_str()]))?;
        Ok(())
    }
}

impl<R: CommandRunner> VsphereApi for GovcClient<R> {
    fn import_ova<'a>(&'a self, request: &'a OvaImport) -> BackendFuture<'a, (), VsphereError> {
        Box::pin(async move { self.import(request) })
    }

    fn reconfigure<'a>(
        &'a self,
        vm: &'a str,
        cpus: u32,
        ram_mb: u32,
    ) -> BackendFuture<'a, (), VsphereError> {
        Box::pin(async move {
            self.govc(&os_args([
                String::from("vm.change"),
                String::from("-vm"),
                vm.to_owned(),
                String::from("-c"),
                cpus.to_string(),
                String::from("-m"),
                ram_mb.to_string(),
            ]))?;
            Ok(())
        })
    }

    fn power_on<'a>(&'a self, vm: &'a str) -> BackendFuture<'a, (), VsphereError> {
        Box::pin(async move {
            self.govc(&os_args(["vm.power", "-on", vm]))?;
            Ok(())
        })
    }

    fn guest_ip<'a>(&'a self, vm: &'a str) -> BackendFuture<'a, Option<String>, VsphereError> {
        Box::pin(async move { self.query_guest_ip(vm) })
    }

    fn find_vms_by_ip<'a>(
        &'a self,
        resource_pool: &'a str,
        ip: &'a str,
    ) -> BackendFuture<'a, Vec<String>, VsphereError> {
        Box::pin(async move { self.vms_by_ip(resource_pool, ip) })
    }

    fn destroy_vm<'a>(&'a self, vm_path: &'a str) -> BackendFuture<'a, (), VsphereError> {
        Box::pin(async move {
            self.govc(&os_args(["vm.destroy", vm_path]))?;
            Ok(())
        })
    }

    fn destroy_folder<'a>(&'a self, folder: &'a str) -> BackendFuture<'a, (), VsphereError> {
        Box::pin(async move { self.wipe_folder(folder) })
    }

    fn remove_datastore_path<'a>(
        &'a self,
        datastore: &'a str,
        path: &'a str,
    ) -> BackendFuture<'a, (), VsphereError> {
        Box::pin(async move {
            self.govc(&os_args(["datastore.rm", "-ds", datastore, "-f", path]))?;
            Ok(())
        })
    }
}
