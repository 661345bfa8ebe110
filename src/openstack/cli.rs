//! [`OpenstackApi`] implementation driving the unified `openstack` CLI.

use std::ffi::OsString;

use camino::Utf8Path;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::backend::BackendFuture;
use crate::process::{CommandOutput, CommandRunner, os_args};

use super::{Image, OpenstackApi, OpenstackCredentials, OpenstackError, Resource, ServerSpec};

/// `openstack`-backed client bound to one project.
#[derive(Clone, Debug)]
pub struct OpenstackCli<R> {
    runner: R,
    bin: String,
    credentials: OpenstackCredentials,
}

/// Row of an `openstack ... list -f json` table.
#[derive(Debug, Deserialize)]
struct ListRow {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Name", default)]
    name: String,
}

/// Row of `openstack image list --long -f json`.
#[derive(Debug, Deserialize)]
struct ImageRow {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Name", default)]
    name: String,
    #[serde(rename = "Visibility")]
    visibility: String,
}

impl<R: CommandRunner> OpenstackCli<R> {
    /// Creates a client that runs `bin` through `runner`.
    #[must_use]
    pub fn new(runner: R, bin: impl Into<String>, credentials: OpenstackCredentials) -> Self {
        Self {
            runner,
            bin: bin.into(),
            credentials,
        }
    }

    fn env(&self) -> Vec<(String, String)> {
        vec![
            (String::from("OS_AUTH_URL"), self.credentials.auth_url.clone()),
            (String::from("OS_USERNAME"), self.credentials.username.clone()),
            (String::from("OS_PASSWORD"), self.credentials.api_key.clone()),
            (String::from("OS_PROJECT_NAME"), self.credentials.tenant.clone()),
        ]
    }

    fn run(&self, args: &[OsString]) -> Result<CommandOutput, OpenstackError> {
        let output = self
            .runner
            .run_with_env(&self.bin, args, &self.env())?
            .into_success(&self.bin)?;
        Ok(output)
    }

    fn command_label(args: &[OsString]) -> String {
        args.iter()
            .take(2)
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Runs a subcommand with `-f json` and parses its output.
    fn json<T: DeserializeOwned>(&self, mut args: Vec<OsString>) -> Result<T, OpenstackError> {
        args.extend(os_args(["-f", "json"]));
        let output = self.run(&args)?;
        serde_json::from_str(&output.stdout).map_err(|err| OpenstackError::Parse {
            command: Self::command_label(&args),
            message: err.to_string(),
        })
    }

    fn created_id(&self, args: Vec<OsString>) -> Result<String, OpenstackError> {
        let label = Self::command_label(&args);
        let value: Value = self.json(args)?;
        value
            .pointer("/id")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| OpenstackError::Parse {
                command: label,
                message: String::from("missing id"),
            })
    }

    fn list(&self, kind: &str) -> Result<Vec<Resource>, OpenstackError> {
        let rows: Vec<ListRow> = self.json(os_args([kind, "list"]))?;
        Ok(rows
            .into_iter()
            .map(|row| Resource {
                id: row.id,
                name: row.name,
            })
            .collect())
    }

    fn delete(&self, kind: &str, id: &str) -> Result<(), OpenstackError> {
        self.run(&os_args([kind, "delete", id]))?;
        Ok(())
    }

    fn server_args(spec: &ServerSpec) -> Vec<OsString> {
        let mut args = vec![
            String::from("server"),
            String::from("create"),
            String::from("--image"),
            spec.image_id.clone(),
            String::from("--flavor"),
            spec.flavor.clone(),
            String::from("--nic"),
            format!("net-id={},v4-fixed-ip={}", spec.network, spec.fixed_ip),
            String::from("--key-name"),
            spec.key_name.clone(),
        ];
        for group in &spec.security_groups {
            args.push(String::from("--security-group"));
            args.push(group.clone());
        }
        args.push(spec.name.clone());
        os_args(args)
    }
}

impl<R: CommandRunner> OpenstackApi for OpenstackCli<R> {
    fn create_image<'a>(
        &'a self,
        name: &'a str,
        path: &'a Utf8Path,
    ) -> BackendFuture<'a, String, OpenstackError> {
        Box::pin(async move {
            self.created_id(os_args([
                "image",
                "create",
                "--disk-format",
                "qcow2",
                "--container-format",
                "bare",
                "--private",
                "--file",
                path.as_str(),
                name,
            ]))
        })
    }

    fn images(&self) -> BackendFuture<'_, Vec<Image>, OpenstackError> {
        Box::pin(async move {
            let rows: Vec<ImageRow> = self.json(os_args(["image", "list", "--long"]))?;
            Ok(rows
                .into_iter()
                .map(|row| Image {
                    id: row.id,
                    name: row.name,
                    visibility: row.visibility,
                })
                .collect())
        })
    }

    fn delete_image<'a>(&'a self, id: &'a str) -> BackendFuture<'a, (), OpenstackError> {
        Box::pin(async move { self.delete("image", id) })
    }

    fn create_server<'a>(
        &'a self,
        spec: &'a ServerSpec,
    ) -> BackendFuture<'a, String, OpenstackError> {
        Box::pin(async move { self.created_id(Self::server_args(spec)) })
    }

    fn server_status<'a>(
        &'a self,
        id: &'a str,
    ) -> BackendFuture<'a, Option<String>, OpenstackError> {
        Box::pin(async move {
            let value: Value = self.json(os_args(["server", "show", id]))?;
            Ok(value
                .pointer("/status")
                .and_then(Value::as_str)
                .map(str::to_owned))
        })
    }

    fn add_floating_ip<'a>(
        &'a self,
        server: &'a str,
        address: &'a str,
    ) -> BackendFuture<'a, (), OpenstackError> {
        Box::pin(async move {
            self.run(&os_args(["server", "add", "floating", "ip", server, address]))?;
            Ok(())
        })
    }

    fn servers(&self) -> BackendFuture<'_, Vec<Resource>, OpenstackError> {
        Box::pin(async move { self.list("server") })
    }

    fn delete_server<'a>(&'a self, id: &'a str) -> BackendFuture<'a, (), OpenstackError> {
        Box::pin(async move { self.delete("server", id) })
    }

    fn volumes(&self) -> BackendFuture<'_, Vec<String>, OpenstackError> {
        Box::pin(async move {
            Ok(self
                .list("volume")?
                .into_iter()
                .map(|volume| volume.id)
                .collect())
        })
    }

    fn delete_volume<'a>(&'a self, id: &'a str) -> BackendFuture<'a, (), OpenstackError> {
        Box::pin(async move { self.delete("volume", id) })
    }
}
