//! [`AwsApi`] implementation driving the `aws` CLI.

use std::collections::BTreeMap;
use std::ffi::OsString;

use camino::Utf8Path;
use serde_json::Value;
use tracing::debug;

use crate::backend::BackendFuture;
use crate::process::{CommandError, CommandOutput, CommandRunner, os_args};

use super::{AwsApi, AwsEnvironment, AwsError, ElasticIp, InstanceSpec, LoadBalancerSpec};

/// States of instances that still exist.
const LIVE_STATES: &str = "pending,running,stopping,stopped";

/// `aws`-backed client bound to one account and region.
#[derive(Clone, Debug)]
pub struct AwsCli<R> {
    runner: R,
    bin: String,
    access_key: String,
    secret_key: String,
    region: String,
}

fn stderr_contains(err: &AwsError, needle: &str) -> bool {
    matches!(
        err,
        AwsError::Command(CommandError::Failed { stderr, .. }) if stderr.contains(needle)
    )
}

fn strings_at<'v>(values: impl Iterator<Item = &'v Value>, pointer: &str) -> Vec<String> {
    values
        .filter_map(|value| value.pointer(pointer).and_then(Value::as_str))
        .map(str::to_owned)
        .collect()
}

fn array<'v>(value: &'v Value, pointer: &str) -> &'v [Value] {
    value
        .pointer(pointer)
        .and_then(Value::as_array)
        .map_or(&[][..], Vec::as_slice)
}

impl<R: CommandRunner> AwsCli<R> {
    /// Creates a client for the account and region in `env`.
    #[must_use]
    pub fn new(runner: R, bin: impl Into<String>, env: &AwsEnvironment) -> Self {
        Self {
            runner,
            bin: bin.into(),
            access_key: env.aws_access_key.clone(),
            secret_key: env.aws_secret_key.clone(),
            region: env.region.clone(),
        }
    }

    fn env(&self) -> Vec<(String, String)> {
        vec![
            (String::from("AWS_ACCESS_KEY_ID"), self.access_key.clone()),
            (String::from("AWS_SECRET_ACCESS_KEY"), self.secret_key.clone()),
            (String::from("AWS_DEFAULT_REGION"), self.region.clone()),
        ]
    }

    /// Runs one subcommand and returns its raw output. Used directly by
    /// subcommands such as `s3 rm` that print text whatever `--output` says.
    fn invoke<I, S>(&self, args: I) -> Result<(String, CommandOutput), AwsError>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let mut full = os_args(["--region", self.region.as_str(), "--output", "json"]);
        full.extend(os_args(args));
        let command = full
            .get(4..6)
            .map(|words| {
                words
                    .iter()
                    .map(|word| word.to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .unwrap_or_default();

        let output = self
            .runner
            .run_with_env(&self.bin, &full, &self.env())?
            .into_success(&self.bin)?;
        Ok((command, output))
    }

    /// Runs one subcommand and parses its JSON output. Empty output maps to
    /// [`Value::Null`].
    fn aws<I, S>(&self, args: I) -> Result<Value, AwsError>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let (command, output) = self.invoke(args)?;
        if output.stdout.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&output.stdout).map_err(|err| AwsError::Parse {
            command,
            message: err.to_string(),
        })
    }

    fn required(value: &Value, pointer: &str, command: &str) -> Result<String, AwsError> {
        value
            .pointer(pointer)
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| AwsError::Parse {
                command: command.to_owned(),
                message: format!("missing {pointer}"),
            })
    }

    fn instances(&self, filters: &[String]) -> Result<Vec<String>, AwsError> {
        let mut args = vec![
            String::from("ec2"),
            String::from("describe-instances"),
            String::from("--filters"),
        ];
        args.extend(filters.iter().cloned());
        args.push(format!("Name=instance-state-name,Values={LIVE_STATES}"));
        let value = self.aws(args)?;
        let ids = array(&value, "/Reservations")
            .iter()
            .flat_map(|reservation| array(reservation, "/Instances"))
            .filter_map(|instance| instance.pointer("/InstanceId").and_then(Value::as_str))
            .map(str::to_owned)
            .collect();
        Ok(ids)
    }

    fn create_stack_sync(
        &self,
        stack: &str,
        template: &Utf8Path,
        parameters: &BTreeMap<String, String>,
    ) -> Result<(), AwsError> {
        let mut args = vec![
            String::from("cloudformation"),
            String::from("create-stack"),
            String::from("--stack-name"),
            stack.to_owned(),
            String::from("--template-body"),
            format!("file://{template}"),
        ];
        if !parameters.is_empty() {
            args.push(String::from("--parameters"));
            args.extend(
                parameters
                    .iter()
                    .map(|(key, value)| format!("ParameterKey={key},ParameterValue={value}")),
            );
        }
        self.aws(args)?;
        Ok(())
    }

    fn stack_status_sync(&self, stack: &str) -> Result<Option<String>, AwsError> {
        match self.aws(["cloudformation", "describe-stacks", "--stack-name", stack]) {
            Ok(value) => Ok(strings_at(array(&value, "/Stacks").iter(), "/StackStatus")
                .into_iter()
                .next()),
            Err(err) if stderr_contains(&err, "does not exist") => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn stack_outputs_sync(&self, stack: &str) -> Result<BTreeMap<String, String>, AwsError> {
        let value = self.aws(["cloudformation", "describe-stacks", "--stack-name", stack])?;
        let outputs = array(&value, "/Stacks")
            .iter()
            .flat_map(|stack_value| array(stack_value, "/Outputs"))
            .filter_map(|output| {
                let key = output.pointer("/OutputKey").and_then(Value::as_str)?;
                let value = output.pointer("/OutputValue").and_then(Value::as_str)?;
                Some((key.to_owned(), value.to_owned()))
            })
            .collect();
        Ok(outputs)
    }

    fn create_security_group_sync(&self, name: &str, vpc_id: &str) -> Result<String, AwsError> {
        let description = format!("{name} load balancer access");
        let value = self.aws([
            "ec2",
            "create-security-group",
            "--group-name",
            name,
            "--description",
            description.as_str(),
            "--vpc-id",
            vpc_id,
        ])?;
        Self::required(&value, "/GroupId", "ec2 create-security-group")
    }

    fn delete_security_group_sync(&self, group_id: &str) -> Result<bool, AwsError> {
        match self.aws(["ec2", "delete-security-group", "--group-id", group_id]) {
            Ok(_) => Ok(true),
            Err(err) if stderr_contains(&err, "DependencyViolation") => {
                debug!(group = group_id, "security group still in use");
                Ok(false)
            }
            Err(err) if stderr_contains(&err, "InvalidGroup.NotFound") => Ok(true),
            Err(err) => Err(err),
        }
    }

    fn create_load_balancer_sync(&self, spec: &LoadBalancerSpec) -> Result<(), AwsError> {
        let mut args = vec![
            String::from("elb"),
            String::from("create-load-balancer"),
            String::from("--load-balancer-name"),
            spec.name.clone(),
            String::from("--listeners"),
        ];
        args.extend(spec.listeners.iter().map(|(lb_port, instance_port)| {
            format!(
                "Protocol=TCP,LoadBalancerPort={lb_port},InstanceProtocol=TCP,InstancePort={instance_port}"
            )
        }));
        args.extend([
            String::from("--subnets"),
            spec.subnet_id.clone(),
            String::from("--security-groups"),
            spec.security_group_id.clone(),
        ]);
        self.aws(args)?;
        Ok(())
    }

    fn load_balancer_groups_sync(&self, name: &str) -> Result<Vec<String>, AwsError> {
        match self.aws([
            "elb",
            "describe-load-balancers",
            "--load-balancer-names",
            name,
        ]) {
            Ok(value) => Ok(array(&value, "/LoadBalancerDescriptions")
                .iter()
                .flat_map(|lb| array(lb, "/SecurityGroups"))
                .filter_map(Value::as_str)
                .map(str::to_owned)
                .collect()),
            Err(err) if stderr_contains(&err, "LoadBalancerNotFound") => Ok(Vec::new()),
            Err(err) => Err(err),
        }
    }

    fn run_instance_sync(&self, spec: &InstanceSpec) -> Result<String, AwsError> {
        let value = self.aws([
            "ec2",
            "run-instances",
            "--image-id",
            spec.image_id.as_str(),
            "--instance-type",
            spec.instance_type.as_str(),
            "--key-name",
            spec.key_name.as_str(),
            "--subnet-id",
            spec.subnet_id.as_str(),
            "--security-group-ids",
            spec.security_group_id.as_str(),
            "--count",
            "1",
        ])?;
        Self::required(&value, "/Instances/0/InstanceId", "ec2 run-instances")
    }

    fn instance_state_sync(&self, instance_id: &str) -> Result<Option<String>, AwsError> {
        let value = self.aws([
            "ec2",
            "describe-instances",
            "--instance-ids",
            instance_id,
        ])?;
        Ok(value
            .pointer("/Reservations/0/Instances/0/State/Name")
            .and_then(Value::as_str)
            .map(str::to_owned))
    }

    fn instance_addresses_sync(&self, instance_id: &str) -> Result<Vec<ElasticIp>, AwsError> {
        let filter = format!("Name=instance-id,Values={instance_id}");
        let value = self.aws(["ec2", "describe-addresses", "--filters", filter.as_str()])?;
        Ok(array(&value, "/Addresses")
            .iter()
            .filter_map(|address| {
                let allocation_id = address.pointer("/AllocationId").and_then(Value::as_str)?;
                Some(ElasticIp {
                    allocation_id: allocation_id.to_owned(),
                    association_id: address
                        .pointer("/AssociationId")
                        .and_then(Value::as_str)
                        .map(str::to_owned),
                })
            })
            .collect())
    }

    fn release_address_sync(&self, address: &ElasticIp) -> Result<(), AwsError> {
        if let Some(association) = &address.association_id {
            self.aws([
                "ec2",
                "disassociate-address",
                "--association-id",
                association.as_str(),
            ])?;
        }
        self.aws([
            "ec2",
            "release-address",
            "--allocation-id",
            address.allocation_id.as_str(),
        ])?;
        Ok(())
    }
}

impl<R: CommandRunner> AwsApi for AwsCli<R> {
    fn create_stack<'a>(
        &'a self,
        stack: &'a str,
        template: &'a Utf8Path,
        parameters: &'a BTreeMap<String, String>,
    ) -> BackendFuture<'a, (), AwsError> {
        Box::pin(async move { self.create_stack_sync(stack, template, parameters) })
    }

    fn stack_status<'a>(&'a self, stack: &'a str) -> BackendFuture<'a, Option<String>, AwsError> {
        Box::pin(async move { self.stack_status_sync(stack) })
    }

    fn stack_outputs<'a>(
        &'a self,
        stack: &'a str,
    ) -> BackendFuture<'a, BTreeMap<String, String>, AwsError> {
        Box::pin(async move { self.stack_outputs_sync(stack) })
    }

    fn delete_stack<'a>(&'a self, stack: &'a str) -> BackendFuture<'a, (), AwsError> {
        Box::pin(async move {
            self.aws(["cloudformation", "delete-stack", "--stack-name", stack])?;
            Ok(())
        })
    }

    fn create_security_group<'a>(
        &'a self,
        name: &'a str,
        vpc_id: &'a str,
    ) -> BackendFuture<'a, String, AwsError> {
        Box::pin(async move { self.create_security_group_sync(name, vpc_id) })
    }

    fn authorize_ingress<'a>(
        &'a self,
        group_id: &'a str,
        port: u16,
    ) -> BackendFuture<'a, (), AwsError> {
        Box::pin(async move {
            let port_arg = port.to_string();
            self.aws([
                "ec2",
                "authorize-security-group-ingress",
                "--group-id",
                group_id,
                "--protocol",
                "tcp",
                "--port",
                port_arg.as_str(),
                "--cidr",
                "0.0.0.0/0",
            ])?;
            Ok(())
        })
    }

    fn delete_security_group<'a>(&'a self, group_id: &'a str) -> BackendFuture<'a, bool, AwsError> {
        Box::pin(async move { self.delete_security_group_sync(group_id) })
    }

    fn create_load_balancer<'a>(
        &'a self,
        spec: &'a LoadBalancerSpec,
    ) -> BackendFuture<'a, (), AwsError> {
        Box::pin(async move { self.create_load_balancer_sync(spec) })
    }

    fn load_balancer_security_groups<'a>(
        &'a self,
        name: &'a str,
    ) -> BackendFuture<'a, Vec<String>, AwsError> {
        Box::pin(async move { self.load_balancer_groups_sync(name) })
    }

    fn delete_load_balancer<'a>(&'a self, name: &'a str) -> BackendFuture<'a, (), AwsError> {
        Box::pin(async move {
            self.aws(["elb", "delete-load-balancer", "--load-balancer-name", name])?;
            Ok(())
        })
    }

    fn register_instance<'a>(
        &'a self,
        load_balancer: &'a str,
        instance_id: &'a str,
    ) -> BackendFuture<'a, (), AwsError> {
        Box::pin(async move {
            self.aws([
                "elb",
                "register-instances-with-load-balancer",
                "--load-balancer-name",
                load_balancer,
                "--instances",
                instance_id,
            ])?;
            Ok(())
        })
    }

    fn run_instance<'a>(&'a self, spec: &'a InstanceSpec) -> BackendFuture<'a, String, AwsError> {
        Box::pin(async move { self.run_instance_sync(spec) })
    }

    fn instance_state<'a>(
        &'a self,
        instance_id: &'a str,
    ) -> BackendFuture<'a, Option<String>, AwsError> {
        Box::pin(async move { self.instance_state_sync(instance_id) })
    }

    fn tag_instance<'a>(
        &'a self,
        instance_id: &'a str,
        key: &'a str,
        value: &'a str,
    ) -> BackendFuture<'a, (), AwsError> {
        Box::pin(async move {
            let tag = format!("Key={key},Value={value}");
            self.aws([
                "ec2",
                "create-tags",
                "--resources",
                instance_id,
                "--tags",
                tag.as_str(),
            ])?;
            Ok(())
        })
    }

    fn instances_named<'a>(&'a self, name: &'a str) -> BackendFuture<'a, Vec<String>, AwsError> {
        Box::pin(async move { self.instances(&[format!("Name=tag:Name,Values={name}")]) })
    }

    fn instances_in_subnet<'a>(
        &'a self,
        subnet_id: &'a str,
    ) -> BackendFuture<'a, Vec<String>, AwsError> {
        Box::pin(async move { self.instances(&[format!("Name=subnet-id,Values={subnet_id}")]) })
    }

    fn instance_addresses<'a>(
        &'a self,
        instance_id: &'a str,
    ) -> BackendFuture<'a, Vec<ElasticIp>, AwsError> {
        Box::pin(async move { self.instance_addresses_sync(instance_id) })
    }

    fn allocate_address(&self) -> BackendFuture<'_, String, AwsError> {
        Box::pin(async move {
            let value = self.aws(["ec2", "allocate-address", "--domain", "vpc"])?;
            Self::required(&value, "/AllocationId", "ec2 allocate-address")
        })
    }

    fn associate_address<'a>(
        &'a self,
        allocation_id: &'a str,
        instance_id: &'a str,
    ) -> BackendFuture<'a, (), AwsError> {
        Box::pin(async move {
            self.aws([
                "ec2",
                "associate-address",
                "--allocation-id",
                allocation_id,
                "--instance-id",
                instance_id,
            ])?;
            Ok(())
        })
    }

    fn release_address<'a>(&'a self, address: &'a ElasticIp) -> BackendFuture<'a, (), AwsError> {
        Box::pin(async move { self.release_address_sync(address) })
    }

    fn terminate_instance<'a>(&'a self, instance_id: &'a str) -> BackendFuture<'a, (), AwsError> {
        Box::pin(async move {
            self.aws(["ec2", "terminate-instances", "--instance-ids", instance_id])?;
            Ok(())
        })
    }

    fn empty_bucket<'a>(&'a self, bucket: &'a str) -> BackendFuture<'a, (), AwsError> {
        Box::pin(async move {
            let target = format!("s3://{bucket}");
            match self.invoke(["s3", "rm", target.as_str(), "--recursive"]) {
                Ok((_, output)) => {
                    let removed = output
                        .stdout
                        .lines()
                        .filter(|line| line.starts_with("delete:"))
                        .count();
                    debug!(bucket, removed, "emptied bucket");
                    Ok(())
                }
                Err(err) if stderr_contains(&err, "NoSuchBucket") => {
                    debug!(bucket, "bucket already gone");
                    Ok(())
                }
                Err(err) => Err(err),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    #[rstest]
    fn array_tolerates_missing_pointer() {
        let value = json!({ "Reservations": [] });
        assert!(array(&value, "/Reservations").is_empty());
        assert!(array(&value, "/Missing").is_empty());
    }

    #[rstest]
    fn strings_at_skips_entries_without_the_field() {
        let value = json!([{ "StackStatus": "CREATE_COMPLETE" }, { "Other": 1 }]);
        let values = value.as_array().map_or(&[][..], Vec::as_slice);
        assert_eq!(strings_at(values.iter(), "/StackStatus"), ["CREATE_COMPLETE"]);
    }
}
