//! AWS adapter.
//!
//! The network (VPC, subnets, security group, optional S3 bucket) comes from a
//! CloudFormation stack created by `prepare_environment`; VMs are EC2
//! instances launched into that stack's public subnet, given an Elastic IP
//! and optionally registered with classic load balancers.

mod cli;

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use camino::Utf8Path;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::backend::BackendFuture;
use crate::process::CommandError;
use crate::retry::{RetryError, RetryPolicy, retry_until};

pub use cli::AwsCli;

/// Instance type used for every VM.
pub const DEFAULT_INSTANCE_TYPE: &str = "m3.medium";

/// Polling budget for stack creation and deletion.
pub const STACK_POLICY: RetryPolicy = RetryPolicy::new(180, Duration::from_secs(10));

/// Polling budget for instance state transitions.
pub const INSTANCE_POLICY: RetryPolicy = RetryPolicy::new(60, Duration::from_secs(5));

/// Shared AWS environment described by the document-level `env_config`.
#[derive(Clone, Deserialize, Eq, PartialEq)]
pub struct AwsEnvironment {
    /// CloudFormation stack holding the network.
    pub stack_name: String,
    /// Access key id.
    pub aws_access_key: String,
    /// Secret access key.
    pub aws_secret_key: String,
    /// Region every call targets.
    pub region: String,
    /// CloudFormation template used by `prepare_environment`.
    pub json_file: String,
    /// Template parameters.
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
    /// Identifiers of resources created by the stack.
    pub outputs: AwsOutputs,
    /// Classic load balancers fronting the VMs.
    #[serde(default)]
    pub elbs: Vec<ElbSettings>,
}

impl fmt::Debug for AwsEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsEnvironment")
            .field("stack_name", &self.stack_name)
            .field("aws_access_key", &self.aws_access_key)
            .field("aws_secret_key", &"<redacted>")
            .field("region", &self.region)
            .field("json_file", &self.json_file)
            .field("parameters", &self.parameters)
            .field("outputs", &self.outputs)
            .field("elbs", &self.elbs)
            .finish()
    }
}

/// Stack resources VMs are launched into.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct AwsOutputs {
    /// Security group attached to every instance.
    pub security_group: String,
    /// Subnet instances are launched into.
    pub public_subnet_id: String,
    /// Subnets swept by `clean_environment`.
    #[serde(default)]
    pub subnets: Vec<String>,
    /// Bucket emptied by `clean_environment`.
    #[serde(default)]
    pub s3_bucket_name: Option<String>,
}

/// One classic load balancer.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct ElbSettings {
    /// Load balancer name.
    pub name: String,
    /// `[load balancer port, instance port]` pairs.
    pub port_mappings: Vec<(u16, u16)>,
    /// Stack output keys naming the VPC and subnet.
    pub stack_output_keys: StackOutputKeys,
}

/// Stack output keys consulted when creating a load balancer.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct StackOutputKeys {
    /// Output holding the VPC id.
    pub vpc_id: String,
    /// Output holding the subnet id.
    pub subnet_id: String,
}

/// Per-VM settings.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct AwsVmConfig {
    /// Value of the instance `Name` tag.
    pub vm_name: String,
    /// EC2 key pair for SSH access.
    pub key_name: String,
}

/// Launch parameters for one instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceSpec {
    /// AMI to boot.
    pub image_id: String,
    /// Instance type.
    pub instance_type: String,
    /// EC2 key pair.
    pub key_name: String,
    /// Subnet to launch into.
    pub subnet_id: String,
    /// Security group to attach.
    pub security_group_id: String,
}

/// Classic load balancer definition.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LoadBalancerSpec {
    /// Load balancer name.
    pub name: String,
    /// `(load balancer port, instance port)` TCP listeners.
    pub listeners: Vec<(u16, u16)>,
    /// Subnet the load balancer lives in.
    pub subnet_id: String,
    /// Security group guarding the listeners.
    pub security_group_id: String,
}

/// Elastic IP attached to an instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ElasticIp {
    /// Allocation id.
    pub allocation_id: String,
    /// Association id, when associated.
    pub association_id: Option<String>,
}

/// Errors raised by the AWS adapter.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum AwsError {
    /// An `aws` invocation failed.
    #[error(transparent)]
    Command(#[from] CommandError),
    /// Command output could not be interpreted.
    #[error("unexpected output from aws {command}: {message}")]
    Parse {
        /// Subcommand whose output was rejected.
        command: String,
        /// Parse failure description.
        message: String,
    },
    /// The stack reached a failure state.
    #[error("stack {stack} entered {status}")]
    StackFailed {
        /// Stack name.
        stack: String,
        /// Terminal status.
        status: String,
    },
    /// A resource did not reach the expected state in time.
    #[error("timed out after {attempts} attempts waiting for {operation} on {target}")]
    Timeout {
        /// State transition awaited.
        operation: String,
        /// Resource awaited.
        target: String,
        /// Attempts made.
        attempts: u32,
    },
    /// A stack output referenced by the configuration is absent.
    #[error("stack output '{key}' not found")]
    MissingOutput {
        /// Output key.
        key: String,
    },
    /// The AMI file could not be read.
    #[error("failed to read AMI file {path}: {message}")]
    AmiFile {
        /// AMI file path.
        path: String,
        /// Failure description.
        message: String,
    },
    /// The AMI file has no entry for the configured region.
    #[error("AMI file {path} has no image for region {region}")]
    AmiMissing {
        /// AMI file path.
        path: String,
        /// Configured region.
        region: String,
    },
}

/// AWS operations the adapter relies on.
pub trait AwsApi: Send + Sync {
    /// Creates a CloudFormation stack from a local template.
    fn create_stack<'a>(
        &'a self,
        stack: &'a str,
        template: &'a Utf8Path,
        parameters: &'a BTreeMap<String, String>,
    ) -> BackendFuture<'a, (), AwsError>;

    /// Current stack status, or `None` when the stack does not exist.
    fn stack_status<'a>(&'a self, stack: &'a str) -> BackendFuture<'a, Option<String>, AwsError>;

    /// Stack outputs keyed by output name.
    fn stack_outputs<'a>(
        &'a self,
        stack: &'a str,
    ) -> BackendFuture<'a, BTreeMap<String, String>, AwsError>;

    /// Starts stack deletion.
    fn delete_stack<'a>(&'a self, stack: &'a str) -> BackendFuture<'a, (), AwsError>;

    /// Creates a VPC security group and returns its id.
    fn create_security_group<'a>(
        &'a self,
        name: &'a str,
        vpc_id: &'a str,
    ) -> BackendFuture<'a, String, AwsError>;

    /// Opens a TCP port to the world on a security group.
    fn authorize_ingress<'a>(&'a self, group_id: &'a str, port: u16)
    -> BackendFuture<'a, (), AwsError>;

    /// Deletes a security group. Returns `false` while it is still in use.
    fn delete_security_group<'a>(&'a self, group_id: &'a str) -> BackendFuture<'a, bool, AwsError>;

    /// Creates a classic load balancer.
    fn create_load_balancer<'a>(
        &'a self,
        spec: &'a LoadBalancerSpec,
    ) -> BackendFuture<'a, (), AwsError>;

    /// Security groups of a load balancer; empty when it does not exist.
    fn load_balancer_security_groups<'a>(
        &'a self,
        name: &'a str,
    ) -> BackendFuture<'a, Vec<String>, AwsError>;

    /// Deletes a load balancer. Deleting a missing one succeeds.
    fn delete_load_balancer<'a>(&'a self, name: &'a str) -> BackendFuture<'a, (), AwsError>;

    /// Registers an instance with a load balancer.
    fn register_instance<'a>(
        &'a self,
        load_balancer: &'a str,
        instance_id: &'a str,
    ) -> BackendFuture<'a, (), AwsError>;

    /// Launches one instance and returns its id.
    fn run_instance<'a>(&'a self, spec: &'a InstanceSpec) -> BackendFuture<'a, String, AwsError>;

    /// Current instance state name, or `None` when unknown.
    fn instance_state<'a>(
        &'a self,
        instance_id: &'a str,
    ) -> BackendFuture<'a, Option<String>, AwsError>;

    /// Adds a tag to an instance.
    fn tag_instance<'a>(
        &'a self,
        instance_id: &'a str,
        key: &'a str,
        value: &'a str,
    ) -> BackendFuture<'a, (), AwsError>;

    /// Live instances whose `Name` tag equals `name`.
    fn instances_named<'a>(&'a self, name: &'a str) -> BackendFuture<'a, Vec<String>, AwsError>;

    /// Live instances in a subnet.
    fn instances_in_subnet<'a>(
        &'a self,
        subnet_id: &'a str,
    ) -> BackendFuture<'a, Vec<String>, AwsError>;

    /// Elastic IPs associated with an instance.
    fn instance_addresses<'a>(
        &'a self,
        instance_id: &'a str,
    ) -> BackendFuture<'a, Vec<ElasticIp>, AwsError>;

    /// Allocates a VPC Elastic IP and returns its allocation id.
    fn allocate_address(&self) -> BackendFuture<'_, String, AwsError>;

    /// Associates an Elastic IP with an instance.
    fn associate_address<'a>(
        &'a self,
        allocation_id: &'a str,
        instance_id: &'a str,
    ) -> BackendFuture<'a, (), AwsError>;

    /// Detaches and releases an Elastic IP.
    fn release_address<'a>(&'a self, address: &'a ElasticIp) -> BackendFuture<'a, (), AwsError>;

    /// Starts termination of an instance.
    fn terminate_instance<'a>(&'a self, instance_id: &'a str) -> BackendFuture<'a, (), AwsError>;

    /// Deletes every object in a bucket.
    fn empty_bucket<'a>(&'a self, bucket: &'a str) -> BackendFuture<'a, (), AwsError>;
}

/// Lifecycle operations for VMs in one AWS environment.
pub trait AwsProvisioner: Send + Sync {
    /// Launches the AMI listed for the environment's region in `ami_file`.
    fn deploy<'a>(
        &'a self,
        ami_file: &'a Utf8Path,
        vm: &'a AwsVmConfig,
    ) -> BackendFuture<'a, (), AwsError>;

    /// Terminates the instances tagged with the VM name.
    fn destroy<'a>(&'a self, vm: &'a AwsVmConfig) -> BackendFuture<'a, (), AwsError>;

    /// Removes instances, load balancers, bucket contents and the stack.
    /// Resources that are already gone are skipped.
    fn clean_environment(&self) -> BackendFuture<'_, (), AwsError>;

    /// Creates the stack from `template` and the configured load balancers.
    /// An existing stack is waited on instead of created again, and its load
    /// balancers are left alone.
    fn prepare_environment<'a>(&'a self, template: &'a Utf8Path)
    -> BackendFuture<'a, (), AwsError>;
}

/// Reads the AMI id for `region` from a YAML map of region to image id.
///
/// # Errors
///
/// Returns [`AwsError::AmiFile`] when the file cannot be read or parsed, and
/// [`AwsError::AmiMissing`] when it has no entry for `region`.
pub async fn read_ami_id(path: &Utf8Path, region: &str) -> Result<String, AwsError> {
    let file_error = |message: String| AwsError::AmiFile {
        path: path.to_string(),
        message,
    };
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|err| file_error(err.to_string()))?;
    let images: BTreeMap<String, String> =
        serde_yaml::from_str(&raw).map_err(|err| file_error(err.to_string()))?;
    images
        .get(region)
        .cloned()
        .ok_or_else(|| AwsError::AmiMissing {
            path: path.to_string(),
            region: region.to_owned(),
        })
}

fn settle(err: RetryError<AwsError>, operation: &str, target: &str) -> AwsError {
    match err {
        RetryError::Exhausted { attempts, .. } => AwsError::Timeout {
            operation: operation.to_owned(),
            target: target.to_owned(),
            attempts,
        },
        RetryError::Attempt(inner) => inner,
    }
}

/// AWS adapter bound to one environment.
#[derive(Debug)]
pub struct AwsManager<A> {
    env: AwsEnvironment,
    api: A,
    stack_wait: RetryPolicy,
    instance_wait: RetryPolicy,
}

impl<A: AwsApi> AwsManager<A> {
    /// Creates a manager with the default polling budgets.
    #[must_use]
    pub const fn new(env: AwsEnvironment, api: A) -> Self {
        Self {
            env,
            api,
            stack_wait: STACK_POLICY,
            instance_wait: INSTANCE_POLICY,
        }
    }

    /// Overrides the polling budgets.
    #[must_use]
    pub fn with_waits(mut self, stack: RetryPolicy, instance: RetryPolicy) -> Self {
        self.stack_wait = stack;
        self.instance_wait = instance;
        self
    }

    async fn wait_for_instance(&self, instance_id: &str, state: &str) -> Result<(), AwsError> {
        let api = &self.api;
        retry_until(self.instance_wait, move || async move {
            let current = api.instance_state(instance_id).await?;
            Ok::<_, AwsError>((current.as_deref() == Some(state)).then_some(()))
        })
        .await
        .map_err(|err| settle(err, state, instance_id))
    }

    async fn launch(&self, ami_file: &Utf8Path, vm: &AwsVmConfig) -> Result<(), AwsError> {
        let image_id = read_ami_id(ami_file, &self.env.region).await?;
        let spec = InstanceSpec {
            image_id,
            instance_type: DEFAULT_INSTANCE_TYPE.to_owned(),
            key_name: vm.key_name.clone(),
            subnet_id: self.env.outputs.public_subnet_id.clone(),
            security_group_id: self.env.outputs.security_group.clone(),
        };

        info!(vm = %vm.vm_name, image = %spec.image_id, "launching instance");
        let instance_id = self.api.run_instance(&spec).await?;
        self.wait_for_instance(&instance_id, "running").await?;
        self.api
            .tag_instance(&instance_id, "Name", &vm.vm_name)
            .await?;

        let allocation = self.api.allocate_address().await?;
        self.api
            .associate_address(&allocation, &instance_id)
            .await?;

        for elb in &self.env.elbs {
            debug!(load_balancer = %elb.name, instance = %instance_id, "registering instance");
            self.api.register_instance(&elb.name, &instance_id).await?;
        }
        info!(vm = %vm.vm_name, instance = %instance_id, "instance is running");
        Ok(())
    }

    async fn terminate(&self, instance_id: &str) -> Result<(), AwsError> {
        for address in self.api.instance_addresses(instance_id).await? {
            debug!(allocation = %address.allocation_id, "releasing elastic IP");
            self.api.release_address(&address).await?;
        }
        info!(instance = instance_id, "terminating instance");
        self.api.terminate_instance(instance_id).await?;
        self.wait_for_instance(instance_id, "terminated").await
    }

    async fn destroy_vm(&self, vm: &AwsVmConfig) -> Result<(), AwsError> {
        let instances = self.api.instances_named(&vm.vm_name).await?;
        if instances.is_empty() {
            debug!(vm = %vm.vm_name, "no instance found; nothing to destroy");
        }
        for instance_id in &instances {
            self.terminate(instance_id).await?;
        }
        Ok(())
    }

    async fn remove_load_balancer(&self, elb: &ElbSettings) -> Result<(), AwsError> {
        let groups = self.api.load_balancer_security_groups(&elb.name).await?;
        info!(load_balancer = %elb.name, "deleting load balancer");
        self.api.delete_load_balancer(&elb.name).await?;

        let api = &self.api;
        for group in &groups {
            let group_id = group.as_str();
            retry_until(self.instance_wait, move || async move {
                Ok::<_, AwsError>(api.delete_security_group(group_id).await?.then_some(()))
            })
            .await
            .map_err(|err| settle(err, "security group release", group_id))?;
        }
        Ok(())
    }

    async fn clean(&self) -> Result<(), AwsError> {
        for subnet in &self.env.outputs.subnets {
            for instance_id in self.api.instances_in_subnet(subnet).await? {
                self.terminate(&instance_id).await?;
            }
        }
        for elb in &self.env.elbs {
            self.remove_load_balancer(elb).await?;
        }
        if let Some(bucket) = &self.env.outputs.s3_bucket_name {
            info!(bucket = %bucket, "emptying bucket");
            self.api.empty_bucket(bucket).await?;
        }

        let stack = self.env.stack_name.as_str();
        info!(stack, "deleting stack");
        self.api.delete_stack(stack).await?;
        let api = &self.api;
        retry_until(self.stack_wait, move || async move {
            match api.stack_status(stack).await?.as_deref() {
                None | Some("DELETE_COMPLETE") => Ok(Some(())),
                Some(status @ "DELETE_FAILED") => Err(AwsError::StackFailed {
                    stack: stack.to_owned(),
                    status: status.to_owned(),
                }),
                Some(_) => Ok(None),
            }
        })
        .await
        .map_err(|err| settle(err, "stack deletion", stack))
    }

    async fn prepare(&self, template: &Utf8Path) -> Result<(), AwsError> {
        let stack = self.env.stack_name.as_str();
        let existing = self.api.stack_status(stack).await?;
        if let Some(status) = &existing {
            info!(stack, status = %status, "stack already exists; not creating it again");
        } else {
            info!(stack, template = %template, "creating stack");
            self.api
                .create_stack(stack, template, &self.env.parameters)
                .await?;
        }

        let api = &self.api;
        retry_until(self.stack_wait, move || async move {
            match api.stack_status(stack).await?.as_deref() {
                Some("CREATE_COMPLETE") => Ok(Some(())),
                Some(status) if status.ends_with("FAILED") || status.contains("ROLLBACK") => {
                    Err(AwsError::StackFailed {
                        stack: stack.to_owned(),
                        status: status.to_owned(),
                    })
                }
                _ => Ok(None),
            }
        })
        .await
        .map_err(|err| settle(err, "stack creation", stack))?;

        if existing.is_some() || self.env.elbs.is_empty() {
            return Ok(());
        }
        let outputs = self.api.stack_outputs(stack).await?;
        let output = |key: &str| {
            outputs
                .get(key)
                .cloned()
                .ok_or_else(|| AwsError::MissingOutput {
                    key: key.to_owned(),
                })
        };
        for elb in &self.env.elbs {
            let vpc_id = output(&elb.stack_output_keys.vpc_id)?;
            let subnet_id = output(&elb.stack_output_keys.subnet_id)?;
            let group_name = format!("{}-elb", elb.name);
            let group_id = self.api.create_security_group(&group_name, &vpc_id).await?;
            for (port, _) in &elb.port_mappings {
                self.api.authorize_ingress(&group_id, *port).await?;
            }
            let spec = LoadBalancerSpec {
                name: elb.name.clone(),
                listeners: elb.port_mappings.clone(),
                subnet_id,
                security_group_id: group_id,
            };
            info!(load_balancer = %spec.name, "creating load balancer");
            self.api.create_load_balancer(&spec).await?;
        }
        Ok(())
    }
}

impl<A: AwsApi> AwsProvisioner for AwsManager<A> {
    fn deploy<'a>(
        &'a self,
        ami_file: &'a Utf8Path,
        vm: &'a AwsVmConfig,
    ) -> BackendFuture<'a, (), AwsError> {
        Box::pin(self.launch(ami_file, vm))
    }

    fn destroy<'a>(&'a self, vm: &'a AwsVmConfig) -> BackendFuture<'a, (), AwsError> {
        Box::pin(self.destroy_vm(vm))
    }

    fn clean_environment(&self) -> BackendFuture<'_, (), AwsError> {
        Box::pin(self.clean())
    }

    fn prepare_environment<'a>(
        &'a self,
        template: &'a Utf8Path,
    ) -> BackendFuture<'a, (), AwsError> {
        Box::pin(self.prepare(template))
    }
}
