//! Tool configuration loading via `ortho-config`.
//!
//! These settings describe the host `vmherd` runs on (where helper binaries
//! live, where scratch space goes), not the VMs it manages. VM deployments
//! are described by the YAML settings file handled in [`crate::settings`].

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

/// Host tooling settings merged from defaults, `vmherd.toml` and `VMHERD_*`
/// environment variables.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "VMHERD",
    discovery(
        app_name = "vmherd",
        env_var = "VMHERD_CONFIG_PATH",
        config_file_name = "vmherd.toml",
        dotfile_name = ".vmherd.toml",
        project_file_name = "vmherd.toml"
    )
)]
pub struct ToolConfig {
    /// Directory under which per-deploy scratch directories are created.
    /// Falls back to the system temporary directory.
    pub scratch_dir: Option<String>,
    /// Shell used to run the archive extraction command.
    #[ortho_config(default = "sh".to_owned())]
    pub shell_bin: String,
    /// Path to the `ping` executable used for the address conflict check.
    #[ortho_config(default = "ping".to_owned())]
    pub ping_bin: String,
    /// Echo requests sent by the conflict check.
    #[ortho_config(default = 5)]
    pub ping_count: u32,
    /// Path to the `govc` executable used for vSphere.
    #[ortho_config(default = "govc".to_owned())]
    pub govc_bin: String,
    /// Path to the `aws` executable.
    #[ortho_config(default = "aws".to_owned())]
    pub aws_bin: String,
    /// Path to the `openstack` executable.
    #[ortho_config(default = "openstack".to_owned())]
    pub openstack_bin: String,
    /// Skip TLS certificate verification for vCloud Director and vCenter.
    #[ortho_config(default = false)]
    pub insecure_tls: bool,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }

    fn missing(&self) -> ConfigError {
        ConfigError::MissingField(format!(
            "missing {}: set {} or add {} to vmherd.toml",
            self.description, self.env_var, self.toml_key
        ))
    }
}

impl ToolConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(metadata.missing());
        }
        Ok(())
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails, or a validation
    /// error from [`ToolConfig::validate`].
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        let config = Self::load_from_iter([std::ffi::OsString::from("vmherd")])
            .map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Scratch root as a UTF-8 path, if one is configured.
    #[must_use]
    pub fn scratch_root(&self) -> Option<Utf8PathBuf> {
        self.scratch_dir
            .as_deref()
            .map(str::trim)
            .filter(|dir| !dir.is_empty())
            .map(Utf8PathBuf::from)
    }

    /// Performs semantic validation. Error messages include guidance on how
    /// to provide missing values via environment variables or the
    /// configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a helper binary is blank, or
    /// [`ConfigError::Invalid`] when `ping_count` is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let binaries = [
            (
                &self.shell_bin,
                FieldMetadata::new("shell binary", "VMHERD_SHELL_BIN", "shell_bin"),
            ),
            (
                &self.ping_bin,
                FieldMetadata::new("ping binary", "VMHERD_PING_BIN", "ping_bin"),
            ),
            (
                &self.govc_bin,
                FieldMetadata::new("govc binary", "VMHERD_GOVC_BIN", "govc_bin"),
            ),
            (
                &self.aws_bin,
                FieldMetadata::new("aws binary", "VMHERD_AWS_BIN", "aws_bin"),
            ),
            (
                &self.openstack_bin,
                FieldMetadata::new("openstack binary", "VMHERD_OPENSTACK_BIN", "openstack_bin"),
            ),
        ];
        for (value, metadata) in &binaries {
            Self::require_field(value, metadata)?;
        }

        if self.ping_count == 0 {
            return Err(ConfigError::Invalid(String::from(
                "ping_count must be at least 1: set VMHERD_PING_COUNT or ping_count in vmherd.toml",
            )));
        }
        Ok(())
    }
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            scratch_dir: None,
            shell_bin: String::from("sh"),
            ping_bin: String::from("ping"),
            ping_count: 5,
            govc_bin: String::from("govc"),
            aws_bin: String::from("aws"),
            openstack_bin: String::from("openstack"),
            insecure_tls: false,
        }
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// A field holds a value outside its accepted range.
    #[error("invalid configuration value: {0}")]
    Invalid(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn defaults_validate() {
        ToolConfig::default()
            .validate()
            .unwrap_or_else(|err| panic!("defaults should validate: {err}"));
    }

    #[rstest]
    #[case::blank_ping(ToolConfig { ping_bin: String::from("  "), ..ToolConfig::default() }, "VMHERD_PING_BIN")]
    #[case::blank_govc(ToolConfig { govc_bin: String::new(), ..ToolConfig::default() }, "VMHERD_GOVC_BIN")]
    #[case::zero_pings(ToolConfig { ping_count: 0, ..ToolConfig::default() }, "VMHERD_PING_COUNT")]
    fn validation_errors_name_the_env_var(#[case] config: ToolConfig, #[case] env_var: &str) {
        let err = config.validate().expect_err("config should be rejected");
        assert!(
            err.to_string().contains(env_var),
            "error `{err}` should mention {env_var}"
        );
    }

    #[rstest]
    #[case(None, None)]
    #[case(Some("   "), None)]
    #[case(Some("/var/tmp/vmherd"), Some("/var/tmp/vmherd"))]
    fn scratch_root_ignores_blank_values(#[case] raw: Option<&str>, #[case] expected: Option<&str>) {
        let config = ToolConfig {
            scratch_dir: raw.map(str::to_owned),
            ..ToolConfig::default()
        };
        assert_eq!(config.scratch_root(), expected.map(Utf8PathBuf::from));
    }
}
