//! Deployment settings loading.
//!
//! The settings file is a YAML document with a top-level `vm_shepherd` map:
//!
//! ```yaml
//! vm_shepherd:
//!   env_config: { ... }   # AWS only
//!   vm_configs:
//!     - creds: { url: ..., organization: ..., user: ..., password: ... }
//!       vdc: { ... }
//!       vapp: { ... }
//! ```
//!
//! Entries carry no explicit backend tag. Each one is classified by the keys
//! it holds and deserialized into the matching [`VmConfig`] variant. The
//! whole document is resolved before anything acts on it, so a bad entry
//! anywhere in the list stops a run before the first backend call.

mod entries;

use camino::Utf8Path;
use serde::de::DeserializeOwned;
use serde_yaml::{Mapping, Value};
use thiserror::Error;
use tracing::debug;

use crate::aws::{AwsEnvironment, AwsVmConfig};
use crate::backend::BackendKind;

pub use entries::{
    AwsEntry, OpenstackEntry, VappSettings, VcloudEntry, VdcSettings, VmConfig, VsphereCleanup,
    VsphereEntry, VsphereTarget,
};

/// Errors raised while loading deployment settings.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum SettingsError {
    /// The settings file could not be read.
    #[error("failed to read settings file {path}: {message}")]
    Read {
        /// Settings file path.
        path: String,
        /// Underlying failure description.
        message: String,
    },
    /// The document is not valid YAML or lacks the expected layout.
    #[error("invalid settings document: {0}")]
    Parse(String),
    /// No backend matches the keys of an entry.
    #[error("vm_configs[{index}]: unknown IaaS, no backend matches this entry")]
    UnknownBackend {
        /// Position of the entry.
        index: usize,
    },
    /// More than one backend matches the keys of an entry.
    #[error("vm_configs[{index}]: ambiguous IaaS, entry matches {}", join_kinds(.kinds))]
    AmbiguousBackend {
        /// Position of the entry.
        index: usize,
        /// Backends that matched.
        kinds: Vec<BackendKind>,
    },
    /// The entry matches a backend but its fields are invalid.
    #[error("vm_configs[{index}]: {message}")]
    Entry {
        /// Position of the entry.
        index: usize,
        /// Deserialization failure description.
        message: String,
    },
    /// An AWS entry appears without a document-level `env_config`.
    #[error("vm_configs[{index}]: AWS entries require vm_shepherd.env_config")]
    MissingAwsEnvironment {
        /// Position of the entry.
        index: usize,
    },
}

fn join_kinds(kinds: &[BackendKind]) -> String {
    kinds
        .iter()
        .map(|kind| kind.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Resolved deployment settings.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ShepherdSettings {
    configs: Vec<VmConfig>,
}

fn has_key(map: &Mapping, key: &str) -> bool {
    map.contains_key(key)
}

fn nested_has_key(map: &Mapping, outer: &str, key: &str) -> bool {
    map.get(outer)
        .and_then(Value::as_mapping)
        .is_some_and(|inner| has_key(inner, key))
}

/// Backends whose characteristic keys appear in `entry`.
fn classify(entry: &Mapping) -> Vec<BackendKind> {
    let mut kinds = Vec::new();
    if nested_has_key(entry, "creds", "url")
        && nested_has_key(entry, "creds", "organization")
        && has_key(entry, "vdc")
        && has_key(entry, "vapp")
    {
        kinds.push(BackendKind::Vcloud);
    }
    if has_key(entry, "vcenter_creds") {
        kinds.push(BackendKind::Vsphere);
    }
    if has_key(entry, "vm_name") {
        kinds.push(BackendKind::Aws);
    }
    if nested_has_key(entry, "creds", "auth_url") {
        kinds.push(BackendKind::Openstack);
    }
    kinds
}

fn decode<T: DeserializeOwned>(index: usize, value: Value) -> Result<T, SettingsError> {
    serde_yaml::from_value(value).map_err(|err| SettingsError::Entry {
        index,
        message: err.to_string(),
    })
}

impl ShepherdSettings {
    /// Reads and resolves the settings file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::Read`] when the file cannot be read and any
    /// error of [`ShepherdSettings::from_yaml`] otherwise.
    pub fn from_path(path: &Utf8Path) -> Result<Self, SettingsError> {
        let raw = std::fs::read_to_string(path).map_err(|err| SettingsError::Read {
            path: path.to_string(),
            message: err.to_string(),
        })?;
        Self::from_yaml(&raw)
    }

    /// Parses and resolves a settings document.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::Parse`] for malformed documents,
    /// [`SettingsError::UnknownBackend`] or [`SettingsError::AmbiguousBackend`]
    /// when an entry cannot be classified, [`SettingsError::Entry`] when its
    /// fields do not fit the backend, and
    /// [`SettingsError::MissingAwsEnvironment`] for AWS entries without an
    /// `env_config`.
    pub fn from_yaml(raw: &str) -> Result<Self, SettingsError> {
        let document: Value =
            serde_yaml::from_str(raw).map_err(|err| SettingsError::Parse(err.to_string()))?;
        let root = document
            .get("vm_shepherd")
            .and_then(Value::as_mapping)
            .ok_or_else(|| SettingsError::Parse(String::from("missing vm_shepherd map")))?;
        let entries = root
            .get("vm_configs")
            .and_then(Value::as_sequence)
            .ok_or_else(|| SettingsError::Parse(String::from("missing vm_shepherd.vm_configs list")))?;
        let aws_env = root.get("env_config");

        let configs = entries
            .iter()
            .enumerate()
            .map(|(index, entry)| Self::resolve(index, entry, aws_env))
            .collect::<Result<Vec<_>, _>>()?;
        debug!(entries = configs.len(), "resolved deployment settings");
        Ok(Self { configs })
    }

    fn resolve(
        index: usize,
        entry: &Value,
        aws_env: Option<&Value>,
    ) -> Result<VmConfig, SettingsError> {
        let map = entry
            .as_mapping()
            .ok_or(SettingsError::UnknownBackend { index })?;
        let kinds = classify(map);
        if kinds.len() > 1 {
            return Err(SettingsError::AmbiguousBackend { index, kinds });
        }
        let kind = kinds
            .first()
            .copied()
            .ok_or(SettingsError::UnknownBackend { index })?;

        let config = match kind {
            BackendKind::Vcloud => VmConfig::Vcloud(decode(index, entry.clone())?),
            BackendKind::Vsphere => VmConfig::Vsphere(decode(index, entry.clone())?),
            BackendKind::Openstack => VmConfig::Openstack(decode(index, entry.clone())?),
            BackendKind::Aws => {
                let env_value = aws_env.ok_or(SettingsError::MissingAwsEnvironment { index })?;
                let vm: AwsVmConfig = decode(index, entry.clone())?;
                let env: AwsEnvironment = decode(index, env_value.clone())?;
                VmConfig::Aws(AwsEntry { vm, env })
            }
        };
        Ok(config)
    }

    /// Resolved entries in file order.
    #[must_use]
    pub const fn configs(&self) -> &[VmConfig] {
        self.configs.as_slice()
    }

    /// Number of entries.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.configs.len()
    }

    /// Whether the document lists no entries.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    const VCLOUD: &str = r"
vm_shepherd:
  vm_configs:
    - creds:
        url: https://vcd.example.com
        organization: org
        user: admin
        password: secret
      vdc:
        name: vdc1
        catalog: ops-catalog
        network: ops-net
      vapp:
        ops_manager_name: ops-manager
        ip: 10.0.0.10
        gateway: 10.0.0.1
        netmask: 255.255.255.0
        dns: 10.0.0.2
        ntp: ntp.example.com
";

    #[rstest]
    fn resolves_vcloud_entry() {
        let settings = ShepherdSettings::from_yaml(VCLOUD)
            .unwrap_or_else(|err| panic!("settings should load: {err}"));
        let [VmConfig::Vcloud(entry)] = settings.configs() else {
            panic!("expected one vCloud entry, got {:?}", settings.configs());
        };
        assert_eq!(entry.vapp_config().name, "ops-manager");
        assert_eq!(entry.vapp_config().catalog, "ops-catalog");
        assert!(entry.vapp.product_names.is_empty());
        assert_eq!(entry.product_catalog(), "ops-catalog");
    }

    #[rstest]
    #[case::scalar("vm_shepherd:\n  vm_configs:\n    - just-a-string\n")]
    #[case::no_markers("vm_shepherd:\n  vm_configs:\n    - vm:\n        ip: 10.0.0.1\n")]
    #[case::creds_without_url("vm_shepherd:\n  vm_configs:\n    - creds:\n        user: a\n")]
    fn rejects_unclassifiable_entries(#[case] raw: &str) {
        let err = ShepherdSettings::from_yaml(raw).expect_err("entry should be rejected");
        assert_eq!(err, SettingsError::UnknownBackend { index: 0 });
    }

    #[rstest]
    fn rejects_ambiguous_entries() {
        let raw = "vm_shepherd:\n  vm_configs:\n    - vcenter_creds: {}\n      vm_name: x\n";
        let err = ShepherdSettings::from_yaml(raw).expect_err("entry should be rejected");
        assert_eq!(
            err,
            SettingsError::AmbiguousBackend {
                index: 0,
                kinds: vec![BackendKind::Vsphere, BackendKind::Aws],
            }
        );
        assert!(err.to_string().contains("vsphere, aws"));
    }

    #[rstest]
    fn aws_entries_need_env_config() {
        let raw = "vm_shepherd:\n  vm_configs:\n    - vm_name: ops\n      key_name: bosh\n";
        let err = ShepherdSettings::from_yaml(raw).expect_err("entry should be rejected");
        assert_eq!(err, SettingsError::MissingAwsEnvironment { index: 0 });
    }

    #[rstest]
    fn reports_field_errors_with_index() {
        let raw = format!("{VCLOUD}    - vcenter_creds: {{ ip: vc }}\n");
        let err = ShepherdSettings::from_yaml(&raw).expect_err("entry should be rejected");
        assert!(matches!(err, SettingsError::Entry { index: 1, .. }), "{err:?}");
    }

    #[rstest]
    #[case::not_yaml("vm_shepherd: [")]
    #[case::missing_root("other: {}")]
    #[case::missing_list("vm_shepherd:\n  env_config: {}\n")]
    fn rejects_malformed_documents(#[case] raw: &str) {
        let err = ShepherdSettings::from_yaml(raw).expect_err("document should be rejected");
        assert!(matches!(err, SettingsError::Parse(_)), "{err:?}");
    }
}
