//! Settings loading against the fixture documents.

use camino::Utf8PathBuf;
use rstest::rstest;
use vmherd::BackendKind;
use vmherd::settings::{SettingsError, ShepherdSettings, VmConfig};

fn fixture(name: &str) -> Utf8PathBuf {
    Utf8PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn load(name: &str) -> ShepherdSettings {
    ShepherdSettings::from_path(&fixture(name))
        .unwrap_or_else(|err| panic!("fixture {name} should load: {err}"))
}

fn kinds(settings: &ShepherdSettings) -> Vec<BackendKind> {
    settings.configs().iter().map(VmConfig::kind).collect()
}

#[rstest]
#[case("vcloud.yml", vec![BackendKind::Vcloud, BackendKind::Vcloud])]
#[case("vsphere.yml", vec![BackendKind::Vsphere])]
#[case("aws.yml", vec![BackendKind::Aws, BackendKind::Aws])]
#[case("aws-no-elb.yml", vec![BackendKind::Aws])]
#[case("openstack.yml", vec![BackendKind::Openstack, BackendKind::Openstack])]
#[case("mixed.yml", vec![
    BackendKind::Vcloud,
    BackendKind::Vsphere,
    BackendKind::Aws,
    BackendKind::Openstack,
])]
fn fixtures_resolve_to_backends(#[case] name: &str, #[case] expected: Vec<BackendKind>) {
    assert_eq!(kinds(&load(name)), expected);
}

#[test]
fn unknown_backend_is_rejected_with_position() {
    let err = ShepherdSettings::from_path(&fixture("unknown.yml"))
        .expect_err("unknown IaaS should be rejected");
    assert_eq!(err, SettingsError::UnknownBackend { index: 0 });
    assert!(err.to_string().contains("unknown IaaS"));
}

#[test]
fn missing_file_reports_path() {
    let err = ShepherdSettings::from_path(&fixture("absent.yml"))
        .expect_err("missing file should be rejected");
    assert!(matches!(err, SettingsError::Read { ref path, .. } if path.ends_with("absent.yml")));
}

#[test]
fn vcloud_entries_map_onto_vapp_config() {
    let settings = load("vcloud.yml");
    let Some(VmConfig::Vcloud(first)) = settings.configs().first() else {
        panic!("first entry should be vCloud");
    };

    let vapp = first.vapp_config();
    assert_eq!(vapp.name, "VAPP_NAME");
    assert_eq!(vapp.ip, "192.168.0.10");
    assert_eq!(vapp.catalog, "CATALOG_NAME");
    assert_eq!(vapp.network, "NETWORK_NAME");
    assert_eq!(first.creds.identity(), "USER@ORGANIZATION");
    assert_eq!(first.vapp.product_names, ["p-bosh", "cf"]);
    assert_eq!(first.product_catalog(), "PRODUCT_CATALOG");

    let Some(VmConfig::Vcloud(second)) = settings.configs().get(1) else {
        panic!("second entry should be vCloud");
    };
    assert!(second.vapp.product_names.is_empty());
    assert_eq!(second.product_catalog(), "CATALOG_NAME-2");
}

#[test]
fn vsphere_entry_splits_placement_and_cleanup() {
    let settings = load("vsphere.yml");
    let Some(VmConfig::Vsphere(entry)) = settings.configs().first() else {
        panic!("entry should be vSphere");
    };

    assert_eq!(entry.vsphere.datacenter, "DATACENTER");
    assert_eq!(entry.vsphere.placement.resource_pool, "RESOURCE_POOL");
    assert_eq!(entry.vsphere.placement.folder, "pcf/ops");
    assert_eq!(entry.vm.ram_mb, 8192);
    let cleanup = entry
        .cleanup
        .as_ref()
        .unwrap_or_else(|| panic!("cleanup section should load"));
    assert_eq!(cleanup.datacenter, "CLEANUP_DATACENTER");
    assert_eq!(cleanup.scope.datastore_folders_to_clean, ["pcf_images"]);
}

#[test]
fn aws_entries_share_the_environment() {
    let settings = load("aws.yml");
    let envs: Vec<_> = settings
        .configs()
        .iter()
        .filter_map(|config| match config {
            VmConfig::Aws(entry) => Some(entry),
            _ => None,
        })
        .collect();

    assert_eq!(envs.len(), 2);
    assert!(envs.iter().all(|entry| entry.env.stack_name == "pcf-stack"));
    assert_eq!(
        envs.iter().map(|entry| entry.vm.vm_name.as_str()).collect::<Vec<_>>(),
        ["ops-manager", "ops-manager-2"]
    );
    let elb = envs
        .first()
        .and_then(|entry| entry.env.elbs.first())
        .unwrap_or_else(|| panic!("ELB settings should load"));
    assert_eq!(elb.port_mappings, [(80, 80), (443, 443)]);
    assert_eq!(elb.stack_output_keys.vpc_id, "PcfVpc");
}

#[test]
fn aws_optional_sections_default() {
    let settings = load("aws-no-elb.yml");
    let Some(VmConfig::Aws(entry)) = settings.configs().first() else {
        panic!("entry should be AWS");
    };
    assert!(entry.env.elbs.is_empty());
    assert!(entry.env.parameters.is_empty());
    assert!(entry.env.outputs.subnets.is_empty());
    assert_eq!(entry.env.outputs.s3_bucket_name, None);
}

#[test]
fn openstack_entry_keeps_security_groups() {
    let settings = load("openstack.yml");
    let Some(VmConfig::Openstack(entry)) = settings.configs().first() else {
        panic!("entry should be OpenStack");
    };
    assert_eq!(entry.creds.tenant, "tenant");
    assert_eq!(entry.vm.security_group_names.len(), 3);
    assert_eq!(entry.vm.private_ip, "192.168.100.100");
}
