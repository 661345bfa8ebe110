//! Dispatcher routing across backends, driven through recording adapters.

#[path = "shepherd/test_doubles.rs"]
mod test_doubles;

use camino::{Utf8Path, Utf8PathBuf};
use rstest::rstest;
use test_doubles::RecordingFactory;
use vmherd::settings::ShepherdSettings;
use vmherd::shepherd::{Shepherd, ShepherdError};

fn settings(name: &str) -> ShepherdSettings {
    let path = Utf8Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name);
    ShepherdSettings::from_path(&path)
        .unwrap_or_else(|err| panic!("fixture {name} should load: {err}"))
}

fn shepherd(name: &str, factory: &RecordingFactory) -> Shepherd<RecordingFactory> {
    Shepherd::new(settings(name), factory.clone())
}

fn paths(raw: &[&str]) -> Vec<Utf8PathBuf> {
    raw.iter().copied().map(Utf8PathBuf::from).collect()
}

#[rstest]
#[case::too_few("vcloud.yml", &["only.ova"])]
#[case::too_many("vsphere.yml", &["a.ova", "b.ova"])]
#[case::none("openstack.yml", &[])]
#[tokio::test]
async fn deploy_rejects_mismatched_paths_before_any_backend(
    #[case] fixture: &str,
    #[case] raw: &[&str],
) {
    let factory = RecordingFactory::new();
    let expected = settings(fixture).len();

    let err = shepherd(fixture, &factory)
        .deploy(&paths(raw))
        .await
        .expect_err("arity mismatch should be rejected");

    assert_eq!(
        err,
        ShepherdError::ArityMismatch {
            expected,
            actual: raw.len(),
        }
    );
    assert_eq!(factory.builds(), 0);
    assert!(factory.calls().is_empty());
}

#[tokio::test]
async fn deploy_pairs_paths_with_entries_in_order() {
    let factory = RecordingFactory::new();
    shepherd("vcloud.yml", &factory)
        .deploy(&paths(&["first.ova", "second.ova"]))
        .await
        .unwrap_or_else(|err| panic!("deploy failed: {err}"));

    assert_eq!(
        factory.calls(),
        [
            "vcloud[USER@ORGANIZATION/VDC_NAME] deploy first.ova VAPP_NAME 192.168.0.10 CATALOG_NAME NETWORK_NAME",
            "vcloud[USER-2@ORGANIZATION-2/VDC_NAME-2] deploy second.ova VAPP_NAME-2 192.168.0.11 CATALOG_NAME-2 NETWORK_NAME-2",
        ]
    );
    assert_eq!(factory.builds(), 2);
}

#[tokio::test]
async fn deploy_routes_each_entry_to_its_backend() {
    let factory = RecordingFactory::new();
    shepherd("mixed.yml", &factory)
        .deploy(&paths(&["ops.tgz", "ops.ova", "ami.yml", "ops.qcow2"]))
        .await
        .unwrap_or_else(|err| panic!("deploy failed: {err}"));

    assert_eq!(
        factory.calls(),
        [
            "vcloud[USER@ORGANIZATION/VDC_NAME] deploy ops.tgz VAPP_NAME 192.168.0.10 CATALOG_NAME NETWORK_NAME",
            "vsphere[vcenter.example.com/DATACENTER] deploy ops.ova 10.0.0.10 CLUSTER/RESOURCE_POOL",
            "aws[pcf-stack/us-east-1] deploy ami.yml ops-manager bosh",
            "openstack[http://example.com/version/tokens] deploy ops.qcow2 some-vm-name 192.168.100.100",
        ]
    );
}

#[tokio::test]
async fn first_failure_stops_the_walk() {
    let factory = RecordingFactory::failing_on(
        "vsphere[vcenter.example.com/DATACENTER] destroy 10.0.0.10 RESOURCE_POOL",
    );

    let err = shepherd("mixed.yml", &factory)
        .destroy()
        .await
        .expect_err("scripted failure should propagate");

    assert!(matches!(err, ShepherdError::Vsphere(_)), "{err:?}");
    assert_eq!(
        factory.calls(),
        [
            "vcloud[USER@ORGANIZATION/VDC_NAME] destroy [\"VAPP_NAME\"] CATALOG_NAME",
            "vsphere[vcenter.example.com/DATACENTER] destroy 10.0.0.10 RESOURCE_POOL",
        ]
    );
}

#[rstest]
#[case::vcloud("vcloud.yml", vec![
    "vcloud[USER@ORGANIZATION/VDC_NAME] destroy [\"VAPP_NAME\"] CATALOG_NAME",
    "vcloud[USER-2@ORGANIZATION-2/VDC_NAME-2] destroy [\"VAPP_NAME-2\"] CATALOG_NAME-2",
])]
#[case::aws("aws.yml", vec![
    "aws[pcf-stack/us-east-1] destroy ops-manager",
    "aws[pcf-stack/us-east-1] destroy ops-manager-2",
])]
#[case::openstack("openstack.yml", vec![
    "openstack[http://example.com/version/tokens] destroy some-vm-name",
    "openstack[http://example.com/version/tokens-2] destroy some-vm-name-2",
])]
#[tokio::test]
async fn destroy_visits_every_entry(#[case] fixture: &str, #[case] expected: Vec<&str>) {
    let factory = RecordingFactory::new();
    shepherd(fixture, &factory)
        .destroy()
        .await
        .unwrap_or_else(|err| panic!("destroy failed: {err}"));

    assert_eq!(factory.calls(), expected);
}

#[tokio::test]
async fn vcloud_clean_uses_product_settings() {
    let factory = RecordingFactory::new();
    shepherd("vcloud.yml", &factory)
        .clean_environment()
        .await
        .unwrap_or_else(|err| panic!("clean failed: {err}"));

    assert_eq!(
        factory.calls(),
        [
            "vcloud[USER@ORGANIZATION/VDC_NAME] clean [\"p-bosh\", \"cf\"] PRODUCT_CATALOG",
            "vcloud[USER-2@ORGANIZATION-2/VDC_NAME-2] clean [] CATALOG_NAME-2",
        ]
    );
}

#[tokio::test]
async fn vsphere_clean_binds_to_cleanup_datacenter() {
    let factory = RecordingFactory::new();
    shepherd("vsphere.yml", &factory)
        .clean_environment()
        .await
        .unwrap_or_else(|err| panic!("clean failed: {err}"));

    assert_eq!(
        factory.calls(),
        ["vsphere[vcenter.example.com/CLEANUP_DATACENTER] clean [\"pcf\"] [\"DATASTORE\"]"]
    );
}

#[tokio::test]
async fn clean_requires_vsphere_cleanup_before_acting() {
    let factory = RecordingFactory::new();

    let err = shepherd("mixed.yml", &factory)
        .clean_environment()
        .await
        .expect_err("missing cleanup section should be rejected");

    assert_eq!(err, ShepherdError::MissingCleanup { index: 1 });
    assert_eq!(factory.builds(), 0);
}

#[tokio::test]
async fn prepare_runs_once_per_aws_environment() {
    let factory = RecordingFactory::new();
    shepherd("aws.yml", &factory)
        .prepare_environment()
        .await
        .unwrap_or_else(|err| panic!("prepare failed: {err}"));

    assert_eq!(
        factory.calls(),
        ["aws[pcf-stack/us-east-1] prepare cloudformation.json"]
    );
    assert_eq!(factory.builds(), 1);
}

#[tokio::test]
async fn clean_runs_once_per_aws_environment() {
    let factory = RecordingFactory::new();
    shepherd("aws.yml", &factory)
        .clean_environment()
        .await
        .unwrap_or_else(|err| panic!("clean failed: {err}"));

    assert_eq!(factory.calls(), ["aws[pcf-stack/us-east-1] clean"]);
    assert_eq!(factory.builds(), 1);
}

#[tokio::test]
async fn aws_vm_verbs_still_run_per_entry() {
    let factory = RecordingFactory::new();
    shepherd("aws.yml", &factory)
        .deploy(&paths(&["ami.yml", "ami.yml"]))
        .await
        .unwrap_or_else(|err| panic!("deploy failed: {err}"));

    assert_eq!(factory.builds(), 2);
}

#[tokio::test]
async fn prepare_reaches_every_backend() {
    let factory = RecordingFactory::new();
    shepherd("mixed.yml", &factory)
        .prepare_environment()
        .await
        .unwrap_or_else(|err| panic!("prepare failed: {err}"));

    assert_eq!(factory.builds(), 4);
    assert!(factory.calls().iter().all(|call| call.contains(" prepare")));
}
