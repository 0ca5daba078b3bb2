//! The bundled sample stacks plan and apply cleanly.

use std::path::PathBuf;

use stackweave::{
    ApplyPlan, AttributeValue, ConfigParser, ConfigValidator, EchoProvider, LocalManifestStore,
    ManifestStore, NodeError, NodeStatus, Reconciler, ResourceId, StackConfig,
};
use tempfile::TempDir;

fn stacks_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("stacks")
}

fn load(name: &str) -> StackConfig {
    let config = ConfigParser::new()
        .load_file(stacks_dir().join(name))
        .expect("sample stack parses");
    let result = ConfigValidator::new().validate(&config).expect("sample stack is valid");
    assert!(result.is_valid());
    config
}

fn wave_ids(plan: &ApplyPlan) -> Vec<Vec<String>> {
    plan.waves
        .iter()
        .map(|wave| wave.iter().map(|e| e.id.to_string()).collect())
        .collect()
}

async fn object_call_count(provider: &EchoProvider, target: &str) -> usize {
    let prefix = format!("{target}/");
    provider
        .calls()
        .await
        .iter()
        .filter(|c| c.id.as_str().starts_with(&prefix))
        .count()
}

#[tokio::test]
async fn static_website_uploads_after_policy() {
    let config = load("static-website.yaml");
    let temp = TempDir::new().expect("temp dir");
    let store = LocalManifestStore::with_base_dir(temp.path());
    let provider = EchoProvider::new();

    let prepared = Reconciler::new(&config, &store, &provider)
        .with_base_dir(stacks_dir())
        .prepare()
        .await
        .expect("plan");

    assert_eq!(
        wave_ids(&prepared.plan),
        vec![
            vec!["site-bucket"],
            vec![
                "site-ownership-controls",
                "site-public-access-block",
                "site-versioning",
                "site-website-configuration",
            ],
            vec!["site-acl"],
            vec!["site-policy"],
            vec![
                "website/css/site.css",
                "website/error.html",
                "website/index.html",
            ],
        ]
    );
    assert!(prepared.plan.delete_waves.is_empty());
}

#[tokio::test]
async fn web_server_layers_network_before_instance() {
    let config = load("web-server.yaml");
    let temp = TempDir::new().expect("temp dir");
    let store = LocalManifestStore::with_base_dir(temp.path());
    let provider = EchoProvider::new();

    let prepared = Reconciler::new(&config, &store, &provider)
        .with_base_dir(stacks_dir())
        .prepare()
        .await
        .expect("plan");

    assert_eq!(
        wave_ids(&prepared.plan),
        vec![
            vec!["instance-role", "server-bucket", "vpc"],
            vec![
                "instance-profile",
                "internet-gateway",
                "public-subnet-01",
                "security-group",
                "server-config/configure.sh",
            ],
            vec!["instance", "public-route-table-01"],
            vec!["route-table-association-01"],
        ]
    );
}

#[tokio::test]
async fn second_apply_uploads_nothing() {
    for (stack, target, objects) in [
        ("static-website.yaml", "website", 3),
        ("web-server.yaml", "server-config", 1),
    ] {
        let config = load(stack);
        let temp = TempDir::new().expect("temp dir");
        let store = LocalManifestStore::with_base_dir(temp.path());

        let first = EchoProvider::new();
        let outcome = Reconciler::new(&config, &store, &first)
            .with_base_dir(stacks_dir())
            .apply()
            .await
            .expect("first apply");
        assert!(outcome.success(), "{stack}: {outcome}");
        assert_eq!(outcome.saved_manifests, vec![target.to_string()]);
        assert_eq!(object_call_count(&first, target).await, objects);

        let stored = store.load(target).await.expect("readable").expect("saved");
        assert_eq!(stored.len(), objects);

        let second = EchoProvider::new();
        let outcome = Reconciler::new(&config, &store, &second)
            .with_base_dir(stacks_dir())
            .apply()
            .await
            .expect("second apply");
        assert!(outcome.success(), "{stack}: {outcome}");
        assert_eq!(object_call_count(&second, target).await, 0);
        assert_eq!(second.call_count().await, config.resources.len());
    }
}

#[tokio::test]
async fn failed_script_upload_keeps_instance_down() {
    let config = load("web-server.yaml");
    let temp = TempDir::new().expect("temp dir");
    let store = LocalManifestStore::with_base_dir(temp.path());
    let provider = EchoProvider::new().failing_on("server-config/configure.sh");

    let outcome = Reconciler::new(&config, &store, &provider)
        .with_base_dir(stacks_dir())
        .apply()
        .await
        .expect("apply");
    let report = outcome.report.as_ref().expect("executed");

    assert_eq!(
        report.status_of(&"server-config/configure.sh".into()),
        Some(NodeStatus::Failed)
    );
    let instance = report.result(&"instance".into()).expect("recorded");
    assert_eq!(instance.status, NodeStatus::Skipped);
    assert_eq!(
        instance.error.as_ref().and_then(NodeError::failed_ancestor),
        Some(&ResourceId::from("server-config/configure.sh"))
    );
    assert_eq!(report.status_of(&"route-table-association-01".into()), Some(NodeStatus::Applied));
    assert_eq!(outcome.kept_manifests, vec![String::from("server-config")]);
}

#[tokio::test]
async fn user_data_names_the_config_bucket() {
    let config = load("web-server.yaml");
    let temp = TempDir::new().expect("temp dir");
    let store = LocalManifestStore::with_base_dir(temp.path());
    let provider = EchoProvider::new();

    let outcome = Reconciler::new(&config, &store, &provider)
        .with_base_dir(stacks_dir())
        .apply()
        .await
        .expect("apply");
    let instance = outcome
        .report
        .as_ref()
        .and_then(|report| report.result(&"instance".into()))
        .expect("recorded");

    let user_data = instance
        .outputs
        .as_ref()
        .and_then(|outputs| outputs.get("user_data"))
        .and_then(AttributeValue::as_str)
        .expect("interpolated user data");
    assert!(user_data.contains(r#"aws s3 cp "s3://my-website-server-bucket/configure.sh""#));
    assert!(!user_data.contains("${"));
}
