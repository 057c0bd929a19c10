//! Integration tests running the engine against the Azure CLI provisioner.
//!
//! The `az` tool is replaced by a mock runner keyed on deployment names.

use std::sync::Arc;

use serde_json::{json, Value};
use tessera_core::{InstanceStatus, RunCoordinator, RunMode, RunOptions};
use tessera_iac::{AzCliProvisioner, AzureTarget, ModuleCatalog};
use tessera_runner::{MockResponse, MockRunner};
use tessera_spec::{DocumentFormat, DocumentReader, ParameterSet, TemplateDocument};

const DOCUMENT: &str = r#"
name: vault-and-cosmos
resources:
  - id: vault
    kind: key_vault
    params:
      name: kv-dev
    outputs: [name, uri]
  - id: account
    kind: cosmos_account
    params:
      name: cosmos-dev
      keyVaultUri: "{{ ref.vault.uri }}"
    outputs: [name]
  - id: database
    kind: cosmos_sql_database
    params:
      name: appdb
      accountName: "{{ ref.account.name }}"
    outputs: [name]
  - id: grant
    kind: role_assignment
    scope: subscription
    params:
      principal: "{{ ref.vault.name }}"
"#;

fn document() -> TemplateDocument {
    DocumentReader::parse(DOCUMENT, DocumentFormat::Yaml).unwrap()
}

fn deployment(outputs: Value) -> MockResponse {
    let wrapped: serde_json::Map<String, Value> = outputs
        .as_object()
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .map(|(name, value)| (name, json!({ "type": "String", "value": value })))
        .collect();
    MockResponse::json(&json!({ "properties": { "outputs": wrapped } }))
}

fn coordinator(runner: &MockRunner, options: RunOptions) -> RunCoordinator {
    let catalog = Arc::new(ModuleCatalog::azure("modules"));
    let registry = Arc::new(catalog.registry());
    let provisioner = AzCliProvisioner::new(
        Arc::new(runner.clone()),
        catalog,
        AzureTarget::new("westeurope").resource_group("rg-dev"),
    )
    .with_prefix("tessera-dev");

    RunCoordinator::new(registry, Arc::new(provisioner)).with_options(options)
}

fn scripted_runner() -> MockRunner {
    MockRunner::new()
        .when(
            &["create", "tessera-dev-vault"],
            deployment(json!({ "name": "kv-dev", "uri": "https://kv-dev.vault.azure.net/" })),
        )
        .when(&["create", "tessera-dev-account"], deployment(json!({ "name": "cosmos-dev" })))
        .when(&["create", "tessera-dev-database"], deployment(json!({ "name": "appdb" })))
        .when(&["create", "tessera-dev-grant"], deployment(json!({})))
}

fn inline_params(runner: &MockRunner, needles: &[&str]) -> Value {
    let calls = runner.calls_with(needles);
    assert_eq!(calls.len(), 1, "expected one call matching {:?}", needles);
    serde_json::from_str(calls[0].flag_value("--parameters").unwrap()).unwrap()
}

#[tokio::test]
async fn test_apply_threads_outputs_into_dependents() {
    let runner = scripted_runner();
    let report = coordinator(&runner, RunOptions::new())
        .run(&document(), &ParameterSet::default())
        .await
        .unwrap();

    assert!(report.success, "{}", report.render_text());
    assert_eq!(report.count(InstanceStatus::Applied), 4);

    let account = inline_params(&runner, &["create", "tessera-dev-account"]);
    assert_eq!(account["keyVaultUri"]["value"], "https://kv-dev.vault.azure.net/");

    let database = inline_params(&runner, &["create", "tessera-dev-database"]);
    assert_eq!(database["accountName"]["value"], "cosmos-dev");

    // Every active instance is validated once before anything is created
    assert_eq!(runner.calls_with(&["validate"]).len(), 4);

    let grant = runner.calls_with(&["create", "tessera-dev-grant"]);
    assert!(grant[0].has_args(&["deployment", "sub"]));
    assert_eq!(grant[0].flag_value("--location"), Some("westeurope"));
}

#[tokio::test]
async fn test_failed_create_blocks_dependents() {
    // Rules match in order, so the failing rule comes first
    let runner = MockRunner::new()
        .when(
            &["create", "tessera-dev-account"],
            MockResponse::failure(1, r#"ERROR: {"code": "Conflict", "message": "Account name taken"}"#),
        )
        .when(
            &["create", "tessera-dev-vault"],
            deployment(json!({ "name": "kv-dev", "uri": "https://kv-dev.vault.azure.net/" })),
        )
        .when(&["create", "tessera-dev-grant"], deployment(json!({})));

    let report = coordinator(&runner, RunOptions::new().skip_validate(true))
        .run(&document(), &ParameterSet::default())
        .await
        .unwrap();

    assert!(!report.success);
    assert_eq!(report.status_of("account"), Some(InstanceStatus::Failed));
    assert_eq!(report.status_of("database"), Some(InstanceStatus::Blocked));
    assert_eq!(report.status_of("grant"), Some(InstanceStatus::Applied));
    assert!(runner.calls_with(&["tessera-dev-database"]).is_empty());

    let account = report
        .instances
        .iter()
        .find(|i| i.id.template == "account")
        .unwrap();
    assert_eq!(account.error.as_deref(), Some("[Conflict] Account name taken"));
}

#[tokio::test]
async fn test_what_if_never_creates() {
    let changes = MockResponse::json(&json!({
        "status": "Succeeded",
        "changes": [{ "changeType": "Create", "resourceId": "/subscriptions/s/resourceGroups/rg-dev/x" }]
    }));
    let runner = MockRunner::new().when(&["what-if"], changes);

    let report = coordinator(&runner, RunOptions::new().mode(RunMode::WhatIf))
        .run(&document(), &ParameterSet::default())
        .await
        .unwrap();

    assert!(report.success);
    assert_eq!(report.count(InstanceStatus::Planned), 4);
    assert!(runner.calls_with(&["create"]).is_empty());
    assert_eq!(runner.calls_with(&["what-if"]).len(), 4);

    // Unknown upstream outputs are passed as placeholders
    let account = inline_params(&runner, &["what-if", "tessera-dev-account"]);
    assert_eq!(
        account["keyVaultUri"]["value"],
        "(known after apply: vault.uri)"
    );
}

#[tokio::test]
async fn test_validation_errors_abort_before_create() {
    let runner = scripted_runner().when(
        &["validate", "tessera-dev-database"],
        MockResponse::failure(
            1,
            r#"ERROR: {"code": "InvalidTemplateDeployment", "message": "invalid", "details": [{"code": "InvalidThroughput", "message": "Throughput must be at least 400"}]}"#,
        ),
    );

    let err = coordinator(&runner, RunOptions::new())
        .run(&document(), &ParameterSet::default())
        .await
        .unwrap_err();

    match err {
        tessera_core::CoreError::Validation(failure) => {
            assert_eq!(
                failure.lines(),
                vec!["database: [InvalidThroughput] Throughput must be at least 400".to_string()]
            );
        }
        other => panic!("expected validation failure, got {:?}", other),
    }
    assert!(runner.calls_with(&["create"]).is_empty());
}
