//! # Sync Integration Tests
//!
//! End-to-end runs of dump, diff and apply against the in-memory gateway.

mod common;

use common::{object, FakeGateway};
use gateway_sync::dump::{dump, DumpOptions};
use gateway_sync::entities::{Consumer, Route, Service, Target};
use gateway_sync::file::{build_state, LoadOptions, StateFile};
use gateway_sync::{AdminApi, EntityType, SyncError, SyncReport, SyncResult, Syncer};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const BASIC: &str = r#"
services:
  - name: svc1
    url: http://backend.internal:8080/v1
    routes:
      - name: r1
        paths: ["/svc1"]
    plugins:
      - name: cors
        config:
          origins: ["*"]
consumers:
  - username: alice
    keyauth_credentials:
      - key: alice-key
"#;

fn options(select_tags: &[&str]) -> LoadOptions {
    LoadOptions {
        select_tags: select_tags.iter().map(|t| t.to_string()).collect(),
        ..Default::default()
    }
}

async fn syncer_for(gateway: &Arc<FakeGateway>, yaml: &str, load: &LoadOptions) -> SyncResult<Syncer> {
    let target = build_state(vec![StateFile::parse(yaml, false)?], load)?;
    let current = dump(
        gateway.as_ref(),
        None,
        &DumpOptions {
            select_tags: load.select_tags.clone(),
            skip_consumers: load.skip_consumers,
        },
    )
    .await?;
    let api: Arc<dyn AdminApi> = gateway.clone();
    Ok(Syncer::new(current, target, api))
}

async fn sync(gateway: &Arc<FakeGateway>, yaml: &str, load: &LoadOptions) -> SyncResult<SyncReport> {
    let mut syncer = syncer_for(gateway, yaml, load).await?;
    syncer.run(&CancellationToken::new()).await
}

fn position(gateway: &FakeGateway, method: &str, prefix: &str) -> usize {
    gateway
        .writes()
        .iter()
        .position(|r| r.method == method && r.path.starts_with(prefix))
        .unwrap_or_else(|| panic!("no {} {} in {:?}", method, prefix, gateway.writes()))
}

/// Position of a request on a top-level member path, `/{collection}/{id}`
fn member_position(gateway: &FakeGateway, method: &str, collection: &str) -> usize {
    gateway
        .writes()
        .iter()
        .position(|r| {
            let segments: Vec<&str> = r.path.trim_start_matches('/').split('/').collect();
            r.method == method && segments.len() == 2 && segments[0] == collection
        })
        .unwrap_or_else(|| panic!("no {} /{}/{{id}} in {:?}", method, collection, gateway.writes()))
}

/// Stored object without the fields the gateway assigns
fn without_generated(mut object: Value) -> Value {
    if let Some(map) = object.as_object_mut() {
        for field in ["id", "created_at", "updated_at"] {
            map.remove(field);
        }
    }
    object
}

#[tokio::test]
async fn test_initial_sync_creates_parents_first() {
    let gateway = Arc::new(FakeGateway::new());

    let report = sync(&gateway, BASIC, &options(&[])).await.unwrap();

    assert_eq!(report.created, 5);
    assert_eq!(report.updated + report.deleted, 0);
    assert!(position(&gateway, "POST", "/services") < position(&gateway, "POST", "/routes"));
    assert!(position(&gateway, "POST", "/consumers") < position(&gateway, "POST", "/consumers/alice/key-auth"));
    assert!(position(&gateway, "POST", "/routes") < position(&gateway, "POST", "/plugins"));

    let service = gateway.find("services", "svc1").unwrap();
    assert_eq!(service["host"], "backend.internal");
    assert_eq!(service["port"], 8080);
    assert_eq!(service["path"], "/v1");

    // children carry the ID the gateway assigned to their parent
    let service_id = service["id"].as_str().unwrap();
    let route = gateway.find("routes", "r1").unwrap();
    assert_eq!(route["service"]["id"], service_id);
    let plugin = &gateway.all("plugins")[0];
    assert_eq!(plugin["service"]["id"], service_id);
    assert!(plugin["service"].get("name").is_none());
}

#[tokio::test]
async fn test_second_run_is_a_no_op() {
    let gateway = Arc::new(FakeGateway::new());
    sync(&gateway, BASIC, &options(&[])).await.unwrap();
    gateway.clear_requests();

    let report = sync(&gateway, BASIC, &options(&[])).await.unwrap();

    assert!(report.is_empty(), "unexpected changes: {}", report);
    assert!(gateway.writes().is_empty());
}

#[tokio::test]
async fn test_changed_field_updates_in_place() {
    let gateway = Arc::new(FakeGateway::new());
    sync(&gateway, BASIC, &options(&[])).await.unwrap();
    let service_id = gateway.find("services", "svc1").unwrap()["id"].as_str().unwrap().to_string();
    gateway.clear_requests();

    let changed = BASIC.replace("backend.internal", "backend.example");
    let report = sync(&gateway, &changed, &options(&[])).await.unwrap();

    assert_eq!((report.created, report.updated, report.deleted), (0, 1, 0));
    let writes = gateway.writes();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].method, "PATCH");
    assert_eq!(writes[0].path, format!("/services/{}", service_id));
    assert_eq!(gateway.find("services", "svc1").unwrap()["host"], "backend.example");
}

#[tokio::test]
async fn test_removed_entities_are_deleted_children_first() {
    let gateway = Arc::new(FakeGateway::new());
    sync(&gateway, BASIC, &options(&[])).await.unwrap();
    gateway.clear_requests();

    let report = sync(&gateway, "_format_version: \"3.0\"\n", &options(&[])).await.unwrap();

    assert_eq!(report.deleted, 5);
    assert!(position(&gateway, "DELETE", "/plugins/") < position(&gateway, "DELETE", "/routes/"));
    assert!(position(&gateway, "DELETE", "/routes/") < position(&gateway, "DELETE", "/services/"));
    assert!(position(&gateway, "DELETE", "/consumers/alice/key-auth/") < member_position(&gateway, "DELETE", "consumers"));
    assert!(gateway.all("services").is_empty());
}

#[tokio::test]
async fn test_timestamps_alone_do_not_cause_updates() {
    let gateway = Arc::new(FakeGateway::new());
    gateway.seed(
        "services",
        json!({
            "name": "svc1", "host": "a.internal", "port": 80, "protocol": "http",
            "retries": 5, "connect_timeout": 60000, "read_timeout": 60000,
            "write_timeout": 60000, "enabled": true,
            "created_at": 1, "updated_at": 2
        }),
    );

    let report = sync(&gateway, "services: [{name: svc1, host: a.internal}]", &options(&[]))
        .await
        .unwrap();

    assert!(report.is_empty(), "unexpected changes: {}", report);
}

#[tokio::test]
async fn test_stale_consumer_id_is_replaced() {
    let gateway = Arc::new(FakeGateway::new());
    gateway.seed("consumers", object(&[("id", json!("old-id")), ("username", json!("alice"))]));

    let report = sync(
        &gateway,
        "consumers: [{id: new-id, username: alice}]",
        &options(&[]),
    )
    .await
    .unwrap();

    assert_eq!((report.created, report.deleted), (1, 1));
    let writes = gateway.writes();
    assert_eq!(writes[0].method, "DELETE");
    assert_eq!(writes[0].path, "/consumers/old-id");
    assert_eq!(writes[1].method, "PUT");
    assert_eq!(writes[1].path, "/consumers/new-id");
    assert_eq!(gateway.find("consumers", "alice").unwrap()["id"], "new-id");
}

#[tokio::test]
async fn test_select_tags_limit_the_managed_set() {
    let gateway = Arc::new(FakeGateway::new());
    gateway.seed("services", json!({"name": "legacy", "host": "old.internal"}));

    let managed = options(&["managed"]);
    let report = sync(&gateway, "services: [{name: svc1, host: a.internal}]", &managed)
        .await
        .unwrap();

    assert_eq!(report.created, 1);
    assert_eq!(report.deleted, 0);
    assert!(gateway.find("services", "legacy").is_some());
    assert_eq!(gateway.find("services", "svc1").unwrap()["tags"], json!(["managed"]));

    // the tag filter reaches the list calls
    assert!(gateway
        .requests()
        .iter()
        .any(|r| r.method == "GET" && r.path == "/services" && r.body["tags"] == json!(["managed"])));

    gateway.clear_requests();
    let again = sync(&gateway, "services: [{name: svc1, host: a.internal}]", &managed)
        .await
        .unwrap();
    assert!(again.is_empty());
}

#[tokio::test]
async fn test_credentials_are_identified_per_consumer() {
    let gateway = Arc::new(FakeGateway::new());
    let yaml = r#"
consumers:
  - username: alice
    acls: [{group: admins}]
  - username: bob
    acls: [{group: admins}]
"#;

    let report = sync(&gateway, yaml, &options(&[])).await.unwrap();
    assert_eq!(report.created, 4);
    assert_eq!(gateway.all("acls").len(), 2);

    let again = sync(&gateway, yaml, &options(&[])).await.unwrap();
    assert!(again.is_empty(), "unexpected changes: {}", again);

    // dropping bob's ACL removes exactly that one
    let without_bob = r#"
consumers:
  - username: alice
    acls: [{group: admins}]
  - username: bob
"#;
    let report = sync(&gateway, without_bob, &options(&[])).await.unwrap();
    assert_eq!((report.created, report.updated, report.deleted), (0, 0, 1));
    let bob_id = gateway.find("consumers", "bob").unwrap()["id"].clone();
    assert!(gateway.all("acls").iter().all(|acl| acl["consumer"]["id"] != bob_id));
}

#[tokio::test]
async fn test_target_change_recreates() {
    let gateway = Arc::new(FakeGateway::new());
    let yaml = "upstreams: [{name: backend, targets: [{target: '10.0.0.1:80', weight: 100}]}]";
    sync(&gateway, yaml, &options(&[])).await.unwrap();
    gateway.clear_requests();

    let report = sync(&gateway, &yaml.replace("weight: 100", "weight: 50"), &options(&[]))
        .await
        .unwrap();

    assert_eq!(report.updated, 1);
    let methods: Vec<String> = gateway.writes().iter().map(|r| r.method.clone()).collect();
    assert_eq!(methods, vec!["DELETE", "PUT"]);
    assert_eq!(gateway.all("targets")[0]["weight"], 50);
}

#[tokio::test]
async fn test_first_error_aborts_the_run() {
    let gateway = Arc::new(FakeGateway::new());
    gateway.fail_on("POST", "/routes");

    let mut syncer = syncer_for(&gateway, BASIC, &options(&[])).await.unwrap();
    let err = syncer.run(&CancellationToken::new()).await.unwrap_err();

    match &err {
        SyncError::Operation {
            entity_type, source, ..
        } => {
            assert_eq!(*entity_type, EntityType::Route);
            assert!(matches!(**source, SyncError::Api { status: 500, .. }));
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(err.to_string().contains("boom"));

    // services went through, nothing after the failing route did
    assert_eq!(gateway.all("services").len(), 1);
    assert!(gateway.all("plugins").is_empty());
    assert!(gateway.all("consumers").is_empty());
    assert_eq!(syncer.current().get_all::<Service>().len(), 1);
    assert!(syncer.current().get_all::<Route>().is_empty());
}

#[tokio::test]
async fn test_cancellation_stops_between_changes() {
    let gateway = Arc::new(FakeGateway::new());
    let cancel = CancellationToken::new();
    gateway.cancel_after(1, cancel.clone());

    let yaml = "services: [{name: a, host: a}, {name: b, host: b}, {name: c, host: c}]";
    let mut syncer = syncer_for(&gateway, yaml, &options(&[])).await.unwrap();
    let err = syncer.run(&cancel).await.unwrap_err();

    assert!(matches!(err, SyncError::Cancelled));
    assert_eq!(gateway.all("services").len(), 1);
    // the current state mirrors exactly what completed
    let mirrored = syncer.current().get_all::<Service>();
    assert_eq!(mirrored.len(), 1);
    assert_eq!(mirrored[0].id.as_deref(), gateway.all("services")[0]["id"].as_str());
}

#[tokio::test]
async fn test_dry_run_touches_nothing() {
    let gateway = Arc::new(FakeGateway::new());
    gateway.seed("consumers", json!({"username": "stale"}));

    let mut syncer = syncer_for(&gateway, BASIC, &options(&[])).await.unwrap().dry_run(true);
    let report = syncer.run(&CancellationToken::new()).await.unwrap();

    assert!(report.dry_run);
    assert_eq!((report.created, report.deleted), (5, 1));
    assert!(gateway.writes().is_empty());

    // synthesized IDs still link children to parents
    let current = syncer.current();
    let service: Service = current.get("svc1").unwrap();
    let route: Route = current.get("r1").unwrap();
    assert!(service.id.is_some());
    assert_eq!(route.service.unwrap().id, service.id);
    assert!(current.get::<Consumer>("stale").is_err());
}

#[tokio::test]
async fn test_report_lists_events_in_order() {
    let gateway = Arc::new(FakeGateway::new());
    let report = sync(&gateway, BASIC, &options(&[])).await.unwrap();

    let text = report.to_string();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "creating service svc1");
    assert_eq!(lines[1], "creating route r1");
    assert!(text.contains("Created: 5"));

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["events"][0]["op"], "create");
    assert_eq!(json["events"][0]["entity_type"], "service");
}

#[tokio::test]
async fn test_dropped_fields_are_cleared_and_converge() {
    let gateway = Arc::new(FakeGateway::new());
    sync(
        &gateway,
        "services: [{name: svc1, host: a.internal, path: /v1, tags: [old]}]",
        &options(&[]),
    )
    .await
    .unwrap();

    let trimmed = "services: [{name: svc1, host: a.internal}]";
    let report = sync(&gateway, trimmed, &options(&[])).await.unwrap();
    assert_eq!(report.updated, 1);
    let service = gateway.find("services", "svc1").unwrap();
    assert!(service["path"].is_null());
    assert!(service["tags"].is_null());

    gateway.clear_requests();
    let again = sync(&gateway, trimmed, &options(&[])).await.unwrap();
    assert!(again.is_empty(), "unexpected changes: {}", again);
    assert!(gateway.writes().is_empty());
}

#[tokio::test]
async fn test_username_and_custom_id_are_separate_keys() {
    let gateway = Arc::new(FakeGateway::new());
    gateway.seed("consumers", json!({"username": "alice"}));
    gateway.seed("consumers", json!({"custom_id": "alice"}));

    let current = dump(gateway.as_ref(), None, &DumpOptions::default()).await.unwrap();
    assert_eq!(current.get_all::<Consumer>().len(), 2);

    let report = sync(
        &gateway,
        "consumers: [{username: alice}, {custom_id: alice}]",
        &options(&[]),
    )
    .await
    .unwrap();
    assert!(report.is_empty(), "unexpected changes: {}", report);
}

#[tokio::test]
async fn test_failed_recreate_keeps_the_completed_delete() {
    let gateway = Arc::new(FakeGateway::new());
    let yaml = "upstreams: [{name: backend, targets: [{target: '10.0.0.1:80', weight: 100}]}]";
    sync(&gateway, yaml, &options(&[])).await.unwrap();
    gateway.fail_on("PUT", "/upstreams/backend/targets/");

    let changed = yaml.replace("weight: 100", "weight: 50");
    let mut syncer = syncer_for(&gateway, &changed, &options(&[])).await.unwrap();
    let err = syncer.run(&CancellationToken::new()).await.unwrap_err();

    assert!(matches!(err, SyncError::Operation { entity_type: EntityType::Target, .. }));
    assert!(gateway.all("targets").is_empty());
    // the delete went through, so the current state no longer holds the target
    assert!(syncer.current().get_all::<Target>().is_empty());
}

#[tokio::test]
async fn test_upsert_matches_delete_and_recreate() {
    let before = "services: [{name: svc1, host: a.internal, routes: [{name: r1, paths: [/a]}]}]";
    let after = "services: [{name: svc1, host: a.internal, routes: [{name: r1, paths: [/b], strip_path: false}]}]";

    let upserted = Arc::new(FakeGateway::new());
    sync(&upserted, before, &options(&[])).await.unwrap();
    upserted.clear_requests();
    let report = sync(&upserted, after, &options(&[])).await.unwrap();
    assert_eq!((report.created, report.updated, report.deleted), (0, 1, 0));
    assert_eq!(upserted.writes()[0].method, "PUT");

    let recreated = Arc::new(FakeGateway::new());
    sync(&recreated, before, &options(&[])).await.unwrap();
    let route_id = recreated.find("routes", "r1").unwrap()["id"].as_str().unwrap().to_string();
    recreated.delete(&format!("/routes/{}", route_id)).await.unwrap();
    let report = sync(&recreated, after, &options(&[])).await.unwrap();
    assert_eq!((report.created, report.updated, report.deleted), (1, 0, 0));

    assert_eq!(
        without_generated(upserted.find("routes", "r1").unwrap()),
        without_generated(recreated.find("routes", "r1").unwrap())
    );
}
