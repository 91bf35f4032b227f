//! End-to-end reconciliation scenarios driven through the fake engine.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tokio_util::sync::CancellationToken;

use stevedore_lib::compose::{parse_composition, Composition, HealthCheck, Service};
use stevedore_lib::engine::fake::{EngineOp, FakeEngine};
use stevedore_lib::engine::{labels, HealthStatus};
use stevedore_lib::reconcile::{apply, ApplyError};

const PROJECT: &str = "demo";

fn service(image: &str) -> Service {
  Service {
    image: image.to_string(),
    ..Default::default()
  }
}

fn composition(services: &[(&str, Service)]) -> Composition {
  Composition {
    services: services
      .iter()
      .map(|(name, s)| (name.to_string(), s.clone()))
      .collect(),
    networks: BTreeMap::new(),
    volumes: BTreeMap::new(),
  }
}

fn service_labels(service: &str) -> HashMap<String, String> {
  HashMap::from([
    (labels::PROJECT.to_string(), PROJECT.to_string()),
    (labels::SERVICE.to_string(), service.to_string()),
  ])
}

async fn run_apply(engine: &FakeEngine, composition: &Composition) {
  let cancel = CancellationToken::new();
  apply(engine, PROJECT, composition, &cancel).await.unwrap();
}

#[tokio::test]
async fn cold_start_creates_and_starts_the_service() {
  let engine = FakeEngine::new();
  let mut web = service("nginx:1");
  web.ports = vec!["8080:80".to_string()];
  let desired = composition(&[("web", web)]);

  run_apply(&engine, &desired).await;

  let container = engine.container_named("web").unwrap();
  assert_eq!(container.state, "running");
  assert_eq!(container.labels[labels::PROJECT], "demo");
  assert_eq!(container.labels[labels::SERVICE], "web");

  let ops = engine.ops();
  assert!(ops.contains(&EngineOp::PullImage("nginx:1".to_string())));
  assert!(ops.contains(&EngineOp::CreateContainer("web".to_string())));
}

#[tokio::test]
async fn second_cycle_is_a_no_op() {
  let engine = FakeEngine::new();
  let desired = composition(&[("web", service("nginx:1"))]);

  run_apply(&engine, &desired).await;
  let id_before = engine.container_named("web").unwrap().id;
  engine.take_ops();

  run_apply(&engine, &desired).await;

  // Pulls and inspects are allowed; no mutations.
  assert!(engine.take_ops().iter().all(|op| !op.is_mutation()));
  assert_eq!(engine.container_named("web").unwrap().id, id_before);
}

#[tokio::test]
async fn image_drift_triggers_recreate() {
  let engine = FakeEngine::new();
  let desired = composition(&[("web", service("nginx:1"))]);

  run_apply(&engine, &desired).await;
  let old = engine.container_named("web").unwrap();
  engine.take_ops();

  // The tag now resolves to a different image identity.
  engine.register_image("nginx:1", "sha256:rebuilt");
  run_apply(&engine, &desired).await;

  let new = engine.container_named("web").unwrap();
  assert_ne!(new.id, old.id);
  assert_eq!(new.image_id, "sha256:rebuilt");
  assert_eq!(new.state, "running");
  assert_eq!(new.labels, old.labels);

  let ops = engine.take_ops();
  assert!(ops.contains(&EngineOp::StopContainer(old.id.clone())));
  assert!(ops.contains(&EngineOp::RemoveContainer(old.id.clone())));
  assert!(ops.contains(&EngineOp::CreateContainer("web".to_string())));
}

#[tokio::test]
async fn stopped_container_with_current_image_is_started_not_recreated() {
  let engine = FakeEngine::new();
  engine.register_image("nginx:1", "sha256:current");
  let id = engine.seed_container(
    "web",
    "nginx:1",
    "sha256:current",
    "exited",
    service_labels("web"),
  );

  run_apply(&engine, &composition(&[("web", service("nginx:1"))])).await;

  let container = engine.container_named("web").unwrap();
  assert_eq!(container.id, id);
  assert_eq!(container.state, "running");
  let ops = engine.ops();
  assert!(!ops.contains(&EngineOp::RemoveContainer(id.clone())));
}

#[tokio::test]
async fn dependency_waits_for_health_then_reconciles_dependent() {
  let engine = FakeEngine::new();

  let mut db = service("pg:15");
  db.healthcheck = Some(HealthCheck {
    test: vec!["CMD".to_string(), "true".to_string()],
    interval: Some("1s".to_string()),
    timeout: Some("1s".to_string()),
    retries: 1,
    start_period: None,
  });
  let mut api = service("api:1");
  api.depends_on = BTreeSet::from(["db".to_string()]);
  let desired = composition(&[("db", db), ("api", api)]);

  // db is created this cycle as ctr-1 (ids are sequential) and must
  // report healthy before api is touched.
  engine.script_health("ctr-1", vec![Some(HealthStatus::Healthy)]);

  run_apply(&engine, &desired).await;

  let db_container = engine.container_named("db").unwrap();
  assert_eq!(db_container.id, "ctr-1");
  let api_container = engine.container_named("api").unwrap();
  assert_eq!(api_container.state, "running");

  // db was created before api.
  let creations: Vec<_> = engine
    .ops()
    .into_iter()
    .filter(|op| matches!(op, EngineOp::CreateContainer(_)))
    .collect();
  assert_eq!(
    creations,
    vec![
      EngineOp::CreateContainer("db".to_string()),
      EngineOp::CreateContainer("api".to_string()),
    ]
  );
}

#[tokio::test]
async fn unhealthy_dependency_skips_the_dependent() {
  let engine = FakeEngine::new();

  let mut db = service("pg:15");
  db.healthcheck = Some(HealthCheck {
    test: vec!["CMD".to_string(), "true".to_string()],
    ..Default::default()
  });
  let mut api = service("api:1");
  api.depends_on = BTreeSet::from(["db".to_string()]);
  let desired = composition(&[("db", db), ("api", api)]);

  engine.script_health("ctr-1", vec![Some(HealthStatus::Unhealthy)]);

  run_apply(&engine, &desired).await;

  assert!(engine.container_named("db").is_some());
  assert!(engine.container_named("api").is_none());
}

#[tokio::test]
async fn missing_dependency_skips_the_dependent() {
  let engine = FakeEngine::new();

  // db's image cannot be pulled, so its container is never created
  // and api must be skipped rather than reconciled.
  engine.fail_pull("pg:15");

  let mut api = service("api:1");
  api.depends_on = BTreeSet::from(["db".to_string()]);
  let desired = composition(&[("db", service("pg:15")), ("api", api)]);

  run_apply(&engine, &desired).await;

  assert!(engine.container_named("db").is_none());
  assert!(engine.container_named("api").is_none());
}

#[tokio::test]
async fn orphans_are_pruned() {
  let engine = FakeEngine::new();
  engine.register_image("nginx:1", "sha256:current");
  let old_id = engine.seed_container(
    "old",
    "legacy:9",
    "sha256:legacy",
    "running",
    service_labels("old"),
  );
  let web_id = engine.seed_container(
    "web",
    "nginx:1",
    "sha256:current",
    "running",
    service_labels("web"),
  );
  // A container outside the project must never be touched.
  engine.seed_container(
    "bystander",
    "other:1",
    "sha256:other",
    "running",
    HashMap::from([(labels::PROJECT.to_string(), "elsewhere".to_string())]),
  );

  run_apply(&engine, &composition(&[("web", service("nginx:1"))])).await;

  assert!(engine.container_named("old").is_none());
  assert_eq!(engine.container_named("web").unwrap().id, web_id);
  assert!(engine.container_named("bystander").is_some());

  let ops = engine.ops();
  assert!(ops.contains(&EngineOp::StopContainer(old_id.clone())));
  assert!(ops.contains(&EngineOp::RemoveContainer(old_id)));
}

#[tokio::test]
async fn dependency_cycle_aborts_services_but_keeps_earlier_phases() {
  let engine = FakeEngine::new();
  let cancel = CancellationToken::new();

  let manifest = r#"
services:
  web:
    image: nginx:1
volumes:
  data: {}
"#;
  let mut desired = parse_composition(manifest).unwrap();
  // Introduce a cycle after validation, as a manifest edit race would.
  let mut a = service("img:1");
  a.depends_on = BTreeSet::from(["b".to_string()]);
  let mut b = service("img:1");
  b.depends_on = BTreeSet::from(["a".to_string()]);
  desired.services.insert("a".to_string(), a);
  desired.services.insert("b".to_string(), b);

  let result = apply(&engine, PROJECT, &desired, &cancel).await;
  assert!(matches!(result, Err(ApplyError::Order(_))));

  // Volumes reconciled before the services phase aborted.
  assert_eq!(engine.volume_names(), vec!["demo_data"]);
  assert!(engine.containers().is_empty());
}

#[tokio::test]
async fn pull_failure_on_update_path_leaves_container_running() {
  let engine = FakeEngine::new();
  engine.register_image("nginx:1", "sha256:current");
  let id = engine.seed_container(
    "web",
    "nginx:1",
    "sha256:current",
    "running",
    service_labels("web"),
  );
  engine.fail_pull("nginx:1");

  run_apply(&engine, &composition(&[("web", service("nginx:1"))])).await;

  let container = engine.container_named("web").unwrap();
  assert_eq!(container.id, id);
  assert_eq!(container.state, "running");
  assert!(engine.ops().iter().all(|op| !op.is_mutation()));
}

#[tokio::test]
async fn container_name_override_survives_recreate() {
  let engine = FakeEngine::new();
  let mut web = service("nginx:1");
  web.container_name = Some("frontend".to_string());
  let desired = composition(&[("web", web)]);

  run_apply(&engine, &desired).await;
  assert!(engine.container_named("frontend").is_some());

  engine.register_image("nginx:1", "sha256:rebuilt");
  run_apply(&engine, &desired).await;

  let container = engine.container_named("frontend").unwrap();
  assert_eq!(container.image_id, "sha256:rebuilt");
}

#[tokio::test]
async fn cancellation_stops_the_cycle_before_mutations() {
  let engine = FakeEngine::new();
  let cancel = CancellationToken::new();
  cancel.cancel();

  let result = apply(
    &engine,
    PROJECT,
    &composition(&[("web", service("nginx:1"))]),
    &cancel,
  )
  .await;

  assert!(matches!(
    result,
    Err(ApplyError::Engine(
      stevedore_lib::engine::EngineError::Cancelled
    ))
  ));
  assert!(engine.ops().is_empty());
}
