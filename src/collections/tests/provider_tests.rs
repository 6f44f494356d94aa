use super::*;
use crate::collections::poller::Poller;
use crate::collections::sources::{ModelsSource, StacksSource};
use crate::event_hub::{EventHub, HubEvent};
use crate::sidecar::error::TransportError;
use crate::sidecar::mock_transport::{settle, MockTransport};
use serde_json::json;

const TTL: Duration = Duration::from_secs(30);

struct Env {
    hub: Arc<EventHub>,
    rpc: Arc<RpcClient>,
    transport: Arc<MockTransport>,
    readiness: Arc<ReadinessCoordinator>,
}

async fn env(service_ready: bool) -> Env {
    let hub = Arc::new(EventHub::new());
    let transport = MockTransport::new();
    let rpc = Arc::new(RpcClient::new(transport.clone(), Arc::clone(&hub)));
    let readiness = ReadinessCoordinator::attach(Arc::clone(&hub));
    rpc.start().await.unwrap();
    if service_ready {
        hub.emit(HubEvent::ServiceInitialized(true)).unwrap();
    }
    Env {
        hub,
        rpc,
        transport,
        readiness,
    }
}

fn provider(env: &Env, source: Box<dyn CollectionSource>) -> Arc<CollectionProvider> {
    Arc::new(CollectionProvider::new(
        source,
        Arc::clone(&env.rpc),
        Arc::clone(&env.readiness),
        TTL,
        10,
    ))
}

/// `listModels` over `total` synthetic models, answering with the
/// sidecar's `index` / `max_size` field names.
fn serve_models(transport: &MockTransport, total: u64) {
    transport.respond_with("listModels", move |args| {
        let page = args[0].as_u64().unwrap_or(1);
        let size = args[1].as_u64().unwrap_or(10);
        let total_pages = total.div_ceil(size);
        let start = (page - 1) * size;
        let end = total.min(start + size);
        let items: Vec<Value> = (start..end)
            .map(|i| json!({"id": format!("m{}", i), "name": format!("model-{}", i)}))
            .collect();
        Ok(json!({
            "items": items,
            "total": total,
            "total_pages": total_pages,
            "index": page,
            "max_size": size,
        }))
    });
}

fn data_labels(entries: &[TreeEntry]) -> Vec<String> {
    entries
        .iter()
        .filter_map(|e| match e {
            TreeEntry::Data(d) => Some(d.label.clone()),
            _ => None,
        })
        .collect()
}

fn nav(entries: &[TreeEntry]) -> Vec<NavDirection> {
    entries
        .iter()
        .filter_map(|e| match e {
            TreeEntry::Navigation { direction, .. } => Some(*direction),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_not_ready_renders_placeholder_without_rpc() {
    let env = env(false).await;
    serve_models(&env.transport, 5);
    let models = provider(&env, Box::new(ModelsSource));

    models.refresh().await;

    assert_eq!(
        models.get_children(None),
        vec![TreeEntry::placeholder(SERVICES_UNAVAILABLE)]
    );
    assert!(env.transport.calls().is_empty());
}

#[tokio::test]
async fn test_transport_down_renders_placeholder_without_rpc() {
    let env = env(true).await;
    serve_models(&env.transport, 5);
    let models = provider(&env, Box::new(ModelsSource));
    env.rpc.stop().await.unwrap();

    models.refresh().await;
    assert!(!env.readiness.is_ready());
    assert!(env.transport.calls().is_empty());
}

#[tokio::test]
async fn test_first_page_has_only_next_affordance() {
    let env = env(true).await;
    serve_models(&env.transport, 25);
    let models = provider(&env, Box::new(ModelsSource));

    models.refresh().await;
    let entries = models.get_children(None);

    assert_eq!(data_labels(&entries).len(), 10);
    assert_eq!(nav(&entries), vec![NavDirection::Next]);
    assert!(matches!(
        entries.last(),
        Some(TreeEntry::Navigation {
            direction: NavDirection::Next,
            target_page: 2
        })
    ));
    let pagination = models.pagination();
    assert_eq!(pagination.total_items, 25);
    assert_eq!(pagination.total_pages, 3);
}

#[tokio::test]
async fn test_pagination_bounds() {
    let env = env(true).await;
    serve_models(&env.transport, 25);
    let models = provider(&env, Box::new(ModelsSource));
    models.refresh().await;

    assert!(!models.go_to_previous_page().await);
    assert_eq!(models.pagination().current_page, 1);

    assert!(models.go_to_next_page().await);
    let middle = models.get_children(None);
    assert_eq!(nav(&middle), vec![NavDirection::Previous, NavDirection::Next]);
    assert!(matches!(
        middle.first(),
        Some(TreeEntry::Navigation {
            direction: NavDirection::Previous,
            ..
        })
    ));

    assert!(models.go_to_next_page().await);
    assert_eq!(models.pagination().current_page, 3);
    let last = models.get_children(None);
    assert_eq!(data_labels(&last).len(), 5);
    assert_eq!(nav(&last), vec![NavDirection::Previous]);

    assert!(!models.go_to_next_page().await);
    assert_eq!(models.pagination().current_page, 3);
}

#[tokio::test]
async fn test_empty_first_page_has_no_navigation() {
    let env = env(true).await;
    serve_models(&env.transport, 0);
    let models = provider(&env, Box::new(ModelsSource));

    models.refresh().await;
    assert_eq!(
        models.get_children(None),
        vec![TreeEntry::placeholder("No models found")]
    );
}

#[tokio::test(start_paused = true)]
async fn test_cache_serves_until_ttl() {
    let env = env(true).await;
    serve_models(&env.transport, 3);
    let models = provider(&env, Box::new(ModelsSource));

    models.refresh().await;
    models.refresh().await;
    assert_eq!(env.transport.call_count("listModels"), 1);

    tokio::time::advance(TTL).await;
    models.refresh().await;
    assert_eq!(env.transport.call_count("listModels"), 2);

    models.invalidate();
    models.refresh().await;
    assert_eq!(env.transport.call_count("listModels"), 3);
}

#[tokio::test]
async fn test_items_per_page_resets_to_first_page() {
    let env = env(true).await;
    serve_models(&env.transport, 25);
    let models = provider(&env, Box::new(ModelsSource));
    models.refresh().await;
    models.go_to_next_page().await;

    models.update_items_per_page(20).await.unwrap();
    let pagination = models.pagination();
    assert_eq!(pagination.current_page, 1);
    assert_eq!(pagination.items_per_page, 20);
    assert_eq!(pagination.total_pages, 2);

    let (_, args) = env.transport.calls().last().cloned().unwrap();
    assert_eq!(args, vec![json!(1), json!(20)]);

    assert!(matches!(
        models.update_items_per_page(0).await,
        Err(CollectionError::InvalidPageSize { requested: 0, .. })
    ));
    assert!(models.update_items_per_page(101).await.is_err());
    assert_eq!(models.pagination().items_per_page, 20);
}

#[tokio::test]
async fn test_scope_is_sent_and_keys_the_cache() {
    let env = env(true).await;
    serve_models(&env.transport, 3);
    let models = provider(&env, Box::new(ModelsSource));
    models.refresh().await;

    models.set_scope(Some("project-a".to_string())).await;
    let (_, args) = env.transport.calls().last().cloned().unwrap();
    assert_eq!(args, vec![json!(1), json!(10), json!("project-a")]);
    assert_eq!(env.transport.call_count("listModels"), 2);

    models.set_scope(None).await;
    assert_eq!(env.transport.call_count("listModels"), 2);
}

#[tokio::test]
async fn test_errors_render_as_entries() {
    let env = env(true).await;
    env.transport.respond(
        "listModels",
        json!({"error": "Failed to list models", "message": "Authentication error: token expired"}),
    );
    env.transport.respond(
        "listProjects",
        json!({"clientVersion": "0.80.0", "serverVersion": "0.63.0"}),
    );
    env.transport
        .respond_with("listDeployments", |_| Err(TransportError::Closed));

    let models = provider(&env, Box::new(ModelsSource));
    models.refresh().await;
    let entries = models.get_children(None);
    assert_eq!(entries.len(), 2);
    assert!(matches!(
        &entries[0],
        TreeEntry::Error { title, .. } if title.contains("token expired")
    ));

    let projects = provider(&env, Box::new(crate::collections::sources::ProjectsSource));
    projects.refresh().await;
    assert_eq!(
        projects.get_children(None),
        vec![TreeEntry::VersionMismatch {
            client_version: "0.80.0".to_string(),
            server_version: "0.63.0".to_string(),
        }]
    );

    let deployments = provider(&env, Box::new(crate::collections::sources::DeploymentsSource));
    deployments.refresh().await;
    assert!(matches!(
        deployments.get_children(None).as_slice(),
        [TreeEntry::Error { .. }]
    ));
}

#[tokio::test]
async fn test_concurrent_refreshes_coalesce() {
    let env = env(true).await;
    serve_models(&env.transport, 3);
    let gate = env.transport.hold_requests();
    let models = provider(&env, Box::new(ModelsSource));

    let first = {
        let models = Arc::clone(&models);
        tokio::spawn(async move { models.refresh().await })
    };
    settle().await;
    assert!(models.is_refreshing());
    assert!(matches!(
        models.get_children(None).as_slice(),
        [TreeEntry::Loading { .. }]
    ));

    let merged: Vec<_> = (0..2)
        .map(|_| {
            let models = Arc::clone(&models);
            tokio::spawn(async move { models.refresh().await })
        })
        .collect();
    settle().await;
    assert_eq!(env.transport.call_count("listModels"), 1);
    assert!(merged.iter().all(|task| !task.is_finished()));

    gate.add_permits(10);
    first.await.unwrap();
    for task in merged {
        task.await.unwrap();
    }

    assert!(!models.is_refreshing());
    // The follow-up pass is served from the cache.
    assert_eq!(env.transport.call_count("listModels"), 1);
    assert_eq!(data_labels(&models.get_children(None)).len(), 3);
}

#[tokio::test]
async fn test_merged_refresh_waits_for_rendered_page() {
    let env = env(true).await;
    serve_models(&env.transport, 25);
    let gate = env.transport.hold_requests();
    let models = provider(&env, Box::new(ModelsSource));

    let background = {
        let models = Arc::clone(&models);
        tokio::spawn(async move { models.refresh().await })
    };
    settle().await;
    assert!(models.is_refreshing());

    let release = tokio::spawn(async move {
        settle().await;
        gate.add_permits(10);
    });
    models.refresh().await;

    assert_eq!(data_labels(&models.get_children(None)).len(), 10);
    assert_eq!(models.pagination().total_pages, 3);
    assert!(models.go_to_next_page().await);
    assert_eq!(models.pagination().current_page, 2);

    background.await.unwrap();
    release.await.unwrap();
}

#[tokio::test]
async fn test_cancelled_refresh_hands_over_to_waiter() {
    let env = env(true).await;
    serve_models(&env.transport, 3);
    let gate = env.transport.hold_requests();
    let models = provider(&env, Box::new(ModelsSource));

    let doomed = {
        let models = Arc::clone(&models);
        tokio::spawn(async move { models.refresh().await })
    };
    settle().await;
    let waiter = {
        let models = Arc::clone(&models);
        tokio::spawn(async move { models.refresh().await })
    };
    settle().await;

    doomed.abort();
    let _ = doomed.await;
    settle().await;
    gate.add_permits(10);
    waiter.await.unwrap();

    assert!(!models.is_refreshing());
    assert_eq!(env.transport.call_count("listModels"), 2);
    assert_eq!(data_labels(&models.get_children(None)).len(), 3);
}

#[tokio::test]
async fn test_stacks_pin_active_and_expand_components() {
    let env = env(true).await;
    env.transport.respond(
        "fetchStacks",
        json!({
            "active_stack": {
                "id": "s2",
                "name": "prod",
                "components": {
                    "orchestrator": [{"id": "c1", "name": "k8s", "flavor_name": "kubernetes"}],
                    "artifact_store": [{"id": "c2", "name": "s3", "flavor_name": "s3"}]
                }
            },
            "stacks": [
                {"id": "s1", "name": "default", "components": {}},
                {"id": "s3", "name": "staging", "components": {}}
            ],
            "total": 3,
            "total_pages": 1,
            "current_page": 1,
            "items_per_page": 10
        }),
    );
    let stacks = provider(&env, Box::new(StacksSource));
    stacks.refresh().await;

    let entries = stacks.get_children(None);
    assert_eq!(data_labels(&entries), vec!["prod", "default", "staging"]);
    let TreeEntry::Data(active) = &entries[0] else {
        panic!("expected data entry");
    };
    assert!(active.is_active);

    let groups = stacks.get_children(Some(&entries[0]));
    assert_eq!(data_labels(&groups), vec!["artifact_store", "orchestrator"]);
    let components = stacks.get_children(Some(&groups[1]));
    assert_eq!(data_labels(&components), vec!["k8s"]);
    assert!(stacks.get_children(Some(&entries[1])).is_empty());

    let (_, args) = env.transport.calls()[0].clone();
    assert_eq!(args, vec![json!(1), json!(10), Value::Null]);
}

#[tokio::test(start_paused = true)]
async fn test_poller_runs_only_while_ready() {
    let env = env(true).await;
    serve_models(&env.transport, 3);
    let models = provider(&env, Box::new(ModelsSource));
    models.refresh().await;
    assert_eq!(env.transport.call_count("listModels"), 1);

    let _poller = Poller::spawn(Arc::clone(&models), env.readiness.subscribe(), TTL);
    settle().await;

    tokio::time::advance(TTL + Duration::from_secs(1)).await;
    settle().await;
    assert_eq!(env.transport.call_count("listModels"), 2);

    env.hub.emit(HubEvent::ServiceInitialized(false)).unwrap();
    settle().await;
    tokio::time::advance(TTL * 3).await;
    settle().await;
    assert_eq!(env.transport.call_count("listModels"), 2);

    env.hub.emit(HubEvent::ServiceInitialized(true)).unwrap();
    settle().await;
    tokio::time::advance(TTL + Duration::from_secs(1)).await;
    settle().await;
    assert_eq!(env.transport.call_count("listModels"), 3);
}

#[test]
fn test_cache_key_includes_scope() {
    assert_eq!(cache_key("listModels", 2, 10, None), "listModels:2:10:");
    assert_ne!(
        cache_key("listModels", 2, 10, Some("a")),
        cache_key("listModels", 2, 10, Some("b"))
    );
}
