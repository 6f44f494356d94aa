use super::entries::{DataEntry, TreeEntry};
use super::page::Page;
use super::sources::*;
use crate::event_hub::names;
use serde_json::json;

fn page(method: &str, key: &str, value: serde_json::Value) -> Page {
    Page::parse(method, key, value).unwrap()
}

fn only_data(entries: Vec<TreeEntry>) -> Vec<DataEntry> {
    entries
        .into_iter()
        .filter_map(|e| match e {
            TreeEntry::Data(d) => Some(d),
            _ => None,
        })
        .collect()
}

#[test]
fn test_page_accepts_native_aliases() {
    let parsed = page(
        "listComponents",
        "items",
        json!({"index": 2, "max_size": 5, "total": 12, "total_pages": 3, "items": [{"id": "a"}]}),
    );
    assert_eq!(parsed.current_page, Some(2));
    assert_eq!(parsed.items_per_page, Some(5));
    assert_eq!(parsed.total_pages, 3);
    assert_eq!(parsed.items.len(), 1);
}

#[test]
fn test_page_drops_message_only_items() {
    let parsed = page(
        "fetchStacks",
        "stacks",
        json!({
            "stacks": [{"message": "No stacks found or all stacks failed to process"}],
            "total": 0,
            "total_pages": 0,
        }),
    );
    assert!(parsed.items.is_empty());
}

#[test]
fn test_page_rejects_non_object_and_non_list() {
    assert!(Page::parse("listModels", "items", json!([1, 2])).is_err());
    assert!(Page::parse("listModels", "items", json!({"items": "nope"})).is_err());
}

#[test]
fn test_request_args_default_and_scoped() {
    assert_eq!(
        ModelsSource.request_args(1, 10, None),
        vec![json!(1), json!(10)]
    );
    assert_eq!(
        PipelineRunsSource.request_args(3, 25, Some("default")),
        vec![json!(3), json!(25), json!("default")]
    );
    assert_eq!(
        ComponentsSource.request_args(1, 10, Some("orchestrator")),
        vec![json!(1), json!(10), json!("orchestrator")]
    );
}

#[test]
fn test_pipeline_runs_with_keyed_steps() {
    let runs = page(
        "getPipelineRuns",
        "runs",
        json!({
            "runs": [{
                "id": "r1",
                "name": "training-2024",
                "status": "completed",
                "steps": {
                    "load": {"id": "st1", "status": "completed"},
                    "train": {"id": "st2", "status": "failed"}
                }
            }],
            "total": 1, "total_pages": 1, "current_page": 1, "items_per_page": 10
        }),
    );
    let entries = only_data(PipelineRunsSource.entries(&runs));
    assert_eq!(entries[0].description.as_deref(), Some("completed"));
    assert!(entries[0].expandable);

    let steps = only_data(PipelineRunsSource.children(&entries[0]));
    let labels: Vec<_> = steps.iter().map(|s| s.label.as_str()).collect();
    assert_eq!(labels, vec!["load", "train"]);
    assert_eq!(steps[1].description.as_deref(), Some("failed"));
}

#[test]
fn test_components_describe_type_and_flavor() {
    let components = page(
        "listComponents",
        "items",
        json!({
            "items": [{
                "id": "c1",
                "name": "local",
                "type": "orchestrator",
                "flavor": {"name": "local"},
            }],
            "index": 1,
            "max_size": 10,
            "total": 1,
            "total_pages": 1,
        }),
    );
    let entries = only_data(ComponentsSource.entries(&components));
    assert_eq!(entries[0].description.as_deref(), Some("orchestrator / local"));
}

#[test]
fn test_projects_use_display_name_and_mark_active() {
    let projects = page(
        "listProjects",
        "projects",
        json!({
            "projects": [
                {"id": "p1", "name": "default", "display_name": "Default"},
                {"id": "p2", "name": "ml"}
            ],
            "active_project": {"id": "p2", "name": "ml"},
            "total": 2, "total_pages": 1
        }),
    );
    let entries = only_data(ProjectsSource.entries(&projects));
    assert_eq!(entries[0].label, "Default");
    assert!(!entries[0].is_active);
    assert_eq!(entries[1].label, "ml");
    assert!(entries[1].is_active);
}

#[test]
fn test_builtin_lookup_and_invalidation() {
    for name in BUILTIN_SOURCES {
        let source = builtin_source(name).unwrap();
        assert!(source.invalidated_by().contains(&names::SERVER_CHANGED));
    }
    assert!(builtin_source("secrets").is_none());
    assert_eq!(builtin_source("runs").unwrap().method(), "getPipelineRuns");
    assert!(StacksSource
        .invalidated_by()
        .contains(&names::ACTIVE_STACK_CHANGED));
}
