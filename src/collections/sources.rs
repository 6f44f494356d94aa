//! The concrete collections every list view is built from.

use super::entries::{DataEntry, TreeEntry};
use super::page::Page;
use crate::event_hub::names;
use serde_json::{json, Value};

/// Describes how one collection is fetched and rendered.
pub trait CollectionSource: Send + Sync {
    /// Human-readable plural ("stacks"), used in messages.
    fn label(&self) -> &'static str;

    /// Sidecar command that lists this collection.
    fn method(&self) -> &'static str;

    /// Response key holding the items.
    fn items_key(&self) -> &'static str {
        "items"
    }

    /// Positional arguments for one page.
    fn request_args(&self, page: u32, items_per_page: u32, scope: Option<&str>) -> Vec<Value> {
        let mut args = vec![json!(page), json!(items_per_page)];
        if let Some(scope) = scope {
            args.push(json!(scope));
        }
        args
    }

    /// Rows for one decoded page, in display order.
    fn entries(&self, page: &Page) -> Vec<TreeEntry>;

    /// Rows below an expanded data row.
    fn children(&self, _parent: &DataEntry) -> Vec<TreeEntry> {
        Vec::new()
    }

    /// Hub events after which this collection must be refetched.
    fn invalidated_by(&self) -> &'static [&'static str] {
        &[names::SERVER_CHANGED]
    }
}

fn str_field(item: &Value, key: &str) -> Option<String> {
    item.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn id_of(item: &Value) -> String {
    str_field(item, "id").unwrap_or_default()
}

fn name_of(item: &Value) -> String {
    str_field(item, "name").unwrap_or_else(|| id_of(item))
}

pub struct StacksSource;

impl StacksSource {
    fn stack_entry(stack: &Value, is_active: bool) -> TreeEntry {
        let has_components = stack
            .get("components")
            .and_then(Value::as_object)
            .is_some_and(|components| !components.is_empty());
        TreeEntry::Data(
            DataEntry::new("stack", id_of(stack), name_of(stack))
                .with_description(is_active.then(|| "active".to_string()))
                .active(is_active)
                .expandable(has_components)
                .with_raw(stack.clone()),
        )
    }
}

impl CollectionSource for StacksSource {
    fn label(&self) -> &'static str {
        "stacks"
    }

    fn method(&self) -> &'static str {
        "fetchStacks"
    }

    fn items_key(&self) -> &'static str {
        "stacks"
    }

    /// `fetchStacks(page, size, active_stack_id)`; the sidecar resolves the
    /// active stack itself when the id is null.
    fn request_args(&self, page: u32, items_per_page: u32, _scope: Option<&str>) -> Vec<Value> {
        vec![json!(page), json!(items_per_page), Value::Null]
    }

    fn entries(&self, page: &Page) -> Vec<TreeEntry> {
        let active = page
            .raw
            .get("active_stack")
            .filter(|stack| stack.get("id").is_some());
        let active_id = active.map(id_of);

        let mut entries = Vec::with_capacity(page.items.len() + 1);
        if let Some(active) = active {
            entries.push(Self::stack_entry(active, true));
        }
        entries.extend(
            page.items
                .iter()
                .filter(|stack| Some(id_of(stack)) != active_id)
                .map(|stack| Self::stack_entry(stack, false)),
        );
        entries
    }

    /// Stacks expand into one group per component type; groups expand into
    /// their components.
    fn children(&self, parent: &DataEntry) -> Vec<TreeEntry> {
        match parent.kind.as_str() {
            "stack" => {
                let Some(components) = parent.raw.get("components").and_then(Value::as_object)
                else {
                    return Vec::new();
                };
                let mut types: Vec<_> = components.iter().collect();
                types.sort_by(|a, b| a.0.cmp(b.0));
                types
                    .into_iter()
                    .map(|(component_type, members)| {
                        let count = members.as_array().map_or(0, Vec::len);
                        TreeEntry::Data(
                            DataEntry::new(
                                "component-group",
                                format!("{}/{}", parent.id, component_type),
                                component_type.clone(),
                            )
                            .with_description(Some(count.to_string()))
                            .expandable(count > 0)
                            .with_raw(members.clone()),
                        )
                    })
                    .collect()
            }
            "component-group" => parent
                .raw
                .as_array()
                .map(|members| {
                    members
                        .iter()
                        .map(|component| {
                            TreeEntry::Data(
                                DataEntry::new("component", id_of(component), name_of(component))
                                    .with_description(str_field(component, "flavor_name"))
                                    .with_raw(component.clone()),
                            )
                        })
                        .collect()
                })
                .unwrap_or_default(),
            _ => Vec::new(),
        }
    }

    fn invalidated_by(&self) -> &'static [&'static str] {
        &[
            names::SERVER_CHANGED,
            names::ACTIVE_STACK_CHANGED,
            names::ACTIVE_PROJECT_CHANGED,
        ]
    }
}

pub struct ComponentsSource;

impl CollectionSource for ComponentsSource {
    fn label(&self) -> &'static str {
        "components"
    }

    fn method(&self) -> &'static str {
        "listComponents"
    }

    fn entries(&self, page: &Page) -> Vec<TreeEntry> {
        page.items
            .iter()
            .map(|component| {
                let flavor = component
                    .get("flavor")
                    .and_then(|flavor| flavor.get("name").or(Some(flavor)))
                    .and_then(Value::as_str)
                    .map(str::to_string);
                let description = match (str_field(component, "type"), flavor) {
                    (Some(kind), Some(flavor)) => Some(format!("{} / {}", kind, flavor)),
                    (kind, flavor) => kind.or(flavor),
                };
                TreeEntry::Data(
                    DataEntry::new("component", id_of(component), name_of(component))
                        .with_description(description)
                        .with_raw(component.clone()),
                )
            })
            .collect()
    }

    fn invalidated_by(&self) -> &'static [&'static str] {
        &[names::SERVER_CHANGED, names::ACTIVE_STACK_CHANGED]
    }
}

pub struct PipelineRunsSource;

impl CollectionSource for PipelineRunsSource {
    fn label(&self) -> &'static str {
        "pipeline runs"
    }

    fn method(&self) -> &'static str {
        "getPipelineRuns"
    }

    fn items_key(&self) -> &'static str {
        "runs"
    }

    fn entries(&self, page: &Page) -> Vec<TreeEntry> {
        page.items
            .iter()
            .map(|run| {
                let has_steps = match run.get("steps") {
                    Some(Value::Object(steps)) => !steps.is_empty(),
                    Some(Value::Array(steps)) => !steps.is_empty(),
                    _ => false,
                };
                TreeEntry::Data(
                    DataEntry::new("run", id_of(run), name_of(run))
                        .with_description(str_field(run, "status"))
                        .expandable(has_steps)
                        .with_raw(run.clone()),
                )
            })
            .collect()
    }

    /// Steps arrive either as a name-keyed object or as a list.
    fn children(&self, parent: &DataEntry) -> Vec<TreeEntry> {
        if parent.kind != "run" {
            return Vec::new();
        }
        let step_entry = |name: String, step: &Value| {
            let id = str_field(step, "id").unwrap_or_else(|| format!("{}/{}", parent.id, name));
            TreeEntry::Data(
                DataEntry::new("step", id, name)
                    .with_description(str_field(step, "status"))
                    .with_raw(step.clone()),
            )
        };
        match parent.raw.get("steps") {
            Some(Value::Object(steps)) => steps
                .iter()
                .map(|(name, step)| step_entry(name.clone(), step))
                .collect(),
            Some(Value::Array(steps)) => steps
                .iter()
                .map(|step| step_entry(name_of(step), step))
                .collect(),
            _ => Vec::new(),
        }
    }

    fn invalidated_by(&self) -> &'static [&'static str] {
        &[names::SERVER_CHANGED, names::ACTIVE_PROJECT_CHANGED]
    }
}

pub struct ModelsSource;

impl CollectionSource for ModelsSource {
    fn label(&self) -> &'static str {
        "models"
    }

    fn method(&self) -> &'static str {
        "listModels"
    }

    fn entries(&self, page: &Page) -> Vec<TreeEntry> {
        page.items
            .iter()
            .map(|model| {
                let version = model
                    .get("latest_version_name")
                    .or_else(|| model.get("latest_version"))
                    .and_then(Value::as_str)
                    .map(|v| format!("latest: {}", v));
                TreeEntry::Data(
                    DataEntry::new("model", id_of(model), name_of(model))
                        .with_description(version)
                        .with_raw(model.clone()),
                )
            })
            .collect()
    }

    fn invalidated_by(&self) -> &'static [&'static str] {
        &[names::SERVER_CHANGED, names::ACTIVE_PROJECT_CHANGED]
    }
}

pub struct ProjectsSource;

impl CollectionSource for ProjectsSource {
    fn label(&self) -> &'static str {
        "projects"
    }

    fn method(&self) -> &'static str {
        "listProjects"
    }

    fn items_key(&self) -> &'static str {
        "projects"
    }

    fn entries(&self, page: &Page) -> Vec<TreeEntry> {
        let active = page
            .raw
            .get("active_project")
            .and_then(|project| str_field(project, "id"));
        page.items
            .iter()
            .map(|project| {
                let label = str_field(project, "display_name").unwrap_or_else(|| name_of(project));
                let id = id_of(project);
                let is_active = active.as_deref() == Some(id.as_str());
                TreeEntry::Data(
                    DataEntry::new("project", id, label)
                        .with_description(str_field(project, "name"))
                        .active(is_active)
                        .with_raw(project.clone()),
                )
            })
            .collect()
    }

    fn invalidated_by(&self) -> &'static [&'static str] {
        &[names::SERVER_CHANGED, names::ACTIVE_PROJECT_CHANGED]
    }
}

pub struct DeploymentsSource;

impl CollectionSource for DeploymentsSource {
    fn label(&self) -> &'static str {
        "deployments"
    }

    fn method(&self) -> &'static str {
        "listDeployments"
    }

    fn entries(&self, page: &Page) -> Vec<TreeEntry> {
        page.items
            .iter()
            .map(|deployment| {
                TreeEntry::Data(
                    DataEntry::new("deployment", id_of(deployment), name_of(deployment))
                        .with_description(str_field(deployment, "status"))
                        .with_raw(deployment.clone()),
                )
            })
            .collect()
    }

    fn invalidated_by(&self) -> &'static [&'static str] {
        &[names::SERVER_CHANGED, names::ACTIVE_PROJECT_CHANGED]
    }
}

/// Every built-in collection, keyed by the name used on the command line.
pub fn builtin_source(name: &str) -> Option<Box<dyn CollectionSource>> {
    let source: Box<dyn CollectionSource> = match name {
        "stacks" => Box::new(StacksSource),
        "components" => Box::new(ComponentsSource),
        "runs" | "pipeline-runs" => Box::new(PipelineRunsSource),
        "models" => Box::new(ModelsSource),
        "projects" => Box::new(ProjectsSource),
        "deployments" => Box::new(DeploymentsSource),
        _ => return None,
    };
    Some(source)
}

pub const BUILTIN_SOURCES: &[&str] = &[
    "stacks",
    "components",
    "runs",
    "models",
    "projects",
    "deployments",
];
