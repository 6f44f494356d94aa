//! What a list view renders: one tagged variant per kind of row.

use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NavDirection {
    Previous,
    Next,
}

/// A row backed by sidecar data.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataEntry {
    /// Source-specific discriminator ("stack", "component-group", "run", ...).
    pub kind: String,
    pub id: String,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Marks the active stack or project.
    pub is_active: bool,
    pub expandable: bool,
    /// The item as the sidecar returned it; children are derived from it.
    #[serde(skip)]
    pub raw: Value,
}

impl DataEntry {
    pub fn new(kind: &str, id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            kind: kind.to_string(),
            id: id.into(),
            label: label.into(),
            description: None,
            is_active: false,
            expandable: false,
            raw: Value::Null,
        }
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    pub fn with_raw(mut self, raw: Value) -> Self {
        self.raw = raw;
        self
    }

    pub fn expandable(mut self, expandable: bool) -> Self {
        self.expandable = expandable;
        self
    }

    pub fn active(mut self, is_active: bool) -> Self {
        self.is_active = is_active;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TreeEntry {
    Data(DataEntry),
    /// Shown while the first fetch of a view is in flight.
    Loading { message: String },
    /// Neutral message: services not ready, empty collection.
    Placeholder { message: String },
    Error {
        title: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    VersionMismatch {
        client_version: String,
        server_version: String,
    },
    Navigation {
        direction: NavDirection,
        target_page: u32,
    },
}

impl TreeEntry {
    pub fn placeholder(message: impl Into<String>) -> Self {
        TreeEntry::Placeholder {
            message: message.into(),
        }
    }

    pub fn error(title: impl Into<String>, detail: Option<String>) -> Self {
        TreeEntry::Error {
            title: title.into(),
            detail,
        }
    }

    pub fn is_navigation(&self) -> bool {
        matches!(self, TreeEntry::Navigation { .. })
    }

    /// One-line rendering used by the CLI.
    pub fn display_line(&self) -> String {
        match self {
            TreeEntry::Data(data) => {
                let marker = if data.is_active { "* " } else { "  " };
                match &data.description {
                    Some(description) => format!("{}{} ({})", marker, data.label, description),
                    None => format!("{}{}", marker, data.label),
                }
            }
            TreeEntry::Loading { message } | TreeEntry::Placeholder { message } => {
                format!("  {}", message)
            }
            TreeEntry::Error { title, detail } => match detail {
                Some(detail) => format!("! {}: {}", title, detail),
                None => format!("! {}", title),
            },
            TreeEntry::VersionMismatch {
                client_version,
                server_version,
            } => format!(
                "! Version mismatch: client {} / server {}",
                client_version, server_version
            ),
            TreeEntry::Navigation {
                direction: NavDirection::Previous,
                target_page,
            } => format!("  < Previous Page ({})", target_page),
            TreeEntry::Navigation {
                direction: NavDirection::Next,
                target_page,
            } => format!("  > Next Page ({})", target_page),
        }
    }
}
