//! Paginated list responses.
//!
//! Sidecar list commands do not agree on field names: some answer with
//! `current_page` / `items_per_page`, others with `index` / `max_size`, and
//! the items live under a per-command key.

use crate::sidecar::RpcError;
use serde::Deserialize;
use serde_json::Value;

pub const DEFAULT_ITEMS_PER_PAGE: u32 = 10;
pub const MIN_ITEMS_PER_PAGE: u32 = 1;
pub const MAX_ITEMS_PER_PAGE: u32 = 100;

#[derive(Debug, Clone, Default, Deserialize)]
struct PageMeta {
    #[serde(default)]
    total: u64,
    #[serde(default)]
    total_pages: u32,
    #[serde(default, alias = "index")]
    current_page: Option<u32>,
    #[serde(default, alias = "max_size")]
    items_per_page: Option<u32>,
}

/// One decoded page.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub items: Vec<Value>,
    pub total: u64,
    pub total_pages: u32,
    pub current_page: Option<u32>,
    pub items_per_page: Option<u32>,
    /// The whole response, for fields outside the common shape.
    pub raw: Value,
}

impl Page {
    /// Decodes `value`, reading items from `items_key` or falling back to
    /// `items`.
    pub fn parse(method: &str, items_key: &str, value: Value) -> Result<Self, RpcError> {
        let malformed = |message: String| RpcError::MalformedResponse {
            method: method.to_string(),
            message,
        };

        if !value.is_object() {
            return Err(malformed("expected an object".to_string()));
        }
        let meta: PageMeta =
            serde_json::from_value(value.clone()).map_err(|e| malformed(e.to_string()))?;

        let items = match value.get(items_key).or_else(|| value.get("items")) {
            Some(Value::Array(items)) => items
                .iter()
                .filter(|item| !is_message_only(item))
                .cloned()
                .collect(),
            Some(Value::Null) | None => Vec::new(),
            Some(_) => return Err(malformed(format!("'{}' is not a list", items_key))),
        };

        Ok(Self {
            items,
            total: meta.total,
            total_pages: meta.total_pages,
            current_page: meta.current_page,
            items_per_page: meta.items_per_page,
            raw: value,
        })
    }
}

/// `[{"message": "No stacks found ..."}]` stands for an empty list.
fn is_message_only(item: &Value) -> bool {
    item.as_object()
        .is_some_and(|map| map.len() == 1 && map.contains_key("message"))
}

/// Pagination state owned by one provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    /// 1-based.
    pub current_page: u32,
    pub items_per_page: u32,
    pub total_items: u64,
    pub total_pages: u32,
}

impl Pagination {
    pub fn new(items_per_page: u32) -> Self {
        Self {
            current_page: 1,
            items_per_page,
            total_items: 0,
            total_pages: 0,
        }
    }

    pub fn has_previous(&self) -> bool {
        self.current_page > 1
    }

    pub fn has_next(&self) -> bool {
        self.current_page < self.total_pages
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::new(DEFAULT_ITEMS_PER_PAGE)
    }
}
