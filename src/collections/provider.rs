//! The paginated collection provider shared by every list view.
//!
//! A provider owns its pagination state, its cache and its rendered
//! entries. `refresh` is gated on readiness, served from the cache when
//! possible, and coalesced: a refresh requested while one is in flight
//! makes the running one go around once more instead of starting another,
//! and the caller waits for that pass to finish.

use super::entries::{DataEntry, NavDirection, TreeEntry};
use super::errors::{error_entries, CollectionError};
use super::page::{Page, Pagination, MAX_ITEMS_PER_PAGE, MIN_ITEMS_PER_PAGE};
use super::sources::CollectionSource;
use crate::readiness::ReadinessCoordinator;
use crate::sidecar::RpcClient;
use crate::ttl_cache::TtlCache;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

pub const SERVICES_UNAVAILABLE: &str = "ZenML services are not available yet";

struct ViewState {
    pagination: Pagination,
    scope: Option<String>,
    entries: Vec<TreeEntry>,
}

pub struct CollectionProvider {
    source: Box<dyn CollectionSource>,
    rpc: Arc<RpcClient>,
    readiness: Arc<ReadinessCoordinator>,
    cache: TtlCache<Value>,
    state: Mutex<ViewState>,
    refreshing: AtomicBool,
    /// Tickets handed out to `refresh` callers.
    requested: AtomicU64,
    /// Highest ticket covered by a finished pass.
    completed: watch::Sender<u64>,
    version: watch::Sender<u64>,
}

impl CollectionProvider {
    pub fn new(
        source: Box<dyn CollectionSource>,
        rpc: Arc<RpcClient>,
        readiness: Arc<ReadinessCoordinator>,
        ttl: Duration,
        items_per_page: u32,
    ) -> Self {
        let (version, _) = watch::channel(0);
        let (completed, _) = watch::channel(0);
        Self {
            source,
            rpc,
            readiness,
            cache: TtlCache::new(ttl),
            state: Mutex::new(ViewState {
                pagination: Pagination::new(
                    items_per_page.clamp(MIN_ITEMS_PER_PAGE, MAX_ITEMS_PER_PAGE),
                ),
                scope: None,
                entries: vec![TreeEntry::placeholder(SERVICES_UNAVAILABLE)],
            }),
            refreshing: AtomicBool::new(false),
            requested: AtomicU64::new(0),
            completed,
            version,
        }
    }

    pub fn source(&self) -> &dyn CollectionSource {
        self.source.as_ref()
    }

    pub fn pagination(&self) -> Pagination {
        self.lock_state().pagination
    }

    pub fn scope(&self) -> Option<String> {
        self.lock_state().scope.clone()
    }

    /// Receiver bumped every time the rendered entries change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, ViewState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn render(&self, entries: Vec<TreeEntry>) {
        self.lock_state().entries = entries;
        self.version.send_modify(|v| *v = v.wrapping_add(1));
    }

    /// Fetches and renders the current page.
    ///
    /// Returns once a pass that started after this call has rendered, even
    /// when the work was merged into a refresh that was already running.
    pub async fn refresh(&self) {
        let ticket = self.requested.fetch_add(1, Ordering::SeqCst) + 1;
        let mut completed = self.completed.subscribe();
        loop {
            if *completed.borrow_and_update() >= ticket {
                return;
            }
            if !self.refreshing.swap(true, Ordering::SeqCst) {
                break;
            }
            debug!(source = self.source.label(), "refresh coalesced");
            if completed.changed().await.is_err() {
                return;
            }
        }

        let _running = RunningGuard {
            refreshing: &self.refreshing,
            completed: &self.completed,
        };
        loop {
            let target = self.requested.load(Ordering::SeqCst);
            self.refresh_once().await;
            self.completed.send_modify(|done| *done = (*done).max(target));
            if self.requested.load(Ordering::SeqCst) <= target {
                break;
            }
        }
    }

    /// True while a refresh is running.
    pub fn is_refreshing(&self) -> bool {
        self.refreshing.load(Ordering::SeqCst)
    }

    async fn refresh_once(&self) {
        if !self.readiness.is_ready() {
            self.show_unavailable();
            return;
        }

        let (pagination, scope, first_load) = {
            let state = self.lock_state();
            let first_load = !state.entries.iter().any(|e| matches!(e, TreeEntry::Data(_)));
            (state.pagination, state.scope.clone(), first_load)
        };
        let method = self.source.method();
        let key = cache_key(
            method,
            pagination.current_page,
            pagination.items_per_page,
            scope.as_deref(),
        );

        let response = match self.cache.get(&key) {
            Some(cached) => {
                debug!(%key, "collection cache hit");
                cached
            }
            None => {
                if first_load {
                    self.render(vec![TreeEntry::Loading {
                        message: format!("Loading {}...", self.source.label()),
                    }]);
                }
                let args = self.source.request_args(
                    pagination.current_page,
                    pagination.items_per_page,
                    scope.as_deref(),
                );
                match self.rpc.send_request(method, args).await {
                    Ok(value) => {
                        self.cache.set(key, value.clone());
                        value
                    }
                    Err(e) => {
                        warn!(source = self.source.label(), error = %e, "collection fetch failed");
                        self.render(error_entries(self.source.label(), &e));
                        return;
                    }
                }
            }
        };

        if !self.readiness.is_ready() {
            self.show_unavailable();
            return;
        }

        match Page::parse(method, self.source.items_key(), response) {
            Ok(page) => self.render_page(pagination, &page),
            Err(e) => {
                warn!(source = self.source.label(), error = %e, "undecodable page");
                self.render(error_entries(self.source.label(), &e));
            }
        }
    }

    fn render_page(&self, requested: Pagination, page: &Page) {
        let rows = self.source.entries(page);
        let pagination = {
            let mut state = self.lock_state();
            // Navigation during the fetch already queued another pass.
            if state.pagination.current_page != requested.current_page
                || state.pagination.items_per_page != requested.items_per_page
            {
                return;
            }
            state.pagination.total_items = page.total;
            state.pagination.total_pages = page.total_pages;
            state.pagination
        };

        let mut entries = Vec::with_capacity(rows.len() + 2);
        if rows.is_empty() {
            entries.push(TreeEntry::placeholder(format!(
                "No {} found",
                self.source.label()
            )));
            if pagination.has_previous() {
                entries.insert(0, navigation(NavDirection::Previous, &pagination));
            }
        } else {
            if pagination.has_previous() {
                entries.push(navigation(NavDirection::Previous, &pagination));
            }
            entries.extend(rows);
            if pagination.has_next() {
                entries.push(navigation(NavDirection::Next, &pagination));
            }
        }
        self.render(entries);
    }

    /// Replaces the view with the "services not available" placeholder.
    pub fn show_unavailable(&self) {
        self.render(vec![TreeEntry::placeholder(SERVICES_UNAVAILABLE)]);
    }

    /// Moves forward one page. No-op on the last known page.
    pub async fn go_to_next_page(&self) -> bool {
        let moved = {
            let mut state = self.lock_state();
            if state.pagination.has_next() {
                state.pagination.current_page += 1;
                true
            } else {
                false
            }
        };
        if moved {
            self.refresh().await;
        }
        moved
    }

    /// Moves back one page. No-op on page 1.
    pub async fn go_to_previous_page(&self) -> bool {
        let moved = {
            let mut state = self.lock_state();
            if state.pagination.has_previous() {
                state.pagination.current_page -= 1;
                true
            } else {
                false
            }
        };
        if moved {
            self.refresh().await;
        }
        moved
    }

    /// Changes the page size and returns to page 1.
    pub async fn update_items_per_page(&self, items_per_page: u32) -> Result<(), CollectionError> {
        if !(MIN_ITEMS_PER_PAGE..=MAX_ITEMS_PER_PAGE).contains(&items_per_page) {
            return Err(CollectionError::InvalidPageSize {
                requested: items_per_page,
                min: MIN_ITEMS_PER_PAGE,
                max: MAX_ITEMS_PER_PAGE,
            });
        }
        {
            let mut state = self.lock_state();
            state.pagination.items_per_page = items_per_page;
            state.pagination.current_page = 1;
        }
        self.refresh().await;
        Ok(())
    }

    /// Narrows the collection (component type, project) and returns to page 1.
    pub async fn set_scope(&self, scope: Option<String>) {
        {
            let mut state = self.lock_state();
            if state.scope == scope {
                return;
            }
            state.scope = scope;
            state.pagination.current_page = 1;
        }
        self.refresh().await;
    }

    /// Top-level rows when `parent` is `None`, otherwise the rows below it.
    pub fn get_children(&self, parent: Option<&TreeEntry>) -> Vec<TreeEntry> {
        match parent {
            None => self.lock_state().entries.clone(),
            Some(TreeEntry::Data(data)) => self.children_of(data),
            Some(_) => Vec::new(),
        }
    }

    fn children_of(&self, data: &DataEntry) -> Vec<TreeEntry> {
        if !data.expandable {
            return Vec::new();
        }
        self.source.children(data)
    }

    /// Drops every cached page.
    pub fn invalidate(&self) {
        self.cache.clear();
    }
}

/// Releases the refresh slot, also when the running pass is cancelled, and
/// wakes merged callers so one of them can take over.
struct RunningGuard<'a> {
    refreshing: &'a AtomicBool,
    completed: &'a watch::Sender<u64>,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.refreshing.store(false, Ordering::SeqCst);
        self.completed.send_modify(|_| {});
    }
}

fn navigation(direction: NavDirection, pagination: &Pagination) -> TreeEntry {
    let target_page = match direction {
        NavDirection::Previous => pagination.current_page - 1,
        NavDirection::Next => pagination.current_page + 1,
    };
    TreeEntry::Navigation {
        direction,
        target_page,
    }
}

/// Cache key covering everything that selects a page.
pub fn cache_key(method: &str, page: u32, items_per_page: u32, scope: Option<&str>) -> String {
    format!(
        "{}:{}:{}:{}",
        method,
        page,
        items_per_page,
        scope.unwrap_or("")
    )
}

#[cfg(test)]
#[path = "tests/provider_tests.rs"]
mod tests;
