//! Paginated collections behind the list views.

pub mod entries;
pub mod errors;
pub mod page;
pub mod poller;
pub mod provider;
pub mod sources;

pub use entries::{DataEntry, NavDirection, TreeEntry};
pub use errors::CollectionError;
pub use page::{Page, Pagination, DEFAULT_ITEMS_PER_PAGE};
pub use poller::Poller;
pub use provider::CollectionProvider;
pub use sources::{builtin_source, CollectionSource, BUILTIN_SOURCES};

#[cfg(test)]
#[path = "tests/sources_tests.rs"]
mod sources_tests;

#[cfg(test)]
#[path = "tests/errors_tests.rs"]
mod errors_tests;
