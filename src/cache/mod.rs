//! On-demand static page cache.
//!
//! Article pages are served from disk when a cached artifact exists and
//! regenerated by fetching the rendered page from the origin on a miss.
//! A file that exists is considered valid forever; deletion is an external
//! operation.

mod flight;
mod middleware;
mod origin;
mod store;

pub use flight::FetchCoordinator;
pub use middleware::{ArticlePattern, CacheState, static_page_layer};
pub use origin::{FetchError, OriginClient, forwarded_headers};
pub use store::{PageStore, StoreError};
