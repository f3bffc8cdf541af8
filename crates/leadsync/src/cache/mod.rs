//! Client-side cache of job and lead views.

pub mod entry;
pub mod key;
pub mod store;

pub use entry::{CacheEntry, Entity, Page};
pub use key::{LeadQuery, PageRequest, QueryKey, QueryScope};
pub use store::{CacheEvent, CacheEventKind, CacheStore, QueryCache};
