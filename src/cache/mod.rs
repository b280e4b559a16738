//! Client-side cache of query results.

mod keys;
mod store;
mod value;

pub use keys::{KeyFilter, KeyScope, QueryKey};
pub use store::{
    CacheConfig, CacheEvent, CacheStore, CachedData, EntryView, Freshness, Snapshot,
};
pub use value::{CacheValue, Cacheable};
