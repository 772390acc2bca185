//! Persistent response cache organised in named generations.
//!
//! This module provides the storage half of the offline shell:
//! - Named caches (one per generation) holding whole responses
//! - Exact-URL request keys, query string included
//! - The cacheability policy shared by precache and runtime writes

mod key;
mod storage;
mod traits;

pub use key::RequestKey;
pub use storage::{CacheStorage, SqliteStorage};
pub use traits::{CachePolicy, CachedEntry, Response, ResponseKind, ResponseSource};
