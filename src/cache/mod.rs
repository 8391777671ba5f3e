//! Versioned response stores and the strategies that read and write them.
//!
//! - Stores are named `{prefix}-{role}-{version}`; only the current version's
//!   precache and runtime stores survive activation
//! - Cache-first serves precached assets and revalidates in the background
//! - Network-first writes through to the runtime store and falls back to it
//!   (or to the offline document) when the network is unavailable

mod manager;
mod storage;
mod strategy;
mod traits;

pub use manager::{StoreManager, StoreNames};
#[cfg(test)]
pub use storage::CachedEntry;
pub use storage::{CacheStorage, SqliteStorage};
pub use strategy::StrategyExecutor;
pub use traits::{RefreshEvent, ResponseSource, Served};
