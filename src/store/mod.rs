//! Platform persistence: a minimal async key-value capability.
//!
//! DESIGN
//! ======
//! The token layer only needs get/set/remove on string keys, so backends stay
//! small: [`MemoryStore`] for tests and ephemeral sessions, [`FileStore`] as
//! the on-disk fallback. A secure OS keystore slots in behind the same trait.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

// =============================================================================
// ERROR
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backing medium could not be read or written.
    #[error("store io failed: {0}")]
    Io(#[from] std::io::Error),

    /// Persisted contents exist but do not parse.
    #[error("store contents corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

// =============================================================================
// TRAIT
// =============================================================================

#[async_trait::async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Remove `key`. Removing an absent key succeeds.
    async fn remove(&self, key: &str) -> Result<(), StoreError>;
}
