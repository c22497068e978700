//! Edge-Local Caching
//!
//! The object model, the pluggable eviction policies and the byte-bounded
//! local cache each edge owns.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        LocalCache                            │
//! │   RwLock ┌──────────────────────────┐  ┌──────────────────┐  │
//! │   ──────▶│ Box<dyn CachePolicy>     │  │ validity map     │  │
//! │          │ lru | lfu | sieve |      │  │ key -> valid?    │  │
//! │          │ cooperative | segment    │  └──────────────────┘  │
//! │          └──────────────────────────┘                        │
//! │   capacity accounting: size_for_capacity() <= capacity_bytes │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod key_value;
pub mod local_cache;
pub mod policy;

#[cfg(test)]
mod proptest;

pub use key_value::{fx_hash, Hitflag, Key, Value};
pub use local_cache::{LocalCache, LocalCacheStats, LocalGet};
pub use policy::{
    create_policy, object_charge, AdmitOutcome, CachePolicy, PolicyConfig, UpdateOutcome,
};
