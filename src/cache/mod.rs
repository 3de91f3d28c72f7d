//! Expiring key/value cache shared by every authentication step.
//!
//! The cache has no business meaning of its own. Tenant lookups, verified
//! signatures, session results and member roles are all stored here under
//! tenant-scoped keys built from [`CacheKeyTemplate`]s, and every value is a
//! pure function of its key inputs, so a lost race only costs a recomputation.

mod invalidate;
mod keys;
mod store;

pub use invalidate::CacheInvalidator;
pub use keys::{CacheKeyTemplate, CacheKeys, sha256_hex};
pub use store::{CacheStore, MemoryCacheStore, get_typed, set_typed};
