//! Result cache for Pressroom pipeline steps.
//!
//! Step results are memoized under a SHA-256 fingerprint of their canonical
//! key (step name, document, inputs, model parameters, shared-state version).
//! Entries expire after a TTL, the table is bounded with expired-first then
//! LRU eviction, and concurrent requests for one fingerprint share a single
//! computation.
//!
//! # Main types
//!
//! - [`ResultCache`]: The cache table with single-flight `get_or_compute`.
//! - [`CacheOutcome`]: Whether a value was a stored hit, coalesced, or computed.
//! - [`CacheStats`]: Sizes and lifetime counters for reports.
//! - [`fingerprint`]: Canonical-JSON SHA-256 key derivation.

/// Canonical key hashing.
pub mod fingerprint;
/// The cache table.
pub mod store;

pub use fingerprint::{canonical_json, fingerprint};
pub use store::{CacheEntryInfo, CacheOutcome, CacheStats, ResultCache};
