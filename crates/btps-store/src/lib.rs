//! btps-store — durable trust and token storage contracts.
//!
//! The pipeline and the authentication service talk to [`TrustStore`] and
//! [`TokenStore`]; deployments pick a driver. The in-memory drivers back
//! tests and single-process hosts; the JSON driver persists to one
//! `{entity: [records]}` document with debounced, lock-guarded, atomically
//! renamed writes.

pub mod contract;
pub mod json;
pub mod memory;

pub use contract::{TokenStore, TrustPatch, TrustStore};
pub use json::{JsonStoreConfig, JsonTrustStore};
pub use memory::{MemoryTokenStore, MemoryTrustStore};
