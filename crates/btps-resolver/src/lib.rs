//! btps-resolver — identity and key discovery.
//!
//! Resolves `username$domain` identities to their inbox endpoint
//! (`_btps.<domain>` TXT) and to selector-addressed public keys
//! (`<selector>._btp.<username>.<domain>` TXT). Verification always uses the
//! selector an artifact was signed under, so key rotation never invalidates
//! in-flight artifacts. Results are cached for the record TTL and concurrent
//! lookups for the same name collapse into a single query.

pub mod cache;
pub mod dns;
pub mod record;
pub mod txt;

pub use cache::TtlCache;
pub use dns::{DnsResolver, KeyResolver, StaticResolver};
pub use record::{IdentityKeyRecord, PublicKeyEntry};
pub use txt::{parse_host_record, parse_key_record, HostEndpoint};
