//! btps-client — the sending side of the wire.
//!
//! Builds signed (optionally encrypted) artifacts byte-compatibly with what
//! the server canonicalizes for verification, speaks the newline-delimited
//! TLS line protocol, and bootstraps per-device agent sessions.

pub mod builder;
pub mod session;
pub mod transport;

pub use builder::{build_agent_artifact, build_transporter, EncryptionRequest};
pub use session::{AgentAuthClient, AgentSessionState};
pub use transport::{ClientTls, Transport};
