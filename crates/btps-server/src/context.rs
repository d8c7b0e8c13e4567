//! Per-request context shared by middleware, the pipeline, and dispatch.

use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use btps_core::{BtpsError, BtpsResponse, ServerArtifact};

/// The response slot for one request line. Exactly one response wins; later
/// writers lose silently, which is what lets middleware short-circuit ahead
/// of the pipeline and handlers answer ahead of the default acknowledgement.
#[derive(Default)]
pub struct ResponseCtx {
    req_id: Mutex<Option<String>>,
    response: Mutex<Option<BtpsResponse>>,
    sent: AtomicBool,
}

impl ResponseCtx {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the artifact id once parsing has produced one, so error
    /// responses can correlate.
    pub fn set_req_id(&self, id: &str) {
        *self.req_id.lock().expect("response ctx lock poisoned") = Some(id.to_string());
    }

    pub fn req_id(&self) -> Option<String> {
        self.req_id.lock().expect("response ctx lock poisoned").clone()
    }

    /// Send a prebuilt response. First writer wins.
    pub fn send_res(&self, response: BtpsResponse) {
        if self.sent.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.response.lock().expect("response ctx lock poisoned") = Some(response);
    }

    /// Send an error with an explicit status code and message.
    pub fn send_error(&self, code: u16, message: impl Into<String>) {
        self.send_res(BtpsResponse::error_with_code(self.req_id(), code, message));
    }

    /// Send a typed protocol error.
    pub fn send_typed_error(&self, error: &BtpsError) {
        self.send_res(BtpsResponse::error(self.req_id(), error));
    }

    pub fn response_sent(&self) -> bool {
        self.sent.load(Ordering::SeqCst)
    }

    pub fn take_response(&self) -> Option<BtpsResponse> {
        self.response.lock().expect("response ctx lock poisoned").take()
    }
}

/// What a middleware handler observes, shaped per step so a handler can only
/// see the fields its step promises.
#[derive(Clone, Debug)]
pub enum StepContext {
    /// Before parsing: only the raw frame exists.
    ParsingBefore { raw_packet: String, remote_addr: Option<IpAddr> },
    /// After parsing: the validated artifact.
    ParsingAfter { data: Arc<ServerArtifact>, remote_addr: Option<IpAddr> },
    SignatureBefore { data: Arc<ServerArtifact> },
    SignatureAfter { data: Arc<ServerArtifact>, is_valid: bool },
    TrustBefore { data: Arc<ServerArtifact> },
    TrustAfter { data: Arc<ServerArtifact>, is_trusted: bool },
    /// Around dispatch: everything is known.
    OnArtifact { data: Arc<ServerArtifact>, is_valid: bool, is_trusted: bool },
    /// A pipeline step failed.
    OnError { error: Arc<BtpsError>, data: Option<Arc<ServerArtifact>> },
}

impl StepContext {
    /// The artifact, where the step has one.
    pub fn data(&self) -> Option<&Arc<ServerArtifact>> {
        match self {
            Self::ParsingBefore { .. } => None,
            Self::ParsingAfter { data, .. }
            | Self::SignatureBefore { data }
            | Self::SignatureAfter { data, .. }
            | Self::TrustBefore { data }
            | Self::TrustAfter { data, .. }
            | Self::OnArtifact { data, .. } => Some(data),
            Self::OnError { data, .. } => data.as_ref(),
        }
    }
}
