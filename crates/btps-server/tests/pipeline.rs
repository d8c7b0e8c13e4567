//! Pipeline scenarios: trust handshake, key rotation, agent bootstrap and
//! refresh, untrusted delivery, and delegation checks — run against the
//! in-memory stores and a static resolver, no sockets involved.

use std::sync::Arc;

use chrono::Utc;
use once_cell::sync::Lazy;
use serde_json::json;
use uuid::Uuid;

use btps_auth::AuthService;
use btps_client::builder::{build_agent_artifact, build_transporter};
use btps_core::artifact::{
    Attestation, Delegation, HashAlgorithm, SignatureBlock, TransporterArtifact, TransporterType,
};
use btps_core::document::AgentAction;
use btps_core::trust::TrustStatus;
use btps_core::{trust_id, BtpsResponse, Identity, ServerArtifact};
use btps_crypto::keys::BtpsKeyPair;
use btps_crypto::sign::sign_payload;
use btps_crypto::to_canonical_json;
use btps_resolver::{HostEndpoint, StaticResolver};
use btps_server::{Dispatcher, MiddlewareManager, Pipeline, ResponseCtx};
use btps_store::{MemoryTokenStore, MemoryTrustStore, TrustStore};

static ALICE_KEY: Lazy<BtpsKeyPair> = Lazy::new(BtpsKeyPair::generate_ed25519);
static ALICE_KEY_V2: Lazy<BtpsKeyPair> = Lazy::new(BtpsKeyPair::generate_ed25519);
static BOB_KEY: Lazy<BtpsKeyPair> = Lazy::new(BtpsKeyPair::generate_ed25519);

fn alice() -> Identity {
    Identity::parse("alice$a.com").unwrap()
}

fn bob() -> Identity {
    Identity::parse("bob$b.com").unwrap()
}

struct World {
    resolver: Arc<StaticResolver>,
    trust: Arc<MemoryTrustStore>,
    auth: Arc<AuthService>,
    pipeline: Pipeline,
}

fn world() -> World {
    let resolver = Arc::new(StaticResolver::new());
    resolver.add_host(
        "a.com",
        HostEndpoint { host: "inbox.a.com".into(), port: 3443, selector: "btps1".into() },
    );
    resolver.add_host(
        "b.com",
        HostEndpoint { host: "inbox.b.com".into(), port: 3443, selector: "btps1".into() },
    );
    resolver.add_key(&alice(), "btps1", &ALICE_KEY.public_key_pem().unwrap());
    resolver.add_key(&bob(), "btps1", &BOB_KEY.public_key_pem().unwrap());

    let trust = Arc::new(MemoryTrustStore::new());
    let tokens = Arc::new(MemoryTokenStore::new());
    let auth = Arc::new(AuthService::new(trust.clone(), tokens.clone()));
    let dispatcher = Arc::new(Dispatcher::new(Some(auth.clone())));
    let pipeline = Pipeline::new(
        resolver.clone(),
        trust.clone(),
        Arc::new(MiddlewareManager::new()),
        dispatcher,
    );
    World { resolver, trust, auth, pipeline }
}

impl World {
    async fn process<T: serde::Serialize>(&self, artifact: &T) -> BtpsResponse {
        let line = to_canonical_json(&serde_json::to_value(artifact).unwrap());
        let res = ResponseCtx::new();
        self.pipeline.process_line(&line, None, &res).await;
        res.take_response().expect("pipeline must always respond")
    }
}

fn trust_request_doc() -> serde_json::Value {
    json!({ "name": "Alice", "email": "alice@a.com", "reason": "monthly invoicing" })
}

fn invoice_doc() -> serde_json::Value {
    json!({
        "id": "inv-1",
        "title": "March services",
        "issuedAt": "2026-03-01T00:00:00Z",
        "status": "unpaid",
        "totalAmount": 150.5,
        "currency": "USD",
        "lineItems": { "columns": ["desc", "amount"], "rows": [["work", 150.5]] },
    })
}

async fn send_trust_request(w: &World, selector: &str, key: &BtpsKeyPair) -> BtpsResponse {
    let artifact = build_transporter(
        w.resolver.as_ref(),
        key,
        alice(),
        bob(),
        selector,
        TransporterType::TrustRequest,
        trust_request_doc(),
        None,
    )
    .await
    .unwrap();
    w.process(&artifact).await
}

async fn accept_trust(w: &World) -> BtpsResponse {
    let artifact = build_transporter(
        w.resolver.as_ref(),
        &BOB_KEY,
        bob(),
        alice(),
        "btps1",
        TransporterType::TrustResponse,
        json!({
            "decision": "accepted",
            "decidedAt": Utc::now(),
            "decidedBy": "bob$b.com",
        }),
        None,
    )
    .await
    .unwrap();
    w.process(&artifact).await
}

// ── Scenario: happy trust handshake ──────────────────────────────────────────

#[tokio::test]
async fn trust_handshake_end_to_end() {
    let w = world();

    let response = send_trust_request(&w, "btps1", &ALICE_KEY).await;
    assert!(response.status.ok, "{:?}", response.status);
    assert_eq!(response.status.code, 200);
    assert!(response.req_id.is_some());

    let record =
        w.trust.get_by_id(&trust_id("alice$a.com", "bob$b.com")).await.unwrap().unwrap();
    assert_eq!(record.status, TrustStatus::Pending);

    let response = accept_trust(&w).await;
    assert!(response.status.ok, "{:?}", response.status);
    let record =
        w.trust.get_by_id(&trust_id("alice$a.com", "bob$b.com")).await.unwrap().unwrap();
    assert_eq!(record.status, TrustStatus::Accepted);
    assert_eq!(record.decided_by.as_deref(), Some("bob$b.com"));

    // Delivery now flows.
    let doc = build_transporter(
        w.resolver.as_ref(),
        &ALICE_KEY,
        alice(),
        bob(),
        "btps1",
        TransporterType::Document,
        invoice_doc(),
        None,
    )
    .await
    .unwrap();
    let response = w.process(&doc).await;
    assert!(response.status.ok, "{:?}", response.status);

    // A second TRUST_REQ against the active record is refused.
    let response = send_trust_request(&w, "btps1", &ALICE_KEY).await;
    assert!(!response.status.ok);
    assert_eq!(response.status.code, 403);
    assert!(response.status.message.unwrap().starts_with("TRUST_ALREADY_ACTIVE"));
}

// ── Scenario: key rotation by selector ───────────────────────────────────────

#[tokio::test]
async fn key_rotation_keeps_in_flight_artifacts_verifiable() {
    let w = world();

    // An artifact signed under btps1, still in flight.
    let in_flight = build_transporter(
        w.resolver.as_ref(),
        &ALICE_KEY,
        alice(),
        bob(),
        "btps1",
        TransporterType::TrustRequest,
        trust_request_doc(),
        None,
    )
    .await
    .unwrap();

    // Alice publishes btps2 and switches to it.
    w.resolver.add_key(&alice(), "btps2", &ALICE_KEY_V2.public_key_pem().unwrap());

    let fresh = send_trust_request(&w, "btps2", &ALICE_KEY_V2).await;
    assert!(fresh.status.ok, "{:?}", fresh.status);

    // The in-flight artifact still verifies while btps1 resolves. (It finds
    // the pending record from the btps2 request and simply re-pends it.)
    let response = w.process(&in_flight).await;
    assert!(response.status.ok, "{:?}", response.status);

    // Once btps1 is withdrawn, the old signature can no longer be checked.
    w.resolver.remove_key(&alice(), "btps1");
    let stale = build_transporter(
        w.resolver.as_ref(),
        &ALICE_KEY,
        alice(),
        bob(),
        "btps1",
        TransporterType::TrustRequest,
        trust_request_doc(),
        None,
    )
    .await
    .unwrap();
    let response = w.process(&stale).await;
    assert!(!response.status.ok);
    assert!(response.status.message.unwrap().starts_with("SELECTOR_NOT_FOUND"));
}

// ── Scenario: untrusted delivery ─────────────────────────────────────────────

#[tokio::test]
async fn untrusted_document_is_refused_with_403() {
    let w = world();
    let mallory = Identity::parse("c$y.com").unwrap();
    let mallory_key = BtpsKeyPair::generate_ed25519();
    w.resolver.add_key(&mallory, "btps1", &mallory_key.public_key_pem().unwrap());
    w.resolver.add_host(
        "y.com",
        HostEndpoint { host: "inbox.y.com".into(), port: 3443, selector: "btps1".into() },
    );

    let artifact = build_transporter(
        w.resolver.as_ref(),
        &mallory_key,
        mallory,
        bob(),
        "btps1",
        TransporterType::Document,
        invoice_doc(),
        None,
    )
    .await
    .unwrap();
    let response = w.process(&artifact).await;
    assert!(!response.status.ok);
    assert_eq!(response.status.code, 403);
    let message = response.status.message.unwrap();
    assert!(message.contains("trust record does not exist"), "{message}");
}

// ── Scenario: agent bootstrap and refresh ────────────────────────────────────

async fn enroll_agent(
    w: &World,
    device_key: &BtpsKeyPair,
    token: &str,
) -> BtpsResponse {
    let finance = Identity::parse("finance$x.com").unwrap();
    let artifact = build_agent_artifact(
        device_key,
        &format!("btps_ag_enroll_{}", Uuid::new_v4()),
        finance.clone(),
        AgentAction::AuthRequest,
        Some(json!({
            "identity": "finance$x.com",
            "authToken": token,
            "publicKey": device_key.public_key_pem().unwrap(),
        })),
        None,
    )
    .unwrap();
    w.process(&artifact).await
}

#[tokio::test]
async fn auth_request_is_single_use() {
    let w = world();
    let finance = Identity::parse("finance$x.com").unwrap();
    let device_key = BtpsKeyPair::generate_ed25519();
    w.auth.store_auth_token("YDVKSEU4CEEW", &finance, None).await.unwrap();

    let response = enroll_agent(&w, &device_key, "YDVKSEU4CEEW").await;
    assert!(response.status.ok, "{:?}", response.status);
    let session = response.document.unwrap();
    assert!(session["agentId"].as_str().unwrap().starts_with("btps_ag_"));
    assert!(!session["refreshToken"].as_str().unwrap().is_empty());

    // The trust record binds the device key to the user.
    let agent_id = session["agentId"].as_str().unwrap();
    let record =
        w.trust.get_by_id(&trust_id(agent_id, "finance$x.com")).await.unwrap().unwrap();
    assert_eq!(record.status, TrustStatus::Accepted);

    // Replaying the consumed token fails.
    let response = enroll_agent(&w, &device_key, "YDVKSEU4CEEW").await;
    assert!(!response.status.ok);
    assert_eq!(response.status.code, 403);
    assert!(response.status.message.unwrap().starts_with("AUTHENTICATION_INVALID"));
}

#[tokio::test]
async fn refresh_rotates_token_and_device_key() {
    let w = world();
    let finance = Identity::parse("finance$x.com").unwrap();
    let device_key = BtpsKeyPair::generate_ed25519();
    w.auth.store_auth_token("TOKEN2222", &finance, None).await.unwrap();

    let session = enroll_agent(&w, &device_key, "TOKEN2222").await.document.unwrap();
    let agent_id = session["agentId"].as_str().unwrap().to_string();
    let refresh_token = session["refreshToken"].as_str().unwrap().to_string();

    let new_key = BtpsKeyPair::generate_ed25519();
    let refresh = build_agent_artifact(
        &device_key,
        &agent_id,
        finance.clone(),
        AgentAction::AuthRefresh,
        Some(json!({
            "identity": "finance$x.com",
            "refreshToken": refresh_token,
            "publicKey": new_key.public_key_pem().unwrap(),
        })),
        None,
    )
    .unwrap();
    let response = w.process(&refresh).await;
    assert!(response.status.ok, "{:?}", response.status);
    let renewed = response.document.unwrap();
    let new_refresh = renewed["refreshToken"].as_str().unwrap().to_string();
    assert_ne!(new_refresh, refresh_token);

    // Key history recorded the rotation; the record now carries the new key.
    let record = w.trust.get_by_id(&trust_id(&agent_id, "finance$x.com")).await.unwrap().unwrap();
    assert_eq!(
        record.public_key_fingerprint,
        new_key.public_key().fingerprint().unwrap()
    );
    assert_eq!(record.key_history.len(), 1);

    // The old refresh token is dead; subsequent artifacts must be signed
    // with the rotated key.
    let replay = build_agent_artifact(
        &new_key,
        &agent_id,
        finance.clone(),
        AgentAction::AuthRefresh,
        Some(json!({
            "identity": "finance$x.com",
            "refreshToken": refresh_token,
        })),
        None,
    )
    .unwrap();
    let response = w.process(&replay).await;
    assert!(!response.status.ok);
    assert!(response.status.message.unwrap().starts_with("AUTHENTICATION_INVALID"));
}

#[tokio::test]
async fn agent_actions_require_an_active_trust_record() {
    let w = world();
    let stray_key = BtpsKeyPair::generate_ed25519();
    let artifact = build_agent_artifact(
        &stray_key,
        "btps_ag_nonexistent",
        alice(),
        AgentAction::InboxFetch,
        None,
        None,
    )
    .unwrap();
    let response = w.process(&artifact).await;
    assert!(!response.status.ok);
    assert_eq!(response.status.code, 403);
    assert!(response.status.message.unwrap().starts_with("TRUST_NON_EXISTENT"));
}

// ── Delegation ───────────────────────────────────────────────────────────────

fn delegated_artifact(
    agent_key: &BtpsKeyPair,
    delegation_tamper: impl FnOnce(&mut Delegation),
) -> TransporterArtifact {
    let mut delegation = Delegation {
        agent_id: "btps_ag_delegate".into(),
        agent_pub_key: agent_key.public_key_pem().unwrap(),
        signed_by: alice(),
        issued_at: Utc::now(),
        signature: SignatureBlock {
            algorithm_hash: HashAlgorithm::Sha256,
            value: String::new(),
            fingerprint: String::new(),
        },
        selector: "btps1".into(),
        attestation: None,
    };
    delegation.signature = sign_payload(&delegation.signing_payload(), &ALICE_KEY).unwrap();
    delegation_tamper(&mut delegation);

    let mut artifact = TransporterArtifact {
        version: "1.0.0".into(),
        id: Uuid::new_v4().to_string(),
        issued_at: Utc::now(),
        artifact_type: TransporterType::TrustRequest,
        from: alice(),
        to: bob(),
        selector: "btps1".into(),
        signature: SignatureBlock {
            algorithm_hash: HashAlgorithm::Sha256,
            value: String::new(),
            fingerprint: String::new(),
        },
        encryption: None,
        document: trust_request_doc(),
        delegation: Some(delegation),
    };
    artifact.signature = sign_payload(
        &ServerArtifact::Transporter(artifact.clone()).unsigned_value(),
        agent_key,
    )
    .unwrap();
    artifact
}

#[tokio::test]
async fn delegated_artifact_verifies_under_the_delegated_key() {
    let w = world();
    let agent_key = BtpsKeyPair::generate_ed25519();
    let artifact = delegated_artifact(&agent_key, |_| {});
    let response = w.process(&artifact).await;
    assert!(response.status.ok, "{:?}", response.status);
}

#[tokio::test]
async fn delegation_sender_mismatch_is_invalid() {
    let w = world();
    let agent_key = BtpsKeyPair::generate_ed25519();
    let mut artifact = delegated_artifact(&agent_key, |_| {});
    // Bob claims a delegation Alice signed for herself.
    artifact.from = bob();
    artifact.signature = sign_payload(
        &ServerArtifact::Transporter(artifact.clone()).unsigned_value(),
        &agent_key,
    )
    .unwrap();
    let response = w.process(&artifact).await;
    assert!(!response.status.ok);
    assert!(response.status.message.unwrap().starts_with("DELEGATION_INVALID"));
}

#[tokio::test]
async fn delegated_key_fingerprint_must_match_the_signature() {
    let w = world();
    let agent_key = BtpsKeyPair::generate_ed25519();
    let other_key = BtpsKeyPair::generate_ed25519();
    let artifact = delegated_artifact(&agent_key, |delegation| {
        // The delegation binds a different key than the one that will sign.
        delegation.agent_pub_key = other_key.public_key_pem().unwrap();
        delegation.signature =
            sign_payload(&delegation.signing_payload(), &ALICE_KEY).unwrap();
    });
    let response = w.process(&artifact).await;
    assert!(!response.status.ok);
    assert!(response.status.message.unwrap().starts_with("DELEGATION_INVALID"));
}

#[tokio::test]
async fn tampered_delegation_signature_fails() {
    let w = world();
    let agent_key = BtpsKeyPair::generate_ed25519();
    let artifact = delegated_artifact(&agent_key, |delegation| {
        delegation.issued_at = delegation.issued_at + chrono::Duration::seconds(1);
    });
    let response = w.process(&artifact).await;
    assert!(!response.status.ok);
    assert!(response
        .status
        .message
        .unwrap()
        .starts_with("DELEGATION_SIG_VERIFICATION"));
}

#[tokio::test]
async fn attested_delegation_verifies_through_the_attestor() {
    let w = world();
    let agent_key = BtpsKeyPair::generate_ed25519();
    let attestor = Identity::parse("registry$attest.org").unwrap();
    let attestor_key = BtpsKeyPair::generate_ed25519();
    w.resolver.add_key(&attestor, "att1", &attestor_key.public_key_pem().unwrap());

    let artifact = delegated_artifact(&agent_key, |delegation| {
        let sig = sign_payload(&delegation.attestation_payload(), &attestor_key).unwrap();
        delegation.attestation = Some(Attestation {
            algorithm_hash: sig.algorithm_hash,
            value: sig.value,
            fingerprint: sig.fingerprint,
            signed_by: attestor.clone(),
            selector: "att1".into(),
        });
    });
    let response = w.process(&artifact).await;
    assert!(response.status.ok, "{:?}", response.status);

    // A bad attestation kills the artifact even when the delegation itself
    // is sound.
    let artifact = delegated_artifact(&agent_key, |delegation| {
        let sig = sign_payload(&delegation.attestation_payload(), &attestor_key).unwrap();
        delegation.attestation = Some(Attestation {
            algorithm_hash: sig.algorithm_hash,
            value: sig.value,
            fingerprint: sig.fingerprint,
            signed_by: attestor.clone(),
            selector: "missing".into(),
        });
    });
    let response = w.process(&artifact).await;
    assert!(!response.status.ok);
    assert!(response
        .status
        .message
        .unwrap()
        .starts_with("ATTESTATION_VERIFICATION"));
}

// ── Parsing errors ───────────────────────────────────────────────────────────

#[tokio::test]
async fn malformed_lines_get_typed_errors() {
    let w = world();

    let res = ResponseCtx::new();
    w.pipeline.process_line("{not json", None, &res).await;
    let response = res.take_response().unwrap();
    assert_eq!(response.status.code, 400);
    assert!(response.status.message.unwrap().starts_with("INVALID_JSON"));

    let res = ResponseCtx::new();
    w.pipeline.process_line(r#"{"hello":"world"}"#, None, &res).await;
    let response = res.take_response().unwrap();
    assert_eq!(response.status.code, 400);
    assert!(response.status.message.unwrap().starts_with("VALIDATION"));
}

// ── Identity lookup ──────────────────────────────────────────────────────────

#[tokio::test]
async fn identity_lookup_serves_published_key_records() {
    let w = world();
    let entry = btps_resolver::PublicKeyEntry {
        selector: "btps1".into(),
        public_key: BOB_KEY.public_key_pem().unwrap(),
        key_type: btps_crypto::keys::KeyType::Ed25519,
        version: 1,
        created_at: Utc::now(),
    };
    w.pipeline
        .dispatcher()
        .add_identity_record(btps_resolver::IdentityKeyRecord::new(bob(), entry))
        .unwrap();

    let lookup = json!({
        "version": "1.0.0",
        "id": "lookup-1",
        "issuedAt": Utc::now(),
        "identity": "bob$b.com",
        "from": "alice$a.com",
        "hostSelector": "btps1",
    });
    let response = w.process(&lookup).await;
    assert!(response.status.ok, "{:?}", response.status);
    let document = response.document.unwrap();
    assert_eq!(document["selector"], "btps1");
    assert_eq!(document["publicKey"], BOB_KEY.public_key_pem().unwrap());

    // An unknown selector is a typed miss.
    let lookup = json!({
        "version": "1.0.0",
        "id": "lookup-2",
        "issuedAt": Utc::now(),
        "identity": "bob$b.com",
        "from": "alice$a.com",
        "hostSelector": "btps1",
        "identitySelector": "btps9",
    });
    let response = w.process(&lookup).await;
    assert!(!response.status.ok);
    assert!(response.status.message.unwrap().starts_with("SELECTOR_NOT_FOUND"));
}

// ── Privacy enforcement on delivery ──────────────────────────────────────────

static BOB_RSA_KEY: Lazy<BtpsKeyPair> = Lazy::new(|| BtpsKeyPair::generate_rsa().unwrap());

#[tokio::test]
async fn encrypted_trust_enforces_document_privacy() {
    let w = world();
    // Bob republishes under an RSA key so senders can wrap to it.
    w.resolver.add_key(&bob(), "btps1", &BOB_RSA_KEY.public_key_pem().unwrap());

    let request = build_transporter(
        w.resolver.as_ref(),
        &ALICE_KEY,
        alice(),
        bob(),
        "btps1",
        TransporterType::TrustRequest,
        json!({
            "name": "Alice",
            "email": "alice@a.com",
            "reason": "billing",
            "privacyType": "encrypted",
        }),
        None,
    )
    .await
    .unwrap();
    assert!(w.process(&request).await.status.ok);

    // Bob accepts, signing under the republished RSA key.
    let acceptance = build_transporter(
        w.resolver.as_ref(),
        &BOB_RSA_KEY,
        bob(),
        alice(),
        "btps1",
        TransporterType::TrustResponse,
        json!({
            "decision": "accepted",
            "decidedAt": Utc::now(),
            "decidedBy": "bob$b.com",
        }),
        None,
    )
    .await
    .unwrap();
    assert!(w.process(&acceptance).await.status.ok);

    // Cleartext delivery violates the agreed privacy.
    let cleartext = build_transporter(
        w.resolver.as_ref(),
        &ALICE_KEY,
        alice(),
        bob(),
        "btps1",
        TransporterType::Document,
        invoice_doc(),
        None,
    )
    .await
    .unwrap();
    let response = w.process(&cleartext).await;
    assert!(!response.status.ok);
    assert!(response.status.message.unwrap().starts_with("TRUST_NOT_ALLOWED"));

    // Encrypted delivery is accepted.
    let encrypted = build_transporter(
        w.resolver.as_ref(),
        &ALICE_KEY,
        alice(),
        bob(),
        "btps1",
        TransporterType::Document,
        invoice_doc(),
        Some(btps_client::builder::EncryptionRequest::default()),
    )
    .await
    .unwrap();
    let response = w.process(&encrypted).await;
    assert!(response.status.ok, "{:?}", response.status);
}
