//! TXT record grammar.
//!
//! Host discovery at `_btps.<domain>`:
//!     `v=BTP1; u=btps://host:port; s=<currentSelector>`
//! Key records at `<selector>._btp.<username>.<domain>`:
//!     `v=BTP1; k=rsa|ed25519|ecdsa; p=<base64 SPKI DER>`
//!
//! Unknown tokens are ignored. A record whose `v` is not `BTP1` yields
//! `None`, as does one missing a required token.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use btps_core::constants::{DEFAULT_PORT, DNS_RECORD_VERSION};
use btps_crypto::keys::KeyType;

/// A resolved inbox endpoint plus the host's currently advertised selector.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct HostEndpoint {
    pub host: String,
    pub port: u16,
    pub selector: String,
}

fn tokens(record: &str) -> impl Iterator<Item = (&str, &str)> {
    record
        .split(';')
        .filter_map(|part| part.trim().split_once('='))
        .map(|(k, v)| (k.trim(), v.trim()))
}

fn version_ok(record: &str) -> bool {
    tokens(record).any(|(k, v)| k == "v" && v == DNS_RECORD_VERSION)
}

/// Parse a host-discovery TXT record.
pub fn parse_host_record(record: &str) -> Option<HostEndpoint> {
    if !version_ok(record) {
        return None;
    }
    let mut url = None;
    let mut selector = None;
    for (k, v) in tokens(record) {
        match k {
            "u" => url = Some(v),
            "s" => selector = Some(v),
            _ => {}
        }
    }
    let url = url?;
    let selector = selector?.to_string();

    let rest = url.strip_prefix("btps://").unwrap_or(url);
    let (host, port) = match rest.rsplit_once(':') {
        Some((h, p)) => (h, p.parse().ok()?),
        None => (rest, DEFAULT_PORT),
    };
    if host.is_empty() {
        return None;
    }
    Some(HostEndpoint { host: host.to_string(), port, selector })
}

/// Parse a key TXT record, returning the advertised key type and the PEM
/// rendering of the `p=` payload.
pub fn parse_key_record(record: &str) -> Option<(KeyType, String)> {
    if !version_ok(record) {
        return None;
    }
    let mut key_type = None;
    let mut payload = None;
    for (k, v) in tokens(record) {
        match k {
            "k" => key_type = KeyType::parse(v),
            "p" => payload = Some(v),
            _ => {}
        }
    }
    let der = BASE64.decode(payload?).ok()?;
    Some((key_type?, pem_from_spki_der(&der)))
}

/// Wrap SPKI DER bytes in PEM armor with 64-character lines.
pub fn pem_from_spki_der(der: &[u8]) -> String {
    let b64 = BASE64.encode(der);
    let mut pem = String::from("-----BEGIN PUBLIC KEY-----\n");
    for chunk in b64.as_bytes().chunks(64) {
        pem.push_str(std::str::from_utf8(chunk).unwrap_or_default());
        pem.push('\n');
    }
    pem.push_str("-----END PUBLIC KEY-----\n");
    pem
}

/// DNS name carrying the host record for `domain`.
pub fn host_record_name(domain: &str) -> String {
    format!("{}.{domain}", btps_core::constants::DNS_HOST_PREFIX)
}

/// DNS name carrying the key record for `(identity, selector)`.
pub fn key_record_name(username: &str, domain: &str, selector: &str) -> String {
    format!("{selector}.{}.{username}.{domain}", btps_core::constants::DNS_KEY_INFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_host_record() {
        let ep = parse_host_record("v=BTP1; u=btps://inbox.b.com:3443; s=btps1").unwrap();
        assert_eq!(ep.host, "inbox.b.com");
        assert_eq!(ep.port, 3443);
        assert_eq!(ep.selector, "btps1");
    }

    #[test]
    fn host_port_defaults_when_absent() {
        let ep = parse_host_record("v=BTP1; u=btps://inbox.b.com; s=btps1").unwrap();
        assert_eq!(ep.port, btps_core::constants::DEFAULT_PORT);
    }

    #[test]
    fn wrong_version_yields_none() {
        assert!(parse_host_record("v=BTP2; u=btps://x.com; s=s1").is_none());
        assert!(parse_key_record("v=SPF1; k=rsa; p=AA==").is_none());
    }

    #[test]
    fn unknown_tokens_are_ignored() {
        let ep =
            parse_host_record("v=BTP1; zz=ignored; u=btps://inbox.b.com:9000; s=s1; q=1").unwrap();
        assert_eq!(ep.port, 9000);
    }

    #[test]
    fn key_record_decodes_to_pem() {
        let (kty, pem) = parse_key_record("v=BTP1; k=rsa; p=AAEC").unwrap();
        assert_eq!(kty, KeyType::Rsa);
        assert!(pem.starts_with("-----BEGIN PUBLIC KEY-----\n"));
        assert!(pem.ends_with("-----END PUBLIC KEY-----\n"));
    }

    #[test]
    fn malformed_base64_yields_none() {
        assert!(parse_key_record("v=BTP1; k=rsa; p=!!!").is_none());
    }

    #[test]
    fn record_names_follow_the_layout() {
        assert_eq!(host_record_name("b.com"), "_btps.b.com");
        assert_eq!(key_record_name("alice", "a.com", "btps1"), "btps1._btp.alice.a.com");
    }
}
