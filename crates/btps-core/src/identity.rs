use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::BtpsError;

/// A BTPS identity: `username$domain`, e.g. `billing$acme.com`.
///
/// The username selects a DNS subdomain label; the domain resolves over DNS.
/// Stored in its canonical string form so it can serialize straight onto the
/// wire. Deserialization validates, so an `Identity` in a parsed artifact is
/// always well-formed.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Identity(String);

impl<'de> Deserialize<'de> for Identity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Identity::parse(&s).map_err(serde::de::Error::custom)
    }
}

impl Identity {
    /// Parse and validate an identity string.
    ///
    /// The accepted shape is `<username>$<domain>` where neither part contains
    /// whitespace and the domain has at least one dot.
    pub fn parse(s: &str) -> Result<Self, BtpsError> {
        let Some((user, domain)) = s.split_once('$') else {
            return Err(BtpsError::Identity(format!("missing '$' separator: {s}")));
        };
        if user.is_empty() || user.contains(char::is_whitespace) {
            return Err(BtpsError::Identity(format!("invalid username in: {s}")));
        }
        if domain.contains(char::is_whitespace) || domain.contains('$') {
            return Err(BtpsError::Identity(format!("invalid domain in: {s}")));
        }
        // The domain needs a dot with a label on each side.
        let Some((head, tail)) = domain.rsplit_once('.') else {
            return Err(BtpsError::Identity(format!("domain has no dot: {s}")));
        };
        if head.is_empty() || tail.is_empty() {
            return Err(BtpsError::Identity(format!("invalid domain in: {s}")));
        }
        Ok(Self(s.to_string()))
    }

    /// The username part (before `$`).
    pub fn username(&self) -> &str {
        self.0.split_once('$').map(|(u, _)| u).unwrap_or("")
    }

    /// The domain part (after `$`).
    pub fn domain(&self) -> &str {
        self.0.split_once('$').map(|(_, d)| d).unwrap_or("")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Identity {
    type Err = BtpsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identity({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_identities() {
        let id = Identity::parse("alice$a.com").unwrap();
        assert_eq!(id.username(), "alice");
        assert_eq!(id.domain(), "a.com");

        assert!(Identity::parse("finance.team$sub.example.co.uk").is_ok());
    }

    #[test]
    fn rejects_malformed_identities() {
        for bad in [
            "alice",          // no separator
            "alice$",         // empty domain
            "$a.com",         // empty username
            "alice$acme",     // no dot in domain
            "alice$.com",     // empty domain label
            "al ice$a.com",   // whitespace in username
            "alice$a .com",   // whitespace in domain
            "alice$a$b.com",  // second separator in domain
        ] {
            assert!(Identity::parse(bad).is_err(), "accepted: {bad}");
        }
    }

    #[test]
    fn serializes_as_plain_string() {
        let id = Identity::parse("bob$b.com").unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"bob$b.com\"");
        let back: Identity = serde_json::from_str("\"bob$b.com\"").unwrap();
        assert_eq!(back, id);
    }
}
