//! Federated trust bundles.
//!
//! A trust bundle carries the root CAs and JWT signing keys of one trust
//! domain. Bundles are keyed by trust-domain id when replicated.

use serde::{Deserialize, Serialize};

use crate::wire;

#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct JwtSigningKey {
    pub kid: String,
    pub pkix_bytes: Vec<u8>,
    /// Expiry as seconds since the Unix epoch.
    pub not_after: i64,
}

/// The trust material of one federated trust domain.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TrustBundle {
    /// E.g. `spiffe://example.org`.
    pub trust_domain_id: String,
    /// DER encoded root certificates.
    pub root_cas: Vec<Vec<u8>>,
    pub jwt_signing_keys: Vec<JwtSigningKey>,
    /// Suggested refresh interval in seconds.
    pub refresh_hint: i64,
}

impl TrustBundle {
    /// An empty bundle for `trust_domain_id`.
    #[must_use]
    pub fn new(trust_domain_id: impl Into<String>) -> Self {
        Self {
            trust_domain_id: trust_domain_id.into(),
            ..Self::default()
        }
    }

    /// Append a DER encoded root certificate.
    #[must_use]
    pub fn with_root_ca(mut self, der: impl Into<Vec<u8>>) -> Self {
        self.root_cas.push(der.into());
        self
    }
}

impl From<TrustBundle> for wire::Bundle {
    fn from(b: TrustBundle) -> Self {
        Self {
            trust_domain_id: b.trust_domain_id,
            root_cas: b.root_cas,
            jwt_signing_keys: b
                .jwt_signing_keys
                .into_iter()
                .map(|k| wire::JwtSigningKey {
                    kid: k.kid,
                    pkix_bytes: k.pkix_bytes,
                    not_after: k.not_after,
                })
                .collect(),
            refresh_hint: b.refresh_hint,
        }
    }
}

impl From<wire::Bundle> for TrustBundle {
    fn from(b: wire::Bundle) -> Self {
        Self {
            trust_domain_id: b.trust_domain_id,
            root_cas: b.root_cas,
            jwt_signing_keys: b
                .jwt_signing_keys
                .into_iter()
                .map(|k| JwtSigningKey {
                    kid: k.kid,
                    pkix_bytes: k.pkix_bytes,
                    not_after: k.not_after,
                })
                .collect(),
            refresh_hint: b.refresh_hint,
        }
    }
}
