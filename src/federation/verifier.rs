//! Inbox request verification
//!
//! An incoming activity is checked against its embedded Data Integrity
//! proof first, then against its HTTP signature. A proof that verifies to
//! `false` is final: a tampered proof is never masked by a legacy signature.
//! A proof whose key cannot be resolved, or that the suite cannot check,
//! falls through to the signature path.

use http::HeaderMap;
use serde_json::Value;
use std::sync::Arc;
use url::Url;

use crate::metrics::VERIFICATIONS_TOTAL;

use super::keys::PublicKey;
use super::resolver::{ActorKeyResolver, KeyResolution};
use super::suite::{CryptoSuite, IncomingMessage, SuiteError};
use super::{draft, proof, rfc9421};

/// Mechanism that authenticated a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifiedBy {
    Proof,
    DraftCavage,
    Rfc9421,
}

impl VerifiedBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerifiedBy::Proof => "proof",
            VerifiedBy::DraftCavage => "draft-cavage",
            VerifiedBy::Rfc9421 => "rfc9421",
        }
    }
}

/// Result of verifying one inbox request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationOutcome {
    Verified {
        key_id: String,
        from_cache: bool,
        verified_by: VerifiedBy,
    },
    SignatureInvalid,
    KeyNotFound,
    MalformedSignatureHeader,
    UnsupportedKeyType,
}

impl VerificationOutcome {
    pub fn is_verified(&self) -> bool {
        matches!(self, VerificationOutcome::Verified { .. })
    }

    /// Key id of a verified request
    pub fn key_id(&self) -> Option<&str> {
        match self {
            VerificationOutcome::Verified { key_id, .. } => Some(key_id),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationOutcome::Verified { .. } => "verified",
            VerificationOutcome::SignatureInvalid => "signature_invalid",
            VerificationOutcome::KeyNotFound => "key_not_found",
            VerificationOutcome::MalformedSignatureHeader => "malformed_signature_header",
            VerificationOutcome::UnsupportedKeyType => "unsupported_key_type",
        }
    }
}

/// Outcome of the proof path when it does not conclude
enum ProofStep {
    Done(VerificationOutcome),
    FallThrough,
}

/// Header signature found on a request
struct SignatureParams {
    key_id: String,
    by: VerifiedBy,
}

/// Verifies inbox requests
#[derive(Clone)]
pub struct InboxVerifier {
    resolver: ActorKeyResolver,
    suite: Arc<dyn CryptoSuite>,
}

impl InboxVerifier {
    pub fn new(resolver: ActorKeyResolver, suite: Arc<dyn CryptoSuite>) -> Self {
        Self { resolver, suite }
    }

    pub fn resolver(&self) -> &ActorKeyResolver {
        &self.resolver
    }

    /// Verify a request
    ///
    /// Never fails: every failure maps to a [`VerificationOutcome`].
    pub async fn verify(
        &self,
        body: &[u8],
        url: &Url,
        method: &str,
        headers: &HeaderMap,
    ) -> VerificationOutcome {
        let outcome = self.run(body, url, method, headers).await;
        VERIFICATIONS_TOTAL
            .with_label_values(&[outcome.as_str()])
            .inc();
        tracing::debug!(outcome = outcome.as_str(), url = %url, "Verified inbox request");
        outcome
    }

    async fn run(
        &self,
        body: &[u8],
        url: &Url,
        method: &str,
        headers: &HeaderMap,
    ) -> VerificationOutcome {
        if let Ok(document) = serde_json::from_slice::<Value>(body) {
            if let Some(info) = proof::detect(&document) {
                match self.proof_path(document, &info.verification_method).await {
                    ProofStep::Done(outcome) => return outcome,
                    ProofStep::FallThrough => {
                        tracing::debug!(
                            verification_method = %info.verification_method,
                            "Proof not usable, checking HTTP signature"
                        );
                    }
                }
            }
        }

        self.signature_path(body, url, method, headers).await
    }

    async fn proof_path(&self, document: Value, verification_method: &str) -> ProofStep {
        let (key, from_cache) = match self.resolver.resolve_proof_key(verification_method).await {
            KeyResolution::Resolved { key, from_cache } => (key, from_cache),
            KeyResolution::NotFound(reason) | KeyResolution::Unsupported(reason) => {
                tracing::debug!(verification_method = %verification_method, reason = %reason, "Proof key unavailable");
                return ProofStep::FallThrough;
            }
        };

        let suite = self.suite.clone();
        let checked =
            tokio::task::spawn_blocking(move || suite.verify_proof(&document, &key)).await;

        match checked {
            Ok(Ok(true)) => ProofStep::Done(VerificationOutcome::Verified {
                key_id: verification_method.to_string(),
                from_cache,
                verified_by: VerifiedBy::Proof,
            }),
            Ok(Ok(false)) => {
                tracing::info!(verification_method = %verification_method, "Data Integrity proof rejected");
                ProofStep::Done(VerificationOutcome::SignatureInvalid)
            }
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "Proof could not be checked");
                ProofStep::FallThrough
            }
            Err(e) => {
                tracing::error!(error = %e, "Proof verification task failed");
                ProofStep::FallThrough
            }
        }
    }

    fn signature_params(headers: &HeaderMap) -> Option<SignatureParams> {
        let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

        if let Some(input) = header("signature-input") {
            let key_id = rfc9421::parse_signature_input(input).ok()?.key_id?;
            return Some(SignatureParams {
                key_id,
                by: VerifiedBy::Rfc9421,
            });
        }

        let parsed = draft::parse_signature_header(header("signature")?).ok()?;
        Some(SignatureParams {
            key_id: parsed.key_id,
            by: VerifiedBy::DraftCavage,
        })
    }

    async fn signature_path(
        &self,
        body: &[u8],
        url: &Url,
        method: &str,
        headers: &HeaderMap,
    ) -> VerificationOutcome {
        let Some(params) = Self::signature_params(headers) else {
            return VerificationOutcome::MalformedSignatureHeader;
        };

        let (key, from_cache) = match self.resolver.resolve_signature_key(&params.key_id).await {
            KeyResolution::Resolved { key, from_cache } => (key, from_cache),
            KeyResolution::NotFound(_) => return VerificationOutcome::KeyNotFound,
            KeyResolution::Unsupported(_) => return VerificationOutcome::UnsupportedKeyType,
        };

        match self.check_signature(params.by, body, url, method, headers, key).await {
            Ok(true) => VerificationOutcome::Verified {
                key_id: params.key_id,
                from_cache,
                verified_by: params.by,
            },
            Ok(false) => VerificationOutcome::SignatureInvalid,
            Err(SuiteError::Malformed(reason)) => {
                tracing::debug!(reason = %reason, "Malformed signature");
                VerificationOutcome::MalformedSignatureHeader
            }
            Err(SuiteError::UnsupportedKey(reason)) => {
                tracing::debug!(reason = %reason, "Signature algorithm does not match key");
                VerificationOutcome::UnsupportedKeyType
            }
            Err(SuiteError::NotImplemented(scheme)) => {
                tracing::warn!(scheme = %scheme, "Crypto suite cannot verify scheme");
                VerificationOutcome::UnsupportedKeyType
            }
            Err(SuiteError::Crypto(reason)) => {
                tracing::warn!(reason = %reason, "Signature check failed");
                VerificationOutcome::SignatureInvalid
            }
        }
    }

    async fn check_signature(
        &self,
        by: VerifiedBy,
        body: &[u8],
        url: &Url,
        method: &str,
        headers: &HeaderMap,
        key: PublicKey,
    ) -> Result<bool, SuiteError> {
        let suite = self.suite.clone();
        let body = body.to_vec();
        let url = url.clone();
        let method = method.to_string();
        let headers = headers.clone();

        tokio::task::spawn_blocking(move || {
            let message = IncomingMessage {
                method: &method,
                url: &url,
                headers: &headers,
                body: &body,
            };
            match by {
                VerifiedBy::Rfc9421 => suite.verify_rfc9421(&message, &key),
                _ => suite.verify_draft(&message, &key),
            }
        })
        .await
        .map_err(|e| SuiteError::Crypto(format!("verification task failed: {}", e)))?
    }
}
