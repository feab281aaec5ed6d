//! Cryptographic seam for the signing and verification pipelines
//!
//! The pipelines decide *which* scheme runs with *which* key; a
//! [`CryptoSuite`] does the canonicalization and math. Suite methods are
//! synchronous and CPU-bound, and are called from blocking threads.

use chrono::{DateTime, Utc};
use http::HeaderMap;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use super::headers::HeaderList;
use super::keys::{ActorKeyHandle, PrivateKey, PublicKey};
use super::scheme::SignatureScheme;
use super::{draft, ld_signature, proof, rfc9421};

/// Errors raised by a crypto suite
#[derive(Debug, Error)]
pub enum SuiteError {
    #[error("signature scheme {0} is not implemented")]
    NotImplemented(SignatureScheme),

    #[error("key type not supported: {0}")]
    UnsupportedKey(String),

    #[error("malformed signature: {0}")]
    Malformed(String),

    #[error("signing failed: {0}")]
    Crypto(String),
}

/// Outgoing request as seen by a signer
#[derive(Debug, Clone, Copy)]
pub struct OutgoingMessage<'a> {
    pub method: &'a str,
    pub url: &'a Url,
    pub headers: &'a HeaderList,
    /// Final body bytes, if a body is sent
    pub body: Option<&'a [u8]>,
}

/// Incoming request as seen by a verifier
#[derive(Debug, Clone, Copy)]
pub struct IncomingMessage<'a> {
    pub method: &'a str,
    pub url: &'a Url,
    pub headers: &'a HeaderMap,
    pub body: &'a [u8],
}

/// Headers a signer wants set on the request
pub type SignedHeaders = Vec<(String, String)>;

/// Sign/verify primitives for every supported scheme
///
/// Every method defaults to `SuiteError::NotImplemented`, so a suite
/// only overrides what it supports.
pub trait CryptoSuite: Send + Sync {
    fn sign_draft(
        &self,
        _message: &OutgoingMessage<'_>,
        _key: &ActorKeyHandle,
    ) -> Result<SignedHeaders, SuiteError> {
        Err(SuiteError::NotImplemented(SignatureScheme::DraftCavage))
    }

    fn verify_draft(
        &self,
        _message: &IncomingMessage<'_>,
        _key: &PublicKey,
    ) -> Result<bool, SuiteError> {
        Err(SuiteError::NotImplemented(SignatureScheme::DraftCavage))
    }

    fn sign_rfc9421(
        &self,
        _message: &OutgoingMessage<'_>,
        _key: &ActorKeyHandle,
    ) -> Result<SignedHeaders, SuiteError> {
        Err(SuiteError::NotImplemented(SignatureScheme::Rfc9421))
    }

    fn verify_rfc9421(
        &self,
        _message: &IncomingMessage<'_>,
        _key: &PublicKey,
    ) -> Result<bool, SuiteError> {
        Err(SuiteError::NotImplemented(SignatureScheme::Rfc9421))
    }

    /// Returns the document with an embedded `signature` object
    fn sign_ld_rsa2017(
        &self,
        _document: &Value,
        _key: &ActorKeyHandle,
        _created: DateTime<Utc>,
    ) -> Result<Value, SuiteError> {
        Err(SuiteError::NotImplemented(SignatureScheme::LdSignatureRsa2017))
    }

    fn verify_ld_rsa2017(&self, _document: &Value, _key: &PublicKey) -> Result<bool, SuiteError> {
        Err(SuiteError::NotImplemented(SignatureScheme::LdSignatureRsa2017))
    }

    /// Returns the document with an embedded `proof` object
    fn sign_proof(
        &self,
        _document: &Value,
        _key: &ActorKeyHandle,
        _created: DateTime<Utc>,
    ) -> Result<Value, SuiteError> {
        Err(SuiteError::NotImplemented(SignatureScheme::DataIntegrityProofEdDsa))
    }

    fn verify_proof(&self, _document: &Value, _key: &PublicKey) -> Result<bool, SuiteError> {
        Err(SuiteError::NotImplemented(SignatureScheme::DataIntegrityProofEdDsa))
    }
}

/// Suite implementing all four schemes with `rsa` and `ed25519-dalek`
#[derive(Debug, Clone)]
pub struct StandardSuite {
    max_clock_skew: Duration,
}

impl StandardSuite {
    pub fn new(max_clock_skew: Duration) -> Self {
        Self { max_clock_skew }
    }
}

impl Default for StandardSuite {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

fn rsa_key(key: &ActorKeyHandle) -> Result<&rsa::RsaPrivateKey, SuiteError> {
    match key.private_key() {
        PrivateKey::Rsa(rsa) => Ok(rsa),
        other => Err(SuiteError::UnsupportedKey(format!(
            "{} key cannot produce this signature",
            other.kind()
        ))),
    }
}

impl CryptoSuite for StandardSuite {
    fn sign_draft(
        &self,
        message: &OutgoingMessage<'_>,
        key: &ActorKeyHandle,
    ) -> Result<SignedHeaders, SuiteError> {
        draft::sign(message, rsa_key(key)?, key.key_id())
    }

    fn verify_draft(
        &self,
        message: &IncomingMessage<'_>,
        key: &PublicKey,
    ) -> Result<bool, SuiteError> {
        draft::verify(message, key, self.max_clock_skew)
    }

    fn sign_rfc9421(
        &self,
        message: &OutgoingMessage<'_>,
        key: &ActorKeyHandle,
    ) -> Result<SignedHeaders, SuiteError> {
        rfc9421::sign(message, key.private_key(), key.key_id(), Utc::now())
    }

    fn verify_rfc9421(
        &self,
        message: &IncomingMessage<'_>,
        key: &PublicKey,
    ) -> Result<bool, SuiteError> {
        rfc9421::verify(message, key, self.max_clock_skew)
    }

    fn sign_ld_rsa2017(
        &self,
        document: &Value,
        key: &ActorKeyHandle,
        created: DateTime<Utc>,
    ) -> Result<Value, SuiteError> {
        ld_signature::sign(document, rsa_key(key)?, key.key_id(), created)
    }

    fn verify_ld_rsa2017(&self, document: &Value, key: &PublicKey) -> Result<bool, SuiteError> {
        ld_signature::verify(document, key)
    }

    fn sign_proof(
        &self,
        document: &Value,
        key: &ActorKeyHandle,
        created: DateTime<Utc>,
    ) -> Result<Value, SuiteError> {
        match key.private_key() {
            PrivateKey::Ed25519(signing_key) => {
                proof::sign(document, signing_key, key.key_id(), created)
            }
            PrivateKey::Rsa(_) => Err(SuiteError::UnsupportedKey(
                "Data Integrity proofs require an Ed25519 key".to_string(),
            )),
        }
    }

    fn verify_proof(&self, document: &Value, key: &PublicKey) -> Result<bool, SuiteError> {
        proof::verify(document, key)
    }
}
