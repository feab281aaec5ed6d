//! Multi-scheme request signing
//!
//! [`RequestSigner::sign`] walks the requested schemes in precedence order
//! (RFC 9421, draft-cavage, LD Signatures, Data Integrity) and applies each
//! once, with the first caller key whose family is eligible. draft-cavage
//! and RFC 9421 are mutually exclusive; when both are requested only
//! draft-cavage runs.
//!
//! Body-embedding schemes run before the header schemes so `Digest` and
//! `Content-Digest` cover the final body. `SigningResult::applied` is still
//! reported in precedence order.
//!
//! Signing never fails: every scheme that could not be applied is logged
//! and listed in `SigningResult::skipped`.

use chrono::Utc;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use url::Url;

use crate::error::AppError;
use crate::metrics::SIGNATURES_APPLIED_TOTAL;

use super::headers::{HeaderList, reconstruct_headers};
use super::keys::ActorKeyHandle;
use super::scheme::{SchemeSet, SignatureScheme};
use super::suite::{CryptoSuite, OutgoingMessage, SuiteError};

/// Request body as supplied by the caller
#[derive(Debug, Clone, PartialEq)]
pub enum SigningBody {
    Json(Value),
    Raw(Vec<u8>),
}

impl SigningBody {
    fn to_bytes(&self) -> Vec<u8> {
        match self {
            // serde_json writes compact output and leaves non-ASCII unescaped
            SigningBody::Json(value) => serde_json::to_vec(value).unwrap_or_default(),
            SigningBody::Raw(bytes) => bytes.clone(),
        }
    }

    fn as_document(&self) -> Option<Value> {
        match self {
            SigningBody::Json(value) => Some(value.clone()),
            SigningBody::Raw(bytes) => serde_json::from_slice(bytes).ok(),
        }
    }

    /// Bytes to send; JSON bodies are encoded compactly
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            SigningBody::Raw(bytes) => bytes,
            json => json.to_bytes(),
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            SigningBody::Json(value) => Some(value),
            SigningBody::Raw(_) => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            SigningBody::Raw(bytes) => Some(bytes),
            SigningBody::Json(_) => None,
        }
    }
}

/// Representation of the returned body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BodyShape {
    /// Bytes ready to send; structured bodies are re-encoded as compact JSON
    #[default]
    Raw,
    /// Leave the body in the form the pipeline produced
    Structured,
}

/// Outgoing request to sign
#[derive(Debug, Clone)]
pub struct SigningRequest {
    pub url: Url,
    pub method: String,
    pub headers: HeaderList,
    pub body: Option<SigningBody>,
    pub schemes: SchemeSet,
    pub keys: Vec<ActorKeyHandle>,
    pub output: BodyShape,
}

impl SigningRequest {
    pub fn new(method: impl Into<String>, url: Url) -> Self {
        Self {
            url,
            method: method.into(),
            headers: HeaderList::new(),
            body: None,
            schemes: SchemeSet::default(),
            keys: Vec::new(),
            output: BodyShape::default(),
        }
    }

    pub fn with_headers(mut self, headers: HeaderList) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: SigningBody) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_schemes(mut self, schemes: SchemeSet) -> Self {
        self.schemes = schemes;
        self
    }

    pub fn with_keys(mut self, keys: Vec<ActorKeyHandle>) -> Self {
        self.keys = keys;
        self
    }

    pub fn with_output(mut self, output: BodyShape) -> Self {
        self.output = output;
        self
    }
}

/// Why a requested scheme was not applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// RFC 9421 requested together with draft-cavage
    ConflictsWithDraftCavage,
    /// No supplied key belongs to the scheme's key family
    NoEligibleKey,
    /// Scheme embeds into the body and there is none
    NoBody,
    /// Body is not a JSON object the scheme can embed into
    BodyNotJson,
    /// The crypto suite does not implement the scheme
    NotImplemented,
    Failed(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::ConflictsWithDraftCavage => f.write_str("conflicts with draft-cavage"),
            SkipReason::NoEligibleKey => f.write_str("no eligible key"),
            SkipReason::NoBody => f.write_str("no body"),
            SkipReason::BodyNotJson => f.write_str("body is not a JSON object"),
            SkipReason::NotImplemented => f.write_str("not implemented by crypto suite"),
            SkipReason::Failed(reason) => write!(f, "signing failed: {}", reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedScheme {
    pub scheme: SignatureScheme,
    pub reason: SkipReason,
}

/// Signed request parts
#[derive(Debug, Clone)]
pub struct SigningResult {
    pub headers: HeaderList,
    pub body: Option<SigningBody>,
    /// Applied schemes in precedence order
    pub applied: Vec<SignatureScheme>,
    pub skipped: Vec<SkippedScheme>,
}

impl SigningResult {
    pub fn is_signed(&self) -> bool {
        !self.applied.is_empty()
    }
}

/// Applies signature schemes to outgoing requests
#[derive(Clone)]
pub struct RequestSigner {
    suite: Arc<dyn CryptoSuite>,
    user_agent: String,
}

struct Outcome {
    applied: Vec<SignatureScheme>,
    skipped: Vec<SkippedScheme>,
}

impl Outcome {
    fn applied(&mut self, scheme: SignatureScheme, key_id: &str) {
        tracing::debug!(scheme = %scheme, key_id = %key_id, "Applied signature scheme");
        SIGNATURES_APPLIED_TOTAL
            .with_label_values(&[scheme.as_str(), "applied"])
            .inc();
        self.applied.push(scheme);
    }

    fn skipped(&mut self, scheme: SignatureScheme, reason: SkipReason) {
        tracing::warn!(scheme = %scheme, reason = %reason, "Signature scheme skipped");
        SIGNATURES_APPLIED_TOTAL
            .with_label_values(&[scheme.as_str(), "skipped"])
            .inc();
        self.skipped.push(SkippedScheme { scheme, reason });
    }

    fn suite_error(&mut self, scheme: SignatureScheme, error: SuiteError) {
        let reason = match error {
            SuiteError::NotImplemented(_) => SkipReason::NotImplemented,
            other => SkipReason::Failed(other.to_string()),
        };
        self.skipped(scheme, reason);
    }
}

impl RequestSigner {
    pub fn new(suite: Arc<dyn CryptoSuite>, user_agent: impl Into<String>) -> Self {
        Self {
            suite,
            user_agent: user_agent.into(),
        }
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Sign a request
    ///
    /// With no keys the request is returned as given: no default headers
    /// are added and the body is not touched.
    pub fn sign(&self, request: SigningRequest) -> SigningResult {
        if request.keys.is_empty() {
            return SigningResult {
                headers: request.headers,
                body: request.body,
                applied: Vec::new(),
                skipped: Vec::new(),
            };
        }

        let mut headers =
            reconstruct_headers(&request.headers, &self.user_agent, request.body.is_some());
        let mut body = request.body;
        let mut outcome = Outcome {
            applied: Vec::new(),
            skipped: Vec::new(),
        };

        // Choose a key per scheme, in precedence order.
        let mut planned: Vec<(SignatureScheme, &ActorKeyHandle)> = Vec::new();
        for scheme in request.schemes.iter() {
            if scheme == SignatureScheme::Rfc9421
                && request.schemes.contains(SignatureScheme::DraftCavage)
            {
                outcome.skipped(scheme, SkipReason::ConflictsWithDraftCavage);
                continue;
            }

            let mut eligible = request.keys.iter().filter(|key| key.kind().can_sign(scheme));
            let Some(key) = eligible.next() else {
                outcome.skipped(scheme, SkipReason::NoEligibleKey);
                continue;
            };
            for ignored in eligible {
                tracing::debug!(scheme = %scheme, key_id = %ignored.key_id(), "Additional key ignored");
            }

            if scheme.mutates_body() && body.is_none() {
                outcome.skipped(scheme, SkipReason::NoBody);
                continue;
            }
            planned.push((scheme, key));
        }

        // Body-embedding schemes first.
        let created = Utc::now();
        for (scheme, key) in planned.iter().filter(|(scheme, _)| scheme.mutates_body()) {
            let Some(document) = body
                .as_ref()
                .and_then(SigningBody::as_document)
                .filter(Value::is_object)
            else {
                outcome.skipped(*scheme, SkipReason::BodyNotJson);
                continue;
            };

            let signed = match scheme {
                SignatureScheme::LdSignatureRsa2017 => {
                    self.suite.sign_ld_rsa2017(&document, key, created)
                }
                _ => self.suite.sign_proof(&document, key, created),
            };
            match signed {
                Ok(document) => {
                    body = Some(SigningBody::Json(document));
                    outcome.applied(*scheme, key.key_id());
                }
                Err(e) => outcome.suite_error(*scheme, e),
            }
        }

        // Header schemes over the final body bytes.
        let body_bytes = body.as_ref().map(SigningBody::to_bytes);
        for (scheme, key) in planned.iter().filter(|(scheme, _)| !scheme.mutates_body()) {
            let message = OutgoingMessage {
                method: &request.method,
                url: &request.url,
                headers: &headers,
                body: body_bytes.as_deref(),
            };
            let signed = match scheme {
                SignatureScheme::Rfc9421 => self.suite.sign_rfc9421(&message, key),
                _ => self.suite.sign_draft(&message, key),
            };
            match signed {
                Ok(added) => {
                    for (name, value) in added {
                        headers.set(name, value);
                    }
                    outcome.applied(*scheme, key.key_id());
                }
                Err(e) => outcome.suite_error(*scheme, e),
            }
        }

        outcome.applied.sort();

        let body = match (request.output, body, body_bytes) {
            (BodyShape::Raw, Some(_), Some(bytes)) => Some(SigningBody::Raw(bytes)),
            (_, body, _) => body,
        };

        if outcome.applied.is_empty() {
            tracing::warn!(url = %request.url, "Request left unsigned");
        }

        SigningResult {
            headers,
            body,
            applied: outcome.applied,
            skipped: outcome.skipped,
        }
    }

    /// Sign on a blocking thread
    pub async fn sign_async(&self, request: SigningRequest) -> Result<SigningResult, AppError> {
        let signer = self.clone();
        tokio::task::spawn_blocking(move || signer.sign(request))
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("signing task failed: {}", e)))
    }
}
