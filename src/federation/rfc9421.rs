//! RFC 9421 HTTP Message Signatures
//!
//! Covers the subset used between ActivityPub servers: one signature
//! label, derived components `@method`, `@authority`, `@path`, `@query`
//! and the `content-digest` header.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, Utc};
use ed25519_dalek::Signer;
use sha2::{Digest, Sha256};
use std::time::Duration;

use super::draft::{authority, sign_bytes_rsa, verify_bytes};
use super::keys::{PrivateKey, PublicKey};
use super::suite::{IncomingMessage, OutgoingMessage, SignedHeaders, SuiteError};

/// Label used for signatures we produce
pub const SIGNATURE_LABEL: &str = "sig1";

const ALG_RSA: &str = "rsa-v1_5-sha256";
const ALG_ED25519: &str = "ed25519";

/// `Content-Digest` value for a body
pub fn content_digest(body: &[u8]) -> String {
    format!("sha-256=:{}:", BASE64.encode(Sha256::digest(body)))
}

/// One parsed `Signature-Input` member
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureInput {
    pub label: String,
    pub components: Vec<String>,
    pub key_id: Option<String>,
    pub alg: Option<String>,
    pub created: Option<i64>,
    pub expires: Option<i64>,
    /// Member value as sent, used verbatim as `@signature-params`
    pub raw_params: String,
}

/// Parse the first member of a `Signature-Input` header
pub fn parse_signature_input(header: &str) -> Result<SignatureInput, SuiteError> {
    let member = split_members(header)
        .into_iter()
        .next()
        .ok_or_else(|| SuiteError::Malformed("Empty Signature-Input".to_string()))?;
    let (label, value) = member
        .split_once('=')
        .ok_or_else(|| SuiteError::Malformed(format!("Invalid Signature-Input member: {}", member)))?;
    let label = label.trim().to_string();
    let raw_params = value.trim().to_string();

    let inner = raw_params
        .strip_prefix('(')
        .ok_or_else(|| SuiteError::Malformed("Signature-Input must start with an inner list".to_string()))?;
    let close = inner
        .find(')')
        .ok_or_else(|| SuiteError::Malformed("Unterminated inner list".to_string()))?;

    let components = inner[..close]
        .split_whitespace()
        .map(|item| {
            item.strip_prefix('"')
                .and_then(|s| s.strip_suffix('"'))
                .map(str::to_ascii_lowercase)
                .ok_or_else(|| SuiteError::Malformed(format!("Component must be a string: {}", item)))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut input = SignatureInput {
        label,
        components,
        key_id: None,
        alg: None,
        created: None,
        expires: None,
        raw_params: raw_params.clone(),
    };

    for param in inner[close + 1..].split(';').map(str::trim).filter(|p| !p.is_empty()) {
        let (name, value) = param.split_once('=').unwrap_or((param, ""));
        let unquoted = value.trim_matches('"').to_string();
        match name {
            "keyid" => input.key_id = Some(unquoted),
            "alg" => input.alg = Some(unquoted),
            "created" => input.created = value.parse().ok(),
            "expires" => input.expires = value.parse().ok(),
            _ => {}
        }
    }

    Ok(input)
}

/// Split a dictionary header into members, honoring quotes and parens
fn split_members(header: &str) -> Vec<&str> {
    let mut members = Vec::new();
    let mut depth = 0u32;
    let mut quoted = false;
    let mut start = 0;

    for (i, ch) in header.char_indices() {
        match ch {
            '"' => quoted = !quoted,
            '(' if !quoted => depth += 1,
            ')' if !quoted => depth = depth.saturating_sub(1),
            ',' if !quoted && depth == 0 => {
                members.push(header[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    members.push(header[start..].trim());
    members.retain(|m| !m.is_empty());
    members
}

/// Find the byte sequence for `label` in a `Signature` header
fn signature_for_label(header: &str, label: &str) -> Result<Vec<u8>, SuiteError> {
    for member in split_members(header) {
        let Some((name, value)) = member.split_once('=') else {
            continue;
        };
        if name.trim() != label {
            continue;
        }
        let encoded = value
            .trim()
            .strip_prefix(':')
            .and_then(|v| v.strip_suffix(':'))
            .ok_or_else(|| SuiteError::Malformed("Signature must be a byte sequence".to_string()))?;
        return BASE64
            .decode(encoded)
            .map_err(|_| SuiteError::Malformed("Invalid signature encoding".to_string()));
    }
    Err(SuiteError::Malformed(format!("No signature for label {}", label)))
}

fn signature_base(
    components: &[String],
    params: &str,
    mut resolve: impl FnMut(&str) -> Option<String>,
) -> Option<String> {
    let mut lines = Vec::with_capacity(components.len() + 1);
    for component in components {
        let value = resolve(component)?;
        lines.push(format!("\"{}\": {}", component, value));
    }
    lines.push(format!("\"@signature-params\": {}", params));
    Some(lines.join("\n"))
}

/// Sign an outgoing request
///
/// # Returns
/// `Signature-Input`, `Signature` and, with a body, `Content-Digest`
pub fn sign(
    message: &OutgoingMessage<'_>,
    private_key: &PrivateKey,
    key_id: &str,
    created: DateTime<Utc>,
) -> Result<SignedHeaders, SuiteError> {
    let alg = match private_key {
        PrivateKey::Rsa(_) => ALG_RSA,
        PrivateKey::Ed25519(_) => ALG_ED25519,
    };

    let mut components = vec![
        "@method".to_string(),
        "@authority".to_string(),
        "@path".to_string(),
    ];
    if message.url.query().is_some() {
        components.push("@query".to_string());
    }
    let digest = message.body.map(content_digest);
    if digest.is_some() {
        components.push("content-digest".to_string());
    }

    let component_list = components
        .iter()
        .map(|c| format!("\"{}\"", c))
        .collect::<Vec<_>>()
        .join(" ");
    let params = format!(
        "({});created={};keyid=\"{}\";alg=\"{}\"",
        component_list,
        created.timestamp(),
        key_id,
        alg
    );

    let host = authority(message.url)?;
    let base = signature_base(&components, &params, |component| match component {
        "@method" => Some(message.method.to_ascii_uppercase()),
        "@authority" => Some(host.to_ascii_lowercase()),
        "@path" => Some(message.url.path().to_string()),
        "@query" => message.url.query().map(|q| format!("?{}", q)),
        "content-digest" => digest.clone(),
        _ => None,
    })
    .ok_or_else(|| SuiteError::Malformed("Unresolvable signature component".to_string()))?;

    let signature = match private_key {
        PrivateKey::Rsa(key) => sign_bytes_rsa(key, base.as_bytes())?,
        PrivateKey::Ed25519(key) => key.sign(base.as_bytes()).to_bytes().to_vec(),
    };

    let mut headers = Vec::with_capacity(3);
    if let Some(digest) = digest {
        headers.push(("Content-Digest".to_string(), digest));
    }
    headers.push((
        "Signature-Input".to_string(),
        format!("{}={}", SIGNATURE_LABEL, params),
    ));
    headers.push((
        "Signature".to_string(),
        format!("{}=:{}:", SIGNATURE_LABEL, BASE64.encode(signature)),
    ));
    Ok(headers)
}

/// Verify an RFC 9421 signature against `public_key`
pub fn verify(
    message: &IncomingMessage<'_>,
    public_key: &PublicKey,
    max_clock_skew: Duration,
) -> Result<bool, SuiteError> {
    let header = |name: &str| message.headers.get(name).and_then(|v| v.to_str().ok());

    let input = parse_signature_input(
        header("signature-input")
            .ok_or_else(|| SuiteError::Malformed("Missing Signature-Input header".to_string()))?,
    )?;
    let signature = signature_for_label(
        header("signature")
            .ok_or_else(|| SuiteError::Malformed("Missing Signature header".to_string()))?,
        &input.label,
    )?;

    match (input.alg.as_deref(), public_key) {
        (None, _) | (Some(ALG_RSA), PublicKey::Rsa(_)) | (Some(ALG_ED25519), PublicKey::Ed25519(_)) => {}
        (Some(alg), key) => {
            return Err(SuiteError::UnsupportedKey(format!(
                "{} signature with {} key",
                alg,
                key.kind()
            )));
        }
    }

    let now = Utc::now().timestamp();
    match input.created {
        Some(created) if (now - created).unsigned_abs() <= max_clock_skew.as_secs() => {}
        _ => {
            tracing::debug!(created = ?input.created, "Signature creation time outside allowed skew");
            return Ok(false);
        }
    }
    if input.expires.is_some_and(|expires| expires < now) {
        return Ok(false);
    }

    let covers = |name: &str| input.components.iter().any(|c| c == name);
    if !covers("@method") || !covers("@authority") {
        return Ok(false);
    }
    if !message.body.is_empty() {
        if !covers("content-digest") {
            return Ok(false);
        }
        if header("content-digest") != Some(content_digest(message.body).as_str()) {
            tracing::debug!("Content-Digest mismatch");
            return Ok(false);
        }
    }

    let host = header("host")
        .map(str::to_string)
        .map_or_else(|| authority(message.url), Ok)?;
    let base = signature_base(&input.components, &input.raw_params, |component| {
        match component {
            "@method" => Some(message.method.to_ascii_uppercase()),
            "@authority" => Some(host.to_ascii_lowercase()),
            "@path" => Some(message.url.path().to_string()),
            "@query" => Some(format!("?{}", message.url.query().unwrap_or(""))),
            name if name.starts_with('@') => None,
            name => {
                let values: Vec<&str> = message
                    .headers
                    .get_all(name)
                    .iter()
                    .filter_map(|v| v.to_str().ok())
                    .map(str::trim)
                    .collect();
                (!values.is_empty()).then(|| values.join(", "))
            }
        }
    });
    let Some(base) = base else {
        return Ok(false);
    };

    Ok(verify_bytes(public_key, base.as_bytes(), &signature))
}
