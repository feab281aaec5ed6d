//! draft-cavage HTTP Signatures
//!
//! Implements signing and verification per:
//! https://docs.joinmastodon.org/spec/security/

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, Utc};
use rsa::pkcs1v15::{Signature as Pkcs1v15Signature, SigningKey, VerifyingKey};
use rsa::signature::{RandomizedSigner, SignatureEncoding, Verifier};
use rsa::RsaPrivateKey;
use sha2::{Digest, Sha256};
use std::time::Duration;
use url::Url;

use super::keys::PublicKey;
use super::suite::{IncomingMessage, OutgoingMessage, SignedHeaders, SuiteError};

/// Date header format (RFC 2616)
pub const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Parsed Signature header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSignature {
    /// Key ID (URL to public key)
    pub key_id: String,
    /// Algorithm (`hs2019` when omitted)
    pub algorithm: String,
    /// Signed header names, lowercased
    pub headers: Vec<String>,
    /// Base64-encoded signature
    pub signature: String,
    pub created: Option<i64>,
    pub expires: Option<i64>,
}

/// Parse Signature header value
///
/// # Format
/// ```text
/// keyId="...",algorithm="...",headers="...",signature="..."
/// ```
///
/// Field names are case-sensitive, field order is free and commas inside
/// quoted values are kept. `keyId` and `signature` are required.
pub fn parse_signature_header(header: &str) -> Result<ParsedSignature, SuiteError> {
    let mut key_id = None;
    let mut algorithm = None;
    let mut headers = None;
    let mut signature = None;
    let mut created = None;
    let mut expires = None;

    for (key, value) in split_fields(header)? {
        match key.as_str() {
            "keyId" => key_id = Some(value),
            "algorithm" => algorithm = Some(value),
            "headers" => {
                headers = Some(
                    value
                        .split_whitespace()
                        .map(|s| s.to_ascii_lowercase())
                        .collect(),
                )
            }
            "signature" => signature = Some(value),
            "created" => created = value.parse().ok(),
            "expires" => expires = value.parse().ok(),
            _ => {} // Ignore unknown fields
        }
    }

    let key_id = key_id
        .filter(|id: &String| !id.is_empty())
        .ok_or_else(|| SuiteError::Malformed("Missing keyId".to_string()))?;
    let signature = signature
        .filter(|sig: &String| !sig.is_empty())
        .ok_or_else(|| SuiteError::Malformed("Missing signature".to_string()))?;

    Ok(ParsedSignature {
        key_id,
        algorithm: algorithm.unwrap_or_else(|| "hs2019".to_string()),
        headers: headers.unwrap_or_else(|| vec!["date".to_string()]),
        signature,
        created,
        expires,
    })
}

fn split_fields(header: &str) -> Result<Vec<(String, String)>, SuiteError> {
    let mut fields = Vec::new();
    let mut rest = header.trim();

    while !rest.is_empty() {
        let (key, after_key) = rest
            .split_once('=')
            .ok_or_else(|| SuiteError::Malformed(format!("Invalid signature field: {}", rest)))?;
        let key = key.trim().to_string();
        let after_key = after_key.trim_start();

        let (value, remainder) = if let Some(quoted) = after_key.strip_prefix('"') {
            let end = quoted
                .find('"')
                .ok_or_else(|| SuiteError::Malformed("Unterminated quoted value".to_string()))?;
            (quoted[..end].to_string(), &quoted[end + 1..])
        } else {
            let end = after_key.find(',').unwrap_or(after_key.len());
            (after_key[..end].trim().to_string(), &after_key[end..])
        };

        fields.push((key, value));
        rest = remainder.trim_start();
        rest = rest.strip_prefix(',').unwrap_or(rest).trim_start();
    }

    Ok(fields)
}

/// Generate SHA-256 digest for body
///
/// # Returns
/// `SHA-256=base64(hash)`
pub fn generate_digest(body: &[u8]) -> String {
    let hash = Sha256::digest(body);
    format!("SHA-256={}", BASE64.encode(hash))
}

/// Check a `Digest` header against the body
///
/// The header may list several `algorithm=value` pairs; the SHA-256 one
/// must match. Algorithm names compare case-insensitively.
pub fn digest_matches(header: &str, body: &[u8]) -> bool {
    let expected = BASE64.encode(Sha256::digest(body));
    header
        .split(',')
        .filter_map(|entry| entry.trim().split_once('='))
        .any(|(algorithm, value)| {
            algorithm.trim().eq_ignore_ascii_case("sha-256") && value.trim() == expected
        })
}

/// Host and optional port, as sent in the Host header
pub(crate) fn authority(url: &Url) -> Result<String, SuiteError> {
    let host = url
        .host_str()
        .ok_or_else(|| SuiteError::Malformed("Missing host in URL".to_string()))?;
    Ok(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

pub(crate) fn path_and_query(url: &Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    }
}

/// Sign an outgoing request with RSA-SHA256
///
/// # Returns
/// Headers to set: `Signature`, plus `Host` and `Date` when the request
/// lacks them and `Digest` when a body is present.
pub fn sign(
    message: &OutgoingMessage<'_>,
    private_key: &RsaPrivateKey,
    key_id: &str,
) -> Result<SignedHeaders, SuiteError> {
    let mut added = Vec::new();

    // 1. Host and Date
    let host = match message.headers.get("host") {
        Some(host) => host.to_string(),
        None => {
            let host = authority(message.url)?;
            added.push(("Host".to_string(), host.clone()));
            host
        }
    };
    let date = match message.headers.get("date") {
        Some(date) => date.to_string(),
        None => {
            let date = Utc::now().format(HTTP_DATE_FORMAT).to_string();
            added.push(("Date".to_string(), date.clone()));
            date
        }
    };

    // 2. Digest if body present
    let digest = message.body.map(generate_digest);

    // 3. Build signing string
    let request_target = format!(
        "{} {}",
        message.method.to_lowercase(),
        path_and_query(message.url)
    );
    let mut signing_parts = vec![
        format!("(request-target): {}", request_target),
        format!("host: {}", host),
        format!("date: {}", date),
    ];
    let mut headers_list = vec!["(request-target)", "host", "date"];

    if let Some(ref digest_value) = digest {
        signing_parts.push(format!("digest: {}", digest_value));
        headers_list.push("digest");
        added.push(("Digest".to_string(), digest_value.clone()));
    }
    let signing_string = signing_parts.join("\n");

    // 4. Sign with RSA-SHA256
    let signing_key = SigningKey::<Sha256>::new(private_key.clone());
    let mut rng = rand::thread_rng();
    let signature = signing_key
        .try_sign_with_rng(&mut rng, signing_string.as_bytes())
        .map_err(|e| SuiteError::Crypto(e.to_string()))?;
    let signature_b64 = BASE64.encode(signature.to_bytes());

    // 5. Build Signature header
    added.push((
        "Signature".to_string(),
        format!(
            "keyId=\"{}\",algorithm=\"rsa-sha256\",headers=\"{}\",signature=\"{}\"",
            key_id,
            headers_list.join(" "),
            signature_b64
        ),
    ));

    Ok(added)
}

fn header_value<'a>(message: &'a IncomingMessage<'_>, name: &str) -> Option<&'a str> {
    message.headers.get(name).and_then(|v| v.to_str().ok())
}

/// Verify a draft-cavage signature against `public_key`
///
/// Returns `Ok(false)` when the message is well-formed but does not
/// verify: missing required signed headers, stale Date, Digest mismatch
/// or a bad signature.
pub fn verify(
    message: &IncomingMessage<'_>,
    public_key: &PublicKey,
    max_clock_skew: Duration,
) -> Result<bool, SuiteError> {
    // 1. Parse Signature header
    let signature_header = header_value(message, "signature")
        .ok_or_else(|| SuiteError::Malformed("Missing Signature header".to_string()))?;
    let parsed = parse_signature_header(signature_header)?;

    // 2. Validate algorithm against the key family
    match (parsed.algorithm.as_str(), public_key) {
        ("rsa-sha256", PublicKey::Rsa(_)) | ("hs2019", _) | ("ed25519", PublicKey::Ed25519(_)) => {}
        ("rsa-sha256", _) | ("ed25519", _) => {
            return Err(SuiteError::UnsupportedKey(format!(
                "{} signature with {} key",
                parsed.algorithm,
                public_key.kind()
            )));
        }
        (other, _) => {
            return Err(SuiteError::UnsupportedKey(format!(
                "Unsupported signature algorithm: {}",
                other
            )));
        }
    }

    let signed = |name: &str| parsed.headers.iter().any(|h| h == name);
    if !signed("(request-target)") || !signed("host") {
        tracing::debug!(key_id = %parsed.key_id, "Signature does not cover request target and host");
        return Ok(false);
    }

    // 3. Verify Date is recent
    if signed("date") {
        let Some(date) = header_value(message, "date") else {
            return Ok(false);
        };
        let Ok(date) = DateTime::parse_from_rfc2822(date) else {
            tracing::debug!(date = %date, "Unparsable Date header");
            return Ok(false);
        };
        let skew = (Utc::now().timestamp() - date.timestamp()).unsigned_abs();
        if skew > max_clock_skew.as_secs() {
            tracing::debug!(skew, "Date header too old or in future");
            return Ok(false);
        }
    } else if parsed.created.is_none() {
        return Ok(false);
    }
    if let Some(expires) = parsed.expires {
        if expires < Utc::now().timestamp() {
            return Ok(false);
        }
    }

    // 4. If body present, verify Digest
    if !message.body.is_empty() {
        if !signed("digest") {
            return Ok(false);
        }
        let Some(digest) = header_value(message, "digest") else {
            return Ok(false);
        };
        if !digest_matches(digest, message.body) {
            tracing::debug!(key_id = %parsed.key_id, "Digest mismatch");
            return Ok(false);
        }
    }

    // 5. Reconstruct signing string
    let mut signing_parts = Vec::with_capacity(parsed.headers.len());
    for header_name in &parsed.headers {
        let value = match header_name.as_str() {
            "(request-target)" => format!(
                "{} {}",
                message.method.to_lowercase(),
                path_and_query(message.url)
            ),
            "(created)" => match parsed.created {
                Some(created) => created.to_string(),
                None => return Ok(false),
            },
            "(expires)" => match parsed.expires {
                Some(expires) => expires.to_string(),
                None => return Ok(false),
            },
            name => {
                let values: Vec<&str> = message
                    .headers
                    .get_all(name)
                    .iter()
                    .filter_map(|v| v.to_str().ok())
                    .map(str::trim)
                    .collect();
                if values.is_empty() {
                    return Ok(false);
                }
                values.join(", ")
            }
        };
        signing_parts.push(format!("{}: {}", header_name, value));
    }
    let signing_string = signing_parts.join("\n");

    // 6. Verify signature
    let signature_bytes = BASE64
        .decode(&parsed.signature)
        .map_err(|_| SuiteError::Malformed("Invalid signature encoding".to_string()))?;

    Ok(verify_bytes(public_key, signing_string.as_bytes(), &signature_bytes))
}

/// Verify raw signature bytes with either key family
pub(crate) fn verify_bytes(public_key: &PublicKey, data: &[u8], signature: &[u8]) -> bool {
    match public_key {
        PublicKey::Rsa(key) => {
            let verifier = VerifyingKey::<Sha256>::new(key.clone());
            Pkcs1v15Signature::try_from(signature)
                .map(|sig| verifier.verify(data, &sig).is_ok())
                .unwrap_or(false)
        }
        PublicKey::Ed25519(key) => ed25519_dalek::Signature::from_slice(signature)
            .map(|sig| ed25519_dalek::Verifier::verify(key, data, &sig).is_ok())
            .unwrap_or(false),
    }
}

/// Sign raw bytes with RSA PKCS#1 v1.5 SHA-256
pub(crate) fn sign_bytes_rsa(private_key: &RsaPrivateKey, data: &[u8]) -> Result<Vec<u8>, SuiteError> {
    let signing_key = SigningKey::<Sha256>::new(private_key.clone());
    let mut rng = rand::thread_rng();
    signing_key
        .try_sign_with_rng(&mut rng, data)
        .map(|sig| sig.to_vec())
        .map_err(|e| SuiteError::Crypto(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::federation::headers::HeaderList;
    use crate::federation::keys::test_keys::rsa_private_key;
    use http::{HeaderMap, HeaderName, HeaderValue};
    use rsa::RsaPublicKey;

    fn signed_request(
        url: &Url,
        body: Option<&[u8]>,
        private_key: &RsaPrivateKey,
    ) -> HeaderMap {
        let headers = HeaderList::new();
        let message = OutgoingMessage {
            method: "POST",
            url,
            headers: &headers,
            body,
        };
        let added = sign(&message, private_key, "https://remote.example/users/alice#main-key")
            .expect("signed");

        let mut map = HeaderMap::new();
        for (name, value) in added {
            map.insert(
                HeaderName::from_bytes(name.as_bytes()).expect("name"),
                HeaderValue::from_str(&value).expect("value"),
            );
        }
        map
    }

    fn incoming<'a>(url: &'a Url, headers: &'a HeaderMap, body: &'a [u8]) -> IncomingMessage<'a> {
        IncomingMessage {
            method: "POST",
            url,
            headers,
            body,
        }
    }

    #[test]
    fn test_verify_accepts_valid_signed_request() {
        let private_key = rsa_private_key();
        let public_key = PublicKey::Rsa(RsaPublicKey::from(&private_key));
        let url = Url::parse("https://remote.example/inbox?foo=bar").expect("url");
        let body = br#"{"type":"Follow"}"#;
        let headers = signed_request(&url, Some(body), &private_key);

        let result = verify(&incoming(&url, &headers, body), &public_key, Duration::from_secs(300));
        assert!(matches!(result, Ok(true)), "valid signature should verify: {result:?}");
    }

    #[test]
    fn test_verify_rejects_tampered_body() {
        let private_key = rsa_private_key();
        let public_key = PublicKey::Rsa(RsaPublicKey::from(&private_key));
        let url = Url::parse("https://remote.example/inbox").expect("url");
        let body = br#"{"type":"Follow"}"#;
        let headers = signed_request(&url, Some(body), &private_key);

        let tampered = br#"{"type":"Follox"}"#;
        let result = verify(&incoming(&url, &headers, tampered), &public_key, Duration::from_secs(300));
        assert!(matches!(result, Ok(false)));
    }

    #[test]
    fn test_verify_rejects_other_key() {
        let private_key = rsa_private_key();
        let other = PublicKey::Rsa(RsaPublicKey::from(&rsa_private_key()));
        let url = Url::parse("https://remote.example/inbox").expect("url");
        let body = br#"{"type":"Follow"}"#;
        let headers = signed_request(&url, Some(body), &private_key);

        let result = verify(&incoming(&url, &headers, body), &other, Duration::from_secs(300));
        assert!(matches!(result, Ok(false)));
    }

    #[test]
    fn test_verify_rejects_missing_digest_header_for_body() {
        let private_key = rsa_private_key();
        let public_key = PublicKey::Rsa(RsaPublicKey::from(&private_key));
        let url = Url::parse("https://remote.example/inbox").expect("url");
        let body = br#"{"type":"Follow"}"#;
        let mut headers = signed_request(&url, Some(body), &private_key);
        headers.remove("digest");

        let result = verify(&incoming(&url, &headers, body), &public_key, Duration::from_secs(300));
        assert!(matches!(result, Ok(false)));
    }

    #[test]
    fn test_verify_rejects_stale_date() {
        let private_key = rsa_private_key();
        let public_key = PublicKey::Rsa(RsaPublicKey::from(&private_key));
        let url = Url::parse("https://remote.example/inbox").expect("url");
        let mut caller_headers = HeaderList::new();
        caller_headers.set("Date", "Mon, 01 Jan 2001 00:00:00 GMT");
        let message = OutgoingMessage {
            method: "POST",
            url: &url,
            headers: &caller_headers,
            body: None,
        };
        let added = sign(&message, &private_key, "https://remote.example/users/alice#main-key")
            .expect("signed");

        let mut headers = HeaderMap::new();
        headers.insert("date", HeaderValue::from_static("Mon, 01 Jan 2001 00:00:00 GMT"));
        for (name, value) in added {
            headers.insert(
                HeaderName::from_bytes(name.as_bytes()).expect("name"),
                HeaderValue::from_str(&value).expect("value"),
            );
        }

        let result = verify(&incoming(&url, &headers, b""), &public_key, Duration::from_secs(300));
        assert!(matches!(result, Ok(false)));
    }

    #[test]
    fn test_sign_keeps_caller_host_and_date() {
        let private_key = rsa_private_key();
        let url = Url::parse("https://remote.example:8443/inbox").expect("url");
        let headers = HeaderList::from_pairs([("host", "remote.example:8443")]);
        let message = OutgoingMessage {
            method: "GET",
            url: &url,
            headers: &headers,
            body: None,
        };
        let added = sign(&message, &private_key, "https://a.example/actor#key").expect("signed");
        let names: Vec<&str> = added.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["Date", "Signature"]);
    }

    #[test]
    fn test_parse_signature_header_any_order() {
        let parsed = parse_signature_header(
            "signature=\"ZmFrZQ==\",headers=\"(request-target) host date\",keyId=\"https://remote.example/users/alice#main-key\",algorithm=\"rsa-sha256\"",
        )
        .expect("parsed");
        assert_eq!(parsed.key_id, "https://remote.example/users/alice#main-key");
        assert_eq!(parsed.algorithm, "rsa-sha256");
        assert_eq!(parsed.headers, vec!["(request-target)", "host", "date"]);
        assert_eq!(parsed.signature, "ZmFrZQ==");
    }

    #[test]
    fn test_parse_signature_header_defaults() {
        let parsed =
            parse_signature_header("keyId=\"https://a.example/k,1\",signature=\"ZmFrZQ==\"").expect("parsed");
        assert_eq!(parsed.key_id, "https://a.example/k,1");
        assert_eq!(parsed.algorithm, "hs2019");
        assert_eq!(parsed.headers, vec!["date"]);
    }

    #[test]
    fn test_parse_signature_header_requires_key_id() {
        assert!(matches!(
            parse_signature_header("algorithm=\"rsa-sha256\",signature=\"ZmFrZQ==\""),
            Err(SuiteError::Malformed(_))
        ));
        // Field names are case-sensitive
        assert!(matches!(
            parse_signature_header("keyid=\"https://a.example/k\",signature=\"ZmFrZQ==\""),
            Err(SuiteError::Malformed(_))
        ));
        assert!(matches!(
            parse_signature_header("keyId=\"unterminated"),
            Err(SuiteError::Malformed(_))
        ));
    }

    #[test]
    fn test_generate_digest() {
        assert_eq!(
            generate_digest(b""),
            "SHA-256=47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU="
        );
    }

    #[test]
    fn test_digest_matches_header_forms() {
        let body = b"";
        let sha256 = "47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU=";

        assert!(digest_matches(&generate_digest(body), body));
        assert!(digest_matches(&format!("sha-256={sha256}"), body));
        assert!(digest_matches(&format!("SHA-512=AAAA, SHA-256={sha256}"), body));
        assert!(digest_matches(&format!(" Sha-256 = {sha256} "), body));

        assert!(!digest_matches(&format!("SHA-512={sha256}"), body));
        assert!(!digest_matches("SHA-256=AAAA", body));
        assert!(!digest_matches(sha256, body));
        assert!(!digest_matches(&format!("SHA-256={sha256}"), b"x"));
    }
}
