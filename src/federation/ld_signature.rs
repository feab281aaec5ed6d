//! Linked Data Signatures (RsaSignature2017)
//!
//! Documents are hashed as sorted-key JSON via
//! [`canonical_json`](super::canonical), not URDNA2015 RDF
//! normalization. Signatures made here verify against peers using the
//! same JSON form only; Mastodon and other URDNA2015 implementations
//! will reject them, and theirs will not verify here.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, Utc};
use rsa::RsaPrivateKey;
use serde_json::{Map, Value, json};

use super::canonical::canonical_sha256;
use super::draft::{sign_bytes_rsa, verify_bytes};
use super::keys::PublicKey;
use super::suite::SuiteError;

pub const SIGNATURE_TYPE: &str = "RsaSignature2017";
const IDENTITY_CONTEXT: &str = "https://w3id.org/identity/v1";

/// Timestamp format for `created`
pub const CREATED_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

fn object(document: &Value) -> Result<&Map<String, Value>, SuiteError> {
    document
        .as_object()
        .ok_or_else(|| SuiteError::Malformed("document must be a JSON object".to_string()))
}

fn signing_input(document: &Map<String, Value>, creator: &str, created: &str) -> Vec<u8> {
    let options = json!({
        "@context": IDENTITY_CONTEXT,
        "creator": creator,
        "created": created,
    });
    let mut unsigned = document.clone();
    unsigned.remove("signature");

    let mut input = hex::encode(canonical_sha256(&options));
    input.push_str(&hex::encode(canonical_sha256(&Value::Object(unsigned))));
    input.into_bytes()
}

/// Embed an RsaSignature2017 `signature` object
///
/// An existing `signature` member is replaced.
pub fn sign(
    document: &Value,
    private_key: &RsaPrivateKey,
    creator: &str,
    created: DateTime<Utc>,
) -> Result<Value, SuiteError> {
    let map = object(document)?;
    let created = created.format(CREATED_FORMAT).to_string();
    let signature = sign_bytes_rsa(private_key, &signing_input(map, creator, &created))?;

    let mut signed = map.clone();
    signed.insert(
        "signature".to_string(),
        json!({
            "type": SIGNATURE_TYPE,
            "creator": creator,
            "created": created,
            "signatureValue": BASE64.encode(signature),
        }),
    );
    Ok(Value::Object(signed))
}

/// Key identifier of an embedded signature, if any
pub fn creator(document: &Value) -> Option<&str> {
    document.get("signature")?.get("creator")?.as_str()
}

/// Verify an embedded RsaSignature2017 signature
pub fn verify(document: &Value, public_key: &PublicKey) -> Result<bool, SuiteError> {
    if !matches!(public_key, PublicKey::Rsa(_)) {
        return Err(SuiteError::UnsupportedKey(format!(
            "{} requires an RSA key, got {}",
            SIGNATURE_TYPE,
            public_key.kind()
        )));
    }

    let map = object(document)?;
    let signature = map
        .get("signature")
        .ok_or_else(|| SuiteError::Malformed("missing signature".to_string()))?;
    let field = |name: &str| {
        signature
            .get(name)
            .and_then(Value::as_str)
            .ok_or_else(|| SuiteError::Malformed(format!("signature.{} missing", name)))
    };

    if field("type")? != SIGNATURE_TYPE {
        return Err(SuiteError::Malformed(format!(
            "unsupported signature type {}",
            field("type")?
        )));
    }
    let creator = field("creator")?;
    let created = field("created")?;
    let value = BASE64
        .decode(field("signatureValue")?)
        .map_err(|_| SuiteError::Malformed("invalid signatureValue encoding".to_string()))?;

    Ok(verify_bytes(
        public_key,
        &signing_input(map, creator, created),
        &value,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::federation::keys::test_keys::{ed25519_private_key, rsa_private_key};
    use crate::federation::keys::PrivateKey;
    use rsa::RsaPublicKey;

    fn note() -> Value {
        json!({
            "@context": "https://www.w3.org/ns/activitystreams",
            "type": "Create",
            "actor": "https://a.example/users/alice",
            "object": {"type": "Note", "content": "hello"}
        })
    }

    #[test]
    fn test_sign_embeds_signature_object() {
        let key = rsa_private_key();
        let signed = sign(&note(), &key, "https://a.example/users/alice#main-key", Utc::now())
            .expect("signed");

        let signature = &signed["signature"];
        assert_eq!(signature["type"], SIGNATURE_TYPE);
        assert_eq!(signature["creator"], "https://a.example/users/alice#main-key");
        assert!(signature["signatureValue"].as_str().is_some_and(|s| !s.is_empty()));
        assert_eq!(creator(&signed), Some("https://a.example/users/alice#main-key"));
        assert_eq!(signed["object"], note()["object"]);
    }

    #[test]
    fn test_signing_input_is_lowercase_hex_of_both_hashes() {
        let mut document = note().as_object().cloned().expect("object");
        let input = signing_input(&document, "https://a.example/k", "2024-01-01T00:00:00Z");
        let input = String::from_utf8(input).expect("ascii");

        let options = json!({
            "@context": IDENTITY_CONTEXT,
            "creator": "https://a.example/k",
            "created": "2024-01-01T00:00:00Z",
        });
        let expected = format!(
            "{}{}",
            hex::encode(canonical_sha256(&options)),
            hex::encode(canonical_sha256(&note()))
        );
        assert_eq!(input, expected);
        assert_eq!(input.len(), 128);
        assert!(input.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)));

        document.insert("signature".to_string(), json!({"type": SIGNATURE_TYPE}));
        let resigned = signing_input(&document, "https://a.example/k", "2024-01-01T00:00:00Z");
        assert_eq!(resigned, expected.into_bytes());
    }

    #[test]
    fn test_verify_round_trip_and_tamper() {
        let key = rsa_private_key();
        let public = PublicKey::Rsa(RsaPublicKey::from(&key));
        let signed = sign(&note(), &key, "https://a.example/users/alice#main-key", Utc::now())
            .expect("signed");
        assert!(matches!(verify(&signed, &public), Ok(true)));

        let mut tampered = signed.clone();
        tampered["object"]["content"] = json!("goodbye");
        assert!(matches!(verify(&tampered, &public), Ok(false)));
    }

    #[test]
    fn test_verify_requires_rsa_key() {
        let key = rsa_private_key();
        let signed = sign(&note(), &key, "https://a.example/k", Utc::now()).expect("signed");
        let ed = PrivateKey::Ed25519(ed25519_private_key()).public_key();
        assert!(matches!(verify(&signed, &ed), Err(SuiteError::UnsupportedKey(_))));
    }

    #[test]
    fn test_sign_rejects_non_object() {
        let key = rsa_private_key();
        assert!(matches!(
            sign(&json!(["not", "an", "object"]), &key, "https://a.example/k", Utc::now()),
            Err(SuiteError::Malformed(_))
        ));
    }
}
