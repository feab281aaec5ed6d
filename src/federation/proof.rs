//! FEP-8b32 Object Integrity Proofs (eddsa-jcs-2022)

use chrono::{DateTime, Utc};
use ed25519_dalek::{Signer, SigningKey};
use serde_json::{Map, Value, json};

use super::canonical::canonical_sha256;
use super::draft::verify_bytes;
use super::keys::PublicKey;
use super::ld_signature::CREATED_FORMAT;
use super::suite::SuiteError;

pub const PROOF_TYPE: &str = "DataIntegrityProof";
pub const CRYPTOSUITE: &str = "eddsa-jcs-2022";
const PROOF_PURPOSE: &str = "assertionMethod";

/// Proof attached to a document, as far as the inbox needs to know
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofInfo {
    pub verification_method: String,
    pub cryptosuite: Option<String>,
}

/// Detect a Data Integrity proof with a verification method
pub fn detect(document: &Value) -> Option<ProofInfo> {
    let proof = document.get("proof")?;
    if proof.get("type")?.as_str()? != PROOF_TYPE {
        return None;
    }
    let verification_method = proof.get("verificationMethod")?.as_str()?;
    if verification_method.is_empty() {
        return None;
    }
    Some(ProofInfo {
        verification_method: verification_method.to_string(),
        cryptosuite: proof
            .get("cryptosuite")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

fn hash_data(config: &Value, document: &Map<String, Value>) -> Vec<u8> {
    let mut unsecured = document.clone();
    unsecured.remove("proof");

    let mut data = Vec::with_capacity(64);
    data.extend_from_slice(&canonical_sha256(config));
    data.extend_from_slice(&canonical_sha256(&Value::Object(unsecured)));
    data
}

/// Embed an eddsa-jcs-2022 `proof` object
pub fn sign(
    document: &Value,
    signing_key: &SigningKey,
    verification_method: &str,
    created: DateTime<Utc>,
) -> Result<Value, SuiteError> {
    let map = document
        .as_object()
        .ok_or_else(|| SuiteError::Malformed("document must be a JSON object".to_string()))?;

    let mut config = json!({
        "type": PROOF_TYPE,
        "cryptosuite": CRYPTOSUITE,
        "proofPurpose": PROOF_PURPOSE,
        "verificationMethod": verification_method,
        "created": created.format(CREATED_FORMAT).to_string(),
    });
    let signature = signing_key.sign(&hash_data(&config, map));
    config["proofValue"] = json!(format!("z{}", bs58::encode(signature.to_bytes()).into_string()));

    let mut secured = map.clone();
    secured.insert("proof".to_string(), config);
    Ok(Value::Object(secured))
}

/// Verify an embedded eddsa-jcs-2022 proof
pub fn verify(document: &Value, public_key: &PublicKey) -> Result<bool, SuiteError> {
    if !matches!(public_key, PublicKey::Ed25519(_)) {
        return Err(SuiteError::UnsupportedKey(format!(
            "{} requires an Ed25519 key, got {}",
            CRYPTOSUITE,
            public_key.kind()
        )));
    }

    let map = document
        .as_object()
        .ok_or_else(|| SuiteError::Malformed("document must be a JSON object".to_string()))?;
    let mut config = map
        .get("proof")
        .and_then(Value::as_object)
        .cloned()
        .ok_or_else(|| SuiteError::Malformed("missing proof".to_string()))?;

    if config.get("cryptosuite").and_then(Value::as_str) != Some(CRYPTOSUITE) {
        return Err(SuiteError::Malformed("unsupported cryptosuite".to_string()));
    }
    let proof_value = config
        .remove("proofValue")
        .and_then(|v| v.as_str().map(str::to_string))
        .ok_or_else(|| SuiteError::Malformed("proof.proofValue missing".to_string()))?;
    let encoded = proof_value
        .strip_prefix('z')
        .ok_or_else(|| SuiteError::Malformed("proofValue is not base58btc".to_string()))?;
    let signature = bs58::decode(encoded)
        .into_vec()
        .map_err(|_| SuiteError::Malformed("invalid proofValue encoding".to_string()))?;

    let data = hash_data(&Value::Object(config), map);
    Ok(verify_bytes(public_key, &data, &signature))
}
