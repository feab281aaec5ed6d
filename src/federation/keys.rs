//! Actor key material
//!
//! Private keys are held by the caller for one signing operation. Public
//! keys are decoded from actor documents and cached in a canonical byte
//! form: SPKI DER for RSA, the raw 32 bytes for Ed25519.

use ed25519_dalek::{SigningKey, VerifyingKey};
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use std::fmt;
use thiserror::Error;

/// Multicodec prefix for an Ed25519 public key
const ED25519_MULTICODEC: [u8; 2] = [0xed, 0x01];

/// Key material errors
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("key identifier must not be empty")]
    EmptyKeyId,

    #[error("invalid key: {0}")]
    Invalid(String),

    #[error("unsupported key type: {0}")]
    Unsupported(String),
}

/// Algorithm family of a key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyKind {
    Rsa,
    Ed25519,
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyKind::Rsa => f.write_str("rsa"),
            KeyKind::Ed25519 => f.write_str("ed25519"),
        }
    }
}

/// Private signing key
#[derive(Clone)]
pub enum PrivateKey {
    Rsa(RsaPrivateKey),
    Ed25519(SigningKey),
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrivateKey({}, <redacted>)", self.kind())
    }
}

impl PrivateKey {
    pub fn kind(&self) -> KeyKind {
        match self {
            PrivateKey::Rsa(_) => KeyKind::Rsa,
            PrivateKey::Ed25519(_) => KeyKind::Ed25519,
        }
    }

    /// Load a PKCS#8 (RSA or Ed25519) or PKCS#1 (RSA) PEM private key
    pub fn from_pem(pem: &str) -> Result<Self, KeyError> {
        if let Ok(key) = RsaPrivateKey::from_pkcs8_pem(pem) {
            return Ok(PrivateKey::Rsa(key));
        }
        if let Ok(key) = RsaPrivateKey::from_pkcs1_pem(pem) {
            return Ok(PrivateKey::Rsa(key));
        }
        <SigningKey as ed25519_dalek::pkcs8::DecodePrivateKey>::from_pkcs8_pem(pem)
            .map(PrivateKey::Ed25519)
            .map_err(|e| KeyError::Invalid(format!("unrecognized private key PEM: {}", e)))
    }

    pub fn public_key(&self) -> PublicKey {
        match self {
            PrivateKey::Rsa(key) => PublicKey::Rsa(RsaPublicKey::from(key)),
            PrivateKey::Ed25519(key) => PublicKey::Ed25519(key.verifying_key()),
        }
    }
}

impl From<RsaPrivateKey> for PrivateKey {
    fn from(key: RsaPrivateKey) -> Self {
        PrivateKey::Rsa(key)
    }
}

impl From<SigningKey> for PrivateKey {
    fn from(key: SigningKey) -> Self {
        PrivateKey::Ed25519(key)
    }
}

/// One signing identity: a key identifier plus its private key
#[derive(Debug, Clone)]
pub struct ActorKeyHandle {
    key_id: String,
    private_key: PrivateKey,
}

impl ActorKeyHandle {
    /// Create a handle
    ///
    /// # Errors
    /// `KeyError::EmptyKeyId` if `key_id` is empty
    pub fn new(key_id: impl Into<String>, private_key: impl Into<PrivateKey>) -> Result<Self, KeyError> {
        let key_id = key_id.into();
        if key_id.trim().is_empty() {
            return Err(KeyError::EmptyKeyId);
        }
        Ok(Self {
            key_id,
            private_key: private_key.into(),
        })
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn private_key(&self) -> &PrivateKey {
        &self.private_key
    }

    pub fn kind(&self) -> KeyKind {
        self.private_key.kind()
    }
}

/// Public verification key
#[derive(Debug, Clone, PartialEq)]
pub enum PublicKey {
    Rsa(RsaPublicKey),
    Ed25519(VerifyingKey),
}

impl PublicKey {
    pub fn kind(&self) -> KeyKind {
        match self {
            PublicKey::Rsa(_) => KeyKind::Rsa,
            PublicKey::Ed25519(_) => KeyKind::Ed25519,
        }
    }

    /// Decode a PEM public key (SPKI RSA/Ed25519, or PKCS#1 RSA)
    pub fn from_pem(pem: &str) -> Result<Self, KeyError> {
        if let Ok(key) = RsaPublicKey::from_public_key_pem(pem) {
            return Ok(PublicKey::Rsa(key));
        }
        if let Ok(key) = RsaPublicKey::from_pkcs1_pem(pem) {
            return Ok(PublicKey::Rsa(key));
        }
        if let Ok(key) =
            <VerifyingKey as ed25519_dalek::pkcs8::DecodePublicKey>::from_public_key_pem(pem)
        {
            return Ok(PublicKey::Ed25519(key));
        }

        if pem.contains("BEGIN PUBLIC KEY") {
            Err(KeyError::Unsupported(
                "public key algorithm is neither RSA nor Ed25519".to_string(),
            ))
        } else {
            Err(KeyError::Invalid("unrecognized public key PEM".to_string()))
        }
    }

    /// Decode a Multikey `publicKeyMultibase` value
    ///
    /// Only base58btc (`z` prefix) Ed25519 multikeys are accepted.
    pub fn from_multibase(value: &str) -> Result<Self, KeyError> {
        let encoded = value
            .strip_prefix('z')
            .ok_or_else(|| KeyError::Unsupported("multibase encoding is not base58btc".to_string()))?;
        let decoded = bs58::decode(encoded)
            .into_vec()
            .map_err(|e| KeyError::Invalid(format!("invalid base58btc: {}", e)))?;

        let raw = decoded
            .strip_prefix(&ED25519_MULTICODEC[..])
            .ok_or_else(|| KeyError::Unsupported("multikey is not an Ed25519 key".to_string()))?;
        Self::ed25519_from_raw(raw)
    }

    fn ed25519_from_raw(raw: &[u8]) -> Result<Self, KeyError> {
        let bytes: [u8; 32] = raw
            .try_into()
            .map_err(|_| KeyError::Invalid(format!("Ed25519 key must be 32 bytes, got {}", raw.len())))?;
        VerifyingKey::from_bytes(&bytes)
            .map(PublicKey::Ed25519)
            .map_err(|e| KeyError::Invalid(format!("invalid Ed25519 key: {}", e)))
    }

    /// Canonical byte form stored in the key cache
    pub fn to_canonical_bytes(&self) -> Result<Vec<u8>, KeyError> {
        match self {
            PublicKey::Rsa(key) => key
                .to_public_key_der()
                .map(|der| der.as_bytes().to_vec())
                .map_err(|e| KeyError::Invalid(format!("failed to encode RSA key: {}", e))),
            PublicKey::Ed25519(key) => Ok(key.as_bytes().to_vec()),
        }
    }

    /// Decode the canonical byte form
    ///
    /// 32 bytes are an Ed25519 key; anything else must be RSA SPKI DER.
    pub fn from_canonical_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        if bytes.len() == 32 {
            return Self::ed25519_from_raw(bytes);
        }
        RsaPublicKey::from_public_key_der(bytes)
            .map(PublicKey::Rsa)
            .map_err(|e| KeyError::Invalid(format!("invalid RSA DER: {}", e)))
    }

    /// SPKI PEM export
    pub fn to_public_pem(&self) -> Result<String, KeyError> {
        let pem = match self {
            PublicKey::Rsa(key) => key.to_public_key_pem(LineEnding::LF),
            PublicKey::Ed25519(key) => {
                <VerifyingKey as ed25519_dalek::pkcs8::EncodePublicKey>::to_public_key_pem(
                    key,
                    LineEnding::LF,
                )
            }
        };
        pem.map_err(|e| KeyError::Invalid(format!("failed to encode PEM: {}", e)))
    }

    /// Multikey export for Ed25519 keys
    pub fn to_multibase(&self) -> Option<String> {
        match self {
            PublicKey::Ed25519(key) => {
                let prefixed = [&ED25519_MULTICODEC[..], key.as_bytes().as_slice()].concat();
                Some(format!("z{}", bs58::encode(prefixed).into_string()))
            }
            PublicKey::Rsa(_) => None,
        }
    }
}

#[cfg(test)]
pub(crate) mod test_keys {
    use super::*;

    pub fn rsa_private_key() -> RsaPrivateKey {
        let mut rng = rand::thread_rng();
        RsaPrivateKey::new(&mut rng, 1024).expect("key generation should work")
    }

    pub fn ed25519_private_key() -> SigningKey {
        SigningKey::generate(&mut rand::rngs::OsRng)
    }
}

#[cfg(test)]
mod tests {
    use super::test_keys::*;
    use super::*;
    use rsa::pkcs8::EncodePrivateKey;

    #[test]
    fn test_handle_rejects_empty_key_id() {
        let result = ActorKeyHandle::new("", ed25519_private_key());
        assert!(matches!(result, Err(KeyError::EmptyKeyId)));
    }

    #[test]
    fn test_handle_reports_kind() {
        let handle = ActorKeyHandle::new("https://a.example/actor#ed", ed25519_private_key())
            .expect("handle");
        assert_eq!(handle.kind(), KeyKind::Ed25519);
        assert_eq!(handle.key_id(), "https://a.example/actor#ed");
    }

    #[test]
    fn test_rsa_canonical_round_trip() {
        let public = PublicKey::Rsa(RsaPublicKey::from(&rsa_private_key()));
        let bytes = public.to_canonical_bytes().expect("der");
        let decoded = PublicKey::from_canonical_bytes(&bytes).expect("decode");

        assert_eq!(decoded, public);
        assert_eq!(
            decoded.to_public_pem().expect("pem"),
            public.to_public_pem().expect("pem")
        );
    }

    #[test]
    fn test_ed25519_canonical_is_raw_32_bytes() {
        let public = PrivateKey::Ed25519(ed25519_private_key()).public_key();
        let bytes = public.to_canonical_bytes().expect("raw");
        assert_eq!(bytes.len(), 32);
        assert_eq!(PublicKey::from_canonical_bytes(&bytes).expect("decode"), public);
    }

    #[test]
    fn test_from_canonical_bytes_rejects_garbage() {
        assert!(PublicKey::from_canonical_bytes(b"invalid-der-data").is_err());
    }

    #[test]
    fn test_multibase_round_trip() {
        let public = PrivateKey::Ed25519(ed25519_private_key()).public_key();
        let multibase = public.to_multibase().expect("ed25519 multibase");
        assert!(multibase.starts_with("z6Mk"));
        assert_eq!(PublicKey::from_multibase(&multibase).expect("decode"), public);
    }

    #[test]
    fn test_multibase_rejects_other_encodings() {
        assert!(matches!(
            PublicKey::from_multibase("uAAAA"),
            Err(KeyError::Unsupported(_))
        ));
    }

    #[test]
    fn test_pem_loading() {
        let rsa = rsa_private_key();
        let pem = rsa.to_pkcs8_pem(LineEnding::LF).expect("pem");
        let key = PrivateKey::from_pem(&pem).expect("rsa private pem");
        assert_eq!(key.kind(), KeyKind::Rsa);

        let public_pem = key.public_key().to_public_pem().expect("public pem");
        let public = PublicKey::from_pem(&public_pem).expect("rsa public pem");
        assert_eq!(public, key.public_key());

        let ed = PrivateKey::Ed25519(ed25519_private_key());
        let ed_pem = ed.public_key().to_public_pem().expect("ed pem");
        assert_eq!(PublicKey::from_pem(&ed_pem).expect("ed public"), ed.public_key());
    }

    #[test]
    fn test_private_key_debug_is_redacted() {
        let key = PrivateKey::Ed25519(ed25519_private_key());
        assert_eq!(format!("{:?}", key), "PrivateKey(ed25519, <redacted>)");
    }
}
