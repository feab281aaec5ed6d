//! Signature schemes and key eligibility

use std::fmt;
use std::str::FromStr;

use super::keys::KeyKind;

/// Signature scheme applied to an outgoing request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SignatureScheme {
    /// RFC 9421 HTTP Message Signatures
    Rfc9421,
    /// draft-cavage HTTP Signatures
    DraftCavage,
    /// Linked Data Signatures (RsaSignature2017)
    LdSignatureRsa2017,
    /// FEP-8b32 Data Integrity Proof (eddsa-jcs-2022)
    DataIntegrityProofEdDsa,
}

impl SignatureScheme {
    /// Order in which requested schemes are applied
    pub const PRECEDENCE: [SignatureScheme; 4] = [
        SignatureScheme::Rfc9421,
        SignatureScheme::DraftCavage,
        SignatureScheme::LdSignatureRsa2017,
        SignatureScheme::DataIntegrityProofEdDsa,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SignatureScheme::Rfc9421 => "rfc9421",
            SignatureScheme::DraftCavage => "draft-cavage",
            SignatureScheme::LdSignatureRsa2017 => "rsa2017",
            SignatureScheme::DataIntegrityProofEdDsa => "fep8b32",
        }
    }

    /// Key family this scheme signs with
    pub fn key_kind(&self) -> KeyKind {
        match self {
            SignatureScheme::Rfc9421
            | SignatureScheme::DraftCavage
            | SignatureScheme::LdSignatureRsa2017 => KeyKind::Rsa,
            SignatureScheme::DataIntegrityProofEdDsa => KeyKind::Ed25519,
        }
    }

    /// Whether the scheme embeds a signature object in the body
    pub fn mutates_body(&self) -> bool {
        matches!(
            self,
            SignatureScheme::LdSignatureRsa2017 | SignatureScheme::DataIntegrityProofEdDsa
        )
    }
}

impl KeyKind {
    /// Schemes a key of this family may be used for
    pub fn eligible_schemes(&self) -> &'static [SignatureScheme] {
        match self {
            KeyKind::Rsa => &[
                SignatureScheme::Rfc9421,
                SignatureScheme::DraftCavage,
                SignatureScheme::LdSignatureRsa2017,
            ],
            KeyKind::Ed25519 => &[SignatureScheme::DataIntegrityProofEdDsa],
        }
    }

    pub fn can_sign(&self, scheme: SignatureScheme) -> bool {
        self.eligible_schemes().contains(&scheme)
    }
}

impl fmt::Display for SignatureScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown scheme name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown signature scheme: {0}")]
pub struct UnknownScheme(pub String);

impl FromStr for SignatureScheme {
    type Err = UnknownScheme;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rfc9421" => Ok(SignatureScheme::Rfc9421),
            "draft-cavage" | "draft" | "cavage" => Ok(SignatureScheme::DraftCavage),
            "rsa2017" | "ld" | "ld-signature" | "rsasignature2017" => {
                Ok(SignatureScheme::LdSignatureRsa2017)
            }
            "fep8b32" | "proof" | "dataintegrityproof" | "eddsa-jcs-2022" => {
                Ok(SignatureScheme::DataIntegrityProofEdDsa)
            }
            _ => Err(UnknownScheme(s.to_string())),
        }
    }
}

/// Set of schemes requested for one request
///
/// Built fresh per call and never mutated after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemeSet {
    schemes: Vec<SignatureScheme>,
}

impl SchemeSet {
    pub fn new(schemes: impl IntoIterator<Item = SignatureScheme>) -> Self {
        let mut schemes: Vec<_> = schemes.into_iter().collect();
        schemes.sort();
        schemes.dedup();
        Self { schemes }
    }

    /// Parse scheme names, e.g. from configuration
    pub fn parse<I, S>(names: I) -> Result<Self, UnknownScheme>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let schemes = names
            .into_iter()
            .map(|name| name.as_ref().parse())
            .collect::<Result<Vec<SignatureScheme>, _>>()?;
        Ok(Self::new(schemes))
    }

    pub fn contains(&self, scheme: SignatureScheme) -> bool {
        self.schemes.contains(&scheme)
    }

    pub fn is_empty(&self) -> bool {
        self.schemes.is_empty()
    }

    /// Requested schemes in precedence order
    pub fn iter(&self) -> impl Iterator<Item = SignatureScheme> + '_ {
        self.schemes.iter().copied()
    }
}

impl Default for SchemeSet {
    fn default() -> Self {
        Self::new([SignatureScheme::DraftCavage])
    }
}
