//! ActivityPub federation module
//!
//! Handles:
//! - Request signing (draft-cavage, RFC 9421, LD Signatures, Data Integrity)
//! - Inbox verification
//! - Actor fetching and key resolution
//! - Outbound client

mod actor;
pub mod canonical;
mod client;
pub mod draft;
mod headers;
mod keys;
pub mod ld_signature;
pub mod proof;
mod resolver;
pub mod rfc9421;
mod scheme;
mod signer;
mod suite;
mod verifier;

pub use actor::{
    ActorFetcher, FetchTarget, HttpActorFetcher, activity_actor, actor_url, find_multikey,
    find_public_key_pem, key_id_matches_actor,
};
pub use client::{ActivityPubClient, delivery_inbox};
pub use headers::{ACTIVITY_JSON, HeaderList, reconstruct_headers};
pub use keys::{ActorKeyHandle, KeyError, KeyKind, PrivateKey, PublicKey};
pub use resolver::{ActorKeyResolver, KeyResolution, SIGNATURE_NAMESPACE, cache_key};
pub use scheme::{SchemeSet, SignatureScheme, UnknownScheme};
pub use signer::{
    BodyShape, RequestSigner, SigningBody, SigningRequest, SigningResult, SkipReason,
    SkippedScheme,
};
pub use suite::{
    CryptoSuite, IncomingMessage, OutgoingMessage, SignedHeaders, StandardSuite, SuiteError,
};
pub use verifier::{InboxVerifier, VerificationOutcome, VerifiedBy};
