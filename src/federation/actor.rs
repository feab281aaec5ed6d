//! Actor document fetching and key lookup
//!
//! [`ActorFetcher`] is the seam the key resolver fetches through; the
//! helpers at the bottom pick key material out of an actor document.

use async_trait::async_trait;
use serde_json::Value;
use std::net::IpAddr;
use std::time::Duration;
use url::Url;

use crate::config::FederationConfig;
use crate::error::AppError;

use super::headers::ACTIVITY_JSON;

/// Source of actor documents
#[async_trait]
pub trait ActorFetcher: Send + Sync {
    /// Fetch the actor (or key) document at `url`
    async fn fetch_actor(&self, url: &str) -> Result<Value, AppError>;
}

/// Addresses actor fetches never reach unless `allow_private_ip` is set
fn is_internal_address(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_private()
                || v4.is_loopback()
                || v4.is_link_local()
                || v4.is_multicast()
                || v4.is_unspecified()
        }
        IpAddr::V6(v6) => {
            v6.is_unique_local()
                || v6.is_loopback()
                || v6.is_unicast_link_local()
                || v6.is_multicast()
                || v6.is_unspecified()
        }
    }
}

/// `localhost` names and literal internal addresses
fn is_internal_host(host: &str) -> bool {
    let host = host
        .trim_matches(|c| c == '[' || c == ']')
        .trim_end_matches('.')
        .to_ascii_lowercase();
    host == "localhost"
        || host.ends_with(".localhost")
        || host.parse::<IpAddr>().is_ok_and(is_internal_address)
}

/// Actor document URL for a key id or actor URI (fragment removed)
pub fn actor_url(actor_or_key_id: &str) -> &str {
    actor_or_key_id
        .split('#')
        .next()
        .unwrap_or(actor_or_key_id)
}

/// Where an actor document is fetched from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTarget {
    pub url: Url,
    /// Lowercased host
    pub host: String,
    pub port: u16,
}

impl FetchTarget {
    /// Parse an actor URI or key id
    ///
    /// Only http(s) is accepted. Internal hosts are `Forbidden` unless
    /// `allow_private_ip` is set.
    pub fn parse(actor_or_key_id: &str, allow_private_ip: bool) -> Result<Self, AppError> {
        let url = Url::parse(actor_url(actor_or_key_id))
            .map_err(|e| AppError::Validation(format!("Invalid actor URL: {}", e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(AppError::Validation(format!(
                "Unsupported actor URL scheme: {}",
                url.scheme()
            )));
        }

        let host = url
            .host_str()
            .map(str::to_ascii_lowercase)
            .ok_or_else(|| AppError::Validation("Missing host in actor URL".to_string()))?;
        if !allow_private_ip && is_internal_host(&host) {
            return Err(AppError::Forbidden);
        }
        let port = url
            .port_or_known_default()
            .ok_or_else(|| AppError::Validation("Missing port in actor URL".to_string()))?;

        Ok(Self { url, host, port })
    }

    /// Fail when the host resolves to nothing or to any internal address
    async fn ensure_public_dns(&self) -> Result<(), AppError> {
        let host = self
            .host
            .trim_matches(|c| c == '[' || c == ']')
            .trim_end_matches('.');
        let addrs: Vec<_> = tokio::net::lookup_host((host, self.port))
            .await
            .map_err(|e| AppError::Federation(format!("Failed to resolve actor host: {}", e)))?
            .collect();

        if addrs.is_empty() {
            return Err(AppError::Federation("No DNS records for actor host".to_string()));
        }
        if addrs.iter().any(|addr| is_internal_address(addr.ip())) {
            tracing::warn!(host = %self.host, "Actor host resolves to an internal address");
            return Err(AppError::Forbidden);
        }
        Ok(())
    }
}

fn is_json_content_type(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    essence == "application/json" || essence.ends_with("+json")
}

/// Actor fetcher over reqwest
#[derive(Debug, Clone)]
pub struct HttpActorFetcher {
    client: reqwest::Client,
    allow_private_ip: bool,
}

impl HttpActorFetcher {
    pub fn new(config: &FederationConfig) -> Result<Self, AppError> {
        let allow_private_ip = config.allow_private_ip;
        let max_redirects = config.max_redirects;

        let redirect = reqwest::redirect::Policy::custom(move |attempt| {
            if attempt.previous().len() >= max_redirects {
                attempt.error("too many redirects")
            } else if !allow_private_ip
                && attempt.url().host_str().is_some_and(is_internal_host)
            {
                attempt.error("redirect to a private address")
            } else {
                attempt.follow()
            }
        });

        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.fetch_timeout_seconds))
            .redirect(redirect)
            .build()?;

        Ok(Self {
            client,
            allow_private_ip,
        })
    }
}

#[async_trait]
impl ActorFetcher for HttpActorFetcher {
    async fn fetch_actor(&self, actor_uri: &str) -> Result<Value, AppError> {
        let target = FetchTarget::parse(actor_uri, self.allow_private_ip)?;
        if !self.allow_private_ip {
            target.ensure_public_dns().await?;
        }

        let response = self
            .client
            .get(target.url.clone())
            .header("Accept", ACTIVITY_JSON)
            .send()
            .await
            .map_err(|e| AppError::Federation(format!("Failed to fetch actor: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::Federation(format!(
                "Failed to fetch actor: HTTP {}",
                response.status()
            )));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if !is_json_content_type(content_type) {
            return Err(AppError::Federation(format!(
                "Unexpected actor content type: {}",
                content_type
            )));
        }

        let actor: Value = response
            .json()
            .await
            .map_err(|e| AppError::Federation(format!("Failed to parse actor: {}", e)))?;

        tracing::debug!(actor_url = %target.url, "Fetched actor document");
        Ok(actor)
    }
}

/// Values of a property that may be a single object or an array
fn entries<'a>(document: &'a Value, property: &str) -> Vec<&'a Value> {
    match document.get(property) {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(value @ Value::Object(_)) => vec![value],
        _ => Vec::new(),
    }
}

fn id_of(value: &Value) -> Option<&str> {
    value.get("id").and_then(Value::as_str)
}

/// PEM of the `publicKey` entry matching `key_id`
///
/// A key document fetched directly (`publicKeyPem` at the top level with a
/// matching `id`) is accepted too.
pub fn find_public_key_pem<'a>(document: &'a Value, key_id: &str) -> Option<&'a str> {
    if id_of(document) == Some(key_id) {
        if let Some(pem) = document.get("publicKeyPem").and_then(Value::as_str) {
            return Some(pem);
        }
    }

    let keys = entries(document, "publicKey");
    let matching = keys.iter().find(|key| id_of(key) == Some(key_id));

    // A key id without fragment may name the actor itself.
    let key = match matching {
        Some(key) => Some(*key),
        None if id_of(document) == Some(key_id) && keys.len() == 1 => keys.first().copied(),
        None => None,
    }?;
    key.get("publicKeyPem").and_then(Value::as_str)
}

/// `publicKeyMultibase` of the `assertionMethod` Multikey matching `verification_method`
pub fn find_multikey<'a>(document: &'a Value, verification_method: &str) -> Option<&'a str> {
    if id_of(document) == Some(verification_method) {
        if let Some(multibase) = document.get("publicKeyMultibase").and_then(Value::as_str) {
            return Some(multibase);
        }
    }

    entries(document, "assertionMethod")
        .into_iter()
        .filter(|method| method.get("type").and_then(Value::as_str) == Some("Multikey"))
        .find(|method| id_of(method) == Some(verification_method))
        .and_then(|method| method.get("publicKeyMultibase"))
        .and_then(Value::as_str)
}

/// Actor URI of an activity (`actor` as a string, object or single-element list)
pub fn activity_actor(activity: &Value) -> Option<&str> {
    match activity.get("actor")? {
        Value::String(actor) => Some(actor.as_str()),
        Value::Object(_) => activity.get("actor").and_then(id_of),
        Value::Array(items) => match items.first()? {
            Value::String(actor) => Some(actor.as_str()),
            other => id_of(other),
        },
        _ => None,
    }
}

fn normalize(uri: &str) -> &str {
    uri.trim_end_matches('/')
}

/// Whether a key id belongs to `actor_uri`
///
/// Accepts `actor#fragment` and `actor/sub-path` key ids.
pub fn key_id_matches_actor(key_id: &str, actor_uri: &str) -> bool {
    let actor = normalize(actor_uri);
    if actor.is_empty() {
        return false;
    }
    let owner = normalize(actor_url(key_id));
    owner == actor
        || owner
            .strip_prefix(actor)
            .is_some_and(|rest| rest.starts_with('/'))
}
