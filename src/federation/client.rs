//! Outbound ActivityPub client
//!
//! Wraps reqwest: builds the request, signs it on a blocking thread and
//! sends exactly the headers and body the signer returned.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::config::FederationConfig;
use crate::error::AppError;

use super::actor::ActorFetcher;
use super::headers::{ACTIVITY_JSON, HeaderList};
use super::keys::ActorKeyHandle;
use super::scheme::SchemeSet;
use super::signer::{BodyShape, RequestSigner, SigningBody, SigningRequest, SigningResult};

/// Signed HTTP client for federation traffic
#[derive(Clone)]
pub struct ActivityPubClient {
    http: reqwest::Client,
    signer: RequestSigner,
    fetcher: Arc<dyn ActorFetcher>,
}

/// Inbox an activity for `actor` should be delivered to
///
/// Uses `endpoints.sharedInbox` when the actor has one, except for
/// Accept and Reject, which go to the personal `inbox`.
pub fn delivery_inbox(actor: &Value, activity_type: Option<&str>) -> Result<Url, AppError> {
    let personal_only = matches!(activity_type, Some("Accept" | "Reject"));
    let shared = actor
        .get("endpoints")
        .and_then(|endpoints| endpoints.get("sharedInbox"))
        .and_then(Value::as_str)
        .filter(|_| !personal_only);

    let inbox = match shared {
        Some(inbox) => inbox,
        None => actor
            .get("inbox")
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::Federation("Actor has no usable inbox".to_string()))?,
    };
    Url::parse(inbox).map_err(|e| AppError::Federation(format!("Invalid inbox URL {}: {}", inbox, e)))
}

impl ActivityPubClient {
    pub fn new(
        config: &FederationConfig,
        signer: RequestSigner,
        fetcher: Arc<dyn ActorFetcher>,
    ) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .user_agent(signer.user_agent().to_string())
            .timeout(Duration::from_secs(config.fetch_timeout_seconds))
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()?;
        Ok(Self {
            http,
            signer,
            fetcher,
        })
    }

    /// Deliver an activity to a remote actor
    ///
    /// Fetches the actor document and posts to its shared or personal
    /// inbox, see [`delivery_inbox`].
    pub async fn send_to_actor(
        &self,
        actor_uri: &str,
        activity: Value,
        sign_as: Vec<ActorKeyHandle>,
        sign_with: SchemeSet,
    ) -> Result<reqwest::Response, AppError> {
        let actor = self.fetcher.fetch_actor(actor_uri).await?;
        let inbox = delivery_inbox(&actor, activity.get("type").and_then(Value::as_str))?;
        tracing::debug!(actor = %actor_uri, inbox = %inbox, "Delivering activity");
        self.post(&inbox, SigningBody::Json(activity), sign_as, sign_with)
            .await
    }

    /// POST an activity to an inbox
    ///
    /// An empty `sign_as` sends the request unsigned.
    pub async fn post(
        &self,
        url: &Url,
        body: SigningBody,
        sign_as: Vec<ActorKeyHandle>,
        sign_with: SchemeSet,
    ) -> Result<reqwest::Response, AppError> {
        let request = SigningRequest::new("POST", url.clone())
            .with_headers(HeaderList::from_pairs([
                ("Accept", ACTIVITY_JSON),
                ("Content-Type", ACTIVITY_JSON),
            ]))
            .with_body(body)
            .with_schemes(sign_with)
            .with_keys(sign_as)
            .with_output(BodyShape::Raw);
        self.send(reqwest::Method::POST, url, request).await
    }

    /// GET an ActivityPub object
    pub async fn get(
        &self,
        url: &Url,
        sign_as: Vec<ActorKeyHandle>,
        sign_with: SchemeSet,
    ) -> Result<reqwest::Response, AppError> {
        let request = SigningRequest::new("GET", url.clone())
            .with_headers(HeaderList::from_pairs([("Accept", ACTIVITY_JSON)]))
            .with_schemes(sign_with)
            .with_keys(sign_as);
        self.send(reqwest::Method::GET, url, request).await
    }

    async fn send(
        &self,
        method: reqwest::Method,
        url: &Url,
        request: SigningRequest,
    ) -> Result<reqwest::Response, AppError> {
        let wants_signature = !request.keys.is_empty();
        let SigningResult {
            headers,
            body,
            applied,
            skipped,
        } = self.signer.sign_async(request).await?;

        if wants_signature && applied.is_empty() {
            tracing::warn!(
                url = %url,
                skipped = skipped.len(),
                "No signature scheme applied; sending unsigned"
            );
        }

        tracing::debug!(
            method = %method,
            url = %url,
            schemes = ?applied,
            "Sending federation request"
        );

        let mut builder = self
            .http
            .request(method, url.clone())
            .headers(headers.to_header_map()?);
        if let Some(body) = body {
            builder = builder.body(body.into_bytes());
        }

        let response = builder.send().await?;
        if !response.status().is_success() {
            tracing::info!(url = %url, status = %response.status(), "Federation request rejected");
        }
        Ok(response)
    }
}
