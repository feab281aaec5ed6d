//! Inbox and outbox endpoints
//!
//! - Verifies each POST with [`InboxVerifier`](crate::federation::InboxVerifier)
//! - Checks the verified key belongs to the activity's actor
//! - Dispatches to the handler registered for the activity type

use async_trait::async_trait;
use axum::body::Bytes;
use axum::{
    Router,
    extract::{OriginalUri, Path, State},
    http::{HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use url::Url;

use crate::AppState;
use crate::error::AppError;
use crate::federation::{VerificationOutcome, activity_actor, key_id_matches_actor};
use crate::metrics::INBOX_ACTIVITIES_TOTAL;

/// Path placeholder replaced by a route parameter
pub const IDENTIFIER_PLACEHOLDER: &str = "{identifier}";

/// ActivityPub Activity types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivityType {
    Create,
    Update,
    Delete,
    Follow,
    Accept,
    Reject,
    Undo,
    Like,
    Announce,
    Block,
    Add,
    Remove,
    Move,
    Flag,
}

impl ActivityType {
    /// Parse activity type from its `type` value
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Create" => Some(Self::Create),
            "Update" => Some(Self::Update),
            "Delete" => Some(Self::Delete),
            "Follow" => Some(Self::Follow),
            "Accept" => Some(Self::Accept),
            "Reject" => Some(Self::Reject),
            "Undo" => Some(Self::Undo),
            "Like" => Some(Self::Like),
            "Announce" => Some(Self::Announce),
            "Block" => Some(Self::Block),
            "Add" => Some(Self::Add),
            "Remove" => Some(Self::Remove),
            "Move" => Some(Self::Move),
            "Flag" => Some(Self::Flag),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "Create",
            Self::Update => "Update",
            Self::Delete => "Delete",
            Self::Follow => "Follow",
            Self::Accept => "Accept",
            Self::Reject => "Reject",
            Self::Undo => "Undo",
            Self::Like => "Like",
            Self::Announce => "Announce",
            Self::Block => "Block",
            Self::Add => "Add",
            Self::Remove => "Remove",
            Self::Move => "Move",
            Self::Flag => "Flag",
        }
    }
}

impl fmt::Display for ActivityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which configured route list a request arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mailbox {
    Inbox,
    Outbox,
}

impl Mailbox {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inbox => "inbox",
            Self::Outbox => "outbox",
        }
    }
}

/// A verified activity handed to a handler
#[derive(Debug, Clone)]
pub struct InboxActivity {
    pub mailbox: Mailbox,
    pub activity_type: ActivityType,
    pub activity: Value,
    /// Actor URI; the verified key belongs to it
    pub actor: String,
    pub key_id: String,
    /// Value of the `{identifier}` path segment, when the route has one
    pub identifier: Option<String>,
}

/// Handles one kind of verified activity
#[async_trait]
pub trait ActivityHandler: Send + Sync {
    async fn handle(&self, activity: InboxActivity) -> Result<StatusCode, AppError>;
}

/// Registry from activity type to handler
#[derive(Clone, Default)]
pub struct InboxDispatcher {
    handlers: HashMap<ActivityType, Arc<dyn ActivityHandler>>,
}

impl InboxDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous one for the type
    pub fn register(mut self, activity_type: ActivityType, handler: Arc<dyn ActivityHandler>) -> Self {
        self.handlers.insert(activity_type, handler);
        self
    }

    pub fn is_registered(&self, activity_type: ActivityType) -> bool {
        self.handlers.contains_key(&activity_type)
    }

    /// Run the registered handler
    ///
    /// Activities without a handler are accepted with 202.
    pub async fn dispatch(&self, activity: InboxActivity) -> Result<StatusCode, AppError> {
        let Some(handler) = self.handlers.get(&activity.activity_type) else {
            tracing::info!(
                activity_type = %activity.activity_type,
                actor = %activity.actor,
                "No handler registered; accepting activity"
            );
            return Ok(StatusCode::ACCEPTED);
        };

        INBOX_ACTIVITIES_TOTAL
            .with_label_values(&[activity.activity_type.as_str()])
            .inc();
        handler.handle(activity).await
    }
}

/// Turn a configured inbox path into an axum route
pub fn route_path(path: &str) -> String {
    path.replace(IDENTIFIER_PLACEHOLDER, ":identifier")
}

/// Routes for the configured inbox and outbox paths
///
/// Each route appears once. A path listed under both keeps its inbox
/// meaning.
pub fn mailbox_routes(inbox_paths: &[String], outbox_paths: &[String]) -> Vec<(String, Mailbox)> {
    let mut routes: Vec<(String, Mailbox)> = Vec::new();
    let configured = inbox_paths
        .iter()
        .map(|path| (path, Mailbox::Inbox))
        .chain(outbox_paths.iter().map(|path| (path, Mailbox::Outbox)));
    for (path, mailbox) in configured {
        let route = route_path(path);
        if !routes.iter().any(|(existing, _)| *existing == route) {
            routes.push((route, mailbox));
        }
    }
    routes
}

/// Create the inbox and outbox router
///
/// One `POST` route per configured path.
pub fn mailbox_router(state: &AppState) -> Router<AppState> {
    let federation = &state.config.federation;
    mailbox_routes(&federation.inbox_paths, &federation.outbox_paths)
        .into_iter()
        .fold(Router::new(), |router, (route, mailbox)| {
            tracing::debug!(route = %route, mailbox = mailbox.as_str(), "Registering mailbox route");
            match mailbox {
                Mailbox::Inbox => router.route(&route, post(receive_inbox)),
                Mailbox::Outbox => router.route(&route, post(receive_outbox)),
            }
        })
}

/// POST <inbox path>
async fn receive_inbox(
    State(state): State<AppState>,
    params: Option<Path<HashMap<String, String>>>,
    method: Method,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    receive(Mailbox::Inbox, &state, params, &method, &uri, &headers, &body).await
}

/// POST <outbox path>
async fn receive_outbox(
    State(state): State<AppState>,
    params: Option<Path<HashMap<String, String>>>,
    method: Method,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    receive(Mailbox::Outbox, &state, params, &method, &uri, &headers, &body).await
}

async fn receive(
    mailbox: Mailbox,
    state: &AppState,
    params: Option<Path<HashMap<String, String>>>,
    method: &Method,
    uri: &axum::http::Uri,
    headers: &HeaderMap,
    body: &[u8],
) -> Response {
    let identifier = params.and_then(|Path(mut params)| params.remove("identifier"));
    match process(state, mailbox, identifier, method, uri, headers, body).await {
        Ok(status) => status.into_response(),
        Err(e) => e.into_response(),
    }
}

async fn process(
    state: &AppState,
    mailbox: Mailbox,
    identifier: Option<String>,
    method: &Method,
    uri: &axum::http::Uri,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<StatusCode, AppError> {
    let url = request_url(&state.config.server.base_url(), uri)?;

    let outcome = state
        .verifier
        .verify(body, &url, method.as_str(), headers)
        .await;
    let key_id = match outcome {
        VerificationOutcome::Verified { key_id, .. } => key_id,
        rejected => {
            tracing::info!(
                url = %url,
                mailbox = mailbox.as_str(),
                outcome = rejected.as_str(),
                "Rejected mailbox request"
            );
            return Err(AppError::InvalidSignature);
        }
    };

    let activity: Value = serde_json::from_slice(body)
        .map_err(|e| AppError::Validation(format!("Invalid JSON: {}", e)))?;
    let type_name = activity
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::Validation("Missing type field".to_string()))?
        .to_string();
    let actor = activity_actor(&activity)
        .ok_or_else(|| AppError::Validation("Missing actor field".to_string()))?
        .to_string();

    if !key_id_matches_actor(&key_id, &actor) {
        tracing::warn!(key_id = %key_id, actor = %actor, "Signature key does not belong to actor");
        return Err(AppError::Unauthorized);
    }

    let Some(activity_type) = ActivityType::parse(&type_name) else {
        tracing::info!(activity_type = %type_name, actor = %actor, "Unknown activity type; accepting");
        return Ok(StatusCode::ACCEPTED);
    };

    tracing::debug!(activity_type = %activity_type, actor = %actor, "Dispatching verified activity");
    state
        .dispatcher
        .dispatch(InboxActivity {
            mailbox,
            activity_type,
            activity,
            actor,
            key_id,
            identifier,
        })
        .await
}

/// Public URL of the request, as the sender signed it
fn request_url(base_url: &str, uri: &axum::http::Uri) -> Result<Url, AppError> {
    let path_and_query = uri
        .path_and_query()
        .map(|value| value.as_str())
        .unwrap_or_else(|| uri.path());
    Url::parse(&format!("{}{}", base_url.trim_end_matches('/'), path_and_query))
        .map_err(|e| AppError::Validation(format!("Invalid request URL: {}", e)))
}
