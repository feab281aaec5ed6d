//! Common test utilities for E2E tests

#![allow(dead_code)]

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use ed25519_dalek::SigningKey;
use fedisig::api::{ActivityHandler, InboxActivity, InboxDispatcher};
use fedisig::error::AppError;
use fedisig::federation::{
    ActorFetcher, ActorKeyHandle, RequestSigner, SchemeSet, SigningBody, SigningRequest,
    SigningResult, StandardSuite,
};
use fedisig::{AppState, config};
use parking_lot::Mutex;
use rsa::RsaPrivateKey;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use tower::ServiceExt;
use url::Url;

pub const ACTOR: &str = "https://remote.example/users/alice";
pub const BASE_URL: &str = "http://localhost";

/// Actor fetcher serving fixed documents
#[derive(Default)]
pub struct FakeFetcher {
    pub documents: HashMap<String, Value>,
    pub requests: Mutex<Vec<String>>,
}

#[async_trait]
impl ActorFetcher for FakeFetcher {
    async fn fetch_actor(&self, url: &str) -> Result<Value, AppError> {
        self.requests.lock().push(url.to_string());
        self.documents.get(url).cloned().ok_or(AppError::NotFound)
    }
}

/// Handler that records what it receives
#[derive(Default)]
pub struct RecordingHandler {
    pub seen: Mutex<Vec<InboxActivity>>,
}

#[async_trait]
impl ActivityHandler for RecordingHandler {
    async fn handle(&self, activity: InboxActivity) -> Result<StatusCode, AppError> {
        self.seen.lock().push(activity);
        Ok(StatusCode::OK)
    }
}

/// Signing identity of the remote actor
pub struct RemoteActor {
    pub rsa: ActorKeyHandle,
    pub ed: ActorKeyHandle,
}

impl RemoteActor {
    pub fn new() -> Self {
        let rsa_key = RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
        let ed_key = SigningKey::generate(&mut rand::rngs::OsRng);
        Self {
            rsa: ActorKeyHandle::new(format!("{ACTOR}#main-key"), rsa_key).unwrap(),
            ed: ActorKeyHandle::new(format!("{ACTOR}#ed25519-key"), ed_key).unwrap(),
        }
    }

    pub fn document(&self) -> Value {
        json!({
            "@context": [
                "https://www.w3.org/ns/activitystreams",
                "https://w3id.org/security/v1"
            ],
            "id": ACTOR,
            "type": "Person",
            "inbox": format!("{ACTOR}/inbox"),
            "publicKey": {
                "id": self.rsa.key_id(),
                "owner": ACTOR,
                "publicKeyPem": self.rsa.private_key().public_key().to_public_pem().unwrap(),
            },
            "assertionMethod": [{
                "id": self.ed.key_id(),
                "type": "Multikey",
                "controller": ACTOR,
                "publicKeyMultibase": self.ed.private_key().public_key().to_multibase().unwrap(),
            }]
        })
    }
}

/// Router under test plus handles for assertions
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub actor: RemoteActor,
    pub fetcher: Arc<FakeFetcher>,
    pub handler: Arc<RecordingHandler>,
}

pub fn test_config() -> config::AppConfig {
    config::AppConfig {
        server: config::ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8080,
            domain: "localhost".to_string(),
            protocol: "http".to_string(),
        },
        federation: config::FederationConfig {
            inbox_paths: vec![
                "/inbox".to_string(),
                "/users/{identifier}/inbox".to_string(),
            ],
            outbox_paths: vec!["/users/{identifier}/outbox".to_string()],
            ..config::FederationConfig::default()
        },
        cache: config::CacheConfig::default(),
        logging: config::LoggingConfig {
            level: "info".to_string(),
            format: "pretty".to_string(),
        },
    }
}

impl TestApp {
    /// Build the app with a Follow handler registered
    pub fn new() -> Self {
        let actor = RemoteActor::new();
        let mut fetcher = FakeFetcher::default();
        fetcher.documents.insert(ACTOR.to_string(), actor.document());
        let fetcher = Arc::new(fetcher);
        let handler = Arc::new(RecordingHandler::default());

        let dispatcher = InboxDispatcher::new()
            .register(fedisig::api::ActivityType::Follow, handler.clone());
        let state = AppState::with_fetcher(test_config(), fetcher.clone(), dispatcher).unwrap();
        let router = fedisig::build_router(state.clone());

        Self {
            router,
            state,
            actor,
            fetcher,
            handler,
        }
    }

    /// Send a request through the router
    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }
}

pub fn follow(actor: &str) -> Value {
    json!({
        "@context": "https://www.w3.org/ns/activitystreams",
        "id": "https://remote.example/activities/1",
        "type": "Follow",
        "actor": actor,
        "object": "http://localhost/users/bob",
    })
}

/// Sign `body` for delivery to `path` on the local server
pub fn sign(path: &str, body: Value, keys: Vec<ActorKeyHandle>, schemes: &[&str]) -> SigningResult {
    let signer = RequestSigner::new(Arc::new(StandardSuite::default()), "remote-test/1.0");
    let url = Url::parse(&format!("{BASE_URL}{path}")).unwrap();
    signer.sign(
        SigningRequest::new("POST", url)
            .with_body(SigningBody::Json(body))
            .with_schemes(SchemeSet::parse(schemes).unwrap())
            .with_keys(keys),
    )
}

/// Turn a signing result into an inbox request
pub fn inbox_request(path: &str, signed: SigningResult) -> Request<Body> {
    request_with_body(path, signed, |body| body)
}

/// Same as [`inbox_request`], letting the test alter the body bytes
pub fn request_with_body<F>(path: &str, signed: SigningResult, alter: F) -> Request<Body>
where
    F: FnOnce(Vec<u8>) -> Vec<u8>,
{
    let mut builder = Request::builder().method("POST").uri(path);
    for (name, value) in signed.headers.iter() {
        builder = builder.header(name, value);
    }
    let body = signed.body.map(SigningBody::into_bytes).unwrap_or_default();
    builder.body(Body::from(alter(body))).unwrap()
}
