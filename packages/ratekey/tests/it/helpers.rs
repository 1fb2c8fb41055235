//! Shared test infrastructure for building limited routers and sending
//! requests through them.

use std::net::SocketAddr;

use axum::{
    Router,
    body::Body,
    extract::{ConnectInfo, Path},
    http::{HeaderMap, Request, StatusCode, header::AUTHORIZATION},
    routing::post,
};
use ratekey::{key::Category, rate_limit::Limit};
use tower::ServiceExt;

/// The only credential the fixture handler accepts.
pub const VALID_KEY: &str = "moltbook_valid_key";

/// Identity field that unrelated middleware might attach to a request.
#[derive(Clone, Debug)]
pub struct Token(pub Option<String>);

/// Build a router with a comment creation route behind `limit`.
///
/// The handler does its own credential check, so the limiter sits in front of
/// authentication the way it does in a real service.
pub fn router(limit: Limit) -> Router {
    Router::new()
        .route("/posts/{id}/comments", post(create_comment))
        .layer(limit.layer(Category::COMMENTS).expect("build rate limit layer"))
}

async fn create_comment(Path(_id): Path<u64>, headers: HeaderMap) -> StatusCode {
    let authorization = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    match authorization.and_then(|value| value.strip_prefix("Bearer ")) {
        Some(key) if key == VALID_KEY => StatusCode::CREATED,
        _ => StatusCode::UNAUTHORIZED,
    }
}

/// A request to the fixture route.
#[derive(Clone, Debug, Default)]
pub struct Call {
    pub authorization: Option<String>,
    pub peer: Option<SocketAddr>,
    pub headers: Vec<(&'static str, String)>,
    pub token: Option<Token>,
}

impl Call {
    pub fn bearer(credential: &str) -> Self {
        Self {
            authorization: Some(format!("Bearer {credential}")),
            ..Default::default()
        }
    }

    pub fn from_peer(peer: &str) -> Self {
        Self::default().peer(peer)
    }

    pub fn peer(mut self, peer: &str) -> Self {
        self.peer = Some(peer.parse().expect("valid socket address"));
        self
    }

    pub fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    pub fn token(mut self, token: Option<&str>) -> Self {
        self.token = Some(Token(token.map(String::from)));
        self
    }

    /// Send the request through `router` and return the response status.
    pub async fn send(&self, router: &Router) -> StatusCode {
        let mut builder = Request::post("/posts/1/comments");
        if let Some(authorization) = &self.authorization {
            builder = builder.header(AUTHORIZATION, authorization);
        }
        for (name, value) in &self.headers {
            builder = builder.header(*name, value);
        }
        let mut request = builder.body(Body::empty()).expect("build request");
        if let Some(peer) = self.peer {
            request.extensions_mut().insert(ConnectInfo(peer));
        }
        if let Some(token) = &self.token {
            request.extensions_mut().insert(token.clone());
        }

        router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible")
            .status()
    }

    /// Send the request `count` times, returning each status in order.
    pub async fn send_times(&self, router: &Router, count: usize) -> Vec<StatusCode> {
        let mut statuses = Vec::with_capacity(count);
        for _ in 0..count {
            statuses.push(self.send(router).await);
        }
        statuses
    }
}
