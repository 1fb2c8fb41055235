//! Rate limiting layers keyed by [`BucketKey`].
//!
//! Counting is left to `governor` (through `tower-governor` for HTTP); this
//! module decides which bucket a request lands in and how large the buckets
//! for each category are.
//!
//! The network address used for unauthenticated callers is the peer address
//! of the connection. Forwarding headers such as `X-Forwarded-For` are not
//! consulted because the client controls them.

use std::{
    net::{IpAddr, SocketAddr},
    num::NonZeroU32,
    sync::Arc,
    time::Duration,
};

use axum::{body::Body, extract::ConnectInfo};
use color_eyre::{Result, eyre::OptionExt};
use governor::{
    DefaultKeyedRateLimiter, Quota, RateLimiter, clock::QuantaInstant, middleware::NoOpMiddleware,
};
use http::Request;
use tap::Pipe;
use tower_governor::{
    GovernorLayer, errors::GovernorError, governor::GovernorConfigBuilder,
    key_extractor::KeyExtractor,
};
use tracing::debug;

use crate::key::{BucketKey, Category, Identifier};

/// Layer produced by [`Limit::layer`].
pub type Layer = GovernorLayer<RequestKeyExtractor, NoOpMiddleware<QuantaInstant>, Body>;

/// Key extractor that derives a [`BucketKey`] for a fixed category.
///
/// The key is built from the request headers and the peer address only; it
/// never fails, so every request is counted against some bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestKeyExtractor {
    category: Category,
}

impl RequestKeyExtractor {
    pub fn new(category: impl Into<Category>) -> Self {
        Self {
            category: category.into(),
        }
    }

    pub fn category(&self) -> &Category {
        &self.category
    }
}

impl KeyExtractor for RequestKeyExtractor {
    type Key = BucketKey;

    fn extract<T>(&self, req: &Request<T>) -> Result<Self::Key, GovernorError> {
        let address = peer_address(req).map(|ip| ip.to_string());
        let identifier = Identifier::from_request(req.headers(), address.as_deref());
        debug!(category = %self.category, source = %identifier.source(), "derived rate limit key");
        BucketKey::new(&self.category, &identifier).pipe(Ok)
    }
}

/// The IP address of the connected peer, if the server recorded one.
///
/// Axum records it as [`ConnectInfo`] when the router is served with
/// `into_make_service_with_connect_info::<SocketAddr>()`; a bare
/// [`SocketAddr`] extension is accepted as well. The port is dropped so that
/// one client maps to one bucket across connections.
pub fn peer_address<T>(req: &Request<T>) -> Option<IpAddr> {
    let extensions = req.extensions();
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .or_else(|| extensions.get::<SocketAddr>().map(SocketAddr::ip))
}

/// Size of the buckets for a category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limit {
    /// Time it takes to replenish one request.
    pub period: Duration,

    /// Number of requests admitted back to back.
    pub burst: u32,
}

impl Limit {
    /// 50 comments per hour.
    pub const COMMENTS: Limit = Limit::new(Duration::from_secs(72), 50);

    /// One post every 30 minutes.
    pub const POSTS: Limit = Limit::new(Duration::from_secs(30 * 60), 1);

    /// 100 requests per minute.
    pub const REQUESTS: Limit = Limit::new(Duration::from_millis(600), 100);

    pub const fn new(period: Duration, burst: u32) -> Self {
        Self { period, burst }
    }

    /// The `governor` quota for this limit.
    ///
    /// Fails if the period or the burst size is zero.
    pub fn quota(&self) -> Result<Quota> {
        let burst = NonZeroU32::new(self.burst).ok_or_eyre("burst size must be non-zero")?;
        Quota::with_period(self.period)
            .ok_or_eyre("replenish period must be non-zero")?
            .allow_burst(burst)
            .pipe(Ok)
    }

    /// A keyed limiter for callers that count requests outside of tower.
    pub fn limiter(&self) -> Result<DefaultKeyedRateLimiter<BucketKey>> {
        self.quota().map(RateLimiter::keyed)
    }

    /// A tower layer limiting requests in `category` by their bucket key.
    ///
    /// Requests over the limit are answered with `429 Too Many Requests`.
    pub fn layer(&self, category: impl Into<Category>) -> Result<Layer> {
        self.quota()?;
        GovernorConfigBuilder::default()
            .period(self.period)
            .burst_size(self.burst)
            .key_extractor(RequestKeyExtractor::new(category))
            .finish()
            .ok_or_eyre("invalid governor config")?
            .pipe(Arc::new)
            .pipe(GovernorLayer::new)
            .pipe(Ok)
    }
}

/// Rate limiter layer for comment creation.
pub fn comments() -> Layer {
    Limit::COMMENTS
        .layer(Category::COMMENTS)
        .expect("valid governor config")
}

/// Rate limiter layer for post creation.
pub fn posts() -> Layer {
    Limit::POSTS
        .layer(Category::POSTS)
        .expect("valid governor config")
}

/// The default rate limiter layer, for protecting the API as a whole.
pub fn requests() -> Layer {
    Limit::REQUESTS
        .layer(Category::REQUESTS)
        .expect("valid governor config")
}
