mod error;
pub(crate) mod handler;
mod upstream;
mod websocket;

pub use error::GatewayError;
pub use handler::GatewayHandler;
pub use upstream::UpstreamClient;

use crate::auth::TokenVerifier;
use crate::config::GatewayConfig;
use crate::filter::TrafficFilter;
use crate::ratelimit::RateLimiter;
use crate::routes::RouteTable;
use bytes::Bytes;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full};
use std::sync::Arc;
use std::time::Instant;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Response body type shared by buffered and streamed relays. Unsync because
/// streamed bodies wrap the upstream client's byte stream.
pub type ProxyBody = UnsyncBoxBody<Bytes, BoxError>;

pub fn full_body(bytes: impl Into<Bytes>) -> ProxyBody {
    Full::new(bytes.into())
        .map_err(|never| match never {})
        .boxed_unsync()
}

pub fn empty_body() -> ProxyBody {
    Empty::new().map_err(|never| match never {}).boxed_unsync()
}

/// Shared, read-only per-process state. Everything except the rate counter
/// buckets is immutable after startup.
pub struct GatewayState {
    pub config: Arc<GatewayConfig>,
    pub verifier: TokenVerifier,
    pub filter: TrafficFilter,
    pub limiter: RateLimiter,
    pub routes: RouteTable,
    pub upstream: UpstreamClient,
    pub started_at: Instant,
}

impl GatewayState {
    pub fn new(config: GatewayConfig) -> anyhow::Result<Self> {
        let verifier = TokenVerifier::new(&config.auth_secret);
        let filter = TrafficFilter::new();
        let limiter = RateLimiter::new();
        let routes = RouteTable::build(&config);
        let upstream = UpstreamClient::new(config.upstream_timeout())?;

        Ok(Self {
            config: Arc::new(config),
            verifier,
            filter,
            limiter,
            routes,
            upstream,
            started_at: Instant::now(),
        })
    }
}
