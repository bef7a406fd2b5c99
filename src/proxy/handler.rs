use super::upstream::sanitize_headers;
use super::websocket;
use super::{full_body, BoxError, GatewayError, GatewayState, ProxyBody};
use crate::auth::Identity;
use crate::config::BackendConfig;
use crate::ratelimit::RateDecision;
use crate::routes::{Route, RouteTable};
use bytes::Bytes;
use futures_util::TryStreamExt;
use http::{header, HeaderMap, HeaderValue, Method, Request, Response, StatusCode, Uri};
use http_body_util::{BodyExt, StreamBody};
use hyper::body::{Frame, Incoming};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error, info, instrument};

pub const REQUEST_ID_HEADER: &str = "x-request-id";
pub const SERVICE_KEY_HEADER: &str = "x-api-key";
pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_EMAIL_HEADER: &str = "x-user-email";
pub const USER_NAME_HEADER: &str = "x-user-name";

const CORS_METHODS: &str = "GET, POST, PUT, DELETE, PATCH, OPTIONS";
const CORS_HEADERS: &str =
    "authorization, content-type, x-request-id, x-user-id, x-user-email, x-user-name";

pub struct GatewayHandler {
    state: Arc<GatewayState>,
}

impl GatewayHandler {
    pub fn new(state: Arc<GatewayState>) -> Self {
        Self { state }
    }

    /// Run the full request pipeline. Always produces a response; per-request
    /// failures are converted to error responses here and never escape to the
    /// connection task.
    #[instrument(skip(self, req), fields(request_id))]
    pub async fn handle_request(
        &self,
        req: Request<Incoming>,
        peer: SocketAddr,
    ) -> Response<ProxyBody> {
        let start = std::time::Instant::now();
        let request_id = request_id_for(req.headers());
        tracing::Span::current().record("request_id", request_id.as_str());

        let method = req.method().clone();
        let path = req.uri().path().to_string();

        let mut response = match self.dispatch(req, peer, &request_id).await {
            Ok(response) => response,
            Err(err) => {
                match &err {
                    GatewayError::Internal(detail) => {
                        error!(request_id = %request_id, error = %detail, "request failed unexpectedly");
                    }
                    other => {
                        debug!(request_id = %request_id, error = %other, "request rejected");
                    }
                }
                err.to_response(&request_id, self.state.config.dev_mode)
            }
        };

        self.finalize(&mut response, &request_id);

        info!(
            request_id = %request_id,
            method = %method,
            path = %path,
            status = response.status().as_u16(),
            duration_ms = start.elapsed().as_millis() as u64,
            "request completed"
        );

        response
    }

    async fn dispatch(
        &self,
        mut req: Request<Incoming>,
        peer: SocketAddr,
        request_id: &str,
    ) -> Result<Response<ProxyBody>, GatewayError> {
        let path = req.uri().path().to_string();

        // Liveness probe: no filter, no auth, no rate limit.
        if req.method() == Method::GET && path == "/health" {
            return self.health_response();
        }

        // Administrative prefixes never route, not even for preflight.
        if RouteTable::is_internal(&path) {
            return Err(GatewayError::InternalPathBlocked);
        }

        if req.method() == Method::OPTIONS {
            return Ok(self.preflight_response());
        }

        // Step 1: traffic filter, before any authentication work.
        self.state.filter.inspect(req.headers(), req.uri(), peer.ip())?;

        // Step 2: route lookup.
        let route = self
            .state
            .routes
            .find(&path)
            .ok_or(GatewayError::RouteNotFound)?
            .clone();

        let backend = self.state.config.backend(route.backend).clone();
        let upstream_path = rewrite_with_query(&route, req.uri());

        // WebSocket upgrades carry no body to screen; they pass the same
        // auth and rate-limit gate, then hand the stream off untouched.
        if is_upgrade_request(req.headers()) {
            let (identity, _) = self.authorize(req.headers(), &route, peer, request_id)?;
            let headers =
                self.build_upgrade_headers(req.headers(), &backend, identity.as_ref(), request_id)?;
            return websocket::proxy_upgrade(
                self.state.upstream.timeout(),
                &backend,
                &mut req,
                upstream_path,
                headers,
            )
            .await;
        }

        let (parts, body) = req.into_parts();
        let body_bytes = body
            .collect()
            .await
            .map_err(|e| GatewayError::Internal(format!("failed to read request body: {}", e)))?
            .to_bytes();

        // Step 3: the body stage of the traffic filter. Form field names get
        // their verdict before any authentication work happens.
        if is_form_urlencoded(&parts.headers) {
            self.state.filter.inspect_form_body(&body_bytes, peer.ip())?;
        }

        // Steps 4 and 5: authentication, then rate limiting.
        let (identity, rate) = self.authorize(&parts.headers, &route, peer, request_id)?;

        let headers =
            self.build_upstream_headers(&parts.headers, &backend, identity.as_ref(), request_id)?;
        let url = format!("{}{}", backend.base_url, upstream_path);

        let upstream_response = self
            .state
            .upstream
            .send(&backend, parts.method, url, headers, body_bytes)
            .await?;

        self.relay_response(upstream_response, &backend, rate).await
    }

    /// Authentication followed by rate limiting. Public routes skip
    /// enforcement but still pick up a verified identity when a valid token
    /// happens to be sent; the rate key prefers that identity over the
    /// source address.
    fn authorize(
        &self,
        headers: &HeaderMap,
        route: &Route,
        peer: SocketAddr,
        request_id: &str,
    ) -> Result<(Option<Identity>, Option<RateDecision>), GatewayError> {
        let auth_header = headers.get(header::AUTHORIZATION);
        let identity = if route.auth_required {
            let identity = self.state.verifier.verify(auth_header)?;
            info!(
                request_id = %request_id,
                user_id = %identity.subject,
                backend = %route.backend,
                "request authenticated"
            );
            Some(identity)
        } else {
            auth_header.and_then(|h| self.state.verifier.verify(Some(h)).ok())
        };

        let rate = match route.tier {
            Some(tier) => {
                let key = identity
                    .as_ref()
                    .map(|i| i.subject.clone())
                    .unwrap_or_else(|| peer.ip().to_string());
                Some(self.state.limiter.check(tier, &key)?)
            }
            None => None,
        };

        Ok((identity, rate))
    }

    /// Convert the upstream response. Event streams pipe through unbuffered;
    /// everything else is read fully and re-sent with hardening headers.
    async fn relay_response(
        &self,
        upstream_response: reqwest::Response,
        backend: &BackendConfig,
        rate: Option<RateDecision>,
    ) -> Result<Response<ProxyBody>, GatewayError> {
        let status = upstream_response.status();
        let mut headers = sanitize_headers(upstream_response.headers());

        let is_event_stream = upstream_response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.starts_with("text/event-stream"))
            .unwrap_or(false);

        let body = if is_event_stream {
            debug!(backend = %backend.id, "relaying event stream unbuffered");
            headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
            headers.insert("x-accel-buffering", HeaderValue::from_static("no"));

            let stream = upstream_response
                .bytes_stream()
                .map_ok(Frame::data)
                .map_err(|e| Box::new(e) as BoxError);
            StreamBody::new(stream).boxed_unsync()
        } else {
            let bytes = tokio::time::timeout(
                self.state.upstream.timeout(),
                upstream_response.bytes(),
            )
            .await
            .map_err(|_| GatewayError::Upstream {
                backend: backend.id.name(),
                detail: "timed out reading response body".to_string(),
            })?
            .map_err(|e| GatewayError::Upstream {
                backend: backend.id.name(),
                detail: format!("failed to read response body: {}", e),
            })?;

            headers.insert(
                "x-content-type-options",
                HeaderValue::from_static("nosniff"),
            );
            headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
            headers.insert(
                "x-xss-protection",
                HeaderValue::from_static("1; mode=block"),
            );
            full_body(bytes)
        };

        if let Some(rate) = rate {
            headers.insert("x-ratelimit-limit", header_num(rate.limit as i64));
            headers.insert("x-ratelimit-remaining", header_num(rate.remaining as i64));
            headers.insert("x-ratelimit-reset", header_num(rate.reset_secs));
        }

        let mut response = Response::builder()
            .status(status)
            .body(body)
            .map_err(|e| GatewayError::Internal(format!("failed to build response: {}", e)))?;
        *response.headers_mut() = headers;

        Ok(response)
    }

    fn build_upstream_headers(
        &self,
        inbound: &HeaderMap,
        backend: &BackendConfig,
        identity: Option<&Identity>,
        request_id: &str,
    ) -> Result<HeaderMap, GatewayError> {
        let mut headers = sanitize_headers(inbound);

        // A backend must trust only the gateway-asserted identity, never a
        // raw end-user token.
        if identity.is_some() {
            headers.remove(header::AUTHORIZATION);
        }

        headers.insert(SERVICE_KEY_HEADER, header_value(&backend.service_key)?);

        if let Some(identity) = identity {
            headers.insert(USER_ID_HEADER, header_value(&identity.subject)?);
            if let Some(email) = &identity.email {
                if let Ok(value) = HeaderValue::from_str(email) {
                    headers.insert(USER_EMAIL_HEADER, value);
                }
            }
            if let Some(name) = &identity.name {
                if let Ok(value) = HeaderValue::from_str(name) {
                    headers.insert(USER_NAME_HEADER, value);
                }
            }
        }

        headers.insert(REQUEST_ID_HEADER, header_value(request_id)?);
        headers.insert("x-forwarded-proto", HeaderValue::from_static("http"));
        if let Some(host) = inbound.get(header::HOST) {
            headers.insert("x-forwarded-host", host.clone());
        }

        Ok(headers)
    }

    /// Upgrade requests keep their connection-negotiation headers, which the
    /// regular sanitizer strips.
    fn build_upgrade_headers(
        &self,
        inbound: &HeaderMap,
        backend: &BackendConfig,
        identity: Option<&Identity>,
        request_id: &str,
    ) -> Result<HeaderMap, GatewayError> {
        let mut headers = self.build_upstream_headers(inbound, backend, identity, request_id)?;

        headers.insert(header::CONNECTION, HeaderValue::from_static("Upgrade"));
        if let Some(upgrade) = inbound.get(header::UPGRADE) {
            headers.insert(header::UPGRADE, upgrade.clone());
        }
        for (name, value) in inbound.iter() {
            if name.as_str().starts_with("sec-websocket-") {
                headers.append(name.clone(), value.clone());
            }
        }

        Ok(headers)
    }

    fn health_response(&self) -> Result<Response<ProxyBody>, GatewayError> {
        let payload = json!({
            "status": "ok",
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "version": env!("CARGO_PKG_VERSION"),
            "uptime_secs": self.state.started_at.elapsed().as_secs(),
        });

        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "application/json")
            .body(full_body(Bytes::from(payload.to_string())))
            .map_err(|e| GatewayError::Internal(format!("failed to build response: {}", e)))
    }

    fn preflight_response(&self) -> Response<ProxyBody> {
        let mut response = Response::new(super::empty_body());
        *response.status_mut() = StatusCode::NO_CONTENT;
        let headers = response.headers_mut();
        headers.insert(
            "access-control-allow-methods",
            HeaderValue::from_static(CORS_METHODS),
        );
        headers.insert(
            "access-control-allow-headers",
            HeaderValue::from_static(CORS_HEADERS),
        );
        headers.insert("access-control-max-age", HeaderValue::from_static("600"));
        response
    }

    /// Headers present on every response the gateway produces, success or
    /// error: correlation id and the single-origin CORS grant.
    fn finalize(&self, response: &mut Response<ProxyBody>, request_id: &str) {
        let origin = self.state.config.frontend_origin.clone();
        let headers = response.headers_mut();

        if let Ok(value) = HeaderValue::from_str(request_id) {
            headers.insert(REQUEST_ID_HEADER, value);
        }
        if let Ok(value) = HeaderValue::from_str(&origin) {
            headers.insert("access-control-allow-origin", value);
        }
        headers.insert(
            "access-control-allow-credentials",
            HeaderValue::from_static("true"),
        );
    }
}

fn request_id_for(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(|v| v.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

fn rewrite_with_query(route: &Route, uri: &Uri) -> String {
    let rewritten = route.rewrite(uri.path());
    match uri.query() {
        Some(query) => format!("{}?{}", rewritten, query),
        None => rewritten,
    }
}

fn is_form_urlencoded(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.starts_with("application/x-www-form-urlencoded"))
        .unwrap_or(false)
}

fn is_upgrade_request(headers: &HeaderMap) -> bool {
    let connection_upgrades = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| {
            v.split(',')
                .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
        });

    let upgrade_websocket = headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);

    connection_upgrades && upgrade_websocket
}

fn header_value(value: &str) -> Result<HeaderValue, GatewayError> {
    HeaderValue::from_str(value)
        .map_err(|_| GatewayError::Internal(format!("invalid header value: {:?}", value)))
}

fn header_num(value: i64) -> HeaderValue {
    HeaderValue::from_str(&value.to_string()).unwrap_or(HeaderValue::from_static("0"))
}
