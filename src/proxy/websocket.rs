use super::{empty_body, full_body, GatewayError, ProxyBody};
use crate::config::BackendConfig;
use bytes::Bytes;
use http::{HeaderMap, Request, Response, StatusCode};
use http_body_util::{BodyExt, Empty};
use hyper::body::Incoming;
use hyper_util::rt::TokioIo;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Proxy a WebSocket upgrade as an opaque byte pipe: forward the handshake
/// to the backend, mirror its 101 back to the client, then copy bytes in
/// both directions until either side closes. No frame parsing happens here.
pub async fn proxy_upgrade(
    timeout: Duration,
    backend: &BackendConfig,
    req: &mut Request<Incoming>,
    upstream_path: String,
    headers: HeaderMap,
) -> Result<Response<ProxyBody>, GatewayError> {
    let target = url::Url::parse(&backend.base_url)
        .map_err(|e| GatewayError::Internal(format!("invalid backend base URL: {}", e)))?;
    let host = target
        .host_str()
        .ok_or_else(|| GatewayError::Internal("backend base URL has no host".to_string()))?
        .to_string();
    let port = target.port_or_known_default().unwrap_or(80);

    let unreachable = |detail: String| GatewayError::Upstream {
        backend: backend.id.name(),
        detail,
    };

    let stream = tokio::time::timeout(timeout, TcpStream::connect((host.as_str(), port)))
        .await
        .map_err(|_| unreachable("connect timed out".to_string()))?
        .map_err(|e| unreachable(e.to_string()))?;

    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
        .await
        .map_err(|e| unreachable(e.to_string()))?;

    // The connection task must keep running for the upgraded stream.
    tokio::spawn(async move {
        if let Err(e) = conn.with_upgrades().await {
            debug!(error = %e, "websocket upstream connection ended");
        }
    });

    let mut upstream_req = Request::builder()
        .method(req.method().clone())
        .uri(upstream_path)
        .body(Empty::<Bytes>::new())
        .map_err(|e| GatewayError::Internal(format!("failed to build upgrade request: {}", e)))?;
    *upstream_req.headers_mut() = headers;
    upstream_req
        .headers_mut()
        .insert(http::header::HOST, host_header(&host, port, target.scheme())?);

    let mut upstream_res = tokio::time::timeout(timeout, sender.send_request(upstream_req))
        .await
        .map_err(|_| unreachable("no handshake response within timeout".to_string()))?
        .map_err(|e| unreachable(e.to_string()))?;

    // The backend declined the upgrade; relay its answer as a plain response.
    if upstream_res.status() != StatusCode::SWITCHING_PROTOCOLS {
        let (parts, body) = upstream_res.into_parts();
        let bytes = body
            .collect()
            .await
            .map_err(|e| unreachable(e.to_string()))?
            .to_bytes();
        return Ok(Response::from_parts(parts, full_body(bytes)));
    }

    let client_upgrade = hyper::upgrade::on(&mut *req);
    let server_upgrade = hyper::upgrade::on(&mut upstream_res);
    let backend_name = backend.id.name();

    tokio::spawn(async move {
        let (client_io, server_io) = match tokio::try_join!(client_upgrade, server_upgrade) {
            Ok(pair) => pair,
            Err(e) => {
                warn!(backend = backend_name, error = %e, "websocket upgrade failed");
                return;
            }
        };

        let mut client_io = TokioIo::new(client_io);
        let mut server_io = TokioIo::new(server_io);

        match tokio::io::copy_bidirectional(&mut client_io, &mut server_io).await {
            Ok((to_backend, to_client)) => {
                info!(
                    backend = backend_name,
                    bytes_to_backend = to_backend,
                    bytes_to_client = to_client,
                    "websocket session closed"
                );
            }
            Err(e) => {
                // Mid-stream failure: both sides are dropped, nothing is retried.
                debug!(backend = backend_name, error = %e, "websocket pipe terminated");
            }
        }
    });

    let mut response = Response::builder().status(StatusCode::SWITCHING_PROTOCOLS);
    for (name, value) in upstream_res.headers().iter() {
        response = response.header(name, value);
    }

    response
        .body(empty_body())
        .map_err(|e| GatewayError::Internal(format!("failed to build upgrade response: {}", e)))
}

fn host_header(host: &str, port: u16, scheme: &str) -> Result<http::HeaderValue, GatewayError> {
    let default_port = matches!((scheme, port), ("http", 80) | ("https", 443));
    let value = if default_port {
        host.to_string()
    } else {
        format!("{}:{}", host, port)
    };
    http::HeaderValue::from_str(&value)
        .map_err(|_| GatewayError::Internal("invalid backend host".to_string()))
}
