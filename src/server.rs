use crate::config::GatewayConfig;
use crate::proxy::{GatewayHandler, GatewayState};
use anyhow::{Context, Result};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

pub struct GatewayServer {
    config: Arc<GatewayConfig>,
    handler: Arc<GatewayHandler>,
}

impl GatewayServer {
    /// Create a new gateway server. Fails if the configuration is invalid;
    /// nothing is bound yet.
    pub fn new(config: GatewayConfig) -> Result<Self> {
        let state = Arc::new(GatewayState::new(config)?);
        let config = Arc::clone(&state.config);
        let handler = Arc::new(GatewayHandler::new(state));

        Ok(Self { config, handler })
    }

    /// Accept connections until `shutdown` resolves, then stop accepting and
    /// drain in-flight connections before returning.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let addr: SocketAddr = self
            .config
            .listen_addr()
            .parse()
            .context("Invalid listen address")?;

        let listener = TcpListener::bind(&addr)
            .await
            .context(format!("Failed to bind to {}", addr))?;

        info!("gateway listening on {}", addr);

        let drain_timeout = self.config.upstream_timeout();
        let mut connections: JoinSet<()> = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer_addr) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            error!("failed to accept connection: {}", e);
                            continue;
                        }
                    };

                    let handler = Arc::clone(&self.handler);
                    connections.spawn(serve_connection(stream, peer_addr, handler));

                    // Reap completed connection tasks as we go.
                    while connections.try_join_next().is_some() {}
                }
                _ = &mut shutdown => break,
            }
        }

        drop(listener);
        info!(
            in_flight = connections.len(),
            "shutdown signal received; draining in-flight connections"
        );

        let drain = async {
            while connections.join_next().await.is_some() {}
        };
        if tokio::time::timeout(drain_timeout, drain).await.is_err() {
            warn!("drain deadline elapsed; aborting remaining connections");
            connections.shutdown().await;
        }

        info!("gateway stopped");
        Ok(())
    }
}

async fn serve_connection(
    stream: tokio::net::TcpStream,
    peer_addr: SocketAddr,
    handler: Arc<GatewayHandler>,
) {
    let io = TokioIo::new(stream);

    let service = service_fn(move |req| {
        let handler = Arc::clone(&handler);
        async move { Ok::<_, Infallible>(handler.handle_request(req, peer_addr).await) }
    });

    // with_upgrades keeps the TCP stream available after a 101 so WebSocket
    // sessions can be piped through.
    if let Err(e) = http1::Builder::new()
        .serve_connection(io, service)
        .with_upgrades()
        .await
    {
        debug!("connection from {} ended with error: {}", peer_addr, e);
    }
}
