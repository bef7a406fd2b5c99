//! Portico API gateway.
//!
//! Terminates client requests, authenticates bearer tokens, filters and
//! rate-limits traffic, and forwards to the configured backend services with
//! path rewriting, service-credential injection and identity propagation.
//! Server-Sent Event responses stream through unbuffered and WebSocket
//! upgrades are piped as raw bytes.

pub mod auth;
pub mod config;
pub mod filter;
pub mod proxy;
pub mod ratelimit;
pub mod routes;
pub mod server;
