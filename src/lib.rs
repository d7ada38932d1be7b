//! edge-gateway - An authenticating reverse proxy for a fleet of HTTP services
//!
//! This crate provides:
//! - Signed opaque session tokens (HMAC-SHA256) with a sliding TTL
//! - In-memory or Redis session storage behind one store interface
//! - Round-robin request direction with a verified `X-User` identity header
//! - Sign-in and sign-out endpoints backed by an external account service

pub mod accounts;
pub mod api;
pub mod config;
pub mod device;
pub mod expiration;
pub mod proxy;
pub mod storage;
#[cfg(test)]
pub mod testutil;
pub mod tokens;

use std::sync::Arc;

use accounts::Accounts;
use config::Config;
use tokens::SessionContext;

/// Shared application state
pub struct AppState {
    /// Present only when sign-in is enabled
    pub accounts: Option<Arc<dyn Accounts>>,
    pub config: Config,
    /// Client used to forward proxied requests
    pub http_client: reqwest::Client,
    pub sessions: SessionContext,
}
