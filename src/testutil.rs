//! Shared test helpers, available to all `#[cfg(test)]` modules in the crate.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::accounts::{AccountError, Accounts};
use crate::config::{Config, GatewayConfig, SessionConfig, UpstreamConfig};
use crate::storage::models::{Credentials, SignIn, User};
use crate::storage::{MemoryStore, SessionStore, StoreError};
use crate::tokens::{SessionContext, SessionId};
use crate::AppState;

pub const TEST_SIGNING_KEY: &str = "test-signing-key";
pub const TEST_EMAIL: &str = "ada@example.com";
pub const TEST_PASSWORD: &str = "correct horse";

pub fn test_user() -> User {
    User {
        id: 42,
        user_name: "ada".to_string(),
        first_name: "Ada".to_string(),
        last_name: "Lovelace".to_string(),
        photo_url: "https://example.com/ada.png".to_string(),
    }
}

/// A store whose backend is always down.
pub struct UnavailableStore;

impl SessionStore for UnavailableStore {
    fn save_raw(&self, _id: &SessionId, _blob: Vec<u8>) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    fn get_raw(&self, _id: &SessionId) -> Result<Vec<u8>, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    fn delete(&self, _id: &SessionId) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    fn backend(&self) -> &'static str {
        "unavailable"
    }
}

/// Accounts double that knows exactly one user and remembers sign-ins.
#[derive(Default)]
pub struct StaticAccounts {
    pub sign_ins: Mutex<Vec<SignIn>>,
}

#[async_trait]
impl Accounts for StaticAccounts {
    async fn verify_credentials(&self, credentials: &Credentials) -> Result<User, AccountError> {
        if credentials.email == TEST_EMAIL && credentials.password == TEST_PASSWORD {
            Ok(test_user())
        } else {
            Err(AccountError::InvalidCredentials)
        }
    }

    async fn record_sign_in(&self, sign_in: &SignIn) -> Result<(), AccountError> {
        self.sign_ins.lock().unwrap().push(sign_in.clone());
        Ok(())
    }
}

/// A minimal `Config` with one upstream group at `targets`.
pub fn test_config(targets: &[&str]) -> Config {
    Config {
        gateway: GatewayConfig {
            accounts_url: None,
            bind_address: "127.0.0.1:8080".to_string(),
        },
        sessions: SessionConfig {
            signing_key: TEST_SIGNING_KEY.to_string(),
            ..SessionConfig::default()
        },
        upstreams: vec![UpstreamConfig {
            name: "users".to_string(),
            routes: vec!["/v1/users".to_string()],
            targets: targets.iter().map(|t| t.parse().unwrap()).collect(),
        }],
    }
}

/// Build a full `Arc<AppState>` around `store` and `accounts`.
///
/// Uses a `reqwest::Client` with proxy disabled
/// (avoids macOS system-configuration panics in sandboxed tests).
pub fn test_state(
    config: Config,
    store: Arc<dyn SessionStore>,
    accounts: Option<Arc<dyn Accounts>>,
) -> Arc<AppState> {
    let sessions = SessionContext::new(&config.sessions.signing_key, store).unwrap();
    let http_client = reqwest::Client::builder().no_proxy().build().unwrap();
    Arc::new(AppState {
        accounts,
        config,
        http_client,
        sessions,
    })
}

pub fn memory_store() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::new(Duration::from_secs(60)))
}
