//! Client for the external account service that owns user profiles.
//!
//! The gateway never sees password hashes: it hands submitted credentials to
//! the account service and receives the public [`User`] profile back.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;

use crate::storage::models::{Credentials, SignIn, User};

#[derive(Debug, Error)]
pub enum AccountError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("account service unavailable: {0}")]
    Unavailable(String),
}

impl From<reqwest::Error> for AccountError {
    fn from(e: reqwest::Error) -> Self {
        AccountError::Unavailable(e.to_string())
    }
}

#[async_trait]
pub trait Accounts: Send + Sync {
    /// Check `credentials` and return the matching user's profile.
    async fn verify_credentials(&self, credentials: &Credentials) -> Result<User, AccountError>;

    /// Record a successful sign-in.
    async fn record_sign_in(&self, sign_in: &SignIn) -> Result<(), AccountError>;
}

/// [`Accounts`] backed by the account service's HTTP API.
#[derive(Debug, Clone)]
pub struct HttpAccounts {
    base_url: String,
    client: reqwest::Client,
}

impl HttpAccounts {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, AccountError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(base_url, client))
    }

    pub fn with_client(base_url: &str, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

#[async_trait]
impl Accounts for HttpAccounts {
    async fn verify_credentials(&self, credentials: &Credentials) -> Result<User, AccountError> {
        let response = self
            .client
            .post(self.url("/v1/credentials/verify"))
            .json(credentials)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(response.json::<User>().await?),
            StatusCode::UNAUTHORIZED | StatusCode::NOT_FOUND => {
                Err(AccountError::InvalidCredentials)
            }
            status => Err(AccountError::Unavailable(format!(
                "credential check returned {status}"
            ))),
        }
    }

    async fn record_sign_in(&self, sign_in: &SignIn) -> Result<(), AccountError> {
        let response = self
            .client
            .post(self.url("/v1/sign-ins"))
            .json(sign_in)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AccountError::Unavailable(format!(
                "sign-in record returned {status}"
            )));
        }
        Ok(())
    }
}
