use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::proxy::HasPrincipal;

/// Device kind detected from User-Agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DeviceKind {
    Bot,
    Desktop,
    Mobile,
    Tablet,
    #[default]
    Unknown,
}

/// Information about the device that signed in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DeviceInfo {
    pub browser: Option<String>,
    pub browser_version: Option<String>,
    pub kind: DeviceKind,
    pub os: Option<String>,
    pub os_version: Option<String>,
    pub raw_user_agent: String,
}

/// Public profile of an authenticated user.
///
/// This is the principal propagated to upstream services in `X-User`, so it
/// never carries the email address or password hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub user_name: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(rename = "photoURL")]
    pub photo_url: String,
}

/// Session state stored for every signed-in client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    /// When the session began
    pub start_time: DateTime<Utc>,
    /// Who the session belongs to
    pub user: User,
}

impl SessionState {
    pub fn new(user: User) -> Self {
        Self {
            start_time: Utc::now(),
            user,
        }
    }
}

impl HasPrincipal for SessionState {
    type Principal = User;

    fn principal(&self) -> &User {
        &self.user
    }
}

/// Sign-in credentials submitted by a client
#[derive(Clone, Deserialize, Serialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

/// A successful sign-in, reported to the account service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignIn {
    pub device_info: DeviceInfo,
    /// Client address, taken from the first `X-Forwarded-For` entry when present
    pub ip: Option<String>,
    pub sign_in_time: DateTime<Utc>,
    #[serde(rename = "userID")]
    pub user_id: i64,
}
