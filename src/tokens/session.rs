//! Session lifecycle: begin, resolve and end sessions against HTTP messages.
//!
//! Every reason a presented credential can fail (missing, wrong scheme,
//! malformed, forged, expired or unknown) collapses into
//! [`SessionError::Unauthenticated`]. The specific reason is only logged at
//! debug level. Store outages stay distinct as
//! [`SessionError::BackendUnavailable`].

use std::fmt;
use std::sync::Arc;

use axum::http::{header, HeaderMap, HeaderValue, Request, Uri};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use super::codec::{self, SessionToken, TokenError};
use crate::storage::{SessionStore, SessionStoreExt, StoreError};

/// Authorization scheme (with its trailing space) accepted in headers
pub const SCHEME_BEARER: &str = "Bearer ";

/// Query parameter accepted when a client cannot set headers
pub const PARAM_AUTHORIZATION: &str = "auth";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CredentialError {
    #[error("no session token presented")]
    NoTokenPresented,
    #[error("authorization scheme not supported")]
    InvalidScheme,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid session configuration: {0}")]
    Config(TokenError),
    #[error("unauthenticated")]
    Unauthenticated,
    #[error("session store unavailable: {0}")]
    BackendUnavailable(StoreError),
}

/// A session successfully resolved from a request
#[derive(Debug)]
pub struct Resolved<S> {
    pub state: S,
    pub token: SessionToken,
}

fn unauthenticated(reason: impl fmt::Display) -> SessionError {
    tracing::debug!(%reason, "Rejected session credentials");
    SessionError::Unauthenticated
}

fn store_failure(e: StoreError) -> SessionError {
    match e {
        StoreError::NotFound => unauthenticated(e),
        other => SessionError::BackendUnavailable(other),
    }
}

/// Begin a new session.
///
/// Issues a token, saves `state` under its id and only then appends
/// `Authorization: Bearer <token>` to `response_headers`, so a failed save
/// never hands out a token that resolves to nothing.
pub fn begin<T, S>(
    secret: &str,
    store: &T,
    state: &S,
    response_headers: &mut HeaderMap,
) -> Result<SessionToken, SessionError>
where
    T: SessionStore + ?Sized,
    S: Serialize + ?Sized,
{
    let token = codec::issue(secret).map_err(SessionError::Config)?;
    // base64url output is always a legal header value
    let value = HeaderValue::from_str(&format!("{SCHEME_BEARER}{token}"))
        .map_err(|_| SessionError::Config(TokenError::Malformed))?;

    store
        .save(token.id(), state)
        .map_err(SessionError::BackendUnavailable)?;

    response_headers.append(header::AUTHORIZATION, value);
    tracing::debug!(token_id = %token.id(), backend = store.backend(), "Began session");
    Ok(token)
}

/// Pull the raw (unvalidated) token out of a request.
///
/// The `Authorization` header wins; when it is absent or empty the `auth`
/// query parameter is used instead.
pub fn extract_token<B>(request: &Request<B>) -> Result<String, CredentialError> {
    let header_value = request
        .headers()
        .get(header::AUTHORIZATION)
        .filter(|value| !value.is_empty());

    let presented = match header_value {
        Some(value) => {
            let value = value.to_str().map_err(|_| CredentialError::InvalidScheme)?;
            value
                .strip_prefix(SCHEME_BEARER)
                .ok_or(CredentialError::InvalidScheme)?
                .to_string()
        }
        None => {
            let raw = query_param(request.uri(), PARAM_AUTHORIZATION)
                .ok_or(CredentialError::NoTokenPresented)?;
            match raw.strip_prefix(SCHEME_BEARER) {
                Some(rest) => rest.to_string(),
                None => raw,
            }
        }
    };

    let presented = presented.trim();
    if presented.is_empty() {
        return Err(CredentialError::NoTokenPresented);
    }
    Ok(presented.to_string())
}

fn query_param(uri: &Uri, name: &str) -> Option<String> {
    uri.query()?
        .split('&')
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (key == name).then_some(value)
        })
        .find_map(|value| urlencoding::decode(value).ok())
        .map(|value| value.into_owned())
}

/// Resolve the session presented by `request` into its stored state.
pub fn resolve<T, S, B>(
    request: &Request<B>,
    secret: &str,
    store: &T,
) -> Result<Resolved<S>, SessionError>
where
    T: SessionStore + ?Sized,
    S: DeserializeOwned,
{
    let raw = extract_token(request).map_err(unauthenticated)?;
    let token = codec::validate(&raw, secret).map_err(unauthenticated)?;
    let state = store.get(token.id()).map_err(store_failure)?;
    Ok(Resolved { state, token })
}

/// End the session presented by `request`.
///
/// An invalid token short-circuits before the store is touched.
pub fn end<T, B>(request: &Request<B>, secret: &str, store: &T) -> Result<SessionToken, SessionError>
where
    T: SessionStore + ?Sized,
{
    let raw = extract_token(request).map_err(unauthenticated)?;
    let token = codec::validate(&raw, secret).map_err(unauthenticated)?;
    store.delete(token.id()).map_err(store_failure)?;
    tracing::debug!(token_id = %token.id(), "Ended session");
    Ok(token)
}

/// Signing key and store shared by every request handler.
#[derive(Clone)]
pub struct SessionContext {
    signing_key: Arc<str>,
    store: Arc<dyn SessionStore>,
}

impl SessionContext {
    pub fn new(signing_key: &str, store: Arc<dyn SessionStore>) -> Result<Self, SessionError> {
        if signing_key.is_empty() {
            return Err(SessionError::Config(TokenError::EmptySecret));
        }
        Ok(Self {
            signing_key: Arc::from(signing_key),
            store,
        })
    }

    pub fn store(&self) -> &dyn SessionStore {
        self.store.as_ref()
    }

    pub fn begin<S: Serialize + ?Sized>(
        &self,
        state: &S,
        response_headers: &mut HeaderMap,
    ) -> Result<SessionToken, SessionError> {
        begin(&self.signing_key, self.store.as_ref(), state, response_headers)
    }

    pub fn resolve<S: DeserializeOwned, B>(
        &self,
        request: &Request<B>,
    ) -> Result<Resolved<S>, SessionError> {
        resolve(request, &self.signing_key, self.store.as_ref())
    }

    pub fn end<B>(&self, request: &Request<B>) -> Result<SessionToken, SessionError> {
        end(request, &self.signing_key, self.store.as_ref())
    }
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("store", &self.store.backend())
            .finish_non_exhaustive()
    }
}
