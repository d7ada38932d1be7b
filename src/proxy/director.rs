//! Request director for one upstream group.
//!
//! A [`Director`] authenticates each request through the session lifecycle,
//! replaces any client-supplied identity with the verified one, and points the
//! request at the next target in round-robin order.
//!
//! Authentication failures never block the request: it is forwarded with the
//! anonymous identity `{}` and upstream services decide what anonymous callers
//! may do.

use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::http::header::{self, HeaderName, HeaderValue};
use axum::http::uri::{Authority, PathAndQuery, Scheme};
use axum::http::{Request, Uri};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::tokens::{SessionContext, SessionError};

/// Verified identity propagated to upstream services
pub const X_USER: HeaderName = HeaderName::from_static("x-user");

/// Host originally requested by the client
pub const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");

/// `X-User` value for requests without a valid session
pub const ANONYMOUS_IDENTITY: &str = "{}";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DirectorError {
    #[error("upstream group {0:?} has no targets")]
    NoTargets(String),
    #[error("invalid target address {0:?}: {1}")]
    InvalidTarget(String, String),
    #[error("failed to rewrite request URI: {0}")]
    Rewrite(String),
}

/// Session state that exposes the principal to propagate upstream.
pub trait HasPrincipal {
    type Principal: Serialize;

    fn principal(&self) -> &Self::Principal;
}

/// One backend instance: scheme and authority, no path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    authority: Authority,
    scheme: Scheme,
}

impl Target {
    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    pub fn scheme(&self) -> &Scheme {
        &self.scheme
    }
}

impl FromStr for Target {
    type Err = DirectorError;

    /// Accepts `http://host:port`, `https://host:port` or a bare `host:port`
    /// (which means plain http).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = |reason: &str| DirectorError::InvalidTarget(s.to_string(), reason.to_string());

        let uri: Uri = s.parse().map_err(|e: axum::http::uri::InvalidUri| invalid(&e.to_string()))?;
        let authority = uri.authority().cloned().ok_or_else(|| invalid("missing host"))?;
        let scheme = uri.scheme().cloned().unwrap_or(Scheme::HTTP);

        if scheme != Scheme::HTTP && scheme != Scheme::HTTPS {
            return Err(invalid("scheme must be http or https"));
        }
        if !matches!(uri.path(), "" | "/") || uri.query().is_some() {
            return Err(invalid("targets cannot carry a path or query"));
        }

        Ok(Self { authority, scheme })
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.authority)
    }
}

/// Outcome of directing one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dispatch {
    /// Whether a verified identity was attached
    pub authenticated: bool,
    /// Index of the selected target
    pub target: usize,
}

/// Round-robin director for a single upstream group.
///
/// The selection counter belongs to this director alone; separate groups get
/// separate directors and never share a cursor.
pub struct Director<S> {
    group: String,
    next: AtomicUsize,
    sessions: SessionContext,
    targets: Vec<Target>,
    _state: PhantomData<fn() -> S>,
}

impl<S> Director<S>
where
    S: HasPrincipal + DeserializeOwned,
{
    pub fn new(
        group: impl Into<String>,
        targets: Vec<Target>,
        sessions: SessionContext,
    ) -> Result<Self, DirectorError> {
        let group = group.into();
        if targets.is_empty() {
            return Err(DirectorError::NoTargets(group));
        }
        Ok(Self {
            group,
            next: AtomicUsize::new(0),
            sessions,
            targets,
            _state: PhantomData,
        })
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    /// Claim the next target index.
    ///
    /// `fetch_add` hands every caller a distinct pre-increment value, so
    /// concurrent requests never observe the same slot.
    pub fn next_index(&self) -> usize {
        self.next.fetch_add(1, Ordering::Relaxed) % self.targets.len()
    }

    /// Authenticate `request`, attach the identity header and retarget it.
    pub fn direct<B>(&self, request: &mut Request<B>) -> Result<Dispatch, DirectorError> {
        // Never trust an identity the client supplied
        request.headers_mut().remove(X_USER);

        let identity = match self.sessions.resolve::<S, B>(request) {
            Ok(resolved) => principal_header(resolved.state.principal()),
            Err(SessionError::BackendUnavailable(e)) => {
                tracing::warn!(group = %self.group, error = %e, "Session store unavailable, forwarding anonymously");
                None
            }
            Err(_) => None,
        };
        let authenticated = identity.is_some();
        request.headers_mut().insert(
            X_USER,
            identity.unwrap_or_else(|| HeaderValue::from_static(ANONYMOUS_IDENTITY)),
        );

        let index = self.next_index();
        let target = &self.targets[index];

        let original_host = request.headers().get(header::HOST).cloned().or_else(|| {
            request
                .uri()
                .authority()
                .and_then(|authority| HeaderValue::from_str(authority.as_str()).ok())
        });

        let uri = rewrite_uri(request.uri(), target)?;
        *request.uri_mut() = uri;

        let headers = request.headers_mut();
        if let Some(host) = original_host {
            headers.append(X_FORWARDED_HOST, host);
        }
        if let Ok(host) = HeaderValue::from_str(target.authority.as_str()) {
            headers.insert(header::HOST, host);
        }

        tracing::debug!(group = %self.group, target = %target, authenticated, "Directed request");
        Ok(Dispatch {
            authenticated,
            target: index,
        })
    }
}

impl<S> fmt::Debug for Director<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Director")
            .field("group", &self.group)
            .field("targets", &self.targets)
            .finish_non_exhaustive()
    }
}

fn principal_header<P: Serialize>(principal: &P) -> Option<HeaderValue> {
    let json = match serde_json::to_vec(principal) {
        Ok(json) => json,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to serialize principal");
            return None;
        }
    };
    // serde_json escapes every control character except DEL, which only occurs inside strings
    let mut escaped = Vec::with_capacity(json.len());
    for byte in json {
        match byte {
            0x7f => escaped.extend_from_slice(b"\\u007f"),
            other => escaped.push(other),
        }
    }
    // from_bytes keeps non-ASCII names (obs-text)
    match HeaderValue::from_bytes(&escaped) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(error = %e, "Principal is not a valid header value");
            None
        }
    }
}

/// Point `uri` at `target`, keeping its path and query.
fn rewrite_uri(uri: &Uri, target: &Target) -> Result<Uri, DirectorError> {
    let path_and_query = uri
        .path_and_query()
        .cloned()
        .unwrap_or_else(|| PathAndQuery::from_static("/"));

    Uri::builder()
        .scheme(target.scheme.clone())
        .authority(target.authority.clone())
        .path_and_query(path_and_query)
        .build()
        .map_err(|e| DirectorError::Rewrite(e.to_string()))
}
