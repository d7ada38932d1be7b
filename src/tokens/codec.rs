//! Signed, opaque session tokens.
//!
//! A token is `base64url(id || HMAC-SHA256(secret, id))` where `id` is 32
//! random bytes. The token carries no claims: the only thing it proves is that
//! the holder was handed an id minted with our secret.

use std::fmt;

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Length of the random id portion
pub const ID_LENGTH: usize = 32;

/// Length of the HMAC-SHA256 signature portion
pub const SIGNATURE_LENGTH: usize = 32;

/// Decoded length of a well-formed token
pub const SIGNED_LENGTH: usize = ID_LENGTH + SIGNATURE_LENGTH;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("signing key may not be empty")]
    EmptySecret,
    #[error("malformed session token")]
    Malformed,
    #[error("invalid session token signature")]
    InvalidSignature,
}

/// The random id portion of a token; this is what stores are keyed by.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId([u8; ID_LENGTH]);

impl SessionId {
    pub fn as_bytes(&self) -> &[u8; ID_LENGTH] {
        &self.0
    }
}

impl From<[u8; ID_LENGTH]> for SessionId {
    fn from(bytes: [u8; ID_LENGTH]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({self})")
    }
}

/// A validated (or freshly issued) session token.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken {
    encoded: String,
    id: SessionId,
}

impl SessionToken {
    /// The wire form handed to clients
    pub fn as_str(&self) -> &str {
        &self.encoded
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encoded)
    }
}

// Only the id is printed so tokens don't end up in logs verbatim.
impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionToken")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// Issue a new token signed with `secret`.
pub fn issue(secret: &str) -> Result<SessionToken, TokenError> {
    if secret.is_empty() {
        return Err(TokenError::EmptySecret);
    }

    let mut rng = rand::thread_rng();
    let id: [u8; ID_LENGTH] = rng.gen();

    let Ok(mut signer) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return Err(TokenError::EmptySecret);
    };
    signer.update(&id);
    let signature = signer.finalize().into_bytes();

    let mut raw = Vec::with_capacity(SIGNED_LENGTH);
    raw.extend_from_slice(&id);
    raw.extend_from_slice(&signature);

    Ok(SessionToken {
        encoded: URL_SAFE.encode(raw),
        id: SessionId(id),
    })
}

/// Validate a token presented by a client against `secret`.
pub fn validate(raw: &str, secret: &str) -> Result<SessionToken, TokenError> {
    let decoded = URL_SAFE.decode(raw).map_err(|_| TokenError::Malformed)?;
    if decoded.len() != SIGNED_LENGTH {
        return Err(TokenError::Malformed);
    }

    let (id, signature) = decoded.split_at(ID_LENGTH);
    let Ok(mut verifier) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return Err(TokenError::InvalidSignature);
    };
    verifier.update(id);
    // verify_slice compares in constant time
    verifier
        .verify_slice(signature)
        .map_err(|_| TokenError::InvalidSignature)?;

    let mut id_bytes = [0u8; ID_LENGTH];
    id_bytes.copy_from_slice(id);

    Ok(SessionToken {
        encoded: raw.to_string(),
        id: SessionId(id_bytes),
    })
}
