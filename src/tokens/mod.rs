pub mod codec;
pub mod session;

pub use codec::{issue, validate, SessionId, SessionToken, TokenError};
pub use session::{CredentialError, Resolved, SessionContext, SessionError};
