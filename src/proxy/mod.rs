pub mod director;

pub use director::{
    Director, DirectorError, Dispatch, HasPrincipal, Target, ANONYMOUS_IDENTITY, X_FORWARDED_HOST,
    X_USER,
};
