mod admin;
mod sessions;

pub use admin::{health, HealthResponse};
pub use sessions::{sign_in, sign_out};
