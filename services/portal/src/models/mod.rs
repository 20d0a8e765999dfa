//! Session layer models

pub mod role;
pub mod session;
pub mod user;

// Re-export for convenience
pub use role::{Role, RoleSet, UnknownRole};
pub use session::Session;
pub use user::{Identity, LoginRequest, LoginResponse, RegisterRequest, ValidateResponse};
