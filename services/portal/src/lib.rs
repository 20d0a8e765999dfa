//! Client-side session layer of the UCHK portal
//!
//! Keeps track of the logged-in user, persists the session across restarts,
//! ends it when the token expires, guards navigation by authentication and
//! role, and decorates backend calls with credentials.

pub mod client;
pub mod config;
pub mod error;
pub mod guard;
pub mod interceptor;
pub mod jwt;
pub mod lifecycle;
pub mod models;
pub mod navigation;
pub mod rate_limiter;
pub mod routes;
pub mod session;
pub mod state;
pub mod validation;

pub use client::AuthClient;
pub use config::PortalConfig;
pub use error::{ApiError, ApiResult};
pub use guard::{Navigation, RouteGuard};
pub use interceptor::{ApiRequest, ApiResponse, AuthInterceptor, HttpTransport, ReqwestTransport};
pub use models::{Identity, Role, RoleSet, Session};
pub use navigation::{HistoryNavigator, Navigator, Redirect};
pub use session::{RestoreOutcome, SessionStore};
pub use state::PortalContext;
