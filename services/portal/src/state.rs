//! Portal context shared by every screen

use std::sync::Arc;

use common::storage::{FileStore, KeyValueStore, MemoryStore};
use tracing::info;

use crate::{
    client::AuthClient,
    config::PortalConfig,
    error::ApiResult,
    guard::RouteGuard,
    interceptor::{AuthInterceptor, HttpTransport, ReqwestTransport},
    navigation::Navigator,
    rate_limiter::LoginThrottle,
    routes::RouteTable,
    session::SessionStore,
};

/// Collaborators wired together once at startup
#[derive(Clone)]
pub struct PortalContext {
    pub config: Arc<PortalConfig>,
    pub storage: Arc<dyn KeyValueStore>,
    pub navigator: Arc<dyn Navigator>,
    pub session: SessionStore,
    pub guard: RouteGuard,
    pub interceptor: AuthInterceptor,
    pub auth: AuthClient,
}

impl PortalContext {
    /// Build the context with the configured storage and a `reqwest` transport
    pub fn new(config: PortalConfig, navigator: Arc<dyn Navigator>) -> ApiResult<Self> {
        let storage: Arc<dyn KeyValueStore> = match &config.storage_path {
            Some(path) => {
                info!("Persisting session in {}", path.display());
                Arc::new(FileStore::open(path)?)
            }
            None => {
                info!("No storage_path configured, session kept in memory");
                Arc::new(MemoryStore::new())
            }
        };

        Self::with_parts(
            config,
            storage,
            navigator,
            Arc::new(ReqwestTransport::default()),
        )
    }

    /// Build the context around explicit collaborators
    pub fn with_parts(
        config: PortalConfig,
        storage: Arc<dyn KeyValueStore>,
        navigator: Arc<dyn Navigator>,
        transport: Arc<dyn HttpTransport>,
    ) -> ApiResult<Self> {
        let session = SessionStore::new(storage.clone(), navigator.clone(), &config.login_path);
        let guard = RouteGuard::new(
            session.clone(),
            navigator.clone(),
            RouteTable::uchk(),
            &config.login_path,
            &config.landing_path,
        );
        let interceptor = AuthInterceptor::new(
            &config,
            session.clone(),
            storage.clone(),
            navigator.clone(),
            transport,
        )?;
        let auth = AuthClient::new(
            interceptor.clone(),
            session.clone(),
            LoginThrottle::new(config.throttle.clone()),
            config.default_token_ttl(),
        );

        Ok(Self {
            config: Arc::new(config),
            storage,
            navigator,
            session,
            guard,
            interceptor,
            auth,
        })
    }
}
