//! Route guard: decides whether a navigation may proceed

use std::sync::Arc;

use tracing::{debug, info};

use crate::{
    models::{Role, Session},
    navigation::{Navigator, RETURN_URL_PARAM, Redirect},
    routes::{GuardKind, Route, RouteTable},
    session::SessionStore,
};

/// Verdict for a navigation attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Navigation {
    Allow,
    /// Denied; the navigator is sent to the redirect instead
    Deny(Redirect),
}

impl Navigation {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Navigation::Allow)
    }
}

/// Guard consulted before every navigation
#[derive(Clone)]
pub struct RouteGuard {
    store: SessionStore,
    navigator: Arc<dyn Navigator>,
    routes: Arc<RouteTable>,
    login_path: String,
    landing_path: String,
}

impl RouteGuard {
    pub fn new(
        store: SessionStore,
        navigator: Arc<dyn Navigator>,
        routes: RouteTable,
        login_path: impl Into<String>,
        landing_path: impl Into<String>,
    ) -> Self {
        Self {
            store,
            navigator,
            routes: Arc::new(routes),
            login_path: login_path.into(),
            landing_path: landing_path.into(),
        }
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Decide on a navigation to `url` and perform the redirect on denial
    pub fn can_activate(&self, url: &str) -> Navigation {
        let verdict = self.check(url);
        if let Navigation::Deny(redirect) = &verdict {
            info!("Navigation to {} denied, redirecting to {}", url, redirect);
            self.navigator.navigate(redirect);
        }
        verdict
    }

    /// Decide on a navigation to `url` without side effects
    pub fn check(&self, url: &str) -> Navigation {
        let session = self.store.current();
        let chain = self.routes.resolve(url);
        if chain.is_empty() {
            debug!("No route declared for {}, allowing", url);
        }

        chain
            .into_iter()
            .map(|route| self.check_route(route, session.as_ref(), url))
            .find(|verdict| !verdict.is_allowed())
            .unwrap_or(Navigation::Allow)
    }

    fn check_route(&self, route: &Route, session: Option<&Session>, url: &str) -> Navigation {
        match (route.guard(), session) {
            (GuardKind::Public, _) => Navigation::Allow,
            (GuardKind::Authenticated, None) => Navigation::Deny(
                Redirect::to(self.login_path.clone()).with_param(RETURN_URL_PARAM, url),
            ),
            (GuardKind::Authenticated, Some(session)) => {
                if route.required_roles().permits(session.role()) {
                    Navigation::Allow
                } else {
                    debug!(
                        "Role {} not in {:?} for /{}",
                        session.role(),
                        route.required_roles(),
                        route.path()
                    );
                    self.to_landing()
                }
            }
            (GuardKind::RegistrationOnly, Some(session)) if session.role() != Role::Admin => {
                self.to_landing()
            }
            (GuardKind::RegistrationOnly, _) => Navigation::Allow,
            (GuardKind::GuestOnly, Some(_)) => self.to_landing(),
            (GuardKind::GuestOnly, None) => Navigation::Allow,
        }
    }

    fn to_landing(&self) -> Navigation {
        Navigation::Deny(Redirect::to(self.landing_path.clone()))
    }
}
