//! Portal route table
//!
//! Routes are path patterns built from literal segments, `:param` segments
//! and a trailing `**` wildcard. Each route declares the guard that runs
//! before it activates and, for authenticated routes, the roles allowed
//! through. Child routes nest under their parent and every route on the
//! matched chain is checked.

use crate::models::{Role, RoleSet};

/// Check run before a route activates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardKind {
    /// No check
    Public,
    /// Requires a session, and a permitted role when roles are declared
    Authenticated,
    /// Open to anonymous users and administrators only
    RegistrationOnly,
    /// Open to anonymous users only
    GuestOnly,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
    Wildcard,
}

/// Declared route
#[derive(Debug, Clone)]
pub struct Route {
    path: String,
    segments: Vec<Segment>,
    guard: GuardKind,
    roles: RoleSet,
    children: Vec<Route>,
}

impl Route {
    /// Public route for `path` (without leading slash, e.g. `formations/:id`)
    pub fn new(path: &str) -> Self {
        let path = path.trim_matches('/');
        let segments = split_path(path)
            .map(|segment| match segment {
                "**" => Segment::Wildcard,
                s if s.starts_with(':') => Segment::Param(s[1..].to_string()),
                s => Segment::Literal(s.to_string()),
            })
            .collect();

        Self {
            path: path.to_string(),
            segments,
            guard: GuardKind::Public,
            roles: RoleSet::any(),
            children: Vec::new(),
        }
    }

    /// Route requiring an authenticated session
    pub fn authenticated(path: &str) -> Self {
        Self::new(path).guarded(GuardKind::Authenticated)
    }

    pub fn guarded(mut self, guard: GuardKind) -> Self {
        self.guard = guard;
        self
    }

    /// Restrict to `roles`. Implies [`GuardKind::Authenticated`].
    pub fn roles(mut self, roles: impl Into<RoleSet>) -> Self {
        self.guard = GuardKind::Authenticated;
        self.roles = roles.into();
        self
    }

    pub fn child(mut self, child: Route) -> Self {
        self.children.push(child);
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn guard(&self) -> GuardKind {
        self.guard
    }

    pub fn required_roles(&self) -> &RoleSet {
        &self.roles
    }

    /// Chain of routes matching `segments`, outermost first
    fn match_chain<'a>(&'a self, segments: &[&str]) -> Option<Vec<&'a Route>> {
        let mut rest = segments;
        for (i, pattern) in self.segments.iter().enumerate() {
            match pattern {
                Segment::Wildcard if i + 1 == self.segments.len() => return Some(vec![self]),
                Segment::Wildcard => return None,
                Segment::Literal(lit) => match rest.split_first() {
                    Some((head, tail)) if head == lit => rest = tail,
                    _ => return None,
                },
                Segment::Param(_) => match rest.split_first() {
                    Some((_, tail)) => rest = tail,
                    None => return None,
                },
            }
        }

        if let Some(mut chain) = self
            .children
            .iter()
            .find_map(|child| child.match_chain(rest))
        {
            chain.insert(0, self);
            return Some(chain);
        }

        rest.is_empty().then(|| vec![self])
    }
}

fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Ordered set of top-level routes; the first match wins
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, route: Route) -> Self {
        self.routes.push(route);
        self
    }

    /// Routes matched by `url`, outermost first; empty when nothing matches
    ///
    /// Query string and fragment are ignored.
    pub fn resolve(&self, url: &str) -> Vec<&Route> {
        let path = url.split(['?', '#']).next().unwrap_or_default();
        let segments: Vec<&str> = split_path(path).collect();

        self.routes
            .iter()
            .find_map(|route| route.match_chain(&segments))
            .unwrap_or_default()
    }

    /// The UCHK portal routes
    pub fn uchk() -> Self {
        let managers = [Role::Admin, Role::FormationManager];

        RouteTable::new()
            // Root is the dashboard entry point and needs a session
            .route(Route::authenticated(""))
            .route(Route::new("login").guarded(GuardKind::GuestOnly))
            .route(Route::new("register").guarded(GuardKind::RegistrationOnly))
            .route(Route::authenticated("dashboard"))
            .route(
                Route::new("administration")
                    .roles([Role::Admin, Role::Administration])
                    .child(Route::new("documents"))
                    .child(Route::new("documents/new"))
                    .child(Route::new("documents/edit/:id")),
            )
            .route(
                Route::authenticated("communication")
                    .child(Route::new("documents"))
                    .child(Route::new("detail/:id"))
                    .child(Route::new("reports"))
                    .child(Route::new("reports/add"))
                    .child(Route::new("reports/edit/:id"))
                    .child(Route::new("admin-notes").roles([Role::Admin]))
                    .child(Route::new("admin-notes/add").roles([Role::Admin]))
                    .child(Route::new("admin-notes/edit/:id").roles([Role::Admin]))
                    .child(Route::new("notifications")),
            )
            .route(
                Route::authenticated("formations")
                    .child(Route::new("add").roles(managers))
                    .child(Route::new("edit/:id").roles(managers))
                    .child(Route::new("my-formation"))
                    .child(Route::new(":id"))
                    .child(Route::new(":id/schedule"))
                    .child(Route::new(":id/trainers")),
            )
            .route(
                Route::authenticated("students")
                    .child(Route::new("add"))
                    .child(Route::new("edit/:id"))
                    .child(Route::new("profile"))
                    .child(Route::new(":id")),
            )
            .route(
                Route::new("insertion")
                    .roles([Role::Admin, Role::FormationManager, Role::Administration])
                    .child(Route::new("add"))
                    .child(Route::new("edit/:id"))
                    .child(Route::new("statistics"))
                    .child(Route::new(":id")),
            )
            .route(Route::new("**"))
    }
}
