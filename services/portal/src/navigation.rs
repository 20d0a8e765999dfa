//! Navigation collaborator and redirect targets
//!
//! The session layer never renders anything; it only asks the navigator to
//! move somewhere else. `HistoryNavigator` is the in-process implementation
//! used by the demo binary and the tests.

use std::borrow::Cow;
use std::fmt;

use parking_lot::Mutex;
use tracing::debug;

/// Query parameter carrying the originally requested location
pub const RETURN_URL_PARAM: &str = "returnUrl";
/// Query parameter explaining why the user was sent to login
pub const REASON_PARAM: &str = "reason";
/// Reason recorded when the backend rejected the credential
pub const SESSION_EXPIRED: &str = "session_expired";

/// Navigation target with optional query parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub path: String,
    pub query: Vec<(String, String)>,
}

impl Redirect {
    pub fn to(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            query: Vec::new(),
        }
    }

    /// Append a query parameter
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Value of the first query parameter named `key`
    pub fn param(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Parse a relative URL such as `/login?returnUrl=%2Fstudents`
    pub fn parse(url: &str) -> Self {
        let url = url.split('#').next().unwrap_or_default();
        let (path, query) = url.split_once('?').unwrap_or((url, ""));
        Self {
            path: path.to_string(),
            query: parse_query(query),
        }
    }

    /// Render as a relative URL with a percent-encoded query string
    pub fn to_url(&self) -> String {
        if self.query.is_empty() {
            return self.path.clone();
        }

        let query = self
            .query
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        format!("{}?{}", self.path, query)
    }
}

impl fmt::Display for Redirect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_url())
    }
}

/// Decode an `a=1&b=2` query string. Malformed escapes are kept verbatim.
pub fn parse_query(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            (decode(k), decode(v))
        })
        .collect()
}

fn decode(raw: &str) -> String {
    let raw = raw.replace('+', " ");
    urlencoding::decode(&raw)
        .map(Cow::into_owned)
        .unwrap_or(raw)
}

/// Where to go once login succeeds
///
/// Honours the `returnUrl` parameter of `login_url` when it is a same-site
/// path; anything else (absolute or protocol-relative URLs) falls back to
/// `landing`.
pub fn post_login_destination(login_url: &str, landing: &str) -> String {
    Redirect::parse(login_url)
        .param(RETURN_URL_PARAM)
        .filter(|target| is_local_path(target))
        .map(str::to_string)
        .unwrap_or_else(|| landing.to_string())
}

fn is_local_path(target: &str) -> bool {
    target.starts_with('/') && !target.starts_with("//") && !target.contains('\\')
}

/// Receives the redirects issued by the session layer
pub trait Navigator: Send + Sync {
    /// Move to `target`
    fn navigate(&self, target: &Redirect);

    /// Location currently displayed, as a relative URL
    fn current_url(&self) -> String;
}

/// Navigator that records every location it was sent to
#[derive(Debug)]
pub struct HistoryNavigator {
    history: Mutex<Vec<String>>,
}

impl HistoryNavigator {
    /// Start at `initial`
    pub fn new(initial: impl Into<String>) -> Self {
        Self {
            history: Mutex::new(vec![initial.into()]),
        }
    }

    /// Every location visited, oldest first
    pub fn history(&self) -> Vec<String> {
        self.history.lock().clone()
    }

    /// Record a user-initiated move that bypassed the guard
    pub fn visit(&self, url: impl Into<String>) {
        self.history.lock().push(url.into());
    }
}

impl Default for HistoryNavigator {
    fn default() -> Self {
        Self::new("/")
    }
}

impl Navigator for HistoryNavigator {
    fn navigate(&self, target: &Redirect) {
        let url = target.to_url();
        debug!("Navigating to {}", url);
        self.history.lock().push(url);
    }

    fn current_url(&self) -> String {
        self.history
            .lock()
            .last()
            .cloned()
            .unwrap_or_else(|| "/".to_string())
    }
}
