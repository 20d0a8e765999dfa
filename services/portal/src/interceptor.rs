//! Request interceptor for calls to the backend
//!
//! Every outbound request goes through [`AuthInterceptor::send`]. Requests
//! aimed at the backend's address space get the bearer token and, when
//! state-changing, the anti-forgery token. An authorization failure on an
//! authenticated call ends the session and sends the user to login; the
//! failure is still returned to the caller.

use std::sync::Arc;

use async_trait::async_trait;
use common::storage::KeyValueStore;
use reqwest::{
    Method, StatusCode, Url,
    header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue},
};
use serde::{Serialize, de::DeserializeOwned};
use tracing::{debug, error, info, warn};

use crate::{
    config::PortalConfig,
    error::{ApiError, ApiResult},
    navigation::{Navigator, REASON_PARAM, RETURN_URL_PARAM, Redirect, SESSION_EXPIRED},
    session::SessionStore,
};

/// Outbound HTTP request
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
}

impl ApiRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::new(Method::PUT, url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::DELETE, url)
    }

    /// Attach a JSON body
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> ApiResult<Self> {
        self.body = Some(serde_json::to_vec(body)?);
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(self)
    }

    /// Whether the method may change server state
    pub fn is_state_changing(&self) -> bool {
        !matches!(
            self.method,
            Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE
        )
    }
}

/// Response as seen by callers
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl ApiResponse {
    pub fn new(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// Decode the body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> ApiResult<T> {
        Ok(serde_json::from_str(&self.body)?)
    }

    fn into_result(self) -> ApiResult<Self> {
        if self.status.is_success() {
            Ok(self)
        } else {
            Err(ApiError::Status {
                status: self.status,
                body: self.body,
            })
        }
    }
}

/// Sends requests over the wire
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Perform `request`. Non-success statuses are returned as responses.
    async fn send(&self, request: ApiRequest) -> ApiResult<ApiResponse>;
}

/// Transport backed by `reqwest`
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: ApiRequest) -> ApiResult<ApiResponse> {
        let mut builder = self
            .client
            .request(request.method, &request.url)
            .headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await?;

        Ok(ApiResponse {
            status,
            headers,
            body,
        })
    }
}

/// Interceptor attaching credentials and reacting to authorization failures
#[derive(Clone)]
pub struct AuthInterceptor {
    store: SessionStore,
    storage: Arc<dyn KeyValueStore>,
    navigator: Arc<dyn Navigator>,
    transport: Arc<dyn HttpTransport>,
    api_base: Url,
    login_path: String,
    xsrf_storage_key: String,
    xsrf_header: HeaderName,
    logout_on_forbidden: bool,
}

impl AuthInterceptor {
    pub fn new(
        config: &PortalConfig,
        store: SessionStore,
        storage: Arc<dyn KeyValueStore>,
        navigator: Arc<dyn Navigator>,
        transport: Arc<dyn HttpTransport>,
    ) -> ApiResult<Self> {
        let api_base = Url::parse(&config.api_url)
            .map_err(|e| ApiError::InvalidUrl(format!("{}: {}", config.api_url, e)))?;
        let xsrf_header = HeaderName::from_bytes(config.xsrf_header.as_bytes())
            .map_err(|e| ApiError::Validation(format!("invalid xsrf_header: {e}")))?;

        Ok(Self {
            store,
            storage,
            navigator,
            transport,
            api_base,
            login_path: config.login_path.clone(),
            xsrf_storage_key: config.xsrf_storage_key.clone(),
            xsrf_header,
            logout_on_forbidden: config.logout_on_forbidden,
        })
    }

    /// Absolute URL of `path` under the API base
    pub fn api_url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.api_base.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Whether `url` lies in the backend's address space
    pub fn is_backend_url(&self, url: &str) -> bool {
        let Ok(url) = Url::parse(url) else {
            return false;
        };

        let base = &self.api_base;
        if url.scheme() != base.scheme()
            || url.host_str() != base.host_str()
            || url.port_or_known_default() != base.port_or_known_default()
        {
            return false;
        }

        let prefix = base.path().trim_end_matches('/');
        let path = url.path();
        prefix.is_empty()
            || path == prefix
            || path
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with('/'))
    }

    /// Attach credentials to a backend request
    ///
    /// Returns the request and whether it carries a bearer token. Requests
    /// outside the backend's address space come back untouched.
    pub fn prepare(&self, mut request: ApiRequest) -> (ApiRequest, bool) {
        if !self.is_backend_url(&request.url) {
            return (request, false);
        }

        let mut authenticated = false;
        if let Some(token) = self.store.token() {
            match HeaderValue::from_str(&format!("Bearer {token}")) {
                Ok(value) => {
                    request.headers.insert(AUTHORIZATION, value);
                    authenticated = true;
                }
                Err(e) => warn!("Bearer token is not a valid header value: {}", e),
            }
        }

        if request.is_state_changing() {
            match self.storage.get(&self.xsrf_storage_key) {
                Ok(Some(xsrf)) => match HeaderValue::from_str(&xsrf) {
                    Ok(value) => {
                        request.headers.insert(self.xsrf_header.clone(), value);
                    }
                    Err(e) => warn!("Anti-forgery token is not a valid header value: {}", e),
                },
                Ok(None) => {}
                Err(e) => warn!("Failed to read anti-forgery token: {}", e),
            }
        }

        (request, authenticated)
    }

    /// Send `request`, turning non-success statuses into errors
    pub async fn send(&self, request: ApiRequest) -> ApiResult<ApiResponse> {
        let (request, authenticated) = self.prepare(request);
        let method = request.method.clone();
        let url = request.url.clone();
        debug!("{} {} (authenticated: {})", method, url, authenticated);

        let response = self.transport.send(request).await.inspect_err(|e| {
            error!("{} {} failed: {}", method, url, e);
        })?;

        if authenticated && self.ends_session(response.status) {
            info!(
                "{} {} answered {}, ending session",
                method, url, response.status
            );
            self.expire_session();
        }

        response.into_result()
    }

    /// Send `request` and decode the JSON response body
    pub async fn send_json<T: DeserializeOwned>(&self, request: ApiRequest) -> ApiResult<T> {
        self.send(request).await?.json()
    }

    fn ends_session(&self, status: StatusCode) -> bool {
        match status {
            StatusCode::UNAUTHORIZED => true,
            StatusCode::FORBIDDEN => self.logout_on_forbidden && self.store.is_logged_in(),
            _ => false,
        }
    }

    fn expire_session(&self) {
        // Read the location before logout moves the navigator
        let here = Redirect::parse(&self.navigator.current_url());
        let return_url = if here.path == self.login_path {
            here.param(RETURN_URL_PARAM).map(str::to_string)
        } else {
            Some(here.to_url())
        };

        self.store.logout();

        let mut redirect = Redirect::to(self.login_path.clone());
        if let Some(return_url) = return_url {
            redirect = redirect.with_param(RETURN_URL_PARAM, return_url);
        }
        self.navigator
            .navigate(&redirect.with_param(REASON_PARAM, SESSION_EXPIRED));
    }
}
