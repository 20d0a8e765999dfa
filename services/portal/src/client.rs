//! Client for the backend `auth` endpoints
//!
//! Login, registration, token validation and logout. A successful login
//! hands the identity and token to the session store; the token lifetime is
//! read from the JWT `exp` claim when possible.

use chrono::{TimeDelta, Utc};
use reqwest::StatusCode;
use tracing::{error, info, warn};

use crate::{
    error::{ApiError, ApiResult},
    interceptor::{ApiRequest, AuthInterceptor},
    jwt,
    models::{LoginRequest, LoginResponse, RegisterRequest, Role, ValidateResponse},
    rate_limiter::LoginThrottle,
    session::SessionStore,
    validation,
};

/// Auth endpoint client
#[derive(Clone)]
pub struct AuthClient {
    interceptor: AuthInterceptor,
    store: SessionStore,
    throttle: LoginThrottle,
    default_ttl: TimeDelta,
}

impl AuthClient {
    pub fn new(
        interceptor: AuthInterceptor,
        store: SessionStore,
        throttle: LoginThrottle,
        default_ttl: TimeDelta,
    ) -> Self {
        Self {
            interceptor,
            store,
            throttle,
            default_ttl,
        }
    }

    /// Log in and install the resulting session
    pub async fn login(&self, username: &str, password: &str) -> ApiResult<LoginResponse> {
        validation::validate_login(username, password).map_err(ApiError::Validation)?;
        self.throttle.check(username).await?;

        info!("Login attempt for user: {}", username);
        let request = ApiRequest::post(self.interceptor.api_url("auth/login")).json(&LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
        })?;

        let response: LoginResponse = match self.interceptor.send_json(request).await {
            Ok(response) => response,
            Err(e) if e.status() == Some(StatusCode::UNAUTHORIZED) => {
                warn!("Failed login attempt for user: {}", username);
                self.throttle.record_failure(username).await;
                return Err(ApiError::InvalidCredentials);
            }
            Err(e) if e.status() == Some(StatusCode::TOO_MANY_REQUESTS) => {
                warn!("Backend refused login for {}: too many attempts", username);
                return Err(ApiError::TooManyAttempts {
                    retry_after: self.throttle.config().lockout(),
                });
            }
            Err(e) => {
                error!("Login request failed: {}", e);
                return Err(e);
            }
        };

        self.throttle.record_success(username).await;

        let ttl = self.token_ttl(&response.token);
        self.store.login(response.identity(), response.token.clone(), ttl);

        Ok(response)
    }

    /// Register a student account
    ///
    /// The role is always STUDENT whatever the form says.
    pub async fn register(&self, mut form: RegisterRequest) -> ApiResult<()> {
        validation::validate_registration(&form).map_err(ApiError::Validation)?;
        form.role = Role::Student;

        info!("Registration request for user: {}", form.username);
        let request = ApiRequest::post(self.interceptor.api_url("auth/register")).json(&form)?;
        self.interceptor.send(request).await?;

        Ok(())
    }

    /// Ask the backend whether the current token is still accepted
    ///
    /// A negative answer ends the session.
    pub async fn validate(&self) -> ApiResult<ValidateResponse> {
        let response: ValidateResponse = self
            .interceptor
            .send_json(ApiRequest::get(self.interceptor.api_url("auth/validate")))
            .await?;

        if !response.valid && self.store.is_logged_in() {
            warn!(
                "Backend no longer accepts the session: {}",
                response.message.as_deref().unwrap_or("no reason given")
            );
            self.store.logout();
        }

        Ok(response)
    }

    /// Tell the backend, then end the local session whatever it answered
    pub async fn logout(&self) {
        if self.store.is_logged_in() {
            let request = ApiRequest::post(self.interceptor.api_url("auth/logout"));
            if let Err(e) = self.interceptor.send(request).await {
                warn!("Server-side logout failed: {}", e);
            }
        }

        self.store.logout();
    }

    fn token_ttl(&self, token: &str) -> TimeDelta {
        match jwt::token_expiry(token) {
            Some(expires_at) => expires_at - Utc::now(),
            None => self.default_ttl,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PortalConfig, ThrottleConfig};
    use crate::interceptor::tests::ScriptedTransport;
    use crate::navigation::HistoryNavigator;
    use common::storage::MemoryStore;
    use std::sync::Arc;
    use std::time::Duration;

    struct Fixture {
        client: AuthClient,
        store: SessionStore,
        transport: Arc<ScriptedTransport>,
    }

    fn fixture() -> Fixture {
        let config = PortalConfig::default();
        let storage = Arc::new(MemoryStore::new());
        let navigator = Arc::new(HistoryNavigator::new("/login"));
        let transport = Arc::new(ScriptedTransport::default());
        let store = SessionStore::new(storage.clone(), navigator.clone(), "/login");
        let interceptor = AuthInterceptor::new(
            &config,
            store.clone(),
            storage,
            navigator,
            transport.clone(),
        )
        .unwrap();
        let throttle = LoginThrottle::new(ThrottleConfig {
            max_attempts: 2,
            ..ThrottleConfig::default()
        });

        Fixture {
            client: AuthClient::new(interceptor, store.clone(), throttle, config.default_token_ttl()),
            store,
            transport,
        }
    }

    fn login_body(token: &str, role: &str) -> String {
        serde_json::json!({
            "token": token,
            "username": "ousmane",
            "email": "ousmane@uchk.sn",
            "role": role,
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_login_installs_session_with_jwt_expiry() {
        let f = fixture();
        let exp = Utc::now().timestamp() + 7200;
        let token = crate::jwt::tests::signed_token("ousmane", exp);
        f.transport.reply(StatusCode::OK, &login_body(&token, "TEACHER"));

        let response = f.client.login("ousmane", "pa55word").await.unwrap();

        assert_eq!(response.role, Role::Teacher);
        let session = f.store.current().unwrap();
        assert_eq!(session.username(), "ousmane");
        assert_eq!(session.user_id(), None);
        assert!((session.expires_at.timestamp() - exp).abs() <= 1);

        let sent = f.transport.last();
        assert_eq!(sent.url, "http://localhost:8080/api/auth/login");
        let body: serde_json::Value = serde_json::from_slice(&sent.body.unwrap()).unwrap();
        assert_eq!(body, serde_json::json!({"username": "ousmane", "password": "pa55word"}));
    }

    #[tokio::test]
    async fn test_opaque_token_uses_default_ttl() {
        let f = fixture();
        f.transport.reply(StatusCode::OK, &login_body("opaque", "STUDENT"));

        f.client.login("ousmane", "pa55word").await.unwrap();

        let remaining = f.store.current().unwrap().remaining_at(Utc::now());
        assert!(remaining > TimeDelta::hours(23));
        assert!(remaining <= TimeDelta::hours(24));
    }

    #[tokio::test]
    async fn test_login_with_expired_token_does_not_stick() {
        let f = fixture();
        let token = crate::jwt::tests::signed_token("ousmane", Utc::now().timestamp() - 10);
        f.transport.reply(StatusCode::OK, &login_body(&token, "STUDENT"));

        f.client.login("ousmane", "pa55word").await.unwrap();

        assert!(f.store.current().is_none());
    }

    #[tokio::test]
    async fn test_rejected_login_counts_towards_lockout() {
        let f = fixture();
        for _ in 0..2 {
            f.transport.reply(StatusCode::UNAUTHORIZED, r#"{"error":"invalid_credentials"}"#);
            let err = f.client.login("ousmane", "wrong").await.unwrap_err();
            assert!(matches!(err, ApiError::InvalidCredentials));
        }

        let err = f.client.login("ousmane", "wrong").await.unwrap_err();
        assert!(matches!(err, ApiError::TooManyAttempts { .. }));
        // The locked attempt never reached the backend
        assert_eq!(f.transport.sent.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_backend_rate_limit() {
        let f = fixture();
        f.transport.reply(StatusCode::TOO_MANY_REQUESTS, "");

        let err = f.client.login("ousmane", "pa55word").await.unwrap_err();
        assert!(matches!(err, ApiError::TooManyAttempts { retry_after } if retry_after == Duration::from_secs(900)));
    }

    #[tokio::test]
    async fn test_empty_credentials_never_sent() {
        let f = fixture();
        let err = f.client.login("", "pa55word").await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
        assert!(f.transport.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_register_forces_student_role() {
        let f = fixture();
        f.transport.reply(StatusCode::CREATED, r#"{"id":9,"username":"awa.ndiaye"}"#);

        let mut form =
            RegisterRequest::student("awa.ndiaye", "awa@uchk.sn", "Uchk#2024pass", "Uchk#2024pass");
        form.role = Role::Admin;
        f.client.register(form).await.unwrap();

        let sent = f.transport.last();
        let body: serde_json::Value = serde_json::from_slice(&sent.body.unwrap()).unwrap();
        assert_eq!(body["role"], "STUDENT");
        assert!(body.get("confirmPassword").is_none());
    }

    #[tokio::test]
    async fn test_invalid_validation_answer_logs_out() {
        let f = fixture();
        f.transport.reply(StatusCode::OK, &login_body("opaque", "ADMIN"));
        f.client.login("ousmane", "pa55word").await.unwrap();

        f.transport
            .reply(StatusCode::OK, r#"{"valid":false,"message":"User account is inactive"}"#);
        let answer = f.client.validate().await.unwrap();

        assert!(!answer.valid);
        assert!(!f.store.is_logged_in());
    }

    #[tokio::test]
    async fn test_logout_survives_server_failure() {
        let f = fixture();
        f.transport.reply(StatusCode::OK, &login_body("opaque", "ADMIN"));
        f.client.login("ousmane", "pa55word").await.unwrap();

        f.transport.reply(StatusCode::INTERNAL_SERVER_ERROR, "");
        f.client.logout().await;

        assert!(!f.store.is_logged_in());
        let sent = f.transport.last();
        assert_eq!(sent.url, "http://localhost:8080/api/auth/logout");
        assert_eq!(sent.headers[reqwest::header::AUTHORIZATION], "Bearer opaque");
    }
}
