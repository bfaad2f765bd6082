//! HTTP API client
//!
//! Every request goes through [`ApiClient::execute`]: the current access
//! token is attached as a bearer credential, and a 401 on a non-auth
//! endpoint triggers at most one refresh-and-retry. Concurrent 401s share
//! a single refresh flight through the [`RefreshCoordinator`]; a 401 on
//! the retried request propagates to the caller unchanged.

use std::time::Duration;

use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::ApiConfig;
use crate::error::{Error, Result};
use crate::models::{
    ApiEnvelope, ApiErrorBody, AuthResponse, ChangePasswordRequest, LoginRequest, RefreshRequest,
    User,
};
use crate::session::SessionManager;

use super::refresh::{RefreshCoordinator, RefreshError};

const LOGIN_PATH: &str = "/v1/auth/login";
const REFRESH_PATH: &str = "/v1/auth/refresh";
const LOGOUT_PATH: &str = "/v1/auth/logout";
const CHANGE_PASSWORD_PATH: &str = "/v1/auth/change-password";
const ME_PATH: &str = "/v1/auth/me";
const VALIDATE_PATH: &str = "/v1/auth/validate";

pub struct ApiClient {
    http: Client,
    base_url: String,
    session: SessionManager,
    refresh: RefreshCoordinator,
}

impl ApiClient {
    pub fn new(config: &ApiConfig, session: SessionManager) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            session,
            refresh: RefreshCoordinator::new(),
        })
    }

    #[must_use]
    pub const fn session(&self) -> &SessionManager {
        &self.session
    }

    // ----- auth endpoints -------------------------------------------------

    /// Exchange credentials for a token pair and install the session.
    pub async fn login(&self, request: &LoginRequest) -> Result<AuthResponse> {
        let body = serde_json::to_value(request)?;
        let response = self.execute(Method::POST, LOGIN_PATH, Some(body)).await?;
        let response = Self::check_status(response).await?;
        let envelope: ApiEnvelope<AuthResponse> = response.json().await?;
        self.session.set_auth(&envelope.data);
        Ok(envelope.data)
    }

    /// Revoke the refresh token server-side (best effort) and clear the
    /// local session. Local state is cleared even when the server call
    /// fails.
    pub async fn logout(&self) -> Result<()> {
        if let Some(refresh_token) = self.session.refresh_token() {
            let body = serde_json::to_value(RefreshRequest { refresh_token })?;
            match self.execute(Method::POST, LOGOUT_PATH, Some(body)).await {
                Ok(response) => {
                    if let Err(e) = Self::check_status(response).await {
                        warn!(error = %e, "Server-side logout failed");
                    }
                }
                Err(e) => warn!(error = %e, "Server-side logout failed"),
            }
        }
        self.session.logout();
        Ok(())
    }

    pub async fn change_password(&self, request: &ChangePasswordRequest) -> Result<()> {
        let body = serde_json::to_value(request)?;
        let response = self
            .execute(Method::POST, CHANGE_PASSWORD_PATH, Some(body))
            .await?;
        Self::check_status(response).await?;
        self.session.set_must_change_password(false);
        Ok(())
    }

    /// Fetch the current user's profile and install it into the session
    /// (identity replaced, tokens retained).
    pub async fn me(&self) -> Result<User> {
        let response = self.execute(Method::GET, ME_PATH, None).await?;
        let response = Self::check_status(response).await?;
        let envelope: ApiEnvelope<User> = response.json().await?;
        if self.session.is_authenticated() {
            self.session.update_user(envelope.data.clone());
        }
        Ok(envelope.data)
    }

    /// Probe whether the current access token is still accepted.
    pub async fn validate_token(&self) -> bool {
        match self.execute(Method::GET, VALIDATE_PATH, None).await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    // ----- generic resource endpoints -------------------------------------

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.request_json(Method::GET, path, None).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        self.request_json(Method::POST, path, Some(serde_json::to_value(body)?))
            .await
    }

    pub async fn put<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        self.request_json(Method::PUT, path, Some(serde_json::to_value(body)?))
            .await
    }

    pub async fn delete(&self, path: &str) -> Result<()> {
        let response = self.execute(Method::DELETE, path, None).await?;
        Self::check_status(response).await?;
        Ok(())
    }

    async fn request_json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<T> {
        let response = self.execute(method, path, body).await?;
        let response = Self::check_status(response).await?;
        let envelope: ApiEnvelope<T> = response.json().await?;
        Ok(envelope.data)
    }

    // ----- interceptor ----------------------------------------------------

    /// Send a request with the current bearer token; on a 401 from a
    /// non-auth endpoint, refresh once and retry once.
    async fn execute(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<reqwest::Response> {
        let token = self.session.access_token();
        let response = self
            .send(method.clone(), path, body.as_ref(), token.as_deref())
            .await?;

        if response.status() != StatusCode::UNAUTHORIZED || Self::is_auth_endpoint(path) {
            return Ok(response);
        }

        debug!(path, "Received 401, attempting token refresh");
        match self.refresh_access_token().await {
            // The retry is issued exactly once; a second 401 surfaces to
            // the caller as a hard failure.
            Ok(new_token) => self.send(method, path, body.as_ref(), Some(&new_token)).await,
            // Never logged in (or logged out meanwhile): propagate the
            // original 401 without touching the session.
            Err(RefreshError::MissingRefreshToken) => Ok(response),
            Err(err) => Err(Error::Authentication(err.to_string())),
        }
    }

    /// Obtain a fresh access token, sharing any in-flight refresh. On a
    /// failed exchange the session is cleared, but only if one was
    /// authenticated when this attempt began.
    async fn refresh_access_token(&self) -> std::result::Result<String, RefreshError> {
        let was_authenticated = self.session.is_authenticated();
        let store = self.session.store();
        let epoch = store.epoch();

        let outcome = self
            .refresh
            .run(move || async move {
                let Some(refresh_token) = self.session.refresh_token() else {
                    return Err(RefreshError::MissingRefreshToken);
                };
                let exchanged = self
                    .exchange_refresh_token(&refresh_token)
                    .await
                    .map_err(|e| RefreshError::Exchange(e.to_string()))?;
                if store.epoch() != epoch {
                    // A logout won the race: the exchange result must be
                    // discarded, not applied.
                    warn!("Discarding refresh result, session was cleared mid-flight");
                    return Err(RefreshError::SessionCleared);
                }
                self.session.set_auth(&exchanged);
                Ok(exchanged.access_token)
            })
            .await;

        if let Err(err) = &outcome {
            let forced_logout = matches!(
                err,
                RefreshError::Exchange(_) | RefreshError::Interrupted
            );
            if forced_logout && was_authenticated && self.session.is_authenticated() {
                warn!(error = %err, "Token refresh failed, clearing session");
                self.session.logout();
            }
        }
        outcome
    }

    async fn exchange_refresh_token(&self, refresh_token: &str) -> Result<AuthResponse> {
        let body = serde_json::to_value(RefreshRequest {
            refresh_token: refresh_token.to_string(),
        })?;
        let response = self
            .send(Method::POST, REFRESH_PATH, Some(&body), None)
            .await?;
        let response = Self::check_status(response).await?;
        let envelope: ApiEnvelope<AuthResponse> = response.json().await?;
        Ok(envelope.data)
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        bearer: Option<&str>,
    ) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.http.request(method, &url);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        Ok(request.send().await?)
    }

    /// Auth endpoints are exempt from the 401 retry logic.
    fn is_auth_endpoint(path: &str) -> bool {
        path.contains("/auth/")
    }

    /// Map non-2xx statuses to `Error::Api`, extracting the JSON error
    /// body's message when one is present.
    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response
            .json::<ApiErrorBody>()
            .await
            .ok()
            .and_then(|body| body.message)
            .unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_string()
            });
        Err(Error::Api {
            status: status.as_u16(),
            message,
        })
    }
}
