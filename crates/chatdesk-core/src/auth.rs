//! Token Manager
//!
//! Single owner of the access/refresh credential pair. Reads are synchronous
//! and never touch the network; `authenticated_request` refreshes the pair
//! once on a 403 and retries exactly once.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, Method, Response, StatusCode};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::claims::TokenClaims;
use crate::config::ClientConfig;
use crate::error::{AuthError, ChatdeskError};
use crate::models::{AuthEnvelope, AuthSession, ProfileEnvelope, User};
use crate::storage::KeyValueStore;
use crate::tokens::{preview_token, CredentialPair, TokenCache};

// ----------------------------------------------------------------------------
// Token Source Seam
// ----------------------------------------------------------------------------

/// What the realtime client needs from the token owner
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Whether both tokens are resolvable right now
    fn tokens_ready(&self) -> bool;

    /// Current access token, if any
    fn access_token(&self) -> Option<String>;

    /// Mint a new credential pair
    async fn refresh(&self) -> Result<(), AuthError>;

    /// End the session and drop all credentials
    async fn invalidate(&self);

    /// Log token diagnostics before a connection attempt
    fn debug_state(&self) {}
}

// ----------------------------------------------------------------------------
// Token Manager
// ----------------------------------------------------------------------------

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct RegisterRequest<'a> {
    email: &'a str,
    password: &'a str,
    name: &'a str,
}

/// Credential owner backed by the auth HTTP service
pub struct TokenManager {
    http: Client,
    base: Url,
    cache: TokenCache,
    /// Serializes refreshes so concurrent 403s share one network call
    refresh_gate: Mutex<()>,
    /// Advanced on every successful refresh
    refresh_epoch: AtomicU64,
}

impl TokenManager {
    /// Create a manager, loading any persisted pair into the cache
    pub fn new(config: &ClientConfig, store: Arc<dyn KeyValueStore>) -> Result<Self, ChatdeskError> {
        let mut base = config.api_base()?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let http = Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        let cache = TokenCache::load(store);
        let (access, refresh) = cache.cached_presence();
        debug!(
            "Token manager initialized for {} (access: {}, refresh: {})",
            base, access, refresh
        );

        Ok(Self {
            http,
            base,
            cache,
            refresh_gate: Mutex::new(()),
            refresh_epoch: AtomicU64::new(0),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, AuthError> {
        Ok(self.base.join(path.trim_start_matches('/'))?)
    }

    fn resolve(&self, url: &str) -> Result<Url, AuthError> {
        match Url::parse(url) {
            Ok(absolute) => Ok(absolute),
            Err(url::ParseError::RelativeUrlWithoutBase) => self.endpoint(url),
            Err(e) => Err(e.into()),
        }
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    /// Current access token; never performs network I/O
    pub fn get_access_token(&self) -> Option<String> {
        self.cache.access_token()
    }

    pub fn get_refresh_token(&self) -> Option<String> {
        self.cache.refresh_token()
    }

    /// True iff both tokens are resolvable from cache or storage
    pub fn is_authenticated(&self) -> bool {
        self.cache.has_pair()
    }

    /// Readiness check used before every realtime connection attempt
    pub fn tokens_ready(&self) -> bool {
        let ready = self.cache.has_pair();
        if ready {
            debug!("Tokens are ready for use");
        } else {
            debug!("Tokens not yet available");
        }
        ready
    }

    /// Log where each token currently lives and when the access token expires
    pub fn debug_token_state(&self) {
        let (access_cached, refresh_cached) = self.cache.cached_presence();
        let (access_stored, refresh_stored) = self.cache.stored_presence();
        debug!(
            "Token state: cache(access: {}, refresh: {}) storage(access: {}, refresh: {})",
            access_cached, refresh_cached, access_stored, refresh_stored
        );

        if let Some(token) = self.cache.access_token() {
            match TokenClaims::decode(&token) {
                Ok(claims) => debug!(
                    "Access token {} for {:?} expires at {:?} (expired: {})",
                    preview_token(&token),
                    claims.email,
                    claims.exp,
                    claims.is_expired()
                ),
                Err(e) => debug!("Access token {} is not a JWT: {}", preview_token(&token), e),
            }
        }

        debug!(
            "is_authenticated: {}, tokens_ready: {}",
            self.is_authenticated(),
            self.tokens_ready()
        );
    }

    // ------------------------------------------------------------------------
    // Account Operations
    // ------------------------------------------------------------------------

    /// Sign in and store the issued pair
    pub async fn login(&self, email: &str, password: &str) -> Result<AuthSession, AuthError> {
        let url = self.endpoint("auth/login")?;
        let response = self
            .http
            .post(url)
            .json(&LoginRequest { email, password })
            .send()
            .await?;

        let session = self.accept_session(response, "Login failed").await.map_err(|e| {
            error!("Login error: {}", e);
            e
        })?;
        info!("Logged in as {}", session.user.email);
        Ok(session)
    }

    /// Create an account and store the issued pair
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        name: &str,
    ) -> Result<AuthSession, AuthError> {
        let url = self.endpoint("auth/register")?;
        let response = self
            .http
            .post(url)
            .json(&RegisterRequest { email, password, name })
            .send()
            .await?;

        let session = self
            .accept_session(response, "Registration failed")
            .await
            .map_err(|e| {
                error!("Registration error: {}", e);
                e
            })?;
        info!("Registered {}", session.user.email);
        Ok(session)
    }

    async fn accept_session(
        &self,
        response: Response,
        fallback: &str,
    ) -> Result<AuthSession, AuthError> {
        let status = response.status();
        let envelope: Option<AuthEnvelope> = response.json().await.ok();

        if !status.is_success() {
            let message = envelope
                .and_then(|e| e.failure_message())
                .unwrap_or_else(|| fallback.to_string());
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let envelope = envelope
            .ok_or_else(|| AuthError::MalformedResponse("response is not JSON".to_string()))?;
        match envelope {
            AuthEnvelope {
                success: true,
                user: Some(user),
                tokens: Some(tokens),
                ..
            } => {
                self.cache.replace(&tokens)?;
                debug!("Tokens stored successfully");
                Ok(AuthSession { user, tokens })
            }
            other => Err(AuthError::MalformedResponse(
                other
                    .failure_message()
                    .unwrap_or_else(|| "missing user or tokens".to_string()),
            )),
        }
    }

    /// Fetch the signed-in user's profile
    pub async fn profile(&self) -> Result<User, AuthError> {
        let response = self
            .authenticated_request(Method::GET, "auth/profile", None)
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                message: "Failed to fetch profile".to_string(),
            });
        }

        let body: ProfileEnvelope = response
            .json()
            .await
            .map_err(|e| AuthError::MalformedResponse(e.to_string()))?;
        Ok(body.user)
    }

    /// Notify the server (best effort) and drop both tokens locally
    pub async fn logout(&self) {
        if let (Some(access), Some(refresh)) = (self.get_access_token(), self.get_refresh_token()) {
            let outcome = match self.endpoint("auth/logout") {
                Ok(url) => self
                    .http
                    .post(url)
                    .bearer_auth(&access)
                    .json(&json!({ "refreshToken": refresh }))
                    .send()
                    .await
                    .map(|_| ())
                    .map_err(AuthError::from),
                Err(e) => Err(e),
            };
            if let Err(e) = outcome {
                warn!("Logout notification failed: {}", e);
            }
        }

        if let Err(e) = self.cache.clear() {
            error!("Failed to clear stored tokens on logout: {}", e);
        }
        info!("Logged out");
    }

    // ------------------------------------------------------------------------
    // Refresh
    // ------------------------------------------------------------------------

    /// Exchange the refresh token for a new pair
    ///
    /// Concurrent callers coalesce onto one network refresh. Any failure
    /// other than a missing refresh token clears both tokens.
    pub async fn refresh(&self) -> Result<CredentialPair, AuthError> {
        let observed = self.refresh_epoch.load(Ordering::Acquire);
        self.refresh_after(observed).await
    }

    /// Refresh unless another caller already did so since `observed`
    async fn refresh_after(&self, observed: u64) -> Result<CredentialPair, AuthError> {
        let _gate = self.refresh_gate.lock().await;

        if self.refresh_epoch.load(Ordering::Acquire) != observed {
            if let (Some(access), Some(refresh)) =
                (self.cache.access_token(), self.cache.refresh_token())
            {
                debug!("Tokens already refreshed by a concurrent caller");
                return Ok(CredentialPair::new(access, refresh));
            }
        }

        let refresh_token = self.cache.refresh_token().ok_or(AuthError::NoRefreshToken)?;

        debug!("Refreshing tokens...");
        match self.exchange(&refresh_token).await {
            Ok(pair) => {
                self.cache.replace(&pair)?;
                self.refresh_epoch.fetch_add(1, Ordering::AcqRel);
                info!("Tokens refreshed successfully");
                Ok(pair)
            }
            Err(e) => {
                error!("Token refresh error: {}", e);
                if let Err(clear_err) = self.cache.clear() {
                    warn!("Failed to clear tokens after refresh failure: {}", clear_err);
                }
                Err(e)
            }
        }
    }

    async fn exchange(&self, refresh_token: &str) -> Result<CredentialPair, AuthError> {
        let url = self.endpoint("auth/refresh")?;
        let response = self
            .http
            .post(url)
            .json(&json!({ "refreshToken": refresh_token }))
            .send()
            .await?;

        let status = response.status();
        let envelope: Option<AuthEnvelope> = response.json().await.ok();

        if !status.is_success() {
            let reason = envelope
                .and_then(|e| e.failure_message())
                .unwrap_or_else(|| format!("status {}", status.as_u16()));
            return Err(AuthError::RefreshFailed { reason });
        }

        match envelope {
            Some(AuthEnvelope {
                success: true,
                tokens: Some(tokens),
                ..
            }) => Ok(tokens),
            _ => Err(AuthError::MalformedResponse(
                "Invalid refresh response".to_string(),
            )),
        }
    }

    // ------------------------------------------------------------------------
    // Authenticated Requests
    // ------------------------------------------------------------------------

    /// Send a request with the bearer token, refreshing once on a 403
    ///
    /// `url` may be absolute or relative to the API base. Non-403 responses
    /// are returned as-is for the caller to inspect.
    pub async fn authenticated_request(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
    ) -> Result<Response, AuthError> {
        let url = self.resolve(url)?;
        let token = self.get_access_token().ok_or(AuthError::NotAuthenticated)?;
        let observed = self.refresh_epoch.load(Ordering::Acquire);

        let response = self.send_with(&method, &url, body, &token).await?;
        if response.status() != StatusCode::FORBIDDEN {
            return Ok(response);
        }

        debug!("{} {} returned 403, refreshing tokens", method, url);
        self.refresh_after(observed).await?;

        let token = self.get_access_token().ok_or_else(|| AuthError::RefreshFailed {
            reason: "no access token after refresh".to_string(),
        })?;
        let retry = self.send_with(&method, &url, body, &token).await?;
        if retry.status() == StatusCode::FORBIDDEN {
            warn!("{} {} still forbidden after refresh", method, url);
            return Err(AuthError::Forbidden);
        }
        Ok(retry)
    }

    async fn send_with(
        &self,
        method: &Method,
        url: &Url,
        body: Option<&Value>,
        token: &str,
    ) -> Result<Response, AuthError> {
        let mut request = self
            .http
            .request(method.clone(), url.clone())
            .bearer_auth(token);
        if let Some(body) = body {
            request = request.json(body);
        }
        Ok(request.send().await?)
    }
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("base", &self.base.as_str())
            .field("cache", &self.cache)
            .field("refresh_epoch", &self.refresh_epoch.load(Ordering::Relaxed))
            .finish()
    }
}

#[async_trait]
impl TokenSource for TokenManager {
    fn tokens_ready(&self) -> bool {
        TokenManager::tokens_ready(self)
    }

    fn access_token(&self) -> Option<String> {
        self.get_access_token()
    }

    async fn refresh(&self) -> Result<(), AuthError> {
        TokenManager::refresh(self).await.map(|_| ())
    }

    async fn invalidate(&self) {
        self.logout().await;
    }

    fn debug_state(&self) {
        self.debug_token_state();
    }
}
