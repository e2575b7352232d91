//! Typed wrappers for the auth endpoints. Everything goes through the
//! [`RequestPipeline`], so these calls get bearer injection and the refresh
//! protocol like any other request.

pub mod routes;
pub mod types;

use crate::error::Result;
use crate::pipeline::RequestPipeline;
use crate::session::{AuthSession, User};
use crate::store::AuthStateStore;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, instrument, warn};
use types::{
    LoginCredentials, LoginRequest, LoginResponse, RefreshRequest, RefreshResponse, RegisterData,
    RegisterRequest, RegisterResponse, TokenRefresh, VerifyRequest,
};

#[derive(Clone, Debug)]
pub struct AuthApi {
    pipeline: RequestPipeline,
}

impl AuthApi {
    #[must_use]
    pub fn new(pipeline: RequestPipeline) -> Self {
        Self { pipeline }
    }

    #[must_use]
    pub fn pipeline(&self) -> &RequestPipeline {
        &self.pipeline
    }

    #[must_use]
    pub fn store(&self) -> &AuthStateStore {
        self.pipeline.store()
    }

    /// Exchanges credentials for a token pair and stores the new session.
    ///
    /// # Errors
    /// Returns the pipeline error; the stored session is left as it was.
    #[instrument(skip_all, fields(username = %credentials.username))]
    pub async fn login(&self, credentials: &LoginCredentials) -> Result<AuthSession> {
        self.store().set_loading(true);
        let response = self
            .pipeline
            .post_json::<_, LoginResponse>(routes::LOGIN, &LoginRequest::from(credentials))
            .await;
        self.store().set_loading(false);

        let response = response?;
        self.store().set_auth(
            response.user,
            SecretString::from(response.access),
            SecretString::from(response.refresh),
        );
        info!("signed in");

        Ok(self.store().session())
    }

    /// Creates an account and signs it in.
    ///
    /// # Errors
    /// Returns the pipeline error, e.g. [`crate::error::Error::Http`] with the
    /// backend's validation messages on 400.
    #[instrument(skip_all, fields(username = %profile.username, role = ?profile.role))]
    pub async fn register(&self, profile: &RegisterData) -> Result<AuthSession> {
        self.store().set_loading(true);
        let response = self
            .pipeline
            .post_json::<_, RegisterResponse>(routes::REGISTER, &RegisterRequest::from(profile))
            .await;
        self.store().set_loading(false);

        let response = response?;
        self.store().set_auth(
            response.user,
            SecretString::from(response.tokens.access),
            SecretString::from(response.tokens.refresh),
        );
        info!("account registered");

        Ok(self.store().session())
    }

    /// Tells the backend to revoke the refresh credential, then clears local state
    /// whatever the backend said. Never fails.
    #[instrument(skip_all)]
    pub async fn logout(&self) {
        if let Some(refresh_token) = self.store().refresh_token() {
            let body = RefreshRequest {
                refresh: refresh_token.expose_secret(),
            };
            if let Err(err) = self.pipeline.post_json_empty(routes::LOGOUT, &body).await {
                warn!("Logout request failed: {}", err);
            }
        }

        self.store().clear_auth();
        info!("signed out");
    }

    /// Loads the current user from the backend and caches it.
    ///
    /// # Errors
    /// Returns the pipeline error.
    #[instrument(skip_all)]
    pub async fn fetch_profile(&self) -> Result<User> {
        let user: User = self.pipeline.get_json(routes::ME).await?;
        self.store().set_user(user.clone());
        Ok(user)
    }

    /// Raw refresh exchange. Does not touch the stored session.
    ///
    /// # Errors
    /// Returns the pipeline error.
    #[instrument(skip_all)]
    pub async fn refresh(&self, refresh_token: &SecretString) -> Result<TokenRefresh> {
        let body = RefreshRequest {
            refresh: refresh_token.expose_secret(),
        };
        let response: RefreshResponse = self.pipeline.post_json(routes::TOKEN_REFRESH, &body).await?;
        Ok(response.into())
    }

    /// `true` only if the backend accepts the token.
    #[instrument(skip_all)]
    pub async fn verify(&self, token: &str) -> bool {
        match self
            .pipeline
            .post_json_empty(routes::TOKEN_VERIFY, &VerifyRequest { token })
            .await
        {
            Ok(()) => true,
            Err(err) => {
                debug!("token verification failed: {}", err);
                false
            }
        }
    }
}
