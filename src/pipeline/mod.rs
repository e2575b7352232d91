//! Authenticated request pipeline. Every outbound call goes through
//! [`RequestPipeline::execute`]:
//!
//! 1. **Pre-flight:** the cached access credential, if any, is attached as
//!    `Authorization: Bearer <token>`. Calls without one still go out.
//! 2. **Post-flight:** anything but 401 is returned untouched. A 401 on a call that
//!    has not been retried triggers one refresh exchange, after which the call is
//!    replayed once with the new credential. A second 401 is returned as an error.
//! 3. **Forced logout:** when the refresh credential itself is rejected, the session
//!    is cleared, a [`ForcedLogout`] is sent to the registered listener, and the
//!    caller gets [`Error::ReauthenticationRequired`].
//!
//! Concurrent 401s share one refresh exchange (see `refresh::RefreshGate`). The
//! exchange is sent straight on the HTTP client so it is never intercepted itself.
//! Credentials are read and written only through [`AuthStateStore`] and must never
//! be logged.

mod refresh;
mod state;

pub use state::{transition, CallEvent, CallState, OutboundRequest};

use self::refresh::{RefreshGate, RefreshOutcome, Settled};
use crate::api::routes;
use crate::api::types::{RefreshRequest, RefreshResponse};
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::store::AuthStateStore;
use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method, Request, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info_span, instrument, warn, Instrument};

/// Maximum number of error body characters surfaced to callers.
const MAX_ERROR_CHARS: usize = 200;

/// Emitted once per rejected refresh exchange; the listener should send the user
/// to `redirect_to`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForcedLogout {
    pub redirect_to: String,
}

#[derive(Clone, Debug)]
pub struct RequestPipeline {
    http: Client,
    config: Arc<ClientConfig>,
    store: AuthStateStore,
    gate: Arc<RefreshGate>,
    forced_logout: Option<mpsc::UnboundedSender<ForcedLogout>>,
}

impl RequestPipeline {
    /// Build a pipeline with its own HTTP client (user agent and timeout from `config`).
    ///
    /// # Errors
    /// Returns [`Error::Config`] if the HTTP client cannot be created.
    pub fn new(config: ClientConfig, store: AuthStateStore) -> Result<Self> {
        let http = Client::builder()
            .user_agent(config.user_agent())
            .timeout(config.timeout())
            .build()
            .map_err(|err| Error::Config(format!("Error creating HTTP client: {err}")))?;

        Ok(Self::with_http_client(config, store, http))
    }

    /// Use a custom HTTP client (for connection pool reuse or testing).
    #[must_use]
    pub fn with_http_client(config: ClientConfig, store: AuthStateStore, http: Client) -> Self {
        Self {
            http,
            config: Arc::new(config),
            store,
            gate: Arc::new(RefreshGate::default()),
            forced_logout: None,
        }
    }

    /// Register the listener for forced-logout notifications.
    #[must_use]
    pub fn with_forced_logout(mut self, sender: mpsc::UnboundedSender<ForcedLogout>) -> Self {
        self.forced_logout = Some(sender);
        self
    }

    #[must_use]
    pub fn store(&self) -> &AuthStateStore {
        &self.store
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Request builder for an API path on the configured backend.
    #[must_use]
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http.request(method, self.config.endpoint(path))
    }

    /// Send a request through the refresh protocol.
    ///
    /// # Errors
    /// Transport failures are returned as [`Error::Network`] or [`Error::Timeout`],
    /// an unrecoverable 401 as [`Error::Http`], and a rejected refresh credential as
    /// [`Error::ReauthenticationRequired`]. Other statuses are not errors here.
    pub async fn execute(&self, builder: RequestBuilder) -> Result<Response> {
        let template = builder.build()?;
        let mut call = OutboundRequest::new();

        let span = info_span!(
            "pipeline.call",
            call_id = %call.id(),
            http.method = %template.method(),
            url = %template.url()
        );

        self.drive(&template, &mut call).instrument(span).await
    }

    async fn drive(&self, template: &Request, call: &mut OutboundRequest) -> Result<Response> {
        // epoch before credential, see RefreshGate
        let observed_epoch = self.gate.epoch();
        let access_token = self.store.access_token();

        call.apply(CallEvent::Dispatched)?;
        let response = self.send(template, access_token.as_ref(), call).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            call.apply(CallEvent::Responded)?;
            return Ok(response);
        }
        call.apply(CallEvent::Rejected)?;

        let event = call.unauthorized_event();
        call.apply(event)?;
        if event == CallEvent::AlreadyRetried {
            return Err(http_error(response).await);
        }

        debug!("access credential rejected, refreshing");
        let held = self.store.refresh_token();
        let refreshed = self
            .gate
            .run(observed_epoch, held.as_ref(), || self.refresh_session())
            .await;

        match refreshed.outcome {
            RefreshOutcome::Renewed(access_token) => {
                call.apply(CallEvent::RefreshSucceeded)?;
                let retry = self.send(template, Some(&access_token), call).await?;
                if retry.status() != StatusCode::UNAUTHORIZED {
                    call.apply(CallEvent::Responded)?;
                    return Ok(retry);
                }

                call.apply(CallEvent::Rejected)?;
                call.apply(call.unauthorized_event())?;
                warn!("renewed access credential rejected, not retrying again");
                Err(http_error(retry).await)
            }
            RefreshOutcome::Unavailable => {
                call.apply(CallEvent::NoRefreshCredential)?;
                Err(http_error(response).await)
            }
            RefreshOutcome::Discarded => {
                call.apply(CallEvent::RefreshDiscarded)?;
                Err(http_error(response).await)
            }
            RefreshOutcome::Rejected => {
                call.apply(CallEvent::RefreshRejected)?;
                if refreshed.led {
                    self.signal_forced_logout();
                }
                call.apply(CallEvent::SessionCleared)?;
                Err(Error::ReauthenticationRequired {
                    redirect_to: self.config.login_path().to_string(),
                })
            }
        }
    }

    /// Clone the template, attach the bearer credential, and hand it to the transport.
    async fn send(
        &self,
        template: &Request,
        access_token: Option<&SecretString>,
        call: &mut OutboundRequest,
    ) -> Result<Response> {
        let request = match authorize(template, access_token) {
            Ok(request) => request,
            Err(err) => {
                call.apply(CallEvent::TransportFailed)?;
                return Err(err);
            }
        };

        match self.http.execute(request).await {
            Ok(response) => Ok(response),
            Err(err) => {
                call.apply(CallEvent::TransportFailed)?;
                Err(err.into())
            }
        }
    }

    /// Exchange the cached refresh credential and store the result. Any failure of
    /// the exchange tears the session down, unless a new sign-in already replaced it.
    #[instrument(skip_all)]
    async fn refresh_session(&self) -> Settled {
        let Some(refresh_token) = self.store.refresh_token() else {
            debug!("no refresh credential cached");
            return Settled {
                outcome: RefreshOutcome::Unavailable,
                exchanged: None,
                remaining: None,
            };
        };

        let (outcome, remaining) = match self.exchange(&refresh_token).await {
            Ok(response) => {
                let access_token = SecretString::from(response.access);
                let rotated = response.refresh.map(SecretString::from);
                let remaining = rotated.clone().unwrap_or_else(|| refresh_token.clone());

                if self
                    .store
                    .replace_tokens(&refresh_token, access_token.clone(), rotated)
                {
                    debug!("access credential renewed");
                    (RefreshOutcome::Renewed(access_token), Some(remaining))
                } else {
                    (RefreshOutcome::Discarded, None)
                }
            }
            Err(err) if self.store.holds_refresh_token(&refresh_token) => {
                warn!("Refresh credential rejected: {}", err);
                self.store.clear_auth();
                (RefreshOutcome::Rejected, None)
            }
            Err(err) => {
                debug!("refresh failed for a session that is gone: {}", err);
                (RefreshOutcome::Discarded, None)
            }
        };

        Settled {
            outcome,
            exchanged: Some(refresh_token),
            remaining,
        }
    }

    /// Refresh exchange sent directly on the HTTP client; going through `execute`
    /// would intercept its own 401.
    async fn exchange(&self, refresh_token: &SecretString) -> Result<RefreshResponse> {
        let url = self.config.endpoint(routes::TOKEN_REFRESH);

        let span = info_span!("pipeline.refresh", http.method = "POST", url = %url);
        let response = self
            .http
            .post(&url)
            .json(&RefreshRequest {
                refresh: refresh_token.expose_secret(),
            })
            .send()
            .instrument(span)
            .await?;

        handle_json_response(response).await
    }

    fn signal_forced_logout(&self) {
        let Some(sender) = &self.forced_logout else {
            return;
        };

        let signal = ForcedLogout {
            redirect_to: self.config.login_path().to_string(),
        };
        if sender.send(signal).is_err() {
            debug!("forced-logout listener is gone");
        }
    }

    /// Fetches JSON through the pipeline.
    ///
    /// # Errors
    /// Any [`RequestPipeline::execute`] error, [`Error::Http`] for non-2xx statuses,
    /// or [`Error::Parse`] if the body does not decode.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.execute(self.request(Method::GET, path)).await?;
        handle_json_response(response).await
    }

    /// Posts JSON and parses a JSON response.
    ///
    /// # Errors
    /// As [`RequestPipeline::get_json`], plus [`Error::Serialization`] if the body
    /// cannot be encoded.
    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self.execute(self.json_request(Method::POST, path, body)?).await?;
        handle_json_response(response).await
    }

    /// Posts JSON and expects no meaningful response body.
    ///
    /// # Errors
    /// As [`RequestPipeline::post_json`].
    pub async fn post_json_empty<B>(&self, path: &str, body: &B) -> Result<()>
    where
        B: Serialize + ?Sized,
    {
        let response = self.execute(self.json_request(Method::POST, path, body)?).await?;
        handle_empty_response(response).await
    }

    fn json_request<B>(&self, method: Method, path: &str, body: &B) -> Result<RequestBuilder>
    where
        B: Serialize + ?Sized,
    {
        let payload = serde_json::to_vec(body)
            .map_err(|err| Error::Serialization(format!("Failed to encode request: {err}")))?;

        Ok(self
            .request(method, path)
            .header(CONTENT_TYPE, "application/json")
            .body(payload))
    }
}

fn authorize(template: &Request, access_token: Option<&SecretString>) -> Result<Request> {
    let mut request = template
        .try_clone()
        .ok_or_else(|| Error::Serialization("Request body cannot be replayed".to_string()))?;

    // an unusable credential goes out as no credential, so the 401 path can recover
    if let Some(token) = access_token {
        match HeaderValue::from_str(&format!("Bearer {}", token.expose_secret())) {
            Ok(mut value) => {
                value.set_sensitive(true);
                request.headers_mut().insert(AUTHORIZATION, value);
            }
            Err(_) => {
                warn!("Cached access credential is not a valid header value, sending without it");
            }
        }
    }

    Ok(request)
}

/// Parses JSON responses and surfaces HTTP errors with sanitized bodies.
async fn handle_json_response<T: DeserializeOwned>(response: Response) -> Result<T> {
    if response.status().is_success() {
        response
            .json::<T>()
            .await
            .map_err(|err| Error::Parse(format!("Failed to decode response: {err}")))
    } else {
        Err(http_error(response).await)
    }
}

async fn handle_empty_response(response: Response) -> Result<()> {
    if response.status().is_success() {
        Ok(())
    } else {
        Err(http_error(response).await)
    }
}

async fn http_error(response: Response) -> Error {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Error::Http {
        status,
        message: sanitize_body(&body),
    }
}

/// Sanitizes HTTP error bodies for user-facing messages by trimming and truncating.
fn sanitize_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        "Request failed.".to_string()
    } else {
        trimmed.chars().take(MAX_ERROR_CHARS).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::User;
    use crate::storage::{
        CredentialStore, MemoryStore, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, SESSION_KEYS,
    };
    use crate::test_support::{can_bind_localhost, user, user_json};
    use anyhow::{bail, Result};
    use serde_json::{json, Value};
    use tokio::sync::mpsc::error::TryRecvError;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Harness {
        pipeline: RequestPipeline,
        storage: Arc<MemoryStore>,
        forced: mpsc::UnboundedReceiver<ForcedLogout>,
    }

    impl Harness {
        fn new(server: &MockServer) -> Result<Self> {
            let storage = Arc::new(MemoryStore::new());
            let store = AuthStateStore::new(storage.clone());
            let config = ClientConfig::from_base_url(&server.uri())?;
            let (tx, forced) = mpsc::unbounded_channel();
            let pipeline = RequestPipeline::new(config, store)?.with_forced_logout(tx);

            Ok(Self {
                pipeline,
                storage,
                forced,
            })
        }

        fn sign_in(&self, access: &str, refresh: &str) {
            self.pipeline.store().set_auth(
                user(),
                SecretString::from(access.to_string()),
                SecretString::from(refresh.to_string()),
            );
        }

        fn slot(&self, key: &str) -> Option<String> {
            self.storage.get(key).unwrap_or_default()
        }
    }

    async fn mount_refresh(server: &MockServer, refresh: &str, reply: ResponseTemplate, times: u64) {
        Mock::given(method("POST"))
            .and(path(routes::TOKEN_REFRESH))
            .and(body_json(json!({ "refresh": refresh })))
            .respond_with(reply)
            .expect(times)
            .mount(server)
            .await;
    }

    fn token_not_valid() -> ResponseTemplate {
        ResponseTemplate::new(401).set_body_json(json!({
            "detail": "Given token not valid for any token type",
            "code": "token_not_valid"
        }))
    }

    async fn refresh_requests(server: &MockServer) -> Result<usize> {
        let Some(requests) = server.received_requests().await else {
            bail!("wiremock request recording is disabled");
        };
        Ok(requests
            .iter()
            .filter(|request| request.url.path() == routes::TOKEN_REFRESH)
            .count())
    }

    #[tokio::test]
    async fn attaches_cached_credential_without_touching_cache() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        let harness = Harness::new(&server)?;
        harness.sign_in("A1", "R1");

        Mock::given(method("GET"))
            .and(path("/api/rotations/"))
            .and(header("Authorization", "Bearer A1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(3)
            .mount(&server)
            .await;

        for _ in 0..3 {
            let rotations: Value = harness.pipeline.get_json("/api/rotations/").await?;
            assert_eq!(rotations, json!([]));
        }

        assert_eq!(harness.slot(ACCESS_TOKEN_KEY).as_deref(), Some("A1"));
        assert_eq!(harness.slot(REFRESH_TOKEN_KEY).as_deref(), Some("R1"));
        assert_eq!(refresh_requests(&server).await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn anonymous_call_goes_out_without_header() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        let harness = Harness::new(&server)?;

        Mock::given(method("GET"))
            .and(path("/api/health/"))
            .and(|request: &wiremock::Request| !request.headers.contains_key("authorization"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "ok" })))
            .expect(1)
            .mount(&server)
            .await;

        let health: Value = harness.pipeline.get_json("/api/health/").await?;
        assert_eq!(health["status"], "ok");
        Ok(())
    }

    #[tokio::test]
    async fn refreshes_once_and_replays_with_new_credential() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        let mut harness = Harness::new(&server)?;
        harness.sign_in("A1", "R1");

        Mock::given(method("GET"))
            .and(path(routes::ME))
            .and(header("Authorization", "Bearer A1"))
            .respond_with(token_not_valid())
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(routes::ME))
            .and(header("Authorization", "Bearer A2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(user_json()))
            .expect(1)
            .mount(&server)
            .await;
        mount_refresh(
            &server,
            "R1",
            ResponseTemplate::new(200).set_body_json(json!({ "access": "A2" })),
            1,
        )
        .await;

        let me: User = harness.pipeline.get_json(routes::ME).await?;
        assert_eq!(me, user());

        assert_eq!(harness.slot(ACCESS_TOKEN_KEY).as_deref(), Some("A2"));
        assert_eq!(harness.slot(REFRESH_TOKEN_KEY).as_deref(), Some("R1"));
        let session = harness.pipeline.store().session();
        assert!(session.is_authenticated);
        assert_eq!(
            session.access_token.as_ref().map(|t| t.expose_secret().to_string()),
            Some("A2".to_string())
        );
        assert!(matches!(harness.forced.try_recv(), Err(TryRecvError::Empty)));
        Ok(())
    }

    #[tokio::test]
    async fn replays_request_body_on_retry() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        let harness = Harness::new(&server)?;
        harness.sign_in("A1", "R1");
        let entry = json!({ "procedure": "appendectomy", "date": "2024-03-01" });

        Mock::given(method("POST"))
            .and(path("/api/logbook/entries/"))
            .and(header("Authorization", "Bearer A1"))
            .respond_with(token_not_valid())
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/logbook/entries/"))
            .and(header("Authorization", "Bearer A2"))
            .and(body_json(entry.clone()))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": 42 })))
            .expect(1)
            .mount(&server)
            .await;
        mount_refresh(
            &server,
            "R1",
            ResponseTemplate::new(200).set_body_json(json!({ "access": "A2" })),
            1,
        )
        .await;

        let created: Value = harness
            .pipeline
            .post_json("/api/logbook/entries/", &entry)
            .await?;
        assert_eq!(created["id"], 42);
        Ok(())
    }

    #[tokio::test]
    async fn retries_at_most_once() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        let mut harness = Harness::new(&server)?;
        harness.sign_in("A1", "R1");

        Mock::given(method("GET"))
            .and(path(routes::ME))
            .and(header("Authorization", "Bearer A1"))
            .respond_with(token_not_valid())
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(routes::ME))
            .and(header("Authorization", "Bearer A2"))
            .respond_with(token_not_valid())
            .expect(1)
            .mount(&server)
            .await;
        mount_refresh(
            &server,
            "R1",
            ResponseTemplate::new(200).set_body_json(json!({ "access": "A2" })),
            1,
        )
        .await;

        let err = harness
            .pipeline
            .get_json::<User>(routes::ME)
            .await
            .unwrap_err();

        assert!(err.is_unauthorized());
        assert_eq!(refresh_requests(&server).await?, 1);
        // the session survives; only a rejected refresh credential tears it down
        assert!(harness.pipeline.store().is_authenticated());
        assert!(matches!(harness.forced.try_recv(), Err(TryRecvError::Empty)));
        Ok(())
    }

    #[tokio::test]
    async fn rejected_refresh_forces_logout() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        let mut harness = Harness::new(&server)?;
        harness.sign_in("A1", "R1");

        Mock::given(method("GET"))
            .and(path(routes::ME))
            .respond_with(token_not_valid())
            .expect(1)
            .mount(&server)
            .await;
        mount_refresh(&server, "R1", token_not_valid(), 1).await;

        let err = harness
            .pipeline
            .get_json::<User>(routes::ME)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::ReauthenticationRequired { ref redirect_to } if redirect_to == "/login"
        ));
        for key in SESSION_KEYS {
            assert_eq!(harness.slot(key), None, "slot {key} left behind");
        }
        let session = harness.pipeline.store().session();
        assert!(!session.is_authenticated);
        assert!(session.user.is_none());
        assert_eq!(
            harness.forced.try_recv()?,
            ForcedLogout {
                redirect_to: "/login".to_string()
            }
        );
        Ok(())
    }

    #[tokio::test]
    async fn no_refresh_credential_propagates_unauthorized() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        let mut harness = Harness::new(&server)?;

        Mock::given(method("GET"))
            .and(path(routes::ME))
            .respond_with(ResponseTemplate::new(401).set_body_string(
                r#"{"detail":"Authentication credentials were not provided."}"#,
            ))
            .expect(1)
            .mount(&server)
            .await;
        mount_refresh(&server, "R1", ResponseTemplate::new(200), 0).await;

        let err = harness
            .pipeline
            .get_json::<User>(routes::ME)
            .await
            .unwrap_err();

        assert_eq!(err.status(), Some(401));
        assert!(err.to_string().contains("credentials were not provided"));
        assert_eq!(refresh_requests(&server).await?, 0);
        assert!(matches!(harness.forced.try_recv(), Err(TryRecvError::Empty)));
        Ok(())
    }

    #[tokio::test]
    async fn other_statuses_pass_through() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        let harness = Harness::new(&server)?;
        harness.sign_in("A1", "R1");

        Mock::given(method("GET"))
            .and(path("/api/reports/"))
            .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/audit/"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;
        mount_refresh(&server, "R1", ResponseTemplate::new(200), 0).await;

        let response = harness
            .pipeline
            .execute(harness.pipeline.request(Method::GET, "/api/reports/"))
            .await?;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let err = harness
            .pipeline
            .get_json::<Value>("/api/reports/")
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(403));

        let err = harness
            .pipeline
            .get_json::<Value>("/api/audit/")
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(503));
        assert!(err.to_string().contains("Request failed."));

        assert_eq!(harness.slot(ACCESS_TOKEN_KEY).as_deref(), Some("A1"));
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_unauthorized_calls_share_one_refresh() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        let harness = Harness::new(&server)?;
        harness.sign_in("A1", "R1");

        Mock::given(method("GET"))
            .and(path(routes::ME))
            .and(header("Authorization", "Bearer A1"))
            .respond_with(token_not_valid())
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(routes::ME))
            .and(header("Authorization", "Bearer A2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(user_json()))
            .expect(4)
            .mount(&server)
            .await;
        mount_refresh(
            &server,
            "R1",
            ResponseTemplate::new(200)
                .set_body_json(json!({ "access": "A2" }))
                .set_delay(std::time::Duration::from_millis(50)),
            1,
        )
        .await;

        let mut calls = tokio::task::JoinSet::new();
        for _ in 0..4 {
            let pipeline = harness.pipeline.clone();
            calls.spawn(async move { pipeline.get_json::<User>(routes::ME).await });
        }
        while let Some(joined) = calls.join_next().await {
            assert_eq!(joined??, user());
        }

        assert_eq!(refresh_requests(&server).await?, 1);
        assert_eq!(harness.slot(ACCESS_TOKEN_KEY).as_deref(), Some("A2"));
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_calls_share_a_rejected_refresh() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        let mut harness = Harness::new(&server)?;
        harness.sign_in("A1", "R1");

        Mock::given(method("GET"))
            .and(path(routes::ME))
            .respond_with(token_not_valid())
            .mount(&server)
            .await;
        mount_refresh(
            &server,
            "R1",
            token_not_valid().set_delay(std::time::Duration::from_millis(50)),
            1,
        )
        .await;

        let mut calls = tokio::task::JoinSet::new();
        for _ in 0..3 {
            let pipeline = harness.pipeline.clone();
            calls.spawn(async move { pipeline.get_json::<User>(routes::ME).await });
        }
        while let Some(joined) = calls.join_next().await {
            let Err(err) = joined? else {
                bail!("expected every call to fail");
            };
            assert!(err.requires_reauthentication());
        }

        // one exchange, one notification
        assert!(harness.forced.try_recv().is_ok());
        assert!(matches!(harness.forced.try_recv(), Err(TryRecvError::Empty)));
        Ok(())
    }

    #[tokio::test]
    async fn rotated_refresh_credential_is_stored() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        let harness = Harness::new(&server)?;
        harness.sign_in("A1", "R1");

        Mock::given(method("GET"))
            .and(path(routes::ME))
            .and(header("Authorization", "Bearer A1"))
            .respond_with(token_not_valid())
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(routes::ME))
            .and(header("Authorization", "Bearer A2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(user_json()))
            .mount(&server)
            .await;
        mount_refresh(
            &server,
            "R1",
            ResponseTemplate::new(200).set_body_json(json!({ "access": "A2", "refresh": "R2" })),
            1,
        )
        .await;

        let _: User = harness.pipeline.get_json(routes::ME).await?;

        assert_eq!(harness.slot(ACCESS_TOKEN_KEY).as_deref(), Some("A2"));
        assert_eq!(harness.slot(REFRESH_TOKEN_KEY).as_deref(), Some("R2"));
        Ok(())
    }

    #[tokio::test]
    async fn late_unauthorized_after_new_sign_in_refreshes_new_session() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        let mut harness = Harness::new(&server)?;
        harness.sign_in("A1", "R1");

        Mock::given(method("GET"))
            .and(path("/api/slow/"))
            .and(header("Authorization", "Bearer A1"))
            .respond_with(token_not_valid().set_delay(std::time::Duration::from_millis(300)))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/slow/"))
            .and(header("Authorization", "Bearer A6"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/fast/"))
            .respond_with(token_not_valid())
            .expect(1)
            .mount(&server)
            .await;
        mount_refresh(&server, "R1", token_not_valid(), 1).await;
        mount_refresh(
            &server,
            "R5",
            ResponseTemplate::new(200).set_body_json(json!({ "access": "A6" })),
            1,
        )
        .await;

        let slow = {
            let pipeline = harness.pipeline.clone();
            tokio::spawn(async move { pipeline.get_json::<Value>("/api/slow/").await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let err = harness
            .pipeline
            .get_json::<Value>("/api/fast/")
            .await
            .unwrap_err();
        assert!(err.requires_reauthentication());
        assert!(harness.forced.try_recv().is_ok());

        // signed in again while the slow call is still waiting on its 401
        harness.sign_in("A5", "R5");

        let body = slow.await??;
        assert_eq!(body["ok"], true);
        assert!(harness.pipeline.store().is_authenticated());
        assert_eq!(harness.slot(ACCESS_TOKEN_KEY).as_deref(), Some("A6"));
        assert_eq!(harness.slot(REFRESH_TOKEN_KEY).as_deref(), Some("R5"));
        assert!(matches!(harness.forced.try_recv(), Err(TryRecvError::Empty)));
        Ok(())
    }

    #[tokio::test]
    async fn unusable_access_credential_recovers_through_refresh() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        let harness = Harness::new(&server)?;
        harness.sign_in("A1\n", "R1");

        Mock::given(method("GET"))
            .and(path(routes::ME))
            .and(|request: &wiremock::Request| !request.headers.contains_key("authorization"))
            .respond_with(token_not_valid())
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(routes::ME))
            .and(header("Authorization", "Bearer A2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(user_json()))
            .expect(1)
            .mount(&server)
            .await;
        mount_refresh(
            &server,
            "R1",
            ResponseTemplate::new(200).set_body_json(json!({ "access": "A2" })),
            1,
        )
        .await;

        let me: User = harness.pipeline.get_json(routes::ME).await?;
        assert_eq!(me, user());
        assert_eq!(harness.slot(ACCESS_TOKEN_KEY).as_deref(), Some("A2"));
        Ok(())
    }

    #[tokio::test]
    async fn transport_failure_propagates() -> Result<()> {
        let storage = Arc::new(MemoryStore::new());
        let store = AuthStateStore::new(storage);
        let config = ClientConfig::from_base_url("http://127.0.0.1:9")?
            .with_timeout(std::time::Duration::from_secs(2));
        let pipeline = RequestPipeline::new(config, store)?;

        let err = pipeline.get_json::<Value>(routes::ME).await.unwrap_err();
        assert!(matches!(err, Error::Network(_) | Error::Timeout(_)));
        Ok(())
    }

    #[test]
    fn sanitize_body_trims_and_truncates() {
        assert_eq!(sanitize_body("   "), "Request failed.");
        assert_eq!(sanitize_body("  nope \n"), "nope");
        assert_eq!(sanitize_body(&"x".repeat(500)).len(), MAX_ERROR_CHARS);
    }
}
