use std::sync::Arc;
use std::time::Duration;

use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use shared::{ApiResponse, ErrorBody};
use tokio::sync::broadcast;
use tracing::{debug, warn};
use url::Url;

use crate::cache::{QueryCache, QueryKey};
use crate::user_session::SessionStore;

pub mod auth_api;
pub mod error;
pub mod tasks_api;
pub mod users_api;

pub use error::{error_message, ApiError, ErrorKind, Result};

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const EVENT_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthEvent {
    /// The backend rejected the session credentials; the session is gone.
    Invalidated,
}

/// Whether a request carries the session bearer token. Credential
/// submissions go out anonymously so a wrong password never ends the
/// current session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Auth {
    Bearer,
    Anonymous,
}

/// A decoded envelope together with the session epoch the request was sent
/// under.
#[derive(Debug, Clone)]
pub struct ApiReply<T> {
    pub response: ApiResponse<T>,
    pub epoch: u64,
}

impl<T> ApiReply<T> {
    pub fn data(self) -> T {
        self.response.data
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ApiReply<U> {
        let ApiResponse {
            success,
            message,
            data,
            error,
        } = self.response;
        ApiReply {
            response: ApiResponse {
                success,
                message,
                data: f(data),
                error,
            },
            epoch: self.epoch,
        }
    }

    /// Turns a `success: false` envelope into an error.
    pub fn accepted(self, fallback: &str) -> Result<Self> {
        if self.response.success {
            return Ok(self);
        }
        let message = self
            .response
            .error
            .clone()
            .filter(|error| !error.trim().is_empty())
            .unwrap_or_else(|| fallback.to_owned());
        Err(ApiError::Rejected { message })
    }
}

struct Inner {
    http: reqwest::Client,
    base_url: Url,
    session: SessionStore,
    cache: QueryCache,
    events: broadcast::Sender<AuthEvent>,
}

/// Request dispatch shared by every API module: bearer injection, fixed
/// timeout, centralized 401/403 handling.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<Inner>,
}

impl ApiClient {
    pub fn new(base_url: Url, session: SessionStore) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            inner: Arc::new(Inner {
                http,
                base_url: with_trailing_slash(base_url),
                session,
                cache: QueryCache::new(),
                events,
            }),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.inner.http
    }

    pub fn session(&self) -> &SessionStore {
        &self.inner.session
    }

    pub fn cache(&self) -> &QueryCache {
        &self.inner.cache
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.inner.events.subscribe()
    }

    pub fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.inner.base_url.join(path.trim_start_matches('/'))?)
    }

    pub(crate) fn cached<T: DeserializeOwned>(&self, key: &QueryKey) -> Option<T> {
        self.inner.cache.get(key, self.inner.session.epoch())
    }

    /// Caches `value` unless the session moved on since the request left.
    pub(crate) fn remember<T: Serialize>(&self, key: QueryKey, value: &T, epoch: u64) {
        if epoch != self.inner.session.epoch() {
            debug!(?key, "Dropping response from a previous session");
            return;
        }
        self.inner.cache.insert(key, value, epoch);
    }

    pub(crate) async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<ApiReply<T>> {
        self.request::<(), T>(Method::GET, path, None, Auth::Bearer)
            .await
    }

    pub(crate) async fn post<B, T>(&self, path: &str, body: &B, auth: Auth) -> Result<ApiReply<T>>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.request(Method::POST, path, Some(body), auth).await
    }

    pub(crate) async fn put<B, T>(&self, path: &str, body: &B) -> Result<ApiReply<T>>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.request(Method::PUT, path, Some(body), Auth::Bearer)
            .await
    }

    pub(crate) async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<ApiReply<T>> {
        self.request::<(), T>(Method::DELETE, path, None, Auth::Bearer)
            .await
    }

    pub(crate) async fn request<B, T>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        auth: Auth,
    ) -> Result<ApiReply<T>>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let mut builder = self.inner.http.request(method, self.endpoint(path)?);
        if let Some(body) = body {
            builder = builder.json(body);
        }
        self.dispatch(builder, path, auth).await
    }

    /// Sends a prepared request and decodes the envelope. Every failure,
    /// including 401, still reaches the caller as an error.
    pub(crate) async fn dispatch<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
        path: &str,
        auth: Auth,
    ) -> Result<ApiReply<T>> {
        let (token, epoch) = match auth {
            Auth::Bearer => self.inner.session.credentials(),
            Auth::Anonymous => (None, self.inner.session.epoch()),
        };
        let authenticated = token.is_some();
        let builder = match token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        };

        let response = builder.send().await.map_err(|error| {
            let error = ApiError::from(error);
            warn!(path, %error, "Request failed before a response arrived");
            error
        })?;
        let status = response.status();
        debug!(path, status = status.as_u16(), epoch, "Api response");

        if status.is_success() {
            let bytes = response.bytes().await?;
            let response = serde_json::from_slice::<ApiResponse<T>>(&bytes)?;
            return Ok(ApiReply { response, epoch });
        }

        let text = response.text().await.unwrap_or_default();
        let body = serde_json::from_str::<ErrorBody>(&text).ok();
        match status {
            StatusCode::UNAUTHORIZED if authenticated => self.on_unauthorized(path, epoch),
            StatusCode::FORBIDDEN => {
                warn!(path, response = %text, "Access forbidden");
            }
            _ => {
                debug!(path, status = status.as_u16(), response = %text, "Unexpected response");
            }
        }
        Err(ApiError::Http { status, body })
    }

    fn on_unauthorized(&self, path: &str, epoch: u64) {
        if !self.inner.session.invalidate(epoch) {
            return;
        }
        warn!(path, "Credentials rejected, session cleared");
        if self.inner.events.send(AuthEvent::Invalidated).is_err() {
            debug!("No listener for session invalidation");
        }
    }
}

fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}
