use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use storage::{LocalDatabase, StoreName};
use tracing::{debug, warn};

use crate::api::notify::{Notification, Notifier};
use crate::api::transport::{ApiRequest, ApiResponse, HttpTransport, TransportError};
use crate::context::{AppContext, SESSION_KEY};
use crate::error::ApiError;

pub const MSG_SESSION_EXPIRED: &str = "login expired, please sign in again";
pub const MSG_FORBIDDEN: &str = "permission denied";
pub const MSG_NOT_FOUND: &str = "resource not found";
pub const MSG_BAD_REQUEST: &str = "bad request";
pub const MSG_SERVER_ERROR: &str = "server error";
pub const MSG_REQUEST_FAILED: &str = "request failed";
pub const MSG_NETWORK: &str = "network connection failed";

/// REST client shared by every store.
///
/// Attaches the bearer token from the [`AppContext`] to each call and turns
/// failed calls into an [`ApiError`] plus one user-facing [`Notification`].
/// A 401 also ends the session, locally and in the persisted copy.
#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn HttpTransport>,
    context: Arc<AppContext>,
    notifier: Arc<dyn Notifier>,
    local: Option<LocalDatabase>,
}

impl ApiClient {
    #[must_use]
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        context: Arc<AppContext>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            transport,
            context,
            notifier,
            local: None,
        }
    }

    /// Also drops the persisted session when the backend rejects the token.
    #[must_use]
    pub fn with_local(mut self, local: LocalDatabase) -> Self {
        self.local = Some(local);
        self
    }

    #[must_use]
    pub fn context(&self) -> &Arc<AppContext> {
        &self.context
    }

    /// Sends `request` and returns the raw JSON body of a 2xx response.
    ///
    /// # Errors
    ///
    /// Returns the classified `ApiError` for non-2xx responses and transport
    /// failures; the matching notification has already been raised.
    pub async fn send(&self, mut request: ApiRequest) -> Result<Value, ApiError> {
        if let Some(token) = self.context.token() {
            request.bearer = Some(token);
        }
        let method = request.method;
        let path = request.path();
        debug!(%method, %path, "api request");

        match self.transport.send(request).await {
            Ok(response) if response.is_success() => Ok(response.body),
            Ok(response) => {
                warn!(%method, %path, status = response.status, "api call failed");
                Err(self.reject(response).await)
            }
            Err(err) => {
                warn!(%method, %path, error = %err, "no response from api");
                Err(self.unreachable(&err))
            }
        }
    }

    /// Sends `request` and decodes the 2xx body into `T`.
    ///
    /// # Errors
    ///
    /// As [`ApiClient::send`], plus `Decode` when the body does not match `T`.
    pub async fn call<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, ApiError> {
        let path = request.path();
        let body = self.send(request).await?;
        serde_json::from_value(body).map_err(|e| {
            warn!(%path, error = %e, "unexpected response body");
            ApiError::Decode(e.to_string())
        })
    }

    /// # Errors
    ///
    /// As [`ApiClient::call`].
    pub async fn get<T: DeserializeOwned, S: ToString>(&self, segments: &[S]) -> Result<T, ApiError> {
        self.call(ApiRequest::get(segments)).await
    }

    /// # Errors
    ///
    /// As [`ApiClient::call`], plus `InvalidRequest` when `body` cannot be
    /// serialized.
    pub async fn post_json<T, B, S>(&self, segments: &[S], body: &B) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
        S: ToString,
    {
        let body = to_body(body)?;
        self.call(ApiRequest::post(segments).json(body)).await
    }

    /// # Errors
    ///
    /// As [`ApiClient::call`].
    pub async fn post_form<T: DeserializeOwned, S: ToString>(
        &self,
        segments: &[S],
        fields: &[(&str, &str)],
    ) -> Result<T, ApiError> {
        self.call(ApiRequest::post(segments).form(fields)).await
    }

    /// # Errors
    ///
    /// As [`ApiClient::post_json`].
    pub async fn put<T, B, S>(&self, segments: &[S], body: &B) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
        S: ToString,
    {
        let body = to_body(body)?;
        self.call(ApiRequest::put(segments).json(body)).await
    }

    /// # Errors
    ///
    /// As [`ApiClient::send`]; the response body is ignored.
    pub async fn delete<S: ToString>(&self, segments: &[S]) -> Result<(), ApiError> {
        self.send(ApiRequest::delete(segments)).await.map(|_| ())
    }

    async fn reject(&self, response: ApiResponse) -> ApiError {
        let detail = detail_of(&response.body);
        let (err, notification) = match response.status {
            401 => {
                self.end_session().await;
                (
                    ApiError::Unauthorized,
                    Notification::SessionExpired {
                        message: MSG_SESSION_EXPIRED.into(),
                    },
                )
            }
            403 => (ApiError::Forbidden, Notification::Error(MSG_FORBIDDEN.into())),
            404 => {
                let message = detail.unwrap_or_else(|| MSG_NOT_FOUND.into());
                (
                    ApiError::NotFound {
                        message: message.clone(),
                    },
                    Notification::Error(message),
                )
            }
            400 => {
                let message = detail.unwrap_or_else(|| MSG_BAD_REQUEST.into());
                (
                    ApiError::BadRequest {
                        message: message.clone(),
                    },
                    Notification::Warning(message),
                )
            }
            500 => {
                let message = detail.unwrap_or_else(|| MSG_SERVER_ERROR.into());
                (
                    ApiError::Server {
                        message: message.clone(),
                    },
                    Notification::Error(message),
                )
            }
            status => {
                let message = detail.unwrap_or_else(|| MSG_REQUEST_FAILED.into());
                (
                    ApiError::Status {
                        status,
                        message: message.clone(),
                    },
                    Notification::Error(message),
                )
            }
        };
        self.notifier.notify(notification);
        err
    }

    fn unreachable(&self, err: &TransportError) -> ApiError {
        if let TransportError::InvalidUrl(url) = err {
            return ApiError::InvalidRequest(url.clone());
        }
        self.notifier.notify(Notification::Error(MSG_NETWORK.into()));
        ApiError::Network(err.to_string())
    }

    async fn end_session(&self) {
        self.context.clear();
        if let Some(local) = &self.local
            && let Err(err) = local.delete(StoreName::CurrentUser, SESSION_KEY).await
        {
            warn!(error = %err, "could not drop persisted session");
        }
    }
}

fn to_body<B: Serialize + ?Sized>(body: &B) -> Result<Value, ApiError> {
    serde_json::to_value(body).map_err(|e| ApiError::InvalidRequest(e.to_string()))
}

/// The backend's `detail` (or `message`) text, when it is a plain string.
fn detail_of(body: &Value) -> Option<String> {
    ["detail", "message"]
        .iter()
        .filter_map(|key| body.get(key).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_owned)
}
