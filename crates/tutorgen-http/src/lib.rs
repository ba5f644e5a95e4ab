//! Request pipeline shared by every backend call.
//!
//! Outbound, the current bearer credential is read from the session store at
//! dispatch time and attached. Inbound, success bodies are decoded straight
//! into the caller's type, a 401 tears the session down and redirects before
//! the error is returned, and every other failure is passed through as-is.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::{Instrument, debug, info_span, warn};
use tutorgen_protocol::{
    ApiRequest, ApiResponse, ClientError, ClientResult, ErrorBody, HttpTransport, Navigator,
};
use tutorgen_store::SessionStore;
use uuid::Uuid;

mod api;
pub mod fake;
mod transport;

pub use api::{BackendApi, paths};
pub use transport::ReqwestTransport;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn HttpTransport>,
    session: SessionStore,
    navigator: Arc<dyn Navigator>,
}

impl ApiClient {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        session: SessionStore,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        Self {
            transport,
            session,
            navigator,
        }
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    /// Dispatch `request` and decode the success body as `T`.
    pub async fn send<T: DeserializeOwned>(&self, request: ApiRequest) -> ClientResult<T> {
        let request_id = Uuid::new_v4();
        let span = info_span!(
            "api.request",
            method = request.method.as_str(),
            path = %request.path,
            %request_id
        );

        async move {
            let (request, credential) = self.attach_credentials(request, request_id);
            let response = self.transport.send(request).await?;
            debug!(status = response.status, "response received");
            self.settle(response, credential.as_deref()).await
        }
        .instrument(span)
        .await
    }

    /// Outbound interceptor. Returns the credential that was attached, if any.
    fn attach_credentials(
        &self,
        request: ApiRequest,
        request_id: Uuid,
    ) -> (ApiRequest, Option<String>) {
        let mut request = request.with_header(REQUEST_ID_HEADER, request_id.to_string());
        let credential = self.session.snapshot().access_token;
        if let Some(token) = &credential {
            request = request.with_header("Authorization", format!("Bearer {token}"));
        }
        (request, credential)
    }

    /// Inbound interceptor.
    async fn settle<T: DeserializeOwned>(
        &self,
        response: ApiResponse,
        credential: Option<&str>,
    ) -> ClientResult<T> {
        if response.is_success() {
            return decode_body(&response.body);
        }

        let message = failure_message(&response);
        if response.status != 401 {
            return Err(ClientError::Rejected {
                status: response.status,
                message,
            });
        }

        // A 401 for a request that carried no credential (a failed login, for
        // instance) has no session to tear down.
        let Some(token) = credential else {
            return Err(ClientError::Rejected {
                status: 401,
                message,
            });
        };

        if self.session.invalidate(token).await {
            warn!("authorization rejected, redirecting to login");
            self.navigator.redirect_to_login();
        }
        Err(ClientError::Unauthorized(message))
    }
}

fn decode_body<T: DeserializeOwned>(body: &str) -> ClientResult<T> {
    let body = if body.trim().is_empty() { "null" } else { body };
    serde_json::from_str(body).map_err(|err| ClientError::Decode(err.to_string()))
}

fn failure_message(response: &ApiResponse) -> String {
    serde_json::from_str::<ErrorBody>(&response.body)
        .ok()
        .and_then(|body| body.message())
        .unwrap_or_else(|| {
            let text = response.body.trim();
            if text.is_empty() {
                format!("request failed with status {}", response.status)
            } else {
                text.to_owned()
            }
        })
}

/// Navigator for headless hosts: records the redirect in the log.
#[derive(Debug, Clone)]
pub struct TracingNavigator {
    login_route: String,
}

impl TracingNavigator {
    pub fn new(login_route: impl Into<String>) -> Self {
        Self {
            login_route: login_route.into(),
        }
    }
}

impl Default for TracingNavigator {
    fn default() -> Self {
        Self::new("/login")
    }
}

impl Navigator for TracingNavigator {
    fn redirect_to_login(&self) {
        warn!(route = %self.login_route, "navigating to login");
    }
}
