//! Scripted transport and navigator for exercising the client core without a
//! backend.
//!
//! ```ignore
//! let transport = ScriptedTransport::new();
//! transport.respond_json(HttpMethod::Post, "/user/refresh", 200, json!({...}));
//! let client = ApiClient::new(Arc::new(transport.clone()), session, navigator);
//! // ... drive the client ...
//! assert_eq!(transport.count(HttpMethod::Post, "/user/refresh"), 1);
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::time::Instant;
use tutorgen_protocol::{
    ApiRequest, ApiResponse, ClientResult, HttpMethod, HttpTransport, Navigator,
};

type Responder = Arc<dyn Fn(&ApiRequest) -> ClientResult<ApiResponse> + Send + Sync>;

/// A request as it reached the transport, with the (tokio) time it was sent.
#[derive(Debug, Clone)]
pub struct SentRequest {
    pub request: ApiRequest,
    pub at: Instant,
}

#[derive(Default)]
struct ScriptedInner {
    routes: Mutex<HashMap<(HttpMethod, String), Responder>>,
    sent: Mutex<Vec<SentRequest>>,
    latency: Mutex<Duration>,
}

/// In-memory transport answering by `(method, path)`. Unrouted requests get a
/// 404 in the backend's error format.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    inner: Arc<ScriptedInner>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every response, keeping requests in flight concurrently.
    pub fn with_latency(self, latency: Duration) -> Self {
        *self.inner.latency.lock() = latency;
        self
    }

    pub fn route<F>(&self, method: HttpMethod, path: &str, responder: F)
    where
        F: Fn(&ApiRequest) -> ClientResult<ApiResponse> + Send + Sync + 'static,
    {
        self.inner
            .routes
            .lock()
            .insert((method, path.to_owned()), Arc::new(responder));
    }

    pub fn respond_json(&self, method: HttpMethod, path: &str, status: u16, body: Value) {
        let body = body.to_string();
        self.route(method, path, move |_| Ok(ApiResponse::new(status, body.clone())));
    }

    /// Answer with each response in turn, repeating the last one once the
    /// script runs out.
    pub fn respond_sequence(&self, method: HttpMethod, path: &str, responses: Vec<ApiResponse>) {
        let queue = Mutex::new(VecDeque::from(responses));
        self.route(method, path, move |_| {
            let mut queue = queue.lock();
            let next = if queue.len() > 1 {
                queue.pop_front()
            } else {
                queue.front().cloned()
            };
            Ok(next.unwrap_or_else(|| ApiResponse::new(500, r#"{"detail": "script exhausted"}"#)))
        });
    }

    pub fn sent(&self) -> Vec<SentRequest> {
        self.inner.sent.lock().clone()
    }

    pub fn count(&self, method: HttpMethod, path: &str) -> usize {
        self.inner
            .sent
            .lock()
            .iter()
            .filter(|sent| sent.request.method == method && sent.request.path == path)
            .count()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: ApiRequest) -> ClientResult<ApiResponse> {
        self.inner.sent.lock().push(SentRequest {
            request: request.clone(),
            at: Instant::now(),
        });

        let latency = *self.inner.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let responder = self
            .inner
            .routes
            .lock()
            .get(&(request.method, request.path.clone()))
            .cloned();
        match responder {
            Some(responder) => responder(&request),
            None => Ok(ApiResponse::new(404, r#"{"detail": "Not Found"}"#)),
        }
    }
}

/// Navigator that only counts redirects.
#[derive(Debug, Clone, Default)]
pub struct CountingNavigator {
    redirects: Arc<AtomicUsize>,
}

impl CountingNavigator {
    pub fn redirects(&self) -> usize {
        self.redirects.load(Ordering::SeqCst)
    }
}

impl Navigator for CountingNavigator {
    fn redirect_to_login(&self) {
        self.redirects.fetch_add(1, Ordering::SeqCst);
    }
}
