//! One handle over the whole client core.
//!
//! `ClientBuilder` assembles the durable scope, session store, request
//! pipeline, job poller, and refresh scheduler from a [`ClientConfig`].
//! Collaborators can be swapped for fakes before `build`.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, instrument};
use tutorgen_http::{ApiClient, BackendApi, ReqwestTransport, TracingNavigator};
use tutorgen_jobs::{GenerationJob, JobPoller, PollerConfig};
use tutorgen_protocol::{ClientResult, GenerationOptions, HttpTransport, Navigator, Session};
use tutorgen_refresh::{RefreshHandle, RefreshScheduler};
use tutorgen_store::{FileKeyValueStore, KeyValueStore, SessionStore};

mod config;

pub use config::{ClientConfig, DEFAULT_BASE_URL, DEFAULT_STATE_ROOT};

pub struct ClientBuilder {
    config: ClientConfig,
    store: Option<Arc<dyn KeyValueStore>>,
    transport: Option<Arc<dyn HttpTransport>>,
    navigator: Option<Arc<dyn Navigator>>,
}

impl ClientBuilder {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            store: None,
            transport: None,
            navigator: None,
        }
    }

    /// Durable scope to use instead of files under `state_root`.
    pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
        self.navigator = Some(navigator);
        self
    }

    pub fn build(self) -> ClientResult<TutorgenClient> {
        let config = self.config;

        let store: Arc<dyn KeyValueStore> = match self.store {
            Some(store) => store,
            None => Arc::new(FileKeyValueStore::new(config.state_root.clone())),
        };
        let transport: Arc<dyn HttpTransport> = match (self.transport, config.request_timeout) {
            (Some(transport), _) => transport,
            (None, Some(timeout)) => Arc::new(ReqwestTransport::with_timeout(
                config.base_url.clone(),
                timeout,
            )?),
            (None, None) => Arc::new(ReqwestTransport::new(config.base_url.clone())),
        };
        let navigator: Arc<dyn Navigator> = match self.navigator {
            Some(navigator) => navigator,
            None => Arc::new(TracingNavigator::default()),
        };

        let session = SessionStore::new(store.clone());
        let client = ApiClient::new(transport, session, navigator);
        let api = BackendApi::new(client, config.default_token_ttl);
        let poller = JobPoller::new(
            api.clone(),
            store,
            PollerConfig {
                poll_interval: config.poll_interval,
                completion_linger: config.completion_linger,
            },
        );

        Ok(TutorgenClient {
            config,
            api,
            poller,
            refresh: Mutex::new(None),
        })
    }
}

/// What `start` found in the durable scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Startup {
    pub session: Session,
    /// Whether an armed generation job is being polled again.
    pub resumed: bool,
}

pub struct TutorgenClient {
    config: ClientConfig,
    api: BackendApi,
    poller: JobPoller,
    refresh: Mutex<Option<RefreshHandle>>,
}

impl TutorgenClient {
    pub fn builder(config: ClientConfig) -> ClientBuilder {
        ClientBuilder::new(config)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn api(&self) -> &BackendApi {
        &self.api
    }

    pub fn session(&self) -> &SessionStore {
        self.api.session()
    }

    pub fn poller(&self) -> &JobPoller {
        &self.poller
    }

    /// Restore the session, start renewing it, and pick an armed job back up.
    ///
    /// An armed job stays armed while logged out; `login` resumes it.
    #[instrument(skip(self))]
    pub async fn start(&self) -> Startup {
        let session = self.session().hydrate().await;
        let mut resumed = false;
        if session.is_authenticated {
            self.activate_refresh();
            resumed = self.poller.resume().await;
        }
        info!(
            authenticated = session.is_authenticated,
            resumed, "client started"
        );
        Startup { session, resumed }
    }

    #[instrument(skip(self, password))]
    pub async fn login(&self, email: &str, password: &str) -> ClientResult<Session> {
        let session = self.api.login(email, password).await?;
        self.activate_refresh();
        if self.poller.resume().await {
            info!("resumed armed generation after login");
        }
        Ok(session)
    }

    /// End the session. Polling stops but the armed job is kept.
    pub async fn logout(&self) {
        self.poller.detach().await;
        self.deactivate_refresh();
        self.api.logout().await;
    }

    pub async fn submit(
        &self,
        target: &str,
        options: GenerationOptions,
    ) -> ClientResult<GenerationJob> {
        self.poller.submit(target, options).await
    }

    /// Start the refresh scheduler unless one is already running. Returns
    /// whether a new one was started.
    pub fn activate_refresh(&self) -> bool {
        let mut slot = self.refresh.lock();
        if slot.as_ref().is_some_and(RefreshHandle::is_active) {
            return false;
        }
        *slot = Some(RefreshScheduler::activate(
            self.api.clone(),
            self.config.refresh_margin,
        ));
        debug!("refresh scheduler activated");
        true
    }

    pub fn refresh_active(&self) -> bool {
        self.refresh
            .lock()
            .as_ref()
            .is_some_and(RefreshHandle::is_active)
    }

    /// Stop background work without touching the session or the armed job.
    pub async fn shutdown(&self) {
        self.poller.detach().await;
        self.deactivate_refresh();
    }

    fn deactivate_refresh(&self) {
        if let Some(mut handle) = self.refresh.lock().take() {
            handle.deactivate();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use anyhow::{Result, bail};
    use async_trait::async_trait;
    use serde_json::json;
    use tokio::time::sleep;
    use tutorgen_http::fake::{CountingNavigator, ScriptedTransport};
    use tutorgen_http::paths;
    use tutorgen_jobs::JobPhase;
    use tutorgen_protocol::{GenerationOptions, HttpMethod};
    use tutorgen_store::{KeyValueStore, MemoryKeyValueStore, PENDING_GENERATION_KEY, SESSION_KEY};

    use crate::{ClientConfig, TutorgenClient};

    const REPO: &str = "https://github.com/acme/widgets";

    /// Scope that serves an armed job but refuses every write.
    struct ReadOnlyScope;

    #[async_trait]
    impl KeyValueStore for ReadOnlyScope {
        async fn get(&self, key: &str) -> Result<Option<String>> {
            Ok((key == PENDING_GENERATION_KEY)
                .then(|| json!({"targetRepositoryUrl": REPO}).to_string()))
        }

        async fn put(&self, _key: &str, _value: &str) -> Result<()> {
            bail!("read-only file system")
        }

        async fn remove(&self, _key: &str) -> Result<()> {
            bail!("read-only file system")
        }
    }

    fn scripted_backend() -> ScriptedTransport {
        let transport = ScriptedTransport::new();
        transport.respond_json(
            HttpMethod::Post,
            paths::LOGIN,
            200,
            json!({
                "access_token": "jwt",
                "token_type": "bearer",
                "user": {"id": 7, "email": "ada@example.com", "displayName": "Ada"}
            }),
        );
        transport.respond_json(
            HttpMethod::Post,
            paths::SUBMIT_GENERATION,
            200,
            json!({"generationId": "g-7"}),
        );
        transport.respond_json(
            HttpMethod::Get,
            paths::GENERATION_STATUS,
            200,
            json!({"isGenerating": true, "generationStep": 1, "generationProgress": 15}),
        );
        transport
    }

    fn client(transport: &ScriptedTransport, storage: &MemoryKeyValueStore) -> TutorgenClient {
        TutorgenClient::builder(ClientConfig::default())
            .transport(Arc::new(transport.clone()))
            .store(Arc::new(storage.clone()))
            .navigator(Arc::new(CountingNavigator::default()))
            .build()
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_start_is_logged_out_and_idle() {
        let transport = scripted_backend();
        let client = client(&transport, &MemoryKeyValueStore::new());

        let startup = client.start().await;
        assert!(!startup.session.is_authenticated);
        assert!(!startup.resumed);
        assert!(!client.refresh_active());
        assert_eq!(client.poller().current_state().phase, JobPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn login_persists_session_and_starts_refresh() {
        let transport = scripted_backend();
        let storage = MemoryKeyValueStore::new();
        let client = client(&transport, &storage);

        let session = client.login("ada@example.com", "pw").await.unwrap();
        assert!(session.is_authenticated);
        assert!(client.refresh_active());
        assert!(!client.activate_refresh());
        assert!(storage.contains(SESSION_KEY));

        client.logout().await;
        assert!(!client.session().is_authenticated());
        assert!(!client.refresh_active());
        assert!(!storage.contains(SESSION_KEY));
    }

    #[tokio::test(start_paused = true)]
    async fn restart_resumes_session_and_armed_job() {
        let transport = scripted_backend();
        let storage = MemoryKeyValueStore::new();

        let first = client(&transport, &storage);
        first.login("ada@example.com", "pw").await.unwrap();
        first
            .submit(REPO, GenerationOptions::default())
            .await
            .unwrap();
        sleep(Duration::from_millis(1)).await;
        first.shutdown().await;
        drop(first);

        let second = client(&transport, &storage);
        let startup = second.start().await;
        assert!(startup.session.is_authenticated);
        assert_eq!(
            startup.session.user.map(|user| user.email),
            Some("ada@example.com".to_owned())
        );
        assert!(startup.resumed);
        assert!(second.refresh_active());

        sleep(Duration::from_millis(1)).await;
        assert_eq!(second.poller().current_state().phase, JobPhase::Polling);
        assert_eq!(transport.count(HttpMethod::Post, paths::SUBMIT_GENERATION), 1);
        assert_eq!(transport.count(HttpMethod::Get, paths::GENERATION_STATUS), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn armed_job_waits_for_login() {
        let transport = scripted_backend();
        let storage = MemoryKeyValueStore::new();
        storage
            .put(
                PENDING_GENERATION_KEY,
                &json!({"targetRepositoryUrl": REPO}).to_string(),
            )
            .await
            .unwrap();

        let client = client(&transport, &storage);
        let startup = client.start().await;
        assert!(!startup.resumed);
        sleep(Duration::from_secs(30)).await;
        assert_eq!(transport.count(HttpMethod::Get, paths::GENERATION_STATUS), 0);

        client.login("ada@example.com", "pw").await.unwrap();
        sleep(Duration::from_millis(1)).await;
        assert_eq!(transport.count(HttpMethod::Get, paths::GENERATION_STATUS), 1);
        assert_eq!(client.poller().current_state().target(), Some(REPO));
    }

    #[tokio::test(start_paused = true)]
    async fn login_survives_unwritable_scope() {
        let transport = scripted_backend();
        let client = TutorgenClient::builder(ClientConfig::default())
            .transport(Arc::new(transport.clone()))
            .store(Arc::new(ReadOnlyScope))
            .navigator(Arc::new(CountingNavigator::default()))
            .build()
            .unwrap();

        let session = client.login("ada@example.com", "pw").await.unwrap();
        assert!(session.is_authenticated);
        assert!(client.session().is_authenticated());
        assert!(client.refresh_active());

        sleep(Duration::from_millis(1)).await;
        assert_eq!(client.poller().current_state().phase, JobPhase::Polling);
        assert_eq!(transport.count(HttpMethod::Get, paths::GENERATION_STATUS), 1);
    }
}
