use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, watch};
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, info, instrument, warn};
use tutorgen_protocol::{ClientError, ClientResult, Session, UserProfile};

use crate::{KeyValueStore, MemoryKeyValueStore, SESSION_KEY};

/// Single source of truth for who is logged in and with what credential.
///
/// Reads never wait: `snapshot` clones the latest published value. Writes
/// go through one async lock that covers both the in-memory update and the
/// write-through, so the mirror sees mutations in the order they happened.
#[derive(Clone)]
pub struct SessionStore {
    state: Arc<watch::Sender<Session>>,
    mirror: Arc<dyn KeyValueStore>,
    write_lock: Arc<Mutex<()>>,
}

impl SessionStore {
    pub fn new(mirror: Arc<dyn KeyValueStore>) -> Self {
        let (state, _) = watch::channel(Session::empty());
        Self {
            state: Arc::new(state),
            mirror,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Store mirrored into a fresh process-local scope.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryKeyValueStore::new()))
    }

    pub fn snapshot(&self) -> Session {
        self.state.borrow().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().is_authenticated
    }

    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.state.subscribe()
    }

    pub fn subscribe_stream(&self) -> WatchStream<Session> {
        WatchStream::new(self.state.subscribe())
    }

    /// Restore the session from the mirror. Missing, unreadable, corrupt, or
    /// expired records all yield an empty session; this never fails.
    #[instrument(skip(self))]
    pub async fn hydrate(&self) -> Session {
        let _guard = self.write_lock.lock().await;
        let restored = match self.mirror.get(SESSION_KEY).await {
            Ok(Some(raw)) => match serde_json::from_str::<Session>(&raw) {
                Ok(session) if session.is_live_at(Utc::now()) => Some(session),
                Ok(_) => {
                    debug!("session mirror expired or inconsistent, discarding");
                    if let Err(error) = self.mirror.remove(SESSION_KEY).await {
                        warn!(%error, "failed to drop stale session mirror");
                    }
                    None
                }
                Err(error) => {
                    warn!(%error, "session mirror is corrupt, starting logged out");
                    None
                }
            },
            Ok(None) => None,
            Err(error) => {
                warn!(%error, "session mirror unreadable, starting logged out");
                None
            }
        };

        let session = restored.unwrap_or_default();
        if session.is_authenticated {
            info!(
                user = session.user.as_ref().map(|u| u.email.as_str()),
                "session restored"
            );
        }
        self.state.send_replace(session.clone());
        session
    }

    /// Replace the session wholesale.
    #[instrument(skip(self, user, access_token), fields(user = %user.email))]
    pub async fn login(
        &self,
        user: UserProfile,
        access_token: impl Into<String>,
        token_expiry: DateTime<Utc>,
    ) -> ClientResult<()> {
        let access_token = access_token.into();
        if access_token.is_empty() {
            return Err(ClientError::InvalidState(
                "cannot log in with an empty access token".to_owned(),
            ));
        }

        let _guard = self.write_lock.lock().await;
        let session = Session::authenticated(user, access_token, token_expiry);
        self.state.send_replace(session.clone());
        info!(%token_expiry, "session established");
        self.write_through(&session).await;
        Ok(())
    }

    /// Swap in a renewed credential for the current user.
    #[instrument(skip(self, access_token))]
    pub async fn refresh(
        &self,
        access_token: impl Into<String>,
        token_expiry: DateTime<Utc>,
    ) -> ClientResult<()> {
        let access_token = access_token.into();
        if access_token.is_empty() {
            return Err(ClientError::InvalidState(
                "refresh returned an empty access token".to_owned(),
            ));
        }

        let _guard = self.write_lock.lock().await;
        let current = self.snapshot();
        let Some(user) = current.user else {
            return Err(ClientError::InvalidState(
                "cannot refresh a logged-out session".to_owned(),
            ));
        };
        let session = Session::authenticated(user, access_token, token_expiry);
        self.state.send_replace(session.clone());
        debug!(%token_expiry, "session credential renewed");
        self.write_through(&session).await;
        Ok(())
    }

    /// Clear the session. Safe to call when already logged out.
    #[instrument(skip(self))]
    pub async fn logout(&self) {
        let _guard = self.write_lock.lock().await;
        if self.clear() {
            info!("session cleared");
        }
        self.write_through(&Session::empty()).await;
    }

    /// Log out only if the session still carries `access_token`.
    ///
    /// Returns whether this call tore the session down. Concurrent callers
    /// holding the same credential get `true` exactly once.
    #[instrument(skip(self, access_token))]
    pub async fn invalidate(&self, access_token: &str) -> bool {
        let _guard = self.write_lock.lock().await;
        if self.state.borrow().access_token.as_deref() != Some(access_token) {
            debug!("credential already superseded, nothing to invalidate");
            return false;
        }
        self.clear();
        info!("session invalidated by authorization failure");
        self.write_through(&Session::empty()).await;
        true
    }

    fn clear(&self) -> bool {
        self.state.send_if_modified(|session| {
            if *session == Session::empty() {
                return false;
            }
            *session = Session::empty();
            true
        })
    }

    /// Mirror `session` into durable storage. The in-memory session is
    /// already published, so a failed write is logged and the mirror catches
    /// up on the next mutation.
    async fn write_through(&self, session: &Session) {
        let outcome = if session.is_authenticated {
            match serde_json::to_string(session) {
                Ok(payload) => self.mirror.put(SESSION_KEY, &payload).await,
                Err(error) => {
                    warn!(%error, "session could not be serialized for the mirror");
                    return;
                }
            }
        } else {
            self.mirror.remove(SESSION_KEY).await
        };
        if let Err(error) = outcome {
            warn!(error = %format!("{error:#}"), "session mirror write failed");
        }
    }
}
