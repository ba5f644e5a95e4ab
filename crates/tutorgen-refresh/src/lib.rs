use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use tutorgen_http::BackendApi;
use tutorgen_protocol::Session;

/// Time to wait before renewing a token expiring at `expiry`.
///
/// Zero when the renewal point is already behind us.
pub fn refresh_delay(
    expiry: DateTime<Utc>,
    margin: chrono::Duration,
    now: DateTime<Utc>,
) -> std::time::Duration {
    (expiry - margin - now).to_std().unwrap_or_default()
}

pub struct RefreshScheduler;

impl RefreshScheduler {
    /// Start renewing the session's token `margin` ahead of its expiry.
    ///
    /// The background task ends on its own once the session is logged out,
    /// and is aborted when the returned handle is deactivated or dropped.
    pub fn activate(api: BackendApi, margin: chrono::Duration) -> RefreshHandle {
        let changes = api.session().subscribe();
        let task = tokio::spawn(run(api, changes, margin));
        RefreshHandle { task: Some(task) }
    }
}

/// Owner of a running scheduler.
#[derive(Debug)]
pub struct RefreshHandle {
    task: Option<JoinHandle<()>>,
}

impl RefreshHandle {
    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Cancel the pending timer. Takes effect immediately.
    pub fn deactivate(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("refresh scheduler deactivated");
        }
    }
}

impl Drop for RefreshHandle {
    fn drop(&mut self) {
        self.deactivate();
    }
}

async fn run(api: BackendApi, mut changes: watch::Receiver<Session>, margin: chrono::Duration) {
    loop {
        let session = changes.borrow_and_update().clone();
        if !session.is_authenticated {
            debug!("session is not authenticated, refresh scheduler stopping");
            return;
        }

        let Some(expiry) = session.token_expiry else {
            // Nothing to schedule against until the session changes.
            if changes.changed().await.is_err() {
                return;
            }
            continue;
        };

        let delay = refresh_delay(expiry, margin, Utc::now());
        debug!(delay_secs = delay.as_secs(), %expiry, "token refresh scheduled");

        tokio::select! {
            _ = tokio::time::sleep(delay) => {
                match api.refresh_session().await {
                    Ok(renewed) => {
                        info!(expiry = ?renewed.token_expiry, "access token renewed");
                    }
                    Err(error) => {
                        // The next request's 401 handling will end the session;
                        // retrying here would only hammer a dead credential.
                        warn!(%error, "token refresh failed");
                        if changes.changed().await.is_err() {
                            return;
                        }
                    }
                }
            }
            changed = changes.changed() => {
                if changed.is_err() {
                    return;
                }
                debug!("session changed, rescheduling token refresh");
            }
        }
    }
}
