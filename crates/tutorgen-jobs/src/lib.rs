//! Drives one long-running generation job to completion.
//!
//! `submit` starts a job and arms its repository URL in durable storage;
//! `resume` re-enters polling for an armed job after a reload or remount;
//! `detach` stops observing without touching the server-side job. Only one
//! job is observed at a time: a new submission supersedes the armed one.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, info, instrument, warn};
use tutorgen_http::BackendApi;
use tutorgen_protocol::{ClientError, ClientResult, GenerationOptions, PendingGeneration};
use tutorgen_store::{KeyValueStore, PENDING_GENERATION_KEY};

mod machine;

pub use machine::{GenerationJob, JobPhase, JobSnapshot, JobStatus, PollOutcome};

const SIGNED_OUT: &str = "signed out; sign in again to resume the generation";

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub poll_interval: Duration,
    /// How long a succeeded job stays visible before the handle is cleared.
    pub completion_linger: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            completion_linger: Duration::from_secs(3),
        }
    }
}

/// Which poll loop is current. Bumped whenever observation stops or a new
/// loop starts, so a superseded loop can't touch state or the armed key.
#[derive(Debug, Default)]
struct PollControl {
    epoch: u64,
    task: Option<JoinHandle<()>>,
}

impl PollControl {
    fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    fn stop(&mut self) -> u64 {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.epoch += 1;
        self.epoch
    }
}

struct PollerInner {
    api: BackendApi,
    store: Arc<dyn KeyValueStore>,
    config: PollerConfig,
    state: watch::Sender<JobSnapshot>,
    control: Mutex<PollControl>,
}

#[derive(Clone)]
pub struct JobPoller {
    inner: Arc<PollerInner>,
}

impl JobPoller {
    pub fn new(api: BackendApi, store: Arc<dyn KeyValueStore>, config: PollerConfig) -> Self {
        let (state, _) = watch::channel(JobSnapshot::idle());
        Self {
            inner: Arc::new(PollerInner {
                api,
                store,
                config,
                state,
                control: Mutex::new(PollControl::default()),
            }),
        }
    }

    pub fn current_state(&self) -> JobSnapshot {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<JobSnapshot> {
        self.inner.state.subscribe()
    }

    pub fn subscribe_stream(&self) -> WatchStream<JobSnapshot> {
        WatchStream::new(self.inner.state.subscribe())
    }

    /// Submit a generation job and start polling it.
    #[instrument(skip(self, options))]
    pub async fn submit(
        &self,
        target: &str,
        options: GenerationOptions,
    ) -> ClientResult<GenerationJob> {
        let target = target.trim();
        if target.is_empty() {
            return Err(ClientError::InvalidState(
                "a target repository URL is required".to_owned(),
            ));
        }

        let mut control = self.inner.control.lock().await;
        let epoch = control.stop();
        self.inner.state.send_replace(JobSnapshot::submitting(target));

        let accepted = match self.inner.api.submit_generation(target, options).await {
            Ok(accepted) => accepted,
            Err(error) => {
                warn!(%error, "generation submission failed");
                self.inner
                    .state
                    .send_replace(JobSnapshot::submission_failed(error.user_message()));
                return Err(error);
            }
        };

        let job = GenerationJob::submitted(target, accepted.generation_id);
        let mut snapshot = JobSnapshot::polling(job.clone());
        if let Err(error) = self.arm(target).await {
            // The backend accepted the job; keep observing it in memory even
            // though it won't survive a reload.
            warn!(%error, "failed to arm generation job");
            snapshot = snapshot.with_error(error.to_string());
        }
        self.inner.state.send_replace(snapshot);
        info!(generation_id = ?job.generation_id, "generation submitted");

        control.task = Some(self.spawn_poll(epoch, target.to_owned()));
        Ok(job)
    }

    /// Mount path: re-enter polling for an armed job if nothing is being
    /// polled. Returns whether polling (re)started.
    #[instrument(skip(self))]
    pub async fn resume(&self) -> bool {
        let mut control = self.inner.control.lock().await;
        if control.is_running() {
            debug!("already polling, nothing to resume");
            return false;
        }

        let Some(armed) = self.armed().await else {
            return false;
        };
        let target = armed.target_repository_url;
        let epoch = control.stop();
        self.inner
            .state
            .send_replace(JobSnapshot::polling(GenerationJob::resumed(&target)));
        info!(%target, "resuming generation polling");
        control.task = Some(self.spawn_poll(epoch, target));
        true
    }

    /// Stop observing. The server-side job and the armed key are left alone,
    /// so a later `resume` picks the job back up.
    #[instrument(skip(self))]
    pub async fn detach(&self) {
        let mut control = self.inner.control.lock().await;
        control.stop();
        self.inner.state.send_if_modified(|snapshot| {
            if !snapshot.is_polling() {
                return false;
            }
            *snapshot = snapshot.detached();
            true
        });
        debug!("generation polling detached");
    }

    /// Dismiss a terminal job and return to idle.
    pub async fn acknowledge(&self) {
        let mut control = self.inner.control.lock().await;
        if self.current_state().is_terminal() {
            control.stop();
            self.inner.state.send_replace(JobSnapshot::idle());
        }
    }

    /// The armed job, if any. Unreadable or corrupt records count as absent.
    pub async fn armed(&self) -> Option<PendingGeneration> {
        let raw = match self.inner.store.get(PENDING_GENERATION_KEY).await {
            Ok(raw) => raw?,
            Err(error) => {
                warn!(error = %format!("{error:#}"), "armed job record unreadable");
                return None;
            }
        };
        match serde_json::from_str::<PendingGeneration>(&raw) {
            Ok(armed) if !armed.target_repository_url.trim().is_empty() => Some(armed),
            Ok(_) | Err(_) => {
                warn!("armed job record is corrupt, ignoring");
                None
            }
        }
    }

    async fn arm(&self, target: &str) -> ClientResult<()> {
        let record = PendingGeneration {
            target_repository_url: target.to_owned(),
        };
        let payload =
            serde_json::to_string(&record).map_err(|err| ClientError::Storage(err.to_string()))?;
        self.inner
            .store
            .put(PENDING_GENERATION_KEY, &payload)
            .await
            .map_err(|err| ClientError::Storage(format!("{err:#}")))
    }

    fn spawn_poll(&self, epoch: u64, target: String) -> JoinHandle<()> {
        tokio::spawn(poll_loop(self.inner.clone(), epoch, target))
    }
}

async fn poll_loop(inner: Arc<PollerInner>, epoch: u64, target: String) {
    let mut ticker = tokio::time::interval(inner.config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut session_changes = inner.api.session().subscribe();

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = session_changes.changed() => {
                if changed.is_err() {
                    return;
                }
                if inner.api.session().is_authenticated() {
                    continue;
                }
            }
        }

        // Status requires a credential; never poll signed out.
        if !inner.api.session().is_authenticated() {
            detach_signed_out(&inner, epoch, &target).await;
            return;
        }

        let result = inner.api.generation_status(&target).await;

        let control = inner.control.lock().await;
        if control.epoch != epoch {
            return;
        }

        let response = match result {
            Ok(response) => response,
            Err(
                ClientError::Unauthorized(message)
                | ClientError::Rejected {
                    status: 401,
                    message,
                },
            ) => {
                // Session is gone; keep the armed key for the next login.
                warn!(%target, "status poll unauthorized, detaching");
                let snapshot = inner.state.borrow().detached().with_error(message);
                inner.state.send_replace(snapshot);
                return;
            }
            Err(error) => {
                warn!(%target, %error, "status poll failed, will retry on next tick");
                let snapshot = inner.state.borrow().with_error(error.user_message());
                inner.state.send_replace(snapshot);
                continue;
            }
        };

        let Some(job) = inner.state.borrow().job.clone() else {
            return;
        };
        let outcome = job.observe(&response);
        debug!(
            progress = outcome.job().progress_percent,
            step = outcome.job().step,
            status = ?outcome.job().status,
            "generation status observed"
        );

        if !outcome.is_terminal() {
            inner.state.send_replace(JobSnapshot::with_outcome(outcome));
            continue;
        }

        let succeeded = matches!(outcome, PollOutcome::Succeeded(_));
        let mut snapshot = JobSnapshot::with_outcome(outcome);
        if let Err(error) = inner.store.remove(PENDING_GENERATION_KEY).await {
            warn!(error = %format!("{error:#}"), "failed to disarm finished job");
            snapshot = snapshot.with_error(format!("{error:#}"));
        }
        if succeeded {
            info!(%target, "generation succeeded");
        } else {
            warn!(
                %target,
                error = snapshot.job.as_ref().and_then(|job| job.error_message.as_deref()),
                "generation failed"
            );
        }
        inner.state.send_replace(snapshot);
        drop(control);

        if succeeded {
            tokio::time::sleep(inner.config.completion_linger).await;
            let control = inner.control.lock().await;
            if control.epoch == epoch {
                inner.state.send_replace(JobSnapshot::idle());
            }
        }
        return;
    }
}

/// Stop polling because the session ended. The armed key is kept so the
/// next login can resume the job.
async fn detach_signed_out(inner: &PollerInner, epoch: u64, target: &str) {
    let control = inner.control.lock().await;
    if control.epoch != epoch {
        return;
    }
    warn!(%target, "session ended, generation polling detached");
    let snapshot = inner.state.borrow().detached().with_error(SIGNED_OUT);
    inner.state.send_replace(snapshot);
}
