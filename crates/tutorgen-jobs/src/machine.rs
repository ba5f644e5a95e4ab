//! Pure job state: no timers, no I/O.

use serde::{Deserialize, Serialize};
use tutorgen_protocol::GenerationStatusResponse;

const FALLBACK_FAILURE: &str = "generation failed";
const STOPPED_EARLY: &str = "generation stopped before completion";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    /// Map a backend status label (`PENDING`, `CLONING`, ..., `COMPLETED`,
    /// `FAILED`) onto the client's four states.
    pub fn from_server(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" | "queued" => Self::Pending,
            "completed" | "succeeded" | "success" | "done" => Self::Succeeded,
            "failed" | "failure" | "error" => Self::Failed,
            _ => Self::Running,
        }
    }
}

/// Client-side view of one generation job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationJob {
    pub target_repository_url: String,
    pub generation_id: Option<String>,
    pub is_generating: bool,
    pub progress_percent: u8,
    pub step: u32,
    pub status: JobStatus,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Continue(GenerationJob),
    Succeeded(GenerationJob),
    Failed(GenerationJob),
}

impl PollOutcome {
    pub fn job(&self) -> &GenerationJob {
        match self {
            Self::Continue(job) | Self::Succeeded(job) | Self::Failed(job) => job,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Continue(_))
    }
}

impl GenerationJob {
    /// Job whose submission is in flight.
    pub fn new(target_repository_url: impl Into<String>) -> Self {
        Self {
            target_repository_url: target_repository_url.into(),
            generation_id: None,
            is_generating: false,
            progress_percent: 0,
            step: 0,
            status: JobStatus::Pending,
            error_message: None,
        }
    }

    /// Job accepted by the backend and about to be polled.
    pub fn submitted(
        target_repository_url: impl Into<String>,
        generation_id: Option<String>,
    ) -> Self {
        Self {
            generation_id,
            is_generating: true,
            ..Self::new(target_repository_url)
        }
    }

    /// Job recovered from the armed key; its progress is unknown until the
    /// first status response.
    pub fn resumed(target_repository_url: impl Into<String>) -> Self {
        Self::submitted(target_repository_url, None)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, JobStatus::Succeeded | JobStatus::Failed)
    }

    /// Fold one status response into the job.
    ///
    /// Progress only reaches 100 together with `Succeeded`. A job the backend
    /// reports as idle, unfinished, and not failed is treated as failed so
    /// polling never outlives `is_generating`.
    pub fn observe(&self, response: &GenerationStatusResponse) -> PollOutcome {
        let reported = response.status.as_deref().map(JobStatus::from_server);
        let progress = response.generation_progress.min(100) as u8;

        let mut next = Self {
            step: response.generation_step,
            error_message: response.error_message.clone(),
            ..self.clone()
        };

        if reported == Some(JobStatus::Failed) {
            next.is_generating = false;
            next.progress_percent = progress.min(99);
            next.status = JobStatus::Failed;
            next.error_message = Some(
                response
                    .error_message
                    .clone()
                    .unwrap_or_else(|| FALLBACK_FAILURE.to_owned()),
            );
            return PollOutcome::Failed(next);
        }

        if !response.is_generating && progress == 100 {
            next.is_generating = false;
            next.progress_percent = 100;
            next.status = JobStatus::Succeeded;
            next.error_message = None;
            return PollOutcome::Succeeded(next);
        }

        if response.is_generating || reported == Some(JobStatus::Pending) {
            next.is_generating = true;
            next.progress_percent = progress.min(99);
            next.status = match reported {
                Some(JobStatus::Pending) => JobStatus::Pending,
                _ => JobStatus::Running,
            };
            return PollOutcome::Continue(next);
        }

        next.is_generating = false;
        next.progress_percent = progress;
        next.status = JobStatus::Failed;
        next.error_message = Some(
            response
                .error_message
                .clone()
                .unwrap_or_else(|| STOPPED_EARLY.to_owned()),
        );
        PollOutcome::Failed(next)
    }
}

/// Where the poller is in a job's lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPhase {
    #[default]
    Idle,
    Submitting,
    Polling,
    Succeeded,
    Failed,
    /// Observation stopped while the job may still be running server-side.
    Detached,
}

/// What observers of the poller see.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub phase: JobPhase,
    pub job: Option<GenerationJob>,
    /// Last non-terminal problem (failed poll, failed submission).
    pub last_error: Option<String>,
}

impl JobSnapshot {
    pub fn idle() -> Self {
        Self::default()
    }

    pub fn submitting(target: &str) -> Self {
        Self {
            phase: JobPhase::Submitting,
            job: Some(GenerationJob::new(target)),
            last_error: None,
        }
    }

    pub fn submission_failed(message: impl Into<String>) -> Self {
        Self {
            last_error: Some(message.into()),
            ..Self::idle()
        }
    }

    pub fn polling(job: GenerationJob) -> Self {
        Self {
            phase: JobPhase::Polling,
            job: Some(job),
            last_error: None,
        }
    }

    pub fn with_outcome(outcome: PollOutcome) -> Self {
        let (phase, job) = match outcome {
            PollOutcome::Continue(job) => (JobPhase::Polling, job),
            PollOutcome::Succeeded(job) => (JobPhase::Succeeded, job),
            PollOutcome::Failed(job) => (JobPhase::Failed, job),
        };
        Self {
            phase,
            job: Some(job),
            last_error: None,
        }
    }

    pub fn detached(&self) -> Self {
        Self {
            phase: JobPhase::Detached,
            ..self.clone()
        }
    }

    pub fn with_error(&self, message: impl Into<String>) -> Self {
        Self {
            last_error: Some(message.into()),
            ..self.clone()
        }
    }

    pub fn is_polling(&self) -> bool {
        self.phase == JobPhase::Polling
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.phase, JobPhase::Succeeded | JobPhase::Failed)
    }

    pub fn target(&self) -> Option<&str> {
        self.job
            .as_ref()
            .map(|job| job.target_repository_url.as_str())
    }
}
