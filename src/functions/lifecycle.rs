use crate::config::{Config, KlingCredentials, PollPolicy};
use crate::schema::{GenerationRequest, JobStatus, Outcome, TaskId};
use crate::services::token::{AuthToken, mint_token};
use crate::services::{JobClient, ScratchFile, SubmissionError};
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

/// Remint the run's token when it has less than this many seconds left.
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

/// Drives one generation request from submission to a single [`Outcome`].
///
/// A run submits at most one remote job. Status checks happen on a fixed
/// interval, each preceded by the wait, until the task reaches a terminal
/// status or the attempt budget is spent. A failed status check is retried on
/// the next tick and still consumes that tick, so the overall time budget
/// holds. The input image lives in a scratch file for the whole run and is
/// removed on every exit path.
pub struct LifecycleController {
    client: Arc<dyn JobClient>,
    credentials: KlingCredentials,
    policy: PollPolicy,
    scratch_dir: PathBuf,
}

impl LifecycleController {
    pub fn new(
        client: Arc<dyn JobClient>,
        credentials: KlingCredentials,
        policy: PollPolicy,
        scratch_dir: PathBuf,
    ) -> Self {
        Self {
            client,
            credentials,
            policy,
            scratch_dir,
        }
    }

    pub fn from_config(config: &Config, client: Arc<dyn JobClient>) -> Self {
        Self::new(
            client,
            config.credentials.clone(),
            config.poll,
            config.scratch_dir.clone(),
        )
    }

    pub async fn run(&self, request: GenerationRequest) -> Outcome {
        let run_id = Uuid::new_v4();

        let scratch = match ScratchFile::create(
            &self.scratch_dir,
            request.source_id(),
            request.image_bytes(),
        )
        .await
        {
            Ok(scratch) => scratch,
            Err(e) => {
                tracing::error!(%run_id, stage = "scratch", error = %e, "lifecycle: failed to stage input image");
                return Outcome::Errored {
                    task_id: None,
                    reason: format!("failed to stage input image: {e}"),
                };
            }
        };
        tracing::debug!(%run_id, path = %scratch.path().display(), "lifecycle: input image staged");

        let outcome = self.drive(run_id, &request).await;

        match scratch.remove() {
            Ok(path) => tracing::debug!(%run_id, path = %path.display(), "lifecycle: scratch file removed"),
            Err(e) => tracing::warn!(%run_id, error = %e, "lifecycle: failed to remove scratch file"),
        }

        tracing::info!(
            %run_id,
            outcome = outcome.kind(),
            task_id = outcome.task_id().map(TaskId::as_str),
            "lifecycle: run finished"
        );
        outcome
    }

    async fn drive(&self, run_id: Uuid, request: &GenerationRequest) -> Outcome {
        let (mut token, task_id) = match self.submit(request).await {
            Ok(submitted) => submitted,
            Err(e) => {
                tracing::error!(%run_id, stage = "submit", error = %e, "lifecycle: job could not be created");
                return Outcome::SubmissionFailed {
                    reason: e.to_string(),
                };
            }
        };
        tracing::info!(%run_id, task_id = %task_id, "lifecycle: job submitted, polling");

        self.poll(run_id, &task_id, &mut token).await
    }

    async fn submit(&self, request: &GenerationRequest) -> Result<(AuthToken, TaskId), SubmissionError> {
        let token = mint_token(&self.credentials)?;
        let task_id = self.client.submit(request, &token).await?;
        Ok((token, task_id))
    }

    async fn poll(&self, run_id: Uuid, task_id: &TaskId, token: &mut AuthToken) -> Outcome {
        for attempt in 1..=self.policy.max_attempts {
            tokio::time::sleep(self.policy.interval).await;
            self.refresh_token(run_id, token);

            let job = match self.client.fetch_status(task_id, token).await {
                Ok(job) => job,
                Err(e) if e.is_transient() => {
                    tracing::warn!(
                        %run_id,
                        task_id = %task_id,
                        stage = "poll",
                        attempt,
                        error = %e,
                        "lifecycle: status check failed, retrying on next tick"
                    );
                    continue;
                }
                Err(e) => {
                    tracing::error!(%run_id, task_id = %task_id, stage = "poll", attempt, error = %e, "lifecycle: status check unrecoverable");
                    return Outcome::Errored {
                        task_id: Some(task_id.clone()),
                        reason: e.to_string(),
                    };
                }
            };

            match job.status {
                JobStatus::Succeeded { video_url } => {
                    tracing::info!(%run_id, task_id = %task_id, attempt, "lifecycle: job succeeded");
                    return Outcome::Succeeded {
                        task_id: task_id.clone(),
                        video_url,
                    };
                }
                JobStatus::Failed { message } => {
                    tracing::warn!(
                        %run_id,
                        task_id = %task_id,
                        attempt,
                        message = message.as_deref().unwrap_or(""),
                        "lifecycle: remote generation failed"
                    );
                    return Outcome::Failed {
                        task_id: task_id.clone(),
                        message,
                    };
                }
                ref status @ (JobStatus::Pending | JobStatus::Unknown(_)) => {
                    tracing::debug!(%run_id, task_id = %task_id, attempt, status = status.label(), "lifecycle: still running");
                }
            }
        }

        tracing::warn!(
            %run_id,
            task_id = %task_id,
            attempts = self.policy.max_attempts,
            budget_secs = self.policy.budget().as_secs(),
            "lifecycle: job did not finish within budget"
        );
        Outcome::TimedOut {
            task_id: task_id.clone(),
            attempts: self.policy.max_attempts,
        }
    }

    /// Long custom budgets can outlive the token minted at submission.
    fn refresh_token(&self, run_id: Uuid, token: &mut AuthToken) {
        let now = chrono::Utc::now().timestamp();
        if token.expires_at - now > TOKEN_REFRESH_MARGIN_SECS {
            return;
        }
        match mint_token(&self.credentials) {
            Ok(fresh) => *token = fresh,
            Err(e) => tracing::warn!(%run_id, error = %e, "lifecycle: failed to refresh token"),
        }
    }
}
