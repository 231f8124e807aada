use crate::config::Config;
use crate::schema::{GenerationRequest, Job, JobStatus, TaskId};
use crate::services::token::AuthToken;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const IMAGE2VIDEO_PATH: &str = "/v1/videos/image2video";

#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("failed to sign request token: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),
    #[error("create request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("service rejected job ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("create response has no task id: {0}")]
    MissingTaskId(String),
}

#[derive(Debug, Error)]
pub enum PollError {
    #[error("status request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("status request returned {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("failed to decode status response: {0}")]
    Decode(String),
    #[error("status response carried service error {code}: {message}")]
    Service { code: i64, message: String },
    #[error("task reported success without a video url")]
    MissingVideoUrl,
}

impl PollError {
    /// Whether the next tick may see a different answer.
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::MissingVideoUrl)
    }
}

#[async_trait::async_trait]
pub trait JobClient: Send + Sync {
    async fn submit(
        &self,
        request: &GenerationRequest,
        token: &AuthToken,
    ) -> Result<TaskId, SubmissionError>;
    async fn fetch_status(&self, task_id: &TaskId, token: &AuthToken) -> Result<Job, PollError>;
}

#[derive(Debug, Serialize)]
struct CreateTaskBody<'a> {
    model_name: &'a str,
    mode: &'a str,
    duration: &'a str,
    auto_prompt: bool,
    prompt: &'a str,
    image: String,
    cfg_scale: f32,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    message: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct CreateTaskData {
    #[serde(default)]
    task_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TaskData {
    #[serde(default)]
    task_status: Option<String>,
    #[serde(default)]
    task_status_msg: Option<String>,
    #[serde(default)]
    task_result: Option<TaskResult>,
}

#[derive(Debug, Default, Deserialize)]
struct TaskResult {
    #[serde(default)]
    video_url: Option<String>,
    #[serde(default)]
    videos: Vec<VideoEntry>,
}

#[derive(Debug, Deserialize)]
struct VideoEntry {
    #[serde(default)]
    url: Option<String>,
}

pub struct KlingClient {
    client: reqwest::Client,
    base_url: String,
}

impl KlingClient {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: config.kling_api_base.clone(),
        })
    }

    fn create_url(&self) -> String {
        format!("{}{IMAGE2VIDEO_PATH}", self.base_url)
    }

    fn status_url(&self, task_id: &TaskId) -> String {
        format!("{}{IMAGE2VIDEO_PATH}/{task_id}", self.base_url)
    }
}

#[async_trait::async_trait]
impl JobClient for KlingClient {
    async fn submit(
        &self,
        request: &GenerationRequest,
        token: &AuthToken,
    ) -> Result<TaskId, SubmissionError> {
        let body = build_create_body(request);
        tracing::debug!(
            prompt_len = request.prompt().len(),
            image_bytes = request.image_bytes().len(),
            model = %request.params().model_name,
            "kling: creating image2video task"
        );

        let response = self
            .client
            .post(self.create_url())
            .header("Authorization", format!("Bearer {}", token.bearer()))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(SubmissionError::Rejected {
                status: status.as_u16(),
                body: text,
            });
        }

        parse_task_id(&text)
    }

    async fn fetch_status(&self, task_id: &TaskId, token: &AuthToken) -> Result<Job, PollError> {
        let response = self
            .client
            .get(self.status_url(task_id))
            .header("Authorization", format!("Bearer {}", token.bearer()))
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(PollError::Rejected {
                status: status.as_u16(),
                body: text,
            });
        }

        parse_job(task_id, &text)
    }
}

fn build_create_body(request: &GenerationRequest) -> CreateTaskBody<'_> {
    let params = request.params();
    CreateTaskBody {
        model_name: &params.model_name,
        mode: &params.mode,
        duration: &params.duration,
        auto_prompt: false,
        prompt: request.prompt(),
        image: BASE64.encode(request.image_bytes()),
        cfg_scale: params.cfg_scale,
    }
}

fn parse_task_id(body: &str) -> Result<TaskId, SubmissionError> {
    let envelope: Envelope<CreateTaskData> = serde_json::from_str(body)
        .map_err(|e| SubmissionError::MissingTaskId(format!("{e}; raw: {body}")))?;

    match envelope.data.and_then(|d| d.task_id) {
        Some(id) if !id.is_empty() => Ok(TaskId::new(id)),
        _ => Err(SubmissionError::MissingTaskId(format!(
            "code={:?} message={:?}",
            envelope.code, envelope.message
        ))),
    }
}

fn parse_job(task_id: &TaskId, body: &str) -> Result<Job, PollError> {
    let envelope: Envelope<TaskData> =
        serde_json::from_str(body).map_err(|e| PollError::Decode(format!("{e}; raw: {body}")))?;

    let Some(data) = envelope.data else {
        if let Some(code) = envelope.code
            && code != 0
        {
            return Err(PollError::Service {
                code,
                message: envelope.message.unwrap_or_default(),
            });
        }
        // no data yet is indistinguishable from a task still warming up
        return Ok(Job {
            task_id: task_id.clone(),
            status: JobStatus::Unknown(String::new()),
        });
    };

    let status = match data.task_status.as_deref() {
        Some("submitted" | "processing") => JobStatus::Pending,
        Some("succeed" | "succeeded") => {
            let video_url = data
                .task_result
                .as_ref()
                .and_then(extract_video_url)
                .ok_or(PollError::MissingVideoUrl)?;
            JobStatus::Succeeded { video_url }
        }
        Some("failed") => JobStatus::Failed {
            message: data.task_status_msg.filter(|m| !m.is_empty()),
        },
        other => JobStatus::Unknown(other.unwrap_or_default().to_string()),
    };

    Ok(Job {
        task_id: task_id.clone(),
        status,
    })
}

/// Primary `video_url`, else the first entry of `videos`.
fn extract_video_url(result: &TaskResult) -> Option<String> {
    let non_empty = |url: &Option<String>| url.as_deref().filter(|u| !u.is_empty()).map(str::to_string);
    non_empty(&result.video_url).or_else(|| result.videos.first().and_then(|v| non_empty(&v.url)))
}
