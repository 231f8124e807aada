use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_MODEL_NAME: &str = "kling-v1-6";
pub const DEFAULT_MODE: &str = "pro";
pub const DEFAULT_DURATION: &str = "5";
pub const DEFAULT_CFG_SCALE: f32 = 0.5;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InputError {
    #[error("prompt is missing")]
    MissingPrompt,
    #[error("image payload is empty")]
    EmptyImage,
}

/// Fixed generation parameters sent with every job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub model_name: String,
    pub mode: String,
    pub duration: String,
    pub cfg_scale: f32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            model_name: DEFAULT_MODEL_NAME.to_string(),
            mode: DEFAULT_MODE.to_string(),
            duration: DEFAULT_DURATION.to_string(),
            cfg_scale: DEFAULT_CFG_SCALE,
        }
    }
}

/// One user request: the image to animate and what to do with it.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    source_id: String,
    image_bytes: Vec<u8>,
    prompt: String,
    params: GenerationParams,
}

impl GenerationRequest {
    /// `source_id` names the scratch file; the chat attachment's unique id fits well.
    pub fn new(
        source_id: impl Into<String>,
        image_bytes: Vec<u8>,
        prompt: Option<&str>,
        params: GenerationParams,
    ) -> Result<Self, InputError> {
        let prompt = normalize_prompt(prompt)?;
        if image_bytes.is_empty() {
            return Err(InputError::EmptyImage);
        }
        Ok(Self {
            source_id: source_id.into(),
            image_bytes,
            prompt,
            params,
        })
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn image_bytes(&self) -> &[u8] {
        &self.image_bytes
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn params(&self) -> &GenerationParams {
        &self.params
    }
}

/// Trims a caption into a prompt, rejecting blank ones.
pub fn normalize_prompt(caption: Option<&str>) -> Result<String, InputError> {
    match caption.map(str::trim) {
        Some(text) if !text.is_empty() => Ok(text.to_string()),
        _ => Err(InputError::MissingPrompt),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Succeeded { video_url: String },
    Failed { message: Option<String> },
    Unknown(String),
}

impl JobStatus {
    pub fn label(&self) -> &str {
        match self {
            Self::Pending => "pending",
            Self::Succeeded { .. } => "succeeded",
            Self::Failed { .. } => "failed",
            Self::Unknown(raw) => raw,
        }
    }
}

/// Snapshot of a remote task as reported by one status fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub task_id: TaskId,
    pub status: JobStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_caption_into_prompt() {
        assert_eq!(normalize_prompt(Some("  a cat dancing \n")).unwrap(), "a cat dancing");
    }

    #[test]
    fn rejects_missing_or_blank_caption() {
        assert_eq!(normalize_prompt(None), Err(InputError::MissingPrompt));
        assert_eq!(normalize_prompt(Some("   ")), Err(InputError::MissingPrompt));
    }

    #[test]
    fn request_requires_image_bytes() {
        let err = GenerationRequest::new("p1", vec![], Some("go"), GenerationParams::default())
            .unwrap_err();
        assert_eq!(err, InputError::EmptyImage);
    }

    #[test]
    fn default_params_match_service_defaults() {
        let params = GenerationParams::default();
        assert_eq!(params.model_name, "kling-v1-6");
        assert_eq!(params.mode, "pro");
        assert_eq!(params.duration, "5");
        assert_eq!(params.cfg_scale, 0.5);
    }

    #[test]
    fn status_labels_echo_raw_unknown_values() {
        assert_eq!(JobStatus::Pending.label(), "pending");
        assert_eq!(JobStatus::Failed { message: None }.label(), "failed");
        assert_eq!(JobStatus::Unknown("queued".to_string()).label(), "queued");
    }
}
