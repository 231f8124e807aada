use crate::schema::TaskId;

/// Final result of one lifecycle run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Succeeded {
        task_id: TaskId,
        video_url: String,
    },
    Failed {
        task_id: TaskId,
        message: Option<String>,
    },
    TimedOut {
        task_id: TaskId,
        attempts: u32,
    },
    SubmissionFailed {
        reason: String,
    },
    Errored {
        task_id: Option<TaskId>,
        reason: String,
    },
}

impl Outcome {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Succeeded { .. } => "succeeded",
            Self::Failed { .. } => "failed",
            Self::TimedOut { .. } => "timed_out",
            Self::SubmissionFailed { .. } => "submission_failed",
            Self::Errored { .. } => "errored",
        }
    }

    pub fn task_id(&self) -> Option<&TaskId> {
        match self {
            Self::Succeeded { task_id, .. }
            | Self::Failed { task_id, .. }
            | Self::TimedOut { task_id, .. } => Some(task_id),
            Self::Errored { task_id, .. } => task_id.as_ref(),
            Self::SubmissionFailed { .. } => None,
        }
    }
}
