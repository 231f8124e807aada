use crate::schema::Outcome;
use crate::services::ChatTransport;

pub const GREETING: &str = "👋 Send me a photo with a caption and I'll turn it into a video with Kling AI.";
pub const MISSING_PROMPT: &str = "Add a text prompt to the photo caption.";
pub const ACKNOWLEDGED: &str = "🔄 Generating your video, please wait…";
pub const VIDEO_CAPTION: &str = "✅ Done!";
pub const SUBMISSION_FAILED: &str = "❌ Couldn't create a generation job on the Kling AI side.";
pub const REMOTE_FAILED: &str = "❌ Kling AI reported the generation as failed. Try a different prompt.";
pub const TIMED_OUT: &str = "⚠️ The video didn't finish generating within the time budget. Try again later.";
pub const ERRORED: &str = "❌ Something went wrong while generating the video.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply<'a> {
    Text(&'static str),
    Video { url: &'a str, caption: &'static str },
}

/// User-facing message for a finished run. Internal reasons stay in the logs.
pub fn reply_for(outcome: &Outcome) -> Reply<'_> {
    match outcome {
        Outcome::Succeeded { video_url, .. } => Reply::Video {
            url: video_url,
            caption: VIDEO_CAPTION,
        },
        Outcome::Failed { .. } => Reply::Text(REMOTE_FAILED),
        Outcome::TimedOut { .. } => Reply::Text(TIMED_OUT),
        Outcome::SubmissionFailed { .. } => Reply::Text(SUBMISSION_FAILED),
        Outcome::Errored { .. } => Reply::Text(ERRORED),
    }
}

pub async fn deliver_outcome(
    transport: &dyn ChatTransport,
    chat_id: i64,
    outcome: &Outcome,
) -> anyhow::Result<()> {
    match reply_for(outcome) {
        Reply::Video { url, caption } => {
            if let Err(e) = transport.send_video(chat_id, url, caption).await {
                // the link alone is still useful when the upload-by-url is refused
                tracing::warn!(chat_id, error = %e, "delivery: sending video failed, falling back to link");
                transport
                    .send_text(chat_id, &format!("{caption} {url}"))
                    .await?;
            }
        }
        Reply::Text(text) => transport.send_text(chat_id, text).await?,
    }
    tracing::info!(chat_id, outcome = outcome.kind(), "delivery: outcome sent");
    Ok(())
}
