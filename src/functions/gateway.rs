use crate::functions::delivery::{self, ACKNOWLEDGED, GREETING, MISSING_PROMPT};
use crate::functions::lifecycle::LifecycleController;
use crate::schema::{GenerationParams, GenerationRequest, IncomingPhoto, Outcome, normalize_prompt};
use crate::services::telegram::{Message, TelegramClient, largest_photo};
use crate::services::{ChatTransport, FileResolver};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinSet};

const UPDATE_RETRY_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
enum Inbound {
    Start { chat_id: i64 },
    Photo(IncomingPhoto),
    Ignored,
}

fn classify(message: &Message) -> Inbound {
    if message.from.as_ref().is_some_and(|u| u.is_bot) {
        return Inbound::Ignored;
    }

    if let Some(text) = message.text.as_deref()
        && is_start_command(text)
    {
        return Inbound::Start {
            chat_id: message.chat.id,
        };
    }

    match largest_photo(&message.photo) {
        Some(photo) => Inbound::Photo(IncomingPhoto {
            chat_id: message.chat.id,
            sender_id: message.from.as_ref().map_or(message.chat.id, |u| u.id),
            file_id: photo.file_id.clone(),
            file_unique_id: photo.file_unique_id.clone(),
            caption: message.caption.clone(),
        }),
        None => Inbound::Ignored,
    }
}

fn is_start_command(text: &str) -> bool {
    let command = text.split_whitespace().next().unwrap_or_default();
    // group chats address commands as /start@botname
    command == "/start" || command.starts_with("/start@")
}

fn next_offset(current: i64, update_id: i64) -> i64 {
    current.max(update_id + 1)
}

/// What a finished run reports back to the gateway.
#[derive(Debug)]
pub struct RunReport {
    pub chat_id: i64,
    pub outcome: Outcome,
}

/// Routes inbound messages and supervises the lifecycle runs they start.
pub struct Dispatcher {
    transport: Arc<dyn ChatTransport>,
    files: Arc<dyn FileResolver>,
    lifecycle: Arc<LifecycleController>,
    params: GenerationParams,
    runs: JoinSet<RunReport>,
}

impl Dispatcher {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        files: Arc<dyn FileResolver>,
        lifecycle: Arc<LifecycleController>,
        params: GenerationParams,
    ) -> Self {
        Self {
            transport,
            files,
            lifecycle,
            params,
            runs: JoinSet::new(),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.runs.len()
    }

    pub async fn handle_message(&mut self, message: &Message) -> anyhow::Result<()> {
        match classify(message) {
            Inbound::Start { chat_id } => {
                self.transport.send_text(chat_id, GREETING).await?;
            }
            Inbound::Photo(photo) => self.handle_photo(photo).await?,
            Inbound::Ignored => {
                tracing::debug!(chat_id = message.chat.id, "gateway: skipping non-photo message");
            }
        }
        Ok(())
    }

    async fn handle_photo(&mut self, photo: IncomingPhoto) -> anyhow::Result<()> {
        let prompt = match normalize_prompt(photo.caption.as_deref()) {
            Ok(prompt) => prompt,
            Err(e) => {
                tracing::info!(chat_id = photo.chat_id, error = %e, "gateway: photo rejected, asking for a prompt");
                self.transport.send_text(photo.chat_id, MISSING_PROMPT).await?;
                return Ok(());
            }
        };

        if let Err(e) = self.transport.send_text(photo.chat_id, ACKNOWLEDGED).await {
            tracing::warn!(chat_id = photo.chat_id, error = %e, "gateway: failed to acknowledge photo");
        }

        tracing::info!(
            chat_id = photo.chat_id,
            sender_id = photo.sender_id,
            file_unique_id = %photo.file_unique_id,
            "gateway: starting generation run"
        );

        let transport = self.transport.clone();
        let files = self.files.clone();
        let lifecycle = self.lifecycle.clone();
        let params = self.params.clone();
        self.runs.spawn(async move {
            let chat_id = photo.chat_id;
            let outcome = generate(files.as_ref(), lifecycle.as_ref(), params, photo, prompt).await;
            if let Err(e) = delivery::deliver_outcome(transport.as_ref(), chat_id, &outcome).await {
                tracing::error!(chat_id, outcome = outcome.kind(), error = %e, "gateway: failed to deliver outcome");
            }
            RunReport { chat_id, outcome }
        });
        Ok(())
    }

    /// Waits for the next run to finish. Returns `None` when nothing is in flight.
    pub async fn next_finished(&mut self) -> Option<RunReport> {
        loop {
            let result = self.runs.join_next().await?;
            if let Some(report) = record(result) {
                return Some(report);
            }
        }
    }

    /// Aborts whatever is still running; their scratch files go with them.
    pub async fn shutdown(mut self) {
        let pending = self.runs.len();
        if pending > 0 {
            tracing::warn!(pending, "gateway: aborting in-flight runs");
        }
        self.runs.abort_all();
        while let Some(result) = self.runs.join_next().await {
            record(result);
        }
    }
}

fn record(result: Result<RunReport, JoinError>) -> Option<RunReport> {
    match result {
        Ok(report) => {
            tracing::info!(
                chat_id = report.chat_id,
                outcome = report.outcome.kind(),
                task_id = report.outcome.task_id().map(|t| t.as_str()),
                "gateway: run finished"
            );
            Some(report)
        }
        Err(e) if e.is_cancelled() => {
            tracing::debug!("gateway: run cancelled");
            None
        }
        Err(e) => {
            tracing::error!(error = %e, "gateway: run panicked");
            None
        }
    }
}

async fn generate(
    files: &dyn FileResolver,
    lifecycle: &LifecycleController,
    params: GenerationParams,
    photo: IncomingPhoto,
    prompt: String,
) -> Outcome {
    let image = match fetch_image(files, &photo.file_id).await {
        Ok(image) => image,
        Err(e) => {
            tracing::error!(chat_id = photo.chat_id, stage = "download", error = %e, "gateway: failed to fetch photo");
            return Outcome::Errored {
                task_id: None,
                reason: format!("failed to fetch photo: {e}"),
            };
        }
    };

    match GenerationRequest::new(photo.file_unique_id, image, Some(&prompt), params) {
        Ok(request) => lifecycle.run(request).await,
        Err(e) => {
            tracing::error!(chat_id = photo.chat_id, stage = "download", error = %e, "gateway: unusable photo");
            Outcome::Errored {
                task_id: None,
                reason: e.to_string(),
            }
        }
    }
}

async fn fetch_image(files: &dyn FileResolver, file_id: &str) -> anyhow::Result<Vec<u8>> {
    let url = files.file_url(file_id).await?;
    let bytes = files.download(&url).await?;
    tracing::debug!(bytes = bytes.len(), "gateway: photo downloaded");
    Ok(bytes)
}

/// Long-polls the bot API until `shutdown` resolves.
pub async fn run_gateway(
    bot: Arc<TelegramClient>,
    mut dispatcher: Dispatcher,
    shutdown: impl Future<Output = ()>,
) -> anyhow::Result<()> {
    tokio::pin!(shutdown);
    let mut offset = 0i64;
    tracing::info!("gateway: polling for updates");

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            Some(_report) = dispatcher.next_finished(), if dispatcher.in_flight() > 0 => {}
            updates = bot.get_updates(offset) => match updates {
                Ok(updates) => {
                    for update in updates {
                        offset = next_offset(offset, update.update_id);
                        let Some(message) = update.message else { continue };
                        if let Err(e) = dispatcher.handle_message(&message).await {
                            tracing::error!(chat_id = message.chat.id, error = %e, "gateway: failed to handle message");
                        }
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "gateway: failed to fetch updates");
                    tokio::select! {
                        _ = &mut shutdown => break,
                        _ = tokio::time::sleep(UPDATE_RETRY_DELAY) => {}
                    }
                }
            },
        }
    }

    tracing::info!("gateway: shutting down");
    dispatcher.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, KlingCredentials, PollPolicy};
    use crate::functions::delivery::tests::{RecordingTransport, Sent};
    use crate::functions::delivery::{ERRORED, VIDEO_CAPTION};
    use crate::schema::{Job, JobStatus, TaskId};
    use crate::services::telegram::{Chat, PhotoSize, User};
    use crate::services::token::AuthToken;
    use crate::services::{JobClient, PollError, SubmissionError};
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::Notify;

    #[derive(Default)]
    struct InstantClient {
        submits: AtomicU32,
        fetches: AtomicU32,
        /// Park every status check forever after signalling `polling`.
        hold: bool,
        polling: Notify,
    }

    #[async_trait::async_trait]
    impl JobClient for InstantClient {
        async fn submit(
            &self,
            request: &GenerationRequest,
            _token: &AuthToken,
        ) -> Result<TaskId, SubmissionError> {
            assert_eq!(request.prompt(), "make it move");
            self.submits.fetch_add(1, Ordering::SeqCst);
            Ok(TaskId::new("task-1"))
        }

        async fn fetch_status(&self, task_id: &TaskId, _token: &AuthToken) -> Result<Job, PollError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.hold {
                self.polling.notify_one();
                return std::future::pending().await;
            }
            Ok(Job {
                task_id: task_id.clone(),
                status: JobStatus::Succeeded {
                    video_url: "https://cdn/out.mp4".to_string(),
                },
            })
        }
    }

    struct FakeFiles {
        fail: bool,
    }

    #[async_trait::async_trait]
    impl FileResolver for FakeFiles {
        async fn file_url(&self, file_ref: &str) -> anyhow::Result<String> {
            Ok(format!("https://files/{file_ref}.jpg"))
        }

        async fn download(&self, url: &str) -> anyhow::Result<Vec<u8>> {
            if self.fail {
                anyhow::bail!("image download returned 404 Not Found");
            }
            assert_eq!(url, "https://files/big.jpg");
            Ok(vec![0xff, 0xd8, 0xff])
        }
    }

    struct Harness {
        dispatcher: Dispatcher,
        transport: Arc<RecordingTransport>,
        client: Arc<InstantClient>,
        _scratch: tempfile::TempDir,
    }

    fn harness(fail_download: bool) -> Harness {
        harness_with(fail_download, InstantClient::default())
    }

    fn harness_with(fail_download: bool, client: InstantClient) -> Harness {
        let scratch = tempfile::tempdir().unwrap();
        let transport = Arc::new(RecordingTransport::default());
        let client = Arc::new(client);
        let lifecycle = Arc::new(LifecycleController::new(
            client.clone(),
            KlingCredentials {
                access_key: "ak".to_string(),
                secret_key: "sk".to_string(),
            },
            PollPolicy {
                interval: Duration::from_millis(1),
                max_attempts: 3,
            },
            scratch.path().to_path_buf(),
        ));
        let dispatcher = Dispatcher::new(
            transport.clone(),
            Arc::new(FakeFiles {
                fail: fail_download,
            }),
            lifecycle,
            GenerationParams::default(),
        );
        Harness {
            dispatcher,
            transport,
            client,
            _scratch: scratch,
        }
    }

    fn photo_message(caption: Option<&str>) -> Message {
        Message {
            chat: Chat { id: 42 },
            from: Some(User {
                id: 7,
                is_bot: false,
            }),
            text: None,
            caption: caption.map(str::to_string),
            photo: vec![
                PhotoSize {
                    file_id: "small".to_string(),
                    file_unique_id: "u-small".to_string(),
                    width: 90,
                    height: 90,
                    file_size: Some(1_000),
                },
                PhotoSize {
                    file_id: "big".to_string(),
                    file_unique_id: "u-big".to_string(),
                    width: 1280,
                    height: 960,
                    file_size: Some(90_000),
                },
            ],
        }
    }

    fn text_message(text: &str) -> Message {
        Message {
            text: Some(text.to_string()),
            caption: None,
            photo: vec![],
            ..photo_message(None)
        }
    }

    #[test]
    fn classifies_start_command() {
        assert_eq!(classify(&text_message("/start")), Inbound::Start { chat_id: 42 });
        assert_eq!(
            classify(&text_message("/start@kling_bot payload")),
            Inbound::Start { chat_id: 42 }
        );
        assert_eq!(classify(&text_message("/startover")), Inbound::Ignored);
        assert_eq!(classify(&text_message("hello")), Inbound::Ignored);
    }

    #[test]
    fn classifies_photo_using_largest_size() {
        let Inbound::Photo(photo) = classify(&photo_message(Some(" dance "))) else {
            panic!("expected photo");
        };
        assert_eq!(photo.chat_id, 42);
        assert_eq!(photo.sender_id, 7);
        assert_eq!(photo.file_id, "big");
        assert_eq!(photo.file_unique_id, "u-big");
        assert_eq!(photo.caption.as_deref(), Some(" dance "));
    }

    #[test]
    fn ignores_messages_from_bots() {
        let mut message = photo_message(Some("dance"));
        message.from = Some(User { id: 9, is_bot: true });
        assert_eq!(classify(&message), Inbound::Ignored);
    }

    #[test]
    fn offset_moves_past_latest_update() {
        assert_eq!(next_offset(0, 10), 11);
        assert_eq!(next_offset(12, 10), 12);
    }

    #[tokio::test]
    async fn start_command_replies_with_greeting() {
        let mut h = harness(false);
        h.dispatcher.handle_message(&text_message("/start")).await.unwrap();
        assert_eq!(h.transport.sent(), vec![Sent::Text(42, GREETING.to_string())]);
    }

    #[tokio::test]
    async fn missing_caption_asks_for_prompt_without_submitting() {
        let mut h = harness(false);
        h.dispatcher.handle_message(&photo_message(None)).await.unwrap();
        h.dispatcher.handle_message(&photo_message(Some("   "))).await.unwrap();

        assert_eq!(h.dispatcher.in_flight(), 0);
        assert_eq!(h.client.submits.load(Ordering::SeqCst), 0);
        assert_eq!(
            h.transport.sent(),
            vec![
                Sent::Text(42, MISSING_PROMPT.to_string()),
                Sent::Text(42, MISSING_PROMPT.to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn photo_with_caption_is_acknowledged_then_delivered() {
        let mut h = harness(false);
        h.dispatcher
            .handle_message(&photo_message(Some("  make it move ")))
            .await
            .unwrap();
        assert_eq!(h.transport.sent(), vec![Sent::Text(42, ACKNOWLEDGED.to_string())]);
        assert_eq!(h.dispatcher.in_flight(), 1);

        let report = h.dispatcher.next_finished().await.unwrap();
        assert_eq!(report.chat_id, 42);
        assert!(matches!(report.outcome, Outcome::Succeeded { ref video_url, .. } if video_url == "https://cdn/out.mp4"));
        assert_eq!(h.client.submits.load(Ordering::SeqCst), 1);
        assert_eq!(h.client.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(
            h.transport.sent(),
            vec![
                Sent::Text(42, ACKNOWLEDGED.to_string()),
                Sent::Video(42, "https://cdn/out.mp4".to_string(), VIDEO_CAPTION.to_string()),
            ]
        );
        assert!(h.dispatcher.next_finished().await.is_none());
    }

    #[tokio::test]
    async fn download_failure_reports_error_without_submitting() {
        let mut h = harness(true);
        h.dispatcher
            .handle_message(&photo_message(Some("make it move")))
            .await
            .unwrap();

        let report = h.dispatcher.next_finished().await.unwrap();
        assert!(matches!(report.outcome, Outcome::Errored { task_id: None, .. }));
        assert_eq!(h.client.submits.load(Ordering::SeqCst), 0);
        assert_eq!(h.transport.sent().last(), Some(&Sent::Text(42, ERRORED.to_string())));
    }

    #[tokio::test]
    async fn shutdown_aborts_in_flight_runs() {
        let Harness {
            mut dispatcher,
            transport,
            client,
            _scratch: scratch,
        } = harness_with(
            false,
            InstantClient {
                hold: true,
                ..Default::default()
            },
        );
        dispatcher
            .handle_message(&photo_message(Some("make it move")))
            .await
            .unwrap();
        assert_eq!(dispatcher.in_flight(), 1);

        client.polling.notified().await;
        assert_eq!(client.submits.load(Ordering::SeqCst), 1);
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 1);

        dispatcher.shutdown().await;

        assert_eq!(transport.sent(), vec![Sent::Text(42, ACKNOWLEDGED.to_string())]);
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn shutdown_interrupts_update_retry_delay() {
        let config = Config::from_lookup(|key: &str| match key {
            "TELEGRAM_BOT_TOKEN" => Some("123:abc".to_string()),
            "KLING_ACCESS_KEY" => Some("ak".to_string()),
            "KLING_SECRET_KEY" => Some("sk".to_string()),
            // nothing listens here, so every getUpdates fails
            "TELEGRAM_API_BASE" => Some("http://127.0.0.1:1".to_string()),
            _ => None,
        })
        .unwrap();
        let bot = Arc::new(TelegramClient::new(&config).unwrap());
        let Harness { dispatcher, .. } = harness(false);

        let started = tokio::time::Instant::now();
        let gateway = run_gateway(
            bot,
            dispatcher,
            tokio::time::sleep(Duration::from_millis(200)),
        );
        tokio::time::timeout(UPDATE_RETRY_DELAY - Duration::from_secs(2), gateway)
            .await
            .expect("gateway should stop without waiting out the retry delay")
            .unwrap();
        assert!(started.elapsed() < UPDATE_RETRY_DELAY);
    }
}
