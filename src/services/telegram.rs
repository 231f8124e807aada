use crate::config::Config;
use crate::services::transport::{ChatTransport, FileResolver};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Server-side long-poll window for `getUpdates`.
pub const LONG_POLL_SECS: u64 = 30;
const API_TIMEOUT: Duration = Duration::from_secs(LONG_POLL_SECS + 15);

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub chat: Chat,
    #[serde(default)]
    pub from: Option<User>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub photo: Vec<PhotoSize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PhotoSize {
    pub file_id: String,
    pub file_unique_id: String,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub file_size: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct File {
    #[serde(default)]
    file_path: Option<String>,
}

#[derive(Serialize)]
struct GetUpdates {
    offset: i64,
    timeout: u64,
    allowed_updates: [&'static str; 1],
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: i64,
    text: &'a str,
}

#[derive(Serialize)]
struct SendVideo<'a> {
    chat_id: i64,
    video: &'a str,
    caption: &'a str,
}

#[derive(Serialize)]
struct GetFile<'a> {
    file_id: &'a str,
}

/// Minimal Bot API client: long polling, text and video replies, file lookup.
pub struct TelegramClient {
    client: reqwest::Client,
    download_client: reqwest::Client,
    api_base: String,
    token: String,
}

impl TelegramClient {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(API_TIMEOUT).build()?;
        // image downloads share the generous budget of the generation calls
        let download_client = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()?;
        Ok(Self {
            client,
            download_client,
            api_base: config.telegram_api_base.clone(),
            token: config.bot_token.clone(),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.api_base, self.token)
    }

    fn file_download_url(&self, file_path: &str) -> String {
        format!("{}/file/bot{}/{file_path}", self.api_base, self.token)
    }

    async fn call<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        method: &str,
        body: &B,
    ) -> anyhow::Result<T> {
        let response = self
            .client
            .post(self.method_url(method))
            .json(body)
            .send()
            .await
            // reqwest errors embed the url, which carries the bot token
            .map_err(|e| anyhow::anyhow!("telegram {method} request failed: {}", e.without_url()))?;

        let status = response.status();
        let parsed: ApiResponse<T> = response
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("telegram {method} returned undecodable body ({status}): {}", e.without_url()))?;

        if !parsed.ok {
            anyhow::bail!(
                "telegram {method} failed ({status}): {}",
                parsed.description.unwrap_or_else(|| "no description".to_string())
            );
        }
        parsed
            .result
            .ok_or_else(|| anyhow::anyhow!("telegram {method} returned no result"))
    }

    pub async fn get_updates(&self, offset: i64) -> anyhow::Result<Vec<Update>> {
        self.call(
            "getUpdates",
            &GetUpdates {
                offset,
                timeout: LONG_POLL_SECS,
                allowed_updates: ["message"],
            },
        )
        .await
    }
}

#[async_trait::async_trait]
impl ChatTransport for TelegramClient {
    async fn send_text(&self, chat_id: i64, text: &str) -> anyhow::Result<()> {
        let _: serde_json::Value = self.call("sendMessage", &SendMessage { chat_id, text }).await?;
        Ok(())
    }

    async fn send_video(&self, chat_id: i64, video_url: &str, caption: &str) -> anyhow::Result<()> {
        let _: serde_json::Value = self
            .call(
                "sendVideo",
                &SendVideo {
                    chat_id,
                    video: video_url,
                    caption,
                },
            )
            .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl FileResolver for TelegramClient {
    async fn file_url(&self, file_ref: &str) -> anyhow::Result<String> {
        let file: File = self.call("getFile", &GetFile { file_id: file_ref }).await?;
        let path = file
            .file_path
            .ok_or_else(|| anyhow::anyhow!("telegram file {file_ref} has no download path"))?;
        Ok(self.file_download_url(&path))
    }

    async fn download(&self, url: &str) -> anyhow::Result<Vec<u8>> {
        let response = self
            .download_client
            .get(url)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("image download failed: {}", e.without_url()))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("image download returned {status}");
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| anyhow::anyhow!("image download interrupted: {}", e.without_url()))?;
        Ok(bytes.to_vec())
    }
}

/// Largest rendition of a photo; Telegram lists sizes smallest first.
pub fn largest_photo(sizes: &[PhotoSize]) -> Option<&PhotoSize> {
    sizes
        .iter()
        .max_by_key(|p| (u64::from(p.width) * u64::from(p.height), p.file_size.unwrap_or(0)))
}
