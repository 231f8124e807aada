/// Outbound side of the chat platform.
#[async_trait::async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send_text(&self, chat_id: i64, text: &str) -> anyhow::Result<()>;
    async fn send_video(&self, chat_id: i64, video_url: &str, caption: &str) -> anyhow::Result<()>;
}

/// Turns a chat attachment reference into image bytes.
#[async_trait::async_trait]
pub trait FileResolver: Send + Sync {
    async fn file_url(&self, file_ref: &str) -> anyhow::Result<String>;
    async fn download(&self, url: &str) -> anyhow::Result<Vec<u8>>;
}
