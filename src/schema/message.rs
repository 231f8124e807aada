use serde::{Deserialize, Serialize};

/// A photo message received from the chat, reduced to what a generation run needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingPhoto {
    pub chat_id: i64,
    pub sender_id: i64,
    /// Transport handle used to resolve a download URL.
    pub file_id: String,
    /// Stable across bots; used to name the scratch file.
    pub file_unique_id: String,
    pub caption: Option<String>,
}
