pub mod kling_client;
pub mod scratch;
pub mod telegram;
pub mod token;
pub mod transport;

pub use kling_client::*;
pub use scratch::*;
pub use telegram::TelegramClient;
pub use transport::*;
