pub mod client;
pub mod decoder;
pub mod interceptor;
pub mod notify;
pub mod stream;
pub mod traits;
pub mod types;

pub use client::ApiClient;
pub use decoder::{ChunkDecoder, Decoded};
pub use notify::{ConsoleNotifier, LogNotifier, Notifier};
pub use traits::{ChatApi, FeedbackApi};
pub use types::{ApiError, ChatCompletionRequest, StreamFrame};
