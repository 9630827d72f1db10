use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::types::{ApiError, ChatCompletionRequest, StreamFrame};
use crate::models::{CancelFeedbackParams, FeedbackAddParams, FeedbackReason, FeedbackRecord};

#[async_trait]
pub trait ChatApi: Send + Sync {
    /// Open the completion stream and forward its events to `tx` until it
    /// ends, fails or `cancel` fires.
    async fn stream_chat(
        &self,
        request: ChatCompletionRequest,
        tx: mpsc::Sender<StreamFrame>,
        cancel: CancellationToken,
    ) -> Result<(), ApiError>;

    /// Ask the server to stop generating the given round.
    async fn stop_topic(&self, conv_uid: &str, round_index: i64) -> Result<(), ApiError>;
}

#[async_trait]
pub trait FeedbackApi: Send + Sync {
    async fn feedback_reasons(&self) -> Result<Vec<FeedbackReason>, ApiError>;

    /// `None` when the server accepted the call but returned no record.
    async fn add_feedback(
        &self,
        params: FeedbackAddParams,
    ) -> Result<Option<FeedbackRecord>, ApiError>;

    /// Whether the server confirmed the cancellation.
    async fn cancel_feedback(&self, params: CancelFeedbackParams) -> Result<bool, ApiError>;
}
