use crate::api::{ApiError, FeedbackApi};
use crate::models::{CancelFeedbackParams, FeedbackAddParams, FeedbackReason, FeedbackType, Turn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeedbackStatus {
    #[default]
    None,
    Like,
    Unlike,
}

impl From<FeedbackType> for FeedbackStatus {
    fn from(kind: FeedbackType) -> Self {
        match kind {
            FeedbackType::Like => FeedbackStatus::Like,
            FeedbackType::Unlike => FeedbackStatus::Unlike,
        }
    }
}

/// Outcome of pressing "dislike".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DislikeStep {
    /// Pick zero or more of these, add a remark, then `submit_dislike`.
    ChooseReasons(Vec<FeedbackReason>),
    /// An existing dislike was withdrawn (or the withdrawal was refused).
    Cancelled(FeedbackStatus),
}

/// Like/dislike state of one assistant turn, keyed by `(conv_uid, order)`.
#[derive(Debug, Clone)]
pub struct FeedbackTracker {
    conv_uid: String,
    message_id: String,
    status: FeedbackStatus,
}

impl FeedbackTracker {
    pub fn new(conv_uid: impl Into<String>, order: i64, status: FeedbackStatus) -> Self {
        Self {
            conv_uid: conv_uid.into(),
            message_id: order.to_string(),
            status,
        }
    }

    /// Tracker seeded with whatever feedback the server already holds for `turn`.
    pub fn for_turn(conv_uid: impl Into<String>, turn: &Turn) -> Self {
        let status = turn
            .feedback_type()
            .and_then(FeedbackType::from_str)
            .map(FeedbackStatus::from)
            .unwrap_or_default();
        Self::new(conv_uid, turn.order, status)
    }

    pub fn status(&self) -> FeedbackStatus {
        self.status
    }

    pub async fn toggle_like(&mut self, api: &dyn FeedbackApi) -> Result<FeedbackStatus, ApiError> {
        if self.status == FeedbackStatus::Like {
            self.cancel(api).await?;
        } else {
            self.add(api, FeedbackType::Like, None, None).await?;
        }
        Ok(self.status)
    }

    pub async fn toggle_unlike(&mut self, api: &dyn FeedbackApi) -> Result<DislikeStep, ApiError> {
        if self.status == FeedbackStatus::Unlike {
            self.cancel(api).await?;
            return Ok(DislikeStep::Cancelled(self.status));
        }
        let reasons = api.feedback_reasons().await?;
        Ok(DislikeStep::ChooseReasons(reasons))
    }

    pub async fn submit_dislike(
        &mut self,
        api: &dyn FeedbackApi,
        reason_types: Vec<String>,
        remark: &str,
    ) -> Result<FeedbackStatus, ApiError> {
        let remark = remark.trim().to_string();
        self.add(api, FeedbackType::Unlike, Some(reason_types), Some(remark))
            .await?;
        Ok(self.status)
    }

    async fn add(
        &mut self,
        api: &dyn FeedbackApi,
        feedback_type: FeedbackType,
        reason_types: Option<Vec<String>>,
        remark: Option<String>,
    ) -> Result<(), ApiError> {
        let params = FeedbackAddParams {
            conv_uid: self.conv_uid.clone(),
            message_id: self.message_id.clone(),
            feedback_type,
            reason_types,
            remark,
        };
        if let Some(record) = api.add_feedback(params).await? {
            self.status = record
                .feedback_type
                .as_deref()
                .and_then(FeedbackType::from_str)
                .unwrap_or(feedback_type)
                .into();
        } else {
            tracing::debug!(
                "Feedback for {}#{} returned no record",
                self.conv_uid,
                self.message_id
            );
        }
        Ok(())
    }

    async fn cancel(&mut self, api: &dyn FeedbackApi) -> Result<(), ApiError> {
        let params = CancelFeedbackParams {
            conv_uid: self.conv_uid.clone(),
            message_id: self.message_id.clone(),
        };
        if api.cancel_feedback(params).await? {
            self.status = FeedbackStatus::None;
        }
        Ok(())
    }
}
