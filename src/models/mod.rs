pub mod chat_mode;
pub mod dialogue;
pub mod feedback;
pub mod input;
pub mod param;
pub mod resource;
pub mod turn;

pub use chat_mode::ChatMode;
pub use dialogue::{DialogInfo, Dialogue, NewDialogue};
pub use feedback::{
    CancelFeedbackParams, FeedbackAddParams, FeedbackReason, FeedbackRecord, FeedbackType,
};
pub use input::{ContentItem, UserInput};
pub use param::{ParamKind, ParamNeed};
pub use resource::{ResourceKind, ResourceRef, ResourceSelection};
pub use turn::{Role, Turn};
