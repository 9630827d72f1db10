pub mod chat;
pub mod export;
pub mod feedback;
pub mod resource;
pub mod store;
pub mod vis;

pub use chat::{ChatError, ChatSession, StreamState};
pub use feedback::{DislikeStep, FeedbackTracker};
pub use resource::{InputParams, ParamAffordances};
pub use store::Store;
