use serde::{Deserialize, Serialize};

use super::chat_mode::ChatMode;
use super::input::UserInput;
use super::param::ParamNeed;

/// A conversation as listed by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dialogue {
    pub conv_uid: String,
    #[serde(default)]
    pub user_input: Option<UserInput>,
    #[serde(default)]
    pub user_name: Option<String>,
    pub chat_mode: ChatMode,
    #[serde(default)]
    pub select_param: Option<serde_json::Value>,
    #[serde(default)]
    pub app_code: Option<String>,
    #[serde(default)]
    pub param_need: Vec<ParamNeed>,
}

impl Dialogue {
    /// Short label for lists, taken from the first line of the opening question.
    pub fn title(&self) -> String {
        let text = self
            .user_input
            .as_ref()
            .map(|input| input.display_text())
            .unwrap_or_default();
        let first_line = text.lines().next().unwrap_or("");
        if first_line.chars().count() > 50 {
            let truncated: String = first_line.chars().take(47).collect();
            format!("{}...", truncated)
        } else if first_line.is_empty() {
            self.conv_uid.clone()
        } else {
            first_line.to_string()
        }
    }
}

/// Server reply to a "new dialogue" call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDialogue {
    pub conv_uid: String,
    pub chat_mode: ChatMode,
    #[serde(default)]
    pub select_param: Option<serde_json::Value>,
    #[serde(default)]
    pub model_name: Option<String>,
}

/// The scene/app pair the client last worked in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DialogInfo {
    pub chat_scene: String,
    #[serde(default)]
    pub app_code: String,
}
