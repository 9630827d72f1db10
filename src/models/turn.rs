use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Human,
    View,
    System,
    Ai,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Human => "human",
            Role::View => "view",
            Role::System => "system",
            Role::Ai => "ai",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "human" => Some(Role::Human),
            "view" => Some(Role::View),
            "system" => Some(Role::System),
            "ai" => Some(Role::Ai),
            _ => None,
        }
    }
}

/// Server timestamps arrive as epoch numbers, formatted strings or null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimeStamp {
    Epoch(i64),
    Text(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    #[serde(default)]
    pub context: String,
    pub order: i64,
    #[serde(default)]
    pub time_stamp: Option<TimeStamp>,
    #[serde(default)]
    pub model_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<serde_json::Value>,
}

impl Turn {
    pub fn human(context: String, order: i64, model_name: &str) -> Self {
        Self {
            role: Role::Human,
            context,
            order,
            time_stamp: Some(TimeStamp::Epoch(0)),
            model_name: model_name.to_string(),
            thinking: None,
            feedback: None,
        }
    }

    /// Placeholder assistant turn that stream chunks are written into.
    pub fn placeholder(order: i64, model_name: &str) -> Self {
        Self {
            role: Role::View,
            context: String::new(),
            order,
            time_stamp: Some(TimeStamp::Epoch(0)),
            model_name: model_name.to_string(),
            thinking: Some(true),
            feedback: None,
        }
    }

    pub fn is_thinking(&self) -> bool {
        self.thinking.unwrap_or(false)
    }

    /// Feedback type recorded by the server for this turn, if any.
    pub fn feedback_type(&self) -> Option<&str> {
        self.feedback
            .as_ref()
            .and_then(|f| f.get("feedback_type"))
            .and_then(|v| v.as_str())
    }
}
