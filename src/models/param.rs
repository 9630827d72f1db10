use serde::{Deserialize, Serialize};

/// Parameter kinds an app declares it needs from the chat input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    Resource,
    Temperature,
    MaxNewTokens,
    Model,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamNeed {
    #[serde(rename = "type")]
    pub kind: ParamKind,
    #[serde(default)]
    pub value: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind_value: Option<String>,
}

impl ParamNeed {
    pub fn value_str(&self) -> Option<&str> {
        self.value.as_ref().and_then(|v| v.as_str())
    }
}
