use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Backend pipeline a conversation is bound to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum ChatMode {
    #[default]
    Normal,
    DbExecute,
    DbQa,
    Excel,
    Knowledge,
    Dashboard,
    Execution,
    Agent,
    Flow,
    Other(String),
}

impl ChatMode {
    pub fn as_str(&self) -> &str {
        match self {
            ChatMode::Normal => "chat_normal",
            ChatMode::DbExecute => "chat_with_db_execute",
            ChatMode::DbQa => "chat_with_db_qa",
            ChatMode::Excel => "chat_excel",
            ChatMode::Knowledge => "chat_knowledge",
            ChatMode::Dashboard => "chat_dashboard",
            ChatMode::Execution => "chat_execution",
            ChatMode::Agent => "chat_agent",
            ChatMode::Flow => "chat_flow",
            ChatMode::Other(s) => s,
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "chat_normal" => ChatMode::Normal,
            "chat_with_db_execute" => ChatMode::DbExecute,
            "chat_with_db_qa" => ChatMode::DbQa,
            "chat_excel" => ChatMode::Excel,
            "chat_knowledge" => ChatMode::Knowledge,
            "chat_dashboard" => ChatMode::Dashboard,
            "chat_execution" => ChatMode::Execution,
            "chat_agent" => ChatMode::Agent,
            "chat_flow" => ChatMode::Flow,
            other => ChatMode::Other(other.to_string()),
        }
    }

    pub fn is_database_scene(&self) -> bool {
        matches!(
            self,
            ChatMode::DbQa | ChatMode::DbExecute | ChatMode::Dashboard
        )
    }

    pub fn is_knowledge_scene(&self) -> bool {
        matches!(self, ChatMode::Knowledge)
    }
}

impl fmt::Display for ChatMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ChatMode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ChatMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(ChatMode::parse(&s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_and_unknown_modes_round_trip() {
        assert_eq!(ChatMode::parse("chat_agent"), ChatMode::Agent);
        assert_eq!(ChatMode::parse("chat_with_db_execute").as_str(), "chat_with_db_execute");

        let custom = ChatMode::parse("chat_custom_flow");
        assert_eq!(custom, ChatMode::Other("chat_custom_flow".to_string()));
        assert_eq!(serde_json::to_string(&custom).unwrap(), "\"chat_custom_flow\"");
    }

    #[test]
    fn test_scene_families() {
        assert!(ChatMode::Dashboard.is_database_scene());
        assert!(!ChatMode::Knowledge.is_database_scene());
        assert!(ChatMode::Knowledge.is_knowledge_scene());
    }
}
