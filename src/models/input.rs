use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// One typed part of a structured user message (`text`, `image_url`, `video`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl ContentItem {
    pub fn text(text: impl Into<String>) -> Self {
        let mut fields = Map::new();
        fields.insert("text".to_string(), Value::String(text.into()));
        Self {
            kind: "text".to_string(),
            fields,
        }
    }

    pub fn image_url(url: impl Into<String>, file_name: Option<&str>) -> Self {
        let mut image = json!({ "url": url.into() });
        if let Some(name) = file_name {
            image["fileName"] = Value::String(name.to_string());
        }
        let mut fields = Map::new();
        fields.insert("image_url".to_string(), image);
        Self {
            kind: "image_url".to_string(),
            fields,
        }
    }

    pub fn file_url(url: impl Into<String>, file_name: &str) -> Self {
        let mut fields = Map::new();
        fields.insert(
            "file_url".to_string(),
            json!({ "url": url.into(), "file_name": file_name }),
        );
        Self {
            kind: "file_url".to_string(),
            fields,
        }
    }

    /// Inline image bytes as a base64 `data:` URL.
    pub fn image_bytes(mime_type: &str, data: &[u8], file_name: Option<&str>) -> Self {
        let url = format!("data:{};base64,{}", mime_type, STANDARD.encode(data));
        Self::image_url(url, file_name)
    }

    fn str_field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(|v| v.as_str())
    }

    fn display_markdown(&self) -> String {
        match self.kind.as_str() {
            "image_url" => {
                let image = self.fields.get("image_url");
                let url = image
                    .and_then(|i| i.get("url"))
                    .and_then(|u| u.as_str())
                    .unwrap_or("");
                let name = image
                    .and_then(|i| i.get("fileName"))
                    .and_then(|n| n.as_str())
                    .unwrap_or("image");
                format!("\n![{}]({})", name, url)
            }
            "file_url" => {
                let file = self.fields.get("file_url");
                let url = file
                    .and_then(|f| f.get("url"))
                    .and_then(|u| u.as_str())
                    .unwrap_or("");
                let name = file
                    .and_then(|f| f.get("file_name"))
                    .and_then(|n| n.as_str())
                    .unwrap_or("file");
                format!("\n[{}]({})", name, url)
            }
            "video" => format!("\n[Video]({})", self.str_field("video").unwrap_or("")),
            other => format!("\n[{} attachment]", other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMessage {
    pub role: String,
    pub content: Vec<ContentItem>,
}

/// What the user submits: plain text, or a structured message carrying attachments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserInput {
    Text(String),
    Message(UserMessage),
}

impl UserInput {
    pub fn with_attachments(text: &str, attachments: Vec<ContentItem>) -> Self {
        let mut content = attachments;
        content.push(ContentItem::text(text));
        UserInput::Message(UserMessage {
            role: "user".to_string(),
            content,
        })
    }

    pub fn is_empty(&self) -> bool {
        match self {
            UserInput::Text(text) => text.trim().is_empty(),
            UserInput::Message(message) => message.content.is_empty(),
        }
    }

    /// Text shown in the human turn: text parts joined by spaces, then
    /// markdown links for every media part.
    pub fn display_text(&self) -> String {
        match self {
            UserInput::Text(text) => text.clone(),
            UserInput::Message(message) => {
                let mut display = message
                    .content
                    .iter()
                    .filter(|item| item.kind == "text")
                    .filter_map(|item| item.str_field("text"))
                    .collect::<Vec<_>>()
                    .join(" ");

                let media = message
                    .content
                    .iter()
                    .filter(|item| item.kind != "text")
                    .map(ContentItem::display_markdown)
                    .collect::<Vec<_>>()
                    .join("\n");

                if !media.is_empty() {
                    display.push('\n');
                    display.push_str(&media);
                }
                display
            }
        }
    }
}

impl From<&str> for UserInput {
    fn from(text: &str) -> Self {
        UserInput::Text(text.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_display() {
        let input = UserInput::from("top customers");
        assert_eq!(input.display_text(), "top customers");
        assert_eq!(serde_json::to_value(&input).unwrap(), json!("top customers"));
    }

    #[test]
    fn test_structured_display_lists_media_after_text() {
        let input = UserInput::with_attachments(
            "summarise this sheet",
            vec![
                ContentItem::image_url("/files/chart.png", Some("chart.png")),
                ContentItem::file_url("/files/q3.xlsx", "q3.xlsx"),
                ContentItem {
                    kind: "audio".to_string(),
                    fields: Map::new(),
                },
            ],
        );
        assert_eq!(
            input.display_text(),
            "summarise this sheet\n\n![chart.png](/files/chart.png)\n\n[q3.xlsx](/files/q3.xlsx)\n\n[audio attachment]"
        );

        let wire = serde_json::to_value(&input).unwrap();
        assert_eq!(wire["role"], "user");
        assert_eq!(wire["content"][3]["type"], "text");
        assert_eq!(wire["content"][0]["image_url"]["fileName"], "chart.png");
    }

    #[test]
    fn test_image_bytes_become_data_url() {
        let item = ContentItem::image_bytes("image/png", b"abc", None);
        let url = item.fields["image_url"]["url"].as_str().unwrap();
        assert_eq!(url, "data:image/png;base64,YWJj");
        assert!(item.display_markdown().starts_with("\n![image](data:image/png"));
    }

    #[test]
    fn test_blank_input_is_empty() {
        assert!(UserInput::from("   ").is_empty());
        assert!(!UserInput::from("hi").is_empty());
    }
}
