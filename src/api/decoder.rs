use serde_json::Value;
use thiserror::Error;

use crate::models::ChatMode;

pub const DONE_SENTINEL: &str = "[DONE]";
pub const ERROR_PREFIX: &str = "[ERROR]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Text(String),
    Done,
    Failed(String),
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unexpected {decoder} chunk shape: {payload}")]
    UnexpectedShape {
        decoder: &'static str,
        payload: Value,
    },
}

impl DecodeError {
    pub fn payload(&self) -> &Value {
        match self {
            DecodeError::UnexpectedShape { payload, .. } => payload,
        }
    }
}

/// Payload shape of stream events, fixed by the chat mode before the stream opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkDecoder {
    /// `{"vis": "..."}` events from the multi-agent pipeline.
    Agent,
    /// OpenAI-style `{"choices": [{"message": {"content": "..."}}]}` events.
    Completion,
}

impl ChunkDecoder {
    pub fn for_mode(mode: &ChatMode) -> Self {
        match mode {
            ChatMode::Agent => ChunkDecoder::Agent,
            _ => ChunkDecoder::Completion,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ChunkDecoder::Agent => "agent",
            ChunkDecoder::Completion => "completion",
        }
    }

    pub fn decode(&self, raw: &str) -> Result<Decoded, DecodeError> {
        let value = match serde_json::from_str::<Value>(raw) {
            Ok(value) => value,
            // Plain text chunks escape their newlines
            Err(_) => return Ok(classify(raw.replace("\\n", "\n"))),
        };

        if let Value::String(text) = value {
            return Ok(classify(text));
        }

        // A field of the wrong type is reported as itself; without the field
        // the whole event is.
        let payload = match self.field(&value) {
            Some(Value::String(text)) => return Ok(classify(text.clone())),
            Some(field) => field.clone(),
            None => value,
        };
        Err(DecodeError::UnexpectedShape {
            decoder: self.name(),
            payload,
        })
    }

    fn field<'a>(&self, value: &'a Value) -> Option<&'a Value> {
        let field = match self {
            ChunkDecoder::Agent => value.get("vis")?,
            ChunkDecoder::Completion => value
                .get("choices")?
                .get(0)?
                .get("message")?
                .get("content")?,
        };
        (!field.is_null()).then_some(field)
    }
}

fn classify(text: String) -> Decoded {
    if text == DONE_SENTINEL {
        Decoded::Done
    } else if let Some(rest) = text.strip_prefix(ERROR_PREFIX) {
        Decoded::Failed(rest.to_string())
    } else {
        Decoded::Text(text)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_decoder_follows_chat_mode() {
        assert_eq!(ChunkDecoder::for_mode(&ChatMode::Agent), ChunkDecoder::Agent);
        assert_eq!(ChunkDecoder::for_mode(&ChatMode::DbExecute), ChunkDecoder::Completion);
        assert_eq!(
            ChunkDecoder::for_mode(&ChatMode::Other("chat_custom".into())),
            ChunkDecoder::Completion
        );
    }

    #[test]
    fn test_agent_extracts_vis() {
        let decoded = ChunkDecoder::Agent
            .decode(r#"{"vis": "```vis-thinking\nplanning\n```"}"#)
            .unwrap();
        assert_eq!(decoded, Decoded::Text("```vis-thinking\nplanning\n```".into()));
    }

    #[test]
    fn test_completion_extracts_message_content() {
        let raw = json!({"choices": [{"message": {"role": "assistant", "content": "SELECT 1"}}]}).to_string();
        assert_eq!(
            ChunkDecoder::Completion.decode(&raw).unwrap(),
            Decoded::Text("SELECT 1".into())
        );
    }

    #[test]
    fn test_empty_content_is_still_text() {
        let raw = json!({"choices": [{"message": {"content": ""}}]}).to_string();
        assert_eq!(ChunkDecoder::Completion.decode(&raw).unwrap(), Decoded::Text(String::new()));
    }

    #[test]
    fn test_plain_text_unescapes_newlines() {
        assert_eq!(
            ChunkDecoder::Completion.decode(r"line one\nline two").unwrap(),
            Decoded::Text("line one\nline two".into())
        );
    }

    #[test]
    fn test_json_string_literal_is_kept_verbatim() {
        assert_eq!(
            ChunkDecoder::Agent.decode(r#""a\\nb""#).unwrap(),
            Decoded::Text("a\\nb".into())
        );
    }

    #[test]
    fn test_sentinels() {
        assert_eq!(ChunkDecoder::Completion.decode("[DONE]").unwrap(), Decoded::Done);
        assert_eq!(
            ChunkDecoder::Completion.decode("[ERROR]Foo").unwrap(),
            Decoded::Failed("Foo".into())
        );
        assert_eq!(
            ChunkDecoder::Agent.decode(r#"{"vis": "[ERROR]model overloaded"}"#).unwrap(),
            Decoded::Failed("model overloaded".into())
        );
    }

    #[test]
    fn test_mismatched_shape_is_an_error() {
        let err = ChunkDecoder::Completion
            .decode(r#"{"vis": "agent payload"}"#)
            .unwrap_err();
        assert_eq!(err.payload(), &json!({"vis": "agent payload"}));

        let err = ChunkDecoder::Agent.decode("42").unwrap_err();
        assert_eq!(err.payload(), &json!(42));

        let err = ChunkDecoder::Agent.decode(r#"{"vis": null}"#).unwrap_err();
        assert_eq!(err.payload(), &json!({"vis": null}));
    }

    #[test]
    fn test_non_string_vis_reports_the_widget() {
        let err = ChunkDecoder::Agent.decode(r#"{"vis": {"chart": 1}}"#).unwrap_err();
        assert_eq!(err.payload(), &json!({"chart": 1}));
    }

    #[test]
    fn test_non_string_content_reports_the_content() {
        let raw = json!({"choices": [{"message": {"content": [{"type": "text", "text": "hi"}]}}]}).to_string();
        let err = ChunkDecoder::Completion.decode(&raw).unwrap_err();
        assert_eq!(err.payload(), &json!([{"type": "text", "text": "hi"}]));
    }
}
