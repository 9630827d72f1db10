use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::interceptor::intercept;
use super::notify::Notifier;
use super::stream::pump_events;
use super::traits::{ChatApi, FeedbackApi};
use super::types::{ApiError, ApiReply, ChatCompletionRequest, IgnoreCodes, StreamFrame};
use crate::config::{Config, USER_ID_HEADER};
use crate::models::{
    CancelFeedbackParams, ChatMode, Dialogue, FeedbackAddParams, FeedbackReason, FeedbackRecord,
    NewDialogue, Turn,
};

const EVENT_STREAM: &str = "text/event-stream";
const JSON: &str = "application/json";

/// HTTP client for the chat API server. REST calls go through the
/// interceptor; the completion stream does not, its failures end up in the
/// conversation instead.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    chat_path: String,
    user_id: Option<String>,
    api_key: Option<String>,
    request_timeout: Duration,
    notifier: Arc<dyn Notifier>,
}

impl ApiClient {
    pub fn new(config: &Config, notifier: Arc<dyn Notifier>) -> Result<Self, ApiError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| ApiError::RequestFailed(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            chat_path: config.chat_path.clone(),
            user_id: config.user_id.clone(),
            api_key: config.api_key.clone(),
            request_timeout: config.request_timeout(),
            notifier,
        })
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    fn endpoint(&self, path: &str, query: &[(&str, &str)]) -> Result<Url, ApiError> {
        let mut url = Url::parse(&format!("{}{}", self.base_url, path))
            .map_err(|e| ApiError::RequestFailed(format!("Invalid URL for {}: {}", path, e)))?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let mut req = self.client.request(method, url);
        if let Some(user_id) = &self.user_id {
            req = req.header(USER_ID_HEADER, user_id);
        }
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        req
    }

    async fn call<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        ignore: &IgnoreCodes,
    ) -> Result<ApiReply<T>, ApiError> {
        intercept(request.timeout(self.request_timeout), ignore, self.notifier.as_ref()).await
    }

    pub async fn new_dialogue(
        &self,
        chat_mode: &ChatMode,
        model: Option<&str>,
        app_code: Option<&str>,
    ) -> Result<ApiReply<NewDialogue>, ApiError> {
        let mut query = vec![("chat_mode", chat_mode.as_str())];
        if let Some(model) = model {
            query.push(("model_name", model));
        }
        let url = self.endpoint("/api/v1/chat/dialogue/new", &query)?;
        let body = json!({
            "chat_mode": chat_mode,
            "model": model,
            "app_code": app_code,
        });
        self.call(self.request(Method::POST, url).json(&body), &IgnoreCodes::None)
            .await
    }

    pub async fn list_dialogues(&self) -> Result<ApiReply<Vec<Dialogue>>, ApiError> {
        let url = self.endpoint("/api/v1/chat/dialogue/list", &[])?;
        self.call(self.request(Method::GET, url), &IgnoreCodes::None)
            .await
    }

    pub async fn chat_history(&self, conv_uid: &str) -> Result<ApiReply<Vec<Turn>>, ApiError> {
        let url = self.endpoint(
            "/api/v1/chat/dialogue/messages/history",
            &[("con_uid", conv_uid)],
        )?;
        self.call(self.request(Method::GET, url), &IgnoreCodes::None)
            .await
    }

    pub async fn delete_dialogue(&self, conv_uid: &str) -> Result<ApiReply<Value>, ApiError> {
        let url = self.endpoint("/api/v1/chat/dialogue/delete", &[("con_uid", conv_uid)])?;
        self.call(self.request(Method::POST, url), &IgnoreCodes::None)
            .await
    }
}

#[async_trait]
impl ChatApi for ApiClient {
    async fn stream_chat(
        &self,
        request: ChatCompletionRequest,
        tx: mpsc::Sender<StreamFrame>,
        cancel: CancellationToken,
    ) -> Result<(), ApiError> {
        let url = self.endpoint(&self.chat_path, &[])?;
        tracing::debug!(
            "Opening chat stream for {} ({})",
            request.conv_uid,
            request.chat_mode
        );

        let req = self
            .request(Method::POST, url)
            .header(CONTENT_TYPE, JSON)
            .header(ACCEPT, EVENT_STREAM)
            .json(&request);

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            response = req.send() => response.map_err(|e| ApiError::from_transport(&e))?,
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|v| v.get("err_msg").and_then(|m| m.as_str()).map(String::from))
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("Request failed").to_string());
            return Err(ApiError::Http {
                status: status.as_u16(),
                message,
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        // A plain JSON reply stands in for a whole stream
        if content_type.starts_with(JSON) {
            let body = response
                .text()
                .await
                .map_err(|e| ApiError::from_transport(&e))?;
            if !cancel.is_cancelled() && tx.send(StreamFrame::Event(body)).await.is_ok() {
                let _ = tx.send(StreamFrame::Closed).await;
            }
            return Ok(());
        }

        pump_events(response.bytes_stream(), &tx, &cancel).await
    }

    async fn stop_topic(&self, conv_uid: &str, round_index: i64) -> Result<(), ApiError> {
        let round = round_index.to_string();
        let url = self.endpoint(
            "/api/v1/chat/topic/terminate",
            &[("conv_id", conv_uid), ("round_index", round.as_str())],
        )?;
        let body = json!({ "conv_id": conv_uid, "round_index": round_index });
        self.call::<Value>(self.request(Method::POST, url).json(&body), &IgnoreCodes::None)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl FeedbackApi for ApiClient {
    async fn feedback_reasons(&self) -> Result<Vec<FeedbackReason>, ApiError> {
        let url = self.endpoint("/api/v1/conv/feedback/reasons", &[])?;
        let reply: ApiReply<Vec<FeedbackReason>> = self
            .call(self.request(Method::GET, url), &IgnoreCodes::None)
            .await?;
        Ok(reply.into_data().unwrap_or_default())
    }

    async fn add_feedback(
        &self,
        params: FeedbackAddParams,
    ) -> Result<Option<FeedbackRecord>, ApiError> {
        let url = self.endpoint("/api/v1/conv/feedback/add", &[])?;
        let reply: ApiReply<FeedbackRecord> = self
            .call(self.request(Method::POST, url).json(&params), &IgnoreCodes::None)
            .await?;
        Ok(reply.into_data())
    }

    async fn cancel_feedback(&self, params: CancelFeedbackParams) -> Result<bool, ApiError> {
        let url = self.endpoint("/api/v1/conv/feedback/cancel", &[])?;
        let reply: ApiReply<Value> = self
            .call(self.request(Method::POST, url).json(&params), &IgnoreCodes::None)
            .await?;
        Ok(reply.into_data().is_some_and(|data| is_truthy(&data)))
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::api::notify::RecordingNotifier;
    use crate::models::{FeedbackType, Role, UserInput};

    fn client_for(server: &MockServer, notifier: Arc<RecordingNotifier>) -> ApiClient {
        let config = Config {
            api_base_url: server.uri(),
            user_id: Some("u-1".to_string()),
            ..Config::default()
        };
        ApiClient::new(&config, notifier).unwrap()
    }

    fn completion_request() -> ChatCompletionRequest {
        ChatCompletionRequest {
            conv_uid: "c-1".into(),
            app_code: None,
            chat_mode: ChatMode::DbExecute,
            model_name: "proxyllm".into(),
            user_input: UserInput::from("how many orders"),
            select_param: Some(json!("sales_db")),
            temperature: None,
            max_new_tokens: Some(4000),
            prompt_code: None,
            incremental: false,
        }
    }

    async fn collect(mut rx: mpsc::Receiver<StreamFrame>) -> Vec<StreamFrame> {
        let mut frames = Vec::new();
        while let Some(frame) = rx.recv().await {
            frames.push(frame);
        }
        frames
    }

    #[tokio::test]
    async fn test_new_dialogue_sends_mode_and_user() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/chat/dialogue/new"))
            .and(query_param("chat_mode", "chat_with_db_execute"))
            .and(query_param("model_name", "proxyllm"))
            .and(header(USER_ID_HEADER, "u-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": {"conv_uid": "c-9", "chat_mode": "chat_with_db_execute"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = Arc::new(RecordingNotifier::default());
        let client = client_for(&server, notifier.clone());
        let reply = client
            .new_dialogue(&ChatMode::DbExecute, Some("proxyllm"), None)
            .await
            .unwrap();

        let dialogue = reply.require_data().unwrap();
        assert_eq!(dialogue.conv_uid, "c-9");
        assert_eq!(dialogue.chat_mode, ChatMode::DbExecute);
        assert_eq!(notifier.count(), 0);
    }

    #[tokio::test]
    async fn test_chat_history_parses_turns() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/chat/dialogue/messages/history"))
            .and(query_param("con_uid", "c-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": [
                    {"role": "human", "context": "hi", "order": 1, "time_stamp": 0, "model_name": "m"},
                    {"role": "view", "context": "hello", "order": 1, "time_stamp": 0, "model_name": "m"}
                ]
            })))
            .mount(&server)
            .await;

        let client = client_for(&server, Arc::new(RecordingNotifier::default()));
        let turns = client.chat_history("c-1").await.unwrap().require_data().unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[1].role, Role::View);
    }

    #[tokio::test]
    async fn test_stream_chat_forwards_sse_events() {
        let server = MockServer::start().await;
        let body = "data: {\"choices\":[{\"message\":{\"content\":\"4\"}}]}\n\ndata: [DONE]\n\n";
        Mock::given(method("POST"))
            .and(path("/api/v1/chat/completions"))
            .and(body_partial_json(json!({"conv_uid": "c-1", "select_param": "sales_db"})))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, EVENT_STREAM))
            .mount(&server)
            .await;

        let client = client_for(&server, Arc::new(RecordingNotifier::default()));
        let (tx, rx) = mpsc::channel(16);
        client
            .stream_chat(completion_request(), tx, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            collect(rx).await,
            vec![
                StreamFrame::Event("{\"choices\":[{\"message\":{\"content\":\"4\"}}]}".into()),
                StreamFrame::Event("[DONE]".into()),
                StreamFrame::Closed,
            ]
        );
    }

    #[tokio::test]
    async fn test_stream_chat_json_reply_is_single_event() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(r#"{"choices":[{"message":{"content":"done"}}]}"#, JSON),
            )
            .mount(&server)
            .await;

        let client = client_for(&server, Arc::new(RecordingNotifier::default()));
        let (tx, rx) = mpsc::channel(16);
        client
            .stream_chat(completion_request(), tx, CancellationToken::new())
            .await
            .unwrap();

        let frames = collect(rx).await;
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1], StreamFrame::Closed);
    }

    #[tokio::test]
    async fn test_stream_chat_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let notifier = Arc::new(RecordingNotifier::default());
        let client = client_for(&server, notifier.clone());
        let (tx, _rx) = mpsc::channel(16);
        let err = client
            .stream_chat(completion_request(), tx, CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::Http { status: 502, .. }));
        // stream failures are shown inline, never as notifications
        assert_eq!(notifier.count(), 0);
    }

    #[tokio::test]
    async fn test_feedback_round_trip() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/conv/feedback/add"))
            .and(body_partial_json(json!({
                "conv_uid": "c-1", "message_id": "3", "feedback_type": "unlike",
                "reason_types": ["wrong_sql"], "remark": "bad join"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true, "data": {"feedback_type": "unlike", "id": 11}
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/conv/feedback/cancel"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"success": true, "data": true})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/conv/feedback/reasons"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": [{"reason_type": "wrong_sql", "reason": "Wrong SQL"}]
            })))
            .mount(&server)
            .await;

        let client = client_for(&server, Arc::new(RecordingNotifier::default()));
        let reasons = client.feedback_reasons().await.unwrap();
        assert_eq!(reasons[0].reason_type, "wrong_sql");

        let record = client
            .add_feedback(FeedbackAddParams {
                conv_uid: "c-1".into(),
                message_id: "3".into(),
                feedback_type: FeedbackType::Unlike,
                reason_types: Some(vec!["wrong_sql".into()]),
                remark: Some("bad join".into()),
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.feedback_type.as_deref(), Some("unlike"));
        assert_eq!(record.extra["id"], 11);

        let cancelled = client
            .cancel_feedback(CancelFeedbackParams {
                conv_uid: "c-1".into(),
                message_id: "3".into(),
            })
            .await
            .unwrap();
        assert!(cancelled);
    }

    #[test]
    fn test_truthiness() {
        assert!(!is_truthy(&Value::Null));
        assert!(!is_truthy(&json!(false)));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!("")));
        assert!(is_truthy(&json!({})));
        assert!(is_truthy(&json!(1)));
    }
}
