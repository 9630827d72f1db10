use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::api::{ApiError, ChatApi, ChatCompletionRequest, ChunkDecoder, Decoded, StreamFrame};
use crate::models::{ChatMode, Role, Turn, UserInput};

/// Shown in the reply when the stream could not be opened or broke off.
pub const STREAM_FAILURE: &str = "Sorry, an error occurred, please try again later.";

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Nothing to send: the message is empty")]
    EmptyInput,

    #[error("A reply is still streaming in this conversation")]
    StreamInFlight,

    #[error("Select a database before sending a message")]
    ResourceRequired,

    #[error(transparent)]
    Api(#[from] ApiError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Streaming,
    Done,
    Failed(String),
    Aborted,
}

/// Cancels the in-flight stream of one conversation from anywhere.
#[derive(Debug, Clone)]
pub struct AbortHandle {
    token: CancellationToken,
    conv_uid: String,
    round_index: i64,
}

impl AbortHandle {
    pub fn abort(&self) {
        self.token.cancel();
    }

    #[cfg(test)]
    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Abort locally, then ask the server to stop generating this round.
    pub async fn stop(&self, api: &dyn ChatApi) -> Result<(), ApiError> {
        self.abort();
        api.stop_topic(&self.conv_uid, self.round_index).await
    }
}

/// Per-message knobs on top of the session's own mode and model.
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    pub model_name: Option<String>,
    pub select_param: Option<Value>,
    pub temperature: Option<f32>,
    pub max_new_tokens: Option<u32>,
    pub prompt_code: Option<String>,
    /// Append chunks to the reply instead of replacing it with each one.
    pub incremental: bool,
}

/// One conversation's turns plus the stream currently writing into them.
///
/// Every exchange appends a human turn and a `thinking` view placeholder
/// sharing one order; stream events then rewrite that placeholder in place
/// until `[DONE]`, `[ERROR]...`, an abort, or the connection closing.
/// Only one stream may be in flight at a time.
pub struct ChatSession {
    conv_uid: String,
    chat_mode: ChatMode,
    app_code: Option<String>,
    model_name: String,
    history: Vec<Turn>,
    state: StreamState,
    decoder: ChunkDecoder,
    cancel: CancellationToken,
    active: Option<usize>,
    incremental: bool,
}

impl ChatSession {
    pub fn new(conv_uid: impl Into<String>, chat_mode: ChatMode, model_name: impl Into<String>) -> Self {
        let decoder = ChunkDecoder::for_mode(&chat_mode);
        Self {
            conv_uid: conv_uid.into(),
            chat_mode,
            app_code: None,
            model_name: model_name.into(),
            history: Vec::new(),
            state: StreamState::Idle,
            decoder,
            cancel: CancellationToken::new(),
            active: None,
            incremental: false,
        }
    }

    pub fn with_app_code(mut self, app_code: Option<String>) -> Self {
        self.app_code = app_code.filter(|c| !c.is_empty());
        self
    }

    pub fn conv_uid(&self) -> &str {
        &self.conv_uid
    }

    pub fn chat_mode(&self) -> &ChatMode {
        &self.chat_mode
    }

    pub fn app_code(&self) -> Option<&str> {
        self.app_code.as_deref()
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn history(&self) -> &[Turn] {
        &self.history
    }

    pub fn state(&self) -> &StreamState {
        &self.state
    }

    pub fn is_streaming(&self) -> bool {
        self.state == StreamState::Streaming
    }

    /// The reply currently being streamed, if any.
    pub fn active_turn(&self) -> Option<&Turn> {
        self.active.and_then(|i| self.history.get(i))
    }

    /// Replace the turns with the server's history for this conversation.
    pub fn hydrate(&mut self, turns: Vec<Turn>) -> Result<(), ChatError> {
        if self.is_streaming() {
            return Err(ChatError::StreamInFlight);
        }
        self.history = turns;
        self.active = None;
        self.state = StreamState::Idle;
        Ok(())
    }

    /// Order for the next exchange: one past the last reply (or question), from 1.
    pub fn next_order(&self) -> i64 {
        let last_of = |role: Role| {
            self.history
                .iter()
                .rev()
                .find(|t| t.role == role)
                .map(|t| t.order)
        };
        last_of(Role::View)
            .or_else(|| last_of(Role::Human))
            .map(|order| order + 1)
            .unwrap_or(1)
    }

    /// Handle for cancelling the current stream, or the next one when idle.
    /// Every stream ends on a fresh token, so a handle taken while idle
    /// reaches the exchange that follows it.
    pub fn abort_handle(&self) -> AbortHandle {
        let round_index = match self.active_turn() {
            Some(turn) if self.is_streaming() => turn.order,
            _ => self.next_order(),
        };
        AbortHandle {
            token: self.cancel.clone(),
            conv_uid: self.conv_uid.clone(),
            round_index,
        }
    }

    /// Append the question and an empty reply placeholder and enter streaming.
    pub fn begin_turn(
        &mut self,
        input: &UserInput,
        model_name: Option<&str>,
        incremental: bool,
    ) -> Result<AbortHandle, ChatError> {
        if self.is_streaming() {
            return Err(ChatError::StreamInFlight);
        }
        if input.is_empty() {
            return Err(ChatError::EmptyInput);
        }

        let order = self.next_order();
        let model = model_name.unwrap_or(&self.model_name).to_string();

        self.history.push(Turn::human(input.display_text(), order, &model));
        self.history.push(Turn::placeholder(order, &model));
        self.active = Some(self.history.len() - 1);
        self.incremental = incremental;
        self.decoder = ChunkDecoder::for_mode(&self.chat_mode);
        if self.cancel.is_cancelled() {
            self.cancel = CancellationToken::new();
        }
        self.state = StreamState::Streaming;

        tracing::debug!(
            "Conversation {} turn {} streaming ({})",
            self.conv_uid,
            order,
            self.decoder.name()
        );
        Ok(self.abort_handle())
    }

    /// Apply one raw stream event to the reply. Returns whether the stream
    /// should keep going. Events after an abort or a terminal event are
    /// ignored.
    pub fn apply_event(&mut self, raw: &str) -> bool {
        if !self.is_streaming() {
            return false;
        }
        if self.cancel.is_cancelled() {
            self.mark_aborted();
            return false;
        }

        match self.decoder.decode(raw) {
            Ok(Decoded::Text(text)) => {
                self.write_reply(&text);
                true
            }
            Ok(Decoded::Done) => {
                self.finish();
                false
            }
            Ok(Decoded::Failed(message)) => {
                self.fail(message);
                false
            }
            Err(e) => {
                // Show what arrived and close the turn; a payload of the wrong
                // shape will not be followed by anything this decoder can read.
                tracing::warn!("Conversation {}: {}", self.conv_uid, e);
                let text = e.payload().to_string();
                self.write_reply(&text);
                self.finish();
                false
            }
        }
    }

    /// Cancel the in-flight stream and freeze the reply as it stands.
    pub fn abort(&mut self) {
        self.cancel.cancel();
        self.mark_aborted();
    }

    /// Run a full exchange against `api`: append the turn pair, stream the
    /// reply into it and return the state it ended in.
    pub async fn send(
        &mut self,
        api: Arc<dyn ChatApi>,
        input: UserInput,
        options: SendOptions,
    ) -> Result<StreamState, ChatError> {
        self.send_observed(api, input, options, |_| {}).await
    }

    /// Like [`send`](Self::send), calling `on_update` with the reply after
    /// every chunk that changed it.
    pub async fn send_observed<F>(
        &mut self,
        api: Arc<dyn ChatApi>,
        input: UserInput,
        options: SendOptions,
        mut on_update: F,
    ) -> Result<StreamState, ChatError>
    where
        F: FnMut(&Turn),
    {
        self.begin_turn(&input, options.model_name.as_deref(), options.incremental)?;

        let request = ChatCompletionRequest {
            conv_uid: self.conv_uid.clone(),
            app_code: self.app_code.clone(),
            chat_mode: self.chat_mode.clone(),
            model_name: options.model_name.unwrap_or_else(|| self.model_name.clone()),
            user_input: input,
            select_param: options.select_param,
            temperature: options.temperature,
            max_new_tokens: options.max_new_tokens,
            prompt_code: options.prompt_code,
            incremental: options.incremental,
        };

        let (tx, mut rx) = mpsc::channel::<StreamFrame>(64);
        let abort = self.cancel.clone();
        let transport = abort.child_token();
        let transport_task = transport.clone();
        let stream_handle =
            tokio::spawn(async move { api.stream_chat(request, tx, transport_task).await });

        let mut sender_gone = false;
        loop {
            tokio::select! {
                biased;
                _ = abort.cancelled() => {
                    self.mark_aborted();
                    break;
                }
                frame = rx.recv() => match frame {
                    Some(StreamFrame::Event(raw)) => {
                        let more = self.apply_event(&raw);
                        if let Some(turn) = self.active_turn() {
                            on_update(turn);
                        }
                        if !more {
                            break;
                        }
                    }
                    Some(StreamFrame::Closed) => {
                        self.close();
                        break;
                    }
                    None => {
                        sender_gone = true;
                        break;
                    }
                }
            }
        }

        if sender_gone {
            match stream_handle.await {
                Ok(Ok(())) => self.close(),
                Ok(Err(e)) => {
                    tracing::warn!("Chat stream for {} failed: {}", self.conv_uid, e);
                    self.fail(STREAM_FAILURE.to_string());
                }
                Err(e) => {
                    tracing::error!("Chat stream task for {} panicked: {}", self.conv_uid, e);
                    self.fail(STREAM_FAILURE.to_string());
                }
            }
        } else {
            transport.cancel();
        }

        Ok(self.state.clone())
    }

    fn active_mut(&mut self) -> Option<&mut Turn> {
        match self.active {
            Some(i) => self.history.get_mut(i),
            None => None,
        }
    }

    fn write_reply(&mut self, text: &str) {
        let incremental = self.incremental;
        if let Some(turn) = self.active_mut() {
            if incremental {
                turn.context.push_str(text);
            } else {
                turn.context = text.to_string();
            }
            turn.thinking = Some(false);
        }
    }

    fn end_stream(&mut self, state: StreamState) {
        if let Some(turn) = self.active_mut() {
            turn.thinking = Some(false);
        }
        self.active = None;
        self.state = state;
        self.cancel = CancellationToken::new();
    }

    fn finish(&mut self) {
        self.end_stream(StreamState::Done);
    }

    fn fail(&mut self, message: String) {
        if let Some(turn) = self.active_mut() {
            turn.context = message.clone();
        }
        self.end_stream(StreamState::Failed(message));
    }

    fn close(&mut self) {
        if self.is_streaming() {
            tracing::debug!("Stream for {} closed without [DONE]", self.conv_uid);
            self.end_stream(StreamState::Done);
        }
    }

    fn mark_aborted(&mut self) {
        if self.is_streaming() {
            tracing::debug!("Stream for {} aborted", self.conv_uid);
            self.end_stream(StreamState::Aborted);
        }
    }
}
