use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio_util::sync::CancellationToken;

use crate::api::{ApiClient, ChatApi};
use crate::config::Config;
use crate::models::{
    ChatMode, ContentItem, DialogInfo, Dialogue, ResourceKind, ResourceRef, ResourceSelection,
    Role, Turn, UserInput,
};
use crate::services::export::export_to_markdown;
use crate::services::resource::{self, build_submission, clears_on_switch};
use crate::services::vis::{extract_blocks, ChartTab, ContentBlock};
use crate::services::{
    ChatError, ChatSession, DislikeStep, FeedbackTracker, InputParams, ParamAffordances,
    StreamState, Store,
};

const HELP: &str = "\
Commands:
  /new [mode]          start a conversation (chat_normal, chat_with_db_execute, ...)
  /list                list conversations
  /open <conv_uid>     continue a listed conversation
  /history             reload and show the current conversation
  /use <name[:kind]>,… bind one or more databases / knowledge spaces
  /team                start an auto-planned agent team over the bound resources
  /prompt <code>       use a prompt template for the next message
  /image <path|url>    attach an image to the next message
  /like <order>        like (or un-like) a reply
  /unlike <order>      dislike (or withdraw the dislike of) a reply
  /delete <conv_uid>   delete a conversation
  /export [path]       write the conversation as markdown
  /quit                exit
Anything else is sent as a message. Ctrl-C while a reply streams stops it.";

#[derive(Debug, PartialEq)]
pub enum Command {
    New(Option<String>),
    List,
    Open(String),
    History,
    Use(String),
    Team,
    Prompt(String),
    Image(String),
    Like(i64),
    Unlike(i64),
    Delete(String),
    Export(Option<String>),
    Help,
    Quit,
    Send(String),
    Invalid(String),
}

impl Command {
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Some(Command::Send(line.to_string()));
        };

        let (name, arg) = match rest.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (rest, ""),
        };
        let arg_opt = (!arg.is_empty()).then(|| arg.to_string());
        let order = || arg.parse::<i64>().ok();

        let command = match name {
            "new" => Command::New(arg_opt),
            "list" => Command::List,
            "open" if !arg.is_empty() => Command::Open(arg.to_string()),
            "history" => Command::History,
            "use" if !arg.is_empty() => Command::Use(arg.to_string()),
            "team" => Command::Team,
            "prompt" if !arg.is_empty() => Command::Prompt(arg.to_string()),
            "image" if !arg.is_empty() => Command::Image(arg.to_string()),
            "like" => match order() {
                Some(n) => Command::Like(n),
                None => Command::Invalid("usage: /like <order>".into()),
            },
            "unlike" => match order() {
                Some(n) => Command::Unlike(n),
                None => Command::Invalid("usage: /unlike <order>".into()),
            },
            "delete" if !arg.is_empty() => Command::Delete(arg.to_string()),
            "export" => Command::Export(arg_opt),
            "help" => Command::Help,
            "quit" | "exit" => Command::Quit,
            _ => Command::Invalid(format!("unknown command /{} (try /help)", name)),
        };
        Some(command)
    }
}

pub struct App {
    config: Config,
    store: Store,
    client: Arc<ApiClient>,
    lines: Lines<BufReader<Stdin>>,
    session: Option<ChatSession>,
    dialogue: Option<Dialogue>,
    dialogues: Vec<Dialogue>,
    params: InputParams,
    attachments: Vec<ContentItem>,
    feedback: HashMap<i64, FeedbackTracker>,
}

impl App {
    pub fn new(config: Config, store: Store, client: ApiClient) -> Self {
        let params = InputParams {
            selection: None,
            temperature: config.temperature,
            max_new_tokens: config.max_new_tokens,
        };
        Self {
            config,
            store,
            client: Arc::new(client),
            lines: BufReader::new(tokio::io::stdin()).lines(),
            session: None,
            dialogue: None,
            dialogues: Vec::new(),
            params,
            attachments: Vec::new(),
            feedback: HashMap::new(),
        }
    }

    pub async fn run(&mut self) -> Result<()> {
        println!("datachat connected to {} (/help for commands)", self.config.api_base_url);

        loop {
            self.prompt();
            let line = tokio::select! {
                line = self.lines.next_line() => line.context("Failed to read stdin")?,
                _ = tokio::signal::ctrl_c() => None,
            };
            let Some(line) = line else { break };
            let Some(command) = Command::parse(&line) else { continue };
            if command == Command::Quit {
                break;
            }
            if let Err(e) = self.update(command).await {
                tracing::error!("Command failed: {:#}", e);
                eprintln!("error: {:#}", e);
            }
        }
        Ok(())
    }

    fn prompt(&self) {
        let label = match &self.session {
            Some(session) => session.chat_mode().to_string(),
            None => "no conversation".to_string(),
        };
        print!("[{}]> ", label);
        let _ = std::io::stdout().flush();
    }

    async fn update(&mut self, command: Command) -> Result<()> {
        match command {
            Command::New(mode) => self.new_dialogue(mode.as_deref()).await,
            Command::List => self.list_dialogues().await,
            Command::Open(conv_uid) => self.open_dialogue(&conv_uid).await,
            Command::History => self.show_history().await,
            Command::Use(resources) => {
                self.bind_resources(&resources);
                Ok(())
            }
            Command::Team => self.start_team().await,
            Command::Prompt(code) => self.set_prompt(&code).await,
            Command::Image(source) => self.attach_image(&source),
            Command::Like(order) => self.like(order).await,
            Command::Unlike(order) => self.unlike(order).await,
            Command::Delete(conv_uid) => self.delete_dialogue(&conv_uid).await,
            Command::Export(path) => self.export(path.as_deref()),
            Command::Help => {
                println!("{}", HELP);
                Ok(())
            }
            Command::Quit => Ok(()),
            Command::Send(text) => self.send(text).await,
            Command::Invalid(message) => {
                println!("{}", message);
                Ok(())
            }
        }
    }

    fn model_name(&self) -> String {
        self.config.model_name.clone().unwrap_or_default()
    }

    fn current_mode(&self) -> ChatMode {
        self.session
            .as_ref()
            .map(|s| s.chat_mode().clone())
            .unwrap_or_else(|| ChatMode::parse(&self.config.chat_mode))
    }

    async fn start_session(
        &mut self,
        mode: ChatMode,
        app_code: Option<String>,
    ) -> Result<()> {
        if clears_on_switch(&self.current_mode(), &mode) {
            self.params.selection = None;
        }

        let model = self.config.model_name.clone();
        let reply = self
            .client
            .new_dialogue(&mode, model.as_deref(), app_code.as_deref())
            .await?;
        let created = match reply.require_data() {
            Ok(created) => created,
            Err(e) => {
                // the interceptor has already told the user why
                tracing::debug!("No conversation created: {}", e);
                return Ok(());
            }
        };

        self.session = Some(
            ChatSession::new(&created.conv_uid, created.chat_mode.clone(), self.model_name())
                .with_app_code(app_code.clone()),
        );
        self.dialogue = None;
        self.feedback.clear();
        self.store
            .save_dialog_info(&DialogInfo {
                chat_scene: created.chat_mode.to_string(),
                app_code: app_code.unwrap_or_default(),
            })
            .await?;

        println!("new conversation {} ({})", created.conv_uid, created.chat_mode);
        Ok(())
    }

    async fn new_dialogue(&mut self, mode: Option<&str>) -> Result<()> {
        let mode = match mode {
            Some(m) => ChatMode::parse(m),
            None => {
                let info = self.store.dialog_info().await?;
                if info.chat_scene.is_empty() {
                    ChatMode::parse(&self.config.chat_mode)
                } else {
                    ChatMode::parse(&info.chat_scene)
                }
            }
        };
        let app_code = self.config.app_code.clone();
        self.start_session(mode, app_code).await
    }

    async fn list_dialogues(&mut self) -> Result<()> {
        let reply = self.client.list_dialogues().await?;
        self.dialogues = reply.into_data().unwrap_or_default();
        if self.dialogues.is_empty() {
            println!("no conversations yet");
        }
        for dialogue in &self.dialogues {
            println!(
                "{}  {:<24} {}",
                dialogue.conv_uid,
                dialogue.chat_mode.to_string(),
                dialogue.title()
            );
        }
        Ok(())
    }

    async fn open_dialogue(&mut self, conv_uid: &str) -> Result<()> {
        if self.dialogues.is_empty() {
            let reply = self.client.list_dialogues().await?;
            self.dialogues = reply.into_data().unwrap_or_default();
        }
        let Some(dialogue) = self.dialogues.iter().find(|d| d.conv_uid == conv_uid).cloned() else {
            println!("no conversation {}", conv_uid);
            return Ok(());
        };

        if clears_on_switch(&self.current_mode(), &dialogue.chat_mode) {
            self.params.selection = None;
        }
        let affordances = ParamAffordances::from_needs(&dialogue.param_need);
        if let Some(bound) = affordances.bound_value.clone() {
            self.params.selection = Some(ResourceSelection::Single(bound));
        }

        self.session = Some(
            ChatSession::new(&dialogue.conv_uid, dialogue.chat_mode.clone(), self.model_name())
                .with_app_code(dialogue.app_code.clone()),
        );
        self.dialogue = Some(dialogue);
        self.feedback.clear();
        self.show_history().await
    }

    async fn show_history(&mut self) -> Result<()> {
        let Some(session) = self.session.as_mut() else {
            println!("no conversation; use /new or /open");
            return Ok(());
        };
        let reply = self.client.chat_history(session.conv_uid()).await?;
        let turns = reply.into_data().unwrap_or_default();
        session.hydrate(turns)?;
        for turn in session.history() {
            print_turn(turn);
        }
        Ok(())
    }

    fn bind_resources(&mut self, resources: &str) {
        let default_kind = self
            .current_affordances()
            .resource_kind
            .unwrap_or(ResourceKind::Database);
        let refs: Vec<ResourceRef> = resources
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|item| match item.rsplit_once(':') {
                Some((name, kind)) => ResourceRef::new(
                    name,
                    ResourceKind::from_str(kind).unwrap_or(default_kind),
                ),
                None => ResourceRef::new(item, default_kind),
            })
            .collect();

        self.params.selection = match refs.as_slice() {
            [] => None,
            [only] => Some(ResourceSelection::Single(only.name.clone())),
            _ => Some(ResourceSelection::Multi(refs.clone())),
        };
        if refs.len() > 1 {
            println!(
                "bound {} resources; suggested mode {} (/team to start one)",
                refs.len(),
                resource::determine_chat_mode(&refs)
            );
        } else if let Some(selection) = &self.params.selection {
            println!("bound {}", selection.names().join(", "));
        }
    }

    async fn start_team(&mut self) -> Result<()> {
        let refs = match &self.params.selection {
            Some(ResourceSelection::Multi(refs)) => refs.clone(),
            Some(ResourceSelection::Single(name)) => {
                vec![ResourceRef::new(name.clone(), ResourceKind::Database)]
            }
            None => Vec::new(),
        };
        if refs.is_empty() {
            println!("bind resources first with /use");
            return Ok(());
        }

        let mode = resource::determine_chat_mode(&refs);
        if refs.len() > 1 {
            let plan = resource::auto_plan_team(&refs, &self.model_name());
            tracing::info!(
                "Auto-planned team {} with {} agents",
                plan.app_code,
                plan.agents.len()
            );
            for agent in &plan.agents {
                println!("  {} ({}): {}", agent.role, agent.agent_name, agent.goal);
            }
            let selection = self.params.selection.clone();
            self.start_session(mode, Some(plan.app_code)).await?;
            self.params.selection = selection;
        } else {
            self.start_session(mode, None).await?;
        }
        Ok(())
    }

    async fn set_prompt(&mut self, code: &str) -> Result<()> {
        let Some(session) = &self.session else {
            println!("no conversation; use /new first");
            return Ok(());
        };
        self.store.set_prompt_code(session.conv_uid(), code).await?;
        println!("prompt {} will be used for the next message", code);
        Ok(())
    }

    fn attach_image(&mut self, source: &str) -> Result<()> {
        let item = if source.starts_with("http://") || source.starts_with("https://") {
            ContentItem::image_url(source, None)
        } else {
            let path = std::path::Path::new(source);
            let data = std::fs::read(path).with_context(|| format!("Failed to read {}", source))?;
            let mime = match path.extension().and_then(|e| e.to_str()).map(str::to_lowercase) {
                Some(ext) if ext == "png" => "image/png",
                Some(ext) if ext == "gif" => "image/gif",
                Some(ext) if ext == "webp" => "image/webp",
                _ => "image/jpeg",
            };
            let name = path.file_name().and_then(|n| n.to_str());
            ContentItem::image_bytes(mime, &data, name)
        };
        self.attachments.push(item);
        println!("{} attachment(s) queued for the next message", self.attachments.len());
        Ok(())
    }

    fn current_affordances(&self) -> ParamAffordances {
        match &self.dialogue {
            Some(d) if !d.param_need.is_empty() => ParamAffordances::from_needs(&d.param_need),
            _ => ParamAffordances::for_mode(&self.current_mode()),
        }
    }

    async fn send(&mut self, text: String) -> Result<()> {
        if self.session.is_none() {
            self.new_dialogue(None).await?;
        }

        let affordances = self.current_affordances();
        let dialogue_param = self.dialogue.as_ref().and_then(|d| d.select_param.clone());
        let submission = build_submission(&affordances, &self.params, dialogue_param.as_ref());
        let mut options = match submission {
            Ok(options) => options,
            Err(ChatError::ResourceRequired) => {
                println!("{} (use /use <database>)", ChatError::ResourceRequired);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        options.model_name = self.config.model_name.clone();
        options.incremental = self.config.incremental;
        options.prompt_code = self
            .store
            .take_prompt_code(session.conv_uid(), session.chat_mode())
            .await?;

        let input = resource::compose_input(
            session.chat_mode(),
            self.params.selection.as_ref(),
            &text,
            std::mem::take(&mut self.attachments),
        );

        let api: Arc<dyn ChatApi> = self.client.clone();
        let handle = session.abort_handle();
        let finished = CancellationToken::new();
        let watcher = {
            let finished = finished.clone();
            let client = self.client.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        if let Err(e) = handle.stop(&*client).await {
                            tracing::warn!("Failed to stop round on server: {}", e);
                        }
                    }
                    _ = finished.cancelled() => {}
                }
            })
        };

        let mut printed = String::new();
        let result = session
            .send_observed(api, input, options, |turn| {
                print_delta(&mut printed, &turn.context);
            })
            .await;
        finished.cancel();
        let _ = watcher.await;

        match result {
            Ok(state) => {
                let reply = session
                    .history()
                    .last()
                    .map(|t| t.context.clone())
                    .unwrap_or_default();
                match state {
                    StreamState::Failed(message) => println!("\n{}", message),
                    StreamState::Aborted => println!("\n[stopped]"),
                    _ => {
                        print_delta(&mut printed, &reply);
                        println!();
                        if printed.contains("```") || printed.contains("<chart-view") {
                            print_blocks(&reply);
                        }
                    }
                }
                Ok(())
            }
            Err(ChatError::EmptyInput) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn tracker(&mut self, order: i64) -> Option<&mut FeedbackTracker> {
        let session = self.session.as_ref()?;
        if !self.feedback.contains_key(&order) {
            let turn = session
                .history()
                .iter()
                .find(|t| t.role == Role::View && t.order == order)?;
            let tracker = FeedbackTracker::for_turn(session.conv_uid(), turn);
            self.feedback.insert(order, tracker);
        }
        self.feedback.get_mut(&order)
    }

    async fn like(&mut self, order: i64) -> Result<()> {
        let client = self.client.clone();
        let Some(tracker) = self.tracker(order) else {
            println!("no reply with order {}", order);
            return Ok(());
        };
        let status = tracker.toggle_like(&*client).await?;
        println!("reply {}: {:?}", order, status);
        Ok(())
    }

    async fn unlike(&mut self, order: i64) -> Result<()> {
        let client = self.client.clone();
        if self.tracker(order).is_none() {
            println!("no reply with order {}", order);
            return Ok(());
        }

        let step = match self.tracker(order) {
            Some(tracker) => tracker.toggle_unlike(&*client).await?,
            None => return Ok(()),
        };
        let reasons = match step {
            DislikeStep::Cancelled(status) => {
                println!("reply {}: {:?}", order, status);
                return Ok(());
            }
            DislikeStep::ChooseReasons(reasons) => reasons,
        };

        for (i, reason) in reasons.iter().enumerate() {
            println!("  {}. {}", i + 1, reason.reason);
        }
        let picked = self.ask("reasons (numbers, comma separated): ").await?;
        let reason_types: Vec<String> = picked
            .split(',')
            .filter_map(|n| n.trim().parse::<usize>().ok())
            .filter_map(|n| reasons.get(n.wrapping_sub(1)))
            .map(|r| r.reason_type.clone())
            .collect();
        let remark = self.ask("remark: ").await?;

        if let Some(tracker) = self.tracker(order) {
            let status = tracker
                .submit_dislike(&*client, reason_types, &remark)
                .await?;
            println!("reply {}: {:?}", order, status);
        }
        Ok(())
    }

    async fn ask(&mut self, question: &str) -> Result<String> {
        print!("{}", question);
        let _ = std::io::stdout().flush();
        Ok(self
            .lines
            .next_line()
            .await
            .context("Failed to read stdin")?
            .unwrap_or_default())
    }

    async fn delete_dialogue(&mut self, conv_uid: &str) -> Result<()> {
        let reply = self.client.delete_dialogue(conv_uid).await?;
        if !reply.is_success() {
            return Ok(());
        }
        self.dialogues.retain(|d| d.conv_uid != conv_uid);
        if self.session.as_ref().is_some_and(|s| s.conv_uid() == conv_uid) {
            self.session = None;
            self.dialogue = None;
            self.feedback.clear();
        }
        println!("deleted {}", conv_uid);
        Ok(())
    }

    fn export(&self, path: Option<&str>) -> Result<()> {
        let Some(session) = &self.session else {
            println!("no conversation to export");
            return Ok(());
        };
        let dialogue = self.dialogue.clone().unwrap_or_else(|| Dialogue {
            conv_uid: session.conv_uid().to_string(),
            user_input: session
                .history()
                .iter()
                .find(|t| t.role == Role::Human)
                .map(|t| UserInput::Text(t.context.clone())),
            user_name: None,
            chat_mode: session.chat_mode().clone(),
            select_param: self
                .params
                .selection
                .as_ref()
                .and_then(resource::select_param_for),
            app_code: session.app_code().map(str::to_string),
            param_need: Vec::new(),
        });

        let markdown = export_to_markdown(&dialogue, session.history());
        let path = path
            .map(str::to_string)
            .unwrap_or_else(|| format!("datachat-{}.md", session.conv_uid()));
        std::fs::write(&path, markdown).with_context(|| format!("Failed to write {}", path))?;
        println!("exported to {}", path);
        Ok(())
    }
}

/// Print what `context` adds to what is already on screen.
fn print_delta(printed: &mut String, context: &str) {
    if let Some(rest) = context.strip_prefix(printed.as_str()) {
        print!("{}", rest);
    } else {
        print!("\n{}", context);
    }
    printed.clear();
    printed.push_str(context);
    let _ = std::io::stdout().flush();
}

fn print_turn(turn: &Turn) {
    match turn.role {
        Role::Human => println!("\n#{} you: {}", turn.order, turn.context),
        Role::System => {}
        Role::View | Role::Ai => {
            let speaker = if turn.model_name.is_empty() {
                "assistant"
            } else {
                turn.model_name.as_str()
            };
            println!("#{} {}:", turn.order, speaker);
            print_blocks(&turn.context);
        }
    }
}

fn print_blocks(context: &str) {
    for block in extract_blocks(context) {
        match block {
            ContentBlock::Text(text) => println!("{}", text),
            ContentBlock::Code { language, code } => {
                println!("```{}\n{}```", language.unwrap_or_default(), code)
            }
            ContentBlock::Vis { kind, payload } => {
                let pretty = serde_json::to_string_pretty(&payload).unwrap_or_default();
                println!("[{}]\n{}", kind.as_str(), pretty);
            }
            ContentBlock::ChartView(view) => {
                for tab in view.tabs() {
                    match tab {
                        ChartTab::Chart => println!("[chart: {}]", view.chart_type),
                        ChartTab::Sql if !view.sql.is_empty() => println!("SQL: {}", view.sql),
                        ChartTab::Sql => {}
                        ChartTab::Data => print!("{}", view.to_markdown_table()),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("   "), None);
        assert_eq!(
            Command::parse("how many users?"),
            Some(Command::Send("how many users?".into()))
        );
        assert_eq!(Command::parse("/new"), Some(Command::New(None)));
        assert_eq!(
            Command::parse("/new chat_knowledge"),
            Some(Command::New(Some("chat_knowledge".into())))
        );
        assert_eq!(Command::parse("/like 3"), Some(Command::Like(3)));
        assert_eq!(Command::parse("/unlike 2"), Some(Command::Unlike(2)));
        assert_eq!(
            Command::parse("/use sales:database, docs:knowledge"),
            Some(Command::Use("sales:database, docs:knowledge".into()))
        );
        assert_eq!(Command::parse("/quit"), Some(Command::Quit));
        assert!(matches!(Command::parse("/like x"), Some(Command::Invalid(_))));
        assert!(matches!(Command::parse("/open"), Some(Command::Invalid(_))));
        assert!(matches!(Command::parse("/frobnicate"), Some(Command::Invalid(_))));
    }
}
