use serde::Serialize;
use serde_json::{json, Value};

use super::chat::{ChatError, SendOptions};
use crate::models::{
    ChatMode, ContentItem, ParamKind, ParamNeed, ResourceKind, ResourceRef, ResourceSelection,
    UserInput,
};

pub const DEFAULT_TEMPERATURE: f32 = 0.0;
pub const DEFAULT_MAX_NEW_TOKENS: u32 = 4000;

/// What an app's declared parameter needs let the user set on a message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamAffordances {
    pub resource: bool,
    pub resource_kind: Option<ResourceKind>,
    /// Value the app pre-binds to its resource, if any.
    pub bound_value: Option<String>,
    pub temperature: bool,
    pub max_new_tokens: bool,
    pub model: bool,
}

impl ParamAffordances {
    pub fn from_needs(needs: &[ParamNeed]) -> Self {
        let mut affordances = Self::default();
        for need in needs {
            match need.kind {
                ParamKind::Resource => {
                    // first declaration wins
                    if !affordances.resource {
                        affordances.resource = true;
                        affordances.resource_kind = need.value_str().and_then(ResourceKind::from_str);
                        affordances.bound_value =
                            need.bind_value.clone().filter(|v| !v.is_empty());
                    }
                }
                ParamKind::Temperature => affordances.temperature = true,
                ParamKind::MaxNewTokens => affordances.max_new_tokens = true,
                ParamKind::Model => affordances.model = true,
                ParamKind::Other => {}
            }
        }
        affordances
    }

    /// Affordances of the built-in scenes, for conversations not tied to an app.
    pub fn for_mode(mode: &ChatMode) -> Self {
        let resource_kind = if mode.is_database_scene() {
            Some(ResourceKind::Database)
        } else if mode.is_knowledge_scene() {
            Some(ResourceKind::Knowledge)
        } else if *mode == ChatMode::Excel {
            Some(ResourceKind::File)
        } else {
            None
        };
        Self {
            resource: resource_kind.is_some(),
            resource_kind,
            bound_value: None,
            temperature: true,
            max_new_tokens: true,
            model: true,
        }
    }

    pub fn requires_database(&self) -> bool {
        self.resource && self.resource_kind == Some(ResourceKind::Database)
    }
}

/// Values the user has dialled in on the input bar.
#[derive(Debug, Clone, PartialEq)]
pub struct InputParams {
    pub selection: Option<ResourceSelection>,
    pub temperature: f32,
    pub max_new_tokens: u32,
}

impl Default for InputParams {
    fn default() -> Self {
        Self {
            selection: None,
            temperature: DEFAULT_TEMPERATURE,
            max_new_tokens: DEFAULT_MAX_NEW_TOKENS,
        }
    }
}

/// Turn the input bar state into per-message options, refusing to send when
/// a database app has nothing bound. Only declared parameters are sent.
pub fn build_submission(
    affordances: &ParamAffordances,
    params: &InputParams,
    dialogue_select_param: Option<&Value>,
) -> Result<SendOptions, ChatError> {
    let bound = params.selection.as_ref().filter(|s| s.is_bound());

    if affordances.requires_database() && bound.is_none() {
        return Err(ChatError::ResourceRequired);
    }

    let mut options = SendOptions::default();
    if affordances.temperature {
        options.temperature = Some(params.temperature);
    }
    if affordances.max_new_tokens {
        options.max_new_tokens = Some(params.max_new_tokens);
    }
    if affordances.resource {
        options.select_param = match bound {
            Some(selection) => select_param_for(selection),
            None => dialogue_select_param.cloned(),
        };
    }
    Ok(options)
}

/// The message body to send. Excel conversations carry their bound files in
/// the message itself, ahead of any attachments and the text; every other
/// scene passes resources through `select_param` only.
pub fn compose_input(
    mode: &ChatMode,
    selection: Option<&ResourceSelection>,
    text: &str,
    attachments: Vec<ContentItem>,
) -> UserInput {
    let mut content: Vec<ContentItem> = Vec::new();
    if *mode == ChatMode::Excel {
        match selection.filter(|s| s.is_bound()) {
            Some(ResourceSelection::Single(path)) => content.push(file_item(path)),
            Some(ResourceSelection::Multi(refs)) => content.extend(
                refs.iter()
                    .filter(|r| r.kind == ResourceKind::File)
                    .map(|r| file_item(&r.name)),
            ),
            None => {}
        }
    }
    content.extend(attachments);

    if content.is_empty() {
        UserInput::from(text)
    } else {
        UserInput::with_attachments(text, content)
    }
}

fn file_item(path: &str) -> ContentItem {
    let file_name = path.rsplit(['/', '\\']).next().unwrap_or(path);
    ContentItem::file_url(path, file_name)
}

/// Chat mode for a fresh conversation over `resources`.
pub fn determine_chat_mode(resources: &[ResourceRef]) -> ChatMode {
    match resources {
        [] => ChatMode::Normal,
        [only] if only.kind == ResourceKind::Database => ChatMode::DbExecute,
        [_] => ChatMode::Knowledge,
        _ => ChatMode::Agent,
    }
}

/// The `select_param` value the server expects for a selection.
pub fn select_param_for(selection: &ResourceSelection) -> Option<Value> {
    match selection {
        ResourceSelection::Single(name) if selection.is_bound() => Some(Value::String(name.clone())),
        ResourceSelection::Single(_) => None,
        ResourceSelection::Multi(refs) => match refs.as_slice() {
            [] => None,
            [only] => Some(Value::String(only.name.clone())),
            _ => Some(json!({
                "app_type": "multi_resource",
                "resources": refs,
                "team_mode": "auto_plan",
            })),
        },
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentSpec {
    pub agent_name: String,
    pub resource_name: Option<String>,
    pub resource_type: Option<ResourceKind>,
    pub role: String,
    pub goal: String,
    pub constraints: Vec<String>,
    pub description: String,
}

impl AgentSpec {
    fn specialist(index: usize, resource: &ResourceRef) -> Self {
        let (agent_name, goal) = match resource.kind {
            ResourceKind::Database => (
                "DataScientistAgent",
                format!("Analyze and query data from {} database", resource.name),
            ),
            _ => (
                "ToolAssistantAgent",
                format!(
                    "Search and retrieve information from {} knowledge space",
                    resource.name
                ),
            ),
        };
        Self {
            agent_name: agent_name.to_string(),
            resource_name: Some(resource.name.clone()),
            resource_type: Some(resource.kind),
            role: format!("{}_specialist_{}", resource.kind.as_str(), index),
            goal,
            constraints: vec![
                format!("Only use data from {}", resource.name),
                "Collaborate with other agents when needed".to_string(),
            ],
            description: format!(
                "Agent specialized in {} {}",
                resource.kind.as_str(),
                resource.name
            ),
        }
    }

    fn coordinator() -> Self {
        Self {
            agent_name: "ConversableAgent".to_string(),
            resource_name: None,
            resource_type: None,
            role: "coordinator".to_string(),
            goal: "Coordinate between different data sources and synthesize results".to_string(),
            constraints: vec![
                "Delegate tasks to appropriate specialist agents".to_string(),
                "Combine results from multiple sources".to_string(),
                "Provide unified responses".to_string(),
            ],
            description: "Coordinator agent for multi-resource queries".to_string(),
        }
    }
}

/// An ad hoc agent team covering several resources at once.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TeamPlan {
    pub app_code: String,
    pub model_name: String,
    pub agents: Vec<AgentSpec>,
}

/// One specialist per resource, led by a coordinator when there is more than one.
pub fn auto_plan_team(resources: &[ResourceRef], model_name: &str) -> TeamPlan {
    let mut agents: Vec<AgentSpec> = resources
        .iter()
        .enumerate()
        .map(|(i, r)| AgentSpec::specialist(i, r))
        .collect();
    if resources.len() > 1 {
        agents.insert(0, AgentSpec::coordinator());
    }

    TeamPlan {
        app_code: format!("multi_resource_{}", chrono::Utc::now().timestamp_millis()),
        model_name: model_name.to_string(),
        agents,
    }
}

/// Whether switching scenes invalidates the bound resource.
pub fn clears_on_switch(from: &ChatMode, to: &ChatMode) -> bool {
    (from.is_database_scene() && to.is_knowledge_scene())
        || (from.is_knowledge_scene() && to.is_database_scene())
}
