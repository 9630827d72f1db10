use crate::models::{Dialogue, Role, Turn};

use super::vis::copyable_context;

pub fn export_to_markdown(dialogue: &Dialogue, turns: &[Turn]) -> String {
    let mut output = format!("# {}\n\n", dialogue.title());
    output.push_str(&format!(
        "> Mode: {} | Conversation: {} | Exported: {}\n\n",
        dialogue.chat_mode,
        dialogue.conv_uid,
        chrono::Local::now().format("%Y-%m-%d %H:%M")
    ));

    if let Some(param) = dialogue.select_param.as_ref().filter(|v| !v.is_null()) {
        let label = param
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| param.to_string());
        if !label.is_empty() {
            output.push_str(&format!("> Resource: {}\n\n", label));
        }
    }

    output.push_str("---\n\n");

    for turn in turns {
        let role_label = match turn.role {
            Role::Human => "You",
            Role::View | Role::Ai => {
                if turn.model_name.is_empty() {
                    "Assistant"
                } else {
                    turn.model_name.as_str()
                }
            }
            Role::System => continue,
        };
        output.push_str(&format!(
            "### {}\n\n{}\n\n",
            role_label,
            copyable_context(&turn.context)
        ));
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChatMode, UserInput};

    #[test]
    fn test_export_lists_turns() {
        let dialogue = Dialogue {
            conv_uid: "c-9".into(),
            user_input: Some(UserInput::from("top customers")),
            user_name: None,
            chat_mode: ChatMode::DbExecute,
            select_param: Some(serde_json::json!("sales_db")),
            app_code: None,
            param_need: Vec::new(),
        };
        let mut reply = Turn::placeholder(1, "proxyllm");
        reply.context = "Here they are\trelations:orders".into();
        let turns = vec![Turn::human("top customers".into(), 1, "proxyllm"), reply];

        let md = export_to_markdown(&dialogue, &turns);
        assert!(md.starts_with("# top customers\n\n"));
        assert!(md.contains("Mode: chat_with_db_execute | Conversation: c-9"));
        assert!(md.contains("> Resource: sales_db"));
        assert!(md.contains("### You\n\ntop customers\n\n"));
        assert!(md.contains("### proxyllm\n\nHere they are\n\n"));
    }
}
