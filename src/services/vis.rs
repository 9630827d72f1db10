use std::ops::Range;

use pulldown_cmark::{CodeBlockKind, Event, Options, Parser, Tag, TagEnd};
use serde::Deserialize;
use serde_json::{Map, Value};

/// Fenced block languages the server uses for structured widgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisKind {
    Chart,
    DbChart,
    Code,
    Dashboard,
    Plugin,
    Thinking,
    ConvertError,
    AppLink,
    ApiResponse,
    AgentMessages,
}

impl VisKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            VisKind::Chart => "vis-chart",
            VisKind::DbChart => "vis-db-chart",
            VisKind::Code => "vis-code",
            VisKind::Dashboard => "vis-dashboard",
            VisKind::Plugin => "vis-plugin",
            VisKind::Thinking => "vis-thinking",
            VisKind::ConvertError => "vis-convert-error",
            VisKind::AppLink => "vis-app-link",
            VisKind::ApiResponse => "vis-api-response",
            VisKind::AgentMessages => "agent-messages",
        }
    }

    pub fn from_lang(lang: &str) -> Option<Self> {
        match lang {
            "vis-chart" => Some(VisKind::Chart),
            "vis-db-chart" => Some(VisKind::DbChart),
            "vis-code" => Some(VisKind::Code),
            "vis-dashboard" => Some(VisKind::Dashboard),
            "vis-plugin" => Some(VisKind::Plugin),
            "vis-thinking" => Some(VisKind::Thinking),
            "vis-convert-error" => Some(VisKind::ConvertError),
            "vis-app-link" => Some(VisKind::AppLink),
            "vis-api-response" => Some(VisKind::ApiResponse),
            "agent-messages" => Some(VisKind::AgentMessages),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartTab {
    Chart,
    Sql,
    Data,
}

/// Payload of a `<chart-view content="...">` tag.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChartView {
    #[serde(rename = "type", default = "ChartView::table_type")]
    pub chart_type: String,
    #[serde(default)]
    pub sql: String,
    #[serde(default)]
    pub data: Vec<Map<String, Value>>,
}

impl ChartView {
    pub const TABLE: &'static str = "response_table";

    fn table_type() -> String {
        Self::TABLE.to_string()
    }

    /// Parse the attribute payload; anything unreadable becomes an empty table.
    pub fn parse(content: &str) -> Self {
        serde_json::from_str(content).unwrap_or_else(|e| {
            tracing::debug!("Unreadable chart-view payload: {}", e);
            Self {
                chart_type: Self::table_type(),
                sql: String::new(),
                data: Vec::new(),
            }
        })
    }

    pub fn is_table(&self) -> bool {
        self.chart_type == Self::TABLE
    }

    /// Tabs in presentation order; plain tables have no chart.
    pub fn tabs(&self) -> Vec<ChartTab> {
        if self.is_table() {
            vec![ChartTab::Data, ChartTab::Sql]
        } else {
            vec![ChartTab::Chart, ChartTab::Sql, ChartTab::Data]
        }
    }

    /// Column names, taken from the first row.
    pub fn columns(&self) -> Vec<String> {
        self.data
            .first()
            .map(|row| row.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn to_markdown_table(&self) -> String {
        let columns = self.columns();
        if columns.is_empty() {
            return String::new();
        }

        let mut out = format!("| {} |\n", columns.join(" | "));
        out.push_str(&format!("|{}\n", " --- |".repeat(columns.len())));
        for row in &self.data {
            let cells: Vec<String> = columns
                .iter()
                .map(|c| match row.get(c) {
                    Some(Value::String(s)) => s.clone(),
                    Some(Value::Null) | None => String::new(),
                    Some(other) => other.to_string(),
                })
                .collect();
            out.push_str(&format!("| {} |\n", cells.join(" | ")));
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ContentBlock {
    /// Markdown prose between structured blocks, kept verbatim.
    Text(String),
    Code {
        language: Option<String>,
        code: String,
    },
    Vis {
        kind: VisKind,
        payload: Value,
    },
    ChartView(ChartView),
}

/// Split an assistant reply into prose, code, vis widgets and chart views.
pub fn extract_blocks(input: &str) -> Vec<ContentBlock> {
    let options = Options::ENABLE_STRIKETHROUGH | Options::ENABLE_TABLES;
    let mut blocks = Vec::new();
    let mut cursor = 0;
    let mut code: Option<(Option<String>, String, Range<usize>)> = None;

    for (event, range) in Parser::new_ext(input, options).into_offset_iter() {
        match event {
            Event::Start(Tag::CodeBlock(kind)) => {
                push_prose(&mut blocks, &input[cursor..range.start]);
                let language = match kind {
                    CodeBlockKind::Fenced(lang) => {
                        let lang = lang.trim().to_string();
                        if lang.is_empty() {
                            None
                        } else {
                            Some(lang)
                        }
                    }
                    CodeBlockKind::Indented => None,
                };
                code = Some((language, String::new(), range));
            }
            Event::Text(text) if code.is_some() => {
                if let Some((_, buf, _)) = code.as_mut() {
                    buf.push_str(&text);
                }
            }
            Event::End(TagEnd::CodeBlock) => {
                if let Some((language, body, span)) = code.take() {
                    blocks.push(code_block(language, body));
                    cursor = span.end.max(range.end);
                }
            }
            Event::Html(html) | Event::InlineHtml(html) if code.is_none() => {
                let views = chart_views(&html);
                if views.is_empty() {
                    if html.trim_start().starts_with("</chart-view") {
                        push_prose(&mut blocks, &input[cursor..range.start]);
                        cursor = range.end;
                    }
                    continue;
                }
                push_prose(&mut blocks, &input[cursor..range.start]);
                blocks.extend(views.into_iter().map(ContentBlock::ChartView));
                cursor = range.end;
            }
            _ => {}
        }
    }

    if cursor < input.len() {
        push_prose(&mut blocks, &input[cursor..]);
    }
    blocks
}

fn push_prose(blocks: &mut Vec<ContentBlock>, text: &str) {
    let text = text.trim();
    if !text.is_empty() {
        blocks.push(ContentBlock::Text(text.to_string()));
    }
}

fn code_block(language: Option<String>, body: String) -> ContentBlock {
    let Some(kind) = language.as_deref().and_then(VisKind::from_lang) else {
        return ContentBlock::Code {
            language,
            code: body,
        };
    };
    match serde_json::from_str::<Value>(body.trim()) {
        Ok(payload) => ContentBlock::Vis { kind, payload },
        Err(e) => {
            tracing::debug!("{} block is not JSON, showing as code: {}", kind.as_str(), e);
            ContentBlock::Code {
                language,
                code: body,
            }
        }
    }
}

/// Every `<chart-view content="...">` tag in an HTML fragment.
fn chart_views(html: &str) -> Vec<ChartView> {
    let mut views = Vec::new();
    let mut rest = html;
    while let Some(start) = rest.find("<chart-view") {
        rest = &rest[start + "<chart-view".len()..];
        let end = rest.find('>').unwrap_or(rest.len());
        let attrs = &rest[..end];
        let content = attribute(attrs, "content").unwrap_or_default();
        views.push(ChartView::parse(&unescape_html(&content)));
        rest = &rest[end..];
    }
    views
}

fn attribute(attrs: &str, name: &str) -> Option<String> {
    let key = format!("{}=", name);
    let at = attrs.find(&key)? + key.len();
    let value = &attrs[at..];
    let quote = value.chars().next()?;
    if quote == '"' || quote == '\'' {
        let inner = &value[1..];
        let close = inner.find(quote)?;
        Some(inner[..close].to_string())
    } else {
        Some(value.split_whitespace().next().unwrap_or("").to_string())
    }
}

fn unescape_html(s: &str) -> String {
    s.replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// Reply text as copied to the clipboard, without `\trelations:` trailers.
pub fn copyable_context(context: &str) -> String {
    let mut out = String::with_capacity(context.len());
    let mut rest = context;
    while let Some(at) = rest.find("\trelations:") {
        out.push_str(&rest[..at]);
        rest = &rest[at..];
        rest = match rest.find('\n') {
            Some(nl) => &rest[nl..],
            None => "",
        };
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_prose_and_vis_blocks() {
        let input = "Here is the result:\n\n```vis-db-chart\n{\"type\": \"bar\", \"sql\": \"SELECT 1\"}\n```\n\nDone.";
        let blocks = extract_blocks(input);
        assert_eq!(
            blocks,
            vec![
                ContentBlock::Text("Here is the result:".into()),
                ContentBlock::Vis {
                    kind: VisKind::DbChart,
                    payload: json!({"type": "bar", "sql": "SELECT 1"}),
                },
                ContentBlock::Text("Done.".into()),
            ]
        );
    }

    #[test]
    fn test_invalid_vis_payload_falls_back_to_code() {
        let blocks = extract_blocks("```vis-thinking\nstill thinking...\n```");
        assert_eq!(
            blocks,
            vec![ContentBlock::Code {
                language: Some("vis-thinking".into()),
                code: "still thinking...\n".into(),
            }]
        );
    }

    #[test]
    fn test_plain_code_block_keeps_language() {
        let blocks = extract_blocks("```sql\nSELECT * FROM orders;\n```");
        assert_eq!(
            blocks,
            vec![ContentBlock::Code {
                language: Some("sql".into()),
                code: "SELECT * FROM orders;\n".into(),
            }]
        );
    }

    #[test]
    fn test_agent_messages_block() {
        let blocks = extract_blocks("```agent-messages\n[{\"sender\": \"planner\"}]\n```");
        assert!(matches!(
            &blocks[0],
            ContentBlock::Vis { kind: VisKind::AgentMessages, payload } if payload[0]["sender"] == "planner"
        ));
    }

    #[test]
    fn test_chart_view_tag() {
        let input = "Result:\n\n<chart-view content=\"{&quot;type&quot;: &quot;response_table&quot;, &quot;sql&quot;: &quot;SELECT a FROM t&quot;, &quot;data&quot;: [{&quot;a&quot;: 1}]}\"></chart-view>\n";
        let blocks = extract_blocks(input);

        assert_eq!(blocks[0], ContentBlock::Text("Result:".into()));
        let ContentBlock::ChartView(view) = &blocks[1] else {
            panic!("expected chart view, got {:?}", blocks[1]);
        };
        assert!(view.is_table());
        assert_eq!(view.sql, "SELECT a FROM t");
        assert_eq!(view.tabs(), vec![ChartTab::Data, ChartTab::Sql]);
        assert_eq!(view.columns(), vec!["a".to_string()]);
        assert_eq!(blocks.len(), 2);
    }

    #[test]
    fn test_chart_view_tabs_for_charts() {
        let view = ChartView::parse(r#"{"type": "response_line_chart", "sql": "", "data": []}"#);
        assert_eq!(view.tabs(), vec![ChartTab::Chart, ChartTab::Sql, ChartTab::Data]);
    }

    #[test]
    fn test_unreadable_chart_view_is_empty_table() {
        let view = ChartView::parse("{broken");
        assert!(view.is_table());
        assert!(view.data.is_empty());
        assert_eq!(view.to_markdown_table(), "");
    }

    #[test]
    fn test_markdown_table() {
        let view = ChartView::parse(r#"{"type": "response_table", "data": [{"city": "Oslo", "n": 3}, {"city": "Rome", "n": null}]}"#);
        assert_eq!(
            view.to_markdown_table(),
            "| city | n |\n| --- | --- |\n| Oslo | 3 |\n| Rome |  |\n"
        );
    }

    #[test]
    fn test_columns_keep_row_order() {
        let view = ChartView::parse(r#"{"type": "response_table", "data": [{"region": "north", "amount": 12, "city": "Oslo"}]}"#);
        assert_eq!(view.columns(), vec!["region", "amount", "city"]);
    }

    #[test]
    fn test_copyable_context_strips_relations() {
        assert_eq!(
            copyable_context("Answer one\trelations:doc1,doc2\nAnswer two\trelations:doc3"),
            "Answer one\nAnswer two"
        );
        assert_eq!(copyable_context("plain"), "plain");
    }
}
