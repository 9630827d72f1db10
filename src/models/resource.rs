use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Database,
    Knowledge,
    File,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Database => "database",
            ResourceKind::Knowledge => "knowledge",
            ResourceKind::File => "file",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "database" => Some(ResourceKind::Database),
            "knowledge" => Some(ResourceKind::Knowledge),
            "file" => Some(ResourceKind::File),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRef {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ResourceKind,
}

impl ResourceRef {
    pub fn new(name: impl Into<String>, kind: ResourceKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// The data source(s) a conversation is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResourceSelection {
    Single(String),
    Multi(Vec<ResourceRef>),
}

impl ResourceSelection {
    /// Whether the selection actually names something. Empty names and the
    /// stringified sentinels a browser form can leak (`"null"`, `"undefined"`)
    /// do not count as bound.
    pub fn is_bound(&self) -> bool {
        match self {
            ResourceSelection::Single(name) => {
                !name.is_empty() && name != "null" && name != "undefined"
            }
            ResourceSelection::Multi(refs) => !refs.is_empty(),
        }
    }

    pub fn names(&self) -> Vec<&str> {
        match self {
            ResourceSelection::Single(name) => vec![name.as_str()],
            ResourceSelection::Multi(refs) => refs.iter().map(|r| r.name.as_str()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selection_wire_shapes() {
        let single: ResourceSelection = serde_json::from_str("\"sales_db\"").unwrap();
        assert_eq!(single, ResourceSelection::Single("sales_db".to_string()));

        let multi: ResourceSelection =
            serde_json::from_str(r#"[{"name":"sales_db","type":"database"},{"name":"docs","type":"knowledge"}]"#)
                .unwrap();
        assert_eq!(
            multi,
            ResourceSelection::Multi(vec![
                ResourceRef::new("sales_db", ResourceKind::Database),
                ResourceRef::new("docs", ResourceKind::Knowledge),
            ])
        );
        assert_eq!(multi.names(), vec!["sales_db", "docs"]);
    }

    #[test]
    fn test_is_bound() {
        assert!(ResourceSelection::Single("db".into()).is_bound());
        assert!(!ResourceSelection::Single(String::new()).is_bound());
        assert!(!ResourceSelection::Single("undefined".into()).is_bound());
        assert!(!ResourceSelection::Multi(Vec::new()).is_bound());
    }
}
