//! Routing rules configuration.

use serde::{Deserialize, Serialize};

/// One declarative routing rule.
///
/// ```yaml
/// - rule: AppleWebKit\/\d+\.\d+\s
///   test: header.user-agent
///   do: json({"success":true})
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Rule {
    /// Pattern, or list of alternative patterns, anchored at the subject start
    #[serde(rename = "rule")]
    pub condition: OneOrMany,
    /// Subject selector: absent for the full URL, `header.<name>` for a header
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test: Option<String>,
    /// Action call, or ordered list of action calls
    #[serde(rename = "do")]
    pub actions: OneOrMany,
}

/// A YAML scalar or a sequence of scalars.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn as_slice(&self) -> &[String] {
        match self {
            OneOrMany::One(value) => std::slice::from_ref(value),
            OneOrMany::Many(values) => values,
        }
    }
}

impl From<&str> for OneOrMany {
    fn from(value: &str) -> Self {
        OneOrMany::One(value.to_string())
    }
}

impl From<Vec<&str>> for OneOrMany {
    fn from(values: Vec<&str>) -> Self {
        OneOrMany::Many(values.into_iter().map(str::to_string).collect())
    }
}
