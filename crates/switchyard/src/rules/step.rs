//! Action-call parsing.
//!
//! An action is written as a call: `name(arg, arg, ...)`. Whitespace is not
//! significant and arguments are split on commas, except for single-parameter
//! actions (`json`) whose whole parenthesized body is kept verbatim so a JSON
//! literal survives untouched.

use std::fmt;

/// Known pipeline actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    /// `proxy(scheme://host[:port])`
    Proxy,
    /// `balancing(addr, addr, ...)`
    Balancing,
    /// `call(script)`
    Call,
    /// `json(literal)`
    Json,
    /// Anything else; executed as a no-op.
    Unknown,
}

impl ActionKind {
    pub fn from_name(name: &str) -> Self {
        match name {
            "proxy" => ActionKind::Proxy,
            "balancing" => ActionKind::Balancing,
            "call" => ActionKind::Call,
            "json" => ActionKind::Json,
            _ => ActionKind::Unknown,
        }
    }

    /// Whether the parenthesized body is one verbatim argument.
    pub fn is_single_parameter(self) -> bool {
        matches!(self, ActionKind::Json)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::Proxy => "proxy",
            ActionKind::Balancing => "balancing",
            ActionKind::Call => "call",
            ActionKind::Json => "json",
            ActionKind::Unknown => "unknown",
        }
    }
}

/// One parsed action invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    /// The action call as written in the rules file
    pub source: String,
    /// Action name token
    pub action: String,
    pub kind: ActionKind,
    pub parameters: Vec<String>,
}

impl Step {
    /// Parse an action call. Never fails: malformed input keeps whatever
    /// parameters were complete before the string ended, and the executor
    /// rejects steps that lack required parameters.
    pub fn parse(source: &str) -> Self {
        let (head, body) = match source.find('(') {
            Some(open) => (&source[..open], Some(&source[open + 1..])),
            None => (source, None),
        };

        let action: String = head
            .chars()
            .filter(|c| !c.is_whitespace() && *c != ')')
            .collect();
        let kind = ActionKind::from_name(&action);

        let parameters = match body {
            None => Vec::new(),
            Some(body) if kind.is_single_parameter() => parse_verbatim(body),
            Some(body) => parse_list(body),
        };

        Self {
            source: source.to_string(),
            action,
            kind,
            parameters,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Everything up to the last closing parenthesis.
fn parse_verbatim(body: &str) -> Vec<String> {
    match body.rfind(')') {
        Some(close) if close > 0 => vec![body[..close].to_string()],
        _ => Vec::new(),
    }
}

fn parse_list(body: &str) -> Vec<String> {
    let mut parameters = Vec::new();
    let mut current = String::new();

    for c in body.chars() {
        match c {
            c if c.is_whitespace() => {}
            ',' => parameters.push(std::mem::take(&mut current)),
            ')' => {
                if !current.is_empty() {
                    parameters.push(current);
                }
                return parameters;
            }
            '(' => {}
            c => current.push(c),
        }
    }

    // Unterminated: the trailing argument was never closed.
    parameters
}
