//! Extension scripts for the `call` action.
//!
//! A script is identified by an id and receives a read-only snapshot of the
//! inbound request plus a response object it may commit once. Scripts that
//! commit nothing let the pipeline continue with the next step.

use crate::error::ScriptError;
use async_trait::async_trait;
use bytes::Bytes;
use hyper::Request;
use std::collections::HashMap;

mod rhai_engine;
pub use rhai_engine::RhaiScriptRunner;

/// Request snapshot handed to scripts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptRequest {
    pub method: String,
    /// Host as sent by the client, including any port
    pub host: String,
    pub path: String,
    /// Decoded query parameters, first value wins
    pub queries: HashMap<String, String>,
    /// Lowercased header names, first value wins
    pub headers: HashMap<String, String>,
}

impl ScriptRequest {
    pub fn from_request<B>(req: &Request<B>) -> Self {
        let mut headers = HashMap::new();
        for (name, value) in req.headers() {
            headers
                .entry(name.as_str().to_string())
                .or_insert_with(|| String::from_utf8_lossy(value.as_bytes()).into_owned());
        }

        let host = headers
            .get("host")
            .cloned()
            .or_else(|| req.uri().authority().map(|a| a.to_string()))
            .unwrap_or_default();

        Self {
            method: req.method().to_string(),
            host,
            path: req.uri().path().to_string(),
            queries: parse_query_string(req.uri().query()),
            headers,
        }
    }
}

/// Response committed by a script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptResponse {
    pub content_type: &'static str,
    pub body: Bytes,
}

/// Result of running a script.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptOutcome {
    /// `None` when the script returned without writing a response
    pub response: Option<ScriptResponse>,
}

/// Loads and runs extension scripts by id.
#[async_trait]
pub trait ScriptRunner: Send + Sync {
    async fn run(&self, script_id: &str, request: ScriptRequest)
        -> Result<ScriptOutcome, ScriptError>;
}

/// Parse a query string into decoded key/value pairs. Repeated keys keep the
/// first value; `+` decodes to a space.
pub fn parse_query_string(query: Option<&str>) -> HashMap<String, String> {
    let mut params = HashMap::new();
    let Some(query) = query else {
        return params;
    };

    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        params.entry(decode_component(key)).or_insert_with(|| decode_component(value));
    }
    params
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    match urlencoding::decode(&spaced) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => spaced,
    }
}
