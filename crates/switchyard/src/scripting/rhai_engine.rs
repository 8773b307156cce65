//! Rhai-backed script runner.
//!
//! Scripts live in a directory as `<id>.rhai` and must define
//! `fn handle(req, res)`. `req` is a map with `method`, `host`, `path`,
//! `queries` and `headers`; `res` exposes `text`, `html` and `json`, of which
//! at most one call may succeed. A global `fetch` performs outbound HTTP
//! requests and returns `#{ status, body }`.

use super::{ScriptOutcome, ScriptRequest, ScriptResponse, ScriptRunner};
use crate::error::ScriptError;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use rhai::{Dynamic, Engine, EvalAltResult, Map, Scope};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::debug;

type RhaiResult<T> = Result<T, Box<EvalAltResult>>;

const ENTRY_POINT: &str = "handle";
const SCRIPT_EXTENSION: &str = "rhai";
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_OPERATIONS: u64 = 10_000_000;

const TEXT_CONTENT_TYPE: &str = "text/plain";
const HTML_CONTENT_TYPE: &str = "text/html";
const JSON_CONTENT_TYPE: &str = "application/json";

/// Runs `call` scripts from a directory on the blocking thread pool.
#[derive(Debug, Clone)]
pub struct RhaiScriptRunner {
    scripts_dir: PathBuf,
    fetch_client: reqwest::Client,
}

impl RhaiScriptRunner {
    pub fn new(scripts_dir: impl Into<PathBuf>) -> Result<Self, reqwest::Error> {
        let fetch_client = reqwest::Client::builder().timeout(FETCH_TIMEOUT).build()?;
        Ok(Self {
            scripts_dir: scripts_dir.into(),
            fetch_client,
        })
    }

    /// Path of the script file for `script_id`. Ids must name a file
    /// directly inside the scripts directory.
    pub fn script_path(&self, script_id: &str) -> Result<PathBuf, ScriptError> {
        let invalid = script_id.is_empty()
            || script_id.contains(['/', '\\', '\0'])
            || script_id.contains("..");
        if invalid {
            return Err(ScriptError::InvalidId(script_id.to_string()));
        }
        Ok(self
            .scripts_dir
            .join(format!("{script_id}.{SCRIPT_EXTENSION}")))
    }
}

#[async_trait]
impl ScriptRunner for RhaiScriptRunner {
    async fn run(
        &self,
        script_id: &str,
        request: ScriptRequest,
    ) -> Result<ScriptOutcome, ScriptError> {
        let path = self.script_path(script_id)?;
        let source = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| ScriptError::Read { path, source })?;

        let fetcher = Fetcher {
            client: self.fetch_client.clone(),
            runtime: Handle::current(),
        };
        let id = script_id.to_string();

        debug!(script = %id, "Running script");
        tokio::task::spawn_blocking(move || execute(&id, &source, request, fetcher)).await?
    }
}

fn execute(
    id: &str,
    source: &str,
    request: ScriptRequest,
    fetcher: Fetcher,
) -> Result<ScriptOutcome, ScriptError> {
    let engine = create_engine(fetcher);
    let ast = engine.compile(source).map_err(|e| ScriptError::Compile {
        id: id.to_string(),
        reason: e.to_string(),
    })?;

    let responder = ScriptResponder::default();
    let mut scope = Scope::new();
    let _returned = engine
        .call_fn::<Dynamic>(
            &mut scope,
            &ast,
            ENTRY_POINT,
            (request_map(&request), responder.clone()),
        )
        .map_err(|e| ScriptError::Runtime {
            id: id.to_string(),
            reason: e.to_string(),
        })?;

    Ok(ScriptOutcome {
        response: responder.take(),
    })
}

fn create_engine(fetcher: Fetcher) -> Engine {
    let mut engine = Engine::new();
    engine.set_max_operations(MAX_OPERATIONS);

    engine
        .register_type_with_name::<ScriptResponder>("Response")
        .register_fn("text", ScriptResponder::text)
        .register_fn("html", ScriptResponder::html)
        .register_fn("json", ScriptResponder::json)
        .register_fn("text", |_: &mut ScriptResponder| -> RhaiResult<()> {
            Err("text() requires a value".into())
        })
        .register_fn("html", |_: &mut ScriptResponder| -> RhaiResult<()> {
            Err("html() requires a value".into())
        })
        .register_fn("json", |_: &mut ScriptResponder| -> RhaiResult<()> {
            Err("json() requires a map".into())
        });

    engine.register_fn("fetch", move |options: Dynamic| fetcher.fetch(options));
    engine.register_fn("fetch", || Dynamic::UNIT);

    engine
}

fn string_map<'a>(entries: impl Iterator<Item = (&'a String, &'a String)>) -> Map {
    entries
        .map(|(k, v)| (k.as_str().into(), Dynamic::from(v.clone())))
        .collect()
}

fn request_map(request: &ScriptRequest) -> Map {
    let mut map = Map::new();
    map.insert("method".into(), Dynamic::from(request.method.clone()));
    map.insert("host".into(), Dynamic::from(request.host.clone()));
    map.insert("path".into(), Dynamic::from(request.path.clone()));
    map.insert(
        "queries".into(),
        Dynamic::from(string_map(request.queries.iter())),
    );
    map.insert(
        "headers".into(),
        Dynamic::from(string_map(request.headers.iter())),
    );
    map
}

/// Strings are taken as-is, everything else by its display form.
fn dynamic_to_string(value: Dynamic) -> String {
    if value.is_string() {
        value.into_string().unwrap_or_default()
    } else {
        value.to_string()
    }
}

fn dynamic_to_json(value: &Dynamic) -> RhaiResult<Vec<u8>> {
    let json: serde_json::Value = rhai::serde::from_dynamic(value)?;
    serde_json::to_vec(&json).map_err(|e| e.to_string().into())
}

/// The `res` object passed to `handle`. Clones share one response slot.
#[derive(Debug, Clone, Default)]
struct ScriptResponder {
    slot: Arc<Mutex<Option<ScriptResponse>>>,
}

impl ScriptResponder {
    fn commit(&self, content_type: &'static str, body: Bytes) -> RhaiResult<()> {
        let mut slot = self.slot.lock();
        if slot.is_some() {
            return Err("response already written".into());
        }
        *slot = Some(ScriptResponse { content_type, body });
        Ok(())
    }

    fn text(&mut self, value: Dynamic) -> RhaiResult<()> {
        self.commit(TEXT_CONTENT_TYPE, Bytes::from(dynamic_to_string(value)))
    }

    fn html(&mut self, value: Dynamic) -> RhaiResult<()> {
        self.commit(HTML_CONTENT_TYPE, Bytes::from(dynamic_to_string(value)))
    }

    fn json(&mut self, value: Dynamic) -> RhaiResult<()> {
        if !value.is_map() {
            return Err("json() expects a map".into());
        }
        let body = dynamic_to_json(&value)?;
        self.commit(JSON_CONTENT_TYPE, Bytes::from(body))
    }

    fn take(&self) -> Option<ScriptResponse> {
        self.slot.lock().take()
    }
}

/// Outbound request described by a script.
#[derive(Debug)]
struct FetchRequest {
    url: String,
    method: reqwest::Method,
    headers: Vec<(String, String)>,
    body: Option<Vec<u8>>,
}

impl FetchRequest {
    fn from_dynamic(options: Dynamic) -> RhaiResult<Self> {
        if options.is_string() {
            return Ok(Self {
                url: dynamic_to_string(options),
                method: reqwest::Method::GET,
                headers: Vec::new(),
                body: None,
            });
        }

        let Some(map) = options.try_cast::<Map>() else {
            return Err("fetch() expects a url or a map".into());
        };

        let url = map
            .get("url")
            .filter(|v| v.is_string())
            .map(|v| dynamic_to_string(v.clone()))
            .ok_or("fetch() requires a url")?;

        let method = match map.get("method") {
            Some(v) => {
                let name = dynamic_to_string(v.clone()).to_uppercase();
                reqwest::Method::from_bytes(name.as_bytes())
                    .map_err(|_| format!("fetch(): invalid method '{name}'"))?
            }
            None => reqwest::Method::GET,
        };

        let mut headers = Vec::new();
        if let Some(entries) = map.get("headers").and_then(|v| v.clone().try_cast::<Map>()) {
            for (name, value) in entries {
                headers.push((name.to_string(), dynamic_to_string(value)));
            }
        }
        if map
            .get("json")
            .and_then(|v| v.as_bool().ok())
            .unwrap_or(false)
        {
            headers.push(("content-type".to_string(), JSON_CONTENT_TYPE.to_string()));
        }

        let body = match map.get("data") {
            Some(data) if data.is_string() => Some(dynamic_to_string(data.clone()).into_bytes()),
            Some(data) if data.is_map() => Some(dynamic_to_json(data)?),
            _ => None,
        };

        Ok(Self {
            url,
            method,
            headers,
            body,
        })
    }

    async fn send(self, client: &reqwest::Client) -> Result<Map, reqwest::Error> {
        let mut builder = client.request(self.method, self.url.as_str());
        for (name, value) in &self.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = self.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status = i64::from(response.status().as_u16());
        let body = response.text().await?;

        let mut result = Map::new();
        result.insert("status".into(), Dynamic::from(status));
        result.insert("body".into(), Dynamic::from(body));
        Ok(result)
    }
}

/// Bridges the synchronous script `fetch` to the async HTTP client.
#[derive(Debug, Clone)]
struct Fetcher {
    client: reqwest::Client,
    runtime: Handle,
}

impl Fetcher {
    /// Must be called from a blocking-pool thread, never from async context.
    fn fetch(&self, options: Dynamic) -> RhaiResult<Map> {
        let request = FetchRequest::from_dynamic(options)?;
        let url = request.url.clone();
        self.runtime
            .block_on(request.send(&self.client))
            .map_err(|e| format!("fetch '{url}' failed: {e}").into())
    }
}
