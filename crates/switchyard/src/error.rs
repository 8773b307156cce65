//! Error types.
//!
//! Startup errors are fatal and abort the process before any port is served.
//! Action and script errors are per-request and end up as a single 500.

use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

/// Fatal initialization failure returned to the entry point.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to read rules file '{path}': {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse rules file: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    #[error("rule #{index}: invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        index: usize,
        pattern: String,
        #[source]
        source: fancy_regex::Error,
    },

    #[error("rule #{index}: {reason}")]
    InvalidRule { index: usize, reason: String },

    #[error(
        "rule #{index}: invalid test '{test}', a header test must look like `header.<name>`"
    )]
    InvalidTest { index: usize, test: String },

    #[error("failed to load certificate pair ('{certificate}', '{key}'): {reason}")]
    Certificate {
        certificate: String,
        key: String,
        reason: String,
    },

    #[error("failed to build TLS configuration: {0}")]
    Tls(#[from] rustls::Error),

    #[error("invalid listen port '{0}'")]
    InvalidPort(String),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// Failure of a single pipeline action.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("action '{action}' requires at least one parameter")]
    MissingParameter { action: &'static str },

    #[error("invalid backend address '{0}'")]
    InvalidAddress(String),

    #[error("failed to build upstream request: {0}")]
    Request(#[from] hyper::http::Error),

    #[error("upstream request failed: {0}")]
    Upstream(#[from] hyper_util::client::legacy::Error),

    #[error(transparent)]
    Script(#[from] ScriptError),
}

/// Failure while loading or running an extension script.
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("invalid script id '{0}'")]
    InvalidId(String),

    #[error("failed to read script '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to compile script '{id}': {reason}")]
    Compile { id: String, reason: String },

    #[error("script '{id}' failed: {reason}")]
    Runtime { id: String, reason: String },

    #[error("script worker terminated: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_startup_error_messages_name_the_rule() {
        let err = StartupError::InvalidTest {
            index: 3,
            test: "header.".to_string(),
        };
        let message = err.to_string();
        assert!(message.contains("rule #3"));
        assert!(message.contains("header.<name>"));
    }

    #[test]
    fn test_script_error_converts_into_action_error() {
        let err: ActionError = ScriptError::InvalidId("../etc/passwd".to_string()).into();
        assert!(matches!(err, ActionError::Script(ScriptError::InvalidId(_))));
        assert_eq!(err.to_string(), "invalid script id '../etc/passwd'");
    }
}
