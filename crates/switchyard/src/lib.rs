//! Switchyard: a rule-driven reverse-proxy gateway.
//!
//! Requests arriving on any listening port, as plaintext HTTP/1.x or TLS,
//! are matched against an ordered rule table. The first matching rule's
//! actions run in order: forward to a backend, pick a backend at random,
//! run an extension script, or answer with a fixed JSON body.

pub mod config;
pub mod error;
pub mod headers;
pub mod pipeline;
pub mod proxy;
pub mod rules;
pub mod scripting;

pub use config::{CertificatePair, Config, ListenConfig, Rule};
pub use error::{ActionError, ScriptError, StartupError};
pub use proxy::{Gateway, ListenerFanIn};
pub use rules::Router;
