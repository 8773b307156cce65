//! Rule compilation and request routing.
//!
//! - `step` - action-call parsing (`name(arg, ...)`)
//! - `handler` - compiled rules: anchored patterns, target, steps
//! - `router` - first-match lookup over handlers

mod handler;
mod router;
mod step;

pub use handler::{compile_rules, Handler, Target};
pub use router::Router;
pub use step::{ActionKind, Step};
