use super::handler::{compile_rules, Handler, Target};
use crate::config::Rule;
use crate::error::StartupError;
use hyper::Request;

/// Router matches incoming requests to compiled handlers.
///
/// Built once at startup and shared read-only between request tasks.
#[derive(Debug, Default)]
pub struct Router {
    handlers: Vec<Handler>,
}

impl Router {
    pub fn new(handlers: Vec<Handler>) -> Self {
        Self { handlers }
    }

    pub fn from_rules(rules: &[Rule]) -> Result<Self, StartupError> {
        Ok(Self::new(compile_rules(rules)?))
    }

    /// Return the first handler, in declaration order, with a pattern matching
    /// the request. Later handlers are never evaluated once one matches.
    pub fn match_request<B>(&self, req: &Request<B>) -> Option<&Handler> {
        // URL subject is shared by every URL-targeted handler
        let mut url_subject: Option<String> = None;

        for handler in &self.handlers {
            let matched = match handler.target {
                Target::Url => {
                    let subject =
                        url_subject.get_or_insert_with(|| handler.subject(req).into_owned());
                    handler.matches(subject)
                }
                Target::Header(_) => handler.matches(&handler.subject(req)),
            };
            if matched {
                return Some(handler);
            }
        }
        None
    }

    pub fn handlers(&self) -> &[Handler] {
        &self.handlers
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
