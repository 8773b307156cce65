//! Rule compilation.
//!
//! A [`Rule`] from the rules document is compiled once at startup into an
//! immutable [`Handler`]: anchored patterns, the request attribute they test,
//! and the parsed action steps.

use super::step::{ActionKind, Step};
use crate::config::Rule;
use crate::error::StartupError;
use hyper::header::HeaderName;
use hyper::Request;
use fancy_regex::Regex;
use std::borrow::Cow;
use tracing::warn;

const HEADER_TEST_PREFIX: &str = "header.";

/// Request attribute a handler's patterns are matched against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Host followed by the request path and query, e.g. `example.test:8080/a?b=c`
    Url,
    /// First value of the named request header, empty when absent
    Header(HeaderName),
}

impl Target {
    fn parse(index: usize, test: Option<&str>) -> Result<Self, StartupError> {
        let Some(test) = test else {
            return Ok(Target::Url);
        };

        match test.strip_prefix(HEADER_TEST_PREFIX) {
            Some(name) => HeaderName::from_bytes(name.as_bytes())
                .map(Target::Header)
                .map_err(|_| StartupError::InvalidTest {
                    index,
                    test: test.to_string(),
                }),
            None => Ok(Target::Url),
        }
    }
}

/// Compiled, immutable form of one rule.
#[derive(Debug, Clone)]
pub struct Handler {
    /// Position of the rule in the rules document
    pub index: usize,
    pub patterns: Vec<Regex>,
    pub target: Target,
    pub steps: Vec<Step>,
}

impl Handler {
    pub fn compile(index: usize, rule: &Rule) -> Result<Self, StartupError> {
        let conditions = rule.condition.as_slice();
        if conditions.is_empty() {
            return Err(StartupError::InvalidRule {
                index,
                reason: "rule has no pattern".to_string(),
            });
        }

        let patterns = conditions
            .iter()
            .map(|pattern| compile_anchored(index, pattern))
            .collect::<Result<Vec<_>, _>>()?;

        let target = Target::parse(index, rule.test.as_deref())?;

        let steps: Vec<Step> = rule.actions.as_slice().iter().map(|s| Step::parse(s)).collect();
        if steps.is_empty() {
            return Err(StartupError::InvalidRule {
                index,
                reason: "rule has no action".to_string(),
            });
        }

        for step in steps.iter().filter(|s| s.kind == ActionKind::Unknown) {
            warn!(
                rule = index,
                action = %step.action,
                "Unknown action '{}' will be skipped", step.source
            );
        }

        Ok(Self {
            index,
            patterns,
            target,
            steps,
        })
    }

    /// The string this handler's patterns are tested against.
    pub fn subject<'a, B>(&self, req: &'a Request<B>) -> Cow<'a, str> {
        match &self.target {
            Target::Url => Cow::Owned(url_subject(req)),
            Target::Header(name) => req
                .headers()
                .get(name)
                .map(|v| String::from_utf8_lossy(v.as_bytes()))
                .unwrap_or(Cow::Borrowed("")),
        }
    }

    /// True when any pattern matches from the start of `subject`. A pattern
    /// that exceeds the backtracking limit counts as not matching.
    pub fn matches(&self, subject: &str) -> bool {
        self.patterns
            .iter()
            .any(|regex| match regex.is_match(subject) {
                Ok(matched) => matched,
                Err(e) => {
                    warn!(
                        rule = self.index,
                        pattern = %regex,
                        "Pattern evaluation failed: {}", e
                    );
                    false
                }
            })
    }
}

/// Compile all rules, index-aligned with the input.
pub fn compile_rules(rules: &[Rule]) -> Result<Vec<Handler>, StartupError> {
    rules
        .iter()
        .enumerate()
        .map(|(index, rule)| Handler::compile(index, rule))
        .collect()
}

fn compile_anchored(index: usize, pattern: &str) -> Result<Regex, StartupError> {
    Regex::new(&format!("^(?:{pattern})")).map_err(|source| StartupError::InvalidPattern {
        index,
        pattern: pattern.to_string(),
        source,
    })
}

/// Host (with port, as sent by the client) followed by path and query.
pub(crate) fn url_subject<B>(req: &Request<B>) -> String {
    let host = req
        .headers()
        .get(hyper::header::HOST)
        .and_then(|h| h.to_str().ok())
        .or_else(|| req.uri().authority().map(|a| a.as_str()))
        .unwrap_or("");
    let path = req.uri().path_and_query().map(|pq| pq.as_str()).unwrap_or("");
    format!("{host}{path}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OneOrMany;
    use hyper::header::HeaderValue;

    fn rule(condition: OneOrMany, test: Option<&str>, actions: OneOrMany) -> Rule {
        Rule {
            condition,
            test: test.map(str::to_string),
            actions,
        }
    }

    #[test]
    fn test_patterns_are_anchored() {
        let handler =
            Handler::compile(0, &rule("/a".into(), None, "json({})".into())).unwrap();
        assert!(handler.matches("/a/b"));
        assert!(!handler.matches("/xa"));

        let handler =
            Handler::compile(0, &rule("^/a".into(), None, "json({})".into())).unwrap();
        assert!(!handler.matches("/xa"));
    }

    #[test]
    fn test_alternation_is_anchored_as_a_whole() {
        let handler =
            Handler::compile(0, &rule("/a|/b".into(), None, "json({})".into())).unwrap();
        assert!(handler.matches("/b"));
        assert!(!handler.matches("x/b"));
    }

    #[test]
    fn test_condition_list_is_any_of() {
        let handler = Handler::compile(
            0,
            &rule(vec!["^/one", "^/two"].into(), None, "json({})".into()),
        )
        .unwrap();
        assert_eq!(handler.patterns.len(), 2);
        assert!(handler.matches("/two"));
        assert!(!handler.matches("/three"));
    }

    #[test]
    fn test_header_target() {
        let handler = Handler::compile(
            0,
            &rule("^v1$".into(), Some("header.x-custom"), "json({})".into()),
        )
        .unwrap();
        assert_eq!(
            handler.target,
            Target::Header(HeaderName::from_static("x-custom"))
        );
    }

    #[test]
    fn test_header_name_is_case_insensitive() {
        let handler = Handler::compile(
            0,
            &rule(".*".into(), Some("header.User-Agent"), "json({})".into()),
        )
        .unwrap();
        assert_eq!(
            handler.target,
            Target::Header(HeaderName::from_static("user-agent"))
        );
    }

    #[test]
    fn test_other_tests_default_to_url() {
        let handler =
            Handler::compile(0, &rule(".*".into(), Some("url"), "json({})".into())).unwrap();
        assert_eq!(handler.target, Target::Url);
    }

    #[test]
    fn test_header_test_without_name_fails() {
        let err = Handler::compile(4, &rule(".*".into(), Some("header."), "json({})".into()))
            .unwrap_err();
        assert!(matches!(err, StartupError::InvalidTest { index: 4, .. }));
    }

    #[test]
    fn test_invalid_pattern_fails() {
        let err =
            Handler::compile(1, &rule("([a-z".into(), None, "json({})".into())).unwrap_err();
        assert!(matches!(err, StartupError::InvalidPattern { index: 1, .. }));
    }

    #[test]
    fn test_look_around_and_backreferences() {
        let handler = Handler::compile(
            0,
            &rule(r"(?!admin)[a-z.]+/".into(), None, "json({})".into()),
        )
        .unwrap();
        assert!(handler.matches("shop.test/"));
        assert!(!handler.matches("admin.test/"));

        let handler =
            Handler::compile(0, &rule(r"(\w+)-\1/".into(), None, "json({})".into())).unwrap();
        assert!(handler.matches("ab-ab/"));
        assert!(!handler.matches("ab-cd/"));
    }

    #[test]
    fn test_header_subject_keeps_non_ascii_value() {
        let handler = Handler::compile(
            0,
            &rule("^caf".into(), Some("header.x-name"), "json({})".into()),
        )
        .unwrap();
        let req = Request::builder()
            .uri("/")
            .header("x-name", HeaderValue::from_bytes("café".as_bytes()).unwrap())
            .body(())
            .unwrap();

        let subject = handler.subject(&req);
        assert_eq!(subject, "café");
        assert!(handler.matches(&subject));
    }

    #[test]
    fn test_empty_lists_fail() {
        let none = || OneOrMany::Many(Vec::new());
        assert!(Handler::compile(0, &rule(none(), None, "json({})".into())).is_err());
        assert!(Handler::compile(0, &rule(".*".into(), None, none())).is_err());
    }

    #[test]
    fn test_steps_keep_declared_order() {
        let handler = Handler::compile(
            0,
            &rule(
                ".*".into(),
                None,
                vec!["call(auth)", "proxy(http://127.0.0.1:9000)"].into(),
            ),
        )
        .unwrap();
        let kinds: Vec<_> = handler.steps.iter().map(|s| s.kind).collect();
        assert_eq!(kinds, vec![ActionKind::Call, ActionKind::Proxy]);
    }

    #[test]
    fn test_url_subject_includes_host_and_query() {
        let req = Request::builder()
            .uri("/path/x?y=1")
            .header("host", "testing.test:8080")
            .body(())
            .unwrap();
        assert_eq!(url_subject(&req), "testing.test:8080/path/x?y=1");
    }

    #[test]
    fn test_url_subject_falls_back_to_uri_authority() {
        let req = Request::builder()
            .uri("http://origin.test/p")
            .body(())
            .unwrap();
        assert_eq!(url_subject(&req), "origin.test/p");
    }
}
