//! Configuration types for Switchyard.

mod listen;
mod rules;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::StartupError;

pub use listen::{CertificatePair, ListenConfig};
pub use rules::{OneOrMany, Rule};

/// The rules document.
///
/// Rule order is significant: the first rule whose pattern matches handles
/// the request.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub certificates: Vec<CertificatePair>,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, StartupError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| StartupError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, StartupError> {
        Ok(serde_yaml::from_str(contents)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const EXAMPLE: &str = r#"
rules:
  - rule: testing.test:.*/balancing
    do: balancing(https://a.example, https://b.example)

  - rule: AppleWebKit\/\d+\.\d+\s
    test: header.user-agent
    do: json({"success":true,"message":"matching header.user-agent"})

certificates:
  - certificate: ./certs/testing.test.crt
    key: ./certs/testing.test.key
"#;

    #[test]
    fn test_parse_full_document() {
        let config = Config::from_yaml(EXAMPLE).unwrap();
        assert_eq!(config.rules.len(), 2);
        assert_eq!(config.rules[1].test.as_deref(), Some("header.user-agent"));
        assert_eq!(
            config.certificates,
            vec![CertificatePair {
                certificate: "./certs/testing.test.crt".to_string(),
                key: "./certs/testing.test.key".to_string(),
            }]
        );
    }

    #[test]
    fn test_empty_document_sections_default() {
        let config = Config::from_yaml("rules: []").unwrap();
        assert!(config.rules.is_empty());
        assert!(config.certificates.is_empty());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(EXAMPLE.as_bytes()).unwrap();
        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.rules.len(), 2);
    }

    #[test]
    fn test_missing_file_is_a_read_error() {
        let err = Config::from_file("/nonexistent/switchyard/rules.yaml").unwrap_err();
        assert!(matches!(err, StartupError::ConfigRead { .. }));
    }

    #[test]
    fn test_malformed_document_is_a_parse_error() {
        let err = Config::from_yaml("rules: {not: [a list").unwrap_err();
        assert!(matches!(err, StartupError::ConfigParse(_)));
    }
}
