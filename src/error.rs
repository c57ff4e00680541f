//! Error types for rule parsing, merging and rule files.

use thiserror::Error;

/// Everything that can go wrong while reading or combining security rules.
///
/// The parse variants carry the offending token so callers can report it
/// without keeping the whole input line around.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RuleError {
    #[error("invalid direction: {0:?}")]
    InvalidDirection(String),
    #[error("invalid action: {0:?}")]
    InvalidAction(String),
    #[error("invalid network: {0:?}")]
    InvalidNet(String),
    #[error("invalid ip address: {0:?}")]
    InvalidIpAddr(String),
    #[error("invalid protocol: {0:?}")]
    InvalidProtocol(String),
    #[error("invalid port range: {0:?}")]
    InvalidPortRange(String),
    #[error("invalid port: {0:?}")]
    InvalidPort(String),
    #[error("invalid priority {0}, expected 1-100")]
    InvalidPriority(i64),
    #[error("cannot merge `{0}` with `{1}`")]
    Merge(String, String),
    #[error("duplicate rule: {0}")]
    Duplicate(String),
    #[error("line {line}: {source}")]
    Line {
        line: usize,
        #[source]
        source: Box<RuleError>,
    },
    #[error("rule file {path}: {message}")]
    RuleFile { path: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            RuleError::InvalidProtocol("gre".to_string()).to_string(),
            "invalid protocol: \"gre\""
        );
        let err = RuleError::Line {
            line: 3,
            source: Box::new(RuleError::InvalidPort("0".to_string())),
        };
        assert_eq!(err.to_string(), "line 3: invalid port: \"0\"");
        assert!(std::error::Error::source(&err).is_some());
    }
}
