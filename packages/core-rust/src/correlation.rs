use std::fmt;

use uuid::Uuid;

/// Opaque token matching a reply to the request that caused it.
///
/// Generated fresh for every call (UUID v4). Two tokens are equal only if
/// their string forms are identical.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Generates a new random token.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether a received `correlation_id` property names this token.
    #[must_use]
    pub fn matches(&self, received: Option<&str>) -> bool {
        received == Some(self.0.as_str())
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for CorrelationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn generated_tokens_are_unique() {
        let tokens: HashSet<CorrelationId> = (0..1000).map(|_| CorrelationId::generate()).collect();
        assert_eq!(tokens.len(), 1000);
    }

    #[test]
    fn matches_only_identical_token() {
        let token = CorrelationId::from("abc".to_string());
        assert!(token.matches(Some("abc")));
        assert!(!token.matches(Some("abd")));
        assert!(!token.matches(None));
    }
}
