//! Resource selectors.
//!
//! A selector is an expression `<key> <OPERATOR> (<value>, ...)`:
//!
//! ```text
//! metadata.name IN (orders, payments)
//! metadata.labels.env NOTIN (prod)
//! metadata.annotations.owner EXISTS
//! spec.partitions DOESNOTEXIST
//! metadata.name MATCHES (^orders-.*)
//! ```
//!
//! `key=value` and `key!=value` are accepted as shorthands for `IN` and
//! `NOTIN` with a single value.

use std::fmt;
use std::str::FromStr;

use regex::Regex;
use serde_json::Value;
use thiserror::Error;

use crate::resource::Resource;

/// Selector parse errors.
#[derive(Debug, Error)]
pub enum SelectorError {
    #[error("empty selector expression")]
    Empty,

    #[error("unknown selector key '{0}'")]
    UnknownKey(String),

    #[error("unknown selector operator '{0}'")]
    UnknownOperator(String),

    #[error("operator {operator} in '{expression}' requires at least one value")]
    MissingValues { operator: Operator, expression: String },

    #[error("operator {operator} in '{expression}' takes no values")]
    UnexpectedValues { operator: Operator, expression: String },

    #[error("malformed value list in '{0}'")]
    MalformedValues(String),

    #[error("invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("unknown matching strategy '{0}'")]
    UnknownStrategy(String),
}

/// The part of a resource a selector looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectorKey {
    Name,
    Label(String),
    Annotation(String),
    ApiVersion,
    Kind,
    /// Dotted path into the spec.
    Spec(String),
}

impl SelectorKey {
    fn parse(key: &str) -> Result<Self, SelectorError> {
        let unknown = || SelectorError::UnknownKey(key.to_string());
        match key {
            "metadata.name" => Ok(SelectorKey::Name),
            "apiVersion" => Ok(SelectorKey::ApiVersion),
            "kind" => Ok(SelectorKey::Kind),
            _ => {
                if let Some(label) = key.strip_prefix("metadata.labels.") {
                    (!label.is_empty())
                        .then(|| SelectorKey::Label(label.to_string()))
                        .ok_or_else(unknown)
                } else if let Some(annotation) = key.strip_prefix("metadata.annotations.") {
                    (!annotation.is_empty())
                        .then(|| SelectorKey::Annotation(annotation.to_string()))
                        .ok_or_else(unknown)
                } else if let Some(path) = key.strip_prefix("spec.") {
                    (!path.is_empty())
                        .then(|| SelectorKey::Spec(path.to_string()))
                        .ok_or_else(unknown)
                } else {
                    Err(unknown())
                }
            }
        }
    }

    /// Extract the keyed value as a string, if present.
    fn value_of(&self, resource: &Resource) -> Option<String> {
        match self {
            SelectorKey::Name => Some(resource.name().to_string()),
            SelectorKey::Label(k) => resource.label(k).map(String::from),
            SelectorKey::Annotation(k) => resource.annotation(k).map(String::from),
            SelectorKey::ApiVersion => Some(resource.api_version().to_string()),
            SelectorKey::Kind => Some(resource.kind().to_string()),
            SelectorKey::Spec(path) => {
                let mut current = resource.spec();
                for part in path.split('.') {
                    current = current.as_object()?.get(part)?;
                }
                match current {
                    Value::Null | Value::Array(_) | Value::Object(_) => None,
                    Value::String(s) => Some(s.clone()),
                    other => Some(other.to_string()),
                }
            }
        }
    }
}

impl fmt::Display for SelectorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectorKey::Name => write!(f, "metadata.name"),
            SelectorKey::Label(k) => write!(f, "metadata.labels.{}", k),
            SelectorKey::Annotation(k) => write!(f, "metadata.annotations.{}", k),
            SelectorKey::ApiVersion => write!(f, "apiVersion"),
            SelectorKey::Kind => write!(f, "kind"),
            SelectorKey::Spec(p) => write!(f, "spec.{}", p),
        }
    }
}

/// Selector operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
    Matches,
}

impl Operator {
    fn takes_values(&self) -> bool {
        matches!(self, Operator::In | Operator::NotIn | Operator::Matches)
    }
}

impl FromStr for Operator {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "IN" => Ok(Operator::In),
            "NOTIN" => Ok(Operator::NotIn),
            "EXISTS" => Ok(Operator::Exists),
            "DOESNOTEXIST" => Ok(Operator::DoesNotExist),
            "MATCHES" => Ok(Operator::Matches),
            _ => Err(SelectorError::UnknownOperator(s.to_string())),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operator::In => "IN",
            Operator::NotIn => "NOTIN",
            Operator::Exists => "EXISTS",
            Operator::DoesNotExist => "DOESNOTEXIST",
            Operator::Matches => "MATCHES",
        };
        f.write_str(s)
    }
}

/// A single selector expression.
#[derive(Debug, Clone)]
pub struct Selector {
    key: SelectorKey,
    operator: Operator,
    values: Vec<String>,
    patterns: Vec<Regex>,
}

impl Selector {
    pub fn new(
        key: SelectorKey,
        operator: Operator,
        values: Vec<String>,
    ) -> Result<Self, SelectorError> {
        let expression = format!("{} {}", key, operator);
        if operator.takes_values() && values.is_empty() {
            return Err(SelectorError::MissingValues {
                operator,
                expression,
            });
        }
        if !operator.takes_values() && !values.is_empty() {
            return Err(SelectorError::UnexpectedValues {
                operator,
                expression,
            });
        }
        let patterns = if operator == Operator::Matches {
            values
                .iter()
                .map(|p| {
                    Regex::new(p).map_err(|e| SelectorError::InvalidPattern {
                        pattern: p.clone(),
                        reason: e.to_string(),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?
        } else {
            Vec::new()
        };
        Ok(Self {
            key,
            operator,
            values,
            patterns,
        })
    }

    pub fn name_in<I, S>(names: I) -> Result<Self, SelectorError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            SelectorKey::Name,
            Operator::In,
            names.into_iter().map(Into::into).collect(),
        )
    }

    pub fn label_equals(key: &str, value: &str) -> Result<Self, SelectorError> {
        Self::new(
            SelectorKey::Label(key.to_string()),
            Operator::In,
            vec![value.to_string()],
        )
    }

    pub fn matches(&self, resource: &Resource) -> bool {
        let value = self.key.value_of(resource);
        match self.operator {
            Operator::Exists => value.is_some(),
            Operator::DoesNotExist => value.is_none(),
            Operator::In => value.is_some_and(|v| self.values.contains(&v)),
            Operator::NotIn => value.is_none_or(|v| !self.values.contains(&v)),
            Operator::Matches => {
                value.is_some_and(|v| self.patterns.iter().any(|p| p.is_match(&v)))
            }
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.key, self.operator)?;
        if !self.values.is_empty() {
            write!(f, " ({})", self.values.join(", "))?;
        }
        Ok(())
    }
}

impl FromStr for Selector {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let expression = s.trim();
        if expression.is_empty() {
            return Err(SelectorError::Empty);
        }

        // Shorthands: key!=value, key=value
        if !expression.contains(char::is_whitespace) {
            if let Some((key, value)) = expression.split_once("!=") {
                return Self::new(
                    SelectorKey::parse(key)?,
                    Operator::NotIn,
                    vec![value.to_string()],
                );
            }
            if let Some((key, value)) = expression.split_once('=') {
                return Self::new(SelectorKey::parse(key)?, Operator::In, vec![value.to_string()]);
            }
        }

        let (key, rest) = expression
            .split_once(char::is_whitespace)
            .ok_or_else(|| SelectorError::UnknownOperator(String::new()))?;
        let rest = rest.trim_start();
        let (operator, values) = match rest.find(|c: char| c.is_whitespace() || c == '(') {
            Some(i) => (&rest[..i], rest[i..].trim()),
            None => (rest, ""),
        };

        let key = SelectorKey::parse(key)?;
        let operator: Operator = operator.parse()?;

        let values = if values.is_empty() {
            Vec::new()
        } else {
            let inner = values
                .strip_prefix('(')
                .and_then(|v| v.strip_suffix(')'))
                .ok_or_else(|| SelectorError::MalformedValues(expression.to_string()))?
                .trim();
            if operator == Operator::Matches {
                // A pattern is taken whole; commas belong to the regex.
                if inner.is_empty() {
                    Vec::new()
                } else {
                    vec![inner.to_string()]
                }
            } else {
                inner
                    .split(',')
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(String::from)
                    .collect()
            }
        };

        Self::new(key, operator, values)
    }
}

/// How several selectors combine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MatchingStrategy {
    /// Every selector must match.
    #[default]
    All,
    /// At least one selector must match.
    Any,
    /// No selector may match.
    None,
}

impl FromStr for MatchingStrategy {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ALL" => Ok(MatchingStrategy::All),
            "ANY" => Ok(MatchingStrategy::Any),
            "NONE" => Ok(MatchingStrategy::None),
            _ => Err(SelectorError::UnknownStrategy(s.to_string())),
        }
    }
}

/// A set of selectors with a matching strategy. Empty sets match everything.
#[derive(Debug, Clone, Default)]
pub struct Selectors {
    selectors: Vec<Selector>,
    strategy: MatchingStrategy,
}

impl Selectors {
    pub fn new(selectors: Vec<Selector>, strategy: MatchingStrategy) -> Self {
        Self {
            selectors,
            strategy,
        }
    }

    /// Parse a list of expressions, combined with [`MatchingStrategy::All`].
    pub fn parse<I, S>(expressions: I) -> Result<Self, SelectorError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let selectors = expressions
            .into_iter()
            .map(|e| e.as_ref().parse())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(selectors, MatchingStrategy::All))
    }

    pub fn with_strategy(mut self, strategy: MatchingStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.selectors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Selector> {
        self.selectors.iter()
    }

    pub fn matches(&self, resource: &Resource) -> bool {
        if self.selectors.is_empty() {
            return true;
        }
        match self.strategy {
            MatchingStrategy::All => self.selectors.iter().all(|s| s.matches(resource)),
            MatchingStrategy::Any => self.selectors.iter().any(|s| s.matches(resource)),
            MatchingStrategy::None => !self.selectors.iter().any(|s| s.matches(resource)),
        }
    }

    /// Keep only matching resources.
    pub fn filter(&self, resources: Vec<Resource>) -> Vec<Resource> {
        resources.into_iter().filter(|r| self.matches(r)).collect()
    }
}

impl fmt::Display for Selectors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.selectors.iter().map(|s| s.to_string()).collect();
        write!(f, "{:?}[{}]", self.strategy, parts.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ResourceType;
    use serde_json::json;

    fn topic(name: &str) -> Resource {
        Resource::new(&ResourceType::new("kafka.drift.io", "v1", "Topic"), name)
            .with_label("env", "prod")
            .with_spec(json!({"partitions": 6, "configs": {"cleanup.policy": "compact"}}))
    }

    #[test]
    fn test_parse_in() {
        let s: Selector = "metadata.name IN (orders, payments)".parse().unwrap();
        assert!(s.matches(&topic("orders")));
        assert!(!s.matches(&topic("audit")));
        assert_eq!(s.to_string(), "metadata.name IN (orders, payments)");
    }

    #[test]
    fn test_parse_is_case_insensitive_on_operator() {
        let s: Selector = "metadata.labels.env notin (dev)".parse().unwrap();
        assert!(s.matches(&topic("t")));
    }

    #[test]
    fn test_not_in_matches_missing_key() {
        let s: Selector = "metadata.labels.team NOTIN (a)".parse().unwrap();
        assert!(s.matches(&topic("t")));
    }

    #[test]
    fn test_exists_and_does_not_exist() {
        let exists: Selector = "metadata.labels.env EXISTS".parse().unwrap();
        let missing: Selector = "spec.replicas DOESNOTEXIST".parse().unwrap();
        assert!(exists.matches(&topic("t")));
        assert!(missing.matches(&topic("t")));
        assert!(matches!(
            "metadata.labels.env EXISTS (x)".parse::<Selector>(),
            Err(SelectorError::UnexpectedValues { .. })
        ));
    }

    #[test]
    fn test_matches_regex() {
        let s: Selector = "metadata.name MATCHES (^orders-.*)".parse().unwrap();
        assert!(s.matches(&topic("orders-eu")));
        assert!(!s.matches(&topic("payments")));
        assert!(matches!(
            "metadata.name MATCHES ([)".parse::<Selector>(),
            Err(SelectorError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_matches_pattern_keeps_commas() {
        let s: Selector = "metadata.name MATCHES (^t{1,3}$)".parse().unwrap();
        assert!(s.matches(&topic("tt")));
        assert!(!s.matches(&topic("tttt")));
        assert_eq!(s.to_string(), "metadata.name MATCHES (^t{1,3}$)");
    }

    #[test]
    fn test_spec_path() {
        let s: Selector = "spec.partitions IN (6)".parse().unwrap();
        assert!(s.matches(&topic("t")));
        let s: Selector = "spec.configs.cleanup.policy EXISTS".parse().unwrap();
        // dotted path segments do not span literal keys containing dots
        assert!(!s.matches(&topic("t")));
    }

    #[test]
    fn test_shorthands() {
        let eq: Selector = "metadata.labels.env=prod".parse().unwrap();
        let ne: Selector = "metadata.labels.env!=prod".parse().unwrap();
        assert!(eq.matches(&topic("t")));
        assert!(!ne.matches(&topic("t")));
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!("".parse::<Selector>(), Err(SelectorError::Empty)));
        assert!(matches!(
            "status.phase IN (x)".parse::<Selector>(),
            Err(SelectorError::UnknownKey(_))
        ));
        assert!(matches!(
            "metadata.name LIKE (x)".parse::<Selector>(),
            Err(SelectorError::UnknownOperator(_))
        ));
        assert!(matches!(
            "metadata.name IN".parse::<Selector>(),
            Err(SelectorError::MissingValues { .. })
        ));
        assert!(matches!(
            "metadata.name IN orders".parse::<Selector>(),
            Err(SelectorError::MalformedValues(_))
        ));
    }

    #[test]
    fn test_strategies() {
        let selectors =
            Selectors::parse(["metadata.name IN (a)", "metadata.labels.env IN (prod)"]).unwrap();
        assert!(!selectors.matches(&topic("b")));
        assert!(selectors.clone().with_strategy(MatchingStrategy::Any).matches(&topic("b")));
        assert!(!selectors.with_strategy(MatchingStrategy::None).matches(&topic("b")));
        assert!(Selectors::default().matches(&topic("anything")));
    }
}
