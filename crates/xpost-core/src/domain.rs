//! Domain specifications: which origins a request may be delivered to or accepted from.

use std::fmt;

use regex::Regex;
use serde_json::Value;

use crate::error::{XpostError, XpostResult};

/// Target origin that matches any origin.
pub const WILDCARD: &str = "*";

/// An origin constraint.
///
/// `Exact` and `Wildcard` can be handed to the transport verbatim. `AnyOf` and `Pattern`
/// first need the peer's real origin (known or learned through a handshake) and a
/// successful [`DomainSpec::matches`] check.
#[derive(Debug, Clone, Default)]
pub enum DomainSpec {
    Exact(String),
    AnyOf(Vec<String>),
    Pattern(Regex),
    #[default]
    Wildcard,
}

impl DomainSpec {
    /// Compile a pattern spec.
    pub fn pattern(pattern: &str) -> XpostResult<Self> {
        Regex::new(pattern)
            .map(DomainSpec::Pattern)
            .map_err(|e| XpostError::Validation(format!("invalid domain pattern {pattern:?}: {e}")))
    }

    /// Parse a spec from its JSON form: a string, an array of strings, or
    /// `{"pattern": "..."}`.
    pub fn from_value(value: &Value) -> XpostResult<Self> {
        match value {
            Value::String(s) => Ok(DomainSpec::from(s.as_str())),
            Value::Array(items) => items
                .iter()
                .map(|item| {
                    item.as_str().map(str::to_string).ok_or_else(|| {
                        XpostError::Validation(format!("domain list entry {item} is not a string"))
                    })
                })
                .collect::<XpostResult<Vec<_>>>()
                .map(DomainSpec::AnyOf),
            Value::Object(map) => match map.get("pattern").and_then(Value::as_str) {
                Some(p) => DomainSpec::pattern(p),
                None => Err(XpostError::Validation(
                    "domain object must carry a string `pattern`".into(),
                )),
            },
            other => Err(XpostError::Validation(format!(
                "expected domain to be a string, an array of strings or a pattern, got {other}"
            ))),
        }
    }

    /// Reject specs that can never match anything.
    pub fn validate(&self) -> XpostResult<()> {
        match self {
            DomainSpec::Exact(s) if s.is_empty() => {
                Err(XpostError::Validation("domain must not be empty".into()))
            }
            DomainSpec::AnyOf(list) if list.is_empty() => {
                Err(XpostError::Validation("domain list must not be empty".into()))
            }
            DomainSpec::AnyOf(list) if list.iter().any(String::is_empty) => Err(
                XpostError::Validation("domain list must not contain empty entries".into()),
            ),
            _ => Ok(()),
        }
    }

    /// Whether `origin` satisfies this spec.
    pub fn matches(&self, origin: &str) -> bool {
        match self {
            DomainSpec::Wildcard => true,
            DomainSpec::Exact(s) => s == WILDCARD || s == origin,
            DomainSpec::AnyOf(list) => list.iter().any(|s| s == WILDCARD || s == origin),
            DomainSpec::Pattern(re) => re.is_match(origin),
        }
    }

    /// The literal target origin, if this spec can be used without learning the
    /// peer's origin first.
    pub fn literal(&self) -> Option<&str> {
        match self {
            DomainSpec::Exact(s) => Some(s),
            DomainSpec::Wildcard => Some(WILDCARD),
            DomainSpec::AnyOf(_) | DomainSpec::Pattern(_) => None,
        }
    }
}

impl fmt::Display for DomainSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DomainSpec::Exact(s) => f.write_str(s),
            DomainSpec::AnyOf(list) => write!(f, "[{}]", list.join(", ")),
            DomainSpec::Pattern(re) => write!(f, "/{}/", re.as_str()),
            DomainSpec::Wildcard => f.write_str(WILDCARD),
        }
    }
}

impl From<&str> for DomainSpec {
    fn from(s: &str) -> Self {
        if s == WILDCARD {
            DomainSpec::Wildcard
        } else {
            DomainSpec::Exact(s.to_string())
        }
    }
}

impl From<String> for DomainSpec {
    fn from(s: String) -> Self {
        DomainSpec::from(s.as_str())
    }
}

impl From<Vec<String>> for DomainSpec {
    fn from(list: Vec<String>) -> Self {
        DomainSpec::AnyOf(list)
    }
}

impl From<Regex> for DomainSpec {
    fn from(re: Regex) -> Self {
        DomainSpec::Pattern(re)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn exact_matches_only_itself() {
        let spec = DomainSpec::from("https://a.com");
        assert!(spec.matches("https://a.com"));
        assert!(!spec.matches("https://b.com"));
        assert_eq!(spec.literal(), Some("https://a.com"));
    }

    #[test]
    fn wildcard_string_becomes_wildcard() {
        let spec = DomainSpec::from(WILDCARD);
        assert!(matches!(spec, DomainSpec::Wildcard));
        assert!(spec.matches("https://anything.example"));
        assert_eq!(spec.literal(), Some("*"));
    }

    #[test]
    fn any_of_is_membership() {
        let spec = DomainSpec::from(vec!["https://a.com".to_string(), "https://b.com".to_string()]);
        assert!(spec.matches("https://b.com"));
        assert!(!spec.matches("https://c.com"));
        assert_eq!(spec.literal(), None);
    }

    #[test]
    fn pattern_is_regex_test() {
        let spec = DomainSpec::pattern(r"^https://[a-z]+\.example\.com$").unwrap();
        assert!(spec.matches("https://shop.example.com"));
        assert!(!spec.matches("https://shop.example.com.evil.net"));
        assert_eq!(spec.literal(), None);
    }

    #[test]
    fn from_value_accepts_the_three_shapes() {
        assert!(matches!(DomainSpec::from_value(&json!("https://a.com")).unwrap(), DomainSpec::Exact(_)));
        assert!(matches!(DomainSpec::from_value(&json!(["https://a.com"])).unwrap(), DomainSpec::AnyOf(_)));
        assert!(matches!(DomainSpec::from_value(&json!({"pattern": "a"})).unwrap(), DomainSpec::Pattern(_)));
    }

    #[test]
    fn from_value_rejects_other_shapes() {
        for bad in [json!(42), json!(["ok", 1]), json!({"regex": "a"}), json!(null)] {
            let err = DomainSpec::from_value(&bad).unwrap_err();
            assert!(err.is_validation(), "{bad} should be a validation error");
        }
        assert!(DomainSpec::pattern("(").is_err());
    }

    #[test]
    fn validate_rejects_empty_specs() {
        assert!(DomainSpec::Exact(String::new()).validate().is_err());
        assert!(DomainSpec::AnyOf(vec![]).validate().is_err());
        assert!(DomainSpec::AnyOf(vec!["".into()]).validate().is_err());
        assert!(DomainSpec::Wildcard.validate().is_ok());
    }
}
