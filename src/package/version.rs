//! Package versions and version predicates.
//!
//! A [`Version`] is the token sequence of a version string split on `.`, `-`
//! and `_`. Numeric tokens compare numerically; any other pairing compares the
//! textual form of both tokens. A strict prefix sorts first, so
//! `1.2 < 1.2.1 < 1.10 < 2.0`.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

const SEPARATORS: &[char] = &['.', '-', '_'];

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Token {
    Int(u64),
    Str(String),
}

impl Token {
    fn parse(s: &str) -> Self {
        match s.parse::<u64>() {
            Ok(n) => Token::Int(n),
            Err(_) => Token::Str(s.to_string()),
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Int(n) => write!(f, "{}", n),
            Token::Str(s) => f.write_str(s),
        }
    }
}

impl Ord for Token {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Token::Int(a), Token::Int(b)) => a.cmp(b),
            (Token::Str(a), Token::Str(b)) => a.cmp(b),
            (a, b) => a.to_string().cmp(&b.to_string()),
        }
    }
}

impl PartialOrd for Token {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Comparable version built from a dotted/dashed string.
#[derive(Debug, Clone, Default)]
pub struct Version {
    text: String,
    tokens: Vec<Token>,
}

impl Version {
    pub fn new(text: &str) -> Self {
        let tokens = text
            .split(SEPARATORS)
            .filter(|t| !t.is_empty())
            .map(Token::parse)
            .collect();
        Version {
            text: text.to_string(),
            tokens,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

impl From<&str> for Version {
    fn from(text: &str) -> Self {
        Version::new(text)
    }
}

impl From<String> for Version {
    fn from(text: String) -> Self {
        Version::new(&text)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.tokens == other.tokens
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.tokens.hash(state);
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.tokens.cmp(&other.tokens)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Predicate over versions parsed from a label suffix such as `>=4.8`.
#[derive(Debug, Clone, PartialEq)]
pub enum VersionOperator {
    Any,
    Eq(Version),
    Ne(Version),
    Lt(Version),
    Le(Version),
    Gt(Version),
    Ge(Version),
}

impl VersionOperator {
    /// Longest symbols first so `<=` is never read as `<`.
    const SYMBOLS: [&'static str; 6] = ["==", "!=", "<=", ">=", "<", ">"];

    /// Parse an optional version predicate. A missing predicate matches any
    /// version; a bare version means equality.
    pub fn parse(spec: Option<&str>) -> Self {
        let Some(spec) = spec else {
            return VersionOperator::Any;
        };
        let (symbol, rest) = Self::SYMBOLS
            .iter()
            .find_map(|sym| spec.strip_prefix(sym).map(|rest| (*sym, rest)))
            .unwrap_or(("==", spec));
        let version = Version::new(rest.trim());
        match symbol {
            "!=" => VersionOperator::Ne(version),
            "<=" => VersionOperator::Le(version),
            ">=" => VersionOperator::Ge(version),
            "<" => VersionOperator::Lt(version),
            ">" => VersionOperator::Gt(version),
            _ => VersionOperator::Eq(version),
        }
    }

    pub fn matches(&self, version: &Version) -> bool {
        match self {
            VersionOperator::Any => true,
            VersionOperator::Eq(v) => version == v,
            VersionOperator::Ne(v) => version != v,
            VersionOperator::Lt(v) => version < v,
            VersionOperator::Le(v) => version <= v,
            VersionOperator::Gt(v) => version > v,
            VersionOperator::Ge(v) => version >= v,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dotted_numeric_ordering() {
        assert!(Version::new("1.2") < Version::new("1.10"));
        assert!(Version::new("1.10") < Version::new("2.0"));
        assert!(Version::new("1.2") < Version::new("1.2.1"));
    }

    #[test]
    fn test_equality_ignores_separator_kind() {
        assert_eq!(Version::new("1.2-3"), Version::new("1_2.3"));
        assert_ne!(Version::new("1.2"), Version::new("1.2.0"));
        assert_eq!(Version::new("1.02"), Version::new("1.2"));
    }

    #[test]
    fn test_mixed_tokens_compare_as_strings() {
        // "10" vs "rc": '1' < 'r'
        assert!(Version::new("1.10") < Version::new("1.rc"));
        assert!(Version::new("1.beta") > Version::new("1.alpha"));
    }

    #[test]
    fn test_display_keeps_original_text() {
        assert_eq!(Version::new("4.8.2").to_string(), "4.8.2");
        assert!(Version::new("").is_empty());
    }

    #[test]
    fn test_operator_parsing() {
        assert_eq!(VersionOperator::parse(None), VersionOperator::Any);
        assert_eq!(
            VersionOperator::parse(Some("1.0")),
            VersionOperator::Eq(Version::new("1.0"))
        );
        assert_eq!(
            VersionOperator::parse(Some("<=2")),
            VersionOperator::Le(Version::new("2"))
        );
        assert_eq!(
            VersionOperator::parse(Some(">3.1")),
            VersionOperator::Gt(Version::new("3.1"))
        );
    }

    #[test]
    fn test_operator_matching() {
        let v = Version::new("4.8.2");
        assert!(VersionOperator::parse(Some(">=4.8")).matches(&v));
        assert!(!VersionOperator::parse(Some("<4.8")).matches(&v));
        assert!(VersionOperator::parse(Some("!=5")).matches(&v));
        assert!(VersionOperator::Any.matches(&v));
    }
}
