//! Path-based request dispatch.
//!
//! The dispatch table is an ordered list of route rules evaluated first match
//! wins. A validated [`DispatchTable`] always ends with exactly one wildcard
//! catch-all targeting the static service, so every request path resolves to
//! exactly one service. All structural problems (missing or duplicate catch-all,
//! unreachable rules, malformed patterns) are rejected when the table is built.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Pattern string for the catch-all rule.
pub const CATCH_ALL_PATTERN: &str = "/*";

/// The two independently deployed services behind the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    /// Prebuilt static frontend assets
    Static,
    /// API backend under `/api/`
    Api,
}

impl ServiceKind {
    pub const ALL: [ServiceKind; 2] = [ServiceKind::Static, ServiceKind::Api];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceKind::Static => "static",
            ServiceKind::Api => "api",
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ServiceKind {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "static" | "frontend" | "default" => Ok(ServiceKind::Static),
            "api" | "backend" => Ok(ServiceKind::Api),
            _ => Err(DispatchError::UnknownService(s.to_string())),
        }
    }
}

/// A parsed route path pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathPattern {
    /// Matches the path exactly (`/robots.txt`)
    Exact(String),
    /// Matches any path starting with the stored prefix (`/api/*` stores `/api/`)
    Prefix(String),
    /// Matches every path (`/*`)
    Wildcard,
}

impl PathPattern {
    /// Parse a pattern as written in the manifest.
    ///
    /// A `*` is only allowed as the final segment (`/foo/*`). Patterns must be
    /// absolute.
    pub fn parse(raw: &str) -> Result<Self, DispatchError> {
        let raw = raw.trim();
        if !raw.starts_with('/') {
            return Err(DispatchError::MalformedPattern {
                pattern: raw.to_string(),
                reason: "pattern must start with '/'",
            });
        }

        if raw == CATCH_ALL_PATTERN {
            return Ok(PathPattern::Wildcard);
        }

        match raw.strip_suffix('*') {
            Some(prefix) if prefix.ends_with('/') && !prefix.contains('*') => {
                Ok(PathPattern::Prefix(prefix.to_string()))
            }
            Some(_) => Err(DispatchError::MalformedPattern {
                pattern: raw.to_string(),
                reason: "wildcard is only allowed as a trailing '/*'",
            }),
            None if raw.contains('*') => Err(DispatchError::MalformedPattern {
                pattern: raw.to_string(),
                reason: "wildcard is only allowed as a trailing '/*'",
            }),
            None => Ok(PathPattern::Exact(raw.to_string())),
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        match self {
            PathPattern::Exact(exact) => path == exact,
            PathPattern::Prefix(prefix) => path.starts_with(prefix.as_str()),
            PathPattern::Wildcard => true,
        }
    }

    /// True if every path matched by `other` is also matched by `self`.
    fn covers(&self, other: &PathPattern) -> bool {
        match (self, other) {
            (PathPattern::Wildcard, _) => true,
            (PathPattern::Prefix(p), PathPattern::Prefix(q)) => q.starts_with(p.as_str()),
            (PathPattern::Prefix(p), PathPattern::Exact(e)) => e.starts_with(p.as_str()),
            (PathPattern::Exact(a), PathPattern::Exact(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathPattern::Exact(exact) => f.write_str(exact),
            PathPattern::Prefix(prefix) => write!(f, "{}*", prefix),
            PathPattern::Wildcard => f.write_str(CATCH_ALL_PATTERN),
        }
    }
}

/// One entry of the dispatch table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRule {
    pub pattern: PathPattern,
    pub target: ServiceKind,
}

impl RouteRule {
    pub fn new(pattern: &str, target: ServiceKind) -> Result<Self, DispatchError> {
        Ok(Self {
            pattern: PathPattern::parse(pattern)?,
            target,
        })
    }
}

/// Immutable, validated dispatch table.
#[derive(Debug, Clone)]
pub struct DispatchTable {
    /// Rules evaluated before the catch-all, in declaration order
    rules: Vec<RouteRule>,
    catch_all: RouteRule,
}

impl DispatchTable {
    /// Build a table from rules in declaration order.
    pub fn new(rules: Vec<RouteRule>) -> Result<Self, DispatchError> {
        let wildcards = rules
            .iter()
            .filter(|rule| rule.pattern == PathPattern::Wildcard)
            .count();
        match wildcards {
            0 => return Err(DispatchError::MissingCatchAll),
            1 => {}
            n => return Err(DispatchError::DuplicateCatchAll(n)),
        }

        for (index, rule) in rules.iter().enumerate() {
            if let Some(earlier) = rules[..index]
                .iter()
                .find(|earlier| earlier.pattern.covers(&rule.pattern))
            {
                return Err(DispatchError::UnreachableRule {
                    pattern: rule.pattern.to_string(),
                    shadowed_by: earlier.pattern.to_string(),
                });
            }
        }

        let mut rules = rules;
        // The single wildcard is last: anything after it was rejected as unreachable.
        let catch_all = rules.pop().ok_or(DispatchError::MissingCatchAll)?;
        if catch_all.target != ServiceKind::Static {
            return Err(DispatchError::CatchAllTarget(catch_all.target));
        }

        Ok(Self { rules, catch_all })
    }

    /// Return the service a request path dispatches to.
    pub fn resolve(&self, path: &str) -> ServiceKind {
        self.matching_rule(path).target
    }

    /// Return the first rule matching a request path.
    pub fn matching_rule(&self, path: &str) -> &RouteRule {
        let path = normalize_request_path(path);
        self.rules
            .iter()
            .find(|rule| rule.pattern.matches(path))
            .unwrap_or(&self.catch_all)
    }

    /// All rules in evaluation order, catch-all included.
    pub fn rules(&self) -> impl Iterator<Item = &RouteRule> {
        self.rules.iter().chain(std::iter::once(&self.catch_all))
    }

    pub fn len(&self) -> usize {
        self.rules.len() + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

/// Strip query string and fragment; an empty path is `/`.
pub fn normalize_request_path(raw: &str) -> &str {
    let end = raw.find(['?', '#']).unwrap_or(raw.len());
    let path = &raw[..end];
    if path.is_empty() {
        "/"
    } else {
        path
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Malformed route pattern '{pattern}': {reason}")]
    MalformedPattern {
        pattern: String,
        reason: &'static str,
    },

    #[error("Unknown service '{0}' (expected 'static' or 'api')")]
    UnknownService(String),

    #[error("Dispatch table has no '/*' catch-all rule")]
    MissingCatchAll,

    #[error("Dispatch table has {0} '/*' catch-all rules, expected exactly one")]
    DuplicateCatchAll(usize),

    #[error("Catch-all rule must target the static service, not '{0}'")]
    CatchAllTarget(ServiceKind),

    #[error("Route '{pattern}' can never match: shadowed by earlier route '{shadowed_by}'")]
    UnreachableRule {
        pattern: String,
        shadowed_by: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn standard_table() -> DispatchTable {
        DispatchTable::new(vec![
            RouteRule::new("/api/*", ServiceKind::Api).unwrap(),
            RouteRule::new("/*", ServiceKind::Static).unwrap(),
        ])
        .unwrap()
    }

    #[test]
    fn test_parse_patterns() {
        assert_eq!(PathPattern::parse("/*").unwrap(), PathPattern::Wildcard);
        assert_eq!(
            PathPattern::parse("/api/*").unwrap(),
            PathPattern::Prefix("/api/".to_string())
        );
        assert_eq!(
            PathPattern::parse("/robots.txt").unwrap(),
            PathPattern::Exact("/robots.txt".to_string())
        );
    }

    #[test]
    fn test_parse_rejects_malformed_patterns() {
        assert!(PathPattern::parse("api/*").is_err());
        assert!(PathPattern::parse("/api*").is_err());
        assert!(PathPattern::parse("/*/health").is_err());
        assert!(PathPattern::parse("/a/*/b/*").is_err());
    }

    #[test]
    fn test_pattern_display_round_trips_manifest_text() {
        for raw in ["/*", "/api/*", "/favicon.ico"] {
            assert_eq!(PathPattern::parse(raw).unwrap().to_string(), raw);
        }
    }

    #[test]
    fn test_first_match_wins() {
        let table = standard_table();
        assert_eq!(table.resolve("/api/health"), ServiceKind::Api);
        assert_eq!(table.resolve("/api/status"), ServiceKind::Api);
        assert_eq!(table.resolve("/index.html"), ServiceKind::Static);
        assert_eq!(table.resolve("/"), ServiceKind::Static);
    }

    #[test]
    fn test_prefix_includes_trailing_slash() {
        let table = standard_table();
        assert_eq!(table.resolve("/api/"), ServiceKind::Api);
        // The bare segment is not under the /api/ prefix
        assert_eq!(table.resolve("/api"), ServiceKind::Static);
        assert_eq!(table.resolve("/apiary"), ServiceKind::Static);
    }

    #[test]
    fn test_query_and_fragment_are_ignored() {
        let table = standard_table();
        assert_eq!(table.resolve("/api/data?limit=3"), ServiceKind::Api);
        assert_eq!(table.resolve("?x=1"), ServiceKind::Static);
        assert_eq!(table.resolve(""), ServiceKind::Static);
        assert_eq!(table.resolve("/app#/api/"), ServiceKind::Static);
    }

    #[test]
    fn test_totality_over_arbitrary_paths() {
        let table = standard_table();
        for path in ["/", "/a", "/api", "/api/", "/api/x/y/z", "//", "/%20", "/static/app.js"] {
            let rule = table.matching_rule(path);
            assert!(rule.pattern.matches(normalize_request_path(path)));
        }
    }

    #[test]
    fn test_exact_rule_before_catch_all() {
        let table = DispatchTable::new(vec![
            RouteRule::new("/status", ServiceKind::Api).unwrap(),
            RouteRule::new("/api/*", ServiceKind::Api).unwrap(),
            RouteRule::new("/*", ServiceKind::Static).unwrap(),
        ])
        .unwrap();
        assert_eq!(table.resolve("/status"), ServiceKind::Api);
        assert_eq!(table.resolve("/status/"), ServiceKind::Static);
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn test_missing_catch_all_rejected() {
        let err = DispatchTable::new(vec![RouteRule::new("/api/*", ServiceKind::Api).unwrap()])
            .unwrap_err();
        assert_eq!(err, DispatchError::MissingCatchAll);
        assert_eq!(
            DispatchTable::new(vec![]).unwrap_err(),
            DispatchError::MissingCatchAll
        );
    }

    #[test]
    fn test_duplicate_catch_all_rejected() {
        let err = DispatchTable::new(vec![
            RouteRule::new("/*", ServiceKind::Static).unwrap(),
            RouteRule::new("/*", ServiceKind::Static).unwrap(),
        ])
        .unwrap_err();
        assert_eq!(err, DispatchError::DuplicateCatchAll(2));
    }

    #[test]
    fn test_catch_all_must_target_static() {
        let err = DispatchTable::new(vec![RouteRule::new("/*", ServiceKind::Api).unwrap()])
            .unwrap_err();
        assert_eq!(err, DispatchError::CatchAllTarget(ServiceKind::Api));
    }

    #[test]
    fn test_rule_after_catch_all_is_unreachable() {
        let err = DispatchTable::new(vec![
            RouteRule::new("/*", ServiceKind::Static).unwrap(),
            RouteRule::new("/api/*", ServiceKind::Api).unwrap(),
        ])
        .unwrap_err();
        assert!(matches!(err, DispatchError::UnreachableRule { .. }));
    }

    #[test]
    fn test_narrower_prefix_after_broader_is_unreachable() {
        let err = DispatchTable::new(vec![
            RouteRule::new("/api/*", ServiceKind::Api).unwrap(),
            RouteRule::new("/api/v1/*", ServiceKind::Static).unwrap(),
            RouteRule::new("/*", ServiceKind::Static).unwrap(),
        ])
        .unwrap_err();
        assert_eq!(
            err,
            DispatchError::UnreachableRule {
                pattern: "/api/v1/*".to_string(),
                shadowed_by: "/api/*".to_string(),
            }
        );
    }

    #[test]
    fn test_service_kind_from_str_aliases() {
        assert_eq!("API".parse::<ServiceKind>().unwrap(), ServiceKind::Api);
        assert_eq!("frontend".parse::<ServiceKind>().unwrap(), ServiceKind::Static);
        assert!("database".parse::<ServiceKind>().is_err());
    }
}
