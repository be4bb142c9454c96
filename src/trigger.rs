//! Pipeline trigger evaluation.
//!
//! Maps the changed file paths of a source push to the services whose
//! pipelines must run. Watched prefixes are compared on whole path
//! components, and prefixes belonging to different services must be
//! disjoint so one changed file can only ever dirty its own service.

use std::collections::{BTreeMap, BTreeSet};

use crate::dispatch::ServiceKind;

/// A watched source directory bound to a build specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerRule {
    pub service: ServiceKind,
    /// Normalized prefix, always ending with `/`
    pub watch: String,
    pub build_spec: String,
}

impl TriggerRule {
    pub fn new(service: ServiceKind, watch: &str, build_spec: &str) -> Result<Self, TriggerError> {
        let watch = normalize_watch_prefix(watch)
            .ok_or_else(|| TriggerError::EmptyPrefix(service))?;
        if build_spec.trim().is_empty() {
            return Err(TriggerError::MissingBuildSpec(service));
        }
        Ok(Self {
            service,
            watch,
            build_spec: build_spec.trim().to_string(),
        })
    }

    pub fn watches(&self, changed_path: &str) -> bool {
        normalize_changed_path(changed_path).starts_with(self.watch.as_str())
    }
}

/// A service marked dirty by a push, with the paths that triggered it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirtyService {
    pub build_spec: String,
    pub changed: Vec<String>,
}

/// Result of evaluating one push against the trigger set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TriggerPlan {
    pub dirty: BTreeMap<ServiceKind, DirtyService>,
    /// Changed paths no trigger watches
    pub ignored: Vec<String>,
}

impl TriggerPlan {
    pub fn services(&self) -> BTreeSet<ServiceKind> {
        self.dirty.keys().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.dirty.is_empty()
    }
}

/// Validated, immutable set of trigger rules.
#[derive(Debug, Clone)]
pub struct TriggerSet {
    rules: Vec<TriggerRule>,
}

impl TriggerSet {
    /// Build a trigger set, rejecting prefixes that overlap across services.
    pub fn new(rules: Vec<TriggerRule>) -> Result<Self, TriggerError> {
        for (index, rule) in rules.iter().enumerate() {
            for other in &rules[index + 1..] {
                if rule.service == other.service {
                    continue;
                }
                if rule.watch.starts_with(other.watch.as_str())
                    || other.watch.starts_with(rule.watch.as_str())
                {
                    return Err(TriggerError::OverlappingPrefixes {
                        first: (rule.service, rule.watch.clone()),
                        second: (other.service, other.watch.clone()),
                    });
                }
            }
        }
        Ok(Self { rules })
    }

    /// Determine which services a push dirties.
    pub fn evaluate<I, S>(&self, changed: I) -> TriggerPlan
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut plan = TriggerPlan::default();

        for path in changed {
            let path = path.as_ref();
            let mut watched = false;
            for rule in self.rules.iter().filter(|rule| rule.watches(path)) {
                watched = true;
                let entry = plan
                    .dirty
                    .entry(rule.service)
                    .or_insert_with(|| DirtyService {
                        build_spec: rule.build_spec.clone(),
                        changed: Vec::new(),
                    });
                if !entry.changed.iter().any(|p| p == path) {
                    entry.changed.push(path.to_string());
                }
            }
            if !watched {
                plan.ignored.push(path.to_string());
            }
        }

        plan
    }

    pub fn rules(&self) -> &[TriggerRule] {
        &self.rules
    }

    /// Services with at least one trigger.
    pub fn services(&self) -> BTreeSet<ServiceKind> {
        self.rules.iter().map(|rule| rule.service).collect()
    }
}

fn strip_leading(path: &str) -> &str {
    let mut path = path.trim();
    loop {
        if let Some(rest) = path.strip_prefix("./") {
            path = rest;
        } else if let Some(rest) = path.strip_prefix('/') {
            path = rest;
        } else {
            return path;
        }
    }
}

fn normalize_changed_path(path: &str) -> &str {
    strip_leading(path)
}

/// Normalize a watched prefix to `dir/` form. Returns `None` for an empty prefix,
/// which would watch the entire repository.
fn normalize_watch_prefix(watch: &str) -> Option<String> {
    let trimmed = strip_leading(watch).trim_end_matches('/');
    if trimmed.is_empty() {
        None
    } else {
        Some(format!("{}/", trimmed))
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TriggerError {
    #[error("Trigger for service '{0}' has an empty watch prefix")]
    EmptyPrefix(ServiceKind),

    #[error("Trigger for service '{0}' has no build specification")]
    MissingBuildSpec(ServiceKind),

    #[error(
        "Trigger prefixes overlap: '{}' ({}) and '{}' ({})",
        first.1, first.0, second.1, second.0
    )]
    OverlappingPrefixes {
        first: (ServiceKind, String),
        second: (ServiceKind, String),
    },
}
