//! Capability policy: which builtins and import targets a run may reach.
//!
//! Both axes use the same allow/block rule. An absent allow-set permits
//! everything not blocked, a present allow-set permits only its members (so
//! an empty one permits nothing), and the block-set always wins.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::config::SafeExecutionConfig;
use crate::script::{Builtins, Fault, FaultKind, ScriptResult};

/// Outcome of checking one name against a [`NameFilter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Allowed,
    NotAllowListed,
    Blocked,
}

impl Decision {
    pub fn is_allowed(self) -> bool {
        self == Decision::Allowed
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Decision::Allowed => write!(f, "allowed"),
            Decision::NotAllowListed => write!(f, "not allow-listed"),
            Decision::Blocked => write!(f, "blocked"),
        }
    }
}

/// One resolved allow/block pair.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameFilter {
    allowed: Option<BTreeSet<String>>,
    blocked: BTreeSet<String>,
}

impl NameFilter {
    /// `allowed == Some(empty)` denies everything; `None` permits everything
    /// that is not blocked.
    pub fn resolve(allowed: Option<BTreeSet<String>>, blocked: Option<BTreeSet<String>>) -> Self {
        Self {
            allowed,
            blocked: blocked.unwrap_or_default(),
        }
    }

    pub fn allow_all() -> Self {
        Self::default()
    }

    pub fn decision(&self, name: &str) -> Decision {
        if self.blocked.contains(name) {
            return Decision::Blocked;
        }
        match &self.allowed {
            Some(allowed) if !allowed.contains(name) => Decision::NotAllowListed,
            _ => Decision::Allowed,
        }
    }

    pub fn permits(&self, name: &str) -> bool {
        self.decision(name).is_allowed()
    }

    pub fn allowed(&self) -> Option<&BTreeSet<String>> {
        self.allowed.as_ref()
    }

    pub fn blocked(&self) -> &BTreeSet<String> {
        &self.blocked
    }

    pub fn is_unrestricted(&self) -> bool {
        self.allowed.is_none() && self.blocked.is_empty()
    }
}

/// Mediates every import a run attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportGuard {
    filter: NameFilter,
}

impl ImportGuard {
    pub fn new(filter: NameFilter) -> Self {
        Self { filter }
    }

    /// Decision for a possibly dotted module path.
    ///
    /// Blocking a package blocks its submodules, and allowing a package
    /// allows its submodules: `os.path` is checked as `os` and `os.path`.
    pub fn decision(&self, module: &str) -> Decision {
        let prefixes: Vec<&str> = module
            .match_indices('.')
            .map(|(i, _)| &module[..i])
            .chain(std::iter::once(module))
            .collect();
        if prefixes.iter().any(|p| self.filter.blocked.contains(*p)) {
            return Decision::Blocked;
        }
        match &self.filter.allowed {
            Some(allowed) if !prefixes.iter().any(|p| allowed.contains(*p)) => {
                Decision::NotAllowListed
            }
            _ => Decision::Allowed,
        }
    }

    pub fn check(&self, module: &str) -> ScriptResult<()> {
        match self.decision(module) {
            Decision::Allowed => Ok(()),
            denied => {
                tracing::debug!(module = %module, decision = %denied, "import denied");
                crate::metrics::METRICS.inc_policy_violations();
                Err(Fault::new(
                    FaultKind::PolicyViolation,
                    format!("import of module '{module}' is not allowed"),
                ))
            }
        }
    }

    pub fn filter(&self) -> &NameFilter {
        &self.filter
    }
}

/// The two filters a sandboxed run is held to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityPolicy {
    pub builtins: NameFilter,
    pub modules: NameFilter,
}

impl CapabilityPolicy {
    /// No restrictions on either axis.
    pub fn permissive() -> Self {
        Self::default()
    }

    /// Resolve the policy a configuration asks for. Outside safe mode the
    /// lists are ignored and everything is permitted.
    pub fn from_config(config: &SafeExecutionConfig) -> Self {
        if !config.safe_mode {
            return Self::permissive();
        }
        Self {
            builtins: NameFilter::resolve(
                config.allowed_builtins.clone(),
                config.blocked_builtins.clone(),
            ),
            modules: NameFilter::resolve(
                config.allowed_modules.clone(),
                config.blocked_modules.clone(),
            ),
        }
    }

    /// The builtins table filtered by this policy.
    pub fn builtins_table(&self) -> Builtins {
        if self.builtins.is_unrestricted() {
            Builtins::full()
        } else {
            Builtins::filtered(|name| self.builtins.permits(name))
        }
    }

    pub fn import_guard(&self) -> ImportGuard {
        ImportGuard::new(self.modules.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn absent_allow_set_permits_everything_not_blocked() {
        let filter = NameFilter::resolve(None, Some(set(&["eval"])));
        assert!(filter.permits("print"));
        assert_eq!(filter.decision("eval"), Decision::Blocked);
    }

    #[test]
    fn empty_allow_set_denies_everything() {
        let filter = NameFilter::resolve(Some(BTreeSet::new()), None);
        assert_eq!(filter.decision("print"), Decision::NotAllowListed);
        assert!(!filter.permits("len"));
    }

    #[test]
    fn block_wins_over_allow() {
        let filter = NameFilter::resolve(Some(set(&["math", "os"])), Some(set(&["os"])));
        assert!(filter.permits("math"));
        assert_eq!(filter.decision("os"), Decision::Blocked);
    }

    #[test]
    fn import_guard_checks_package_prefixes() {
        let guard = ImportGuard::new(NameFilter::resolve(Some(set(&["os"])), None));
        assert!(guard.check("os.path").is_ok());
        assert_eq!(guard.decision("json"), Decision::NotAllowListed);

        let guard = ImportGuard::new(NameFilter::resolve(None, Some(set(&["os"]))));
        assert_eq!(guard.decision("os.path"), Decision::Blocked);
        assert!(guard.check("math").is_ok());
    }

    #[test]
    fn denied_import_is_a_policy_violation() {
        let guard = ImportGuard::new(NameFilter::resolve(Some(set(&["math"])), None));
        let fault = guard.check("os").unwrap_err();
        assert_eq!(fault.kind, FaultKind::PolicyViolation);
        assert_eq!(fault.message, "import of module 'os' is not allowed");
    }

    #[test]
    fn policy_ignores_lists_outside_safe_mode() {
        let config = SafeExecutionConfig {
            safe_mode: false,
            allowed_modules: Some(BTreeSet::new()),
            ..SafeExecutionConfig::default()
        };
        assert_eq!(CapabilityPolicy::from_config(&config), CapabilityPolicy::permissive());
    }

    #[test]
    fn builtins_table_respects_filter() {
        let policy = CapabilityPolicy {
            builtins: NameFilter::resolve(None, Some(set(&["eval", "exec"]))),
            modules: NameFilter::allow_all(),
        };
        let table = policy.builtins_table();
        assert!(table.contains("print"));
        assert!(!table.contains("eval"));
        assert!(table.is_denied("exec"));
    }

    #[test]
    fn decision_display() {
        assert_eq!(Decision::Allowed.to_string(), "allowed");
        assert_eq!(Decision::NotAllowListed.to_string(), "not allow-listed");
        assert_eq!(Decision::Blocked.to_string(), "blocked");
    }
}
