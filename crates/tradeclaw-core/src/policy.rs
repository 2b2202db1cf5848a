//! Tool policy engine: allow/deny pattern matching and additive merging.
//!
//! A pattern is `*` (everything), `prefix*` (prefix match), or an exact tool
//! name. Policies are plain data; every function here is pure.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Allow/deny pattern set restricting which tools a run may invoke.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deny: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_all: Option<bool>,
}

impl ToolPolicy {
    pub fn allow<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allow: Some(patterns.into_iter().map(Into::into).collect()),
            ..Default::default()
        }
    }

    pub fn deny<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            deny: Some(patterns.into_iter().map(Into::into).collect()),
            ..Default::default()
        }
    }

    pub fn with_deny<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.deny
            .get_or_insert_with(Vec::new)
            .extend(patterns.into_iter().map(Into::into));
        self
    }

    pub fn with_allow_all(mut self, allow_all: bool) -> Self {
        self.allow_all = Some(allow_all);
        self
    }

    /// Reject patterns the matcher does not understand.
    pub fn validate(&self) -> Result<()> {
        self.allow
            .iter()
            .chain(self.deny.iter())
            .flatten()
            .try_for_each(|p| validate_pattern(p))
    }
}

/// A pattern is valid when it is non-empty and `*` only appears as its last character.
pub fn validate_pattern(pattern: &str) -> Result<()> {
    let mut head = pattern.chars();
    head.next_back();
    let reason = if pattern.is_empty() {
        Some("pattern is empty")
    } else if head.as_str().contains('*') {
        Some("'*' is only supported as a trailing wildcard")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(Error::InvalidPolicy {
            pattern: pattern.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

/// Match a tool name against a single pattern.
pub fn matches_pattern(pattern: &str, name: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    match pattern.strip_suffix('*') {
        Some(prefix) => name.starts_with(prefix),
        None => pattern == name,
    }
}

fn matches_any(patterns: Option<&Vec<String>>, name: &str) -> bool {
    patterns
        .map(|ps| ps.iter().any(|p| matches_pattern(p, name)))
        .unwrap_or(false)
}

/// Decide whether `name` may be invoked under `policy`.
///
/// No policy allows everything. Otherwise the allow list (or `allow_all`)
/// decides first, and a deny match always wins over an allow.
pub fn is_tool_allowed(policy: Option<&ToolPolicy>, name: &str) -> bool {
    let Some(policy) = policy else {
        return true;
    };

    let allow_list = policy.allow.as_ref().filter(|a| !a.is_empty());
    let mut allowed = policy.allow_all.unwrap_or(allow_list.is_none());
    if allow_list.is_some() {
        allowed = matches_any(allow_list, name);
    }
    if !allowed {
        return false;
    }
    !matches_any(policy.deny.as_ref(), name)
}

/// Combine two policies. Lists are concatenated, so a deny from either side
/// survives; `allow_all` from `override_policy` wins when it is set.
pub fn merge_tool_policies(
    base: Option<&ToolPolicy>,
    override_policy: Option<&ToolPolicy>,
) -> Option<ToolPolicy> {
    match (base, override_policy) {
        (None, None) => None,
        (Some(p), None) | (None, Some(p)) => Some(p.clone()),
        (Some(base), Some(over)) => Some(ToolPolicy {
            allow: concat(base.allow.as_ref(), over.allow.as_ref()),
            deny: concat(base.deny.as_ref(), over.deny.as_ref()),
            allow_all: over.allow_all.or(base.allow_all),
        }),
    }
}

fn concat(a: Option<&Vec<String>>, b: Option<&Vec<String>>) -> Option<Vec<String>> {
    match (a, b) {
        (None, None) => None,
        _ => Some(a.into_iter().chain(b).flatten().cloned().collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_wildcard_is_a_prefix_match() {
        assert!(matches_pattern("market.*", "market.quote"));
        assert!(matches_pattern("market*", "marketplace"));
        assert!(!matches_pattern("market.*", "trade.swap"));
        assert!(matches_pattern("*", "anything"));
        assert!(matches_pattern("trade.swap", "trade.swap"));
        assert!(!matches_pattern("trade.swap", "trade.swap2"));
    }

    #[test]
    fn inner_wildcards_are_rejected() {
        assert!(validate_pattern("market.*").is_ok());
        assert!(validate_pattern("*").is_ok());
        assert!(validate_pattern("").is_err());
        assert!(validate_pattern("*.quote").is_err());
        assert!(validate_pattern("a*b").is_err());
    }

    #[test]
    fn empty_allow_list_behaves_like_no_allow_list() {
        let policy = ToolPolicy {
            allow: Some(vec![]),
            ..Default::default()
        };
        assert!(is_tool_allowed(Some(&policy), "market.quote"));
    }

    #[test]
    fn allow_all_false_without_allow_list_denies() {
        let policy = ToolPolicy::default().with_allow_all(false);
        assert!(!is_tool_allowed(Some(&policy), "market.quote"));
    }
}
