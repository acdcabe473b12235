//! Select metric families by name: an allowlist or a denylist of exact names
//! and regex patterns, never both.

use kstate_core::{Error, Result};
use regex::Regex;

#[derive(Debug, Clone)]
pub struct AllowDenyList {
    patterns: Vec<Regex>,
    is_allowlist: bool,
}

impl AllowDenyList {
    /// Blank entries are ignored. With both lists empty every name is included.
    pub fn new<S: AsRef<str>>(allow: &[S], deny: &[S]) -> Result<Self> {
        let allow = non_blank(allow);
        let deny = non_blank(deny);
        if !allow.is_empty() && !deny.is_empty() {
            return Err(Error::MetricFilter(
                "allowlist and denylist are mutually exclusive, only one of them can be set".into(),
            ));
        }
        let is_allowlist = !allow.is_empty();
        let patterns = if is_allowlist { allow } else { deny }
            .into_iter()
            .map(|p| Regex::new(p).map_err(|e| Error::MetricFilter(format!("pattern {p:?}: {e}"))))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns, is_allowlist })
    }

    /// Patterns match anywhere in the name unless anchored.
    pub fn is_included(&self, name: &str) -> bool {
        let matched = self.patterns.iter().any(|r| r.is_match(name));
        matched == self.is_allowlist
    }

    pub fn is_allowlist(&self) -> bool { self.is_allowlist }

    pub fn patterns(&self) -> impl Iterator<Item = &str> { self.patterns.iter().map(Regex::as_str) }
}

fn non_blank<S: AsRef<str>>(items: &[S]) -> Vec<&str> {
    items.iter().map(|s| s.as_ref().trim()).filter(|s| !s.is_empty()).collect()
}
