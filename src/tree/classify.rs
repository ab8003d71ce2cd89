use regex::Regex;
use crate::config::RuleConfig;
use crate::error::{FsError, Result};
use super::NodeKind;

/// Ordered locator patterns; the first match decides the node kind.
#[derive(Debug, Clone)]
pub struct Classifier {
    rules: Vec<(Regex, NodeKind)>,
}

impl Classifier {
    pub fn new(rules: &[RuleConfig]) -> Result<Self> {
        let rules = rules
            .iter()
            .map(|rule| {
                Regex::new(&rule.pattern)
                    .map(|re| (re, rule.kind))
                    .map_err(|e| FsError::Config(format!("rule {:?}: {}", rule.pattern, e)))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    /// Never fails: unmatched locators are [`NodeKind::Unknown`].
    pub fn classify(&self, href: &str) -> NodeKind {
        self.rules
            .iter()
            .find(|(re, _)| re.is_match(href))
            .map(|(_, kind)| *kind)
            .unwrap_or(NodeKind::Unknown)
    }
}
