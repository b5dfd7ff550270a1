//! Rule classification and topic filtering.

use regex::Regex;

use crate::config::RuleConfig;

/// How a rule's topic set is determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    /// Only literal topics; the topic set is fixed.
    Static,
    /// At least one `/pattern/` entry; the topic set follows the catalog.
    Dynamic,
}

/// Inner pattern of a slash-delimited entry such as `/^jobs\./`.
pub fn regex_pattern(entry: &str) -> Option<&str> {
    if entry.len() >= 3 && entry.starts_with('/') && entry.ends_with('/') {
        Some(&entry[1..entry.len() - 1])
    } else {
        None
    }
}

/// A rule is dynamic as soon as one entry is a pattern.
pub fn classify(rule: &RuleConfig) -> RuleKind {
    if rule
        .topic_entries()
        .iter()
        .any(|entry| regex_pattern(entry).is_some())
    {
        RuleKind::Dynamic
    } else {
        RuleKind::Static
    }
}

/// Compiled topic selection of one rule.
#[derive(Debug, Clone)]
pub struct TopicFilter {
    literals: Vec<String>,
    patterns: Vec<Regex>,
    excludes: Vec<String>,
}

impl TopicFilter {
    pub fn new(rule: &RuleConfig) -> Result<Self, regex::Error> {
        let mut literals = Vec::new();
        let mut patterns = Vec::new();
        for entry in rule.topic_entries() {
            match regex_pattern(&entry) {
                Some(pattern) => patterns.push(Regex::new(pattern)?),
                None => literals.push(entry),
            }
        }
        Ok(Self {
            literals,
            patterns,
            excludes: rule.exclude_topics.clone(),
        })
    }

    /// Whether a single topic is selected. Patterns match anywhere in the
    /// name unless they anchor themselves; exclusions win over inclusions.
    pub fn matches(&self, topic: &str) -> bool {
        if self.excludes.iter().any(|t| t == topic) {
            return false;
        }
        self.literals.iter().any(|t| t == topic) || self.patterns.iter().any(|p| p.is_match(topic))
    }

    /// Select from `all_topics`, keeping the broker's order.
    pub fn filter(&self, all_topics: &[String]) -> Vec<String> {
        all_topics
            .iter()
            .filter(|topic| self.matches(topic))
            .cloned()
            .collect()
    }
}
