//! Matching cycle output against capabilities.
//!
//! Attribution is intentionally coarse: keywords drawn from a capability's
//! tags and id are searched for in the output text. Callers credit at most
//! one capability per cycle, so a matcher only answers yes/no for one
//! capability at a time.

use crate::core::registry::Capability;

/// Keywords a capability can be recognized by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchKeys {
    pub tags: Vec<String>,
    pub id_tokens: Vec<String>,
}

impl MatchKeys {
    pub fn for_capability(id: &str, capability: &Capability) -> Self {
        Self {
            tags: capability.tags.iter().cloned().collect(),
            id_tokens: id
                .split(['-', '_'])
                .filter(|token| !token.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    pub fn keywords(&self) -> impl Iterator<Item = &str> {
        self.tags
            .iter()
            .chain(self.id_tokens.iter())
            .map(String::as_str)
    }
}

pub trait OutcomeMatcher {
    /// Whether `output` is evidence that the capability described by `keys` was exercised.
    fn matches(&self, keys: &MatchKeys, output: &str) -> bool;
}

/// Case-insensitive substring containment over tags and id tokens.
#[derive(Debug, Clone, Copy)]
pub struct KeywordMatcher {
    /// Keywords shorter than this are ignored (too noisy).
    pub min_keyword_chars: usize,
}

impl Default for KeywordMatcher {
    fn default() -> Self {
        Self {
            min_keyword_chars: 3,
        }
    }
}

impl OutcomeMatcher for KeywordMatcher {
    fn matches(&self, keys: &MatchKeys, output: &str) -> bool {
        let haystack = output.to_lowercase();
        keys.keywords()
            .map(str::trim)
            .filter(|kw| kw.chars().count() >= self.min_keyword_chars)
            .any(|kw| haystack.contains(&kw.to_lowercase()))
    }
}
