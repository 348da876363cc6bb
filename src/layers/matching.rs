use crate::layers::{KeywordLogic, KeywordSpec};

pub struct KeywordMatcher;

impl KeywordMatcher {
    /// Case-insensitive substring match of every (`All`) or any (`Any`)
    /// keyword. An empty spec matches everything.
    pub fn matches(text: &str, spec: &KeywordSpec) -> bool {
        if spec.is_empty() {
            return true;
        }

        let text = text.to_lowercase();
        let mut keywords = spec.keywords().iter();
        let matched = match spec.logic() {
            KeywordLogic::All => keywords.all(|k| text.contains(k.as_str())),
            KeywordLogic::Any => keywords.any(|k| text.contains(k.as_str())),
        };
        tracing::debug!(
            "Keyword check ({:?}, {} keywords) on {} chars: {}",
            spec.logic(),
            spec.keywords().len(),
            text.chars().count(),
            matched
        );
        matched
    }
}
