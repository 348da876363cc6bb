use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Hard ceiling the arXiv API will page through for one query.
pub const MAX_RESULTS_LIMIT: usize = 30_000;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PaperRecord {
    pub id: String,
    pub title: String,
    pub summary: String,
    pub comment: String,
    pub authors: Vec<String>,
    pub published: Option<DateTime<FixedOffset>>,
    pub updated: Option<DateTime<FixedOffset>>,
    pub pdf_url: Option<String>,
    pub links: Vec<String>,
    pub categories: Vec<String>,
}

/// How the keywords of one field combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
pub enum KeywordLogic {
    /// Every keyword must appear.
    #[serde(rename = "AND", alias = "ALL")]
    #[value(name = "and", alias = "all")]
    All,
    /// At least one keyword must appear.
    #[default]
    #[serde(rename = "OR", alias = "ANY")]
    #[value(name = "or", alias = "any")]
    Any,
}

/// A comma separated keyword list plus its combination logic.
///
/// The raw source string is kept so the spec can be persisted exactly as
/// the user typed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordSpec {
    source: String,
    keywords: Vec<String>,
    logic: KeywordLogic,
}

impl KeywordSpec {
    pub fn parse(source: impl Into<String>, logic: KeywordLogic) -> Self {
        let source = source.into();
        let keywords = source
            .split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_lowercase)
            .collect();

        Self { source, keywords, logic }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    pub fn logic(&self) -> KeywordLogic {
        self.logic
    }

    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CriteriaError {
    #[error("max_results must be greater than 0")]
    ZeroMaxResults,
}

/// Everything one search run needs, validated once before querying.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchCriteria {
    pub max_results: usize,
    pub comment: String,
    pub title: KeywordSpec,
    pub summary: KeywordSpec,
    pub require_open_source: bool,
    pub download_pdfs: bool,
    pub output_dir: PathBuf,
}

impl SearchCriteria {
    /// Rejects zero and clamps anything above [`MAX_RESULTS_LIMIT`].
    pub fn bound_max_results(requested: usize) -> Result<usize, CriteriaError> {
        if requested == 0 {
            return Err(CriteriaError::ZeroMaxResults);
        }
        if requested > MAX_RESULTS_LIMIT {
            tracing::warn!(
                "max_results {} exceeds the limit, clamped to {}",
                requested,
                MAX_RESULTS_LIMIT
            );
            return Ok(MAX_RESULTS_LIMIT);
        }
        Ok(requested)
    }

    /// Trimmed, lowercased comment filter; empty when the filter is off.
    pub fn comment_filter(&self) -> String {
        self.comment.trim().to_lowercase()
    }
}

pub mod discovery;
pub mod download;
pub mod export;
pub mod filter;
pub mod matching;
pub mod open_source;
pub mod pdf;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_spec_splits_and_normalizes() {
        let spec = KeywordSpec::parse(" Time Series,  ,Forecasting ,\n", KeywordLogic::Any);
        assert_eq!(spec.keywords(), &["time series".to_string(), "forecasting".to_string()]);
        assert_eq!(spec.source(), " Time Series,  ,Forecasting ,\n");
    }

    #[test]
    fn test_keyword_spec_empty_source() {
        assert!(KeywordSpec::parse("", KeywordLogic::All).is_empty());
        assert!(KeywordSpec::parse(" , ,", KeywordLogic::All).is_empty());
    }

    #[test]
    fn test_bound_max_results() {
        assert_eq!(SearchCriteria::bound_max_results(0), Err(CriteriaError::ZeroMaxResults));
        assert_eq!(SearchCriteria::bound_max_results(5), Ok(5));
        assert_eq!(SearchCriteria::bound_max_results(MAX_RESULTS_LIMIT), Ok(MAX_RESULTS_LIMIT));
        assert_eq!(SearchCriteria::bound_max_results(MAX_RESULTS_LIMIT + 1), Ok(MAX_RESULTS_LIMIT));
    }

    #[test]
    fn test_keyword_logic_persisted_names() {
        assert_eq!(serde_json::to_string(&KeywordLogic::All).unwrap(), "\"AND\"");
        assert_eq!(serde_json::to_string(&KeywordLogic::Any).unwrap(), "\"OR\"");
        let parsed: KeywordLogic = serde_json::from_str("\"ANY\"").unwrap();
        assert_eq!(parsed, KeywordLogic::Any);
    }
}
