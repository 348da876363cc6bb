//! Persisted search settings.
//!
//! Settings live in a small JSON document that is read at startup and
//! rewritten whenever a search is started:
//!
//! ```json
//! {
//!   "max_results": 30000,
//!   "comment": "NeurIPS 2025",
//!   "title_keywords": "time series, forecasting",
//!   "title_logic": "OR",
//!   "abstract_keywords": "",
//!   "abstract_logic": "AND",
//!   "require_open_source": true,
//!   "download_pdfs": false,
//!   "output_dir": "."
//! }
//! ```
//!
//! Missing keys take their defaults. A missing or unreadable file is the
//! same as an empty one.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::layers::{CriteriaError, KeywordLogic, KeywordSpec, SearchCriteria, MAX_RESULTS_LIMIT};

pub const DEFAULT_CONFIG_FILE: &str = "arxiv_sieve.json";

const DEFAULT_COMMENT: &str = "NeurIPS 2025";
const DEFAULT_TITLE_KEYWORDS: &str = "time series, time-series, time series forecasting, \
    time-series forecasting, time series prediction, time-series prediction";
const DEFAULT_ABSTRACT_KEYWORDS: &str = "time series, time-series, time series forecasting, \
    time-series forecasting, time series prediction, time-series prediction, sequence forecasting, \
    sequential forecasting, temporal forecasting, spatio-temporal forecasting, \
    spatiotemporal forecasting, multivariate time series, univariate time series, \
    time series model, time series analysis";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Records to examine from arXiv, at most [`MAX_RESULTS_LIMIT`]
    pub max_results: usize,

    /// Conference string the comment field must contain, e.g. "AAAI 2026"
    #[serde(alias = "comment_text")]
    pub comment: String,

    #[serde(alias = "title_mode")]
    pub title_logic: KeywordLogic,

    /// Comma separated
    pub title_keywords: String,

    #[serde(alias = "abs_mode")]
    pub abstract_logic: KeywordLogic,

    #[serde(alias = "abs_keywords")]
    pub abstract_keywords: String,

    #[serde(alias = "require_github")]
    pub require_open_source: bool,

    pub download_pdfs: bool,

    /// Where PDFs and the result spreadsheet are written
    pub output_dir: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_results: MAX_RESULTS_LIMIT,
            comment: DEFAULT_COMMENT.to_string(),
            title_logic: KeywordLogic::Any,
            title_keywords: DEFAULT_TITLE_KEYWORDS.to_string(),
            abstract_logic: KeywordLogic::Any,
            abstract_keywords: DEFAULT_ABSTRACT_KEYWORDS.to_string(),
            require_open_source: true,
            download_pdfs: false,
            output_dir: PathBuf::from("."),
        }
    }
}

impl Settings {
    /// Never fails: a missing or malformed file yields the defaults.
    pub fn load(path: &Path) -> Self {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No settings file at {}, using defaults", path.display());
                return Self::default();
            }
            Err(e) => {
                tracing::warn!("Could not read settings file {}: {}, using defaults", path.display(), e);
                return Self::default();
            }
        };

        match serde_json::from_str::<Settings>(&text) {
            Ok(settings) => settings.bounded(),
            Err(e) => {
                tracing::warn!("Ignoring malformed settings file {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write settings to {}", path.display()))?;
        tracing::debug!("Saved settings to {}", path.display());
        Ok(())
    }

    pub fn criteria(&self) -> Result<SearchCriteria, CriteriaError> {
        Ok(SearchCriteria {
            max_results: SearchCriteria::bound_max_results(self.max_results)?,
            comment: self.comment.clone(),
            title: KeywordSpec::parse(self.title_keywords.clone(), self.title_logic),
            summary: KeywordSpec::parse(self.abstract_keywords.clone(), self.abstract_logic),
            require_open_source: self.require_open_source,
            download_pdfs: self.download_pdfs,
            output_dir: self.output_dir.clone(),
        })
    }

    pub fn from_criteria(criteria: &SearchCriteria) -> Self {
        Self {
            max_results: criteria.max_results,
            comment: criteria.comment.clone(),
            title_logic: criteria.title.logic(),
            title_keywords: criteria.title.source().to_string(),
            abstract_logic: criteria.summary.logic(),
            abstract_keywords: criteria.summary.source().to_string(),
            require_open_source: criteria.require_open_source,
            download_pdfs: criteria.download_pdfs,
            output_dir: criteria.output_dir.clone(),
        }
    }

    fn bounded(mut self) -> Self {
        self.max_results = match SearchCriteria::bound_max_results(self.max_results) {
            Ok(max_results) => max_results,
            Err(e) => {
                tracing::warn!("Invalid max_results in settings ({}), using {}", e, MAX_RESULTS_LIMIT);
                MAX_RESULTS_LIMIT
            }
        };
        self
    }
}
