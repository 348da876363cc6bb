use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::path::{Path, PathBuf};
use crate::layers::filter::ScreenedPaper;

#[derive(Serialize)]
struct ResultRow<'a> {
    #[serde(rename = "Identifier")]
    id: &'a str,
    #[serde(rename = "Title")]
    title: &'a str,
    #[serde(rename = "Authors")]
    authors: String,
    #[serde(rename = "Comment")]
    comment: &'a str,
    #[serde(rename = "Abstract")]
    summary: String,
    #[serde(rename = "Open Source")]
    open_source: bool,
    #[serde(rename = "PDF Link")]
    pdf_url: &'a str,
    #[serde(rename = "Published")]
    published: String,
    #[serde(rename = "Updated")]
    updated: String,
    #[serde(rename = "Categories")]
    categories: String,
}

impl<'a> From<&'a ScreenedPaper> for ResultRow<'a> {
    fn from(screened: &'a ScreenedPaper) -> Self {
        let paper = &screened.paper;
        Self {
            id: &paper.id,
            title: &paper.title,
            authors: paper.authors.join(", "),
            comment: &paper.comment,
            summary: paper.summary.replace(['\r', '\n'], " "),
            open_source: screened.open_source,
            pdf_url: paper.pdf_url.as_deref().unwrap_or_default(),
            published: paper.published.map(|d| d.format("%Y-%m-%d").to_string()).unwrap_or_default(),
            updated: paper.updated.map(|d| d.format("%Y-%m-%d").to_string()).unwrap_or_default(),
            categories: paper.categories.join(", "),
        }
    }
}

/// `arxiv_search_<comment>_<n>_papers_<timestamp>.csv` inside `output_dir`.
pub fn result_path(output_dir: &Path, comment: &str, count: usize, now: DateTime<Local>) -> PathBuf {
    let safe_comment: String = comment
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '_' | '-'))
        .collect::<String>()
        .trim()
        .chars()
        .take(40)
        .collect();
    let safe_comment = if safe_comment.is_empty() { "comment".to_string() } else { safe_comment };

    output_dir.join(format!(
        "arxiv_search_{}_{}_papers_{}.csv",
        safe_comment,
        count,
        now.format("%Y%m%d_%H%M%S")
    ))
}

/// Writes one row per paper, replacing any existing file at `path`.
pub fn write_results(path: &Path, papers: &[ScreenedPaper]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let mut wtr = csv::WriterBuilder::new()
        .has_headers(true)
        .from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;

    for screened in papers {
        wtr.serialize(ResultRow::from(screened))
            .context("Failed to write CSV record")?;
    }

    wtr.flush().context("Failed to flush CSV")?;
    tracing::info!("Saved {} papers to {}", papers.len(), path.display());
    Ok(())
}
