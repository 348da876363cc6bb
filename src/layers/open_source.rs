// Open-source heuristic: a code-hosting link in metadata or paper text
use crate::layers::PaperRecord;

pub const OPEN_SOURCE_MARKER: &str = "github.com";

pub struct OpenSourceDetector;

impl OpenSourceDetector {
    /// Checks title, abstract, comment, PDF URL and metadata links.
    pub fn in_metadata(paper: &PaperRecord) -> bool {
        let fields = [
            paper.title.as_str(),
            paper.summary.as_str(),
            paper.comment.as_str(),
            paper.pdf_url.as_deref().unwrap_or_default(),
        ];
        fields
            .into_iter()
            .chain(paper.links.iter().map(String::as_str))
            .any(Self::contains_marker)
    }

    pub fn in_text(text: &str) -> bool {
        Self::contains_marker(text)
    }

    /// Metadata first, then the extracted PDF text when one is supplied.
    pub fn is_open_source(paper: &PaperRecord, pdf_text: Option<&str>) -> bool {
        Self::in_metadata(paper) || pdf_text.is_some_and(Self::in_text)
    }

    fn contains_marker(text: &str) -> bool {
        text.to_lowercase().contains(OPEN_SOURCE_MARKER)
    }
}
