use futures_util::{Stream, StreamExt, pin_mut};
use std::fmt;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use crate::layers::{PaperRecord, SearchCriteria};
use crate::layers::matching::KeywordMatcher;
use crate::layers::open_source::OpenSourceDetector;
use crate::layers::pdf::PdfTextSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    CommentMismatch,
    TitleKeywords,
    AbstractKeywords,
    NotOpenSource,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::CommentMismatch => "comment does not mention the conference filter",
            Self::TitleKeywords => "title keywords not matched",
            Self::AbstractKeywords => "abstract keywords not matched",
            Self::NotOpenSource => "no GitHub link found (not open source or not stated)",
        };
        f.write_str(reason)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Scanned { index: usize, title: String },
    Accepted { index: usize, title: String, open_source: bool },
    Rejected { index: usize, title: String, reason: RejectReason },
    ScanFailed { index: usize, id: String, error: String },
    SourceFailed { error: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept { open_source: bool },
    Reject(RejectReason),
}

/// An accepted record together with its derived open-source flag.
#[derive(Debug, Clone, PartialEq)]
pub struct ScreenedPaper {
    pub paper: PaperRecord,
    pub open_source: bool,
}

#[derive(Debug, Default)]
pub struct FilterReport {
    pub accepted: Vec<ScreenedPaper>,
    pub scanned: usize,
    pub rejected: usize,
    pub source_errors: usize,
    pub cancelled: bool,
}

/// Screens papers one at a time against a [`SearchCriteria`].
///
/// Checks run cheapest first: comment, title, abstract, then the
/// open-source scan, which is the only step that may fetch a PDF.
pub struct FilterPipeline<'a, P> {
    criteria: &'a SearchCriteria,
    comment_filter: String,
    pdf_source: &'a P,
    progress: Option<UnboundedSender<ProgressEvent>>,
    cancel: CancellationToken,
}

impl<'a, P: PdfTextSource> FilterPipeline<'a, P> {
    pub fn new(criteria: &'a SearchCriteria, pdf_source: &'a P) -> Self {
        Self {
            criteria,
            comment_filter: criteria.comment_filter(),
            pdf_source,
            progress: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_progress(mut self, progress: UnboundedSender<ProgressEvent>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Pulls at most `max_results` items from `source`. Cancellation is
    /// checked before each pull; a record already being screened finishes.
    pub async fn run<S>(&self, source: S) -> FilterReport
    where
        S: Stream<Item = anyhow::Result<PaperRecord>>,
    {
        let source = source.take(self.criteria.max_results);
        pin_mut!(source);

        let mut report = FilterReport::default();
        loop {
            if self.cancel.is_cancelled() {
                tracing::warn!("Search cancelled after {} records", report.scanned);
                report.cancelled = true;
                break;
            }
            let Some(item) = source.next().await else {
                break;
            };

            let paper = match item {
                Ok(paper) => paper,
                Err(e) => {
                    report.source_errors += 1;
                    self.emit(ProgressEvent::SourceFailed { error: format!("{:#}", e) });
                    continue;
                }
            };

            report.scanned += 1;
            let index = report.scanned;
            self.emit(ProgressEvent::Scanned { index, title: paper.title.clone() });

            match self.screen(index, &paper).await {
                Verdict::Accept { open_source } => {
                    self.emit(ProgressEvent::Accepted { index, title: paper.title.clone(), open_source });
                    report.accepted.push(ScreenedPaper { paper, open_source });
                }
                Verdict::Reject(reason) => {
                    report.rejected += 1;
                    self.emit(ProgressEvent::Rejected { index, title: paper.title, reason });
                }
            }
        }

        report
    }

    pub async fn screen(&self, index: usize, paper: &PaperRecord) -> Verdict {
        if !self.comment_filter.is_empty() && !paper.comment.to_lowercase().contains(&self.comment_filter) {
            return Verdict::Reject(RejectReason::CommentMismatch);
        }
        if !KeywordMatcher::matches(&paper.title, &self.criteria.title) {
            return Verdict::Reject(RejectReason::TitleKeywords);
        }
        if !KeywordMatcher::matches(&paper.summary, &self.criteria.summary) {
            return Verdict::Reject(RejectReason::AbstractKeywords);
        }

        let mut open_source = OpenSourceDetector::in_metadata(paper);
        if self.criteria.require_open_source && !open_source {
            open_source = self.scan_pdf(index, paper).await;
            if !open_source {
                return Verdict::Reject(RejectReason::NotOpenSource);
            }
        }

        Verdict::Accept { open_source }
    }

    async fn scan_pdf(&self, index: usize, paper: &PaperRecord) -> bool {
        let Some(pdf_url) = paper.pdf_url.as_deref() else {
            tracing::debug!("No PDF link for {}, skipping text scan", paper.id);
            return false;
        };

        match self.pdf_source.fetch_text(pdf_url).await {
            Ok(text) => OpenSourceDetector::is_open_source(paper, Some(&text)),
            Err(e) => {
                self.emit(ProgressEvent::ScanFailed { index, id: paper.id.clone(), error: e.to_string() });
                false
            }
        }
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(progress) = &self.progress {
            // The receiver going away only means nobody is watching
            let _ = progress.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::pdf::ScanError;
    use crate::layers::{KeywordLogic, KeywordSpec};
    use futures_util::stream;
    use std::cell::Cell;
    use std::path::PathBuf;
    use tokio::sync::mpsc;

    struct FakePdf {
        text: Option<&'static str>,
        calls: Cell<usize>,
    }

    impl FakePdf {
        fn with_text(text: &'static str) -> Self {
            Self { text: Some(text), calls: Cell::new(0) }
        }

        fn broken() -> Self {
            Self { text: None, calls: Cell::new(0) }
        }
    }

    impl PdfTextSource for FakePdf {
        async fn fetch_text(&self, _pdf_url: &str) -> Result<String, ScanError> {
            self.calls.set(self.calls.get() + 1);
            self.text
                .map(str::to_string)
                .ok_or_else(|| ScanError::Extract("corrupt xref table".to_string()))
        }
    }

    fn criteria(comment: &str, title: &str, title_logic: KeywordLogic, summary: &str, require_open_source: bool) -> SearchCriteria {
        SearchCriteria {
            max_results: 5,
            comment: comment.to_string(),
            title: KeywordSpec::parse(title, title_logic),
            summary: KeywordSpec::parse(summary, KeywordLogic::Any),
            require_open_source,
            download_pdfs: false,
            output_dir: PathBuf::from("."),
        }
    }

    fn paper(id: &str, title: &str, comment: &str) -> PaperRecord {
        PaperRecord {
            id: format!("http://arxiv.org/abs/{}", id),
            title: title.to_string(),
            summary: "We forecast multivariate time series.".to_string(),
            comment: comment.to_string(),
            pdf_url: Some(format!("http://arxiv.org/pdf/{}", id)),
            links: vec![format!("http://arxiv.org/abs/{}", id)],
            ..Default::default()
        }
    }

    fn source(papers: Vec<PaperRecord>) -> impl Stream<Item = anyhow::Result<PaperRecord>> {
        stream::iter(papers.into_iter().map(Ok))
    }

    fn titles(report: &FilterReport) -> Vec<&str> {
        report.accepted.iter().map(|s| s.paper.title.as_str()).collect()
    }

    #[tokio::test]
    async fn test_conference_and_any_title_keywords() {
        let criteria = criteria("AAAI 2026", "time series, forecasting", KeywordLogic::Any, "", false);
        let pdf = FakePdf::broken();
        let pipeline = FilterPipeline::new(&criteria, &pdf);

        let report = pipeline
            .run(source(vec![
                paper("1", "A Time Series Model", "AAAI 2026"),
                paper("2", "Image Classification", "AAAI 2026"),
            ]))
            .await;

        assert_eq!(titles(&report), vec!["A Time Series Model"]);
        assert_eq!(report.scanned, 2);
        assert_eq!(report.rejected, 1);
        assert!(!report.cancelled);
    }

    #[tokio::test]
    async fn test_all_title_keywords() {
        let criteria = criteria("", "transformer, attention", KeywordLogic::All, "", false);
        let pdf = FakePdf::broken();
        let pipeline = FilterPipeline::new(&criteria, &pdf);

        let report = pipeline
            .run(source(vec![
                paper("1", "Transformer with Attention Mechanisms", ""),
                paper("2", "Transformer Only", ""),
            ]))
            .await;

        assert_eq!(titles(&report), vec!["Transformer with Attention Mechanisms"]);
    }

    #[tokio::test]
    async fn test_empty_comment_filter_uses_local_filters_only() {
        let criteria = criteria("   ", "", KeywordLogic::Any, "time series", false);
        let pdf = FakePdf::broken();
        let pipeline = FilterPipeline::new(&criteria, &pdf);

        let mut unrelated = paper("2", "Vision", "ICML 2025");
        unrelated.summary = "We classify images.".to_string();
        let report = pipeline
            .run(source(vec![paper("1", "Anything", "no venue"), unrelated]))
            .await;

        assert_eq!(titles(&report), vec!["Anything"]);
    }

    #[tokio::test]
    async fn test_comment_match_is_case_insensitive() {
        let criteria = criteria("neurips 2025", "", KeywordLogic::Any, "", false);
        let pdf = FakePdf::broken();
        let pipeline = FilterPipeline::new(&criteria, &pdf);

        let verdict = pipeline.screen(1, &paper("1", "T", "Accepted to NeurIPS 2025 (spotlight)")).await;
        assert_eq!(verdict, Verdict::Accept { open_source: false });
    }

    #[tokio::test]
    async fn test_each_failing_check_flips_accept_to_reject() {
        let criteria = criteria("AAAI 2026", "time series", KeywordLogic::All, "forecast", true);
        let pdf = FakePdf::broken();
        let pipeline = FilterPipeline::new(&criteria, &pdf);

        let base = paper("1", "A Time Series Model", "AAAI 2026, code at github.com/a/b");
        assert_eq!(pipeline.screen(1, &base).await, Verdict::Accept { open_source: true });

        let mut wrong_comment = base.clone();
        wrong_comment.comment = "ICLR 2025, code at github.com/a/b".to_string();
        assert_eq!(pipeline.screen(1, &wrong_comment).await, Verdict::Reject(RejectReason::CommentMismatch));

        let mut wrong_title = base.clone();
        wrong_title.title = "Image Classification".to_string();
        assert_eq!(pipeline.screen(1, &wrong_title).await, Verdict::Reject(RejectReason::TitleKeywords));

        let mut wrong_summary = base.clone();
        wrong_summary.summary = "We classify images.".to_string();
        assert_eq!(pipeline.screen(1, &wrong_summary).await, Verdict::Reject(RejectReason::AbstractKeywords));

        let mut closed = base.clone();
        closed.comment = "AAAI 2026".to_string();
        assert_eq!(pipeline.screen(1, &closed).await, Verdict::Reject(RejectReason::NotOpenSource));
    }

    #[tokio::test]
    async fn test_pdf_text_consulted_only_after_cheap_checks() {
        let criteria = criteria("", "time series", KeywordLogic::Any, "", true);
        let pdf = FakePdf::with_text("Code: https://github.com/lab/model");
        let pipeline = FilterPipeline::new(&criteria, &pdf);

        let report = pipeline
            .run(source(vec![
                paper("1", "Image Classification", ""),
                paper("2", "Time Series Transformers", ""),
            ]))
            .await;

        assert_eq!(pdf.calls.get(), 1);
        assert_eq!(report.accepted.len(), 1);
        assert!(report.accepted[0].open_source);
    }

    #[tokio::test]
    async fn test_metadata_marker_skips_pdf_scan() {
        let criteria = criteria("", "", KeywordLogic::Any, "", true);
        let pdf = FakePdf::with_text("github.com");
        let pipeline = FilterPipeline::new(&criteria, &pdf);

        let mut open = paper("1", "Open", "");
        open.summary = "Code: https://github.com/a/b".to_string();
        let report = pipeline.run(source(vec![open])).await;

        assert_eq!(pdf.calls.get(), 0);
        assert_eq!(report.accepted.len(), 1);
    }

    #[tokio::test]
    async fn test_open_source_flag_recorded_when_not_required() {
        let criteria = criteria("", "", KeywordLogic::Any, "", false);
        let pdf = FakePdf::with_text("github.com");
        let pipeline = FilterPipeline::new(&criteria, &pdf);

        let mut open = paper("1", "Open", "");
        open.links.push("https://github.com/a/b".to_string());
        let report = pipeline.run(source(vec![open, paper("2", "Closed", "")])).await;

        assert_eq!(pdf.calls.get(), 0);
        let flags: Vec<_> = report.accepted.iter().map(|s| s.open_source).collect();
        assert_eq!(flags, vec![true, false]);
    }

    #[tokio::test]
    async fn test_pdf_failure_rejects_record_and_continues() {
        let criteria = criteria("", "", KeywordLogic::Any, "", true);
        let pdf = FakePdf::broken();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let pipeline = FilterPipeline::new(&criteria, &pdf).with_progress(tx);

        let mut open = paper("2", "Open", "");
        open.comment = "github.com/a/b".to_string();
        let report = pipeline.run(source(vec![paper("1", "Closed", ""), open])).await;
        drop(pipeline);

        assert_eq!(report.scanned, 2);
        assert_eq!(titles(&report), vec!["Open"]);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert!(events.iter().any(|e| matches!(e, ProgressEvent::ScanFailed { index: 1, .. })));
        assert!(events.contains(&ProgressEvent::Rejected {
            index: 1,
            title: "Closed".to_string(),
            reason: RejectReason::NotOpenSource,
        }));
    }

    #[tokio::test]
    async fn test_max_results_bounds_records_scanned() {
        let criteria = criteria("", "nothing matches this", KeywordLogic::Any, "", false);
        let pdf = FakePdf::broken();
        let pipeline = FilterPipeline::new(&criteria, &pdf);

        let papers = (0..20).map(|i| paper(&i.to_string(), "Other", "")).collect();
        let report = pipeline.run(source(papers)).await;

        assert_eq!(report.scanned, 5);
        assert_eq!(report.rejected, 5);
        assert!(report.accepted.is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_checked_between_records() {
        let criteria = criteria("", "", KeywordLogic::Any, "", false);
        let pdf = FakePdf::broken();
        let cancel = CancellationToken::new();
        let pipeline = FilterPipeline::new(&criteria, &pdf).with_cancellation(cancel.clone());

        let papers: Vec<_> = (0..4).map(|i| paper(&i.to_string(), "Any", "")).collect();
        let stop = cancel.clone();
        let mut pulled = 0;
        let source = source(papers).inspect(move |_| {
            pulled += 1;
            if pulled == 2 {
                stop.cancel();
            }
        });
        let report = pipeline.run(source).await;

        assert!(report.cancelled);
        assert_eq!(report.scanned, 2);
        assert_eq!(report.accepted.len(), 2);
    }

    #[tokio::test]
    async fn test_source_error_is_counted_and_skipped() {
        let criteria = criteria("", "", KeywordLogic::Any, "", false);
        let pdf = FakePdf::broken();
        let pipeline = FilterPipeline::new(&criteria, &pdf);

        let items = vec![
            Ok(paper("1", "First", "")),
            Err(anyhow::anyhow!("arXiv API error: 503 Service Unavailable")),
            Ok(paper("2", "Second", "")),
        ];
        let report = pipeline.run(stream::iter(items)).await;

        assert_eq!(report.source_errors, 1);
        assert_eq!(report.scanned, 2);
        assert_eq!(titles(&report), vec!["First", "Second"]);
    }

    #[tokio::test]
    async fn test_failures_reported_once_through_progress() {
        let criteria = criteria("", "", KeywordLogic::Any, "", true);
        let pdf = FakePdf::broken();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let pipeline = FilterPipeline::new(&criteria, &pdf).with_progress(tx);

        let items = vec![
            Ok(paper("1", "Closed", "")),
            Err(anyhow::anyhow!("arXiv API error: 429 Too Many Requests")),
        ];
        pipeline.run(stream::iter(items)).await;
        drop(pipeline);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        let scan_failures = events.iter().filter(|e| matches!(e, ProgressEvent::ScanFailed { .. })).count();
        let source_failures: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::SourceFailed { error } => Some(error.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(scan_failures, 1);
        assert_eq!(source_failures, vec!["arXiv API error: 429 Too Many Requests"]);
    }
}
