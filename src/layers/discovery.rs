use anyhow::{Context, Result, anyhow};
use chrono::DateTime;
use futures_util::stream::{self, Stream};
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use reqwest::{Client, StatusCode};
use std::collections::{HashSet, VecDeque};
use std::time::Duration;
use thiserror::Error;
use crate::layers::PaperRecord;

use governor::{Quota, RateLimiter};
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, direct::NotKeyed};
use nonzero_ext::nonzero;
use std::sync::Arc;

pub const ARXIV_API_URL: &str = "http://export.arxiv.org/api/query";

/// Used when no comment filter is given; everything is then filtered locally.
pub const BROAD_QUERY: &str = "all:time";

const DEFAULT_PAGE_SIZE: usize = 100;
// arXiv asks API clients for no more than one request every three seconds.
const DEFAULT_REQUEST_INTERVAL: Duration = Duration::from_secs(3);

pub fn build_query(comment: &str) -> String {
    let comment = comment.trim();
    if comment.is_empty() {
        BROAD_QUERY.to_string()
    } else {
        format!("co:\"{}\"", comment)
    }
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("arXiv API error: {0}")]
    Status(StatusCode),
}

impl DiscoveryError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::Status(s) if *s == StatusCode::FORBIDDEN || *s == StatusCode::TOO_MANY_REQUESTS)
    }
}

#[derive(Debug, Default)]
pub struct FeedPage {
    pub total_results: Option<usize>,
    pub entries: Vec<PaperRecord>,
}

pub struct ArxivClient {
    client: Client,
    base_url: String,
    page_size: usize,
    limiter: Option<Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>>,
}

struct Cursor {
    query: String,
    start: usize,
    remaining: usize,
    buffered: VecDeque<PaperRecord>,
    seen: HashSet<String>,
    exhausted: bool,
}

impl ArxivClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Self::with_paging(base_url, DEFAULT_PAGE_SIZE, DEFAULT_REQUEST_INTERVAL)
    }

    /// A zero `request_interval` disables rate limiting.
    pub fn with_paging(base_url: impl Into<String>, page_size: usize, request_interval: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(60))
            .build()
            .context("Failed to build HTTP client")?;

        let limiter = Quota::with_period(request_interval)
            .map(|quota| Arc::new(RateLimiter::direct(quota.allow_burst(nonzero!(1u32)))));

        Ok(Self {
            client,
            base_url: base_url.into(),
            page_size: page_size.max(1),
            limiter,
        })
    }

    pub async fn fetch_page(&self, query: &str, start: usize, max_results: usize) -> Result<FeedPage> {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }

        let url = format!(
            "{}?search_query={}&start={}&max_results={}&sortBy=submittedDate&sortOrder=descending",
            self.base_url,
            urlencoding::encode(query),
            start,
            max_results
        );
        tracing::info!("Querying arXiv: {}", url);

        let resp = self.client.get(&url).send().await
            .with_context(|| format!("Request failed: {}", url))?;
        if !resp.status().is_success() {
            return Err(DiscoveryError::Status(resp.status()).into());
        }
        let text = resp.text().await?;
        parse_feed(&text)
    }

    /// Lazily pages through the results of `query`, yielding at most
    /// `max_results` distinct papers. A failed page is yielded once as an
    /// error and ends the stream.
    pub fn search<'a>(&'a self, query: &str, max_results: usize) -> impl Stream<Item = Result<PaperRecord>> + 'a {
        let cursor = Cursor {
            query: query.to_string(),
            start: 0,
            remaining: max_results,
            buffered: VecDeque::new(),
            seen: HashSet::new(),
            exhausted: false,
        };

        stream::unfold(cursor, move |mut cursor| async move {
            loop {
                if cursor.remaining == 0 {
                    return None;
                }
                if let Some(paper) = cursor.buffered.pop_front() {
                    // Offsets shift when new submissions land mid-run
                    if !cursor.seen.insert(paper.id.clone()) {
                        tracing::debug!("Skipping repeated entry {}", paper.id);
                        continue;
                    }
                    cursor.remaining -= 1;
                    return Some((Ok(paper), cursor));
                }
                if cursor.exhausted {
                    return None;
                }

                let size = self.page_size.min(cursor.remaining);
                match self.fetch_page(&cursor.query, cursor.start, size).await {
                    Ok(page) => {
                        tracing::debug!(
                            "Page at {} returned {} entries (total {:?})",
                            cursor.start,
                            page.entries.len(),
                            page.total_results
                        );
                        if page.entries.is_empty() {
                            cursor.exhausted = true;
                            continue;
                        }
                        cursor.start += page.entries.len();
                        if page.total_results.is_some_and(|total| cursor.start >= total) {
                            cursor.exhausted = true;
                        }
                        cursor.buffered.extend(page.entries);
                    }
                    Err(e) => {
                        cursor.exhausted = true;
                        return Some((Err(e), cursor));
                    }
                }
            }
        })
    }

    /// Fetches a single result for the broad query to see whether arXiv is
    /// reachable.
    pub async fn check(&self) -> Result<Option<PaperRecord>> {
        let page = self.fetch_page(BROAD_QUERY, 0, 1).await?;
        Ok(page.entries.into_iter().next())
    }
}

pub fn parse_feed(xml: &str) -> Result<FeedPage> {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();

    let mut page = FeedPage::default();
    let mut current: Option<PaperRecord> = None;
    let mut text = String::new();
    let mut in_author = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                text.clear();
                match e.name().as_ref() {
                    b"entry" => current = Some(PaperRecord::default()),
                    b"author" => in_author = true,
                    // 'link' with content (rare for Atom)
                    b"link" => {
                        if let Some(paper) = current.as_mut() {
                            push_link(paper, &e);
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Empty(e)) => {
                if let Some(paper) = current.as_mut() {
                    match e.name().as_ref() {
                        b"link" => push_link(paper, &e),
                        b"category" => {
                            if let Some(term) = attribute(&e, b"term") {
                                paper.categories.push(term);
                            }
                        }
                        _ => {}
                    }
                }
            }
            Ok(Event::Text(e)) => text.push_str(&String::from_utf8_lossy(&e.into_inner())),
            Ok(Event::CData(e)) => text.push_str(&String::from_utf8_lossy(&e.into_inner())),
            Ok(Event::GeneralRef(e)) => push_reference(&mut text, &String::from_utf8_lossy(&e)),
            Ok(Event::End(e)) => {
                let value = collapse_whitespace(&text);
                text.clear();
                match e.name().as_ref() {
                    b"entry" => {
                        if let Some(paper) = current.take() {
                            tracing::debug!("Parsed arXiv entry: Title='{}', ID='{}', Links={}", paper.title, paper.id, paper.links.len());
                            page.entries.push(paper);
                        }
                    }
                    b"author" => in_author = false,
                    b"opensearch:totalResults" => page.total_results = value.parse().ok(),
                    name => {
                        if let Some(paper) = current.as_mut() {
                            assign_field(paper, name, value, in_author);
                        }
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(anyhow!("XML parsing error at position {}: {:?}", reader.buffer_position(), e));
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(page)
}

fn assign_field(paper: &mut PaperRecord, name: &[u8], value: String, in_author: bool) {
    match name {
        b"id" => paper.id = value,
        b"title" => paper.title = value,
        b"summary" => paper.summary = value,
        b"arxiv:comment" => paper.comment = value,
        b"name" if in_author => paper.authors.push(value),
        b"published" => paper.published = DateTime::parse_from_rfc3339(&value).ok(),
        b"updated" => paper.updated = DateTime::parse_from_rfc3339(&value).ok(),
        _ => {}
    }
}

fn push_link(paper: &mut PaperRecord, e: &BytesStart) {
    let Some(href) = attribute(e, b"href") else {
        return;
    };
    let is_pdf = attribute(e, b"title").as_deref() == Some("pdf")
        || attribute(e, b"type").as_deref() == Some("application/pdf");
    if is_pdf && paper.pdf_url.is_none() {
        paper.pdf_url = Some(href.clone());
    }
    paper.links.push(href);
}

fn attribute(e: &BytesStart, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|attr| attr.key.as_ref() == key)
        .map(|attr| String::from_utf8_lossy(&attr.value).into_owned())
}

fn push_reference(text: &mut String, name: &str) {
    let resolved = match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        _ => name
            .strip_prefix("#x")
            .or_else(|| name.strip_prefix("#X"))
            .and_then(|hex| u32::from_str_radix(hex, 16).ok())
            .or_else(|| name.strip_prefix('#').and_then(|dec| dec.parse().ok()))
            .and_then(char::from_u32),
    };
    match resolved {
        Some(c) => text.push(c),
        None => {
            text.push('&');
            text.push_str(name);
            text.push(';');
        }
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
