use backoff::ExponentialBackoff;
use feed_rs::model::Entry;
use feed_rs::parser;
use log::{debug, info, warn};
use reqwest::blocking::Client;

use crate::config::Config;
use crate::error::CiphrError;
use crate::http::{build_client, retry_policy, send_with_retry};
use crate::paper::PaperRecord;
use crate::reconcile::PaperSource;

/// Build an arXiv `search_query` matching any of the given categories.
pub fn build_query(tags: &[String]) -> String {
    tags.iter()
        .map(|tag| format!("cat:{}", tag.trim()))
        .collect::<Vec<_>>()
        .join(" OR ")
}

/// Client for the arXiv Atom API.
pub struct ArxivClient {
    client: Client,
    base_url: String,
    policy: ExponentialBackoff,
}

impl ArxivClient {
    pub fn new(config: &Config) -> Result<Self, CiphrError> {
        Ok(Self {
            client: build_client(config)?,
            base_url: config.arxiv_base_url.trim_end_matches('/').to_string(),
            policy: retry_policy(config),
        })
    }

    /// Run a raw query, newest submissions first.
    pub fn search(&self, query: &str, max_results: usize) -> Result<Vec<PaperRecord>, CiphrError> {
        info!("Searching arXiv for query: {} with max_results: {}", query, max_results);
        let url = format!("{}/api/query", self.base_url);
        let max_results = max_results.to_string();

        let response = send_with_retry(self.policy.clone(), "arXiv API", || {
            self.client.get(&url).query(&[
                ("search_query", query),
                ("start", "0"),
                ("max_results", max_results.as_str()),
                ("sortBy", "submittedDate"),
                ("sortOrder", "descending"),
            ])
        })?;
        let body = response.bytes()?;
        let papers = parse_feed(&body)?;

        info!("Found {} results for query: {}", papers.len(), query);
        for (i, paper) in papers.iter().take(3).enumerate() {
            debug!("Paper {}: {} (submitted: {})", i + 1, paper.id, paper.published.format("%Y-%m-%d"));
        }
        Ok(papers)
    }
}

impl PaperSource for ArxivClient {
    fn fetch(&self, tags: &[String], batch_size: usize) -> Result<Vec<PaperRecord>, CiphrError> {
        if tags.is_empty() {
            return Err(CiphrError::NoTagsProvided);
        }
        self.search(&build_query(tags), batch_size)
    }
}

/// Parse an arXiv Atom response. Entries that cannot be turned into a
/// paper are logged and skipped.
pub fn parse_feed(body: &[u8]) -> Result<Vec<PaperRecord>, CiphrError> {
    let feed = parser::parse(body).map_err(|e| CiphrError::FeedError(e.to_string()))?;
    Ok(feed.entries.iter().filter_map(parse_entry).collect())
}

fn parse_entry(entry: &Entry) -> Option<PaperRecord> {
    let url = entry.id.trim();
    if !url.contains("/abs/") {
        warn!("Skipping feed entry without an arXiv abstract URL: {}", url);
        return None;
    }

    let title = entry
        .title
        .as_ref()
        .map(|t| t.content.split_whitespace().collect::<Vec<_>>().join(" "))
        .unwrap_or_default();
    if title.is_empty() {
        warn!("Skipping arXiv entry {} with no title", url);
        return None;
    }

    let published = match entry.published.or(entry.updated) {
        Some(date) => date,
        None => {
            warn!("Skipping arXiv entry {} with no publish date", url);
            return None;
        }
    };

    let abstract_text = entry
        .summary
        .as_ref()
        .map(|s| s.content.trim().to_string())
        .unwrap_or_default();

    let mut paper = PaperRecord::new(title, url, abstract_text, published)
        .with_authors(entry.authors.iter().map(|a| a.name.trim().to_string()))
        .with_categories(entry.categories.iter().map(|c| c.term.clone()))
        .with_updated(entry.updated);

    let pdf_link = entry.links.iter().find(|link| {
        link.media_type.as_deref() == Some("application/pdf") || link.title.as_deref() == Some("pdf")
    });
    if let Some(link) = pdf_link {
        paper = paper.with_pdf_url(link.href.clone());
    }
    Some(paper)
}
