use backoff::ExponentialBackoff;
use log::{info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use std::panic;

use crate::config::Config;
use crate::error::CiphrError;
use crate::http::{build_client, retry_policy, send_with_retry};
use crate::paper::PaperRecord;

static REFERENCES_HEADING_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?mi)^[ \t]*(?:\d+\.?[ \t]*|[IVX]+\.[ \t]*)?(?:references|bibliography)[ \t]*$")
        .expect("Invalid references heading regex pattern")
});
static CONCLUSIONS_HEADING_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?mi)^[ \t]*(?:\d+\.?[ \t]*|[IVX]+\.[ \t]*)?(?:conclusions?|summary and conclusions?)\b[^\n]{0,60}$")
        .expect("Invalid conclusions heading regex pattern")
});

/// Turns a paper into plain text from its PDF.
pub trait ContentExtractor {
    fn pdf_text(&self, paper: &PaperRecord) -> Result<String, CiphrError>;
}

/// Downloads the PDF over HTTP and extracts its text in memory.
pub struct PdfExtractor {
    client: Client,
    policy: ExponentialBackoff,
}

impl PdfExtractor {
    pub fn new(config: &Config) -> Result<Self, CiphrError> {
        Ok(Self {
            client: build_client(config)?,
            policy: retry_policy(config),
        })
    }
}

impl ContentExtractor for PdfExtractor {
    fn pdf_text(&self, paper: &PaperRecord) -> Result<String, CiphrError> {
        let url = paper.pdf_link();
        info!("Downloading PDF for {} from {}", paper.id, url);
        let response = send_with_retry(self.policy.clone(), "arXiv PDF download", || self.client.get(&url))?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_lowercase);
        let bytes = response.bytes()?.to_vec();
        if bytes.is_empty() {
            return Err(CiphrError::PdfError(format!("empty PDF body for {}", paper.id)));
        }
        if content_type.as_deref().is_some_and(|ct| ct.contains("text/html")) || !bytes.starts_with(b"%PDF") {
            return Err(CiphrError::PdfError(format!(
                "got {} instead of a PDF for {}",
                content_type.unwrap_or_else(|| "unknown content".to_string()),
                paper.id
            )));
        }

        // The PDF parser panics on some malformed documents
        let text = panic::catch_unwind(|| pdf_extract::extract_text_from_mem(&bytes))
            .map_err(|_| CiphrError::PdfError(format!("PDF parser panicked on {}", paper.id)))?
            .map_err(|e| CiphrError::PdfError(e.to_string()))?;
        info!("Extracted {} characters of text for {}", text.chars().count(), paper.id);
        Ok(text)
    }
}

/// Fetch and prepare PDF text for a paper. Extraction failures are not fatal:
/// the paper is returned without text and analysed from its abstract.
pub fn attach_content<E: ContentExtractor + ?Sized>(
    paper: PaperRecord,
    extractor: &E,
    config: &Config,
) -> (PaperRecord, bool) {
    match extractor.pdf_text(&paper) {
        Ok(text) if !text.trim().is_empty() => {
            let prepared = prepare_text(&text, config);
            (paper.with_full_text(prepared), true)
        }
        Ok(_) => {
            warn!("PDF for {} contained no text, using abstract only", paper.title);
            (paper, false)
        }
        Err(e) => {
            warn!("Could not extract PDF for {} ({}), using abstract only", paper.title, e);
            (paper, false)
        }
    }
}

/// Clean, optionally strip the bibliography, and truncate PDF text.
pub fn prepare_text(text: &str, config: &Config) -> String {
    let cleaned = clean_pdf_text(text);
    let body = if config.strip_references {
        strip_references(&cleaned)
    } else {
        cleaned.as_str()
    };
    truncate_content(body, config.max_content_length, config.max_conclusions_length)
}

/// Drop page-number lines and re-join words hyphenated across line breaks.
pub fn clean_pdf_text(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut hyphenated = false;
    for line in text.lines() {
        let trimmed = line.trim();
        if !trimmed.is_empty() && trimmed.len() < 5 && trimmed.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        if !hyphenated && !result.is_empty() {
            result.push('\n');
        }
        match trimmed.strip_suffix('-') {
            Some(head) if head.chars().last().is_some_and(char::is_alphabetic) => {
                result.push_str(head);
                hyphenated = true;
            }
            _ => {
                result.push_str(trimmed);
                hyphenated = false;
            }
        }
    }
    result
}

/// Cut the text at the last references heading in its second half.
pub fn strip_references(text: &str) -> &str {
    let half = text.len() / 2;
    match REFERENCES_HEADING_REGEX
        .find_iter(text)
        .filter(|m| m.start() >= half)
        .last()
    {
        Some(m) => {
            info!("Stripped {} characters of references", text.len() - m.start());
            text[..m.start()].trim_end()
        }
        None => text,
    }
}

/// Keep at most `max_chars` characters. When the cut drops the conclusions,
/// append up to `max_conclusions` characters of that section.
pub fn truncate_content(text: &str, max_chars: usize, max_conclusions: usize) -> String {
    let cut = match text.char_indices().nth(max_chars) {
        Some((idx, _)) => idx,
        None => return text.to_string(),
    };

    let mut result = text[..cut].to_string();
    let conclusions = CONCLUSIONS_HEADING_REGEX
        .find_iter(text)
        .filter(|m| m.start() >= cut)
        .last();
    if let Some(m) = conclusions {
        let section: String = text[m.start()..].chars().take(max_conclusions).collect();
        result.push_str("\n\n[...]\n\n");
        result.push_str(section.trim());
    }
    info!(
        "Truncated content from {} to {} characters",
        text.chars().count(),
        result.chars().count()
    );
    result
}
