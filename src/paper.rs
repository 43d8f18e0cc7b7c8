use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static VERSION_SUFFIX_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"v\d+$").expect("Invalid version suffix regex pattern")
});

/// Derive the canonical paper identifier from an arXiv URL.
///
/// `http://arxiv.org/abs/2401.01234v2` becomes `2401.01234` and
/// `https://arxiv.org/pdf/hep-ph/0101001v1.pdf` becomes `hep-ph/0101001`.
/// Anything that does not look like an arXiv URL is returned trimmed.
pub fn paper_id_from_url(url: &str) -> String {
    let url = url.trim();
    let tail = ["/abs/", "/pdf/"]
        .iter()
        .find_map(|marker| url.split_once(marker).map(|(_, rest)| rest))
        .unwrap_or(url);
    let tail = tail.trim_end_matches('/');
    let tail = tail.strip_suffix(".pdf").unwrap_or(tail);
    VERSION_SUFFIX_REGEX.replace(tail, "").into_owned()
}

/// Normalise a title for duplicate detection: whitespace collapsed, lower-cased.
pub fn normalize_title(title: &str) -> String {
    title.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// One scraped paper. Built once by the fetcher; the content extractor returns
/// a new record carrying the PDF text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperRecord {
    pub id: String,
    pub title: String,
    #[serde(rename = "arxiv_url")]
    pub url: String,
    #[serde(default)]
    pub pdf_url: Option<String>,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    #[serde(default)]
    pub full_text: String,
    #[serde(default)]
    pub authors: Vec<String>,
    pub published: DateTime<Utc>,
    #[serde(default)]
    pub updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub categories: Vec<String>,
}

impl PaperRecord {
    pub fn new(
        title: impl Into<String>,
        url: impl Into<String>,
        abstract_text: impl Into<String>,
        published: DateTime<Utc>,
    ) -> Self {
        let url = url.into();
        Self {
            id: paper_id_from_url(&url),
            title: title.into(),
            url,
            pdf_url: None,
            abstract_text: abstract_text.into(),
            full_text: String::new(),
            authors: Vec::new(),
            published,
            updated: None,
            categories: Vec::new(),
        }
    }

    pub fn with_authors<I, S>(mut self, authors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.authors = authors.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_categories<I, S>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = Vec::new();
        for category in categories.into_iter().map(Into::into) {
            if !seen.contains(&category) {
                seen.push(category);
            }
        }
        self.categories = seen;
        self
    }

    pub fn with_pdf_url(mut self, pdf_url: impl Into<String>) -> Self {
        self.pdf_url = Some(pdf_url.into());
        self
    }

    pub fn with_updated(mut self, updated: Option<DateTime<Utc>>) -> Self {
        self.updated = updated;
        self
    }

    /// Attach extracted (and already trimmed) PDF text.
    pub fn with_full_text(mut self, text: impl Into<String>) -> Self {
        self.full_text = text.into();
        self
    }

    /// URL the PDF is downloaded from. Falls back to the arXiv PDF endpoint
    /// for the canonical identifier.
    pub fn pdf_link(&self) -> String {
        match &self.pdf_url {
            Some(url) => url.clone(),
            None => format!("https://arxiv.org/pdf/{}", self.id),
        }
    }

    pub fn normalized_title(&self) -> String {
        normalize_title(&self.title)
    }

    /// Text handed to the LLM: title and abstract in full, then whatever PDF
    /// text survived extraction.
    pub fn combined_content(&self) -> String {
        let mut content = format!(
            "Title: {}\n\nAbstract Content:\n{}\n\n",
            self.title, self.abstract_text
        );
        if self.full_text.trim().is_empty() {
            content.push_str("PDF Content:\n(not available, analysis based on abstract only)");
        } else {
            content.push_str("PDF Content:\n");
            content.push_str(&self.full_text);
        }
        content
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paper_id_from_url() {
        assert_eq!(paper_id_from_url("http://arxiv.org/abs/2401.01234v2"), "2401.01234");
        assert_eq!(paper_id_from_url("https://arxiv.org/abs/2401.01234"), "2401.01234");
        assert_eq!(paper_id_from_url("https://arxiv.org/pdf/2401.01234v1.pdf"), "2401.01234");
        assert_eq!(paper_id_from_url("http://arxiv.org/abs/hep-ph/0101001v1"), "hep-ph/0101001");
        assert_eq!(paper_id_from_url(" custom-id "), "custom-id");
    }

    #[test]
    fn test_normalize_title() {
        assert_eq!(normalize_title("  Dark   Matter\n Halos "), "dark matter halos");
    }
}
