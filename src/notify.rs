use backoff::ExponentialBackoff;
use log::{info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::blocking::Client;
use serde_json::json;

use crate::config::Config;
use crate::error::CiphrError;
use crate::http::{build_client, retry_policy, send_with_retry};
use crate::paper::PaperRecord;

const BOT_USERNAME: &str = "CIPhR Bot";
const BOT_ICON: &str = ":robot_face:";
const MAX_TITLE_CHARS: usize = 60;
const MAX_SUMMARY_CHARS: usize = 100;

static NEGATIVE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:no|not found|n/a|does not use|does not mention|no machine learning)\b")
        .expect("Invalid negative indicator regex pattern")
});
static POSITIVE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:yes|neural networks?|deep learning|machine learning|artificial intelligence|classification|regression|clustering|random forests?|support vector|gradient boost(?:ing|ed)|convolutional|transformers?|autoencoders?|graph neural|decision trees?)\b",
    )
    .expect("Invalid positive indicator regex pattern")
});
const SUMMARY_DELIMITERS: [&str; 4] = [". The main ML techniques", ": ", ". Techniques", ". Methods"];

/// Whether a flag-question answer is positive. Negative wording wins.
pub fn indicates_flag(answer: &str) -> bool {
    let answer = answer.trim();
    if answer.is_empty() || NEGATIVE_REGEX.is_match(answer) {
        return false;
    }
    POSITIVE_REGEX.is_match(answer)
}

/// A paper whose flag question came back positive.
#[derive(Debug, Clone, PartialEq)]
pub struct FlaggedPaper {
    pub title: String,
    pub url: String,
    pub answer: String,
}

impl FlaggedPaper {
    pub fn new(paper: &PaperRecord, answer: impl Into<String>) -> Self {
        Self {
            title: paper.title.clone(),
            url: paper.url.clone(),
            answer: answer.into(),
        }
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

/// Reduce a verbose answer to the part listing the techniques.
pub fn summarize_answer(answer: &str) -> String {
    let answer = answer.trim();
    let lower = answer.to_lowercase();
    if lower.starts_with("yes") || lower.starts_with("this paper") {
        for delimiter in SUMMARY_DELIMITERS {
            if let Some((_, rest)) = answer.split_once(delimiter) {
                return truncate_chars(rest.trim(), MAX_SUMMARY_CHARS);
            }
        }
    }
    truncate_chars(answer, MAX_SUMMARY_CHARS)
}

/// Markdown digest of flagged papers.
pub fn format_digest(papers: &[FlaggedPaper], repo_link: Option<&str>) -> String {
    let count = papers.len();
    let mut message = format!(
        "🚀 🤖 New ML4DM papers on arXiv today! Found {} paper{} using ML techniques for dark matter searches.\n\n",
        count,
        if count == 1 { "" } else { "s" }
    );
    message.push_str("| Paper Title | arXiv Link | ML Techniques |\n|---|---|---|\n");
    for paper in papers {
        message.push_str(&format!(
            "| {} | [Link]({}) | {} |\n",
            truncate_chars(&paper.title, MAX_TITLE_CHARS).replace('|', "\\|"),
            paper.url,
            summarize_answer(&paper.answer).replace('|', "\\|").replace('\n', " ")
        ));
    }
    if let Some(link) = repo_link {
        message.push_str(&format!("\n📊 [View full analysis table here]({})", link));
    }
    message
}

/// Destination for run results.
pub trait DigestSink {
    fn name(&self) -> &str;
    fn publish(&self, flagged: &[FlaggedPaper], table_markdown: &str) -> Result<(), CiphrError>;
}

/// Posts the flagged-paper digest to a Mattermost-style incoming webhook.
pub struct WebhookNotifier {
    client: Client,
    policy: ExponentialBackoff,
    url: String,
    repo_link: Option<String>,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, config: &Config) -> Result<Self, CiphrError> {
        Ok(Self {
            client: build_client(config)?,
            policy: retry_policy(config),
            url: url.into(),
            repo_link: config.repo_link.clone(),
        })
    }
}

impl DigestSink for WebhookNotifier {
    fn name(&self) -> &str {
        "webhook"
    }

    fn publish(&self, flagged: &[FlaggedPaper], _table_markdown: &str) -> Result<(), CiphrError> {
        if flagged.is_empty() {
            info!("No flagged papers found, skipping webhook post");
            return Ok(());
        }
        let payload = json!({
            "text": format_digest(flagged, self.repo_link.as_deref()),
            "username": BOT_USERNAME,
            "icon_emoji": BOT_ICON,
        });
        send_with_retry(self.policy.clone(), "webhook", || self.client.post(&self.url).json(&payload))?;
        info!("Posted {} flagged papers to webhook", flagged.len());
        Ok(())
    }
}

/// Publishes the full table to a CMS endpoint with a bearer token.
pub struct CmsPublisher {
    client: Client,
    policy: ExponentialBackoff,
    url: String,
    token: String,
}

impl CmsPublisher {
    pub fn new(url: impl Into<String>, token: impl Into<String>, config: &Config) -> Result<Self, CiphrError> {
        Ok(Self {
            client: build_client(config)?,
            policy: retry_policy(config),
            url: url.into(),
            token: token.into(),
        })
    }
}

impl DigestSink for CmsPublisher {
    fn name(&self) -> &str {
        "cms"
    }

    fn publish(&self, _flagged: &[FlaggedPaper], table_markdown: &str) -> Result<(), CiphrError> {
        let payload = json!({
            "title": "arXiv research insights",
            "content": table_markdown,
        });
        send_with_retry(self.policy.clone(), "CMS", || {
            self.client.post(&self.url).bearer_auth(&self.token).json(&payload)
        })?;
        info!("Published table to CMS");
        Ok(())
    }
}

/// Sinks configured for this run.
pub fn configured_sinks(config: &Config) -> Result<Vec<Box<dyn DigestSink>>, CiphrError> {
    let mut sinks: Vec<Box<dyn DigestSink>> = Vec::new();
    if let Some(url) = &config.webhook_url {
        sinks.push(Box::new(WebhookNotifier::new(url.clone(), config)?));
    }
    match (&config.cms_url, &config.cms_token) {
        (Some(url), Some(token)) => sinks.push(Box::new(CmsPublisher::new(url.clone(), token.clone(), config)?)),
        (Some(_), None) => warn!("CMS_URL is set without CMS_TOKEN, skipping CMS publishing"),
        _ => {}
    }
    Ok(sinks)
}

/// Publish to every sink. Failures are logged and returned as warnings.
pub fn publish_all(sinks: &[Box<dyn DigestSink>], flagged: &[FlaggedPaper], table_markdown: &str) -> Vec<String> {
    let mut warnings = Vec::new();
    for sink in sinks {
        if let Err(e) = sink.publish(flagged, table_markdown) {
            let warning = format!("{} notification failed: {}", sink.name(), e);
            warn!("{}", warning);
            warnings.push(warning);
        }
    }
    warnings
}
