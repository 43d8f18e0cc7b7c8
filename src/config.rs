use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::CiphrError;
use crate::reconcile::QuestionSet;

pub const DEFAULT_TAGS: &str = "hep-ph";
pub const DEFAULT_MAX_RESULTS: usize = 5;
pub const DEFAULT_MAX_EXPANSION_RESULTS: usize = 25;
pub const DEFAULT_EXPANSION_FACTOR: usize = 3;
pub const DEFAULT_MAX_CONTENT_LENGTH: usize = 50_000;
pub const DEFAULT_MAX_CONCLUSIONS_LENGTH: usize = 3_000;
pub const DEFAULT_OUTPUT_FILENAME: &str = "research_insights.md";

pub const PAPERS_DATA_FILE: &str = "papers_data.json";
pub const ANALYSIS_PROMPTS_FILE: &str = "analysis_prompts.json";
pub const DEFAULT_LLM_RESULTS_FILE: &str = "llm_results.txt";

const DEFAULT_QUESTIONS: [&str; 3] = [
    "What is the main physics phenomenon studied by this paper",
    "Is this work related to dark matter searches? If yes, how?",
    "Does this paper present experimental results? If yes, what is the name of the experimental apparatus?",
];

const DEFAULT_FLAG_QUESTION: &str = "Does this paper use ML techniques for dark matter searches? And if yes, list the main ML techniques used in this paper";

/// Everything a run needs, resolved once at startup and passed by reference
/// into each component.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub tags: Vec<String>,
    pub max_results: usize,
    pub max_expansion_results: usize,
    pub expansion_factor: usize,
    pub questions: Vec<String>,
    /// Extra question asked during analysis but kept out of the table; a
    /// positive answer marks the paper for notification.
    pub flag_question: Option<String>,
    pub output_dir: PathBuf,
    pub output_filename: String,
    pub max_content_length: usize,
    pub max_conclusions_length: usize,
    pub strip_references: bool,
    pub arxiv_base_url: String,
    pub gemini_base_url: String,
    pub gemini_model: String,
    #[serde(skip_serializing)]
    pub gemini_api_key: Option<String>,
    pub webhook_url: Option<String>,
    pub cms_url: Option<String>,
    #[serde(skip_serializing)]
    pub cms_token: Option<String>,
    /// Link to the published table, used in notification footers.
    pub repo_link: Option<String>,
    pub request_timeout_secs: u64,
    pub retry_max_elapsed_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tags: vec![DEFAULT_TAGS.to_string()],
            max_results: DEFAULT_MAX_RESULTS,
            max_expansion_results: DEFAULT_MAX_EXPANSION_RESULTS,
            expansion_factor: DEFAULT_EXPANSION_FACTOR,
            questions: DEFAULT_QUESTIONS.iter().map(|q| q.to_string()).collect(),
            flag_question: Some(DEFAULT_FLAG_QUESTION.to_string()),
            output_dir: PathBuf::from("output"),
            output_filename: DEFAULT_OUTPUT_FILENAME.to_string(),
            max_content_length: DEFAULT_MAX_CONTENT_LENGTH,
            max_conclusions_length: DEFAULT_MAX_CONCLUSIONS_LENGTH,
            strip_references: true,
            arxiv_base_url: "https://export.arxiv.org".to_string(),
            gemini_base_url: "https://generativelanguage.googleapis.com".to_string(),
            gemini_model: "gemini-1.5-flash".to_string(),
            gemini_api_key: None,
            webhook_url: None,
            cms_url: None,
            cms_token: None,
            repo_link: None,
            request_timeout_secs: 60,
            retry_max_elapsed_secs: 30,
        }
    }
}

impl Config {
    /// Load a JSON config file. Missing keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, CiphrError> {
        let content = fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Overlay values taken from environment variables.
    pub fn apply_env(&mut self) {
        let read = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());

        if let Some(key) = read("GEMINI_API_KEY") {
            self.gemini_api_key = Some(key);
        }
        if let Some(model) = read("GEMINI_MODEL") {
            self.gemini_model = model;
        }
        if let Some(url) = read("GEMINI_BASE_URL") {
            self.gemini_base_url = url;
        }
        if let Some(url) = read("ARXIV_BASE_URL") {
            self.arxiv_base_url = url;
        }
        if let Some(url) = read("MM_WEBHOOK_URL") {
            self.webhook_url = Some(url);
        }
        if let Some(url) = read("CMS_URL") {
            self.cms_url = Some(url);
        }
        if let Some(token) = read("CMS_TOKEN") {
            self.cms_token = Some(token);
        }
        if let Some(link) = read("REPO_LINK") {
            self.repo_link = Some(link);
        }
        if let Some(secs) = read("API_TIMEOUT_SECS").and_then(|s| s.parse().ok()) {
            self.retry_max_elapsed_secs = secs;
        }
        debug!("Environment overrides applied (API key present: {})", self.gemini_api_key.is_some());
    }

    /// Parse a comma-separated tag list such as `hep-ph,hep-ex`.
    pub fn set_tags(&mut self, tags: &str) {
        self.tags = tags
            .split(',')
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
    }

    /// Reject values no run can work with.
    pub fn validate(&self) -> Result<(), CiphrError> {
        if self.tags.is_empty() {
            return Err(CiphrError::NoTagsProvided);
        }
        if self.questions.iter().all(|q| q.trim().is_empty()) {
            return Err(CiphrError::NoQuestions);
        }
        if self.max_results == 0 {
            return Err(CiphrError::InvalidConfig("max_results must be at least 1".to_string()));
        }
        if self.expansion_factor < 2 {
            return Err(CiphrError::InvalidConfig("expansion_factor must be at least 2".to_string()));
        }
        if self.output_filename.trim().is_empty() {
            return Err(CiphrError::InvalidConfig("output_filename is empty".to_string()));
        }
        Ok(())
    }

    /// Questions that become table columns.
    pub fn table_questions(&self) -> QuestionSet {
        QuestionSet::new(self.questions.iter().cloned())
    }

    /// Questions sent to the LLM: the table questions plus the flag question.
    pub fn analysis_questions(&self) -> QuestionSet {
        let mut questions = self.questions.clone();
        if let Some(flag) = &self.flag_question {
            questions.push(flag.clone());
        }
        QuestionSet::new(questions)
    }

    /// Expansion bound, never below the requested count.
    pub fn expansion_bound(&self) -> usize {
        self.max_expansion_results.max(self.max_results)
    }

    pub fn output_path(&self) -> PathBuf {
        self.output_dir.join(&self.output_filename)
    }

    pub fn papers_data_path(&self) -> PathBuf {
        self.output_dir.join(PAPERS_DATA_FILE)
    }

    pub fn prompts_path(&self) -> PathBuf {
        self.output_dir.join(ANALYSIS_PROMPTS_FILE)
    }
}
