//! Files exchanged with an external LLM step between `collect` and `process`.

use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::Path;

use crate::error::CiphrError;
use crate::paper::PaperRecord;
use crate::reconcile::table::write_atomic;
use crate::reconcile::{prompt_instructions, QuestionSet};

/// Separator between per-paper blocks in the LLM results file.
pub const PAPER_SEPARATOR: &str = "---PAPER---";

/// A collected paper together with the text the LLM should read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectedPaper {
    #[serde(flatten)]
    pub paper: PaperRecord,
    pub combined_content: String,
}

impl CollectedPaper {
    pub fn new(paper: PaperRecord) -> Self {
        let combined_content = paper.combined_content();
        Self { paper, combined_content }
    }
}

/// Questions and instructions for the external analysis step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptBatch {
    pub questions: Vec<String>,
    pub instructions: String,
}

impl PromptBatch {
    pub fn new(questions: &QuestionSet) -> Self {
        Self {
            questions: questions.as_slice().to_vec(),
            instructions: prompt_instructions(questions),
        }
    }
}

pub fn save_papers(path: &Path, papers: &[CollectedPaper]) -> Result<(), CiphrError> {
    let json = serde_json::to_string_pretty(papers)?;
    write_atomic(path, &json)?;
    info!("Saved {} papers to {:?}", papers.len(), path);
    Ok(())
}

pub fn load_papers(path: &Path) -> Result<Vec<CollectedPaper>, CiphrError> {
    if !path.exists() {
        return Err(CiphrError::MissingHandoff(path.to_path_buf()));
    }
    let content = fs::read_to_string(path)?;
    let papers: Vec<CollectedPaper> = serde_json::from_str(&content)?;
    info!("Loaded {} papers from {:?}", papers.len(), path);
    Ok(papers)
}

pub fn save_prompts(path: &Path, batch: &PromptBatch) -> Result<(), CiphrError> {
    let json = serde_json::to_string_pretty(batch)?;
    write_atomic(path, &json)?;
    info!("Created analysis prompts file: {:?}", path);
    Ok(())
}

/// Split the raw LLM results file into exactly `expected` per-paper blocks.
///
/// Blocks come from [`PAPER_SEPARATOR`] splits, a top-level JSON array, or the
/// whole file as one result. Missing blocks are empty strings; extra blocks
/// are dropped.
pub fn split_llm_results(content: &str, expected: usize) -> Vec<String> {
    let content = content.trim();
    let mut blocks: Vec<String> = if content.is_empty() {
        warn!("LLM results file is empty");
        Vec::new()
    } else if content.contains(PAPER_SEPARATOR) {
        content
            .split(PAPER_SEPARATOR)
            .map(|block| block.trim().to_string())
            .collect()
    } else if content.starts_with('[') {
        match serde_json::from_str::<Value>(content) {
            Ok(Value::Array(items)) => items
                .into_iter()
                .map(|item| match item {
                    Value::String(s) => s,
                    other => other.to_string(),
                })
                .collect(),
            _ => {
                warn!("LLM results look like a JSON array but do not parse, using them as one result");
                vec![content.to_string()]
            }
        }
    } else {
        vec![content.to_string()]
    };

    if blocks.len() != expected {
        warn!(
            "{} papers but {} LLM results, {}",
            expected,
            blocks.len(),
            if blocks.len() < expected { "padding" } else { "truncating" }
        );
        blocks.resize(expected, String::new());
    }
    blocks
}

pub fn read_llm_results(path: &Path, expected: usize) -> Result<Vec<String>, CiphrError> {
    if !path.exists() {
        return Err(CiphrError::MissingHandoff(path.to_path_buf()));
    }
    let content = fs::read_to_string(path)?;
    info!("LLM results file size: {} characters", content.len());
    Ok(split_llm_results(&content, expected))
}
