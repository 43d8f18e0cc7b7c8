use chrono::{TimeZone, Utc};
use ciphr::error::CiphrError;
use ciphr::handoff::{
    load_papers, read_llm_results, save_papers, save_prompts, split_llm_results, CollectedPaper, PromptBatch,
    PAPER_SEPARATOR,
};
use ciphr::paper::PaperRecord;
use ciphr::reconcile::{prompt_instructions, QuestionSet};
use std::fs;
use tempfile::TempDir;

fn collected(id: &str) -> CollectedPaper {
    let paper = PaperRecord::new(
        format!("Paper {}", id),
        format!("http://arxiv.org/abs/{}v1", id),
        "Abstract text",
        Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap(),
    )
    .with_authors(["Chien-Shiung Wu"])
    .with_full_text("Full text body");
    CollectedPaper::new(paper)
}

#[test]
fn test_papers_file_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("papers_data.json");
    let papers = vec![collected("2405.00001"), collected("2405.00002")];

    save_papers(&path, &papers).unwrap();
    let raw: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(raw[0]["arxiv_url"], "http://arxiv.org/abs/2405.00001v1");
    assert_eq!(raw[0]["abstract"], "Abstract text");
    assert!(raw[0]["combined_content"].as_str().unwrap().contains("PDF Content:\nFull text body"));

    assert_eq!(load_papers(&path).unwrap(), papers);
}

#[test]
fn test_missing_papers_file() {
    let dir = TempDir::new().unwrap();
    let result = load_papers(&dir.path().join("papers_data.json"));
    assert!(matches!(result, Err(CiphrError::MissingHandoff(_))));
}

#[test]
fn test_prompt_file_lists_questions() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("analysis_prompts.json");
    let questions = QuestionSet::new(["Q one?", "Q two?"]);
    save_prompts(&path, &PromptBatch::new(&questions)).unwrap();

    let batch: PromptBatch = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(batch.questions, vec!["Q one?", "Q two?"]);
    assert!(batch.instructions.contains("\"Q two?\""));
    assert_eq!(batch.instructions, prompt_instructions(&questions));
}

#[test]
fn test_split_on_paper_separator_keeps_positions() {
    let content = format!("{{\"1\": \"a\"}}\n{}\n\n{}\n{{\"1\": \"c\"}}\n", PAPER_SEPARATOR, PAPER_SEPARATOR);
    let blocks = split_llm_results(&content, 3);
    assert_eq!(blocks, vec!["{\"1\": \"a\"}", "", "{\"1\": \"c\"}"]);
}

#[test]
fn test_split_json_array() {
    let content = r#"[{"1": "a"}, "plain answer"]"#;
    let blocks = split_llm_results(content, 2);
    assert_eq!(blocks, vec![r#"{"1":"a"}"#, "plain answer"]);
}

#[test]
fn test_split_pads_and_truncates() {
    assert_eq!(split_llm_results("only one", 3), vec!["only one", "", ""]);
    let content = format!("a{}b{}c", PAPER_SEPARATOR, PAPER_SEPARATOR);
    assert_eq!(split_llm_results(&content, 2), vec!["a", "b"]);
    assert_eq!(split_llm_results("  ", 2), vec!["", ""]);
}

#[test]
fn test_read_llm_results_missing_file() {
    let dir = TempDir::new().unwrap();
    let result = read_llm_results(&dir.path().join("llm_results.txt"), 1);
    assert!(matches!(result, Err(CiphrError::MissingHandoff(_))));
}
