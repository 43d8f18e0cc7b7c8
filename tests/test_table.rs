use chrono::{NaiveDate, TimeZone, Utc};
use ciphr::paper::PaperRecord;
use ciphr::reconcile::{OutputTable, QuestionSet, TableRow, TableState, TableWriter, NOT_FOUND};
use std::fs;
use tempfile::TempDir;

fn questions(items: &[&str]) -> QuestionSet {
    QuestionSet::new(items.iter().copied())
}

fn paper(id: &str, title: &str, day: u32) -> PaperRecord {
    PaperRecord::new(
        title,
        format!("http://arxiv.org/abs/{}v1", id),
        "An abstract.",
        Utc.with_ymd_and_hms(2024, 1, day, 12, 0, 0).unwrap(),
    )
}

fn row(id: &str, title: &str, day: u32, answers: &[&str]) -> TableRow {
    TableRow::from_paper(&paper(id, title, day), answers.iter().map(|a| a.to_string()).collect())
}

fn writer(dir: &TempDir, qs: &QuestionSet) -> TableWriter {
    TableWriter::new(dir.path(), "research_insights.md", qs.clone())
        .with_date(NaiveDate::from_ymd_opt(2024, 3, 15).unwrap())
}

#[test]
fn test_render_and_parse_keep_rows_and_dates() {
    let qs = questions(&["What is studied?", "Is it about dark matter?"]);
    let mut table = OutputTable::new(qs.clone());
    table.merge(vec![
        row("2401.00001", "First | paper", 1, &["Higgs", "No"]),
        row("2401.00003", "Third paper", 3, &["Axions", "Yes, axion dark matter"]),
    ]);

    let parsed = OutputTable::parse(&table.render()).unwrap();
    assert_eq!(parsed.questions, qs);
    assert_eq!(parsed.rows.len(), 2);
    assert_eq!(parsed.rows[0].id, "2401.00003");
    assert_eq!(parsed.rows[1].title, "First | paper");
    assert_eq!(parsed.rows[0].published, Some(Utc.with_ymd_and_hms(2024, 1, 3, 12, 0, 0).unwrap()));
    assert_eq!(parsed.rows[0].answers, vec!["Axions", "Yes, axion dark matter"]);
}

#[test]
fn test_parse_accepts_plain_links_and_outer_pipes() {
    let content = "| Paper Title | arXiv Link | Q1 |\n|---|---|---|\n| A paper | [Link](http://arxiv.org/abs/2312.01234v2) | Answer |\n";
    let table = OutputTable::parse(content).unwrap();
    assert_eq!(table.rows.len(), 1);
    assert_eq!(table.rows[0].id, "2312.01234");
    assert_eq!(table.rows[0].published, None);
}

#[test]
fn test_parse_rejects_malformed_tables() {
    assert!(OutputTable::parse("").is_err());
    assert!(OutputTable::parse("Title | Link\n--- | ---\n").is_err());
    assert!(OutputTable::parse("Paper Title | arXiv Link | Q1\nnot a separator\n").is_err());
    let short_row = "Paper Title | arXiv Link | Q1\n--- | --- | ---\nA paper | [Link](http://arxiv.org/abs/2401.1)\n";
    assert!(OutputTable::parse(short_row).is_err());
    let bad_link = "Paper Title | arXiv Link | Q1\n--- | --- | ---\nA paper | somewhere | x\n";
    assert!(OutputTable::parse(bad_link).is_err());
}

#[test]
fn test_merge_skips_existing_ids_and_titles() {
    let qs = questions(&["Q1"]);
    let mut table = OutputTable::new(qs);
    assert_eq!(table.merge(vec![row("2401.00001", "Dark Matter Today", 1, &["a"])]), 1);
    let added = table.merge(vec![
        row("2401.00001", "Renamed", 2, &["b"]),
        row("2401.00009", "dark   matter today", 3, &["c"]),
        row("2401.00002", "Something new", 2, &[]),
    ]);
    assert_eq!(added, 1);
    assert_eq!(table.rows.len(), 2);
    assert_eq!(table.rows[0].id, "2401.00002");
    assert_eq!(table.rows[0].answers, vec![NOT_FOUND]);
}

#[test]
fn test_first_write_creates_table() {
    let dir = TempDir::new().unwrap();
    let qs = questions(&["Q1", "Q2"]);
    let outcome = writer(&dir, &qs)
        .write(vec![row("2401.00001", "A", 1, &["x", "y"])])
        .unwrap();
    assert!(outcome.created);
    assert!(!outcome.schema_changed);
    assert_eq!(outcome.path, dir.path().join("research_insights.md"));
    let content = fs::read_to_string(&outcome.path).unwrap();
    assert!(content.starts_with("Paper Title | arXiv Link | Q1 | Q2\n"));
}

#[test]
fn test_same_schema_adds_exactly_one_row_sorted() {
    let dir = TempDir::new().unwrap();
    let qs = questions(&["Q1"]);
    let w = writer(&dir, &qs);
    w.write(vec![row("2401.00003", "C", 3, &["c"]), row("2401.00001", "A", 1, &["a"])])
        .unwrap();

    let outcome = w
        .write(vec![row("2401.00002", "B", 2, &["b"]), row("2401.00003", "C", 3, &["again"])])
        .unwrap();
    assert!(!outcome.created);
    assert_eq!(outcome.added, 1);
    assert_eq!(outcome.total_rows, 3);

    let table = OutputTable::parse(&fs::read_to_string(&outcome.path).unwrap()).unwrap();
    let ids: Vec<_> = table.rows.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["2401.00003", "2401.00002", "2401.00001"]);
    assert_eq!(table.rows[0].answers, vec!["c"]);
}

#[test]
fn test_wrapped_question_keeps_schema_across_runs() {
    let dir = TempDir::new().unwrap();
    let qs = questions(&["Is this work related to\n    dark matter?", "Which  experiment?"]);
    assert_eq!(qs.as_slice(), &["Is this work related to dark matter?", "Which experiment?"]);

    let w = writer(&dir, &qs);
    let first = w.write(vec![row("2401.00001", "A", 1, &["a1", "a2"])]).unwrap();
    let table = OutputTable::parse(&fs::read_to_string(&first.path).unwrap()).unwrap();
    assert!(table.questions.same_schema(&qs));

    let second = w.write(vec![row("2401.00002", "B", 2, &["b1", "b2"])]).unwrap();
    assert!(!second.schema_changed);
    assert_eq!(second.path, dir.path().join("research_insights.md"));
    assert_eq!(second.total_rows, 2);
    assert!(!dir.path().join("research_insights_150324.md").exists());
}

#[test]
fn test_schema_change_leaves_original_untouched() {
    let dir = TempDir::new().unwrap();
    let old = questions(&["Old question"]);
    writer(&dir, &old)
        .write(vec![row("2401.00001", "A", 1, &["a"])])
        .unwrap();
    let original_path = dir.path().join("research_insights.md");
    let before = fs::read(&original_path).unwrap();

    let new = questions(&["Old question", "New question"]);
    let outcome = writer(&dir, &new)
        .write(vec![row("2401.00002", "B", 2, &["b1", "b2"])])
        .unwrap();

    assert!(outcome.schema_changed);
    assert!(outcome.created);
    assert_eq!(outcome.path, dir.path().join("research_insights_150324.md"));
    assert_eq!(fs::read(&original_path).unwrap(), before);

    // A second run with the new schema appends to the dated file
    let again = writer(&dir, &new)
        .write(vec![row("2401.00003", "C", 3, &["c1", "c2"])])
        .unwrap();
    assert_eq!(again.path, outcome.path);
    assert_eq!(again.total_rows, 2);
}

#[test]
fn test_dated_name_taken_by_other_schema_gets_counter() {
    let dir = TempDir::new().unwrap();
    writer(&dir, &questions(&["Q1"])).write(vec![row("2401.00001", "A", 1, &["a"])]).unwrap();
    writer(&dir, &questions(&["Q2"])).write(vec![row("2401.00002", "B", 2, &["b"])]).unwrap();
    let outcome = writer(&dir, &questions(&["Q3"]))
        .write(vec![row("2401.00003", "C", 3, &["c"])])
        .unwrap();
    assert_eq!(outcome.path, dir.path().join("research_insights_150324_2.md"));
}

#[test]
fn test_corrupt_table_is_rebuilt_with_warning() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("research_insights.md");
    fs::write(&path, "this is not a table\n").unwrap();

    let qs = questions(&["Q1"]);
    let inspection = TableWriter::inspect(&path, &qs);
    assert_eq!(inspection.state, TableState::NoFile);
    assert!(inspection.warning.is_some());

    let outcome = writer(&dir, &qs).write(vec![row("2401.00001", "A", 1, &["a"])]).unwrap();
    assert_eq!(outcome.path, path);
    assert!(outcome.warning.is_some());
    assert_eq!(outcome.total_rows, 1);
}

#[test]
fn test_existing_papers_come_from_resolved_target() {
    let dir = TempDir::new().unwrap();
    let qs = questions(&["Q1"]);
    let w = writer(&dir, &qs);
    assert!(w.existing_papers().unwrap().is_empty());

    w.write(vec![row("2401.00001", "Known Paper", 1, &["a"])]).unwrap();
    let existing = w.existing_papers().unwrap();
    assert!(existing.contains_id("2401.00001"));
    assert_eq!(existing.duplicate_reason(&paper("2401.99999", "known  paper", 5)), Some("title"));

    // Different questions resolve to a fresh dated file with no history
    let other = writer(&dir, &questions(&["Q2"]));
    assert!(other.existing_papers().unwrap().is_empty());
}
