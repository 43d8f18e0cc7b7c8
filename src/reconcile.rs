//! Reconciliation of freshly fetched papers and LLM answers against the
//! published markdown table.

pub mod dedup;
pub mod mapper;
pub mod table;

use std::collections::HashSet;
use std::fmt;

use crate::paper::{normalize_title, PaperRecord};

pub use dedup::{ExpansionSearch, PaperSource, SearchOutcome};
pub use mapper::{build_prompt, parse_answers, prompt_instructions, AnswerRecord, AnswerShape, NOT_FOUND};
pub use table::{OutputTable, TableRow, TableState, TableWriter, WriteOutcome};

/// Normalise one question so that cosmetic differences (line breaks, padding)
/// do not count as a schema change. Whitespace runs collapse the same way
/// table cells do, so a written header reads back equal.
pub fn normalize_question(question: &str) -> String {
    question.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Ordered list of questions. Defines the column schema of one output table.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct QuestionSet {
    questions: Vec<String>,
}

impl fmt::Debug for QuestionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(&self.questions).finish()
    }
}

impl QuestionSet {
    pub fn new<I, S>(questions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            questions: questions
                .into_iter()
                .map(|q| normalize_question(q.as_ref()))
                .filter(|q| !q.is_empty())
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.questions.iter().map(String::as_str)
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.questions.get(index).map(String::as_str)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.questions
    }

    /// Schema equality: identical normalised sequences.
    pub fn same_schema(&self, other: &QuestionSet) -> bool {
        self == other
    }
}

/// Papers already present in the target table, by identifier and by title.
#[derive(Debug, Clone, Default)]
pub struct ExistingPapers {
    ids: HashSet<String>,
    titles: HashSet<String>,
}

impl ExistingPapers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: &str, title: &str) {
        if !id.is_empty() {
            self.ids.insert(id.to_string());
        }
        let title = normalize_title(title);
        if !title.is_empty() {
            self.titles.insert(title);
        }
    }

    pub fn contains_id(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Returns the reason a paper is a duplicate, if it is one.
    pub fn duplicate_reason(&self, paper: &PaperRecord) -> Option<&'static str> {
        if self.ids.contains(&paper.id) {
            Some("link")
        } else if self.titles.contains(&paper.normalized_title()) {
            Some("title")
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty() && self.titles.is_empty()
    }
}
