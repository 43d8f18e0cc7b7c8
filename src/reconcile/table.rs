use chrono::{DateTime, Local, NaiveDate, SecondsFormat, Utc};
use log::{info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::error::CiphrError;
use crate::paper::{normalize_title, paper_id_from_url, PaperRecord};
use crate::reconcile::{ExistingPapers, QuestionSet, NOT_FOUND};

pub const TITLE_COLUMN: &str = "Paper Title";
pub const LINK_COLUMN: &str = "arXiv Link";

/// Highest `_N` counter tried for dated filenames before giving up.
const MAX_DATED_CANDIDATES: usize = 100;

static LINK_CELL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^\[[^\]]*\]\(\s*([^\s)]+)(?:\s+"([^"]*)")?\s*\)$"#).expect("Invalid link cell regex pattern")
});

/// One paper in the output table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableRow {
    pub id: String,
    pub title: String,
    pub url: String,
    /// Kept in the link title attribute; rows from older files may lack it.
    pub published: Option<DateTime<Utc>>,
    pub answers: Vec<String>,
}

impl TableRow {
    pub fn from_paper(paper: &PaperRecord, answers: Vec<String>) -> Self {
        Self {
            id: paper.id.clone(),
            title: paper.title.split_whitespace().collect::<Vec<_>>().join(" "),
            url: paper.url.clone(),
            published: Some(paper.published),
            answers,
        }
    }

    fn render(&self) -> String {
        let link = match self.published {
            Some(published) => format!(
                "[Link]({} \"{}\")",
                self.url,
                published.to_rfc3339_opts(SecondsFormat::Secs, true)
            ),
            None => format!("[Link]({})", self.url),
        };
        let mut cells = vec![escape_cell(&self.title), link];
        cells.extend(self.answers.iter().map(|a| escape_cell(a)));
        cells.join(" | ")
    }
}

/// The persisted markdown table.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputTable {
    pub questions: QuestionSet,
    pub rows: Vec<TableRow>,
}

impl OutputTable {
    pub fn new(questions: QuestionSet) -> Self {
        Self {
            questions,
            rows: Vec::new(),
        }
    }

    /// Parse a table previously written by [`OutputTable::render`].
    pub fn parse(content: &str) -> Result<Self, CiphrError> {
        let mut lines = content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty());

        let (_, header) = lines
            .next()
            .ok_or_else(|| CiphrError::MalformedTable("file is empty".to_string()))?;
        let header_cells = split_cells(header);
        if header_cells.len() < 2
            || !header_cells[0].eq_ignore_ascii_case(TITLE_COLUMN)
            || !header_cells[1].eq_ignore_ascii_case(LINK_COLUMN)
        {
            return Err(CiphrError::MalformedTable(format!(
                "header must start with '{} | {}'",
                TITLE_COLUMN, LINK_COLUMN
            )));
        }
        let questions = QuestionSet::new(&header_cells[2..]);
        let columns = header_cells.len();

        match lines.next() {
            Some((_, separator)) if is_separator(separator) => {}
            Some((n, _)) => {
                return Err(CiphrError::MalformedTable(format!(
                    "line {}: expected separator row",
                    n + 1
                )))
            }
            None => return Err(CiphrError::MalformedTable("missing separator row".to_string())),
        }

        let mut table = Self::new(questions);
        let mut seen = HashSet::new();
        for (n, line) in lines {
            let cells = split_cells(line);
            if cells.len() != columns {
                return Err(CiphrError::MalformedTable(format!(
                    "line {}: expected {} columns, found {}",
                    n + 1,
                    columns,
                    cells.len()
                )));
            }
            let captures = LINK_CELL_REGEX.captures(&cells[1]).ok_or_else(|| {
                CiphrError::MalformedTable(format!("line {}: unreadable link cell '{}'", n + 1, cells[1]))
            })?;
            let url = captures[1].to_string();
            let published = captures.get(2).and_then(|m| {
                DateTime::parse_from_rfc3339(m.as_str())
                    .map(|d| d.with_timezone(&Utc))
                    .ok()
            });
            let id = paper_id_from_url(&url);
            if !seen.insert(id.clone()) {
                warn!("Dropping repeated row for paper {} at line {}", id, n + 1);
                continue;
            }
            table.rows.push(TableRow {
                id,
                title: cells[0].clone(),
                url,
                published,
                answers: cells[2..].to_vec(),
            });
        }
        Ok(table)
    }

    pub fn render(&self) -> String {
        let mut headers = vec![TITLE_COLUMN.to_string(), LINK_COLUMN.to_string()];
        headers.extend(self.questions.iter().map(escape_cell));

        let mut output = headers.join(" | ");
        output.push('\n');
        output.push_str(
            &headers
                .iter()
                .map(|h| "-".repeat(h.chars().count().max(3)))
                .collect::<Vec<_>>()
                .join(" | "),
        );
        output.push('\n');
        for row in &self.rows {
            output.push_str(&row.render());
            output.push('\n');
        }
        output
    }

    pub fn contains(&self, id: &str) -> bool {
        self.rows.iter().any(|row| row.id == id)
    }

    /// Identifiers and titles already published in this table.
    pub fn existing_papers(&self) -> ExistingPapers {
        let mut existing = ExistingPapers::new();
        for row in &self.rows {
            existing.insert(&row.id, &row.title);
        }
        existing
    }

    /// Add rows for papers not yet present, then re-sort. Returns how many
    /// rows were added.
    pub fn merge(&mut self, rows: Vec<TableRow>) -> usize {
        let mut titles: HashSet<String> = self.rows.iter().map(|r| normalize_title(&r.title)).collect();
        let mut added = 0;
        for mut row in rows {
            let title = normalize_title(&row.title);
            if self.contains(&row.id) || (!title.is_empty() && !titles.insert(title)) {
                info!("Paper {} already in table, not adding it again", row.id);
                continue;
            }
            row.answers.resize(self.questions.len(), NOT_FOUND.to_string());
            self.rows.push(row);
            added += 1;
        }
        self.sort_rows();
        added
    }

    /// Newest first; rows without a date go last, keeping their order.
    pub fn sort_rows(&mut self) {
        self.rows.sort_by(|a, b| b.published.cmp(&a.published));
    }
}

/// Where the table for this run lives and what is there now.
#[derive(Debug, Clone, PartialEq)]
pub enum TableState {
    NoFile,
    SameSchema(OutputTable),
    SchemaChanged(QuestionSet),
}

#[derive(Debug, Clone)]
pub struct Inspection {
    pub state: TableState,
    /// Set when an existing file could not be read and will be rebuilt.
    pub warning: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResolvedTarget {
    pub path: PathBuf,
    pub inspection: Inspection,
    /// The configured file holds a different schema and was left alone.
    pub schema_changed: bool,
}

#[derive(Debug, Clone)]
pub struct WriteOutcome {
    pub path: PathBuf,
    pub created: bool,
    pub added: usize,
    pub total_rows: usize,
    pub schema_changed: bool,
    pub warning: Option<String>,
}

/// Decides between appending to the configured table and starting a new one.
#[derive(Debug, Clone)]
pub struct TableWriter {
    dir: PathBuf,
    base_filename: String,
    questions: QuestionSet,
    date: NaiveDate,
}

impl TableWriter {
    pub fn new(dir: impl Into<PathBuf>, base_filename: impl Into<String>, questions: QuestionSet) -> Self {
        Self {
            dir: dir.into(),
            base_filename: base_filename.into(),
            questions,
            date: Local::now().date_naive(),
        }
    }

    /// Date used for the suffix of tables created after a schema change.
    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.date = date;
        self
    }

    pub fn questions(&self) -> &QuestionSet {
        &self.questions
    }

    /// Classify the file at `path` against the current questions.
    pub fn inspect(path: &Path, questions: &QuestionSet) -> Inspection {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Inspection {
                    state: TableState::NoFile,
                    warning: None,
                }
            }
            Err(e) => {
                let warning = format!("Could not read {:?} ({}), rebuilding it", path, e);
                warn!("{}", warning);
                return Inspection {
                    state: TableState::NoFile,
                    warning: Some(warning),
                };
            }
        };

        match OutputTable::parse(&content) {
            Ok(table) if table.questions.same_schema(questions) => Inspection {
                state: TableState::SameSchema(table),
                warning: None,
            },
            Ok(table) => Inspection {
                state: TableState::SchemaChanged(table.questions),
                warning: None,
            },
            Err(e) => {
                let warning = format!("Existing table {:?} is corrupt ({}), rebuilding it", path, e);
                warn!("{}", warning);
                Inspection {
                    state: TableState::NoFile,
                    warning: Some(warning),
                }
            }
        }
    }

    /// Filenames tried in order: the configured one, then dated variants.
    fn candidates(&self) -> impl Iterator<Item = PathBuf> + '_ {
        let base = Path::new(&self.base_filename);
        let stem = base
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.base_filename.clone());
        let ext = base
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        let suffix = self.date.format("%d%m%y").to_string();

        std::iter::once(self.dir.join(&self.base_filename)).chain((1..=MAX_DATED_CANDIDATES).map(
            move |n| {
                let name = if n == 1 {
                    format!("{}_{}{}", stem, suffix, ext)
                } else {
                    format!("{}_{}_{}{}", stem, suffix, n, ext)
                };
                self.dir.join(name)
            },
        ))
    }

    /// Pick the file this run writes to.
    pub fn resolve(&self) -> Result<ResolvedTarget, CiphrError> {
        for (i, path) in self.candidates().enumerate() {
            let inspection = Self::inspect(&path, &self.questions);
            if let TableState::SchemaChanged(existing) = &inspection.state {
                info!(
                    "{:?} has different questions ({} columns vs {}), leaving it untouched",
                    path,
                    existing.len(),
                    self.questions.len()
                );
                continue;
            }
            return Ok(ResolvedTarget {
                path,
                inspection,
                schema_changed: i > 0,
            });
        }
        Err(CiphrError::InvalidConfig(format!(
            "no free output filename for {} in {:?}",
            self.base_filename, self.dir
        )))
    }

    /// Papers already published in the file this run will write to.
    pub fn existing_papers(&self) -> Result<ExistingPapers, CiphrError> {
        let target = self.resolve()?;
        Ok(match &target.inspection.state {
            TableState::SameSchema(table) => table.existing_papers(),
            _ => ExistingPapers::new(),
        })
    }

    /// Merge `rows` into the resolved target and replace it atomically.
    pub fn write(&self, rows: Vec<TableRow>) -> Result<WriteOutcome, CiphrError> {
        let target = self.resolve()?;
        let (mut table, created) = match target.inspection.state {
            TableState::SameSchema(table) => (table, false),
            _ => (OutputTable::new(self.questions.clone()), true),
        };

        let added = table.merge(rows);
        write_atomic(&target.path, &table.render())?;

        if created {
            info!("Created {:?} with {} rows", target.path, table.rows.len());
        } else {
            info!("Added {} rows to {:?} ({} total)", added, target.path, table.rows.len());
        }

        Ok(WriteOutcome {
            path: target.path,
            created,
            added,
            total_rows: table.rows.len(),
            schema_changed: target.schema_changed,
            warning: target.inspection.warning,
        })
    }
}

/// Write to a temporary file next to `path`, then rename it into place.
pub fn write_atomic(path: &Path, content: &str) -> Result<(), CiphrError> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir)?;
    let mut file = NamedTempFile::new_in(&dir)?;
    file.write_all(content.as_bytes())?;
    file.flush()?;
    file.persist(path).map_err(|e| CiphrError::IoError(e.error))?;
    Ok(())
}

fn escape_cell(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace('|', "\\|")
}

fn is_separator(line: &str) -> bool {
    let line = line.trim();
    line.contains('-') && line.chars().all(|c| matches!(c, '|' | '-' | ':' | ' '))
}

/// Split a table row on unescaped pipes, tolerating optional outer pipes.
fn split_cells(line: &str) -> Vec<String> {
    let mut line = line.trim();
    if let Some(rest) = line.strip_prefix('|') {
        line = rest;
    }
    if line.ends_with('|') && !line.ends_with("\\|") {
        line = &line[..line.len() - 1];
    }

    let mut cells = Vec::new();
    let mut current = String::new();
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&'|') => {
                current.push('|');
                chars.next();
            }
            '|' => cells.push(std::mem::take(&mut current).trim().to_string()),
            _ => current.push(c),
        }
    }
    cells.push(current.trim().to_string());
    cells
}
