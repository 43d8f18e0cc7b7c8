use log::{info, warn};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::CiphrError;
use crate::extract::{attach_content, ContentExtractor};
use crate::handoff::{self, CollectedPaper, PromptBatch};
use crate::llm::AnswerProvider;
use crate::notify::{indicates_flag, publish_all, DigestSink, FlaggedPaper};
use crate::reconcile::{
    build_prompt, AnswerRecord, ExistingPapers, ExpansionSearch, PaperSource, SearchOutcome, TableRow, TableState,
    TableWriter, WriteOutcome,
};

/// Papers gathered by a search, ready for analysis.
#[derive(Debug, Clone)]
pub struct Collection {
    pub papers: Vec<CollectedPaper>,
    pub search: SearchOutcome,
    /// Papers whose PDF text could be extracted.
    pub extracted: usize,
    pub target: PathBuf,
}

/// What a run did, for the final summary.
#[derive(Debug, Default)]
pub struct RunReport {
    pub search: Option<SearchOutcome>,
    pub write: Option<WriteOutcome>,
    pub flagged: Vec<FlaggedPaper>,
    pub warnings: Vec<String>,
}

impl RunReport {
    /// Fewer new papers than requested could be found.
    pub fn is_partial(&self) -> bool {
        self.search.as_ref().is_some_and(SearchOutcome::is_partial)
    }

    pub fn summary(&self) -> String {
        let mut lines = Vec::new();
        if let Some(search) = &self.search {
            lines.push(format!(
                "Found {}/{} new papers ({} candidates checked, {} duplicates)",
                search.papers.len(),
                search.requested,
                search.checked,
                search.duplicates
            ));
        }
        match &self.write {
            Some(write) => lines.push(format!(
                "{} {:?}: {} rows added, {} total{}",
                if write.created { "Created" } else { "Updated" },
                write.path,
                write.added,
                write.total_rows,
                if write.schema_changed { " (questions changed, new file)" } else { "" }
            )),
            None => lines.push("Output table unchanged".to_string()),
        }
        if !self.flagged.is_empty() {
            lines.push(format!("{} papers flagged for notification", self.flagged.len()));
        }
        lines.extend(self.warnings.iter().map(|w| format!("Warning: {}", w)));
        lines.join("\n")
    }
}

pub fn table_writer(config: &Config) -> TableWriter {
    TableWriter::new(&config.output_dir, &config.output_filename, config.table_questions())
}

/// Search for new papers and attach their content.
pub fn gather<S, E>(config: &Config, source: &S, extractor: &E) -> Result<Collection, CiphrError>
where
    S: PaperSource + ?Sized,
    E: ContentExtractor + ?Sized,
{
    let writer = table_writer(config);
    let target = writer.resolve()?;
    let existing = match &target.inspection.state {
        TableState::SameSchema(table) => table.existing_papers(),
        _ => ExistingPapers::new(),
    };
    info!("Found {} existing papers in {:?}", existing.len(), target.path);

    let search = ExpansionSearch::new(source, config.max_results, config.expansion_bound(), config.expansion_factor)
        .run(&config.tags, &existing)?;

    let mut extracted = 0;
    let papers = search
        .papers
        .iter()
        .cloned()
        .map(|paper| {
            let (paper, ok) = attach_content(paper, extractor, config);
            if ok {
                extracted += 1;
            }
            CollectedPaper::new(paper)
        })
        .collect::<Vec<_>>();
    info!("Collected content for {} papers ({} with PDF text)", papers.len(), extracted);

    Ok(Collection {
        papers,
        search,
        extracted,
        target: target.path,
    })
}

/// `collect` mode: gather papers and write the hand-off files.
pub fn collect<S, E>(config: &Config, source: &S, extractor: &E) -> Result<Collection, CiphrError>
where
    S: PaperSource + ?Sized,
    E: ContentExtractor + ?Sized,
{
    let collection = gather(config, source, extractor)?;
    handoff::save_papers(&config.papers_data_path(), &collection.papers)?;
    handoff::save_prompts(&config.prompts_path(), &PromptBatch::new(&config.analysis_questions()))?;
    Ok(collection)
}

/// Ask the provider about each paper in turn. A failed request leaves an
/// empty response, which maps to placeholder answers.
pub fn analyze<P: AnswerProvider + ?Sized>(config: &Config, papers: &[CollectedPaper], provider: &P) -> Vec<String> {
    let questions = config.analysis_questions();
    papers
        .iter()
        .enumerate()
        .map(|(i, collected)| {
            info!("Analyzing paper {}/{}: {}", i + 1, papers.len(), collected.paper.title);
            let prompt = build_prompt(&collected.combined_content, &questions);
            provider.complete(&prompt).unwrap_or_else(|e| {
                warn!("LLM analysis failed for {}: {}", collected.paper.id, e);
                String::new()
            })
        })
        .collect()
}

/// Map raw responses onto the questions, write the table and notify.
///
/// `responses` is aligned with `papers`; missing entries count as empty.
pub fn finish(
    config: &Config,
    papers: &[CollectedPaper],
    responses: &[String],
    sinks: &[Box<dyn DigestSink>],
) -> Result<RunReport, CiphrError> {
    let mut report = RunReport::default();
    if papers.is_empty() {
        info!("No new papers to add, leaving the output table untouched");
        return Ok(report);
    }

    let analysis_questions = config.analysis_questions();
    let table_width = config.table_questions().len();

    let mut rows = Vec::with_capacity(papers.len());
    for (i, collected) in papers.iter().enumerate() {
        let raw = responses.get(i).map(String::as_str).unwrap_or("");
        let record = AnswerRecord::from_response(&collected.paper.id, raw, &analysis_questions);
        info!(
            "Mapped {}/{} answers for {} ({:?})",
            record.found(),
            analysis_questions.len(),
            collected.paper.id,
            record.shape
        );

        if config.flag_question.is_some() && analysis_questions.len() > table_width {
            let answer = record.answer(table_width);
            if indicates_flag(answer) {
                info!("Flagged paper: {}", collected.paper.title);
                report.flagged.push(FlaggedPaper::new(&collected.paper, answer));
            }
        }
        rows.push(TableRow::from_paper(&collected.paper, record.truncated(table_width)));
    }

    let outcome = table_writer(config).write(rows)?;
    if let Some(warning) = &outcome.warning {
        report.warnings.push(warning.clone());
    }

    if !sinks.is_empty() {
        let markdown = fs::read_to_string(&outcome.path)?;
        report.warnings.extend(publish_all(sinks, &report.flagged, &markdown));
    }
    report.write = Some(outcome);
    Ok(report)
}

/// `process` mode: read the hand-off files and finish the run.
pub fn process(config: &Config, results_path: &Path, sinks: &[Box<dyn DigestSink>]) -> Result<RunReport, CiphrError> {
    let papers = handoff::load_papers(&config.papers_data_path())?;
    let responses = handoff::read_llm_results(results_path, papers.len())?;
    finish(config, &papers, &responses, sinks)
}

/// `local` mode: search, analyse in-process and finish.
pub fn run_local<S, E, P>(
    config: &Config,
    source: &S,
    extractor: &E,
    provider: &P,
    sinks: &[Box<dyn DigestSink>],
) -> Result<RunReport, CiphrError>
where
    S: PaperSource + ?Sized,
    E: ContentExtractor + ?Sized,
    P: AnswerProvider + ?Sized,
{
    let collection = gather(config, source, extractor)?;
    let responses = analyze(config, &collection.papers, provider);
    let mut report = finish(config, &collection.papers, &responses, sinks)?;
    report.search = Some(collection.search);
    Ok(report)
}
