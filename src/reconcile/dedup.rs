use log::{info, warn};
use std::collections::HashSet;

use crate::error::CiphrError;
use crate::paper::PaperRecord;
use crate::reconcile::ExistingPapers;

/// Anything that can list candidate papers for a tag set, newest first.
pub trait PaperSource {
    fn fetch(&self, tags: &[String], batch_size: usize) -> Result<Vec<PaperRecord>, CiphrError>;
}

/// Result of an expansion search.
#[derive(Debug, Clone, Default)]
pub struct SearchOutcome {
    /// Novel papers in source order, never more than requested.
    pub papers: Vec<PaperRecord>,
    pub requested: usize,
    /// Distinct candidates examined across all rounds.
    pub checked: usize,
    pub duplicates: usize,
    /// Batch sizes requested from the source, in order.
    pub batches: Vec<usize>,
}

impl SearchOutcome {
    /// Fewer novel papers than requested were found within the bound.
    pub fn is_partial(&self) -> bool {
        self.papers.len() < self.requested
    }

    pub fn expanded(&self) -> bool {
        self.batches.len() > 1
    }
}

/// Widens the fetch batch until enough papers not yet in the table are found.
pub struct ExpansionSearch<'a, S: PaperSource + ?Sized> {
    source: &'a S,
    requested: usize,
    bound: usize,
    factor: usize,
}

impl<'a, S: PaperSource + ?Sized> ExpansionSearch<'a, S> {
    pub fn new(source: &'a S, requested: usize, bound: usize, factor: usize) -> Self {
        Self {
            source,
            requested,
            bound: bound.max(requested),
            factor: factor.max(2),
        }
    }

    /// Run the search against the papers already published.
    ///
    /// A failure on the first query is returned; a failure while expanding
    /// ends the search with whatever has been collected so far.
    pub fn run(&self, tags: &[String], existing: &ExistingPapers) -> Result<SearchOutcome, CiphrError> {
        let mut outcome = SearchOutcome {
            requested: self.requested,
            ..Default::default()
        };
        if self.requested == 0 {
            return Ok(outcome);
        }

        // Identifiers resolved this run, whether accepted or rejected
        let mut resolved: HashSet<String> = HashSet::new();
        let mut batch_size = self.requested;

        loop {
            outcome.batches.push(batch_size);
            let candidates = match self.source.fetch(tags, batch_size) {
                Ok(candidates) => candidates,
                Err(e) if outcome.batches.len() > 1 => {
                    warn!("Expanded search with batch size {} failed: {}", batch_size, e);
                    break;
                }
                Err(e) => return Err(e),
            };
            let exhausted = candidates.len() < batch_size;

            for paper in candidates {
                if outcome.papers.len() >= self.requested {
                    break;
                }
                if !resolved.insert(paper.id.clone()) {
                    continue;
                }
                outcome.checked += 1;
                if let Some(reason) = existing.duplicate_reason(&paper) {
                    outcome.duplicates += 1;
                    info!("Skipping duplicate paper ({}): {} ({})", reason, paper.title, paper.url);
                    continue;
                }
                outcome.papers.push(paper);
            }

            if outcome.papers.len() >= self.requested || batch_size >= self.bound || exhausted {
                break;
            }

            let next = batch_size.saturating_mul(self.factor).min(self.bound);
            warn!(
                "Found {}/{} new papers in a batch of {}. Expanding search to {}",
                outcome.papers.len(),
                self.requested,
                batch_size,
                next
            );
            batch_size = next;
        }

        if outcome.is_partial() {
            warn!(
                "Partial results: found {} of {} requested new papers after checking {} candidates",
                outcome.papers.len(),
                self.requested,
                outcome.checked
            );
        } else {
            info!(
                "Found {} new papers after checking {} candidates ({} duplicates)",
                outcome.papers.len(),
                outcome.checked,
                outcome.duplicates
            );
        }
        Ok(outcome)
    }
}
