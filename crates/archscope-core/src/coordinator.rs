//! Fan-out/fan-in diagram parsing over a bounded worker pool.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::diagram::{parse_diagram, ParseWarning, ParsedDiagram, Tooltip};
use crate::error::Error;
use crate::model::{DiagramRef, QualifiedId, Relationship};
use crate::repository::DiagramSource;

pub const DEFAULT_WORKERS: usize = 10;
pub const DEFAULT_FILE_TIMEOUT: Duration = Duration::from_secs(2);

/// Combined result of parsing every diagram in a project.
#[derive(Debug, Default)]
pub struct ParseOutcome {
    /// Ordered by file path, then by statement order within the file.
    pub relationships: Vec<Relationship>,
    pub tooltips: Vec<Tooltip>,
    pub warnings: Vec<ParseWarning>,
    pub files_parsed: usize,
    pub files_failed: usize,
    /// Files never dispatched because the caller cancelled.
    pub files_skipped: usize,
    pub cancelled: bool,
}

#[derive(Debug, Clone)]
pub struct ParseCoordinator {
    workers: usize,
    file_timeout: Duration,
}

impl Default for ParseCoordinator {
    fn default() -> Self {
        Self::new(DEFAULT_WORKERS, DEFAULT_FILE_TIMEOUT)
    }
}

type FileResult = std::result::Result<ParsedDiagram, String>;

impl ParseCoordinator {
    pub fn new(workers: usize, file_timeout: Duration) -> Self {
        Self {
            workers: workers.max(1),
            file_timeout,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.workers, settings.file_timeout())
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Parse all `diagrams`, at most `workers` at a time.
    ///
    /// A failing file (unreadable, structurally broken, timed out, or a
    /// panicking worker) contributes no relationships and exactly one
    /// warning. A timed-out file is reported at once, but its slot stays
    /// taken until the abandoned parse returns. On cancellation no further files are dispatched; files
    /// already in flight run to completion and are included.
    pub async fn parse_all(
        &self,
        mut diagrams: Vec<DiagramRef>,
        source: Arc<dyn DiagramSource>,
        known: Arc<HashSet<QualifiedId>>,
        cancel: CancellationToken,
    ) -> ParseOutcome {
        let started = Instant::now();
        diagrams.sort_by(|a, b| a.path.cmp(&b.path));
        diagrams.dedup_by(|a, b| a.path == b.path);
        let total = diagrams.len();

        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut tasks: JoinSet<(usize, PathBuf, FileResult)> = JoinSet::new();
        let mut outcome = ParseOutcome::default();
        let mut dispatched = 0usize;

        for (index, diagram) in diagrams.into_iter().enumerate() {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    outcome.cancelled = true;
                    break;
                }
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(p) => p,
                    Err(_) => break,
                },
            };
            dispatched += 1;

            let source = Arc::clone(&source);
            let known = Arc::clone(&known);
            let timeout = self.file_timeout;
            tasks.spawn(async move {
                let path = diagram.path.clone();
                let work = tokio::task::spawn_blocking(move || {
                    // Held by the thread, so a timed-out file keeps its slot
                    // until the parse really returns.
                    let _permit = permit;
                    let text = source
                        .read(&diagram.path)
                        .map_err(|e| Error::io(&diagram.path, e))?;
                    parse_diagram(&diagram.path, &text, &diagram.scope, Some(known.as_ref()))
                });
                let result = match tokio::time::timeout(timeout, work).await {
                    Ok(Ok(parsed)) => parsed.map_err(|e| e.to_string()),
                    Ok(Err(join)) => Err(format!("parser worker failed: {join}")),
                    Err(_) => Err(format!("parse timed out after {} ms", timeout.as_millis())),
                };
                (index, path, result)
            });
        }
        outcome.files_skipped = total - dispatched;

        // Barrier: nothing is merged until every dispatched file has reported.
        let mut slots: Vec<Option<(PathBuf, FileResult)>> = (0..dispatched).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, path, result)) => slots[index] = Some((path, result)),
                Err(e) => warn!(error = %e, "diagram task aborted"),
            }
        }

        for slot in slots {
            let Some((path, result)) = slot else {
                outcome.files_failed += 1;
                continue;
            };
            match result {
                Ok(parsed) => {
                    debug!(
                        file = %path.display(),
                        relationships = parsed.relationships.len(),
                        "parsed diagram"
                    );
                    for w in &parsed.warnings {
                        warn!(file = %w.file.display(), line = ?w.line, "{}", w.message);
                    }
                    outcome.files_parsed += 1;
                    outcome.relationships.extend(parsed.relationships);
                    outcome.tooltips.extend(parsed.tooltips);
                    outcome.warnings.extend(parsed.warnings);
                }
                Err(message) => {
                    warn!(file = %path.display(), "skipping diagram: {message}");
                    outcome.files_failed += 1;
                    outcome.warnings.push(ParseWarning::new(path, None, message));
                }
            }
        }

        info!(
            files = total,
            parsed = outcome.files_parsed,
            failed = outcome.files_failed,
            skipped = outcome.files_skipped,
            relationships = outcome.relationships.len(),
            cancelled = outcome.cancelled,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "diagram parse finished"
        );
        outcome
    }
}
