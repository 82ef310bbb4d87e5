use crate::error::{MagSqlError, Result};
use crate::pipeline::context::{ColumnSelection, TaskOutcome, TaskRequest};
use crate::pipeline::orchestrator::Orchestrator;
use crate::store::{SqliteStore, TableData};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::Instrument;

/// one line of a batch input file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub question: String,
    #[serde(default)]
    pub evidence: String,
    pub table: TableData,
    /// preset column selection, skips pruning
    #[serde(default)]
    pub columns: Option<ColumnSelection>,
    #[serde(default)]
    pub column_notes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "result", rename_all = "snake_case")]
pub enum JobOutcome {
    Finished(TaskOutcome),
    TimedOut,
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub id: String,
    pub outcome: JobOutcome,
    pub duration_ms: u64,
}

/// reads one job per non-empty line
pub fn read_jobs(path: &Path) -> Result<Vec<Job>> {
    let reader = BufReader::new(std::fs::File::open(path)?);
    let mut jobs = Vec::new();

    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        jobs.push(serde_json::from_str(&line)?);
    }

    Ok(jobs)
}

pub fn write_results(path: &Path, results: &[JobResult]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut file = std::fs::File::create(path)?;
    for result in results {
        serde_json::to_writer(&mut file, result)?;
        file.write_all(b"\n")?;
    }
    Ok(())
}

async fn run_job(orchestrator: &Orchestrator, job: Job) -> Result<TaskOutcome> {
    job.table.validate()?;

    let table = job.table.clone();
    let store = tokio::task::spawn_blocking(move || SqliteStore::open_temp(&table))
        .await
        .map_err(|e| MagSqlError::Join(e.to_string()))??;

    let mut request = TaskRequest::new(job.question, Arc::new(store))
        .with_evidence(job.evidence)
        .with_column_notes(job.column_notes);
    if let Some(columns) = job.columns {
        request = request.with_preset_selection(columns);
    }

    Ok(orchestrator.run(request).await)
}

/// runs every job on at most `workers` concurrent tasks; results keep input order
pub async fn run_batch(
    orchestrator: Arc<Orchestrator>,
    jobs: Vec<Job>,
    workers: usize,
    task_timeout: Duration,
) -> Vec<JobResult> {
    let total = jobs.len();
    let permits = Arc::new(Semaphore::new(workers.max(1)));
    let mut join_set = JoinSet::new();

    let ids: Vec<String> = jobs.iter().map(|job| job.id.clone()).collect();

    tracing::info!(jobs = total, workers, "starting batch");

    for (index, job) in jobs.into_iter().enumerate() {
        let orchestrator = Arc::clone(&orchestrator);
        let permits = Arc::clone(&permits);
        let task_span = tracing::info_span!("task", task.id = %job.id, otel.kind = "internal");

        join_set.spawn(
            async move {
                let id = job.id.clone();
                let _permit = permits.acquire_owned().await;
                let start = Instant::now();

                // dropping the run on timeout closes its store
                let outcome =
                    match tokio::time::timeout(task_timeout, run_job(&orchestrator, job)).await {
                        Ok(Ok(outcome)) => JobOutcome::Finished(outcome),
                        Ok(Err(e)) => {
                            tracing::error!(error = %e, "task failed");
                            JobOutcome::Failed {
                                error: e.to_string(),
                            }
                        }
                        Err(_) => {
                            tracing::warn!(timeout_secs = task_timeout.as_secs(), "task timed out");
                            JobOutcome::TimedOut
                        }
                    };

                let duration_ms = start.elapsed().as_millis() as u64;
                tracing::info!(task.duration_ms = duration_ms, "task finished");
                (index, JobResult { id, outcome, duration_ms })
            }
            .instrument(task_span),
        );
    }

    let mut slots: Vec<Option<JobResult>> = vec![None; total];
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((index, result)) => slots[index] = Some(result),
            Err(e) => tracing::error!(error = %e, "task join error"),
        }
    }

    // a task that panicked never filled its slot
    let results: Vec<JobResult> = slots
        .into_iter()
        .zip(ids)
        .map(|(slot, id)| {
            slot.unwrap_or_else(|| JobResult {
                id,
                outcome: JobOutcome::Failed {
                    error: "task panicked".to_string(),
                },
                duration_ms: 0,
            })
        })
        .collect();
    tracing::info!(completed = results.len(), "batch complete");
    results
}
