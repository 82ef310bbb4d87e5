use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use common::llm::{CompletionService, OpenAiClient, OpenAiConfig, RetryingService};
use common::pipeline::{read_jobs, run_batch, write_results, ColumnSelection, TaskRequest};
use common::store::{SqliteStore, TableData};
use common::{Orchestrator, PipelineConfig, RetryPolicy};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "magsql")]
#[command(about = "answer questions over a table with validated sql", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer one question against one table
    Ask {
        /// Table JSON file ({"title", "header", "rows"})
        #[arg(short, long)]
        table: PathBuf,

        /// Natural-language question
        #[arg(short, long)]
        question: String,

        /// Optional domain hint for the question
        #[arg(short, long, default_value = "")]
        evidence: String,

        /// Preset column selection, e.g. `employees=name,salary`; skips pruning
        #[arg(long, value_parser = parse_columns)]
        columns: Option<ColumnSelection>,

        #[command(flatten)]
        pipeline: PipelineArgs,
    },
    /// Run a JSONL file of jobs through a worker pool
    Batch {
        /// Input JSONL, one job per line
        #[arg(short, long)]
        input: PathBuf,

        /// Output JSONL, one result per job in input order
        #[arg(short, long)]
        output: PathBuf,

        /// Concurrent tasks
        #[arg(long, default_value = "8")]
        workers: usize,

        /// Seconds before a task is abandoned
        #[arg(long, default_value = "600")]
        task_timeout_secs: u64,

        #[command(flatten)]
        pipeline: PipelineArgs,
    },
}

#[derive(Args)]
struct PipelineArgs {
    /// Chat model name
    #[arg(long, env = "MAGSQL_MODEL", default_value = "gpt-4o-mini")]
    model: String,

    /// OpenAI-compatible endpoint
    #[arg(long, env = "MAGSQL_BASE_URL")]
    base_url: Option<String>,

    /// API key for the endpoint
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: String,

    /// Seconds before one completion request is abandoned and retried
    #[arg(long, env = "MAGSQL_REQUEST_TIMEOUT_SECS", default_value = "120")]
    request_timeout_secs: u64,

    /// Dispatch rounds per task
    #[arg(long, env = "MAGSQL_MAX_ROUNDS", default_value = "20")]
    max_rounds: usize,

    /// Repair attempts per sub-question
    #[arg(long, env = "MAGSQL_MAX_REPAIRS", default_value = "2")]
    max_repairs: usize,

    /// Column count above which the schema is pruned
    #[arg(long, env = "MAGSQL_PRUNE_THRESHOLD", default_value = "10")]
    prune_threshold: usize,

    /// Never prune the schema
    #[arg(long, default_value = "false")]
    no_prune: bool,
}

impl PipelineArgs {
    fn config(&self) -> Result<PipelineConfig> {
        let config = PipelineConfig {
            max_rounds: self.max_rounds,
            max_repairs: self.max_repairs,
            prune_column_threshold: self.prune_threshold,
            disable_pruning: self.no_prune,
            ..PipelineConfig::default()
        };
        config.validate()?;
        Ok(config)
    }

    fn orchestrator(&self) -> Result<Orchestrator> {
        let client = OpenAiClient::new(OpenAiConfig {
            model: self.model.clone(),
            api_key: self.api_key.clone(),
            base_url: self.base_url.clone(),
            timeout_secs: self.request_timeout_secs,
        })?;
        let llm: Arc<dyn CompletionService> =
            Arc::new(RetryingService::new(client, RetryPolicy::default()));
        Ok(Orchestrator::new(llm, self.config()?))
    }
}

/// `table=a,b` into a single-table selection
fn parse_columns(raw: &str) -> std::result::Result<ColumnSelection, String> {
    let (table, columns) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected table=col,col but got '{}'", raw))?;

    let columns: Vec<String> = columns
        .split(',')
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect();

    Ok(ColumnSelection::from([(table.trim().to_string(), columns)]))
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        let _guard = common::tracing::init_tracing("magsql")?;

        match self.command {
            Commands::Ask {
                table,
                question,
                evidence,
                columns,
                pipeline,
            } => ask(table, question, evidence, columns, pipeline).await,
            Commands::Batch {
                input,
                output,
                workers,
                task_timeout_secs,
                pipeline,
            } => batch(input, output, workers, task_timeout_secs, pipeline).await,
        }
    }
}

async fn ask(
    table: PathBuf,
    question: String,
    evidence: String,
    columns: Option<ColumnSelection>,
    pipeline: PipelineArgs,
) -> Result<()> {
    let orchestrator = pipeline.orchestrator()?;

    let data = TableData::load(&table)
        .with_context(|| format!("failed to load table from {}", table.display()))?;
    tracing::info!(
        table = %data.table_name(),
        columns = data.header.len(),
        rows = data.rows.len(),
        "table loaded"
    );

    let store = tokio::task::spawn_blocking(move || SqliteStore::open_temp(&data)).await??;

    let mut request = TaskRequest::new(question, Arc::new(store)).with_evidence(evidence);
    if let Some(columns) = columns {
        request = request.with_preset_selection(columns);
    }

    let outcome = orchestrator.run(request).await;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

async fn batch(
    input: PathBuf,
    output: PathBuf,
    workers: usize,
    task_timeout_secs: u64,
    pipeline: PipelineArgs,
) -> Result<()> {
    let orchestrator = Arc::new(pipeline.orchestrator()?);

    let jobs = read_jobs(&input)
        .with_context(|| format!("failed to read jobs from {}", input.display()))?;
    tracing::info!(jobs = jobs.len(), input = %input.display(), "jobs loaded");

    let results = run_batch(
        orchestrator,
        jobs,
        workers,
        Duration::from_secs(task_timeout_secs),
    )
    .await;

    write_results(&output, &results)?;
    tracing::info!(output = %output.display(), results = results.len(), "wrote results");
    Ok(())
}
