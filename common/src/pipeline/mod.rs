pub mod context;
pub mod orchestrator;
pub mod pool;
pub mod stage;

pub use context::{ColumnSelection, Route, TaskContext, TaskOutcome, TaskRequest};
pub use orchestrator::Orchestrator;
pub use pool::{read_jobs, run_batch, write_results, Job, JobOutcome, JobResult};
pub use stage::{Session, Stage};
