use crate::pipeline::context::{Route, TaskContext};
use crate::schema::ContentCache;
use crate::store::Store;
use async_trait::async_trait;
use std::sync::Arc;

/// per-task resources shared by the stages of one run
pub struct Session {
    pub store: Arc<dyn Store>,
    pub cache: ContentCache,
}

impl Session {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            cache: ContentCache::new(),
        }
    }
}

/// one step of the pipeline.
///
/// a stage consumes the context, records its results and the next route in
/// it and hands it back; faults become context state, never errors.
#[async_trait]
pub trait Stage: Send + Sync {
    /// the route this stage answers to
    fn route(&self) -> Route;

    async fn step(&self, ctx: TaskContext, session: &mut Session) -> TaskContext;
}
