//! Callback registry
//!
//! Jobs name their callback by string. Handlers are registered under those
//! names when the process starts, and the runner resolves them at launch.

use async_trait::async_trait;
use jobslot_core::domain::job::JobId;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// Work executed for a job
///
/// Every handler receives the job's stored arguments followed by the id of
/// the job being run, so it can report progress against that job.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self, arguments: Vec<String>, job_id: JobId) -> anyhow::Result<()>;
}

/// Adapts an async closure into a `JobHandler`
pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> JobHandler for FnHandler<F>
where
    F: Fn(Vec<String>, JobId) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn run(&self, arguments: Vec<String>, job_id: JobId) -> anyhow::Result<()> {
        (self.0)(arguments, job_id).await
    }
}

/// Map from callback name to handler
#[derive(Clone, Default)]
pub struct CallbackRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler, replacing any previous one with the same name
    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn JobHandler>) -> &mut Self {
        self.handlers.insert(name.into(), handler);
        self
    }

    pub fn register_fn<F, Fut>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(Vec<String>, JobId) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.register(name, Arc::new(FnHandler(f)))
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered callback names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
