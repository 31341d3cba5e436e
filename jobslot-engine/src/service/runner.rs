//! Job Runner
//!
//! Executes at most one job per `launch()` call. Launches are expected to be
//! triggered from outside (cron or a timer); the runner keeps no loop of its
//! own. Each launch:
//! 1. reconciles orphaned jobs and backs off if a live job is running
//! 2. claims the next eligible job with a conditional store write
//! 3. runs its callback with the stored arguments and the job id
//! 4. records Completed or Error

use jobslot_core::domain::job::{Job, JobId, JobStatus};
use jobslot_core::dto::job::JobPatch;
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{Instrument, debug, info, instrument, warn};

use crate::config::EngineConfig;
use crate::error::{QueueError, Result};
use crate::service::notify::{CompletionNotifier, NoopNotifier};
use crate::service::queue::JobQueue;
use crate::service::registry::CallbackRegistry;

/// What a single `launch()` call did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchOutcome {
    /// Another job is running, nothing was started
    Busy,
    /// No Waiting job exists
    Idle,
    /// The selected job was claimed by a concurrent launcher first
    Contended(JobId),
    /// A job ran and reached a terminal state
    Finished { job_id: JobId, status: JobStatus },
}

/// Clones share the launch guard, so they serialize with each other
#[derive(Clone)]
pub struct JobRunner {
    queue: JobQueue,
    registry: Arc<CallbackRegistry>,
    notifier: Arc<dyn CompletionNotifier>,
    process_id: u32,
    job_timeout: Option<Duration>,
    /// Serializes launches issued from this process
    launch_guard: Arc<Mutex<()>>,
}

impl JobRunner {
    pub fn new(queue: JobQueue, registry: Arc<CallbackRegistry>, process_id: u32) -> Self {
        Self {
            queue,
            registry,
            notifier: Arc::new(NoopNotifier),
            process_id,
            job_timeout: None,
            launch_guard: Arc::new(Mutex::new(())),
        }
    }

    pub fn from_config(
        queue: JobQueue,
        registry: Arc<CallbackRegistry>,
        config: &EngineConfig,
    ) -> Self {
        Self::new(queue, registry, config.process_id).with_job_timeout(config.job_timeout)
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn CompletionNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_job_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.job_timeout = timeout;
        self
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    /// Runs the next eligible job, if the run slot is free
    ///
    /// Busy and empty queues are normal outcomes, not errors. Callback
    /// failures end up on the job; only store failures are returned.
    ///
    /// The launch itself runs on a spawned task. Dropping the returned future
    /// detaches it: the job still reaches a terminal state and both launch
    /// locks are released.
    #[instrument(skip(self), fields(pid = self.process_id))]
    pub async fn launch(&self) -> Result<LaunchOutcome> {
        let Ok(guard) = self.launch_guard.clone().try_lock_owned() else {
            debug!("Another launch is in progress in this process");
            return Ok(LaunchOutcome::Busy);
        };

        let runner = self.clone();
        let task = tokio::spawn(
            async move {
                let outcome = runner.launch_locked().await;
                drop(guard);
                outcome
            }
            .in_current_span(),
        );

        match task.await {
            Ok(outcome) => outcome,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => Err(QueueError::Interrupted(e.to_string())),
        }
    }

    async fn launch_locked(&self) -> Result<LaunchOutcome> {
        let store = self.queue.store();
        if !store.try_lock_launch().await? {
            debug!("Another process holds the launch lock");
            return Ok(LaunchOutcome::Busy);
        }

        let outcome = self.launch_next().await;

        if let Err(e) = store.unlock_launch().await {
            warn!("Failed to release launch lock: {}", e);
        }

        outcome
    }

    async fn launch_next(&self) -> Result<LaunchOutcome> {
        let report = self.queue.reconcile().await?;
        if !report.orphaned.is_empty() {
            info!("Recovered {} orphaned job(s)", report.orphaned.len());
        }

        if self.queue.has_active_run().await? {
            debug!("A job is still running, not starting another");
            return Ok(LaunchOutcome::Busy);
        }

        let Some(job) = self.queue.next_eligible().await? else {
            debug!("No waiting jobs");
            return Ok(LaunchOutcome::Idle);
        };

        let store = self.queue.store();
        let clock = self.queue.clock();

        // Persisted before the callback runs so a crash from here on is
        // visible to the next reconcile
        let claim = JobPatch::running(clock.now(), self.process_id);
        if !store.update_if_waiting(job.id, &claim).await? {
            warn!(job_id = %job.id, "Job was claimed or cancelled by someone else");
            return Ok(LaunchOutcome::Contended(job.id));
        }

        info!(
            job_id = %job.id,
            name = %job.name,
            module = %job.module,
            priority = job.priority,
            "Job started"
        );

        let patch = match self.invoke(&job).await {
            Ok(()) => {
                info!(job_id = %job.id, "Job completed");
                JobPatch::completed(clock.now())
            }
            Err(message) => {
                warn!(job_id = %job.id, error = %message, "Job failed");
                JobPatch::failed(clock.now(), message)
            }
        };
        let status = patch.status.unwrap_or(JobStatus::Error);

        store
            .update_fields(job.id, &patch)
            .await
            .map_err(QueueError::from_store)?;

        self.notify_owner(job.id).await;

        Ok(LaunchOutcome::Finished {
            job_id: job.id,
            status,
        })
    }

    /// Runs the job's callback and renders any failure as the error message
    async fn invoke(&self, job: &Job) -> std::result::Result<(), String> {
        let Some(handler) = self.registry.get(&job.callback) else {
            return Err(format!(
                "no handler registered for callback '{}'",
                job.callback
            ));
        };

        let mut call_args = job.arguments.clone();
        call_args.push(job.id.to_string());
        info!("Calling: {}({})", job.callback, call_args.join(", "));

        let arguments = job.arguments.clone();
        let job_id = job.id;
        let mut task = tokio::spawn(async move { handler.run(arguments, job_id).await });

        let joined = match self.job_timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut task).await {
                Ok(joined) => joined,
                Err(_) => {
                    task.abort();
                    return Err(format!("Job exceeded timeout of {limit:?}."));
                }
            },
            None => task.await,
        };

        match joined {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(format!("{e:#}")),
            Err(e) if e.is_panic() => Err(format!(
                "callback panicked: {}",
                panic_message(e.into_panic())
            )),
            Err(e) => Err(format!("callback task failed: {e}")),
        }
    }

    async fn notify_owner(&self, job_id: JobId) {
        let job = match self.queue.store().get(job_id).await {
            Ok(job) => job,
            Err(e) => {
                warn!(job_id = %job_id, "Cannot load job for notification: {}", e);
                return;
            }
        };

        if let Err(e) = self.notifier.notify(&job).await {
            warn!(job_id = %job_id, owner = %job.owner, "Completion notification failed: {:#}", e);
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::liveness::StaticLiveness;
    use crate::repository::{JobStore, MemoryJobStore};
    use crate::service::queue::ORPHANED_JOB_MESSAGE;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use jobslot_core::dto::job::{JobFilter, JobOrder, NewJob};
    use std::sync::Mutex as StdMutex;
    use tokio::sync::oneshot;

    const PID: u32 = 31337;

    struct Fixture {
        store: Arc<MemoryJobStore>,
        liveness: Arc<StaticLiveness>,
        clock: Arc<ManualClock>,
        queue: JobQueue,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryJobStore::new());
        let liveness = Arc::new(StaticLiveness::default());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 6, 10, 3, 0, 0).unwrap(),
        ));
        liveness.set_alive(PID);
        let queue = JobQueue::new(store.clone(), liveness.clone(), clock.clone());
        Fixture {
            store,
            liveness,
            clock,
            queue,
        }
    }

    fn runner(f: &Fixture, registry: CallbackRegistry) -> JobRunner {
        JobRunner::new(f.queue.clone(), Arc::new(registry), PID)
    }

    async fn submit(f: &Fixture, callback: &str, args: &[&str], priority: i32) -> JobId {
        let req = NewJob::new("job", "tests", callback, "1")
            .with_arguments(args.iter().copied())
            .with_priority(priority);
        f.store.insert(req, f.clock.now()).await.unwrap()
    }

    #[derive(Default)]
    struct RecordingNotifier {
        seen: StdMutex<Vec<(JobId, JobStatus)>>,
    }

    #[async_trait]
    impl CompletionNotifier for RecordingNotifier {
        async fn notify(&self, job: &Job) -> anyhow::Result<()> {
            self.seen.lock().unwrap().push((job.id, job.status));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_launch_runs_callback_with_trailing_job_id() {
        let f = fixture();
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let mut registry = CallbackRegistry::new();
        {
            let seen = seen.clone();
            registry.register_fn("load", move |args, job_id| {
                let seen = seen.clone();
                async move {
                    seen.lock().unwrap().push((args, job_id));
                    anyhow::Ok(())
                }
            });
        }

        let id = submit(&f, "load", &["genome.fa", "v2"], 10).await;
        let outcome = runner(&f, registry).launch().await.unwrap();

        assert_eq!(
            outcome,
            LaunchOutcome::Finished {
                job_id: id,
                status: JobStatus::Completed
            }
        );
        assert_eq!(
            *seen.lock().unwrap(),
            vec![(vec!["genome.fa".to_string(), "v2".to_string()], id)]
        );

        let job = f.store.get(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        assert_eq!(job.process_id, Some(PID));
        assert_eq!(job.started_at, Some(f.clock.now()));
        assert_eq!(job.ended_at, Some(f.clock.now()));
        assert!(job.error_message.is_none());
    }

    #[tokio::test]
    async fn test_launch_idle_when_queue_empty() {
        let f = fixture();
        let outcome = runner(&f, CallbackRegistry::new()).launch().await.unwrap();
        assert_eq!(outcome, LaunchOutcome::Idle);
    }

    #[tokio::test]
    async fn test_launch_processes_one_job_per_call_in_queue_order() {
        let f = fixture();
        let order = Arc::new(StdMutex::new(Vec::new()));
        let mut registry = CallbackRegistry::new();
        {
            let order = order.clone();
            registry.register_fn("step", move |_, job_id| {
                let order = order.clone();
                async move {
                    order.lock().unwrap().push(job_id);
                    anyhow::Ok(())
                }
            });
        }
        let runner = runner(&f, registry);

        let a = submit(&f, "step", &[], 5).await;
        let b = submit(&f, "step", &[], 1).await;
        let c = submit(&f, "step", &[], 1).await;

        runner.launch().await.unwrap();
        assert_eq!(*order.lock().unwrap(), vec![b]);
        assert_eq!(f.store.get(c).await.unwrap().status, JobStatus::Waiting);

        runner.launch().await.unwrap();
        runner.launch().await.unwrap();
        assert_eq!(runner.launch().await.unwrap(), LaunchOutcome::Idle);
        assert_eq!(*order.lock().unwrap(), vec![b, c, a]);
    }

    #[tokio::test]
    async fn test_callback_failure_is_recorded_not_raised() {
        let f = fixture();
        let mut registry = CallbackRegistry::new();
        registry.register_fn("broken", |_, _| async {
            Err::<(), _>(anyhow::anyhow!("disk full").context("writing index"))
        });

        let id = submit(&f, "broken", &[], 10).await;
        let runner = runner(&f, registry);
        let outcome = runner.launch().await.unwrap();
        assert_eq!(
            outcome,
            LaunchOutcome::Finished {
                job_id: id,
                status: JobStatus::Error
            }
        );

        let job = f.store.get(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert_eq!(job.error_message.as_deref(), Some("writing index: disk full"));
        assert!(job.ended_at.is_some());

        // The runner keeps working after a failure
        let next = submit(&f, "broken", &[], 10).await;
        assert!(matches!(
            runner.launch().await.unwrap(),
            LaunchOutcome::Finished { job_id, .. } if job_id == next
        ));
    }

    #[tokio::test]
    async fn test_callback_panic_is_recorded() {
        let f = fixture();
        let mut registry = CallbackRegistry::new();
        registry.register_fn("panics", |_, _| async {
            if true {
                panic!("index out of bounds");
            }
            anyhow::Ok(())
        });

        let id = submit(&f, "panics", &[], 10).await;
        runner(&f, registry).launch().await.unwrap();

        let job = f.store.get(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert_eq!(
            job.error_message.as_deref(),
            Some("callback panicked: index out of bounds")
        );
    }

    #[tokio::test]
    async fn test_unknown_callback_fails_job() {
        let f = fixture();
        let id = submit(&f, "nope", &[], 10).await;
        runner(&f, CallbackRegistry::new()).launch().await.unwrap();

        let job = f.store.get(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert_eq!(
            job.error_message.as_deref(),
            Some("no handler registered for callback 'nope'")
        );
    }

    #[tokio::test]
    async fn test_launch_is_noop_while_live_job_running() {
        let f = fixture();
        let running = submit(&f, "load", &[], 10).await;
        f.store
            .update_if_waiting(running, &JobPatch::running(f.clock.now(), 500))
            .await
            .unwrap();
        f.liveness.set_alive(500);
        let waiting = submit(&f, "load", &[], 1).await;

        let before = f
            .store
            .query(&JobFilter::all(), JobOrder::Queue)
            .await
            .unwrap();

        let runner = runner(&f, CallbackRegistry::new());
        assert_eq!(runner.launch().await.unwrap(), LaunchOutcome::Busy);
        assert_eq!(runner.launch().await.unwrap(), LaunchOutcome::Busy);

        let after = f
            .store
            .query(&JobFilter::all(), JobOrder::Queue)
            .await
            .unwrap();
        assert_eq!(before, after);
        assert_eq!(f.store.get(waiting).await.unwrap().status, JobStatus::Waiting);
    }

    #[tokio::test]
    async fn test_launch_recovers_orphan_then_runs_next() {
        let f = fixture();
        let mut registry = CallbackRegistry::new();
        registry.register_fn("load", |_, _| async { anyhow::Ok(()) });

        let orphan = submit(&f, "load", &[], 10).await;
        f.store
            .update_if_waiting(orphan, &JobPatch::running(f.clock.now(), 600))
            .await
            .unwrap();
        let next = submit(&f, "load", &[], 10).await;

        let outcome = runner(&f, registry).launch().await.unwrap();
        assert_eq!(
            outcome,
            LaunchOutcome::Finished {
                job_id: next,
                status: JobStatus::Completed
            }
        );

        let orphan = f.store.get(orphan).await.unwrap();
        assert_eq!(orphan.status, JobStatus::Error);
        assert_eq!(orphan.error_message.as_deref(), Some(ORPHANED_JOB_MESSAGE));
    }

    #[tokio::test]
    async fn test_overlapping_launch_is_busy() {
        let f = fixture();
        let (started_tx, started_rx) = oneshot::channel::<()>();
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let started_tx = Arc::new(StdMutex::new(Some(started_tx)));
        let release_rx = Arc::new(tokio::sync::Mutex::new(Some(release_rx)));

        let mut registry = CallbackRegistry::new();
        {
            let started_tx = started_tx.clone();
            let release_rx = release_rx.clone();
            registry.register_fn("block", move |_, _| {
                let started_tx = started_tx.clone();
                let release_rx = release_rx.clone();
                async move {
                    if let Some(tx) = started_tx.lock().unwrap().take() {
                        let _ = tx.send(());
                    }
                    if let Some(rx) = release_rx.lock().await.take() {
                        let _ = rx.await;
                    }
                    anyhow::Ok(())
                }
            });
        }

        let first = submit(&f, "block", &[], 10).await;
        let second = submit(&f, "block", &[], 10).await;
        let runner = Arc::new(runner(&f, registry));

        let in_flight = {
            let runner = runner.clone();
            tokio::spawn(async move { runner.launch().await })
        };
        started_rx.await.unwrap();

        assert_eq!(runner.launch().await.unwrap(), LaunchOutcome::Busy);
        assert_eq!(f.store.get(first).await.unwrap().status, JobStatus::Running);
        assert_eq!(f.store.get(second).await.unwrap().status, JobStatus::Waiting);

        release_tx.send(()).unwrap();
        let outcome = in_flight.await.unwrap().unwrap();
        assert_eq!(
            outcome,
            LaunchOutcome::Finished {
                job_id: first,
                status: JobStatus::Completed
            }
        );
        assert_eq!(f.store.get(second).await.unwrap().status, JobStatus::Waiting);
    }

    #[tokio::test]
    async fn test_dropped_launch_still_finishes_job_and_releases_locks() {
        let f = fixture();
        let (started_tx, started_rx) = oneshot::channel::<()>();
        let started_tx = Arc::new(StdMutex::new(Some(started_tx)));

        let mut registry = CallbackRegistry::new();
        {
            let started_tx = started_tx.clone();
            registry.register_fn("work", move |_, _| {
                let started_tx = started_tx.clone();
                async move {
                    if let Some(tx) = started_tx.lock().unwrap().take() {
                        let _ = tx.send(());
                    }
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    anyhow::Ok(())
                }
            });
        }

        let first = submit(&f, "work", &[], 1).await;
        let second = submit(&f, "work", &[], 2).await;
        let runner = Arc::new(runner(&f, registry));

        let caller = {
            let runner = runner.clone();
            tokio::spawn(async move { runner.launch().await })
        };
        started_rx.await.unwrap();
        caller.abort();
        assert!(caller.await.unwrap_err().is_cancelled());

        // Later launches are Busy only until the detached run finishes
        let next = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match runner.launch().await.unwrap() {
                    LaunchOutcome::Busy => tokio::time::sleep(Duration::from_millis(10)).await,
                    other => break other,
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(
            next,
            LaunchOutcome::Finished {
                job_id: second,
                status: JobStatus::Completed
            }
        );

        let job = f.store.get(first).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        assert!(job.ended_at.is_some());

        assert!(f.store.try_lock_launch().await.unwrap());
        f.store.unlock_launch().await.unwrap();
    }

    #[tokio::test]
    async fn test_store_launch_lock_held_elsewhere_is_busy() {
        let f = fixture();
        submit(&f, "load", &[], 10).await;
        assert!(f.store.try_lock_launch().await.unwrap());

        let runner = runner(&f, CallbackRegistry::new());
        assert_eq!(runner.launch().await.unwrap(), LaunchOutcome::Busy);

        f.store.unlock_launch().await.unwrap();
        assert!(matches!(
            runner.launch().await.unwrap(),
            LaunchOutcome::Finished { .. }
        ));
    }

    #[tokio::test]
    async fn test_job_timeout_marks_error() {
        let f = fixture();
        let mut registry = CallbackRegistry::new();
        registry.register_fn("slow", |_, _| async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            anyhow::Ok(())
        });

        let id = submit(&f, "slow", &[], 10).await;
        let runner = runner(&f, registry).with_job_timeout(Some(Duration::from_millis(20)));
        runner.launch().await.unwrap();

        let job = f.store.get(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert_eq!(job.error_message.as_deref(), Some("Job exceeded timeout of 20ms."));
    }

    #[tokio::test]
    async fn test_notifier_sees_terminal_job() {
        let f = fixture();
        let mut registry = CallbackRegistry::new();
        registry.register_fn("load", |_, _| async { anyhow::Ok(()) });
        let notifier = Arc::new(RecordingNotifier::default());

        let id = submit(&f, "load", &[], 10).await;
        runner(&f, registry)
            .with_notifier(notifier.clone())
            .launch()
            .await
            .unwrap();

        assert_eq!(
            *notifier.seen.lock().unwrap(),
            vec![(id, JobStatus::Completed)]
        );
    }
}
