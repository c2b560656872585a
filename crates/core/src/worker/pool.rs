//! Worker pool: claims jobs, runs processors, applies retry/backoff.
//!
//! A fixed number of worker loops pull from the job store. Each claimed job
//! runs one attempt inside an isolated workspace under a hard timeout; a
//! retryable failure re-enqueues the job with exponential backoff until the
//! attempt budget is exhausted.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::config::{ToolsConfig, WorkerConfig};
use crate::dispatch::{dispatch, ConversionPlan};
use crate::job::{Job, JobError, JobResultData, JobStore};
use crate::metrics;
use crate::processor::{
    processor_for, JobWorkspace, ProcessContext, Processor, ProgressSender,
};

use super::backoff::backoff_delay;
use super::limiter::StartRateLimiter;

/// Slack on the outer attempt timeout so the tool runner's own timeout
/// (which kills the subprocess and reports cleanly) usually fires first.
const ATTEMPT_TIMEOUT_GRACE: Duration = Duration::from_secs(1);

/// Builds the processor for a dispatched plan. Swappable so tests can run
/// the pool against mock processors.
pub type ProcessorFactory =
    Arc<dyn Fn(&ConversionPlan, &ToolsConfig) -> Box<dyn Processor> + Send + Sync>;

/// Current status of the worker pool.
#[derive(Debug, Clone, serde::Serialize)]
pub struct WorkerPoolStatus {
    pub running: bool,
    pub concurrency: usize,
}

struct Shared {
    config: WorkerConfig,
    tools: ToolsConfig,
    store: Arc<dyn JobStore>,
    /// Parent directory for per-attempt workspaces.
    work_root: PathBuf,
    /// Where completed outputs are moved for download.
    results_dir: PathBuf,
    factory: ProcessorFactory,
    limiter: StartRateLimiter,
    running: AtomicBool,
}

/// The conversion worker pool.
pub struct WorkerPool {
    shared: Arc<Shared>,
    shutdown_tx: broadcast::Sender<()>,
}

impl WorkerPool {
    pub fn new(
        config: WorkerConfig,
        tools: ToolsConfig,
        store: Arc<dyn JobStore>,
        work_root: PathBuf,
        results_dir: PathBuf,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let limiter = StartRateLimiter::new(config.starts_per_minute);

        Self {
            shared: Arc::new(Shared {
                config,
                tools,
                store,
                work_root,
                results_dir,
                factory: Arc::new(|plan, tools| processor_for(plan, tools)),
                limiter,
                running: AtomicBool::new(false),
            }),
            shutdown_tx,
        }
    }

    /// Replace the processor factory (tests inject mock processors here).
    pub fn with_factory(mut self, factory: ProcessorFactory) -> Self {
        let shared = Arc::get_mut(&mut self.shared)
            .expect("with_factory must be called before start()");
        shared.factory = factory;
        self
    }

    /// Start the worker loops.
    pub fn start(&self) {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            warn!("Worker pool already running");
            return;
        }

        info!(
            concurrency = self.shared.config.concurrency,
            starts_per_minute = self.shared.config.starts_per_minute,
            "Starting worker pool"
        );
        metrics::WORKER_POOL_RUNNING.set(1);

        for worker_id in 0..self.shared.config.concurrency {
            let shared = Arc::clone(&self.shared);
            let mut shutdown_rx = self.shutdown_tx.subscribe();

            tokio::spawn(async move {
                debug!(worker_id, "Worker started");
                loop {
                    tokio::select! {
                        _ = shutdown_rx.recv() => {
                            debug!(worker_id, "Worker received shutdown signal");
                            break;
                        }
                        _ = tokio::time::sleep(Duration::from_millis(shared.config.poll_interval_ms)) => {
                            if !shared.running.load(Ordering::Relaxed) {
                                break;
                            }
                            // Drain eagerly: keep claiming until the queue is
                            // empty or the start-rate ceiling kicks in.
                            loop {
                                match Self::process_one(&shared).await {
                                    Ok(true) => continue,
                                    Ok(false) => break,
                                    Err(e) => {
                                        warn!(worker_id, "Worker claim error: {}", e);
                                        break;
                                    }
                                }
                            }
                        }
                    }
                }
                debug!(worker_id, "Worker stopped");
            });
        }
    }

    /// Stop the pool gracefully. Workers finish their current attempt.
    pub async fn stop(&self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            warn!("Worker pool not running");
            return;
        }

        info!("Stopping worker pool");
        metrics::WORKER_POOL_RUNNING.set(0);
        let _ = self.shutdown_tx.send(());

        // Give workers a moment to notice the signal.
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    pub fn status(&self) -> WorkerPoolStatus {
        WorkerPoolStatus {
            running: self.shared.running.load(Ordering::Relaxed),
            concurrency: self.shared.config.concurrency,
        }
    }

    /// Claim and run at most one job. Returns whether a job was processed.
    async fn process_one(shared: &Arc<Shared>) -> Result<bool, JobError> {
        if !shared.limiter.try_acquire() {
            return Ok(false);
        }

        let Some(job) = shared.store.claim_next()? else {
            // Queue was empty; the start token was speculative.
            shared.limiter.refund();
            return Ok(false);
        };

        Self::run_attempt(shared, job).await;
        Ok(true)
    }

    /// Run a single attempt for a claimed job and settle its outcome.
    async fn run_attempt(shared: &Arc<Shared>, job: Job) {
        let plan = match dispatch(&job.input.source_format, &job.target_format) {
            Ok(plan) => plan,
            Err(e) => {
                // Pairs are validated at admission; reaching this means the
                // dispatch tables shrank under a queued job. Never retryable.
                warn!(job_id = %job.id, "Claimed job has unsupported pair: {}", e);
                if let Err(store_err) = shared.store.fail(&job.id, &e.to_string()) {
                    error!(job_id = %job.id, "Failed to record failure: {}", store_err);
                }
                metrics::JOBS_FAILED
                    .with_label_values(&["unknown", job.tier.as_str(), "terminal"])
                    .inc();
                Self::cleanup_upload(&job);
                return;
            }
        };

        let family = plan.family();
        metrics::JOBS_STARTED
            .with_label_values(&[family, job.tier.as_str()])
            .inc();
        info!(
            job_id = %job.id,
            family,
            attempt = job.attempt,
            source = %job.input.source_format,
            target = %job.target_format,
            "Starting conversion attempt"
        );

        let workspace = match JobWorkspace::new(&shared.work_root, &job.id) {
            Ok(workspace) => workspace,
            Err(e) => {
                Self::settle_failure(shared, &job, family, true, &format!("workspace setup failed: {}", e));
                return;
            }
        };

        // Progress flows over a channel and is persisted by a forwarder task;
        // the store serializes per-job updates.
        let (progress_tx, mut progress_rx) = mpsc::channel::<u8>(32);
        let forwarder_store = Arc::clone(&shared.store);
        let forwarder_job_id = job.id.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(percent) = progress_rx.recv().await {
                if let Err(e) = forwarder_store.update_progress(&forwarder_job_id, percent) {
                    debug!(job_id = %forwarder_job_id, "Progress update dropped: {}", e);
                }
            }
        });

        let attempt_timeout = Duration::from_secs(shared.config.attempt_timeout_secs);
        let ctx = ProcessContext {
            input_path: job.input.stored_path.clone(),
            original_filename: job.input.original_filename.clone(),
            source_format: job.input.source_format.clone(),
            work_dir: workspace.path().to_path_buf(),
            options: job.options.clone(),
            timeout: attempt_timeout,
            progress: ProgressSender::new(progress_tx),
        };

        let processor = (shared.factory)(&plan, &shared.tools);
        let started = Instant::now();
        let outcome = timeout(attempt_timeout + ATTEMPT_TIMEOUT_GRACE, processor.process(&ctx)).await;

        // Close the progress channel so the forwarder drains and exits.
        drop(ctx);
        let _ = forwarder.await;

        match outcome {
            Ok(Ok(output)) => {
                match Self::persist_output(&shared.results_dir, &job, &output.output_path) {
                    Ok(final_path) => {
                        let result = JobResultData {
                            output_path: final_path,
                            filename: output.filename,
                            mime_type: output.mime_type,
                            size_bytes: output.size_bytes,
                        };
                        if let Err(e) = shared.store.complete(&job.id, result) {
                            error!(job_id = %job.id, "Failed to record completion: {}", e);
                            return;
                        }
                        metrics::JOBS_COMPLETED
                            .with_label_values(&[family, job.tier.as_str()])
                            .inc();
                        metrics::JOB_DURATION
                            .with_label_values(&[family])
                            .observe(started.elapsed().as_secs_f64());
                        info!(
                            job_id = %job.id,
                            duration_ms = started.elapsed().as_millis() as u64,
                            "Conversion completed"
                        );
                        Self::cleanup_upload(&job);
                    }
                    Err(e) => {
                        Self::settle_failure(shared, &job, family, true, &format!("failed to persist output: {}", e));
                    }
                }
            }
            Ok(Err(e)) => {
                // Tool stderr stays server-side; clients only see the
                // classified reason.
                if let crate::processor::ProcessorError::Tool(
                    crate::exec::ToolError::NonZeroExit { stderr, .. },
                ) = &e
                {
                    warn!(job_id = %job.id, stderr = %stderr, "Converter diagnostics");
                }
                Self::settle_failure(shared, &job, family, e.is_retryable(), &e.to_string());
            }
            Err(_) => {
                // The processor future was dropped; any subprocess dies via
                // kill_on_drop and the workspace guard removes the scratch dir.
                Self::settle_failure(
                    shared,
                    &job,
                    family,
                    true,
                    &format!("attempt timed out after {}s", attempt_timeout.as_secs()),
                );
            }
        }
        // workspace drops here, removing the attempt's temp directory
    }

    /// Move a produced output out of the doomed workspace into the results
    /// directory, one subdirectory per job.
    fn persist_output(
        results_dir: &Path,
        job: &Job,
        produced: &Path,
    ) -> Result<PathBuf, std::io::Error> {
        let job_dir = results_dir.join(&job.id);
        std::fs::create_dir_all(&job_dir)?;

        let file_name = produced
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "output".into());
        let dest = job_dir.join(file_name);

        // rename fails across filesystems; fall back to copy + remove.
        if std::fs::rename(produced, &dest).is_err() {
            std::fs::copy(produced, &dest)?;
            let _ = std::fs::remove_file(produced);
        }

        Ok(dest)
    }

    /// Record a failed attempt: requeue with backoff while the attempt budget
    /// lasts and the error is retryable, otherwise fail terminally.
    fn settle_failure(shared: &Arc<Shared>, job: &Job, family: &str, retryable: bool, reason: &str) {
        if retryable && job.attempt < shared.config.max_attempts {
            let delay = backoff_delay(
                job.attempt,
                Duration::from_secs(shared.config.backoff_base_secs),
                Duration::from_secs(shared.config.backoff_max_secs),
            );
            let not_before = Utc::now()
                + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::seconds(60));

            warn!(
                job_id = %job.id,
                attempt = job.attempt,
                delay_ms = delay.as_millis() as u64,
                reason,
                "Attempt failed, requeueing with backoff"
            );

            if let Err(e) = shared.store.requeue(&job.id, reason, not_before) {
                error!(job_id = %job.id, "Failed to requeue: {}", e);
            }
            metrics::JOBS_FAILED
                .with_label_values(&[family, job.tier.as_str(), "retried"])
                .inc();
        } else {
            warn!(
                job_id = %job.id,
                attempt = job.attempt,
                retryable,
                reason,
                "Job failed terminally"
            );

            if let Err(e) = shared.store.fail(&job.id, reason) {
                error!(job_id = %job.id, "Failed to record failure: {}", e);
            }
            metrics::JOBS_FAILED
                .with_label_values(&[family, job.tier.as_str(), "terminal"])
                .inc();
            Self::cleanup_upload(job);
        }
    }

    /// Remove the staged upload once the job is terminal.
    fn cleanup_upload(job: &Job) {
        if let Err(e) = std::fs::remove_file(&job.input.stored_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                debug!(job_id = %job.id, "Failed to remove staged upload: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::Tier;
    use crate::job::{ConversionOptions, JobInput, JobState, MemoryJobStore, NewJob};
    use crate::processor::{ProcessorError, ProcessorOutput};
    use async_trait::async_trait;

    #[derive(Clone, Copy)]
    enum MockBehavior {
        Succeed,
        FailRetryable,
        FailTerminal,
        /// Report progress, then sleep before succeeding.
        Slow(Duration),
        /// Sleep forever (the attempt timeout has to reap it).
        Hang,
    }

    struct MockProcessor {
        behavior: MockBehavior,
    }

    #[async_trait]
    impl Processor for MockProcessor {
        fn name(&self) -> &str {
            "mock"
        }

        async fn process(&self, ctx: &ProcessContext) -> Result<ProcessorOutput, ProcessorError> {
            match self.behavior {
                MockBehavior::Succeed => {}
                MockBehavior::FailRetryable => {
                    return Err(ProcessorError::OutputMissing {
                        expected: ctx.work_dir.join("missing"),
                    });
                }
                MockBehavior::FailTerminal => {
                    return Err(ProcessorError::Unsupported {
                        reason: "mock terminal failure".to_string(),
                    });
                }
                MockBehavior::Slow(duration) => {
                    ctx.progress.report(42);
                    tokio::time::sleep(duration).await;
                }
                MockBehavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                }
            }

            let output_path = ctx.work_dir.join("converted.mp3");
            std::fs::write(&output_path, b"fake mp3 bytes").unwrap();
            ProcessorOutput::from_file(&output_path, "converted.mp3".to_string())
        }
    }

    fn mock_factory(behavior: MockBehavior) -> ProcessorFactory {
        Arc::new(move |_plan, _tools| Box::new(MockProcessor { behavior }))
    }

    fn test_job(dir: &Path) -> NewJob {
        let input_path = dir.join(format!("{}.wav", uuid::Uuid::new_v4()));
        std::fs::write(&input_path, b"fake wav").unwrap();
        NewJob {
            owner: "1.2.3.4".to_string(),
            tier: Tier::Anonymous,
            input: JobInput {
                stored_path: input_path,
                original_filename: "song.wav".to_string(),
                source_format: "wav".to_string(),
            },
            target_format: "mp3".to_string(),
            options: ConversionOptions::default(),
        }
    }

    struct TestRig {
        store: Arc<MemoryJobStore>,
        pool: WorkerPool,
        _dirs: tempfile::TempDir,
        uploads: PathBuf,
        work_root: PathBuf,
    }

    fn rig(behavior: MockBehavior, config: WorkerConfig) -> TestRig {
        let dirs = tempfile::tempdir().unwrap();
        let uploads = dirs.path().join("uploads");
        let work_root = dirs.path().join("work");
        let results = dirs.path().join("results");
        std::fs::create_dir_all(&uploads).unwrap();

        let store = Arc::new(MemoryJobStore::new());
        let pool = WorkerPool::new(
            config,
            ToolsConfig::default(),
            Arc::clone(&store) as Arc<dyn JobStore>,
            work_root.clone(),
            results,
        )
        .with_factory(mock_factory(behavior));

        TestRig {
            store,
            pool,
            _dirs: dirs,
            uploads,
            work_root,
        }
    }

    fn fast_config() -> WorkerConfig {
        WorkerConfig {
            concurrency: 2,
            poll_interval_ms: 10,
            max_attempts: 3,
            attempt_timeout_secs: 30,
            backoff_base_secs: 0,
            backoff_max_secs: 0,
            starts_per_minute: 10_000,
        }
    }

    async fn wait_for_terminal(store: &MemoryJobStore, id: &str) -> Job {
        for _ in 0..500 {
            let job = store.get(id).unwrap().unwrap();
            if job.state.is_terminal() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {} never reached a terminal state", id);
    }

    #[tokio::test]
    async fn test_job_completes() {
        let rig = rig(MockBehavior::Succeed, fast_config());
        let job = rig.store.enqueue(test_job(&rig.uploads)).unwrap();

        rig.pool.start();
        let finished = wait_for_terminal(&rig.store, &job.id).await;
        rig.pool.stop().await;

        assert_eq!(finished.state, JobState::Completed);
        assert_eq!(finished.progress, 100);
        assert_eq!(finished.attempt, 1);

        let result = finished.result.unwrap();
        assert_eq!(result.filename, "converted.mp3");
        assert_eq!(result.mime_type, "audio/mpeg");
        assert!(result.output_path.exists());
        // Output was moved out of the workspace into the results dir.
        assert!(!result.output_path.starts_with(&rig.work_root));
    }

    #[tokio::test]
    async fn test_workspace_removed_after_terminal_state() {
        let rig = rig(MockBehavior::Succeed, fast_config());
        let job = rig.store.enqueue(test_job(&rig.uploads)).unwrap();

        rig.pool.start();
        wait_for_terminal(&rig.store, &job.id).await;
        rig.pool.stop().await;

        let leftovers: Vec<_> = std::fs::read_dir(&rig.work_root)
            .map(|entries| entries.flatten().collect())
            .unwrap_or_default();
        assert!(leftovers.is_empty(), "workspace not cleaned: {:?}", leftovers);
    }

    #[tokio::test]
    async fn test_staged_upload_removed_after_completion() {
        let rig = rig(MockBehavior::Succeed, fast_config());
        let new_job = test_job(&rig.uploads);
        let staged = new_job.input.stored_path.clone();
        let job = rig.store.enqueue(new_job).unwrap();

        rig.pool.start();
        wait_for_terminal(&rig.store, &job.id).await;
        rig.pool.stop().await;

        assert!(!staged.exists());
    }

    #[tokio::test]
    async fn test_retryable_failure_exhausts_attempts() {
        let mut config = fast_config();
        config.max_attempts = 2;
        let rig = rig(MockBehavior::FailRetryable, config);
        let job = rig.store.enqueue(test_job(&rig.uploads)).unwrap();

        rig.pool.start();
        let finished = wait_for_terminal(&rig.store, &job.id).await;
        rig.pool.stop().await;

        assert_eq!(finished.state, JobState::Failed);
        assert_eq!(finished.attempt, 2);
        assert!(finished
            .failure_reason
            .unwrap()
            .contains("produced no output"));
    }

    #[tokio::test]
    async fn test_terminal_failure_is_not_retried() {
        let rig = rig(MockBehavior::FailTerminal, fast_config());
        let job = rig.store.enqueue(test_job(&rig.uploads)).unwrap();

        rig.pool.start();
        let finished = wait_for_terminal(&rig.store, &job.id).await;
        rig.pool.stop().await;

        assert_eq!(finished.state, JobState::Failed);
        assert_eq!(finished.attempt, 1);
    }

    #[tokio::test]
    async fn test_timeout_is_retryable() {
        let mut config = fast_config();
        config.attempt_timeout_secs = 1;
        config.max_attempts = 1;
        let rig = rig(MockBehavior::Hang, config);
        let job = rig.store.enqueue(test_job(&rig.uploads)).unwrap();

        rig.pool.start();
        let finished = wait_for_terminal(&rig.store, &job.id).await;
        rig.pool.stop().await;

        assert_eq!(finished.state, JobState::Failed);
        assert!(finished.failure_reason.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_active_jobs_never_exceed_concurrency() {
        let mut config = fast_config();
        config.concurrency = 2;
        let rig = rig(MockBehavior::Slow(Duration::from_millis(200)), config);

        let mut ids = Vec::new();
        for _ in 0..5 {
            ids.push(rig.store.enqueue(test_job(&rig.uploads)).unwrap().id);
        }

        rig.pool.start();

        let mut max_active = 0;
        loop {
            let counts = rig.store.counts().unwrap();
            max_active = max_active.max(counts.active);
            if counts.completed + counts.failed == ids.len() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        rig.pool.stop().await;

        assert!(max_active <= 2, "observed {} active jobs", max_active);
        for id in &ids {
            assert_eq!(
                rig.store.get(id).unwrap().unwrap().state,
                JobState::Completed
            );
        }
    }

    #[tokio::test]
    async fn test_progress_visible_while_active() {
        let rig = rig(MockBehavior::Slow(Duration::from_millis(500)), fast_config());
        let job = rig.store.enqueue(test_job(&rig.uploads)).unwrap();

        rig.pool.start();

        let mut saw_midflight_progress = false;
        for _ in 0..200 {
            let current = rig.store.get(&job.id).unwrap().unwrap();
            if current.state == JobState::Active && current.progress == 42 {
                saw_midflight_progress = true;
                break;
            }
            if current.state.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        wait_for_terminal(&rig.store, &job.id).await;
        rig.pool.stop().await;

        assert!(saw_midflight_progress);
    }

    #[tokio::test]
    async fn test_start_rate_ceiling_holds_back_second_job() {
        let mut config = fast_config();
        // One start per minute: the bucket holds a single initial token.
        config.starts_per_minute = 1;
        let rig = rig(MockBehavior::Succeed, config);

        let first = rig.store.enqueue(test_job(&rig.uploads)).unwrap();
        let second = rig.store.enqueue(test_job(&rig.uploads)).unwrap();

        rig.pool.start();
        wait_for_terminal(&rig.store, &first.id).await;
        tokio::time::sleep(Duration::from_millis(300)).await;
        rig.pool.stop().await;

        // The second job cannot start until a token refills (a minute away).
        let second = rig.store.get(&second.id).unwrap().unwrap();
        assert_eq!(second.state, JobState::Queued);
    }

    #[tokio::test]
    async fn test_stop_prevents_new_claims() {
        let rig = rig(MockBehavior::Succeed, fast_config());

        rig.pool.start();
        rig.pool.stop().await;

        let job = rig.store.enqueue(test_job(&rig.uploads)).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let fetched = rig.store.get(&job.id).unwrap().unwrap();
        assert_eq!(fetched.state, JobState::Queued);
        assert!(!rig.pool.status().running);
    }
}
