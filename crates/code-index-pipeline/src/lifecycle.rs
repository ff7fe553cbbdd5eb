//! Startup and shutdown of the code indexer.
//!
//! Startup opens the backend in the background and races three events:
//! the backend becoming ready, process shutdown, and the startup timeout.
//! Exactly one of them decides the startup outcome, and only the winning
//! branch touches the [`IndexerHandle`]. The backend is installed and
//! `Ready` is published only when the open result wins; a backend that
//! finishes opening after the race was lost is closed by the opener.
//!
//! ```text
//! NotStarted -> Initializing -> Ready -> Closed
//!                    |-> Failed
//!                    |-> ShutdownRequested -> Closed
//!                    `-> Closed (timeout)
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use code_index_search::SearchBackend;
use code_index_storage::RepoStore;

use crate::backfill::{BackfillWalker, DEFAULT_PAGE_SIZE};
use crate::blocking::run_blocking;
use crate::consumer::IndexTaskHandler;
use crate::error::IndexerError;
use crate::graceful::GracefulManager;
use crate::handle::IndexerHandle;
use crate::queue::TaskQueue;
use crate::registry::{BackendOptions, BackendRegistry};

/// Phase of the indexer lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    NotStarted,
    Initializing,
    Ready,
    Failed,
    ShutdownRequested,
    Closed,
}

impl LifecycleState {
    /// No transition leaves a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecycleState::Failed | LifecycleState::Closed)
    }
}

#[derive(Clone)]
struct StateCell(Arc<watch::Sender<LifecycleState>>);

impl StateCell {
    fn new() -> Self {
        let (tx, _rx) = watch::channel(LifecycleState::NotStarted);
        Self(Arc::new(tx))
    }

    fn transition(&self, to: LifecycleState) -> bool {
        let changed = self.0.send_if_modified(|state| {
            if state.is_terminal() || *state == to {
                false
            } else {
                *state = to;
                true
            }
        });
        if changed {
            debug!(state = ?to, "Indexer lifecycle transition");
        }
        changed
    }

    fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.0.subscribe()
    }
}

type StartupResult = Result<Duration, IndexerError>;

/// What the opener hands to the supervisor.
struct Opened {
    backend: Arc<dyn SearchBackend>,
    created: bool,
    elapsed: Duration,
}

/// Resolves once startup has been decided.
pub struct StartupHandle {
    outcome: oneshot::Receiver<StartupResult>,
    state: watch::Receiver<LifecycleState>,
}

impl StartupHandle {
    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Receiver observing every lifecycle transition.
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.clone()
    }

    /// Wait for the startup outcome.
    ///
    /// Returns the time the backend took to open, or zero when indexing is
    /// disabled.
    pub async fn wait(self) -> StartupResult {
        self.outcome
            .await
            .unwrap_or_else(|_| Err(IndexerError::Join("startup supervisor exited".to_string())))
    }
}

/// Settings the controller acts on.
#[derive(Clone)]
pub struct LifecycleConfig {
    pub enabled: bool,
    /// Backend name in the registry
    pub backend_name: String,
    pub backend_options: BackendOptions,
    /// `None` waits for the backend forever
    pub startup_timeout: Option<Duration>,
    pub backfill_page_size: usize,
}

impl LifecycleConfig {
    pub fn new(backend_name: impl Into<String>, backend_options: BackendOptions) -> Self {
        Self {
            enabled: true,
            backend_name: backend_name.into(),
            backend_options,
            startup_timeout: None,
            backfill_page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_startup_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.startup_timeout = timeout;
        self
    }

    pub fn with_backfill_page_size(mut self, page_size: usize) -> Self {
        self.backfill_page_size = page_size;
        self
    }
}

/// Drives startup, readiness and shutdown of the indexer.
pub struct LifecycleController {
    config: LifecycleConfig,
    handle: Arc<IndexerHandle>,
    queue: Arc<TaskQueue>,
    store: Arc<dyn RepoStore>,
    registry: Arc<BackendRegistry>,
    graceful: GracefulManager,
    state: StateCell,
}

impl LifecycleController {
    pub fn new(
        config: LifecycleConfig,
        handle: Arc<IndexerHandle>,
        queue: Arc<TaskQueue>,
        store: Arc<dyn RepoStore>,
        registry: Arc<BackendRegistry>,
        graceful: GracefulManager,
    ) -> Self {
        Self {
            config,
            handle,
            queue,
            store,
            registry,
            graceful,
            state: StateCell::new(),
        }
    }

    /// Receiver observing lifecycle transitions.
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// Start the indexer. Must be called within a Tokio runtime.
    pub fn start(self: &Arc<Self>) -> Result<StartupHandle, IndexerError> {
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let startup = StartupHandle {
            outcome: outcome_rx,
            state: self.state.subscribe(),
        };

        if !self.config.enabled {
            info!("Code indexing is disabled");
            self.handle.close();
            self.state.transition(LifecycleState::Closed);
            let _ = outcome_tx.send(Ok(Duration::ZERO));
            return Ok(startup);
        }

        let handler = Arc::new(IndexTaskHandler::new(self.handle.clone(), self.store.clone()));
        self.queue.register_consumer(handler)?;

        {
            let handle = self.handle.clone();
            let state = self.state.clone();
            self.graceful.run_at_terminate(move || {
                handle.close();
                state.transition(LifecycleState::Closed);
            });
        }

        self.state.transition(LifecycleState::Initializing);

        let ctx = self.graceful.shutdown_token().child_token();
        let (result_tx, result_rx) = oneshot::channel();

        tokio::spawn(self.clone().initialize(result_tx));
        tokio::spawn(self.clone().supervise(ctx, result_rx, outcome_tx));

        Ok(startup)
    }

    async fn close_handle(&self) {
        let handle = self.handle.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || handle.close()).await {
            warn!(error = %e, "Closing the indexer panicked");
        }
    }

    async fn initialize(
        self: Arc<Self>,
        result_tx: oneshot::Sender<Result<Opened, IndexerError>>,
    ) {
        let started = Instant::now();
        let registry = self.registry.clone();
        let name = self.config.backend_name.clone();
        let options = self.config.backend_options.clone();

        info!(backend = %name, path = ?options.path, "Opening code indexer");
        let opened = run_blocking(move || registry.open(&name, &options))
            .await
            .map(|(backend, created)| Opened {
                backend,
                created,
                elapsed: started.elapsed(),
            });

        if let Err(Ok(late)) = result_tx.send(opened) {
            close_late_backend(late.backend).await;
        }
    }

    /// Install the opened backend and publish `Ready`.
    async fn install(self: &Arc<Self>, ctx: CancellationToken, opened: Opened) -> StartupResult {
        let handle = self.handle.clone();
        let backend = opened.backend;
        if let Err(e) = run_blocking(move || handle.set(backend)).await {
            warn!(error = %e, "Code indexer closed while it was being installed");
            ctx.cancel();
            self.state.transition(LifecycleState::Closed);
            return Err(IndexerError::ShutdownBeforeReady);
        }
        self.state.transition(LifecycleState::Ready);
        info!(
            elapsed_ms = opened.elapsed.as_millis() as u64,
            created = opened.created,
            "Code indexer ready"
        );

        tokio::spawn(self.clone().after_ready(ctx, opened.created));
        Ok(opened.elapsed)
    }

    async fn supervise(
        self: Arc<Self>,
        ctx: CancellationToken,
        mut result_rx: oneshot::Receiver<Result<Opened, IndexerError>>,
        outcome_tx: oneshot::Sender<StartupResult>,
    ) {
        let shutdown = self.graceful.shutdown_token();
        let timeout = self.config.startup_timeout;
        let deadline = async move {
            match timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending::<()>().await,
            }
        };

        let decided = tokio::select! {
            biased;

            result = &mut result_rx => Some(result),
            _ = shutdown.cancelled() => None,
            _ = deadline => None,
        };

        if decided.is_none() {
            // A result sent before the receiver closes is ours to release.
            result_rx.close();
            if let Ok(Ok(late)) = result_rx.try_recv() {
                close_late_backend(late.backend).await;
            }
        }

        let outcome = match decided {
            Some(Ok(Ok(opened))) => self.install(ctx, opened).await,
            Some(Ok(Err(e))) => {
                error!(error = %e, "Failed to open code indexer");
                self.fail(ctx).await;
                Err(IndexerError::BackendInit(e.to_string()))
            }
            Some(Err(_)) => {
                error!("Code indexer opener exited without a result");
                self.fail(ctx).await;
                Err(IndexerError::BackendInit(
                    "initializer exited without a result".to_string(),
                ))
            }
            None if shutdown.is_cancelled() => {
                warn!("Shutdown before code indexer was ready");
                self.state.transition(LifecycleState::ShutdownRequested);
                ctx.cancel();
                self.close_handle().await;
                self.state.transition(LifecycleState::Closed);
                Err(IndexerError::ShutdownBeforeReady)
            }
            None => {
                let timeout = timeout.unwrap_or_default();
                error!(timeout_secs = timeout.as_secs_f64(), "Code indexer startup timed out");
                ctx.cancel();
                self.close_handle().await;
                self.state.transition(LifecycleState::Closed);
                Err(IndexerError::StartupTimeout(timeout))
            }
        };

        let _ = outcome_tx.send(outcome);
    }

    async fn fail(&self, ctx: CancellationToken) {
        ctx.cancel();
        self.close_handle().await;
        self.state.transition(LifecycleState::Failed);
    }

    async fn after_ready(self: Arc<Self>, ctx: CancellationToken, created: bool) {
        let store = self.store.clone();
        let pending = run_blocking(move || {
            if created {
                store.set_backfill_pending(true)?;
                return Ok(true);
            }
            Ok(store.backfill_pending()?)
        })
        .await;

        self.retry_dead_letters().await;

        let resume = match pending {
            Ok(true) => !created,
            Ok(false) => return,
            Err(e) => {
                error!(error = %e, "Failed to read backfill flag");
                if !created {
                    return;
                }
                false
            }
        };
        if resume {
            info!("Resuming interrupted backfill");
        }
        let walker = BackfillWalker::new(self.store.clone(), self.queue.clone(), ctx)
            .with_page_size(self.config.backfill_page_size)
            .with_resume(resume);
        match walker.run().await {
            Ok(report) => debug!(
                outcome = ?report.outcome,
                enqueued = report.enqueued.len(),
                "Backfill finished"
            ),
            Err(e) => error!(error = %e, "Backfill failed"),
        }
    }

    /// Re-enqueue tasks that failed in an earlier run.
    async fn retry_dead_letters(&self) {
        let store = self.store.clone();
        let failures = match run_blocking(move || Ok(store.take_failures()?)).await {
            Ok(failures) => failures,
            Err(e) => {
                error!(error = %e, "Failed to load dead letters");
                return;
            }
        };
        if failures.is_empty() {
            return;
        }

        info!(count = failures.len(), "Retrying dead-lettered tasks");
        let mut remaining = failures.into_iter();
        while let Some(failure) = remaining.next() {
            if let Err(e) = self.queue.push(failure.task()).await {
                warn!(error = %e, "Stopped retrying dead letters");
                let unsent: Vec<_> = std::iter::once(failure).chain(remaining).collect();
                let store = self.store.clone();
                let restored = run_blocking(move || {
                    for failure in &unsent {
                        store.record_failure(failure)?;
                    }
                    Ok(())
                })
                .await;
                if let Err(e) = restored {
                    error!(error = %e, "Failed to restore dead letters");
                }
                return;
            }
        }
    }
}

async fn close_late_backend(backend: Arc<dyn SearchBackend>) {
    info!("Code indexer opened after startup was decided, closing it");
    match tokio::task::spawn_blocking(move || backend.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "Failed to close late backend"),
        Err(e) => warn!(error = %e, "Closing the late backend panicked"),
    }
}
