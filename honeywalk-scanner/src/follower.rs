// Follower: runs one crawl worker under the overall processing timeout

use crate::engine::{Cookie, Engine};
use crate::input::NodeInput;
use crate::params::CrawlParams;
use crate::store::{ClosableStore, ObjectStore};
use crate::tree::CrawlTree;
use crate::worker::{CrawlWorker, WorkerState};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// How long a cancelled worker gets to hand back its tree by default.
pub const JOIN_GRACE: Duration = Duration::from_secs(5);

const UNKNOWN_FAILURE: &str = "Couldn't determine failure reason or internal follower error";

static WORKER_SEQ: AtomicU64 = AtomicU64::new(1);

#[derive(Debug)]
struct FailureState {
    successful: bool,
    message: Option<String>,
    warning: Option<String>,
}

/// Failure reasons and the task warning, shared by the follower and its worker.
#[derive(Debug, Clone)]
pub struct FailureLog {
    inner: Arc<Mutex<FailureState>>,
}

impl Default for FailureLog {
    fn default() -> Self {
        Self::new()
    }
}

impl FailureLog {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(FailureState {
                successful: true,
                message: None,
                warning: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FailureState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Marks the task unsuccessful and appends `reason` on a new line.
    pub fn request_failed(&self, reason: impl Into<String>) {
        let reason = reason.into();
        let mut state = self.lock();
        state.successful = false;
        match state.message.as_mut() {
            Some(message) => {
                message.push('\n');
                message.push_str(&reason);
            }
            None => state.message = Some(reason),
        }
    }

    pub fn is_successful(&self) -> bool {
        self.lock().successful
    }

    pub fn failure_message(&self) -> String {
        self.lock()
            .message
            .clone()
            .unwrap_or_else(|| UNKNOWN_FAILURE.to_string())
    }

    pub fn set_warning(&self, warning: impl Into<String>) {
        self.lock().warning = Some(warning.into());
    }

    pub fn warning(&self) -> Option<String> {
        self.lock().warning.clone()
    }

    pub fn engine_crashed(&self, url: &str, detail: impl Into<String>) {
        self.request_failed(detail);
        self.set_warning(format!(
            "Engine crashed due to dynamic content processing at URL: {}",
            url
        ));
    }
}

/// Latest copy of the worker's tree, kept for when the worker never hands the
/// tree back.
#[derive(Debug, Clone, Default)]
pub struct TreeCheckpoint {
    latest: Arc<Mutex<Option<CrawlTree>>>,
}

impl TreeCheckpoint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save(&self, tree: &CrawlTree) {
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner) = Some(tree.clone());
    }

    pub fn take(&self) -> Option<CrawlTree> {
        self.latest.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

#[derive(Debug)]
pub struct FollowOutcome {
    /// The worker's tree, or its last checkpoint when the worker never
    /// handed it back. `None` only if not even a checkpoint exists.
    pub tree: Option<CrawlTree>,
    pub state: WorkerState,
    pub successful: bool,
    pub failure_message: Option<String>,
    pub warning: Option<String>,
}

pub struct Follower {
    input: NodeInput,
    params: CrawlParams,
    engine: Arc<dyn Engine>,
    store: Arc<dyn ObjectStore>,
    job: u64,
    cookies: Vec<Cookie>,
    failures: FailureLog,
    join_grace: Duration,
}

impl Follower {
    pub fn new(
        input: &NodeInput,
        params: CrawlParams,
        engine: Arc<dyn Engine>,
        store: Arc<dyn ObjectStore>,
        job: u64,
    ) -> Self {
        Self {
            input: input.clone(),
            params,
            engine,
            store,
            job,
            cookies: Vec::new(),
            failures: FailureLog::new(),
            join_grace: JOIN_GRACE,
        }
    }

    pub fn with_cookies(mut self, cookies: Vec<Cookie>) -> Self {
        self.cookies = cookies;
        self
    }

    pub fn with_join_grace(mut self, grace: Duration) -> Self {
        self.join_grace = grace;
        self
    }

    pub fn url_for_processing(&self) -> &str {
        self.input.url_for_processing()
    }

    pub fn failures(&self) -> &FailureLog {
        &self.failures
    }

    /// Runs the worker on its own thread and waits for it, at most for the
    /// processing timeout plus the join grace. A worker still running after
    /// that loses its store access and the last checkpoint of its tree is
    /// returned instead.
    pub async fn process_url(&self, tree: CrawlTree) -> FollowOutcome {
        let url = self.input.url_for_processing().to_string();
        let cancel = CancellationToken::new();
        let store = Arc::new(ClosableStore::new(Arc::clone(&self.store)));
        let checkpoint = TreeCheckpoint::new();
        let worker = CrawlWorker::new(
            Arc::clone(&self.engine),
            store.clone(),
            self.job,
            self.params.clone(),
            Handle::current(),
        )
        .with_cancel_token(cancel.clone())
        .with_failure_log(self.failures.clone())
        .with_checkpoint(checkpoint.clone())
        .with_cookies(self.cookies.clone());

        let (tx, mut rx) = oneshot::channel();
        let failures = self.failures.clone();
        let thread_url = url.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("crawl-worker-{}", WORKER_SEQ.fetch_add(1, Ordering::Relaxed)))
            .spawn(move || {
                let mut worker = worker;
                let mut tree = tree;
                let state = match panic::catch_unwind(AssertUnwindSafe(|| worker.run(&mut tree))) {
                    Ok(state) => state,
                    Err(payload) => {
                        let detail = panic_message(payload.as_ref());
                        error!("Engine crashed while processing {}: {}", thread_url, detail);
                        failures.engine_crashed(&thread_url, detail);
                        if panic::catch_unwind(AssertUnwindSafe(|| worker.teardown(&mut tree))).is_err() {
                            error!("Teardown after crash failed for {}", thread_url);
                        }
                        WorkerState::Failed
                    }
                };
                // The follower may have stopped listening already.
                let _ = tx.send((tree, state));
            });

        if let Err(e) = spawned {
            self.failures
                .request_failed(format!("Couldn't start worker thread: {}", e));
            return self.outcome(None, WorkerState::Failed);
        }

        let mut timed_out = false;
        let finished = match self.params.processing_timeout() {
            Some(limit) => match tokio::time::timeout(limit, &mut rx).await {
                Ok(result) => result.ok(),
                Err(_) => {
                    timed_out = true;
                    let message = format!(
                        "Task interrupted because time limit exceeded: {}",
                        self.params.processing_timeout
                    );
                    warn!("{} ({})", message, url);
                    self.failures.request_failed(message);
                    cancel.cancel();
                    self.engine.stop_javascript();
                    self.engine.close_all_windows();

                    match tokio::time::timeout(self.join_grace, rx).await {
                        Ok(result) => result.ok(),
                        Err(_) => {
                            error!("Worker for {} did not finish after cancellation", url);
                            self.failures
                                .request_failed("Worker did not finish after cancellation");
                            store.close();
                            checkpoint.take().map(|tree| (tree, WorkerState::TimedOut))
                        }
                    }
                }
            },
            None => rx.await.ok(),
        };

        info!("Finished processing {}", url);
        match finished {
            Some((tree, state)) => {
                let state = if timed_out { WorkerState::TimedOut } else { state };
                self.outcome(Some(tree), state)
            }
            None if timed_out => self.outcome(None, WorkerState::TimedOut),
            None => self.outcome(None, WorkerState::Failed),
        }
    }

    fn outcome(&self, tree: Option<CrawlTree>, state: WorkerState) -> FollowOutcome {
        let successful = self.failures.is_successful();
        FollowOutcome {
            tree,
            state,
            successful,
            failure_message: (!successful).then(|| self.failures.failure_message()),
            warning: self.failures.warning(),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "Engine panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_log_joins_reasons() {
        let log = FailureLog::new();
        assert!(log.is_successful());
        assert_eq!(log.failure_message(), UNKNOWN_FAILURE);

        log.request_failed("first");
        log.request_failed("second");
        assert!(!log.is_successful());
        assert_eq!(log.failure_message(), "first\nsecond");
    }

    #[test]
    fn test_engine_crash_sets_warning() {
        let log = FailureLog::new();
        log.engine_crashed("http://example.com/", "stack overflow");
        assert_eq!(
            log.warning().as_deref(),
            Some("Engine crashed due to dynamic content processing at URL: http://example.com/")
        );
        assert_eq!(log.failure_message(), "stack overflow");
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(payload.as_ref()), "Engine panicked");
    }

    #[test]
    fn test_checkpoint_keeps_latest_tree() {
        let params = CrawlParams::default();
        let checkpoint = TreeCheckpoint::new();
        assert!(checkpoint.take().is_none());

        let mut tree = CrawlTree::new(NodeInput::new("http://example.com/"), &params);
        checkpoint.save(&tree);
        tree.add_attribute("http_code", 200_u16);
        checkpoint.clone().save(&tree);

        let saved = checkpoint.take().unwrap();
        assert!(saved.root().attribute("http_code").is_some());
        assert!(checkpoint.take().is_none());
    }
}
