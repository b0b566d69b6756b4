use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::debug;

use crate::error::EngineError;
use crate::report::ProgressUpdate;

pub const MAX_WORKERS: usize = 16;

/// Run-scoped, cooperative cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub(crate) struct Completed<R> {
    pub index: usize,
    /// `Err` carries the panic message of a job that did not return.
    pub outcome: Result<R, String>,
}

/// Fixed-size set of workers pulling jobs in scan order.
pub(crate) struct WorkerPool {
    pool: ThreadPool,
    workers: usize,
}

impl WorkerPool {
    pub(crate) fn new(workers: usize, label: &'static str) -> Result<Self, EngineError> {
        if !(1..=MAX_WORKERS).contains(&workers) {
            return Err(EngineError::Config(format!(
                "worker count must be between 1 and {MAX_WORKERS}, got {workers}"
            )));
        }

        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(move |index| format!("{label}-{index}"))
            .build()
            .map_err(|err| EngineError::Config(format!("building worker pool: {err}")))?;

        Ok(Self { pool, workers })
    }

    /// Starts the workers and returns the channel their results arrive on.
    /// The channel closes once every worker has exited. Cancellation is
    /// checked before each job is taken; a taken job always runs to the end.
    pub(crate) fn dispatch<J, R, F>(
        &self,
        jobs: Arc<Vec<J>>,
        cancel: &CancelToken,
        work: F,
    ) -> Receiver<Completed<R>>
    where
        J: Send + Sync + 'static,
        R: Send + 'static,
        F: Fn(&J) -> R + Send + Sync + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let next = Arc::new(AtomicUsize::new(0));
        let work = Arc::new(work);

        for _ in 0..self.workers {
            let tx = tx.clone();
            let jobs = Arc::clone(&jobs);
            let next = Arc::clone(&next);
            let work = Arc::clone(&work);
            let cancel = cancel.clone();

            self.pool.spawn(move || {
                loop {
                    if cancel.is_cancelled() {
                        debug!("cancellation observed, worker stopping");
                        break;
                    }
                    let index = next.fetch_add(1, Ordering::SeqCst);
                    let Some(job) = jobs.get(index) else {
                        break;
                    };

                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| work(job)))
                        .map_err(|payload| panic_message(payload.as_ref()));
                    if tx.send(Completed { index, outcome }).is_err() {
                        break;
                    }
                }
            });
        }

        rx
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        String::from("non-string panic payload")
    }
}

/// Sending half of a run's progress channel. Sends never block, and a
/// caller that stopped listening is not an error.
#[derive(Debug, Clone)]
pub(crate) struct ProgressSink(Sender<ProgressUpdate>);

impl ProgressSink {
    #[cfg(test)]
    pub(crate) fn from_sender(sender: Sender<ProgressUpdate>) -> Self {
        Self(sender)
    }

    pub(crate) fn emit(&self, update: ProgressUpdate) {
        let _ = self.0.send(update);
    }
}

/// Caller's view of one background batch run.
#[derive(Debug)]
pub struct RunHandle<T> {
    cancel: CancelToken,
    progress: Receiver<ProgressUpdate>,
    coordinator: JoinHandle<T>,
}

impl<T: Send + 'static> RunHandle<T> {
    pub(crate) fn spawn<F>(label: &'static str, cancel: CancelToken, body: F) -> Result<Self, EngineError>
    where
        F: FnOnce(ProgressSink) -> T + Send + 'static,
    {
        let (tx, progress) = mpsc::channel();
        let sink = ProgressSink(tx);
        let coordinator = thread::Builder::new()
            .name(format!("{label}-coordinator"))
            .spawn(move || body(sink))
            .map_err(|source| EngineError::Spawn {
                what: label,
                source,
            })?;

        Ok(Self {
            cancel,
            progress,
            coordinator,
        })
    }
}

impl<T> RunHandle<T> {
    /// Stops dispatch of further jobs. Jobs already running finish.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Shareable handle on the same cancellation flag, for callers such as
    /// signal handlers that cannot hold the `RunHandle`.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Next update if one is waiting. `None` does not mean the run ended.
    pub fn try_progress(&self) -> Option<ProgressUpdate> {
        match self.progress.try_recv() {
            Ok(update) => Some(update),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Blocking stream of updates; ends when the run is over.
    pub fn progress(&self) -> impl Iterator<Item = ProgressUpdate> + '_ {
        self.progress.iter()
    }

    pub fn is_finished(&self) -> bool {
        self.coordinator.is_finished()
    }

    /// Waits for the run to reach its terminal state.
    pub fn summary(self) -> Result<T, EngineError> {
        self.coordinator
            .join()
            .map_err(|_| EngineError::CoordinatorPanicked)
    }
}
