//! Multi-file orchestrator
//!
//! Runs one handler per input file across a bounded pool of workers. Workers
//! pull paths from a shared queue; the first handler error is recorded,
//! cancels the run, and is returned once every dispatched file has finished.

use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::coerce_worker_count;
use crate::error::{PipelineError, Result};

/// Single-slot cell keeping only the first error reported to it
#[derive(Debug, Default)]
struct FirstError {
    slot: Mutex<Option<PipelineError>>,
}

impl FirstError {
    fn record(&self, err: PipelineError) {
        let mut slot = self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    fn take(&self) -> Option<PipelineError> {
        self.slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }
}

/// Bounded worker pool over file paths
#[derive(Debug, Clone, Copy)]
pub struct Orchestrator {
    worker_count: usize,
}

impl Orchestrator {
    /// Zero or negative counts become a single worker.
    pub fn new(worker_count: i64) -> Self {
        Self {
            worker_count: coerce_worker_count(worker_count),
        }
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Workers used for a task: a positive cap overrides the global count.
    pub fn effective_workers(&self, cap: Option<usize>) -> usize {
        match cap {
            Some(cap) if cap > 0 => cap,
            _ => self.worker_count,
        }
    }

    /// Run `handler` once per file, returning how many files completed.
    ///
    /// Files are queued in sorted order. On the first handler error no
    /// further file is dispatched; files already running are allowed to
    /// finish and that first error (attributed to its file) is returned.
    /// If `cancel` fires with no handler error recorded, the result is
    /// [`PipelineError::Cancelled`].
    pub async fn run<H, Fut>(
        &self,
        task: &str,
        cancel: &CancellationToken,
        mut files: Vec<PathBuf>,
        cap: Option<usize>,
        handler: H,
    ) -> Result<usize>
    where
        H: Fn(PathBuf, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        files.sort();
        let total = files.len();
        if total == 0 {
            debug!(task, "No files to process");
            return Ok(0);
        }

        let workers = self.effective_workers(cap).min(total);
        let token = cancel.child_token();
        let handler = Arc::new(handler);
        let first_error = Arc::new(FirstError::default());
        let processed = Arc::new(AtomicUsize::new(0));

        let (tx, rx) = mpsc::channel::<PathBuf>(workers);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        info!(task, files = total, workers, "Starting file workers");

        let mut set = JoinSet::new();
        for worker in 0..workers {
            let rx = Arc::clone(&rx);
            let token = token.clone();
            let handler = Arc::clone(&handler);
            let first_error = Arc::clone(&first_error);
            let processed = Arc::clone(&processed);
            let span = info_span!("worker", task, worker);

            set.spawn(
                async move {
                    loop {
                        let next = {
                            let mut rx = rx.lock().await;
                            tokio::select! {
                                biased;
                                _ = token.cancelled() => None,
                                path = rx.recv() => path,
                            }
                        };
                        let Some(path) = next else { break };

                        debug!(file = %path.display(), "Processing file");
                        match handler(path.clone(), token.clone()).await {
                            Ok(()) => {
                                processed.fetch_add(1, Ordering::SeqCst);
                            },
                            Err(PipelineError::Cancelled) if token.is_cancelled() => break,
                            Err(err) => {
                                let err = err.in_file(&path);
                                error!(error = %err, "File failed, cancelling remaining work");
                                first_error.record(err);
                                token.cancel();
                                break;
                            },
                        }
                    }
                }
                .instrument(span),
            );
        }
        drop(rx);

        for path in files {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                sent = tx.send(path) => {
                    if sent.is_err() {
                        break;
                    }
                },
            }
        }
        drop(tx);

        while let Some(joined) = set.join_next().await {
            if let Err(e) = joined {
                error!(task, error = %e, "Worker panicked");
                first_error.record(PipelineError::Join(e.to_string()));
                token.cancel();
            }
        }

        let done = processed.load(Ordering::SeqCst);
        if let Some(err) = first_error.take() {
            warn!(task, processed = done, files = total, "File workers stopped on error");
            return Err(err);
        }
        if done < total && token.is_cancelled() {
            warn!(task, processed = done, files = total, "File workers cancelled");
            return Err(PipelineError::Cancelled);
        }

        info!(task, processed = done, "All files processed");
        Ok(done)
    }
}
