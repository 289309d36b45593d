use std::future::Future;
use std::num::{NonZeroU32, NonZeroUsize};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::Instrument;

use super::probe::{Probe, ProbeOutcome, ProgressReporter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PollPolicy {
    max_attempts: NonZeroU32,
    delay: Duration,
}

impl PollPolicy {
    pub(crate) fn new(max_attempts: NonZeroU32, delay: Duration) -> Self {
        Self { max_attempts, delay }
    }

    pub(crate) fn max_attempts(&self) -> u32 {
        self.max_attempts.get()
    }

    pub(crate) fn delay(&self) -> Duration {
        self.delay
    }

    /// Time spent waiting between attempts when every attempt is "not ready".
    pub(crate) fn total_wait(&self) -> Duration {
        self.delay.saturating_mul(self.max_attempts.get() - 1)
    }
}

#[derive(Debug, Error)]
pub(crate) enum PollError {
    #[error("probe failed: {0:#}")]
    Probe(anyhow::Error),
    #[error("polling was cancelled")]
    Cancelled,
    #[error("poller pool is shut down")]
    ShutDown,
    #[error("polling was aborted after the shutdown grace period")]
    Aborted,
}

/// `Ok(Some(_))` on success, `Ok(None)` once every attempt came back not ready.
pub(crate) type PollResult<T> = Result<Option<T>, PollError>;

/// Process-wide pool that runs poll attempts.
///
/// At most `workers` attempts execute at once across all polls. A poll that
/// is waiting for its next attempt holds no slot.
#[derive(Clone)]
pub(crate) struct PollerPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    workers: usize,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
    abort: CancellationToken,
}

impl PollerPool {
    pub(crate) fn new(workers: NonZeroUsize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                workers: workers.get(),
                permits: Arc::new(Semaphore::new(workers.get())),
                tracker: TaskTracker::new(),
                shutdown: CancellationToken::new(),
                abort: CancellationToken::new(),
            }),
        }
    }

    pub(crate) fn workers(&self) -> usize {
        self.inner.workers
    }

    pub(crate) fn active_polls(&self) -> usize {
        self.inner.tracker.len()
    }

    /// Token for cancelling a poll that has not started yet. Cancelled with
    /// the pool on shutdown.
    pub(crate) fn canceller(&self) -> PollCanceller {
        PollCanceller(self.inner.shutdown.child_token())
    }

    /// Starts polling `probe` under `policy`.
    ///
    /// Attempt 1 runs right away; each further attempt starts `policy.delay()`
    /// after the previous one completed. The returned handle resolves once
    /// the poll reaches a terminal state. Dropping the handle cancels the poll.
    pub(crate) fn poll<P, R>(
        &self,
        probe: P,
        policy: PollPolicy,
        reporter: R,
    ) -> PollHandle<P::Output>
    where
        P: Probe,
        R: ProgressReporter,
    {
        self.poll_with(self.canceller(), probe, policy, reporter)
    }

    /// Same as [`PollerPool::poll`], stopped early by `canceller`.
    pub(crate) fn poll_with<P, R>(
        &self,
        canceller: PollCanceller,
        probe: P,
        policy: PollPolicy,
        reporter: R,
    ) -> PollHandle<P::Output>
    where
        P: Probe,
        R: ProgressReporter,
    {
        let cancel = canceller.0;
        if self.inner.shutdown.is_cancelled() {
            return PollHandle { inner: HandleInner::Rejected, cancel };
        }

        let job = PollJob {
            probe,
            reporter,
            policy,
            permits: self.inner.permits.clone(),
            cancel: cancel.clone(),
            shutdown: self.inner.shutdown.clone(),
            abort: self.inner.abort.clone(),
        };
        let join = self.inner.tracker.spawn(job.run().in_current_span());

        PollHandle { inner: HandleInner::Running(join), cancel }
    }

    /// Stops accepting polls and cancels scheduled attempts.
    ///
    /// Attempts already executing get `grace` to finish; after that they are
    /// aborted. Returns `true` when everything drained within the grace period.
    pub(crate) async fn shutdown(&self, grace: Duration) -> bool {
        self.inner.tracker.close();
        self.inner.shutdown.cancel();

        if tokio::time::timeout(grace, self.inner.tracker.wait()).await.is_ok() {
            tracing::info!("Poller pool drained");
            return true;
        }

        tracing::warn!(
            active_polls = self.active_polls(),
            grace_seconds = grace.as_secs_f64(),
            "Poller pool did not drain in time; aborting in-flight attempts"
        );
        self.inner.abort.cancel();
        self.inner.tracker.wait().await;
        false
    }
}

enum PollState<T> {
    Pending { attempt: u32, wait: Duration },
    Running { attempt: u32 },
    Succeeded(T),
    Exhausted,
    Failed(anyhow::Error),
    Cancelled,
    Aborted,
}

struct PollJob<P, R> {
    probe: P,
    reporter: R,
    policy: PollPolicy,
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
    shutdown: CancellationToken,
    abort: CancellationToken,
}

impl<P, R> PollJob<P, R>
where
    P: Probe,
    R: ProgressReporter,
{
    async fn run(self) -> PollResult<P::Output> {
        let mut state = PollState::Pending { attempt: 1, wait: Duration::ZERO };
        loop {
            state = match state {
                PollState::Pending { attempt, wait } => self.schedule(attempt, wait).await,
                PollState::Running { attempt } => self.attempt(attempt).await,
                PollState::Succeeded(value) => return Ok(Some(value)),
                PollState::Exhausted => {
                    tracing::info!(
                        max_attempts = self.policy.max_attempts(),
                        "Polling exhausted without a result"
                    );
                    return Ok(None);
                }
                PollState::Failed(err) => return Err(PollError::Probe(err)),
                PollState::Cancelled if self.shutdown.is_cancelled() => {
                    return Err(PollError::ShutDown)
                }
                PollState::Cancelled => return Err(PollError::Cancelled),
                PollState::Aborted => return Err(PollError::Aborted),
            };
        }
    }

    // Cancellation is observed between attempts and right after the progress report.
    async fn schedule(&self, attempt: u32, wait: Duration) -> PollState<P::Output> {
        if self.cancel.is_cancelled() {
            return PollState::Cancelled;
        }

        if !wait.is_zero() {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return PollState::Cancelled,
                _ = tokio::time::sleep(wait) => {}
            }
        }

        PollState::Running { attempt }
    }

    async fn attempt(&self, attempt: u32) -> PollState<P::Output> {
        let permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return PollState::Cancelled,
            permit = self.permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return PollState::Cancelled,
            },
        };

        let max_attempts = self.policy.max_attempts();
        let outcome = tokio::select! {
            biased;
            _ = self.abort.cancelled() => return PollState::Aborted,
            outcome = async {
                if let Err(err) = self.reporter.report(attempt, max_attempts).await {
                    tracing::warn!(
                        attempt,
                        max_attempts,
                        error = %err,
                        "Failed to report polling progress"
                    );
                }
                if self.cancel.is_cancelled() {
                    return None;
                }
                Some(self.probe.check().await)
            } => outcome,
        };
        drop(permit);

        let Some(outcome) = outcome else {
            tracing::debug!(attempt, max_attempts, "Poll cancelled before checking the job");
            return PollState::Cancelled;
        };

        match outcome {
            Ok(ProbeOutcome::Ready(value)) => {
                tracing::debug!(attempt, max_attempts, "Probe returned a result");
                PollState::Succeeded(value)
            }
            Ok(ProbeOutcome::NotReady) if attempt >= max_attempts => PollState::Exhausted,
            Ok(ProbeOutcome::NotReady) => {
                tracing::debug!(attempt, max_attempts, "Probe not ready; scheduling next attempt");
                PollState::Pending { attempt: attempt + 1, wait: self.policy.delay() }
            }
            Err(err) => {
                tracing::debug!(attempt, max_attempts, error = %err, "Probe failed; aborting poll");
                PollState::Failed(err)
            }
        }
    }
}

/// Future for one poll. Resolves to the poll's terminal state.
pub(crate) struct PollHandle<T> {
    inner: HandleInner<T>,
    cancel: CancellationToken,
}

enum HandleInner<T> {
    Running(JoinHandle<PollResult<T>>),
    Rejected,
}

impl<T> Future for PollHandle<T> {
    type Output = PollResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.inner {
            HandleInner::Running(join) => Pin::new(join).poll(cx).map(|joined| match joined {
                Ok(result) => result,
                Err(err) if err.is_cancelled() => Err(PollError::Aborted),
                Err(err) => Err(PollError::Probe(anyhow::anyhow!("poll task panicked: {err}"))),
            }),
            HandleInner::Rejected => Poll::Ready(Err(PollError::ShutDown)),
        }
    }
}

impl<T> Drop for PollHandle<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Cancels a poll from outside the task awaiting its handle.
///
/// Stops scheduling further attempts; an attempt already executing is
/// allowed to finish.
#[derive(Clone)]
pub(crate) struct PollCanceller(CancellationToken);

impl PollCanceller {
    pub(crate) fn cancel(&self) {
        self.0.cancel();
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.0.is_cancelled()
    }
}
