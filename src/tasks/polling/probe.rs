use async_trait::async_trait;

/// Result of a single readiness check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ProbeOutcome<T> {
    Ready(T),
    NotReady,
}

/// One "is it ready yet?" check against an external job.
///
/// Implementations must not sleep or wait on timers: the pool owns all
/// waiting. An `Err` aborts the whole poll; `NotReady` schedules the next
/// attempt.
#[async_trait]
pub(crate) trait Probe: Send + Sync + 'static {
    type Output: Send + 'static;

    async fn check(&self) -> anyhow::Result<ProbeOutcome<Self::Output>>;
}

/// Side effect invoked before every attempt. Errors are logged by the
/// pool and never change the poll outcome.
#[async_trait]
pub(crate) trait ProgressReporter: Send + Sync + 'static {
    async fn report(&self, attempt: u32, max_attempts: u32) -> anyhow::Result<()>;
}
