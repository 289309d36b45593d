//! Bounded, cancellable polling of slow external jobs.
//!
//! A poll is a chain of attempts driven by a small state machine on the
//! shared [`PollerPool`]. Waiting between attempts is a timer, not a
//! blocked worker; only the attempt itself holds one of the pool's slots.

mod pool;
mod probe;

pub(crate) use pool::{PollCanceller, PollError, PollHandle, PollPolicy, PollResult, PollerPool};
pub(crate) use probe::{Probe, ProbeOutcome, ProgressReporter};
