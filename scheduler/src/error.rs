// Copyright 2026 the cotask authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::fmt;

/// Errors surfaced by [`crate::Scheduler::schedule`] and friends.
#[derive(Debug)]
pub enum Error {
    /// The admission queue was at capacity and no overflow callback was
    /// configured (or the configured callback chose to re-raise).
    TaskQueueFull,
    /// A scheduler invariant was violated. This is always checked, even in
    /// release builds: by the time this is raised, downstream symptoms
    /// (leaked contexts, double-recycled tasks) would otherwise be
    /// untraceable.
    SchedulerSanity(String),
    /// No scheduler has been initialized via [`crate::init`] on this thread.
    Uninitialized,
    /// The calling thread differs from the one that initialized the
    /// scheduler; all scheduler state is confined to a single thread.
    WrongThread,
    /// I/O error from the underlying event loop (fd registration, timer
    /// creation, etc).
    Io(std::io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::TaskQueueFull => f.write_str("admission queue is at capacity"),
            Error::SchedulerSanity(msg) => write!(f, "scheduler invariant violated: {msg}"),
            Error::Uninitialized => f.write_str("no scheduler has been initialized on this thread"),
            Error::WrongThread => f.write_str("scheduler state may only be touched from the thread that owns it"),
            Error::Io(e) => write!(f, "event loop I/O error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

/// Error returned when constructing a [`crate::Config`] fails validation.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ConfigError {
    /// `queue_limit` was smaller than `worker_limit`.
    QueueSmallerThanWorkerLimit { queue_limit: usize, worker_limit: usize },
    /// `worker_stack_size` was below `cotask_context::MIN_STACK_SIZE`.
    StackTooSmall { requested: usize, minimum: usize },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::QueueSmallerThanWorkerLimit { queue_limit, worker_limit } => write!(
                f,
                "queue_limit ({queue_limit}) must be >= worker_limit ({worker_limit})"
            ),
            ConfigError::StackTooSmall { requested, minimum } => write!(
                f,
                "worker_stack_size ({requested}) is below the minimum of {minimum} bytes"
            ),
        }
    }
}

impl std::error::Error for ConfigError {}
