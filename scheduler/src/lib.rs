// Copyright 2026 the cotask authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! `cotask`: a single-threaded, cooperative task scheduler over stackful
//! worker contexts.
//!
//! Application code implements [`Task`], hands instances to a [`Scheduler`]
//! via [`Scheduler::schedule`]/[`Scheduler::queue`], and the scheduler
//! multiplexes an unbounded stream of them onto a bounded pool of reusable
//! [`cotask_context::WorkerContext`]s, coordinated with an edge-triggered
//! [`EventLoop`]. Task bodies block with ordinary straight-line code —
//! [`suspend`], [`Scheduler::await_task`], [`Scheduler::await_or_timeout`] —
//! rather than `async`/`await` or callback chains.
//!
//! ```no_run
//! use std::rc::Rc;
//!
//! struct Greet(&'static str);
//! impl cotask::Task for Greet {
//!     fn run(&mut self) {
//!         println!("hello, {}", self.0);
//!     }
//! }
//!
//! let event_loop = Rc::new(cotask::MioEventLoop::new().unwrap());
//! let scheduler = cotask::init(cotask::Config::default(), event_loop).unwrap();
//! scheduler.schedule(Greet("world")).unwrap();
//! scheduler.run().unwrap();
//! ```

static_assertions::const_assert!(cotask_context::DEFAULT_STACK_SIZE >= cotask_context::MIN_STACK_SIZE);

mod config;
mod context_pool;
mod error;
mod event_loop;
mod mio_event_loop;
mod pool;
mod scheduler;
mod task;
mod time;

pub use config::{Config, ConfigBuilder, SpecializedPool};
pub use error::{ConfigError, Error};
pub use event_loop::{CycleEndCallback, EventLoop, FdCallback, Interest, Readiness};
pub use mio_event_loop::MioEventLoop;
pub use pool::{NamedPoolThrottler, Preparable, QueueUsageThrottler, Restorable, Suspendable, TaskPool, ThrottleAction, Throttler, ThrottledTaskPool};
pub use scheduler::{init, scheduler, suspend, OverflowAction, Scheduler, SchedulerState, Stats};
pub use task::{Task, TaskHandle};
