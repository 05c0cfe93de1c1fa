// Copyright 2026 the cotask authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A [`TaskPool`] that drives an external suspend/resume signal to an
//! upstream producer as its load crosses configured watermarks.

use std::cell::RefCell;

use crate::error::Error;
use crate::pool::task_pool::{Preparable, Restorable, TaskPool};
use crate::scheduler::Scheduler;
use crate::task::Task;

/// An upstream producer that can be told to pause or resume feeding work
/// into a [`ThrottledTaskPool`]. Unrelated to [`crate::suspend`] — this
/// `suspend`/`resume` pair addresses a producer, not a task.
pub trait Suspendable {
    fn suspend(&mut self);
    fn resume(&mut self);
}

/// What a [`Throttler`] decided should happen to the bound [`Suspendable`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ThrottleAction {
    Suspend,
    Resume,
}

/// Watermark policy deciding, on every `start` and every termination,
/// whether to pause or resume the bound [`Suspendable`].
pub trait Throttler {
    fn on_start(&mut self, busy: usize, queued: usize) -> Option<ThrottleAction>;
    fn on_terminate(&mut self, busy: usize, queued: usize) -> Option<ThrottleAction>;
}

/// Throttles on the sum of this pool's busy count and the scheduler's
/// global admission-queue depth. The default flavour.
pub struct QueueUsageThrottler {
    suspend_at: usize,
    resume_at: usize,
    suspended: bool,
}

impl QueueUsageThrottler {
    /// # Panics
    ///
    /// Panics unless `suspend_at > resume_at`.
    pub fn new(suspend_at: usize, resume_at: usize) -> Self {
        assert!(suspend_at > resume_at, "suspend_at must exceed resume_at");
        Self { suspend_at, resume_at, suspended: false }
    }
}

impl Throttler for QueueUsageThrottler {
    fn on_start(&mut self, busy: usize, queued: usize) -> Option<ThrottleAction> {
        if !self.suspended && busy + queued >= self.suspend_at {
            self.suspended = true;
            Some(ThrottleAction::Suspend)
        } else {
            None
        }
    }

    fn on_terminate(&mut self, busy: usize, queued: usize) -> Option<ThrottleAction> {
        if self.suspended && busy + queued <= self.resume_at {
            self.suspended = false;
            Some(ThrottleAction::Resume)
        } else {
            None
        }
    }
}

/// Throttles on a different, named pool's busy count instead of this pool's
/// own load — for producers that should back off based on a downstream
/// specialized pool rather than the one they're directly feeding.
pub struct NamedPoolThrottler<F: Fn() -> usize> {
    other_pool_busy: F,
    suspend_at: usize,
    resume_at: usize,
    suspended: bool,
}

impl<F: Fn() -> usize> NamedPoolThrottler<F> {
    /// # Panics
    ///
    /// Panics unless `suspend_at > resume_at`.
    pub fn new(other_pool_busy: F, suspend_at: usize, resume_at: usize) -> Self {
        assert!(suspend_at > resume_at, "suspend_at must exceed resume_at");
        Self { other_pool_busy, suspend_at, resume_at, suspended: false }
    }
}

impl<F: Fn() -> usize> Throttler for NamedPoolThrottler<F> {
    fn on_start(&mut self, _busy: usize, _queued: usize) -> Option<ThrottleAction> {
        if !self.suspended && (self.other_pool_busy)() >= self.suspend_at {
            self.suspended = true;
            Some(ThrottleAction::Suspend)
        } else {
            None
        }
    }

    fn on_terminate(&mut self, _busy: usize, _queued: usize) -> Option<ThrottleAction> {
        if self.suspended && (self.other_pool_busy)() <= self.resume_at {
            self.suspended = false;
            Some(ThrottleAction::Resume)
        } else {
            None
        }
    }
}

/// A [`TaskPool`] paired with a [`Suspendable`] upstream producer and a
/// [`Throttler`] policy, consulted on every `start` and every termination.
pub struct ThrottledTaskPool<T: Task> {
    pool: TaskPool<T>,
    scheduler: Scheduler,
    suspendable: RefCell<Box<dyn Suspendable>>,
    throttler: RefCell<Box<dyn Throttler>>,
}

impl<T: Task> ThrottledTaskPool<T> {
    pub fn new(
        scheduler: Scheduler,
        limit: usize,
        factory: impl Fn() -> T + 'static,
        suspendable: impl Suspendable + 'static,
        throttler: impl Throttler + 'static,
    ) -> std::rc::Rc<Self> {
        let this = std::rc::Rc::new(Self {
            pool: TaskPool::new(scheduler.clone(), limit, factory),
            scheduler,
            suspendable: RefCell::new(Box::new(suspendable)),
            throttler: RefCell::new(Box::new(throttler)),
        });
        let weak = std::rc::Rc::downgrade(&this);
        this.pool.set_on_terminate_hook(move || {
            if let Some(this) = weak.upgrade() {
                this.check_on_terminate();
            }
        });
        this
    }

    pub fn limit(&self) -> usize {
        self.pool.limit()
    }

    pub fn busy_count(&self) -> usize {
        self.pool.busy_count()
    }

    pub fn start<Args>(&self, args: Args) -> Result<bool, Error>
    where
        T: Preparable<Args>,
    {
        let started = self.pool.start(args)?;
        if started {
            self.check_on_start();
        }
        Ok(started)
    }

    pub fn restore(&self, bytes: &[u8]) -> Result<bool, Error>
    where
        T: Restorable,
    {
        let started = self.pool.restore(bytes)?;
        if started {
            self.check_on_start();
        }
        Ok(started)
    }

    pub fn await_running_tasks(&self) {
        self.pool.await_running_tasks();
    }

    fn check_on_start(&self) {
        let busy = self.pool.busy_count();
        let queued = self.scheduler.stats().queued_total;
        let action = self.throttler.borrow_mut().on_start(busy, queued);
        self.apply(action);
    }

    fn check_on_terminate(&self) {
        let busy = self.pool.busy_count();
        let queued = self.scheduler.stats().queued_total;
        let action = self.throttler.borrow_mut().on_terminate(busy, queued);
        self.apply(action);
    }

    fn apply(&self, action: Option<ThrottleAction>) {
        match action {
            Some(ThrottleAction::Suspend) => self.suspendable.borrow_mut().suspend(),
            Some(ThrottleAction::Resume) => self.suspendable.borrow_mut().resume(),
            None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::mio_event_loop::MioEventLoop;
    use std::cell::Cell;
    use std::rc::Rc;

    struct CountingSuspendable {
        suspended: Rc<Cell<u32>>,
        resumed: Rc<Cell<u32>>,
    }

    impl Suspendable for CountingSuspendable {
        fn suspend(&mut self) {
            self.suspended.set(self.suspended.get() + 1);
        }
        fn resume(&mut self) {
            self.resumed.set(self.resumed.get() + 1);
        }
    }

    struct NoOp;
    impl Task for NoOp {
        fn run(&mut self) {}
    }
    impl Preparable<()> for NoOp {
        fn prepare(&mut self, _args: ()) {}
    }

    #[test]
    fn suspends_at_watermark_and_resumes_at_floor() {
        let event_loop = Rc::new(MioEventLoop::new().unwrap());
        let scheduler = crate::scheduler::init(
            Config::builder().worker_limit(2).queue_limit(2).build().unwrap(),
            event_loop,
        )
        .unwrap();

        let suspended = Rc::new(Cell::new(0));
        let resumed = Rc::new(Cell::new(0));
        let pool = ThrottledTaskPool::new(
            scheduler.clone(),
            2,
            || NoOp,
            CountingSuspendable { suspended: suspended.clone(), resumed: resumed.clone() },
            QueueUsageThrottler::new(2, 0),
        );

        assert!(pool.start(()).unwrap());
        assert_eq!(suspended.get(), 0);
        assert!(pool.start(()).unwrap());
        assert_eq!(suspended.get(), 1, "busy count hit suspend_at");

        scheduler.run().unwrap();
        assert_eq!(resumed.get(), 1, "busy count dropped back to resume_at");
    }
}
