// Copyright 2026 the cotask authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A typed container managing reusable instances of one [`Task`]
//! implementation, generic over a preparation closure rather than the
//! reflection-driven argument copying of the system this crate's vocabulary
//! is modeled on.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::error::Error;
use crate::scheduler::Scheduler;
use crate::task::{Task, TaskHandle};

/// Initializes a pooled task instance from scheduling arguments, replacing
/// reflection-based argument copying with an ordinary trait method.
pub trait Preparable<Args> {
    fn prepare(&mut self, args: Args);
}

/// Alternate initialization from a serialized buffer.
pub trait Restorable {
    fn restore(&mut self, bytes: &[u8]);
}

/// Wraps a pooled instance so it can be scheduled by value while the pool
/// keeps its own `Rc` to the same instance, reclaiming it once the task
/// finishes.
struct Pooled<T> {
    inner: Rc<RefCell<T>>,
}

impl<T: Task> Task for Pooled<T> {
    fn run(&mut self) {
        self.inner.borrow_mut().run();
    }

    fn recycle(&mut self) {
        self.inner.borrow_mut().recycle();
    }
}

/// A pool of reusable `T` instances, dispatched through `scheduler`.
///
/// An instance is on exactly one of `free`/`busy` at any time; preparation
/// (`prepare`/`restore`) always completes before the instance is handed to
/// the scheduler.
pub struct TaskPool<T: Task> {
    scheduler: Scheduler,
    limit: usize,
    factory: Box<dyn Fn() -> T>,
    free: Rc<RefCell<Vec<Rc<RefCell<T>>>>>,
    busy: Rc<RefCell<Vec<Rc<RefCell<T>>>>>,
    busy_handles: Rc<RefCell<Vec<TaskHandle>>>,
    on_terminate: Rc<RefCell<Option<Rc<dyn Fn()>>>>,
}

impl<T: Task> TaskPool<T> {
    pub fn new(scheduler: Scheduler, limit: usize, factory: impl Fn() -> T + 'static) -> Self {
        Self {
            scheduler,
            limit,
            factory: Box::new(factory),
            free: Rc::new(RefCell::new(Vec::new())),
            busy: Rc::new(RefCell::new(Vec::new())),
            busy_handles: Rc::new(RefCell::new(Vec::new())),
            on_terminate: Rc::new(RefCell::new(None)),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn busy_count(&self) -> usize {
        self.busy.borrow().len()
    }

    pub fn free_count(&self) -> usize {
        self.free.borrow().len()
    }

    /// Installs an extra callback fired after every instance is reclaimed,
    /// in addition to the pool's own bookkeeping. Used by
    /// [`crate::ThrottledTaskPool`] to observe terminations without
    /// duplicating the reclaim logic.
    pub(crate) fn set_on_terminate_hook(&self, f: impl Fn() + 'static) {
        *self.on_terminate.borrow_mut() = Some(Rc::new(f));
    }

    fn acquire(&self) -> Rc<RefCell<T>> {
        self.free
            .borrow_mut()
            .pop()
            .unwrap_or_else(|| Rc::new(RefCell::new((self.factory)())))
    }

    /// Acquires a free instance (constructing one if needed), prepares it
    /// with `args`, and schedules it. Returns `false` without touching any
    /// instance if the pool is already at `limit`.
    pub fn start<Args>(&self, args: Args) -> Result<bool, Error>
    where
        T: Preparable<Args>,
    {
        if self.busy_count() >= self.limit {
            return Ok(false);
        }
        let instance = self.acquire();
        instance.borrow_mut().prepare(args);
        self.dispatch(instance)?;
        Ok(true)
    }

    /// As [`TaskPool::start`], but initializes via [`Restorable::restore`].
    pub fn restore(&self, bytes: &[u8]) -> Result<bool, Error>
    where
        T: Restorable,
    {
        if self.busy_count() >= self.limit {
            return Ok(false);
        }
        let instance = self.acquire();
        instance.borrow_mut().restore(bytes);
        self.dispatch(instance)?;
        Ok(true)
    }

    fn dispatch(&self, instance: Rc<RefCell<T>>) -> Result<(), Error> {
        let wrapper = Pooled { inner: instance.clone() };
        let handle = match self.scheduler.schedule(wrapper) {
            Ok(handle) => handle,
            Err(err) => {
                self.free.borrow_mut().push(instance);
                return Err(err);
            }
        };
        self.busy.borrow_mut().push(instance.clone());
        self.busy_handles.borrow_mut().push(handle);

        let free = self.free.clone();
        let busy = self.busy.clone();
        let busy_handles = self.busy_handles.clone();
        let on_terminate = self.on_terminate.clone();
        self.scheduler.on_termination(handle, move || {
            if let Some(pos) = busy.borrow().iter().position(|i| Rc::ptr_eq(i, &instance)) {
                busy.borrow_mut().remove(pos);
            }
            if let Some(pos) = busy_handles.borrow().iter().position(|h| *h == handle) {
                busy_handles.borrow_mut().remove(pos);
            }
            free.borrow_mut().push(instance);
            if let Some(f) = on_terminate.borrow().as_ref() {
                f();
            }
        });
        Ok(())
    }

    /// Suspends the caller until every instance currently busy in this pool
    /// finishes.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a running task, or if the caller is
    /// itself one of this pool's tasks.
    pub fn await_running_tasks(&self) {
        let current = self
            .scheduler
            .current_task()
            .expect("await_running_tasks called outside of a running task");
        assert!(
            !self.busy_handles.borrow().contains(&current),
            "await_running_tasks caller must not be one of this pool's own tasks"
        );

        let watched = self.busy_handles.borrow().clone();
        if watched.is_empty() {
            return;
        }
        let remaining = Rc::new(Cell::new(watched.len()));
        for handle in watched {
            let remaining = remaining.clone();
            let sched = self.scheduler.clone();
            self.scheduler.on_termination(handle, move || {
                remaining.set(remaining.get() - 1);
                if remaining.get() == 0 {
                    sched.delayed_resume(current);
                }
            });
        }
        crate::scheduler::suspend();
    }
}
