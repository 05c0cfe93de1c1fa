// Copyright 2026 the cotask authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Deadline-ordered timers, built on a single `timerfd` registered with the
//! scheduler's event loop, rather than the multi-level timing wheel a
//! busier reactor would use — `cotask` expects a handful of in-flight
//! deadlines, not the tens of thousands a wheel amortizes for. See
//! `DESIGN.md` for the tradeoff.

use std::cell::RefCell;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::event_loop::Interest;
use crate::scheduler::Scheduler;
use crate::task::TaskHandle;

struct Entry {
    deadline: Instant,
    id: u64,
    callback: Box<dyn FnOnce()>,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.id == other.id
    }
}
impl Eq for Entry {}
impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.deadline.cmp(&other.deadline).then(self.id.cmp(&other.id))
    }
}

struct TimerState {
    heap: BinaryHeap<Reverse<Entry>>,
    next_id: u64,
    fd: Option<RawFd>,
}

impl Drop for TimerState {
    fn drop(&mut self) {
        if let Some(fd) = self.fd {
            // Safety: `fd` was created by `timerfd_create` in `ensure_fd` and
            // is owned exclusively by this `TimerState`.
            unsafe {
                libc::close(fd);
            }
        }
    }
}

/// Min-heap of pending deadlines, shared (via `Rc`) between every
/// `Scheduler` clone on a thread.
#[derive(Clone)]
pub(crate) struct Timer {
    state: Rc<RefCell<TimerState>>,
}

impl Timer {
    pub(crate) fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(TimerState {
                heap: BinaryHeap::new(),
                next_id: 0,
                fd: None,
            })),
        }
    }

    fn ensure_fd(&self, scheduler: &Scheduler) -> RawFd {
        if let Some(fd) = self.state.borrow().fd {
            return fd;
        }
        // Safety: a plain libc syscall wrapper with no preconditions beyond
        // a valid clockid, which `CLOCK_MONOTONIC` is.
        let fd = unsafe { libc::timerfd_create(libc::CLOCK_MONOTONIC, libc::TFD_NONBLOCK) };
        assert!(fd >= 0, "timerfd_create failed: {}", std::io::Error::last_os_error());
        self.state.borrow_mut().fd = Some(fd);

        let me = self.clone();
        let sched = scheduler.clone();
        scheduler
            .event_loop()
            .register(
                fd,
                Interest::READABLE,
                Box::new(move |_readiness| me.fire_due(&sched)),
            )
            .expect("failed to register the timer fd with the event loop");
        fd
    }

    fn schedule_wakeup(&self, scheduler: &Scheduler, micros: u64, callback: impl FnOnce() + 'static) {
        let fd = self.ensure_fd(scheduler);
        let deadline = Instant::now() + Duration::from_micros(micros);
        {
            let mut state = self.state.borrow_mut();
            let id = state.next_id;
            state.next_id += 1;
            state.heap.push(Reverse(Entry { deadline, id, callback: Box::new(callback) }));
        }
        self.rearm(fd);
    }

    fn rearm(&self, fd: RawFd) {
        let next_deadline = self.state.borrow().heap.peek().map(|Reverse(e)| e.deadline);
        let value = match next_deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now()).max(Duration::from_nanos(1));
                libc::timespec {
                    tv_sec: remaining.as_secs() as libc::time_t,
                    tv_nsec: remaining.subsec_nanos() as libc::c_long,
                }
            }
            None => libc::timespec { tv_sec: 0, tv_nsec: 0 },
        };
        let spec = libc::itimerspec {
            it_interval: libc::timespec { tv_sec: 0, tv_nsec: 0 },
            it_value: value,
        };
        // Safety: `fd` is a valid, owned timerfd; `old_value` is not needed.
        let rc = unsafe { libc::timerfd_settime(fd, 0, &spec, std::ptr::null_mut()) };
        assert_eq!(rc, 0, "timerfd_settime failed: {}", std::io::Error::last_os_error());
    }

    /// Fired by the event loop when the timerfd becomes readable: runs every
    /// due callback, then re-arms for the next deadline (if any).
    fn fire_due(&self, scheduler: &Scheduler) {
        let now = Instant::now();
        let due: Vec<Entry> = {
            let mut state = self.state.borrow_mut();
            let mut due = Vec::new();
            while matches!(state.heap.peek(), Some(Reverse(e)) if e.deadline <= now) {
                if let Some(Reverse(e)) = state.heap.pop() {
                    due.push(e);
                }
            }
            due
        };
        for entry in due {
            (entry.callback)();
        }
        let fd = self.state.borrow().fd;
        if let Some(fd) = fd {
            self.rearm(fd);
        }
        let _ = scheduler;
    }

    /// Suspends the current task for at least `micros` microseconds.
    ///
    /// Installs a termination hook on the current task so that if it is
    /// killed before the deadline, the pending wake-up becomes a no-op
    /// instead of calling [`Scheduler::delayed_resume`] on a `TaskHandle`
    /// slab slot that may since have been recycled for an unrelated task.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a running task.
    pub(crate) fn wait(&self, scheduler: &Scheduler, micros: u64) {
        let current = scheduler.current_task().expect("Timer::wait called outside of a running task");
        let settled = Rc::new(std::cell::Cell::new(false));
        {
            let settled = settled.clone();
            let sched = scheduler.clone();
            self.schedule_wakeup(scheduler, micros, move || {
                if !settled.replace(true) {
                    sched.delayed_resume(current);
                }
            });
        }
        scheduler.on_termination(current, move || {
            settled.set(true);
        });
        crate::scheduler::suspend();
    }

    /// Blocks the current task until `task` finishes or `micros`
    /// microseconds elapse, whichever comes first. Returns `true` if the
    /// timeout fired first (`task` is still unfinished), `false` if `task`
    /// finished before the deadline.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a running task, or if `task` is the
    /// current task.
    pub(crate) fn await_or_timeout(&self, scheduler: &Scheduler, task: TaskHandle, micros: u64) -> bool {
        let current = scheduler.current_task().expect("await_or_timeout called outside of a running task");
        assert_ne!(current, task, "a task cannot await itself");

        if scheduler.finished(task) {
            return false;
        }

        let settled = Rc::new(std::cell::Cell::new(false));
        {
            let settled = settled.clone();
            let sched = scheduler.clone();
            scheduler.on_termination(task, move || {
                if !settled.replace(true) {
                    sched.delayed_resume(current);
                }
            });
        }
        let timed_out = Rc::new(std::cell::Cell::new(false));
        {
            let settled = settled.clone();
            let timed_out = timed_out.clone();
            let sched = scheduler.clone();
            self.schedule_wakeup(scheduler, micros, move || {
                if !settled.replace(true) {
                    timed_out.set(true);
                    sched.delayed_resume(current);
                }
            });
        }

        if !scheduler.finished(task) {
            crate::scheduler::suspend();
        }
        timed_out.get()
    }
}
