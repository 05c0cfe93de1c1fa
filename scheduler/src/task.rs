// Copyright 2026 the cotask authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

use bitflags::bitflags;

use crate::context_pool::ContextId;

bitflags! {
    /// Per-task state flags (spec.md §3).
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub(crate) struct TaskState: u8 {
        const TO_KILL = 0b01;
        const FINISHED = 0b10;
    }
}

/// A unit of work executed inside a [`cotask_context::WorkerContext`].
///
/// Implementers override [`run`](Task::run); [`recycle`](Task::recycle) is
/// an optional hook to reset per-task state for reuse and defaults to doing
/// nothing.
pub trait Task: 'static {
    /// The task body. Runs on a dedicated worker context; may call
    /// [`crate::suspend`], [`crate::Scheduler::await_task`],
    /// [`crate::Scheduler::await_or_timeout`], [`crate::Scheduler::wait`]
    /// etc. at arbitrary call depth.
    fn run(&mut self);

    /// Called exactly once after the body returns or is killed, before
    /// termination hooks fire, to reset state for reuse. Never called
    /// directly by user code.
    fn recycle(&mut self) {}
}

/// Opaque identifier for a task known to a [`crate::Scheduler`].
///
/// Cheap to copy; operations on a dead or already-recycled id are no-ops or
/// return `false`/`None` rather than panicking, matching the "a task may
/// finish and recycle out from under an observer" reality of cooperative
/// scheduling.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct TaskHandle(pub(crate) usize);

pub(crate) struct Hook {
    pub(crate) id: u64,
    pub(crate) f: Box<dyn FnOnce()>,
}

/// Scheduler-internal bookkeeping for one task slot. Lives in
/// `Scheduler`'s slab; user code only ever sees a [`TaskHandle`].
pub(crate) struct TaskRecord {
    pub(crate) task: Rc<RefCell<Box<dyn Task>>>,
    pub(crate) state: TaskState,
    pub(crate) hooks: Vec<Hook>,
    pub(crate) next_hook_id: u64,
    pub(crate) running_hooks: bool,
    pub(crate) context: Option<ContextId>,
    pub(crate) suspended: bool,
    /// Set by the task itself (via [`crate::Scheduler::set_result`]) before
    /// it recycles, consumed by [`crate::Scheduler::await_result`].
    pub(crate) result: Option<Box<dyn Any>>,
}

impl TaskRecord {
    pub(crate) fn new(task: Box<dyn Task>) -> Self {
        Self {
            task: Rc::new(RefCell::new(task)),
            state: TaskState::empty(),
            hooks: Vec::new(),
            next_hook_id: 0,
            running_hooks: false,
            context: None,
            suspended: false,
            result: None,
        }
    }

    pub(crate) fn finished(&self) -> bool {
        self.state.contains(TaskState::FINISHED)
    }

    pub(crate) fn to_kill(&self) -> bool {
        self.state.contains(TaskState::TO_KILL)
    }

    /// Registers a termination hook, returning an id usable with
    /// [`TaskRecord::remove_hook`].
    ///
    /// # Panics
    ///
    /// Panics if called while hooks are currently firing (spec.md §4.3 step
    /// 5: "between hooks, hook list must be empty" — adding hooks during
    /// hook execution is forbidden and must be detected).
    pub(crate) fn add_hook(&mut self, f: Box<dyn FnOnce()>) -> u64 {
        assert!(
            !self.running_hooks,
            "cannot register a termination hook while termination hooks are running"
        );
        let id = self.next_hook_id;
        self.next_hook_id += 1;
        self.hooks.push(Hook { id, f });
        id
    }

    pub(crate) fn remove_hook(&mut self, id: u64) -> bool {
        if let Some(pos) = self.hooks.iter().position(|h| h.id == id) {
            self.hooks.remove(pos);
            true
        } else {
            false
        }
    }
}

// Hooks fire in LIFO order (`Scheduler::finish_and_recycle`), but the hook
// vector is always taken out of the record first: a hook body routinely
// calls back into `Scheduler`, which needs its own borrow of the very
// `RefCell` that would otherwise still be borrowed to drive this loop.
