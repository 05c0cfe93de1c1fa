// Copyright 2026 the cotask authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::collections::VecDeque;

use cotask_context::{ContextPhase, WorkerContext};

use crate::task::TaskHandle;

/// Index of a context within a [`ContextPool`]. Stable for the lifetime of
/// the pool (contexts are never removed, only rebound).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub(crate) struct ContextId(pub(crate) usize);

struct Slot {
    context: WorkerContext,
    owner: Option<TaskHandle>,
}

/// Fixed-capacity pool of [`WorkerContext`]s plus a FIFO admission queue.
///
/// `ContextPool` is a mechanism, not a policy: it knows how to find a free
/// context, bind+resume it, and hold a bounded FIFO of waiting
/// [`TaskHandle`]s. Deciding *what* to bind (building the task's entry
/// closure, routing to specialized pools, invoking overflow callbacks) is
/// [`crate::Scheduler`]'s job.
pub(crate) struct ContextPool {
    slots: Vec<Slot>,
    worker_limit: usize,
    stack_size: usize,
    pending: VecDeque<TaskHandle>,
    queue_limit: usize,
}

impl ContextPool {
    pub(crate) fn new(worker_limit: usize, queue_limit: usize, stack_size: usize) -> Self {
        Self {
            slots: Vec::new(),
            worker_limit,
            stack_size,
            pending: VecDeque::new(),
            queue_limit,
        }
    }

    /// Finds an idle context, growing the pool (up to `worker_limit`) if
    /// none is currently idle.
    pub(crate) fn free_slot(&mut self) -> std::io::Result<Option<ContextId>> {
        if let Some(idx) = self.slots.iter().position(|s| s.owner.is_none()) {
            return Ok(Some(ContextId(idx)));
        }
        if self.slots.len() < self.worker_limit {
            let context = WorkerContext::new(self.stack_size)?;
            self.slots.push(Slot { context, owner: None });
            return Ok(Some(ContextId(self.slots.len() - 1)));
        }
        Ok(None)
    }

    pub(crate) fn bind(
        &mut self,
        id: ContextId,
        handle: TaskHandle,
        entry: impl FnOnce() + 'static,
    ) -> std::io::Result<()> {
        let slot = &mut self.slots[id.0];
        debug_assert!(slot.owner.is_none(), "binding an already-busy context");
        slot.context.reset(entry)?;
        slot.owner = Some(handle);
        Ok(())
    }

    /// Raw pointer to the context at `id`, for resuming it without holding
    /// a borrow of whatever container (e.g. `RefCell<Inner>`) owns this
    /// pool across the stack switch. The context is marked busy for the
    /// duration of any call made through this pointer; see
    /// `Scheduler::resume_context` for the safety argument.
    pub(crate) fn context_ptr(&mut self, id: ContextId) -> *mut WorkerContext {
        &mut self.slots[id.0].context as *mut WorkerContext
    }

    /// Records the outcome of a resume performed through
    /// [`ContextPool::context_ptr`]: frees the slot if the context
    /// terminated.
    pub(crate) fn note_phase(&mut self, id: ContextId, phase: ContextPhase) {
        if phase == ContextPhase::Terminated {
            self.slots[id.0].owner = None;
        }
    }

    pub(crate) fn owner(&self, id: ContextId) -> Option<TaskHandle> {
        self.slots[id.0].owner
    }

    /// Unconditionally appends to the FIFO tail.
    pub(crate) fn enqueue(&mut self, handle: TaskHandle) -> Result<(), TaskHandle> {
        if self.pending.len() < self.queue_limit {
            self.pending.push_back(handle);
            Ok(())
        } else {
            Err(handle)
        }
    }

    /// Appends to the FIFO tail regardless of `queue_limit`, for
    /// `OverflowAction::EnqueueAnyway` and for re-queuing a task that lost a
    /// race for a freshly-freed context during refill.
    pub(crate) fn force_enqueue(&mut self, handle: TaskHandle) {
        self.pending.push_back(handle);
    }

    pub(crate) fn pop_pending(&mut self) -> Option<TaskHandle> {
        self.pending.pop_front()
    }

    pub(crate) fn busy_count(&self) -> usize {
        self.slots.iter().filter(|s| s.owner.is_some()).count()
    }

    pub(crate) fn worker_limit(&self) -> usize {
        self.worker_limit
    }

    pub(crate) fn queue_limit(&self) -> usize {
        self.queue_limit
    }

    pub(crate) fn queued(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn total_workers(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn clear_pending(&mut self) -> Vec<TaskHandle> {
        self.pending.drain(..).collect()
    }

    /// Visits every currently-busy context's owning task handle. Used at
    /// shutdown to kill every in-flight task.
    pub(crate) fn iter_busy(&self) -> impl Iterator<Item = (ContextId, TaskHandle)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.owner.map(|h| (ContextId(i), h)))
    }
}
