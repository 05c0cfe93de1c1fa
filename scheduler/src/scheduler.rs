// Copyright 2026 the cotask authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::any::Any;
use std::cell::RefCell;
use std::panic::AssertUnwindSafe;
use std::rc::Rc;

use cotask_context::Resumption;
use slab::Slab;

use crate::config::Config;
use crate::context_pool::{ContextId, ContextPool};
use crate::error::Error;
use crate::event_loop::EventLoop;
use crate::task::{Task, TaskHandle, TaskRecord};
use crate::time::Timer;

/// What the overflow callback decides to do with a task that arrived while
/// the admission queue was already at `queue_limit`.
#[derive(Debug)]
pub enum OverflowAction {
    /// Silently discard the task. It is never run.
    Drop,
    /// Force it onto the queue anyway, exceeding `queue_limit` by one.
    EnqueueAnyway,
    /// Signal [`crate::Error::TaskQueueFull`] to the caller of `schedule`.
    Reraise,
}

pub type OverflowCallback = Box<dyn FnMut(TaskHandle) -> OverflowAction>;
pub type ExceptionHandler = Box<dyn FnMut(TaskHandle, Box<dyn Any>)>;

/// Top-level scheduler state (spec.md §3 "Scheduler state").
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SchedulerState {
    Initial,
    Running,
    ShuttingDown,
}

/// Snapshot aggregate of scheduler load, as spec.md §3 defines.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Stats {
    pub queued_busy: usize,
    pub queued_total: usize,
    pub suspended_count: usize,
    pub busy_workers: usize,
    pub total_workers: usize,
}

/// A private, crate-only marker thrown across a suspension point to signal
/// that a task has been killed. Never constructed by user code; user code
/// cannot name this type, so a `catch_unwind`/`catch-all` that re-panics
/// unrecognized payloads cannot accidentally swallow it.
pub(crate) struct KillSignal(());

pub(crate) struct Inner {
    config: Config,
    state: SchedulerState,
    pool: ContextPool,
    tasks: Slab<TaskRecord>,
    event_loop: Rc<dyn EventLoop>,
    timer: Timer,
    pending_resumes: usize,
    refill_armed: bool,
    overflow_callback: Option<OverflowCallback>,
    exception_handler: Option<ExceptionHandler>,
    /// Stack of currently-running task handles: resuming task B from inside
    /// task A's own call to `schedule` (RanImmediately) nests B's execution
    /// underneath A's still-live call frame, so "the current task" is a
    /// stack, not a single cell.
    current: Vec<TaskHandle>,
}

/// The top-level cooperative scheduler (spec.md §4.5).
///
/// Cheap to clone (an `Rc` handle); all state is confined to the thread that
/// created it. `cotask` does not support scheduling from other threads —
/// see [`Scheduler::assert_owning_thread`].
#[derive(Clone)]
pub struct Scheduler {
    pub(crate) inner: Rc<RefCell<Inner>>,
    owning_thread: std::thread::ThreadId,
}

thread_local! {
    static CURRENT: RefCell<Option<Scheduler>> = const { RefCell::new(None) };
}

/// Initializes (or replaces) the thread's scheduler singleton.
///
/// Replacement is only legal when the prior scheduler is quiescent (no busy
/// contexts, empty admission queue) — matching spec.md §6's
/// `initScheduler` contract.
pub fn init(config: Config, event_loop: Rc<dyn EventLoop>) -> Result<Scheduler, Error> {
    CURRENT.with(|cell| {
        let mut slot = cell.borrow_mut();
        if let Some(existing) = slot.as_ref() {
            let inner = existing.inner.borrow();
            if inner.pool.busy_count() != 0 || inner.pool.queued() != 0 {
                return Err(Error::SchedulerSanity(
                    "cannot replace a scheduler that still has busy contexts or queued tasks".into(),
                ));
            }
        }
        let sched = Scheduler {
            inner: Rc::new(RefCell::new(Inner {
                pool: ContextPool::new(config.worker_limit, config.queue_limit, config.worker_stack_size),
                timer: Timer::new(),
                tasks: Slab::new(),
                event_loop,
                state: SchedulerState::Initial,
                pending_resumes: 0,
                refill_armed: false,
                overflow_callback: None,
                exception_handler: None,
                current: Vec::new(),
                config,
            })),
            owning_thread: std::thread::current().id(),
        };
        *slot = Some(sched.clone());
        Ok(sched)
    })
}

/// Returns the thread's scheduler singleton, or [`Error::Uninitialized`].
pub fn scheduler() -> Result<Scheduler, Error> {
    CURRENT.with(|cell| cell.borrow().clone().ok_or(Error::Uninitialized))
}

/// Suspends the currently running task, returning control to whoever last
/// resumed it. On resume, if the task has been killed, immediately unwinds
/// with the internal kill signal (spec.md §4.3: "on resume, if ToKill is
/// set, throws kill signal").
///
/// # Panics
///
/// Panics if called outside of a running task.
pub fn suspend() {
    match cotask_context::suspend() {
        Resumption::Continue => {}
        Resumption::Kill => std::panic::panic_any(KillSignal(())),
    }
}

impl Scheduler {
    fn assert_owning_thread(&self) -> Result<(), Error> {
        if std::thread::current().id() != self.owning_thread {
            return Err(Error::WrongThread);
        }
        Ok(())
    }

    pub fn config(&self) -> Config {
        self.inner.borrow().config.clone()
    }

    pub fn state(&self) -> SchedulerState {
        self.inner.borrow().state
    }

    pub fn stats(&self) -> Stats {
        let inner = self.inner.borrow();
        Stats {
            queued_busy: inner.pool.busy_count(),
            queued_total: inner.pool.queued(),
            suspended_count: inner.tasks.iter().filter(|(_, r)| r.suspended).count(),
            busy_workers: inner.pool.busy_count(),
            total_workers: inner.pool.total_workers(),
        }
    }

    /// The handle of the task currently executing, if any.
    pub fn current_task(&self) -> Option<TaskHandle> {
        self.inner.borrow().current.last().copied()
    }

    pub fn set_overflow_callback(&self, f: impl FnMut(TaskHandle) -> OverflowAction + 'static) {
        self.inner.borrow_mut().overflow_callback = Some(Box::new(f));
    }

    pub fn set_exception_handler(&self, f: impl FnMut(TaskHandle, Box<dyn Any>) + 'static) {
        self.inner.borrow_mut().exception_handler = Some(Box::new(f));
    }

    pub(crate) fn timer(&self) -> Timer {
        self.inner.borrow().timer.clone()
    }

    pub(crate) fn event_loop(&self) -> Rc<dyn EventLoop> {
        self.inner.borrow().event_loop.clone()
    }

    /// Stashes `value` as this task's result, to be collected by
    /// [`Scheduler::await_result`]. Must be called from inside the task that
    /// is stashing its own result.
    pub fn set_result<R: 'static>(&self, value: R) {
        if let Some(handle) = self.current_task() {
            if let Some(rec) = self.inner.borrow_mut().tasks.get_mut(handle.0) {
                rec.result = Some(Box::new(value));
            }
        }
    }

    fn insert_task(&self, task: impl Task) -> TaskHandle {
        let mut inner = self.inner.borrow_mut();
        TaskHandle(inner.tasks.insert(TaskRecord::new(Box::new(task))))
    }

    /// Dispatches a task: if ShuttingDown, kills the caller (if any) and
    /// returns; otherwise tries to run it immediately on a free context,
    /// else enqueues, else consults the overflow callback.
    pub fn schedule(&self, task: impl Task) -> Result<TaskHandle, Error> {
        self.assert_owning_thread()?;
        if self.state() == SchedulerState::ShuttingDown {
            self.kill_current_if_any();
            return Err(Error::SchedulerSanity("scheduler is shutting down".into()));
        }
        let handle = self.insert_task(task);
        self.dispatch(handle)?;
        self.arm_refill();
        Ok(handle)
    }

    /// Unconditionally enqueues, forcing next-cycle semantics even if a
    /// worker is currently free.
    pub fn queue(&self, task: impl Task) -> Result<TaskHandle, Error> {
        self.assert_owning_thread()?;
        if self.state() == SchedulerState::ShuttingDown {
            self.kill_current_if_any();
            return Err(Error::SchedulerSanity("scheduler is shutting down".into()));
        }
        let handle = self.insert_task(task);
        self.enqueue_only(handle)?;
        self.arm_refill();
        Ok(handle)
    }

    fn enqueue_only(&self, handle: TaskHandle) -> Result<(), Error> {
        let rejected = self.inner.borrow_mut().pool.enqueue(handle);
        if let Err(handle) = rejected {
            self.handle_overflow(handle)?;
        }
        Ok(())
    }

    fn dispatch(&self, handle: TaskHandle) -> Result<(), Error> {
        let free = self.inner.borrow_mut().pool.free_slot()?;
        match free {
            Some(id) => self.bind_and_run(id, handle),
            None => self.enqueue_only(handle),
        }
    }

    fn handle_overflow(&self, handle: TaskHandle) -> Result<(), Error> {
        let action = {
            let mut inner = self.inner.borrow_mut();
            match inner.overflow_callback.as_mut() {
                Some(cb) => Some(cb(handle)),
                None => None,
            }
        };
        match action {
            None => {
                self.drop_task(handle);
                Err(Error::TaskQueueFull)
            }
            Some(OverflowAction::Drop) => {
                self.drop_task(handle);
                Ok(())
            }
            Some(OverflowAction::EnqueueAnyway) => {
                self.inner.borrow_mut().pool.force_enqueue(handle);
                Ok(())
            }
            Some(OverflowAction::Reraise) => {
                self.drop_task(handle);
                Err(Error::TaskQueueFull)
            }
        }
    }

    fn drop_task(&self, handle: TaskHandle) {
        self.inner.borrow_mut().tasks.try_remove(handle.0);
    }

    /// Binds `handle` to context `id` and resumes it. Returns once the task
    /// first suspends or finishes (spec.md §4.2 `runOrEnqueue`
    /// "RanImmediately").
    fn bind_and_run(&self, id: ContextId, handle: TaskHandle) -> Result<(), Error> {
        let task_rc = {
            let inner = self.inner.borrow();
            inner.tasks[handle.0].task.clone()
        };
        let entry = move || {
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
                task_rc.borrow_mut().run();
            }));
            if let Err(payload) = result {
                if payload.downcast_ref::<KillSignal>().is_none() {
                    std::panic::resume_unwind(payload);
                }
                // kill signal: swallow and fall through to a normal return,
                // letting the scheduler observe plain termination.
            }
        };
        {
            let mut inner = self.inner.borrow_mut();
            inner.pool.bind(id, handle, entry)?;
            inner.tasks[handle.0].context = Some(id);
        }
        self.resume_context(id, handle, Resumption::Continue)
    }

    /// Resumes a bound context, tracking `handle` as the current task for
    /// exactly the duration of this call. Must not be called while
    /// `self.inner` is borrowed: the task's own code, running on the other
    /// side of the stack switch, re-enters `Scheduler` methods that need
    /// their own borrow of `self.inner` — including, for a synchronously
    /// dispatched task, a *nested* call to this very function.
    fn resume_context(&self, id: ContextId, handle: TaskHandle, input: Resumption) -> Result<(), Error> {
        if let Some(rec) = self.inner.borrow_mut().tasks.get_mut(handle.0) {
            rec.suspended = false;
        }
        self.inner.borrow_mut().current.push(handle);
        let ctx_ptr = self.inner.borrow_mut().pool.context_ptr(id);
        // Safety: single-threaded cooperative scheduler. This context is
        // marked busy (owned by `handle`) for the duration of the call, so
        // no other code path holds a reference to it; the task code that
        // runs during the resume re-enters `Scheduler` exclusively through
        // `self.inner`'s `RefCell`, never through this raw pointer, so no
        // aliasing `&mut` ever overlaps a live borrow of `Inner`.
        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| unsafe {
            (*ctx_ptr).resume(input)
        }));
        self.inner.borrow_mut().current.pop();
        match outcome {
            Ok(phase) => {
                self.inner.borrow_mut().pool.note_phase(id, phase);
                if phase == cotask_context::ContextPhase::Terminated {
                    self.finalize_task(handle, None);
                } else if let Some(rec) = self.inner.borrow_mut().tasks.get_mut(handle.0) {
                    rec.suspended = true;
                }
                Ok(())
            }
            Err(payload) => {
                self.inner.borrow_mut().pool.note_phase(id, cotask_context::ContextPhase::Terminated);
                self.finalize_task(handle, Some(payload));
                Ok(())
            }
        }
    }

    /// Runs steps 4–6 of spec.md §4.3's entry-point wrapper: mark finished,
    /// fire termination hooks in LIFO order, call `recycle`, free the slot.
    /// Errors are routed to `exception_handler` first (spec.md §7.3), before
    /// the task is otherwise finalized — Rust's synchronous unwinding makes
    /// this a single step rather than the "one additional scheduler cycle"
    /// spec.md's source language needed; see `DESIGN.md`.
    fn finalize_task(&self, handle: TaskHandle, error: Option<Box<dyn Any>>) {
        if let Some(payload) = error {
            let mut inner = self.inner.borrow_mut();
            if let Some(cb) = inner.exception_handler.as_mut() {
                cb(handle, payload);
                drop(inner);
            } else {
                drop(inner);
                // No handler installed: rethrow the task's own panic payload
                // from the context that is ultimately driving the event
                // loop, per spec.md §7.3. We still finish recycling first so
                // no context leaks.
                self.finish_and_recycle(handle);
                std::panic::resume_unwind(payload);
            }
        }
        self.finish_and_recycle(handle);
    }

    fn finish_and_recycle(&self, handle: TaskHandle) {
        let hooks_and_task = {
            let mut inner = self.inner.borrow_mut();
            let Some(rec) = inner.tasks.get_mut(handle.0) else {
                return;
            };
            rec.state.insert(crate::task::TaskState::FINISHED);
            rec.state.remove(crate::task::TaskState::TO_KILL);
            rec.suspended = false;
            let hooks = std::mem::take(&mut rec.hooks);
            (hooks, rec.task.clone())
        };
        let (hooks, task_rc) = hooks_and_task;
        {
            let mut inner = self.inner.borrow_mut();
            if let Some(rec) = inner.tasks.get_mut(handle.0) {
                rec.running_hooks = true;
            }
        }
        for hook in hooks.into_iter().rev() {
            (hook.f)();
        }
        {
            let mut inner = self.inner.borrow_mut();
            if let Some(rec) = inner.tasks.get_mut(handle.0) {
                rec.running_hooks = false;
            }
        }
        task_rc.borrow_mut().recycle();
        self.inner.borrow_mut().tasks.try_remove(handle.0);
    }

    /// Registers a termination hook on `handle`'s task, returning an id for
    /// [`Scheduler::remove_termination`]. Hooks fire in LIFO order of
    /// registration.
    pub fn on_termination(&self, handle: TaskHandle, f: impl FnOnce() + 'static) -> Option<u64> {
        let mut inner = self.inner.borrow_mut();
        inner.tasks.get_mut(handle.0).map(|rec| rec.add_hook(Box::new(f)))
    }

    pub fn remove_termination(&self, handle: TaskHandle, id: u64) -> bool {
        let mut inner = self.inner.borrow_mut();
        inner.tasks.get_mut(handle.0).is_some_and(|rec| rec.remove_hook(id))
    }

    pub fn finished(&self, handle: TaskHandle) -> bool {
        self.inner.borrow().tasks.get(handle.0).is_none_or(|r| r.finished())
    }

    pub fn suspended(&self, handle: TaskHandle) -> bool {
        self.inner.borrow().tasks.get(handle.0).is_some_and(|r| r.suspended)
    }

    /// Marks `handle` for death and resumes it so the kill signal fires
    /// synchronously. If the caller *is* `handle`, throws immediately
    /// instead (spec.md §4.3 `kill`).
    pub fn kill(&self, handle: TaskHandle) {
        let is_self = self.current_task() == Some(handle);
        {
            let mut inner = self.inner.borrow_mut();
            let Some(rec) = inner.tasks.get_mut(handle.0) else {
                return;
            };
            if rec.finished() {
                return;
            }
            rec.state.insert(crate::task::TaskState::TO_KILL);
        }
        if is_self {
            std::panic::panic_any(KillSignal(()));
        }
        self.resume(handle);
    }

    fn kill_current_if_any(&self) {
        if let Some(handle) = self.current_task() {
            self.kill(handle);
        }
    }

    /// Re-enters `handle`'s context directly. Precondition: `handle` is
    /// suspended and not finished. Calling this from inside another task's
    /// termination hook is a bug — use [`Scheduler::delayed_resume`]
    /// instead, to avoid re-entrant context transfer.
    pub fn resume(&self, handle: TaskHandle) {
        let (id, to_kill) = {
            let inner = self.inner.borrow();
            let Some(rec) = inner.tasks.get(handle.0) else {
                return;
            };
            (rec.context, rec.to_kill())
        };
        let Some(id) = id else { return };
        let input = if to_kill { Resumption::Kill } else { Resumption::Continue };
        let _ = self.resume_context(id, handle, input);
    }

    /// Registers a per-cycle-end callback that resumes `handle`, with
    /// exception routing. This is the only sanctioned way to resume a task
    /// from within another task's termination hook.
    pub fn delayed_resume(&self, handle: TaskHandle) {
        self.inner.borrow_mut().pending_resumes += 1;
        let me = self.clone();
        self.event_loop().on_cycle_end(Box::new(move || {
            me.inner.borrow_mut().pending_resumes -= 1;
            me.resume(handle);
        }));
    }

    /// `processEvents()`: suspend the current task, to be resumed again on
    /// the next cycle-end.
    pub fn process_events(&self) {
        if self.state() == SchedulerState::ShuttingDown {
            self.kill_current_if_any();
            return;
        }
        if let Some(handle) = self.current_task() {
            self.delayed_resume(handle);
        }
        suspend();
    }

    /// `await(task)`: block the current task until `task` finishes.
    ///
    /// # Panics
    ///
    /// Panics if there is no current task, or if `task == current_task()`.
    pub fn await_task(&self, task: TaskHandle) {
        self.await_task_then(task, || {});
    }

    pub fn await_task_then(&self, task: TaskHandle, finish_callback: impl FnOnce() + 'static) {
        let current = self.current_task().expect("await_task called outside of a running task");
        assert_ne!(current, task, "a task cannot await itself");

        let me = self.clone();
        self.on_termination(task, move || {
            if me.suspended(current) {
                me.delayed_resume(current);
            }
        });
        self.on_termination(task, finish_callback);

        if !self.finished(task) {
            suspend();
        }
    }

    /// `awaitResult(task)`: convenience wrapper copying a `result` value
    /// stashed via [`Scheduler::set_result`] before the task recycles.
    pub fn await_result<R: 'static>(&self, task: TaskHandle) -> Option<R> {
        let captured: Rc<RefCell<Option<Box<dyn Any>>>> = Rc::new(RefCell::new(None));
        {
            let captured = captured.clone();
            let inner = self.inner.clone();
            self.on_termination(task, move || {
                if let Some(rec) = inner.borrow_mut().tasks.get_mut(task.0) {
                    *captured.borrow_mut() = rec.result.take();
                }
            });
        }
        self.await_task(task);
        captured.borrow_mut().take().and_then(|b| b.downcast::<R>().ok()).map(|b| *b)
    }

    /// `awaitOrTimeout(task, micros)`: delegated to [`Timer`].
    pub fn await_or_timeout(&self, task: TaskHandle, micros: u64) -> bool {
        self.timer().await_or_timeout(self, task, micros)
    }

    /// `wait(micros)`: suspend the current task for at least `micros`
    /// microseconds. Delegated to [`Timer`].
    ///
    /// # Panics
    ///
    /// Panics if there is no current task.
    pub fn wait(&self, micros: u64) {
        self.timer().wait(self, micros)
    }

    fn arm_refill(&self) {
        let mut inner = self.inner.borrow_mut();
        if inner.refill_armed {
            return;
        }
        inner.refill_armed = true;
        drop(inner);
        self.arm_refill_callback();
    }

    fn arm_refill_callback(&self) {
        let me = self.clone();
        self.event_loop().on_cycle_end(Box::new(move || {
            me.drain_refill();
        }));
    }

    /// The per-cycle refill invariant: drain the admission queue into newly
    /// free contexts, bounded by the number of currently-free contexts, so
    /// cooperatively-yielding tasks cannot keep the queue from ever
    /// draining (spec.md §4.5 "Per-cycle refill").
    fn drain_refill(&self) {
        let free_budget = {
            let inner = self.inner.borrow();
            inner.pool.worker_limit().saturating_sub(inner.pool.busy_count())
        };
        for _ in 0..free_budget {
            let next = self.inner.borrow_mut().pool.pop_pending();
            let Some(handle) = next else { break };
            match self.inner.borrow_mut().pool.free_slot() {
                Ok(Some(id)) => {
                    if let Err(err) = self.bind_and_run(id, handle) {
                        tracing::warn!(?err, "failed to bind a refilled task to a worker context");
                        self.drop_task(handle);
                    }
                }
                Ok(None) => {
                    self.inner.borrow_mut().pool.force_enqueue(handle);
                    break;
                }
                Err(err) => {
                    tracing::warn!(%err, "failed to grow the context pool during refill");
                    self.inner.borrow_mut().pool.force_enqueue(handle);
                    break;
                }
            }
        }
        let still_pending = self.inner.borrow().pool.queued() > 0;
        if still_pending {
            self.arm_refill_callback();
        } else {
            self.inner.borrow_mut().refill_armed = false;
        }
    }

    /// `eventLoop()`: runs the reactor until quiescent, then kills every
    /// still-busy task and asserts the shutdown invariants (spec.md §4.5,
    /// §8: "at event-loop termination: busy = 0 ∧ queued = 0").
    pub fn run(&self) -> Result<(), Error> {
        self.assert_owning_thread()?;
        {
            let mut inner = self.inner.borrow_mut();
            assert_ne!(inner.state, SchedulerState::ShuttingDown, "cannot run a scheduler that is shutting down");
            inner.state = SchedulerState::Running;
        }
        let event_loop = self.event_loop();
        loop {
            let me = self.clone();
            let mut handler = move |payload: Box<dyn Any>| {
                me.route_top_level_exception(payload);
            };
            event_loop.run(&mut handler)?;

            let (queued, pending_resumes, state) = {
                let inner = self.inner.borrow();
                (inner.pool.queued(), inner.pending_resumes, inner.state)
            };
            if queued == 0 && pending_resumes == 0 {
                break;
            }
            if state == SchedulerState::ShuttingDown && queued == 0 && pending_resumes == 0 {
                break;
            }
        }

        let busy: Vec<TaskHandle> = self.inner.borrow().pool.iter_busy().map(|(_, h)| h).collect();
        for handle in busy {
            self.kill(handle);
        }

        let inner = self.inner.borrow();
        assert_eq!(inner.pool.busy_count(), 0, "SchedulerSanity: busy contexts remained after eventLoop()");
        assert_eq!(inner.pool.queued(), 0, "SchedulerSanity: queued tasks remained after eventLoop()");
        drop(inner);

        self.inner.borrow_mut().state = SchedulerState::Initial;
        Ok(())
    }

    fn route_top_level_exception(&self, payload: Box<dyn Any>) {
        if let Some(handle) = self.current_task() {
            let mut inner = self.inner.borrow_mut();
            if let Some(cb) = inner.exception_handler.as_mut() {
                cb(handle, payload);
                return;
            }
        }
        tracing::error!("unhandled panic reached the event loop with no exception handler installed");
    }

    /// Idempotent: clears the admission queue, signals the event loop to
    /// exit, and kills the calling task (if any).
    pub fn shutdown(&self) {
        let to_kill = {
            let mut inner = self.inner.borrow_mut();
            if inner.state == SchedulerState::ShuttingDown {
                return;
            }
            inner.state = SchedulerState::ShuttingDown;
            let dropped = inner.pool.clear_pending();
            for handle in &dropped {
                inner.tasks.try_remove(handle.0);
            }
            inner.current.last().copied()
        };
        self.event_loop().shutdown();
        if let Some(handle) = to_kill {
            self.kill(handle);
        }
    }
}
