// Copyright 2026 the cotask authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Stackful execution contexts ("worker contexts") used by `cotask` to run
//! task bodies as straight-line code that can block at arbitrary call depth.
//!
//! This is the `cotask` analogue of a stackful coroutine library: a
//! `WorkerContext` owns a dedicated stack and can be repeatedly `resume`d and
//! `suspend`ed from deep inside whatever the running entry point calls,
//! without threading a continuation object through every intermediate call.
//!
//! Stack switching itself is delegated to [`corosensei`], which provides the
//! same `resume`/`Yielder::suspend` shape that fixed-size `mmap`-backed
//! stacks with guard pages require, without us having to hand-verify
//! architecture-specific context-switch assembly.

use std::cell::Cell;
use std::panic::AssertUnwindSafe;

use corosensei::stack::DefaultStack;
use corosensei::{Coroutine, CoroutineResult};

/// Minimum stack size accepted by [`WorkerContext::new`], matching the floor
/// most stackful-coroutine implementations enforce once a guard page and a
/// handful of stack frames are accounted for.
pub const MIN_STACK_SIZE: usize = 4096 * 4;

/// Default worker stack size in bytes, matching `Config::worker_stack_size`'s
/// documented default.
pub const DEFAULT_STACK_SIZE: usize = 102_400;

/// Observable lifecycle phase of a [`WorkerContext`].
///
/// Only the scheduler thread may transition a context's phase, and
/// `Terminated` is reached exactly once per bound task cycle before the
/// context is `reset` and rebound.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ContextPhase {
    /// Allocated but never resumed.
    Fresh,
    /// Currently executing on this context (i.e. we are inside `resume`).
    Running,
    /// Suspended via [`suspend`]; may be `resume`d again.
    Suspended,
    /// The entry point returned; must be `reset` before it can run again.
    Terminated,
}

/// The value threaded through every `resume`/`suspend` boundary.
///
/// Ordinary scheduling only ever resumes with `Continue`; `Kill` is how
/// `cotask`'s task layer asks a suspended context to unwind at its next
/// suspension point instead of continuing.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Resumption {
    Continue,
    Kill,
}

scoped_tls::scoped_thread_local!(static YIELDER: corosensei::Yielder<Resumption, ()>);

/// Suspends the currently running [`WorkerContext`], returning control to
/// whoever called [`WorkerContext::resume`].
///
/// # Panics
///
/// Panics if called outside of a running `WorkerContext` entry point.
#[track_caller]
pub fn suspend() -> Resumption {
    if !YIELDER.is_set() {
        panic!("cotask_context::suspend() called outside of a running WorkerContext");
    }
    YIELDER.with(|yielder| yielder.suspend(()))
}

/// Returns `true` if called from inside a running [`WorkerContext`] entry
/// point, i.e. whether [`suspend`] may currently be called.
pub fn in_context() -> bool {
    YIELDER.is_set()
}

type Entry = Box<dyn FnOnce() + 'static>;

/// A reusable, stackful execution context.
///
/// A `WorkerContext` holds one bound entry point at a time. `reset` installs
/// a new entry, `resume` transfers control into it (running until it either
/// calls [`suspend`] or returns), and the stack allocation itself is reused
/// across binds rather than reallocated per task.
pub struct WorkerContext {
    stack_size: usize,
    phase: ContextPhase,
    coroutine: Option<Coroutine<Resumption, (), (), DefaultStack>>,
    spare_stack: Option<DefaultStack>,
}

impl WorkerContext {
    /// Allocates a new, empty context with the given stack size. The
    /// underlying stack is not mapped until the first [`reset`](Self::reset).
    pub fn new(stack_size: usize) -> std::io::Result<Self> {
        let stack_size = stack_size.max(MIN_STACK_SIZE);
        Ok(Self {
            stack_size,
            phase: ContextPhase::Fresh,
            coroutine: None,
            spare_stack: None,
        })
    }

    pub fn stack_size(&self) -> usize {
        self.stack_size
    }

    pub fn phase(&self) -> ContextPhase {
        self.phase
    }

    /// Installs a new entry function, reusing the previously allocated stack
    /// when one is available.
    ///
    /// # Panics
    ///
    /// Panics if the context is currently bound and has not terminated.
    pub fn reset(&mut self, entry: impl FnOnce() + 'static) -> std::io::Result<()> {
        assert!(
            !matches!(self.phase, ContextPhase::Running | ContextPhase::Suspended),
            "cannot reset a WorkerContext that is still bound to a running task"
        );

        let stack = match self.spare_stack.take() {
            Some(stack) => stack,
            None => DefaultStack::new(self.stack_size)?,
        };

        let entry: Entry = Box::new(entry);
        self.coroutine = Some(Coroutine::with_stack(stack, move |yielder, _first: Resumption| {
            YIELDER.set(yielder, entry);
        }));
        self.phase = ContextPhase::Fresh;
        Ok(())
    }

    /// Transfers control into this context. Returns the phase the context is
    /// in once control comes back (either `Suspended` or `Terminated`).
    ///
    /// # Panics
    ///
    /// Panics if the context has no entry installed, or has already
    /// terminated.
    pub fn resume(&mut self, input: Resumption) -> ContextPhase {
        let coroutine = self
            .coroutine
            .as_mut()
            .expect("attempt to resume a WorkerContext with no entry installed");
        assert!(!coroutine.done(), "attempt to resume a terminated WorkerContext");

        self.phase = ContextPhase::Running;
        match std::panic::catch_unwind(AssertUnwindSafe(|| coroutine.resume(input))) {
            Ok(CoroutineResult::Yield(())) => {
                self.phase = ContextPhase::Suspended;
            }
            Ok(CoroutineResult::Return(())) => {
                self.phase = ContextPhase::Terminated;
                self.reclaim_stack();
            }
            Err(payload) => {
                self.phase = ContextPhase::Terminated;
                self.reclaim_stack();
                std::panic::resume_unwind(payload);
            }
        }
        self.phase
    }

    fn reclaim_stack(&mut self) {
        if let Some(coroutine) = self.coroutine.take() {
            if coroutine.done() {
                self.spare_stack = Some(coroutine.into_stack());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn resume_suspend_resume_terminate() {
        let trace = Rc::new(RefCell::new(Vec::new()));
        let mut cx = WorkerContext::new(DEFAULT_STACK_SIZE).unwrap();

        let t = trace.clone();
        cx.reset(move || {
            t.borrow_mut().push("start");
            let r = suspend();
            assert_eq!(r, Resumption::Continue);
            t.borrow_mut().push("resumed");
        })
        .unwrap();

        assert_eq!(cx.resume(Resumption::Continue), ContextPhase::Suspended);
        assert_eq!(*trace.borrow(), vec!["start"]);

        assert_eq!(cx.resume(Resumption::Continue), ContextPhase::Terminated);
        assert_eq!(*trace.borrow(), vec!["start", "resumed"]);
    }

    #[test]
    fn reset_reuses_stack_allocation() {
        let mut cx = WorkerContext::new(MIN_STACK_SIZE).unwrap();
        cx.reset(|| {}).unwrap();
        assert_eq!(cx.resume(Resumption::Continue), ContextPhase::Terminated);
        assert!(cx.spare_stack.is_some());

        cx.reset(|| {}).unwrap();
        assert!(cx.spare_stack.is_none());
        assert_eq!(cx.resume(Resumption::Continue), ContextPhase::Terminated);
    }

    #[test]
    #[should_panic(expected = "outside of a running WorkerContext")]
    fn suspend_outside_context_panics() {
        suspend();
    }

    #[test]
    fn kill_resumption_is_observable_inside_entry() {
        let observed = Rc::new(Cell::new(None));
        let mut cx = WorkerContext::new(MIN_STACK_SIZE).unwrap();

        let o = observed.clone();
        cx.reset(move || {
            let r = suspend();
            o.set(Some(r));
        })
        .unwrap();

        assert_eq!(cx.resume(Resumption::Continue), ContextPhase::Suspended);
        assert_eq!(cx.resume(Resumption::Kill), ContextPhase::Terminated);
        assert_eq!(observed.get(), Some(Resumption::Kill));
    }
}
