// Copyright 2026 the cotask authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The `EventLoop` collaborator: an opaque, edge-triggered reactor the
//! scheduler drives but does not implement. `cotask` ships one concrete
//! implementation, [`crate::MioEventLoop`], for tests, benches, and small
//! programs; production embedders are expected to supply their own.

use std::any::Any;
use std::io;
use std::os::unix::io::RawFd;

use bitflags::bitflags;

bitflags! {
    /// Readiness interest for a registered file descriptor.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct Interest: u8 {
        const READABLE = 0b01;
        const WRITABLE = 0b10;
    }
}

/// What became ready on a registered file descriptor.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
}

/// Callback fired when a registered fd becomes ready.
pub type FdCallback = Box<dyn FnMut(Readiness)>;

/// One-shot callback fired once after the next fd-batch drains.
pub type CycleEndCallback = Box<dyn FnOnce()>;

/// The reactor `cotask` drives. Every method takes `&self`: implementations
/// hold their state behind interior mutability so that callbacks running
/// *during* `run` (the scheduler's own cycle-end refill and
/// `delayedResume`) can freely call `register`/`on_cycle_end` again without
/// needing exclusive access to the whole event loop. `run` itself must not
/// be re-entrant — calling it again while already running must panic rather
/// than silently corrupt state — but that is a runtime contract on the
/// implementation, not something the borrow checker can express once both
/// the scheduler and its callbacks need to reach the same reactor.
pub trait EventLoop {
    /// Registers interest in `fd`; `callback` fires on every cycle in which
    /// `fd` becomes ready for the requested interest.
    fn register(&self, fd: RawFd, interest: Interest, callback: FdCallback) -> io::Result<()>;

    /// Removes a previously registered fd. No-op if not registered.
    fn deregister(&self, fd: RawFd) -> io::Result<()>;

    /// Arms a one-shot callback that fires once after the next fd-batch is
    /// fully processed, before the loop blocks again. Implementations must
    /// preserve registration order (an ordered callback queue).
    fn on_cycle_end(&self, callback: CycleEndCallback);

    /// Blocks, processing fd readiness and cycle-end callbacks, until no fd
    /// is registered and no cycle-end callback is pending. If a fd callback
    /// or cycle-end callback panics, the panic payload is routed to
    /// `exception_handler` instead of unwinding out of `run`.
    ///
    /// # Panics
    ///
    /// Implementations must panic if `run` is called while already running.
    fn run(&self, exception_handler: &mut dyn FnMut(Box<dyn Any>)) -> io::Result<()>;

    /// Causes the current (or next) `run` to return promptly.
    fn shutdown(&self);
}
