// Copyright 2026 the cotask authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The reference [`EventLoop`] implementation, built directly on `mio`.
//!
//! Every trait method takes `&self`, so all mutable state here lives behind
//! `RefCell` (and `Cell` for small `Copy` flags) rather than requiring
//! exclusive access to the whole reactor — see the trait's own
//! documentation for why.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;
use std::panic::AssertUnwindSafe;
use std::rc::Rc;
use std::time::Duration;

use mio::unix::SourceFd;
use mio::{Events, Poll, Token};

use crate::event_loop::{CycleEndCallback, EventLoop, FdCallback, Interest, Readiness};

struct FdRegistration {
    callback: Rc<RefCell<FdCallback>>,
}

/// An `EventLoop` backed by `mio::Poll`, suitable for tests, benches, and
/// small standalone programs. Larger embedders are expected to bridge
/// `cotask` into their own reactor instead.
pub struct MioEventLoop {
    poll: RefCell<Poll>,
    registry: mio::Registry,
    fds: RefCell<HashMap<Token, FdRegistration>>,
    fd_tokens: RefCell<HashMap<RawFd, Token>>,
    next_token: Cell<usize>,
    cycle_end: RefCell<std::collections::VecDeque<CycleEndCallback>>,
    running: Cell<bool>,
    shutdown_requested: Cell<bool>,
}

impl MioEventLoop {
    pub fn new() -> io::Result<Self> {
        let poll = Poll::new()?;
        let registry = poll.registry().try_clone()?;
        Ok(Self {
            poll: RefCell::new(poll),
            registry,
            fds: RefCell::new(HashMap::new()),
            fd_tokens: RefCell::new(HashMap::new()),
            next_token: Cell::new(0),
            cycle_end: RefCell::new(std::collections::VecDeque::new()),
            running: Cell::new(false),
            shutdown_requested: Cell::new(false),
        })
    }

    fn next_token(&self) -> Token {
        let id = self.next_token.get();
        self.next_token.set(id + 1);
        Token(id)
    }

    fn run_inner(&self, exception_handler: &mut dyn FnMut(Box<dyn Any>)) -> io::Result<()> {
        let mut events = Events::with_capacity(1024);
        loop {
            if self.shutdown_requested.get() {
                return Ok(());
            }
            let has_fds = !self.fds.borrow().is_empty();
            let has_cycle_end = !self.cycle_end.borrow().is_empty();
            if !has_fds && !has_cycle_end {
                return Ok(());
            }
            // A pending cycle-end callback must run promptly, so poll with a
            // zero timeout rather than blocking when one is queued.
            let timeout = if has_cycle_end { Some(Duration::ZERO) } else { None };

            match self.poll.borrow_mut().poll(&mut events, timeout) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }

            for event in events.iter() {
                let token = event.token();
                let callback = self.fds.borrow().get(&token).map(|r| r.callback.clone());
                let Some(callback) = callback else { continue };
                let readiness = Readiness {
                    readable: event.is_readable(),
                    writable: event.is_writable(),
                };
                let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
                    (&mut *callback.borrow_mut())(readiness);
                }));
                if let Err(payload) = outcome {
                    exception_handler(payload);
                }
            }

            // Snapshot-drain: callbacks registered by callbacks run in this
            // very batch fire on the *next* cycle, not this one, or a
            // self-re-arming callback would starve fd processing forever.
            let due: Vec<CycleEndCallback> = self.cycle_end.borrow_mut().drain(..).collect();
            for callback in due {
                let outcome = std::panic::catch_unwind(AssertUnwindSafe(callback));
                if let Err(payload) = outcome {
                    exception_handler(payload);
                }
            }
        }
    }
}

fn to_mio_interest(interest: Interest) -> mio::Interest {
    match (interest.contains(Interest::READABLE), interest.contains(Interest::WRITABLE)) {
        (true, true) => mio::Interest::READABLE | mio::Interest::WRITABLE,
        (true, false) => mio::Interest::READABLE,
        (false, true) => mio::Interest::WRITABLE,
        (false, false) => mio::Interest::READABLE,
    }
}

impl EventLoop for MioEventLoop {
    fn register(&self, fd: RawFd, interest: Interest, callback: FdCallback) -> io::Result<()> {
        let token = self.next_token();
        self.registry
            .register(&mut SourceFd(&fd), token, to_mio_interest(interest))?;
        self.fds.borrow_mut().insert(token, FdRegistration { callback: Rc::new(RefCell::new(callback)) });
        self.fd_tokens.borrow_mut().insert(fd, token);
        Ok(())
    }

    fn deregister(&self, fd: RawFd) -> io::Result<()> {
        if let Some(token) = self.fd_tokens.borrow_mut().remove(&fd) {
            self.fds.borrow_mut().remove(&token);
            self.registry.deregister(&mut SourceFd(&fd))?;
        }
        Ok(())
    }

    fn on_cycle_end(&self, callback: CycleEndCallback) {
        self.cycle_end.borrow_mut().push_back(callback);
    }

    fn run(&self, exception_handler: &mut dyn FnMut(Box<dyn Any>)) -> io::Result<()> {
        assert!(!self.running.replace(true), "MioEventLoop::run is not re-entrant");
        self.shutdown_requested.set(false);
        let result = self.run_inner(exception_handler);
        self.running.set(false);
        result
    }

    fn shutdown(&self) {
        self.shutdown_requested.set(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell as StdRefCell;
    use std::io::Write;
    use std::os::unix::io::AsRawFd;
    use std::rc::Rc;

    #[test]
    fn fires_fd_callback_then_quiesces_after_deregistering() {
        let event_loop = Rc::new(MioEventLoop::new().unwrap());
        let (mut tx, rx) = std::os::unix::net::UnixStream::pair().unwrap();
        rx.set_nonblocking(true).unwrap();
        let fd = rx.as_raw_fd();
        tx.write_all(b"x").unwrap();

        let fired = Rc::new(StdRefCell::new(false));
        let f = fired.clone();
        let el = event_loop.clone();
        event_loop
            .register(
                fd,
                Interest::READABLE,
                Box::new(move |r| {
                    assert!(r.readable);
                    *f.borrow_mut() = true;
                    el.deregister(fd).unwrap();
                }),
            )
            .unwrap();

        event_loop.run(&mut |_| {}).unwrap();
        assert!(*fired.borrow());
        drop(rx);
        drop(tx);
    }

    #[test]
    fn cycle_end_callbacks_run_and_drain() {
        let event_loop = MioEventLoop::new().unwrap();
        let ran = Rc::new(StdRefCell::new(Vec::new()));
        let r1 = ran.clone();
        event_loop.on_cycle_end(Box::new(move || r1.borrow_mut().push(1)));
        let r2 = ran.clone();
        event_loop.on_cycle_end(Box::new(move || r2.borrow_mut().push(2)));

        event_loop.run(&mut |_| {}).unwrap();
        assert_eq!(*ran.borrow(), vec![1, 2]);
    }

    #[test]
    fn reentrant_run_is_caught_and_routed_to_the_exception_handler() {
        let event_loop = Rc::new(MioEventLoop::new().unwrap());
        let inner = event_loop.clone();
        event_loop.on_cycle_end(Box::new(move || {
            let _ = inner.run(&mut |_| {});
        }));

        let caught = Rc::new(StdRefCell::new(false));
        let c = caught.clone();
        event_loop
            .run(&mut move |payload| {
                let msg = payload
                    .downcast_ref::<&str>()
                    .copied()
                    .or_else(|| payload.downcast_ref::<String>().map(String::as_str));
                assert_eq!(msg, Some("MioEventLoop::run is not re-entrant"));
                *c.borrow_mut() = true;
            })
            .unwrap();
        assert!(*caught.borrow());
    }
}
