// Copyright 2026 the cotask authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::rc::Rc;

use cotask::{Config, Error, MioEventLoop, SchedulerState, Task};

struct Suspender;

impl Task for Suspender {
    fn run(&mut self) {
        cotask::scheduler().unwrap().process_events();
    }
}

#[test]
fn shutdown_is_idempotent() {
    let event_loop = Rc::new(MioEventLoop::new().unwrap());
    let scheduler = cotask::init(Config::default(), event_loop).unwrap();

    scheduler.shutdown();
    scheduler.shutdown();
    assert_eq!(scheduler.state(), SchedulerState::ShuttingDown);
}

#[test]
fn worker_limit_one_queue_limit_one_boundary() {
    let event_loop = Rc::new(MioEventLoop::new().unwrap());
    let scheduler = cotask::init(
        Config::builder().worker_limit(1).queue_limit(1).build().unwrap(),
        event_loop,
    )
    .unwrap();

    scheduler.schedule(Suspender).unwrap();
    scheduler.schedule(Suspender).unwrap();
    let err = scheduler.schedule(Suspender).unwrap_err();
    assert!(matches!(err, Error::TaskQueueFull));

    scheduler.run().unwrap();
}

#[test]
fn replacing_a_quiescent_scheduler_behaves_like_a_fresh_startup() {
    let event_loop = Rc::new(MioEventLoop::new().unwrap());
    let scheduler = cotask::init(Config::default(), event_loop).unwrap();
    scheduler.schedule(Suspender).unwrap();
    scheduler.run().unwrap();
    assert_eq!(scheduler.state(), SchedulerState::Initial);

    let event_loop2 = Rc::new(MioEventLoop::new().unwrap());
    let scheduler2 = cotask::init(Config::default(), event_loop2).unwrap();
    assert_eq!(scheduler2.state(), SchedulerState::Initial);
    assert_eq!(scheduler2.stats().busy_workers, 0);

    scheduler2.schedule(Suspender).unwrap();
    scheduler2.run().unwrap();
}
