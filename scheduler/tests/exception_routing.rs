// Copyright 2026 the cotask authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::cell::RefCell;
use std::rc::Rc;

use cotask::{Config, MioEventLoop, Task, TaskHandle};

struct ThrowsImmediately;

impl Task for ThrowsImmediately {
    fn run(&mut self) {
        panic!("kaboom");
    }
}

struct ThrowsAfterATick;

impl Task for ThrowsAfterATick {
    fn run(&mut self) {
        cotask::scheduler().unwrap().process_events();
        panic!("kaboom");
    }
}

fn panic_message(payload: &dyn std::any::Any) -> String {
    payload
        .downcast_ref::<&str>()
        .copied()
        .map(str::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_default()
}

#[test]
fn exception_handler_is_invoked_once_per_throwing_task_with_the_same_message() {
    let event_loop = Rc::new(MioEventLoop::new().unwrap());
    let scheduler = cotask::init(Config::default(), event_loop).unwrap();

    let seen: Rc<RefCell<Vec<(TaskHandle, String)>>> = Rc::new(RefCell::new(Vec::new()));
    let s = seen.clone();
    scheduler.set_exception_handler(move |handle, payload| {
        s.borrow_mut().push((handle, panic_message(&*payload)));
    });

    scheduler.schedule(ThrowsImmediately).unwrap();
    scheduler.schedule(ThrowsAfterATick).unwrap();

    scheduler.run().unwrap();

    let seen = seen.borrow();
    assert_eq!(seen.len(), 2, "handler must fire exactly once per throwing task");
    assert_eq!(seen[0].1, "kaboom");
    assert_eq!(seen[1].1, "kaboom");
    assert_ne!(seen[0].0, seen[1].0);
}
