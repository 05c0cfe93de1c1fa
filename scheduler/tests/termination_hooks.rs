// Copyright 2026 the cotask authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::cell::RefCell;
use std::rc::Rc;

use cotask::{Config, MioEventLoop, Task};

struct Once;

impl Task for Once {
    fn run(&mut self) {}
}

#[test]
fn hooks_fire_in_lifo_order() {
    let event_loop = Rc::new(MioEventLoop::new().unwrap());
    let scheduler = cotask::init(Config::default(), event_loop).unwrap();

    let order = Rc::new(RefCell::new(Vec::new()));
    let handle = scheduler.queue(Once).unwrap();

    let o = order.clone();
    scheduler.on_termination(handle, move || o.borrow_mut().push("A"));
    let o = order.clone();
    scheduler.on_termination(handle, move || o.borrow_mut().push("B"));
    let o = order.clone();
    scheduler.on_termination(handle, move || o.borrow_mut().push("C"));

    scheduler.run().unwrap();
    assert_eq!(*order.borrow(), vec!["C", "B", "A"]);
}

#[test]
fn a_removed_hook_does_not_fire() {
    let event_loop = Rc::new(MioEventLoop::new().unwrap());
    let scheduler = cotask::init(Config::default(), event_loop).unwrap();

    let order = Rc::new(RefCell::new(Vec::new()));
    let handle = scheduler.queue(Once).unwrap();

    let o = order.clone();
    scheduler.on_termination(handle, move || o.borrow_mut().push("A"));
    let o = order.clone();
    let b_id = scheduler.on_termination(handle, move || o.borrow_mut().push("B")).unwrap();
    let o = order.clone();
    scheduler.on_termination(handle, move || o.borrow_mut().push("C"));

    assert!(scheduler.remove_termination(handle, b_id));
    assert!(!scheduler.remove_termination(handle, b_id), "removing twice is a no-op, not a double pop");

    scheduler.run().unwrap();
    assert_eq!(*order.borrow(), vec!["C", "A"]);
}
