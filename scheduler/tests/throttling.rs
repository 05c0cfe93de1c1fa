// Copyright 2026 the cotask authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::cell::Cell;
use std::rc::Rc;

use cotask::{
    Config, MioEventLoop, Preparable, Suspendable, Task, ThrottleAction, ThrottledTaskPool, Throttler,
};

/// One tick of simulated work: suspends once, so it occupies a pool slot for
/// a full cycle instead of finishing inline the instant it is dispatched.
struct Unit;

impl Task for Unit {
    fn run(&mut self) {
        cotask::scheduler().unwrap().process_events();
    }
}

impl Preparable<()> for Unit {
    fn prepare(&mut self, _args: ()) {}
}

struct RecordingSuspendable {
    suspend_calls: Rc<Cell<u32>>,
    resume_calls: Rc<Cell<u32>>,
}

impl Suspendable for RecordingSuspendable {
    fn suspend(&mut self) {
        self.suspend_calls.set(self.suspend_calls.get() + 1);
    }
    fn resume(&mut self) {
        self.resume_calls.set(self.resume_calls.get() + 1);
    }
}

/// Watermark policy identical in shape to `QueueUsageThrottler`, with an
/// added completion counter so the driver task below can tell when to stop
/// producing more work.
struct CountingThrottler {
    suspend_at: usize,
    resume_at: usize,
    suspended: bool,
    completed: Rc<Cell<u32>>,
}

impl Throttler for CountingThrottler {
    fn on_start(&mut self, busy: usize, queued: usize) -> Option<ThrottleAction> {
        if !self.suspended && busy + queued >= self.suspend_at {
            self.suspended = true;
            Some(ThrottleAction::Suspend)
        } else {
            None
        }
    }

    fn on_terminate(&mut self, busy: usize, queued: usize) -> Option<ThrottleAction> {
        self.completed.set(self.completed.get() + 1);
        if self.suspended && busy + queued <= self.resume_at {
            self.suspended = false;
            Some(ThrottleAction::Resume)
        } else {
            None
        }
    }
}

struct Driver {
    pool: Rc<ThrottledTaskPool<Unit>>,
    scheduled: Rc<Cell<u32>>,
    completed: Rc<Cell<u32>>,
    target: u32,
}

impl Task for Driver {
    fn run(&mut self) {
        let scheduler = cotask::scheduler().unwrap();
        while self.completed.get() < self.target {
            if self.pool.start(()).unwrap() {
                self.scheduled.set(self.scheduled.get() + 1);
            }
            scheduler.process_events();
        }
    }
}

#[test]
fn pool_suspends_upstream_at_watermark_and_resumes_at_floor() {
    const TARGET: u32 = 1000;
    const POOL_SIZE: usize = 10;

    let event_loop = Rc::new(MioEventLoop::new().unwrap());
    let scheduler = cotask::init(
        Config::builder().worker_limit(16).queue_limit(32).build().unwrap(),
        event_loop,
    )
    .unwrap();

    let suspend_calls = Rc::new(Cell::new(0));
    let resume_calls = Rc::new(Cell::new(0));
    let completed = Rc::new(Cell::new(0));
    let scheduled = Rc::new(Cell::new(0));

    let pool = ThrottledTaskPool::new(
        scheduler.clone(),
        POOL_SIZE,
        || Unit,
        RecordingSuspendable { suspend_calls: suspend_calls.clone(), resume_calls: resume_calls.clone() },
        CountingThrottler {
            suspend_at: POOL_SIZE,
            resume_at: 0,
            suspended: false,
            completed: completed.clone(),
        },
    );

    scheduler
        .schedule(Driver {
            pool: pool.clone(),
            scheduled: scheduled.clone(),
            completed: completed.clone(),
            target: TARGET,
        })
        .unwrap();

    scheduler.run().unwrap();

    assert!(completed.get() >= TARGET);
    assert!(
        scheduled.get() as u64 <= TARGET as u64 + POOL_SIZE as u64 * 4,
        "scheduled {} should stay close to the {} target",
        scheduled.get(),
        TARGET
    );
    assert!(suspend_calls.get() >= 1, "busy count must have hit the suspend watermark at least once");
    assert!(resume_calls.get() >= 1, "busy count must have dropped back to the resume floor at least once");
}
