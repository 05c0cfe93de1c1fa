// Copyright 2026 the cotask authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Cost of admitting and draining a burst of tasks well past `worker_limit`,
//! exercising the admission queue and the per-cycle refill loop rather than
//! just the suspend/resume round trip `ping_pong` measures.

use std::rc::Rc;

use criterion::{criterion_group, criterion_main, Criterion};

use cotask::{Config, MioEventLoop, Task};

struct Noop;

impl Task for Noop {
    fn run(&mut self) {}
}

fn fan_out(c: &mut Criterion) {
    c.bench_function("fan_out_2000_tasks", |b| {
        b.iter(|| {
            let event_loop = Rc::new(MioEventLoop::new().unwrap());
            let scheduler = cotask::init(
                Config::builder().worker_limit(32).queue_limit(2048).build().unwrap(),
                event_loop,
            )
            .unwrap();
            for _ in 0..2000 {
                scheduler.schedule(Noop).unwrap();
            }
            scheduler.run().unwrap();
        });
    });
}

criterion_group!(benches, fan_out);
criterion_main!(benches);
