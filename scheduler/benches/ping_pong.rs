// Copyright 2026 the cotask authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Cost of one task yielding through the scheduler repeatedly: the
//! suspend/cycle-end/resume round trip is the hot path every cooperative
//! task takes on every `processEvents` call.

use std::rc::Rc;

use criterion::{criterion_group, criterion_main, Criterion};

use cotask::{Config, MioEventLoop, Task};

struct Ping {
    remaining: u32,
}

impl Task for Ping {
    fn run(&mut self) {
        let scheduler = cotask::scheduler().unwrap();
        for _ in 0..self.remaining {
            scheduler.process_events();
        }
    }
}

fn ping_pong(c: &mut Criterion) {
    c.bench_function("ping_pong_1000_yields", |b| {
        b.iter(|| {
            let event_loop = Rc::new(MioEventLoop::new().unwrap());
            let scheduler = cotask::init(Config::default(), event_loop).unwrap();
            scheduler.schedule(Ping { remaining: 1000 }).unwrap();
            scheduler.run().unwrap();
        });
    });
}

criterion_group!(benches, ping_pong);
criterion_main!(benches);
