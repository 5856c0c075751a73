/********************************************************************************
 * Copyright (c) 2024 Contributors to the Eclipse Foundation
 *
 * See the NOTICE file(s) distributed with this work for additional
 * information regarding copyright ownership.
 *
 * This program and the accompanying materials are made available under the
 * terms of the Apache License Version 2.0 which is available at
 * https://www.apache.org/licenses/LICENSE-2.0
 *
 * SPDX-License-Identifier: Apache-2.0
 ********************************************************************************/

use crate::lock;
use coap_endpoint::runtime::{run_task, Executor, ScheduledTask, Task};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

#[derive(Default)]
struct ManualState {
    now: Duration,
    sequence: u64,
    queue: VecDeque<Task>,
    timers: Vec<(Duration, u64, Task)>,
    shut_down: bool,
}

/// Deterministic protocol stage: nothing runs until the test drives it.
///
/// `execute` only queues; [`ManualExecutor::run_pending`] drains the queue and
/// [`ManualExecutor::advance`] moves a virtual clock, firing due timers in order.
#[derive(Default)]
pub struct ManualExecutor {
    state: Mutex<ManualState>,
}

impl ManualExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn now(&self) -> Duration {
        lock(&self.state).now
    }

    /// Tasks queued and not yet run.
    pub fn pending(&self) -> usize {
        lock(&self.state).queue.len()
    }

    pub fn pending_timers(&self) -> usize {
        lock(&self.state).timers.len()
    }

    pub fn is_shut_down(&self) -> bool {
        lock(&self.state).shut_down
    }

    /// Runs queued tasks, including those they queue, until the queue is empty.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            let next = lock(&self.state).queue.pop_front();
            let Some(task) = next else {
                return ran;
            };
            if !run_task(task) {
                debug!("manual executor task panicked");
            }
            ran += 1;
        }
    }

    /// Moves the clock forward by `by`, running every timer that falls due and
    /// the work it queues.
    pub fn advance(&self, by: Duration) {
        self.run_pending();
        let target = lock(&self.state).now + by;
        loop {
            let next = {
                let mut state = lock(&self.state);
                let due = state
                    .timers
                    .iter()
                    .enumerate()
                    .filter(|(_, (at, _, _))| *at <= target)
                    .min_by_key(|(_, (at, sequence, _))| (*at, *sequence))
                    .map(|(index, _)| index);
                due.map(|index| {
                    let (at, _, task) = state.timers.remove(index);
                    state.now = at;
                    task
                })
            };
            let Some(task) = next else {
                break;
            };
            run_task(task);
            self.run_pending();
        }
        lock(&self.state).now = target;
    }
}

impl Executor for ManualExecutor {
    fn execute(&self, task: Task) {
        let mut state = lock(&self.state);
        if !state.shut_down {
            state.queue.push_back(task);
        }
    }

    fn schedule(&self, delay: Duration, task: Task) -> ScheduledTask {
        let scheduled = ScheduledTask::new();
        let mut state = lock(&self.state);
        if state.shut_down {
            scheduled.cancel();
            return scheduled;
        }
        let at = state.now + delay;
        state.sequence += 1;
        let sequence = state.sequence;
        state.timers.push((at, sequence, scheduled.guard(task)));
        scheduled
    }

    fn shutdown(&self) {
        let mut state = lock(&self.state);
        state.shut_down = true;
        state.queue.clear();
        state.timers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn nothing_runs_until_driven() {
        let executor = ManualExecutor::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let task_counter = counter.clone();

        executor.execute(Box::new(move || {
            task_counter.fetch_add(1, Ordering::SeqCst);
        }));

        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(executor.run_pending(), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn timers_fire_in_virtual_time_order() {
        let executor = ManualExecutor::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for (delay, label) in [(30, "late"), (10, "early"), (20, "middle")] {
            let order = order.clone();
            executor.schedule(
                Duration::from_millis(delay),
                Box::new(move || order.lock().expect("order lock").push(label)),
            );
        }
        let canceled = executor.schedule(Duration::from_millis(5), Box::new(|| panic!("canceled")));
        canceled.cancel();

        executor.advance(Duration::from_millis(25));
        assert_eq!(*order.lock().expect("order lock"), vec!["early", "middle"]);
        assert_eq!(executor.now(), Duration::from_millis(25));

        executor.advance(Duration::from_millis(10));
        assert_eq!(*order.lock().expect("order lock"), vec!["early", "middle", "late"]);
    }
}
