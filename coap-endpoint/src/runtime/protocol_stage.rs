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

//! Default serial executor: one named thread driving a current-thread tokio runtime.

use super::{lock, run_task, Executor, ScheduledTask, Task};
use crate::observability::events;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tokio::runtime::{Builder, Handle};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, warn};

pub const DEFAULT_PROTOCOL_STAGE_THREAD_NAME: &str = "coap-protocol-stage";
const COMPONENT: &str = "protocol_stage";

/// Serial task queue every stack operation of one endpoint runs on.
///
/// Tasks execute strictly in submission order. Timers are driven by the same
/// runtime and re-enter the queue when they fire, so they never run concurrently
/// with other stack work.
pub struct ProtocolStage {
    name: String,
    queue: mpsc::UnboundedSender<Task>,
    handle: Handle,
    shutdown_signal: Arc<Notify>,
    stopped: AtomicBool,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl ProtocolStage {
    /// Spawns the stage thread. Fails only when the OS refuses the thread or runtime.
    pub fn spawn(thread_name: impl Into<String>) -> std::io::Result<Arc<Self>> {
        let name = thread_name.into();
        info!(
            event = events::RUNTIME_SPAWN_START,
            component = COMPONENT,
            worker_thread = name.as_str(),
            "spawning protocol stage"
        );

        let runtime = match Builder::new_current_thread().enable_all().build() {
            Ok(runtime) => runtime,
            Err(err) => {
                warn!(
                    event = events::RUNTIME_SPAWN_FAILED,
                    component = COMPONENT,
                    worker_thread = name.as_str(),
                    err = %err,
                    "failed to build protocol stage runtime"
                );
                return Err(err);
            }
        };
        let handle = runtime.handle().clone();
        let (queue, mut receiver) = mpsc::unbounded_channel::<Task>();
        let shutdown_signal = Arc::new(Notify::new());
        let loop_shutdown = shutdown_signal.clone();

        let thread = thread::Builder::new().name(name.clone()).spawn(move || {
            runtime.block_on(async move {
                loop {
                    tokio::select! {
                        biased;
                        _ = loop_shutdown.notified() => break,
                        task = receiver.recv() => match task {
                            Some(task) => {
                                run_task(task);
                            }
                            None => break,
                        },
                    }
                }
            });
        });

        let thread = match thread {
            Ok(thread) => thread,
            Err(err) => {
                warn!(
                    event = events::RUNTIME_SPAWN_FAILED,
                    component = COMPONENT,
                    worker_thread = name.as_str(),
                    err = %err,
                    "failed to spawn protocol stage thread"
                );
                return Err(err);
            }
        };

        info!(
            event = events::RUNTIME_SPAWN_OK,
            component = COMPONENT,
            worker_thread = name.as_str(),
            "protocol stage running"
        );

        Ok(Arc::new(Self {
            name,
            queue,
            handle,
            shutdown_signal,
            stopped: AtomicBool::new(false),
            thread: Mutex::new(Some(thread)),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_shutdown(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Blocks until the stage thread exits. Must not be called from the stage itself.
    pub fn join(&self) {
        let thread = lock(&self.thread).take();
        if let Some(thread) = thread {
            if thread.thread().id() == thread::current().id() {
                return;
            }
            if thread.join().is_err() {
                warn!(
                    event = events::RUNTIME_SHUTDOWN,
                    component = COMPONENT,
                    worker_thread = self.name.as_str(),
                    "protocol stage thread exited with a panic"
                );
            }
        }
    }
}

impl Executor for ProtocolStage {
    fn execute(&self, task: Task) {
        if self.is_shutdown() || self.queue.send(task).is_err() {
            debug!(
                event = events::RUNTIME_TASK_DROPPED,
                component = COMPONENT,
                worker_thread = self.name.as_str(),
                "protocol stage stopped; dropping task"
            );
        }
    }

    fn schedule(&self, delay: Duration, task: Task) -> ScheduledTask {
        let scheduled = ScheduledTask::new();
        if self.is_shutdown() {
            scheduled.cancel();
            return scheduled;
        }

        let guarded = scheduled.guard(task);
        let queue = self.queue.clone();
        self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            // The receiver is gone once the stage shut down.
            let _ = queue.send(guarded);
        });
        scheduled
    }

    fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(
            event = events::RUNTIME_SHUTDOWN,
            component = COMPONENT,
            worker_thread = self.name.as_str(),
            "shutting down protocol stage"
        );
        self.shutdown_signal.notify_one();
    }
}

impl Drop for ProtocolStage {
    fn drop(&mut self) {
        self.shutdown();
    }
}
