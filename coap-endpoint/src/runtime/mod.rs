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

//! Runtime integration layer.
//!
//! Isolates the protocol stage, the serial task queue every stack operation of an
//! endpoint runs on, so async/threading behavior remains localized and predictable
//! for the rest of the crate.
//!
//! ```
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//! use coap_endpoint::runtime::{Executor, ProtocolStage};
//!
//! let stage = ProtocolStage::spawn("doc-stage").unwrap();
//! let counter = Arc::new(AtomicUsize::new(0));
//! let (done_tx, done_rx) = std::sync::mpsc::channel();
//!
//! let task_counter = counter.clone();
//! stage.execute(Box::new(move || {
//!     task_counter.fetch_add(1, Ordering::SeqCst);
//!     done_tx.send(()).unwrap();
//! }));
//!
//! done_rx.recv().unwrap();
//! assert_eq!(counter.load(Ordering::SeqCst), 1);
//! stage.shutdown();
//! ```

pub(crate) mod listener_list;
pub(crate) mod protocol_stage;

pub use protocol_stage::{ProtocolStage, DEFAULT_PROTOCOL_STAGE_THREAD_NAME};

use crate::observability::{events, fields};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tracing::error;

const COMPONENT: &str = "runtime";

/// Unit of work submitted to an [`Executor`].
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Serial execution context for stack operations.
///
/// Implementations must run tasks one at a time, in submission order, and must
/// contain a panicking task rather than propagate it (see [`run_task`]).
pub trait Executor: Send + Sync {
    fn execute(&self, task: Task);

    /// Runs `task` on this executor once `delay` has elapsed unless the returned
    /// handle is canceled first.
    fn schedule(&self, delay: Duration, task: Task) -> ScheduledTask;

    fn shutdown(&self) {}
}

/// Cancel handle for a task submitted through [`Executor::schedule`].
#[derive(Clone, Debug, Default)]
pub struct ScheduledTask {
    canceled: Arc<AtomicBool>,
}

impl ScheduledTask {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    /// Wraps `task` so it turns into a no-op once this handle is canceled.
    pub fn guard(&self, task: Task) -> Task {
        let canceled = self.canceled.clone();
        Box::new(move || {
            if !canceled.load(Ordering::SeqCst) {
                task();
            }
        })
    }
}

/// Runs one task and contains any panic it raises.
///
/// Returns `false` when the task panicked; the failure is logged and never
/// propagated to the caller.
pub fn run_task(task: Task) -> bool {
    match catch_unwind(AssertUnwindSafe(task)) {
        Ok(()) => true,
        Err(panic) => {
            let reason = panic_message(panic.as_ref());
            error!(
                event = events::RUNTIME_TASK_PANICKED,
                component = COMPONENT,
                worker_thread = fields::current_thread_name_or_default().as_str(),
                reason = reason.as_str(),
                "task failed on protocol stage"
            );
            false
        }
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        fields::NONE.to_string()
    }
}

// Poisoned locks only mean another task panicked while holding them; the
// protected state is still consistent for our single-field updates.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
