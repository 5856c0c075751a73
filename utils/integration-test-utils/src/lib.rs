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

mod loopback_network;
pub use loopback_network::{LoopbackConnector, Network};
mod manual_executor;
pub use manual_executor::ManualExecutor;
mod recorders;
pub use recorders::{
    RecordingDeliverer, RecordingExchangeObserver, RecordingInterceptor, RecordingMessageObserver,
    RecordingNotificationListener,
};

use std::sync::{Mutex, MutexGuard, Once, PoisonError};

static LOGGING: Once = Once::new();

/// Installs a `tracing` subscriber honoring `RUST_LOG`. Safe to call from every test.
pub fn init_logging() {
    LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
