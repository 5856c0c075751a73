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

//! Endpoint lifecycle notifications.

use crate::endpoint::Endpoint;
use crate::observability::events;
use crate::runtime::listener_list::ListenerList;
use crate::runtime::panic_message;
use std::fmt::{Display, Formatter};
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::error;

const COMPONENT: &str = "endpoint_lifecycle";

/// Hears about endpoint state transitions. All hooks default to no-ops.
pub trait EndpointObserver: Send + Sync {
    fn started(&self, _endpoint: &Endpoint) {}

    fn stopped(&self, _endpoint: &Endpoint) {}

    fn destroyed(&self, _endpoint: &Endpoint) {}
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Transition {
    Started,
    Stopped,
    Destroyed,
}

impl Display for Transition {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Transition::Started => write!(f, "started"),
            Transition::Stopped => write!(f, "stopped"),
            Transition::Destroyed => write!(f, "destroyed"),
        }
    }
}

/// Notifies a snapshot of `observers`. A panicking observer is logged and the
/// rest still run.
pub(crate) fn notify_observers(
    observers: &ListenerList<dyn EndpointObserver>,
    endpoint: &Endpoint,
    transition: Transition,
) {
    for observer in observers.snapshot().iter() {
        let outcome = catch_unwind(AssertUnwindSafe(|| match transition {
            Transition::Started => observer.started(endpoint),
            Transition::Stopped => observer.stopped(endpoint),
            Transition::Destroyed => observer.destroyed(endpoint),
        }));
        if let Err(panic) = outcome {
            let reason = panic_message(panic.as_ref());
            error!(
                event = events::ENDPOINT_OBSERVER_PANICKED,
                component = COMPONENT,
                endpoint_id = endpoint.id(),
                transition = %transition,
                reason = reason.as_str(),
                "endpoint observer panicked"
            );
        }
    }
}
