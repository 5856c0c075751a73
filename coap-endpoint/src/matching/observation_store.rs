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

//! Client-side record of established observations.

use crate::message::options::MAX_OBSERVE_SEQUENCE;
use crate::message::{EndpointContext, Request, Token};
use crate::runtime::lock;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Half the sequence space (RFC 7641 §3.4).
const SEQUENCE_WINDOW: u32 = 1 << 23;
/// Notifications this much younger than the last one are fresh whatever their number.
const FRESHNESS_WINDOW: Duration = Duration::from_secs(128);

/// Arrival order of one notification.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct NotificationOrder {
    sequence: u32,
    received_at: Instant,
}

impl NotificationOrder {
    pub fn new(sequence: u32) -> Self {
        Self::at(sequence, Instant::now())
    }

    pub fn at(sequence: u32, received_at: Instant) -> Self {
        Self {
            sequence: sequence & MAX_OBSERVE_SEQUENCE,
            received_at,
        }
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    /// Whether this notification supersedes `previous` (RFC 7641 §3.4).
    pub fn is_newer_than(&self, previous: &NotificationOrder) -> bool {
        let (v1, v2) = (previous.sequence, self.sequence);
        (v1 < v2 && v2 - v1 < SEQUENCE_WINDOW)
            || (v1 > v2 && v1 - v2 > SEQUENCE_WINDOW)
            || self.received_at > previous.received_at + FRESHNESS_WINDOW
    }
}

/// An observe request this endpoint sent, kept so notifications can be matched
/// after the original exchange is gone.
#[derive(Clone, Debug)]
pub struct Observation {
    request: Request,
    context: Option<EndpointContext>,
    last_notification: Option<NotificationOrder>,
}

impl Observation {
    pub fn new(request: Request) -> Self {
        let context = request.destination();
        Self {
            request,
            context,
            last_notification: None,
        }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn context(&self) -> Option<&EndpointContext> {
        self.context.as_ref()
    }

    pub fn last_notification(&self) -> Option<NotificationOrder> {
        self.last_notification
    }
}

/// Storage for client observations, keyed by token.
///
/// Implementations must be safe to call from the protocol stage and from
/// application threads at once.
pub trait ObservationStore: Send + Sync {
    fn put(&self, token: Token, observation: Observation);

    fn get(&self, token: &Token) -> Option<Observation>;

    fn remove(&self, token: &Token) -> Option<Observation>;

    /// Replaces the stored context once a secure session is established.
    fn set_context(&self, token: &Token, context: EndpointContext);

    /// Records a notification. Returns `false` when a newer one was already
    /// recorded and `order` should be dropped as stale.
    fn record_notification(&self, token: &Token, order: NotificationOrder) -> bool;

    fn clear(&self);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Default)]
pub struct InMemoryObservationStore {
    observations: Mutex<HashMap<Token, Observation>>,
}

impl InMemoryObservationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ObservationStore for InMemoryObservationStore {
    fn put(&self, token: Token, observation: Observation) {
        lock(&self.observations).insert(token, observation);
    }

    fn get(&self, token: &Token) -> Option<Observation> {
        lock(&self.observations).get(token).cloned()
    }

    fn remove(&self, token: &Token) -> Option<Observation> {
        lock(&self.observations).remove(token)
    }

    fn set_context(&self, token: &Token, context: EndpointContext) {
        if let Some(observation) = lock(&self.observations).get_mut(token) {
            observation.context = Some(context);
        }
    }

    fn record_notification(&self, token: &Token, order: NotificationOrder) -> bool {
        let mut observations = lock(&self.observations);
        let Some(observation) = observations.get_mut(token) else {
            return true;
        };
        match observation.last_notification {
            Some(previous) if !order.is_newer_than(&previous) => false,
            _ => {
                observation.last_notification = Some(order);
                true
            }
        }
    }

    fn clear(&self) {
        lock(&self.observations).clear();
    }

    fn len(&self) -> usize {
        lock(&self.observations).len()
    }
}
