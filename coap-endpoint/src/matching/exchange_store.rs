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

use super::keys::{KeyMid, MidProvider, TokenGenerator};
use super::{MatchError, COMPONENT};
use crate::config::EndpointConfig;
use crate::exchange::{Exchange, ExchangeObserver};
use crate::message::{MessageCore, Token};
use crate::observability::events;
use crate::runtime::{lock, Executor, ScheduledTask};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

struct SeenExchange {
    exchange: Exchange,
    seen_at: Instant,
}

/// Token and message-ID registries plus the duplicate detector.
///
/// Exchanges leave both registries when they complete. Deduplication entries
/// stay until the sweeper expires them so late retransmissions can still be
/// answered from the completed exchange.
pub struct ExchangeStore {
    tokens: TokenGenerator,
    mids: MidProvider,
    dedup_lifetime: Duration,
    by_token: Mutex<HashMap<Token, Exchange>>,
    by_mid: Mutex<HashMap<KeyMid, Exchange>>,
    deduplicator: Mutex<HashMap<KeyMid, SeenExchange>>,
    this: Weak<ExchangeStore>,
}

impl ExchangeStore {
    pub fn new(config: &EndpointConfig) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            tokens: TokenGenerator::new(config.token_size_limit),
            mids: MidProvider::new(),
            dedup_lifetime: config.exchange_lifetime(),
            by_token: Mutex::new(HashMap::new()),
            by_mid: Mutex::new(HashMap::new()),
            deduplicator: Mutex::new(HashMap::new()),
            this: this.clone(),
        })
    }

    /// Returns the message ID of `message`, assigning the next free one first if needed.
    pub(crate) fn assign_mid(&self, message: &MessageCore) -> Result<u16, MatchError> {
        if let Some(mid) = message.mid() {
            return Ok(mid);
        }
        let mid = self.mids.next();
        message.set_mid(mid)?;
        Ok(mid)
    }

    /// Registers `exchange` under the token of `message`, generating one if absent.
    pub(crate) fn register_token(
        &self,
        exchange: &Exchange,
        message: &MessageCore,
    ) -> Result<Token, MatchError> {
        let mut by_token = lock(&self.by_token);
        let token = match message.token() {
            Some(token) => token,
            None => {
                let token = self.fresh_token(&by_token);
                message.set_token(token.clone())?;
                token
            }
        };

        match by_token.get(&token) {
            Some(existing) if !existing.ptr_eq(exchange) => {
                debug!(
                    event = events::MATCHER_TOKEN_IN_USE,
                    component = COMPONENT,
                    token = %token,
                    owner = existing.id(),
                    exchange_id = exchange.id(),
                    "token already registered"
                );
                return Err(MatchError::TokenInUse(token));
            }
            Some(_) => {}
            None => {
                by_token.insert(token.clone(), exchange.clone());
            }
        }
        drop(by_token);

        self.watch(exchange);
        Ok(token)
    }

    fn fresh_token(&self, by_token: &HashMap<Token, Exchange>) -> Token {
        loop {
            let token = self.tokens.next();
            if !by_token.contains_key(&token) {
                return token;
            }
        }
    }

    pub(crate) fn register_mid(&self, exchange: &Exchange, key: KeyMid) {
        lock(&self.by_mid).insert(key, exchange.clone());
        self.watch(exchange);
    }

    /// Registers `key` as the only outstanding message ID of `exchange`.
    ///
    /// Server exchanges send one confirmable message at a time; an older
    /// notification still waiting for its ACK is superseded by the new one.
    pub(crate) fn replace_mid(&self, exchange: &Exchange, key: KeyMid) {
        {
            let mut by_mid = lock(&self.by_mid);
            by_mid.retain(|_, registered| !registered.ptr_eq(exchange));
            by_mid.insert(key, exchange.clone());
        }
        self.watch(exchange);
    }

    pub fn find_by_token(&self, token: &Token) -> Option<Exchange> {
        lock(&self.by_token).get(token).cloned()
    }

    pub fn find_by_mid(&self, key: &KeyMid) -> Option<Exchange> {
        lock(&self.by_mid).get(key).cloned()
    }

    pub(crate) fn remove_by_mid(&self, key: &KeyMid) -> Option<Exchange> {
        lock(&self.by_mid).remove(key)
    }

    /// Records `exchange` as the first seen for `key`, or returns the exchange
    /// recorded earlier within the exchange lifetime.
    pub(crate) fn find_previous(&self, key: KeyMid, exchange: &Exchange) -> Option<Exchange> {
        let mut deduplicator = lock(&self.deduplicator);
        if let Some(previous) = deduplicator.get(&key) {
            if previous.seen_at.elapsed() < self.dedup_lifetime {
                return Some(previous.exchange.clone());
            }
        }
        deduplicator.insert(
            key,
            SeenExchange {
                exchange: exchange.clone(),
                seen_at: Instant::now(),
            },
        );
        None
    }

    /// Looks `key` up in the duplicate detector without recording anything.
    pub fn find_duplicate(&self, key: &KeyMid) -> Option<Exchange> {
        lock(&self.deduplicator)
            .get(key)
            .filter(|previous| previous.seen_at.elapsed() < self.dedup_lifetime)
            .map(|previous| previous.exchange.clone())
    }

    /// Drops `exchange` from the token and message-ID registries.
    pub(crate) fn remove_exchange(&self, exchange: &Exchange) {
        for token in [exchange.request().token(), exchange.current_request().token()]
            .into_iter()
            .flatten()
        {
            let mut by_token = lock(&self.by_token);
            if by_token.get(&token).is_some_and(|owner| owner.ptr_eq(exchange)) {
                by_token.remove(&token);
            }
        }
        lock(&self.by_mid).retain(|_, registered| !registered.ptr_eq(exchange));
    }

    /// Removes deduplication entries older than the exchange lifetime.
    pub fn sweep(&self) -> usize {
        let mut deduplicator = lock(&self.deduplicator);
        let before = deduplicator.len();
        deduplicator.retain(|_, previous| previous.seen_at.elapsed() < self.dedup_lifetime);
        let removed = before - deduplicator.len();
        if removed > 0 {
            debug!(
                event = events::MATCHER_SWEEP,
                component = COMPONENT,
                removed,
                remaining = deduplicator.len(),
                "expired deduplication entries"
            );
        }
        removed
    }

    pub fn clear(&self) {
        lock(&self.by_token).clear();
        lock(&self.by_mid).clear();
        lock(&self.deduplicator).clear();
        debug!(
            event = events::MATCHER_CLEAR,
            component = COMPONENT,
            "exchange store cleared"
        );
    }

    pub fn token_count(&self) -> usize {
        lock(&self.by_token).len()
    }

    pub fn mid_count(&self) -> usize {
        lock(&self.by_mid).len()
    }

    pub fn deduplicator_len(&self) -> usize {
        lock(&self.deduplicator).len()
    }

    /// Whether no open exchange is registered.
    pub fn is_empty(&self) -> bool {
        self.token_count() == 0 && self.mid_count() == 0
    }

    fn watch(&self, exchange: &Exchange) {
        if exchange.claim_store_cleanup() {
            exchange.add_observer(Arc::new(RemoveOnComplete {
                store: self.this.clone(),
            }));
        }
        // Completion observers run once; entries added after that are ours to drop.
        if exchange.is_complete() {
            self.remove_exchange(exchange);
        }
    }
}

struct RemoveOnComplete {
    store: Weak<ExchangeStore>,
}

impl ExchangeObserver for RemoveOnComplete {
    fn completed(&self, exchange: &Exchange) {
        if let Some(store) = self.store.upgrade() {
            store.remove_exchange(exchange);
            trace!(
                component = COMPONENT,
                exchange_id = exchange.id(),
                "exchange removed from store"
            );
        }
    }
}

/// Periodic deduplicator sweep that reschedules itself on the stage executor.
pub(crate) struct DeduplicatorSweep {
    store: Weak<ExchangeStore>,
    executor: Arc<dyn Executor>,
    interval: Duration,
    pending: Mutex<Option<ScheduledTask>>,
    stopped: AtomicBool,
    this: Weak<DeduplicatorSweep>,
}

impl DeduplicatorSweep {
    pub(crate) fn start(
        store: &Arc<ExchangeStore>,
        executor: Arc<dyn Executor>,
        interval: Duration,
    ) -> Arc<Self> {
        let sweep = Arc::new_cyclic(|this| Self {
            store: Arc::downgrade(store),
            executor,
            interval,
            pending: Mutex::new(None),
            stopped: AtomicBool::new(false),
            this: this.clone(),
        });
        sweep.schedule();
        sweep
    }

    fn schedule(&self) {
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }
        let this = self.this.clone();
        let task = self.executor.schedule(
            self.interval,
            Box::new(move || {
                if let Some(sweep) = this.upgrade() {
                    sweep.run();
                }
            }),
        );
        *lock(&self.pending) = Some(task.clone());
        if self.stopped.load(Ordering::SeqCst) {
            task.cancel();
        }
    }

    fn run(&self) {
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }
        if let Some(store) = self.store.upgrade() {
            store.sweep();
        }
        self.schedule();
    }

    pub(crate) fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        if let Some(task) = lock(&self.pending).take() {
            task.cancel();
        }
    }
}
