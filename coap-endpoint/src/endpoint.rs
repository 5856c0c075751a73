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

//! Public endpoint facade.

use crate::config::EndpointConfig;
use crate::control_plane::lifecycle::{notify_observers, Transition};
use crate::control_plane::{
    ClientMessageDeliverer, EndpointObserver, MessageDeliverer, MessageInterceptor,
    NotificationListener,
};
use crate::data_plane::inbox::Inbox;
use crate::data_plane::log_stack_error;
use crate::data_plane::outbox::Outbox;
use crate::error::EndpointError;
use crate::exchange::{CleanupObserver, Exchange};
use crate::matching::{InMemoryObservationStore, Matcher, ObservationStore, TcpMatcher, UdpMatcher};
use crate::message::{EmptyMessage, Request, Response, Token};
use crate::observability::events;
use crate::runtime::listener_list::ListenerList;
use crate::runtime::{read, write, Executor, ProtocolStage, DEFAULT_PROTOCOL_STAGE_THREAD_NAME};
use crate::stack::{ExecutorSlot, ProtocolStack};
use crate::transport::codec::{codec_for, MessageCodec};
use crate::transport::{Connector, Protocol};
use std::fmt::{Debug, Formatter};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

const COMPONENT: &str = "endpoint";

/// State shared between the facade, the inbox and every exchange it creates.
pub(crate) struct EndpointShared {
    pub(crate) id: String,
    pub(crate) config: EndpointConfig,
    pub(crate) protocol: Protocol,
    pub(crate) connector: Arc<dyn Connector>,
    pub(crate) codec: Arc<dyn MessageCodec>,
    pub(crate) matcher: Arc<dyn Matcher>,
    pub(crate) outbox: Arc<Outbox>,
    pub(crate) stack: Arc<ProtocolStack>,
    pub(crate) interceptors: Arc<ListenerList<dyn MessageInterceptor>>,
    pub(crate) observers: ListenerList<dyn EndpointObserver>,
    pub(crate) notification_listeners: Arc<ListenerList<dyn NotificationListener>>,
    pub(crate) executor: ExecutorSlot,
    owns_executor: AtomicBool,
    started: AtomicBool,
    destroyed: AtomicBool,
    lifecycle: tokio::sync::Mutex<()>,
}

impl EndpointShared {
    pub(crate) fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// The executor, but only while the endpoint is started.
    pub(crate) fn running_executor(&self) -> Option<Arc<dyn Executor>> {
        if !self.is_started() || self.is_destroyed() {
            return None;
        }
        read(&self.executor).clone()
    }
}

/// Assembles an [`Endpoint`] around a connector.
pub struct EndpointBuilder {
    connector: Arc<dyn Connector>,
    config: EndpointConfig,
    executor: Option<Arc<dyn Executor>>,
    observation_store: Option<Arc<dyn ObservationStore>>,
    message_deliverer: Option<Arc<dyn MessageDeliverer>>,
}

impl EndpointBuilder {
    pub fn config(mut self, config: EndpointConfig) -> Self {
        self.config = config;
        self
    }

    /// Uses `executor` as the protocol stage instead of spawning one on start.
    pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn observation_store(mut self, store: Arc<dyn ObservationStore>) -> Self {
        self.observation_store = Some(store);
        self
    }

    pub fn message_deliverer(mut self, deliverer: Arc<dyn MessageDeliverer>) -> Self {
        self.message_deliverer = Some(deliverer);
        self
    }

    pub fn build(self) -> Result<Endpoint, EndpointError> {
        self.config.validate()?;

        let protocol = self.connector.protocol();
        let observations = self
            .observation_store
            .unwrap_or_else(|| Arc::new(InMemoryObservationStore::new()));
        let matcher: Arc<dyn Matcher> = if protocol.is_reliable() {
            Arc::new(TcpMatcher::new(&self.config, observations.clone()))
        } else {
            Arc::new(UdpMatcher::new(&self.config, observations.clone()))
        };
        let codec = codec_for(protocol);
        let interceptors = Arc::new(ListenerList::new());
        let outbox = Arc::new(Outbox::new(
            matcher.clone(),
            interceptors.clone(),
            codec.clone(),
            self.connector.clone(),
        ));
        let executor: ExecutorSlot = Arc::new(RwLock::new(self.executor));
        let notification_listeners = Arc::new(ListenerList::new());
        let stack = ProtocolStack::for_protocol(
            protocol,
            &self.config,
            outbox.clone(),
            observations,
            notification_listeners.clone(),
            executor.clone(),
        );
        if let Some(deliverer) = self.message_deliverer {
            stack.set_deliverer(deliverer);
        }

        let shared = Arc::new(EndpointShared {
            id: uuid::Uuid::new_v4().to_string(),
            config: self.config,
            protocol,
            connector: self.connector,
            codec,
            matcher,
            outbox,
            stack,
            interceptors,
            observers: ListenerList::new(),
            notification_listeners,
            executor,
            owns_executor: AtomicBool::new(false),
            started: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            lifecycle: tokio::sync::Mutex::new(()),
        });
        shared
            .connector
            .set_receiver(Arc::new(Inbox::new(Arc::downgrade(&shared))));

        Ok(Endpoint { shared })
    }
}

/// A CoAP endpoint: one connector, one matcher and one processing stack.
///
/// Cheap to clone; all clones drive the same endpoint. Lifecycle is
/// created, started and stopped any number of times, then destroyed.
#[derive(Clone)]
pub struct Endpoint {
    shared: Arc<EndpointShared>,
}

impl Endpoint {
    pub fn builder(connector: Arc<dyn Connector>) -> EndpointBuilder {
        EndpointBuilder {
            connector,
            config: EndpointConfig::default(),
            executor: None,
            observation_store: None,
            message_deliverer: None,
        }
    }

    pub(crate) fn from_shared(shared: Arc<EndpointShared>) -> Self {
        Self { shared }
    }

    /// Starts the matcher and the connector. Calling it on a started endpoint is a no-op.
    ///
    /// Installs a [`ClientMessageDeliverer`] when none was set and spawns a
    /// [`ProtocolStage`] when no executor was supplied. That stage lives until
    /// [`Endpoint::destroy`]. A connector failure rolls the endpoint back to stopped.
    pub async fn start(&self) -> Result<(), EndpointError> {
        let _guard = self.shared.lifecycle.lock().await;
        if self.shared.is_destroyed() {
            return Err(EndpointError::Destroyed);
        }
        if self.shared.is_started() {
            debug!(
                event = events::ENDPOINT_ALREADY_STARTED,
                component = COMPONENT,
                endpoint_id = self.id(),
                "endpoint already started"
            );
            return Ok(());
        }

        info!(
            event = events::ENDPOINT_START,
            component = COMPONENT,
            endpoint_id = self.id(),
            protocol = self.shared.protocol.scheme(),
            "starting endpoint"
        );

        if !self.shared.stack.has_deliverer() {
            info!(
                event = events::ENDPOINT_DEFAULT_DELIVERER,
                component = COMPONENT,
                endpoint_id = self.id(),
                "no message deliverer set; installing client deliverer"
            );
            self.shared.stack.set_deliverer(Arc::new(ClientMessageDeliverer));
        }

        let executor = self.executor_or_default()?;
        self.shared.started.store(true, Ordering::SeqCst);
        self.shared.matcher.start(executor);

        if let Err(err) = self.shared.connector.start().await {
            warn!(
                event = events::ENDPOINT_START_FAILED,
                component = COMPONENT,
                endpoint_id = self.id(),
                err = %err,
                "connector failed to start"
            );
            self.stop_locked().await;
            return Err(err.into());
        }

        info!(
            event = events::ENDPOINT_START_OK,
            component = COMPONENT,
            endpoint_id = self.id(),
            address = ?self.address(),
            "endpoint started"
        );
        notify_observers(&self.shared.observers, self, Transition::Started);
        Ok(())
    }

    fn executor_or_default(&self) -> Result<Arc<dyn Executor>, EndpointError> {
        if let Some(executor) = read(&self.shared.executor).clone() {
            return Ok(executor);
        }
        info!(
            event = events::ENDPOINT_DEFAULT_EXECUTOR,
            component = COMPONENT,
            endpoint_id = self.id(),
            worker_thread = DEFAULT_PROTOCOL_STAGE_THREAD_NAME,
            "no executor set; spawning protocol stage"
        );
        let stage: Arc<dyn Executor> =
            ProtocolStage::spawn(DEFAULT_PROTOCOL_STAGE_THREAD_NAME).map_err(EndpointError::Executor)?;
        *write(&self.shared.executor) = Some(stage.clone());
        self.shared.owns_executor.store(true, Ordering::SeqCst);
        Ok(stage)
    }

    /// Stops the connector and the matcher.
    ///
    /// Open exchanges are kept and the protocol stage keeps running, so their
    /// retransmission timers still fire and may time them out.
    pub async fn stop(&self) {
        let _guard = self.shared.lifecycle.lock().await;
        self.stop_locked().await;
    }

    async fn stop_locked(&self) {
        if !self.shared.started.swap(false, Ordering::SeqCst) {
            debug!(
                event = events::ENDPOINT_ALREADY_STOPPED,
                component = COMPONENT,
                endpoint_id = self.id(),
                "endpoint not running"
            );
            return;
        }

        info!(
            event = events::ENDPOINT_STOP,
            component = COMPONENT,
            endpoint_id = self.id(),
            "stopping endpoint"
        );
        self.shared.connector.stop().await;
        self.shared.matcher.stop();
        notify_observers(&self.shared.observers, self, Transition::Stopped);
    }

    /// Shuts down the protocol stage if this endpoint spawned it.
    fn release_owned_executor(&self) {
        if self.shared.owns_executor.swap(false, Ordering::SeqCst) {
            if let Some(executor) = write(&self.shared.executor).take() {
                executor.shutdown();
            }
        }
    }

    /// Stops the endpoint if needed and releases the connector and the stack.
    /// A destroyed endpoint cannot be started again.
    pub async fn destroy(&self) {
        let _guard = self.shared.lifecycle.lock().await;
        if self.shared.is_destroyed() {
            return;
        }
        info!(
            event = events::ENDPOINT_DESTROY,
            component = COMPONENT,
            endpoint_id = self.id(),
            "destroying endpoint"
        );
        self.stop_locked().await;
        self.shared.destroyed.store(true, Ordering::SeqCst);
        self.release_owned_executor();
        self.shared.matcher.clear();
        self.shared.stack.destroy();
        self.shared.connector.destroy().await;
        notify_observers(&self.shared.observers, self, Transition::Destroyed);
    }

    /// Drops every tracked exchange, observation and blockwise transfer.
    pub fn clear(&self) {
        self.shared.matcher.clear();
        self.shared.stack.clear();
    }

    pub fn is_started(&self) -> bool {
        self.shared.is_started()
    }

    /// Sends `request` on the protocol stage and returns its exchange.
    ///
    /// Fails immediately when the request has no destination or the endpoint
    /// is not running. Transmission outcomes arrive through the request's
    /// message observers.
    pub fn send_request(&self, request: Request) -> Result<Exchange, EndpointError> {
        if self.shared.is_destroyed() {
            return Err(EndpointError::Destroyed);
        }
        if request.destination().is_none() {
            return Err(EndpointError::MissingDestination);
        }
        let executor = self
            .shared
            .running_executor()
            .ok_or(EndpointError::NotStarted)?;

        let exchange = Exchange::new_local(request.clone());
        exchange.set_endpoint(Arc::downgrade(&self.shared));
        CleanupObserver::attach(&exchange, &request);

        let shared = Arc::downgrade(&self.shared);
        let task_exchange = exchange.clone();
        executor.execute(Box::new(move || {
            let Some(shared) = shared.upgrade() else {
                return;
            };
            if let Err(err) = shared.stack.send_request(&task_exchange, &request) {
                log_stack_error(COMPONENT, task_exchange.id(), &err);
                task_exchange.set_complete();
            }
        }));
        Ok(exchange)
    }

    /// Sends `response` for `exchange`.
    ///
    /// Runs on the calling thread when the exchange has a custom executor,
    /// otherwise on the protocol stage.
    pub fn send_response(&self, exchange: &Exchange, response: Response) -> Result<(), EndpointError> {
        if self.shared.is_destroyed() {
            return Err(EndpointError::Destroyed);
        }
        if response.destination().is_none() {
            return Err(EndpointError::MissingDestination);
        }

        if exchange.has_custom_executor() {
            return self
                .shared
                .stack
                .send_response(exchange, &response)
                .map_err(EndpointError::from);
        }

        let executor = self
            .shared
            .running_executor()
            .ok_or(EndpointError::NotStarted)?;
        let shared = Arc::downgrade(&self.shared);
        let exchange = exchange.clone();
        executor.execute(Box::new(move || {
            let Some(shared) = shared.upgrade() else {
                return;
            };
            if let Err(err) = shared.stack.send_response(&exchange, &response) {
                log_stack_error(COMPONENT, exchange.id(), &err);
            }
        }));
        Ok(())
    }

    /// Sends an ACK or RST on the calling thread. The message is fully
    /// processed when this returns.
    pub fn send_empty_message(
        &self,
        exchange: Option<&Exchange>,
        message: EmptyMessage,
    ) -> Result<(), EndpointError> {
        if self.shared.is_destroyed() {
            return Err(EndpointError::Destroyed);
        }
        self.shared
            .stack
            .send_empty_message(exchange, &message)
            .map_err(EndpointError::from)
    }

    /// Stops following the observation registered under `token`.
    pub fn cancel_observation(&self, token: &Token) {
        self.shared.matcher.cancel_observe(token);
    }

    pub fn add_interceptor(&self, interceptor: Arc<dyn MessageInterceptor>) {
        self.shared.interceptors.add(interceptor);
    }

    pub fn remove_interceptor(&self, interceptor: &Arc<dyn MessageInterceptor>) -> bool {
        self.shared.interceptors.remove(interceptor)
    }

    pub fn add_observer(&self, observer: Arc<dyn EndpointObserver>) {
        self.shared.observers.add(observer);
    }

    pub fn remove_observer(&self, observer: &Arc<dyn EndpointObserver>) -> bool {
        self.shared.observers.remove(observer)
    }

    pub fn add_notification_listener(&self, listener: Arc<dyn NotificationListener>) {
        self.shared.notification_listeners.add(listener);
    }

    pub fn remove_notification_listener(&self, listener: &Arc<dyn NotificationListener>) -> bool {
        self.shared.notification_listeners.remove(listener)
    }

    pub fn set_message_deliverer(&self, deliverer: Arc<dyn MessageDeliverer>) {
        self.shared.stack.set_deliverer(deliverer);
    }

    /// Replaces the protocol stage. Only allowed while the endpoint is not running.
    pub fn set_executor(&self, executor: Arc<dyn Executor>) -> Result<(), EndpointError> {
        if self.shared.is_started() {
            return Err(EndpointError::AlreadyStarted);
        }
        self.release_owned_executor();
        *write(&self.shared.executor) = Some(executor);
        Ok(())
    }

    pub fn executor(&self) -> Option<Arc<dyn Executor>> {
        read(&self.shared.executor).clone()
    }

    /// Address the connector is bound to, once known.
    pub fn address(&self) -> Option<SocketAddr> {
        self.shared.connector.address()
    }

    /// `scheme://address`, e.g. `coap://127.0.0.1:5683`.
    pub fn uri(&self) -> Option<String> {
        self.address()
            .map(|address| format!("{}://{}", self.shared.protocol.scheme(), address))
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub fn config(&self) -> &EndpointConfig {
        &self.shared.config
    }

    pub fn protocol(&self) -> Protocol {
        self.shared.protocol
    }
}

impl Debug for Endpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("id", &self.shared.id)
            .field("protocol", &self.shared.protocol)
            .field("started", &self.is_started())
            .finish_non_exhaustive()
    }
}
