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

//! # coap-endpoint
//!
//! `coap-endpoint` is the engine behind one CoAP endpoint: it correlates
//! requests with responses, retransmits confirmable messages, splits and
//! reassembles blockwise transfers and keeps observe relations alive. The wire
//! below is a [`transport::Connector`]; the application above is a
//! [`MessageDeliverer`].
//!
//! Typical usage is API-first and centered on [`Endpoint`].
//!
//! ## Client usage
//!
//! ```
//! use std::net::SocketAddr;
//! use std::sync::Arc;
//! use coap_endpoint::message::{EndpointContext, Request};
//! use coap_endpoint::transport::UdpConnector;
//! use coap_endpoint::Endpoint;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let connector = Arc::new(UdpConnector::new(SocketAddr::from(([127, 0, 0, 1], 0))));
//! let endpoint = Endpoint::builder(connector).build().unwrap();
//! endpoint.start().await.unwrap();
//!
//! let peer = EndpointContext::new(SocketAddr::from(([127, 0, 0, 1], 5683)));
//! let exchange = endpoint
//!     .send_request(Request::get().with_destination(peer).with_uri_path("sensors/temp"))
//!     .unwrap();
//! assert!(exchange.endpoint().is_some());
//!
//! endpoint.destroy().await;
//! # });
//! ```
//!
//! ## Contract
//!
//! Caller mistakes are returned immediately; everything discovered later is
//! reported through [`message::MessageObserver`] hooks and exchange completion.
//!
//! ```
//! use std::net::SocketAddr;
//! use std::sync::Arc;
//! use coap_endpoint::message::{EndpointContext, Request};
//! use coap_endpoint::transport::UdpConnector;
//! use coap_endpoint::{Endpoint, EndpointError};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let connector = Arc::new(UdpConnector::new(SocketAddr::from(([127, 0, 0, 1], 0))));
//! let endpoint = Endpoint::builder(connector).build().unwrap();
//! let peer = EndpointContext::new(SocketAddr::from(([127, 0, 0, 1], 5683)));
//!
//! // Not started yet.
//! assert!(matches!(
//!     endpoint.send_request(Request::get().with_destination(peer)),
//!     Err(EndpointError::NotStarted)
//! ));
//!
//! endpoint.start().await.unwrap();
//! // No destination.
//! assert!(matches!(
//!     endpoint.send_request(Request::get()),
//!     Err(EndpointError::MissingDestination)
//! ));
//! endpoint.destroy().await;
//! # });
//! ```
//!
//! ## Internal architecture map
//!
//! - API facade: [`Endpoint`] lifecycle and send operations
//! - Control plane: deliverer, interceptors, lifecycle observers, notification listeners
//! - Data plane: inbox (ingress) and outbox (egress) pipelines
//! - Matching: exchange store, deduplication and observation store
//! - Stack: observe, blockwise and reliability layers
//! - Runtime: the serial protocol stage every stack operation runs on
//! - Transport: connector contract, wire codecs and the UDP connector
//!
//! ## Observability model
//!
//! The crate uses `tracing` for logs/events.
//! Library code emits events and never initializes a global subscriber.
//! Binaries and tests are responsible for one-time `tracing_subscriber`
//! initialization at process boundaries. Add a [`MessageTracer`] interceptor
//! to log every message crossing the endpoint.

pub mod config;
mod control_plane;
mod data_plane;
mod endpoint;
pub mod error;
pub mod exchange;
pub mod matching;
pub mod message;
#[doc(hidden)]
pub mod observability;
pub mod runtime;
mod stack;
pub mod transport;

#[doc(hidden)]
pub mod benchmark_support;

pub use control_plane::{
    ClientMessageDeliverer, EndpointObserver, MessageDeliverer, MessageInterceptor,
    NotificationListener,
};
pub use endpoint::{Endpoint, EndpointBuilder};
pub use error::{EndpointError, SendError};
pub use observability::tracer::MessageTracer;
pub use stack::StackError;
