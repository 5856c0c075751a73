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

//! Control-plane layer.
//!
//! Application-facing collaborator traits: the message deliverer at the top of
//! the stack, interceptors on both pipeline boundaries, lifecycle observers and
//! notification listeners. Registration happens from any thread; fan-out
//! iterates a snapshot on the protocol stage.
//!
//! ```
//! use std::sync::Arc;
//! use coap_endpoint::{EndpointObserver, MessageInterceptor};
//! use coap_endpoint::message::Request;
//!
//! struct DropDeletes;
//!
//! impl MessageInterceptor for DropDeletes {
//!     fn send_request(&self, request: &Request) {
//!         if request.code() == coap_endpoint::message::Code::DELETE {
//!             request.cancel();
//!         }
//!     }
//! }
//!
//! let interceptor = DropDeletes;
//! let request = Request::delete();
//! interceptor.send_request(&request);
//! assert!(request.is_canceled());
//!
//! // Every hook defaults to a no-op.
//! struct Quiet;
//! impl EndpointObserver for Quiet {}
//! let _observer: Arc<dyn EndpointObserver> = Arc::new(Quiet);
//! ```

pub(crate) mod deliverer;
pub(crate) mod interceptor;
pub(crate) mod lifecycle;
pub(crate) mod notification;

pub use deliverer::{ClientMessageDeliverer, MessageDeliverer};
pub use interceptor::MessageInterceptor;
pub use lifecycle::EndpointObserver;
pub use notification::NotificationListener;
