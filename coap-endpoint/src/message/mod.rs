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

//! Message model.
//!
//! Requests, responses and empty messages share one core of protocol fields and
//! lifecycle flags. Handles are reference counted; the endpoint, the exchange and
//! the application all see the same message.
//!
//! ```
//! use coap_endpoint::message::{Code, MessageType, Request, Token};
//!
//! let request = Request::get()
//!     .with_type(MessageType::NonConfirmable)
//!     .with_token(Token::new(vec![0x7a]).unwrap())
//!     .with_uri_path("/sensors/temp");
//!
//! assert_eq!(request.code(), Code::GET);
//! assert_eq!(request.options().uri_path_string(), "sensors/temp");
//! ```

mod base;
mod kinds;
pub mod options;
mod types;

pub use base::{MessageCore, MessageObserver};
pub use kinds::{EmptyMessage, Message, Request, Response};
pub use options::{BlockOption, OptionSet};
pub use types::{Code, EndpointContext, MessageType, Token, MAX_TOKEN_LENGTH};

use std::error::Error;
use std::fmt::{Display, Formatter};

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum MessageError {
    ReadyToSend,
    TokenTooLong(usize),
}

impl Display for MessageError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageError::ReadyToSend => write!(f, "message is ready to send and can no longer change"),
            MessageError::TokenTooLong(length) => {
                write!(f, "token of {length} bytes exceeds the {MAX_TOKEN_LENGTH} byte limit")
            }
        }
    }
}

impl Error for MessageError {}
