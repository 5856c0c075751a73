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

//! Block-wise transfers (RFC 7959).
//!
//! Client side: large request bodies leave as a Block1 sequence driven by
//! 2.31 Continue, and Block2 responses are reassembled by requesting the
//! following blocks. Server side: Block1 uploads are collected per peer and
//! path before the application sees them, and large response bodies are
//! sliced with the remainder cached for follow-up requests.

use super::{Layer, LayerLink, StackResult};
use crate::config::EndpointConfig;
use crate::error::SendError;
use crate::exchange::{Exchange, Origin};
use crate::message::{
    BlockOption, Code, EndpointContext, MessageCore, MessageObserver, OptionSet,
    Request, Response, Token,
};
use crate::observability::events;
use crate::runtime::lock;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const COMPONENT: &str = "blockwise";

/// Progress of one block-wise body transfer.
pub(crate) struct BlockwiseStatus {
    szx: u8,
    current_num: u32,
    code: Code,
    options: OptionSet,
    body: Vec<u8>,
    started_at: Instant,
}

impl BlockwiseStatus {
    fn new(szx: u8, code: Code, options: OptionSet, body: Vec<u8>) -> Self {
        Self {
            szx,
            current_num: 0,
            code,
            options,
            body,
            started_at: Instant::now(),
        }
    }

    fn block_size(&self) -> usize {
        BlockOption::size_for_szx(self.szx)
    }

    fn is_expired(&self, lifetime: Duration) -> bool {
        self.started_at.elapsed() > lifetime
    }

    /// Bounds of block `num` at exponent `szx`, or `None` past the end of the body.
    fn slice(&self, szx: u8, num: u32) -> Option<(usize, usize, bool)> {
        let size = BlockOption::size_for_szx(szx);
        let offset = num as usize * size;
        if offset >= self.body.len() && !(offset == 0 && self.body.is_empty()) {
            return None;
        }
        let end = (offset + size).min(self.body.len());
        Some((offset, end, end < self.body.len()))
    }
}

/// Server transfers are keyed by peer and resource path.
type TransferKey = (SocketAddr, String);

fn transfer_key(message: &MessageCore) -> Option<TransferKey> {
    let peer = message.source()?.peer();
    Some((peer, message.with_options_ref(OptionSet::uri_path_string)))
}

fn body_len(len: usize) -> u32 {
    u32::try_from(len).unwrap_or(u32::MAX)
}

/// Relays the outcome of each block request onto the request the application sent.
struct BlockForwarder {
    original: Request,
}

impl MessageObserver for BlockForwarder {
    fn on_reject(&self) {
        self.original.set_rejected();
    }

    fn on_timeout(&self) {
        self.original.set_timed_out();
    }

    fn on_cancel(&self) {
        self.original.cancel();
    }

    fn on_sent(&self) {
        self.original.set_sent();
    }

    fn on_send_error(&self, error: &SendError) {
        self.original.set_send_error(error.clone());
    }

    fn on_context_established(&self, context: &EndpointContext) {
        self.original.notify_context_established(context);
    }
}

/// What a Block2 response means for the transfer in progress.
enum Block2Step {
    Request(Request),
    Deliver(Response),
    Abort,
    PassThrough,
}

pub(crate) struct BlockwiseLayer {
    max_message_size: usize,
    preferred_szx: u8,
    max_resource_body_size: usize,
    status_lifetime: Duration,
    uploads: Mutex<HashMap<TransferKey, BlockwiseStatus>>,
    downloads: Mutex<HashMap<TransferKey, BlockwiseStatus>>,
}

impl BlockwiseLayer {
    pub(crate) fn new(config: &EndpointConfig) -> Self {
        Self {
            max_message_size: config.max_message_size,
            preferred_szx: config.preferred_block_szx(),
            max_resource_body_size: config.max_resource_body_size,
            status_lifetime: config.blockwise_status_lifetime(),
            uploads: Mutex::new(HashMap::new()),
            downloads: Mutex::new(HashMap::new()),
        }
    }

    /// Request carrying block `status.current_num` of the original body.
    fn block1_request(
        original: &Request,
        status: &BlockwiseStatus,
        token: Option<Token>,
    ) -> StackResult<Request> {
        let num = status.current_num;
        let (offset, end, more) = status
            .slice(status.szx, num)
            .unwrap_or((status.body.len(), status.body.len(), false));

        let block = Request::new(original.code());
        if let Some(message_type) = original.message_type() {
            block.set_type(message_type)?;
        }
        if let Some(destination) = original.destination() {
            block.set_destination(destination)?;
        }
        if let Some(token) = token {
            block.set_token(token)?;
        }
        let mut options = original.options();
        options.block1 = Some(BlockOption::new(status.szx, more, num));
        options.size1 = (num == 0).then(|| body_len(status.body.len()));
        block.set_options(options)?;
        block.set_payload(status.body[offset..end].to_vec())?;
        block.add_message_observer(Arc::new(BlockForwarder {
            original: original.clone(),
        }));
        Ok(block)
    }

    /// Follow-up request for Block2 number `num`.
    fn block2_request(
        original: &Request,
        token: Option<Token>,
        szx: u8,
        num: u32,
    ) -> StackResult<Request> {
        let next = Request::new(original.code());
        if let Some(message_type) = original.message_type() {
            next.set_type(message_type)?;
        }
        if let Some(destination) = original.destination() {
            next.set_destination(destination)?;
        }
        if let Some(token) = token {
            next.set_token(token)?;
        }
        let mut options = original.options();
        options.observe = None;
        options.block1 = None;
        options.size1 = None;
        options.block2 = Some(BlockOption::new(szx, false, num));
        next.set_options(options)?;
        next.add_message_observer(Arc::new(BlockForwarder {
            original: original.clone(),
        }));
        Ok(next)
    }

    /// Answers `request` directly from this layer.
    fn respond(
        link: &LayerLink<'_>,
        exchange: &Exchange,
        request: &Request,
        code: Code,
        edit: impl FnOnce(&mut OptionSet),
    ) -> StackResult<()> {
        let response = Response::for_request(request, code);
        response.update_options(edit)?;
        exchange.set_response(response.clone());
        link.send_response(exchange, &response)
    }

    fn too_large(&self, link: &LayerLink<'_>, exchange: &Exchange, request: &Request) -> StackResult<()> {
        warn!(
            event = events::BLOCKWISE_ABORTED,
            component = COMPONENT,
            exchange_id = exchange.id(),
            limit = self.max_resource_body_size,
            "block1 upload exceeds the resource body limit"
        );
        let limit = body_len(self.max_resource_body_size);
        Self::respond(link, exchange, request, Code::REQUEST_ENTITY_TOO_LARGE, |options| {
            options.size1 = Some(limit);
        })
    }

    fn receive_block1(
        &self,
        link: &LayerLink<'_>,
        exchange: &Exchange,
        request: &Request,
        block: BlockOption,
    ) -> StackResult<()> {
        let Some(key) = transfer_key(request) else {
            return link.receive_request(exchange, request);
        };

        if block.num() == 0 {
            let announced = request.with_options_ref(|options| options.size1);
            if announced.is_some_and(|size| size as usize > self.max_resource_body_size) {
                return self.too_large(link, exchange, request);
            }
            lock(&self.uploads).insert(
                key.clone(),
                BlockwiseStatus::new(block.szx(), request.code(), request.options(), Vec::new()),
            );
        }

        let mut uploads = lock(&self.uploads);
        let in_sequence = uploads.get(&key).is_some_and(|status| {
            !status.is_expired(self.status_lifetime) && status.body.len() == block.offset()
        });
        if !in_sequence {
            uploads.remove(&key);
            drop(uploads);
            debug!(
                event = events::BLOCKWISE_ABORTED,
                component = COMPONENT,
                exchange_id = exchange.id(),
                num = block.num(),
                "block1 out of sequence"
            );
            return Self::respond(link, exchange, request, Code::REQUEST_ENTITY_INCOMPLETE, |_| {});
        }

        let Some(status) = uploads.get_mut(&key) else {
            return Ok(());
        };
        status.body.extend_from_slice(&request.payload());
        status.current_num = block.num();
        if status.body.len() > self.max_resource_body_size {
            uploads.remove(&key);
            drop(uploads);
            return self.too_large(link, exchange, request);
        }

        if block.more() {
            drop(uploads);
            debug!(
                event = events::BLOCKWISE_NEXT_BLOCK,
                component = COMPONENT,
                exchange_id = exchange.id(),
                num = block.num(),
                "block1 received; asking for the next one"
            );
            let echo = BlockOption::new(block.szx(), true, block.num());
            return Self::respond(link, exchange, request, Code::CONTINUE, |options| {
                options.block1 = Some(echo);
            });
        }

        let Some(status) = uploads.remove(&key) else {
            return Ok(());
        };
        drop(uploads);

        let assembled = Request::inbound(request.message_type(), request.code());
        let mut options = request.options();
        options.block1 = None;
        options.size1 = None;
        assembled.set_options(options)?;
        assembled.set_payload(status.body)?;
        if let Some(mid) = request.mid() {
            assembled.set_mid(mid)?;
        }
        if let Some(token) = request.token() {
            assembled.set_token(token)?;
        }
        if let Some(source) = request.source() {
            assembled.set_source(source)?;
        }
        debug!(
            event = events::BLOCKWISE_ASSEMBLED,
            component = COMPONENT,
            exchange_id = exchange.id(),
            bytes = assembled.payload_len(),
            "block1 upload complete"
        );
        exchange.set_request(assembled.clone());
        *lock(exchange.block1_echo()) = Some(BlockOption::new(block.szx(), false, block.num()));
        link.receive_request(exchange, &assembled)
    }

    /// Serves a Block2 follow-up from the cached body when one exists.
    fn serve_cached_block2(
        &self,
        link: &LayerLink<'_>,
        exchange: &Exchange,
        request: &Request,
        block: BlockOption,
    ) -> Option<StackResult<()>> {
        let key = transfer_key(request)?;
        let mut downloads = lock(&self.downloads);
        if downloads
            .get(&key)
            .is_some_and(|status| status.is_expired(self.status_lifetime))
        {
            downloads.remove(&key);
        }
        let status = downloads.get(&key)?;

        let szx = block.szx().min(status.szx);
        let num = block.offset() / BlockOption::size_for_szx(szx);
        let num = u32::try_from(num).unwrap_or(u32::MAX);
        let Some((offset, end, more)) = status.slice(szx, num) else {
            downloads.remove(&key);
            drop(downloads);
            return Some(Self::respond(link, exchange, request, Code::BAD_OPTION, |_| {}));
        };

        let response = Response::for_request(request, status.code);
        let mut options = status.options.clone();
        options.block2 = Some(BlockOption::new(szx, more, num));
        let payload = status.body[offset..end].to_vec();
        if !more {
            downloads.remove(&key);
        }
        drop(downloads);

        let result = response
            .set_options(options)
            .and_then(|()| response.set_payload(payload))
            .map_err(Into::into)
            .and_then(|()| {
                exchange.set_response(response.clone());
                link.send_response(exchange, &response)
            });
        Some(result)
    }

    /// Slices `response` in place when its body needs more than one block.
    fn slice_response(&self, exchange: &Exchange, response: &Response) -> StackResult<()> {
        let request = exchange.request();
        let requested = request.with_options_ref(|options| options.block2);
        let payload = response.payload();
        let already_sliced = response.with_options_ref(|options| options.block2.is_some());
        if already_sliced || (payload.len() <= self.max_message_size && requested.is_none()) {
            return Ok(());
        }

        let szx = requested.map_or(self.preferred_szx, |block| block.szx().min(self.preferred_szx));
        let num = requested.map_or(0, |block| {
            u32::try_from(block.offset() / BlockOption::size_for_szx(szx)).unwrap_or(u32::MAX)
        });
        let mut options = response.options();
        options.block2 = None;
        options.size2 = None;
        let status = BlockwiseStatus::new(szx, response.code(), options.clone(), payload);

        let Some((offset, end, more)) = status.slice(szx, num) else {
            debug!(
                event = events::BLOCKWISE_ABORTED,
                component = COMPONENT,
                exchange_id = exchange.id(),
                num,
                "requested block lies past the end of the body"
            );
            response.set_code(Code::BAD_OPTION)?;
            response.set_payload(Vec::new())?;
            response.update_options(|options| {
                options.block2 = None;
                options.size2 = None;
            })?;
            return Ok(());
        };

        options.block2 = Some(BlockOption::new(szx, more, num));
        if num == 0 {
            options.size2 = Some(body_len(status.body.len()));
        }
        response.set_options(options)?;
        response.set_payload(status.body[offset..end].to_vec())?;

        if more {
            if let Some(key) = transfer_key(&request) {
                lock(&self.downloads).insert(key, status);
            }
        }
        Ok(())
    }

    /// Continues a Block1 upload after 2.31. Returns `None` when the response
    /// is not part of an upload in progress.
    fn continue_block1(
        &self,
        link: &LayerLink<'_>,
        exchange: &Exchange,
        response: &Response,
    ) -> Option<StackResult<()>> {
        let mut slot = lock(exchange.block1_status());
        if slot.is_none() {
            return None;
        }
        if response.code() != Code::CONTINUE {
            slot.take();
            return None;
        }

        let original = exchange.request();
        if original.is_canceled() {
            slot.take();
            return Some(Ok(()));
        }
        let status = slot.as_mut()?;
        let sent_through = (status.current_num as usize + 1) * status.block_size();
        if let Some(server_szx) = response.with_options_ref(|options| options.block1.map(|b| b.szx())) {
            if server_szx < status.szx {
                status.szx = server_szx;
            }
        }
        if sent_through >= status.body.len() {
            slot.take();
            return None;
        }
        status.current_num = u32::try_from(sent_through / status.block_size()).unwrap_or(u32::MAX);

        let token = exchange.current_request().token();
        let next = match Self::block1_request(&original, status, token) {
            Ok(next) => next,
            Err(err) => return Some(Err(err)),
        };
        let num = status.current_num;
        drop(slot);

        debug!(
            event = events::BLOCKWISE_NEXT_BLOCK,
            component = COMPONENT,
            exchange_id = exchange.id(),
            num,
            "sending next block1"
        );
        exchange.set_current_request(next.clone());
        Some(link.send_request(exchange, &next))
    }

    fn block2_step(&self, exchange: &Exchange, response: &Response, block: BlockOption) -> Block2Step {
        let mut slot = lock(exchange.block2_status());
        if block.num() == 0 {
            let mut options = response.options();
            options.block2 = None;
            options.size2 = None;
            *slot = Some(BlockwiseStatus::new(block.szx(), response.code(), options, Vec::new()));
        }
        let Some(status) = slot.as_mut() else {
            return Block2Step::PassThrough;
        };
        if status.body.len() != block.offset() {
            slot.take();
            return Block2Step::PassThrough;
        }

        status.body.extend_from_slice(&response.payload());
        status.current_num = block.num();
        if status.body.len() > self.max_resource_body_size {
            slot.take();
            return Block2Step::Abort;
        }

        if block.more() {
            let original = exchange.request();
            let token = exchange.current_request().token();
            return match Self::block2_request(&original, token, block.szx(), block.num() + 1) {
                Ok(next) => Block2Step::Request(next),
                Err(_) => {
                    slot.take();
                    Block2Step::Abort
                }
            };
        }

        let Some(status) = slot.take() else {
            return Block2Step::PassThrough;
        };
        let assembled = Response::inbound(response.message_type(), status.code);
        let filled = assembled
            .set_options(status.options)
            .and_then(|()| assembled.set_payload(status.body))
            .and_then(|()| match response.mid() {
                Some(mid) => assembled.set_mid(mid),
                None => Ok(()),
            })
            .and_then(|()| assembled.set_token(response.token().unwrap_or_default()))
            .and_then(|()| match response.source() {
                Some(source) => assembled.set_source(source),
                None => Ok(()),
            });
        match filled {
            Ok(()) => Block2Step::Deliver(assembled),
            Err(_) => Block2Step::Abort,
        }
    }
}

impl Layer for BlockwiseLayer {
    fn send_request(&self, link: &LayerLink<'_>, exchange: &Exchange, request: &Request) -> StackResult<()> {
        let has_block1 = request.with_options_ref(|options| options.block1.is_some());
        if has_block1 || request.payload_len() <= self.max_message_size {
            return link.send_request(exchange, request);
        }

        let status = BlockwiseStatus::new(
            self.preferred_szx,
            request.code(),
            request.options(),
            request.payload(),
        );
        let first = Self::block1_request(request, &status, request.token())?;
        debug!(
            event = events::BLOCKWISE_NEXT_BLOCK,
            component = COMPONENT,
            exchange_id = exchange.id(),
            bytes = status.body.len(),
            block_size = status.block_size(),
            "starting block1 upload"
        );
        *lock(exchange.block1_status()) = Some(status);
        exchange.set_current_request(first.clone());
        link.send_request(exchange, &first)
    }

    fn send_response(
        &self,
        link: &LayerLink<'_>,
        exchange: &Exchange,
        response: &Response,
    ) -> StackResult<()> {
        if let Some(echo) = lock(exchange.block1_echo()).take() {
            response.update_options(|options| options.block1 = Some(echo))?;
        }
        self.slice_response(exchange, response)?;
        link.send_response(exchange, response)
    }

    fn receive_request(
        &self,
        link: &LayerLink<'_>,
        exchange: &Exchange,
        request: &Request,
    ) -> StackResult<()> {
        let (block1, block2) = request.with_options_ref(|options| (options.block1, options.block2));
        if let Some(block) = block1 {
            return self.receive_block1(link, exchange, request, block);
        }
        if let Some(block) = block2.filter(|block| block.num() > 0) {
            if let Some(result) = self.serve_cached_block2(link, exchange, request, block) {
                return result;
            }
        }
        link.receive_request(exchange, request)
    }

    fn receive_response(
        &self,
        link: &LayerLink<'_>,
        exchange: &Exchange,
        response: &Response,
    ) -> StackResult<()> {
        if exchange.origin() != Origin::Local {
            return link.receive_response(exchange, response);
        }
        if let Some(result) = self.continue_block1(link, exchange, response) {
            return result;
        }

        let Some(block) = response.with_options_ref(|options| options.block2) else {
            return link.receive_response(exchange, response);
        };
        match self.block2_step(exchange, response, block) {
            Block2Step::Request(next) => {
                debug!(
                    event = events::BLOCKWISE_NEXT_BLOCK,
                    component = COMPONENT,
                    exchange_id = exchange.id(),
                    num = block.num() + 1,
                    "requesting next block2"
                );
                exchange.set_current_request(next.clone());
                link.send_request(exchange, &next)
            }
            Block2Step::Deliver(assembled) => {
                debug!(
                    event = events::BLOCKWISE_ASSEMBLED,
                    component = COMPONENT,
                    exchange_id = exchange.id(),
                    bytes = assembled.payload_len(),
                    "block2 download complete"
                );
                link.receive_response(exchange, &assembled)
            }
            Block2Step::Abort => {
                warn!(
                    event = events::BLOCKWISE_ABORTED,
                    component = COMPONENT,
                    exchange_id = exchange.id(),
                    limit = self.max_resource_body_size,
                    "block2 download aborted"
                );
                exchange.request().cancel();
                exchange.set_complete();
                Ok(())
            }
            Block2Step::PassThrough => {
                debug!(
                    event = events::BLOCKWISE_ABORTED,
                    component = COMPONENT,
                    exchange_id = exchange.id(),
                    num = block.num(),
                    "block2 out of sequence; passing response through"
                );
                link.receive_response(exchange, response)
            }
        }
    }

    fn clear(&self) {
        lock(&self.uploads).clear();
        lock(&self.downloads).clear();
    }
}
