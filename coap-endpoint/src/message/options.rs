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

//! Typed option set carried by every message.

pub mod number {
    pub const IF_MATCH: u16 = 1;
    pub const URI_HOST: u16 = 3;
    pub const ETAG: u16 = 4;
    pub const OBSERVE: u16 = 6;
    pub const URI_PORT: u16 = 7;
    pub const LOCATION_PATH: u16 = 8;
    pub const URI_PATH: u16 = 11;
    pub const CONTENT_FORMAT: u16 = 12;
    pub const MAX_AGE: u16 = 14;
    pub const URI_QUERY: u16 = 15;
    pub const ACCEPT: u16 = 17;
    pub const BLOCK2: u16 = 23;
    pub const BLOCK1: u16 = 27;
    pub const SIZE2: u16 = 28;
    pub const SIZE1: u16 = 60;
}

/// Largest observe sequence number (24 bits).
pub const MAX_OBSERVE_SEQUENCE: u32 = 0x00ff_ffff;

/// Block1/Block2 option value: block number, more flag and size exponent.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct BlockOption {
    num: u32,
    more: bool,
    szx: u8,
}

impl BlockOption {
    pub const MAX_SZX: u8 = 6;

    /// `szx` above 6 (1024 bytes) is clamped.
    pub fn new(szx: u8, more: bool, num: u32) -> Self {
        Self {
            num: num & 0x000f_ffff,
            more,
            szx: szx.min(Self::MAX_SZX),
        }
    }

    pub fn from_value(value: u32) -> Self {
        Self::new((value & 0x07) as u8, value & 0x08 != 0, value >> 4)
    }

    pub fn value(&self) -> u32 {
        (self.num << 4) | (u32::from(self.more) << 3) | u32::from(self.szx)
    }

    pub fn num(&self) -> u32 {
        self.num
    }

    pub fn more(&self) -> bool {
        self.more
    }

    pub fn szx(&self) -> u8 {
        self.szx
    }

    pub fn size(&self) -> usize {
        Self::size_for_szx(self.szx)
    }

    pub fn offset(&self) -> usize {
        self.num as usize * self.size()
    }

    pub fn size_for_szx(szx: u8) -> usize {
        1 << (usize::from(szx.min(Self::MAX_SZX)) + 4)
    }

    /// Largest exponent whose block size does not exceed `size` (min 16 bytes).
    pub fn szx_for_size(size: usize) -> u8 {
        let mut szx = 0;
        while szx < Self::MAX_SZX && Self::size_for_szx(szx + 1) <= size {
            szx += 1;
        }
        szx
    }
}

/// Options understood by the endpoint plus any unknown options, preserved verbatim.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct OptionSet {
    pub if_match: Vec<Vec<u8>>,
    pub uri_host: Option<String>,
    pub etags: Vec<Vec<u8>>,
    pub observe: Option<u32>,
    pub uri_port: Option<u16>,
    pub location_path: Vec<String>,
    pub uri_path: Vec<String>,
    pub content_format: Option<u16>,
    pub max_age: Option<u32>,
    pub uri_query: Vec<String>,
    pub accept: Option<u16>,
    pub block2: Option<BlockOption>,
    pub block1: Option<BlockOption>,
    pub size2: Option<u32>,
    pub size1: Option<u32>,
    pub others: Vec<(u16, Vec<u8>)>,
}

impl OptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the Uri-Path segments with those of a `/`-separated path.
    pub fn set_uri_path(&mut self, path: &str) {
        self.uri_path = path
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(str::to_string)
            .collect();
    }

    pub fn uri_path_string(&self) -> String {
        self.uri_path.join("/")
    }

    pub fn add_uri_query(&mut self, query: impl Into<String>) {
        self.uri_query.push(query.into());
    }

    pub fn has_observe(&self) -> bool {
        self.observe.is_some()
    }

    /// Options in ascending number order as `(number, encoded value)` pairs.
    pub fn to_entries(&self) -> Vec<(u16, Vec<u8>)> {
        let mut entries = Vec::new();
        for value in &self.if_match {
            entries.push((number::IF_MATCH, value.clone()));
        }
        if let Some(host) = &self.uri_host {
            entries.push((number::URI_HOST, host.as_bytes().to_vec()));
        }
        for etag in &self.etags {
            entries.push((number::ETAG, etag.clone()));
        }
        if let Some(observe) = self.observe {
            entries.push((number::OBSERVE, encode_uint(observe)));
        }
        if let Some(port) = self.uri_port {
            entries.push((number::URI_PORT, encode_uint(u32::from(port))));
        }
        for segment in &self.location_path {
            entries.push((number::LOCATION_PATH, segment.as_bytes().to_vec()));
        }
        for segment in &self.uri_path {
            entries.push((number::URI_PATH, segment.as_bytes().to_vec()));
        }
        if let Some(format) = self.content_format {
            entries.push((number::CONTENT_FORMAT, encode_uint(u32::from(format))));
        }
        if let Some(max_age) = self.max_age {
            entries.push((number::MAX_AGE, encode_uint(max_age)));
        }
        for query in &self.uri_query {
            entries.push((number::URI_QUERY, query.as_bytes().to_vec()));
        }
        if let Some(accept) = self.accept {
            entries.push((number::ACCEPT, encode_uint(u32::from(accept))));
        }
        if let Some(block2) = self.block2 {
            entries.push((number::BLOCK2, encode_uint(block2.value())));
        }
        if let Some(block1) = self.block1 {
            entries.push((number::BLOCK1, encode_uint(block1.value())));
        }
        if let Some(size2) = self.size2 {
            entries.push((number::SIZE2, encode_uint(size2)));
        }
        if let Some(size1) = self.size1 {
            entries.push((number::SIZE1, encode_uint(size1)));
        }
        entries.extend(self.others.iter().cloned());
        // Stable sort keeps repeated options in insertion order.
        entries.sort_by_key(|(number, _)| *number);
        entries
    }

    /// Adds one decoded option. Values of the wrong shape are kept as unknown options.
    pub fn push_entry(&mut self, option_number: u16, value: Vec<u8>) {
        match option_number {
            number::IF_MATCH => self.if_match.push(value),
            number::URI_HOST => match String::from_utf8(value) {
                Ok(host) => self.uri_host = Some(host),
                Err(err) => self.others.push((option_number, err.into_bytes())),
            },
            number::ETAG => self.etags.push(value),
            number::OBSERVE => self.observe = decode_uint(&value),
            number::URI_PORT => self.uri_port = decode_uint(&value).and_then(|v| u16::try_from(v).ok()),
            number::LOCATION_PATH => push_string(&mut self.location_path, &mut self.others, option_number, value),
            number::URI_PATH => push_string(&mut self.uri_path, &mut self.others, option_number, value),
            number::CONTENT_FORMAT => {
                self.content_format = decode_uint(&value).and_then(|v| u16::try_from(v).ok())
            }
            number::MAX_AGE => self.max_age = decode_uint(&value),
            number::URI_QUERY => push_string(&mut self.uri_query, &mut self.others, option_number, value),
            number::ACCEPT => self.accept = decode_uint(&value).and_then(|v| u16::try_from(v).ok()),
            number::BLOCK2 => self.block2 = decode_uint(&value).map(BlockOption::from_value),
            number::BLOCK1 => self.block1 = decode_uint(&value).map(BlockOption::from_value),
            number::SIZE2 => self.size2 = decode_uint(&value),
            number::SIZE1 => self.size1 = decode_uint(&value),
            _ => self.others.push((option_number, value)),
        }
    }
}

fn push_string(target: &mut Vec<String>, others: &mut Vec<(u16, Vec<u8>)>, option_number: u16, value: Vec<u8>) {
    match String::from_utf8(value) {
        Ok(text) => target.push(text),
        Err(err) => others.push((option_number, err.into_bytes())),
    }
}

/// Minimal big-endian encoding; zero encodes as an empty value.
pub fn encode_uint(value: u32) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let first = bytes.iter().position(|byte| *byte != 0).unwrap_or(bytes.len());
    bytes[first..].to_vec()
}

pub fn decode_uint(value: &[u8]) -> Option<u32> {
    if value.len() > 4 {
        return None;
    }
    Some(
        value
            .iter()
            .fold(0_u32, |acc, byte| (acc << 8) | u32::from(*byte)),
    )
}
