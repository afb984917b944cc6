// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! HPACK header compression (RFC 7541).
//!
//! Both directions carry a dynamic table sized by the peer's
//! `SETTINGS_HEADER_TABLE_SIZE`. The encoder prefers full matches, then
//! name matches, inserting new entries with incremental indexing; values
//! are emitted as raw literals while Huffman-coded input is fully
//! decoded.

pub mod huffman;

use bytes::{BufMut, BytesMut};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HpackError(pub &'static str);

impl From<huffman::HuffmanError> for HpackError {
    fn from(error: huffman::HuffmanError) -> Self {
        Self(error.0)
    }
}

/// RFC 7541 Appendix A static table, indices 1..=61
pub const STATIC_TABLE: [(&str, &str); 61] = [
    (":authority", ""),
    (":method", "GET"),
    (":method", "POST"),
    (":path", "/"),
    (":path", "/index.html"),
    (":scheme", "http"),
    (":scheme", "https"),
    (":status", "200"),
    (":status", "204"),
    (":status", "206"),
    (":status", "304"),
    (":status", "400"),
    (":status", "404"),
    (":status", "500"),
    ("accept-charset", ""),
    ("accept-encoding", "gzip, deflate"),
    ("accept-language", ""),
    ("accept-ranges", ""),
    ("accept", ""),
    ("access-control-allow-origin", ""),
    ("age", ""),
    ("allow", ""),
    ("authorization", ""),
    ("cache-control", ""),
    ("content-disposition", ""),
    ("content-encoding", ""),
    ("content-language", ""),
    ("content-length", ""),
    ("content-location", ""),
    ("content-range", ""),
    ("content-type", ""),
    ("cookie", ""),
    ("date", ""),
    ("etag", ""),
    ("expect", ""),
    ("expires", ""),
    ("from", ""),
    ("host", ""),
    ("if-match", ""),
    ("if-modified-since", ""),
    ("if-none-match", ""),
    ("if-range", ""),
    ("if-unmodified-since", ""),
    ("last-modified", ""),
    ("link", ""),
    ("location", ""),
    ("max-forwards", ""),
    ("proxy-authenticate", ""),
    ("proxy-authorization", ""),
    ("range", ""),
    ("referer", ""),
    ("refresh", ""),
    ("retry-after", ""),
    ("server", ""),
    ("set-cookie", ""),
    ("strict-transport-security", ""),
    ("transfer-encoding", ""),
    ("user-agent", ""),
    ("vary", ""),
    ("via", ""),
    ("www-authenticate", ""),
];

/// Entry overhead defined by RFC 7541 §4.1
const ENTRY_OVERHEAD: usize = 32;

#[derive(Debug, Default)]
struct DynamicTable {
    entries: std::collections::VecDeque<(String, String)>,
    size: usize,
    capacity: usize,
}

impl DynamicTable {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Default::default(),
            size: 0,
            capacity,
        }
    }

    fn entry_size(name: &str, value: &str) -> usize {
        name.len() + value.len() + ENTRY_OVERHEAD
    }

    fn insert(&mut self, name: String, value: String) {
        let size = Self::entry_size(&name, &value);
        // an entry larger than the table clears it entirely
        if size > self.capacity {
            self.entries.clear();
            self.size = 0;
            return;
        }
        while self.size + size > self.capacity {
            if let Some((name, value)) = self.entries.pop_back() {
                self.size -= Self::entry_size(&name, &value);
            }
        }
        self.size += size;
        self.entries.push_front((name, value));
    }

    fn resize(&mut self, capacity: usize) {
        self.capacity = capacity;
        while self.size > self.capacity {
            if let Some((name, value)) = self.entries.pop_back() {
                self.size -= Self::entry_size(&name, &value);
            }
        }
    }

    /// Looks up the 1-based HPACK index (static table first)
    fn get(&self, index: usize) -> Result<(&str, &str), HpackError> {
        if index == 0 {
            return Err(HpackError("index zero is not usable"));
        }
        if index <= STATIC_TABLE.len() {
            let (name, value) = STATIC_TABLE[index - 1];
            return Ok((name, value));
        }
        let dynamic_index = index - STATIC_TABLE.len() - 1;
        self.entries
            .get(dynamic_index)
            .map(|(name, value)| (name.as_str(), value.as_str()))
            .ok_or(HpackError("index beyond the table"))
    }

    /// Finds a full match, else a name match, in static then dynamic table
    fn find(&self, name: &str, value: &str) -> (Option<usize>, Option<usize>) {
        let mut name_match = None;
        for (index, (entry_name, entry_value)) in STATIC_TABLE.iter().enumerate() {
            if *entry_name == name {
                if *entry_value == value {
                    return (Some(index + 1), None);
                }
                if name_match.is_none() {
                    name_match = Some(index + 1);
                }
            }
        }
        for (index, (entry_name, entry_value)) in self.entries.iter().enumerate() {
            let hpack_index = STATIC_TABLE.len() + index + 1;
            if entry_name == name {
                if entry_value == value {
                    return (Some(hpack_index), None);
                }
                if name_match.is_none() {
                    name_match = Some(hpack_index);
                }
            }
        }
        (None, name_match)
    }
}

/// Reads an integer with an N-bit prefix; returns `(value, consumed)`
fn decode_int(input: &[u8], prefix_bits: u8) -> Result<(usize, usize), HpackError> {
    if input.is_empty() {
        return Err(HpackError("truncated integer"));
    }
    let max_prefix = (1usize << prefix_bits) - 1;
    let mut value = (input[0] as usize) & max_prefix;
    if value < max_prefix {
        return Ok((value, 1));
    }
    let mut shift = 0u32;
    for (offset, byte) in input[1..].iter().enumerate() {
        value = value
            .checked_add(((byte & 0x7f) as usize) << shift)
            .ok_or(HpackError("integer overflow"))?;
        if byte & 0x80 == 0 {
            return Ok((value, offset + 2));
        }
        shift += 7;
        if shift > 28 {
            return Err(HpackError("integer overflow"));
        }
    }
    Err(HpackError("truncated integer"))
}

/// Decompresses header blocks
#[derive(Debug)]
pub struct Decoder {
    table: DynamicTable,
    /// Ceiling for table size updates, from our SETTINGS
    max_capacity: usize,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new(4096)
    }
}

impl Decoder {
    pub fn new(max_capacity: usize) -> Self {
        Self {
            table: DynamicTable::with_capacity(max_capacity),
            max_capacity,
        }
    }

    pub fn set_max_table_size(&mut self, size: usize) {
        self.max_capacity = size;
        if self.table.capacity > size {
            self.table.resize(size);
        }
    }

    pub fn decode(&mut self, mut input: &[u8]) -> Result<Vec<(String, String)>, HpackError> {
        let mut headers = Vec::new();
        while !input.is_empty() {
            let first = input[0];
            if first & 0x80 != 0 {
                // indexed header field
                let (index, consumed) = decode_int(input, 7)?;
                input = &input[consumed..];
                let (name, value) = self.table.get(index)?;
                headers.push((name.to_string(), value.to_string()));
            } else if first & 0xc0 == 0x40 {
                // literal with incremental indexing
                let (name, value, rest) = self.decode_literal(input, 6)?;
                input = rest;
                self.table.insert(name.clone(), value.clone());
                headers.push((name, value));
            } else if first & 0xe0 == 0x20 {
                // dynamic table size update
                let (size, consumed) = decode_int(input, 5)?;
                input = &input[consumed..];
                if size > self.max_capacity {
                    return Err(HpackError("table size update beyond the limit"));
                }
                self.table.resize(size);
            } else {
                // literal without indexing / never indexed
                let (name, value, rest) = self.decode_literal(input, 4)?;
                input = rest;
                headers.push((name, value));
            }
        }
        Ok(headers)
    }

    fn decode_literal<'a>(
        &mut self,
        input: &'a [u8],
        prefix_bits: u8,
    ) -> Result<(String, String, &'a [u8]), HpackError> {
        let (index, consumed) = decode_int(input, prefix_bits)?;
        let mut rest = &input[consumed..];
        let name = if index == 0 {
            let (name, after) = decode_string(rest)?;
            rest = after;
            name
        } else {
            self.table.get(index)?.0.to_string()
        };
        let (value, rest) = decode_string(rest)?;
        Ok((name, value, rest))
    }
}

fn decode_string(input: &[u8]) -> Result<(String, &[u8]), HpackError> {
    if input.is_empty() {
        return Err(HpackError("truncated string"));
    }
    let huffman_coded = input[0] & 0x80 != 0;
    let (length, consumed) = decode_int(input, 7)?;
    let rest = &input[consumed..];
    if rest.len() < length {
        return Err(HpackError("truncated string"));
    }
    let (raw, rest) = rest.split_at(length);
    let bytes = if huffman_coded {
        let mut decoded = Vec::with_capacity(length * 2);
        huffman::decode(raw, &mut decoded)?;
        decoded
    } else {
        raw.to_vec()
    };
    let text = String::from_utf8(bytes).map_err(|_| HpackError("header is not utf-8"))?;
    Ok((text, rest))
}

/// Compresses header blocks
#[derive(Debug)]
pub struct Encoder {
    table: DynamicTable,
    /// Pending table size update to emit at the head of the next block
    pending_resize: Option<usize>,
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new(4096)
    }
}

impl Encoder {
    pub fn new(capacity: usize) -> Self {
        Self {
            table: DynamicTable::with_capacity(capacity),
            pending_resize: None,
        }
    }

    /// Applies the peer's `SETTINGS_HEADER_TABLE_SIZE`
    pub fn set_max_table_size(&mut self, size: usize) {
        if size != self.table.capacity {
            self.pending_resize = Some(size);
        }
    }

    pub fn encode(&mut self, headers: &[(String, String)], out: &mut BytesMut) {
        if let Some(size) = self.pending_resize.take() {
            self.table.resize(size);
            write_int(out, size, 5, 0x20);
        }
        for (name, value) in headers {
            match self.table.find(name, value) {
                (Some(index), _) => {
                    write_int(out, index, 7, 0x80);
                }
                (None, Some(name_index)) => {
                    write_int(out, name_index, 6, 0x40);
                    write_string(out, value);
                    self.table.insert(name.clone(), value.clone());
                }
                (None, None) => {
                    write_int(out, 0, 6, 0x40);
                    write_string(out, name);
                    write_string(out, value);
                    self.table.insert(name.clone(), value.clone());
                }
            }
        }
    }
}

fn write_int(out: &mut BytesMut, value: usize, prefix_bits: u8, first_byte: u8) {
    let max_prefix = (1usize << prefix_bits) - 1;
    if value < max_prefix {
        out.put_u8(first_byte | value as u8);
        return;
    }
    out.put_u8(first_byte | max_prefix as u8);
    let mut value = value - max_prefix;
    while value >= 0x80 {
        out.put_u8((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    out.put_u8(value as u8);
}

fn write_string(out: &mut BytesMut, text: &str) {
    write_int(out, text.len(), 7, 0x00);
    out.put_slice(text.as_bytes());
}
