/*
 * encoder.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Gumdrop, a multi-protocol internet server.
 *
 * Gumdrop is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Gumdrop is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Gumdrop.  If not, see <http://www.gnu.org/licenses/>.
 */

//! HPACK encoder (RFC 7541) with dynamic table. Exact matches in the
//! static or dynamic table become indexed fields; literals are added to
//! the table under the Incremental policy. Huffman is used when it
//! strictly shortens the output. Sensitive headers (authorization,
//! cookies) are emitted never-indexed.
//!
//! A SETTINGS_HEADER_TABLE_SIZE change is applied via set_max_table_size
//! and signalled to the peer with a table-size update at the start of the
//! next header block.

use bytes::BufMut;

use super::huffman;
use super::static_table::{STATIC_TABLE, STATIC_TABLE_SIZE};
use super::table::DynamicTable;

/// Per-header indexing policy (RFC 7541 §6.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Indexing {
    /// Literal with incremental indexing: the field enters the dynamic table.
    Incremental,
    /// Literal without indexing.
    None,
    /// Literal never indexed: intermediaries must not index it either.
    Never,
}

/// Stateful HPACK encoder. One instance per connection direction.
pub struct Encoder {
    table: DynamicTable,
    /// Table size to announce at the start of the next block, when the
    /// peer lowered SETTINGS_HEADER_TABLE_SIZE.
    pending_size_update: Option<usize>,
    huffman: bool,
}

impl Encoder {
    pub fn new(max_table_size: usize) -> Self {
        Self {
            table: DynamicTable::new(max_table_size),
            pending_size_update: None,
            huffman: true,
        }
    }

    /// Enable or disable Huffman string coding (on by default).
    pub fn set_huffman(&mut self, on: bool) {
        self.huffman = on;
    }

    /// Apply a peer SETTINGS_HEADER_TABLE_SIZE change. Evicts immediately
    /// and schedules the table-size update opcode for the next block.
    pub fn set_max_table_size(&mut self, size: usize) {
        if size != self.table.max_size() {
            self.table.set_max_size(size);
            self.pending_size_update = Some(size);
        }
    }

    /// Current dynamic table occupancy in bytes (entry sizes).
    pub fn table_size(&self) -> usize {
        self.table.size()
    }

    /// Encode a whole header block with the default policy: exact matches
    /// indexed, other fields incremental, sensitive names never indexed.
    pub fn encode_block(&mut self, headers: &[(String, String)], out: &mut impl BufMut) {
        for (name, value) in headers {
            let indexing = if is_sensitive(name) {
                Indexing::Never
            } else {
                Indexing::Incremental
            };
            self.encode_header(name, value, indexing, out);
        }
    }

    /// Encode one header field under an explicit indexing policy.
    pub fn encode_header(
        &mut self,
        name: &str,
        value: &str,
        indexing: Indexing,
        out: &mut impl BufMut,
    ) {
        if let Some(size) = self.pending_size_update.take() {
            encode_integer(size as u64, 5, 0x20, out);
        }
        match indexing {
            Indexing::Incremental => {
                if let Some(index) = self.find_exact(name, value) {
                    encode_integer(index as u64, 7, 0x80, out);
                    return;
                }
                match self.find_name(name) {
                    Some(index) => {
                        encode_integer(index as u64, 6, 0x40, out);
                    }
                    None => {
                        out.put_u8(0x40);
                        self.encode_string(name.as_bytes(), out);
                    }
                }
                self.encode_string(value.as_bytes(), out);
                self.table.insert(name.to_string(), value.to_string());
            }
            Indexing::None => {
                if let Some(index) = self.find_exact(name, value) {
                    encode_integer(index as u64, 7, 0x80, out);
                    return;
                }
                self.encode_literal(0x00, name, value, out);
            }
            Indexing::Never => {
                self.encode_literal(0x10, name, value, out);
            }
        }
    }

    fn encode_literal(&mut self, prefix: u8, name: &str, value: &str, out: &mut impl BufMut) {
        match self.find_name(name) {
            Some(index) => {
                encode_integer(index as u64, 4, prefix, out);
            }
            None => {
                out.put_u8(prefix);
                self.encode_string(name.as_bytes(), out);
            }
        }
        self.encode_string(value.as_bytes(), out);
    }

    /// Table index of an exact (name, value) match, static entries first.
    fn find_exact(&self, name: &str, value: &str) -> Option<usize> {
        STATIC_TABLE
            .iter()
            .position(|&(n, v)| n == name && v == Some(value))
            .or_else(|| {
                self.table
                    .find(name, value)
                    .map(|i| STATIC_TABLE_SIZE + i)
            })
    }

    /// Table index of a name match, static entries first.
    fn find_name(&self, name: &str) -> Option<usize> {
        STATIC_TABLE
            .iter()
            .position(|&(n, _)| n == name)
            .filter(|&i| i != 0)
            .or_else(|| self.table.find_name(name).map(|i| STATIC_TABLE_SIZE + i))
    }

    /// String literal: Huffman when enabled and strictly shorter.
    fn encode_string(&self, s: &[u8], out: &mut impl BufMut) {
        if self.huffman {
            let coded_len = huffman::encoded_len(s);
            if coded_len < s.len() {
                encode_integer(coded_len as u64, 7, 0x80, out);
                huffman::encode(s, out);
                return;
            }
        }
        encode_integer(s.len() as u64, 7, 0x00, out);
        out.put_slice(s);
    }
}

/// Headers whose values must never enter a compression table.
fn is_sensitive(name: &str) -> bool {
    name.eq_ignore_ascii_case("authorization")
        || name.eq_ignore_ascii_case("proxy-authorization")
        || name.eq_ignore_ascii_case("cookie")
        || name.eq_ignore_ascii_case("set-cookie")
}

/// RFC 7541 §5.1 integer encoding into an N-bit prefix carried in the
/// opcode byte `prefix`.
pub(super) fn encode_integer(mut value: u64, nbits: u8, prefix: u8, out: &mut impl BufMut) {
    let max_prefix = (1u64 << nbits) - 1;
    if value < max_prefix {
        out.put_u8(prefix | value as u8);
        return;
    }
    out.put_u8(prefix | max_prefix as u8);
    value -= max_prefix;
    while value >= 128 {
        out.put_u8(0x80 | (value % 128) as u8);
        value /= 128;
    }
    out.put_u8(value as u8);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::http::hpack::{Decoder, HeaderHandler};
    use bytes::BytesMut;

    struct Collect(Vec<(String, String)>);

    impl HeaderHandler for Collect {
        fn header(&mut self, name: &str, value: &str) {
            self.0.push((name.to_string(), value.to_string()));
        }
    }

    fn decode_block(decoder: &mut Decoder, data: &[u8]) -> Vec<(String, String)> {
        let mut collect = Collect(Vec::new());
        decoder.decode(&mut &data[..], &mut collect).unwrap();
        collect.0
    }

    #[test]
    fn rfc_c_2_1_literal_with_indexing() {
        let mut encoder = Encoder::new(4096);
        encoder.set_huffman(false);
        let mut buf = BytesMut::new();
        encoder.encode_header("custom-key", "custom-header", Indexing::Incremental, &mut buf);
        let expected: &[u8] = &[
            0x40, 0x0a, 0x63, 0x75, 0x73, 0x74, 0x6f, 0x6d, 0x2d, 0x6b, 0x65, 0x79, 0x0d, 0x63,
            0x75, 0x73, 0x74, 0x6f, 0x6d, 0x2d, 0x68, 0x65, 0x61, 0x64, 0x65, 0x72,
        ];
        assert_eq!(&buf[..], expected);
        assert_eq!(encoder.table_size(), 55);
    }

    #[test]
    fn rfc_c_2_2_literal_without_indexing() {
        let mut encoder = Encoder::new(4096);
        encoder.set_huffman(false);
        let mut buf = BytesMut::new();
        encoder.encode_header(":path", "/sample/path", Indexing::None, &mut buf);
        let expected: &[u8] = &[
            0x04, 0x0c, 0x2f, 0x73, 0x61, 0x6d, 0x70, 0x6c, 0x65, 0x2f, 0x70, 0x61, 0x74, 0x68,
        ];
        assert_eq!(&buf[..], expected);
        assert_eq!(encoder.table_size(), 0);
    }

    #[test]
    fn static_exact_matches_use_single_byte_index() {
        let mut encoder = Encoder::new(4096);
        let cases = [
            ((":method", "GET"), 0x82u8),
            ((":method", "POST"), 0x83),
            ((":path", "/"), 0x84),
            ((":scheme", "https"), 0x87),
            ((":status", "200"), 0x88),
        ];
        for ((name, value), expected) in cases {
            let mut buf = BytesMut::new();
            encoder.encode_header(name, value, Indexing::Incremental, &mut buf);
            assert_eq!(buf.len(), 1);
            assert_eq!(buf[0], expected);
        }
    }

    #[test]
    fn repeated_field_hits_dynamic_table() {
        let mut encoder = Encoder::new(4096);
        let mut first = BytesMut::new();
        encoder.encode_header("x-trace", "abc123", Indexing::Incremental, &mut first);
        let mut second = BytesMut::new();
        encoder.encode_header("x-trace", "abc123", Indexing::Incremental, &mut second);
        // Second occurrence is a one-byte indexed reference to entry 62.
        assert_eq!(&second[..], &[0xbe]);
    }

    #[test]
    fn integer_vectors() {
        // 10 and 1337 with a 5-bit prefix, high bits 011 (RFC 7541 C.1).
        let mut buf = BytesMut::new();
        encode_integer(10, 5, 0x60, &mut buf);
        assert_eq!(&buf[..], &[0x6a]);

        let mut buf = BytesMut::new();
        encode_integer(1337, 5, 0x60, &mut buf);
        assert_eq!(&buf[..], &[0x7f, 0x9a, 0x0a]);
    }

    #[test]
    fn integer_at_prefix_boundary() {
        let mut buf = BytesMut::new();
        encode_integer(127, 7, 0x00, &mut buf);
        assert_eq!(&buf[..], &[0x7f, 0x00]);
    }

    #[test]
    fn sensitive_headers_are_never_indexed() {
        let mut encoder = Encoder::new(4096);
        encoder.set_huffman(false);
        let mut buf = BytesMut::new();
        encoder.encode_block(
            &[("authorization".to_string(), "Basic dXNlcg==".to_string())],
            &mut buf,
        );
        // 0x1f 0x08 = never-indexed with name index 23 (authorization).
        assert_eq!(buf[0], 0x1f);
        assert_eq!(buf[1], 0x08);
        assert_eq!(encoder.table_size(), 0);
    }

    #[test]
    fn table_size_update_emitted_after_settings_change() {
        let mut encoder = Encoder::new(4096);
        encoder.set_max_table_size(256);
        let mut buf = BytesMut::new();
        encoder.encode_header(":method", "GET", Indexing::Incremental, &mut buf);
        // 0x3f 0xe1 0x01 = table size update to 256, then indexed 0x82.
        assert_eq!(&buf[..], &[0x3f, 0xe1, 0x01, 0x82]);
        // Update is announced once.
        let mut buf = BytesMut::new();
        encoder.encode_header(":method", "GET", Indexing::Incremental, &mut buf);
        assert_eq!(&buf[..], &[0x82]);
    }

    #[test]
    fn roundtrip_policy_matrix_with_shared_tables() {
        let headers = vec![
            (":method".to_string(), "GET".to_string()),
            (":scheme".to_string(), "https".to_string()),
            (":path".to_string(), "/files/report.pdf".to_string()),
            (":authority".to_string(), "files.example.net".to_string()),
            ("accept".to_string(), "*/*".to_string()),
            ("x-request-id".to_string(), "e0f2".to_string()),
        ];
        for huffman in [true, false] {
            for indexing in [Indexing::Incremental, Indexing::None, Indexing::Never] {
                let mut encoder = Encoder::new(4096);
                encoder.set_huffman(huffman);
                let mut decoder = Decoder::new(4096);
                // Several blocks through the same pair of tables.
                for _ in 0..3 {
                    let mut buf = BytesMut::new();
                    for (name, value) in &headers {
                        encoder.encode_header(name, value, indexing, &mut buf);
                    }
                    let decoded = decode_block(&mut decoder, &buf);
                    let expected: Vec<(String, String)> = headers.clone();
                    assert_eq!(decoded, expected, "huffman={} {:?}", huffman, indexing);
                }
            }
        }
    }

    #[test]
    fn eviction_keeps_encoder_and_decoder_in_step() {
        // Tiny table: every insert evicts the previous entry.
        let mut encoder = Encoder::new(64);
        let mut decoder = Decoder::new(64);
        for i in 0..8 {
            let value = format!("value-{}", i);
            let mut buf = BytesMut::new();
            encoder.encode_header("x-seq", &value, Indexing::Incremental, &mut buf);
            let decoded = decode_block(&mut decoder, &buf);
            assert_eq!(decoded, vec![("x-seq".to_string(), value)]);
        }
    }
}
