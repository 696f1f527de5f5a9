/*
 * decoder.rs
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

//! HPACK decoder (RFC 7541). Decodes header blocks into (name, value)
//! pairs using the static table and a per-connection dynamic table.
//!
//! Any error from here is terminal for the connection: the HTTP/2 layer
//! maps it to COMPRESSION_ERROR. A fully indexed reference to a static
//! entry that has no value (e.g. plain `:authority`) is rejected rather
//! than substituting an empty value.

use bytes::Buf;
use std::io;

use super::huffman;
use super::static_table::{STATIC_TABLE, STATIC_TABLE_SIZE};
use super::table::DynamicTable;

/// Callback for each decoded header field.
pub trait HeaderHandler {
    fn header(&mut self, name: &str, value: &str);
}

/// HPACK decoder with dynamic table. One instance per connection direction.
pub struct Decoder {
    table: DynamicTable,
    /// Upper bound for table-size updates: the value we advertised in
    /// SETTINGS_HEADER_TABLE_SIZE.
    protocol_max_size: usize,
}

fn compression_error(msg: &'static str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

impl Decoder {
    pub fn new(max_table_size: usize) -> Self {
        Self {
            table: DynamicTable::new(max_table_size),
            protocol_max_size: max_table_size,
        }
    }

    /// Record a new SETTINGS_HEADER_TABLE_SIZE advertised to the peer.
    /// The peer is obliged to emit a table-size update at or below it.
    pub fn set_protocol_max_size(&mut self, size: usize) {
        self.protocol_max_size = size;
        if size < self.table.max_size() {
            self.table.set_max_size(size);
        }
    }

    /// Current dynamic table occupancy in bytes (entry sizes).
    pub fn table_size(&self) -> usize {
        self.table.size()
    }

    /// Decode one complete header block, invoking the handler per field.
    pub fn decode<B: Buf, H: HeaderHandler>(
        &mut self,
        buf: &mut B,
        handler: &mut H,
    ) -> io::Result<()> {
        let mut field_seen = false;
        while buf.has_remaining() {
            let b = buf.get_u8();
            if (b & 0x80) != 0 {
                // Indexed header field (7-bit index).
                let index = decode_integer(buf, b, 7)?;
                let (name, value) = self.indexed_field(index)?;
                handler.header(&name, &value);
                field_seen = true;
            } else if (b & 0x40) != 0 {
                // Literal with incremental indexing (6-bit name index).
                let (name, value) = self.literal(buf, b, 6)?;
                self.table.insert(name.clone(), value.clone());
                handler.header(&name, &value);
                field_seen = true;
            } else if (b & 0x20) != 0 {
                // Dynamic table size update (5-bit). Only valid at the
                // start of a header block (RFC 7541 §4.2).
                if field_seen {
                    return Err(compression_error(
                        "HPACK table size update after header field",
                    ));
                }
                let max_size = decode_integer(buf, b, 5)? as usize;
                if max_size > self.protocol_max_size {
                    return Err(compression_error(
                        "HPACK table size update exceeds SETTINGS limit",
                    ));
                }
                self.table.set_max_size(max_size);
            } else {
                // Literal without indexing (0000) or never indexed (0001),
                // both with a 4-bit name index.
                let (name, value) = self.literal(buf, b, 4)?;
                handler.header(&name, &value);
                field_seen = true;
            }
        }
        Ok(())
    }

    /// Resolve a fully indexed field. Index 0 and name-only static entries
    /// are errors.
    fn indexed_field(&self, index: u64) -> io::Result<(String, String)> {
        if index == 0 {
            return Err(compression_error("HPACK indexed field with index 0"));
        }
        if index < STATIC_TABLE_SIZE as u64 {
            let (name, value) = STATIC_TABLE[index as usize];
            match value {
                Some(v) => Ok((name.to_string(), v.to_string())),
                None => Err(compression_error(
                    "HPACK indexed reference to name-only static entry",
                )),
            }
        } else {
            let dyn_index = (index - STATIC_TABLE_SIZE as u64) as usize;
            match self.table.get(dyn_index) {
                Some(e) => Ok((e.name.clone(), e.value.clone())),
                None => Err(compression_error("HPACK index out of range")),
            }
        }
    }

    /// Resolve an index used as a literal's name reference. Name-only
    /// static entries are fine here.
    fn indexed_name(&self, index: u64) -> io::Result<String> {
        if index == 0 {
            Err(compression_error("HPACK name index 0"))
        } else if index < STATIC_TABLE_SIZE as u64 {
            Ok(STATIC_TABLE[index as usize].0.to_string())
        } else {
            let dyn_index = (index - STATIC_TABLE_SIZE as u64) as usize;
            match self.table.get(dyn_index) {
                Some(e) => Ok(e.name.clone()),
                None => Err(compression_error("HPACK name index out of range")),
            }
        }
    }

    fn literal<B: Buf>(&self, buf: &mut B, opcode: u8, nbits: u8) -> io::Result<(String, String)> {
        let index = decode_integer(buf, opcode, nbits)?;
        let name = if index == 0 {
            decode_string(buf)?
        } else {
            self.indexed_name(index)?
        };
        let value = decode_string(buf)?;
        Ok((name, value))
    }
}

/// RFC 7541 §5.1 integer decoding: the opcode byte carries an N-bit prefix,
/// overflow continues in 7-bit little-endian groups.
pub(super) fn decode_integer<B: Buf>(buf: &mut B, opcode: u8, nbits: u8) -> io::Result<u64> {
    let nmask = (1u64 << nbits) - 1;
    let mut value = (opcode as u64) & nmask;
    if value < nmask {
        return Ok(value);
    }
    let mut shift = 0u32;
    loop {
        if !buf.has_remaining() {
            return Err(compression_error("HPACK integer truncated"));
        }
        let b = buf.get_u8();
        value += ((b & 0x7f) as u64) << shift;
        if (b & 0x80) == 0 {
            break;
        }
        shift += 7;
        if shift > 63 {
            return Err(compression_error("HPACK integer too large"));
        }
    }
    Ok(value)
}

/// RFC 7541 §5.2 string: Huffman bit + 7-bit length integer + octets.
fn decode_string<B: Buf>(buf: &mut B) -> io::Result<String> {
    if !buf.has_remaining() {
        return Err(compression_error("HPACK string truncated"));
    }
    let b = buf.get_u8();
    let huffman_coded = (b & 0x80) != 0;
    let len = decode_integer(buf, b, 7)? as usize;
    if buf.remaining() < len {
        return Err(compression_error("HPACK string truncated"));
    }
    let mut bytes = vec![0u8; len];
    buf.copy_to_slice(&mut bytes);
    let plain = if huffman_coded {
        huffman::decode(&bytes)?
    } else {
        bytes
    };
    String::from_utf8(plain).map_err(|_| compression_error("HPACK string not UTF-8"))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Collect(Vec<(String, String)>);

    impl HeaderHandler for Collect {
        fn header(&mut self, name: &str, value: &str) {
            self.0.push((name.to_string(), value.to_string()));
        }
    }

    fn decode_all(decoder: &mut Decoder, data: &[u8]) -> io::Result<Vec<(String, String)>> {
        let mut collect = Collect(Vec::new());
        decoder.decode(&mut &data[..], &mut collect)?;
        Ok(collect.0)
    }

    #[test]
    fn indexed_static() {
        // 0x82 = indexed, index 2 = :method GET
        let mut decoder = Decoder::new(4096);
        let headers = decode_all(&mut decoder, &[0x82]).unwrap();
        assert_eq!(headers, vec![(":method".to_string(), "GET".to_string())]);
    }

    #[test]
    fn multiple_indexed() {
        let mut decoder = Decoder::new(4096);
        let headers = decode_all(&mut decoder, &[0x82, 0x87, 0x84]).unwrap();
        assert_eq!(headers[0].1, "GET");
        assert_eq!(headers[1].1, "https");
        assert_eq!(headers[2].1, "/");
    }

    #[test]
    fn index_zero_rejected() {
        let mut decoder = Decoder::new(4096);
        assert!(decode_all(&mut decoder, &[0x80]).is_err());
    }

    #[test]
    fn indexed_name_only_static_entry_rejected() {
        // Index 1 = :authority, which has no value in the static table.
        let mut decoder = Decoder::new(4096);
        assert!(decode_all(&mut decoder, &[0x81]).is_err());
    }

    #[test]
    fn rfc_c_2_1_literal_with_indexing() {
        let data: &[u8] = &[
            0x40, 0x0a, b'c', b'u', b's', b't', b'o', b'm', b'-', b'k', b'e', b'y', 0x0d, b'c',
            b'u', b's', b't', b'o', b'm', b'-', b'h', b'e', b'a', b'd', b'e', b'r',
        ];
        let mut decoder = Decoder::new(4096);
        let headers = decode_all(&mut decoder, data).unwrap();
        assert_eq!(
            headers,
            vec![("custom-key".to_string(), "custom-header".to_string())]
        );
        assert_eq!(decoder.table_size(), 55);
    }

    #[test]
    fn rfc_c_2_2_literal_without_indexing() {
        let data: &[u8] = &[
            0x04, 0x0c, b'/', b's', b'a', b'm', b'p', b'l', b'e', b'/', b'p', b'a', b't', b'h',
        ];
        let mut decoder = Decoder::new(4096);
        let headers = decode_all(&mut decoder, data).unwrap();
        assert_eq!(headers, vec![(":path".to_string(), "/sample/path".to_string())]);
        assert_eq!(decoder.table_size(), 0);
    }

    #[test]
    fn never_indexed_literal() {
        // 0x10 = never indexed, new name.
        let data: &[u8] = &[
            0x10, 0x08, b'p', b'a', b's', b's', b'w', b'o', b'r', b'd', 0x06, b's', b'e', b'c',
            b'r', b'e', b't',
        ];
        let mut decoder = Decoder::new(4096);
        let headers = decode_all(&mut decoder, data).unwrap();
        assert_eq!(headers, vec![("password".to_string(), "secret".to_string())]);
        assert_eq!(decoder.table_size(), 0);
    }

    #[test]
    fn dynamic_entry_addressable_after_insert() {
        // Insert custom-key, then reference it as index 62 (0xbe).
        let mut decoder = Decoder::new(4096);
        let insert: &[u8] = &[
            0x40, 0x0a, b'c', b'u', b's', b't', b'o', b'm', b'-', b'k', b'e', b'y', 0x0d, b'c',
            b'u', b's', b't', b'o', b'm', b'-', b'h', b'e', b'a', b'd', b'e', b'r',
        ];
        decode_all(&mut decoder, insert).unwrap();
        let headers = decode_all(&mut decoder, &[0xbe]).unwrap();
        assert_eq!(
            headers,
            vec![("custom-key".to_string(), "custom-header".to_string())]
        );
    }

    #[test]
    fn table_size_update_at_block_start() {
        let mut decoder = Decoder::new(4096);
        // 0x20 = resize to 0, then an indexed field.
        let headers = decode_all(&mut decoder, &[0x20, 0x82]).unwrap();
        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn table_size_update_after_field_rejected() {
        let mut decoder = Decoder::new(4096);
        assert!(decode_all(&mut decoder, &[0x82, 0x20]).is_err());
    }

    #[test]
    fn table_size_update_above_settings_rejected() {
        let mut decoder = Decoder::new(4096);
        decoder.set_protocol_max_size(128);
        // 0x3f 0xe1 0x1f = resize to 31 + 97 + 3968 = 4096 > 128.
        assert!(decode_all(&mut decoder, &[0x3f, 0xe1, 0x1f]).is_err());
    }

    #[test]
    fn resize_evicts_dynamic_entries() {
        let mut decoder = Decoder::new(4096);
        let insert: &[u8] = &[
            0x40, 0x0a, b'c', b'u', b's', b't', b'o', b'm', b'-', b'k', b'e', b'y', 0x0d, b'c',
            b'u', b's', b't', b'o', b'm', b'-', b'h', b'e', b'a', b'd', b'e', b'r',
        ];
        decode_all(&mut decoder, insert).unwrap();
        assert_eq!(decoder.table_size(), 55);
        // Resize to 0 empties the table; the old index 62 must now fail.
        decode_all(&mut decoder, &[0x20]).unwrap();
        assert_eq!(decoder.table_size(), 0);
        assert!(decode_all(&mut decoder, &[0xbe]).is_err());
    }

    #[test]
    fn huffman_coded_value() {
        // literal without indexing, new name "x", value Huffman "abc" (1c 64).
        let data: &[u8] = &[0x00, 0x01, b'x', 0x82, 0x1c, 0x64];
        let mut decoder = Decoder::new(4096);
        let headers = decode_all(&mut decoder, data).unwrap();
        assert_eq!(headers, vec![("x".to_string(), "abc".to_string())]);
    }

    #[test]
    fn truncated_string_rejected() {
        let data: &[u8] = &[0x00, 0x05, b'a', b'b'];
        let mut decoder = Decoder::new(4096);
        assert!(decode_all(&mut decoder, data).is_err());
    }

    #[test]
    fn integer_primitive_roundtrip() {
        use super::super::encoder::encode_integer;
        use bytes::BytesMut;

        for nbits in 1..=7u8 {
            let boundary = 1u64 << nbits;
            let values = [0, 1, boundary - 2, boundary - 1, boundary, 1337, (1u64 << 31) - 1];
            for &v in &values {
                let mut buf = BytesMut::new();
                encode_integer(v, nbits, 0x00, &mut buf);
                let mut cursor = &buf[..];
                let opcode = {
                    use bytes::Buf;
                    cursor.get_u8()
                };
                let decoded = decode_integer(&mut cursor, opcode, nbits).unwrap();
                assert_eq!(decoded, v, "nbits={} v={}", nbits, v);
                assert!(!cursor.has_remaining());
            }
        }
    }
}
