/*
 * mod.rs
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

//! HPACK header compression (RFC 7541): integer and string primitives,
//! static table, per-connection dynamic tables, Huffman coding, decoder
//! and encoder. Tables are per connection and per direction; nothing in
//! here is shared between connections.

mod decoder;
mod encoder;
pub mod huffman;
mod static_table;
mod table;

pub use decoder::{Decoder, HeaderHandler};
pub use encoder::{Encoder, Indexing};
pub use static_table::{STATIC_TABLE, STATIC_TABLE_SIZE};
pub use table::DynamicTable;

/// Default dynamic table capacity (SETTINGS_HEADER_TABLE_SIZE default).
pub const DEFAULT_TABLE_SIZE: usize = 4096;
