/*
 * table.rs
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

//! HPACK dynamic table (RFC 7541 §2.3.2, §4): FIFO of (name, value) entries.
//! Entry size is name length + value length + 32. Insertion is at the head;
//! eviction is from the tail until the configured capacity holds.

use std::collections::VecDeque;

/// One dynamic table entry.
#[derive(Debug, Clone)]
pub struct Entry {
    pub name: String,
    pub value: String,
}

impl Entry {
    /// RFC 7541 §4.1 entry size.
    pub fn size(&self) -> usize {
        self.name.len() + self.value.len() + 32
    }
}

/// FIFO dynamic table with size accounting. Index 0 is the most recently
/// inserted entry (HPACK index 62 when addressed after the static table).
pub struct DynamicTable {
    entries: VecDeque<Entry>,
    size: usize,
    max_size: usize,
}

impl DynamicTable {
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            size: 0,
            max_size,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of entry sizes currently held.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Entry by dynamic index (0 = most recent).
    pub fn get(&self, index: usize) -> Option<&Entry> {
        self.entries.get(index)
    }

    /// Insert at the head, evicting from the tail first. An entry larger
    /// than the whole capacity empties the table and inserts nothing
    /// (RFC 7541 §4.4).
    pub fn insert(&mut self, name: String, value: String) {
        let entry = Entry { name, value };
        let entry_size = entry.size();
        while self.size + entry_size > self.max_size {
            match self.entries.pop_back() {
                Some(evicted) => self.size -= evicted.size(),
                None => break,
            }
        }
        if entry_size <= self.max_size {
            self.size += entry_size;
            self.entries.push_front(entry);
        }
    }

    /// Change capacity, evicting from the tail until the new capacity holds.
    pub fn set_max_size(&mut self, max_size: usize) {
        self.max_size = max_size;
        while self.size > self.max_size {
            match self.entries.pop_back() {
                Some(evicted) => self.size -= evicted.size(),
                None => break,
            }
        }
    }

    /// Dynamic index of an exact (name, value) match.
    pub fn find(&self, name: &str, value: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.name == name && e.value == value)
    }

    /// Dynamic index of a name-only match.
    pub fn find_name(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.name == name)
    }
}
