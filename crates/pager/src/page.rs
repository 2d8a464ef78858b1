//! Typed view over a fixed-size page buffer.
//!
//! Layout (all integers little-endian, offsets from the start of the page):
//!
//! ```text
//! 0..2    page type (0 unknown, 1 internal, 2 leaf)
//! 2..6    parent page number (0 = none)
//! 6..10   left sibling page number (0 = none)
//! 10..14  right sibling page number (0 = none)
//! 14..16  record count N
//! 16..    N pairs of (key offset, value offset), 2 bytes each, growing forward
//! ```
//!
//! Key and value bytes grow backward from the page end: entry `i` occupies
//! `[key_off, value_off)` for the key and `[value_off, end)` for the value,
//! where `end` is the page size for the first entry and the previous entry's
//! key offset after that. Entries are kept sorted ascending by key bytes.

use common::{DbError, DbResult, NO_PAGE, PAGE_SIZE, PageNumber};

const TYPE_OFFSET: usize = 0;
const PARENT_OFFSET: usize = 2;
const LEFT_OFFSET: usize = 6;
const RIGHT_OFFSET: usize = 10;
const COUNT_OFFSET: usize = 14;
const ENTRY_TABLE_OFFSET: usize = 16;
const ENTRY_SLOT_SIZE: usize = 4;

/// B-tree node variant stored in the page header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PageType {
    Unknown,
    Internal,
    Leaf,
}

impl PageType {
    fn from_raw(raw: u16) -> DbResult<Self> {
        match raw {
            0 => Ok(Self::Unknown),
            1 => Ok(Self::Internal),
            2 => Ok(Self::Leaf),
            other => Err(DbError::Corruption(format!("unknown page type {other}"))),
        }
    }

    fn to_raw(self) -> u16 {
        match self {
            Self::Unknown => 0,
            Self::Internal => 1,
            Self::Leaf => 2,
        }
    }
}

/// One key/value tuple stored on a page. On a leaf the value is a user
/// record; on an internal page it is a 4-byte child page number and the key
/// is the child subtree's separator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl Entry {
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A page: an owned fixed-size buffer plus its 1-based page number.
///
/// Accessors interpret the raw bytes; mutations write straight into the
/// buffer. The pager owns the mapping from page numbers to current buffers,
/// so a mutated page must be handed back via `Pager::put_page`.
#[derive(Clone, Debug)]
pub struct Page {
    number: PageNumber,
    data: Vec<u8>,
}

impl Page {
    /// A fresh zero-filled leaf page.
    pub fn new(number: PageNumber) -> Self {
        let mut page = Self {
            number,
            data: vec![0u8; PAGE_SIZE],
        };
        page.set_page_type(PageType::Leaf);
        page
    }

    /// Wrap bytes read from cache or storage.
    pub fn from_bytes(number: PageNumber, data: Vec<u8>) -> DbResult<Self> {
        if data.len() != PAGE_SIZE {
            return Err(DbError::Corruption(format!(
                "page {number} has {} bytes, expected {PAGE_SIZE}",
                data.len()
            )));
        }
        Ok(Self { number, data })
    }

    pub fn number(&self) -> PageNumber {
        self.number
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    pub fn page_type(&self) -> DbResult<PageType> {
        PageType::from_raw(self.read_u16(TYPE_OFFSET))
    }

    pub fn set_page_type(&mut self, page_type: PageType) {
        self.write_u16(TYPE_OFFSET, page_type.to_raw());
    }

    pub fn parent(&self) -> PageNumber {
        self.read_u32(PARENT_OFFSET)
    }

    pub fn set_parent(&mut self, parent: PageNumber) {
        self.write_u32(PARENT_OFFSET, parent);
    }

    pub fn has_parent(&self) -> bool {
        self.parent() != NO_PAGE
    }

    pub fn left(&self) -> PageNumber {
        self.read_u32(LEFT_OFFSET)
    }

    pub fn set_left(&mut self, left: PageNumber) {
        self.write_u32(LEFT_OFFSET, left);
    }

    pub fn right(&self) -> PageNumber {
        self.read_u32(RIGHT_OFFSET)
    }

    pub fn set_right(&mut self, right: PageNumber) {
        self.write_u32(RIGHT_OFFSET, right);
    }

    pub fn record_count(&self) -> u16 {
        self.read_u16(COUNT_OFFSET)
    }

    /// Decode the full ordered entry list.
    pub fn entries(&self) -> DbResult<Vec<Entry>> {
        let count = self.record_count() as usize;
        let table_end = ENTRY_TABLE_OFFSET + count * ENTRY_SLOT_SIZE;
        if table_end > PAGE_SIZE {
            return Err(DbError::Corruption(format!(
                "page {}: entry table for {count} records exceeds page size",
                self.number
            )));
        }

        let mut entries = Vec::with_capacity(count);
        let mut end = PAGE_SIZE;
        for i in 0..count {
            let slot = ENTRY_TABLE_OFFSET + i * ENTRY_SLOT_SIZE;
            let key_off = self.read_u16(slot) as usize;
            let value_off = self.read_u16(slot + 2) as usize;
            if key_off < table_end || key_off > value_off || value_off > end {
                return Err(DbError::Corruption(format!(
                    "page {}: entry {i} offsets ({key_off}, {value_off}) out of range",
                    self.number
                )));
            }
            entries.push(Entry {
                key: self.data[key_off..value_off].to_vec(),
                value: self.data[value_off..end].to_vec(),
            });
            end = key_off;
        }
        Ok(entries)
    }

    /// Replace the page's entire entry list. Entries are sorted ascending
    /// by key and the offset table, payload region, and record count are
    /// rewritten from scratch.
    pub fn set_entries(&mut self, mut entries: Vec<Entry>) -> DbResult<()> {
        entries.sort_unstable_by(|a, b| a.key.cmp(&b.key));

        let table_end = ENTRY_TABLE_OFFSET + entries.len() * ENTRY_SLOT_SIZE;
        let payload: usize = entries.iter().map(|e| e.key.len() + e.value.len()).sum();
        if table_end + payload > PAGE_SIZE {
            return Err(DbError::Corruption(format!(
                "page {}: {} entries ({payload} payload bytes) overflow the page",
                self.number,
                entries.len()
            )));
        }

        self.data[ENTRY_TABLE_OFFSET..].fill(0);
        let mut end = PAGE_SIZE;
        for (i, entry) in entries.iter().enumerate() {
            let value_off = end - entry.value.len();
            let key_off = value_off - entry.key.len();
            self.data[key_off..value_off].copy_from_slice(&entry.key);
            self.data[value_off..end].copy_from_slice(&entry.value);

            let slot = ENTRY_TABLE_OFFSET + i * ENTRY_SLOT_SIZE;
            self.write_u16(slot, key_off as u16);
            self.write_u16(slot + 2, value_off as u16);
            end = key_off;
        }
        self.write_u16(COUNT_OFFSET, entries.len() as u16);
        Ok(())
    }

    /// Whether the page can hold its current entries plus `extra`.
    pub fn can_insert(&self, extra: &[Entry]) -> DbResult<bool> {
        let existing = self.entries()?;
        let total = existing.len() + extra.len();
        let table_end = ENTRY_TABLE_OFFSET + total * ENTRY_SLOT_SIZE;
        let payload: usize = existing
            .iter()
            .chain(extra.iter())
            .map(|e| e.key.len() + e.value.len())
            .sum();
        Ok(table_end + payload <= PAGE_SIZE)
    }

    /// Whether a page could hold exactly this entry list.
    pub fn entries_fit(entries: &[Entry]) -> bool {
        let table_end = ENTRY_TABLE_OFFSET + entries.len() * ENTRY_SLOT_SIZE;
        let payload: usize = entries.iter().map(|e| e.key.len() + e.value.len()).sum();
        table_end + payload <= PAGE_SIZE
    }

    /// Look up a key.
    ///
    /// On a leaf, returns the value stored under exactly `key`. On an
    /// internal page, returns the child pointer of the greatest separator
    /// less than or equal to `key`; if every separator is greater, the
    /// first entry's child is returned so descent can continue left.
    pub fn get_value(&self, key: &[u8]) -> DbResult<Option<Vec<u8>>> {
        let entries = self.entries()?;
        match self.page_type()? {
            PageType::Leaf | PageType::Unknown => Ok(entries
                .into_iter()
                .find(|e| e.key.as_slice() == key)
                .map(|e| e.value)),
            PageType::Internal => {
                let mut best: Option<Vec<u8>> = None;
                for entry in &entries {
                    if entry.key.as_slice() <= key {
                        best = Some(entry.value.clone());
                    } else {
                        break;
                    }
                }
                Ok(best.or_else(|| entries.into_iter().next().map(|e| e.value)))
            }
        }
    }

    /// Insert or replace the value under `key`, keeping entries sorted.
    pub fn set_value(&mut self, key: &[u8], value: &[u8]) -> DbResult<()> {
        let mut entries = self.entries()?;
        match entries.iter_mut().find(|e| e.key.as_slice() == key) {
            Some(entry) => entry.value = value.to_vec(),
            None => entries.push(Entry::new(key, value)),
        }
        self.set_entries(entries)
    }

    /// Remove the entry stored under exactly `key`, if present.
    pub fn remove_value(&mut self, key: &[u8]) -> DbResult<bool> {
        let mut entries = self.entries()?;
        let before = entries.len();
        entries.retain(|e| e.key.as_slice() != key);
        let removed = entries.len() < before;
        if removed {
            self.set_entries(entries)?;
        }
        Ok(removed)
    }

    fn read_u16(&self, offset: usize) -> u16 {
        u16::from_le_bytes([self.data[offset], self.data[offset + 1]])
    }

    fn write_u16(&mut self, offset: usize, value: u16) {
        self.data[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    }

    fn read_u32(&self, offset: usize) -> u32 {
        u32::from_le_bytes([
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
            self.data[offset + 3],
        ])
    }

    fn write_u32(&mut self, offset: usize, value: u32) {
        self.data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }
}
