use std::sync::Arc;

use common::{DbError, DbResult, PageNumber};
use pager::{Page, PageType};

use crate::Kv;

/// Positioned iterator over one B-tree.
///
/// A cursor holds a snapshot of its current leaf plus an entry index.
/// Any split invalidates open positions: re-establish with one of the
/// `goto_*` calls before reading again. Lifetime is bounded by the owning
/// transaction; the VM closes cursors on `Halt`.
pub struct Cursor {
    kv: Arc<Kv>,
    root: PageNumber,
    page: Option<Page>,
    index: usize,
}

impl Cursor {
    pub(crate) fn new(kv: Arc<Kv>, root: PageNumber) -> Self {
        Self {
            kv,
            root,
            page: None,
            index: 0,
        }
    }

    pub fn root(&self) -> PageNumber {
        self.root
    }

    /// Position at the first record of the leftmost leaf. Returns false
    /// when the tree is empty.
    pub fn goto_first_record(&mut self) -> DbResult<bool> {
        let page = self.descend_edge(Edge::Leftmost)?;
        let occupied = page.record_count() > 0;
        self.page = Some(page);
        self.index = 0;
        Ok(occupied)
    }

    /// Position at the last record of the rightmost leaf. Returns false
    /// when the tree is empty.
    pub fn goto_last_record(&mut self) -> DbResult<bool> {
        let page = self.descend_edge(Edge::Rightmost)?;
        let count = page.record_count() as usize;
        self.page = Some(page);
        self.index = count.saturating_sub(1);
        Ok(count > 0)
    }

    /// Advance to the next record, crossing into the right sibling leaf
    /// when the current one is exhausted. Returns false at the end of the
    /// tree.
    pub fn goto_next(&mut self) -> DbResult<bool> {
        let Some(page) = &self.page else {
            return Ok(false);
        };

        if self.index + 1 < page.record_count() as usize {
            self.index += 1;
            return Ok(true);
        }

        let mut next = page.right();
        while next != 0 {
            let page = self.kv.pager().get_page(next)?;
            let occupied = page.record_count() > 0;
            next = page.right();
            if occupied {
                self.page = Some(page);
                self.index = 0;
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Key bytes of the current record.
    pub fn key(&self) -> DbResult<Option<Vec<u8>>> {
        Ok(self.current_entry()?.map(|e| e.key))
    }

    /// Value bytes of the current record.
    pub fn value(&self) -> DbResult<Option<Vec<u8>>> {
        Ok(self.current_entry()?.map(|e| e.value))
    }

    /// Insert or replace through the owning tree. Re-descends from the
    /// root; the cursor's own position is not moved, and a resulting
    /// split invalidates it.
    pub fn set(&mut self, key: &[u8], value: &[u8]) -> DbResult<()> {
        self.kv.set(self.root, key, value)
    }

    /// Delete the current record. The cursor stays at the same index,
    /// which now addresses the record that followed the deleted one.
    pub fn delete_current(&mut self) -> DbResult<()> {
        let Some(page) = &self.page else {
            return Err(DbError::TransactionMisuse(
                "delete_current on an unpositioned cursor".into(),
            ));
        };
        let entries = page.entries()?;
        let Some(entry) = entries.get(self.index) else {
            return Err(DbError::TransactionMisuse(
                "delete_current past the end of the leaf".into(),
            ));
        };

        let mut updated = self.kv.pager().get_page(page.number())?;
        updated.remove_value(&entry.key)?;
        self.kv.pager().put_page(updated.clone())?;
        self.page = Some(updated);
        Ok(())
    }

    fn current_entry(&self) -> DbResult<Option<pager::Entry>> {
        let Some(page) = &self.page else {
            return Ok(None);
        };
        Ok(page.entries()?.into_iter().nth(self.index))
    }

    fn descend_edge(&self, edge: Edge) -> DbResult<Page> {
        let mut page = self.kv.pager().get_page(self.root)?;
        loop {
            match page.page_type()? {
                PageType::Internal => {
                    let entries = page.entries()?;
                    let pick = match edge {
                        Edge::Leftmost => entries.first(),
                        Edge::Rightmost => entries.last(),
                    };
                    let entry = pick.ok_or_else(|| {
                        DbError::Corruption(format!(
                            "internal page {} has no children",
                            page.number()
                        ))
                    })?;
                    let child = crate::decode_page_number(&entry.value)?;
                    page = self.kv.pager().get_page(child)?;
                }
                _ => return Ok(page),
            }
        }
    }
}

#[derive(Clone, Copy)]
enum Edge {
    Leftmost,
    Rightmost,
}
