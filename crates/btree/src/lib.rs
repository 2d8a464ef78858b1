//! Persistent sorted map built on the pager.
//!
//! Each B-tree is identified by its root page number, which never changes:
//! when the root overflows it is rewritten in place as an internal node so
//! that external references (the catalog's `rootpage` column) stay valid.
//! Leaves hold user key/value tuples; internal pages hold separator keys
//! mapping to 4-byte child page numbers, where descent follows the
//! greatest separator at or below the probe key.

mod cursor;

pub use cursor::Cursor;

use std::sync::Arc;

use catalog::{Catalog, Object, ObjectType};
use common::{DbError, DbResult, PageNumber, SCHEMA_ROOT_PAGE};
use pager::{Entry, Page, PageType, Pager};
use types::Value;

/// Encode a child page number for an internal-page entry value.
fn encode_page_number(number: PageNumber) -> [u8; 4] {
    number.to_le_bytes()
}

/// Decode a child page number from an internal-page entry value.
fn decode_page_number(bytes: &[u8]) -> DbResult<PageNumber> {
    let arr: [u8; 4] = bytes.try_into().map_err(|_| {
        DbError::Corruption(format!(
            "child pointer must be 4 bytes, got {}",
            bytes.len()
        ))
    })?;
    Ok(PageNumber::from_le_bytes(arr))
}

/// Key/value store facade over the pager: B-tree creation, point lookup,
/// insert with split propagation, rowid allocation, and catalog loading.
pub struct Kv {
    pager: Arc<Pager>,
    catalog: Arc<Catalog>,
}

impl Kv {
    pub fn new(pager: Arc<Pager>, catalog: Arc<Catalog>) -> Self {
        Self { pager, catalog }
    }

    pub fn pager(&self) -> &Arc<Pager> {
        &self.pager
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn begin_read(&self) -> DbResult<()> {
        self.pager.begin_read()
    }

    pub fn end_read(&self) -> DbResult<()> {
        self.pager.end_read()
    }

    pub fn begin_write(&self) -> DbResult<()> {
        self.pager.begin_write()
    }

    pub fn end_write(&self) -> DbResult<()> {
        self.pager.end_write()
    }

    pub fn rollback_write(&self) {
        self.pager.rollback_write()
    }

    /// Allocate an empty leaf and return its page number: the permanent
    /// identity of the new B-tree.
    pub fn new_btree(&self) -> DbResult<PageNumber> {
        let page = self.pager.new_page()?;
        Ok(page.number())
    }

    /// Open a cursor over the B-tree rooted at `root`.
    pub fn new_cursor(self: &Arc<Self>, root: PageNumber) -> Cursor {
        Cursor::new(Arc::clone(self), root)
    }

    /// Point lookup: descend separators to the target leaf and return the
    /// exact-match value, if any.
    pub fn get(&self, root: PageNumber, key: &[u8]) -> DbResult<Option<Vec<u8>>> {
        let leaf = self.leaf_for(root, key)?;
        leaf.get_value(key)
    }

    /// Insert or replace `key`. Descends from the root on every call, so
    /// successive inserts within one transaction always see the current
    /// dirty pages; open cursors are invalidated by any split.
    pub fn set(&self, root: PageNumber, key: &[u8], value: &[u8]) -> DbResult<()> {
        let page = self.leaf_for(root, key)?;
        let mut entries = page.entries()?;
        match entries.iter_mut().find(|e| e.key.as_slice() == key) {
            Some(entry) => entry.value = value.to_vec(),
            None => entries.push(Entry::new(key, value)),
        }

        if Page::entries_fit(&entries) {
            let mut page = page;
            page.set_entries(entries)?;
            self.pager.put_page(page)
        } else {
            self.split(page, entries)
        }
    }

    /// Next free rowid: one past the greatest key in the tree, or 1 for an
    /// empty tree.
    pub fn new_rowid(&self, root: PageNumber) -> DbResult<i64> {
        let mut page = self.pager.get_page(root)?;
        loop {
            match page.page_type()? {
                PageType::Internal => {
                    let entries = page.entries()?;
                    let last = entries.last().ok_or_else(|| {
                        DbError::Corruption(format!(
                            "internal page {} has no children",
                            page.number()
                        ))
                    })?;
                    page = self.pager.get_page(decode_page_number(&last.value)?)?;
                }
                _ => {
                    let entries = page.entries()?;
                    return match entries.last() {
                        Some(last) => Ok(codec::decode_key(&last.key)? + 1),
                        None => Ok(1),
                    };
                }
            }
        }
    }

    /// Reload the catalog from the system table in page 1: walk every
    /// record, decode it into an [`Object`], and install the list
    /// (regenerating the catalog version).
    pub fn parse_schema(self: &Arc<Self>) -> DbResult<()> {
        let mut objects = Vec::new();
        let mut cursor = self.new_cursor(SCHEMA_ROOT_PAGE);

        let mut more = cursor.goto_first_record()?;
        while more {
            let value = cursor.value()?.ok_or_else(|| {
                DbError::Corruption("catalog cursor lost its position".into())
            })?;
            objects.push(decode_object(&value)?);
            more = cursor.goto_next()?;
        }

        tracing::debug!(objects = objects.len(), "installed schema from catalog table");
        self.catalog.install_objects(objects);
        Ok(())
    }

    /// Descend to the leaf that covers `key`.
    fn leaf_for(&self, root: PageNumber, key: &[u8]) -> DbResult<Page> {
        let mut page = self.pager.get_page(root)?;
        loop {
            match page.page_type()? {
                PageType::Internal => {
                    let child = page.get_value(key)?.ok_or_else(|| {
                        DbError::Corruption(format!(
                            "internal page {} has no children",
                            page.number()
                        ))
                    })?;
                    page = self.pager.get_page(decode_page_number(&child)?)?;
                }
                _ => return Ok(page),
            }
        }
    }

    /// Split `page` so it can absorb `entries` (its desired full content).
    ///
    /// Two fresh sibling pages each take half the entries. The halves'
    /// first keys are promoted as separators: into the parent when one
    /// exists (replacing the split page's old separator), otherwise the
    /// split page itself is rewritten in place as the new internal root,
    /// preserving the root page number.
    fn split(&self, page: Page, mut entries: Vec<Entry>) -> DbResult<()> {
        if entries.len() < 2 {
            return Err(DbError::Corruption(format!(
                "entry too large to fit a page on {}",
                page.number()
            )));
        }
        entries.sort_unstable_by(|a, b| a.key.cmp(&b.key));

        let page_type = page.page_type()?;
        let right_entries = entries.split_off(entries.len() / 2);
        let left_entries = entries;

        let mut left = self.pager.new_page()?;
        let mut right = self.pager.new_page()?;
        left.set_page_type(page_type);
        right.set_page_type(page_type);
        left.set_entries(left_entries)?;
        right.set_entries(right_entries)?;

        // Stitch the sibling chain through the two new pages.
        left.set_left(page.left());
        left.set_right(right.number());
        right.set_left(left.number());
        right.set_right(page.right());
        if page.left() != 0 {
            let mut neighbor = self.pager.get_page(page.left())?;
            neighbor.set_right(left.number());
            self.pager.put_page(neighbor)?;
        }
        if page.right() != 0 {
            let mut neighbor = self.pager.get_page(page.right())?;
            neighbor.set_left(right.number());
            self.pager.put_page(neighbor)?;
        }

        if page_type == PageType::Internal {
            self.reparent_children(&left)?;
            self.reparent_children(&right)?;
        }

        let sep_left = Entry::new(
            left.entries()?[0].key.clone(),
            encode_page_number(left.number()),
        );
        let sep_right = Entry::new(
            right.entries()?[0].key.clone(),
            encode_page_number(right.number()),
        );

        if page.has_parent() {
            let parent = page.parent();
            left.set_parent(parent);
            right.set_parent(parent);
            self.pager.put_page(left)?;
            self.pager.put_page(right)?;
            // The split page is abandoned; its separator is replaced below.
            self.parent_insert(parent, page.number(), sep_left, sep_right)
        } else {
            // Root split: the original page becomes the new internal root
            // so its page number survives.
            let mut root = page;
            root.set_page_type(PageType::Internal);
            root.set_entries(vec![sep_left, sep_right])?;
            left.set_parent(root.number());
            right.set_parent(root.number());
            self.pager.put_page(left)?;
            self.pager.put_page(right)?;
            self.pager.put_page(root)
        }
    }

    /// Replace the split child's separator in `parent` with the two
    /// promoted separators, splitting the parent in turn if it overflows.
    fn parent_insert(
        &self,
        parent_number: PageNumber,
        old_child: PageNumber,
        sep_left: Entry,
        sep_right: Entry,
    ) -> DbResult<()> {
        let mut parent = self.pager.get_page(parent_number)?;
        let old_pointer = encode_page_number(old_child);
        let mut entries = parent.entries()?;
        entries.retain(|e| e.value.as_slice() != old_pointer.as_slice());
        entries.push(sep_left);
        entries.push(sep_right);

        if Page::entries_fit(&entries) {
            parent.set_entries(entries)?;
            self.pager.put_page(parent)
        } else {
            self.split(parent, entries)
        }
    }

    /// Point every child of an internal page back at it.
    fn reparent_children(&self, page: &Page) -> DbResult<()> {
        for entry in page.entries()? {
            let child_number = decode_page_number(&entry.value)?;
            let mut child = self.pager.get_page(child_number)?;
            child.set_parent(page.number());
            self.pager.put_page(child)?;
        }
        Ok(())
    }
}

/// Decode one catalog record into a schema object. Cell order matches the
/// `cdb_schema` columns after the key: type, name, table_name, rootpage,
/// sql.
fn decode_object(record: &[u8]) -> DbResult<Object> {
    let cells = codec::decode_record(record)?;
    let [
        Value::Text(object_type),
        Value::Text(name),
        Value::Text(table_name),
        Value::Int(root_page),
        Value::Text(json_schema),
    ] = cells.as_slice()
    else {
        return Err(DbError::Corruption(
            "catalog record has unexpected shape".into(),
        ));
    };

    let root_page = PageNumber::try_from(*root_page)
        .map_err(|_| DbError::Corruption(format!("rootpage {root_page} out of range")))?;

    Ok(Object {
        object_type: ObjectType::from_str(object_type)?,
        name: name.clone(),
        table_name: table_name.clone(),
        root_page,
        json_schema: json_schema.clone(),
    })
}
