use super::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use storage::{FileStorage, MemoryStorage};
use tempfile::tempdir;

fn memory_pager() -> Pager {
    Pager::open(Box::new(MemoryStorage::new())).unwrap()
}

fn file_pager(dir: &tempfile::TempDir, stem: &str) -> Pager {
    let name = dir.path().join(stem).to_string_lossy().into_owned();
    Pager::open(Box::new(FileStorage::open(&name).unwrap())).unwrap()
}

#[test]
fn fresh_storage_reserves_page_one() {
    let pager = memory_pager();
    assert_eq!(pager.max_page(), 1);
}

#[test]
fn new_page_requires_write_transaction() {
    let pager = memory_pager();
    let err = pager.new_page().unwrap_err();
    assert!(matches!(err, DbError::TransactionMisuse(_)));
}

#[test]
fn put_page_requires_write_transaction() {
    let pager = memory_pager();
    let err = pager.put_page(Page::new(2)).unwrap_err();
    assert!(matches!(err, DbError::TransactionMisuse(_)));
}

#[test]
fn page_zero_is_reserved() {
    let pager = memory_pager();
    let err = pager.get_page(0).unwrap_err();
    assert!(matches!(err, DbError::TransactionMisuse(_)));
}

#[test]
fn end_write_without_begin_is_a_no_op() {
    let pager = memory_pager();
    pager.end_write().unwrap();
}

#[test]
fn dirty_pages_are_visible_within_the_transaction() {
    let pager = memory_pager();
    pager.begin_write().unwrap();

    let mut page = pager.new_page().unwrap();
    page.set_entries(vec![Entry::new(b"k".as_slice(), b"v".as_slice())])
        .unwrap();
    pager.put_page(page.clone()).unwrap();

    let seen = pager.get_page(page.number()).unwrap();
    assert_eq!(seen.get_value(b"k").unwrap(), Some(b"v".to_vec()));

    pager.end_write().unwrap();
}

#[test]
fn committed_pages_survive_into_later_transactions() {
    let pager = memory_pager();

    pager.begin_write().unwrap();
    let mut page = pager.new_page().unwrap();
    let number = page.number();
    page.set_entries(vec![Entry::new(b"k".as_slice(), b"v".as_slice())])
        .unwrap();
    pager.put_page(page).unwrap();
    pager.end_write().unwrap();

    pager.begin_read().unwrap();
    let seen = pager.get_page(number).unwrap();
    assert_eq!(seen.get_value(b"k").unwrap(), Some(b"v".to_vec()));
    pager.end_read().unwrap();
}

#[test]
fn commit_evicts_stale_cache_copies() {
    let pager = memory_pager();

    pager.begin_write().unwrap();
    let mut page = pager.new_page().unwrap();
    let number = page.number();
    page.set_value(b"k", b"v1").unwrap();
    pager.put_page(page).unwrap();
    pager.end_write().unwrap();

    // Populate the cache with the committed copy.
    pager.begin_read().unwrap();
    pager.get_page(number).unwrap();
    pager.end_read().unwrap();

    pager.begin_write().unwrap();
    let mut page = pager.get_page(number).unwrap();
    page.set_value(b"k", b"v2").unwrap();
    pager.put_page(page).unwrap();
    pager.end_write().unwrap();

    pager.begin_read().unwrap();
    let seen = pager.get_page(number).unwrap();
    assert_eq!(seen.get_value(b"k").unwrap(), Some(b"v2".to_vec()));
    pager.end_read().unwrap();
}

#[test]
fn rollback_discards_dirty_pages_and_allocations() {
    let pager = memory_pager();

    pager.begin_write().unwrap();
    let page = pager.new_page().unwrap();
    assert_eq!(page.number(), 2);
    pager.rollback_write();

    assert_eq!(pager.max_page(), 1);

    // The lock was released; a new write transaction can start.
    pager.begin_write().unwrap();
    let page = pager.new_page().unwrap();
    assert_eq!(page.number(), 2);
    pager.end_write().unwrap();
}

#[test]
fn max_page_counter_persists_across_reopen() {
    let dir = tempdir().unwrap();

    {
        let pager = file_pager(&dir, "t");
        pager.begin_write().unwrap();
        let page = pager.new_page().unwrap();
        assert_eq!(page.number(), 2);
        pager.end_write().unwrap();
    }

    let pager = file_pager(&dir, "t");
    assert_eq!(pager.max_page(), 2);
    pager.begin_write().unwrap();
    assert_eq!(pager.new_page().unwrap().number(), 3);
    pager.end_write().unwrap();
}

#[test]
fn interrupted_commit_rolls_back_at_next_open() {
    let dir = tempdir().unwrap();
    let name = dir.path().join("t").to_string_lossy().into_owned();
    let db_path = dir.path().join("t.db");
    let journal_path = dir.path().join("t-journal.db");

    {
        let pager = Pager::open(Box::new(FileStorage::open(&name).unwrap())).unwrap();
        pager.begin_write().unwrap();
        let mut page = pager.new_page().unwrap();
        page.set_value(b"k", b"committed").unwrap();
        pager.put_page(page).unwrap();
        pager.end_write().unwrap();
    }

    // Simulate a crash between journal creation and journal deletion:
    // snapshot the file, then tear the in-place image.
    std::fs::copy(&db_path, &journal_path).unwrap();
    {
        use std::io::{Seek, SeekFrom, Write};
        let mut raw = std::fs::OpenOptions::new()
            .write(true)
            .open(&db_path)
            .unwrap();
        raw.seek(SeekFrom::Start(page_offset(2))).unwrap();
        raw.write_all(&[0xFFu8; 64]).unwrap();
    }

    let pager = Pager::open(Box::new(FileStorage::open(&name).unwrap())).unwrap();
    assert!(!journal_path.exists());

    pager.begin_read().unwrap();
    let page = pager.get_page(2).unwrap();
    assert_eq!(page.get_value(b"k").unwrap(), Some(b"committed".to_vec()));
    pager.end_read().unwrap();
}

#[test]
fn at_most_one_writer_in_the_critical_section() {
    let pager = Arc::new(memory_pager());
    let writers_inside = Arc::new(AtomicUsize::new(0));
    let readers_inside = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..4 {
        let pager = Arc::clone(&pager);
        let writers_inside = Arc::clone(&writers_inside);
        let readers_inside = Arc::clone(&readers_inside);
        handles.push(std::thread::spawn(move || {
            for _ in 0..20 {
                pager.begin_write().unwrap();
                let inside = writers_inside.fetch_add(1, Ordering::SeqCst) + 1;
                assert_eq!(inside, 1, "two writers inside the critical section");
                assert_eq!(readers_inside.load(Ordering::SeqCst), 0);
                std::thread::sleep(Duration::from_micros(100));
                writers_inside.fetch_sub(1, Ordering::SeqCst);
                pager.end_write().unwrap();
            }
        }));
    }
    for _ in 0..4 {
        let pager = Arc::clone(&pager);
        let writers_inside = Arc::clone(&writers_inside);
        let readers_inside = Arc::clone(&readers_inside);
        handles.push(std::thread::spawn(move || {
            for _ in 0..20 {
                pager.begin_read().unwrap();
                readers_inside.fetch_add(1, Ordering::SeqCst);
                assert_eq!(writers_inside.load(Ordering::SeqCst), 0);
                std::thread::sleep(Duration::from_micros(100));
                readers_inside.fetch_sub(1, Ordering::SeqCst);
                pager.end_read().unwrap();
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn pending_writer_blocks_new_readers() {
    let pager = Arc::new(memory_pager());
    let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

    pager.begin_read().unwrap();

    let writer = {
        let pager = Arc::clone(&pager);
        let order = Arc::clone(&order);
        std::thread::spawn(move || {
            pager.begin_write().unwrap();
            order.lock().push("writer");
            pager.end_write().unwrap();
        })
    };

    // Give the writer time to register as pending, then race a reader in.
    std::thread::sleep(Duration::from_millis(50));
    let reader = {
        let pager = Arc::clone(&pager);
        let order = Arc::clone(&order);
        std::thread::spawn(move || {
            pager.begin_read().unwrap();
            order.lock().push("reader");
            pager.end_read().unwrap();
        })
    };

    std::thread::sleep(Duration::from_millis(50));
    pager.end_read().unwrap();

    writer.join().unwrap();
    reader.join().unwrap();
    assert_eq!(*order.lock(), vec!["writer", "reader"]);
}
