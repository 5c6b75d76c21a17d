mod common;

use std::sync::Arc;

use common::{Fixture, PAGE_SIZE};
use txstore::{
    common::{PageID, RecordID, Result, TableID, TransactionID, TxStoreError},
    storage::{DBFiles, DbFile, File, FileMode, MemoryFile, PosixFile, SlottedPage},
    HeapSegment,
};

#[test]
fn test_memory_file_grows_on_write() {
    let mut file = MemoryFile::new(FileMode::WRITE);
    assert_eq!(file.len().unwrap(), 0);

    file.write_at(50, b"test data").unwrap();
    assert_eq!(file.len().unwrap(), 59);

    let mut buf = [0u8; 9];
    file.read_at(50, &mut buf).unwrap();
    assert_eq!(&buf, b"test data");
    assert!(file.bytes()[..50].iter().all(|b| *b == 0));

    file.set_len(10).unwrap();
    assert!(file.read_at(8, &mut buf).is_err());
}

#[test]
fn test_read_only_file_rejects_writes() {
    let mut file = MemoryFile::from_bytes(vec![1, 2, 3], FileMode::READ);
    assert_eq!(file.mode(), FileMode::READ);
    assert!(file.write_at(0, b"x").is_err());
    assert!(file.set_len(10).is_err());

    let mut buf = [0u8; 3];
    file.read_at(0, &mut buf).unwrap();
    assert_eq!(buf, [1, 2, 3]);
}

#[test]
fn test_posix_file_positional_io() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("blocks.dat");
    let mut file = PosixFile::new(&path, FileMode::WRITE)?;

    file.write_at(32, &[7u8; 16])?;
    file.write_at(0, &[1u8; 16])?;
    assert_eq!(file.len()?, 48);
    file.sync()?;

    // A second handle sees the same bytes and the same length
    let mut reader = PosixFile::new(&path, FileMode::READ)?;
    let mut buf = [0u8; 16];
    reader.read_at(32, &mut buf)?;
    assert_eq!(buf, [7u8; 16]);
    reader.read_at(16, &mut buf)?;
    assert_eq!(buf, [0u8; 16]);
    assert!(reader.write_at(0, b"no").is_err());

    let mut temp = PosixFile::make_temporary()?;
    temp.write_at(0, b"scratch")?;
    let mut buf = [0u8; 7];
    temp.read_at(0, &mut buf)?;
    assert_eq!(&buf, b"scratch");
    Ok(())
}

#[test]
fn test_slotted_page_insert_delete() -> Result<()> {
    let slots = SlottedPage::slots_per_page(PAGE_SIZE, 16);
    let mut body = SlottedPage::new(slots);

    assert_eq!(body.insert(b"a"), Some(0));
    assert_eq!(body.insert(b"b"), Some(1));
    body.delete(0)?;
    assert_eq!(body.insert(b"c"), Some(0));

    assert!(matches!(body.delete(slots), Err(TxStoreError::InvalidSlotIndex(_))));
    assert!(matches!(body.get(2), Err(TxStoreError::EmptySlot(2))));
    assert_eq!(body.empty_slots(), slots - 2);

    let bytes = body.encode(PAGE_SIZE)?;
    assert_eq!(bytes.len(), PAGE_SIZE);
    let decoded = SlottedPage::decode(&bytes, slots)?;
    let tuples: Vec<(usize, &[u8])> = decoded.tuples().collect();
    assert_eq!(tuples, vec![(0, &b"c"[..]), (1, &b"b"[..])]);
    Ok(())
}

#[test]
fn test_slotted_page_fills_up() {
    let slots = SlottedPage::slots_per_page(PAGE_SIZE, 16);
    let mut body = SlottedPage::new(slots);
    for _ in 0..slots {
        assert!(body.insert(&[9u8; 16]).is_some());
    }
    assert_eq!(body.insert(b"one more"), None);
    // A full page of maximum-width tuples still fits the page
    assert!(body.encode(PAGE_SIZE).is_ok());
}

#[test]
fn test_zeroed_page_decodes_empty() -> Result<()> {
    let body = SlottedPage::decode(&vec![0u8; PAGE_SIZE], 4)?;
    assert_eq!(body.empty_slots(), 4);
    Ok(())
}

#[test]
fn test_heap_segment_spills_to_new_pages() -> Result<()> {
    let fx = Fixture::new(8)?;
    let table_id = TableID(2);
    let segment = Arc::new(HeapSegment::in_memory(table_id, PAGE_SIZE, 16));
    fx.catalog.add_table(segment.clone());
    assert_eq!(fx.catalog.table_ids(), vec![TableID(1), table_id]);
    let txn = TransactionID(1);
    fx.log_manager.log_txn_begin(txn)?;

    let per_page = segment.slots_per_page();
    let mut ids = Vec::new();
    for i in 0..per_page + 1 {
        ids.push(fx.pool.insert_tuple(txn, table_id, format!("row{}", i).as_bytes())?);
    }

    assert_eq!(segment.num_pages()?, 2);
    assert_eq!(ids[per_page], RecordID::new(PageID::new(2, 1), 0));
    assert_eq!(segment.scan(txn, &fx.pool)?.len(), per_page + 1);

    fx.pool.delete_tuple(txn, ids[0])?;
    assert!(matches!(
        segment.get_tuple(txn, ids[0], &fx.pool),
        Err(TxStoreError::EmptySlot(0))
    ));
    assert_eq!(segment.get_tuple(txn, ids[1], &fx.pool)?, b"row1".to_vec());
    Ok(())
}

#[test]
fn test_heap_segment_rejects_oversized_tuples() -> Result<()> {
    let fx = Fixture::new(4)?;
    let segment = Arc::new(HeapSegment::temporary(TableID(3), PAGE_SIZE, 4)?);
    fx.catalog.add_table(segment.clone());

    let result = fx.pool.insert_tuple(TransactionID(1), TableID(3), b"too long");
    assert!(matches!(result, Err(TxStoreError::TupleTooLarge(8, 4))));
    assert_eq!(segment.num_pages()?, 0);
    Ok(())
}

#[test]
fn test_unregistered_table_is_an_error() -> Result<()> {
    let fx = Fixture::new(4)?;
    let result = fx.pool.insert_tuple(TransactionID(1), TableID(77), b"x");
    assert!(matches!(result, Err(TxStoreError::UnknownTable(TableID(77)))));
    Ok(())
}

#[test]
fn test_db_files_layout() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let root = dir.path().join("db");
    let files = DBFiles::new(&root)?;

    assert!(root.join("data").is_dir());
    assert!(root.join("log").is_dir());
    assert_eq!(files.get_data_file_path(TableID(4)), root.join("data").join("segment_4.dat"));
    assert_eq!(files.get_log_file_path(), root.join("log").join("wal.log"));

    files.cleanup()?;
    assert!(!root.exists());
    Ok(())
}
