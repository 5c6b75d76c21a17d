mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{filled, page, test_config, Fixture, TABLE};
use txstore::{
    common::{AbortReason, Permissions, Result, TransactionID, TxStoreError},
    log_mod::{LogRecord, LogRecordType},
    storage::DbFile,
};

#[test]
fn test_fetch_returns_cached_instance() -> Result<()> {
    let fx = Fixture::new(4)?;
    let pages = fx.allocate(1)?;
    let txn = TransactionID(1);

    let first = fx.pool.fetch_page(txn, pages[0], Permissions::ReadOnly)?;
    let second = fx.pool.fetch_page(txn, pages[0], Permissions::ReadOnly)?;

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(fx.pool.num_cached_pages(), 1);
    assert!(fx.pool.holds_lock(txn, pages[0]));
    Ok(())
}

#[test]
fn test_missing_page_is_an_error() -> Result<()> {
    let fx = Fixture::new(4)?;
    let result = fx.pool.fetch_page(TransactionID(1), page(7), Permissions::ReadOnly);
    assert!(matches!(result, Err(TxStoreError::PageNotFound(p)) if p == page(7)));
    assert!(!fx.pool.is_cached(page(7)));
    Ok(())
}

#[test]
fn test_capacity_evicts_least_recently_used() -> Result<()> {
    let fx = Fixture::new(2)?;
    fx.allocate(3)?;
    let txn = TransactionID(1);

    fx.pool.fetch_page(txn, page(0), Permissions::ReadOnly)?;
    fx.pool.fetch_page(txn, page(1), Permissions::ReadOnly)?;
    fx.pool.fetch_page(txn, page(2), Permissions::ReadOnly)?;

    assert_eq!(fx.pool.num_cached_pages(), 2);
    assert!(!fx.pool.is_cached(page(0)));
    assert!(fx.pool.is_cached(page(1)));
    assert!(fx.pool.is_cached(page(2)));
    Ok(())
}

#[test]
fn test_fetch_refreshes_recency() -> Result<()> {
    let fx = Fixture::new(2)?;
    fx.allocate(3)?;
    let txn = TransactionID(1);

    fx.pool.fetch_page(txn, page(0), Permissions::ReadOnly)?;
    fx.pool.fetch_page(txn, page(1), Permissions::ReadOnly)?;
    // Touch page 0 again so page 1 becomes the oldest
    fx.pool.fetch_page(txn, page(0), Permissions::ReadOnly)?;
    fx.pool.fetch_page(txn, page(2), Permissions::ReadOnly)?;

    assert!(fx.pool.is_cached(page(0)));
    assert!(!fx.pool.is_cached(page(1)));
    Ok(())
}

#[test]
fn test_dirty_victim_is_logged_then_written() -> Result<()> {
    let fx = Fixture::new(2)?;
    fx.allocate(3)?;
    let original = fx.table.read_page(page(0))?;
    let txn = TransactionID(1);
    fx.log_manager.log_txn_begin(txn)?;

    let p0 = fx.pool.fetch_page(txn, page(0), Permissions::ReadWrite)?;
    {
        let mut guard = p0.write();
        guard.set_data(filled(0xAB));
        guard.mark_dirty(Some(txn));
    }
    fx.pool.fetch_page(txn, page(1), Permissions::ReadOnly)?;
    fx.pool.fetch_page(txn, page(2), Permissions::ReadOnly)?;

    assert!(!fx.pool.is_cached(page(0)));
    assert_eq!(fx.table.read_page(page(0))?, filled(0xAB));

    let updates: Vec<LogRecord> = fx
        .log_manager
        .records()?
        .into_iter()
        .map(|entry| entry.record)
        .filter(|record| record.record_type() == LogRecordType::UpdateRecord)
        .collect();
    assert_eq!(updates.len(), 1);
    match &updates[0] {
        LogRecord::Update { txn: owner, before, after } => {
            assert_eq!(*owner, txn);
            assert_eq!(before.page_id, page(0));
            assert_eq!(before.data, original);
            assert_eq!(after.data, filled(0xAB));
        }
        other => panic!("expected an update, got {:?}", other),
    }
    Ok(())
}

#[test]
fn test_discard_page_is_idempotent() -> Result<()> {
    let fx = Fixture::new(4)?;
    fx.allocate(2)?;
    let txn = TransactionID(1);
    fx.pool.fetch_page(txn, page(0), Permissions::ReadOnly)?;
    fx.pool.fetch_page(txn, page(1), Permissions::ReadOnly)?;

    fx.pool.discard_page(page(0));
    fx.pool.discard_page(page(0));
    fx.pool.discard_page(page(9));

    assert!(!fx.pool.is_cached(page(0)));
    assert!(fx.pool.is_cached(page(1)));
    assert_eq!(fx.pool.num_cached_pages(), 1);
    Ok(())
}

#[test]
fn test_insert_marks_page_dirty_for_transaction() -> Result<()> {
    let fx = Fixture::new(4)?;
    let txn = TransactionID(3);
    fx.log_manager.log_txn_begin(txn)?;

    let record_id = fx.pool.insert_tuple(txn, TABLE, b"hello")?;
    assert_eq!(record_id.page_id, page(0));

    let cached = fx.pool.fetch_page(txn, page(0), Permissions::ReadOnly)?;
    assert_eq!(cached.read().is_dirty(), Some(txn));
    assert_eq!(fx.table.scan(txn, &fx.pool)?, vec![(record_id, b"hello".to_vec())]);
    Ok(())
}

#[test]
fn test_commit_flushes_only_own_pages() -> Result<()> {
    let fx = Fixture::new(8)?;
    fx.allocate(2)?;
    let writer = TransactionID(1);
    let other = TransactionID(2);
    fx.log_manager.log_txn_begin(writer)?;
    fx.log_manager.log_txn_begin(other)?;

    let mine = fx.pool.fetch_page(writer, page(0), Permissions::ReadWrite)?;
    {
        let mut guard = mine.write();
        guard.set_data(filled(1));
        guard.mark_dirty(Some(writer));
    }
    let theirs = fx.pool.fetch_page(other, page(1), Permissions::ReadWrite)?;
    {
        let mut guard = theirs.write();
        guard.set_data(filled(2));
        guard.mark_dirty(Some(other));
    }

    fx.pool.transaction_complete(writer, true)?;

    assert_eq!(fx.table.read_page(page(0))?, filled(1));
    assert_ne!(fx.table.read_page(page(1))?, filled(2));
    assert_eq!(mine.read().is_dirty(), None);
    assert_eq!(mine.read().before_image().data, filled(1));
    assert_eq!(theirs.read().is_dirty(), Some(other));
    assert!(fx.lock_manager.pages_held_by(writer).is_empty());
    assert!(fx.pool.holds_lock(other, page(1)));
    assert_eq!(
        fx.log_manager
            .get_total_log_records_of_type(LogRecordType::CommitRecord),
        1
    );
    Ok(())
}

#[test]
fn test_abort_restores_original_bytes() -> Result<()> {
    let fx = Fixture::new(4)?;
    fx.allocate(1)?;
    let original = fx.table.read_page(page(0))?;
    let txn = TransactionID(5);
    fx.log_manager.log_txn_begin(txn)?;

    fx.pool.insert_tuple(txn, TABLE, b"doomed")?;
    // Push the dirty page to storage so rollback has real work to do
    fx.pool.flush_pages(txn)?;
    assert_ne!(fx.table.read_page(page(0))?, original);

    fx.pool.transaction_complete(txn, false)?;

    assert_eq!(fx.table.read_page(page(0))?, original);
    assert!(!fx.pool.is_cached(page(0)));
    assert!(fx.lock_manager.pages_held_by(txn).is_empty());

    let reader = TransactionID(6);
    assert!(fx.table.scan(reader, &fx.pool)?.is_empty());
    Ok(())
}

#[test]
fn test_abort_drops_unflushed_dirty_pages() -> Result<()> {
    let fx = Fixture::new(4)?;
    let txn = TransactionID(1);
    fx.log_manager.log_txn_begin(txn)?;
    fx.pool.insert_tuple(txn, TABLE, b"never seen")?;

    fx.pool.transaction_complete(txn, false)?;

    assert!(!fx.pool.is_cached(page(0)));
    assert!(fx.table.scan(TransactionID(2), &fx.pool)?.is_empty());
    assert_eq!(
        fx.log_manager
            .get_total_log_records_of_type(LogRecordType::UpdateRecord),
        0
    );
    Ok(())
}

#[test]
fn test_flush_pages_releases_flushed_locks() -> Result<()> {
    let fx = Fixture::new(4)?;
    fx.allocate(2)?;
    let txn = TransactionID(1);
    fx.log_manager.log_txn_begin(txn)?;

    let p0 = fx.pool.fetch_page(txn, page(0), Permissions::ReadWrite)?;
    {
        let mut guard = p0.write();
        guard.set_data(filled(9));
        guard.mark_dirty(Some(txn));
    }
    fx.pool.fetch_page(txn, page(1), Permissions::ReadOnly)?;

    fx.pool.flush_pages(txn)?;

    assert_eq!(fx.table.read_page(page(0))?, filled(9));
    assert!(!fx.pool.holds_lock(txn, page(0)));
    // Clean pages are not flushed, so their locks stay
    assert!(fx.pool.holds_lock(txn, page(1)));
    Ok(())
}

#[test]
fn test_flush_all_pages_writes_every_dirty_page() -> Result<()> {
    let fx = Fixture::new(4)?;
    fx.allocate(2)?;
    let a = TransactionID(1);
    let b = TransactionID(2);
    fx.log_manager.log_txn_begin(a)?;
    fx.log_manager.log_txn_begin(b)?;

    for (txn, page_id, byte) in [(a, page(0), 3u8), (b, page(1), 4u8)] {
        let p = fx.pool.fetch_page(txn, page_id, Permissions::ReadWrite)?;
        let mut guard = p.write();
        guard.set_data(filled(byte));
        guard.mark_dirty(Some(txn));
    }

    fx.pool.flush_all_pages()?;

    assert_eq!(fx.table.read_page(page(0))?, filled(3));
    assert_eq!(fx.table.read_page(page(1))?, filled(4));
    assert!(!fx.pool.holds_lock(a, page(0)));
    assert!(!fx.pool.holds_lock(b, page(1)));
    assert_eq!(
        fx.log_manager
            .get_total_log_records_of_type(LogRecordType::UpdateRecord),
        2
    );
    Ok(())
}

#[test]
fn test_lock_abort_releases_everything_held() -> Result<()> {
    let config = test_config(4).with_lock_timeout(Duration::from_millis(100));
    let fx = Fixture::with_config(config)?;
    fx.allocate(2)?;
    let holder = TransactionID(1);
    let waiter = TransactionID(2);

    fx.pool.fetch_page(holder, page(0), Permissions::ReadWrite)?;
    fx.pool.fetch_page(waiter, page(1), Permissions::ReadOnly)?;

    let result = fx.pool.fetch_page(waiter, page(0), Permissions::ReadOnly);
    match result {
        Err(TxStoreError::TransactionAborted { txn, reason }) => {
            assert_eq!(txn, waiter);
            assert_eq!(reason, AbortReason::LockTimeout);
        }
        other => panic!("expected a timeout abort, got {:?}", other.map(|_| ())),
    }
    assert!(!fx.pool.holds_lock(waiter, page(1)));
    assert!(fx.pool.holds_lock(holder, page(0)));
    Ok(())
}

#[test]
fn test_lock_abort_rolls_back_before_unlocking() -> Result<()> {
    let config = test_config(8).with_lock_timeout(Duration::from_millis(100));
    let fx = Fixture::with_config(config)?;
    fx.allocate(2)?;
    let (loser, holder, bystander) = (TransactionID(1), TransactionID(2), TransactionID(3));
    for txn in [loser, holder, bystander] {
        fx.log_manager.log_txn_begin(txn)?;
    }

    let record_id = fx.pool.insert_tuple(loser, TABLE, b"uncommitted")?;
    assert_eq!(record_id.page_id, page(0));
    fx.pool.fetch_page(holder, page(1), Permissions::ReadWrite)?;

    let result = fx.pool.fetch_page(loser, page(1), Permissions::ReadWrite);
    assert!(matches!(
        result,
        Err(TxStoreError::TransactionAborted { reason: AbortReason::LockTimeout, .. })
    ));
    assert!(!fx.pool.holds_lock(loser, page(0)));
    assert!(!fx.pool.is_cached(page(0)));

    // The page it dirtied is free again, but its tuple is gone
    assert!(matches!(
        fx.table.get_tuple(bystander, record_id, &fx.pool),
        Err(TxStoreError::EmptySlot(0))
    ));
    let kept = fx.pool.insert_tuple(bystander, TABLE, b"kept")?;
    fx.pool.transaction_complete(bystander, true)?;
    fx.pool.transaction_complete(holder, true)?;

    // Already rolled back: a commit is refused and nothing is undone twice
    assert!(matches!(
        fx.pool.transaction_complete(loser, true),
        Err(TxStoreError::TransactionAborted { txn, .. }) if txn == loser
    ));
    let rows = fx.table.scan(TransactionID(4), &fx.pool)?;
    assert_eq!(rows, vec![(kept, b"kept".to_vec())]);
    assert_eq!(
        fx.log_manager
            .get_total_log_records_of_type(LogRecordType::AbortRecord),
        1
    );
    Ok(())
}

#[test]
fn test_lock_abort_restores_stolen_pages() -> Result<()> {
    let config = test_config(2).with_lock_timeout(Duration::from_millis(100));
    let fx = Fixture::with_config(config)?;
    fx.allocate(3)?;
    let original = fx.table.read_page(page(0))?;
    let (loser, holder) = (TransactionID(1), TransactionID(2));
    fx.log_manager.log_txn_begin(loser)?;
    fx.log_manager.log_txn_begin(holder)?;

    fx.pool.insert_tuple(loser, TABLE, b"stolen")?;
    fx.pool.fetch_page(holder, page(2), Permissions::ReadWrite)?;
    // Evicts the dirty page 0, writing the uncommitted tuple to storage
    fx.pool.fetch_page(loser, page(1), Permissions::ReadOnly)?;
    assert_ne!(fx.table.read_page(page(0))?, original);

    let result = fx.pool.fetch_page(loser, page(2), Permissions::ReadWrite);
    assert!(result.unwrap_err().is_abort());

    assert_eq!(fx.table.read_page(page(0))?, original);
    assert!(fx.lock_manager.pages_held_by(loser).is_empty());
    fx.pool.transaction_complete(loser, false)?;
    assert_eq!(
        fx.log_manager
            .get_total_log_records_of_type(LogRecordType::AbortRecord),
        1
    );
    Ok(())
}
