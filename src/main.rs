use env_logger::Builder;
use log::{info, LevelFilter};

use txstore::{Database, DatabaseConfig, TableID};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    Builder::new().filter_level(LevelFilter::Info).init();

    info!("Transactional storage demo");

    let db_path = std::env::temp_dir().join(format!("txstore-demo-{}", std::process::id()));
    let config = DatabaseConfig::default().with_buffer_pool_pages(8);
    let db = Database::open(&db_path, config)?;
    let table = db.create_table(TableID(1), 32)?;
    db.recover()?;

    // One transaction that sticks
    let txn = db.begin()?;
    for i in 0..3 {
        db.insert(txn, TableID(1), format!("committed row {}", i).as_bytes())?;
    }
    db.commit(txn)?;

    // One that is rolled back
    let txn = db.begin()?;
    db.insert(txn, TableID(1), b"rolled back row")?;
    db.abort(txn)?;

    let reader = db.begin()?;
    for (record_id, tuple) in table.scan(reader, db.buffer_manager())? {
        info!("{} -> {}", record_id, String::from_utf8_lossy(&tuple));
    }
    db.commit(reader)?;

    db.checkpoint()?;
    info!("Log after checkpoint:\n{}", db.log_manager().describe()?);

    db.close()?;
    std::fs::remove_dir_all(&db_path)?;
    Ok(())
}
