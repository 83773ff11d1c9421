//! Write batch and merge example for CaskDb
//!
//! Commits several keys atomically, overwrites most of them to build up
//! reclaimable space, then compacts the data files with a merge.

use caskdb::{Options, WriteBatchOptions, DB};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let options = Options::default()
        .dir_path("./example_merge_data")
        .data_file_size(1024 * 1024) // 1MB to get several files
        .data_file_merge_ratio(0.3);
    let db = DB::open(options)?;

    // All or nothing: readers see either none or all of these keys
    let batch = db.new_write_batch(WriteBatchOptions::default())?;
    for i in 0..1000 {
        batch.put(format!("account:{:04}", i).as_bytes(), b"100")?;
    }
    batch.commit()?;
    println!("Committed initial balances");

    for round in 0..5 {
        for i in 0..1000 {
            let balance = format!("{}", 100 + round);
            db.put(format!("account:{:04}", i).as_bytes(), balance.as_bytes())?;
        }
    }

    let before = db.stat()?;
    println!("Before merge: {:?}", before);

    match db.merge() {
        Ok(()) => println!("Merge finished; the compacted files are used from the next open"),
        Err(e) if e.is_merge_retryable() => println!("Merge skipped: {}", e),
        Err(e) => return Err(e.into()),
    }

    db.close()?;
    Ok(())
}
