//! Basic usage example for CaskDb
//!
//! This example demonstrates the fundamental operations:
//! - Opening a database
//! - Writing key-value pairs
//! - Reading values
//! - Deleting keys
//! - Iterating over a key prefix

use caskdb::{IteratorOptions, Options, DB};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::init();

    // Configure database options
    let options = Options::default()
        .dir_path("./example_data")
        .data_file_size(64 * 1024 * 1024) // 64MB
        .bytes_per_sync(1024 * 1024);

    // Open database (will be created if it doesn't exist)
    let db = DB::open(options)?;

    println!("Database opened successfully");

    // Write some key-value pairs
    println!("Writing data...");
    db.put(b"user:1", b"alice")?;
    db.put(b"user:2", b"bob")?;
    db.put(b"order:1", b"book")?;

    // Read values
    println!("Reading data...");
    if let Some(value) = db.get(b"user:1")? {
        println!("user:1 => {:?}", String::from_utf8_lossy(&value));
    }

    // Delete a key
    println!("Deleting user:2...");
    db.delete(b"user:2")?;

    match db.get(b"user:2")? {
        Some(_) => println!("user:2 still exists (unexpected)"),
        None => println!("user:2 was successfully deleted"),
    }

    // Scan the remaining users
    let mut iter = db.iter(IteratorOptions::default().prefix(b"user:"));
    while iter.valid() {
        println!("{} => {}", String::from_utf8_lossy(iter.key()), String::from_utf8_lossy(&iter.value()?));
        iter.next();
    }
    drop(iter);

    println!("{:?}", db.stat()?);

    // Close database
    db.close()?;
    println!("Database closed");

    Ok(())
}
