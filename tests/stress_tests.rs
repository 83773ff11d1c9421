// Stress Tests for CaskDb
// These tests are marked with #[ignore] and are intended to be run manually
// Run with: cargo test --release -- --ignored --nocapture

use caskdb::{Options, DB};
use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn stress_options(dir: &TempDir) -> Options {
    Options::default()
        .dir_path(dir.path())
        .data_file_size(4 * 1024 * 1024)
        .data_file_merge_ratio(0.3)
}

/// High-frequency write stress test
#[test]
#[ignore]
fn stress_high_frequency_writes() {
    env_logger::try_init().ok();
    let dir = TempDir::new().unwrap();
    let db = Arc::new(DB::open(stress_options(&dir)).unwrap());

    let duration = Duration::from_secs(30);
    let start = Instant::now();
    let operations = Arc::new(AtomicUsize::new(0));
    let stop_flag = Arc::new(AtomicBool::new(false));

    let num_threads = 8;
    let mut handles = vec![];
    for thread_id in 0..num_threads {
        let db = Arc::clone(&db);
        let operations = Arc::clone(&operations);
        let stop_flag = Arc::clone(&stop_flag);

        handles.push(thread::spawn(move || {
            let mut local_ops = 0usize;
            while !stop_flag.load(Ordering::Relaxed) {
                let key = format!("stress_key_{}_{}", thread_id, local_ops);
                let value = format!("stress_value_{}", local_ops);
                db.put(key.as_bytes(), value.as_bytes()).unwrap();
                local_ops += 1;
                operations.fetch_add(1, Ordering::Relaxed);
            }
            local_ops
        }));
    }

    thread::sleep(duration);
    stop_flag.store(true, Ordering::Relaxed);
    let per_thread: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let total_ops = operations.load(Ordering::Relaxed);
    let elapsed = start.elapsed();
    println!(
        "High-frequency writes: {} ops in {:?} ({:.0} ops/s)",
        total_ops,
        elapsed,
        total_ops as f64 / elapsed.as_secs_f64()
    );

    assert_eq!(db.stat().unwrap().key_num, total_ops);
    for (thread_id, ops) in per_thread.iter().enumerate() {
        if *ops > 0 {
            let key = format!("stress_key_{}_{}", thread_id, ops - 1);
            assert!(db.get(key.as_bytes()).unwrap().is_some());
        }
    }
}

/// Mixed read/write/delete workload with merges running alongside
#[test]
#[ignore]
fn stress_mixed_workload_with_merge() {
    env_logger::try_init().ok();
    let dir = TempDir::new().unwrap();
    let db = Arc::new(DB::open(stress_options(&dir)).unwrap());

    let key_space = 50_000;
    let stop_flag = Arc::new(AtomicBool::new(false));
    let merges = Arc::new(AtomicUsize::new(0));
    let mut handles = vec![];

    for _ in 0..6 {
        let db = Arc::clone(&db);
        let stop_flag = Arc::clone(&stop_flag);
        handles.push(thread::spawn(move || {
            let mut rng = rand::rng();
            while !stop_flag.load(Ordering::Relaxed) {
                let key = format!("mixed_{:06}", rng.random_range(0..key_space));
                match rng.random_range(0..10) {
                    0..=4 => {
                        let value = vec![b'm'; rng.random_range(16..512)];
                        db.put(key.as_bytes(), &value).unwrap();
                    }
                    5..=7 => {
                        db.get(key.as_bytes()).unwrap();
                    }
                    _ => db.delete(key.as_bytes()).unwrap(),
                }
            }
        }));
    }

    {
        let db = Arc::clone(&db);
        let stop_flag = Arc::clone(&stop_flag);
        let merges = Arc::clone(&merges);
        handles.push(thread::spawn(move || {
            while !stop_flag.load(Ordering::Relaxed) {
                match db.merge() {
                    Ok(()) => {
                        merges.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) if e.is_merge_retryable() => {}
                    Err(e) => panic!("merge failed: {}", e),
                }
                thread::sleep(Duration::from_millis(500));
            }
        }));
    }

    thread::sleep(Duration::from_secs(30));
    stop_flag.store(true, Ordering::Relaxed);
    for handle in handles {
        handle.join().unwrap();
    }

    let expected = db.list_keys().unwrap();
    let before = db.stat().unwrap();
    println!("Mixed workload: {} merges, {:?}", merges.load(Ordering::Relaxed), before);
    db.close().unwrap();
    drop(db);

    let db = DB::open(stress_options(&dir)).unwrap();
    assert_eq!(db.list_keys().unwrap(), expected);
}
