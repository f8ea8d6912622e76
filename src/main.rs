// respool demo binary
// The library lives in lib.rs; this exercises it against an in-memory resource.
// Set RUST_LOG=respool=trace to watch checkouts, reuse and eviction.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use respool::{FnManager, PoolConfiguration, ResourcePool};
use tracing_subscriber::EnvFilter;

struct Connection {
    peer: String,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let opened = AtomicUsize::new(0);
    let manager = FnManager::new(
        move || {
            let n = opened.fetch_add(1, Ordering::SeqCst);
            Ok::<_, io::Error>(Connection {
                peer: format!("localhost:6379#{n}"),
            })
        },
        |conn: &Connection| {
            tracing::info!(peer = %conn.peer, "disconnecting");
            Ok(())
        },
    );

    let config = PoolConfiguration::new()
        .with_max_size(2)
        .with_idle_timeout(Duration::from_millis(200))
        .with_reaping_frequency(Duration::from_millis(100));

    let pool = match ResourcePool::new(manager, config) {
        Ok(pool) => pool,
        Err(err) => {
            eprintln!("failed to start pool: {err}");
            std::process::exit(1);
        }
    };

    let workers: Vec<_> = (0..4)
        .map(|i| {
            let pool = pool.clone();
            thread::spawn(move || {
                let result = pool.scoped_use(None, |conn| {
                    thread::sleep(Duration::from_millis(20));
                    conn.peer.clone()
                });
                match result {
                    Ok(peer) => println!("  worker {i} used {peer}"),
                    Err(err) => println!("  worker {i} failed: {err}"),
                }
            })
        })
        .collect();
    for worker in workers {
        let _ = worker.join();
    }

    let stats = pool.stats();
    println!(
        "After work - idle: {}, available to create: {}, waiters: {}",
        stats.resources.len(),
        stats.available_to_create,
        stats.waiters
    );

    thread::sleep(Duration::from_millis(500));
    println!("After reaping - idle: {}", pool.stats().resources.len());

    for (key, value) in pool.export_metrics() {
        println!("  {key}: {value}");
    }
}
