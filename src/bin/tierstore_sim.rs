//! tierstore workload simulator
//!
//! Drives a `TieredBlockStore` with a synthetic multi-threaded cache workload:
//! reads go through the store, misses are filled from a pretend backing store,
//! and hot blocks can be promoted into the fastest tier.
//!
//! Usage:
//!   tierstore_sim run --config store.toml --threads 8 --ops 100000
//!   tierstore_sim init-config --output store.toml

use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tierstore::config::StoreConfig;
use tierstore::lock::LockMode;
use tierstore::logging;
use tierstore::metadata::types::{BlockId, BlockStoreLocation};
use tierstore::metrics::WorkerMetrics;
use tierstore::storage::{StoreError, TieredBlockStore};

/// tierstore workload simulator
#[derive(Parser)]
#[command(name = "tierstore_sim")]
#[command(about = "Synthetic workload driver for the tiered block store")]
struct Args {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Run a workload against an in-memory store
    Run {
        /// Store configuration (TOML); built-in defaults when omitted
        #[arg(long)]
        config: Option<PathBuf>,

        /// Log level (overrides the config's node.log_level)
        #[arg(long)]
        log_level: Option<String>,

        /// Worker threads
        #[arg(long, default_value_t = 4)]
        threads: usize,

        /// Operations per thread
        #[arg(long, default_value_t = 10_000)]
        ops: u64,

        /// Number of distinct block ids
        #[arg(long, default_value_t = 4096)]
        key_space: u64,

        /// Smallest block size in bytes
        #[arg(long, default_value_t = 64 * 1024)]
        min_block_size: u64,

        /// Largest block size in bytes
        #[arg(long, default_value_t = 4 * 1024 * 1024)]
        max_block_size: u64,

        /// Percentage of operations that remove a block instead of reading it
        #[arg(long, default_value_t = 5)]
        remove_percent: u64,

        /// Promote blocks into the fastest tier when they are read
        #[arg(long)]
        promote: bool,

        /// Seed for the workload generator
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },

    /// Write the default configuration to a file
    InitConfig {
        #[arg(long, default_value = "tierstore.toml")]
        output: PathBuf,
    },
}

/// Workload parameters shared by all threads
#[derive(Clone, Copy)]
struct Workload {
    ops: u64,
    key_space: u64,
    min_block_size: u64,
    max_block_size: u64,
    remove_percent: u64,
    promote: bool,
    seed: u64,
}

/// Upper bound on waiting for the writer lock of a freshly created block
const FILL_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Skewed key choice: half the draws hit the first eighth of the key space
fn pick_key(rng: &mut StdRng, key_space: u64) -> BlockId {
    if rng.gen_bool(0.5) {
        rng.gen_range(0..(key_space / 8).max(1))
    } else {
        rng.gen_range(0..key_space)
    }
}

/// Per-thread outcome counts
#[derive(Debug, Default)]
struct WorkloadStats {
    hits: u64,
    misses: u64,
    fills: u64,
    removes: u64,
    promotions: u64,
    out_of_space: u64,
    lock_timeouts: u64,
    latencies: Vec<Duration>,
}

impl WorkloadStats {
    fn merge(&mut self, other: WorkloadStats) {
        self.hits += other.hits;
        self.misses += other.misses;
        self.fills += other.fills;
        self.removes += other.removes;
        self.promotions += other.promotions;
        self.out_of_space += other.out_of_space;
        self.lock_timeouts += other.lock_timeouts;
        self.latencies.extend(other.latencies);
    }

    fn percentile(&self, p: f64) -> Duration {
        if self.latencies.is_empty() {
            return Duration::ZERO;
        }
        let index = ((self.latencies.len() - 1) as f64 * p).round() as usize;
        self.latencies[index]
    }

    fn print(&mut self, elapsed: Duration) {
        self.latencies.sort();
        let total = self.latencies.len() as u64;

        println!("Workload summary");
        println!("  Operations: {}", total);
        println!("  Elapsed:    {:?}", elapsed);
        println!(
            "  Throughput: {:.2} ops/sec",
            total as f64 / elapsed.as_secs_f64().max(f64::EPSILON)
        );
        println!(
            "  Hit ratio:  {:.2}%",
            100.0 * self.hits as f64 / (self.hits + self.misses).max(1) as f64
        );
        println!("  Fills:      {}", self.fills);
        println!("  Removes:    {}", self.removes);
        println!("  Promotions: {}", self.promotions);
        println!("  OutOfSpace: {}", self.out_of_space);
        println!("  Timeouts:   {}", self.lock_timeouts);
        println!("  p50:        {:?}", self.percentile(0.50));
        println!("  p99:        {:?}", self.percentile(0.99));
        println!("  max:        {:?}", self.percentile(1.0));
    }
}

fn block_size(rng: &mut StdRng, workload: &Workload) -> u64 {
    rng.gen_range(workload.min_block_size..=workload.max_block_size)
}

fn count_error(stats: &mut WorkloadStats, err: &StoreError) {
    match err {
        StoreError::OutOfSpace { .. } => stats.out_of_space += 1,
        StoreError::LockTimeout { .. } => stats.lock_timeouts += 1,
        _ => {}
    }
}

/// Cache fill after a miss: the bytes come from the backing store
fn fill(store: &TieredBlockStore, stats: &mut WorkloadStats, id: BlockId, size: u64) {
    store.record_ufs_read(size);
    match store.create_block(id, BlockStoreLocation::AnyTier, size) {
        Ok(_) => {}
        // Another thread is filling the same block
        Err(StoreError::BlockAlreadyExists(_)) => return,
        Err(e) => {
            count_error(stats, &e);
            return;
        }
    }

    // Hold the writer lock across the transfer and the commit
    let writer = match store.lock_block(id, LockMode::Exclusive, Some(FILL_LOCK_TIMEOUT)) {
        Ok(handle) => handle,
        Err(e) => {
            count_error(stats, &e);
            if let Err(e) = store.abort_block(id) {
                tracing::warn!("Failed to abort block {}: {}", id, e);
            }
            return;
        }
    };

    let result = store
        .write_to_block_locked(&writer, size)
        .and_then(|_| store.commit_block_locked(&writer));
    match result {
        Ok(_) => stats.fills += 1,
        Err(e) => {
            count_error(stats, &e);
            if let Err(e) = store.abort_block_locked(&writer) {
                tracing::warn!("Failed to abort block {}: {}", id, e);
            }
        }
    }
    if let Err(e) = store.unlock(writer) {
        tracing::warn!("Failed to unlock block {}: {}", id, e);
    }
}

fn run_thread(store: &TieredBlockStore, workload: Workload, thread: u64) -> WorkloadStats {
    let mut rng = StdRng::seed_from_u64(workload.seed.wrapping_add(thread));
    let mut stats = WorkloadStats::default();

    for _ in 0..workload.ops {
        let id = pick_key(&mut rng, workload.key_space);
        let started = Instant::now();

        if rng.gen_range(0..100) < workload.remove_percent {
            match store.remove_block(id) {
                Ok(_) => stats.removes += 1,
                Err(e) => count_error(&mut stats, &e),
            }
        } else {
            match store.lock_block_for_read(id) {
                Ok(handle) => {
                    stats.hits += 1;
                    let size = store.get_block(id).map(|m| m.size).unwrap_or(0);
                    store.record_read(true, size);
                    if let Err(e) = store.unlock(handle) {
                        tracing::warn!("Failed to unlock block {}: {}", id, e);
                    }

                    if workload.promote {
                        let fastest = BlockStoreLocation::AnyDirInTier(0);
                        match store.move_block(id, fastest) {
                            Ok(meta) if meta.dir.tier == 0 => stats.promotions += 1,
                            Ok(_) | Err(StoreError::BlockNotFound(_)) => {}
                            Err(e) => count_error(&mut stats, &e),
                        }
                    }
                }
                Err(StoreError::BlockNotFound(_)) => {
                    stats.misses += 1;
                    let size = block_size(&mut rng, &workload);
                    fill(store, &mut stats, id, size);
                }
                Err(e) => count_error(&mut stats, &e),
            }
        }

        stats.latencies.push(started.elapsed());
    }
    stats
}

fn run(config: StoreConfig, threads: usize, workload: Workload) -> Result<(), String> {
    let metrics = Arc::new(WorkerMetrics::new(config.metrics.instance.clone()));
    let store = Arc::new(TieredBlockStore::new(&config, metrics.clone()));

    let done = Arc::new(AtomicBool::new(false));
    let reporter = (config.metrics.enabled && config.metrics.report_interval_secs > 0).then(|| {
        let metrics = metrics.clone();
        let done = done.clone();
        let interval = Duration::from_secs(config.metrics.report_interval_secs);
        thread::spawn(move || {
            let mut last = Instant::now();
            while !done.load(Ordering::Relaxed) {
                thread::sleep(Duration::from_millis(100));
                if last.elapsed() >= interval {
                    metrics.report();
                    last = Instant::now();
                }
            }
        })
    });

    tracing::info!(
        "Running {} threads x {} ops over {} block ids",
        threads,
        workload.ops,
        workload.key_space
    );

    let started = Instant::now();
    let completed = Arc::new(AtomicU64::new(0));
    let workers: Vec<_> = (0..threads as u64)
        .map(|t| {
            let store = store.clone();
            let completed = completed.clone();
            thread::spawn(move || {
                let stats = run_thread(&store, workload, t);
                completed.fetch_add(1, Ordering::Relaxed);
                stats
            })
        })
        .collect();

    let mut stats = WorkloadStats::default();
    for worker in workers {
        let thread_stats = worker
            .join()
            .map_err(|_| "workload thread panicked".to_string())?;
        stats.merge(thread_stats);
    }
    let elapsed = started.elapsed();

    done.store(true, Ordering::Relaxed);
    if let Some(reporter) = reporter {
        let _ = reporter.join();
    }

    tracing::info!("{} workload threads finished", completed.load(Ordering::Relaxed));
    stats.print(elapsed);

    let capacity = store.capacity();
    println!();
    println!("Capacity");
    for tier in &capacity.tiers {
        println!(
            "  tier {} ({}): {} / {} bytes committed",
            tier.ordinal, tier.alias, tier.committed_bytes, tier.capacity_bytes
        );
    }
    println!("  blocks cached: {}", capacity.block_count);

    println!();
    println!("Metrics ({})", metrics.instance());
    let snapshot = metrics.snapshot();
    for (counter, value) in &snapshot.counters {
        println!("  {:<18} {}", counter.name(), value);
    }
    for (gauge, value) in &snapshot.gauges {
        println!("  {:<18} {}", gauge.name(), value);
    }

    store.check_invariants()
}

fn main() {
    let args = Args::parse();

    match args.mode {
        Mode::InitConfig { output } => {
            if let Err(e) = StoreConfig::default().to_file(&output) {
                eprintln!("[tierstore_sim] ERROR: {}", e);
                process::exit(1);
            }
            println!("Wrote default configuration to {}", output.display());
        }
        Mode::Run {
            config,
            log_level,
            threads,
            ops,
            key_space,
            min_block_size,
            max_block_size,
            remove_percent,
            promote,
            seed,
        } => {
            let mut config = match config {
                Some(path) => match StoreConfig::from_file(&path) {
                    Ok(config) => config,
                    Err(e) => {
                        eprintln!("[tierstore_sim] ERROR: {}", e);
                        process::exit(1);
                    }
                },
                None => StoreConfig::default(),
            };
            if let Some(level) = log_level {
                config.node.log_level = level;
            }
            logging::init_for_node(&config.node);

            if min_block_size > max_block_size {
                eprintln!("[tierstore_sim] ERROR: --min-block-size exceeds --max-block-size");
                process::exit(1);
            }

            let workload = Workload {
                ops,
                key_space: key_space.max(1),
                min_block_size,
                max_block_size,
                remove_percent: remove_percent.min(100),
                promote,
                seed,
            };

            if let Err(e) = run(config, threads.max(1), workload) {
                tracing::error!("Workload failed: {}", e);
                process::exit(1);
            }
        }
    }
}
