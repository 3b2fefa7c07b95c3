//! Shared environment configuration for the solver binaries.
//!
//! Consolidates `BOBAIL_NUM_THREADS` (fallback `RAYON_NUM_THREADS`) reads so
//! every binary sizes its pools the same way.

/// Read the configured worker count (default 8).
pub fn num_threads() -> usize {
    std::env::var("BOBAIL_NUM_THREADS")
        .or_else(|_| std::env::var("RAYON_NUM_THREADS"))
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8)
}

/// Build the rayon global thread pool. Tolerates an already-initialized
/// pool. Returns the thread count.
pub fn init_rayon_threads(num_threads: usize) -> usize {
    rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build_global()
        .ok();
    println!("Worker threads: {}", num_threads);
    num_threads
}
