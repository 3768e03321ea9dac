//! CPU detection for worker sizing

/// Get the number of available CPU cores
pub fn num_cores() -> usize {
    core_affinity::get_core_ids()
        .map(|ids| ids.len())
        .filter(|&n| n > 0)
        .or_else(|| std::thread::available_parallelism().ok().map(|n| n.get()))
        .unwrap_or(1)
}

/// Worker count for the decision pool: one per core, capped
///
/// One core is left for the tick thread when more than two are present.
pub fn recommended_workers(max_workers: usize) -> usize {
    let cores = num_cores();
    let usable = if cores > 2 { cores - 1 } else { cores };
    usable.clamp(1, max_workers.max(1))
}
