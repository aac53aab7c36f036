//! Probe worker pool.
//!
//! Metadata probes are filesystem-bound, so the driver fans a batch of
//! candidate paths out to a small pool of threads and collects the results
//! over a bounded channel. Results come back tagged with their submission
//! index, so the driver's candidate ordering (and therefore the selection
//! and the decision log) stays deterministic regardless of completion
//! order.
//!
//! Cancellation is cooperative: workers check the flag between probes and
//! the pool drains whatever is in flight without blocking on unfinished
//! work.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_channel::bounded;

use crate::cache::ProbeCache;
use crate::error::Result;
use crate::metadata::ProbeResult;

/// Probe every path in `paths`, in parallel, returning results aligned to
/// the input order. Entries are `None` when cancellation struck first.
pub fn probe_all(
    cache: &ProbeCache,
    paths: &[PathBuf],
    cancel: &AtomicBool,
) -> Vec<Option<Result<ProbeResult>>> {
    if paths.is_empty() {
        return Vec::new();
    }
    // A single path is not worth a thread hop.
    if paths.len() == 1 {
        if cancel.load(Ordering::Relaxed) {
            return vec![None];
        }
        return vec![Some(cache.lookup(&paths[0]))];
    }

    let workers = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(paths.len());

    let (job_tx, job_rx) = bounded::<(usize, PathBuf)>(paths.len());
    let (result_tx, result_rx) = bounded::<(usize, Result<ProbeResult>)>(paths.len());

    let mut results: Vec<Option<Result<ProbeResult>>> = Vec::new();
    results.resize_with(paths.len(), || None);

    std::thread::scope(|scope| {
        for _ in 0..workers {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            scope.spawn(move || {
                while let Ok((index, path)) = job_rx.recv() {
                    if cancel.load(Ordering::Relaxed) {
                        break;
                    }
                    if result_tx.send((index, cache.lookup(&path))).is_err() {
                        break;
                    }
                }
            });
        }
        drop(result_tx);

        for (index, path) in paths.iter().enumerate() {
            // Bounded at paths.len(), so sends never block.
            let _ = job_tx.send((index, path.clone()));
        }
        drop(job_tx);

        for (index, result) in result_rx {
            results[index] = Some(result);
        }
    });

    results
}
