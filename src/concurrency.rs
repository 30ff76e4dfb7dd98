use anyhow::{Context, Result};
use rayon::ThreadPoolBuilder;
use rayon::prelude::*;

/// Runs `f` over `items` on at most `max_workers` threads, keeping input order.
///
/// Each item gets its own `Result`; callers decide whether a single failure
/// aborts the whole batch.
pub fn run_concurrently<T, R, F>(max_workers: usize, items: Vec<T>, f: F) -> Result<Vec<Result<R>>>
where
    T: Send,
    R: Send,
    F: Fn(T) -> Result<R> + Sync + Send,
{
    if items.is_empty() {
        return Ok(Vec::new());
    }
    let workers = max_workers.clamp(1, items.len());
    if workers == 1 {
        return Ok(items.into_iter().map(f).collect());
    }

    let pool = ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("copernicusmarine-worker-{i}"))
        .build()
        .context("failed to build worker pool")?;

    Ok(pool.install(|| items.into_par_iter().map(f).collect()))
}

/// Like [`run_concurrently`] but fails on the first error, in input order.
pub fn try_run_concurrently<T, R, F>(max_workers: usize, items: Vec<T>, f: F) -> Result<Vec<R>>
where
    T: Send,
    R: Send,
    F: Fn(T) -> Result<R> + Sync + Send,
{
    run_concurrently(max_workers, items, f)?.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn preserves_order() {
        let out = try_run_concurrently(4, (0..50).collect(), |i: u32| Ok(i * 2)).unwrap();
        assert_eq!(out, (0..50).map(|i| i * 2).collect::<Vec<_>>());
    }

    #[test]
    fn errors_are_kept_per_item() {
        let out = run_concurrently(3, vec![1, 2, 3], |i: u32| {
            if i == 2 {
                bail!("boom");
            }
            Ok(i)
        })
        .unwrap();
        assert!(out[0].is_ok());
        assert!(out[1].is_err());
        assert!(out[2].is_ok());
        assert!(try_run_concurrently(3, vec![1, 2, 3], |i: u32| {
            if i == 2 {
                bail!("boom");
            }
            Ok(i)
        })
        .is_err());
    }

    #[test]
    fn every_item_runs_once() {
        let counter = AtomicUsize::new(0);
        let _ = try_run_concurrently(8, vec![(); 20], |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 20);
        assert!(run_concurrently(8, Vec::<u8>::new(), Ok).unwrap().is_empty());
    }
}
