#[cfg(not(target_arch = "wasm32"))]
use rayon::prelude::*;

/// Row count below which sampling stays on the calling thread.
#[cfg(not(target_arch = "wasm32"))]
const PARALLEL_THRESHOLD: usize = 8;

/// Maps `0..len` in index order, in parallel for long ranges. Stops at the
/// first error.
pub fn try_map_index<T, E, F>(len: usize, f: F) -> Result<Vec<T>, E>
where
    T: Send,
    E: Send,
    F: Fn(usize) -> Result<T, E> + Sync + Send,
{
    #[cfg(not(target_arch = "wasm32"))]
    {
        if len >= PARALLEL_THRESHOLD {
            return (0..len).into_par_iter().map(&f).collect();
        }
    }

    (0..len).map(f).collect()
}
