//! Batch partitioning.

/// Split `batch` into contiguous partitions for at most `worker_limit` workers.
///
/// Produces `min(n, worker_limit)` partitions whose sizes differ by at most
/// one; the leading partitions take the remainder. Five items over two
/// workers yield sizes `[3, 2]`. Order is preserved and the split is
/// deterministic. An empty batch yields no partitions.
pub fn partition<T>(batch: Vec<T>, worker_limit: usize) -> Vec<Vec<T>> {
    let n = batch.len();
    if n == 0 {
        return Vec::new();
    }

    let count = n.min(worker_limit.max(1));
    let base = n / count;
    let extra = n % count;

    let mut partitions = Vec::with_capacity(count);
    let mut items = batch.into_iter();
    for i in 0..count {
        let size = base + usize::from(i < extra);
        partitions.push(items.by_ref().take(size).collect());
    }

    partitions
}
