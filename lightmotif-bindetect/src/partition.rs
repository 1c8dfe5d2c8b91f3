//! Stable partitioning of regions into work units.

use crate::region::Region;

/// Split `regions` into `k` contiguous chunks of nearly equal size.
///
/// Chunk sizes differ by at most one, the first chunks being the larger
/// ones, and concatenating the chunks gives back the original slice. When
/// `k` exceeds the number of regions the trailing chunks are empty.
pub fn partition(regions: &[Region], k: usize) -> Vec<&[Region]> {
    let k = k.max(1);
    let n = regions.len();
    let (size, rest) = (n / k, n % k);
    let mut chunks = Vec::with_capacity(k);
    let mut start = 0;
    for i in 0..k {
        let end = start + size + usize::from(i < rest);
        chunks.push(&regions[start..end]);
        start = end;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn regions(n: usize) -> Vec<Region> {
        (0..n)
            .map(|i| Region::new("chr1", i as u64 * 100, i as u64 * 100 + 50))
            .collect()
    }

    #[test]
    fn sizes_and_order() {
        for n in [0, 1, 7, 100, 101] {
            let regions = regions(n);
            for k in 1..=12 {
                let chunks = partition(&regions, k);
                assert_eq!(chunks.len(), k);
                let min = chunks.iter().map(|c| c.len()).min().unwrap();
                let max = chunks.iter().map(|c| c.len()).max().unwrap();
                assert!(max - min <= 1, "n={} k={}", n, k);
                let joined = chunks.concat();
                assert_eq!(joined, regions);
            }
        }
    }

    #[test]
    fn more_chunks_than_regions() {
        let regions = regions(3);
        let chunks = partition(&regions, 5);
        assert_eq!(chunks.iter().filter(|c| c.is_empty()).count(), 2);
        assert!(chunks[3].is_empty());
        assert!(chunks[4].is_empty());
    }
}
