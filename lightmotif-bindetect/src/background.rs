//! Per-chunk fragments reduced across scanning workers.
//!
//! Both fragment types are merged with an associative and commutative
//! operation, so that the final aggregate does not depend on the order in
//! which chunks complete.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::record::MatchRecord;

// --- BackgroundSample --------------------------------------------------------

/// A single background position.
#[derive(Debug, Clone, PartialEq)]
pub struct BackgroundPoint {
    pub chrom: Arc<str>,
    pub pos: u64,
    pub gc: f32,
    pub signals: Vec<f32>,
}

/// Signal and GC content sampled at a fixed stride across the regions.
///
/// Points are kept sorted by genomic position, which makes the merged
/// sample independent of the order fragments are combined in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackgroundSample {
    points: Vec<BackgroundPoint>,
}

impl BackgroundSample {
    /// Create an empty sample.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a background position.
    pub fn push(&mut self, chrom: &Arc<str>, pos: u64, gc: f32, signals: Vec<f32>) {
        let point = BackgroundPoint {
            chrom: chrom.clone(),
            pos,
            gc,
            signals,
        };
        let i = self
            .points
            .partition_point(|p| Self::key(p) <= Self::key(&point));
        self.points.insert(i, point);
    }

    /// Merge two fragments.
    pub fn merge(mut self, other: Self) -> Self {
        self.points.extend(other.points);
        self.sort();
        self
    }

    /// Merge any number of fragments.
    pub fn reduce<I: IntoIterator<Item = Self>>(fragments: I) -> Self {
        let mut points = Vec::new();
        for fragment in fragments {
            points.extend(fragment.points);
        }
        let mut sample = Self { points };
        sample.sort();
        sample
    }

    fn key(point: &BackgroundPoint) -> (&str, u64) {
        (&point.chrom, point.pos)
    }

    fn sort(&mut self) {
        self.points.sort_by(|x, y| Self::key(x).cmp(&Self::key(y)));
    }

    /// Get the number of sampled positions.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Check whether no position was sampled.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Get the sampled positions.
    pub fn points(&self) -> &[BackgroundPoint] {
        &self.points
    }

    /// Get the signal values of one condition.
    pub fn signal(&self, condition: usize) -> Vec<f64> {
        self.points
            .iter()
            .map(|p| p.signals.get(condition).copied().unwrap_or(0.0) as f64)
            .collect()
    }

    /// Get the GC content of every sampled position.
    pub fn gc(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.gc as f64).collect()
    }
}

// --- OverlapCounts -----------------------------------------------------------

/// Site counts per TF and overlap counts per pair of TFs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverlapCounts {
    sites: BTreeMap<Arc<str>, u64>,
    pairs: BTreeMap<(Arc<str>, Arc<str>), u64>,
}

impl OverlapCounts {
    /// Create empty counts.
    pub fn new() -> Self {
        Self::default()
    }

    /// Count the sites of one region and their pairwise overlaps.
    ///
    /// Only overlaps between sites of different TFs are counted.
    pub fn add_region(&mut self, records: &[MatchRecord]) {
        let mut sites = records.iter().collect::<Vec<_>>();
        sites.sort_by_key(|r| (r.start, r.end));
        for (i, x) in sites.iter().enumerate() {
            *self.sites.entry(x.tf.clone()).or_default() += 1;
            for y in sites[i + 1..].iter().take_while(|y| y.start < x.end) {
                if x.tf != y.tf {
                    *self.pairs.entry(Self::pair(&x.tf, &y.tf)).or_default() += 1;
                }
            }
        }
    }

    fn pair(a: &Arc<str>, b: &Arc<str>) -> (Arc<str>, Arc<str>) {
        if a <= b {
            (a.clone(), b.clone())
        } else {
            (b.clone(), a.clone())
        }
    }

    /// Merge two fragments by adding their counts.
    pub fn merge(mut self, other: Self) -> Self {
        for (tf, n) in other.sites {
            *self.sites.entry(tf).or_default() += n;
        }
        for (pair, n) in other.pairs {
            *self.pairs.entry(pair).or_default() += n;
        }
        self
    }

    /// Get the number of sites of a TF.
    pub fn sites(&self, tf: &str) -> u64 {
        self.sites.get(tf).copied().unwrap_or(0)
    }

    /// Get the number of overlapping sites between two TFs.
    pub fn overlap(&self, a: &str, b: &str) -> u64 {
        let (a, b) = if a <= b { (a, b) } else { (b, a) };
        self.pairs
            .get(&(Arc::from(a), Arc::from(b)))
            .copied()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motif::Strand;
    use crate::region::Region;

    fn site(tf: &str, start: u64, end: u64) -> MatchRecord {
        MatchRecord {
            chrom: Arc::from("chr1"),
            start,
            end,
            tf: Arc::from(tf),
            score: 1.0,
            strand: Strand::Forward,
            gc: 0.5,
            signals: vec![0.0],
            peak: Region::new("chr1", 0, 1000),
        }
    }

    #[test]
    fn overlaps() {
        let mut counts = OverlapCounts::new();
        counts.add_region(&[
            site("A", 10, 20),
            site("B", 15, 25),
            site("A", 18, 28),
            site("C", 40, 50),
            site("B", 20, 30),
        ]);
        assert_eq!(counts.sites("A"), 2);
        assert_eq!(counts.sites("B"), 2);
        assert_eq!(counts.sites("D"), 0);
        assert_eq!(counts.overlap("A", "B"), 3);
        assert_eq!(counts.overlap("B", "A"), 3);
        assert_eq!(counts.overlap("A", "C"), 0);
    }

    #[test]
    fn background_push_sorted() {
        let chr1 = Arc::from("chr1");
        let chr2 = Arc::from("chr2");
        let mut sample = BackgroundSample::new();
        sample.push(&chr2, 10, 0.5, vec![1.0]);
        sample.push(&chr1, 50, 0.4, vec![2.0]);
        sample.push(&chr1, 0, 0.3, vec![3.0]);
        assert_eq!(sample.signal(0), vec![3.0, 2.0, 1.0]);
        assert_eq!(sample.len(), 3);
    }
}
