//! Access to the genome sequence.

use std::collections::HashMap;

use crate::err::Error;
use crate::region::RegionList;

// --- SequenceProvider --------------------------------------------------------

/// A source of nucleotide sequences.
pub trait SequenceProvider: Send + Sync {
    /// Get the length of a chromosome, if it is part of the genome.
    fn chrom_length(&self, chrom: &str) -> Option<u64>;

    /// Get the sequence of `chrom` between `start` and `end`.
    ///
    /// Coordinates outside of the chromosome, or chromosomes missing from
    /// the genome, are rejected.
    fn fetch(&self, chrom: &str, start: u64, end: u64) -> Result<&[u8], Error>;

    /// Check that every region lies on a chromosome of the genome.
    fn check_regions(&self, regions: &RegionList) -> Result<(), Error> {
        for chrom in regions.chroms() {
            if self.chrom_length(chrom).is_none() {
                return Err(Error::UnknownChromosome(chrom.to_string()));
            }
        }
        Ok(())
    }
}

// --- Genome ------------------------------------------------------------------

/// An in-memory genome with upper-cased sequences.
#[derive(Debug, Clone, Default)]
pub struct Genome {
    sequences: HashMap<String, Vec<u8>>,
}

impl Genome {
    /// Create an empty genome.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a chromosome to the genome.
    pub fn insert<N: Into<String>, S: AsRef<[u8]>>(&mut self, name: N, sequence: S) {
        let sequence = sequence.as_ref().to_ascii_uppercase();
        self.sequences.insert(name.into(), sequence);
    }

    /// Get the number of chromosomes.
    pub fn len(&self) -> usize {
        self.sequences.len()
    }

    /// Check whether the genome has no chromosome.
    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }
}

impl SequenceProvider for Genome {
    fn chrom_length(&self, chrom: &str) -> Option<u64> {
        self.sequences.get(chrom).map(|s| s.len() as u64)
    }

    fn fetch(&self, chrom: &str, start: u64, end: u64) -> Result<&[u8], Error> {
        let sequence = self
            .sequences
            .get(chrom)
            .ok_or_else(|| Error::UnknownChromosome(chrom.to_string()))?;
        let length = sequence.len() as u64;
        if start > end || end > length {
            return Err(Error::OutOfBounds {
                chrom: chrom.to_string(),
                start,
                end,
                length,
            });
        }
        Ok(&sequence[start as usize..end as usize])
    }
}

// --- GcProfile ---------------------------------------------------------------

/// Cumulative G/C counts over a sequence, for constant-time window queries.
#[derive(Debug, Clone)]
pub struct GcProfile {
    cumulative: Vec<u32>,
}

impl GcProfile {
    /// Build the profile of the given sequence.
    pub fn new(sequence: &[u8]) -> Self {
        let mut cumulative = Vec::with_capacity(sequence.len() + 1);
        let mut total = 0;
        cumulative.push(total);
        for &base in sequence {
            if matches!(base, b'G' | b'C' | b'g' | b'c') {
                total += 1;
            }
            cumulative.push(total);
        }
        Self { cumulative }
    }

    /// Get the length of the profiled sequence.
    pub fn len(&self) -> usize {
        self.cumulative.len() - 1
    }

    /// Check whether the profiled sequence is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get the number of G/C bases in `start..end`.
    pub fn count(&self, start: usize, end: usize) -> u32 {
        self.cumulative[end] - self.cumulative[start]
    }

    /// Get the GC fraction of a window of width `window` centered on `center`.
    ///
    /// The window is clipped to the sequence bounds.
    pub fn fraction(&self, center: usize, window: usize) -> f32 {
        let half = window / 2;
        let start = center.saturating_sub(half);
        let end = (center + window - half).min(self.len());
        if end <= start {
            return 0.0;
        }
        self.count(start, end) as f32 / (end - start) as f32
    }

    /// Get the GC fraction of the whole sequence.
    pub fn total(&self) -> f32 {
        if self.is_empty() {
            0.0
        } else {
            self.count(0, self.len()) as f32 / self.len() as f32
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::Region;

    #[test]
    fn fetch() {
        let mut genome = Genome::new();
        genome.insert("chr1", "acgtACGT");
        assert_eq!(genome.fetch("chr1", 2, 6).unwrap(), b"GTAC");
        assert!(matches!(
            genome.fetch("chr1", 4, 9),
            Err(Error::OutOfBounds { length: 8, .. })
        ));
        assert!(matches!(
            genome.fetch("chr2", 0, 1),
            Err(Error::UnknownChromosome(_))
        ));
    }

    #[test]
    fn check_regions() {
        let mut genome = Genome::new();
        genome.insert("chr1", "ACGT");
        let regions = RegionList::new(vec![Region::new("chr1", 0, 2)]);
        assert!(genome.check_regions(&regions).is_ok());
        let regions = RegionList::new(vec![Region::new("chrX", 0, 2)]);
        assert!(genome.check_regions(&regions).is_err());
    }

    #[test]
    fn gc_profile() {
        let profile = GcProfile::new(b"AAGGCCTT");
        assert_eq!(profile.len(), 8);
        assert_eq!(profile.count(0, 8), 4);
        assert_eq!(profile.total(), 0.5);
        assert_eq!(profile.fraction(4, 4), 1.0);
        assert_eq!(profile.fraction(3, 2), 1.0);
        assert_eq!(profile.fraction(0, 4), 0.0);
        assert_eq!(profile.fraction(7, 4), 1.0 / 3.0);
    }
}
