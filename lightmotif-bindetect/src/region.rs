//! Genomic regions of open chromatin.

use std::collections::BTreeSet;
use std::io::BufRead;
use std::sync::Arc;

use crate::err::Error;

// --- Region ------------------------------------------------------------------

/// A genomic interval with the extra columns of its source line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    pub chrom: Arc<str>,
    pub start: u64,
    pub end: u64,
    pub extra: Vec<String>,
}

impl Region {
    /// Create a new region without extra columns.
    pub fn new<C: Into<Arc<str>>>(chrom: C, start: u64, end: u64) -> Self {
        Self {
            chrom: chrom.into(),
            start,
            end,
            extra: Vec::new(),
        }
    }

    /// Get the length of the region.
    #[inline]
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    /// Check whether the region is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// Get the number of columns of the region in BED format.
    #[inline]
    pub fn columns(&self) -> usize {
        3 + self.extra.len()
    }

    /// Format the region as tab-separated BED columns.
    pub fn to_bed(&self) -> String {
        let mut line = format!("{}\t{}\t{}", self.chrom, self.start, self.end);
        for column in self.extra.iter() {
            line.push('\t');
            line.push_str(column);
        }
        line
    }
}

// --- RegionList --------------------------------------------------------------

/// An ordered list of regions sharing the same number of columns.
#[derive(Debug, Clone, Default)]
pub struct RegionList {
    regions: Vec<Region>,
}

impl RegionList {
    /// Create a new region list.
    pub fn new(regions: Vec<Region>) -> Self {
        Self { regions }
    }

    /// Read regions from a BED file.
    ///
    /// Comment, `track` and `browser` lines are skipped. Every other line
    /// must have at least three columns, and all lines the same number.
    pub fn from_bed<B: BufRead>(reader: B) -> Result<Self, Error> {
        let mut regions = Vec::new();
        let mut columns = None;
        for (i, line) in reader.lines().enumerate() {
            let line = line?;
            let trimmed = line.trim_end_matches(['\r', '\n']);
            if trimmed.trim().is_empty()
                || trimmed.starts_with('#')
                || trimmed.starts_with("track")
                || trimmed.starts_with("browser")
            {
                continue;
            }
            let fields = trimmed.split('\t').collect::<Vec<_>>();
            let invalid = |reason: String| Error::InvalidRegion {
                path: None,
                line: i + 1,
                reason,
            };
            if fields.len() < 3 {
                return Err(invalid(format!("expected 3 columns, found {}", fields.len())));
            }
            match columns {
                None => columns = Some(fields.len()),
                Some(n) if n != fields.len() => {
                    return Err(invalid(format!(
                        "expected {} columns, found {}",
                        n,
                        fields.len()
                    )))
                }
                Some(_) => (),
            }
            let start = fields[1]
                .parse::<u64>()
                .map_err(|_| invalid(format!("invalid start {:?}", fields[1])))?;
            let end = fields[2]
                .parse::<u64>()
                .map_err(|_| invalid(format!("invalid end {:?}", fields[2])))?;
            if end <= start {
                return Err(invalid(format!("end {} is not after start {}", end, start)));
            }
            regions.push(Region {
                chrom: Arc::from(fields[0]),
                start,
                end,
                extra: fields[3..].iter().map(|s| s.to_string()).collect(),
            });
        }
        Ok(Self { regions })
    }

    /// Sort the regions and merge the overlapping or book-ended ones.
    ///
    /// Merged regions keep the extra columns of their first member.
    pub fn merge(mut self) -> Self {
        self.regions.sort_by(|x, y| {
            x.chrom
                .cmp(&y.chrom)
                .then(x.start.cmp(&y.start))
                .then(x.end.cmp(&y.end))
        });
        let mut merged: Vec<Region> = Vec::with_capacity(self.regions.len());
        for region in self.regions {
            match merged.last_mut() {
                Some(last) if last.chrom == region.chrom && region.start <= last.end => {
                    last.end = last.end.max(region.end);
                }
                _ => merged.push(region),
            }
        }
        Self { regions: merged }
    }

    /// Check a peak header against the number of columns of the regions.
    pub fn check_header(&self, header: &[String]) -> Result<(), Error> {
        match self.columns() {
            Some(columns) if columns != header.len() => Err(Error::HeaderMismatch {
                header: header.len(),
                columns,
            }),
            _ => Ok(()),
        }
    }

    /// Get the number of columns of the regions, if any.
    pub fn columns(&self) -> Option<usize> {
        self.regions.first().map(Region::columns)
    }

    /// Get the set of chromosomes the regions are located on.
    pub fn chroms(&self) -> BTreeSet<&str> {
        self.regions.iter().map(|r| &*r.chrom).collect()
    }

    /// Get the number of regions.
    #[inline]
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    /// Check whether the list contains no region.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Iterate over the regions.
    pub fn iter(&self) -> std::slice::Iter<'_, Region> {
        self.regions.iter()
    }
}

impl AsRef<[Region]> for RegionList {
    fn as_ref(&self) -> &[Region] {
        self.regions.as_slice()
    }
}

impl From<Vec<Region>> for RegionList {
    fn from(regions: Vec<Region>) -> Self {
        Self::new(regions)
    }
}
