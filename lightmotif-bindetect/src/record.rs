//! Match records exchanged between scanning, writing and aggregation.

use std::io::Write;
use std::sync::Arc;

use crate::motif::Strand;
use crate::region::Region;

/// A motif match retained during scanning, with its signal in every condition.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchRecord {
    pub chrom: Arc<str>,
    pub start: u64,
    pub end: u64,
    pub tf: Arc<str>,
    pub score: f32,
    pub strand: Strand,
    /// Local GC content around the site.
    pub gc: f32,
    /// Mean signal over the site, one value per condition.
    pub signals: Vec<f32>,
    /// The peak the site was found in.
    pub peak: Region,
}

impl MatchRecord {
    /// Write the record as a single tab-separated line.
    ///
    /// Columns are `chrom start end tf score strand gc`, followed by one
    /// signal column per condition and by the columns of the peak. Values
    /// are written in their shortest form that parses back to the same
    /// `f32`.
    pub fn write_tsv<W: Write>(&self, mut writer: W) -> std::io::Result<()> {
        write!(
            writer,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}",
            self.chrom,
            self.start,
            self.end,
            self.tf,
            self.score,
            self.strand.as_char(),
            self.gc
        )?;
        for signal in self.signals.iter() {
            write!(writer, "\t{}", signal)?;
        }
        writeln!(writer, "\t{}", self.peak.to_bed())
    }

    /// Parse a line written by [`MatchRecord::write_tsv`].
    ///
    /// Returns `None` when the line does not have the expected layout for
    /// the given number of conditions.
    pub fn parse_tsv(line: &str, conditions: usize) -> Option<Self> {
        let fields = line.trim_end_matches(['\r', '\n']).split('\t').collect::<Vec<_>>();
        if fields.len() < 10 + conditions {
            return None;
        }
        let signals = fields[7..7 + conditions]
            .iter()
            .map(|s| s.parse::<f32>().ok())
            .collect::<Option<Vec<_>>>()?;
        let peak_fields = &fields[7 + conditions..];
        let peak = Region {
            chrom: Arc::from(peak_fields[0]),
            start: peak_fields[1].parse().ok()?,
            end: peak_fields[2].parse().ok()?,
            extra: peak_fields[3..].iter().map(|s| s.to_string()).collect(),
        };
        Some(Self {
            chrom: Arc::from(fields[0]),
            start: fields[1].parse().ok()?,
            end: fields[2].parse().ok()?,
            tf: Arc::from(fields[3]),
            score: fields[4].parse().ok()?,
            strand: fields[5].parse().ok()?,
            gc: fields[6].parse().ok()?,
            signals,
            peak,
        })
    }
}
