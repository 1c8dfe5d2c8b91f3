//! Per-TF aggregation of match streams into result rows.

use std::fs::File;
use std::io::BufRead;
use std::io::BufReader;
use std::io::BufWriter;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use log::debug;

use crate::err::Error;
use crate::null::log2_fold_change;
use crate::null::NullModel;
use crate::record::MatchRecord;
use crate::writer::beds_dir;
use crate::writer::stream_path;

/// Get every pair of conditions, in input order.
pub fn comparisons(conditions: usize) -> Vec<(usize, usize)> {
    let mut pairs = Vec::new();
    for i in 0..conditions {
        for j in i + 1..conditions {
            pairs.push((i, j));
        }
    }
    pairs
}

// --- Models ------------------------------------------------------------------

/// The statistical models shared by every per-TF aggregation.
#[derive(Debug, Clone)]
pub struct Models {
    /// Bound/unbound threshold of every condition.
    pub thresholds: Vec<f64>,
    /// Pseudocount used for fold-changes.
    pub pseudocount: f64,
    /// Null model of every pair of conditions, with the pair indices.
    pub nulls: Vec<((usize, usize), NullModel)>,
}

// --- TfResult ----------------------------------------------------------------

/// The summary of one TF.
#[derive(Debug, Clone, PartialEq)]
pub struct TfResult {
    pub name: String,
    pub total: u64,
    /// Number of bound sites in every condition.
    pub bound: Vec<u64>,
    /// Mean GC content of all sites.
    pub gc: f64,
    /// Mean log2 fold-change for every pair of conditions.
    pub changes: Vec<f64>,
    /// Differential binding p-value for every pair of conditions.
    pub pvalues: Vec<f64>,
}

// --- TfAggregator ------------------------------------------------------------

/// Turns the match stream of a TF into BED files and a result row.
pub struct TfAggregator<'a> {
    outdir: &'a Path,
    conditions: &'a [String],
    models: &'a Models,
    peak_header: Option<&'a [String]>,
}

impl<'a> TfAggregator<'a> {
    /// Create a new aggregator.
    pub fn new(outdir: &'a Path, conditions: &'a [String], models: &'a Models) -> Self {
        Self {
            outdir,
            conditions,
            models,
            peak_header: None,
        }
    }

    /// Set the names of the peak columns.
    pub fn peak_header(&mut self, header: Option<&'a [String]>) -> &mut Self {
        self.peak_header = header;
        self
    }

    fn read_stream(&self, path: &Path) -> Result<Vec<MatchRecord>, Error> {
        let reader = File::open(path)
            .map(BufReader::new)
            .map_err(|e| Error::file(path, e))?;
        let mut records = Vec::new();
        for (i, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| Error::file(path, e))?;
            if line.is_empty() {
                continue;
            }
            let record = MatchRecord::parse_tsv(&line, self.conditions.len()).ok_or_else(|| {
                Error::InvalidRecord {
                    path: path.to_path_buf(),
                    line: i + 1,
                }
            })?;
            records.push(record);
        }
        records.sort_by(|x, y| {
            x.chrom
                .cmp(&y.chrom)
                .then(x.start.cmp(&y.start))
                .then(x.end.cmp(&y.end))
                .then(x.strand.cmp(&y.strand))
        });
        Ok(records)
    }

    fn header(&self, records: &[MatchRecord]) -> Vec<String> {
        let mut header = ["TFBS_chr", "TFBS_start", "TFBS_end", "TFBS_name", "TFBS_score", "TFBS_strand"]
            .map(String::from)
            .to_vec();
        match self.peak_header {
            Some(columns) => header.extend(columns.iter().cloned()),
            None => {
                header.extend(["peak_chr", "peak_start", "peak_end"].map(String::from));
                let extra = records.first().map(|r| r.peak.extra.len()).unwrap_or(0);
                header.extend((1..=extra).map(|i| format!("_additional_{}", i)));
            }
        }
        header.push("GC".into());
        for condition in self.conditions {
            header.push(format!("{}_score", condition));
        }
        for &(i, j) in self.pairs().iter() {
            header.push(format!("{}_{}_log2fc", self.conditions[i], self.conditions[j]));
        }
        header
    }

    fn pairs(&self) -> Vec<(usize, usize)> {
        self.models.nulls.iter().map(|(pair, _)| *pair).collect()
    }

    fn line(&self, record: &MatchRecord) -> String {
        let mut line = format!(
            "{}\t{}\t{}\t{}\t{:.5}\t{}\t{}\t{:.5}",
            record.chrom,
            record.start,
            record.end,
            record.tf,
            record.score,
            record.strand.as_char(),
            record.peak.to_bed(),
            record.gc,
        );
        for signal in record.signals.iter() {
            line.push_str(&format!("\t{:.5}", signal));
        }
        for (i, j) in self.pairs() {
            let fc = log2_fold_change(
                record.signals[i] as f64,
                record.signals[j] as f64,
                self.models.pseudocount,
            );
            line.push_str(&format!("\t{:.5}", fc));
        }
        line
    }

    fn is_bound(&self, record: &MatchRecord, condition: usize) -> bool {
        record.signals[condition] as f64 >= self.models.thresholds[condition]
    }

    /// Aggregate the match stream of a TF.
    ///
    /// Writes the BED files and the overview table of the TF, removes its
    /// match stream, and returns its result row.
    pub fn aggregate(&self, tf: &str) -> Result<TfResult, Error> {
        let stream = stream_path(self.outdir, tf);
        let records = self.read_stream(&stream)?;
        debug!("Aggregating {} sites of {}", records.len(), tf);

        let n = self.conditions.len();
        let beds = beds_dir(self.outdir, tf);
        let mut all = BedWriter::create(beds.join(format!("{}_all.bed", tf)))?;
        let mut overview = BedWriter::create(
            self.outdir
                .join(tf)
                .join(format!("{}_overview.txt", tf)),
        )?;
        let mut split = Vec::with_capacity(n);
        for condition in self.conditions {
            let bound = BedWriter::create(beds.join(format!("{}_{}_bound.bed", tf, condition)))?;
            let unbound = BedWriter::create(beds.join(format!("{}_{}_unbound.bed", tf, condition)))?;
            split.push((bound, unbound));
        }

        let mut header = self.header(&records);
        header.extend(self.conditions.iter().map(|c| format!("{}_bound", c)));
        overview.write_line(&header.join("\t"))?;

        let mut bound = vec![0u64; n];
        for record in records.iter() {
            let line = self.line(record);
            all.write_line(&line)?;
            let mut flags = String::new();
            for (c, (b, u)) in split.iter_mut().enumerate() {
                if self.is_bound(record, c) {
                    bound[c] += 1;
                    b.write_line(&line)?;
                    flags.push_str("\t1");
                } else {
                    u.write_line(&line)?;
                    flags.push_str("\t0");
                }
            }
            overview.write_line(&format!("{}{}", line, flags))?;
        }

        all.finish()?;
        overview.finish()?;
        for (b, u) in split {
            b.finish()?;
            u.finish()?;
        }

        let gc = if records.is_empty() {
            f64::NAN
        } else {
            records.iter().map(|r| r.gc as f64).sum::<f64>() / records.len() as f64
        };
        let mut changes = Vec::with_capacity(self.models.nulls.len());
        let mut pvalues = Vec::with_capacity(self.models.nulls.len());
        for ((i, j), null) in self.models.nulls.iter() {
            let fcs = records
                .iter()
                .filter(|r| self.is_bound(r, *i) || self.is_bound(r, *j))
                .map(|r| {
                    log2_fold_change(
                        r.signals[*i] as f64,
                        r.signals[*j] as f64,
                        self.models.pseudocount,
                    )
                })
                .collect::<Vec<_>>();
            if fcs.is_empty() {
                changes.push(f64::NAN);
                pvalues.push(f64::NAN);
            } else {
                let change = fcs.iter().sum::<f64>() / fcs.len() as f64;
                changes.push(change);
                pvalues.push(null.pvalue(change, gc, fcs.len()));
            }
        }

        std::fs::remove_file(&stream).map_err(|e| Error::file(&stream, e))?;

        Ok(TfResult {
            name: tf.to_string(),
            total: records.len() as u64,
            bound,
            gc,
            changes,
            pvalues,
        })
    }
}

// --- BedWriter ---------------------------------------------------------------

/// A buffered text file remembering its path for error reporting.
struct BedWriter {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl BedWriter {
    fn create(path: PathBuf) -> Result<Self, Error> {
        let file = File::create(&path).map_err(|e| Error::file(&path, e))?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    fn write_line(&mut self, line: &str) -> Result<(), Error> {
        writeln!(self.writer, "{}", line).map_err(|e| Error::file(&self.path, e))
    }

    fn finish(mut self) -> Result<(), Error> {
        self.writer.flush().map_err(|e| Error::file(&self.path, e))
    }
}
