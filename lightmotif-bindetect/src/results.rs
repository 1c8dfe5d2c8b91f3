//! Final result tables.

use std::io::Write;

use crate::aggregate::TfResult;
use crate::background::OverlapCounts;
use crate::threshold::round5;

fn format_float(x: f64) -> String {
    if x.is_finite() {
        format!("{}", round5(x))
    } else {
        "NA".to_string()
    }
}

/// Format a p-value in scientific notation with a signed, two-digit
/// exponent, e.g. `1.23000E-04`.
fn format_pvalue(x: f64) -> String {
    if !x.is_finite() {
        return "NA".to_string();
    }
    let text = format!("{:.5E}", x);
    match text.split_once('E').map(|(m, e)| (m, e.parse::<i32>())) {
        Some((mantissa, Ok(exponent))) => {
            let sign = if exponent < 0 { '-' } else { '+' };
            format!("{}E{}{:02}", mantissa, sign, exponent.abs())
        }
        _ => text,
    }
}

// --- ResultTable -------------------------------------------------------------

/// One row per TF with site counts, bound counts and differential binding.
#[derive(Debug, Clone)]
pub struct ResultTable {
    conditions: Vec<String>,
    thresholds: Vec<f64>,
    pairs: Vec<(usize, usize)>,
    rows: Vec<TfResult>,
}

impl ResultTable {
    /// Assemble the table, sorting rows by TF name.
    pub fn new(
        conditions: Vec<String>,
        thresholds: Vec<f64>,
        pairs: Vec<(usize, usize)>,
        mut rows: Vec<TfResult>,
    ) -> Self {
        rows.sort_by(|x, y| x.name.cmp(&y.name));
        Self {
            conditions,
            thresholds,
            pairs,
            rows,
        }
    }

    /// Get the column names of the table.
    pub fn header(&self) -> Vec<String> {
        let mut header = vec!["TF_name".to_string(), "total_tfbs".to_string()];
        for condition in self.conditions.iter() {
            header.push(format!("{}_threshold", condition));
            header.push(format!("{}_bound", condition));
        }
        for &(i, j) in self.pairs.iter() {
            let base = format!("{}_{}", self.conditions[i], self.conditions[j]);
            header.push(format!("{}_change", base));
            header.push(format!("{}_pvalue", base));
        }
        header
    }

    /// Get the rows of the table.
    pub fn rows(&self) -> &[TfResult] {
        &self.rows
    }

    /// Get the row of a TF.
    pub fn row(&self, name: &str) -> Option<&TfResult> {
        self.rows
            .binary_search_by(|r| r.name.as_str().cmp(name))
            .ok()
            .map(|i| &self.rows[i])
    }

    /// Write the table as tab-separated values.
    pub fn write_tsv<W: Write>(&self, mut writer: W) -> std::io::Result<()> {
        writeln!(writer, "{}", self.header().join("\t"))?;
        for row in self.rows.iter() {
            write!(writer, "{}\t{}", row.name, row.total)?;
            for (threshold, bound) in self.thresholds.iter().zip(row.bound.iter()) {
                write!(writer, "\t{}\t{}", format_float(*threshold), bound)?;
            }
            for (change, pvalue) in row.changes.iter().zip(row.pvalues.iter()) {
                write!(writer, "\t{}\t{}", format_float(*change), format_pvalue(*pvalue))?;
            }
            writeln!(writer)?;
        }
        Ok(())
    }
}

// --- DistanceMatrix ----------------------------------------------------------

/// Pairwise distances between TFs based on the overlap of their sites.
#[derive(Debug, Clone, PartialEq)]
pub struct DistanceMatrix {
    names: Vec<String>,
    values: Vec<f64>,
}

impl DistanceMatrix {
    /// Build the matrix from site and overlap counts.
    ///
    /// The distance between `a` and `b` is one minus the mean of the
    /// fractions of `a` and `b` sites overlapping the other TF, each capped
    /// at one. TFs without sites are at distance 1 from every other TF.
    pub fn from_overlaps(names: &[String], overlaps: &OverlapCounts) -> Self {
        let mut names = names.to_vec();
        names.sort();
        let n = names.len();
        let mut values = vec![0.0; n * n];
        for i in 0..n {
            for j in i + 1..n {
                let na = overlaps.sites(&names[i]);
                let nb = overlaps.sites(&names[j]);
                let d = if na == 0 || nb == 0 {
                    1.0
                } else {
                    let o = overlaps.overlap(&names[i], &names[j]) as f64;
                    let fa = (o / na as f64).min(1.0);
                    let fb = (o / nb as f64).min(1.0);
                    1.0 - (fa + fb) / 2.0
                };
                values[i * n + j] = d;
                values[j * n + i] = d;
            }
        }
        Self { names, values }
    }

    /// Get the TF names labelling rows and columns.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Get the distance between the TFs at indices `i` and `j`.
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.values[i * self.names.len() + j]
    }

    /// Write the matrix as tab-separated values with labelled rows.
    pub fn write_tsv<W: Write>(&self, mut writer: W) -> std::io::Result<()> {
        writeln!(writer, "\t{}", self.names.join("\t"))?;
        for (i, name) in self.names.iter().enumerate() {
            write!(writer, "{}", name)?;
            for j in 0..self.names.len() {
                write!(writer, "\t{:.4}", self.get(i, j))?;
            }
            writeln!(writer)?;
        }
        Ok(())
    }
}
