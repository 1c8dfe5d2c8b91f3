//! Run configuration, resolved once before the pipeline starts.

use std::path::PathBuf;
use std::str::FromStr;

use crate::err::Error;

// --- Naming ------------------------------------------------------------------

/// The convention used to derive a TF name from a motif record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Naming {
    Id,
    Name,
    #[default]
    NameId,
    IdName,
}

impl Naming {
    /// Build the TF name for a motif with the given identifier and name.
    pub fn apply(&self, id: &str, name: Option<&str>) -> String {
        let name = name.unwrap_or(id);
        match self {
            Naming::Id => id.to_string(),
            Naming::Name => name.to_string(),
            Naming::NameId => format!("{}_{}", name, id),
            Naming::IdName => format!("{}_{}", id, name),
        }
    }
}

impl FromStr for Naming {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "id" => Ok(Naming::Id),
            "name" => Ok(Naming::Name),
            "name_id" => Ok(Naming::NameId),
            "id_name" => Ok(Naming::IdName),
            other => Err(Error::InvalidConfig(format!(
                "unknown naming convention {:?}",
                other
            ))),
        }
    }
}

// --- Config ------------------------------------------------------------------

/// The parameters of a BINDetect run.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory receiving per-TF folders and result tables.
    pub outdir: PathBuf,
    /// Number of scanning and aggregation workers.
    pub jobs: usize,
    /// Number of writer units owning the per-TF match streams.
    pub writers: usize,
    /// Number of chunks the regions are split into.
    pub split: usize,
    /// P-value used to calibrate the per-motif match threshold.
    pub motif_pvalue: f64,
    /// Strictness of the bound/unbound split, from 0 (strict) to 1 (loose).
    pub bound_threshold: f64,
    /// Fixed pseudocount for log2 fold-changes, estimated when `None`.
    pub pseudocount: Option<f64>,
    /// Naming convention for TFs.
    pub naming: Naming,
    /// Seed of the random generator used for mixture fitting.
    pub seed: u64,
    /// Distance between two background samples inside a region.
    pub background_stride: usize,
    /// Width of the window used to compute local GC content.
    pub gc_window: usize,
    /// Number of batches a writer queue holds before blocking producers.
    pub queue_capacity: usize,
    /// Largest number of components tried for the differential null model.
    pub max_null_components: usize,
    /// Whether to draw progress bars.
    pub progress: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            outdir: PathBuf::from("bindetect_output"),
            jobs: 1,
            writers: 1,
            split: 100,
            motif_pvalue: 1e-4,
            bound_threshold: 0.4,
            pseudocount: None,
            naming: Naming::default(),
            seed: 1,
            background_stride: 50,
            gc_window: 50,
            queue_capacity: 1024,
            max_null_components: 9,
            progress: false,
        }
    }
}

impl Config {
    /// Check that every parameter is within its allowed range.
    pub fn validate(&self) -> Result<(), Error> {
        let fail = |reason: String| Err(Error::InvalidConfig(reason));
        if self.jobs == 0 {
            return fail("number of jobs must be at least 1".into());
        }
        if self.writers == 0 {
            return fail("number of writers must be at least 1".into());
        }
        if self.split == 0 {
            return fail("split must be at least 1".into());
        }
        if !(self.motif_pvalue > 0.0 && self.motif_pvalue <= 1.0) {
            return fail(format!(
                "motif p-value must be in (0, 1], got {}",
                self.motif_pvalue
            ));
        }
        if !(0.0..=1.0).contains(&self.bound_threshold) {
            return fail(format!(
                "bound threshold must be in [0, 1], got {}",
                self.bound_threshold
            ));
        }
        if let Some(pseudo) = self.pseudocount {
            if !(pseudo > 0.0 && pseudo.is_finite()) {
                return fail(format!("pseudocount must be positive, got {}", pseudo));
            }
        }
        if self.background_stride == 0 {
            return fail("background stride must be at least 1".into());
        }
        if self.gc_window == 0 {
            return fail("GC window must be at least 1".into());
        }
        if self.queue_capacity == 0 {
            return fail("writer queue capacity must be at least 1".into());
        }
        if self.max_null_components == 0 {
            return fail("null model needs at least 1 component".into());
        }
        Ok(())
    }
}
