//! The controller running every phase of a BINDetect run.

use std::collections::HashSet;
use std::fs::File;
use std::io::BufWriter;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use log::info;
use log::warn;

use crate::aggregate::comparisons;
use crate::aggregate::Models;
use crate::aggregate::TfAggregator;
use crate::config::Config;
use crate::err::Error;
use crate::genome::SequenceProvider;
use crate::motif::MotifRecord;
use crate::motif::MotifSet;
use crate::null::NullModel;
use crate::partition::partition;
use crate::pool;
use crate::region::RegionList;
use crate::results::DistanceMatrix;
use crate::results::ResultTable;
use crate::scan::ChunkFragment;
use crate::scan::ChunkScanner;
use crate::signal::Condition;
use crate::threshold::estimate_threshold;
use crate::threshold::resolve_pseudocount;
use crate::threshold::ThresholdEstimate;
use crate::writer::WriterRouter;

/// Name of the result table in the output directory.
pub const RESULTS_FILE: &str = "bindetect_results.txt";
/// Name of the distance matrix in the output directory.
pub const DISTANCE_FILE: &str = "TF_distance_matrix.txt";

/// Everything a successful run produced.
#[derive(Debug, Clone)]
pub struct Report {
    pub table: ResultTable,
    /// Only computed when more than one condition was given.
    pub distances: Option<DistanceMatrix>,
    pub thresholds: Vec<ThresholdEstimate>,
    pub pseudocount: f64,
    /// GC content of the peaks, used as the motif background.
    pub gc: f64,
    /// Number of sites written for every TF.
    pub written: Vec<(Arc<str>, u64)>,
}

/// A BINDetect run over a set of regions and conditions.
pub struct BinDetect<'a> {
    config: Config,
    genome: &'a dyn SequenceProvider,
    regions: RegionList,
    conditions: Vec<Condition>,
    peak_header: Option<Vec<String>>,
}

impl<'a> BinDetect<'a> {
    /// Create a new run.
    pub fn new(
        config: Config,
        genome: &'a dyn SequenceProvider,
        regions: RegionList,
        conditions: Vec<Condition>,
    ) -> Self {
        Self {
            config,
            genome,
            regions,
            conditions,
            peak_header: None,
        }
    }

    /// Set the names of the peak columns.
    pub fn peak_header(&mut self, header: Option<Vec<String>>) -> &mut Self {
        self.peak_header = header;
        self
    }

    fn check_inputs(&self) -> Result<(), Error> {
        self.config.validate()?;
        if self.conditions.is_empty() {
            return Err(Error::InvalidConfig("no condition given".into()));
        }
        let mut names = HashSet::new();
        for condition in self.conditions.iter() {
            if !names.insert(condition.name()) {
                return Err(Error::InvalidConfig(format!(
                    "condition {:?} is given more than once",
                    condition.name()
                )));
            }
        }
        if self.regions.is_empty() {
            return Err(Error::InvalidConfig("no region given".into()));
        }
        if let Some(header) = self.peak_header.as_ref() {
            self.regions.check_header(header)?;
        }
        self.genome.check_regions(&self.regions)
    }

    fn peak_gc(&self) -> Result<f64, Error> {
        let mut gc = 0u64;
        let mut total = 0u64;
        for region in self.regions.iter() {
            let sequence = self.genome.fetch(&region.chrom, region.start, region.end)?;
            gc += sequence.iter().filter(|b| matches!(b, b'G' | b'C')).count() as u64;
            total += sequence.len() as u64;
        }
        Ok(if total == 0 { 0.5 } else { gc as f64 / total as f64 })
    }

    fn fit_models(&self, fragment: &ChunkFragment) -> Result<(Vec<ThresholdEstimate>, Models), Error> {
        info!("Estimating score distributions per condition");
        let background = &fragment.background;
        let estimates = self
            .conditions
            .iter()
            .enumerate()
            .map(|(i, c)| {
                estimate_threshold(
                    c.name(),
                    &background.signal(i),
                    self.config.bound_threshold,
                    self.config.seed,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;
        let pseudocount = resolve_pseudocount(self.config.pseudocount, &estimates)?;

        let pairs = comparisons(self.conditions.len());
        if !pairs.is_empty() {
            info!("Fitting null models of log2 fold-changes between conditions");
        }
        let gc = background.gc();
        let mut nulls = Vec::with_capacity(pairs.len());
        for (i, j) in pairs {
            let null = NullModel::fit(
                self.conditions[i].name(),
                self.conditions[j].name(),
                &background.signal(i),
                &background.signal(j),
                &gc,
                pseudocount,
                self.config.max_null_components,
                self.config.seed,
            )?;
            nulls.push(((i, j), null));
        }

        let models = Models {
            thresholds: estimates.iter().map(|e| e.threshold).collect(),
            pseudocount,
            nulls,
        };
        Ok((estimates, models))
    }

    /// Run every phase and write the final outputs.
    ///
    /// Result files of a previous run in the same output directory are
    /// removed first, and only written again once every phase succeeded.
    pub fn run(&self, motifs: Vec<MotifRecord>) -> Result<Report, Error> {
        self.check_inputs()?;
        let outdir = self.config.outdir.as_path();
        std::fs::create_dir_all(outdir).map_err(|e| Error::file(outdir, e))?;
        for name in [RESULTS_FILE, DISTANCE_FILE] {
            let path = outdir.join(name);
            if path.exists() {
                std::fs::remove_file(&path).map_err(|e| Error::file(&path, e))?;
            }
        }

        // --- Motifs ---
        let gc = self.peak_gc()?;
        info!("GC content of peaks estimated at {:.2}%", gc * 100.0);
        let motifs = MotifSet::prepare(
            motifs,
            self.config.naming,
            gc as f32,
            self.config.motif_pvalue,
        )?;
        if motifs.is_empty() {
            return Err(Error::InvalidConfig("no motif given".into()));
        }
        let names = motifs.names();
        info!("Prepared {} motifs", motifs.len());

        // --- Scanning ---
        let router = WriterRouter::start(
            outdir,
            &names,
            self.config.writers,
            self.config.queue_capacity,
        )?;
        let chunks = partition(self.regions.as_ref(), self.config.split)
            .into_iter()
            .filter(|chunk| !chunk.is_empty())
            .collect::<Vec<_>>();
        info!(
            "Scanning {} regions in {} chunks with {} threads",
            self.regions.len(),
            chunks.len(),
            self.config.jobs
        );
        let mut scanner = ChunkScanner::new(&motifs, self.genome, &self.conditions, &router);
        scanner
            .stride(self.config.background_stride)
            .gc_window(self.config.gc_window);
        let scanned = pool::run(
            "Scanning",
            chunks,
            self.config.jobs,
            self.config.progress,
            |_, chunk| scanner.scan(chunk),
        );
        let fragments = match scanned {
            Ok(fragments) => fragments,
            Err(e) => {
                // a closed writer means the writer itself failed first
                return Err(match (e, router.finish()) {
                    (Error::WriterClosed { .. }, Err(writer_error)) => writer_error,
                    (e, _) => e,
                });
            }
        };
        let written = router.finish()?;
        let fragment = ChunkFragment::reduce(fragments);
        info!(
            "Found {} sites, sampled {} background positions",
            fragment.matches,
            fragment.background.len()
        );

        // --- Models ---
        let (thresholds, models) = self.fit_models(&fragment)?;

        // --- Aggregation ---
        let condition_names = self
            .conditions
            .iter()
            .map(|c| c.name().to_string())
            .collect::<Vec<_>>();
        let mut aggregator = TfAggregator::new(outdir, &condition_names, &models);
        aggregator.peak_header(self.peak_header.as_deref());
        info!("Processing scanned TFBS individually");
        let rows = pool::run(
            "Aggregating",
            names.clone(),
            self.config.jobs,
            self.config.progress,
            |_, tf| aggregator.aggregate(&tf),
        )?;

        // --- Results ---
        let table = ResultTable::new(
            condition_names,
            models.thresholds.clone(),
            models.nulls.iter().map(|(pair, _)| *pair).collect(),
            rows,
        );
        let distances = if self.conditions.len() > 1 {
            let names = names.iter().map(|n| n.to_string()).collect::<Vec<_>>();
            Some(DistanceMatrix::from_overlaps(&names, &fragment.overlaps))
        } else {
            None
        };
        for row in table.rows().iter().filter(|r| r.total == 0) {
            warn!("No site found for {}", row.name);
        }

        write_output(&outdir.join(RESULTS_FILE), |w| table.write_tsv(w))?;
        if let Some(matrix) = distances.as_ref() {
            write_output(&outdir.join(DISTANCE_FILE), |w| matrix.write_tsv(w))?;
        }
        info!("Results written to {}", outdir.display());

        Ok(Report {
            table,
            distances,
            thresholds,
            pseudocount: models.pseudocount,
            gc,
            written,
        })
    }
}

fn write_output<F>(path: &Path, write: F) -> Result<(), Error>
where
    F: FnOnce(&mut BufWriter<File>) -> std::io::Result<()>,
{
    let file = File::create(path).map_err(|e| Error::file(path, e))?;
    let mut writer = BufWriter::new(file);
    write(&mut writer)
        .and_then(|_| writer.flush())
        .map_err(|e| Error::file(path, e))
}
