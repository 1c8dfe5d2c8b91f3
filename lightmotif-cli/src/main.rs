use std::collections::HashMap;
use std::fs::File;
use std::io::BufRead;
use std::path::Path;
use std::path::PathBuf;

use bigtools::utils::reopen::ReopenableFile;
use bigtools::BigWigRead;
use clap::Parser;
use lightmotif_bindetect::motif::read_motifs;
use lightmotif_bindetect::BinDetect;
use lightmotif_bindetect::Condition;
use lightmotif_bindetect::Config;
use lightmotif_bindetect::Error;
use lightmotif_bindetect::Genome;
use lightmotif_bindetect::MotifFormat;
use lightmotif_bindetect::Naming;
use lightmotif_bindetect::RegionList;
use lightmotif_bindetect::SignalReader;
use lightmotif_bindetect::SignalTrack;
use log::debug;
use log::error;
use log::info;
use log::LevelFilter;
use log4rs::append::console::ConsoleAppender;
use log4rs::append::console::Target;
use log4rs::append::file::FileAppender;
use log4rs::config::Appender;
use log4rs::config::Root;
use log4rs::encode::pattern::PatternEncoder;
use log4rs::filter::threshold::ThresholdFilter;

// --- BigWig ------------------------------------------------------------------

/// The footprint signal of a condition, stored in a bigWig file.
struct BigWigTrack {
    condition: String,
    path: String,
}

impl BigWigTrack {
    fn new<P: AsRef<Path>>(condition: &str, path: P) -> Result<Self, Error> {
        let path = path.as_ref();
        let path = path.to_str().map(String::from).ok_or_else(|| Error::Signal {
            condition: condition.to_string(),
            reason: format!("path {} is not valid UTF-8", path.display()),
        })?;
        Ok(Self {
            condition: condition.to_string(),
            path,
        })
    }

    fn fail<E: std::fmt::Display>(&self, error: E) -> Error {
        Error::Signal {
            condition: self.condition.clone(),
            reason: format!("{}: {}", self.path, error),
        }
    }
}

impl SignalTrack for BigWigTrack {
    fn open(&self) -> Result<Box<dyn SignalReader + '_>, Error> {
        let reader = BigWigRead::open_file(self.path.as_str()).map_err(|e| self.fail(e))?;
        let lengths = reader
            .chroms()
            .iter()
            .map(|c| (c.name.clone(), c.length as u64))
            .collect();
        Ok(Box::new(BigWigReader {
            track: self,
            reader,
            lengths,
        }))
    }
}

struct BigWigReader<'a> {
    track: &'a BigWigTrack,
    reader: BigWigRead<ReopenableFile>,
    lengths: HashMap<String, u64>,
}

impl SignalReader for BigWigReader<'_> {
    fn values(&mut self, chrom: &str, start: u64, end: u64) -> Result<Vec<f32>, Error> {
        let mut values = vec![0.0; end.saturating_sub(start) as usize];
        // chromosomes missing from the track have no signal
        let stop = match self.lengths.get(chrom) {
            Some(&length) => end.min(length),
            None => return Ok(values),
        };
        if stop <= start {
            return Ok(values);
        }
        let intervals = self
            .reader
            .get_interval(chrom, start as u32, stop as u32)
            .map_err(|e| self.track.fail(e))?;
        for interval in intervals {
            let interval = interval.map_err(|e| self.track.fail(e))?;
            let s = (interval.start as u64).max(start);
            let e = (interval.end as u64).min(stop);
            if interval.value.is_nan() {
                continue;
            }
            for pos in s..e {
                values[(pos - start) as usize] = interval.value;
            }
        }
        Ok(values)
    }
}

// --- Inputs ------------------------------------------------------------------

fn open_compressed<P: AsRef<Path>>(path: P) -> Result<Box<dyn BufRead>, Error> {
    let path = path.as_ref();
    let mut file = File::open(path)
        .map(std::io::BufReader::new)
        .map_err(|e| Error::file(path, e))?;
    let unsupported = |kind: &str| {
        Error::file(
            path,
            std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                format!("no handling of {} files", kind),
            ),
        )
    };
    match file.fill_buf().map_err(|e| Error::file(path, e))? {
        &[0x1f, 0x8b, ..] => Ok(flate2::read::MultiGzDecoder::new(file))
            .map(std::io::BufReader::new)
            .map(|r| Box::new(r) as Box<dyn BufRead>),
        &[0xfd, b'7', b'z', b'X', b'Z', ..] => Err(unsupported("xz")),
        &[b'B', b'Z', b'h', ..] => Err(unsupported("bzip2")),
        _ => Ok(Box::new(file)),
    }
}

fn load_genome<P: AsRef<Path>>(path: P) -> Result<Genome, Error> {
    let path = path.as_ref();
    let mut genome = Genome::new();
    let mut reader = open_compressed(path).map(noodles::fasta::io::Reader::new)?;
    for result in reader.records() {
        let record = result.map_err(|e| Error::file(path, e))?;
        let name = String::from_utf8_lossy(record.name()).into_owned();
        debug!("Loaded sequence {:?} ({} bp)", name, record.sequence().len());
        genome.insert(name, record.sequence());
    }
    Ok(genome)
}

fn load_regions<P: AsRef<Path>>(path: P) -> Result<RegionList, Error> {
    let path = path.as_ref();
    let regions = open_compressed(path)
        .and_then(RegionList::from_bed)
        .map_err(|e| e.with_path(path))?;
    let count = regions.len();
    let regions = regions.merge();
    info!(
        "Loaded {} peaks ({} after merging overlaps)",
        count,
        regions.len()
    );
    Ok(regions)
}

fn load_header<P: AsRef<Path>>(path: P) -> Result<Vec<String>, Error> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|e| Error::file(path, e))?;
    Ok(text.split_whitespace().map(String::from).collect())
}

fn condition_names(params: &Parameters) -> Result<Vec<String>, Error> {
    if let Some(names) = params.cond_names.as_ref() {
        if names.len() != params.signals.len() {
            return Err(Error::InvalidConfig(format!(
                "{} condition names given for {} signals",
                names.len(),
                params.signals.len()
            )));
        }
        return Ok(names.clone());
    }
    Ok(params
        .signals
        .iter()
        .map(|path| {
            path.file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string())
        })
        .collect())
}

// --- Logging -----------------------------------------------------------------

fn init_logging(
    verbosity: u8,
    log: Option<&Path>,
) -> Result<log4rs::Handle, Box<dyn std::error::Error>> {
    let level = match verbosity {
        0 => LevelFilter::Error,
        1 => LevelFilter::Warn,
        2 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    };
    let stderr = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new("{h({l})} {m}{n}")))
        .target(Target::Stderr)
        .build();
    let mut config = log4rs::Config::builder().appender(
        Appender::builder()
            .filter(Box::new(ThresholdFilter::new(level)))
            .build("stderr", Box::new(stderr)),
    );
    let mut root = Root::builder().appender("stderr");
    if let Some(path) = log {
        let file = FileAppender::builder()
            .encoder(Box::new(PatternEncoder::new(
                "[{d(%Y-%m-%d %H:%M:%S)}][{l}] {m}{n}",
            )))
            .append(false)
            .build(path)?;
        config = config.appender(Appender::builder().build("logfile", Box::new(file)));
        root = root.appender("logfile");
    }
    let config = config.build(root.build(LevelFilter::Debug))?;
    Ok(log4rs::init_config(config)?)
}

// --- Main --------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Parameters {
    /// bigWig files with footprint scores, one per condition
    #[arg(long, required = true, num_args = 1..)]
    signals: Vec<PathBuf>,
    /// names of the conditions (defaults to the signal file names)
    #[arg(long, num_args = 1..)]
    cond_names: Option<Vec<String>>,
    /// peak regions in BED format
    #[arg(long, required = true)]
    peaks: PathBuf,
    /// file with the names of the peak columns
    #[arg(long)]
    peak_header: Option<PathBuf>,
    /// genome sequence in FASTA format
    #[arg(long, required = true)]
    genome: PathBuf,
    /// motif file to load
    #[arg(long, required = true)]
    motifs: PathBuf,
    /// format of the motif file
    #[arg(long, default_value = "jaspar16")]
    format: MotifFormat,

    /// output directory
    #[arg(short, long, default_value = "bindetect_output")]
    outdir: PathBuf,

    /// number of cores to use, one of them being kept for the main thread
    #[arg(long, default_value_t = 1)]
    cores: usize,
    /// number of threads writing the per-TF match streams
    #[arg(long, default_value_t = 1)]
    writers: usize,
    /// number of chunks the peaks are split into
    #[arg(long, default_value_t = 100)]
    split: usize,

    /// p-value threshold for motif matches
    #[arg(long, default_value_t = 1e-4)]
    motif_pvalue: f64,
    /// fraction of the background allowed to be called bound
    #[arg(long, default_value_t = 0.4)]
    bound_threshold: f64,
    /// pseudocount of the fold-changes (estimated when missing)
    #[arg(long)]
    pseudo: Option<f64>,
    /// naming convention of TFs: id, name, name_id or id_name
    #[arg(long, default_value = "name_id")]
    naming: Naming,
    /// seed of the mixture model fits
    #[arg(long, default_value_t = 1)]
    seed: u64,

    /// level of output logging (0: errors, 1: warnings, 2: info, 3: debug)
    #[arg(long, default_value_t = 2)]
    verbosity: u8,
    /// file to write the full log to
    #[arg(long)]
    log: Option<PathBuf>,
}

fn run(params: &Parameters) -> Result<(), Error> {
    let names = condition_names(params)?;
    info!("Loading genome from {}", params.genome.display());
    let genome = load_genome(&params.genome)?;
    info!("Loaded {} sequences", genome.len());

    let regions = load_regions(&params.peaks)?;
    let header = params.peak_header.as_ref().map(load_header).transpose()?;

    let motifs = open_compressed(&params.motifs)
        .and_then(|reader| read_motifs(reader, params.format))?;
    info!("Loaded {} motifs from {}", motifs.len(), params.motifs.display());

    let conditions = names
        .iter()
        .zip(params.signals.iter())
        .map(|(name, path)| BigWigTrack::new(name, path).map(|t| Condition::new(name, t)))
        .collect::<Result<Vec<_>, _>>()?;

    let config = Config {
        outdir: params.outdir.clone(),
        jobs: params.cores.saturating_sub(1).max(1),
        writers: params.writers,
        split: params.split,
        motif_pvalue: params.motif_pvalue,
        bound_threshold: params.bound_threshold,
        pseudocount: params.pseudo,
        naming: params.naming,
        seed: params.seed,
        progress: params.verbosity >= 2,
        ..Default::default()
    };

    let mut bindetect = BinDetect::new(config, &genome, regions, conditions);
    bindetect.peak_header(header);
    let report = bindetect.run(motifs)?;

    let bound = report
        .table
        .rows()
        .iter()
        .filter(|row| row.bound.iter().any(|&b| b > 0))
        .count();
    info!(
        "Processed {} TFs ({} with bound sites) in {}",
        report.table.rows().len(),
        bound,
        params.outdir.display()
    );
    Ok(())
}

fn main() {
    let params = Parameters::parse();
    let _handle = match init_logging(params.verbosity, params.log.as_deref()) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("failed to set up logging: {}", e);
            std::process::exit(2);
        }
    };
    debug!("{:?}", params);
    if let Err(e) = run(&params) {
        error!("{}", e);
        std::process::exit(1);
    }
}
