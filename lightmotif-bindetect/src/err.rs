//! Error type shared by every stage of the pipeline.

use std::fmt::Display;
use std::fmt::Formatter;
use std::path::PathBuf;
use std::sync::Arc;

/// An error that aborts a BINDetect run.
///
/// Every variant names the input it was raised for (file, condition,
/// condition pair, TF) so that the message can be acted upon directly.
#[derive(Clone, Debug)]
pub enum Error {
    /// An I/O error without a known file.
    Io(Arc<std::io::Error>),
    /// An I/O error while accessing the given file.
    File {
        path: PathBuf,
        error: Arc<std::io::Error>,
    },
    /// A configuration value is out of its allowed range.
    InvalidConfig(String),
    /// A line of a region file could not be parsed.
    InvalidRegion {
        path: Option<PathBuf>,
        line: usize,
        reason: String,
    },
    /// The peak header does not match the number of peak columns.
    HeaderMismatch {
        header: usize,
        columns: usize,
    },
    /// A chromosome is not part of the genome.
    UnknownChromosome(String),
    /// Coordinates are outside of the chromosome.
    OutOfBounds {
        chrom: String,
        start: u64,
        end: u64,
        length: u64,
    },
    /// A motif cannot be used for scanning.
    InvalidMotif {
        name: String,
        reason: String,
    },
    /// A motif file could not be parsed.
    MotifFormat(lightmotif_io::error::Error),
    /// The signal of a condition could not be read.
    Signal {
        condition: String,
        reason: String,
    },
    /// The background of a condition is empty once zeros are removed.
    DegenerateBackground {
        condition: String,
    },
    /// Two conditions have no position where either signal is non-zero.
    IndistinguishableConditions {
        first: String,
        second: String,
    },
    /// A statistical model could not be fitted.
    Fit {
        target: String,
        reason: String,
    },
    /// The writer unit owning a TF stopped before receiving its records.
    WriterClosed {
        tf: String,
    },
    /// A worker thread panicked.
    WorkerPanicked(String),
    /// A line of a match stream could not be parsed.
    InvalidRecord {
        path: PathBuf,
        line: usize,
    },
}

impl Error {
    /// Attach a file path to an I/O error.
    pub fn file<P: Into<PathBuf>>(path: P, error: std::io::Error) -> Self {
        Error::File {
            path: path.into(),
            error: Arc::new(error),
        }
    }

    /// Create a fitting error for the given target.
    pub fn fit<T: Into<String>, R: Into<String>>(target: T, reason: R) -> Self {
        Error::Fit {
            target: target.into(),
            reason: reason.into(),
        }
    }

    /// Attach the path of the file being read to a parsing or I/O error.
    pub fn with_path<P: Into<PathBuf>>(self, path: P) -> Self {
        match self {
            Error::Io(error) => Error::File {
                path: path.into(),
                error,
            },
            Error::InvalidRegion { line, reason, .. } => Error::InvalidRegion {
                path: Some(path.into()),
                line,
                reason,
            },
            other => other,
        }
    }

    /// Name the target of a fitting error after the input it was fitted on.
    pub(crate) fn retarget<T: Into<String>>(self, target: T) -> Self {
        match self {
            Error::Fit { reason, .. } => Error::Fit {
                target: target.into(),
                reason,
            },
            other => other,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::Io(Arc::new(error))
    }
}

impl From<lightmotif_io::error::Error> for Error {
    fn from(error: lightmotif_io::error::Error) -> Self {
        Error::MotifFormat(error)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(err) => err.fmt(f),
            Error::File { path, error } => write!(f, "{}: {}", path.display(), error),
            Error::InvalidConfig(reason) => write!(f, "invalid configuration: {}", reason),
            Error::InvalidRegion {
                path: Some(path),
                line,
                reason,
            } => write!(
                f,
                "{}: invalid region on line {}: {}",
                path.display(),
                line,
                reason
            ),
            Error::InvalidRegion {
                path: None,
                line,
                reason,
            } => write!(f, "invalid region on line {}: {}", line, reason),
            Error::HeaderMismatch { header, columns } => write!(
                f,
                "length of peak header ({}) does not fit number of columns in peaks ({})",
                header, columns
            ),
            Error::UnknownChromosome(chrom) => {
                write!(f, "chromosome {:?} is not found in the genome", chrom)
            }
            Error::OutOfBounds {
                chrom,
                start,
                end,
                length,
            } => write!(
                f,
                "region {}:{}-{} is outside of the chromosome (length {})",
                chrom, start, end, length
            ),
            Error::InvalidMotif { name, reason } => {
                write!(f, "motif {:?} could not be used: {}", name, reason)
            }
            Error::MotifFormat(err) => write!(f, "failed to read motifs: {}", err),
            Error::Signal { condition, reason } => {
                write!(f, "failed to read signal of condition {:?}: {}", condition, reason)
            }
            Error::DegenerateBackground { condition } => write!(
                f,
                "background signal of condition {:?} contains only zeroes",
                condition
            ),
            Error::IndistinguishableConditions { first, second } => write!(
                f,
                "signal of conditions {:?} and {:?} contains only zeroes",
                first, second
            ),
            Error::Fit { target, reason } => write!(f, "failed to fit {}: {}", target, reason),
            Error::WriterClosed { tf } => {
                write!(f, "writer for {:?} stopped before the end of scanning", tf)
            }
            Error::WorkerPanicked(what) => write!(f, "worker panicked: {}", what),
            Error::InvalidRecord { path, line } => {
                write!(f, "{}: invalid match record on line {}", path.display(), line)
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::File { error, .. } => Some(error),
            Error::MotifFormat(e) => Some(e),
            _ => None,
        }
    }
}
