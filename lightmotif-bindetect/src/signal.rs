//! Access to the per-condition footprint signal.

use std::collections::HashMap;
use std::sync::Arc;

use crate::err::Error;

/// A handle used by one worker to read signal values.
pub trait SignalReader {
    /// Get the per-base values of `chrom` between `start` and `end`.
    ///
    /// Positions without data are reported as `0.0`.
    fn values(&mut self, chrom: &str, start: u64, end: u64) -> Result<Vec<f32>, Error>;
}

/// A signal track that can be opened concurrently by several workers.
pub trait SignalTrack: Send + Sync {
    /// Open a new reader over the track.
    fn open(&self) -> Result<Box<dyn SignalReader + '_>, Error>;
}

// --- Condition ---------------------------------------------------------------

/// An experimental condition and its signal track.
pub struct Condition {
    name: String,
    track: Box<dyn SignalTrack>,
}

impl Condition {
    /// Create a new condition.
    pub fn new<N: Into<String>, T: SignalTrack + 'static>(name: N, track: T) -> Self {
        Self {
            name: name.into(),
            track: Box::new(track),
        }
    }

    /// Get the name of the condition.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Open a reader over the signal of the condition.
    pub fn open(&self) -> Result<Box<dyn SignalReader + '_>, Error> {
        self.track.open().map_err(|e| self.annotate(e))
    }

    /// Attach the condition name to an error raised by its track.
    pub(crate) fn annotate(&self, error: Error) -> Error {
        match error {
            Error::Signal { .. } => error,
            other => Error::Signal {
                condition: self.name.clone(),
                reason: other.to_string(),
            },
        }
    }
}

impl std::fmt::Debug for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Condition").field("name", &self.name).finish()
    }
}

// --- SignalMap ---------------------------------------------------------------

/// An in-memory signal track storing one value per base.
#[derive(Debug, Clone, Default)]
pub struct SignalMap {
    values: Arc<HashMap<String, Vec<f32>>>,
}

impl SignalMap {
    /// Create a track from per-chromosome values.
    pub fn new(values: HashMap<String, Vec<f32>>) -> Self {
        Self {
            values: Arc::new(values),
        }
    }
}

impl SignalTrack for SignalMap {
    fn open(&self) -> Result<Box<dyn SignalReader + '_>, Error> {
        Ok(Box::new(SignalMapReader { map: self }))
    }
}

struct SignalMapReader<'a> {
    map: &'a SignalMap,
}

impl SignalReader for SignalMapReader<'_> {
    fn values(&mut self, chrom: &str, start: u64, end: u64) -> Result<Vec<f32>, Error> {
        let mut out = vec![0.0; end.saturating_sub(start) as usize];
        if let Some(values) = self.map.values.get(chrom) {
            for (i, x) in (start..end).zip(out.iter_mut()) {
                if let Some(&v) = values.get(i as usize) {
                    *x = if v.is_nan() { 0.0 } else { v };
                }
            }
        }
        Ok(out)
    }
}

/// Compute the mean of a window of signal values.
pub fn window_mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f32>() / values.len() as f32
    }
}
