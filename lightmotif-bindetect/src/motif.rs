//! Motifs prepared for scanning in both orientations.
//!
//! Each input motif becomes a single [`Motif`] holding a forward and a
//! reverse-complement [`ScoringMatrix`], both calibrated against a
//! strand-symmetric background derived from the GC content of the peaks.
//! Scanning iterates over the two [`MotifVariant`]s of every motif, and
//! the hits of both variants are reported under the same TF name.

use std::collections::HashSet;
use std::io::BufRead;
use std::str::FromStr;
use std::sync::Arc;

use lightmotif::abc::Background;
use lightmotif::abc::Dna;
use lightmotif::pwm::CountMatrix;
use lightmotif::pwm::ScoringMatrix;
use log::debug;
use log::warn;

use crate::config::Naming;
use crate::err::Error;

/// The pseudocount added to motif counts before building frequencies.
const MOTIF_PSEUDOCOUNT: f32 = 0.1;

// --- Strand ------------------------------------------------------------------

/// The orientation in which a motif was matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Strand {
    Forward,
    Reverse,
}

impl Strand {
    /// Get the BED representation of the strand.
    pub fn as_char(&self) -> char {
        match self {
            Strand::Forward => '+',
            Strand::Reverse => '-',
        }
    }
}

impl FromStr for Strand {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "+" => Ok(Strand::Forward),
            "-" => Ok(Strand::Reverse),
            _ => Err(()),
        }
    }
}

// --- MotifRecord -------------------------------------------------------------

/// The matrix formats motifs can be loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MotifFormat {
    Jaspar,
    #[default]
    Jaspar16,
}

impl FromStr for MotifFormat {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "jaspar" => Ok(MotifFormat::Jaspar),
            "jaspar16" | "pfm" => Ok(MotifFormat::Jaspar16),
            other => Err(Error::InvalidConfig(format!(
                "unsupported motif format {:?}",
                other
            ))),
        }
    }
}

/// A count matrix read from a motif library.
#[derive(Debug, Clone)]
pub struct MotifRecord {
    pub id: String,
    pub name: Option<String>,
    pub counts: CountMatrix<Dna>,
}

impl MotifRecord {
    /// Create a new motif record.
    pub fn new<I: Into<String>>(id: I, name: Option<String>, counts: CountMatrix<Dna>) -> Self {
        Self {
            id: id.into(),
            name,
            counts,
        }
    }
}

/// Read every motif record of a motif library.
pub fn read_motifs<B: BufRead>(reader: B, format: MotifFormat) -> Result<Vec<MotifRecord>, Error> {
    match format {
        MotifFormat::Jaspar => lightmotif_io::jaspar::read(reader)
            .map(|res| {
                res.map(|record| {
                    let id = record.id().to_string();
                    let name = record.description().map(String::from);
                    MotifRecord::new(id, name, CountMatrix::from(record))
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(Error::from),
        MotifFormat::Jaspar16 => lightmotif_io::jaspar16::read::<_, Dna>(reader)
            .map(|res| {
                res.map(|record| {
                    let id = record.id().to_string();
                    let name = record.description().map(String::from);
                    MotifRecord::new(id, name, record.into_matrix())
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(Error::from),
    }
}

// --- Motif -------------------------------------------------------------------

/// A scoring matrix together with its match threshold.
#[derive(Debug, Clone)]
pub struct Orientation {
    pssm: ScoringMatrix<Dna>,
    threshold: f32,
}

impl Orientation {
    fn new(pssm: ScoringMatrix<Dna>, pvalue: f64) -> Self {
        let threshold = pssm.to_score_distribution().score(pvalue);
        Self { pssm, threshold }
    }

    /// Get the scoring matrix.
    pub fn pssm(&self) -> &ScoringMatrix<Dna> {
        &self.pssm
    }

    /// Get the minimum score of a match.
    pub fn threshold(&self) -> f32 {
        self.threshold
    }
}

/// A motif with its two scanning orientations.
#[derive(Debug, Clone)]
pub struct Motif {
    name: Arc<str>,
    id: String,
    forward: Orientation,
    reverse: Orientation,
}

impl Motif {
    /// Get the TF name of the motif.
    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    /// Get the identifier of the motif in its source library.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Get the length of the motif.
    pub fn len(&self) -> usize {
        self.forward.pssm.len()
    }

    /// Check whether the motif has no position.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get the orientation for the given strand.
    pub fn orientation(&self, strand: Strand) -> &Orientation {
        match strand {
            Strand::Forward => &self.forward,
            Strand::Reverse => &self.reverse,
        }
    }

    /// Get the two scanning variants of the motif.
    pub fn variants(&self) -> [MotifVariant<'_>; 2] {
        [
            MotifVariant {
                motif: self,
                strand: Strand::Forward,
            },
            MotifVariant {
                motif: self,
                strand: Strand::Reverse,
            },
        ]
    }
}

/// One orientation of a motif, as seen by the scanner.
#[derive(Debug, Clone, Copy)]
pub struct MotifVariant<'a> {
    pub motif: &'a Motif,
    pub strand: Strand,
}

impl<'a> MotifVariant<'a> {
    /// Get the TF name shared by both variants.
    pub fn name(&self) -> &'a Arc<str> {
        &self.motif.name
    }

    /// Get the scoring matrix of this variant.
    pub fn pssm(&self) -> &'a ScoringMatrix<Dna> {
        &self.motif.orientation(self.strand).pssm
    }

    /// Get the match threshold of this variant.
    pub fn threshold(&self) -> f32 {
        self.motif.orientation(self.strand).threshold
    }
}

// --- MotifSet ----------------------------------------------------------------

/// Build a strand-symmetric background for the given GC fraction.
pub fn gc_background(gc: f32) -> Background<Dna> {
    let gc = gc.clamp(0.0, 1.0);
    let a = (1.0 - gc) / 2.0;
    let c = gc / 2.0;
    let g = 1.0 - a - c - a;
    // Dna symbols are ordered A, C, T, G, N
    match Background::<Dna>::new([a, c, a, g, 0.0]) {
        Ok(bg) => bg,
        Err(_) => {
            warn!(
                "Could not build background for GC content {:.4}, using uniform frequencies",
                gc
            );
            Background::uniform()
        }
    }
}

/// Replace characters that cannot appear in file names.
///
/// Leading dots are replaced as well, so that the name always stays a
/// regular entry of the output directory.
pub fn sanitize_name(name: &str) -> String {
    let mut leading = true;
    let sanitized = name
        .chars()
        .map(|c| {
            let keep = c.is_ascii_alphanumeric()
                || matches!(c, '_' | '-')
                || (c == '.' && !leading);
            leading &= c == '.';
            if keep {
                c
            } else {
                '_'
            }
        })
        .collect::<String>();
    if sanitized.is_empty() {
        "_".to_string()
    } else {
        sanitized
    }
}

/// The read-only set of motifs shared by all scanning workers.
#[derive(Debug, Clone, Default)]
pub struct MotifSet {
    motifs: Vec<Motif>,
}

impl MotifSet {
    /// Prepare motif records for scanning.
    ///
    /// TF names are built with `naming`, sanitized, and made unique by
    /// suffixing duplicates. Both orientations get a match threshold
    /// calibrated at `pvalue` under the background for `gc`.
    pub fn prepare(
        records: Vec<MotifRecord>,
        naming: Naming,
        gc: f32,
        pvalue: f64,
    ) -> Result<Self, Error> {
        let background = gc_background(gc);
        let mut seen = HashSet::new();
        let mut motifs = Vec::with_capacity(records.len());
        for record in records {
            let base = sanitize_name(&naming.apply(&record.id, record.name.as_deref()));
            if record.counts.matrix().rows() == 0 {
                return Err(Error::InvalidMotif {
                    name: base,
                    reason: "matrix has no columns".into(),
                });
            }
            let mut name = base.clone();
            let mut n = 1;
            while !seen.insert(name.clone()) {
                n += 1;
                name = format!("{}_{}", base, n);
            }
            if n > 1 {
                warn!("Duplicate TF name {:?} renamed to {:?}", base, name);
            }
            let pssm = record
                .counts
                .to_freq(MOTIF_PSEUDOCOUNT)
                .to_scoring(background.clone());
            let reverse = pssm.reverse_complement();
            let motif = Motif {
                name: Arc::from(name),
                id: record.id,
                forward: Orientation::new(pssm, pvalue),
                reverse: Orientation::new(reverse, pvalue),
            };
            debug!(
                "Motif {} (length {}): thresholds {:.3} (+) / {:.3} (-)",
                motif.name,
                motif.len(),
                motif.forward.threshold,
                motif.reverse.threshold
            );
            motifs.push(motif);
        }
        Ok(Self { motifs })
    }

    /// Get the TF names of all motifs, in input order.
    pub fn names(&self) -> Vec<Arc<str>> {
        self.motifs.iter().map(|m| m.name.clone()).collect()
    }

    /// Get the length of the longest motif.
    pub fn max_len(&self) -> usize {
        self.motifs.iter().map(Motif::len).max().unwrap_or(0)
    }

    /// Get the number of motifs.
    pub fn len(&self) -> usize {
        self.motifs.len()
    }

    /// Check whether the set contains no motif.
    pub fn is_empty(&self) -> bool {
        self.motifs.is_empty()
    }

    /// Iterate over the motifs.
    pub fn iter(&self) -> std::slice::Iter<'_, Motif> {
        self.motifs.iter()
    }
}
