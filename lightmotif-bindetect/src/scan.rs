//! Motif scanning of region chunks.

use std::sync::Arc;

use lightmotif::abc::Dna;
use lightmotif::scan::Scanner;
use lightmotif::seq::EncodedSequence;

use crate::background::BackgroundSample;
use crate::background::OverlapCounts;
use crate::err::Error;
use crate::genome::GcProfile;
use crate::genome::SequenceProvider;
use crate::motif::MotifSet;
use crate::record::MatchRecord;
use crate::region::Region;
use crate::signal::window_mean;
use crate::signal::Condition;
use crate::signal::SignalReader;
use crate::writer::WriterRouter;

/// What a scan worker returns for one chunk, besides the routed matches.
#[derive(Debug, Clone, Default)]
pub struct ChunkFragment {
    pub background: BackgroundSample,
    pub overlaps: OverlapCounts,
    pub matches: u64,
}

impl ChunkFragment {
    /// Merge two fragments.
    pub fn merge(self, other: Self) -> Self {
        Self {
            background: self.background.merge(other.background),
            overlaps: self.overlaps.merge(other.overlaps),
            matches: self.matches + other.matches,
        }
    }

    /// Merge any number of fragments.
    pub fn reduce<I: IntoIterator<Item = Self>>(fragments: I) -> Self {
        let mut backgrounds = Vec::new();
        let mut overlaps = OverlapCounts::new();
        let mut matches = 0;
        for fragment in fragments {
            backgrounds.push(fragment.background);
            overlaps = overlaps.merge(fragment.overlaps);
            matches += fragment.matches;
        }
        Self {
            background: BackgroundSample::reduce(backgrounds),
            overlaps,
            matches,
        }
    }
}

/// Scans chunks of regions against every motif.
///
/// The scanner holds only shared references, so one instance is used by
/// every scanning thread.
pub struct ChunkScanner<'a> {
    motifs: &'a MotifSet,
    genome: &'a dyn SequenceProvider,
    conditions: &'a [Condition],
    router: &'a WriterRouter,
    stride: usize,
    gc_window: usize,
}

impl<'a> ChunkScanner<'a> {
    /// Create a new chunk scanner.
    pub fn new(
        motifs: &'a MotifSet,
        genome: &'a dyn SequenceProvider,
        conditions: &'a [Condition],
        router: &'a WriterRouter,
    ) -> Self {
        Self {
            motifs,
            genome,
            conditions,
            router,
            stride: 50,
            gc_window: 50,
        }
    }

    /// Set the distance between two background samples.
    pub fn stride(&mut self, stride: usize) -> &mut Self {
        self.stride = stride.max(1);
        self
    }

    /// Set the width of the window used for local GC content.
    pub fn gc_window(&mut self, gc_window: usize) -> &mut Self {
        self.gc_window = gc_window.max(1);
        self
    }

    /// Scan every region of a chunk.
    ///
    /// Matches are sent to the writer router as each region completes;
    /// the background sample and overlap counts are returned.
    pub fn scan(&self, chunk: &[Region]) -> Result<ChunkFragment, Error> {
        let mut readers = self
            .conditions
            .iter()
            .map(Condition::open)
            .collect::<Result<Vec<_>, _>>()?;
        let mut fragment = ChunkFragment::default();
        for region in chunk {
            let records = self.scan_region(region, &mut readers, &mut fragment.background)?;
            fragment.overlaps.add_region(&records);
            fragment.matches += records.len() as u64;
            if !records.is_empty() {
                self.router.send(records)?;
            }
        }
        Ok(fragment)
    }

    fn scan_region(
        &self,
        region: &Region,
        readers: &mut [Box<dyn SignalReader + 'a>],
        background: &mut BackgroundSample,
    ) -> Result<Vec<MatchRecord>, Error> {
        let sequence = self.genome.fetch(&region.chrom, region.start, region.end)?;
        let length = sequence.len();
        let profile = GcProfile::new(sequence);

        // per-base signal of every condition over the region
        let mut signals = Vec::with_capacity(readers.len());
        for (reader, condition) in readers.iter_mut().zip(self.conditions) {
            let mut values = reader
                .values(&region.chrom, region.start, region.end)
                .map_err(|e| condition.annotate(e))?;
            values.resize(length, 0.0);
            values.iter_mut().filter(|x| x.is_nan()).for_each(|x| *x = 0.0);
            signals.push(values);
        }

        for pos in (0..length).step_by(self.stride) {
            background.push(
                &region.chrom,
                region.start + pos as u64,
                profile.fraction(pos, self.gc_window),
                signals.iter().map(|s| s[pos]).collect(),
            );
        }

        let encoded = EncodedSequence::<Dna>::encode_lossy(sequence);
        let mut striped = encoded.to_striped();
        striped.configure_wrap(self.motifs.max_len());

        let mut records = Vec::new();
        for motif in self.motifs.iter() {
            let m = motif.len();
            if m > length {
                continue;
            }
            for variant in motif.variants() {
                let mut scanner = Scanner::new(variant.pssm(), &striped);
                scanner.threshold(variant.threshold());
                for hit in scanner {
                    let pos = hit.position();
                    // hits in the wrapping rows are not real windows
                    if pos + m > length {
                        continue;
                    }
                    records.push(MatchRecord {
                        chrom: region.chrom.clone(),
                        start: region.start + pos as u64,
                        end: region.start + (pos + m) as u64,
                        tf: Arc::clone(variant.name()),
                        score: hit.score(),
                        strand: variant.strand,
                        gc: profile.fraction(pos + m / 2, self.gc_window),
                        signals: signals.iter().map(|s| window_mean(&s[pos..pos + m])).collect(),
                        peak: region.clone(),
                    });
                }
            }
        }

        records.sort_by(|x, y| {
            x.start
                .cmp(&y.start)
                .then_with(|| x.tf.cmp(&y.tf))
                .then_with(|| x.strand.cmp(&y.strand))
        });
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use lightmotif::pwm::CountMatrix;

    use super::*;
    use crate::config::Naming;
    use crate::genome::Genome;
    use crate::motif::MotifRecord;
    use crate::motif::Strand;
    use crate::signal::SignalMap;
    use crate::writer::stream_path;

    fn motifs() -> MotifSet {
        let sites = ["GATTACA", "GATTACA", "GATTACA"];
        let counts = CountMatrix::<Dna>::from_sequences(
            sites.iter().map(|s| EncodedSequence::<Dna>::encode(s).unwrap()),
        )
        .unwrap();
        let record = MotifRecord::new("M1", Some("GATA".into()), counts);
        MotifSet::prepare(vec![record], Naming::Name, 0.5, 1e-3).unwrap()
    }

    #[test]
    fn scan_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let motifs = motifs();
        let mut genome = Genome::new();
        // forward site at 10, reverse-complement site (TGTAATC) at 40
        let mut sequence = "C".repeat(100).into_bytes();
        sequence[10..17].copy_from_slice(b"GATTACA");
        sequence[40..47].copy_from_slice(b"TGTAATC");
        genome.insert("chr1", &sequence);

        let mut values = HashMap::new();
        values.insert("chr1".to_string(), vec![2.0; 100]);
        let conditions = vec![Condition::new("a", SignalMap::new(values))];

        let router = WriterRouter::start(dir.path(), &motifs.names(), 1, 8).unwrap();
        let regions = vec![Region::new("chr1", 0, 100)];
        let fragment = {
            let mut scanner = ChunkScanner::new(&motifs, &genome, &conditions, &router);
            scanner.stride(10).gc_window(10);
            scanner.scan(&regions).unwrap()
        };
        router.finish().unwrap();

        assert_eq!(fragment.matches, 2);
        assert_eq!(fragment.background.len(), 10);
        assert_eq!(fragment.overlaps.sites("GATA"), 2);

        let text = std::fs::read_to_string(stream_path(dir.path(), "GATA")).unwrap();
        let records = text
            .lines()
            .map(|l| MatchRecord::parse_tsv(l, 1).unwrap())
            .collect::<Vec<_>>();
        assert_eq!(records.len(), 2);
        assert_eq!((records[0].start, records[0].strand), (10, Strand::Forward));
        assert_eq!((records[1].start, records[1].strand), (40, Strand::Reverse));
        assert_eq!(records[0].signals, vec![2.0]);
    }
}
