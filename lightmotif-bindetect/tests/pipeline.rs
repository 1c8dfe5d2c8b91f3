use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use lightmotif::abc::Dna;
use lightmotif::pwm::CountMatrix;
use lightmotif::seq::EncodedSequence;
use lightmotif_bindetect::pipeline::DISTANCE_FILE;
use lightmotif_bindetect::pipeline::RESULTS_FILE;
use lightmotif_bindetect::BinDetect;
use lightmotif_bindetect::Condition;
use lightmotif_bindetect::Config;
use lightmotif_bindetect::Error;
use lightmotif_bindetect::Genome;
use lightmotif_bindetect::MotifRecord;
use lightmotif_bindetect::Naming;
use lightmotif_bindetect::Region;
use lightmotif_bindetect::RegionList;
use lightmotif_bindetect::SignalMap;
use lightmotif_bindetect::SignalReader;
use lightmotif_bindetect::SignalTrack;
use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;
use rand_distr::Distribution;
use rand_distr::LogNormal;

const REGIONS: u64 = 100;
const SPACING: u64 = 400;
const PRESENT: &str = "GATA_MA0001.1";
const ABSENT: &str = "POLYG_MA0002.1";

struct Fixture {
    genome: Genome,
    regions: RegionList,
    signals: Vec<SignalMap>,
}

impl Fixture {
    fn new(conditions: usize) -> Self {
        let mut rng = StdRng::seed_from_u64(42);
        let length = (REGIONS * SPACING + 100) as usize;

        // no G anywhere except in the planted sites
        let mut sequence = (0..length)
            .map(|_| b"ACT"[rng.gen_range(0..3)])
            .collect::<Vec<u8>>();
        let mut regions = Vec::new();
        for i in 0..REGIONS {
            let start = i * SPACING + 50;
            for offset in [40, 200] {
                let pos = (start + offset) as usize;
                sequence[pos..pos + 7].copy_from_slice(b"GATTACA");
            }
            regions.push(Region::new("chr1", start, start + 300));
        }
        let mut genome = Genome::new();
        genome.insert("chr1", sequence);

        let signals = (0..conditions)
            .map(|_| {
                let dist = LogNormal::new(0.0, 0.5).unwrap();
                let values = (0..length)
                    .map(|_| dist.sample(&mut rng) as f32)
                    .collect::<Vec<f32>>();
                let mut map = HashMap::new();
                map.insert("chr1".to_string(), values);
                SignalMap::new(map)
            })
            .collect();

        Self {
            genome,
            regions: RegionList::new(regions),
            signals,
        }
    }

    fn conditions(&self) -> Vec<Condition> {
        self.signals
            .iter()
            .enumerate()
            .map(|(i, s)| Condition::new(format!("cond{}", i + 1), s.clone()))
            .collect()
    }
}

/// A track failing to read the region starting at `fail_at`.
struct FaultyTrack {
    inner: SignalMap,
    fail_at: u64,
}

impl SignalTrack for FaultyTrack {
    fn open(&self) -> Result<Box<dyn SignalReader + '_>, Error> {
        Ok(Box::new(FaultyReader {
            inner: self.inner.open()?,
            fail_at: self.fail_at,
        }))
    }
}

struct FaultyReader<'a> {
    inner: Box<dyn SignalReader + 'a>,
    fail_at: u64,
}

impl SignalReader for FaultyReader<'_> {
    fn values(&mut self, chrom: &str, start: u64, end: u64) -> Result<Vec<f32>, Error> {
        if start == self.fail_at {
            let error = std::io::Error::new(std::io::ErrorKind::InvalidData, "corrupted block");
            return Err(error.into());
        }
        self.inner.values(chrom, start, end)
    }
}

fn motifs() -> Vec<MotifRecord> {
    let matrix = |site: &str| {
        CountMatrix::<Dna>::from_sequences(
            std::iter::repeat(site)
                .take(10)
                .map(|s| EncodedSequence::<Dna>::encode(s).unwrap()),
        )
        .unwrap()
    };
    vec![
        MotifRecord::new("MA0001.1", Some("GATA".into()), matrix("GATTACA")),
        MotifRecord::new("MA0002.1", Some("POLYG".into()), matrix("GGGGGGGG")),
    ]
}

fn config(outdir: &Path) -> Config {
    Config {
        outdir: outdir.to_path_buf(),
        jobs: 3,
        writers: 2,
        split: 10,
        motif_pvalue: 1e-3,
        naming: Naming::NameId,
        background_stride: 10,
        ..Default::default()
    }
}

fn count_lines(path: &Path) -> usize {
    std::fs::read_to_string(path).unwrap().lines().count()
}

#[test]
fn two_conditions() {
    let fixture = Fixture::new(2);
    let dir = tempfile::tempdir().unwrap();
    let report = BinDetect::new(
        config(dir.path()),
        &fixture.genome,
        fixture.regions.clone(),
        fixture.conditions(),
    )
    .run(motifs())
    .unwrap();

    assert_eq!(report.thresholds.len(), 2);
    assert!(report.pseudocount > 0.0);
    assert_eq!(report.table.rows().len(), 2);

    let present = report.table.row(PRESENT).unwrap();
    assert!(present.total >= 2 * REGIONS, "{}", present.total);
    assert_eq!(present.bound.len(), 2);
    assert!(present.bound.iter().all(|&b| b <= present.total));
    assert_eq!(present.changes.len(), 1);
    assert!(present.changes[0].is_finite());
    assert!((0.0..=1.0).contains(&present.pvalues[0]));

    let absent = report.table.row(ABSENT).unwrap();
    assert_eq!(absent.total, 0);
    assert_eq!(absent.bound, vec![0, 0]);
    assert!(absent.changes[0].is_nan());

    // per-TF outputs
    let beds = dir.path().join(PRESENT).join("beds");
    let all = count_lines(&beds.join(format!("{}_all.bed", PRESENT)));
    assert_eq!(all as u64, present.total);
    for (i, condition) in ["cond1", "cond2"].iter().enumerate() {
        let bound = count_lines(&beds.join(format!("{}_{}_bound.bed", PRESENT, condition)));
        let unbound = count_lines(&beds.join(format!("{}_{}_unbound.bed", PRESENT, condition)));
        assert_eq!(bound as u64, present.bound[i]);
        assert_eq!((bound + unbound) as u64, present.total);
    }
    let overview = dir
        .path()
        .join(PRESENT)
        .join(format!("{}_overview.txt", PRESENT));
    assert_eq!(count_lines(&overview) as u64, present.total + 1);
    assert!(!beds.join(format!("{}.tmp", PRESENT)).exists());

    // global outputs
    assert_eq!(count_lines(&dir.path().join(RESULTS_FILE)), 3);
    let distances = report.distances.unwrap();
    assert_eq!(distances.get(0, 0), 0.0);
    assert_eq!(distances.get(0, 1), 1.0);
    assert_eq!(count_lines(&dir.path().join(DISTANCE_FILE)), 3);
}

#[test]
fn single_condition() {
    let fixture = Fixture::new(1);
    let dir = tempfile::tempdir().unwrap();
    let report = BinDetect::new(
        config(dir.path()),
        &fixture.genome,
        fixture.regions.clone(),
        fixture.conditions(),
    )
    .run(motifs())
    .unwrap();

    assert!(report.distances.is_none());
    assert!(!dir.path().join(DISTANCE_FILE).exists());
    let header = report.table.header();
    assert!(!header.iter().any(|h| h.ends_with("_change")));
    assert!(!header.iter().any(|h| h.ends_with("_pvalue")));
    assert!(header.iter().any(|h| h == "cond1_bound"));
    for row in report.table.rows() {
        assert!(row.changes.is_empty());
        assert!(row.pvalues.is_empty());
    }
}

#[test]
fn degenerate_background() {
    let mut fixture = Fixture::new(2);
    let mut zeros = HashMap::new();
    zeros.insert(
        "chr1".to_string(),
        vec![0.0; (REGIONS * SPACING + 100) as usize],
    );
    fixture.signals[1] = SignalMap::new(zeros);

    let dir = tempfile::tempdir().unwrap();
    let err = BinDetect::new(
        config(dir.path()),
        &fixture.genome,
        fixture.regions.clone(),
        fixture.conditions(),
    )
    .run(motifs())
    .unwrap_err();
    match err {
        Error::DegenerateBackground { condition } => assert_eq!(condition, "cond2"),
        other => panic!("unexpected error: {}", other),
    }

    // no aggregation output was produced
    assert!(!dir.path().join(RESULTS_FILE).exists());
    let all = dir
        .path()
        .join(PRESENT)
        .join("beds")
        .join(format!("{}_all.bed", PRESENT));
    assert!(!all.exists());
}

#[test]
fn idempotent() {
    let fixture = Fixture::new(2);
    let run = |dir: &Path, jobs: usize| {
        let mut config = config(dir);
        config.jobs = jobs;
        BinDetect::new(
            config,
            &fixture.genome,
            fixture.regions.clone(),
            fixture.conditions(),
        )
        .run(motifs())
        .unwrap()
    };

    let d1 = tempfile::tempdir().unwrap();
    let d2 = tempfile::tempdir().unwrap();
    let r1 = run(d1.path(), 1);
    let r2 = run(d2.path(), 4);
    assert_eq!(r1.thresholds, r2.thresholds);
    assert_eq!(r1.pseudocount, r2.pseudocount);
    assert_eq!(r1.distances, r2.distances);

    let read = |dir: &Path, name: &str| std::fs::read_to_string(dir.join(name)).unwrap();
    assert_eq!(read(d1.path(), RESULTS_FILE), read(d2.path(), RESULTS_FILE));
    let overview = format!("{}/{}_overview.txt", PRESENT, PRESENT);
    assert_eq!(read(d1.path(), &overview), read(d2.path(), &overview));

    // running again in the same directory replaces the outputs
    let r3 = run(d1.path(), 2);
    assert_eq!(r1.thresholds, r3.thresholds);
    assert_eq!(read(d1.path(), RESULTS_FILE), read(d2.path(), RESULTS_FILE));
}

#[test]
fn invalid_inputs() {
    let fixture = Fixture::new(2);
    let dir = tempfile::tempdir().unwrap();

    let mut conditions = fixture.conditions();
    conditions.push(Condition::new("cond1", fixture.signals[0].clone()));
    let err = BinDetect::new(
        config(dir.path()),
        &fixture.genome,
        fixture.regions.clone(),
        conditions,
    )
    .run(motifs())
    .unwrap_err();
    assert!(matches!(err, Error::InvalidConfig(_)));

    let regions = RegionList::new(vec![Region::new("chrX", 0, 100)]);
    let err = BinDetect::new(
        config(dir.path()),
        &fixture.genome,
        regions,
        fixture.conditions(),
    )
    .run(motifs())
    .unwrap_err();
    assert!(matches!(err, Error::UnknownChromosome(_)));

    let err = BinDetect::new(
        config(dir.path()),
        &fixture.genome,
        fixture.regions.clone(),
        fixture.conditions(),
    )
    .run(Vec::new())
    .unwrap_err();
    assert!(matches!(err, Error::InvalidConfig(_)));
}

#[test]
fn failing_signal() {
    let fixture = Fixture::new(2);
    let dir = tempfile::tempdir().unwrap();
    let outdir = dir.path().to_path_buf();
    let (s, r) = crossbeam_channel::bounded(1);
    std::thread::spawn(move || {
        let conditions = vec![
            Condition::new("cond1", fixture.signals[0].clone()),
            Condition::new(
                "cond2",
                FaultyTrack {
                    inner: fixture.signals[1].clone(),
                    fail_at: 50 * SPACING + 50,
                },
            ),
        ];
        let result = BinDetect::new(
            config(&outdir),
            &fixture.genome,
            fixture.regions.clone(),
            conditions,
        )
        .run(motifs());
        let _ = s.send(result);
    });

    let result = r
        .recv_timeout(Duration::from_secs(120))
        .expect("run did not return after a signal failure");
    match result {
        Err(Error::Signal { condition, reason }) => {
            assert_eq!(condition, "cond2");
            assert!(reason.contains("corrupted block"), "{}", reason);
        }
        Err(other) => panic!("unexpected error: {}", other),
        Ok(_) => panic!("run succeeded despite a signal failure"),
    }
    assert!(!dir.path().join(RESULTS_FILE).exists());
    assert!(!dir.path().join(DISTANCE_FILE).exists());
}
