use std::collections::BTreeMap;
use std::sync::Arc;

use lightmotif_bindetect::motif::Strand;
use lightmotif_bindetect::pool;
use lightmotif_bindetect::record::MatchRecord;
use lightmotif_bindetect::writer::stream_path;
use lightmotif_bindetect::writer::WriterRouter;
use lightmotif_bindetect::Region;

const TFS: &[&str] = &["ATF1", "CTCF", "FOXA1", "GATA1", "JUN", "MYC", "SP1"];

fn record(tf: &Arc<str>, task: usize, i: usize) -> MatchRecord {
    MatchRecord {
        chrom: Arc::from("chr1"),
        start: (task * 1000 + i) as u64,
        end: (task * 1000 + i + 8) as u64,
        tf: tf.clone(),
        score: 7.5,
        strand: if i % 2 == 0 {
            Strand::Forward
        } else {
            Strand::Reverse
        },
        gc: 0.4,
        signals: vec![1.0, 2.0],
        peak: Region::new("chr1", 0, 100_000),
    }
}

#[test]
fn exactly_once() {
    let tfs = TFS.iter().map(|&tf| Arc::from(tf)).collect::<Vec<Arc<str>>>();
    for jobs in 1..=4 {
        for writers in 1..=3 {
            let dir = tempfile::tempdir().unwrap();
            let router = WriterRouter::start(dir.path(), &tfs, writers, 2).unwrap();
            let tasks = (0..20).collect::<Vec<usize>>();
            pool::run("test", tasks, jobs, false, |_, task| {
                for i in 0..task + 1 {
                    // every TF gets `task + 1` records from this task
                    let batch = tfs.iter().map(|tf| record(tf, task, i)).collect();
                    router.send(batch)?;
                }
                Ok(())
            })
            .unwrap();
            let counts = router.finish().unwrap();

            let expected = (0..20).map(|t| t as u64 + 1).sum::<u64>();
            let counts = counts.into_iter().collect::<BTreeMap<_, _>>();
            assert_eq!(counts.len(), tfs.len());
            for tf in tfs.iter() {
                assert_eq!(counts[tf], expected, "jobs={} writers={}", jobs, writers);
                let text = std::fs::read_to_string(stream_path(dir.path(), tf)).unwrap();
                let mut starts = text
                    .lines()
                    .map(|line| MatchRecord::parse_tsv(line, 2).unwrap())
                    .inspect(|r| assert_eq!(&r.tf, tf))
                    .map(|r| r.start)
                    .collect::<Vec<_>>();
                assert_eq!(starts.len() as u64, expected);
                starts.sort();
                starts.dedup();
                assert_eq!(starts.len() as u64, expected);
            }
        }
    }
}

#[test]
fn arrival_order_per_task() {
    let tfs = vec![Arc::<str>::from("CTCF")];
    let dir = tempfile::tempdir().unwrap();
    let router = WriterRouter::start(dir.path(), &tfs, 2, 1).unwrap();
    pool::run("test", vec![0usize, 1, 2], 3, false, |_, task| {
        for i in 0..50 {
            router.send(vec![record(&tfs[0], task, i)])?;
        }
        Ok(())
    })
    .unwrap();
    router.finish().unwrap();

    // records of one producer stay in the order they were sent
    let text = std::fs::read_to_string(stream_path(dir.path(), "CTCF")).unwrap();
    let records = text
        .lines()
        .map(|line| MatchRecord::parse_tsv(line, 2).unwrap())
        .collect::<Vec<_>>();
    for task in 0..3u64 {
        let starts = records
            .iter()
            .map(|r| r.start)
            .filter(|s| s / 1000 == task)
            .collect::<Vec<_>>();
        assert_eq!(starts, (0..50).map(|i| task * 1000 + i).collect::<Vec<_>>());
    }
}
