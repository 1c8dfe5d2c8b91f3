//! Single-writer routing of match records to per-TF files.
//!
//! Every TF is assigned to exactly one writer thread, round-robin in the
//! order the TFs are given. A writer owns one output stream per TF it was
//! assigned, and appends the records it receives in arrival order. Scan
//! workers never touch the files: they only push batches into the bounded
//! queue of the writer owning the batch's TF, blocking when it is full.

use std::fs::File;
use std::io::BufWriter;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::Receiver;
use crossbeam_channel::Sender;
use fnv::FnvHashMap;
use log::debug;

use crate::err::Error;
use crate::record::MatchRecord;

/// Get the directory holding the BED files of a TF.
pub fn beds_dir(outdir: &Path, tf: &str) -> PathBuf {
    outdir.join(tf).join("beds")
}

/// Get the path of the match stream of a TF.
pub fn stream_path(outdir: &Path, tf: &str) -> PathBuf {
    beds_dir(outdir, tf).join(format!("{}.tmp", tf))
}

// --- Message -----------------------------------------------------------------

enum Message {
    Records(Vec<MatchRecord>),
    Shutdown,
}

// --- WriterThread ------------------------------------------------------------

struct WriterThread {
    index: usize,
    tfs: Vec<(Arc<str>, PathBuf)>,
    r_message: Receiver<Message>,
}

impl WriterThread {
    fn start(self) -> JoinHandle<Result<Vec<(Arc<str>, u64)>, Error>> {
        std::thread::spawn(move || self.run())
    }

    fn run(self) -> Result<Vec<(Arc<str>, u64)>, Error> {
        let mut streams = FnvHashMap::default();
        for (tf, path) in self.tfs.iter() {
            let file = File::create(path).map_err(|e| Error::file(path, e))?;
            streams.insert(tf.clone(), (BufWriter::new(file), path, 0u64));
        }
        debug!("Writer {} opened {} streams", self.index, streams.len());

        loop {
            let records = match self.r_message.recv() {
                Ok(Message::Records(records)) => records,
                Ok(Message::Shutdown) | Err(_) => break,
            };
            for record in records {
                let (writer, path, count) = streams
                    .get_mut(&record.tf)
                    .ok_or_else(|| Error::WriterClosed {
                        tf: record.tf.to_string(),
                    })?;
                record
                    .write_tsv(&mut *writer)
                    .map_err(|e| Error::file(path.as_path(), e))?;
                *count += 1;
            }
        }

        let mut counts = Vec::with_capacity(streams.len());
        for (tf, _) in self.tfs.iter() {
            if let Some((mut writer, path, count)) = streams.remove(tf) {
                writer.flush().map_err(|e| Error::file(path.as_path(), e))?;
                counts.push((tf.clone(), count));
            }
        }
        debug!("Writer {} closed its streams", self.index);
        Ok(counts)
    }
}

// --- WriterRouter ------------------------------------------------------------

/// Routes match records from any number of producers to their writer.
pub struct WriterRouter {
    routes: FnvHashMap<Arc<str>, usize>,
    senders: Vec<Sender<Message>>,
    handles: Vec<JoinHandle<Result<Vec<(Arc<str>, u64)>, Error>>>,
}

impl WriterRouter {
    /// Start `writers` writer threads owning the streams of `tfs`.
    ///
    /// The output directory of every TF is created before any thread is
    /// started. Each writer queue holds at most `capacity` batches.
    pub fn start(
        outdir: &Path,
        tfs: &[Arc<str>],
        writers: usize,
        capacity: usize,
    ) -> Result<Self, Error> {
        let writers = writers.max(1);
        let mut routes = FnvHashMap::default();
        let mut assigned = (0..writers).map(|_| Vec::new()).collect::<Vec<_>>();
        for (i, tf) in tfs.iter().enumerate() {
            let dir = beds_dir(outdir, tf);
            std::fs::create_dir_all(&dir).map_err(|e| Error::file(&dir, e))?;
            routes.insert(tf.clone(), i % writers);
            assigned[i % writers].push((tf.clone(), stream_path(outdir, tf)));
        }

        let mut senders = Vec::with_capacity(writers);
        let mut handles = Vec::with_capacity(writers);
        for (index, tfs) in assigned.into_iter().enumerate() {
            let (s_message, r_message) = crossbeam_channel::bounded(capacity.max(1));
            let thread = WriterThread {
                index,
                tfs,
                r_message,
            };
            handles.push(thread.start());
            senders.push(s_message);
        }
        debug!("Started {} writers for {} TFs", writers, tfs.len());

        Ok(Self {
            routes,
            senders,
            handles,
        })
    }

    /// Get the index of the writer owning a TF.
    pub fn route(&self, tf: &str) -> Option<usize> {
        self.routes.get(tf).copied()
    }

    /// Get the number of writer threads.
    pub fn writers(&self) -> usize {
        self.senders.len()
    }

    /// Send a batch of records to their owning writers.
    ///
    /// Records of the same TF keep their relative order.
    pub fn send(&self, records: Vec<MatchRecord>) -> Result<(), Error> {
        let mut batches = (0..self.senders.len())
            .map(|_| Vec::new())
            .collect::<Vec<_>>();
        for record in records {
            let route = self.route(&record.tf).ok_or_else(|| Error::WriterClosed {
                tf: record.tf.to_string(),
            })?;
            batches[route].push(record);
        }
        for (sender, batch) in self.senders.iter().zip(batches) {
            if let Some(tf) = batch.first().map(|r| r.tf.to_string()) {
                sender
                    .send(Message::Records(batch))
                    .map_err(|_| Error::WriterClosed { tf })?;
            }
        }
        Ok(())
    }

    /// Shut down every writer and wait for their streams to be closed.
    ///
    /// Must only be called once every producer is done sending. Returns
    /// the number of records written for each TF, grouped by writer.
    pub fn finish(self) -> Result<Vec<(Arc<str>, u64)>, Error> {
        for sender in self.senders.iter() {
            // a writer that already stopped has reported its error
            let _ = sender.send(Message::Shutdown);
        }
        drop(self.senders);

        let mut error = None;
        let mut counts = Vec::new();
        for handle in self.handles {
            match handle.join() {
                Ok(Ok(c)) => counts.extend(c),
                Ok(Err(e)) => {
                    error.get_or_insert(e);
                }
                Err(_) => {
                    error.get_or_insert(Error::WorkerPanicked("writer".into()));
                }
            }
        }
        match error {
            Some(e) => Err(e),
            None => Ok(counts),
        }
    }
}
