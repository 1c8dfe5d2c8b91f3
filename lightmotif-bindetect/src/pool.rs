//! A scoped worker pool for the parallel phases of the pipeline.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use crossbeam_channel::RecvTimeoutError;
use log::debug;

use crate::err::Error;
use crate::monitor::Monitor;

/// Run `task` over every item of `tasks` on `jobs` threads.
///
/// Results are returned in the order of `tasks`. The first error aborts
/// the run: tasks not started yet are skipped, and the error is returned
/// once every thread has been joined. A panicking task is reported as
/// [`Error::WorkerPanicked`].
pub fn run<T, R, F>(
    label: &str,
    tasks: Vec<T>,
    jobs: usize,
    progress: bool,
    task: F,
) -> Result<Vec<R>, Error>
where
    T: Send,
    R: Send,
    F: Fn(usize, T) -> Result<R, Error> + Sync,
{
    let total = tasks.len();
    let jobs = jobs.max(1).min(total.max(1));

    // queue every task followed by one poison pill per thread
    let (s_task, r_task) = crossbeam_channel::unbounded();
    for item in tasks.into_iter().enumerate() {
        let _ = s_task.send(Some(item));
    }
    for _ in 0..jobs {
        let _ = s_task.send(None);
    }
    drop(s_task);

    let (s_result, r_result) = crossbeam_channel::unbounded();
    let abort = AtomicBool::new(false);
    let task = &task;
    let abort = &abort;

    debug!("Starting {} threads for {} tasks ({})", jobs, total, label);
    std::thread::scope(|scope| {
        let handles = (0..jobs)
            .map(|_| {
                let r_task = r_task.clone();
                let s_result = s_result.clone();
                scope.spawn(move || loop {
                    let (i, item) = match r_task.recv() {
                        Ok(Some(item)) => item,
                        Ok(None) | Err(_) => return,
                    };
                    if abort.load(Ordering::Relaxed) {
                        continue;
                    }
                    let result = task(i, item);
                    if result.is_err() {
                        abort.store(true, Ordering::Relaxed);
                    }
                    if s_result.send((i, result)).is_err() {
                        return;
                    }
                })
            })
            .collect::<Vec<_>>();
        drop(s_result);

        let mut monitor = Monitor::new(label, total, progress);
        let mut results = (0..total).map(|_| None).collect::<Vec<Option<R>>>();
        let mut error = None;
        loop {
            match r_result.recv_timeout(Duration::from_millis(100)) {
                Ok((i, Ok(result))) => {
                    results[i] = Some(result);
                    monitor.inc();
                }
                Ok((_, Err(e))) => {
                    error.get_or_insert(e);
                }
                Err(RecvTimeoutError::Timeout) => monitor.tick(),
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        monitor.finish();

        for handle in handles {
            if let Err(panic) = handle.join() {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error.get_or_insert(Error::WorkerPanicked(format!("{}: {}", label, message)));
            }
        }

        match error {
            Some(e) => Err(e),
            None => results
                .into_iter()
                .collect::<Option<Vec<R>>>()
                .ok_or_else(|| Error::WorkerPanicked(format!("{}: missing task result", label))),
        }
    })
}
