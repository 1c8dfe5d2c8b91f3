//! Progress reporting for parallel phases.

use indicatif::ProgressBar;
use indicatif::ProgressDrawTarget;
use indicatif::ProgressStyle;
use log::info;

/// Reports the completion of a fixed number of tasks.
///
/// The monitor only observes: it never changes how tasks are scheduled,
/// and it has no notion of a timeout.
pub struct Monitor {
    label: String,
    bar: ProgressBar,
    total: usize,
    done: usize,
    reported: usize,
}

impl Monitor {
    /// Create a monitor for `total` tasks, drawing a bar when `visible`.
    pub fn new<L: Into<String>>(label: L, total: usize, visible: bool) -> Self {
        let bar = ProgressBar::new(total as u64);
        if visible {
            if let Ok(style) = ProgressStyle::with_template(
                "[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}",
            ) {
                bar.set_style(style);
            }
        } else {
            bar.set_draw_target(ProgressDrawTarget::hidden());
        }
        let label = label.into();
        bar.set_message(label.clone());
        Self {
            label,
            bar,
            total,
            done: 0,
            reported: 0,
        }
    }

    /// Record the completion of one task.
    pub fn inc(&mut self) {
        self.done += 1;
        self.bar.inc(1);
        // log roughly every tenth of the work
        let step = (self.total / 10).max(1);
        if self.done == self.total || self.done >= self.reported + step {
            self.reported = self.done;
            info!("{}: {}/{} tasks done", self.label, self.done, self.total);
        }
    }

    /// Redraw the bar while waiting for tasks.
    pub fn tick(&self) {
        self.bar.tick();
    }

    /// Get the number of completed tasks.
    pub fn done(&self) -> usize {
        self.done
    }

    /// Clear the bar.
    pub fn finish(self) {
        self.bar.finish_and_clear();
    }
}
