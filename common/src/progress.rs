use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use tracing::instrument;

#[derive(Debug, Default)]
pub struct Counter {
    count: AtomicU64,
}

impl Counter {
    pub fn add(&self, value: u64) {
        self.count.fetch_add(value, Ordering::Relaxed);
    }

    pub fn inc(&self) {
        self.add(1);
    }

    pub fn get(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

/// Weighted work counters of one sync run.
///
/// `total` grows while the plan is built and `completed` while it executes; both only ever
/// move through atomic adds. A run owns one `Progress` and discards it at the end.
#[derive(Debug)]
pub struct Progress {
    total: AtomicI64,
    completed: AtomicI64,
    pub bytes_transferred: Counter,
    pub files_transferred: Counter,
    pub directories_created: Counter,
    pub directories_existing: Counter,
    pub files_skipped: Counter,
    pub files_removed: Counter,
    pub directories_removed: Counter,
    pub items_failed: Counter,
    start_time: std::time::Instant,
}

pub struct Status {
    pub total: i64,
    pub completed: i64,
}

impl Status {
    /// Percentage done, `None` while there is no known work.
    pub fn percent(&self) -> Option<u8> {
        if self.total <= 0 {
            return None;
        }
        let percent = (self.completed.clamp(0, self.total) * 100) / self.total;
        u8::try_from(percent).ok()
    }
}

impl Progress {
    pub fn new() -> Self {
        Self {
            total: AtomicI64::new(0),
            completed: AtomicI64::new(0),
            bytes_transferred: Default::default(),
            files_transferred: Default::default(),
            directories_created: Default::default(),
            directories_existing: Default::default(),
            files_skipped: Default::default(),
            files_removed: Default::default(),
            directories_removed: Default::default(),
            items_failed: Default::default(),
            start_time: std::time::Instant::now(),
        }
    }

    pub fn add_total(&self, units: i64) {
        self.total.fetch_add(units, Ordering::AcqRel);
    }

    pub fn advance(&self, units: i64) {
        self.completed.fetch_add(units, Ordering::AcqRel);
    }

    #[instrument(skip(self))]
    pub fn get(&self) -> Status {
        let status = Status {
            total: self.total.load(Ordering::Acquire),
            completed: self.completed.load(Ordering::Acquire),
        };
        if status.completed > status.total {
            tracing::debug!(
                "Progress inversion - total: {}, completed {}",
                status.total,
                status.completed
            );
        }
        status
    }

    /// Percentage done, `None` means indeterminate (nothing planned yet).
    pub fn percent(&self) -> Option<u8> {
        self.get().percent()
    }

    pub fn get_duration(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::new()
    }
}

/// Progress of a single planned item.
///
/// Byte callbacks report the cumulative count of the current attempt. Only the part above the
/// highest count seen so far is added, so a transfer that restarts from zero is not counted
/// twice. [`ItemProgress::complete`] then tops the item up to its full planned weight.
#[derive(Debug, Clone)]
pub struct ItemProgress {
    progress: Arc<Progress>,
    weight: i64,
    reported: Arc<AtomicU64>,
}

impl ItemProgress {
    pub fn new(progress: Arc<Progress>, weight: i64) -> Self {
        Self {
            progress,
            weight,
            reported: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn weight(&self) -> i64 {
        self.weight
    }

    pub fn update(&self, cumulative_bytes: u64) {
        let previous = self.reported.fetch_max(cumulative_bytes, Ordering::AcqRel);
        if cumulative_bytes > previous {
            let delta = cumulative_bytes - previous;
            self.progress.bytes_transferred.add(delta);
            self.progress
                .advance(i64::try_from(delta).unwrap_or(i64::MAX));
        }
    }

    pub fn reported_bytes(&self) -> u64 {
        self.reported.load(Ordering::Acquire)
    }

    /// Credit whatever is left of the item's weight.
    pub fn complete(&self) {
        let reported = i64::try_from(self.reported_bytes()).unwrap_or(i64::MAX);
        let remaining = self.weight - reported;
        if remaining > 0 {
            self.progress.advance(remaining);
        }
    }
}

pub struct ProgressPrinter<'a> {
    progress: &'a Progress,
    last_completed: i64,
    last_bytes: u64,
    last_update: std::time::Instant,
}

impl<'a> ProgressPrinter<'a> {
    pub fn new(progress: &'a Progress) -> Self {
        Self {
            progress,
            last_completed: progress.get().completed,
            last_bytes: progress.bytes_transferred.get(),
            last_update: std::time::Instant::now(),
        }
    }

    pub fn print(&mut self) -> String {
        let time_now = std::time::Instant::now();
        let status = self.progress.get();
        let total_duration_secs = self.progress.get_duration().as_secs_f64();
        let curr_duration_secs = (time_now - self.last_update).as_secs_f64();
        let bytes = self.progress.bytes_transferred.get();
        let average_bytes_rate = bytes as f64 / total_duration_secs;
        let current_bytes_rate = (bytes - self.last_bytes) as f64 / curr_duration_secs;
        let current_units_rate = (status.completed - self.last_completed) as f64 / curr_duration_secs;
        self.last_completed = status.completed;
        self.last_bytes = bytes;
        self.last_update = time_now;
        let percent = status
            .percent()
            .map_or_else(|| "indeterminate".to_string(), |p| format!("{p}%"));
        format!(
            "-----------------------\n\
            PROGRESS: {:>10}\n\
            work:     {:>10} / {}\n\
            current:  {:>10.2} units/s\n\
            -----------------------\n\
            TRANSFERRED:\n\
            average: {:>10}/s\n\
            current: {:>10}/s\n\
            total:   {:>10}\n\
            \n\
            files:       {:>10}\n\
            directories: {:>10}\n\
            -----------------------\n\
            UNCHANGED:\n\
            newer at destination: {:>10}\n\
            directories existing: {:>10}\n\
            -----------------------\n\
            REMOVED:\n\
            files:       {:>10}\n\
            directories: {:>10}\n\
            -----------------------\n\
            FAILED:      {:>10}",
            percent,
            status.completed,
            status.total,
            current_units_rate,
            bytesize::ByteSize(average_bytes_rate as u64),
            bytesize::ByteSize(current_bytes_rate as u64),
            bytesize::ByteSize(bytes),
            self.progress.files_transferred.get(),
            self.progress.directories_created.get(),
            self.progress.files_skipped.get(),
            self.progress.directories_existing.get(),
            self.progress.files_removed.get(),
            self.progress.directories_removed.get(),
            self.progress.items_failed.get(),
        )
    }
}
