use {
    parking_lot::Mutex,
    std::{
        collections::HashMap,
        sync::Arc,
        time::{Duration, Instant},
    },
};

/// Receives `(transferred_bytes, total_bytes)`.
pub type ProgressCallback = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Minimal interval between two aggregate progress reports.
pub const MIN_REPORT_INTERVAL: Duration = Duration::from_millis(200);

/// Aggregates progress of the concurrently transferred parts of one object.
///
/// Each part reports its own transferred byte count. The tracker keeps the
/// latest count per part and emits their sum, at most once per
/// [`MIN_REPORT_INTERVAL`]. Updates and emission happen under one lock, so
/// reports from different parts never race and the emitted totals never
/// decrease.
pub struct MultiPartProgressTracker {
    total_bytes: u64,
    min_interval: Duration,
    on_progress: ProgressCallback,
    state: Mutex<TrackerState>,
}

struct TrackerState {
    by_part: HashMap<usize, u64>,
    last_report: Option<Instant>,
}

impl TrackerState {
    fn transferred(&self) -> u64 {
        self.by_part
            .values()
            .fold(0_u64, |sum, bytes| sum.saturating_add(*bytes))
    }
}

impl MultiPartProgressTracker {
    #[must_use]
    #[inline]
    pub fn new(total_bytes: u64, on_progress: ProgressCallback) -> Self {
        Self {
            total_bytes,
            min_interval: MIN_REPORT_INTERVAL,
            on_progress,
            state: Mutex::new(TrackerState {
                by_part: HashMap::new(),
                last_report: None,
            }),
        }
    }

    #[must_use]
    #[inline]
    pub fn with_min_interval(mut self, min_interval: Duration) -> Self {
        self.min_interval = min_interval;
        self
    }

    #[must_use]
    #[inline]
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Records that `transferred` bytes of `part` are done.
    #[inline]
    pub fn notify(&self, part: usize, transferred: u64) {
        let mut state = self.state.lock();
        let previous = state.by_part.entry(part).or_default();
        *previous = (*previous).max(transferred);
        let now = Instant::now();
        let due = state
            .last_report
            .is_none_or(|last| now.saturating_duration_since(last) >= self.min_interval);
        if due {
            state.last_report = Some(now);
            (self.on_progress)(state.transferred(), self.total_bytes);
        }
    }

    /// Emits the current total regardless of the report interval.
    #[inline]
    pub fn finish(&self) {
        let mut state = self.state.lock();
        state.last_report = Some(Instant::now());
        (self.on_progress)(state.transferred(), self.total_bytes);
    }

    /// Callback for the store transfer of one part.
    #[must_use]
    #[inline]
    pub fn part_callback(self: &Arc<Self>, part: usize) -> ProgressCallback {
        let this = Arc::clone(self);
        Arc::new(move |transferred, _total| this.notify(part, transferred))
    }
}
