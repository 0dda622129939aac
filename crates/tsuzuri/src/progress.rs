use std::{
    fmt,
    time::{Duration, Instant},
};

/// A throttled progress line.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    pub worker_id: usize,
    pub processed: usize,
    pub total: usize,
    pub elapsed: Duration,
    pub eta: Duration,
    /// Live estimate in bits per second.
    pub bandwidth: Option<u64>,
}

impl ProgressSnapshot {
    pub fn percentage(&self) -> f64 {
        if self.total == 0 {
            100.
        } else {
            self.processed as f64 / self.total as f64 * 100.
        }
    }
}

impl fmt::Display for ProgressSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // 12 / 40 (30.00%) | ETA: 1m 03s | 2.10 Mbps | worker #3
        write!(
            f,
            "{} / {} ({:.2}%) | ETA: {}",
            self.processed,
            self.total,
            self.percentage(),
            format_duration(self.eta)
        )?;
        if let Some(bandwidth) = self.bandwidth {
            write!(f, " | {}", format_bandwidth(bandwidth))?;
        }
        write!(f, " | worker #{}", self.worker_id)
    }
}

/// Counts written segments and reports at most once per interval.
pub struct ProgressTracker {
    total: usize,
    processed: usize,
    started: Instant,
    last_report: Instant,
    interval: Duration,
}

impl ProgressTracker {
    pub fn new(total: usize) -> Self {
        let now = Instant::now();
        Self {
            total,
            processed: 0,
            started: now,
            last_report: now,
            interval: Duration::from_secs(1),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn processed(&self) -> usize {
        self.processed
    }

    pub fn total(&self) -> usize {
        self.total
    }

    /// Records one completed segment. Returns the status when a report is due.
    pub fn update(&mut self, worker_id: usize, bandwidth: Option<u64>) -> Option<ProgressSnapshot> {
        self.processed = (self.processed + 1).min(self.total);

        let now = Instant::now();
        if now.duration_since(self.last_report) < self.interval {
            return None;
        }
        self.last_report = now;

        let elapsed = now.duration_since(self.started);
        let snapshot = ProgressSnapshot {
            worker_id,
            processed: self.processed,
            total: self.total,
            elapsed,
            eta: eta(elapsed, self.processed, self.total),
            bandwidth,
        };
        tracing::info!("{snapshot}");
        Some(snapshot)
    }
}

/// `elapsed / processed * (total - processed)`.
pub fn eta(elapsed: Duration, processed: usize, total: usize) -> Duration {
    if processed == 0 {
        return Duration::ZERO;
    }
    elapsed
        .div_f64(processed as f64)
        .mul_f64(total.saturating_sub(processed) as f64)
}

pub fn format_duration(duration: Duration) -> String {
    let seconds = duration.as_secs();
    let (hours, minutes, seconds) = (seconds / 3600, seconds / 60 % 60, seconds % 60);
    if hours > 0 {
        format!("{hours}h {minutes:02}m {seconds:02}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds:02}s")
    } else {
        format!("{seconds}s")
    }
}

pub fn format_bandwidth(bits_per_second: u64) -> String {
    let bps = bits_per_second as f64;
    if bps >= 1_000_000. {
        format!("{:.2} Mbps", bps / 1_000_000.)
    } else if bps >= 1_000. {
        format!("{:.2} Kbps", bps / 1_000.)
    } else {
        format!("{bits_per_second} bps")
    }
}
