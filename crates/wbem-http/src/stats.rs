//! Per-operation statistics.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Accumulated figures for one operation name.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OperationStats {
    pub count: u64,
    /// Calls that ended in an error.
    pub exception_count: u64,
    pub time_min: Duration,
    pub time_max: Duration,
    pub time_total: Duration,
    /// Sum of server-reported processing times, where reported.
    pub server_time_total: Duration,
    pub server_time_min: Option<Duration>,
    pub server_time_max: Option<Duration>,
    pub request_len_total: u64,
    pub request_len_min: usize,
    pub request_len_max: usize,
    pub reply_len_total: u64,
    pub reply_len_min: usize,
    pub reply_len_max: usize,
}

impl Default for OperationStats {
    fn default() -> Self {
        OperationStats {
            count: 0,
            exception_count: 0,
            time_min: Duration::MAX,
            time_max: Duration::ZERO,
            time_total: Duration::ZERO,
            server_time_total: Duration::ZERO,
            server_time_min: None,
            server_time_max: None,
            request_len_total: 0,
            request_len_min: usize::MAX,
            request_len_max: 0,
            reply_len_total: 0,
            reply_len_min: usize::MAX,
            reply_len_max: 0,
        }
    }
}

impl OperationStats {
    pub fn avg_time(&self) -> Duration {
        if self.count == 0 {
            return Duration::ZERO;
        }
        self.time_total / self.count as u32
    }

    pub fn avg_request_len(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.request_len_total as f64 / self.count as f64
    }

    pub fn avg_reply_len(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.reply_len_total as f64 / self.count as f64
    }

    fn record(&mut self, elapsed: Duration, request_len: usize, reply_len: usize, server_time: Option<Duration>, failed: bool) {
        self.count += 1;
        if failed {
            self.exception_count += 1;
        }
        self.time_min = self.time_min.min(elapsed);
        self.time_max = self.time_max.max(elapsed);
        self.time_total += elapsed;
        if let Some(server) = server_time {
            self.server_time_total += server;
            self.server_time_min = Some(self.server_time_min.map_or(server, |m| m.min(server)));
            self.server_time_max = Some(self.server_time_max.map_or(server, |m| m.max(server)));
        }
        self.request_len_total += request_len as u64;
        self.request_len_min = self.request_len_min.min(request_len);
        self.request_len_max = self.request_len_max.max(request_len);
        self.reply_len_total += reply_len as u64;
        self.reply_len_min = self.reply_len_min.min(reply_len);
        self.reply_len_max = self.reply_len_max.max(reply_len);
    }
}

#[derive(Debug, Default)]
struct StatsState {
    enabled: bool,
    operations: BTreeMap<String, OperationStats>,
}

/// Shared statistics collector. Clones refer to the same figures.
#[derive(Debug, Clone, Default)]
pub struct Statistics {
    inner: Arc<Mutex<StatsState>>,
}

impl Statistics {
    pub fn new(enabled: bool) -> Self {
        let stats = Self::default();
        stats.set_enabled(enabled);
        stats
    }

    fn state(&self) -> std::sync::MutexGuard<'_, StatsState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn enabled(&self) -> bool {
        self.state().enabled
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.state().enabled = enabled;
    }

    /// Forget all accumulated figures.
    pub fn reset(&self) {
        self.state().operations.clear();
    }

    /// Start timing one call of `name`. The timer records nothing unless
    /// statistics are enabled when it is stopped.
    pub fn start_timer(&self, name: &str) -> OperationTimer {
        OperationTimer {
            stats: self.clone(),
            name: name.to_string(),
            start: Instant::now(),
        }
    }

    /// Copy of the figures, by operation name.
    pub fn snapshot(&self) -> BTreeMap<String, OperationStats> {
        self.state().operations.clone()
    }

    pub fn get(&self, name: &str) -> Option<OperationStats> {
        self.state().operations.get(name).copied()
    }

    /// Table of all operations, one row each, in milliseconds and bytes.
    pub fn formatted(&self) -> String {
        let mut out = String::from(
            "Count Excep    ClientTime [ms]        ServerTime [ms]     RequestLen [B]      ReplyLen [B]     Operation\n",
        );
        out.push_str("      Count    Avg    Min    Max     Avg    Min    Max    Avg    Min    Max    Avg    Min    Max\n");
        let ms = |d: Duration| d.as_secs_f64() * 1000.0;
        for (name, op) in self.snapshot() {
            let server_avg = if op.count == 0 {
                0.0
            } else {
                ms(op.server_time_total) / op.count as f64
            };
            let _ = writeln!(
                out,
                "{:5} {:5} {:6.1} {:6.1} {:6.1} {:7.1} {:6.1} {:6.1} {:6.0} {:6} {:6} {:6.0} {:6} {:6} {}",
                op.count,
                op.exception_count,
                ms(op.avg_time()),
                ms(op.time_min),
                ms(op.time_max),
                server_avg,
                op.server_time_min.map_or(0.0, ms),
                op.server_time_max.map_or(0.0, ms),
                op.avg_request_len(),
                op.request_len_min,
                op.request_len_max,
                op.avg_reply_len(),
                op.reply_len_min,
                op.reply_len_max,
                name
            );
        }
        out
    }
}

/// Running measurement for one operation call.
#[derive(Debug)]
pub struct OperationTimer {
    stats: Statistics,
    name: String,
    start: Instant,
}

impl OperationTimer {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stop timing and record the call. Returns the elapsed client time.
    pub fn stop(
        self,
        request_len: usize,
        reply_len: usize,
        server_time: Option<Duration>,
        failed: bool,
    ) -> Duration {
        let elapsed = self.start.elapsed();
        let mut state = self.stats.state();
        if state.enabled {
            state
                .operations
                .entry(self.name)
                .or_default()
                .record(elapsed, request_len, reply_len, server_time, failed);
        }
        elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_per_operation() {
        let stats = Statistics::new(true);
        stats
            .start_timer("GetInstance")
            .stop(100, 400, Some(Duration::from_millis(2)), false);
        stats.start_timer("GetInstance").stop(120, 0, None, true);
        stats.start_timer("EnumerateInstances").stop(90, 9000, None, false);

        let get = stats.get("GetInstance").expect("recorded");
        assert_eq!(get.count, 2);
        assert_eq!(get.exception_count, 1);
        assert_eq!(get.request_len_min, 100);
        assert_eq!(get.request_len_max, 120);
        assert_eq!(get.reply_len_min, 0);
        assert_eq!(get.server_time_max, Some(Duration::from_millis(2)));
        assert!(get.time_min <= get.time_max);
        assert_eq!(get.avg_request_len(), 110.0);

        let table = stats.formatted();
        assert!(table.contains("GetInstance"));
        assert!(table.contains("EnumerateInstances"));
        assert_eq!(stats.snapshot().len(), 2);
    }

    #[test]
    fn disabled_collector_records_nothing() {
        let stats = Statistics::new(false);
        let elapsed = stats.start_timer("GetClass").stop(1, 1, None, false);
        assert!(elapsed <= Duration::from_secs(1));
        assert!(stats.get("GetClass").is_none());

        stats.set_enabled(true);
        stats.clone().start_timer("GetClass").stop(1, 1, None, false);
        assert_eq!(stats.get("GetClass").map(|s| s.count), Some(1));
        stats.reset();
        assert!(stats.snapshot().is_empty());
    }
}
