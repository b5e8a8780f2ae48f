/// Progress events emitted by the worker while loading a data file
#[derive(Debug, Clone)]
pub enum TelemetryEvent {
    /// Worker opened a data file
    FileStarted,
    /// A transaction was committed
    BatchCommitted { records_loaded: u64, duration_ms: u64 },
    /// A row was decoded or inserted unsuccessfully and skipped
    RecordFailed,
    /// Worker finished a data file
    FileCompleted,
}

/// Statistics aggregated from telemetry events
#[derive(Debug, Default, Clone)]
pub struct ProgressStats {
    pub files_started: usize,
    pub files_completed: usize,
    pub records_loaded: u64,
    pub records_failed: u64,
    pub commit_durations_ms: Vec<u64>,
}

impl ProgressStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update stats with a telemetry event
    pub fn update(&mut self, event: &TelemetryEvent) {
        match event {
            TelemetryEvent::FileStarted => {
                self.files_started += 1;
            }
            TelemetryEvent::BatchCommitted {
                records_loaded,
                duration_ms,
            } => {
                self.records_loaded += records_loaded;
                self.commit_durations_ms.push(*duration_ms);
            }
            TelemetryEvent::RecordFailed => {
                self.records_failed += 1;
            }
            TelemetryEvent::FileCompleted => {
                self.files_completed += 1;
            }
        }
    }

    /// Calculate percentile from commit durations
    pub fn percentile(&self, p: f64) -> Option<u64> {
        if self.commit_durations_ms.is_empty() {
            return None;
        }

        let mut sorted = self.commit_durations_ms.clone();
        sorted.sort_unstable();

        let index = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
        let index = index.saturating_sub(1).min(sorted.len() - 1);

        Some(sorted[index])
    }

    /// Get p50, p90, p99 percentiles
    pub fn get_percentiles(&self) -> (Option<u64>, Option<u64>, Option<u64>) {
        (
            self.percentile(50.0),
            self.percentile(90.0),
            self.percentile(99.0),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_counts() {
        let mut stats = ProgressStats::new();
        stats.update(&TelemetryEvent::FileStarted);
        stats.update(&TelemetryEvent::BatchCommitted {
            records_loaded: 3,
            duration_ms: 4,
        });
        stats.update(&TelemetryEvent::RecordFailed);
        stats.update(&TelemetryEvent::BatchCommitted {
            records_loaded: 2,
            duration_ms: 1,
        });
        stats.update(&TelemetryEvent::FileCompleted);

        assert_eq!(stats.files_started, 1);
        assert_eq!(stats.files_completed, 1);
        assert_eq!(stats.records_loaded, 5);
        assert_eq!(stats.records_failed, 1);
        assert_eq!(stats.commit_durations_ms, vec![4, 1]);
    }

    #[test]
    fn test_percentiles() {
        let mut stats = ProgressStats::new();
        assert_eq!(stats.get_percentiles(), (None, None, None));

        for duration_ms in 1..=100 {
            stats.update(&TelemetryEvent::BatchCommitted {
                records_loaded: 1,
                duration_ms,
            });
        }

        assert_eq!(stats.get_percentiles(), (Some(50), Some(90), Some(99)));
        assert_eq!(stats.percentile(0.0), Some(1));
    }
}
