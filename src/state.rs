use crate::diagnostics::{ProbeKind, Severity};
use crate::report::Report;
use std::collections::HashMap;

/// Everything the serve loop exposes over HTTP.
#[derive(Debug, Clone, Default)]
pub struct State {
    pub started_at_unix: i64,
    pub last_run_unix: i64,
    pub runs_completed: u64,
    pub snapshot_failures: u64,
    pub probe_failures: HashMap<(ProbeKind, Severity), u64>,
    pub last_report: Option<Report>,
}

impl State {
    pub fn new(now_unix: i64) -> Self {
        Self {
            started_at_unix: now_unix,
            ..Self::default()
        }
    }

    pub fn record_run(&mut self, now_unix: i64, report: Report) {
        self.last_run_unix = now_unix;
        self.runs_completed += 1;
        self.snapshot_failures += report.failed_snapshots as u64;
        for failure in &report.diagnostics {
            *self
                .probe_failures
                .entry((failure.probe, failure.severity))
                .or_insert(0) += 1;
        }
        self.last_report = Some(report);
    }

    pub fn probe_failure_count(&self, probe: ProbeKind, severity: Severity) -> u64 {
        self.probe_failures
            .get(&(probe, severity))
            .copied()
            .unwrap_or(0)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::benchmark::{BenchmarkOutcome, BenchmarkSummary};
    use crate::diagnostics::{ProbeFailure, ProbeKind, Severity};
    use crate::report::Report;
    use crate::snapshot::{CollectionFailure, SnapshotDocument};

    pub fn report(gpu_usage_percent: Option<f64>, failures: &[ProbeKind]) -> Report {
        let outcome = BenchmarkOutcome {
            snapshot: SnapshotDocument::Failed(CollectionFailure {
                error: "failed to collect processor information: test".to_string(),
            }),
            summary: BenchmarkSummary {
                execution_time_ms: 12.0,
                memory_usage_mb: 1.5,
                cpu_usage_percent: -2.0,
                gpu_usage_percent,
                gpu_temperature: gpu_usage_percent.map(|_| 60.0),
                gpu_memory_usage_mb: gpu_usage_percent.map(|_| 4.0),
                process_memory_usage_mb: Some(30.0),
            },
            diagnostics: failures
                .iter()
                .map(|probe| ProbeFailure {
                    probe: *probe,
                    severity: Severity::Warning,
                    detail: "unavailable".to_string(),
                })
                .collect(),
            failed_snapshots: 1,
        };
        Report::new(outcome, None)
    }
}
