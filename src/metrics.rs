use crate::diagnostics::{ProbeKind, Severity};
use crate::state::State;
use prometheus::core::Collector;
use prometheus::{opts, Counter, Encoder, Gauge, GaugeVec, Registry, TextEncoder};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

const GPU_LABEL: &str = "0";
const PROCESS_LABEL: &str = "self";
const PROBES: [ProbeKind; 4] = [
    ProbeKind::VirtualizationEnabled,
    ProbeKind::CpuTemperature,
    ProbeKind::Gpu,
    ProbeKind::ProcessMemory,
];
const SEVERITIES: [Severity; 2] = [Severity::Warning, Severity::Error];

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub cpuprobe_execution_time_ms: Gauge,
    pub cpuprobe_memory_usage_mb: Gauge,
    pub cpuprobe_cpu_usage_percent: Gauge,
    pub cpuprobe_process_memory_usage_mb: GaugeVec,
    pub cpuprobe_gpu_usage_percent: GaugeVec,
    pub cpuprobe_gpu_temperature_celsius: GaugeVec,
    pub cpuprobe_gpu_memory_usage_mb: GaugeVec,
    pub cpuprobe_cpu_temperature_celsius: GaugeVec,
    pub cpuprobe_runs_total: Gauge,
    pub cpuprobe_probe_failures_total: GaugeVec,
    pub cpuprobe_snapshot_failures_total: Gauge,
    pub cpuprobe_last_run_timestamp_seconds: Gauge,
    pub cpuprobe_uptime_seconds: Gauge,
    pub cpuprobe_scrape_count_total: Counter,
}

impl Metrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let cpuprobe_execution_time_ms = Gauge::with_opts(opts!(
            "cpuprobe_execution_time_ms",
            "Mean wall time of one snapshot collection in milliseconds"
        ))?;
        let cpuprobe_memory_usage_mb = Gauge::with_opts(opts!(
            "cpuprobe_memory_usage_mb",
            "Mean change of system used memory across a collection in MiB"
        ))?;
        let cpuprobe_cpu_usage_percent = Gauge::with_opts(opts!(
            "cpuprobe_cpu_usage_percent",
            "Mean change of global CPU usage across a collection in percent points"
        ))?;
        let cpuprobe_process_memory_usage_mb = GaugeVec::new(
            opts!(
                "cpuprobe_process_memory_usage_mb",
                "Mean resident size of this process in MiB"
            ),
            &["process"],
        )?;
        let cpuprobe_gpu_usage_percent = GaugeVec::new(
            opts!(
                "cpuprobe_gpu_usage_percent",
                "Mean change of GPU load across a collection in percent points"
            ),
            &["gpu"],
        )?;
        let cpuprobe_gpu_temperature_celsius = GaugeVec::new(
            opts!(
                "cpuprobe_gpu_temperature_celsius",
                "Mean GPU temperature at the end of a collection"
            ),
            &["gpu"],
        )?;
        let cpuprobe_gpu_memory_usage_mb = GaugeVec::new(
            opts!(
                "cpuprobe_gpu_memory_usage_mb",
                "Mean change of GPU memory used across a collection in MB"
            ),
            &["gpu"],
        )?;
        let cpuprobe_cpu_temperature_celsius = GaugeVec::new(
            opts!(
                "cpuprobe_cpu_temperature_celsius",
                "CPU temperature reported by the last snapshot"
            ),
            &["platform"],
        )?;
        let cpuprobe_runs_total = Gauge::with_opts(opts!(
            "cpuprobe_runs_total",
            "Benchmark runs completed since start"
        ))?;
        let cpuprobe_probe_failures_total = GaugeVec::new(
            opts!(
                "cpuprobe_probe_failures_total",
                "Probes that degraded to unknown, by probe and severity"
            ),
            &["probe", "severity"],
        )?;
        let cpuprobe_snapshot_failures_total = Gauge::with_opts(opts!(
            "cpuprobe_snapshot_failures_total",
            "Snapshot collections that produced no processor facts"
        ))?;
        let cpuprobe_last_run_timestamp_seconds = Gauge::with_opts(opts!(
            "cpuprobe_last_run_timestamp_seconds",
            "Unix timestamp of the last completed benchmark run"
        ))?;
        let cpuprobe_uptime_seconds =
            Gauge::with_opts(opts!("cpuprobe_uptime_seconds", "Service uptime in seconds"))?;
        let cpuprobe_scrape_count_total = Counter::with_opts(opts!(
            "cpuprobe_scrape_count_total",
            "Number of /metrics scrapes"
        ))?;

        register(&registry, &cpuprobe_execution_time_ms)?;
        register(&registry, &cpuprobe_memory_usage_mb)?;
        register(&registry, &cpuprobe_cpu_usage_percent)?;
        register(&registry, &cpuprobe_process_memory_usage_mb)?;
        register(&registry, &cpuprobe_gpu_usage_percent)?;
        register(&registry, &cpuprobe_gpu_temperature_celsius)?;
        register(&registry, &cpuprobe_gpu_memory_usage_mb)?;
        register(&registry, &cpuprobe_cpu_temperature_celsius)?;
        register(&registry, &cpuprobe_runs_total)?;
        register(&registry, &cpuprobe_probe_failures_total)?;
        register(&registry, &cpuprobe_snapshot_failures_total)?;
        register(&registry, &cpuprobe_last_run_timestamp_seconds)?;
        register(&registry, &cpuprobe_uptime_seconds)?;
        register(&registry, &cpuprobe_scrape_count_total)?;

        Ok(Arc::new(Self {
            registry,
            cpuprobe_execution_time_ms,
            cpuprobe_memory_usage_mb,
            cpuprobe_cpu_usage_percent,
            cpuprobe_process_memory_usage_mb,
            cpuprobe_gpu_usage_percent,
            cpuprobe_gpu_temperature_celsius,
            cpuprobe_gpu_memory_usage_mb,
            cpuprobe_cpu_temperature_celsius,
            cpuprobe_runs_total,
            cpuprobe_probe_failures_total,
            cpuprobe_snapshot_failures_total,
            cpuprobe_last_run_timestamp_seconds,
            cpuprobe_uptime_seconds,
            cpuprobe_scrape_count_total,
        }))
    }

    pub fn update_from_state(&self, state: &State) {
        self.cpuprobe_runs_total.set(state.runs_completed as f64);
        self.cpuprobe_snapshot_failures_total
            .set(state.snapshot_failures as f64);
        self.cpuprobe_last_run_timestamp_seconds
            .set(state.last_run_unix as f64);
        for probe in PROBES {
            for severity in SEVERITIES {
                self.cpuprobe_probe_failures_total
                    .with_label_values(&[probe.as_str(), severity.as_str()])
                    .set(state.probe_failure_count(probe, severity) as f64);
            }
        }

        self.cpuprobe_gpu_usage_percent.reset();
        self.cpuprobe_gpu_temperature_celsius.reset();
        self.cpuprobe_gpu_memory_usage_mb.reset();
        self.cpuprobe_cpu_temperature_celsius.reset();
        self.cpuprobe_process_memory_usage_mb.reset();

        if let Some(report) = &state.last_report {
            let summary = &report.benchmark;
            self.cpuprobe_execution_time_ms.set(summary.execution_time_ms);
            self.cpuprobe_memory_usage_mb.set(summary.memory_usage_mb);
            self.cpuprobe_cpu_usage_percent.set(summary.cpu_usage_percent);
            if let Some(v) = summary.process_memory_usage_mb {
                self.cpuprobe_process_memory_usage_mb
                    .with_label_values(&[PROCESS_LABEL])
                    .set(v);
            }

            let gpu = [
                (&self.cpuprobe_gpu_usage_percent, summary.gpu_usage_percent),
                (&self.cpuprobe_gpu_temperature_celsius, summary.gpu_temperature),
                (&self.cpuprobe_gpu_memory_usage_mb, summary.gpu_memory_usage_mb),
            ];
            for (gauge, value) in gpu {
                if let Some(v) = value {
                    gauge.with_label_values(&[GPU_LABEL]).set(v);
                }
            }

            if let Some(snapshot) = report.snapshot.snapshot() {
                if let Some(t) = snapshot.performance.temperature {
                    self.cpuprobe_cpu_temperature_celsius
                        .with_label_values(&[&snapshot.metadata.platform])
                        .set(t);
                }
            }
        }

        let uptime = now_unix().saturating_sub(state.started_at_unix) as f64;
        self.cpuprobe_uptime_seconds.set(uptime);
    }

    pub fn inc_scrape_count(&self) {
        self.cpuprobe_scrape_count_total.inc();
    }

    pub fn encode_metrics(&self) -> Result<Vec<u8>, prometheus::Error> {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        encoder.encode(&mf, &mut buf)?;
        Ok(buf)
    }
}

fn register<T: Collector + Clone + 'static>(
    registry: &Registry,
    collector: &T,
) -> Result<(), prometheus::Error> {
    registry.register(Box::new(collector.clone()))
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::fixtures::report;

    fn encoded(metrics: &Metrics) -> String {
        String::from_utf8(metrics.encode_metrics().unwrap()).unwrap()
    }

    #[test]
    fn summary_fields_are_exported() {
        let metrics = Metrics::new().unwrap();
        let mut state = State::new(0);
        state.record_run(1_700_000_000, report(Some(7.5), &[ProbeKind::Gpu]));
        metrics.update_from_state(&state);

        let text = encoded(&metrics);
        assert!(text.contains("cpuprobe_execution_time_ms 12"));
        assert!(text.contains("cpuprobe_gpu_usage_percent{gpu=\"0\"} 7.5"));
        assert!(text.contains(
            "cpuprobe_probe_failures_total{probe=\"gpu\",severity=\"warning\"} 1"
        ));
        assert!(text.contains(
            "cpuprobe_probe_failures_total{probe=\"cpu_temperature\",severity=\"error\"} 0"
        ));
        assert!(text.contains("cpuprobe_runs_total 1"));
        assert!(text.contains("cpuprobe_snapshot_failures_total 1"));
        assert!(text.contains("cpuprobe_last_run_timestamp_seconds 1700000000"));
        assert!(text.contains("cpuprobe_process_memory_usage_mb{process=\"self\"} 30"));
        assert!(text.contains(
            "cpuprobe_probe_failures_total{probe=\"process_memory\",severity=\"warning\"} 0"
        ));
    }

    #[test]
    fn absent_gpu_values_clear_the_series() {
        let metrics = Metrics::new().unwrap();
        let mut state = State::new(0);
        state.record_run(1, report(Some(3.0), &[]));
        metrics.update_from_state(&state);
        assert!(encoded(&metrics).contains("cpuprobe_gpu_usage_percent{gpu=\"0\"}"));

        state.record_run(2, report(None, &[]));
        metrics.update_from_state(&state);
        let text = encoded(&metrics);
        assert!(!text.contains("cpuprobe_gpu_usage_percent{"));
        assert!(!text.contains("cpuprobe_gpu_temperature_celsius{"));
    }

    #[test]
    fn uptime_is_exported_before_first_run() {
        let metrics = Metrics::new().unwrap();
        metrics.update_from_state(&State::new(now_unix()));
        assert!(encoded(&metrics).contains("cpuprobe_uptime_seconds"));
    }
}
