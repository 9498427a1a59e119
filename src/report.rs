use crate::benchmark::{
    BenchmarkError, BenchmarkOutcome, BenchmarkRunner, BenchmarkSummary, ThreadSleep,
};
use crate::chart::ChartLinks;
use crate::collectors::gpu::NvidiaSmiSampler;
use crate::collectors::system::SysinfoSampler;
use crate::diagnostics::ProbeFailure;
use crate::platform::{HostOsFacts, Platform};
use crate::provider::SystemCpuInfoProvider;
use crate::snapshot::{SnapshotBuilder, SnapshotDocument};
use serde::Serialize;

/// Final document: the last snapshot with the benchmark block appended.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    #[serde(flatten)]
    pub snapshot: SnapshotDocument,
    pub benchmark: BenchmarkSummary,
    pub time_chart_url: Option<String>,
    pub usage_chart_url: Option<String>,
    #[serde(skip)]
    pub diagnostics: Vec<ProbeFailure>,
    #[serde(skip)]
    pub failed_snapshots: usize,
}

impl Report {
    pub fn new(outcome: BenchmarkOutcome, links: Option<&ChartLinks>) -> Self {
        let mut diagnostics = outcome.snapshot.diagnostics().to_vec();
        diagnostics.extend(outcome.diagnostics);
        Self {
            snapshot: outcome.snapshot,
            benchmark: outcome.summary,
            time_chart_url: links.map(|l| l.time.to_string()),
            usage_chart_url: links.map(|l| l.usage.to_string()),
            diagnostics,
            failed_snapshots: outcome.failed_snapshots,
        }
    }

    pub fn to_json(&self, pretty: bool) -> Result<String, serde_json::Error> {
        if pretty {
            serde_json::to_string_pretty(self)
        } else {
            serde_json::to_string(self)
        }
    }
}

/// The live machine: real fact provider, OS probes and samplers.
#[derive(Default)]
pub struct Host {
    provider: SystemCpuInfoProvider,
    facts: HostOsFacts,
    resources: SysinfoSampler,
    gpus: NvidiaSmiSampler,
}

impl Host {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn run_benchmark(
        &mut self,
        runner: &BenchmarkRunner,
    ) -> Result<BenchmarkOutcome, BenchmarkError> {
        let builder = SnapshotBuilder::new(&self.provider, &self.facts, Platform::current());
        runner.run(&builder, &mut self.resources, &mut self.gpus, &mut ThreadSleep)
    }
}
