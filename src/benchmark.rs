//! Repeated, measured snapshot collection.
//!
//! Each iteration samples memory, CPU and the first GPU around one
//! [`SnapshotBuilder::build`] call, then pauses for the cooldown so the next
//! CPU reading is not taken back to back. Iterations run strictly in
//! sequence. The per-iteration [`DeltaSample`]s are folded into one
//! [`BenchmarkSummary`]: always-present fields are averaged over every run,
//! GPU and process memory fields only over the runs that produced a value.

use crate::collectors::{GpuReading, GpuSampler, ResourceSampler};
use crate::diagnostics::{Diagnostics, ProbeFailure, ProbeKind};
use crate::snapshot::{SnapshotBuilder, SnapshotDocument};
use serde::Serialize;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

pub const DEFAULT_REPETITIONS: usize = 5;
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(1);

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

#[derive(Debug, Error)]
pub enum BenchmarkError {
    #[error("repetitions must be at least 1")]
    NoRepetitions,
}

/// Before/after measurement of one iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct DeltaSample {
    pub execution_time_ms: f64,
    pub memory_usage_mb: f64,
    /// Plain difference of two percentage readings.
    pub cpu_usage_percent: f64,
    pub gpu_usage_percent: Option<f64>,
    /// End reading, not a delta.
    pub gpu_temperature: Option<f64>,
    pub gpu_memory_usage_mb: Option<f64>,
    /// Absolute resident size of this process.
    pub process_memory_usage_mb: Option<f64>,
}

#[derive(Debug, Clone)]
struct Counters {
    memory_used_bytes: u64,
    cpu_usage_percent: f64,
    gpu: Option<GpuReading>,
}

impl DeltaSample {
    fn between(
        start: &Counters,
        end: &Counters,
        elapsed: Duration,
        process_resident_bytes: Option<u64>,
    ) -> Self {
        let (gpu_usage_percent, gpu_memory_usage_mb) = match (&start.gpu, &end.gpu) {
            (Some(s), Some(e)) => (
                Some(e.load * 100.0 - s.load * 100.0),
                Some(e.memory_used_mb - s.memory_used_mb),
            ),
            _ => (None, None),
        };
        let memory_delta = end.memory_used_bytes as f64 - start.memory_used_bytes as f64;

        Self {
            execution_time_ms: elapsed.as_secs_f64() * 1000.0,
            memory_usage_mb: memory_delta / BYTES_PER_MB,
            cpu_usage_percent: end.cpu_usage_percent - start.cpu_usage_percent,
            gpu_usage_percent,
            gpu_temperature: end.gpu.as_ref().and_then(|g| g.temperature_celsius),
            gpu_memory_usage_mb,
            process_memory_usage_mb: process_resident_bytes.map(|b| b as f64 / BYTES_PER_MB),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BenchmarkSummary {
    pub execution_time_ms: f64,
    pub memory_usage_mb: f64,
    pub cpu_usage_percent: f64,
    pub gpu_usage_percent: Option<f64>,
    pub gpu_temperature: Option<f64>,
    pub gpu_memory_usage_mb: Option<f64>,
    pub process_memory_usage_mb: Option<f64>,
}

impl BenchmarkSummary {
    /// `None` only for an empty sample set.
    pub fn from_samples(samples: &[DeltaSample]) -> Option<Self> {
        Some(Self {
            execution_time_ms: mean(samples.iter().map(|s| s.execution_time_ms))?,
            memory_usage_mb: mean(samples.iter().map(|s| s.memory_usage_mb))?,
            cpu_usage_percent: mean(samples.iter().map(|s| s.cpu_usage_percent))?,
            gpu_usage_percent: mean(samples.iter().filter_map(|s| s.gpu_usage_percent)),
            gpu_temperature: mean(samples.iter().filter_map(|s| s.gpu_temperature)),
            gpu_memory_usage_mb: mean(samples.iter().filter_map(|s| s.gpu_memory_usage_mb)),
            process_memory_usage_mb: mean(samples.iter().filter_map(|s| s.process_memory_usage_mb)),
        })
    }
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0_usize), |(sum, n), v| (sum + v, n + 1));
    (count > 0).then(|| sum / count as f64)
}

/// Pause between iterations.
pub trait Cooldown {
    fn pause(&mut self, interval: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleep;

impl Cooldown for ThreadSleep {
    fn pause(&mut self, interval: Duration) {
        std::thread::sleep(interval);
    }
}

#[derive(Debug, Clone)]
pub struct BenchmarkOutcome {
    /// Document from the final iteration.
    pub snapshot: SnapshotDocument,
    pub summary: BenchmarkSummary,
    /// Sampler failures seen across all iterations.
    pub diagnostics: Vec<ProbeFailure>,
    pub failed_snapshots: usize,
}

#[derive(Debug, Clone)]
pub struct BenchmarkRunner {
    repetitions: usize,
    cooldown: Duration,
}

impl Default for BenchmarkRunner {
    fn default() -> Self {
        Self::new(DEFAULT_REPETITIONS, DEFAULT_COOLDOWN)
    }
}

impl BenchmarkRunner {
    pub fn new(repetitions: usize, cooldown: Duration) -> Self {
        Self {
            repetitions,
            cooldown,
        }
    }

    pub fn run(
        &self,
        builder: &SnapshotBuilder<'_>,
        resources: &mut dyn ResourceSampler,
        gpus: &mut dyn GpuSampler,
        cooldown: &mut dyn Cooldown,
    ) -> Result<BenchmarkOutcome, BenchmarkError> {
        if self.repetitions == 0 {
            return Err(BenchmarkError::NoRepetitions);
        }

        let mut samples = Vec::with_capacity(self.repetitions);
        let mut diag = Diagnostics::new();
        let mut failed_snapshots = 0;
        let mut last = None;

        for iteration in 1..=self.repetitions {
            let started = Instant::now();
            let start = sample_counters(resources, gpus, &mut diag);

            let document = builder.build(resources);

            let elapsed = started.elapsed();
            let end = sample_counters(resources, gpus, &mut diag);
            let process_resident = resources.process_resident_bytes();
            if process_resident.is_none() {
                diag.warn(ProbeKind::ProcessMemory, "resident size of own process unavailable");
            }

            let sample = DeltaSample::between(&start, &end, elapsed, process_resident);
            if document.is_failed() {
                failed_snapshots += 1;
                warn!(iteration, "snapshot unusable; keeping resource deltas only");
            }
            debug!(
                iteration,
                execution_time_ms = sample.execution_time_ms,
                memory_usage_mb = sample.memory_usage_mb,
                cpu_usage_percent = sample.cpu_usage_percent,
                "benchmark iteration complete"
            );
            samples.push(sample);
            last = Some(document);

            cooldown.pause(self.cooldown);
        }

        let snapshot = last.ok_or(BenchmarkError::NoRepetitions)?;
        let summary =
            BenchmarkSummary::from_samples(&samples).ok_or(BenchmarkError::NoRepetitions)?;
        Ok(BenchmarkOutcome {
            snapshot,
            summary,
            diagnostics: diag.into_failures(),
            failed_snapshots,
        })
    }
}

fn sample_counters(
    resources: &mut dyn ResourceSampler,
    gpus: &mut dyn GpuSampler,
    diag: &mut Diagnostics,
) -> Counters {
    Counters {
        memory_used_bytes: resources.memory_used_bytes(),
        cpu_usage_percent: resources.cpu_usage_percent(),
        gpu: first_gpu(gpus, diag),
    }
}

fn first_gpu(gpus: &mut dyn GpuSampler, diag: &mut Diagnostics) -> Option<GpuReading> {
    match gpus.gpus() {
        Ok(list) => list.into_iter().next(),
        Err(err) => {
            diag.warn(ProbeKind::Gpu, err);
            None
        }
    }
}
