pub mod gpu;
pub mod system;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadAverage {
    pub one: f64,
    pub five: f64,
    pub fifteen: f64,
}

/// Live OS counters. Each call takes a fresh reading.
pub trait ResourceSampler {
    fn memory_used_bytes(&mut self) -> u64;
    /// Usage since the previous CPU reading, in percent.
    fn cpu_usage_percent(&mut self) -> f64;
    fn per_core_usage_percent(&mut self) -> Vec<f64>;
    fn load_average(&mut self) -> Option<LoadAverage>;
    /// `None` when the own process cannot be read.
    fn process_resident_bytes(&mut self) -> Option<u64>;
    fn logical_cores(&mut self) -> Option<usize>;
    fn physical_cores(&mut self) -> Option<usize>;
    fn current_frequency_mhz(&mut self) -> Option<f64>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct GpuReading {
    /// Utilisation in `0.0..=1.0`.
    pub load: f64,
    pub memory_used_mb: f64,
    pub temperature_celsius: Option<f64>,
}

#[derive(Debug, Error)]
pub enum GpuError {
    #[error("failed to run {command}: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },
}

pub trait GpuSampler {
    fn gpus(&mut self) -> Result<Vec<GpuReading>, GpuError>;
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::collections::VecDeque;

    /// Scripted counters; queued values are consumed in call order and the
    /// last one repeats once the queue runs dry.
    #[derive(Debug, Clone, Default)]
    pub struct FakeResources {
        pub memory_used: VecDeque<u64>,
        pub cpu_usage: VecDeque<f64>,
        /// Empty means a constant `Some(0)`.
        pub process_resident: VecDeque<Option<u64>>,
        pub per_core: Vec<f64>,
        pub load: Option<LoadAverage>,
        pub logical: Option<usize>,
        pub physical: Option<usize>,
        pub frequency_mhz: Option<f64>,
    }

    fn next<T: Copy + Default>(queue: &mut VecDeque<T>) -> T {
        if queue.len() > 1 {
            queue.pop_front().unwrap_or_default()
        } else {
            queue.front().copied().unwrap_or_default()
        }
    }

    impl ResourceSampler for FakeResources {
        fn memory_used_bytes(&mut self) -> u64 {
            next(&mut self.memory_used)
        }

        fn cpu_usage_percent(&mut self) -> f64 {
            next(&mut self.cpu_usage)
        }

        fn per_core_usage_percent(&mut self) -> Vec<f64> {
            self.per_core.clone()
        }

        fn load_average(&mut self) -> Option<LoadAverage> {
            self.load
        }

        fn process_resident_bytes(&mut self) -> Option<u64> {
            if self.process_resident.is_empty() {
                return Some(0);
            }
            next(&mut self.process_resident)
        }

        fn logical_cores(&mut self) -> Option<usize> {
            self.logical
        }

        fn physical_cores(&mut self) -> Option<usize> {
            self.physical
        }

        fn current_frequency_mhz(&mut self) -> Option<f64> {
            self.frequency_mhz
        }
    }

    /// One scripted answer per `gpus()` call; `None` entries simulate a
    /// sampler failure.
    #[derive(Debug, Default)]
    pub struct FakeGpus {
        pub responses: VecDeque<Option<Vec<GpuReading>>>,
        pub calls: usize,
    }

    impl GpuSampler for FakeGpus {
        fn gpus(&mut self) -> Result<Vec<GpuReading>, GpuError> {
            self.calls += 1;
            match self.responses.pop_front() {
                Some(Some(gpus)) => Ok(gpus),
                Some(None) => Err(GpuError::Spawn {
                    command: "fake-smi".to_string(),
                    source: std::io::Error::new(std::io::ErrorKind::Other, "boom"),
                }),
                None => Ok(Vec::new()),
            }
        }
    }
}
