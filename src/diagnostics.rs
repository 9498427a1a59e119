use std::fmt;
use tracing::{error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProbeKind {
    VirtualizationEnabled,
    CpuTemperature,
    Gpu,
    ProcessMemory,
}

impl ProbeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProbeKind::VirtualizationEnabled => "virtualization_enabled",
            ProbeKind::CpuTemperature => "cpu_temperature",
            ProbeKind::Gpu => "gpu",
            ProbeKind::ProcessMemory => "process_memory",
        }
    }
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

/// A probe that degraded to "unknown" instead of producing a value.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeFailure {
    pub probe: ProbeKind,
    pub severity: Severity,
    pub detail: String,
}

#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    failures: Vec<ProbeFailure>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warn(&mut self, probe: ProbeKind, detail: impl fmt::Display) {
        let detail = detail.to_string();
        warn!(probe = %probe, detail = %detail, "probe degraded to unknown");
        self.failures.push(ProbeFailure {
            probe,
            severity: Severity::Warning,
            detail,
        });
    }

    pub fn error(&mut self, probe: ProbeKind, detail: impl fmt::Display) {
        let detail = detail.to_string();
        error!(probe = %probe, detail = %detail, "probe failed");
        self.failures.push(ProbeFailure {
            probe,
            severity: Severity::Error,
            detail,
        });
    }

    #[cfg(test)]
    pub fn failures(&self) -> &[ProbeFailure] {
        &self.failures
    }

    #[cfg(test)]
    pub fn has_failure(&self, probe: ProbeKind) -> bool {
        self.failures.iter().any(|f| f.probe == probe)
    }

    pub fn into_failures(self) -> Vec<ProbeFailure> {
        self.failures
    }
}
