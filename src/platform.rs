use crate::diagnostics::{Diagnostics, ProbeKind};
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use sysinfo::{System, SystemExt};
use thiserror::Error;

const CPUINFO_PATH: &str = "/proc/cpuinfo";
const THERMAL_ZONE_CANDIDATES: usize = 5;
const VIRTUALIZATION_KEY: &str = r"HKLM\SOFTWARE\Microsoft\Windows NT\CurrentVersion\Virtualization";

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("required capability missing: {0}")]
    CapabilityMissing(String),
    #[error("{command} failed: {detail}")]
    Command { command: String, detail: String },
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("unexpected output: {0}")]
    Parse(String),
}

/// OS-level facts consulted by the platform probes.
pub trait OsFacts {
    fn path_exists(&self, path: &Path) -> bool;
    fn read_to_string(&self, path: &Path) -> io::Result<String>;
    /// `Enabled` value of the Windows virtualization registry key.
    fn virtualization_registry_value(&self) -> Result<u32, ProbeError>;
    /// First `MSAcpi_ThermalZoneTemperature` reading, in tenths of Kelvin.
    fn acpi_thermal_zone_deci_kelvin(&self) -> Result<Option<f64>, ProbeError>;
    fn platform_description(&self) -> String;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Linux,
    Windows,
    Other,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(target_os = "linux") {
            Platform::Linux
        } else if cfg!(target_os = "windows") {
            Platform::Windows
        } else {
            Platform::Other
        }
    }

    /// Tri-state: `None` whenever the probe is unsupported or fails.
    pub fn virtualization_enabled(
        self,
        facts: &dyn OsFacts,
        diag: &mut Diagnostics,
    ) -> Option<bool> {
        match self {
            Platform::Linux => match facts.read_to_string(Path::new(CPUINFO_PATH)) {
                Ok(text) => {
                    let text = text.to_lowercase();
                    Some(text.contains("svm") || text.contains("vmx"))
                }
                Err(err) => {
                    diag.error(
                        ProbeKind::VirtualizationEnabled,
                        format!("{CPUINFO_PATH}: {err}"),
                    );
                    None
                }
            },
            Platform::Windows => match facts.virtualization_registry_value() {
                Ok(value) => Some(value == 1),
                Err(err @ ProbeError::NotFound(_)) => {
                    diag.warn(ProbeKind::VirtualizationEnabled, err);
                    None
                }
                Err(err) => {
                    diag.error(ProbeKind::VirtualizationEnabled, err);
                    None
                }
            },
            Platform::Other => None,
        }
    }

    /// CPU temperature in Celsius, rounded to one decimal.
    pub fn cpu_temperature(self, facts: &dyn OsFacts, diag: &mut Diagnostics) -> Option<f64> {
        match self {
            Platform::Linux => linux_thermal_zone_celsius(facts, diag),
            Platform::Windows => match facts.acpi_thermal_zone_deci_kelvin() {
                Ok(Some(deci_kelvin)) => Some(round1(deci_kelvin / 10.0 - 273.15)),
                Ok(None) => None,
                Err(err @ ProbeError::CapabilityMissing(_)) => {
                    diag.warn(ProbeKind::CpuTemperature, err);
                    None
                }
                Err(err) => {
                    diag.error(ProbeKind::CpuTemperature, err);
                    None
                }
            },
            Platform::Other => None,
        }
    }
}

fn linux_thermal_zone_celsius(facts: &dyn OsFacts, diag: &mut Diagnostics) -> Option<f64> {
    let path = (0..THERMAL_ZONE_CANDIDATES)
        .map(|zone| PathBuf::from(format!("/sys/class/thermal/thermal_zone{zone}/temp")))
        .find(|p| facts.path_exists(p))?;

    let raw = match facts.read_to_string(&path) {
        Ok(raw) => raw,
        Err(err) => {
            diag.error(ProbeKind::CpuTemperature, format!("{}: {err}", path.display()));
            return None;
        }
    };
    match raw.trim().parse::<f64>() {
        Ok(millidegrees) => Some(round1(millidegrees / 1000.0)),
        Err(_) => {
            diag.error(
                ProbeKind::CpuTemperature,
                format!("{}: expected integer millidegrees, got '{}'", path.display(), raw.trim()),
            );
            None
        }
    }
}

pub fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

/// Facts read from the running host.
#[derive(Debug, Clone, Default)]
pub struct HostOsFacts;

impl OsFacts for HostOsFacts {
    fn path_exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn virtualization_registry_value(&self) -> Result<u32, ProbeError> {
        let output = run_command("reg", &["query", VIRTUALIZATION_KEY, "/v", "Enabled"])?;
        if !output.status.success() {
            return Err(classify_reg_failure(&decode_cmd_stdout(&output.stderr)));
        }
        parse_reg_dword(&decode_cmd_stdout(&output.stdout))
    }

    fn acpi_thermal_zone_deci_kelvin(&self) -> Result<Option<f64>, ProbeError> {
        let output = run_command(
            "wmic",
            &[
                "/namespace:\\\\root\\wmi",
                "PATH",
                "MSAcpi_ThermalZoneTemperature",
                "get",
                "CurrentTemperature,InstanceName",
                "/format:csv",
            ],
        )?;
        if !output.status.success() {
            return Err(ProbeError::Command {
                command: "wmic".to_string(),
                detail: decode_cmd_stdout(&output.stderr).trim().to_string(),
            });
        }
        Ok(parse_wmic_thermal_csv(&decode_cmd_stdout(&output.stdout)))
    }

    fn platform_description(&self) -> String {
        let system = System::new();
        let os = system
            .long_os_version()
            .or_else(|| system.name())
            .unwrap_or_else(|| std::env::consts::OS.to_string());
        match system.kernel_version() {
            Some(kernel) => format!("{os} (kernel {kernel}, {})", std::env::consts::ARCH),
            None => format!("{os} ({})", std::env::consts::ARCH),
        }
    }
}

fn run_command(program: &str, args: &[&str]) -> Result<std::process::Output, ProbeError> {
    Command::new(program).args(args).output().map_err(|err| {
        if err.kind() == io::ErrorKind::NotFound {
            ProbeError::CapabilityMissing(program.to_string())
        } else {
            ProbeError::Io(err)
        }
    })
}

/// Reads the value out of `reg query` output such as
/// `    Enabled    REG_DWORD    0x1`.
pub fn parse_reg_dword(text: &str) -> Result<u32, ProbeError> {
    let line = text
        .lines()
        .find(|l| l.contains("REG_DWORD"))
        .ok_or_else(|| ProbeError::Parse("no REG_DWORD value in reg output".to_string()))?;
    let raw = line
        .split_whitespace()
        .last()
        .ok_or_else(|| ProbeError::Parse(line.trim().to_string()))?;
    let parsed = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => raw.parse::<u32>(),
    };
    parsed.map_err(|_| ProbeError::Parse(format!("invalid REG_DWORD '{raw}'")))
}

/// `reg query` exits non-zero both for a missing key and for access or
/// syntax errors; only the former reads "unable to find".
pub fn classify_reg_failure(stderr: &str) -> ProbeError {
    let detail = stderr.trim();
    if detail.to_ascii_lowercase().contains("unable to find") {
        ProbeError::NotFound(format!("{VIRTUALIZATION_KEY}\\Enabled"))
    } else {
        ProbeError::Command {
            command: "reg query".to_string(),
            detail: detail.to_string(),
        }
    }
}

/// First positive `CurrentTemperature` from `wmic ... /format:csv` output
/// (`Node,CurrentTemperature,InstanceName`).
pub fn parse_wmic_thermal_csv(text: &str) -> Option<f64> {
    text.lines().find_map(|line| {
        let parts: Vec<&str> = line.split(',').map(str::trim).collect();
        if parts.len() < 3 {
            return None;
        }
        let raw = parts[1].parse::<f64>().ok()?;
        (raw > 0.0).then_some(raw)
    })
}

fn decode_cmd_stdout(bytes: &[u8]) -> String {
    if let Ok(utf8) = std::str::from_utf8(bytes) {
        return utf8.to_string();
    }

    if bytes.len() >= 2 && bytes.len() % 2 == 0 {
        let u16buf: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        if let Ok(s) = String::from_utf16(&u16buf) {
            return s;
        }
    }

    String::from_utf8_lossy(bytes).to_string()
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::collections::HashMap;

    /// In-memory OS facts for exercising each platform branch.
    #[derive(Default)]
    pub struct FakeOsFacts {
        pub files: HashMap<PathBuf, io::Result<String>>,
        pub registry: Option<Result<u32, ProbeError>>,
        pub thermal: Option<Result<Option<f64>, ProbeError>>,
    }

    impl FakeOsFacts {
        pub fn with_file(mut self, path: &str, content: &str) -> Self {
            self.files.insert(PathBuf::from(path), Ok(content.to_string()));
            self
        }

        pub fn with_unreadable_file(mut self, path: &str) -> Self {
            self.files.insert(
                PathBuf::from(path),
                Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied")),
            );
            self
        }
    }

    impl OsFacts for FakeOsFacts {
        fn path_exists(&self, path: &Path) -> bool {
            self.files.contains_key(path)
        }

        fn read_to_string(&self, path: &Path) -> io::Result<String> {
            match self.files.get(path) {
                Some(Ok(text)) => Ok(text.clone()),
                Some(Err(err)) => Err(io::Error::new(err.kind(), err.to_string())),
                None => Err(io::Error::new(io::ErrorKind::NotFound, "no such file")),
            }
        }

        fn virtualization_registry_value(&self) -> Result<u32, ProbeError> {
            match &self.registry {
                Some(Ok(v)) => Ok(*v),
                Some(Err(ProbeError::NotFound(k))) => Err(ProbeError::NotFound(k.clone())),
                Some(Err(err)) => Err(ProbeError::Parse(err.to_string())),
                None => Err(ProbeError::NotFound(VIRTUALIZATION_KEY.to_string())),
            }
        }

        fn acpi_thermal_zone_deci_kelvin(&self) -> Result<Option<f64>, ProbeError> {
            match &self.thermal {
                Some(Ok(v)) => Ok(*v),
                Some(Err(ProbeError::CapabilityMissing(c))) => {
                    Err(ProbeError::CapabilityMissing(c.clone()))
                }
                Some(Err(err)) => Err(ProbeError::Parse(err.to_string())),
                None => Ok(None),
            }
        }

        fn platform_description(&self) -> String {
            "TestOS 1.0 (x86_64)".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeOsFacts;
    use super::*;
    use crate::diagnostics::Severity;

    #[test]
    fn linux_enabled_follows_live_cpuinfo() {
        let mut diag = Diagnostics::new();
        let facts = FakeOsFacts::default().with_file(CPUINFO_PATH, "flags : fpu VMX sse2");
        assert_eq!(
            Platform::Linux.virtualization_enabled(&facts, &mut diag),
            Some(true)
        );

        let facts = FakeOsFacts::default().with_file(CPUINFO_PATH, "flags : fpu sse2");
        assert_eq!(
            Platform::Linux.virtualization_enabled(&facts, &mut diag),
            Some(false)
        );
        assert!(diag.failures().is_empty());
    }

    #[test]
    fn linux_enabled_is_unknown_on_read_error() {
        let mut diag = Diagnostics::new();
        let facts = FakeOsFacts::default().with_unreadable_file(CPUINFO_PATH);
        assert_eq!(Platform::Linux.virtualization_enabled(&facts, &mut diag), None);
        assert!(diag.has_failure(ProbeKind::VirtualizationEnabled));
        assert_eq!(diag.failures()[0].severity, Severity::Error);
    }

    #[test]
    fn windows_enabled_reads_registry() {
        let mut diag = Diagnostics::new();
        let facts = FakeOsFacts {
            registry: Some(Ok(1)),
            ..FakeOsFacts::default()
        };
        assert_eq!(
            Platform::Windows.virtualization_enabled(&facts, &mut diag),
            Some(true)
        );

        let facts = FakeOsFacts {
            registry: Some(Ok(0)),
            ..FakeOsFacts::default()
        };
        assert_eq!(
            Platform::Windows.virtualization_enabled(&facts, &mut diag),
            Some(false)
        );
    }

    #[test]
    fn windows_missing_key_is_a_warning_other_errors_are_errors() {
        let mut diag = Diagnostics::new();
        let facts = FakeOsFacts {
            registry: Some(Err(ProbeError::NotFound("key".to_string()))),
            ..FakeOsFacts::default()
        };
        assert_eq!(Platform::Windows.virtualization_enabled(&facts, &mut diag), None);

        let facts = FakeOsFacts {
            registry: Some(Err(ProbeError::Parse("garbage".to_string()))),
            ..FakeOsFacts::default()
        };
        assert_eq!(Platform::Windows.virtualization_enabled(&facts, &mut diag), None);

        let severities: Vec<Severity> = diag.failures().iter().map(|f| f.severity).collect();
        assert_eq!(severities, vec![Severity::Warning, Severity::Error]);
    }

    #[test]
    fn other_platforms_report_unknown_without_probing() {
        let mut diag = Diagnostics::new();
        let facts = FakeOsFacts::default().with_file(CPUINFO_PATH, "vmx");
        assert_eq!(Platform::Other.virtualization_enabled(&facts, &mut diag), None);
        assert_eq!(Platform::Other.cpu_temperature(&facts, &mut diag), None);
        assert!(diag.failures().is_empty());
    }

    #[test]
    fn linux_temperature_uses_first_existing_zone() {
        let mut diag = Diagnostics::new();
        let facts = FakeOsFacts::default()
            .with_file("/sys/class/thermal/thermal_zone2/temp", "47250\n")
            .with_file("/sys/class/thermal/thermal_zone3/temp", "90000\n");
        assert_eq!(Platform::Linux.cpu_temperature(&facts, &mut diag), Some(47.3));
    }

    #[test]
    fn linux_temperature_ignores_zones_past_the_fifth() {
        let mut diag = Diagnostics::new();
        let facts =
            FakeOsFacts::default().with_file("/sys/class/thermal/thermal_zone5/temp", "40000");
        assert_eq!(Platform::Linux.cpu_temperature(&facts, &mut diag), None);
        assert!(diag.failures().is_empty());
    }

    #[test]
    fn linux_temperature_garbage_is_logged_and_unknown() {
        let mut diag = Diagnostics::new();
        let facts =
            FakeOsFacts::default().with_file("/sys/class/thermal/thermal_zone0/temp", "hot");
        assert_eq!(Platform::Linux.cpu_temperature(&facts, &mut diag), None);
        assert!(diag.has_failure(ProbeKind::CpuTemperature));
    }

    #[test]
    fn windows_temperature_converts_deci_kelvin() {
        let mut diag = Diagnostics::new();
        let facts = FakeOsFacts {
            thermal: Some(Ok(Some(3132.0))),
            ..FakeOsFacts::default()
        };
        assert_eq!(Platform::Windows.cpu_temperature(&facts, &mut diag), Some(40.1));
    }

    #[test]
    fn windows_temperature_without_capability_is_a_warning() {
        let mut diag = Diagnostics::new();
        let facts = FakeOsFacts {
            thermal: Some(Err(ProbeError::CapabilityMissing("wmic".to_string()))),
            ..FakeOsFacts::default()
        };
        assert_eq!(Platform::Windows.cpu_temperature(&facts, &mut diag), None);
        assert_eq!(diag.failures()[0].severity, Severity::Warning);
    }

    #[test]
    fn reg_output_parses_hex_dword() {
        let text = "\r\nHKEY_LOCAL_MACHINE\\SOFTWARE\\...\\Virtualization\r\n    Enabled    REG_DWORD    0x1\r\n";
        assert_eq!(parse_reg_dword(text).unwrap(), 1);
        assert!(parse_reg_dword("ERROR: nothing").is_err());
    }

    #[test]
    fn reg_missing_key_is_not_found_other_failures_are_command_errors() {
        let missing =
            "ERROR: The system was unable to find the specified registry key or value.\r\n";
        assert!(matches!(classify_reg_failure(missing), ProbeError::NotFound(_)));

        let denied = "ERROR: Access is denied.\r\n";
        match classify_reg_failure(denied) {
            ProbeError::Command { command, detail } => {
                assert_eq!(command, "reg query");
                assert_eq!(detail, "ERROR: Access is denied.");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn reg_access_denied_is_reported_as_error() {
        let mut diag = Diagnostics::new();
        let facts = FakeOsFacts {
            registry: Some(Err(classify_reg_failure("ERROR: Access is denied."))),
            ..FakeOsFacts::default()
        };
        assert_eq!(Platform::Windows.virtualization_enabled(&facts, &mut diag), None);
        assert_eq!(diag.failures()[0].severity, Severity::Error);
    }

    #[test]
    fn wmic_csv_without_positive_reading_is_unknown() {
        let text = "Node,CurrentTemperature,InstanceName\r\nPC,0,TZ0\r\nPC,-5,TZ1\r\n";
        assert_eq!(parse_wmic_thermal_csv(text), None);
    }

    #[test]
    fn wmic_csv_picks_first_positive_reading() {
        let text = "\r\nNode,CurrentTemperature,InstanceName\r\nPC,0,TZ0\r\nPC,3010,ACPI\\ThermalZone\\TZ01_0\r\n";
        assert_eq!(parse_wmic_thermal_csv(text), Some(3010.0));
        assert_eq!(parse_wmic_thermal_csv("Node,CurrentTemperature,InstanceName"), None);
    }
}
