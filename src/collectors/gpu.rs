use crate::collectors::{GpuError, GpuReading, GpuSampler};
use std::io;
use std::process::{Command, Output};
use tracing::debug;

const QUERY: &[&str] = &[
    "--query-gpu=utilization.gpu,memory.used,temperature.gpu",
    "--format=csv,noheader,nounits",
];

/// Reads NVIDIA GPUs through `nvidia-smi`. No binary means no GPUs.
#[derive(Debug, Clone, Default)]
pub struct NvidiaSmiSampler;

impl GpuSampler for NvidiaSmiSampler {
    fn gpus(&mut self) -> Result<Vec<GpuReading>, GpuError> {
        let Some(output) = run_nvidia_smi(QUERY)? else {
            return Ok(Vec::new());
        };
        if !output.status.success() {
            debug!(status = %output.status, "nvidia-smi exited unsuccessfully");
            return Ok(Vec::new());
        }
        Ok(parse_nvidia_smi_csv(&String::from_utf8_lossy(&output.stdout)))
    }
}

fn run_nvidia_smi(args: &[&str]) -> Result<Option<Output>, GpuError> {
    let mut candidates = vec!["nvidia-smi"];
    if cfg!(target_os = "windows") {
        candidates.push(r"C:\Windows\System32\nvidia-smi.exe");
    }

    for command in candidates {
        match Command::new(command).args(args).output() {
            Ok(output) => return Ok(Some(output)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(command, "nvidia-smi not found");
            }
            Err(source) => {
                return Err(GpuError::Spawn {
                    command: command.to_string(),
                    source,
                })
            }
        }
    }
    Ok(None)
}

/// Parses `utilization, memory.used, temperature` rows; rows without a
/// usable utilisation or memory value are skipped.
pub fn parse_nvidia_smi_csv(text: &str) -> Vec<GpuReading> {
    text.lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.split(',').map(str::trim).collect();
            if parts.len() < 3 {
                return None;
            }
            Some(GpuReading {
                load: parse_f64_loose(parts[0])? / 100.0,
                memory_used_mb: parse_f64_loose(parts[1])?,
                temperature_celsius: parse_f64_loose(parts[2]),
            })
        })
        .collect()
}

fn parse_f64_loose(input: &str) -> Option<f64> {
    let trimmed = input.trim();
    if let Ok(v) = trimmed.parse::<f64>() {
        return Some(v);
    }

    let filtered: String = trimmed
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '-' | '+'))
        .collect();
    if filtered.is_empty() {
        return None;
    }

    filtered.replace(',', ".").parse::<f64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rows_and_scales_load_to_fraction() {
        let gpus = parse_nvidia_smi_csv("37, 1024, 61\n0, 512, [N/A]\n");
        assert_eq!(gpus.len(), 2);
        assert!((gpus[0].load - 0.37).abs() < 1e-9);
        assert_eq!(gpus[0].memory_used_mb, 1024.0);
        assert_eq!(gpus[0].temperature_celsius, Some(61.0));
        assert_eq!(gpus[1].load, 0.0);
        assert_eq!(gpus[1].temperature_celsius, None);
    }

    #[test]
    fn skips_malformed_rows() {
        assert!(parse_nvidia_smi_csv("No devices were found\n").is_empty());
        assert!(parse_nvidia_smi_csv("[N/A], 100, 50\n").is_empty());
    }

    #[test]
    fn loose_parse_handles_units_and_commas() {
        assert_eq!(parse_f64_loose("42 %"), Some(42.0));
        assert_eq!(parse_f64_loose("1,5"), Some(1.5));
        assert_eq!(parse_f64_loose("n/a"), None);
    }
}
