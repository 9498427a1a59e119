use super::{keys, ProviderError, RawCpuInfo, RawValue};
use std::fs;
use std::path::Path;

const CPUINFO_PATH: &str = "/proc/cpuinfo";
const CPU0_SYSFS: &str = "/sys/devices/system/cpu/cpu0";

// Kernel flag name -> canonical extension name.
const FLAG_ALIASES: &[(&str, &str)] = &[
    ("pni", "sse3"),
    ("sha_ni", "sha"),
    ("fma", "fma3"),
    ("rtm", "tsx"),
    ("hle", "tsx"),
];

pub fn read_cpu_info() -> Result<RawCpuInfo, ProviderError> {
    let text = fs::read_to_string(CPUINFO_PATH).map_err(|source| ProviderError::Read {
        path: CPUINFO_PATH.to_string(),
        source,
    })?;
    let mut info = parse_cpuinfo(&text);
    read_cache_geometry(Path::new(CPU0_SYSFS), &mut info);

    if info.get(keys::MAX_FREQUENCY).is_none() {
        let max_khz = fs::read_to_string(Path::new(CPU0_SYSFS).join("cpufreq/cpuinfo_max_freq"))
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok());
        if let Some(khz) = max_khz {
            info.insert(keys::MAX_FREQUENCY, RawValue::Text(format_ghz(khz as f64 / 1e6)));
        }
    }
    Ok(info)
}

/// Parses the first processor block of `/proc/cpuinfo`.
pub fn parse_cpuinfo(text: &str) -> RawCpuInfo {
    let mut info = RawCpuInfo::new();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            if info.get(keys::VENDOR).is_some() || !info.flags().is_empty() {
                break;
            }
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "vendor_id" | "CPU implementer" => {
                info.insert(keys::VENDOR, RawValue::Text(value.to_string()))
            }
            "model name" | "Model" => {
                if let Some(freq) = advertised_frequency_from_brand(value) {
                    info.insert(keys::MAX_FREQUENCY, RawValue::Text(freq));
                }
                info.insert(keys::BRAND, RawValue::Text(value.to_string()));
            }
            "cpu family" => insert_integer(&mut info, keys::FAMILY, value),
            "model" => insert_integer(&mut info, keys::MODEL, value),
            "stepping" => insert_integer(&mut info, keys::STEPPING, value),
            "flags" | "Features" => info.extend_flags(value.split_whitespace()),
            _ => {}
        }
    }

    apply_flag_aliases(&mut info);
    info
}

/// Adds canonical extension names next to the kernel spelling.
pub fn apply_flag_aliases(info: &mut RawCpuInfo) {
    let aliases: Vec<&str> = FLAG_ALIASES
        .iter()
        .filter(|(kernel, _)| info.has_flag(kernel))
        .map(|(_, canonical)| *canonical)
        .collect();
    info.extend_flags(aliases);
}

/// Extracts `3.60GHz` style suffixes from brand strings such as
/// `Intel(R) Core(TM) i7-7700 CPU @ 3.60GHz`.
pub fn advertised_frequency_from_brand(brand: &str) -> Option<String> {
    let (_, suffix) = brand.rsplit_once('@')?;
    let suffix = suffix.trim().to_lowercase();
    let (number, scale) = if let Some(n) = suffix.strip_suffix("ghz") {
        (n, 1.0)
    } else if let Some(n) = suffix.strip_suffix("mhz") {
        (n, 1e-3)
    } else {
        return None;
    };
    let ghz = number.trim().parse::<f64>().ok()? * scale;
    Some(format_ghz(ghz))
}

fn format_ghz(ghz: f64) -> String {
    format!("{ghz:.4} GHz")
}

fn insert_integer(info: &mut RawCpuInfo, key: &str, value: &str) {
    if let Ok(v) = value.parse::<i64>() {
        info.insert(key, RawValue::Integer(v));
    }
}

fn read_cache_geometry(cpu_dir: &Path, info: &mut RawCpuInfo) {
    let Ok(entries) = fs::read_dir(cpu_dir.join("cache")) else {
        return;
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let is_index = path
            .file_name()
            .and_then(|v| v.to_str())
            .is_some_and(|name| name.starts_with("index"));
        if !is_index {
            continue;
        }

        let read = |name: &str| {
            fs::read_to_string(path.join(name))
                .ok()
                .map(|s| s.trim().to_string())
        };
        let (Some(level), Some(kind)) = (read("level"), read("type")) else {
            continue;
        };
        let size = read("size").and_then(|s| parse_cache_size(&s));
        let ways = read("ways_of_associativity").and_then(|s| s.parse::<i64>().ok());

        let (size_key, ways_key) = match (level.as_str(), kind.as_str()) {
            ("1", "Instruction") => (keys::L1_INSTRUCTION_CACHE, None),
            ("1", "Data") => (keys::L1_DATA_CACHE, Some(keys::L1_ASSOCIATIVITY)),
            ("2", _) => (keys::L2_CACHE, Some(keys::L2_ASSOCIATIVITY)),
            ("3", _) => (keys::L3_CACHE, None),
            _ => continue,
        };
        if let Some(bytes) = size {
            info.insert(size_key, RawValue::Integer(bytes));
        }
        if let (Some(key), Some(ways)) = (ways_key, ways) {
            info.insert(key, RawValue::Integer(ways));
        }
    }
}

/// Converts sysfs sizes (`32K`, `8M`, `1024`) into bytes.
pub fn parse_cache_size(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    let (digits, multiplier) = match raw.chars().last()? {
        'K' | 'k' => (&raw[..raw.len() - 1], 1024),
        'M' | 'm' => (&raw[..raw.len() - 1], 1024 * 1024),
        'G' | 'g' => (&raw[..raw.len() - 1], 1024 * 1024 * 1024),
        _ => (raw, 1),
    };
    digits
        .trim()
        .parse::<i64>()
        .ok()
        .and_then(|v| v.checked_mul(multiplier))
}
