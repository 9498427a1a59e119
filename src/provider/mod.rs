pub mod linux;

use std::collections::{BTreeSet, HashMap};
use thiserror::Error;

/// Lookup keys understood by the snapshot builder.
pub mod keys {
    pub const VENDOR: &str = "vendor_id_raw";
    pub const BRAND: &str = "brand_raw";
    pub const BITS: &str = "bits";
    pub const ARCH: &str = "arch_string_raw";
    pub const FAMILY: &str = "family";
    pub const MODEL: &str = "model";
    pub const STEPPING: &str = "stepping";
    pub const L1_INSTRUCTION_CACHE: &str = "l1_instruction_cache_size";
    pub const L1_DATA_CACHE: &str = "l1_data_cache_size";
    pub const L2_CACHE: &str = "l2_cache_size";
    pub const L3_CACHE: &str = "l3_cache_size";
    pub const L1_ASSOCIATIVITY: &str = "l1_cache_associativity";
    pub const L2_ASSOCIATIVITY: &str = "l2_cache_associativity";
    pub const MAX_FREQUENCY: &str = "hz_advertised_friendly";
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("hardware information unavailable: {0}")]
    Unavailable(String),
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
}

/// Source of raw CPU facts. Every lookup inside the result may be absent.
pub trait HardwareInfoProvider {
    fn cpu_info(&self) -> Result<RawCpuInfo, ProviderError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Integer(i64),
    Text(String),
}

#[derive(Debug, Clone, Default)]
pub struct RawCpuInfo {
    values: HashMap<String, RawValue>,
    flags: BTreeSet<String>,
}

impl RawCpuInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: RawValue) -> Self {
        self.insert(key, value);
        self
    }

    pub fn with_flags<I, S>(mut self, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.extend_flags(flags);
        self
    }

    pub fn insert(&mut self, key: &str, value: RawValue) {
        self.values.insert(key.to_string(), value);
    }

    pub fn extend_flags<I, S>(&mut self, flags: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.flags.extend(
            flags
                .into_iter()
                .map(|f| f.as_ref().trim().to_lowercase())
                .filter(|f| !f.is_empty()),
        );
    }

    pub fn get(&self, key: &str) -> Option<&RawValue> {
        self.values.get(key)
    }

    pub fn text(&self, key: &str) -> Option<String> {
        match self.values.get(key)? {
            RawValue::Text(s) if s.trim().is_empty() => None,
            RawValue::Text(s) => Some(s.clone()),
            RawValue::Integer(v) => Some(v.to_string()),
        }
    }

    /// Integer lookup; textual values are accepted when they parse cleanly.
    pub fn integer(&self, key: &str) -> Option<i64> {
        match self.values.get(key)? {
            RawValue::Integer(v) => Some(*v),
            RawValue::Text(s) => s.trim().parse().ok(),
        }
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.contains(flag)
    }

    pub fn flags(&self) -> &BTreeSet<String> {
        &self.flags
    }
}

/// Provider backed by the running host.
#[derive(Debug, Clone, Default)]
pub struct SystemCpuInfoProvider;

impl SystemCpuInfoProvider {
    pub fn new() -> Self {
        Self
    }
}

impl HardwareInfoProvider for SystemCpuInfoProvider {
    fn cpu_info(&self) -> Result<RawCpuInfo, ProviderError> {
        let mut info = if cfg!(target_os = "linux") {
            linux::read_cpu_info()?
        } else {
            generic_cpu_info()?
        };

        if info.get(keys::BITS).is_none() {
            let bits = if cfg!(target_pointer_width = "64") { 64 } else { 32 };
            info.insert(keys::BITS, RawValue::Integer(bits));
        }
        if info.get(keys::ARCH).is_none() {
            info.insert(
                keys::ARCH,
                RawValue::Text(std::env::consts::ARCH.to_string()),
            );
        }
        Ok(info)
    }
}

fn generic_cpu_info() -> Result<RawCpuInfo, ProviderError> {
    use sysinfo::{CpuExt, CpuRefreshKind, RefreshKind, System, SystemExt};

    let system =
        System::new_with_specifics(RefreshKind::new().with_cpu(CpuRefreshKind::everything()));
    let cpu = system
        .cpus()
        .first()
        .ok_or_else(|| ProviderError::Unavailable("no CPU reported by the OS".to_string()))?;

    let mut info = RawCpuInfo::new();
    if !cpu.vendor_id().trim().is_empty() {
        info.insert(keys::VENDOR, RawValue::Text(cpu.vendor_id().trim().to_string()));
    }
    let brand = cpu.brand().trim().to_string();
    if let Some(freq) = linux::advertised_frequency_from_brand(&brand) {
        info.insert(keys::MAX_FREQUENCY, RawValue::Text(freq));
    }
    if !brand.is_empty() {
        info.insert(keys::BRAND, RawValue::Text(brand));
    }
    info.extend_flags(detected_x86_flags());
    linux::apply_flag_aliases(&mut info);
    Ok(info)
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
fn detected_x86_flags() -> Vec<&'static str> {
    let mut flags = Vec::new();
    macro_rules! probe {
        ($($feature:tt => $flag:expr),* $(,)?) => {
            $(
                if std::is_x86_feature_detected!($feature) {
                    flags.push($flag);
                }
            )*
        };
    }
    // Names follow the kernel's /proc/cpuinfo spelling.
    probe!(
        "sse" => "sse",
        "sse2" => "sse2",
        "sse3" => "pni",
        "ssse3" => "ssse3",
        "sse4.1" => "sse4_1",
        "sse4.2" => "sse4_2",
        "avx" => "avx",
        "avx2" => "avx2",
        "avx512f" => "avx512f",
        "aes" => "aes",
        "fma" => "fma",
        "f16c" => "f16c",
        "sha" => "sha_ni",
        "rdrand" => "rdrand",
        "rdseed" => "rdseed",
        "popcnt" => "popcnt",
        "bmi1" => "bmi1",
        "bmi2" => "bmi2",
        "lzcnt" => "abm",
    );
    // Every x86_64 part carries these; the detection macro does not expose them.
    if cfg!(target_arch = "x86_64") {
        flags.extend(["mmx", "tsc"]);
    }
    flags
}

#[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
fn detected_x86_flags() -> Vec<&'static str> {
    Vec::new()
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;

    /// Provider returning a fixed fact set, or failing when `info` is `None`.
    #[derive(Debug, Clone, Default)]
    pub struct FakeProvider {
        pub info: Option<RawCpuInfo>,
    }

    impl FakeProvider {
        pub fn new(info: RawCpuInfo) -> Self {
            Self { info: Some(info) }
        }

        pub fn failing() -> Self {
            Self { info: None }
        }
    }

    impl HardwareInfoProvider for FakeProvider {
        fn cpu_info(&self) -> Result<RawCpuInfo, ProviderError> {
            self.info
                .clone()
                .ok_or_else(|| ProviderError::Unavailable("fake provider offline".to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_are_normalized_to_lowercase() {
        let info = RawCpuInfo::new().with_flags(["VMX", " sse2 ", ""]);
        assert!(info.has_flag("vmx"));
        assert!(info.has_flag("sse2"));
        assert_eq!(info.flags().len(), 2);
    }

    #[test]
    fn integer_lookup_accepts_numeric_text() {
        let info = RawCpuInfo::new()
            .with(keys::FAMILY, RawValue::Text("6".to_string()))
            .with(keys::MODEL, RawValue::Text("Zen".to_string()))
            .with(keys::STEPPING, RawValue::Integer(10));
        assert_eq!(info.integer(keys::FAMILY), Some(6));
        assert_eq!(info.integer(keys::MODEL), None);
        assert_eq!(info.integer(keys::STEPPING), Some(10));
        assert_eq!(info.integer(keys::BITS), None);
    }

    #[test]
    fn blank_text_counts_as_absent() {
        let info = RawCpuInfo::new().with(keys::BRAND, RawValue::Text("  ".to_string()));
        assert_eq!(info.text(keys::BRAND), None);
    }
}
