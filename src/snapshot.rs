//! Normalisation of raw hardware facts into a single [`Snapshot`].
//!
//! Every field that a provider or platform may fail to report is an
//! `Option` and serializes as `null`; one missing value never blocks the
//! others. Only a failure to obtain the raw fact set at all collapses the
//! result into [`SnapshotDocument::Failed`].

use crate::collectors::ResourceSampler;
use crate::diagnostics::{Diagnostics, ProbeFailure};
use crate::platform::{OsFacts, Platform};
use crate::provider::linux::parse_cache_size;
use crate::provider::{keys, HardwareInfoProvider, ProviderError, RawCpuInfo, RawValue};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::time::SystemTime;
use tracing::error;

/// Instruction-set extensions reported in [`Snapshot::extensions`].
pub const EXTENSIONS: [&str; 18] = [
    "sse", "sse2", "sse3", "ssse3", "sse4_1", "sse4_2", "avx", "avx2", "avx512f", "aes", "fma3",
    "f16c", "sha", "tsc", "tsx", "rdrand", "rdseed", "mmx",
];

const INTEL_VENDOR: &str = "GenuineIntel";
const AMD_VENDOR: &str = "AuthenticAMD";

#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub metadata: Metadata,
    pub identification: Identification,
    pub architecture: Architecture,
    pub cores: Cores,
    pub cache: Cache,
    pub virtualization: Virtualization,
    pub extensions: ExtensionSupport,
    pub performance: Performance,
    pub raw_flags: Vec<String>,
    #[serde(skip)]
    pub diagnostics: Vec<ProbeFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Metadata {
    pub timestamp: String,
    pub platform: String,
    pub tool_version: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Identification {
    pub vendor: Option<String>,
    pub brand: Option<String>,
    pub is_intel: bool,
    pub is_amd: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Architecture {
    pub bits: Option<i64>,
    pub arch: Option<String>,
    pub family: Option<i64>,
    pub model: Option<i64>,
    pub stepping: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Cores {
    pub physical: Option<usize>,
    pub logical: Option<usize>,
    pub hyperthreading: bool,
}

/// Sizes are in bytes.
#[derive(Debug, Clone, Serialize)]
pub struct Cache {
    pub l1: L1Cache,
    pub l2: Option<i64>,
    pub l3: Option<i64>,
    pub associativity: CacheAssociativity,
}

#[derive(Debug, Clone, Serialize)]
pub struct L1Cache {
    pub instruction: Option<i64>,
    pub data: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheAssociativity {
    pub l1: Option<i64>,
    pub l2: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VirtualizationType {
    #[serde(rename = "Intel VT-x")]
    IntelVtx,
    #[serde(rename = "AMD-V")]
    AmdV,
}

#[derive(Debug, Clone, Serialize)]
pub struct Virtualization {
    pub supported: bool,
    #[serde(rename = "type")]
    pub kind: Option<VirtualizationType>,
    /// `None` when the platform cannot tell; never folded into `false`.
    pub enabled: Option<bool>,
}

/// Presence of each name in [`EXTENSIONS`], serialized as an ordered map.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtensionSupport(Vec<(&'static str, bool)>);

impl ExtensionSupport {
    pub fn from_info(info: &RawCpuInfo) -> Self {
        Self(
            EXTENSIONS
                .iter()
                .map(|ext| (*ext, info.has_flag(ext)))
                .collect(),
        )
    }

    #[cfg(test)]
    pub fn get(&self, name: &str) -> Option<bool> {
        self.0.iter().find(|(ext, _)| *ext == name).map(|(_, v)| *v)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl Serialize for ExtensionSupport {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, present) in &self.0 {
            map.serialize_entry(name, present)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Performance {
    pub frequency: Frequency,
    pub load_average: LoadAverages,
    pub usage_percent: Vec<f64>,
    pub temperature: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Frequency {
    /// MHz.
    pub current: Option<f64>,
    pub max: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadAverages {
    #[serde(rename = "1min")]
    pub one: Option<f64>,
    #[serde(rename = "5min")]
    pub five: Option<f64>,
    #[serde(rename = "15min")]
    pub fifteen: Option<f64>,
}

/// Minimal document returned when the fact set itself is unavailable.
#[derive(Debug, Clone, Serialize)]
pub struct CollectionFailure {
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum SnapshotDocument {
    Collected(Box<Snapshot>),
    Failed(CollectionFailure),
}

impl SnapshotDocument {
    pub fn snapshot(&self) -> Option<&Snapshot> {
        match self {
            SnapshotDocument::Collected(s) => Some(&**s),
            SnapshotDocument::Failed(_) => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, SnapshotDocument::Failed(_))
    }

    pub fn diagnostics(&self) -> &[ProbeFailure] {
        match self {
            SnapshotDocument::Collected(s) => &s.diagnostics,
            SnapshotDocument::Failed(_) => &[],
        }
    }
}

pub struct SnapshotBuilder<'a> {
    provider: &'a dyn HardwareInfoProvider,
    facts: &'a dyn OsFacts,
    platform: Platform,
}

impl<'a> SnapshotBuilder<'a> {
    pub fn new(
        provider: &'a dyn HardwareInfoProvider,
        facts: &'a dyn OsFacts,
        platform: Platform,
    ) -> Self {
        Self {
            provider,
            facts,
            platform,
        }
    }

    /// Never fails: a missing fact set yields [`SnapshotDocument::Failed`].
    pub fn build(&self, resources: &mut dyn ResourceSampler) -> SnapshotDocument {
        match self.try_build(resources) {
            Ok(snapshot) => SnapshotDocument::Collected(Box::new(snapshot)),
            Err(err) => {
                error!(severity = "critical", error = %err, "processor information collection failed");
                SnapshotDocument::Failed(CollectionFailure {
                    error: format!("failed to collect processor information: {err}"),
                })
            }
        }
    }

    fn try_build(&self, resources: &mut dyn ResourceSampler) -> Result<Snapshot, ProviderError> {
        let info = self.provider.cpu_info()?;
        let mut diag = Diagnostics::new();

        let virtualization = Virtualization {
            supported: info.has_flag("vmx") || info.has_flag("svm"),
            kind: virtualization_type(&info),
            enabled: self.platform.virtualization_enabled(self.facts, &mut diag),
        };
        let performance = self.performance(&info, resources, &mut diag);

        Ok(Snapshot {
            metadata: Metadata {
                timestamp: humantime::format_rfc3339_millis(SystemTime::now()).to_string(),
                platform: self.facts.platform_description(),
                tool_version: env!("CARGO_PKG_VERSION").to_string(),
            },
            identification: identification(&info),
            architecture: Architecture {
                bits: info.integer(keys::BITS),
                arch: info.text(keys::ARCH),
                family: info.integer(keys::FAMILY),
                model: info.integer(keys::MODEL),
                stepping: info.integer(keys::STEPPING),
            },
            cores: cores(resources),
            cache: Cache {
                l1: L1Cache {
                    instruction: cache_bytes(&info, keys::L1_INSTRUCTION_CACHE),
                    data: cache_bytes(&info, keys::L1_DATA_CACHE),
                },
                l2: cache_bytes(&info, keys::L2_CACHE),
                l3: cache_bytes(&info, keys::L3_CACHE),
                associativity: CacheAssociativity {
                    l1: info.integer(keys::L1_ASSOCIATIVITY),
                    l2: info.integer(keys::L2_ASSOCIATIVITY),
                },
            },
            virtualization,
            extensions: ExtensionSupport::from_info(&info),
            performance,
            raw_flags: info.flags().iter().cloned().collect(),
            diagnostics: diag.into_failures(),
        })
    }

    fn performance(
        &self,
        info: &RawCpuInfo,
        resources: &mut dyn ResourceSampler,
        diag: &mut Diagnostics,
    ) -> Performance {
        let load = resources.load_average();
        Performance {
            frequency: Frequency {
                current: resources.current_frequency_mhz(),
                max: info.text(keys::MAX_FREQUENCY),
            },
            load_average: LoadAverages {
                one: load.map(|l| l.one),
                five: load.map(|l| l.five),
                fifteen: load.map(|l| l.fifteen),
            },
            usage_percent: resources.per_core_usage_percent(),
            temperature: self.platform.cpu_temperature(self.facts, diag),
        }
    }
}

fn identification(info: &RawCpuInfo) -> Identification {
    let vendor = info.text(keys::VENDOR);
    let vendor_str = vendor.as_deref().unwrap_or_default();
    Identification {
        is_intel: vendor_str.contains(INTEL_VENDOR),
        is_amd: vendor_str.contains(AMD_VENDOR),
        vendor,
        brand: info.text(keys::BRAND),
    }
}

fn virtualization_type(info: &RawCpuInfo) -> Option<VirtualizationType> {
    if info.has_flag("vmx") {
        Some(VirtualizationType::IntelVtx)
    } else if info.has_flag("svm") {
        Some(VirtualizationType::AmdV)
    } else {
        None
    }
}

fn cores(resources: &mut dyn ResourceSampler) -> Cores {
    let physical = resources.physical_cores();
    let logical = resources.logical_cores();
    let hyperthreading = match (logical, physical) {
        (Some(logical), Some(physical)) => logical > physical,
        _ => false,
    };
    Cores {
        physical,
        logical,
        hyperthreading,
    }
}

fn cache_bytes(info: &RawCpuInfo, key: &str) -> Option<i64> {
    match info.get(key)? {
        RawValue::Integer(v) => Some(*v),
        RawValue::Text(s) => parse_cache_size(s),
    }
}
