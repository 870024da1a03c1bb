//! Host hardware description and live memory telemetry.
//!
//! Memory figures come from `/proc/meminfo` where it exists. Elsewhere the
//! installed size falls back to the configured override and live sampling
//! reports "unknown", which the telemetry treats as safe to run.

use std::path::{Path, PathBuf};

use tabwise_config::ResourceConfig;
use tabwise_core::environment::{
    HardwareDescriptor, MemoryAssessment, MemoryStatus, PressureLevel, ResourceTelemetry,
    RuntimeProfile,
};
use tracing::{debug, warn};

const MEMINFO_PATH: &str = "/proc/meminfo";
const KB_PER_GB: f64 = 1024.0 * 1024.0;

/// Parsed subset of `/proc/meminfo`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemInfo {
    pub total_gb: f64,
    pub available_gb: f64,
}

impl MemInfo {
    /// Parse `/proc/meminfo` content. Needs both `MemTotal` and `MemAvailable`.
    pub fn parse(content: &str) -> Option<Self> {
        let mut total_kb = None;
        let mut available_kb = None;

        for line in content.lines() {
            let mut parts = line.split_whitespace();
            let key = parts.next();
            let value = parts.next().and_then(|v| v.parse::<u64>().ok());
            match (key, value) {
                (Some("MemTotal:"), Some(v)) => total_kb = Some(v),
                (Some("MemAvailable:"), Some(v)) => available_kb = Some(v),
                _ => {}
            }
        }

        Some(Self {
            total_gb: total_kb? as f64 / KB_PER_GB,
            available_gb: available_kb? as f64 / KB_PER_GB,
        })
    }

    fn read(path: &Path) -> Option<Self> {
        let content = std::fs::read_to_string(path).ok()?;
        Self::parse(&content)
    }
}

// ── Hardware ───────────────────────────────────────────────────────────

/// The machine we are running on.
#[derive(Debug, Clone)]
pub struct HostHardware {
    arch: String,
    total_memory_gb: f64,
}

impl HostHardware {
    /// Describe an explicit machine (tests, remote hosts).
    pub fn new(arch: impl Into<String>, total_memory_gb: f64) -> Self {
        Self {
            arch: arch.into(),
            total_memory_gb,
        }
    }

    /// Inspect the current host. `override_gb` wins over the OS report.
    pub fn detect(override_gb: Option<f64>) -> Self {
        let total = override_gb
            .or_else(|| MemInfo::read(Path::new(MEMINFO_PATH)).map(|m| m.total_gb))
            .unwrap_or_else(|| {
                warn!("Could not determine installed memory; set resources.total_memory_gb_override");
                0.0
            });
        debug!(arch = std::env::consts::ARCH, total_gb = total, "Detected host hardware");
        Self::new(std::env::consts::ARCH, total)
    }

    pub fn arch(&self) -> &str {
        &self.arch
    }
}

impl HardwareDescriptor for HostHardware {
    fn supports_profile(&self, profile: RuntimeProfile) -> bool {
        match profile {
            RuntimeProfile::Cpu => true,
            RuntimeProfile::Accelerated => self.arch == "aarch64",
        }
    }

    fn total_memory_gb(&self) -> f64 {
        self.total_memory_gb
    }
}

// ── Telemetry ──────────────────────────────────────────────────────────

/// Samples memory pressure on every call.
pub struct HostTelemetry {
    source: PathBuf,
    min_available_gb: f64,
    warning_ratio: f64,
    critical_ratio: f64,
}

impl HostTelemetry {
    pub fn new(config: &ResourceConfig) -> Self {
        Self::with_source(config, MEMINFO_PATH)
    }

    /// Read from a meminfo-formatted file other than `/proc/meminfo`.
    pub fn with_source(config: &ResourceConfig, source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            min_available_gb: config.min_available_gb,
            warning_ratio: config.warning_ratio,
            critical_ratio: config.critical_ratio,
        }
    }

    /// Map a sample onto a pressure level.
    pub fn classify(&self, info: &MemInfo) -> PressureLevel {
        if info.total_gb <= 0.0 {
            return PressureLevel::Normal;
        }
        let ratio = info.available_gb / info.total_gb;
        if ratio <= self.critical_ratio {
            PressureLevel::Critical
        } else if ratio <= self.warning_ratio {
            PressureLevel::Warning
        } else {
            PressureLevel::Normal
        }
    }

    fn sample(&self) -> Option<MemInfo> {
        MemInfo::read(&self.source)
    }
}

impl ResourceTelemetry for HostTelemetry {
    fn is_safe_to_run(&self) -> bool {
        self.assess().safe_to_run
    }

    fn current_status(&self) -> MemoryStatus {
        self.assess().status
    }

    fn assess(&self) -> MemoryAssessment {
        match self.sample() {
            Some(info) => {
                let pressure_level = self.classify(&info);
                MemoryAssessment {
                    safe_to_run: pressure_level != PressureLevel::Critical
                        && info.available_gb >= self.min_available_gb,
                    status: MemoryStatus {
                        pressure_level,
                        available_gb: info.available_gb,
                        total_gb: info.total_gb,
                    },
                }
            }
            // Unreadable source: let inference proceed.
            None => MemoryAssessment {
                safe_to_run: true,
                status: MemoryStatus {
                    pressure_level: PressureLevel::Normal,
                    available_gb: 0.0,
                    total_gb: 0.0,
                },
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = "MemTotal:       16777216 kB\n\
                          MemFree:         1048576 kB\n\
                          MemAvailable:    4194304 kB\n\
                          Buffers:          123456 kB\n";

    fn meminfo_file(total_kb: u64, available_kb: u64) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "MemTotal: {total_kb} kB").unwrap();
        writeln!(file, "MemAvailable: {available_kb} kB").unwrap();
        file
    }

    #[test]
    fn parses_meminfo() {
        let info = MemInfo::parse(SAMPLE).unwrap();
        assert!((info.total_gb - 16.0).abs() < 1e-9);
        assert!((info.available_gb - 4.0).abs() < 1e-9);
    }

    #[test]
    fn parse_requires_both_fields() {
        assert!(MemInfo::parse("MemTotal: 1024 kB\n").is_none());
        assert!(MemInfo::parse("garbage").is_none());
    }

    #[test]
    fn accelerated_profile_needs_arm64() {
        let arm = HostHardware::new("aarch64", 16.0);
        let x86 = HostHardware::new("x86_64", 16.0);
        assert!(arm.supports_profile(RuntimeProfile::Accelerated));
        assert!(!x86.supports_profile(RuntimeProfile::Accelerated));
        assert!(x86.supports_profile(RuntimeProfile::Cpu));
    }

    #[test]
    fn override_wins_over_os_report() {
        let hw = HostHardware::detect(Some(12.5));
        assert!((hw.total_memory_gb() - 12.5).abs() < f64::EPSILON);
    }

    #[test]
    fn classifies_pressure_levels() {
        let telemetry = HostTelemetry::new(&ResourceConfig::default());
        let at = |available| MemInfo {
            total_gb: 10.0,
            available_gb: available,
        };
        assert_eq!(telemetry.classify(&at(5.0)), PressureLevel::Normal);
        assert_eq!(telemetry.classify(&at(1.5)), PressureLevel::Warning);
        assert_eq!(telemetry.classify(&at(0.5)), PressureLevel::Critical);
    }

    #[test]
    fn critical_sample_is_not_safe() {
        // 16 GB total, 0.5 GB available
        let file = meminfo_file(16 * 1024 * 1024, 512 * 1024);
        let telemetry = HostTelemetry::with_source(&ResourceConfig::default(), file.path());
        assert!(!telemetry.is_safe_to_run());
        let status = telemetry.current_status();
        assert_eq!(status.pressure_level, PressureLevel::Critical);
        assert!((status.available_gb - 0.5).abs() < 1e-9);
    }

    #[test]
    fn healthy_sample_is_safe() {
        let file = meminfo_file(16 * 1024 * 1024, 8 * 1024 * 1024);
        let telemetry = HostTelemetry::with_source(&ResourceConfig::default(), file.path());
        assert!(telemetry.is_safe_to_run());
        assert_eq!(telemetry.current_status().pressure_level, PressureLevel::Normal);
    }

    #[test]
    fn assessment_verdict_matches_its_status() {
        // 16 GB total, 0.5 GB available
        let file = meminfo_file(16 * 1024 * 1024, 512 * 1024);
        let telemetry = HostTelemetry::with_source(&ResourceConfig::default(), file.path());
        let assessment = telemetry.assess();
        assert!(!assessment.safe_to_run);
        assert_eq!(assessment.status.pressure_level, PressureLevel::Critical);
        assert!((assessment.status.total_gb - 16.0).abs() < 1e-9);
    }

    #[test]
    fn missing_source_is_treated_as_safe() {
        let telemetry =
            HostTelemetry::with_source(&ResourceConfig::default(), "/nonexistent/meminfo");
        assert!(telemetry.is_safe_to_run());
    }
}
