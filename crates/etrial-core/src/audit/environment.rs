//! Execution environment captured once per trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

const NVIDIA_GPUS_DIR: &str = "/proc/driver/nvidia/gpus";

/// Accelerator availability as seen at capture time.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AcceleratorInfo {
    pub available: bool,
    #[serde(default)]
    pub devices: Vec<String>,
    /// Where the information came from (`nvidia-driver`, `cuda-env`).
    #[serde(default)]
    pub source: Option<String>,
}

impl AcceleratorInfo {
    pub fn detect() -> Self {
        if let Ok(dir) = std::fs::read_dir(NVIDIA_GPUS_DIR) {
            let mut devices: Vec<String> = dir
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect();
            devices.sort();
            if !devices.is_empty() {
                return Self {
                    available: true,
                    devices,
                    source: Some("nvidia-driver".to_string()),
                };
            }
        }

        match std::env::var("CUDA_VISIBLE_DEVICES") {
            Ok(visible) if !visible.trim().is_empty() && visible.trim() != "-1" => Self {
                available: true,
                devices: visible
                    .split(',')
                    .map(|d| d.trim().to_string())
                    .filter(|d| !d.is_empty())
                    .collect(),
                source: Some("cuda-env".to_string()),
            },
            _ => Self::default(),
        }
    }
}

/// Immutable snapshot of the host that produced a trail.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnvironmentSnapshot {
    pub os: String,
    pub arch: String,
    pub family: String,
    pub crate_version: String,
    pub rust_version: String,
    pub hostname: String,
    pub cpu_count: usize,
    #[serde(default)]
    pub packages: BTreeMap<String, String>,
    #[serde(default)]
    pub accelerator: AcceleratorInfo,
    pub captured_at: DateTime<Utc>,
}

impl EnvironmentSnapshot {
    pub fn capture() -> Self {
        let mut packages = BTreeMap::new();
        packages.insert(
            env!("CARGO_PKG_NAME").to_string(),
            env!("CARGO_PKG_VERSION").to_string(),
        );

        Self {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            family: std::env::consts::FAMILY.to_string(),
            crate_version: env!("CARGO_PKG_VERSION").to_string(),
            rust_version: env!("CARGO_PKG_RUST_VERSION").to_string(),
            hostname: hostname(),
            cpu_count: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            packages,
            accelerator: AcceleratorInfo::detect(),
            captured_at: Utc::now(),
        }
    }

    pub fn with_package(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.packages.insert(name.into(), version.into());
        self
    }

    /// Field-level differences with another snapshot, ignoring capture time.
    pub fn differences(&self, other: &EnvironmentSnapshot) -> Vec<String> {
        let mut diffs = Vec::new();
        let mut check = |field: &str, a: &dyn std::fmt::Debug, b: &dyn std::fmt::Debug, same: bool| {
            if !same {
                diffs.push(format!("{field}: {a:?} vs {b:?}"));
            }
        };
        check("os", &self.os, &other.os, self.os == other.os);
        check("arch", &self.arch, &other.arch, self.arch == other.arch);
        check("family", &self.family, &other.family, self.family == other.family);
        check(
            "crate_version",
            &self.crate_version,
            &other.crate_version,
            self.crate_version == other.crate_version,
        );
        check(
            "rust_version",
            &self.rust_version,
            &other.rust_version,
            self.rust_version == other.rust_version,
        );
        check(
            "hostname",
            &self.hostname,
            &other.hostname,
            self.hostname == other.hostname,
        );
        check(
            "cpu_count",
            &self.cpu_count,
            &other.cpu_count,
            self.cpu_count == other.cpu_count,
        );
        check(
            "packages",
            &self.packages,
            &other.packages,
            self.packages == other.packages,
        );
        check(
            "accelerator",
            &self.accelerator,
            &other.accelerator,
            self.accelerator == other.accelerator,
        );
        diffs
    }

    pub fn matches(&self, other: &EnvironmentSnapshot) -> bool {
        self.differences(other).is_empty()
    }
}

fn hostname() -> String {
    for var in ["HOSTNAME", "COMPUTERNAME"] {
        if let Ok(name) = std::env::var(var) {
            if !name.trim().is_empty() {
                return name.trim().to_string();
            }
        }
    }
    read_trimmed(Path::new("/etc/hostname")).unwrap_or_else(|| "unknown".to_string())
}

fn read_trimmed(path: &Path) -> Option<String> {
    std::fs::read_to_string(path)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
