// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Os {
    Windows,
    Linux,
    MacOs,
    Other(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    X86_64,
    Aarch64,
    Other(&'static str),
}

/// Host operating system and CPU architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Platform {
    pub os: Os,
    pub arch: Arch,
}

impl Platform {
    pub fn current() -> Self {
        let os = match std::env::consts::OS {
            "windows" => Os::Windows,
            "linux" => Os::Linux,
            "macos" => Os::MacOs,
            other => Os::Other(other),
        };
        let arch = match std::env::consts::ARCH {
            "x86_64" => Arch::X86_64,
            "aarch64" => Arch::Aarch64,
            other => Arch::Other(other),
        };
        Self { os, arch }
    }

    /// Windows x86_64, Linux x86_64 and macOS aarch64.
    pub fn is_supported(&self) -> bool {
        matches!(
            (self.os, self.arch),
            (Os::Windows, Arch::X86_64) | (Os::Linux, Arch::X86_64) | (Os::MacOs, Arch::Aarch64)
        )
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let os = match self.os {
            Os::Windows => "windows",
            Os::Linux => "linux",
            Os::MacOs => "macos",
            Os::Other(s) => s,
        };
        let arch = match self.arch {
            Arch::X86_64 => "x86_64",
            Arch::Aarch64 => "aarch64",
            Arch::Other(s) => s,
        };
        write!(f, "{os} {arch}")
    }
}

/// GPU class chosen by the user at install time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GpuType {
    /// Nvidia 20xx and older; gets the `xformers` extra.
    NvidiaPre30xx,
    Nvidia30xxPlus,
    Amd,
    NoGpu,
    Other(String),
}

impl GpuType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::NvidiaPre30xx => "nvidia<30xx",
            Self::Nvidia30xxPlus => "nvidia>=30xx",
            Self::Amd => "amd",
            Self::NoGpu => "nogpu",
            Self::Other(tag) => tag,
        }
    }

    pub fn wants_xformers(&self) -> bool {
        matches!(self, Self::NvidiaPre30xx)
    }
}

impl From<&str> for GpuType {
    fn from(tag: &str) -> Self {
        match tag {
            "nvidia<30xx" => Self::NvidiaPre30xx,
            "nvidia>=30xx" => Self::Nvidia30xxPlus,
            "amd" => Self::Amd,
            "nogpu" => Self::NoGpu,
            other => Self::Other(other.to_owned()),
        }
    }
}

impl fmt::Display for GpuType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for GpuType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for GpuType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        Ok(Self::from(tag.as_str()))
    }
}

/// Torch build flavor, which selects the package index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Accelerator {
    Cuda,
    Rocm,
    Cpu,
}

impl Accelerator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cuda => "cuda",
            Self::Rocm => "rocm",
            Self::Cpu => "cpu",
        }
    }
}

impl fmt::Display for Accelerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Accelerator {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cuda" => Ok(Self::Cuda),
            "rocm" => Ok(Self::Rocm),
            "cpu" => Ok(Self::Cpu),
            other => anyhow::bail!("unknown accelerator: {other}"),
        }
    }
}

/// Accelerator selection. `fallback` is true when the GPU tag was
/// unrecognized and `unknown` was used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcceleratorChoice {
    pub accelerator: Accelerator,
    pub fallback: bool,
}

pub fn accelerator_for(platform: &Platform, gpu: &GpuType, unknown: Accelerator) -> AcceleratorChoice {
    // macOS has no separate index for MPS builds.
    if platform.os == Os::MacOs {
        return AcceleratorChoice { accelerator: Accelerator::Cpu, fallback: false };
    }
    let accelerator = match gpu {
        GpuType::Amd => Accelerator::Rocm,
        GpuType::NvidiaPre30xx | GpuType::Nvidia30xxPlus => Accelerator::Cuda,
        GpuType::NoGpu => Accelerator::Cpu,
        GpuType::Other(_) => return AcceleratorChoice { accelerator: unknown, fallback: true },
    };
    AcceleratorChoice { accelerator, fallback: false }
}

#[cfg(test)]
#[path = "platform_tests.rs"]
mod tests;
