// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

const LINUX: Platform = Platform { os: Os::Linux, arch: Arch::X86_64 };
const MAC: Platform = Platform { os: Os::MacOs, arch: Arch::Aarch64 };

#[yare::parameterized(
    windows_x64 = { Platform { os: Os::Windows, arch: Arch::X86_64 }, true },
    linux_x64   = { LINUX, true },
    mac_arm     = { MAC, true },
    mac_intel   = { Platform { os: Os::MacOs, arch: Arch::X86_64 }, false },
    linux_arm   = { Platform { os: Os::Linux, arch: Arch::Aarch64 }, false },
    freebsd     = { Platform { os: Os::Other("freebsd"), arch: Arch::X86_64 }, false },
)]
fn supported_platforms(platform: Platform, expected: bool) {
    assert_eq!(platform.is_supported(), expected);
}

#[yare::parameterized(
    amd          = { "amd", Accelerator::Rocm, false },
    nvidia_old   = { "nvidia<30xx", Accelerator::Cuda, false },
    nvidia_new   = { "nvidia>=30xx", Accelerator::Cuda, false },
    none         = { "nogpu", Accelerator::Cpu, false },
    unrecognized = { "intel-arc", Accelerator::Rocm, true },
)]
fn linux_accelerator(tag: &str, expected: Accelerator, fallback: bool) {
    let choice = accelerator_for(&LINUX, &GpuType::from(tag), Accelerator::Rocm);
    assert_eq!(choice, AcceleratorChoice { accelerator: expected, fallback });
}

#[test]
fn macos_is_always_cpu() {
    for tag in ["amd", "nvidia>=30xx", "something"] {
        let choice = accelerator_for(&MAC, &GpuType::from(tag), Accelerator::Cuda);
        assert_eq!(choice.accelerator, Accelerator::Cpu);
        assert!(!choice.fallback);
    }
}

#[test]
fn gpu_tag_round_trips_through_serde() {
    let gpu: GpuType = serde_json::from_str("\"nvidia<30xx\"").unwrap();
    assert_eq!(gpu, GpuType::NvidiaPre30xx);
    assert!(gpu.wants_xformers());
    assert_eq!(serde_json::to_string(&GpuType::from("tpu")).unwrap(), "\"tpu\"");
}

#[test]
fn accelerator_parse() {
    assert_eq!("CUDA".parse::<Accelerator>().unwrap(), Accelerator::Cuda);
    crate::assert_err_contains!("tpu".parse::<Accelerator>(), "unknown accelerator");
}
