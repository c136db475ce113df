//! Platform capability probing.
//!
//! No third-party system-info crate or subprocess call (`nvidia-smi`,
//! `lspci`) is used here. CPU count comes from the standard library,
//! memory from a best-effort `/proc/meminfo` read on Linux (`0.0`
//! elsewhere), and GPU/Apple-Silicon flags are `cfg`-gated
//! compile-time facts rather than runtime probes.

use std::collections::HashMap;

use lancompute_core::model::CapabilityValue;

pub fn detect() -> HashMap<String, CapabilityValue> {
    let mut caps = HashMap::new();

    caps.insert(
        "platform".to_string(),
        CapabilityValue::String(std::env::consts::OS.to_string()),
    );
    caps.insert(
        "architecture".to_string(),
        CapabilityValue::String(std::env::consts::ARCH.to_string()),
    );
    caps.insert("hostname".to_string(), CapabilityValue::String(hostname()));

    let cpu_count = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    caps.insert(
        "cpu_count".to_string(),
        CapabilityValue::Number(cpu_count as f64),
    );
    caps.insert(
        "cpu_count_logical".to_string(),
        CapabilityValue::Number(cpu_count as f64),
    );

    let (total_gb, available_gb) = read_meminfo_gb().unwrap_or((0.0, 0.0));
    caps.insert("memory_gb".to_string(), CapabilityValue::Number(total_gb));
    caps.insert(
        "memory_available_gb".to_string(),
        CapabilityValue::Number(available_gb),
    );

    let apple_silicon = cfg!(all(target_os = "macos", target_arch = "aarch64"));
    caps.insert("apple_silicon".to_string(), CapabilityValue::Bool(apple_silicon));
    caps.insert("unified_memory".to_string(), CapabilityValue::Bool(apple_silicon));
    // No GPU-detection crate in the pack to drive these at runtime.
    caps.insert("gpu_available".to_string(), CapabilityValue::Bool(false));
    caps.insert("metal_support".to_string(), CapabilityValue::Bool(false));

    caps
}

pub fn hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "worker".to_string())
}

#[cfg(target_os = "linux")]
fn read_meminfo_gb() -> Option<(f64, f64)> {
    let contents = std::fs::read_to_string("/proc/meminfo").ok()?;
    let mut total_kb = None;
    let mut available_kb = None;
    for line in contents.lines() {
        if let Some(rest) = line.strip_prefix("MemTotal:") {
            total_kb = rest.split_whitespace().next()?.parse::<u64>().ok();
        } else if let Some(rest) = line.strip_prefix("MemAvailable:") {
            available_kb = rest.split_whitespace().next()?.parse::<u64>().ok();
        }
    }
    let to_gb = |kb: u64| kb as f64 / (1024.0 * 1024.0);
    Some((total_kb.map(to_gb).unwrap_or(0.0), available_kb.map(to_gb).unwrap_or(0.0)))
}

#[cfg(not(target_os = "linux"))]
fn read_meminfo_gb() -> Option<(f64, f64)> {
    None
}
