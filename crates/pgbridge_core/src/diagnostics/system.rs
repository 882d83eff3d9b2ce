//! One-time environment report attached to support logs.

use chrono::{DateTime, TimeZone};
use std::fmt::Display;
use sysinfo::{CpuRefreshKind, System};

/// Version of this crate, resolved at build time.
pub const PLUGIN_VERSION: &str = env!("CARGO_PKG_VERSION");

const BYTES_PER_GIB: f64 = 1_073_741_824.0;

/// Host facts shown in the report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemSnapshot {
    pub hostname: String,
    pub platform: String,
    pub arch: String,
    pub release: String,
    pub uptime_secs: u64,
    pub total_memory_bytes: u64,
    pub cpu_model: String,
    pub cpu_max_mhz: u64,
    pub cpu_count: usize,
}

impl SystemSnapshot {
    /// Read the current machine's facts.
    pub fn collect() -> Self {
        let mut sys = System::new();
        sys.refresh_memory();
        sys.refresh_cpu_specifics(CpuRefreshKind::everything());

        let cpus = sys.cpus();
        Self {
            hostname: System::host_name().unwrap_or_default(),
            platform: platform_name(std::env::consts::OS).to_string(),
            arch: arch_name(std::env::consts::ARCH).to_string(),
            release: System::kernel_version().unwrap_or_default(),
            uptime_secs: System::uptime(),
            total_memory_bytes: sys.total_memory(),
            cpu_model: cpus.first().map(|cpu| cpu.brand().trim().to_string()).unwrap_or_default(),
            cpu_max_mhz: cpus.iter().map(|cpu| cpu.frequency()).max().unwrap_or(0),
            cpu_count: cpus.len(),
        }
    }
}

/// Platform as host support tooling names it (`darwin`, `win32`, `linux`, ...).
pub fn platform_name(os: &str) -> &str {
    match os {
        "macos" => "darwin",
        "windows" => "win32",
        other => other,
    }
}

/// Architecture as host support tooling names it (`x64`, `arm64`, `ia32`, ...).
pub fn arch_name(arch: &str) -> &str {
    match arch {
        "x86_64" => "x64",
        "aarch64" => "arm64",
        "x86" => "ia32",
        "powerpc64" => "ppc64",
        other => other,
    }
}

/// Render the fixed-format report.
pub fn render_report<Tz>(
    app_version: &str,
    plugin_version: &str,
    snapshot: &SystemSnapshot,
    now: DateTime<Tz>,
) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    format!(
        "Date: {date}\n\
         Application version: {app_version}\n\
         Plugin version: {plugin_version}\n\
         \n\
         System information:\n \
         Hostname:  {hostname}\n \
         Platform:  {platform} {arch}\n \
         Release:   {release}\n \
         Uptime:    {uptime}\n \
         Total RAM: {memory}\n \
         CPU Model: {cpu_model}\n \
         CPU Clock: {cpu_mhz} MHZ\n \
         CPU Cores: {cpu_count} cores\n\
         \n",
        date = now.format("%a %b %d %Y %H:%M:%S GMT%z"),
        hostname = snapshot.hostname,
        platform = snapshot.platform,
        arch = snapshot.arch,
        release = snapshot.release,
        uptime = format_uptime(snapshot.uptime_secs),
        memory = format_memory(snapshot.total_memory_bytes),
        cpu_model = snapshot.cpu_model,
        cpu_mhz = snapshot.cpu_max_mhz,
        cpu_count = snapshot.cpu_count,
    )
}

/// `H:MM`; the leftover fraction of an hour is rounded down to whole minutes.
pub fn format_uptime(secs: u64) -> String {
    format!("{}:{:02}", secs / 3600, (secs % 3600) / 60)
}

/// Bytes as GiB with two decimals, e.g. `16.00 GB`.
pub fn format_memory(bytes: u64) -> String {
    format!("{:.2} GB", bytes as f64 / BYTES_PER_GIB)
}
