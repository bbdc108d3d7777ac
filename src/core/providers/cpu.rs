//! CPU utilisation, load, temperature, frequency and `lscpu` facts.

use std::{collections::HashMap, path::PathBuf, sync::Mutex};

use super::{
    error::{ProviderError, ProviderResult},
    read_file, round1, run_command,
    traits::MetricProvider,
    value::SensorValue,
};
use crate::register_provider;

const PROC_STAT: &str = "/proc/stat";
const PROC_LOADAVG: &str = "/proc/loadavg";
const THERMAL_ROOT: &str = "/sys/class/thermal";
const SCALING_CUR_FREQ: &str = "/sys/devices/system/cpu/cpu0/cpufreq/scaling_cur_freq";

// ----------------------------------------------------------------------------
// Usage
// ----------------------------------------------------------------------------

/// Aggregate jiffies from the `cpu` line of `/proc/stat`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuTimes {
    pub busy: u64,
    pub idle: u64,
}

impl CpuTimes {
    pub fn total(&self) -> u64 {
        self.busy + self.idle
    }
}

/// Parses the first line of `/proc/stat`. Idle includes iowait; guest time
/// is already part of user/nice and is not counted twice.
pub fn parse_proc_stat(content: &str) -> ProviderResult<CpuTimes> {
    let line = content
        .lines()
        .find(|l| l.starts_with("cpu "))
        .ok_or_else(|| ProviderError::parse("cpu_usage", "no aggregate cpu line"))?;

    let fields: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .take(8)
        .map(|f| f.parse::<u64>())
        .collect::<Result<_, _>>()
        .map_err(|e| ProviderError::parse("cpu_usage", e.to_string()))?;
    if fields.len() < 4 {
        return Err(ProviderError::parse("cpu_usage", "expected at least 4 fields"));
    }

    let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
    let busy = fields.iter().sum::<u64>() - idle;
    Ok(CpuTimes { busy, idle })
}

/// Busy share between two samples, in percent with one decimal.
pub fn usage_between(prev: CpuTimes, curr: CpuTimes) -> f64 {
    let total = curr.total().saturating_sub(prev.total());
    if total == 0 {
        return 0.0;
    }
    let busy = curr.busy.saturating_sub(prev.busy);
    round1(busy as f64 / total as f64 * 100.0)
}

/// CPU utilisation since the previous read. The first read reports the
/// average since boot.
#[derive(Debug, Default)]
pub struct CpuUsageProvider {
    previous: Mutex<CpuTimes>,
}

#[async_trait::async_trait]
impl MetricProvider for CpuUsageProvider {
    async fn read(&self) -> ProviderResult<SensorValue> {
        let curr = parse_proc_stat(&read_file(PROC_STAT).await?)?;
        let mut previous = self
            .previous
            .lock()
            .map_err(|_| ProviderError::NoValue("cpu_usage state poisoned".into()))?;
        let usage = usage_between(*previous, curr);
        *previous = curr;
        Ok(SensorValue::Float(usage))
    }
}

register_provider!(CpuUsageProvider, "cpu_usage");

// ----------------------------------------------------------------------------
// Load average
// ----------------------------------------------------------------------------

pub fn parse_loadavg(content: &str, index: usize) -> ProviderResult<f64> {
    let field = content
        .split_whitespace()
        .nth(index)
        .ok_or_else(|| ProviderError::parse("loadavg", "missing field"))?;
    field
        .parse::<f64>()
        .map_err(|_| ProviderError::parse("loadavg", format!("invalid value: {field}")))
}

async fn load(index: usize) -> ProviderResult<SensorValue> {
    let content = read_file(PROC_LOADAVG).await?;
    Ok(SensorValue::Float(parse_loadavg(&content, index)?))
}

#[derive(Debug, Default)]
pub struct Load1mProvider;

#[derive(Debug, Default)]
pub struct Load5mProvider;

#[derive(Debug, Default)]
pub struct Load15mProvider;

#[async_trait::async_trait]
impl MetricProvider for Load1mProvider {
    async fn read(&self) -> ProviderResult<SensorValue> {
        load(0).await
    }
}

#[async_trait::async_trait]
impl MetricProvider for Load5mProvider {
    async fn read(&self) -> ProviderResult<SensorValue> {
        load(1).await
    }
}

#[async_trait::async_trait]
impl MetricProvider for Load15mProvider {
    async fn read(&self) -> ProviderResult<SensorValue> {
        load(2).await
    }
}

register_provider!(Load1mProvider, "cpu_load_1m");
register_provider!(Load5mProvider, "cpu_load_5m");
register_provider!(Load15mProvider, "cpu_load_15m");

// ----------------------------------------------------------------------------
// Temperature
// ----------------------------------------------------------------------------

/// Zone types that report the package or SoC temperature.
const PREFERRED_ZONES: [&str; 4] = ["x86_pkg_temp", "cpu-thermal", "cpu_thermal", "soc_thermal"];

/// Picks the preferred zone out of `(zone dir, type)` pairs, else the first.
pub fn pick_thermal_zone(zones: &[(PathBuf, String)]) -> Option<&PathBuf> {
    PREFERRED_ZONES
        .iter()
        .find_map(|wanted| zones.iter().find(|(_, kind)| kind == wanted))
        .or_else(|| zones.first())
        .map(|(path, _)| path)
}

/// `temp` files hold millidegrees Celsius.
pub fn parse_millidegrees(content: &str) -> ProviderResult<f64> {
    let raw = content.trim();
    let milli = raw
        .parse::<i64>()
        .map_err(|_| ProviderError::parse("cpu_temp", format!("invalid value: {raw}")))?;
    Ok(round1(milli as f64 / 1000.0))
}

#[derive(Debug, Default)]
pub struct CpuTempProvider;

#[async_trait::async_trait]
impl MetricProvider for CpuTempProvider {
    async fn read(&self) -> ProviderResult<SensorValue> {
        let mut entries = tokio::fs::read_dir(THERMAL_ROOT)
            .await
            .map_err(|source| ProviderError::FileRead {
                path: THERMAL_ROOT.to_string(),
                source,
            })?;

        let mut zones = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            if !name.to_string_lossy().starts_with("thermal_zone") {
                continue;
            }
            let path = entry.path();
            if let Ok(kind) = read_file(path.join("type")).await {
                zones.push((path, kind.trim().to_string()));
            }
        }
        zones.sort();

        let zone = pick_thermal_zone(&zones)
            .ok_or_else(|| ProviderError::NoValue("no thermal zones".into()))?;
        let content = read_file(zone.join("temp")).await?;
        Ok(SensorValue::Float(parse_millidegrees(&content)?))
    }
}

register_provider!(CpuTempProvider, "cpu_temp");

// ----------------------------------------------------------------------------
// Frequency
// ----------------------------------------------------------------------------

/// Current clock of cpu0 in GHz, two decimals.
#[derive(Debug, Default)]
pub struct CpuClockProvider;

fn khz_to_ghz(khz: f64) -> f64 {
    (khz / 10_000.0).round() / 100.0
}

#[async_trait::async_trait]
impl MetricProvider for CpuClockProvider {
    async fn read(&self) -> ProviderResult<SensorValue> {
        if let Ok(content) = read_file(SCALING_CUR_FREQ).await {
            let raw = content.trim();
            let khz = raw
                .parse::<f64>()
                .map_err(|_| ProviderError::parse("cpu_clock", format!("invalid value: {raw}")))?;
            return Ok(SensorValue::Float(khz_to_ghz(khz)));
        }

        // No cpufreq driver, fall back to the first "cpu MHz" in cpuinfo.
        let cpuinfo = read_file("/proc/cpuinfo").await?;
        let mhz = cpuinfo
            .lines()
            .find_map(|line| {
                let (key, value) = line.split_once(':')?;
                (key.trim() == "cpu MHz").then(|| value.trim().parse::<f64>().ok())?
            })
            .ok_or_else(|| ProviderError::NoValue("cpu frequency not exposed".into()))?;
        Ok(SensorValue::Float(khz_to_ghz(mhz * 1000.0)))
    }
}

register_provider!(CpuClockProvider, "cpu_clock");

// ----------------------------------------------------------------------------
// lscpu
// ----------------------------------------------------------------------------

/// `Key: value` pairs from `lscpu` output.
pub fn parse_lscpu(output: &str) -> HashMap<String, String> {
    output
        .lines()
        .filter_map(|line| {
            let (key, value) = line.split_once(':')?;
            Some((key.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

async fn lscpu() -> ProviderResult<HashMap<String, String>> {
    Ok(parse_lscpu(&run_command("lscpu", &[]).await?))
}

fn field<'a>(facts: &'a HashMap<String, String>, key: &str) -> ProviderResult<&'a str> {
    facts
        .get(key)
        .map(String::as_str)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ProviderError::NoValue(format!("lscpu has no '{key}'")))
}

fn integer_field(facts: &HashMap<String, String>, key: &str) -> ProviderResult<i64> {
    let raw = field(facts, key)?;
    raw.parse::<i64>()
        .map_err(|_| ProviderError::parse(key, format!("invalid value: {raw}")))
}

/// Physical cores: cores per socket times sockets (clusters on some ARM).
pub fn physical_cores(facts: &HashMap<String, String>) -> ProviderResult<i64> {
    let per_socket = integer_field(facts, "Core(s) per socket")
        .or_else(|_| integer_field(facts, "Core(s) per cluster"))?;
    let sockets = integer_field(facts, "Socket(s)")
        .or_else(|_| integer_field(facts, "Cluster(s)"))
        .unwrap_or(1);
    Ok(per_socket * sockets.max(1))
}

/// Maximum clock in GHz, two decimals.
pub fn max_clock_ghz(facts: &HashMap<String, String>) -> ProviderResult<f64> {
    let raw = field(facts, "CPU max MHz")?;
    let mhz = raw
        .parse::<f64>()
        .map_err(|_| ProviderError::parse("cpu_max", format!("invalid value: {raw}")))?;
    Ok(khz_to_ghz(mhz * 1000.0))
}

#[derive(Debug, Default)]
pub struct CpuArchProvider;

#[derive(Debug, Default)]
pub struct CpuModelProvider;

#[derive(Debug, Default)]
pub struct CpuThreadsProvider;

#[derive(Debug, Default)]
pub struct CpuCoresProvider;

#[derive(Debug, Default)]
pub struct CpuMaxProvider;

#[async_trait::async_trait]
impl MetricProvider for CpuArchProvider {
    async fn read(&self) -> ProviderResult<SensorValue> {
        Ok(SensorValue::from(field(&lscpu().await?, "Architecture")?))
    }
}

#[async_trait::async_trait]
impl MetricProvider for CpuModelProvider {
    async fn read(&self) -> ProviderResult<SensorValue> {
        Ok(SensorValue::from(field(&lscpu().await?, "Model name")?))
    }
}

#[async_trait::async_trait]
impl MetricProvider for CpuThreadsProvider {
    async fn read(&self) -> ProviderResult<SensorValue> {
        Ok(SensorValue::Integer(integer_field(&lscpu().await?, "CPU(s)")?))
    }
}

#[async_trait::async_trait]
impl MetricProvider for CpuCoresProvider {
    async fn read(&self) -> ProviderResult<SensorValue> {
        Ok(SensorValue::Integer(physical_cores(&lscpu().await?)?))
    }
}

#[async_trait::async_trait]
impl MetricProvider for CpuMaxProvider {
    async fn read(&self) -> ProviderResult<SensorValue> {
        Ok(SensorValue::Float(max_clock_ghz(&lscpu().await?)?))
    }
}

register_provider!(CpuArchProvider, "cpu_arch");
register_provider!(CpuModelProvider, "cpu_model");
register_provider!(CpuThreadsProvider, "cpu_threads");
register_provider!(CpuCoresProvider, "cpu_cores");
register_provider!(CpuMaxProvider, "cpu_max");
