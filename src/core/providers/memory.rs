use std::collections::HashMap;

use super::{
    error::{ProviderError, ProviderResult},
    read_file, round1,
    traits::MetricProvider,
    value::SensorValue,
};
use crate::register_provider;

const PROC_MEMINFO: &str = "/proc/meminfo";

/// `/proc/meminfo` values in kB.
pub fn parse_meminfo(content: &str) -> HashMap<&str, u64> {
    content
        .lines()
        .filter_map(|line| {
            let (key, rest) = line.split_once(':')?;
            let value = rest.split_whitespace().next()?.parse().ok()?;
            Some((key.trim(), value))
        })
        .collect()
}

fn get(info: &HashMap<&str, u64>, key: &str) -> ProviderResult<u64> {
    info.get(key)
        .copied()
        .ok_or_else(|| ProviderError::parse(key, "missing from /proc/meminfo"))
}

/// Share of RAM not available to new allocations.
pub fn ram_percent(info: &HashMap<&str, u64>) -> ProviderResult<f64> {
    let total = get(info, "MemTotal")?;
    if total == 0 {
        return Err(ProviderError::parse("MemTotal", "zero"));
    }
    let available = match get(info, "MemAvailable") {
        Ok(v) => v,
        // Kernels before 3.14
        Err(_) => get(info, "MemFree")? + get(info, "Buffers")? + get(info, "Cached")?,
    };
    Ok(round1(
        total.saturating_sub(available) as f64 / total as f64 * 100.0,
    ))
}

/// Swap in use; `0.0` when there is no swap.
pub fn swap_percent(info: &HashMap<&str, u64>) -> ProviderResult<f64> {
    let total = get(info, "SwapTotal")?;
    if total == 0 {
        return Ok(0.0);
    }
    let free = get(info, "SwapFree")?;
    Ok(round1(total.saturating_sub(free) as f64 / total as f64 * 100.0))
}

#[derive(Debug, Default)]
pub struct MemoryRamProvider;

#[derive(Debug, Default)]
pub struct MemorySwapProvider;

#[async_trait::async_trait]
impl MetricProvider for MemoryRamProvider {
    async fn read(&self) -> ProviderResult<SensorValue> {
        let content = read_file(PROC_MEMINFO).await?;
        Ok(SensorValue::Float(ram_percent(&parse_meminfo(&content))?))
    }
}

#[async_trait::async_trait]
impl MetricProvider for MemorySwapProvider {
    async fn read(&self) -> ProviderResult<SensorValue> {
        let content = read_file(PROC_MEMINFO).await?;
        Ok(SensorValue::Float(swap_percent(&parse_meminfo(&content))?))
    }
}

register_provider!(MemoryRamProvider, "memory_ram");
register_provider!(MemorySwapProvider, "memory_swap");
