//! Host identity, distribution, pending updates, boot time and board.

use chrono::{DateTime, Utc};

use super::{
    error::{ProviderError, ProviderResult},
    read_file, run_command,
    traits::MetricProvider,
    value::SensorValue,
};
use crate::register_provider;

const HOSTNAME: &str = "/proc/sys/kernel/hostname";
const OS_RELEASE: &str = "/etc/os-release";
const PROC_STAT: &str = "/proc/stat";
const DEVICE_TREE_MODEL: &str = "/sys/firmware/devicetree/base/model";
const DMI_VENDOR: &str = "/sys/devices/virtual/dmi/id/sys_vendor";
const DMI_PRODUCT: &str = "/sys/devices/virtual/dmi/id/product_name";
const RASPBERRY_PI: &str = "Raspberry Pi";

fn non_empty(value: &str, what: &str) -> ProviderResult<SensorValue> {
    let value = value.trim_matches(|c: char| c.is_whitespace() || c == '\0');
    if value.is_empty() {
        return Err(ProviderError::NoValue(what.to_string()));
    }
    Ok(SensorValue::from(value))
}

#[derive(Debug, Default)]
pub struct HostnameProvider;

#[async_trait::async_trait]
impl MetricProvider for HostnameProvider {
    async fn read(&self) -> ProviderResult<SensorValue> {
        non_empty(&read_file(HOSTNAME).await?, "hostname")
    }
}

/// `PRETTY_NAME` from os-release, unquoted.
pub fn parse_pretty_name(content: &str) -> Option<&str> {
    content
        .lines()
        .find_map(|l| l.strip_prefix("PRETTY_NAME="))
        .map(|v| v.trim().trim_matches('"').trim_matches('\''))
}

#[derive(Debug, Default)]
pub struct DistroProvider;

#[async_trait::async_trait]
impl MetricProvider for DistroProvider {
    async fn read(&self) -> ProviderResult<SensorValue> {
        let content = read_file(OS_RELEASE).await?;
        let name = parse_pretty_name(&content)
            .ok_or_else(|| ProviderError::parse("os_distro", "no PRETTY_NAME"))?;
        non_empty(name, "os_distro")
    }
}

/// Lines of `apt list --upgradable` naming a package.
pub fn count_upgradable(output: &str) -> i64 {
    output
        .lines()
        .filter(|l| l.contains("[upgradable from"))
        .count() as i64
}

/// Pending package updates. Only apt-based systems are supported.
#[derive(Debug, Default)]
pub struct UpdatesProvider;

#[async_trait::async_trait]
impl MetricProvider for UpdatesProvider {
    async fn read(&self) -> ProviderResult<SensorValue> {
        let output = match run_command("apt", &["list", "--upgradable"]).await {
            Ok(output) => output,
            Err(ProviderError::CommandExecution { source, .. })
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                return Err(ProviderError::Unsupported("apt is not installed".into()));
            }
            Err(e) => return Err(e),
        };
        Ok(SensorValue::Integer(count_upgradable(&output)))
    }
}

/// Boot time from the `btime` line of `/proc/stat`.
pub fn parse_btime(content: &str) -> ProviderResult<DateTime<Utc>> {
    let raw = content
        .lines()
        .find_map(|l| l.strip_prefix("btime "))
        .ok_or_else(|| ProviderError::parse("last_boot", "no btime line"))?
        .trim();
    let secs = raw
        .parse::<i64>()
        .map_err(|_| ProviderError::parse("last_boot", format!("invalid value: {raw}")))?;
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| ProviderError::parse("last_boot", format!("out of range: {secs}")))
}

#[derive(Debug, Default)]
pub struct LastBootProvider;

#[async_trait::async_trait]
impl MetricProvider for LastBootProvider {
    async fn read(&self) -> ProviderResult<SensorValue> {
        let content = read_file(PROC_STAT).await?;
        Ok(SensorValue::Timestamp(parse_btime(&content)?))
    }
}

/// The time of the publication cycle itself.
#[derive(Debug, Default)]
pub struct LastMessageProvider;

#[async_trait::async_trait]
impl MetricProvider for LastMessageProvider {
    async fn read(&self) -> ProviderResult<SensorValue> {
        Ok(SensorValue::Timestamp(Utc::now()))
    }
}

/// Board vendor and model. Raspberry Pi boards only expose the device-tree
/// model string, `Raspberry Pi 4 Model B Rev 1.4`, which is split in two.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardInfo {
    pub make: String,
    pub model: String,
}

pub fn split_device_tree_model(model: &str) -> Option<BoardInfo> {
    let model = model.trim_matches(|c: char| c.is_whitespace() || c == '\0');
    let at = model.find(RASPBERRY_PI)?;
    Some(BoardInfo {
        make: RASPBERRY_PI.to_string(),
        model: model[at + RASPBERRY_PI.len()..].trim().to_string(),
    })
}

async fn board_info() -> ProviderResult<BoardInfo> {
    if let Ok(content) = read_file(DEVICE_TREE_MODEL).await {
        if let Some(info) = split_device_tree_model(&content) {
            return Ok(info);
        }
    }
    let make = read_file(DMI_VENDOR).await?;
    let model = read_file(DMI_PRODUCT).await?;
    Ok(BoardInfo {
        make: make.trim().to_string(),
        model: model.trim().to_string(),
    })
}

#[derive(Debug, Default)]
pub struct BoardMakeProvider;

#[derive(Debug, Default)]
pub struct BoardModelProvider;

#[async_trait::async_trait]
impl MetricProvider for BoardMakeProvider {
    async fn read(&self) -> ProviderResult<SensorValue> {
        non_empty(&board_info().await?.make, "board_make")
    }
}

#[async_trait::async_trait]
impl MetricProvider for BoardModelProvider {
    async fn read(&self) -> ProviderResult<SensorValue> {
        non_empty(&board_info().await?.model, "board_model")
    }
}

register_provider!(HostnameProvider, "os_hostname");
register_provider!(DistroProvider, "os_distro");
register_provider!(UpdatesProvider, "os_updates");
register_provider!(LastBootProvider, "last_boot");
register_provider!(LastMessageProvider, "last_message");
register_provider!(BoardMakeProvider, "board_make");
register_provider!(BoardModelProvider, "board_model");
