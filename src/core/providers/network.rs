//! Addressing, throughput and wireless link quality.

use std::{
    net::{IpAddr, Ipv4Addr},
    sync::Mutex,
    time::Instant,
};

use tokio::net::UdpSocket;

use super::{
    error::{ProviderError, ProviderResult},
    read_file, run_command,
    traits::MetricProvider,
    value::SensorValue,
};
use crate::register_provider;

const PROC_NET_DEV: &str = "/proc/net/dev";
const PROC_NET_WIRELESS: &str = "/proc/net/wireless";

/// Kilobits per byte.
const THROUGHPUT_FACTOR: f64 = 8.0 / 1024.0;

// ----------------------------------------------------------------------------
// Address
// ----------------------------------------------------------------------------

/// Local address of the default route. Connecting a UDP socket sends no
/// packets but makes the kernel pick the outgoing interface.
#[derive(Debug, Default)]
pub struct NetIpProvider;

#[async_trait::async_trait]
impl MetricProvider for NetIpProvider {
    async fn read(&self) -> ProviderResult<SensorValue> {
        let syscall = |e: std::io::Error| ProviderError::SystemCall {
            syscall: "udp connect".into(),
            reason: e.to_string(),
        };
        let ip = match UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await {
            Ok(socket) => match socket.connect(("8.8.8.8", 80)).await {
                Ok(()) => socket.local_addr().map_err(syscall)?.ip(),
                Err(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
            },
            Err(e) => return Err(syscall(e)),
        };
        Ok(SensorValue::Text(ip.to_string()))
    }
}

register_provider!(NetIpProvider, "net_ip");

// ----------------------------------------------------------------------------
// Throughput
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Transmit,
    Receive,
}

/// Byte counters summed over every interface except loopback.
pub fn parse_net_dev(content: &str, direction: Direction) -> ProviderResult<u64> {
    let mut total = 0u64;
    for line in content.lines().skip(2) {
        let Some((iface, counters)) = line.split_once(':') else {
            continue;
        };
        if iface.trim() == "lo" {
            continue;
        }
        // rx bytes is field 0, tx bytes is field 8
        let index = match direction {
            Direction::Receive => 0,
            Direction::Transmit => 8,
        };
        let raw = counters
            .split_whitespace()
            .nth(index)
            .ok_or_else(|| ProviderError::parse("net_dev", format!("short line for {iface}")))?;
        let bytes = raw
            .parse::<u64>()
            .map_err(|_| ProviderError::parse("net_dev", format!("invalid value: {raw}")))?;
        total = total.saturating_add(bytes);
    }
    Ok(total)
}

/// Throughput in kbit/s since the previous read; the first read is `0.0`.
#[derive(Debug)]
pub struct ThroughputProvider {
    direction: Direction,
    previous: Mutex<Option<(u64, Instant)>>,
}

impl ThroughputProvider {
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            previous: Mutex::new(None),
        }
    }

    fn update(&self, bytes: u64, now: Instant) -> ProviderResult<f64> {
        let mut previous = self
            .previous
            .lock()
            .map_err(|_| ProviderError::NoValue("throughput state poisoned".into()))?;
        let rate = match *previous {
            Some((prev_bytes, prev_at)) => {
                let secs = now.duration_since(prev_at).as_secs_f64();
                if secs <= f64::EPSILON {
                    0.0
                } else {
                    // Counters reset when an interface goes away.
                    let delta = bytes.saturating_sub(prev_bytes) as f64;
                    (delta / secs * THROUGHPUT_FACTOR * 100.0).round() / 100.0
                }
            }
            None => 0.0,
        };
        *previous = Some((bytes, now));
        Ok(rate)
    }
}

#[async_trait::async_trait]
impl MetricProvider for ThroughputProvider {
    async fn read(&self) -> ProviderResult<SensorValue> {
        let content = read_file(PROC_NET_DEV).await?;
        let bytes = parse_net_dev(&content, self.direction)?;
        Ok(SensorValue::Float(self.update(bytes, Instant::now())?))
    }
}

#[derive(Debug)]
pub struct NetTxProvider(ThroughputProvider);

#[derive(Debug)]
pub struct NetRxProvider(ThroughputProvider);

impl Default for NetTxProvider {
    fn default() -> Self {
        Self(ThroughputProvider::new(Direction::Transmit))
    }
}

impl Default for NetRxProvider {
    fn default() -> Self {
        Self(ThroughputProvider::new(Direction::Receive))
    }
}

#[async_trait::async_trait]
impl MetricProvider for NetTxProvider {
    async fn read(&self) -> ProviderResult<SensorValue> {
        self.0.read().await
    }
}

#[async_trait::async_trait]
impl MetricProvider for NetRxProvider {
    async fn read(&self) -> ProviderResult<SensorValue> {
        self.0.read().await
    }
}

register_provider!(NetTxProvider, "net_tx");
register_provider!(NetRxProvider, "net_rx");

// ----------------------------------------------------------------------------
// Wireless
// ----------------------------------------------------------------------------

/// Signal level in dBm of the first wireless interface.
pub fn parse_wireless(content: &str) -> ProviderResult<i64> {
    let line = content
        .lines()
        .skip(2)
        .find(|l| l.contains(':'))
        .ok_or_else(|| ProviderError::NoValue("no wireless interface".into()))?;
    let (_, fields) = line
        .split_once(':')
        .ok_or_else(|| ProviderError::parse("wifi_strength", "malformed line"))?;
    // status, link quality, signal level, noise, ...
    let raw = fields
        .split_whitespace()
        .nth(2)
        .ok_or_else(|| ProviderError::parse("wifi_strength", "missing signal level"))?;
    let level = raw.trim_end_matches('.');
    level
        .parse::<f64>()
        .map(|v| v as i64)
        .map_err(|_| ProviderError::parse("wifi_strength", format!("invalid value: {raw}")))
}

#[derive(Debug, Default)]
pub struct WifiStrengthProvider;

#[async_trait::async_trait]
impl MetricProvider for WifiStrengthProvider {
    async fn read(&self) -> ProviderResult<SensorValue> {
        let content = read_file(PROC_NET_WIRELESS).await?;
        Ok(SensorValue::Integer(parse_wireless(&content)?))
    }
}

#[derive(Debug, Default)]
pub struct WifiSsidProvider;

#[async_trait::async_trait]
impl MetricProvider for WifiSsidProvider {
    async fn read(&self) -> ProviderResult<SensorValue> {
        let output = run_command("iwgetid", &["-r"]).await?;
        let ssid = output.trim();
        if ssid.is_empty() {
            return Err(ProviderError::NoValue("not associated".into()));
        }
        Ok(SensorValue::from(ssid))
    }
}

register_provider!(WifiStrengthProvider, "wifi_strength");
register_provider!(WifiSsidProvider, "wifi_ssid");

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    const NET_DEV: &str = "\
Inter-|   Receive                                                |  Transmit
 face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed
    lo:  500000    1000    0    0    0     0          0         0   500000    1000    0    0    0     0       0          0
  eth0: 1000000    2000    0    0    0     0          0         0   300000    1500    0    0    0     0       0          0
 wlan0:   24000     100    0    0    0     0          0         0     2000      10    0    0    0     0       0          0
";

    const WIRELESS: &str = "\
Inter-| sta-|   Quality        |   Discarded packets               | Missed | WE
 face | tus | link level noise |  nwid  crypt   frag  retry   misc | beacon | 22
 wlan0: 0000   54.  -56.  -256        0      0      0      0     12        0
";

    #[test]
    fn net_dev_excludes_loopback() {
        assert_eq!(parse_net_dev(NET_DEV, Direction::Receive).unwrap(), 1_024_000);
        assert_eq!(parse_net_dev(NET_DEV, Direction::Transmit).unwrap(), 302_000);
    }

    #[test]
    fn throughput_first_read_is_zero_then_rate() {
        let provider = ThroughputProvider::new(Direction::Receive);
        let start = Instant::now();
        assert_eq!(provider.update(1_000, start).unwrap(), 0.0);
        // 1024 bytes over 2 s = 4 kbit/s
        let later = start + Duration::from_secs(2);
        assert_eq!(provider.update(2_024, later).unwrap(), 4.0);
    }

    #[test]
    fn throughput_counter_reset_is_zero() {
        let provider = ThroughputProvider::new(Direction::Transmit);
        let start = Instant::now();
        provider.update(5_000, start).unwrap();
        assert_eq!(
            provider.update(10, start + Duration::from_secs(1)).unwrap(),
            0.0
        );
    }

    #[test]
    fn wireless_signal_level() {
        assert_eq!(parse_wireless(WIRELESS).unwrap(), -56);
    }

    #[test]
    fn no_wireless_interface_is_no_value() {
        let header: String = WIRELESS.lines().take(2).collect::<Vec<_>>().join("\n");
        assert!(matches!(
            parse_wireless(&header),
            Err(ProviderError::NoValue(_))
        ));
    }
}
