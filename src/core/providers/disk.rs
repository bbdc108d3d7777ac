use std::{
    ffi::CString,
    os::unix::ffi::OsStrExt,
    path::{Path, PathBuf},
};

use super::{
    error::{ProviderError, ProviderResult},
    round1,
    traits::MetricProvider,
    value::SensorValue,
};
use crate::register_provider;

/// Block counts from `statvfs`, already multiplied by the fragment size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsUsage {
    pub used_bytes: u64,
    /// Available to unprivileged users.
    pub avail_bytes: u64,
}

impl FsUsage {
    /// Percentage as `df` reports it: reserved blocks count as neither used
    /// nor available.
    pub fn percent(&self) -> f64 {
        let usable = self.used_bytes + self.avail_bytes;
        if usable == 0 {
            return 0.0;
        }
        round1(self.used_bytes as f64 / usable as f64 * 100.0)
    }
}

fn statvfs(path: &Path) -> ProviderResult<FsUsage> {
    let c_path = CString::new(path.as_os_str().as_bytes()).map_err(|e| ProviderError::SystemCall {
        syscall: "statvfs".into(),
        reason: e.to_string(),
    })?;

    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let result = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if result != 0 {
        return Err(ProviderError::SystemCall {
            syscall: "statvfs".into(),
            reason: format!("{}: {}", path.display(), std::io::Error::last_os_error()),
        });
    }

    let block_size = stat.f_frsize as u64;
    let used_blocks = (stat.f_blocks as u64).saturating_sub(stat.f_bfree as u64);
    Ok(FsUsage {
        used_bytes: used_blocks.wrapping_mul(block_size),
        avail_bytes: (stat.f_bavail as u64).wrapping_mul(block_size),
    })
}

/// Usage of the filesystem holding `path`, in percent.
#[derive(Debug, Clone)]
pub struct DiskUsageProvider {
    path: PathBuf,
}

impl DiskUsageProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait::async_trait]
impl MetricProvider for DiskUsageProvider {
    async fn read(&self) -> ProviderResult<SensorValue> {
        let path = self.path.clone();
        let usage = tokio::task::spawn_blocking(move || statvfs(&path))
            .await
            .map_err(|e| ProviderError::SystemCall {
                syscall: "statvfs".into(),
                reason: e.to_string(),
            })??;
        Ok(SensorValue::Float(usage.percent()))
    }
}

/// The root filesystem.
#[derive(Debug, Clone)]
pub struct DiskSystemProvider(DiskUsageProvider);

impl Default for DiskSystemProvider {
    fn default() -> Self {
        Self(DiskUsageProvider::new("/"))
    }
}

#[async_trait::async_trait]
impl MetricProvider for DiskSystemProvider {
    async fn read(&self) -> ProviderResult<SensorValue> {
        self.0.read().await
    }
}

register_provider!(DiskSystemProvider, "disk_system");
