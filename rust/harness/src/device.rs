//! GPU discovery and reset.

use std::fmt;

use async_trait::async_trait;

/// A GPU as observed at discovery time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub index: u32,
    pub memory_used_mib: u64,
    pub memory_free_mib: u64,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.index)
    }
}

/// Source of per-device memory readings.
pub trait DeviceQuery {
    fn query(&self) -> Result<Vec<Device>, DeviceError>;
}

/// Reads memory usage from `nvidia-smi`.
pub struct NvidiaSmi;

impl DeviceQuery for NvidiaSmi {
    fn query(&self) -> Result<Vec<Device>, DeviceError> {
        let output = std::process::Command::new("nvidia-smi")
            .args([
                "--query-gpu=memory.used,memory.free",
                "--format=csv,noheader,nounits",
            ])
            .output()
            .map_err(DeviceError::Query)?;
        if !output.status.success() {
            return Err(DeviceError::QueryFailed(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        parse_nvidia_smi(&String::from_utf8_lossy(&output.stdout))
    }
}

/// A fixed device list, used for `--devices` and in tests.
pub struct FixedDevices(pub Vec<u32>);

impl DeviceQuery for FixedDevices {
    fn query(&self) -> Result<Vec<Device>, DeviceError> {
        Ok(self
            .0
            .iter()
            .map(|&index| Device {
                index,
                memory_used_mib: 0,
                memory_free_mib: u64::MAX,
            })
            .collect())
    }
}

/// Parse `memory.used, memory.free` lines; the line number is the device index.
pub fn parse_nvidia_smi(output: &str) -> Result<Vec<Device>, DeviceError> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .enumerate()
        .map(|(i, line)| {
            let bad = || DeviceError::Parse(line.to_string());
            let (used, free) = line.split_once(',').ok_or_else(bad)?;
            Ok(Device {
                index: u32::try_from(i).map_err(|_| bad())?,
                memory_used_mib: used.trim().parse().map_err(|_| bad())?,
                memory_free_mib: free.trim().parse().map_err(|_| bad())?,
            })
        })
        .collect()
}

/// Devices with strictly more than `min_free_mib` free memory.
pub fn discover(query: &dyn DeviceQuery, min_free_mib: u64) -> Result<Vec<Device>, DeviceError> {
    let seen = query.query()?;
    let seen_count = seen.len();
    let eligible: Vec<Device> = seen
        .into_iter()
        .filter(|d| d.memory_free_mib > min_free_mib)
        .collect();

    if eligible.is_empty() {
        return Err(DeviceError::NoEligibleDevices {
            seen: seen_count,
            min_free_mib,
        });
    }
    tracing::info!(
        "{} of {seen_count} devices eligible (> {min_free_mib} MiB free)",
        eligible.len()
    );
    Ok(eligible)
}

/// Clears a device's state before a failed job is retried on it.
#[async_trait]
pub trait DeviceReset: Send + Sync {
    async fn reset(&self, device: &Device) -> Result<(), DeviceError>;
}

/// Runs `nvidia-smi -r -i <index>`.
pub struct NvidiaSmiReset;

#[async_trait]
impl DeviceReset for NvidiaSmiReset {
    async fn reset(&self, device: &Device) -> Result<(), DeviceError> {
        let output = tokio::process::Command::new("nvidia-smi")
            .args(["-r", "-i", &device.index.to_string()])
            .output()
            .await
            .map_err(DeviceError::Query)?;
        if output.status.success() {
            tracing::info!("Reset device {}", device.index);
            Ok(())
        } else {
            Err(DeviceError::ResetFailed {
                index: device.index,
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

pub struct NoReset;

#[async_trait]
impl DeviceReset for NoReset {
    async fn reset(&self, _device: &Device) -> Result<(), DeviceError> {
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("failed to run nvidia-smi: {0}")]
    Query(std::io::Error),
    #[error("nvidia-smi failed: {0}")]
    QueryFailed(String),
    #[error("unexpected nvidia-smi line: {0:?}")]
    Parse(String),
    #[error("no device has more than {min_free_mib} MiB free ({seen} devices seen)")]
    NoEligibleDevices { seen: usize, min_free_mib: u64 },
    #[error("failed to reset device {index}: {reason}")]
    ResetFailed { index: u32, reason: String },
}
