// Drive and clock configuration, loadable from JSON

use serde::{Deserialize, Serialize};

use crate::clock::DEFAULT_CLOCK_HZ;
use crate::disk_drive::{ReadyMode, DEFAULT_RPM};
use crate::disk_error::DiskError;
use crate::geometry::DriveGeometry;

/// Drive slots a controller can address
pub const MAX_DRIVES: usize = 4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriveConfig {
    pub geometry: DriveGeometry,
    pub rpm: f64,
    pub ready_mode: ReadyMode,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            geometry: DriveGeometry::DS_80,
            rpm: DEFAULT_RPM,
            ready_mode: ReadyMode::Derived,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FloppyConfig {
    /// Virtual clock ticks per second
    pub clock_hz: u64,
    pub drives: Vec<DriveConfig>,
}

impl Default for FloppyConfig {
    fn default() -> Self {
        Self {
            clock_hz: DEFAULT_CLOCK_HZ,
            drives: vec![DriveConfig::default(); MAX_DRIVES],
        }
    }
}

impl FloppyConfig {
    /// `count` identical drives
    pub fn uniform(count: usize, geometry: DriveGeometry) -> Self {
        Self {
            drives: vec![
                DriveConfig {
                    geometry,
                    ..Default::default()
                };
                count
            ],
            ..Default::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self, DiskError> {
        let config: FloppyConfig =
            serde_json::from_str(json).map_err(|e| DiskError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, DiskError> {
        serde_json::to_string_pretty(self).map_err(|e| DiskError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), DiskError> {
        if self.drives.is_empty() || self.drives.len() > MAX_DRIVES {
            return Err(DiskError::Config(format!(
                "{} drives configured, expected 1 to {}",
                self.drives.len(),
                MAX_DRIVES
            )));
        }
        if self.clock_hz == 0 {
            return Err(DiskError::Config("clock_hz must be non-zero".to_string()));
        }

        for (i, drive) in self.drives.iter().enumerate() {
            drive.geometry.validate()?;
            if !(drive.rpm.is_finite() && drive.rpm > 0.0) {
                return Err(DiskError::Config(format!(
                    "drive {}: invalid rpm {}",
                    i, drive.rpm
                )));
            }
        }

        Ok(())
    }
}
