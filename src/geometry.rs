// Drive geometry presets

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::disk_error::DiskError;

pub const MAX_SIDES: u8 = 2;

/// Mechanical geometry of a drive: how far the head can step and how many
/// heads it has.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveGeometry {
    pub tracks: u8,
    pub sides: u8,
}

impl DriveGeometry {
    /// Single-sided, 40 tracks
    pub const SS_40: DriveGeometry = DriveGeometry { tracks: 40, sides: 1 };
    /// Double-sided, 40 tracks
    pub const DS_40: DriveGeometry = DriveGeometry { tracks: 40, sides: 2 };
    /// Single-sided, 80 tracks
    pub const SS_80: DriveGeometry = DriveGeometry { tracks: 80, sides: 1 };
    /// Double-sided, 80 tracks
    pub const DS_80: DriveGeometry = DriveGeometry { tracks: 80, sides: 2 };

    /// Geometry from an explicit track/side pair.
    pub fn absolute(tracks: u32, sides: u32) -> Result<Self, DiskError> {
        if tracks == 0 || tracks > u8::MAX as u32 || sides == 0 || sides > MAX_SIDES as u32 {
            return Err(DiskError::InvalidGeometry { tracks, sides });
        }

        Ok(Self {
            tracks: tracks as u8,
            sides: sides as u8,
        })
    }

    pub fn validate(&self) -> Result<(), DiskError> {
        Self::absolute(self.tracks as u32, self.sides as u32).map(|_| ())
    }

    pub fn preset_name(&self) -> Option<&'static str> {
        match (self.tracks, self.sides) {
            (40, 1) => Some("SS_40"),
            (40, 2) => Some("DS_40"),
            (80, 1) => Some("SS_80"),
            (80, 2) => Some("DS_80"),
            _ => None,
        }
    }
}

impl Default for DriveGeometry {
    fn default() -> Self {
        Self::DS_80
    }
}

impl fmt::Display for DriveGeometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.preset_name() {
            Some(name) => write!(f, "{}", name),
            None => write!(f, "{} tracks x {} sides", self.tracks, self.sides),
        }
    }
}
