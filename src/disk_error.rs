// Disk emulation error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DiskError {
    #[error("Invalid drive number {0}")]
    InvalidDrive(usize),
    #[error("Invalid drive geometry: {tracks} tracks, {sides} sides")]
    InvalidGeometry { tracks: u32, sides: u32 },
    #[error("Unsupported density code {0}")]
    UnsupportedDensity(u32),
    #[error("Image is not in a recognized format")]
    UnknownFormat,
    #[error("Bad image magic: expected {expected}")]
    BadMagic { expected: &'static str },
    #[error("Image truncated: {what} needs {needed} bytes, image has {available}")]
    Truncated {
        what: &'static str,
        needed: usize,
        available: usize,
    },
    #[error("Sector index {index} not found on side {side} (track has {count} sectors)")]
    SectorNotFound { side: u8, index: usize, count: usize },
    #[error("{what} {value} out of range (limit {limit})")]
    OutOfRange {
        what: &'static str,
        value: usize,
        limit: usize,
    },
    #[error("Disk is write protected")]
    WriteProtected,
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Disk I/O error: {0}")]
    Io(#[from] std::io::Error),
}
