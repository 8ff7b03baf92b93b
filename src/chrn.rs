// Sector ID records as seen by a floppy controller scanning a track

use std::fmt;

use serde::{Deserialize, Serialize};

/// Flags attached to a sector ID. Controllers compare these bit for bit.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdFlags(pub u8);

impl IdFlags {
    /// Data field was written with a deleted data address mark
    pub const DELETED_DATA: u8 = 0x01;
    /// CRC error in the ID field
    pub const CRC_ERROR_IN_ID: u8 = 0x02;
    /// CRC error in the data field
    pub const CRC_ERROR_IN_DATA: u8 = 0x04;

    pub fn empty() -> Self {
        IdFlags(0)
    }

    pub fn deleted_data(&self) -> bool {
        self.0 & Self::DELETED_DATA != 0
    }

    pub fn crc_error_in_id(&self) -> bool {
        self.0 & Self::CRC_ERROR_IN_ID != 0
    }

    pub fn crc_error_in_data(&self) -> bool {
        self.0 & Self::CRC_ERROR_IN_DATA != 0
    }

    pub fn set(&mut self, mask: u8, on: bool) {
        if on {
            self.0 |= mask;
        } else {
            self.0 &= !mask;
        }
    }
}

/// Cylinder/Head/Record/N address of a sector plus the backend handle
/// used to transfer its data.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChrnId {
    pub c: u8,
    pub h: u8,
    pub r: u8,
    pub n: u8,
    /// Opaque handle for `read_sector_data`/`write_sector_data`. Not necessarily `r`.
    pub data_id: usize,
    pub flags: IdFlags,
}

impl ChrnId {
    /// Size in bytes encoded by `n`, if `n` is a code a backend can store.
    pub fn sector_size(&self) -> Option<usize> {
        sector_size_from_code(self.n)
    }
}

impl fmt::Display for ChrnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "C={:02X} H={:02X} R={:02X} N={:02X} data_id={} flags={:02X}",
            self.c, self.h, self.r, self.n, self.data_id, self.flags.0
        )
    }
}

/// Largest size code stored in image formats (16KB sectors).
pub const MAX_SIZE_CODE: u8 = 7;

/// 128 << n, or None for codes no image format can hold.
pub fn sector_size_from_code(n: u8) -> Option<usize> {
    if n > MAX_SIZE_CODE {
        None
    } else {
        Some(128usize << n)
    }
}

/// Inverse of `sector_size_from_code` for exact powers of two.
pub fn size_code_from_size(size: usize) -> Option<u8> {
    (0..=MAX_SIZE_CODE).find(|&n| 128usize << n == size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_codes() {
        assert_eq!(sector_size_from_code(0), Some(128));
        assert_eq!(sector_size_from_code(2), Some(512));
        assert_eq!(sector_size_from_code(3), Some(1024));
        assert_eq!(sector_size_from_code(8), None);
        assert_eq!(size_code_from_size(256), Some(1));
        assert_eq!(size_code_from_size(300), None);
    }

    #[test]
    fn test_flag_bits() {
        let mut flags = IdFlags::empty();
        flags.set(IdFlags::DELETED_DATA, true);
        flags.set(IdFlags::CRC_ERROR_IN_DATA, true);
        assert_eq!(flags.0, 0x05);
        assert!(flags.deleted_data());
        assert!(!flags.crc_error_in_id());

        flags.set(IdFlags::DELETED_DATA, false);
        assert!(!flags.deleted_data());
        assert!(flags.crc_error_in_data());
    }
}
