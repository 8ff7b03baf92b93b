// Capability set every disk image format supplies to a drive

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::chrn::ChrnId;
use crate::disk_error::DiskError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FormatKind {
    /// "MV - CPC" fixed-size tracks
    Standard,
    /// "EXTENDED" variable-size tracks
    Extended,
    /// "MFM_DISK" raw encoded tracks
    RawMfm,
}

impl fmt::Display for FormatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatKind::Standard => write!(f, "Standard DSK"),
            FormatKind::Extended => write!(f, "Extended DSK"),
            FormatKind::RawMfm => write!(f, "Raw MFM"),
        }
    }
}

/// A disk image as the drive sees it.
///
/// The drive tells the backend which track the head is on through
/// `seek_notify`; every other call addresses that track, selecting a side
/// and a sector by index. Backends must stay inside their own buffer for
/// any index or length a caller passes and report `SectorNotFound` or
/// `OutOfRange` instead.
pub trait DiskImageBackend: fmt::Debug {
    fn format_kind(&self) -> FormatKind;

    /// Tracks and sides declared by the image header
    fn image_geometry(&self) -> (u8, u8);

    /// False for media that must never be written
    fn is_writable(&self) -> bool;

    /// The head moved to `track`. Per-track caches are rebuilt here.
    fn seek_notify(&mut self, track: u8);

    /// Sectors on the current track, 0 for unformatted or absent tracks
    fn sectors_per_track(&self, side: u8) -> usize;

    /// ID of the sector at `id_index` on the current track
    fn get_sector_id(&self, side: u8, id_index: usize) -> Result<ChrnId, DiskError>;

    /// Copy sector data into `buf`, returning the bytes transferred
    fn read_sector(&self, side: u8, data_id: usize, buf: &mut [u8]) -> Result<usize, DiskError>;

    /// Store `data` into a sector and record its data address mark
    fn write_sector(
        &mut self,
        side: u8,
        data_id: usize,
        data: &[u8],
        deleted_data_mark: bool,
    ) -> Result<usize, DiskError>;

    /// Raw track transfer. Formats without raw tracks transfer nothing.
    fn read_track(&self, _side: u8, _buf: &mut [u8]) -> Result<usize, DiskError> {
        Ok(0)
    }

    fn write_track(&mut self, _side: u8, _data: &[u8]) -> Result<usize, DiskError> {
        Ok(0)
    }

    /// Accepted but not implemented by any format
    fn format_sector(
        &mut self,
        _side: u8,
        _sector_index: usize,
        _id: ChrnId,
        _filler: u8,
    ) -> Result<(), DiskError> {
        Ok(())
    }

    /// Size in bytes of the current track on `side`, 0 when absent
    fn track_size(&self, _side: u8) -> usize {
        0
    }

    /// Whole image as it would be written back to the host
    fn image_bytes(&self) -> &[u8];

    /// True once a write has modified the image since it was loaded or saved
    fn is_dirty(&self) -> bool;

    fn mark_clean(&mut self);
}
