// Raw MFM track images ("MFM_DISK")
//
// Each track is stored as the decoded byte stream read off the disk: gaps,
// ID fields (0xFE C H R N crc crc) and data fields (0xFB/0xF8 data crc crc).
// Sectors are located by scanning for an ID mark, then for the data mark
// that follows it.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::backend::{DiskImageBackend, FormatKind};
use crate::chrn::{sector_size_from_code, ChrnId, IdFlags};
use crate::disk_error::DiskError;
use crate::geometry::{DriveGeometry, MAX_SIDES};

pub const MFM_MAGIC: &[u8; 8] = b"MFM_DISK";
pub const MFM_HEADER_SIZE: usize = 0x100;

pub const DENSITY_FM_LO: u32 = 0;
pub const DENSITY_MFM_LO: u32 = 1;
pub const DENSITY_MFM_HI: u32 = 2;

/// Track length for low density MFM
pub const MFM_LO_TRACK_SIZE: usize = 0x1900;

pub const ID_ADDRESS_MARK: u8 = 0xFE;
pub const DATA_ADDRESS_MARK: u8 = 0xFB;
pub const DELETED_DATA_ADDRESS_MARK: u8 = 0xF8;

/// Mark, C, H, R, N and two CRC bytes
const ID_FIELD_SIZE: usize = 7;
const CRC_SIZE: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SectorSlot {
    id_offset: usize,
    data_mark_offset: usize,
    len: usize,
}

#[derive(Debug, Clone)]
pub struct MfmImage {
    data: Vec<u8>,
    density: u32,
    tracks: u8,
    sides: u8,
    track_size: usize,
    /// Indexed by (track << 1) | side, None for tracks past the end of the file
    track_offsets: Vec<Option<usize>>,
    current_track: u8,
    sector_offsets: [Vec<SectorSlot>; MAX_SIDES as usize],
    write_protected: bool,
    dirty: bool,
}

impl MfmImage {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, DiskError> {
        let mut file = File::open(path)?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;

        Self::from_bytes(data)
    }

    pub fn probe(data: &[u8]) -> bool {
        data.starts_with(MFM_MAGIC)
    }

    pub fn from_bytes(data: Vec<u8>) -> Result<Self, DiskError> {
        if !Self::probe(&data) {
            return Err(DiskError::BadMagic {
                expected: "MFM_DISK",
            });
        }
        if data.len() < MFM_HEADER_SIZE {
            return Err(DiskError::Truncated {
                what: "MFM header",
                needed: MFM_HEADER_SIZE,
                available: data.len(),
            });
        }

        let density = read_u32_le(&data, 8);
        let tracks = read_u32_le(&data, 12);
        let sides = read_u32_le(&data, 16);

        let track_size = match density {
            DENSITY_MFM_LO => MFM_LO_TRACK_SIZE,
            other => return Err(DiskError::UnsupportedDensity(other)),
        };
        let geometry = DriveGeometry::absolute(tracks, sides)?;

        let mut track_offsets = vec![None; geometry.tracks as usize * MAX_SIDES as usize];
        for track in 0..geometry.tracks as usize {
            for side in 0..geometry.sides as usize {
                let offset =
                    MFM_HEADER_SIZE + (track * geometry.sides as usize + side) * track_size;
                if offset + track_size <= data.len() {
                    track_offsets[(track << 1) | side] = Some(offset);
                } else {
                    tracing::warn!(
                        "MFM track {} side {} lies beyond end of image, treating as unformatted",
                        track,
                        side
                    );
                }
            }
        }

        let mut image = Self {
            data,
            density,
            tracks: geometry.tracks,
            sides: geometry.sides,
            track_size,
            track_offsets,
            current_track: 0,
            sector_offsets: Default::default(),
            write_protected: false,
            dirty: false,
        };
        image.rebuild_sector_table();

        tracing::debug!(
            "Loaded MFM image: density {}, {} tracks, {} sides",
            density,
            image.tracks,
            image.sides
        );

        Ok(image)
    }

    /// Header plus zeroed tracks, to be formatted with raw track writes
    pub fn create_unformatted(geometry: DriveGeometry) -> Result<Self, DiskError> {
        geometry.validate()?;

        let track_count = geometry.tracks as usize * geometry.sides as usize;
        let mut data = vec![0u8; MFM_HEADER_SIZE + track_count * MFM_LO_TRACK_SIZE];
        data[..8].copy_from_slice(MFM_MAGIC);
        data[8..12].copy_from_slice(&DENSITY_MFM_LO.to_le_bytes());
        data[12..16].copy_from_slice(&(geometry.tracks as u32).to_le_bytes());
        data[16..20].copy_from_slice(&(geometry.sides as u32).to_le_bytes());

        Self::from_bytes(data)
    }

    fn track_offset(&self, side: u8) -> Option<usize> {
        if side >= self.sides {
            return None;
        }
        self.track_offsets
            .get(((self.current_track as usize) << 1) | side as usize)
            .copied()
            .flatten()
    }

    fn track(&self, side: u8) -> Option<&[u8]> {
        self.track_offset(side)
            .map(|offset| &self.data[offset..offset + self.track_size])
    }

    fn rebuild_sector_table(&mut self) {
        for side in 0..MAX_SIDES {
            let slots = match self.track(side) {
                Some(track) => scan_track(track),
                None => Vec::new(),
            };
            tracing::trace!(
                "MFM track {} side {}: {} sectors",
                self.current_track,
                side,
                slots.len()
            );
            self.sector_offsets[side as usize] = slots;
        }
    }

    fn slot(&self, side: u8, index: usize) -> Result<SectorSlot, DiskError> {
        let slots = self
            .sector_offsets
            .get(side as usize)
            .ok_or(DiskError::OutOfRange {
                what: "side",
                value: side as usize,
                limit: MAX_SIDES as usize,
            })?;
        slots.get(index).copied().ok_or(DiskError::SectorNotFound {
            side,
            index,
            count: slots.len(),
        })
    }

    pub fn set_write_protected(&mut self, protected: bool) {
        self.write_protected = protected;
    }

    pub fn density(&self) -> u32 {
        self.density
    }
}

/// Find ID field / data field pairs in a raw track.
///
/// Looks for an ID mark, then for the next data or deleted data mark, and
/// skips the sector payload before looking for the next ID. A second ID
/// mark seen while waiting for data is passed over, so tracks with
/// consecutive IDs and no data between them are not fully enumerated.
/// Scanning stops at the first field that would run off the track.
fn scan_track(track: &[u8]) -> Vec<SectorSlot> {
    let mut slots = Vec::new();
    let mut pending_id: Option<(usize, u8)> = None;
    let mut pos = 0;

    while pos < track.len() {
        match pending_id {
            None => {
                if track[pos] == ID_ADDRESS_MARK {
                    if pos + ID_FIELD_SIZE > track.len() {
                        break;
                    }
                    pending_id = Some((pos, track[pos + 4]));
                    pos += ID_FIELD_SIZE;
                } else {
                    pos += 1;
                }
            }
            Some((id_offset, n)) => {
                let mark = track[pos];
                if mark == DATA_ADDRESS_MARK || mark == DELETED_DATA_ADDRESS_MARK {
                    let len = match sector_size_from_code(n) {
                        Some(len) => len,
                        None => {
                            tracing::warn!("MFM sector ID with size code {:02X}, stopping scan", n);
                            break;
                        }
                    };
                    if pos + 1 + len > track.len() {
                        tracing::warn!(
                            "MFM sector at 0x{:X} ({} bytes) runs off the track, stopping scan",
                            pos,
                            len
                        );
                        break;
                    }

                    slots.push(SectorSlot {
                        id_offset,
                        data_mark_offset: pos,
                        len,
                    });
                    pos += 1 + len + CRC_SIZE;
                    pending_id = None;
                } else {
                    pos += 1;
                }
            }
        }
    }

    slots
}

impl DiskImageBackend for MfmImage {
    fn format_kind(&self) -> FormatKind {
        FormatKind::RawMfm
    }

    fn image_geometry(&self) -> (u8, u8) {
        (self.tracks, self.sides)
    }

    fn is_writable(&self) -> bool {
        !self.write_protected
    }

    fn seek_notify(&mut self, track: u8) {
        if track != self.current_track {
            self.current_track = track;
            self.rebuild_sector_table();
        }
    }

    fn sectors_per_track(&self, side: u8) -> usize {
        self.sector_offsets
            .get(side as usize)
            .map_or(0, |slots| slots.len())
    }

    fn get_sector_id(&self, side: u8, id_index: usize) -> Result<ChrnId, DiskError> {
        let slot = self.slot(side, id_index)?;
        let track = self.track(side).ok_or(DiskError::SectorNotFound {
            side,
            index: id_index,
            count: 0,
        })?;
        let id = &track[slot.id_offset..slot.id_offset + ID_FIELD_SIZE];

        let mut flags = IdFlags::empty();
        flags.set(
            IdFlags::DELETED_DATA,
            track[slot.data_mark_offset] == DELETED_DATA_ADDRESS_MARK,
        );

        Ok(ChrnId {
            c: id[1],
            h: id[2],
            r: id[3],
            n: id[4],
            data_id: id_index,
            flags,
        })
    }

    fn read_sector(&self, side: u8, data_id: usize, buf: &mut [u8]) -> Result<usize, DiskError> {
        let slot = self.slot(side, data_id)?;
        let track = self.track(side).ok_or(DiskError::SectorNotFound {
            side,
            index: data_id,
            count: 0,
        })?;

        let start = slot.data_mark_offset + 1;
        let len = buf.len().min(slot.len);
        buf[..len].copy_from_slice(&track[start..start + len]);
        Ok(len)
    }

    fn write_sector(
        &mut self,
        side: u8,
        data_id: usize,
        data: &[u8],
        deleted_data_mark: bool,
    ) -> Result<usize, DiskError> {
        if self.write_protected {
            return Err(DiskError::WriteProtected);
        }

        let slot = self.slot(side, data_id)?;
        let offset = self.track_offset(side).ok_or(DiskError::SectorNotFound {
            side,
            index: data_id,
            count: 0,
        })?;

        let mark_offset = offset + slot.data_mark_offset;
        let len = data.len().min(slot.len);
        self.data[mark_offset] = if deleted_data_mark {
            DELETED_DATA_ADDRESS_MARK
        } else {
            DATA_ADDRESS_MARK
        };
        self.data[mark_offset + 1..mark_offset + 1 + len].copy_from_slice(&data[..len]);
        self.dirty = true;

        Ok(len)
    }

    fn read_track(&self, side: u8, buf: &mut [u8]) -> Result<usize, DiskError> {
        match self.track(side) {
            Some(track) => {
                let len = buf.len().min(track.len());
                buf[..len].copy_from_slice(&track[..len]);
                Ok(len)
            }
            None => Ok(0),
        }
    }

    fn write_track(&mut self, side: u8, data: &[u8]) -> Result<usize, DiskError> {
        if self.write_protected {
            return Err(DiskError::WriteProtected);
        }

        let offset = match self.track_offset(side) {
            Some(offset) => offset,
            None => return Ok(0),
        };
        let len = data.len().min(self.track_size);
        self.data[offset..offset + len].copy_from_slice(&data[..len]);
        self.dirty = true;

        let slots = self.track(side).map(scan_track).unwrap_or_default();
        self.sector_offsets[side as usize] = slots;

        Ok(len)
    }

    fn track_size(&self, side: u8) -> usize {
        self.track_offset(side).map_or(0, |_| self.track_size)
    }

    fn image_bytes(&self) -> &[u8] {
        &self.data
    }

    fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn mark_clean(&mut self) {
        self.dirty = false;
    }
}

fn read_u32_le(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}
