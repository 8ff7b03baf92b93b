// DSK Image handler for Amstrad CPC/Spectrum +3 style disk images
// Supports standard ("MV - CPC") and extended ("EXTENDED") layouts

use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::backend::{DiskImageBackend, FormatKind};
use crate::chrn::{sector_size_from_code, ChrnId, IdFlags};
use crate::disk_error::DiskError;
use crate::geometry::{DriveGeometry, MAX_SIDES};

pub const STANDARD_MAGIC: &[u8; 8] = b"MV - CPC";
pub const EXTENDED_MAGIC: &[u8; 8] = b"EXTENDED";

pub const DISK_INFO_SIZE: usize = 0x100;
pub const TRACK_INFO_SIZE: usize = 0x100;

const HEADER_TRACKS: usize = 0x30;
const HEADER_SIDES: usize = 0x31;
const HEADER_TRACK_SIZE: usize = 0x32;
const HEADER_TRACK_SIZE_TABLE: usize = 0x34;

const TRACK_SECTOR_SIZE_CODE: usize = 0x14;
const TRACK_SECTOR_COUNT: usize = 0x15;
const TRACK_SECTOR_INFO: usize = 0x18;
const SECTOR_INFO_SIZE: usize = 8;

/// Sector info entries that fit in a track header
pub const MAX_SECTORS_PER_TRACK: usize = (TRACK_INFO_SIZE - TRACK_SECTOR_INFO) / SECTOR_INFO_SIZE;

// FDC status bytes stored with each sector
const ST1_DATA_ERROR: u8 = 0x20;
const ST2_CONTROL_MARK: u8 = 0x40;
const ST2_DATA_ERROR_IN_DATA: u8 = 0x20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TrackRange {
    offset: usize,
    len: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SectorSlot {
    info_offset: usize,
    data_offset: usize,
    len: usize,
}

/// Layout used when creating a blank image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlankFormat {
    pub sectors_per_track: u8,
    pub size_code: u8,
    pub first_sector_id: u8,
    pub gap3: u8,
    pub filler: u8,
}

impl BlankFormat {
    /// Amstrad CPC data format: 9 x 512 byte sectors numbered from 0xC1
    pub fn cpc_data() -> Self {
        Self {
            sectors_per_track: 9,
            size_code: 2,
            first_sector_id: 0xC1,
            gap3: 0x4E,
            filler: 0xE5,
        }
    }

    /// Amstrad CPC system format: 9 x 512 byte sectors numbered from 0x41
    pub fn cpc_system() -> Self {
        Self {
            first_sector_id: 0x41,
            ..Self::cpc_data()
        }
    }
}

impl Default for BlankFormat {
    fn default() -> Self {
        Self::cpc_data()
    }
}

#[derive(Debug, Clone)]
pub struct DskImage {
    data: Vec<u8>,
    kind: FormatKind,
    tracks: u8,
    sides: u8,
    /// Indexed by (track << 1) | side, None for absent tracks
    track_offsets: Vec<Option<TrackRange>>,
    current_track: u8,
    /// Sector layout of the current track, one list per side
    sector_offsets: [Vec<SectorSlot>; MAX_SIDES as usize],
    write_protected: bool,
    dirty: bool,
}

impl DskImage {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, DiskError> {
        let mut file = File::open(path)?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;

        Self::from_bytes(data)
    }

    /// True if `data` starts with either DSK magic
    pub fn probe(data: &[u8]) -> bool {
        data.starts_with(STANDARD_MAGIC) || data.starts_with(EXTENDED_MAGIC)
    }

    pub fn from_bytes(data: Vec<u8>) -> Result<Self, DiskError> {
        if data.len() < DISK_INFO_SIZE {
            if !Self::probe(&data) {
                return Err(DiskError::BadMagic {
                    expected: "MV - CPC or EXTENDED",
                });
            }
            return Err(DiskError::Truncated {
                what: "disk information block",
                needed: DISK_INFO_SIZE,
                available: data.len(),
            });
        }

        let kind = if data.starts_with(STANDARD_MAGIC) {
            FormatKind::Standard
        } else if data.starts_with(EXTENDED_MAGIC) {
            FormatKind::Extended
        } else {
            return Err(DiskError::BadMagic {
                expected: "MV - CPC or EXTENDED",
            });
        };

        let tracks = data[HEADER_TRACKS];
        let sides = data[HEADER_SIDES];
        if tracks == 0 || sides == 0 || sides > MAX_SIDES {
            return Err(DiskError::InvalidGeometry {
                tracks: tracks as u32,
                sides: sides as u32,
            });
        }

        let track_offsets = match kind {
            FormatKind::Standard => Self::standard_track_table(&data, tracks, sides)?,
            _ => Self::extended_track_table(&data, tracks, sides)?,
        };

        let mut image = Self {
            data,
            kind,
            tracks,
            sides,
            track_offsets,
            current_track: 0,
            sector_offsets: Default::default(),
            write_protected: false,
            dirty: false,
        };
        image.rebuild_sector_table();

        tracing::debug!(
            "Loaded {} image: {} tracks, {} sides, {} bytes",
            kind,
            tracks,
            sides,
            image.data.len()
        );

        Ok(image)
    }

    /// Create a formatted standard image with every sector filled
    pub fn create_blank(geometry: DriveGeometry, format: BlankFormat) -> Result<Self, DiskError> {
        geometry.validate()?;

        let sector_size = sector_size_from_code(format.size_code).ok_or(DiskError::OutOfRange {
            what: "sector size code",
            value: format.size_code as usize,
            limit: crate::chrn::MAX_SIZE_CODE as usize,
        })?;
        let spt = format.sectors_per_track as usize;
        if spt > MAX_SECTORS_PER_TRACK {
            return Err(DiskError::OutOfRange {
                what: "sectors per track",
                value: spt,
                limit: MAX_SECTORS_PER_TRACK,
            });
        }

        let track_size = TRACK_INFO_SIZE + spt * sector_size;
        if track_size > u16::MAX as usize {
            return Err(DiskError::OutOfRange {
                what: "track size",
                value: track_size,
                limit: u16::MAX as usize,
            });
        }

        let track_count = geometry.tracks as usize * geometry.sides as usize;
        let mut data = vec![0u8; DISK_INFO_SIZE + track_count * track_size];

        let disk_info = b"MV - CPCEMU Disk-File\r\nDisk-Info\r\n";
        data[..disk_info.len()].copy_from_slice(disk_info);
        let creator = b"flopdrv";
        data[0x22..0x22 + creator.len()].copy_from_slice(creator);
        data[HEADER_TRACKS] = geometry.tracks;
        data[HEADER_SIDES] = geometry.sides;
        data[HEADER_TRACK_SIZE..HEADER_TRACK_SIZE + 2]
            .copy_from_slice(&(track_size as u16).to_le_bytes());

        for track in 0..geometry.tracks {
            for side in 0..geometry.sides {
                let index = track as usize * geometry.sides as usize + side as usize;
                let start = DISK_INFO_SIZE + index * track_size;
                let header = &mut data[start..start + TRACK_INFO_SIZE];

                header[..12].copy_from_slice(b"Track-Info\r\n");
                header[0x10] = track;
                header[0x11] = side;
                header[TRACK_SECTOR_SIZE_CODE] = format.size_code;
                header[TRACK_SECTOR_COUNT] = format.sectors_per_track;
                header[0x16] = format.gap3;
                header[0x17] = format.filler;

                for i in 0..spt {
                    let entry = TRACK_SECTOR_INFO + i * SECTOR_INFO_SIZE;
                    header[entry] = track;
                    header[entry + 1] = side;
                    header[entry + 2] = format.first_sector_id.wrapping_add(i as u8);
                    header[entry + 3] = format.size_code;
                }

                data[start + TRACK_INFO_SIZE..start + track_size].fill(format.filler);
            }
        }

        tracing::debug!(
            "Created blank {} image: {} sectors of {} bytes per track",
            geometry,
            spt,
            sector_size
        );

        Self::from_bytes(data)
    }

    fn standard_track_table(
        data: &[u8],
        tracks: u8,
        sides: u8,
    ) -> Result<Vec<Option<TrackRange>>, DiskError> {
        let track_size = read_u16_le(data, HEADER_TRACK_SIZE) as usize;
        if track_size < TRACK_INFO_SIZE {
            return Err(DiskError::OutOfRange {
                what: "standard track size",
                value: track_size,
                limit: TRACK_INFO_SIZE,
            });
        }

        let mut table = vec![None; tracks as usize * MAX_SIDES as usize];
        let mut offset = DISK_INFO_SIZE;

        for track in 0..tracks as usize {
            for side in 0..sides as usize {
                if offset + track_size <= data.len() {
                    table[(track << 1) | side] = Some(TrackRange {
                        offset,
                        len: track_size,
                    });
                } else {
                    tracing::warn!(
                        "Standard DSK track {} side {} lies beyond end of image, treating as unformatted",
                        track,
                        side
                    );
                }
                offset += track_size;
            }
        }

        Ok(table)
    }

    fn extended_track_table(
        data: &[u8],
        tracks: u8,
        sides: u8,
    ) -> Result<Vec<Option<TrackRange>>, DiskError> {
        let entries = tracks as usize * sides as usize;
        let limit = DISK_INFO_SIZE - HEADER_TRACK_SIZE_TABLE;
        if entries > limit {
            return Err(DiskError::OutOfRange {
                what: "extended track table entries",
                value: entries,
                limit,
            });
        }

        let mut table = vec![None; tracks as usize * MAX_SIDES as usize];
        let mut offset = DISK_INFO_SIZE;

        for i in 0..entries {
            let len = (data[HEADER_TRACK_SIZE_TABLE + i] as usize) << 8;
            let (track, side) = (i / sides as usize, i % sides as usize);

            if len == 0 {
                continue;
            }
            if len < TRACK_INFO_SIZE || offset + len > data.len() {
                tracing::warn!(
                    "Extended DSK track {} side {} ({} bytes at 0x{:X}) does not fit image, treating as unformatted",
                    track,
                    side,
                    len,
                    offset
                );
            } else {
                table[(track << 1) | side] = Some(TrackRange { offset, len });
            }
            offset += len;
        }

        Ok(table)
    }

    fn track_range(&self, side: u8) -> Option<TrackRange> {
        if side >= self.sides {
            return None;
        }
        self.track_offsets
            .get(((self.current_track as usize) << 1) | side as usize)
            .copied()
            .flatten()
    }

    fn rebuild_sector_table(&mut self) {
        for side in 0..MAX_SIDES {
            let slots = match self.track_range(side) {
                Some(range) => self.scan_track(side, range),
                None => Vec::new(),
            };
            self.sector_offsets[side as usize] = slots;
        }
    }

    fn scan_track(&self, side: u8, range: TrackRange) -> Vec<SectorSlot> {
        let header = &self.data[range.offset..range.offset + TRACK_INFO_SIZE];
        let mut count = header[TRACK_SECTOR_COUNT] as usize;
        if count > MAX_SECTORS_PER_TRACK {
            tracing::warn!(
                "Track {} side {} claims {} sectors, header holds {}",
                self.current_track,
                side,
                count,
                MAX_SECTORS_PER_TRACK
            );
            count = MAX_SECTORS_PER_TRACK;
        }

        let track_end = range.offset + range.len;
        let mut data_offset = range.offset + TRACK_INFO_SIZE;
        let mut slots = Vec::with_capacity(count);

        for i in 0..count {
            let info_offset = range.offset + TRACK_SECTOR_INFO + i * SECTOR_INFO_SIZE;
            let len = match self.kind {
                FormatKind::Standard => match sector_size_from_code(header[TRACK_SECTOR_SIZE_CODE]) {
                    Some(len) => len,
                    None => {
                        tracing::warn!(
                            "Track {} side {} has invalid sector size code {:02X}",
                            self.current_track,
                            side,
                            header[TRACK_SECTOR_SIZE_CODE]
                        );
                        break;
                    }
                },
                _ => read_u16_le(&self.data, info_offset + 6) as usize,
            };

            if data_offset + len > track_end {
                tracing::warn!(
                    "Track {} side {} sector {} overruns its track, stopping at {} sectors",
                    self.current_track,
                    side,
                    i,
                    slots.len()
                );
                break;
            }

            slots.push(SectorSlot {
                info_offset,
                data_offset,
                len,
            });
            data_offset += len;
        }

        slots
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

    pub fn get_tracks(&self) -> u8 {
        self.tracks
    }

    pub fn get_sides(&self) -> u8 {
        self.sides
    }

    pub fn current_track(&self) -> u8 {
        self.current_track
    }
}

impl DiskImageBackend for DskImage {
    fn format_kind(&self) -> FormatKind {
        self.kind
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
        let info = &self.data[slot.info_offset..slot.info_offset + SECTOR_INFO_SIZE];

        let mut flags = IdFlags::empty();
        let (st1, st2) = (info[4], info[5]);
        flags.set(IdFlags::DELETED_DATA, st2 & ST2_CONTROL_MARK != 0);
        if st1 & ST1_DATA_ERROR != 0 {
            if st2 & ST2_DATA_ERROR_IN_DATA != 0 {
                flags.set(IdFlags::CRC_ERROR_IN_DATA, true);
            } else {
                flags.set(IdFlags::CRC_ERROR_IN_ID, true);
            }
        }

        Ok(ChrnId {
            c: info[0],
            h: info[1],
            r: info[2],
            n: info[3],
            data_id: id_index,
            flags,
        })
    }

    fn read_sector(&self, side: u8, data_id: usize, buf: &mut [u8]) -> Result<usize, DiskError> {
        let slot = self.slot(side, data_id)?;
        let len = buf.len().min(slot.len);
        buf[..len].copy_from_slice(&self.data[slot.data_offset..slot.data_offset + len]);
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
        let len = data.len().min(slot.len);
        self.data[slot.data_offset..slot.data_offset + len].copy_from_slice(&data[..len]);

        let st2 = &mut self.data[slot.info_offset + 5];
        if deleted_data_mark {
            *st2 |= ST2_CONTROL_MARK;
        } else {
            *st2 &= !ST2_CONTROL_MARK;
        }
        self.dirty = true;

        Ok(len)
    }

    fn track_size(&self, side: u8) -> usize {
        self.track_range(side).map_or(0, |range| range.len)
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

fn read_u16_le(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extended_image(track_sizes: &[u8], sectors: &[(u8, u16)]) -> Vec<u8> {
        let mut data = vec![0u8; DISK_INFO_SIZE];
        data[..8].copy_from_slice(EXTENDED_MAGIC);
        data[HEADER_TRACKS] = track_sizes.len() as u8;
        data[HEADER_SIDES] = 1;
        for (i, size) in track_sizes.iter().enumerate() {
            data[HEADER_TRACK_SIZE_TABLE + i] = *size;
        }

        for size in track_sizes {
            if *size == 0 {
                continue;
            }
            let mut track = vec![0u8; (*size as usize) << 8];
            track[TRACK_SECTOR_COUNT] = sectors.len() as u8;
            for (i, (r, len)) in sectors.iter().enumerate() {
                let entry = TRACK_SECTOR_INFO + i * SECTOR_INFO_SIZE;
                track[entry + 2] = *r;
                track[entry + 6..entry + 8].copy_from_slice(&len.to_le_bytes());
            }
            data.extend_from_slice(&track);
        }
        data
    }

    #[test]
    fn test_rejects_unknown_magic() {
        let data = vec![0u8; 0x200];
        assert!(matches!(
            DskImage::from_bytes(data),
            Err(DiskError::BadMagic { .. })
        ));
    }

    #[test]
    fn test_rejects_truncated_header() {
        let mut data = vec![0u8; 0x40];
        data[..8].copy_from_slice(STANDARD_MAGIC);
        assert!(matches!(
            DskImage::from_bytes(data),
            Err(DiskError::Truncated { .. })
        ));
    }

    #[test]
    fn test_extended_absent_track() {
        let data = extended_image(&[0x03, 0x00, 0x03], &[(1, 256), (2, 256)]);
        let mut image = DskImage::from_bytes(data).unwrap();

        assert_eq!(image.format_kind(), FormatKind::Extended);
        assert_eq!(image.sectors_per_track(0), 2);

        image.seek_notify(1);
        assert_eq!(image.sectors_per_track(0), 0);
        assert_eq!(image.track_size(0), 0);

        image.seek_notify(2);
        assert_eq!(image.sectors_per_track(0), 2);
        assert_eq!(image.get_sector_id(0, 1).unwrap().r, 2);
    }

    #[test]
    fn test_extended_variable_sector_lengths() {
        let data = extended_image(&[0x04], &[(1, 128), (2, 512)]);
        let mut image = DskImage::from_bytes(data).unwrap();

        let mut buf = vec![0u8; 1024];
        image.write_sector(0, 1, &[0xAA; 1024], false).unwrap();
        assert_eq!(image.read_sector(0, 0, &mut buf).unwrap(), 128);
        assert!(buf[..128].iter().all(|&b| b == 0));
        assert_eq!(image.read_sector(0, 1, &mut buf).unwrap(), 512);
        assert!(buf[..512].iter().all(|&b| b == 0xAA));
    }

    #[test]
    fn test_sector_overrunning_track_is_dropped() {
        let data = extended_image(&[0x02], &[(1, 128), (2, 0x4000)]);
        let image = DskImage::from_bytes(data).unwrap();

        assert_eq!(image.sectors_per_track(0), 1);
        assert!(matches!(
            image.get_sector_id(0, 1),
            Err(DiskError::SectorNotFound { index: 1, count: 1, .. })
        ));
    }

    #[test]
    fn test_crc_status_flags() {
        let mut data = extended_image(&[0x04], &[(1, 256), (2, 256)]);
        let first = DISK_INFO_SIZE + TRACK_SECTOR_INFO;
        data[first + 4] = ST1_DATA_ERROR;
        data[first + 5] = ST2_DATA_ERROR_IN_DATA;
        data[first + SECTOR_INFO_SIZE + 4] = ST1_DATA_ERROR;

        let image = DskImage::from_bytes(data).unwrap();
        let id = image.get_sector_id(0, 0).unwrap();
        assert!(id.flags.crc_error_in_data());
        assert!(!id.flags.crc_error_in_id());

        let id = image.get_sector_id(0, 1).unwrap();
        assert!(id.flags.crc_error_in_id());
    }

    #[test]
    fn test_create_blank() {
        let image = DskImage::create_blank(DriveGeometry::DS_40, BlankFormat::cpc_data()).unwrap();

        assert_eq!(image.format_kind(), FormatKind::Standard);
        assert_eq!(image.image_geometry(), (40, 2));
        assert_eq!(image.sectors_per_track(1), 9);
        assert_eq!(image.track_size(0), 0x100 + 9 * 512);

        let id = image.get_sector_id(1, 8).unwrap();
        assert_eq!((id.c, id.h, id.r, id.n), (0, 1, 0xC9, 2));

        let mut buf = [0u8; 512];
        image.read_sector(0, 0, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0xE5));
    }

    #[test]
    fn test_write_protected_image_refuses_writes() {
        let mut image =
            DskImage::create_blank(DriveGeometry::SS_40, BlankFormat::cpc_system()).unwrap();
        image.set_write_protected(true);

        assert!(!image.is_writable());
        assert!(matches!(
            image.write_sector(0, 0, &[0; 512], false),
            Err(DiskError::WriteProtected)
        ));
        assert!(!image.is_dirty());
    }
}
