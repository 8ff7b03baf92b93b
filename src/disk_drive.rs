// Floppy drive mechanism: head position, motor, ready and index timing.
// Byte storage is delegated to whichever disk image backend is attached.

use std::{cell::RefCell, fmt, rc::Rc};

use derivative::Derivative;
use serde::{Deserialize, Serialize};

use crate::backend::{DiskImageBackend, FormatKind};
use crate::chrn::ChrnId;
use crate::clock::{Clock, ClockEvent, TimerHandle};
use crate::disk_error::DiskError;
use crate::geometry::DriveGeometry;

pub const DEFAULT_RPM: f64 = 300.0;

/// Fraction of a revolution the index pulse stays high
const INDEX_PULSE_DUTY: f64 = 1.0 / 20.0;

/// Boolean status lines a controller can poll one at a time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriveFlag {
    Connected,
    DiskInserted,
    WriteProtected,
    HeadAtTrack0,
    Ready,
    Index,
    MotorOn,
    DiskImageReadOnly,
}

impl DriveFlag {
    pub const ALL: [DriveFlag; 8] = [
        DriveFlag::Connected,
        DriveFlag::DiskInserted,
        DriveFlag::WriteProtected,
        DriveFlag::HeadAtTrack0,
        DriveFlag::Ready,
        DriveFlag::Index,
        DriveFlag::MotorOn,
        DriveFlag::DiskImageReadOnly,
    ];

    pub fn bit(self) -> u16 {
        match self {
            DriveFlag::Connected => 0x0001,
            DriveFlag::DiskInserted => 0x0002,
            DriveFlag::WriteProtected => 0x0004,
            DriveFlag::HeadAtTrack0 => 0x0008,
            DriveFlag::Ready => 0x0010,
            DriveFlag::Index => 0x0020,
            DriveFlag::MotorOn => 0x0040,
            DriveFlag::DiskImageReadOnly => 0x0080,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DriveFlags(u16);

impl DriveFlags {
    pub fn contains(&self, flag: DriveFlag) -> bool {
        self.0 & flag.bit() != 0
    }

    pub fn set(&mut self, flag: DriveFlag, on: bool) {
        if on {
            self.0 |= flag.bit();
        } else {
            self.0 &= !flag.bit();
        }
    }

    pub fn bits(&self) -> u16 {
        self.0
    }
}

/// How the ready line is driven
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadyMode {
    /// Ready is whatever the host machine says (PC style)
    Forced(bool),
    /// Ready follows disk present and motor on (CPC, Spectrum, PCW style)
    Derived,
}

impl Default for ReadyMode {
    fn default() -> Self {
        ReadyMode::Derived
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MechanicalState {
    MotorOff,
    MotorOnNotReady,
    MotorOnReady,
}

/// Called with the drive id and the new level of a line
pub type LineCallback = Box<dyn FnMut(usize, bool)>;

/// Snapshot of a drive for hosts and debuggers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriveStatus {
    pub id: usize,
    pub geometry: DriveGeometry,
    pub track: u8,
    pub motor_on: bool,
    pub ready: bool,
    pub write_protected: bool,
    pub disk_changed: bool,
    pub index: bool,
    pub rpm: f64,
    pub format: Option<FormatKind>,
}

#[derive(Derivative)]
#[derivative(Debug)]
pub struct FloppyDrive {
    id: usize,
    geometry: DriveGeometry,
    current_track: u8,
    flags: DriveFlags,
    ready_mode: ReadyMode,
    disk_changed: bool,
    index_phase: bool,
    rpm: f64,
    id_index: usize,
    image: Option<Box<dyn DiskImageBackend>>,

    #[derivative(Debug = "ignore")]
    clock: Rc<RefCell<Clock>>,
    index_timer: Option<TimerHandle>,

    #[derivative(Debug = "ignore")]
    ready_change_callback: Option<LineCallback>,
    #[derivative(Debug = "ignore")]
    index_pulse_callback: Option<LineCallback>,
}

impl FloppyDrive {
    pub fn new(id: usize, geometry: DriveGeometry, clock: Rc<RefCell<Clock>>) -> Self {
        let mut drive = Self {
            id,
            geometry,
            current_track: 0,
            flags: DriveFlags::default(),
            ready_mode: ReadyMode::Derived,
            disk_changed: false,
            index_phase: false,
            rpm: DEFAULT_RPM,
            id_index: 0,
            image: None,
            clock,
            index_timer: None,
            ready_change_callback: None,
            index_pulse_callback: None,
        };
        drive.init(geometry);
        drive
    }

    /// Configure geometry and return the mechanism to its power-on state.
    /// An attached image stays attached and the ready mode is kept.
    pub fn init(&mut self, geometry: DriveGeometry) {
        self.geometry = geometry;
        self.stop_index_timer();
        self.flags.set(DriveFlag::MotorOn, false);
        self.flags.set(DriveFlag::Connected, true);
        self.flags.set(DriveFlag::Index, false);

        self.current_track = 0;
        self.flags.set(DriveFlag::HeadAtTrack0, true);
        self.id_index = 0;
        self.disk_changed = false;
        if let Some(image) = self.image.as_mut() {
            image.seek_notify(0);
        }

        self.apply_ready_mode();

        tracing::info!("Drive {} configured as {}", self.id, geometry);
    }

    pub fn set_geometry_absolute(&mut self, tracks: u32, sides: u32) -> Result<(), DiskError> {
        let geometry = DriveGeometry::absolute(tracks, sides)?;
        self.init(geometry);
        Ok(())
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn geometry(&self) -> DriveGeometry {
        self.geometry
    }

    /// Insert media. Returns the image that was in the drive, if any; the
    /// caller is responsible for persisting it.
    pub fn attach_image(
        &mut self,
        mut image: Box<dyn DiskImageBackend>,
    ) -> Option<Box<dyn DiskImageBackend>> {
        let previous = self.image.take();

        image.seek_notify(self.current_track);
        let read_only = !image.is_writable();
        tracing::info!(
            "Drive {}: {} inserted{}",
            self.id,
            image.format_kind(),
            if read_only { " (read only)" } else { "" }
        );

        self.image = Some(image);
        self.flags.set(DriveFlag::DiskInserted, true);
        self.flags.set(DriveFlag::DiskImageReadOnly, read_only);
        self.flags.set(DriveFlag::WriteProtected, read_only);
        self.disk_changed = true;
        self.id_index = 0;

        if self.ready_mode == ReadyMode::Derived {
            self.apply_ready_mode();
        }

        previous
    }

    /// Remove media, handing the image back to the caller for persisting
    pub fn detach_image(&mut self) -> Option<Box<dyn DiskImageBackend>> {
        let image = self.image.take();
        if image.is_some() {
            tracing::info!("Drive {}: disk ejected", self.id);
        }

        self.flags.set(DriveFlag::DiskInserted, false);
        self.flags.set(DriveFlag::DiskImageReadOnly, false);
        self.flags.set(DriveFlag::WriteProtected, false);
        self.disk_changed = true;
        self.id_index = 0;

        if self.ready_mode == ReadyMode::Derived {
            self.apply_ready_mode();
        }

        image
    }

    pub fn has_image(&self) -> bool {
        self.image.is_some()
    }

    pub fn image(&self) -> Option<&(dyn DiskImageBackend + 'static)> {
        self.image.as_deref()
    }

    pub fn image_mut(&mut self) -> Option<&mut (dyn DiskImageBackend + 'static)> {
        self.image.as_deref_mut()
    }

    /// Spin the motor up or down. Ready is left alone; see `set_ready_state`.
    pub fn set_motor(&mut self, on: bool) {
        let was_on = self.flags.contains(DriveFlag::MotorOn);
        if was_on == on {
            return;
        }

        self.flags.set(DriveFlag::MotorOn, on);
        if on {
            self.start_index_timer();
        } else {
            self.stop_index_timer();
        }
        tracing::debug!("Drive {}: motor {}", self.id, if on { "ON" } else { "OFF" });
    }

    pub fn is_motor_on(&self) -> bool {
        self.flags.contains(DriveFlag::MotorOn)
    }

    /// With `derive_from_mechanics` ready becomes image attached AND motor on,
    /// and keeps following media changes; otherwise ready is `forced_value`.
    pub fn set_ready_state(&mut self, forced_value: bool, derive_from_mechanics: bool) {
        self.ready_mode = if derive_from_mechanics {
            ReadyMode::Derived
        } else {
            ReadyMode::Forced(forced_value)
        };
        self.apply_ready_mode();
    }

    pub fn ready_mode(&self) -> ReadyMode {
        self.ready_mode
    }

    fn apply_ready_mode(&mut self) {
        let ready = match self.ready_mode {
            ReadyMode::Forced(value) => value,
            ReadyMode::Derived => self.image.is_some() && self.is_motor_on(),
        };
        self.set_flag_state(DriveFlag::Ready, ready);
    }

    pub fn mechanical_state(&self) -> MechanicalState {
        if !self.is_motor_on() {
            MechanicalState::MotorOff
        } else if self.flags.contains(DriveFlag::Ready) {
            MechanicalState::MotorOnReady
        } else {
            MechanicalState::MotorOnNotReady
        }
    }

    /// Step the head by `delta_tracks`, clamped to the drive's travel.
    /// Any step clears the disk changed latch.
    pub fn seek(&mut self, delta_tracks: i32) {
        let max_track = self.geometry.tracks as i64 - 1;
        let target = (self.current_track as i64 + delta_tracks as i64).clamp(0, max_track);

        if target != self.current_track as i64 + delta_tracks as i64 {
            tracing::debug!(
                "Drive {}: seek by {} from track {} clamped to {}",
                self.id,
                delta_tracks,
                self.current_track,
                target
            );
        }

        self.current_track = target as u8;
        self.flags
            .set(DriveFlag::HeadAtTrack0, self.current_track == 0);
        self.id_index = 0;
        self.disk_changed = false;

        if let Some(image) = self.image.as_mut() {
            image.seek_notify(self.current_track);
        }

        tracing::trace!("Drive {}: head at track {}", self.id, self.current_track);
    }

    pub fn get_current_track(&self) -> u8 {
        self.current_track
    }

    pub fn disk_changed(&self) -> bool {
        self.disk_changed
    }

    pub fn get_flag_state(&self, flag: DriveFlag) -> bool {
        match flag {
            DriveFlag::WriteProtected => {
                self.flags.contains(DriveFlag::WriteProtected)
                    || self.image.as_ref().map_or(true, |image| !image.is_writable())
            }
            other => self.flags.contains(other),
        }
    }

    /// Set a status line. The ready-change callback runs only when ready
    /// actually changes level.
    pub fn set_flag_state(&mut self, flag: DriveFlag, state: bool) {
        if flag == DriveFlag::MotorOn {
            self.set_motor(state);
            return;
        }

        let previous = self.flags.contains(flag);
        self.flags.set(flag, state);

        if flag == DriveFlag::Ready && previous != state {
            tracing::debug!(
                "Drive {}: ready {}",
                self.id,
                if state { "asserted" } else { "released" }
            );
            let id = self.id;
            if let Some(callback) = self.ready_change_callback.as_mut() {
                callback(id, state);
            }
        }
    }

    pub fn set_ready_change_callback(&mut self, callback: LineCallback) {
        self.ready_change_callback = Some(callback);
    }

    pub fn set_index_pulse_callback(&mut self, callback: LineCallback) {
        self.index_pulse_callback = Some(callback);
    }

    pub fn get_sectors_per_track(&self, side: u8) -> usize {
        if side >= self.geometry.sides {
            return 0;
        }
        self.image
            .as_ref()
            .map_or(0, |image| image.sectors_per_track(side))
    }

    /// Return the ID under the head and move on to the next one, wrapping
    /// at the end of the track. The index line goes high when the returned
    /// ID is the last on the track or the track is empty.
    pub fn get_next_sector_id(&mut self, side: u8) -> Option<ChrnId> {
        let spt = self.get_sectors_per_track(side);
        self.set_flag_state(DriveFlag::Index, spt == 0 || self.id_index + 1 >= spt);

        if spt == 0 {
            self.id_index = 0;
            return None;
        }

        let index = self.id_index % spt;
        self.id_index = (index + 1) % spt;

        let image = self.image.as_ref()?;
        match image.get_sector_id(side, index) {
            Ok(id) => {
                tracing::trace!("Drive {}: side {} id {}: {}", self.id, side, index, id);
                Some(id)
            }
            Err(err) => {
                tracing::warn!("Drive {}: sector id {} unreadable: {}", self.id, index, err);
                None
            }
        }
    }

    /// Copy sector data into `buf`. Without media the buffer is left as is.
    pub fn read_sector_data(
        &mut self,
        side: u8,
        data_id: usize,
        buf: &mut [u8],
    ) -> Result<usize, DiskError> {
        match self.image.as_ref() {
            Some(image) => image.read_sector(side, data_id, buf),
            None => Ok(0),
        }
    }

    /// Write sector data. Dropped without media or when write protected.
    pub fn write_sector_data(
        &mut self,
        side: u8,
        data_id: usize,
        data: &[u8],
        deleted_data_mark: bool,
    ) -> Result<usize, DiskError> {
        if self.get_flag_state(DriveFlag::WriteProtected) {
            tracing::debug!(
                "Drive {}: write to sector {} dropped (no media or write protected)",
                self.id,
                data_id
            );
            return Ok(0);
        }

        match self.image.as_mut() {
            Some(image) => image.write_sector(side, data_id, data, deleted_data_mark),
            None => Ok(0),
        }
    }

    pub fn read_track_data(&mut self, side: u8, buf: &mut [u8]) -> Result<usize, DiskError> {
        match self.image.as_ref() {
            Some(image) => image.read_track(side, buf),
            None => Ok(0),
        }
    }

    pub fn write_track_data(&mut self, side: u8, data: &[u8]) -> Result<usize, DiskError> {
        if self.get_flag_state(DriveFlag::WriteProtected) {
            tracing::debug!("Drive {}: track write dropped", self.id);
            return Ok(0);
        }

        let written = match self.image.as_mut() {
            Some(image) => image.write_track(side, data)?,
            None => 0,
        };
        self.id_index = 0;
        Ok(written)
    }

    /// Accepted for interface completeness; no image format formats sectors
    #[allow(clippy::too_many_arguments)]
    pub fn format_sector(
        &mut self,
        side: u8,
        sector_index: usize,
        c: u8,
        h: u8,
        r: u8,
        n: u8,
        filler: u8,
    ) -> Result<(), DiskError> {
        let id = ChrnId {
            c,
            h,
            r,
            n,
            data_id: sector_index,
            ..Default::default()
        };
        match self.image.as_mut() {
            Some(image) => image.format_sector(side, sector_index, id, filler),
            None => Ok(()),
        }
    }

    pub fn get_current_track_size(&self, side: u8) -> usize {
        self.image.as_ref().map_or(0, |image| image.track_size(side))
    }

    pub fn rpm(&self) -> f64 {
        self.rpm
    }

    /// Change rotational speed. A running index timer picks it up at its next edge.
    pub fn set_rpm(&mut self, rpm: f64) -> Result<(), DiskError> {
        if !(rpm.is_finite() && rpm > 0.0) {
            return Err(DiskError::Config(format!("invalid rpm {}", rpm)));
        }
        self.rpm = rpm;
        Ok(())
    }

    pub fn index_phase(&self) -> bool {
        self.index_phase
    }

    pub fn is_index_timer_running(&self) -> bool {
        self.index_timer.is_some()
    }

    fn index_edge_cycles(&self, rising: bool) -> u64 {
        let period = 60.0 / self.rpm;
        let high = period * INDEX_PULSE_DUTY;
        let secs = if rising { period - high } else { high };
        self.clock.borrow().cycles_from_secs(secs)
    }

    fn start_index_timer(&mut self) {
        self.stop_index_timer();
        let delay = self.index_edge_cycles(true);
        let handle = self
            .clock
            .borrow_mut()
            .schedule_in(delay, ClockEvent::IndexPulse { drive: self.id });
        self.index_timer = Some(handle);
    }

    fn stop_index_timer(&mut self) {
        if let Some(handle) = self.index_timer.take() {
            self.clock.borrow_mut().cancel(handle);
        }
        self.index_phase = false;
    }

    /// Handle an index timer event. Events from a cancelled timer are ignored.
    pub fn on_index_timer(&mut self, handle: TimerHandle) {
        if self.index_timer != Some(handle) {
            tracing::trace!("Drive {}: stale index event ignored", self.id);
            return;
        }

        self.index_phase = !self.index_phase;
        let delay = self.index_edge_cycles(!self.index_phase);
        let next = self
            .clock
            .borrow_mut()
            .schedule_in(delay, ClockEvent::IndexPulse { drive: self.id });
        self.index_timer = Some(next);

        self.set_flag_state(DriveFlag::Index, self.index_phase);
        tracing::trace!("Drive {}: index {}", self.id, self.index_phase as u8);

        let (id, phase) = (self.id, self.index_phase);
        if let Some(callback) = self.index_pulse_callback.as_mut() {
            callback(id, phase);
        }
    }

    pub fn status(&self) -> DriveStatus {
        DriveStatus {
            id: self.id,
            geometry: self.geometry,
            track: self.current_track,
            motor_on: self.is_motor_on(),
            ready: self.get_flag_state(DriveFlag::Ready),
            write_protected: self.get_flag_state(DriveFlag::WriteProtected),
            disk_changed: self.disk_changed,
            index: self.get_flag_state(DriveFlag::Index),
            rpm: self.rpm,
            format: self.image.as_ref().map(|image| image.format_kind()),
        }
    }
}

impl fmt::Display for FloppyDrive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Drive {}: {} Track={} Motor={} Ready={} Flags={:04X}",
            self.id,
            self.geometry,
            self.current_track,
            if self.is_motor_on() { "ON" } else { "OFF" },
            self.flags.contains(DriveFlag::Ready),
            self.flags.bits()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsk_image::{BlankFormat, DskImage};

    fn drive(geometry: DriveGeometry) -> FloppyDrive {
        FloppyDrive::new(0, geometry, Rc::new(RefCell::new(Clock::default())))
    }

    fn blank_image() -> Box<dyn DiskImageBackend> {
        Box::new(DskImage::create_blank(DriveGeometry::SS_40, BlankFormat::cpc_data()).unwrap())
    }

    #[test]
    fn test_init_state() {
        let drive = drive(DriveGeometry::SS_80);

        assert_eq!(drive.get_current_track(), 0);
        assert!(drive.get_flag_state(DriveFlag::Connected));
        assert!(drive.get_flag_state(DriveFlag::HeadAtTrack0));
        assert!(!drive.get_flag_state(DriveFlag::Ready));
        assert!(!drive.disk_changed());
        assert_eq!(drive.mechanical_state(), MechanicalState::MotorOff);
    }

    #[test]
    fn test_track0_flag_follows_head() {
        let mut drive = drive(DriveGeometry::DS_40);

        drive.seek(3);
        assert!(!drive.get_flag_state(DriveFlag::HeadAtTrack0));
        drive.seek(-3);
        assert!(drive.get_flag_state(DriveFlag::HeadAtTrack0));
    }

    #[test]
    fn test_write_protect_without_media() {
        let mut drive = drive(DriveGeometry::SS_40);
        assert!(drive.get_flag_state(DriveFlag::WriteProtected));

        drive.attach_image(blank_image());
        assert!(!drive.get_flag_state(DriveFlag::WriteProtected));

        drive.set_flag_state(DriveFlag::WriteProtected, true);
        assert!(drive.get_flag_state(DriveFlag::WriteProtected));
        assert_eq!(drive.write_sector_data(0, 0, &[1; 512], false).unwrap(), 0);
    }

    #[test]
    fn test_motor_flag_routes_to_motor() {
        let mut drive = drive(DriveGeometry::SS_40);

        drive.set_flag_state(DriveFlag::MotorOn, true);
        assert!(drive.is_motor_on());
        assert!(drive.is_index_timer_running());
    }

    #[test]
    fn test_index_flag_on_last_id() {
        let mut drive = drive(DriveGeometry::SS_40);
        drive.attach_image(blank_image());

        for _ in 0..8 {
            drive.get_next_sector_id(0);
            assert!(!drive.get_flag_state(DriveFlag::Index));
        }
        drive.get_next_sector_id(0);
        assert!(drive.get_flag_state(DriveFlag::Index));
    }

    #[test]
    fn test_single_sided_drive_cannot_read_side_one() {
        let mut drive = drive(DriveGeometry::SS_40);
        drive.attach_image(Box::new(
            DskImage::create_blank(DriveGeometry::DS_40, BlankFormat::cpc_data()).unwrap(),
        ));

        assert_eq!(drive.get_sectors_per_track(0), 9);
        assert_eq!(drive.get_sectors_per_track(1), 0);
        assert!(drive.get_next_sector_id(1).is_none());
    }

    #[test]
    fn test_invalid_rpm() {
        let mut drive = drive(DriveGeometry::SS_40);
        assert!(drive.set_rpm(0.0).is_err());
        assert!(drive.set_rpm(f64::NAN).is_err());
        assert!(drive.set_rpm(360.0).is_ok());
        assert_eq!(drive.rpm(), 360.0);
    }
}
