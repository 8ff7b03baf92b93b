// Drive slots of an emulated machine
// Owns the drives, the virtual clock that times them, and the media glue

use std::path::{Path, PathBuf};
use std::{cell::RefCell, rc::Rc};

use crate::backend::DiskImageBackend;
use crate::clock::{Clock, ClockEvent};
use crate::config::FloppyConfig;
use crate::disk_drive::{DriveStatus, FloppyDrive, ReadyMode};
use crate::disk_error::DiskError;
use crate::dsk_image::{BlankFormat, DskImage};
use crate::image_loader;

#[derive(Debug)]
pub struct FloppyRegistry {
    drives: Vec<FloppyDrive>,
    /// Host file each mounted image is written back to on eject
    host_paths: Vec<Option<PathBuf>>,
    clock: Rc<RefCell<Clock>>,
}

impl FloppyRegistry {
    pub fn new(config: &FloppyConfig) -> Result<Self, DiskError> {
        config.validate()?;

        let clock = Rc::new(RefCell::new(Clock::new(config.clock_hz)));
        let mut drives = Vec::with_capacity(config.drives.len());
        for (id, drive_config) in config.drives.iter().enumerate() {
            let mut drive = FloppyDrive::new(id, drive_config.geometry, clock.clone());
            drive.set_rpm(drive_config.rpm)?;
            match drive_config.ready_mode {
                ReadyMode::Forced(value) => drive.set_ready_state(value, false),
                ReadyMode::Derived => drive.set_ready_state(false, true),
            }
            drives.push(drive);
        }

        tracing::info!(
            "Floppy registry: {} drives, clock {} Hz",
            drives.len(),
            config.clock_hz
        );

        Ok(Self {
            host_paths: vec![None; drives.len()],
            drives,
            clock,
        })
    }

    pub fn drive_count(&self) -> usize {
        self.drives.len()
    }

    pub fn drive(&self, id: usize) -> Result<&FloppyDrive, DiskError> {
        self.drives.get(id).ok_or(DiskError::InvalidDrive(id))
    }

    pub fn drive_mut(&mut self, id: usize) -> Result<&mut FloppyDrive, DiskError> {
        self.drives.get_mut(id).ok_or(DiskError::InvalidDrive(id))
    }

    pub fn drives_mut(&mut self) -> impl Iterator<Item = &mut FloppyDrive> {
        self.drives.iter_mut()
    }

    pub fn clock(&self) -> Rc<RefCell<Clock>> {
        self.clock.clone()
    }

    pub fn now(&self) -> u64 {
        self.clock.borrow().total_cycles()
    }

    /// Insert an in-memory image. Whatever was in the drive is ejected first;
    /// if that write-back fails the old disk stays mounted and `image` is dropped.
    pub fn insert_disk(
        &mut self,
        id: usize,
        image: Box<dyn DiskImageBackend>,
    ) -> anyhow::Result<()> {
        self.eject_disk(id)?;
        self.drive_mut(id)?.attach_image(image);
        Ok(())
    }

    /// Insert an image read from a host file; it is written back there on eject
    pub fn insert_disk_file<P: AsRef<Path>>(&mut self, id: usize, path: P) -> anyhow::Result<()> {
        self.drive(id)?;
        let loaded = image_loader::load_image_file(path)?;

        self.eject_disk(id)?;
        self.drive_mut(id)?.attach_image(loaded.backend);
        self.host_paths[id] = Some(loaded.path);
        Ok(())
    }

    /// Insert a freshly formatted standard image sized for the drive
    pub fn insert_new_disk(&mut self, id: usize, format: BlankFormat) -> anyhow::Result<()> {
        let geometry = self.drive(id)?.geometry();
        let image = DskImage::create_blank(geometry, format)?;
        self.insert_disk(id, Box::new(image))
    }

    /// Remove media from a drive, writing it back to its host file if it was
    /// modified. If the write-back fails the image stays in the drive, still
    /// bound to its host file, so a later eject or flush can retry.
    pub fn eject_disk(&mut self, id: usize) -> anyhow::Result<Option<Box<dyn DiskImageBackend>>> {
        let drive = self.drives.get_mut(id).ok_or(DiskError::InvalidDrive(id))?;
        if !drive.has_image() {
            return Ok(None);
        }

        if let (Some(image), Some(path)) = (drive.image_mut(), self.host_paths[id].as_deref()) {
            if image.is_dirty() {
                image_loader::save_image(path, image)?;
            }
        }

        self.host_paths[id] = None;
        Ok(drive.detach_image())
    }

    pub fn host_path(&self, id: usize) -> Option<&Path> {
        self.host_paths.get(id).and_then(|path| path.as_deref())
    }

    pub fn has_disk(&self, id: usize) -> bool {
        self.drives.get(id).map_or(false, |drive| drive.has_image())
    }

    pub fn all_motors_off(&mut self) {
        for drive in self.drives.iter_mut() {
            drive.set_motor(false);
        }
    }

    pub fn status(&self, id: usize) -> Result<DriveStatus, DiskError> {
        Ok(self.drive(id)?.status())
    }

    /// Advance virtual time by `cycles`, delivering every timer event that
    /// comes due to its drive in order
    pub fn run_for(&mut self, cycles: u64) {
        let deadline = self.clock.borrow().total_cycles().saturating_add(cycles);

        loop {
            let next = self.clock.borrow_mut().pop_due(deadline);
            let Some((handle, event)) = next else {
                break;
            };

            match event {
                ClockEvent::IndexPulse { drive } => match self.drives.get_mut(drive) {
                    Some(drive) => drive.on_index_timer(handle),
                    None => tracing::warn!("Index event for unknown drive {}", drive),
                },
            }
        }

        self.clock.borrow_mut().advance_to(deadline);
    }

    /// Write every modified host-backed image back to disk
    pub fn flush_all(&mut self) -> anyhow::Result<()> {
        for (drive, path) in self.drives.iter_mut().zip(self.host_paths.iter()) {
            if let (Some(image), Some(path)) = (drive.image_mut(), path) {
                if image.is_dirty() {
                    image_loader::save_image(path, image)?;
                }
            }
        }
        Ok(())
    }
}

impl Drop for FloppyRegistry {
    fn drop(&mut self) {
        for (id, (drive, path)) in self.drives.iter_mut().zip(self.host_paths.iter()).enumerate() {
            if let (Some(image), Some(path)) = (drive.image_mut(), path) {
                if image.is_dirty() {
                    if let Err(err) = image_loader::save_image(path, image) {
                        tracing::warn!("Drive {}: image not written back: {:#}", id, err);
                    }
                }
            }
        }
    }
}
