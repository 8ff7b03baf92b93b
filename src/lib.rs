pub mod backend;
pub mod chrn;
pub mod clock;
pub mod config;
pub mod disk_drive;
pub mod disk_error;
pub mod dsk_image;
pub mod fdc;
pub mod geometry;
pub mod image_loader;
pub mod mfm_image;
pub mod registry;

pub use backend::{DiskImageBackend, FormatKind};
pub use chrn::{ChrnId, IdFlags};
pub use clock::Clock;
pub use config::{DriveConfig, FloppyConfig};
pub use disk_drive::{DriveFlag, DriveStatus, FloppyDrive, MechanicalState, ReadyMode};
pub use disk_error::DiskError;
pub use dsk_image::{BlankFormat, DskImage};
pub use fdc::Wd179x;
pub use geometry::DriveGeometry;
pub use mfm_image::MfmImage;
pub use registry::FloppyRegistry;

use tracing_subscriber::{fmt, EnvFilter};
use wasm_bindgen::prelude::*;

/// Install a stderr subscriber for native hosts, filtered through `RUST_LOG`.
/// Does nothing if a global subscriber is already set.
pub fn init_native_tracing() {
    let fmt_subscriber = fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .finish();
    let _ = tracing::subscriber::set_global_default(fmt_subscriber);
}

fn to_js_error(err: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&err.to_string())
}

#[wasm_bindgen(js_name = FloppySystem)]
pub struct JsFloppySystem(Wd179x);

#[wasm_bindgen(js_class = FloppySystem)]
impl JsFloppySystem {
    #[wasm_bindgen(constructor)]
    pub fn new(config_json: Option<String>) -> Result<JsFloppySystem, JsValue> {
        console_error_panic_hook::set_once();
        let _ = tracing_wasm::try_set_as_global_default();

        let config = match config_json {
            Some(json) => FloppyConfig::from_json(&json).map_err(to_js_error)?,
            None => FloppyConfig::default(),
        };
        let fdc = Wd179x::from_config(&config).map_err(to_js_error)?;

        Ok(Self(fdc))
    }

    #[wasm_bindgen(js_name = insertDisk)]
    pub fn insert_disk(&mut self, drive: usize, data: &[u8]) -> Result<(), JsValue> {
        let image = image_loader::open_image(data.to_vec(), false).map_err(to_js_error)?;
        self.0
            .insert_disk(drive, image)
            .map_err(|err| to_js_error(format!("{:#}", err)))
    }

    /// Remove the disk and hand its current bytes back to the page
    #[wasm_bindgen(js_name = ejectDisk)]
    pub fn eject_disk(&mut self, drive: usize) -> Result<Option<Vec<u8>>, JsValue> {
        let image = self
            .0
            .eject_disk(drive)
            .map_err(|err| to_js_error(format!("{:#}", err)))?;
        Ok(image.map(|image| image.image_bytes().to_vec()))
    }

    pub fn read(&mut self, port: u8) -> u8 {
        self.0.read(port)
    }

    pub fn write(&mut self, port: u8, value: u8) {
        self.0.write(port, value);
    }

    #[wasm_bindgen(js_name = driveControl)]
    pub fn drive_control(&mut self, value: u8) {
        self.0.drive_control(value);
    }

    #[wasm_bindgen(js_name = runFor)]
    pub fn run_for(&mut self, cycles: u32) {
        self.0.run_for(cycles as u64);
    }

    #[wasm_bindgen(js_name = driveStatus)]
    pub fn drive_status(&self, drive: usize) -> Result<String, JsValue> {
        let status = self.0.registry().status(drive).map_err(to_js_error)?;
        serde_json::to_string(&status).map_err(to_js_error)
    }

    #[wasm_bindgen(getter)]
    pub fn intrq(&self) -> bool {
        self.0.intrq()
    }

    #[wasm_bindgen(getter)]
    pub fn drq(&self) -> bool {
        self.0.drq()
    }

    #[wasm_bindgen(getter)]
    pub fn state(&self) -> String {
        format!("{}", self.0)
    }
}
