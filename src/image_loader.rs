// Maps host files and byte buffers to disk image backends

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::backend::DiskImageBackend;
use crate::disk_error::DiskError;
use crate::dsk_image::DskImage;
use crate::mfm_image::MfmImage;

struct ImageFormat {
    name: &'static str,
    probe: fn(&[u8]) -> bool,
    open: fn(Vec<u8>, bool) -> Result<Box<dyn DiskImageBackend>, DiskError>,
}

const IMAGE_FORMATS: &[ImageFormat] = &[
    ImageFormat {
        name: "DSK",
        probe: DskImage::probe,
        open: open_dsk,
    },
    ImageFormat {
        name: "MFM",
        probe: MfmImage::probe,
        open: open_mfm,
    },
];

fn open_dsk(data: Vec<u8>, read_only: bool) -> Result<Box<dyn DiskImageBackend>, DiskError> {
    let mut image = DskImage::from_bytes(data)?;
    image.set_write_protected(read_only);
    Ok(Box::new(image))
}

fn open_mfm(data: Vec<u8>, read_only: bool) -> Result<Box<dyn DiskImageBackend>, DiskError> {
    let mut image = MfmImage::from_bytes(data)?;
    image.set_write_protected(read_only);
    Ok(Box::new(image))
}

/// Pick the backend whose magic matches `data`. Header problems in a
/// recognized format are reported as that format's error; data no format
/// recognizes is `UnknownFormat`.
pub fn open_image(data: Vec<u8>, read_only: bool) -> Result<Box<dyn DiskImageBackend>, DiskError> {
    for format in IMAGE_FORMATS {
        if (format.probe)(&data) {
            tracing::debug!("Image recognized as {} ({} bytes)", format.name, data.len());
            return (format.open)(data, read_only);
        }
    }

    tracing::debug!("No image format recognized {} bytes", data.len());
    Err(DiskError::UnknownFormat)
}

/// An image loaded from the host together with where it came from
#[derive(Debug)]
pub struct LoadedImage {
    pub backend: Box<dyn DiskImageBackend>,
    pub path: PathBuf,
}

/// Read a host file and open it. Files the host will not let us write are
/// mounted write protected.
pub fn load_image_file<P: AsRef<Path>>(path: P) -> anyhow::Result<LoadedImage> {
    let path = path.as_ref();
    let data = fs::read(path).with_context(|| format!("reading disk image {}", path.display()))?;
    let read_only = fs::metadata(path)
        .map(|meta| meta.permissions().readonly())
        .unwrap_or(true);

    let backend = open_image(data, read_only)
        .with_context(|| format!("opening disk image {}", path.display()))?;

    tracing::info!(
        "Loaded {} from {}{}",
        backend.format_kind(),
        path.display(),
        if read_only { " (read only)" } else { "" }
    );

    Ok(LoadedImage {
        backend,
        path: path.to_path_buf(),
    })
}

/// Write the image back to the host and mark it clean
pub fn save_image<P: AsRef<Path>>(path: P, image: &mut dyn DiskImageBackend) -> anyhow::Result<()> {
    let path = path.as_ref();
    fs::write(path, image.image_bytes())
        .with_context(|| format!("writing disk image {}", path.display()))?;
    image.mark_clean();

    tracing::info!("Saved {} to {}", image.format_kind(), path.display());
    Ok(())
}
