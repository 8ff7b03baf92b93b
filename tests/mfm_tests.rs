use flopdrv::{
    image_loader,
    mfm_image::{DATA_ADDRESS_MARK, DELETED_DATA_ADDRESS_MARK, ID_ADDRESS_MARK, MFM_LO_TRACK_SIZE},
    DiskError, DiskImageBackend, DriveGeometry, FloppyConfig, FloppyRegistry, FormatKind, MfmImage,
};
use tracing_subscriber::fmt;

#[cfg(test)]
#[ctor::ctor]
fn init() {
    let fmt_subscriber = fmt::Subscriber::builder()
        .with_max_level(tracing::Level::DEBUG)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(fmt_subscriber)
        .expect("Unable to set global tracing subscriber");
}

fn push_sector(track: &mut Vec<u8>, chrn: [u8; 4], mark: u8, fill: u8) {
    track.extend_from_slice(&[0x4E; 40]);
    track.extend_from_slice(&[0x00; 12]);
    track.extend_from_slice(&[0xA1, 0xA1, 0xA1, ID_ADDRESS_MARK]);
    track.extend_from_slice(&chrn);
    track.extend_from_slice(&[0xCA, 0xFE]);
    track.extend_from_slice(&[0x4E; 22]);
    track.extend_from_slice(&[0x00; 12]);
    track.extend_from_slice(&[0xA1, 0xA1, 0xA1, mark]);
    track.extend(std::iter::repeat(fill).take(128 << chrn[3]));
    track.extend_from_slice(&[0xBE, 0xEF]);
}

/// Raw image whose track 0 holds three ID/data pairs followed by filler
fn three_sector_image() -> MfmImage {
    let mut image = MfmImage::create_unformatted(DriveGeometry::SS_40).unwrap();

    let mut track = Vec::new();
    push_sector(&mut track, [0, 0, 1, 2], DATA_ADDRESS_MARK, 0x01);
    push_sector(&mut track, [0, 0, 2, 2], DELETED_DATA_ADDRESS_MARK, 0x02);
    push_sector(&mut track, [0, 0, 3, 2], DATA_ADDRESS_MARK, 0x03);
    track.resize(MFM_LO_TRACK_SIZE, 0x4E);

    image.write_track(0, &track).unwrap();
    image.mark_clean();
    image
}

#[test]
fn test_three_sectors_then_garbage() {
    let image = three_sector_image();

    assert_eq!(image.sectors_per_track(0), 3);
    let id = image.get_sector_id(0, 2).unwrap();
    assert_eq!((id.c, id.h, id.r, id.n), (0, 0, 3, 2));
    assert!(matches!(
        image.get_sector_id(0, 3),
        Err(DiskError::SectorNotFound { index: 3, count: 3, .. })
    ));
}

#[test]
fn test_deleted_mark_and_data() {
    let mut image = three_sector_image();

    assert!(!image.get_sector_id(0, 0).unwrap().flags.deleted_data());
    assert!(image.get_sector_id(0, 1).unwrap().flags.deleted_data());

    let mut buf = [0u8; 512];
    assert_eq!(image.read_sector(0, 1, &mut buf).unwrap(), 512);
    assert!(buf.iter().all(|&b| b == 0x02));

    image.write_sector(0, 0, &[0x77; 512], true).unwrap();
    assert!(image.get_sector_id(0, 0).unwrap().flags.deleted_data());
    assert_eq!(image.sectors_per_track(0), 3);
    assert!(image.is_dirty());
}

#[test]
fn test_raw_track_round_trip_through_drive() {
    let image = three_sector_image();
    let bytes = image.image_bytes().to_vec();

    let mut registry = FloppyRegistry::new(&FloppyConfig::uniform(1, DriveGeometry::SS_40)).unwrap();
    let backend = image_loader::open_image(bytes, false).unwrap();
    assert_eq!(backend.format_kind(), FormatKind::RawMfm);
    registry.insert_disk(0, backend).unwrap();

    let drive = registry.drive_mut(0).unwrap();
    assert_eq!(drive.get_current_track_size(0), MFM_LO_TRACK_SIZE);

    let mut track = vec![0u8; MFM_LO_TRACK_SIZE];
    assert_eq!(drive.read_track_data(0, &mut track).unwrap(), MFM_LO_TRACK_SIZE);

    drive.seek(1);
    assert_eq!(drive.get_sectors_per_track(0), 0);
    drive.write_track_data(0, &track).unwrap();
    assert_eq!(drive.get_sectors_per_track(0), 3);
    assert_eq!(drive.get_next_sector_id(0).unwrap().r, 1);
}

#[test]
fn test_other_densities_rejected() {
    let mut bytes = three_sector_image().image_bytes().to_vec();
    bytes[8..12].copy_from_slice(&0u32.to_le_bytes());

    assert!(matches!(
        image_loader::open_image(bytes, false),
        Err(DiskError::UnsupportedDensity(0))
    ));
}
