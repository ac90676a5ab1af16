mod common;

use common::{Fixture, pattern, write_image};
use odisk_core::announce::{AnnouncingNotifier, MEDIA_TYPE, Publisher, ServiceRecord};
use odisk_core::config::ServerConfig;
use odisk_core::registry::DiskRegistry;
use odisk_core::service::DiskService;
use odisk_core::{DiskError, DriveState, NotifierError};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

fn service(fx: &Fixture) -> DiskService {
    DiskService::new(Arc::clone(&fx.registry))
}

#[test]
fn serves_ranges_by_request_fields() {
    let fx = Fixture::new();
    write_image(fx.root.path(), "movie.iso", 700);
    let service = service(&fx);

    let response = service.read_request("disk1.iso", "bytes=0-9").unwrap();
    assert_eq!(response.data, &pattern(700)[..10]);
    assert_eq!(response.total_size, 700);
    assert_eq!(response.content_range(), "bytes 0-9/700");

    let tail = service.read_request("disk1.dmg", "bytes=690-").unwrap();
    assert_eq!(tail.content_range(), "bytes 690-699/700");
    assert_eq!(tail.data.len(), 10);
}

#[test]
fn stat_reports_content_length() {
    let fx = Fixture::new();
    write_image(fx.root.path(), "movie.iso", 700);
    let service = service(&fx);

    let info = service.stat("disk1.dmg").unwrap();
    assert_eq!(info.id, "disk1");
    assert_eq!(info.size, 700);
    assert_eq!(info.label, "movie");
    assert_eq!(info.state, DriveState::Ready);

    let by_stable = service.stat(&info.stable_id).unwrap();
    assert_eq!(by_stable.id, "disk1");

    assert!(matches!(service.stat("disk9"), Err(DiskError::DiskNotFound(_))));
}

#[test]
fn unknown_disk_is_not_found() {
    let fx = Fixture::new();
    let service = service(&fx);
    assert!(matches!(
        service.read("disk1", 0, Some(10)),
        Err(DiskError::DiskNotFound(id)) if id == "disk1"
    ));
}

#[test]
fn empty_drive_is_not_ready() {
    let fx = Fixture::new();
    let node = fx.device_node("sr0", 4096);
    fx.probe.set_drives(&[&node]);
    fx.probe.set_state(&node, DriveState::Open);
    let service = service(&fx);

    match service.read("disk1", 0, Some(10)) {
        Err(DiskError::DeviceNotReady { id, state }) => {
            assert_eq!(id, "disk1");
            assert_eq!(state, DriveState::Open);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn inverted_range_is_rejected_before_readiness() {
    let fx = Fixture::new();
    let node = fx.device_node("sr0", 4096);
    fx.probe.set_drives(&[&node]);
    fx.probe.set_state(&node, DriveState::Empty);
    let service = service(&fx);

    assert!(matches!(
        service.read("disk1", 10, Some(5)),
        Err(DiskError::InvalidRange { start: 10, end: Some(5) })
    ));
}

#[test]
fn malformed_range_header() {
    let fx = Fixture::new();
    write_image(fx.root.path(), "movie.iso", 700);
    assert!(matches!(
        service(&fx).read_request("disk1", "bytes=ten-20"),
        Err(DiskError::MalformedRange(_))
    ));
}

#[test]
fn largest_end_on_empty_image() {
    let fx = Fixture::new();
    write_image(fx.root.path(), "empty.iso", 0);
    write_image(fx.root.path(), "movie.iso", 700);
    let service = service(&fx);

    assert!(matches!(
        service.read_request("disk1", "bytes=0-18446744073709551615"),
        Err(DiskError::RangeExceedsDeviceSize { overage: u64::MAX, size: 0 })
    ));
    assert!(matches!(
        service.read_request("disk2", "bytes=0-18446744073709551615"),
        Err(DiskError::RangeExceedsDeviceSize { size: 700, .. })
    ));
}

#[test]
fn largest_end_on_empty_drive() {
    let fx = Fixture::new();
    let node = fx.device_node("sr0", 4096);
    fx.probe.set_drives(&[&node]);
    fx.probe.set_state(&node, DriveState::Empty);

    let drive = fx.registry.get("disk1").unwrap();
    assert!(matches!(
        drive.read(0, Some(u64::MAX)),
        Err(DiskError::RangeExceedsDeviceSize { overage: u64::MAX, size: 0 })
    ));
}

#[test]
fn ingest_keeps_existing_image() {
    let fx = Fixture::new();
    write_image(fx.root.path(), "movie.iso", 700);
    let service = service(&fx);

    assert!(matches!(
        service.ingest("movie.iso", &b"new"[..], Arc::new(AtomicBool::new(true)), |_| {}),
        Err(DiskError::ImageExists(_))
    ));
    assert_eq!(service.read("disk1", 0, None).unwrap().data, pattern(700));
}

#[test]
fn ready_drive_serves_its_volume() {
    let fx = Fixture::new();
    let node = fx.device_node("sr0", 4096);
    fx.probe.set_drives(&[&node]);
    fx.probe.insert_disc(&node, "BACKUP_01", 2048, 2);
    let service = service(&fx);

    let response = service.read("disk1", 2048, None).unwrap();
    assert_eq!(response.data, &pattern(4096)[2048..]);
    assert_eq!(response.content_range(), "bytes 2048-4095/4096");
    assert!(matches!(
        service.read("disk1", 0, Some(4096)),
        Err(DiskError::RangeExceedsDeviceSize { overage: 1, size: 4096 })
    ));
}

#[test]
fn truncated_image_fails_instead_of_short_read() {
    let fx = Fixture::new();
    let path = write_image(fx.root.path(), "movie.iso", 700);
    let disk = fx.registry.get("disk1").unwrap();
    assert_eq!(disk.size().unwrap(), 700);

    std::fs::write(&path, pattern(100)).unwrap();
    assert!(matches!(
        disk.read(0, Some(699)),
        Err(DiskError::RangeExceedsDeviceSize { overage: 600, size: 100 })
    ));
    // The stale size was dropped; the next read sees the new length.
    assert_eq!(disk.size().unwrap(), 100);
    assert_eq!(disk.read(0, None).unwrap(), pattern(100));
}

#[test]
fn ingest_refreshes_catalog() {
    let fx = Fixture::new();
    let service = service(&fx);
    assert!(service.list().unwrap().is_empty());
    assert_eq!(fx.notifier.calls(), 1);

    let body = pattern(5000);
    let report = service
        .ingest(
            "upload.iso",
            body.as_slice(),
            Arc::new(AtomicBool::new(true)),
            |_| {},
        )
        .unwrap();
    assert_eq!(report.size, 5000);
    assert_eq!(fx.notifier.calls(), 2);

    let listing = service.list().unwrap();
    assert_eq!(listing.len(), 1);
    assert_eq!(listing[0].label, "upload");
    assert_eq!(service.read("disk1", 0, None).unwrap().data, body);
}

#[test]
fn ingest_rejects_non_images() {
    let fx = Fixture::new();
    let service = service(&fx);
    assert!(matches!(
        service.ingest("notes.txt", &b"x"[..], Arc::new(AtomicBool::new(true)), |_| {}),
        Err(DiskError::UnsupportedImage(_))
    ));
}

#[derive(Default)]
struct RecordingPublisher {
    events: Mutex<Vec<(&'static str, ServiceRecord)>>,
}

impl Publisher for RecordingPublisher {
    fn publish(&self, record: &ServiceRecord) -> Result<(), NotifierError> {
        self.events.lock().push(("publish", record.clone()));
        Ok(())
    }

    fn withdraw(&self, record: &ServiceRecord) -> Result<(), NotifierError> {
        self.events.lock().push(("withdraw", record.clone()));
        Ok(())
    }
}

fn announcing_registry(
    fx: &Fixture,
) -> (Arc<AnnouncingNotifier<RecordingPublisher>>, DiskRegistry) {
    let config = ServerConfig {
        host: Some("192.0.2.10".to_string()),
        port: 65432,
        ..ServerConfig::default()
    };
    let notifier = Arc::new(AnnouncingNotifier::with_hostname(
        RecordingPublisher::default(),
        &config,
        "studio",
    ));
    let registry = DiskRegistry::new(fx.root.path(), fx.probe.clone(), notifier.clone());
    (notifier, registry)
}

#[test]
fn announces_each_disk() {
    let fx = Fixture::new();
    write_image(fx.root.path(), "movie.iso", 700);
    let (notifier, registry) = announcing_registry(&fx);

    registry.update().unwrap();
    let record = notifier.current().unwrap();
    assert_eq!(record.instance, "192.0.2.10@studio");
    assert_eq!(record.port, 65432);
    assert_eq!(record.full_name(), "192.0.2.10@studio_odisk._tcp.local.");
    assert_eq!(
        record.txt["sys"],
        "waMA=A4:BA:DB:E7:89:CD,adVF=0x4,adDT=0x3,adCC=1"
    );
    assert_eq!(record.txt["disk1"], format!("adVN=movie,adVT={MEDIA_TYPE}"));
}

#[test]
fn reannounce_withdraws_previous_record() {
    let fx = Fixture::new();
    write_image(fx.root.path(), "movie.iso", 700);
    let (notifier, registry) = announcing_registry(&fx);

    registry.update().unwrap();
    registry.update().unwrap();
    write_image(fx.root.path(), "backup.img", 100);
    registry.update().unwrap();

    let events = notifier.publisher().events.lock();
    let kinds: Vec<&str> = events.iter().map(|(kind, _)| *kind).collect();
    assert_eq!(kinds, ["publish", "withdraw", "publish"]);
    assert_eq!(events[1].1, events[0].1);
    assert_eq!(events[2].1.txt.len(), 3);
    assert_eq!(events[2].1.txt["disk1"], "adVN=backup,adVT=public.cd-media");
}
