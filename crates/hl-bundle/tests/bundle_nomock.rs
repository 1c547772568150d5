//! No-mock delivery archive and sealed report tests.
//!
//! Exercises real files in temp directories:
//! - archives built from artifacts on disk verify on read-back
//! - corrupted archives fail verification
//! - sealed report documents decrypt with the right passphrase only

use chrono::NaiveDate;
use hl_bundle::{
    decrypt_bytes, encrypt_bytes, BundleError, BundleReader, BundleWriter, HostInfo,
    ReportDocument, BUNDLE_SCHEMA_VERSION, MANIFEST_FILE_NAME,
};
use hl_common::{EventType, Record, RecordKind};
use std::io::Read;
use tempfile::TempDir;

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 5).unwrap()
}

fn sealed_event_report(passphrase: &str) -> Vec<u8> {
    let start = day().and_hms_opt(9, 0, 0).unwrap();
    let close = day().and_hms_opt(17, 30, 0).unwrap();
    let records = vec![
        Record::event(start, EventType::Start, 4242, "editor", "/opt/editor/bin/editor"),
        Record::event(close, EventType::Close, 4242, "editor", "/opt/editor/bin/editor"),
    ];
    let doc = ReportDocument::new(
        RecordKind::Event,
        day(),
        "dev-1",
        "UTC+8",
        HostInfo::default(),
        &records,
    );
    encrypt_bytes(&doc.to_json_bytes().unwrap(), passphrase).unwrap()
}

#[test]
fn test_archive_of_artifacts_on_disk_verifies() {
    let dir = TempDir::new().unwrap();
    let names = [
        "dev-1_2024-01-05_UTC+8_hardware.hlr",
        "dev-1_2024-01-05_UTC+8_events.hlr",
        "dev-1_2024-01-06_UTC+8_events.hlr",
    ];
    for name in names {
        std::fs::write(dir.path().join(name), sealed_event_report("pw")).unwrap();
    }

    let mut writer = BundleWriter::new("office-pc", "2024-01-05~2024-01-06");
    for name in names {
        writer.add_path(&dir.path().join(name)).unwrap();
    }
    let archive = dir.path().join("Logs_office-pc(2024-01-05~2024-01-06).zip");
    let manifest = writer.write(&archive).unwrap();
    assert_eq!(manifest.file_count(), 3);
    assert_eq!(manifest.bundle_version, BUNDLE_SCHEMA_VERSION);

    let mut reader = BundleReader::open(&archive).unwrap();
    assert_eq!(reader.manifest().label, "2024-01-05~2024-01-06");
    assert!(reader.verify_all().is_empty());

    let on_disk = std::fs::read(dir.path().join(names[1])).unwrap();
    assert_eq!(reader.read_file(names[1]).unwrap(), on_disk);
}

#[test]
fn test_manifest_is_first_entry() {
    let mut writer = BundleWriter::new("office-pc", "2024-01-05");
    writer.add_file("a.hlr", b"a".to_vec());
    let (bytes, _) = writer.write_to_vec().unwrap();

    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();
    let mut first = archive.by_index(0).unwrap();
    assert_eq!(first.name(), MANIFEST_FILE_NAME);
    let mut json = String::new();
    first.read_to_string(&mut json).unwrap();
    assert!(json.contains("\"device_name\": \"office-pc\""));
}

#[test]
fn test_tampered_entry_fails_checksum() {
    use std::io::Write;

    // Rebuild an archive whose manifest lists a checksum for different content.
    let mut writer = BundleWriter::new("office-pc", "2024-01-05");
    writer.add_file("a.hlr", b"original".to_vec());
    let (_, manifest) = writer.write_to_vec().unwrap();

    let mut buffer = std::io::Cursor::new(Vec::new());
    {
        let mut zip = zip::ZipWriter::new(&mut buffer);
        let options: zip::write::FileOptions<'_, ()> = zip::write::FileOptions::default();
        zip.start_file(MANIFEST_FILE_NAME, options).unwrap();
        zip.write_all(manifest.to_json().unwrap().as_bytes()).unwrap();
        zip.start_file("a.hlr", options).unwrap();
        zip.write_all(b"tampered").unwrap();
        zip.finish().unwrap();
    }

    let mut reader = BundleReader::from_bytes(buffer.into_inner()).unwrap();
    assert!(matches!(
        reader.read_file("a.hlr"),
        Err(BundleError::ChecksumMismatch { .. })
    ));
    assert_eq!(reader.verify_all(), vec!["a.hlr".to_string()]);
}

#[test]
fn test_archive_without_manifest_is_rejected() {
    use std::io::Write;

    let mut buffer = std::io::Cursor::new(Vec::new());
    {
        let mut zip = zip::ZipWriter::new(&mut buffer);
        let options: zip::write::FileOptions<'_, ()> = zip::write::FileOptions::default();
        zip.start_file("a.hlr", options).unwrap();
        zip.write_all(b"x").unwrap();
        zip.finish().unwrap();
    }
    assert!(matches!(
        BundleReader::from_bytes(buffer.into_inner()),
        Err(BundleError::MissingFile(_))
    ));
}

#[test]
fn test_sealed_report_decrypts_to_document() {
    let sealed = sealed_event_report("correct horse");
    assert!(!String::from_utf8_lossy(&sealed).contains("editor"));

    let plain = decrypt_bytes(&sealed, "correct horse").unwrap();
    let doc = ReportDocument::from_json_bytes(&plain).unwrap();
    assert_eq!(doc.kind, RecordKind::Event);
    assert_eq!(doc.day, day());
    assert_eq!(doc.record_count, 2);
    assert_eq!(
        doc.table.cell(0, "event_type"),
        Some(&serde_json::json!("start"))
    );

    assert!(decrypt_bytes(&sealed, "battery staple").is_err());
}
