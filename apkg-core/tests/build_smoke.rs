use apkg_core::format::{ArchiveHeader, IndexRecord, FORMAT_VERSION};
use apkg_core::manifest;
use apkg_core::{build, BuildError};
use std::fs;
use std::io::Cursor;

fn decode(bytes: &[u8]) -> (ArchiveHeader, Vec<IndexRecord>) {
    let mut cur = Cursor::new(bytes);
    let header = ArchiveHeader::read_from(&mut cur).unwrap();
    let records =
        (0..header.entry_count).map(|_| IndexRecord::read_from(&mut cur).unwrap()).collect();
    (header, records)
}

#[test]
fn two_entries_make_a_52_byte_archive() {
    let td = tempfile::tempdir().unwrap();
    fs::write(td.path().join("a.bin"), [0xAAu8; 3]).unwrap();
    fs::write(td.path().join("b.bin"), [0xBBu8; 5]).unwrap();
    let mpath = td.path().join("pack.apkg");
    fs::write(&mpath, "1 a.bin\n2 b.bin\n").unwrap();

    let m = manifest::parse(&mpath).unwrap();
    let out = td.path().join("pack.apkg.bin");
    let report = build(&m, m.base_dir(), &out).unwrap();
    assert_eq!(report.entries, 2);
    assert_eq!(report.data_bytes, 8);
    assert_eq!(report.archive_bytes, 52);

    let bytes = fs::read(&out).unwrap();
    assert_eq!(bytes.len(), 52);
    let (header, records) = decode(&bytes);
    assert_eq!(header.format_version, FORMAT_VERSION);
    assert_eq!(header.entry_count, 2);
    assert_eq!(header.data_start_offset, 44);
    assert_eq!(records[0], IndexRecord { id: 1, start: 0, size: 3 });
    assert_eq!(records[1], IndexRecord { id: 2, start: 3, size: 5 });
    assert_eq!(&bytes[44..47], &[0xAA; 3]);
    assert_eq!(&bytes[47..52], &[0xBB; 5]);
}

#[test]
fn empty_manifest_is_header_only() {
    let td = tempfile::tempdir().unwrap();
    let mpath = td.path().join("empty.apkg");
    fs::write(&mpath, "").unwrap();
    let m = manifest::parse(&mpath).unwrap();
    assert!(m.is_empty());

    let out = td.path().join("empty.apkg.bin");
    build(&m, m.base_dir(), &out).unwrap();
    let bytes = fs::read(&out).unwrap();
    assert_eq!(bytes, vec![0x00, 0x01, 0, 0, 0, 0, 0, 0, 12, 0, 0, 0]);
}

#[test]
fn rebuild_is_byte_identical() {
    let td = tempfile::tempdir().unwrap();
    fs::create_dir(td.path().join("img")).unwrap();
    fs::write(td.path().join("img/hero sprite.png"), b"not really a png").unwrap();
    fs::write(td.path().join("level.dat"), vec![7u8; 4096]).unwrap();
    let mpath = td.path().join("game.apkg");
    fs::write(&mpath, "100 img/hero sprite.png\n200 level.dat\n").unwrap();

    let m = manifest::parse(&mpath).unwrap();
    let first = td.path().join("first.bin");
    let second = td.path().join("second.bin");
    build(&m, m.base_dir(), &first).unwrap();
    build(&m, m.base_dir(), &second).unwrap();
    assert_eq!(fs::read(&first).unwrap(), fs::read(&second).unwrap());
}

#[test]
fn missing_asset_fails_with_its_line() {
    let td = tempfile::tempdir().unwrap();
    fs::write(td.path().join("a.bin"), b"abc").unwrap();
    let mpath = td.path().join("pack.apkg");
    fs::write(&mpath, "1 a.bin\n2 gone.bin\n").unwrap();

    let m = manifest::parse(&mpath).unwrap();
    let out = td.path().join("pack.apkg.bin");
    let err = build(&m, m.base_dir(), &out).expect_err("expected probe failure");
    assert!(matches!(err, BuildError::Probe { line: 2, .. }), "{err:?}");
    let msg = err.to_string();
    assert!(msg.contains("gone.bin"), "unexpected error: {msg}");
}

#[test]
fn manifest_errors_abort_before_any_entry_is_returned() {
    let td = tempfile::tempdir().unwrap();
    let mpath = td.path().join("bad.apkg");
    fs::write(&mpath, "1 a.bin\nabc b.bin\n").unwrap();
    let err = manifest::parse(&mpath).unwrap_err();
    assert!(matches!(err, manifest::ManifestError::InvalidId { line: 2, .. }), "{err:?}");
    assert!(err.to_string().contains("bad.apkg"));

    let err = manifest::parse(&td.path().join("absent.apkg")).unwrap_err();
    assert!(matches!(err, manifest::ManifestError::Open { .. }));
}

#[test]
fn duplicate_ids_are_packed_as_listed() {
    let td = tempfile::tempdir().unwrap();
    fs::write(td.path().join("x"), b"xx").unwrap();
    fs::write(td.path().join("y"), b"yyy").unwrap();
    let m = manifest::parse_str("dup.apkg", "9 x\n9 y\n").unwrap();
    let out = td.path().join("dup.bin");
    build(&m, td.path(), &out).unwrap();
    let (_, records) = decode(&fs::read(&out).unwrap());
    assert_eq!(records, vec![
        IndexRecord { id: 9, start: 0, size: 2 },
        IndexRecord { id: 9, start: 2, size: 3 },
    ]);
}

#[test]
fn failed_rebuild_does_not_leave_previous_archive() {
    let td = tempfile::tempdir().unwrap();
    fs::write(td.path().join("a.bin"), b"abc").unwrap();
    let mpath = td.path().join("pack.apkg");
    let out = td.path().join("pack.apkg.bin");

    fs::write(&mpath, "1 a.bin\n").unwrap();
    let m = manifest::parse(&mpath).unwrap();
    build(&m, m.base_dir(), &out).unwrap();
    assert!(apkg_core::inspect::read_layout(&out).unwrap().check().is_empty());

    fs::write(&mpath, "1 a.bin\n2 gone.bin\n").unwrap();
    let m = manifest::parse(&mpath).unwrap();
    build(&m, m.base_dir(), &out).expect_err("expected probe failure");

    // the old archive is gone; whatever is left does not decode as a valid one
    let left = fs::read(&out).unwrap();
    assert!(left.len() < 12, "stale archive of {} bytes left behind", left.len());
    assert!(apkg_core::inspect::read_layout(&out).is_err());
}
